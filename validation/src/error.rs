use egm_types::{RedemptionState, RedemptionStatus, TransactionId, TransferCode};
use thiserror::Error;

use crate::redemption::Trigger;

/// Reasons a ticket-out or handpay validation was not produced.
///
/// None of these are fatal: the caller treats a refused validation as "no ticket this time" and
/// moves on to the next payment method.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("cash-out is disabled")]
    CashoutDisabled,
    #[error("non-cash tickets are not allowed")]
    NonCashOutNotAllowed,
    #[error("amount must be greater than zero")]
    InvalidAmount,
    #[error("machine validation id is not configured")]
    NotConfigured,
    #[error("host is offline")]
    HostOffline,
    #[error("host did not supply a validation number in time")]
    Timeout,
    #[error("ticket rejected by expiration policy: {0}")]
    ExpirationRejected(&'static str),
    #[error("a prior validation is awaiting host acknowledgement (transaction={0:?})")]
    AcknowledgementPending(Option<TransactionId>),
    #[error("validation history is full of unacknowledged records")]
    HistorySaturated,
    #[error("a validation request is already in flight")]
    RequestInFlight,
    #[error("invalid validation id (machine_id={machine_id}, sequence={sequence})")]
    InvalidValidationId { machine_id: u32, sequence: u32 },
    #[error("operation not supported by the active validation policy")]
    UnsupportedByPolicy,
}

/// Why an inserted ticket was refused.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RedemptionError {
    #[error("ticket rejected by host (transfer_code={0:?})")]
    RejectedByHost(TransferCode),
    #[error("ticket unknown to the host (transfer_code={0:?})")]
    InvalidTicket(TransferCode),
    #[error("ticket already redeemed")]
    AlreadyRedeemed,
    #[error("ticket expired")]
    Expired,
    #[error("invalid transfer amount: {0}")]
    InvalidAmount(u64),
    #[error("transfer amount {amount} exceeds limit {limit}")]
    AmountExceedsLimit { amount: u64, limit: u64 },
    #[error("host answered for a different barcode")]
    BarcodeMismatch,
}

impl RedemptionError {
    /// Classifies a non-redeemable transfer code.
    pub fn from_transfer_code(code: TransferCode) -> Option<Self> {
        match code {
            TransferCode::ValidCashableTicket
            | TransferCode::ValidRestrictedPromotionalTicket
            | TransferCode::ValidNonRestrictedPromotionalTicket
            | TransferCode::RequestForCurrentTicketStatus => None,
            TransferCode::NotAValidValidationNumber
            | TransferCode::ValidationNumberNotInSystem
            | TransferCode::TicketAmountDoesNotMatchSystem => Some(Self::InvalidTicket(code)),
            TransferCode::TicketAlreadyRedeemed => Some(Self::AlreadyRedeemed),
            TransferCode::TicketExpired => Some(Self::Expired),
            TransferCode::UnableToValidate
            | TransferCode::TicketMarkedPendingInSystem
            | TransferCode::ValidationInformationNotAvailable
            | TransferCode::TicketAmountExceedsAutoRedemptionLimit => {
                Some(Self::RejectedByHost(code))
            }
        }
    }

    /// Status reported back to the host for this refusal.
    pub fn status(&self) -> RedemptionStatus {
        match self {
            Self::RejectedByHost(_)
            | Self::InvalidTicket(_)
            | Self::AlreadyRedeemed
            | Self::Expired => RedemptionStatus::TicketRejectedByHost,
            Self::InvalidAmount(_) => RedemptionStatus::NotAValidTransferAmount,
            Self::AmountExceedsLimit { .. } => RedemptionStatus::TransferAmountExceededCreditLimit,
            Self::BarcodeMismatch => RedemptionStatus::ValidationNumberDoesNotMatch,
        }
    }
}

/// A redemption request the coordinator could not carry out.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TransitionError {
    #[error("invalid state transition (state={state:?}, trigger={trigger:?})")]
    InvalidStateTransition {
        state: RedemptionState,
        trigger: Trigger,
    },
    /// Nothing was released; the coordinator stays in its previous state.
    #[error("redemption state not persisted (target={target:?})")]
    NotPersisted { target: RedemptionState },
    #[error("redemption coordinator stopped")]
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redeemable_codes_are_not_errors() {
        assert!(RedemptionError::from_transfer_code(TransferCode::ValidCashableTicket).is_none());
        assert!(
            RedemptionError::from_transfer_code(TransferCode::RequestForCurrentTicketStatus)
                .is_none()
        );
    }

    #[test]
    fn host_rejections_map_to_statuses() {
        assert_eq!(
            RedemptionError::from_transfer_code(TransferCode::TicketAlreadyRedeemed),
            Some(RedemptionError::AlreadyRedeemed)
        );
        assert_eq!(
            RedemptionError::from_transfer_code(TransferCode::TicketExpired)
                .map(|e| e.status()),
            Some(RedemptionStatus::TicketRejectedByHost)
        );
        assert_eq!(
            RedemptionError::AmountExceedsLimit {
                amount: 10,
                limit: 5
            }
            .status(),
            RedemptionStatus::TransferAmountExceededCreditLimit
        );
        assert_eq!(
            RedemptionError::BarcodeMismatch.status(),
            RedemptionStatus::ValidationNumberDoesNotMatch
        );
    }
}
