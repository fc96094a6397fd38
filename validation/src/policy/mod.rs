//! Validation policies.
//!
//! A policy decides whether a ticket-out may be validated, produces the validation record handed
//! to the printer, and reacts to confirmed completions. Exactly one policy is active; see
//! [`crate::selector`].

use anyhow::Result;
use chrono::NaiveDateTime;
use egm_types::{
    HandpayTransaction, HandpayType, TicketOutInfo, TicketType, TransactionId, ValidationResponse,
    ValidationType, VoucherOutTransaction, NEVER_EXPIRES,
};
use std::{future::Future, sync::Arc};

use crate::{
    config::{ValidationConfig, ValidationMode},
    error::ValidationError,
    ports::Clock,
};

mod none;
mod secure_enhanced;
mod system;

pub use none::NonePolicy;
pub use secure_enhanced::SecureEnhancedPolicy;
pub use system::SystemPolicy;

use crate::store::Store;

pub trait ValidationPolicy: Send + Sync {
    fn mode(&self) -> ValidationMode;

    fn can_validate_ticket_out(
        &self,
        amount: u64,
        ticket_type: TicketType,
    ) -> impl Future<Output = bool> + Send;

    /// Returns `None` when no ticket may be printed right now.
    fn request_ticket_out_validation(
        &self,
        amount: u64,
        ticket_type: TicketType,
    ) -> impl Future<Output = Option<TicketOutInfo>> + Send;

    /// Handpays are always paid; the barcode is empty when no number could be produced.
    fn request_handpay_validation(
        &self,
        amount: u64,
        handpay_type: HandpayType,
    ) -> impl Future<Output = TicketOutInfo> + Send;

    fn on_ticket_out_completed(
        &self,
        transaction: &VoucherOutTransaction,
    ) -> impl Future<Output = Result<()>> + Send;

    fn on_handpay_completed(
        &self,
        transaction: &HandpayTransaction,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Rules shared by every policy: global cash-out switches and ticket expiration.
#[derive(Clone)]
pub struct PolicyBase {
    config: Arc<ValidationConfig>,
    clock: Arc<dyn Clock>,
}

impl PolicyBase {
    pub fn new(config: Arc<ValidationConfig>, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    pub fn check_ticket_out(&self, amount: u64, ticket_type: TicketType) -> Result<(), ValidationError> {
        if !self.config.cashout_enabled {
            return Err(ValidationError::CashoutDisabled);
        }
        if amount == 0 {
            return Err(ValidationError::InvalidAmount);
        }
        if ticket_type.is_non_cash() && !self.config.allow_non_cash_out {
            return Err(ValidationError::NonCashOutNotAllowed);
        }
        Ok(())
    }

    /// Expiration days and pool id printed on a ticket of `ticket_type` issued at `now`.
    pub fn expiration(
        &self,
        ticket_type: TicketType,
        now: NaiveDateTime,
    ) -> Result<(u16, u16), ValidationError> {
        match ticket_type {
            TicketType::CashOut | TicketType::NonRestricted => {
                Ok((cashable_days(self.config.ticket_expiration_days), 0))
            }
            TicketType::Restricted => {
                let pool_id = self.config.restricted_pool_id;
                if let Some(date) = self.config.restricted_expiration_date {
                    let days = (date - now.date()).num_days();
                    if days < 0 {
                        return Err(ValidationError::ExpirationRejected(
                            "restricted expiration date has passed",
                        ));
                    }
                    let days = u16::try_from(days)
                        .unwrap_or(NEVER_EXPIRES)
                        .min(NEVER_EXPIRES);
                    return Ok((days, pool_id));
                }
                if self.config.restricted_expiration_days == 0 {
                    return Err(ValidationError::ExpirationRejected(
                        "restricted tickets have no expiration configured",
                    ));
                }
                Ok((self.config.restricted_expiration_days, pool_id))
            }
        }
    }

    pub fn ticket_out(
        &self,
        amount: u64,
        ticket_type: TicketType,
        issued_at: NaiveDateTime,
        barcode: String,
    ) -> Result<TicketOutInfo, ValidationError> {
        let (expiration_days, pool_id) = self.expiration(ticket_type, issued_at)?;
        Ok(TicketOutInfo {
            amount,
            issued_at,
            barcode,
            ticket_type,
            expiration_days,
            pool_id,
        })
    }

    pub fn handpay(&self, amount: u64, issued_at: NaiveDateTime, barcode: String) -> TicketOutInfo {
        TicketOutInfo {
            amount,
            issued_at,
            barcode,
            ticket_type: TicketType::CashOut,
            expiration_days: cashable_days(self.config.ticket_expiration_days),
            pool_id: 0,
        }
    }
}

fn cashable_days(days: u16) -> u16 {
    if days == 0 {
        NEVER_EXPIRES
    } else {
        days.min(NEVER_EXPIRES)
    }
}

/// History payload for a printed ticket.
pub(crate) fn ticket_response(
    transaction: &VoucherOutTransaction,
    validation_system_id: u8,
) -> ValidationResponse {
    ValidationResponse {
        validation_type: ValidationType::from_ticket(transaction.ticket_type),
        index: 0,
        issued_at: transaction.issued_at,
        validation_number: transaction.barcode.clone(),
        amount: transaction.amount,
        ticket_number: ticket_number(transaction.id),
        validation_system_id,
        expiration_days: transaction.expiration_days,
        pool_id: transaction.pool_id,
    }
}

/// History payload for a paid handpay.
pub(crate) fn handpay_response(
    transaction: &HandpayTransaction,
    validation_system_id: u8,
    expiration_days: u16,
) -> ValidationResponse {
    ValidationResponse {
        validation_type: ValidationType::from_handpay(transaction.handpay_type),
        index: 0,
        issued_at: transaction.issued_at,
        validation_number: transaction.barcode.clone(),
        amount: transaction.amount,
        ticket_number: ticket_number(transaction.id),
        validation_system_id,
        expiration_days,
        pool_id: 0,
    }
}

fn ticket_number(id: TransactionId) -> u16 {
    (id.0 % (u16::MAX as u64 + 1)) as u16
}

/// The configured policy.
pub enum ActivePolicy<S: Store> {
    None(NonePolicy),
    SecureEnhanced(SecureEnhancedPolicy<S>),
    System(SystemPolicy<S>),
}

impl<S: Store> ActivePolicy<S> {
    pub fn as_secure_enhanced(&self) -> Option<&SecureEnhancedPolicy<S>> {
        match self {
            ActivePolicy::SecureEnhanced(policy) => Some(policy),
            _ => None,
        }
    }

    pub fn as_system(&self) -> Option<&SystemPolicy<S>> {
        match self {
            ActivePolicy::System(policy) => Some(policy),
            _ => None,
        }
    }
}

impl<S: Store> ValidationPolicy for ActivePolicy<S> {
    fn mode(&self) -> ValidationMode {
        match self {
            ActivePolicy::None(policy) => policy.mode(),
            ActivePolicy::SecureEnhanced(policy) => policy.mode(),
            ActivePolicy::System(policy) => policy.mode(),
        }
    }

    async fn can_validate_ticket_out(&self, amount: u64, ticket_type: TicketType) -> bool {
        match self {
            ActivePolicy::None(policy) => policy.can_validate_ticket_out(amount, ticket_type).await,
            ActivePolicy::SecureEnhanced(policy) => {
                policy.can_validate_ticket_out(amount, ticket_type).await
            }
            ActivePolicy::System(policy) => {
                policy.can_validate_ticket_out(amount, ticket_type).await
            }
        }
    }

    async fn request_ticket_out_validation(
        &self,
        amount: u64,
        ticket_type: TicketType,
    ) -> Option<TicketOutInfo> {
        match self {
            ActivePolicy::None(policy) => {
                policy.request_ticket_out_validation(amount, ticket_type).await
            }
            ActivePolicy::SecureEnhanced(policy) => {
                policy.request_ticket_out_validation(amount, ticket_type).await
            }
            ActivePolicy::System(policy) => {
                policy.request_ticket_out_validation(amount, ticket_type).await
            }
        }
    }

    async fn request_handpay_validation(
        &self,
        amount: u64,
        handpay_type: HandpayType,
    ) -> TicketOutInfo {
        match self {
            ActivePolicy::None(policy) => policy.request_handpay_validation(amount, handpay_type).await,
            ActivePolicy::SecureEnhanced(policy) => {
                policy.request_handpay_validation(amount, handpay_type).await
            }
            ActivePolicy::System(policy) => {
                policy.request_handpay_validation(amount, handpay_type).await
            }
        }
    }

    async fn on_ticket_out_completed(&self, transaction: &VoucherOutTransaction) -> Result<()> {
        match self {
            ActivePolicy::None(policy) => policy.on_ticket_out_completed(transaction).await,
            ActivePolicy::SecureEnhanced(policy) => policy.on_ticket_out_completed(transaction).await,
            ActivePolicy::System(policy) => policy.on_ticket_out_completed(transaction).await,
        }
    }

    async fn on_handpay_completed(&self, transaction: &HandpayTransaction) -> Result<()> {
        match self {
            ActivePolicy::None(policy) => policy.on_handpay_completed(transaction).await,
            ActivePolicy::SecureEnhanced(policy) => policy.on_handpay_completed(transaction).await,
            ActivePolicy::System(policy) => policy.on_handpay_completed(transaction).await,
        }
    }
}
