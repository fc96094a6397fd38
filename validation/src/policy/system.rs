use anyhow::Result;
use egm_types::{
    HandpayTransaction, HandpayType, HostException, TicketOutInfo, TicketType,
    TransactionId, ValidationResponse, VoucherOutTransaction,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{handpay_response, ticket_response, PolicyBase, ValidationPolicy};
use crate::{
    config::ValidationMode,
    error::ValidationError,
    history::{persist_history, SharedHistory},
    ports::Ports,
    store::Store,
    system_validation::{CashoutType, SystemValidationCoordinator},
};

/// Validation numbers assigned by the host.
pub struct SystemPolicy<S: Store> {
    base: PolicyBase,
    ports: Ports,
    store: Arc<S>,
    coordinator: SystemValidationCoordinator,
    history: SharedHistory,
}

impl<S: Store> SystemPolicy<S> {
    pub fn new(base: PolicyBase, ports: Ports, store: Arc<S>, history: SharedHistory) -> Self {
        let coordinator =
            SystemValidationCoordinator::new(ports.host.clone(), base.config().system_validation_timeout());
        Self {
            base,
            ports,
            store,
            coordinator,
            history,
        }
    }

    pub fn coordinator(&self) -> &SystemValidationCoordinator {
        &self.coordinator
    }

    /// Cancels any outstanding request so the caller can fall back to another device.
    pub async fn on_host_offline(&self) {
        self.coordinator.on_system_disabled().await;
    }

    fn eligibility(&self, amount: u64, ticket_type: TicketType) -> Result<(), ValidationError> {
        self.base.check_ticket_out(amount, ticket_type)?;
        if !self.ports.host.is_online() {
            return Err(ValidationError::HostOffline);
        }
        if self.ports.ledger.any_awaiting_host_acknowledgement() {
            let blocking = self.ports.ledger.next_awaiting_host_acknowledgement();
            return Err(ValidationError::AcknowledgementPending(blocking));
        }
        Ok(())
    }

    async fn record(
        &self,
        transaction_id: TransactionId,
        barcode: &str,
        response: ValidationResponse,
        exception: HostException,
    ) -> Result<()> {
        if barcode.is_empty() {
            debug!(id = %transaction_id, "completion without barcode; nothing to record");
            return Ok(());
        }
        let mut history = self.history.lock().await;
        if history.contains(transaction_id) {
            debug!(id = %transaction_id, "completion already recorded");
            return Ok(());
        }
        let mut next = history.clone();
        let record = next.append(transaction_id, response);
        persist_history(self.store.as_ref(), &next).await?;
        *history = next;
        drop(history);

        info!(
            id = %transaction_id,
            host_sequence = record.host_sequence,
            index = record.response.index,
            "validation recorded"
        );
        self.ports.host.raise_exception(exception);
        Ok(())
    }
}

/// Validation system id printed in front of a host-assigned number.
fn system_id_of(barcode: &str) -> u8 {
    barcode
        .get(..2)
        .and_then(|prefix| prefix.parse().ok())
        .unwrap_or_default()
}

impl<S: Store> ValidationPolicy for SystemPolicy<S> {
    fn mode(&self) -> ValidationMode {
        ValidationMode::System
    }

    async fn can_validate_ticket_out(&self, amount: u64, ticket_type: TicketType) -> bool {
        self.eligibility(amount, ticket_type).is_ok()
    }

    async fn request_ticket_out_validation(
        &self,
        amount: u64,
        ticket_type: TicketType,
    ) -> Option<TicketOutInfo> {
        if let Err(reason) = self.eligibility(amount, ticket_type) {
            info!(amount, ?ticket_type, %reason, "ticket-out validation refused");
            return None;
        }
        // Reject on expiration before bothering the host.
        if let Err(reason) = self.base.expiration(ticket_type, self.base.now()) {
            info!(amount, ?ticket_type, %reason, "ticket-out validation refused");
            return None;
        }

        let Some(result) = self
            .coordinator
            .get_validation_results(amount, CashoutType::Ticket(ticket_type))
            .await
        else {
            info!(amount, ?ticket_type, reason = %ValidationError::Timeout, "no validation number from host");
            return None;
        };
        self.base
            .ticket_out(amount, ticket_type, self.base.now(), result.barcode())
            .ok()
    }

    async fn request_handpay_validation(
        &self,
        amount: u64,
        handpay_type: HandpayType,
    ) -> TicketOutInfo {
        let barcode = if self.ports.host.is_online() {
            self.coordinator
                .get_validation_results(amount, CashoutType::Handpay(handpay_type))
                .await
                .map(|result| result.barcode())
                .unwrap_or_default()
        } else {
            String::new()
        };
        if barcode.is_empty() {
            warn!(amount, ?handpay_type, "handpay paid without validation number");
        }
        self.base.handpay(amount, self.base.now(), barcode)
    }

    async fn on_ticket_out_completed(&self, transaction: &VoucherOutTransaction) -> Result<()> {
        self.record(
            transaction.id,
            &transaction.barcode,
            ticket_response(transaction, system_id_of(&transaction.barcode)),
            HostException::CashoutTicketPrinted,
        )
        .await
    }

    async fn on_handpay_completed(&self, transaction: &HandpayTransaction) -> Result<()> {
        let expiration_days = self
            .base
            .handpay(transaction.amount, transaction.issued_at, String::new())
            .expiration_days;
        self.record(
            transaction.id,
            &transaction.barcode,
            handpay_response(
                transaction,
                system_id_of(&transaction.barcode),
                expiration_days,
            ),
            HostException::HandpayValidated,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ValidationConfig,
        history::ValidationHistory,
        mocks::{mock_ports, Mocks},
        store::Memory,
    };
    use egm_types::SystemValidationState;
    use tokio::sync::Mutex;

    fn policy() -> (Arc<SystemPolicy<Memory>>, Mocks) {
        let (ports, mocks) = mock_ports();
        let config = ValidationConfig::with_mode(ValidationMode::System);
        let history = Arc::new(Mutex::new(ValidationHistory::new(config.history_capacity)));
        let base = PolicyBase::new(Arc::new(config), ports.clock.clone());
        let policy = SystemPolicy::new(base, ports, Arc::new(Memory::default()), history);
        (Arc::new(policy), mocks)
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn parses_system_id_prefix() {
        assert_eq!(system_id_of("120000000000000345"), 12);
        assert_eq!(system_id_of(""), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn ticket_out_uses_host_number() {
        let (policy, mocks) = policy();
        let request = tokio::spawn({
            let policy = policy.clone();
            async move {
                policy
                    .request_ticket_out_validation(750, TicketType::CashOut)
                    .await
            }
        });
        settle().await;
        let data = policy
            .coordinator()
            .get_pending_validation_data()
            .await
            .unwrap();
        assert_eq!(data.amount, 750);
        policy
            .coordinator()
            .set_host_validation_result(4, 1234)
            .await;

        let ticket = request.await.unwrap().unwrap();
        assert_eq!(ticket.barcode, "040000000000001234");
        assert_eq!(mocks.host.cashout_read_requests(), 1);

        let tx = VoucherOutTransaction {
            id: TransactionId(5),
            amount: ticket.amount,
            barcode: ticket.barcode.clone(),
            ticket_type: ticket.ticket_type,
            issued_at: ticket.issued_at,
            expiration_days: ticket.expiration_days,
            pool_id: ticket.pool_id,
        };
        policy.on_ticket_out_completed(&tx).await.unwrap();
        let history = policy.history.lock().await;
        let record = history.by_sequence(1).unwrap();
        assert_eq!(record.response.validation_system_id, 4);
        assert!(mocks
            .host
            .exceptions()
            .contains(&HostException::CashoutTicketPrinted));
    }

    #[tokio::test]
    async fn refuses_when_host_offline_or_unacknowledged() {
        let (policy, mocks) = policy();
        mocks.host.set_online(false);
        assert!(!policy.can_validate_ticket_out(100, TicketType::CashOut).await);
        assert!(policy
            .request_ticket_out_validation(100, TicketType::CashOut)
            .await
            .is_none());
        assert_eq!(mocks.host.cashout_read_requests(), 0);

        mocks.host.set_online(true);
        mocks.ledger.set_awaiting_acknowledgement(Some(TransactionId(1)));
        assert!(!policy.can_validate_ticket_out(100, TicketType::CashOut).await);
        assert_eq!(
            policy.eligibility(100, TicketType::CashOut),
            Err(ValidationError::AcknowledgementPending(Some(TransactionId(1))))
        );

        mocks.ledger.set_awaiting_acknowledgement(None);
        assert!(policy.can_validate_ticket_out(100, TicketType::CashOut).await);
    }

    #[tokio::test]
    async fn offline_handpay_has_no_barcode() {
        let (policy, mocks) = policy();
        mocks.host.set_online(false);
        let handpay = policy
            .request_handpay_validation(5_000, HandpayType::GameWin)
            .await;
        assert!(!handpay.has_barcode());
        assert_eq!(handpay.amount, 5_000);
    }

    #[tokio::test(start_paused = true)]
    async fn host_offline_cancels_pending_request() {
        let (policy, _mocks) = policy();
        let request = tokio::spawn({
            let policy = policy.clone();
            async move {
                policy
                    .request_ticket_out_validation(100, TicketType::CashOut)
                    .await
            }
        });
        settle().await;
        policy.on_host_offline().await;
        assert!(request.await.unwrap().is_none());
        assert_eq!(
            policy.coordinator().state().await,
            SystemValidationState::NoValidationPending
        );
    }
}
