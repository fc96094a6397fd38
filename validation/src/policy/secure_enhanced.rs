use anyhow::{Context as _, Result};
use egm_types::{
    HandpayTransaction, HandpayType, HostException, Key, TicketOutInfo, TicketType,
    TransactionId, ValidationInformation, ValidationResponse, Value, VoucherOutTransaction,
    MAX_MACHINE_VALIDATION_ID, MAX_SEQUENCE_NUMBER, SECURE_ENHANCED_SYSTEM_ID,
};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, info, warn};

use super::{handpay_response, ticket_response, PolicyBase, ValidationPolicy};
use crate::{
    barcode::secure_enhanced_barcode,
    config::ValidationMode,
    error::ValidationError,
    history::{history_change, SharedHistory},
    ports::{DisableCondition, Ports},
    store::{load_validation_information, Status, Store},
};

/// Algorithmic barcodes from the machine validation id and a persisted sequence number.
pub struct SecureEnhancedPolicy<S: Store> {
    base: PolicyBase,
    ports: Ports,
    store: Arc<S>,
    info: Mutex<ValidationInformation>,
    history: SharedHistory,
    alarm: StdMutex<Option<JoinHandle<()>>>,
}

impl<S: Store> SecureEnhancedPolicy<S> {
    /// Loads the persisted validation information, seeding it from configuration on first start.
    pub async fn load(
        base: PolicyBase,
        ports: Ports,
        store: Arc<S>,
        history: SharedHistory,
    ) -> Result<Self> {
        let info = match load_validation_information(store.as_ref()).await? {
            Some(info) => info,
            None => match base.config().machine_validation_id {
                Some(machine_id) => {
                    let info = ValidationInformation::new(machine_id, 0);
                    store
                        .insert(
                            Key::ValidationInformation,
                            Value::ValidationInformation(info),
                        )
                        .await
                        .context("seed validation information")?;
                    info!(machine_id, "validation id seeded from configuration");
                    info
                }
                None => ValidationInformation::default(),
            },
        };

        let policy = Self {
            base,
            ports,
            store,
            info: Mutex::new(info),
            history,
            alarm: StdMutex::new(None),
        };
        if info.configured {
            policy
                .ports
                .conditions
                .enable(DisableCondition::ValidationIdNeeded);
        } else {
            policy.start_alarm();
        }
        Ok(policy)
    }

    pub async fn validation_information(&self) -> ValidationInformation {
        *self.info.lock().await
    }

    /// Host-supplied machine validation id and starting sequence number.
    pub async fn set_validation_id(&self, machine_id: u32, sequence: u32) -> Result<()> {
        if machine_id > MAX_MACHINE_VALIDATION_ID || sequence > MAX_SEQUENCE_NUMBER {
            return Err(ValidationError::InvalidValidationId {
                machine_id,
                sequence,
            }
            .into());
        }
        let mut info = self.info.lock().await;
        let next = ValidationInformation::new(machine_id, sequence);
        self.store
            .insert(
                Key::ValidationInformation,
                Value::ValidationInformation(next),
            )
            .await
            .context("persist validation id")?;
        *info = next;
        drop(info);

        self.stop_alarm();
        self.ports
            .conditions
            .enable(DisableCondition::ValidationIdNeeded);
        info!(machine_id, sequence, "validation id configured");
        Ok(())
    }

    fn start_alarm(&self) {
        self.ports
            .conditions
            .disable(DisableCondition::ValidationIdNeeded);
        let host = self.ports.host.clone();
        let period = self.base.config().validation_id_alarm();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                warn!("validation id not configured");
                host.raise_exception(HostException::ValidationIdNotConfigured);
            }
        });
        if let Ok(mut alarm) = self.alarm.lock() {
            if let Some(previous) = alarm.replace(handle) {
                previous.abort();
            }
        }
    }

    fn stop_alarm(&self) {
        if let Ok(mut alarm) = self.alarm.lock() {
            if let Some(handle) = alarm.take() {
                handle.abort();
            }
        }
    }

    fn current_barcode(info: &ValidationInformation) -> String {
        secure_enhanced_barcode(info.machine_validation_id, info.sequence_number as u64)
    }

    /// Appends the completion to history and, if it consumed the current sequence number,
    /// advances the sequence in the same store write.
    async fn complete(
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

        let mut info = self.info.lock().await;
        let mut history = self.history.lock().await;
        if history.contains(transaction_id) {
            debug!(id = %transaction_id, "completion already recorded");
            return Ok(());
        }

        let mut next_history = history.clone();
        let record = next_history.append(transaction_id, response);
        let mut changes = vec![history_change(&next_history)];

        let next_info = if info.configured && barcode == Self::current_barcode(&info) {
            let next = info.advanced();
            changes.push((
                Key::ValidationInformation,
                Status::Update(Value::ValidationInformation(next)),
            ));
            Some(next)
        } else {
            warn!(
                id = %transaction_id,
                sequence = info.sequence_number,
                "completed barcode does not match current sequence; sequence not advanced"
            );
            None
        };

        self.store
            .apply(changes)
            .await
            .context("persist validation completion")?;
        *history = next_history;
        if let Some(next) = next_info {
            *info = next;
        }
        drop(history);
        drop(info);

        info!(
            id = %transaction_id,
            host_sequence = record.host_sequence,
            index = record.response.index,
            "validation recorded"
        );
        self.ports.host.raise_exception(exception);
        Ok(())
    }

    fn refuse(&self, amount: u64, ticket_type: TicketType, reason: ValidationError) {
        info!(amount, ?ticket_type, %reason, "ticket-out validation refused");
    }

    async fn eligibility(&self, amount: u64, ticket_type: TicketType) -> Result<ValidationInformation, ValidationError> {
        self.base.check_ticket_out(amount, ticket_type)?;
        let info = *self.info.lock().await;
        if !info.configured {
            return Err(ValidationError::NotConfigured);
        }
        if self.history.lock().await.is_saturated() {
            return Err(ValidationError::HistorySaturated);
        }
        Ok(info)
    }
}

impl<S: Store> Drop for SecureEnhancedPolicy<S> {
    fn drop(&mut self) {
        self.stop_alarm();
    }
}

impl<S: Store> ValidationPolicy for SecureEnhancedPolicy<S> {
    fn mode(&self) -> ValidationMode {
        ValidationMode::SecureEnhanced
    }

    async fn can_validate_ticket_out(&self, amount: u64, ticket_type: TicketType) -> bool {
        self.eligibility(amount, ticket_type).await.is_ok()
    }

    async fn request_ticket_out_validation(
        &self,
        amount: u64,
        ticket_type: TicketType,
    ) -> Option<TicketOutInfo> {
        let info = match self.eligibility(amount, ticket_type).await {
            Ok(info) => info,
            Err(reason) => {
                self.refuse(amount, ticket_type, reason);
                return None;
            }
        };
        let barcode = Self::current_barcode(&info);
        match self
            .base
            .ticket_out(amount, ticket_type, self.base.now(), barcode)
        {
            Ok(ticket) => Some(ticket),
            Err(reason) => {
                self.refuse(amount, ticket_type, reason);
                None
            }
        }
    }

    async fn request_handpay_validation(
        &self,
        amount: u64,
        handpay_type: HandpayType,
    ) -> TicketOutInfo {
        let info = *self.info.lock().await;
        let barcode = if info.configured {
            Self::current_barcode(&info)
        } else {
            warn!(amount, ?handpay_type, "handpay paid without validation number");
            String::new()
        };
        self.base.handpay(amount, self.base.now(), barcode)
    }

    async fn on_ticket_out_completed(&self, transaction: &VoucherOutTransaction) -> Result<()> {
        self.complete(
            transaction.id,
            &transaction.barcode,
            ticket_response(transaction, SECURE_ENHANCED_SYSTEM_ID),
            HostException::CashoutTicketPrinted,
        )
        .await
    }

    async fn on_handpay_completed(&self, transaction: &HandpayTransaction) -> Result<()> {
        let expiration_days = self
            .base
            .handpay(transaction.amount, transaction.issued_at, String::new())
            .expiration_days;
        self.complete(
            transaction.id,
            &transaction.barcode,
            handpay_response(transaction, SECURE_ENHANCED_SYSTEM_ID, expiration_days),
            HostException::HandpayValidated,
        )
        .await
    }
}
