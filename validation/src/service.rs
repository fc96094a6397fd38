//! Entry point wiring the active policy, the validation history and ticket redemption together.

use anyhow::{Context, Result};
use egm_types::{
    HandpayTransaction, HandpayType, TicketOutInfo, TicketType, ValidationInformation,
    VoucherOutTransaction,
};
use std::sync::Arc;
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{error, info, warn};

use crate::{
    config::{ValidationConfig, ValidationMode},
    error::ValidationError,
    history::{persist_history, HistoryPoll, HistoryResponse, SharedHistory, ValidationHistory},
    policy::{ActivePolicy, ValidationPolicy},
    ports::{DisableCondition, Ports},
    redemption,
    selector::ValidationPolicySelector,
    store::{load_history, Store},
    system_validation::{PendingValidationData, ValidationReceiptStatus},
};

/// Validation engine of one machine.
pub struct ValidationService<S: Store> {
    config: Arc<ValidationConfig>,
    ports: Ports,
    store: Arc<S>,
    history: SharedHistory,
    policy: ActivePolicy<S>,
    redemption: redemption::Mailbox,
    redemption_handle: JoinHandle<()>,
}

impl<S: Store> ValidationService<S> {
    /// Validates `config`, restores persisted state and starts ticket redemption.
    pub async fn start(config: ValidationConfig, ports: Ports, store: Arc<S>) -> Result<Self> {
        config.validate().context("invalid validation configuration")?;
        let config = Arc::new(config);

        let history = match load_history(store.as_ref()).await? {
            Some(snapshot) => ValidationHistory::restore(snapshot, config.history_capacity),
            None => ValidationHistory::new(config.history_capacity),
        };
        let history = Arc::new(Mutex::new(history));

        let policy = ValidationPolicySelector::select(
            config.clone(),
            ports.clone(),
            store.clone(),
            history.clone(),
        )
        .await?;
        let (redemption, redemption_handle) = redemption::start(
            redemption::Config::from(config.as_ref()),
            ports.clone(),
            store.clone(),
        )
        .await?;

        info!(mode = ?config.mode, "validation service started");
        Ok(Self {
            config,
            ports,
            store,
            history,
            policy,
            redemption,
            redemption_handle,
        })
    }

    pub fn mode(&self) -> ValidationMode {
        self.config.mode
    }

    pub fn policy(&self) -> &ActivePolicy<S> {
        &self.policy
    }

    pub fn redemption(&self) -> &redemption::Mailbox {
        &self.redemption
    }

    pub async fn can_validate_ticket_out(&self, amount: u64, ticket_type: TicketType) -> bool {
        self.policy.can_validate_ticket_out(amount, ticket_type).await
    }

    pub async fn request_ticket_out_validation(
        &self,
        amount: u64,
        ticket_type: TicketType,
    ) -> Option<TicketOutInfo> {
        self.policy
            .request_ticket_out_validation(amount, ticket_type)
            .await
    }

    pub async fn request_handpay_validation(
        &self,
        amount: u64,
        handpay_type: HandpayType,
    ) -> TicketOutInfo {
        self.policy
            .request_handpay_validation(amount, handpay_type)
            .await
    }

    pub async fn on_ticket_out_completed(&self, transaction: &VoucherOutTransaction) -> Result<()> {
        self.policy.on_ticket_out_completed(transaction).await
    }

    pub async fn on_handpay_completed(&self, transaction: &HandpayTransaction) -> Result<()> {
        self.policy.on_handpay_completed(transaction).await
    }

    /// Answers a host read of the validation history.
    ///
    /// A read of the current record acknowledges it, both in the history and in the ledger. If
    /// the acknowledgement cannot be persisted the record is still returned, and the next read
    /// returns it again.
    pub async fn get_response_from_info(&self, function_code: u8) -> HistoryResponse {
        if self.mode() == ValidationMode::None {
            return HistoryResponse::NoRecord;
        }
        let poll = HistoryPoll::from_code(function_code);
        let mut history = self.history.lock().await;
        if poll != HistoryPoll::Current {
            return history.respond(poll);
        }

        let mut next = history.clone();
        let response = next.respond(poll);
        let Some(record) = response.record() else {
            return response;
        };
        if let Err(err) = persist_history(self.store.as_ref(), &next).await {
            warn!(?err, id = %record.transaction_id, "history acknowledgement not persisted");
            return response;
        }
        *history = next;
        drop(history);

        if let Err(err) = self.ports.ledger.acknowledge(record.transaction_id) {
            error!(?err, id = %record.transaction_id, "failed to acknowledge validation");
        }
        response
    }

    /// Host supplied the machine validation id (secure-enhanced only).
    pub async fn set_validation_id(&self, machine_id: u32, sequence: u32) -> Result<()> {
        match self.policy.as_secure_enhanced() {
            Some(policy) => policy.set_validation_id(machine_id, sequence).await,
            None => Err(ValidationError::UnsupportedByPolicy.into()),
        }
    }

    pub async fn validation_information(&self) -> Option<ValidationInformation> {
        match self.policy.as_secure_enhanced() {
            Some(policy) => Some(policy.validation_information().await),
            None => None,
        }
    }

    /// Host read of a pending system validation request.
    pub async fn get_pending_validation_data(&self) -> Option<PendingValidationData> {
        self.policy
            .as_system()?
            .coordinator()
            .get_pending_validation_data()
            .await
    }

    /// Host answer to a pending system validation request.
    pub async fn set_host_validation_result(
        &self,
        system_id: u8,
        validation_number: u64,
    ) -> ValidationReceiptStatus {
        match self.policy.as_system() {
            Some(policy) => {
                policy
                    .coordinator()
                    .set_host_validation_result(system_id, validation_number)
                    .await
            }
            None => ValidationReceiptStatus::NotInCashout,
        }
    }

    pub async fn on_host_online_changed(&self, online: bool) {
        if online {
            info!("validation host online");
            if self.mode() == ValidationMode::System {
                self.ports.conditions.enable(DisableCondition::HostOffline);
            }
            return;
        }

        warn!("validation host offline");
        if let Some(policy) = self.policy.as_system() {
            policy.on_host_offline().await;
            self.ports.conditions.disable(DisableCondition::HostOffline);
        }
        self.redemption.host_offline().await;
    }

    /// Stops the redemption coordinator.
    pub fn shutdown(self) {
        self.redemption_handle.abort();
    }
}
