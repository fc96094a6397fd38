//! Host-assigned validation numbers.
//!
//! A cash-out asks the host for a number and waits. The host first reads the pending cash-out
//! (amount and type), then answers with a validation system id and number. At most one request
//! is outstanding; it resolves to `None` on timeout, when the host goes offline, or when the host
//! declines by answering with system id zero.

use egm_types::{
    HandpayType, SystemValidationState, TicketType, MAX_SYSTEM_VALIDATION_NUMBER,
    MAX_VALIDATION_SYSTEM_ID,
};
use futures::channel::oneshot;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{barcode::system_barcode, error::ValidationError, ports::HostLink};

/// What is being paid out.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CashoutType {
    Ticket(TicketType),
    Handpay(HandpayType),
}

/// Cash-out information the host reads before assigning a number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingValidationData {
    pub amount: u64,
    pub cashout_type: CashoutType,
}

/// Number assigned by the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostValidationResult {
    pub system_id: u8,
    pub validation_number: u64,
}

impl HostValidationResult {
    pub fn barcode(&self) -> String {
        system_barcode(self.system_id, self.validation_number)
    }
}

/// Receipt status returned to the host for a submitted validation number.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationReceiptStatus {
    Acknowledged = 0x00,
    NotInCashout = 0x40,
    ImproperValidationRejected = 0x80,
}

impl ValidationReceiptStatus {
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

struct Pending {
    data: PendingValidationData,
    response: oneshot::Sender<Option<HostValidationResult>>,
    timer: JoinHandle<()>,
}

impl Pending {
    fn resolve(self, result: Option<HostValidationResult>) {
        self.timer.abort();
        let _ = self.response.send(result);
    }
}

struct Inner {
    state: SystemValidationState,
    pending: Option<Pending>,
    generation: u64,
}

impl Inner {
    fn finish(&mut self, result: Option<HostValidationResult>) -> bool {
        self.state = SystemValidationState::NoValidationPending;
        match self.pending.take() {
            Some(pending) => {
                pending.resolve(result);
                true
            }
            None => false,
        }
    }
}

/// Handle to the system validation state machine. Clones share state.
#[derive(Clone)]
pub struct SystemValidationCoordinator {
    inner: Arc<Mutex<Inner>>,
    host: Arc<dyn HostLink>,
    timeout: Duration,
}

impl SystemValidationCoordinator {
    pub fn new(host: Arc<dyn HostLink>, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: SystemValidationState::NoValidationPending,
                pending: None,
                generation: 0,
            })),
            host,
            timeout,
        }
    }

    pub async fn state(&self) -> SystemValidationState {
        self.inner.lock().await.state
    }

    /// Requests a validation number and waits for the host's answer.
    ///
    /// A request that the host has not read yet is replaced (its caller receives `None`). Once
    /// the host has read the pending data, new requests are refused until it answers.
    pub async fn get_validation_results(
        &self,
        amount: u64,
        cashout_type: CashoutType,
    ) -> Option<HostValidationResult> {
        let receiver = {
            let mut inner = self.inner.lock().await;
            match inner.state {
                SystemValidationState::ValidationNumberPending => {
                    warn!(
                        amount,
                        reason = %ValidationError::RequestInFlight,
                        "system validation refused"
                    );
                    return None;
                }
                SystemValidationState::CashoutInformationPending => {
                    info!(amount, "replacing unread system validation request");
                    inner.finish(None);
                }
                SystemValidationState::NoValidationPending => {}
            }

            inner.generation += 1;
            let generation = inner.generation;
            let (response, receiver) = oneshot::channel();
            let timer = {
                let inner = self.inner.clone();
                let timeout = self.timeout;
                tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    let mut inner = inner.lock().await;
                    if inner.generation == generation && inner.pending.is_some() {
                        warn!(generation, "system validation timed out");
                        inner.finish(None);
                    }
                })
            };
            inner.pending = Some(Pending {
                data: PendingValidationData {
                    amount,
                    cashout_type,
                },
                response,
                timer,
            });
            inner.state = SystemValidationState::CashoutInformationPending;
            self.host.send_cashout_read_request();
            receiver
        };

        receiver.await.ok().flatten()
    }

    /// Host read of the pending cash-out information.
    pub async fn get_pending_validation_data(&self) -> Option<PendingValidationData> {
        let mut inner = self.inner.lock().await;
        if inner.state != SystemValidationState::CashoutInformationPending {
            debug!(state = ?inner.state, "cash-out information read out of turn");
            return None;
        }
        let data = inner.pending.as_ref().map(|pending| pending.data)?;
        inner.state = SystemValidationState::ValidationNumberPending;
        Some(data)
    }

    /// Host answer to a pending request.
    pub async fn set_host_validation_result(
        &self,
        system_id: u8,
        validation_number: u64,
    ) -> ValidationReceiptStatus {
        let mut inner = self.inner.lock().await;
        if inner.pending.is_none() {
            debug!(system_id, "validation number received with nothing pending");
            return ValidationReceiptStatus::NotInCashout;
        }
        if system_id > MAX_VALIDATION_SYSTEM_ID || validation_number > MAX_SYSTEM_VALIDATION_NUMBER
        {
            warn!(system_id, validation_number, "improper validation number rejected");
            return ValidationReceiptStatus::ImproperValidationRejected;
        }
        if system_id == 0 {
            info!("host declined system validation");
            inner.finish(None);
            return ValidationReceiptStatus::Acknowledged;
        }
        info!(system_id, validation_number, "host validation number received");
        inner.finish(Some(HostValidationResult {
            system_id,
            validation_number,
        }));
        ValidationReceiptStatus::Acknowledged
    }

    /// Host went offline: cancel any outstanding request.
    pub async fn on_system_disabled(&self) {
        let mut inner = self.inner.lock().await;
        if inner.finish(None) {
            info!("system validation canceled; host offline");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockHost;

    fn coordinator(host: &Arc<MockHost>) -> SystemValidationCoordinator {
        SystemValidationCoordinator::new(host.clone(), Duration::from_secs(10))
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn full_round_trip() {
        let host = Arc::new(MockHost::online());
        let coordinator = coordinator(&host);

        let request = tokio::spawn({
            let coordinator = coordinator.clone();
            async move {
                coordinator
                    .get_validation_results(2_500, CashoutType::Ticket(TicketType::CashOut))
                    .await
            }
        });
        settle().await;
        assert_eq!(
            coordinator.state().await,
            SystemValidationState::CashoutInformationPending
        );
        assert_eq!(host.cashout_read_requests(), 1);

        let data = coordinator.get_pending_validation_data().await.unwrap();
        assert_eq!(data.amount, 2_500);
        assert_eq!(
            coordinator.state().await,
            SystemValidationState::ValidationNumberPending
        );
        assert!(coordinator.get_pending_validation_data().await.is_none());

        assert_eq!(
            coordinator.set_host_validation_result(12, 345).await,
            ValidationReceiptStatus::Acknowledged
        );
        let result = request.await.unwrap().unwrap();
        assert_eq!(result.barcode(), "120000000000000345");
        assert_eq!(
            coordinator.state().await,
            SystemValidationState::NoValidationPending
        );
    }

    #[tokio::test(start_paused = true)]
    async fn second_request_cancels_first() {
        let host = Arc::new(MockHost::online());
        let coordinator = coordinator(&host);

        let first = tokio::spawn({
            let coordinator = coordinator.clone();
            async move {
                coordinator
                    .get_validation_results(100, CashoutType::Ticket(TicketType::CashOut))
                    .await
            }
        });
        settle().await;
        let second = tokio::spawn({
            let coordinator = coordinator.clone();
            async move {
                coordinator
                    .get_validation_results(200, CashoutType::Ticket(TicketType::CashOut))
                    .await
            }
        });
        settle().await;

        assert!(first.await.unwrap().is_none());
        let data = coordinator.get_pending_validation_data().await.unwrap();
        assert_eq!(data.amount, 200);
        coordinator.set_host_validation_result(3, 77).await;
        assert_eq!(
            second.await.unwrap(),
            Some(HostValidationResult {
                system_id: 3,
                validation_number: 77
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn request_refused_while_host_reading() {
        let host = Arc::new(MockHost::online());
        let coordinator = coordinator(&host);

        let first = tokio::spawn({
            let coordinator = coordinator.clone();
            async move {
                coordinator
                    .get_validation_results(100, CashoutType::Handpay(HandpayType::GameWin))
                    .await
            }
        });
        settle().await;
        coordinator.get_pending_validation_data().await.unwrap();

        let refused = coordinator
            .get_validation_results(300, CashoutType::Ticket(TicketType::CashOut))
            .await;
        assert!(refused.is_none());

        coordinator.set_host_validation_result(1, 1).await;
        assert!(first.await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_resolves_none() {
        let host = Arc::new(MockHost::online());
        let coordinator = coordinator(&host);

        let result = coordinator
            .get_validation_results(100, CashoutType::Ticket(TicketType::CashOut))
            .await;
        assert!(result.is_none());
        assert_eq!(
            coordinator.state().await,
            SystemValidationState::NoValidationPending
        );
        // Late answers are ignored.
        assert_eq!(
            coordinator.set_host_validation_result(1, 1).await,
            ValidationReceiptStatus::NotInCashout
        );
    }

    #[tokio::test(start_paused = true)]
    async fn host_offline_cancels_pending() {
        let host = Arc::new(MockHost::online());
        let coordinator = coordinator(&host);

        let request = tokio::spawn({
            let coordinator = coordinator.clone();
            async move {
                coordinator
                    .get_validation_results(100, CashoutType::Ticket(TicketType::CashOut))
                    .await
            }
        });
        settle().await;
        assert_eq!(
            coordinator.state().await,
            SystemValidationState::CashoutInformationPending
        );

        coordinator.on_system_disabled().await;
        assert!(request.await.unwrap().is_none());
        assert_eq!(
            coordinator.state().await,
            SystemValidationState::NoValidationPending
        );
    }

    #[tokio::test(start_paused = true)]
    async fn declined_and_improper_answers() {
        let host = Arc::new(MockHost::online());
        let coordinator = coordinator(&host);

        let request = tokio::spawn({
            let coordinator = coordinator.clone();
            async move {
                coordinator
                    .get_validation_results(100, CashoutType::Ticket(TicketType::CashOut))
                    .await
            }
        });
        settle().await;
        assert_eq!(
            coordinator.set_host_validation_result(100, 1).await,
            ValidationReceiptStatus::ImproperValidationRejected
        );
        assert_eq!(
            coordinator.set_host_validation_result(0, 0).await,
            ValidationReceiptStatus::Acknowledged
        );
        assert!(request.await.unwrap().is_none());
    }
}
