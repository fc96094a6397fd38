use egm_types::{
    RedemptionState, RedemptionStatus, TicketInInfo, TransactionId, TransferCode,
    VoucherInTransaction,
};
use futures::{
    channel::{mpsc, oneshot},
    SinkExt,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::TransitionError;

/// Host classification of an inserted ticket (long-poll 71).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostTicketData {
    pub transfer_code: TransferCode,
    pub amount: u64,
    /// Validation number the host answered for; empty if the host did not echo it.
    #[serde(default)]
    pub barcode: String,
    #[serde(default)]
    pub pool_id: u16,
}

/// State of the redemption and the ticket it concerns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedemptionReport {
    pub state: RedemptionState,
    /// The unread inserted ticket if there is one, otherwise the last ticket read by the host.
    pub ticket: Option<TicketInInfo>,
}

pub enum Message {
    ValidationTicket {
        transaction: VoucherInTransaction,
        response: oneshot::Sender<TicketInInfo>,
    },
    TicketData {
        response: oneshot::Sender<Option<TicketInInfo>>,
    },
    Accept {
        data: HostTicketData,
        response: oneshot::Sender<Result<TicketInInfo, TransitionError>>,
    },
    Deny {
        status: Option<RedemptionStatus>,
        transfer_code: Option<TransferCode>,
        response: oneshot::Sender<Result<TicketInInfo, TransitionError>>,
    },
    Commit {
        response: oneshot::Sender<Result<TicketInInfo, TransitionError>>,
    },
    Acknowledged {
        response: oneshot::Sender<Result<(), TransitionError>>,
    },
    Status {
        response: oneshot::Sender<RedemptionReport>,
    },
    HostOffline,
    TimedOut {
        generation: u64,
    },
    Retry {
        generation: u64,
    },
}

/// Handle to a running redemption coordinator.
#[derive(Clone)]
pub struct Mailbox {
    sender: mpsc::Sender<Message>,
}

impl Mailbox {
    pub(super) fn new(sender: mpsc::Sender<Message>) -> Self {
        Self { sender }
    }

    async fn request<T>(&self, message: impl FnOnce(oneshot::Sender<T>) -> Message) -> Option<T> {
        let (sender, receiver) = oneshot::channel();
        if self.sender.clone().send(message(sender)).await.is_err() {
            warn!("redemption coordinator stopped");
            return None;
        }
        receiver.await.ok()
    }

    /// Fire-and-forget delivery; `false` once the coordinator has stopped.
    pub(super) async fn notify(&self, message: Message) -> bool {
        self.sender.clone().send(message).await.is_ok()
    }

    /// Announces an inserted ticket and waits until the host accepts or refuses it.
    ///
    /// Resolves with status [RedemptionStatus::TicketRedemptionPending] once the host accepts.
    /// The caller then stacks the ticket and calls [Mailbox::commit_ticket].
    pub async fn validation_ticket(&self, transaction: VoucherInTransaction) -> TicketInInfo {
        let fallback = refused(
            &transaction.barcode,
            transaction.id,
            RedemptionStatus::TicketRedemptionDisabled,
        );
        self.request(|response| Message::ValidationTicket {
            transaction,
            response,
        })
        .await
        .unwrap_or(fallback)
    }

    /// Long-poll 70: the ticket the host should classify.
    pub async fn get_ticket_data(&self) -> Option<TicketInInfo> {
        self.request(|response| Message::TicketData { response })
            .await
            .flatten()
    }

    /// Long-poll 71: the host's classification.
    pub async fn accept_ticket(&self, data: HostTicketData) -> Result<TicketInInfo, TransitionError> {
        self.request(|response| Message::Accept { data, response })
            .await
            .unwrap_or(Err(TransitionError::Stopped))
    }

    /// Refuses the ticket in progress.
    ///
    /// Without an explicit status, the status is derived from `transfer_code` (or defaults to
    /// [RedemptionStatus::TicketRejectedByHost]).
    pub async fn deny_ticket(
        &self,
        status: Option<RedemptionStatus>,
        transfer_code: Option<TransferCode>,
    ) -> Result<TicketInInfo, TransitionError> {
        self.request(|response| Message::Deny {
            status,
            transfer_code,
            response,
        })
        .await
        .unwrap_or(Err(TransitionError::Stopped))
    }

    /// Credits an accepted ticket once it is stacked.
    ///
    /// Returns the ticket with its final status; a local failure yields a refused ticket. If not
    /// even the refusal can be persisted, the credit is rolled back and the ticket stays pending.
    pub async fn commit_ticket(&self) -> Result<TicketInInfo, TransitionError> {
        self.request(|response| Message::Commit { response })
            .await
            .unwrap_or(Err(TransitionError::Stopped))
    }

    /// The host acknowledged the final status (long-poll 71 status query answered).
    pub async fn redemption_status_acknowledged(&self) -> Result<(), TransitionError> {
        self.request(|response| Message::Acknowledged { response })
            .await
            .unwrap_or(Err(TransitionError::Stopped))
    }

    pub async fn current_status(&self) -> Option<RedemptionReport> {
        self.request(|response| Message::Status { response }).await
    }

    pub async fn host_offline(&self) {
        if !self.notify(Message::HostOffline).await {
            warn!("redemption coordinator stopped");
        }
    }
}

/// A ticket refused before the coordinator could look at it.
pub(super) fn refused(
    barcode: &str,
    transaction_id: TransactionId,
    status: RedemptionStatus,
) -> TicketInInfo {
    let mut ticket = TicketInInfo::inserted(barcode, transaction_id);
    ticket.deny(status, None);
    ticket
}
