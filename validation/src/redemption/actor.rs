use anyhow::{anyhow, Context, Result};
use egm_types::{
    CreditKind, HostException, Key, RedemptionSnapshot, RedemptionState, RedemptionStatus,
    TicketInInfo, TransactionId, TransferCode, Value, VoucherInTransaction, SNAPSHOT_VERSION,
};
use futures::{
    channel::{mpsc, oneshot},
    StreamExt,
};
use std::sync::Arc;
use tokio::{
    task::JoinHandle,
    time::{interval_at, sleep, Instant},
};
use tracing::{debug, error, info, warn};

use super::{
    ingress::{refused, HostTicketData, Mailbox, Message, RedemptionReport},
    machine::{next_transition, Transition, Trigger},
    recovery::plan_recovery,
    Config,
};
use crate::{
    error::{RedemptionError, TransitionError},
    ports::Ports,
    store::{load_redemption, Store},
};

/// Fields rolled back when a state change cannot be persisted.
struct Outcome {
    current: Option<TicketInInfo>,
    committed: bool,
    commit_acknowledged: bool,
    exception: HostException,
}

/// Owner of the redemption state machine.
pub struct Actor<S: Store> {
    config: Config,
    ports: Ports,
    store: Arc<S>,
    mailbox: mpsc::Receiver<Message>,
    inbound: Mailbox,

    state: RedemptionState,
    /// Inserted ticket the host has not read yet.
    temporary: Option<TicketInInfo>,
    /// Ticket read by the host; once finished, the last completed ticket.
    current: Option<TicketInInfo>,
    /// Caller of [Mailbox::validation_ticket] waiting for a decision.
    pending: Option<oneshot::Sender<TicketInInfo>>,
    committed: bool,
    commit_acknowledged: bool,
    /// Raised while the outcome of `current` awaits acknowledgement.
    exception: HostException,

    timer: Option<JoinHandle<()>>,
    timer_generation: u64,
    retry: Option<JoinHandle<()>>,
    retry_generation: u64,
}

impl<S: Store> Actor<S> {
    pub fn new(config: Config, ports: Ports, store: Arc<S>) -> (Self, Mailbox) {
        let (sender, mailbox) = mpsc::channel(config.mailbox_size);
        let inbound = Mailbox::new(sender);
        (
            Self {
                config,
                ports,
                store,
                mailbox,
                inbound: inbound.clone(),
                state: RedemptionState::Idle,
                temporary: None,
                current: None,
                pending: None,
                committed: false,
                commit_acknowledged: false,
                exception: HostException::TicketTransferComplete,
                timer: None,
                timer_generation: 0,
                retry: None,
                retry_generation: 0,
            },
            inbound,
        )
    }

    /// Restores the persisted redemption, then runs the actor on its own task.
    pub async fn start(mut self) -> Result<JoinHandle<()>> {
        self.recover().await?;
        Ok(tokio::spawn(self.run()))
    }

    async fn run(mut self) {
        while let Some(message) = self.mailbox.next().await {
            self.handle(message).await;
        }
        self.stop_timer();
        self.stop_retry();
        debug!("redemption coordinator stopped");
    }

    async fn recover(&mut self) -> Result<()> {
        let snapshot = load_redemption(self.store.as_ref())
            .await
            .context("load redemption snapshot")?;
        let transaction = match snapshot.as_ref().and_then(|s| s.transaction_id) {
            Some(id) => self
                .ports
                .ledger
                .ticket_in(id)
                .context("load ticket-in transaction")?,
            None => None,
        };
        let plan = plan_recovery(snapshot.as_ref(), transaction.as_ref());
        if let Some(record) = plan.ledger_update.clone() {
            self.ports
                .ledger
                .record_ticket_in(record)
                .context("record refused ticket-in")?;
        }
        info!(
            state = ?plan.state,
            committed = plan.committed,
            acknowledged = plan.commit_acknowledged,
            "redemption recovered"
        );

        self.state = plan.state;
        self.current = plan.current;
        self.committed = plan.committed;
        self.commit_acknowledged = plan.commit_acknowledged;
        self.exception = plan
            .exception
            .unwrap_or(HostException::TicketTransferComplete);
        persist(self.store.as_ref(), self.snapshot(self.state))
            .await
            .context("persist recovered redemption")?;
        if self.state == RedemptionState::AcknowledgementPending {
            self.ports.host.raise_exception(self.exception);
            self.start_retry();
        }
        Ok(())
    }

    async fn handle(&mut self, message: Message) {
        match message {
            Message::ValidationTicket {
                transaction,
                response,
            } => self.ticket_inserted(transaction, response).await,
            Message::TicketData { response } => {
                let ticket = self.data_requested().await;
                let _ = response.send(ticket);
            }
            Message::Accept { data, response } => {
                let result = self.accept(data).await;
                let _ = response.send(result);
            }
            Message::Deny {
                status,
                transfer_code,
                response,
            } => {
                let status = status.unwrap_or_else(|| {
                    transfer_code
                        .and_then(RedemptionError::from_transfer_code)
                        .map_or(RedemptionStatus::TicketRejectedByHost, |reason| {
                            reason.status()
                        })
                });
                let result = self
                    .refuse(Trigger::HostRejected, status, transfer_code)
                    .await;
                let _ = response.send(result);
            }
            Message::Commit { response } => {
                let result = self.commit().await;
                let _ = response.send(result);
            }
            Message::Acknowledged { response } => {
                let result = self.acknowledged().await;
                let _ = response.send(result);
            }
            Message::Status { response } => {
                let _ = response.send(self.report());
            }
            Message::HostOffline => {
                let _ = self
                    .refuse(
                        Trigger::HostOffline,
                        RedemptionStatus::TicketRejectedDueToCommLinkDown,
                        None,
                    )
                    .await;
            }
            Message::TimedOut { generation } => {
                if generation != self.timer_generation {
                    debug!(generation, "stale redemption timer");
                    return;
                }
                info!(state = ?self.state, "redemption timed out");
                if let Err(err) = self
                    .refuse(
                        Trigger::ValidationTimedOut,
                        RedemptionStatus::TicketRejectedDueToTimeout,
                        None,
                    )
                    .await
                {
                    warn!(%err, "timeout not applied; rearming");
                    self.start_timer();
                }
            }
            Message::Retry { generation } => {
                if generation == self.retry_generation
                    && self.state == RedemptionState::AcknowledgementPending
                {
                    debug!(exception = ?self.exception, "re-announcing redemption outcome");
                    self.ports.host.raise_exception(self.exception);
                }
            }
        }
    }

    async fn ticket_inserted(
        &mut self,
        transaction: VoucherInTransaction,
        response: oneshot::Sender<TicketInInfo>,
    ) {
        if !self.ports.host.is_online() {
            info!(id = %transaction.id, "ticket refused: host offline");
            let _ = response.send(refused(
                &transaction.barcode,
                transaction.id,
                RedemptionStatus::TicketRejectedDueToCommLinkDown,
            ));
            return;
        }
        let Ok(Transition::Enter(next)) = self.transition(Trigger::TicketInserted) else {
            let _ = response.send(refused(
                &transaction.barcode,
                transaction.id,
                RedemptionStatus::NotCompatibleWithCurrentRedemptionCycle,
            ));
            return;
        };
        if let Some(mut previous) = self.temporary.take() {
            info!(id = ?previous.transaction_id, "unread ticket replaced");
            previous.deny(RedemptionStatus::NotCompatibleWithCurrentRedemptionCycle, None);
            self.resolve(previous);
        }
        info!(id = %transaction.id, "ticket inserted");
        self.temporary = Some(TicketInInfo::inserted(transaction.barcode, transaction.id));
        self.pending = Some(response);
        self.enter(next).await;
    }

    async fn data_requested(&mut self) -> Option<TicketInInfo> {
        let next = match self.transition(Trigger::ValidationDataRequested).ok()? {
            Transition::Enter(next) => next,
            Transition::Internal => return self.current.clone(),
        };
        let ticket = self.temporary.clone()?;
        if let Some(id) = ticket.transaction_id {
            let record = VoucherInTransaction::new(id, ticket.barcode.clone());
            if let Err(err) = self.ports.ledger.record_ticket_in(record) {
                error!(?err, %id, "failed to record ticket-in");
                let _ = self
                    .refuse(
                        Trigger::HostRejected,
                        RedemptionStatus::GamingMachineUnableToAcceptTransfer,
                        None,
                    )
                    .await;
                return None;
            }
        }

        // Reading the next ticket implies the host saw the prior outcome.
        let prior = (self.state == RedemptionState::ValidationRequestPendingWithAckPending
            && !self.commit_acknowledged)
            .then(|| self.current.as_ref().and_then(|t| t.transaction_id))
            .flatten();
        let previous = self.outcome();
        self.current = Some(ticket);
        self.committed = false;
        self.commit_acknowledged = false;
        self.exception = HostException::TicketTransferComplete;
        if !self.enter(next).await {
            self.restore(previous);
            return None;
        }
        self.temporary = None;
        if let Some(id) = prior {
            self.acknowledge_in_ledger(id);
        }
        self.current.clone()
    }

    async fn accept(&mut self, data: HostTicketData) -> Result<TicketInInfo, TransitionError> {
        let code = data.transfer_code;
        if code == TransferCode::RequestForCurrentTicketStatus {
            return self
                .report()
                .ticket
                .ok_or(self.invalid(Trigger::HostAccepted));
        }
        if let Some(reason) = RedemptionError::from_transfer_code(code) {
            info!(%reason, "host refused ticket");
            return self
                .refuse(Trigger::HostRejected, reason.status(), Some(code))
                .await;
        }

        let invalid = self.invalid(Trigger::HostAccepted);
        let Transition::Enter(next) = self.transition(Trigger::HostAccepted)? else {
            return Err(invalid);
        };
        let Some(mut ticket) = self.current.clone() else {
            return Err(invalid);
        };
        let limit = self.config.max_redemption_amount;
        let check = if data.amount == 0 {
            Err(RedemptionError::InvalidAmount(data.amount))
        } else if data.amount > limit {
            Err(RedemptionError::AmountExceedsLimit {
                amount: data.amount,
                limit,
            })
        } else if !data.barcode.is_empty() && data.barcode != ticket.barcode {
            Err(RedemptionError::BarcodeMismatch)
        } else {
            Ok(())
        };
        if let Err(reason) = check {
            warn!(%reason, "host acceptance refused");
            return self
                .refuse(Trigger::HostRejected, reason.status(), Some(code))
                .await;
        }

        ticket.amount = data.amount;
        ticket.transfer_code = Some(code);
        ticket.pool_id = data.pool_id;
        ticket.status = RedemptionStatus::TicketRedemptionPending;
        if let Err(err) = self.record(&ticket, false) {
            error!(?err, "failed to record accepted ticket-in");
            return self
                .refuse(
                    Trigger::HostRejected,
                    RedemptionStatus::GamingMachineUnableToAcceptTransfer,
                    None,
                )
                .await;
        }
        let read = self.current.replace(ticket.clone());
        if !self.enter(next).await {
            self.current = read;
            return self
                .refuse(
                    Trigger::HostRejected,
                    RedemptionStatus::GamingMachineUnableToAcceptTransfer,
                    None,
                )
                .await;
        }
        info!(id = ?ticket.transaction_id, amount = ticket.amount, "host accepted ticket");
        Ok(ticket)
    }

    async fn commit(&mut self) -> Result<TicketInInfo, TransitionError> {
        let invalid = self.invalid(Trigger::CommitCompleted);
        let Transition::Enter(next) = self.transition(Trigger::CommitCompleted)? else {
            return Err(invalid);
        };
        let Some(ticket) = self.current.clone() else {
            return Err(invalid);
        };
        let (redeemed, kind) = match self.deposit(&ticket) {
            Ok(credited) => credited,
            Err(err) => {
                error!(?err, "failed to credit ticket");
                return self
                    .refuse(
                        Trigger::HostRejected,
                        RedemptionStatus::GamingMachineUnableToAcceptTransfer,
                        None,
                    )
                    .await;
            }
        };

        let previous = self.outcome();
        self.current = Some(redeemed.clone());
        self.committed = true;
        self.commit_acknowledged = false;
        self.exception = HostException::TicketTransferComplete;
        let durable = match self.record(&redeemed, true) {
            Ok(()) => self.enter(next).await,
            Err(err) => {
                error!(?err, "failed to record redemption");
                false
            }
        };
        if !durable {
            warn!(amount = redeemed.amount, "redemption not durable; rolling back credit");
            if let Err(err) = self.ports.bank.withdraw(redeemed.amount, kind) {
                error!(?err, "failed to roll back credit");
            }
            self.restore(previous);
            return self
                .refuse(
                    Trigger::HostRejected,
                    RedemptionStatus::GamingMachineUnableToAcceptTransfer,
                    None,
                )
                .await;
        }

        info!(
            id = ?redeemed.transaction_id,
            amount = redeemed.amount,
            status = ?redeemed.status,
            "ticket redeemed"
        );
        Ok(redeemed)
    }

    async fn acknowledged(&mut self) -> Result<(), TransitionError> {
        let Transition::Enter(next) = self.transition(Trigger::StatusAcknowledged)? else {
            return Ok(());
        };
        let id = self.current.as_ref().and_then(|t| t.transaction_id);
        let already = self.commit_acknowledged;
        self.commit_acknowledged = true;
        if !self.enter(next).await {
            self.commit_acknowledged = already;
            return Err(TransitionError::NotPersisted { target: next });
        }
        if let (false, Some(id)) = (already, id) {
            self.acknowledge_in_ledger(id);
        }
        info!(?id, "redemption acknowledged");
        Ok(())
    }

    /// Ends the ticket in progress with a refusal.
    ///
    /// The outcome is recorded and persisted before the caller or the host hears of it. If that
    /// fails the coordinator keeps its previous state and returns [TransitionError::NotPersisted].
    async fn refuse(
        &mut self,
        trigger: Trigger,
        status: RedemptionStatus,
        transfer_code: Option<TransferCode>,
    ) -> Result<TicketInInfo, TransitionError> {
        let invalid = self.invalid(trigger);
        let next = match self.transition(trigger)? {
            Transition::Enter(next) => next,
            Transition::Internal => return self.report().ticket.ok_or(invalid),
        };
        let unpersisted = TransitionError::NotPersisted { target: next };

        let ticket = if self.state.is_awaiting_data_request() {
            // Never read by the host, so there is nothing to record.
            let mut ticket = self.temporary.clone().ok_or(invalid)?;
            ticket.deny(status, transfer_code);
            if !self.enter(next).await {
                return Err(unpersisted);
            }
            self.temporary = None;
            ticket
        } else {
            let mut ticket = self.current.clone().ok_or(invalid)?;
            ticket.deny(status, transfer_code);
            let previous = self.outcome();
            self.current = Some(ticket.clone());
            self.committed = true;
            self.commit_acknowledged = false;
            self.exception = HostException::TicketTransferComplete;
            let durable = match self.record(&ticket, true) {
                Ok(()) => self.enter(next).await,
                Err(err) => {
                    error!(?err, "failed to record refused ticket-in");
                    false
                }
            };
            if !durable {
                self.restore(previous);
                return Err(unpersisted);
            }
            ticket
        };
        info!(id = ?ticket.transaction_id, ?trigger, ?status, "ticket refused");
        self.resolve(ticket.clone());
        Ok(ticket)
    }

    /// Persists the snapshot for `next`, then runs its entry actions.
    ///
    /// Returns `false` without touching the state, timers or host if the snapshot could not be
    /// written.
    async fn enter(&mut self, next: RedemptionState) -> bool {
        let previous = self.state;
        let resumed = next == RedemptionState::ValidationRequestPending
            && previous == RedemptionState::ValidationRequestPendingWithAckPending;
        let saved = match next {
            // Only the prior outcome changed; the unread ticket is not persisted.
            _ if resumed => self.save(RedemptionState::Idle).await,
            RedemptionState::ValidationRequestPending
            | RedemptionState::ValidationRequestPendingWithAckPending => true,
            _ => self.save(next).await,
        };
        if !saved {
            return false;
        }

        self.state = next;
        debug!(?previous, ?next, "redemption state entered");
        match next {
            RedemptionState::Idle => {
                self.stop_timer();
                self.stop_retry();
                self.temporary = None;
            }
            // The new ticket keeps its timer.
            RedemptionState::ValidationRequestPending if resumed => self.stop_retry(),
            RedemptionState::ValidationRequestPending
            | RedemptionState::ValidationRequestPendingWithAckPending => {
                self.stop_retry();
                self.ports.host.raise_exception(HostException::TicketInserted);
                self.start_timer();
            }
            RedemptionState::ValidationDataPending => {
                self.stop_retry();
                self.start_timer();
            }
            RedemptionState::RequestPending => {
                self.stop_timer();
                if let Some(ticket) = self.current.clone() {
                    self.resolve(ticket);
                }
            }
            RedemptionState::AcknowledgementPending => {
                self.stop_timer();
                self.ports.host.raise_exception(self.exception);
                self.start_retry();
            }
        }
        true
    }

    fn transition(&self, trigger: Trigger) -> Result<Transition, TransitionError> {
        next_transition(self.state, trigger).inspect_err(|_| {
            warn!(state = ?self.state, ?trigger, "unhandled redemption trigger");
        })
    }

    fn invalid(&self, trigger: Trigger) -> TransitionError {
        TransitionError::InvalidStateTransition {
            state: self.state,
            trigger,
        }
    }

    fn report(&self) -> RedemptionReport {
        RedemptionReport {
            state: self.state,
            ticket: self.temporary.clone().or_else(|| self.current.clone()),
        }
    }

    fn resolve(&mut self, ticket: TicketInInfo) {
        if let Some(pending) = self.pending.take() {
            let _ = pending.send(ticket);
        }
    }

    fn deposit(&self, ticket: &TicketInInfo) -> Result<(TicketInInfo, CreditKind)> {
        let code = ticket
            .transfer_code
            .ok_or_else(|| anyhow!("accepted ticket has no transfer code"))?;
        let (Some(kind), Some(status)) = (code.credit_kind(), code.redeemed_status()) else {
            return Err(anyhow!("transfer code {code:?} does not credit"));
        };
        self.ports
            .bank
            .deposit(ticket.amount, kind)
            .context("deposit ticket credits")?;
        let mut redeemed = ticket.clone();
        redeemed.status = status;
        Ok((redeemed, kind))
    }

    /// Writes the ticket's outcome to its ledger record.
    fn record(&self, ticket: &TicketInInfo, committed: bool) -> Result<()> {
        let id = ticket
            .transaction_id
            .ok_or_else(|| anyhow!("ticket has no transaction id"))?;
        let mut transaction = self
            .ports
            .ledger
            .ticket_in(id)?
            .unwrap_or_else(|| VoucherInTransaction::new(id, ticket.barcode.clone()));
        transaction.amount = ticket.amount;
        transaction.transfer_code = ticket.transfer_code;
        transaction.status = ticket.status;
        transaction.committed = committed;
        if committed {
            transaction.exception = Some(self.exception);
            transaction.host_acknowledged = false;
        }
        self.ports.ledger.record_ticket_in(transaction)
    }

    fn acknowledge_in_ledger(&self, id: TransactionId) {
        if let Err(err) = self.ports.ledger.acknowledge(id) {
            error!(?err, %id, "failed to acknowledge ticket-in");
        }
    }

    fn outcome(&self) -> Outcome {
        Outcome {
            current: self.current.clone(),
            committed: self.committed,
            commit_acknowledged: self.commit_acknowledged,
            exception: self.exception,
        }
    }

    fn restore(&mut self, outcome: Outcome) {
        self.current = outcome.current;
        self.committed = outcome.committed;
        self.commit_acknowledged = outcome.commit_acknowledged;
        self.exception = outcome.exception;
    }

    fn snapshot(&self, state: RedemptionState) -> RedemptionSnapshot {
        RedemptionSnapshot {
            version: SNAPSHOT_VERSION,
            state,
            current: self.current.clone(),
            transaction_id: self.current.as_ref().and_then(|t| t.transaction_id),
            committed: self.committed,
            commit_acknowledged: self.commit_acknowledged,
        }
    }

    async fn save(&mut self, state: RedemptionState) -> bool {
        match persist(self.store.as_ref(), self.snapshot(state)).await {
            Ok(()) => true,
            Err(err) => {
                error!(?err, ?state, "failed to persist redemption");
                false
            }
        }
    }

    fn start_timer(&mut self) {
        self.stop_timer();
        let generation = self.timer_generation;
        let timeout = self.config.redemption_timeout;
        let mailbox = self.inbound.clone();
        self.timer = Some(tokio::spawn(async move {
            sleep(timeout).await;
            mailbox.notify(Message::TimedOut { generation }).await;
        }));
    }

    fn stop_timer(&mut self) {
        self.timer_generation = self.timer_generation.wrapping_add(1);
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    fn start_retry(&mut self) {
        self.stop_retry();
        let generation = self.retry_generation;
        let period = self.config.acknowledgement_retry;
        let mailbox = self.inbound.clone();
        self.retry = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if !mailbox.notify(Message::Retry { generation }).await {
                    break;
                }
            }
        }));
    }

    fn stop_retry(&mut self) {
        self.retry_generation = self.retry_generation.wrapping_add(1);
        if let Some(retry) = self.retry.take() {
            retry.abort();
        }
    }
}

async fn persist<S: Store>(store: &S, snapshot: RedemptionSnapshot) -> Result<()> {
    store
        .insert(Key::Redemption, Value::Redemption(snapshot))
        .await
}
