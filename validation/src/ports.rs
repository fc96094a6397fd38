//! Collaborators the validation engine drives but does not own.
//!
//! Each port is a narrow synchronous trait. Implementations are expected to hand work off to
//! their own tasks when they need I/O; calls are made while a coordinator holds its state.

use anyhow::Result;
use chrono::{Local, NaiveDateTime};
use egm_types::{CreditKind, HostException, TransactionId, VoucherInTransaction};
use std::sync::Arc;

/// Host protocol link.
pub trait HostLink: Send + Sync {
    fn is_online(&self) -> bool;

    /// Asks the host to read the pending cash-out information.
    fn send_cashout_read_request(&self);

    /// Queues an exception for the host to collect on its next general poll.
    fn raise_exception(&self, exception: HostException);
}

/// Transaction ledger holding ticket-out, handpay and ticket-in records.
pub trait TicketLedger: Send + Sync {
    /// Whether any validated ticket-out or handpay is still awaiting host acknowledgement.
    fn any_awaiting_host_acknowledgement(&self) -> bool;

    /// The oldest transaction still awaiting host acknowledgement.
    fn next_awaiting_host_acknowledgement(&self) -> Option<TransactionId>;

    fn ticket_in(&self, id: TransactionId) -> Result<Option<VoucherInTransaction>>;

    /// Inserts or replaces a ticket-in record.
    fn record_ticket_in(&self, transaction: VoucherInTransaction) -> Result<()>;

    /// Marks a transaction as acknowledged by the host.
    fn acknowledge(&self, id: TransactionId) -> Result<()>;
}

/// Credit meters.
pub trait Bank: Send + Sync {
    fn deposit(&self, amount: u64, kind: CreditKind) -> Result<()>;
    fn withdraw(&self, amount: u64, kind: CreditKind) -> Result<()>;
}

/// Wall clock printed on tickets.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Machine-local time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Conditions that lock the machine out of cash-out until cleared.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DisableCondition {
    ValidationIdNeeded,
    HostOffline,
}

impl DisableCondition {
    /// Operator-facing description.
    pub fn message(&self) -> &'static str {
        match self {
            DisableCondition::ValidationIdNeeded => "Validation ID needed: configure from host",
            DisableCondition::HostOffline => "Validation host offline",
        }
    }
}

/// Operator-visible disable conditions.
pub trait MachineConditions: Send + Sync {
    fn disable(&self, condition: DisableCondition);
    fn enable(&self, condition: DisableCondition);
}

/// Bundle of collaborators handed to every component at construction.
#[derive(Clone)]
pub struct Ports {
    pub host: Arc<dyn HostLink>,
    pub ledger: Arc<dyn TicketLedger>,
    pub bank: Arc<dyn Bank>,
    pub clock: Arc<dyn Clock>,
    pub conditions: Arc<dyn MachineConditions>,
}
