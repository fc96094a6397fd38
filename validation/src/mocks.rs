//! In-memory collaborators for tests and simulations.

use anyhow::{anyhow, Result};
use chrono::{NaiveDate, NaiveDateTime};
use egm_types::{CreditKind, HostException, TransactionId, VoucherInTransaction};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use crate::ports::{
    Bank, Clock, DisableCondition, HostLink, MachineConditions, Ports, TicketLedger,
};

/// Host link that records everything sent to it.
#[derive(Default)]
pub struct MockHost {
    online: AtomicBool,
    cashout_read_requests: AtomicUsize,
    exceptions: Mutex<Vec<HostException>>,
}

impl MockHost {
    pub fn online() -> Self {
        Self {
            online: AtomicBool::new(true),
            ..Self::default()
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn exceptions(&self) -> Vec<HostException> {
        self.exceptions.lock().unwrap().clone()
    }

    /// Number of times `exception` was raised.
    pub fn raised(&self, exception: HostException) -> usize {
        self.exceptions
            .lock()
            .unwrap()
            .iter()
            .filter(|raised| **raised == exception)
            .count()
    }

    pub fn cashout_read_requests(&self) -> usize {
        self.cashout_read_requests.load(Ordering::SeqCst)
    }
}

impl HostLink for MockHost {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn send_cashout_read_request(&self) {
        self.cashout_read_requests.fetch_add(1, Ordering::SeqCst);
    }

    fn raise_exception(&self, exception: HostException) {
        self.exceptions.lock().unwrap().push(exception);
    }
}

/// Ledger backed by a map of ticket-in records.
#[derive(Default)]
pub struct MockLedger {
    tickets: Mutex<BTreeMap<TransactionId, VoucherInTransaction>>,
    awaiting: Mutex<Option<TransactionId>>,
    acknowledged: Mutex<Vec<TransactionId>>,
    fail_writes: AtomicBool,
}

impl MockLedger {
    /// Simulates a ticket-out or handpay still awaiting host acknowledgement.
    pub fn set_awaiting_acknowledgement(&self, id: Option<TransactionId>) {
        *self.awaiting.lock().unwrap() = id;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn acknowledged(&self) -> Vec<TransactionId> {
        self.acknowledged.lock().unwrap().clone()
    }

    pub fn get(&self, id: TransactionId) -> Option<VoucherInTransaction> {
        self.tickets.lock().unwrap().get(&id).cloned()
    }

    pub fn insert(&self, transaction: VoucherInTransaction) {
        self.tickets
            .lock()
            .unwrap()
            .insert(transaction.id, transaction);
    }
}

impl TicketLedger for MockLedger {
    fn any_awaiting_host_acknowledgement(&self) -> bool {
        self.awaiting.lock().unwrap().is_some()
    }

    fn next_awaiting_host_acknowledgement(&self) -> Option<TransactionId> {
        *self.awaiting.lock().unwrap()
    }

    fn ticket_in(&self, id: TransactionId) -> Result<Option<VoucherInTransaction>> {
        Ok(self.get(id))
    }

    fn record_ticket_in(&self, transaction: VoucherInTransaction) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("ledger write failed"));
        }
        self.insert(transaction);
        Ok(())
    }

    fn acknowledge(&self, id: TransactionId) -> Result<()> {
        let mut awaiting = self.awaiting.lock().unwrap();
        if *awaiting == Some(id) {
            *awaiting = None;
        }
        drop(awaiting);
        if let Some(ticket) = self.tickets.lock().unwrap().get_mut(&id) {
            ticket.host_acknowledged = true;
        }
        self.acknowledged.lock().unwrap().push(id);
        Ok(())
    }
}

/// Credit meters keyed by credit kind.
#[derive(Default)]
pub struct MockBank {
    balances: Mutex<BTreeMap<CreditKind, u64>>,
    fail_deposits: AtomicBool,
}

impl MockBank {
    pub fn balance(&self, kind: CreditKind) -> u64 {
        self.balances
            .lock()
            .unwrap()
            .get(&kind)
            .copied()
            .unwrap_or_default()
    }

    pub fn fail_deposits(&self, fail: bool) {
        self.fail_deposits.store(fail, Ordering::SeqCst);
    }
}

impl Bank for MockBank {
    fn deposit(&self, amount: u64, kind: CreditKind) -> Result<()> {
        if self.fail_deposits.load(Ordering::SeqCst) {
            return Err(anyhow!("meter write failed"));
        }
        let mut balances = self.balances.lock().unwrap();
        let balance = balances.entry(kind).or_default();
        *balance = balance
            .checked_add(amount)
            .ok_or_else(|| anyhow!("balance overflow"))?;
        Ok(())
    }

    fn withdraw(&self, amount: u64, kind: CreditKind) -> Result<()> {
        let mut balances = self.balances.lock().unwrap();
        let balance = balances.entry(kind).or_default();
        *balance = balance
            .checked_sub(amount)
            .ok_or_else(|| anyhow!("insufficient {kind:?} credits"))?;
        Ok(())
    }
}

/// Clock pinned to a settable instant.
pub struct FixedClock {
    now: Mutex<NaiveDateTime>,
}

impl FixedClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Panics on an invalid date or time.
    pub fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> Self {
        let now = NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|date| date.and_hms_opt(hour, minute, second))
            .expect("valid date and time");
        Self::new(now)
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock().unwrap() = now;
    }
}

impl Default for FixedClock {
    fn default() -> Self {
        Self::at(2024, 1, 1, 12, 0, 0)
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap()
    }
}

/// Tracks which disable conditions are raised.
#[derive(Default)]
pub struct MockConditions {
    disabled: Mutex<BTreeSet<DisableCondition>>,
}

impl MockConditions {
    pub fn is_disabled(&self, condition: DisableCondition) -> bool {
        self.disabled.lock().unwrap().contains(&condition)
    }
}

impl MachineConditions for MockConditions {
    fn disable(&self, condition: DisableCondition) {
        self.disabled.lock().unwrap().insert(condition);
    }

    fn enable(&self, condition: DisableCondition) {
        self.disabled.lock().unwrap().remove(&condition);
    }
}

/// Concrete handles to the collaborators inside a mock [Ports].
#[derive(Clone)]
pub struct Mocks {
    pub host: Arc<MockHost>,
    pub ledger: Arc<MockLedger>,
    pub bank: Arc<MockBank>,
    pub clock: Arc<FixedClock>,
    pub conditions: Arc<MockConditions>,
}

impl Mocks {
    pub fn ports(&self) -> Ports {
        Ports {
            host: self.host.clone(),
            ledger: self.ledger.clone(),
            bank: self.bank.clone(),
            clock: self.clock.clone(),
            conditions: self.conditions.clone(),
        }
    }
}

/// Ports wired to fresh mocks, with the host online.
pub fn mock_ports() -> (Ports, Mocks) {
    let mocks = Mocks {
        host: Arc::new(MockHost::online()),
        ledger: Arc::new(MockLedger::default()),
        bank: Arc::new(MockBank::default()),
        clock: Arc::new(FixedClock::default()),
        conditions: Arc::new(MockConditions::default()),
    };
    (mocks.ports(), mocks)
}
