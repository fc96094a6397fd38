//! Bounded history of completed validations.
//!
//! The host polls this log to learn which tickets and handpays the machine validated. Records
//! are kept oldest first; once `capacity` records exist the oldest is evicted on every append.
//! The index exposed to the host is `((host_sequence - 1) % capacity) + 1`, so an index always
//! names the newest record written to that slot and an evicted record can no longer be reached.

use anyhow::{Context as _, Result};
use egm_types::{
    HistorySnapshot, Key, TransactionId, ValidationHistoryRecord, ValidationResponse, Value,
    HISTORY_POLL_CURRENT, HISTORY_POLL_LOOK_AHEAD, SNAPSHOT_VERSION,
};
use std::{collections::VecDeque, sync::Arc};
use tokio::sync::Mutex;
use tracing::debug;

use crate::store::{Status, Store};

/// History shared by the active policy and host polling.
pub type SharedHistory = Arc<Mutex<ValidationHistory>>;

/// What the host asked for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HistoryPoll {
    /// Oldest unacknowledged record; reading it acknowledges it.
    Current,
    /// Oldest unacknowledged record without acknowledging it.
    LookAhead,
    /// Record stored at a buffer index, `1..=capacity`.
    Index(u8),
}

impl HistoryPoll {
    pub fn from_code(code: u8) -> Self {
        match code {
            HISTORY_POLL_CURRENT => HistoryPoll::Current,
            HISTORY_POLL_LOOK_AHEAD => HistoryPoll::LookAhead,
            index => HistoryPoll::Index(index),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HistoryResponse {
    Record(ValidationHistoryRecord),
    NoRecord,
}

impl HistoryResponse {
    pub fn record(&self) -> Option<&ValidationHistoryRecord> {
        match self {
            HistoryResponse::Record(record) => Some(record),
            HistoryResponse::NoRecord => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationHistory {
    capacity: usize,
    next_host_sequence: u64,
    records: VecDeque<ValidationHistoryRecord>,
}

impl ValidationHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            next_host_sequence: 1,
            records: VecDeque::with_capacity(capacity),
        }
    }

    /// Rebuilds the history from a persisted snapshot.
    ///
    /// If the configured capacity shrank, the oldest records are dropped and the remaining ones
    /// are re-indexed for the new capacity.
    pub fn restore(snapshot: HistorySnapshot, capacity: usize) -> Self {
        let mut history = Self::new(capacity);
        history.next_host_sequence = snapshot.next_host_sequence.max(1);
        history.records = snapshot.records.into();
        while history.records.len() > history.capacity {
            history.records.pop_front();
        }
        let capacity = history.capacity;
        for record in history.records.iter_mut() {
            record.response.index = index_for(record.host_sequence, capacity);
        }
        history
    }

    pub fn snapshot(&self) -> HistorySnapshot {
        HistorySnapshot {
            version: SNAPSHOT_VERSION,
            next_host_sequence: self.next_host_sequence,
            records: self.records.iter().cloned().collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, transaction_id: TransactionId) -> bool {
        self.records
            .iter()
            .any(|record| record.transaction_id == transaction_id)
    }

    /// Every slot holds a record the host has not acknowledged yet.
    pub fn is_saturated(&self) -> bool {
        self.records.len() >= self.capacity && self.records.iter().all(|r| !r.acknowledged)
    }

    /// Appends a record, evicting the oldest when full.
    pub fn append(
        &mut self,
        transaction_id: TransactionId,
        mut response: ValidationResponse,
    ) -> ValidationHistoryRecord {
        let host_sequence = self.next_host_sequence;
        self.next_host_sequence += 1;
        response.index = index_for(host_sequence, self.capacity);

        let record = ValidationHistoryRecord {
            transaction_id,
            host_sequence,
            response,
            acknowledged: false,
        };
        self.records.push_back(record.clone());
        while self.records.len() > self.capacity {
            if let Some(evicted) = self.records.pop_front() {
                debug!(
                    host_sequence = evicted.host_sequence,
                    acknowledged = evicted.acknowledged,
                    "evicted validation history record"
                );
            }
        }
        record
    }

    pub fn by_sequence(&self, host_sequence: u64) -> Option<&ValidationHistoryRecord> {
        self.records
            .iter()
            .find(|record| record.host_sequence == host_sequence)
    }

    /// Answers a host poll. Only [`HistoryPoll::Current`] mutates the history.
    pub fn respond(&mut self, poll: HistoryPoll) -> HistoryResponse {
        match poll {
            HistoryPoll::Current => match self.records.iter_mut().find(|r| !r.acknowledged) {
                Some(record) => {
                    record.acknowledged = true;
                    HistoryResponse::Record(record.clone())
                }
                None => HistoryResponse::NoRecord,
            },
            HistoryPoll::LookAhead => self
                .records
                .iter()
                .find(|r| !r.acknowledged)
                .cloned()
                .map_or(HistoryResponse::NoRecord, HistoryResponse::Record),
            HistoryPoll::Index(index) => {
                if index == 0 || index as usize > self.capacity {
                    return HistoryResponse::NoRecord;
                }
                self.records
                    .iter()
                    .rev()
                    .find(|r| r.response.index == index)
                    .cloned()
                    .map_or(HistoryResponse::NoRecord, HistoryResponse::Record)
            }
        }
    }
}

/// Host-visible index of a host sequence number.
pub fn index_for(host_sequence: u64, capacity: usize) -> u8 {
    let capacity = capacity.max(1) as u64;
    ((host_sequence.saturating_sub(1) % capacity) + 1) as u8
}

/// Change set writing `history` to the store.
pub fn history_change(history: &ValidationHistory) -> (Key, Status) {
    (
        Key::ValidationHistory,
        Status::Update(Value::ValidationHistory(history.snapshot())),
    )
}

pub async fn persist_history<S: Store>(store: &S, history: &ValidationHistory) -> Result<()> {
    store
        .apply(vec![history_change(history)])
        .await
        .context("persist validation history")
}
