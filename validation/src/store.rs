use anyhow::{Context as _, Result};
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, Read, ReadExt, Write};
use egm_types::{HistorySnapshot, Key, RedemptionSnapshot, ValidationInformation, Value};
use std::future::Future;

#[cfg(any(test, feature = "mocks"))]
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};

/// Durable key/value storage for the validation engine.
///
/// Implementations must make [`Store::apply`] atomic: either every change lands or none do.
pub trait Store: Send + Sync + 'static {
    fn get(&self, key: &Key) -> impl Future<Output = Result<Option<Value>>> + Send;
    fn apply(&self, changes: Vec<(Key, Status)>) -> impl Future<Output = Result<()>> + Send;

    fn insert(&self, key: Key, value: Value) -> impl Future<Output = Result<()>> + Send {
        self.apply(vec![(key, Status::Update(value))])
    }

    fn delete(&self, key: &Key) -> impl Future<Output = Result<()>> + Send {
        self.apply(vec![(*key, Status::Delete)])
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[allow(clippy::large_enum_variant)]
pub enum Status {
    Update(Value),
    Delete,
}

impl Write for Status {
    fn write(&self, writer: &mut impl BufMut) {
        match self {
            Status::Update(value) => {
                0u8.write(writer);
                value.write(writer);
            }
            Status::Delete => 1u8.write(writer),
        }
    }
}

impl Read for Status {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let kind = u8::read(reader)?;
        match kind {
            0 => Ok(Status::Update(Value::read(reader)?)),
            1 => Ok(Status::Delete),
            _ => Err(Error::InvalidEnum(kind)),
        }
    }
}

impl EncodeSize for Status {
    fn encode_size(&self) -> usize {
        1 + match self {
            Status::Update(value) => value.encode_size(),
            Status::Delete => 0,
        }
    }
}

pub async fn load_validation_information<S: Store>(
    store: &S,
) -> Result<Option<ValidationInformation>> {
    match store
        .get(&Key::ValidationInformation)
        .await
        .context("load validation information")?
    {
        Some(Value::ValidationInformation(info)) => Ok(Some(info)),
        Some(other) => anyhow::bail!("unexpected value under validation information: {other:?}"),
        None => Ok(None),
    }
}

pub async fn load_history<S: Store>(store: &S) -> Result<Option<HistorySnapshot>> {
    match store
        .get(&Key::ValidationHistory)
        .await
        .context("load validation history")?
    {
        Some(Value::ValidationHistory(snapshot)) => Ok(Some(snapshot)),
        Some(other) => anyhow::bail!("unexpected value under validation history: {other:?}"),
        None => Ok(None),
    }
}

pub async fn load_redemption<S: Store>(store: &S) -> Result<Option<RedemptionSnapshot>> {
    match store
        .get(&Key::Redemption)
        .await
        .context("load redemption snapshot")?
    {
        Some(Value::Redemption(snapshot)) => Ok(Some(snapshot)),
        Some(other) => anyhow::bail!("unexpected value under redemption: {other:?}"),
        None => Ok(None),
    }
}

/// In-memory store with optional write failure injection.
#[cfg(any(test, feature = "mocks"))]
#[derive(Default)]
pub struct Memory {
    state: Mutex<BTreeMap<Key, Value>>,
    fail_writes: AtomicBool,
}

#[cfg(any(test, feature = "mocks"))]
impl Memory {
    /// Makes every subsequent [`Store::apply`] fail until reset.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[cfg(any(test, feature = "mocks"))]
impl Store for Memory {
    async fn get(&self, key: &Key) -> Result<Option<Value>> {
        let state = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store poisoned"))?;
        Ok(state.get(key).cloned())
    }

    async fn apply(&self, changes: Vec<(Key, Status)>) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("memory store write failure");
        }
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store poisoned"))?;
        for (key, status) in changes {
            match status {
                Status::Update(value) => {
                    state.insert(key, value);
                }
                Status::Delete => {
                    state.remove(&key);
                }
            }
        }
        Ok(())
    }
}
