use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, FixedSize, Read, ReadExt, Write};
use serde::{Deserialize, Serialize};

use super::{
    HistorySnapshot, TicketInInfo, TransactionId, ValidationInformation, SNAPSHOT_VERSION,
};

/// Lifecycle of a ticket inserted for redemption.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RedemptionState {
    #[default]
    Idle = 0,
    ValidationRequestPending = 1,
    ValidationRequestPendingWithAckPending = 2,
    ValidationDataPending = 3,
    RequestPending = 4,
    AcknowledgementPending = 5,
}

impl RedemptionState {
    /// States in which a ticket has been announced but the host has not read its data.
    pub fn is_awaiting_data_request(&self) -> bool {
        matches!(
            self,
            RedemptionState::ValidationRequestPending
                | RedemptionState::ValidationRequestPendingWithAckPending
        )
    }
}

impl TryFrom<u8> for RedemptionState {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RedemptionState::Idle),
            1 => Ok(RedemptionState::ValidationRequestPending),
            2 => Ok(RedemptionState::ValidationRequestPendingWithAckPending),
            3 => Ok(RedemptionState::ValidationDataPending),
            4 => Ok(RedemptionState::RequestPending),
            5 => Ok(RedemptionState::AcknowledgementPending),
            _ => Err(()),
        }
    }
}

impl Write for RedemptionState {
    fn write(&self, writer: &mut impl BufMut) {
        (*self as u8).write(writer);
    }
}

impl Read for RedemptionState {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let value = u8::read(reader)?;
        RedemptionState::try_from(value).map_err(|_| Error::InvalidEnum(value))
    }
}

impl FixedSize for RedemptionState {
    const SIZE: usize = u8::SIZE;
}

/// Outbound system-validation round trip. Never persisted: a restart abandons the request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SystemValidationState {
    #[default]
    NoValidationPending,
    CashoutInformationPending,
    ValidationNumberPending,
}

/// Recovery record written by the redemption coordinator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedemptionSnapshot {
    pub version: u8,
    pub state: RedemptionState,
    pub current: Option<TicketInInfo>,
    pub transaction_id: Option<TransactionId>,
    /// The final outcome of `current` has been recorded in the ledger.
    pub committed: bool,
    /// The host acknowledged the final outcome of `current`.
    pub commit_acknowledged: bool,
}

impl Default for RedemptionSnapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            state: RedemptionState::Idle,
            current: None,
            transaction_id: None,
            committed: false,
            commit_acknowledged: false,
        }
    }
}

impl Write for RedemptionSnapshot {
    fn write(&self, writer: &mut impl BufMut) {
        self.version.write(writer);
        self.state.write(writer);
        self.current.write(writer);
        self.transaction_id.write(writer);
        self.committed.write(writer);
        self.commit_acknowledged.write(writer);
    }
}

impl Read for RedemptionSnapshot {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let version = u8::read(reader)?;
        if version != SNAPSHOT_VERSION {
            return Err(Error::Invalid("RedemptionSnapshot", "unsupported version"));
        }
        Ok(Self {
            version,
            state: RedemptionState::read(reader)?,
            current: Option::<TicketInInfo>::read(reader)?,
            transaction_id: Option::<TransactionId>::read(reader)?,
            committed: bool::read(reader)?,
            commit_acknowledged: bool::read(reader)?,
        })
    }
}

impl EncodeSize for RedemptionSnapshot {
    fn encode_size(&self) -> usize {
        self.version.encode_size()
            + self.state.encode_size()
            + self.current.encode_size()
            + self.transaction_id.encode_size()
            + self.committed.encode_size()
            + self.commit_acknowledged.encode_size()
    }
}

/// Durable slots owned by the validation engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    ValidationInformation,
    ValidationHistory,
    Redemption,
}

impl Write for Key {
    fn write(&self, writer: &mut impl BufMut) {
        match self {
            Key::ValidationInformation => 0u8.write(writer),
            Key::ValidationHistory => 1u8.write(writer),
            Key::Redemption => 2u8.write(writer),
        }
    }
}

impl Read for Key {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let kind = u8::read(reader)?;
        match kind {
            0 => Ok(Key::ValidationInformation),
            1 => Ok(Key::ValidationHistory),
            2 => Ok(Key::Redemption),
            i => Err(Error::InvalidEnum(i)),
        }
    }
}

impl FixedSize for Key {
    const SIZE: usize = u8::SIZE;
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[allow(clippy::large_enum_variant)]
pub enum Value {
    ValidationInformation(ValidationInformation),
    ValidationHistory(HistorySnapshot),
    Redemption(RedemptionSnapshot),
}

impl Write for Value {
    fn write(&self, writer: &mut impl BufMut) {
        match self {
            Value::ValidationInformation(info) => {
                0u8.write(writer);
                info.write(writer);
            }
            Value::ValidationHistory(history) => {
                1u8.write(writer);
                history.write(writer);
            }
            Value::Redemption(snapshot) => {
                2u8.write(writer);
                snapshot.write(writer);
            }
        }
    }
}

impl Read for Value {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let kind = u8::read(reader)?;
        match kind {
            0 => Ok(Value::ValidationInformation(ValidationInformation::read(reader)?)),
            1 => Ok(Value::ValidationHistory(HistorySnapshot::read(reader)?)),
            2 => Ok(Value::Redemption(RedemptionSnapshot::read(reader)?)),
            i => Err(Error::InvalidEnum(i)),
        }
    }
}

impl EncodeSize for Value {
    fn encode_size(&self) -> usize {
        1 + match self {
            Value::ValidationInformation(info) => info.encode_size(),
            Value::ValidationHistory(history) => history.encode_size(),
            Value::Redemption(snapshot) => snapshot.encode_size(),
        }
    }
}
