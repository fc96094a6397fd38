use bytes::{Buf, BufMut};
use chrono::NaiveDateTime;
use commonware_codec::{EncodeSize, Error, Read, ReadExt, ReadRangeExt, Write};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

use super::{
    read_datetime, read_string, string_encode_size, write_datetime, write_string, TransactionId,
    ValidationType, DATETIME_ENCODE_SIZE, MAX_BARCODE_LENGTH, MAX_HISTORY_CAPACITY,
    MAX_MACHINE_VALIDATION_ID, MAX_SEQUENCE_NUMBER, SNAPSHOT_VERSION,
};

#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum ValidationInformationError {
    #[error("machine validation id out of range (got={got}, max={max})")]
    MachineIdOutOfRange { got: u32, max: u32 },
    #[error("sequence number out of range (got={got}, max={max})")]
    SequenceOutOfRange { got: u32, max: u32 },
}

/// Persisted secure-enhanced configuration.
///
/// The sequence number names the barcode the *next* ticket will carry. It only moves after a
/// ticket bearing it has been confirmed printed, so regenerating after a restart neither skips
/// nor repeats a number.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationInformation {
    pub machine_validation_id: u32,
    pub sequence_number: u32,
    pub configured: bool,
}

impl ValidationInformation {
    pub fn new(machine_validation_id: u32, sequence_number: u32) -> Self {
        Self {
            machine_validation_id,
            sequence_number: wrap_sequence(sequence_number as u64),
            configured: true,
        }
    }

    pub fn validate_invariants(&self) -> Result<(), ValidationInformationError> {
        if self.machine_validation_id > MAX_MACHINE_VALIDATION_ID {
            return Err(ValidationInformationError::MachineIdOutOfRange {
                got: self.machine_validation_id,
                max: MAX_MACHINE_VALIDATION_ID,
            });
        }
        if self.sequence_number > MAX_SEQUENCE_NUMBER {
            return Err(ValidationInformationError::SequenceOutOfRange {
                got: self.sequence_number,
                max: MAX_SEQUENCE_NUMBER,
            });
        }
        Ok(())
    }

    /// Returns a copy advanced to the following sequence number.
    pub fn advanced(&self) -> Self {
        Self {
            sequence_number: wrap_sequence(self.sequence_number as u64 + 1),
            ..*self
        }
    }
}

/// Wraps a sequence number into the encodable range `0..=MAX_SEQUENCE_NUMBER`.
pub fn wrap_sequence(sequence: u64) -> u32 {
    (sequence % (MAX_SEQUENCE_NUMBER as u64 + 1)) as u32
}

impl Write for ValidationInformation {
    fn write(&self, writer: &mut impl BufMut) {
        self.machine_validation_id.write(writer);
        self.sequence_number.write(writer);
        self.configured.write(writer);
    }
}

impl Read for ValidationInformation {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let info = Self {
            machine_validation_id: u32::read(reader)?,
            sequence_number: u32::read(reader)?,
            configured: bool::read(reader)?,
        };
        info.validate_invariants()
            .map_err(|_| Error::Invalid("ValidationInformation", "out of range"))?;
        Ok(info)
    }
}

impl EncodeSize for ValidationInformation {
    fn encode_size(&self) -> usize {
        self.machine_validation_id.encode_size()
            + self.sequence_number.encode_size()
            + self.configured.encode_size()
    }
}

/// Payload returned to the host when it polls the validation history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResponse {
    pub validation_type: ValidationType,
    /// Buffer index, `1..=capacity`.
    pub index: u8,
    pub issued_at: NaiveDateTime,
    pub validation_number: String,
    pub amount: u64,
    pub ticket_number: u16,
    pub validation_system_id: u8,
    pub expiration_days: u16,
    pub pool_id: u16,
}

impl Write for ValidationResponse {
    fn write(&self, writer: &mut impl BufMut) {
        self.validation_type.write(writer);
        self.index.write(writer);
        write_datetime(&self.issued_at, writer);
        write_string(&self.validation_number, writer);
        self.amount.write(writer);
        self.ticket_number.write(writer);
        self.validation_system_id.write(writer);
        self.expiration_days.write(writer);
        self.pool_id.write(writer);
    }
}

impl Read for ValidationResponse {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            validation_type: ValidationType::read(reader)?,
            index: u8::read(reader)?,
            issued_at: read_datetime(reader)?,
            validation_number: read_string(reader, MAX_BARCODE_LENGTH)?,
            amount: u64::read(reader)?,
            ticket_number: u16::read(reader)?,
            validation_system_id: u8::read(reader)?,
            expiration_days: u16::read(reader)?,
            pool_id: u16::read(reader)?,
        })
    }
}

impl EncodeSize for ValidationResponse {
    fn encode_size(&self) -> usize {
        self.validation_type.encode_size()
            + self.index.encode_size()
            + DATETIME_ENCODE_SIZE
            + string_encode_size(&self.validation_number)
            + self.amount.encode_size()
            + self.ticket_number.encode_size()
            + self.validation_system_id.encode_size()
            + self.expiration_days.encode_size()
            + self.pool_id.encode_size()
    }
}

/// One completed validation kept for host polling.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationHistoryRecord {
    pub transaction_id: TransactionId,
    /// Monotonic counter assigned at append time, starting at 1.
    pub host_sequence: u64,
    pub response: ValidationResponse,
    pub acknowledged: bool,
}

impl Write for ValidationHistoryRecord {
    fn write(&self, writer: &mut impl BufMut) {
        self.transaction_id.write(writer);
        self.host_sequence.write(writer);
        self.response.write(writer);
        self.acknowledged.write(writer);
    }
}

impl Read for ValidationHistoryRecord {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            transaction_id: TransactionId::read(reader)?,
            host_sequence: u64::read(reader)?,
            response: ValidationResponse::read(reader)?,
            acknowledged: bool::read(reader)?,
        })
    }
}

impl EncodeSize for ValidationHistoryRecord {
    fn encode_size(&self) -> usize {
        self.transaction_id.encode_size()
            + self.host_sequence.encode_size()
            + self.response.encode_size()
            + self.acknowledged.encode_size()
    }
}

/// Persisted form of the validation history ring buffer, oldest record first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistorySnapshot {
    pub version: u8,
    pub next_host_sequence: u64,
    pub records: Vec<ValidationHistoryRecord>,
}

impl Default for HistorySnapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            next_host_sequence: 1,
            records: Vec::new(),
        }
    }
}

impl Write for HistorySnapshot {
    fn write(&self, writer: &mut impl BufMut) {
        self.version.write(writer);
        self.next_host_sequence.write(writer);
        self.records.write(writer);
    }
}

impl Read for HistorySnapshot {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let version = u8::read(reader)?;
        if version != SNAPSHOT_VERSION {
            return Err(Error::Invalid("HistorySnapshot", "unsupported version"));
        }
        Ok(Self {
            version,
            next_host_sequence: u64::read(reader)?,
            records: Vec::<ValidationHistoryRecord>::read_range(reader, 0..=MAX_HISTORY_CAPACITY)?,
        })
    }
}

impl EncodeSize for HistorySnapshot {
    fn encode_size(&self) -> usize {
        self.version.encode_size() + self.next_host_sequence.encode_size() + self.records.encode_size()
    }
}
