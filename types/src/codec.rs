use bytes::{Buf, BufMut};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use commonware_codec::{Error, ReadExt, Write};

/// Helper to write a string as length-prefixed UTF-8 bytes.
pub fn write_string(s: &str, writer: &mut impl BufMut) {
    let bytes = s.as_bytes();
    (bytes.len() as u32).write(writer);
    writer.put_slice(bytes);
}

/// Helper to read a string from length-prefixed UTF-8 bytes.
pub fn read_string(reader: &mut impl Buf, max_len: usize) -> Result<String, Error> {
    let len = u32::read(reader)? as usize;
    if len > max_len {
        return Err(Error::Invalid("String", "too long"));
    }
    if reader.remaining() < len {
        return Err(Error::EndOfBuffer);
    }
    let mut bytes = vec![0u8; len];
    reader.copy_to_slice(&mut bytes);
    String::from_utf8(bytes).map_err(|_| Error::Invalid("String", "invalid UTF-8"))
}

/// Helper to get encode size of a string.
pub fn string_encode_size(s: &str) -> usize {
    4 + s.len()
}

/// Timestamps are stored as whole seconds since the epoch of the machine's local wall clock.
pub fn write_datetime(value: &NaiveDateTime, writer: &mut impl BufMut) {
    value.and_utc().timestamp().write(writer);
}

pub fn read_datetime(reader: &mut impl Buf) -> Result<NaiveDateTime, Error> {
    let secs = i64::read(reader)?;
    DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.naive_utc())
        .ok_or(Error::Invalid("NaiveDateTime", "out of range"))
}

pub const DATETIME_ENCODE_SIZE: usize = 8;

/// Dates are stored as days since the common era.
pub fn write_date(value: &NaiveDate, writer: &mut impl BufMut) {
    use chrono::Datelike;
    value.num_days_from_ce().write(writer);
}

pub fn read_date(reader: &mut impl Buf) -> Result<NaiveDate, Error> {
    let days = i32::read(reader)?;
    NaiveDate::from_num_days_from_ce_opt(days).ok_or(Error::Invalid("NaiveDate", "out of range"))
}
