/// Largest sequence number a secure-enhanced barcode can encode (24 bits).
pub const MAX_SEQUENCE_NUMBER: u32 = 0x00FF_FFFF;

/// Largest machine validation id a secure-enhanced barcode can encode (24 bits).
pub const MAX_MACHINE_VALIDATION_ID: u32 = 0x00FF_FFFF;

/// Validation system id printed in front of secure-enhanced barcodes.
pub const SECURE_ENHANCED_SYSTEM_ID: u8 = 0;

/// Largest validation system id a host may assign (two decimal digits).
pub const MAX_VALIDATION_SYSTEM_ID: u8 = 99;

/// Largest host-assigned validation number (16 decimal digits).
pub const MAX_SYSTEM_VALIDATION_NUMBER: u64 = 9_999_999_999_999_999;

/// Maximum barcode length accepted when decoding persisted records.
pub const MAX_BARCODE_LENGTH: usize = 32;

/// Default number of records kept in the validation history.
pub const DEFAULT_HISTORY_CAPACITY: usize = 31;

/// Host indices are one byte and zero is reserved for "current".
pub const MAX_HISTORY_CAPACITY: usize = 254;

/// Current version written into persisted snapshots.
pub const SNAPSHOT_VERSION: u8 = 1;

// Timing defaults (milliseconds).
pub const DEFAULT_SYSTEM_VALIDATION_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_REDEMPTION_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_ACKNOWLEDGEMENT_RETRY_MS: u64 = 15_000;
pub const DEFAULT_VALIDATION_ID_ALARM_MS: u64 = 60_000;

/// Expiration defaults in days.
pub const DEFAULT_TICKET_EXPIRATION_DAYS: u16 = 30;
pub const DEFAULT_RESTRICTED_EXPIRATION_DAYS: u16 = 30;
/// Expiration value meaning "never expires".
pub const NEVER_EXPIRES: u16 = 9999;

/// Default ceiling for a single ticket redemption, in minor currency units.
pub const DEFAULT_MAX_REDEMPTION_AMOUNT: u64 = 100_000_000;

/// Host exception codes raised by the validation engine.
pub const EXCEPTION_CASHOUT_TICKET_PRINTED: u8 = 0x3D;
pub const EXCEPTION_HANDPAY_VALIDATED: u8 = 0x3E;
pub const EXCEPTION_VALIDATION_ID_NOT_CONFIGURED: u8 = 0x3F;
pub const EXCEPTION_SYSTEM_VALIDATION_REQUEST: u8 = 0x57;
pub const EXCEPTION_TICKET_INSERTED: u8 = 0x67;
pub const EXCEPTION_TICKET_TRANSFER_COMPLETE: u8 = 0x68;

/// History poll function codes.
pub const HISTORY_POLL_CURRENT: u8 = 0x00;
pub const HISTORY_POLL_LOOK_AHEAD: u8 = 0xFF;
