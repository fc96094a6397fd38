//! Ticket validation engine for an electronic gaming machine.
//!
//! Three policies produce the validation numbers printed on cash-out tickets and handpay
//! receipts: standard (no host involvement), secure-enhanced (machine id and sequence) and system
//! (host-assigned). Confirmed validations are kept in a ring-buffer history the host reads back.
//! Inserted tickets are redeemed through a persisted state machine that survives restarts.
//!
//! Collaborators the engine drives (host link, ledger, meters, clock, operator conditions) are
//! abstracted in [ports], durable state in [store].

pub mod barcode;
pub mod config;
pub mod error;
pub mod history;
pub mod policy;
pub mod ports;
pub mod redemption;
pub mod selector;
pub mod service;
pub mod store;
pub mod system_validation;

#[cfg(any(test, feature = "mocks"))]
pub mod mocks;
mod redemption_tests;

pub use config::{ConfigError, ValidationConfig, ValidationMode};
pub use error::{RedemptionError, TransitionError, ValidationError};
pub use history::{HistoryPoll, HistoryResponse, ValidationHistory};
pub use policy::{ActivePolicy, ValidationPolicy};
pub use ports::{Bank, Clock, DisableCondition, HostLink, MachineConditions, Ports, TicketLedger};
pub use selector::ValidationPolicySelector;
pub use service::ValidationService;
pub use store::Store;
pub use system_validation::{
    CashoutType, HostValidationResult, PendingValidationData, SystemValidationCoordinator,
    ValidationReceiptStatus,
};
