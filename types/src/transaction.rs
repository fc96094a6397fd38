//! Ledger transaction shapes exchanged with the ticket ledger collaborator.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::{HandpayType, HostException, RedemptionStatus, TicketType, TransactionId, TransferCode};

/// A printed cash-out ticket, reported once the printer confirms it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoucherOutTransaction {
    pub id: TransactionId,
    pub amount: u64,
    pub barcode: String,
    pub ticket_type: TicketType,
    pub issued_at: NaiveDateTime,
    pub expiration_days: u16,
    pub pool_id: u16,
}

/// A handpay settled by an attendant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandpayTransaction {
    pub id: TransactionId,
    pub amount: u64,
    pub handpay_type: HandpayType,
    /// Empty when the handpay was paid without a validation number.
    pub barcode: String,
    pub issued_at: NaiveDateTime,
}

/// A ticket inserted for redemption.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoucherInTransaction {
    pub id: TransactionId,
    pub barcode: String,
    pub amount: u64,
    pub transfer_code: Option<TransferCode>,
    pub status: RedemptionStatus,
    /// Exception to raise towards the host while the outcome awaits acknowledgement.
    pub exception: Option<HostException>,
    /// The final outcome (credit or refusal) has been recorded.
    pub committed: bool,
    pub host_acknowledged: bool,
}

impl VoucherInTransaction {
    pub fn new(id: TransactionId, barcode: impl Into<String>) -> Self {
        Self {
            id,
            barcode: barcode.into(),
            amount: 0,
            transfer_code: None,
            status: RedemptionStatus::WaitingForLongPoll71,
            exception: None,
            committed: false,
            host_acknowledged: false,
        }
    }
}
