use bytes::{Buf, BufMut};
use chrono::NaiveDateTime;
use commonware_codec::{EncodeSize, Error, FixedSize, Read, ReadExt, Write};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{
    read_string, string_encode_size, write_string, EXCEPTION_CASHOUT_TICKET_PRINTED,
    EXCEPTION_HANDPAY_VALIDATED, EXCEPTION_SYSTEM_VALIDATION_REQUEST, EXCEPTION_TICKET_INSERTED,
    EXCEPTION_TICKET_TRANSFER_COMPLETE, EXCEPTION_VALIDATION_ID_NOT_CONFIGURED, MAX_BARCODE_LENGTH,
};

/// Implements the one-byte codec shared by every protocol code enum.
macro_rules! u8_code_codec {
    ($name:ident) => {
        impl Write for $name {
            fn write(&self, writer: &mut impl BufMut) {
                (*self as u8).write(writer);
            }
        }

        impl Read for $name {
            type Cfg = ();

            fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
                let value = u8::read(reader)?;
                $name::try_from(value).map_err(|_| Error::InvalidEnum(value))
            }
        }

        impl FixedSize for $name {
            const SIZE: usize = u8::SIZE;
        }
    };
}

/// Kind of voucher printed at cash-out.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketType {
    CashOut = 0,
    /// Restricted promotional credits; only valid on a matching pool.
    Restricted = 1,
    NonRestricted = 2,
}

impl TicketType {
    /// Restricted and non-restricted promotional tickets are "non-cash" tickets.
    pub fn is_non_cash(&self) -> bool {
        !matches!(self, TicketType::CashOut)
    }
}

impl TryFrom<u8> for TicketType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TicketType::CashOut),
            1 => Ok(TicketType::Restricted),
            2 => Ok(TicketType::NonRestricted),
            _ => Err(()),
        }
    }
}

u8_code_codec!(TicketType);

/// Reason an attendant pays a cash-out by hand.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandpayType {
    CanceledCredit = 0,
    GameWin = 1,
    BonusPay = 2,
}

impl TryFrom<u8> for HandpayType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(HandpayType::CanceledCredit),
            1 => Ok(HandpayType::GameWin),
            2 => Ok(HandpayType::BonusPay),
            _ => Err(()),
        }
    }
}

u8_code_codec!(HandpayType);

/// Validation type reported to the host for each history record.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationType {
    CashableTicket = 0x00,
    RestrictedTicket = 0x01,
    NonRestrictedTicket = 0x02,
    HandpayCanceledCredit = 0x10,
    HandpayGameWin = 0x20,
    HandpayBonusPay = 0x40,
}

impl ValidationType {
    pub fn from_ticket(ticket_type: TicketType) -> Self {
        match ticket_type {
            TicketType::CashOut => ValidationType::CashableTicket,
            TicketType::Restricted => ValidationType::RestrictedTicket,
            TicketType::NonRestricted => ValidationType::NonRestrictedTicket,
        }
    }

    pub fn from_handpay(handpay_type: HandpayType) -> Self {
        match handpay_type {
            HandpayType::CanceledCredit => ValidationType::HandpayCanceledCredit,
            HandpayType::GameWin => ValidationType::HandpayGameWin,
            HandpayType::BonusPay => ValidationType::HandpayBonusPay,
        }
    }

    pub fn is_handpay(&self) -> bool {
        matches!(
            self,
            ValidationType::HandpayCanceledCredit
                | ValidationType::HandpayGameWin
                | ValidationType::HandpayBonusPay
        )
    }
}

impl TryFrom<u8> for ValidationType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(ValidationType::CashableTicket),
            0x01 => Ok(ValidationType::RestrictedTicket),
            0x02 => Ok(ValidationType::NonRestrictedTicket),
            0x10 => Ok(ValidationType::HandpayCanceledCredit),
            0x20 => Ok(ValidationType::HandpayGameWin),
            0x40 => Ok(ValidationType::HandpayBonusPay),
            _ => Err(()),
        }
    }
}

u8_code_codec!(ValidationType);

/// Host classification of an inserted ticket (long-poll 71 transfer code).
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferCode {
    ValidCashableTicket = 0x00,
    ValidRestrictedPromotionalTicket = 0x01,
    ValidNonRestrictedPromotionalTicket = 0x02,
    UnableToValidate = 0x80,
    NotAValidValidationNumber = 0x81,
    ValidationNumberNotInSystem = 0x82,
    TicketMarkedPendingInSystem = 0x83,
    TicketAlreadyRedeemed = 0x84,
    TicketExpired = 0x85,
    ValidationInformationNotAvailable = 0x86,
    TicketAmountDoesNotMatchSystem = 0x87,
    TicketAmountExceedsAutoRedemptionLimit = 0x88,
    RequestForCurrentTicketStatus = 0xFF,
}

impl TransferCode {
    /// Whether the host is telling the machine to credit the ticket.
    pub fn is_redeemable(&self) -> bool {
        self.credit_kind().is_some()
    }

    pub fn credit_kind(&self) -> Option<CreditKind> {
        match self {
            TransferCode::ValidCashableTicket => Some(CreditKind::Cashable),
            TransferCode::ValidRestrictedPromotionalTicket => Some(CreditKind::Restricted),
            TransferCode::ValidNonRestrictedPromotionalTicket => Some(CreditKind::NonRestricted),
            _ => None,
        }
    }

    /// Redemption status reported once a ticket with this code has been credited.
    pub fn redeemed_status(&self) -> Option<RedemptionStatus> {
        match self.credit_kind()? {
            CreditKind::Cashable => Some(RedemptionStatus::CashableTicketRedeemed),
            CreditKind::Restricted => Some(RedemptionStatus::RestrictedPromotionalTicketRedeemed),
            CreditKind::NonRestricted => {
                Some(RedemptionStatus::NonRestrictedPromotionalTicketRedeemed)
            }
        }
    }
}

impl TryFrom<u8> for TransferCode {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(TransferCode::ValidCashableTicket),
            0x01 => Ok(TransferCode::ValidRestrictedPromotionalTicket),
            0x02 => Ok(TransferCode::ValidNonRestrictedPromotionalTicket),
            0x80 => Ok(TransferCode::UnableToValidate),
            0x81 => Ok(TransferCode::NotAValidValidationNumber),
            0x82 => Ok(TransferCode::ValidationNumberNotInSystem),
            0x83 => Ok(TransferCode::TicketMarkedPendingInSystem),
            0x84 => Ok(TransferCode::TicketAlreadyRedeemed),
            0x85 => Ok(TransferCode::TicketExpired),
            0x86 => Ok(TransferCode::ValidationInformationNotAvailable),
            0x87 => Ok(TransferCode::TicketAmountDoesNotMatchSystem),
            0x88 => Ok(TransferCode::TicketAmountExceedsAutoRedemptionLimit),
            0xFF => Ok(TransferCode::RequestForCurrentTicketStatus),
            _ => Err(()),
        }
    }
}

u8_code_codec!(TransferCode);

/// Machine-side status of the ticket being redeemed.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedemptionStatus {
    CashableTicketRedeemed = 0x00,
    RestrictedPromotionalTicketRedeemed = 0x01,
    NonRestrictedPromotionalTicketRedeemed = 0x02,
    WaitingForLongPoll71 = 0x20,
    TicketRedemptionPending = 0x40,
    TicketRejectedByHost = 0x80,
    ValidationNumberDoesNotMatch = 0x81,
    NotAValidTransferFunction = 0x82,
    NotAValidTransferAmount = 0x83,
    TransferAmountExceededCreditLimit = 0x84,
    TransferAmountNotEvenMultiple = 0x85,
    TransferAmountDoesNotMatchTicket = 0x86,
    GamingMachineUnableToAcceptTransfer = 0x87,
    TicketRejectedDueToTimeout = 0x88,
    TicketRejectedDueToCommLinkDown = 0x89,
    TicketRedemptionDisabled = 0x8A,
    TicketRejectedDueToValidatorFailure = 0x8B,
    NotCompatibleWithCurrentRedemptionCycle = 0xC0,
    NoValidationInfoAvailable = 0xFF,
}

impl RedemptionStatus {
    pub fn is_redeemed(&self) -> bool {
        (*self as u8) < 0x20
    }

    pub fn is_rejected(&self) -> bool {
        (*self as u8) >= 0x80 && *self != RedemptionStatus::NoValidationInfoAvailable
    }

    /// A final status is one that the host must acknowledge.
    pub fn is_final(&self) -> bool {
        self.is_redeemed() || self.is_rejected()
    }
}

impl TryFrom<u8> for RedemptionStatus {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(RedemptionStatus::CashableTicketRedeemed),
            0x01 => Ok(RedemptionStatus::RestrictedPromotionalTicketRedeemed),
            0x02 => Ok(RedemptionStatus::NonRestrictedPromotionalTicketRedeemed),
            0x20 => Ok(RedemptionStatus::WaitingForLongPoll71),
            0x40 => Ok(RedemptionStatus::TicketRedemptionPending),
            0x80 => Ok(RedemptionStatus::TicketRejectedByHost),
            0x81 => Ok(RedemptionStatus::ValidationNumberDoesNotMatch),
            0x82 => Ok(RedemptionStatus::NotAValidTransferFunction),
            0x83 => Ok(RedemptionStatus::NotAValidTransferAmount),
            0x84 => Ok(RedemptionStatus::TransferAmountExceededCreditLimit),
            0x85 => Ok(RedemptionStatus::TransferAmountNotEvenMultiple),
            0x86 => Ok(RedemptionStatus::TransferAmountDoesNotMatchTicket),
            0x87 => Ok(RedemptionStatus::GamingMachineUnableToAcceptTransfer),
            0x88 => Ok(RedemptionStatus::TicketRejectedDueToTimeout),
            0x89 => Ok(RedemptionStatus::TicketRejectedDueToCommLinkDown),
            0x8A => Ok(RedemptionStatus::TicketRedemptionDisabled),
            0x8B => Ok(RedemptionStatus::TicketRejectedDueToValidatorFailure),
            0xC0 => Ok(RedemptionStatus::NotCompatibleWithCurrentRedemptionCycle),
            0xFF => Ok(RedemptionStatus::NoValidationInfoAvailable),
            _ => Err(()),
        }
    }
}

u8_code_codec!(RedemptionStatus);

/// Exception conditions the engine raises towards the host.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostException {
    CashoutTicketPrinted = EXCEPTION_CASHOUT_TICKET_PRINTED,
    HandpayValidated = EXCEPTION_HANDPAY_VALIDATED,
    ValidationIdNotConfigured = EXCEPTION_VALIDATION_ID_NOT_CONFIGURED,
    SystemValidationRequest = EXCEPTION_SYSTEM_VALIDATION_REQUEST,
    TicketInserted = EXCEPTION_TICKET_INSERTED,
    TicketTransferComplete = EXCEPTION_TICKET_TRANSFER_COMPLETE,
}

impl HostException {
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

impl TryFrom<u8> for HostException {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            EXCEPTION_CASHOUT_TICKET_PRINTED => Ok(HostException::CashoutTicketPrinted),
            EXCEPTION_HANDPAY_VALIDATED => Ok(HostException::HandpayValidated),
            EXCEPTION_VALIDATION_ID_NOT_CONFIGURED => Ok(HostException::ValidationIdNotConfigured),
            EXCEPTION_SYSTEM_VALIDATION_REQUEST => Ok(HostException::SystemValidationRequest),
            EXCEPTION_TICKET_INSERTED => Ok(HostException::TicketInserted),
            EXCEPTION_TICKET_TRANSFER_COMPLETE => Ok(HostException::TicketTransferComplete),
            _ => Err(()),
        }
    }
}

u8_code_codec!(HostException);

/// Credit meter a redeemed ticket is deposited to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditKind {
    Cashable,
    Restricted,
    NonRestricted,
}

/// Ledger identifier of a ticket or handpay transaction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Write for TransactionId {
    fn write(&self, writer: &mut impl BufMut) {
        self.0.write(writer);
    }
}

impl Read for TransactionId {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self(u64::read(reader)?))
    }
}

impl FixedSize for TransactionId {
    const SIZE: usize = u64::SIZE;
}

/// Validation produced for a ticket-out or handpay, handed to the printer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketOutInfo {
    /// Amount in minor currency units.
    pub amount: u64,
    pub issued_at: NaiveDateTime,
    /// Printable validation number; empty when a handpay could not be validated.
    pub barcode: String,
    pub ticket_type: TicketType,
    pub expiration_days: u16,
    /// Pool of a restricted ticket, zero otherwise.
    pub pool_id: u16,
}

impl TicketOutInfo {
    pub fn has_barcode(&self) -> bool {
        !self.barcode.is_empty()
    }
}

/// Ticket inserted for redemption, updated as the host classifies it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketInInfo {
    pub barcode: String,
    pub amount: u64,
    pub transfer_code: Option<TransferCode>,
    pub status: RedemptionStatus,
    pub transaction_id: Option<TransactionId>,
    pub pool_id: u16,
}

impl TicketInInfo {
    pub fn inserted(barcode: impl Into<String>, transaction_id: TransactionId) -> Self {
        Self {
            barcode: barcode.into(),
            amount: 0,
            transfer_code: None,
            status: RedemptionStatus::WaitingForLongPoll71,
            transaction_id: Some(transaction_id),
            pool_id: 0,
        }
    }

    /// Marks the ticket as refused with the given status, clearing any granted amount.
    pub fn deny(&mut self, status: RedemptionStatus, transfer_code: Option<TransferCode>) {
        self.status = status;
        if transfer_code.is_some() {
            self.transfer_code = transfer_code;
        }
        self.amount = 0;
    }

    pub fn is_redeemed(&self) -> bool {
        self.status.is_redeemed()
    }
}

impl Write for TicketInInfo {
    fn write(&self, writer: &mut impl BufMut) {
        write_string(&self.barcode, writer);
        self.amount.write(writer);
        self.transfer_code.write(writer);
        self.status.write(writer);
        self.transaction_id.write(writer);
        self.pool_id.write(writer);
    }
}

impl Read for TicketInInfo {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            barcode: read_string(reader, MAX_BARCODE_LENGTH)?,
            amount: u64::read(reader)?,
            transfer_code: Option::<TransferCode>::read(reader)?,
            status: RedemptionStatus::read(reader)?,
            transaction_id: Option::<TransactionId>::read(reader)?,
            pool_id: u16::read(reader)?,
        })
    }
}

impl EncodeSize for TicketInInfo {
    fn encode_size(&self) -> usize {
        string_encode_size(&self.barcode)
            + self.amount.encode_size()
            + self.transfer_code.encode_size()
            + self.status.encode_size()
            + self.transaction_id.encode_size()
            + self.pool_id.encode_size()
    }
}
