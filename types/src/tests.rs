use super::*;
use chrono::NaiveDate;
use commonware_codec::{Encode, ReadExt};
use proptest::prelude::*;

fn issued_at() -> chrono::NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 6, 1)
        .unwrap()
        .and_hms_opt(9, 30, 0)
        .unwrap()
}

fn sample_response(index: u8) -> ValidationResponse {
    ValidationResponse {
        validation_type: ValidationType::CashableTicket,
        index,
        issued_at: issued_at(),
        validation_number: "004000020565508532".to_string(),
        amount: 2_500,
        ticket_number: 7,
        validation_system_id: SECURE_ENHANCED_SYSTEM_ID,
        expiration_days: DEFAULT_TICKET_EXPIRATION_DAYS,
        pool_id: 0,
    }
}

#[test]
fn test_transfer_code_roundtrip() {
    for code in [
        TransferCode::ValidCashableTicket,
        TransferCode::ValidRestrictedPromotionalTicket,
        TransferCode::ValidNonRestrictedPromotionalTicket,
        TransferCode::UnableToValidate,
        TransferCode::TicketAlreadyRedeemed,
        TransferCode::TicketExpired,
        TransferCode::RequestForCurrentTicketStatus,
    ] {
        let encoded = code.encode();
        let decoded = TransferCode::read(&mut &encoded[..]).unwrap();
        assert_eq!(code, decoded);
    }
}

#[test]
fn test_unknown_codes_are_rejected() {
    assert!(TransferCode::read(&mut &[0x42u8][..]).is_err());
    assert!(RedemptionStatus::read(&mut &[0x21u8][..]).is_err());
    assert!(ValidationType::read(&mut &[0x03u8][..]).is_err());
    assert!(HostException::read(&mut &[0x00u8][..]).is_err());
    assert!(RedemptionState::read(&mut &[6u8][..]).is_err());
}

#[test]
fn test_transfer_code_credit_kinds() {
    assert_eq!(
        TransferCode::ValidCashableTicket.credit_kind(),
        Some(CreditKind::Cashable)
    );
    assert_eq!(
        TransferCode::ValidRestrictedPromotionalTicket.redeemed_status(),
        Some(RedemptionStatus::RestrictedPromotionalTicketRedeemed)
    );
    assert!(!TransferCode::TicketExpired.is_redeemable());
    assert!(!TransferCode::RequestForCurrentTicketStatus.is_redeemable());
}

#[test]
fn test_redemption_status_classes() {
    assert!(RedemptionStatus::CashableTicketRedeemed.is_final());
    assert!(RedemptionStatus::TicketRejectedByHost.is_rejected());
    assert!(RedemptionStatus::NotCompatibleWithCurrentRedemptionCycle.is_rejected());
    assert!(!RedemptionStatus::WaitingForLongPoll71.is_final());
    assert!(!RedemptionStatus::TicketRedemptionPending.is_final());
    assert!(!RedemptionStatus::NoValidationInfoAvailable.is_final());
}

#[test]
fn test_host_exception_codes() {
    assert_eq!(HostException::CashoutTicketPrinted.code(), 0x3D);
    assert_eq!(HostException::HandpayValidated.code(), 0x3E);
    assert_eq!(HostException::ValidationIdNotConfigured.code(), 0x3F);
    assert_eq!(HostException::SystemValidationRequest.code(), 0x57);
    assert_eq!(HostException::TicketInserted.code(), 0x67);
    assert_eq!(HostException::TicketTransferComplete.code(), 0x68);
}

#[test]
fn test_ticket_in_deny_clears_amount() {
    let mut ticket = TicketInInfo::inserted("0014103001314864", TransactionId(3));
    ticket.amount = 500;
    ticket.transfer_code = Some(TransferCode::ValidCashableTicket);
    ticket.deny(RedemptionStatus::TicketRejectedDueToTimeout, None);
    assert_eq!(ticket.amount, 0);
    assert_eq!(ticket.transfer_code, Some(TransferCode::ValidCashableTicket));
    assert_eq!(ticket.status, RedemptionStatus::TicketRejectedDueToTimeout);
}

#[test]
fn test_validation_information_roundtrip() {
    let info = ValidationInformation::new(0x123456, 41);
    info.validate_invariants().expect("valid invariants");
    let encoded = info.encode();
    let decoded = ValidationInformation::read(&mut &encoded[..]).unwrap();
    assert_eq!(info, decoded);
}

#[test]
fn test_validation_information_rejects_out_of_range_machine_id() {
    let info = ValidationInformation {
        machine_validation_id: MAX_MACHINE_VALIDATION_ID + 1,
        sequence_number: 0,
        configured: true,
    };
    assert!(matches!(
        info.validate_invariants(),
        Err(ValidationInformationError::MachineIdOutOfRange { .. })
    ));
    let encoded = info.encode();
    assert!(ValidationInformation::read(&mut &encoded[..]).is_err());
}

#[test]
fn test_sequence_wraps_after_max() {
    let info = ValidationInformation::new(1, MAX_SEQUENCE_NUMBER);
    assert_eq!(info.advanced().sequence_number, 0);
    assert_eq!(wrap_sequence(MAX_SEQUENCE_NUMBER as u64 + 5), 4);
}

#[test]
fn test_history_snapshot_roundtrip() {
    let snapshot = HistorySnapshot {
        version: SNAPSHOT_VERSION,
        next_host_sequence: 3,
        records: vec![
            ValidationHistoryRecord {
                transaction_id: TransactionId(10),
                host_sequence: 1,
                response: sample_response(1),
                acknowledged: true,
            },
            ValidationHistoryRecord {
                transaction_id: TransactionId(11),
                host_sequence: 2,
                response: sample_response(2),
                acknowledged: false,
            },
        ],
    };
    let value = Value::ValidationHistory(snapshot.clone());
    let encoded = value.encode();
    let decoded = Value::read(&mut &encoded[..]).unwrap();
    assert_eq!(decoded, Value::ValidationHistory(snapshot));
}

#[test]
fn test_redemption_snapshot_roundtrip() {
    let mut ticket = TicketInInfo::inserted("123456789012345678", TransactionId(99));
    ticket.amount = 1_000;
    ticket.transfer_code = Some(TransferCode::ValidCashableTicket);
    ticket.status = RedemptionStatus::CashableTicketRedeemed;
    let snapshot = RedemptionSnapshot {
        state: RedemptionState::AcknowledgementPending,
        current: Some(ticket),
        transaction_id: Some(TransactionId(99)),
        committed: true,
        ..Default::default()
    };
    let encoded = snapshot.encode();
    let decoded = RedemptionSnapshot::read(&mut &encoded[..]).unwrap();
    assert_eq!(snapshot, decoded);
}

#[test]
fn test_snapshot_rejects_unknown_version() {
    let snapshot = RedemptionSnapshot {
        version: SNAPSHOT_VERSION + 1,
        ..Default::default()
    };
    let encoded = snapshot.encode();
    assert!(RedemptionSnapshot::read(&mut &encoded[..]).is_err());
}

#[test]
fn test_key_ordering_is_stable() {
    let mut keys = vec![
        Key::Redemption,
        Key::ValidationInformation,
        Key::ValidationHistory,
    ];
    keys.sort();
    assert_eq!(
        keys,
        vec![
            Key::ValidationInformation,
            Key::ValidationHistory,
            Key::Redemption
        ]
    );
    for key in keys {
        let encoded = key.encode();
        assert_eq!(Key::read(&mut &encoded[..]).unwrap(), key);
    }
}

#[test]
fn test_voucher_in_transaction_starts_unclassified() {
    let tx = VoucherInTransaction::new(TransactionId(1), "0014103001314864");
    assert_eq!(tx.status, RedemptionStatus::WaitingForLongPoll71);
    assert!(!tx.committed);
    assert!(!tx.host_acknowledged);
    assert!(tx.exception.is_none());
}

proptest! {
    #[test]
    fn prop_ticket_in_codec_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..128)) {
        let _ = TicketInInfo::read(&mut &bytes[..]);
    }

    #[test]
    fn prop_wrap_sequence_stays_in_range(seq in any::<u64>()) {
        prop_assert!(wrap_sequence(seq) <= MAX_SEQUENCE_NUMBER);
    }
}
