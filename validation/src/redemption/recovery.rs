use egm_types::{
    HostException, RedemptionSnapshot, RedemptionState, RedemptionStatus, TicketInInfo,
    VoucherInTransaction,
};

/// Where a redemption resumes after a restart.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecoveryPlan {
    /// Either [RedemptionState::Idle] or [RedemptionState::AcknowledgementPending].
    pub state: RedemptionState,
    pub current: Option<TicketInInfo>,
    pub committed: bool,
    pub commit_acknowledged: bool,
    /// Exception re-announced while awaiting acknowledgement.
    pub exception: Option<HostException>,
    /// Ledger record to write before resuming.
    pub ledger_update: Option<VoucherInTransaction>,
}

impl RecoveryPlan {
    fn idle(current: Option<TicketInInfo>, committed: bool, commit_acknowledged: bool) -> Self {
        Self {
            state: RedemptionState::Idle,
            current,
            committed,
            commit_acknowledged,
            exception: None,
            ledger_update: None,
        }
    }
}

/// Decides how to resume from the persisted snapshot and the ledger record of its ticket.
///
/// Committed outcomes are re-announced until the host acknowledges them. A ticket that was
/// accepted by the host but never credited is refused locally. Anything earlier is abandoned.
/// Applying a plan and planning again from the result yields the same plan.
pub fn plan_recovery(
    snapshot: Option<&RedemptionSnapshot>,
    transaction: Option<&VoucherInTransaction>,
) -> RecoveryPlan {
    let Some(snapshot) = snapshot else {
        return RecoveryPlan::idle(None, false, false);
    };
    let current = snapshot.current.clone();
    let ledger_acknowledged = transaction.is_some_and(|tx| tx.committed && tx.host_acknowledged);
    if snapshot.commit_acknowledged || ledger_acknowledged {
        return RecoveryPlan::idle(current, true, true);
    }

    let exception = transaction
        .and_then(|tx| tx.exception)
        .unwrap_or(HostException::TicketTransferComplete);

    let committed = snapshot.committed || transaction.is_some_and(|tx| tx.committed);
    if let (true, Some(mut ticket)) = (committed, current.clone()) {
        // The ledger is written before the snapshot, so it holds the final outcome.
        if let Some(tx) = transaction.filter(|tx| tx.committed) {
            ticket.amount = tx.amount;
            ticket.status = tx.status;
            ticket.transfer_code = tx.transfer_code.or(ticket.transfer_code);
        }
        return RecoveryPlan {
            state: RedemptionState::AcknowledgementPending,
            current: Some(ticket),
            committed: true,
            commit_acknowledged: false,
            exception: Some(exception),
            ledger_update: None,
        };
    }

    if snapshot.state == RedemptionState::RequestPending {
        if let Some(mut ticket) = current {
            if let Some(id) = ticket.transaction_id {
                ticket.deny(RedemptionStatus::GamingMachineUnableToAcceptTransfer, None);
                let mut record = transaction
                    .cloned()
                    .unwrap_or_else(|| VoucherInTransaction::new(id, ticket.barcode.clone()));
                record.amount = ticket.amount;
                record.transfer_code = ticket.transfer_code;
                record.status = ticket.status;
                record.exception = Some(exception);
                record.committed = true;
                record.host_acknowledged = false;
                return RecoveryPlan {
                    state: RedemptionState::AcknowledgementPending,
                    current: Some(ticket),
                    committed: true,
                    commit_acknowledged: false,
                    exception: Some(exception),
                    ledger_update: Some(record),
                };
            }
        }
        return RecoveryPlan::idle(None, false, false);
    }

    // Announced or read but never decided: the host will see a fresh idle machine.
    if snapshot.state == RedemptionState::Idle {
        RecoveryPlan::idle(current, snapshot.committed, snapshot.commit_acknowledged)
    } else {
        RecoveryPlan::idle(None, false, false)
    }
}
