//! Ticket redemption scenarios.
//!
//! These drive the redemption coordinator the way the host and the bill validator do: insert a
//! ticket, answer long-polls 70 and 71, stack, acknowledge. Timers run on paused time, and
//! restarts start a second coordinator over the same store and ledger.

#[cfg(test)]
mod tests {
    use crate::{
        config::ValidationConfig,
        error::TransitionError,
        mocks::{mock_ports, Mocks},
        redemption::{start, Config, HostTicketData, Mailbox, Trigger},
        store::{load_redemption, Memory},
    };
    use egm_types::{
        CreditKind, HostException, RedemptionState, RedemptionStatus, TicketInInfo,
        TransactionId, TransferCode, VoucherInTransaction,
    };
    use std::{sync::Arc, time::Duration};
    use tokio::task::JoinHandle;

    const BARCODE: &str = "004000020565508532";

    struct Harness {
        mailbox: Mailbox,
        handle: JoinHandle<()>,
        store: Arc<Memory>,
        mocks: Mocks,
    }

    impl Harness {
        async fn new() -> Self {
            let (_, mocks) = mock_ports();
            Self::start(Arc::new(Memory::default()), mocks).await
        }

        async fn start(store: Arc<Memory>, mocks: Mocks) -> Self {
            let config = Config::from(&ValidationConfig::default());
            let (mailbox, handle) = start(config, mocks.ports(), store.clone())
                .await
                .expect("coordinator should start");
            Self {
                mailbox,
                handle,
                store,
                mocks,
            }
        }

        /// Simulates a power cycle: the running coordinator dies, a new one recovers.
        async fn restart(self) -> Self {
            self.handle.abort();
            let _ = self.handle.await;
            Self::start(self.store, self.mocks).await
        }

        fn insert(&self, id: u64, barcode: &str) -> JoinHandle<TicketInInfo> {
            let mailbox = self.mailbox.clone();
            let transaction = VoucherInTransaction::new(TransactionId(id), barcode);
            tokio::spawn(async move { mailbox.validation_ticket(transaction).await })
        }

        async fn state(&self) -> RedemptionState {
            self.mailbox.current_status().await.unwrap().state
        }

        async fn accept(&self, amount: u64) -> Result<TicketInInfo, TransitionError> {
            self.mailbox
                .accept_ticket(HostTicketData {
                    transfer_code: TransferCode::ValidCashableTicket,
                    amount,
                    barcode: String::new(),
                    pool_id: 0,
                })
                .await
        }

        /// Inserts a ticket and lets the host read it.
        async fn read(&self, id: u64) -> JoinHandle<TicketInInfo> {
            let request = self.insert(id, BARCODE);
            settle().await;
            let data = self.mailbox.get_ticket_data().await.unwrap();
            assert_eq!(data.transaction_id, Some(TransactionId(id)));
            request
        }

        /// Runs a ticket through to a committed credit.
        async fn redeem(&self, id: u64, amount: u64) -> TicketInInfo {
            let request = self.read(id).await;
            self.accept(amount).await.unwrap();
            let accepted = request.await.unwrap();
            assert_eq!(accepted.status, RedemptionStatus::TicketRedemptionPending);
            self.mailbox.commit_ticket().await.unwrap()
        }
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_redemption_cycle() {
        let harness = Harness::new().await;
        let request = harness.insert(1, BARCODE);
        settle().await;
        assert_eq!(
            harness.state().await,
            RedemptionState::ValidationRequestPending
        );
        assert_eq!(harness.mocks.host.raised(HostException::TicketInserted), 1);

        let data = harness.mailbox.get_ticket_data().await.unwrap();
        assert_eq!(data.barcode, BARCODE);
        assert_eq!(data.status, RedemptionStatus::WaitingForLongPoll71);
        assert_eq!(harness.state().await, RedemptionState::ValidationDataPending);
        let recorded = harness.mocks.ledger.get(TransactionId(1)).unwrap();
        assert!(!recorded.committed);

        // Re-reads while waiting for long-poll 71 return the same ticket.
        assert_eq!(harness.mailbox.get_ticket_data().await, Some(data));

        let accepted = harness.accept(2_000).await.unwrap();
        assert_eq!(accepted.status, RedemptionStatus::TicketRedemptionPending);
        let decision = request.await.unwrap();
        assert_eq!(decision.amount, 2_000);
        assert_eq!(harness.state().await, RedemptionState::RequestPending);

        let redeemed = harness.mailbox.commit_ticket().await.unwrap();
        assert_eq!(redeemed.status, RedemptionStatus::CashableTicketRedeemed);
        assert_eq!(harness.mocks.bank.balance(CreditKind::Cashable), 2_000);
        let recorded = harness.mocks.ledger.get(TransactionId(1)).unwrap();
        assert!(recorded.committed);
        assert_eq!(recorded.status, RedemptionStatus::CashableTicketRedeemed);
        assert_eq!(
            harness
                .mocks
                .host
                .raised(HostException::TicketTransferComplete),
            1
        );
        assert_eq!(
            harness.state().await,
            RedemptionState::AcknowledgementPending
        );

        harness
            .mailbox
            .redemption_status_acknowledged()
            .await
            .unwrap();
        assert_eq!(harness.state().await, RedemptionState::Idle);
        assert_eq!(harness.mocks.ledger.acknowledged(), vec![TransactionId(1)]);
        let report = harness.mailbox.current_status().await.unwrap();
        assert_eq!(report.ticket, Some(redeemed));

        let snapshot = load_redemption(harness.store.as_ref())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.state, RedemptionState::Idle);
        assert!(snapshot.commit_acknowledged);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unread_ticket_times_out() {
        let harness = Harness::new().await;
        let request = harness.insert(1, BARCODE);
        let denied = request.await.unwrap();
        assert_eq!(denied.status, RedemptionStatus::TicketRejectedDueToTimeout);
        assert_eq!(harness.state().await, RedemptionState::Idle);
        assert!(harness.mocks.ledger.get(TransactionId(1)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_ticket_timeout_is_reannounced_until_acknowledged() {
        let harness = Harness::new().await;
        let request = harness.read(1).await;
        let denied = request.await.unwrap();
        assert_eq!(denied.status, RedemptionStatus::TicketRejectedDueToTimeout);
        assert_eq!(
            harness.state().await,
            RedemptionState::AcknowledgementPending
        );
        let recorded = harness.mocks.ledger.get(TransactionId(1)).unwrap();
        assert!(recorded.committed);
        assert_eq!(recorded.status, RedemptionStatus::TicketRejectedDueToTimeout);

        let complete = |harness: &Harness| {
            harness
                .mocks
                .host
                .raised(HostException::TicketTransferComplete)
        };
        assert_eq!(complete(&harness), 1);
        tokio::time::sleep(Duration::from_millis(15_500)).await;
        settle().await;
        assert_eq!(complete(&harness), 2);

        harness
            .mailbox
            .redemption_status_acknowledged()
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(complete(&harness), 2);
        assert_eq!(harness.state().await, RedemptionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_rejection_is_reported() {
        let harness = Harness::new().await;
        let request = harness.read(1).await;
        let denied = harness
            .mailbox
            .accept_ticket(HostTicketData {
                transfer_code: TransferCode::TicketAlreadyRedeemed,
                amount: 2_000,
                barcode: BARCODE.into(),
                pool_id: 0,
            })
            .await
            .unwrap();
        assert_eq!(denied.status, RedemptionStatus::TicketRejectedByHost);
        assert_eq!(
            denied.transfer_code,
            Some(TransferCode::TicketAlreadyRedeemed)
        );
        assert_eq!(denied.amount, 0);
        assert_eq!(request.await.unwrap(), denied);
        assert_eq!(
            harness.state().await,
            RedemptionState::AcknowledgementPending
        );
        assert_eq!(harness.mocks.bank.balance(CreditKind::Cashable), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_deny_uses_transfer_code() {
        let harness = Harness::new().await;
        let request = harness.read(1).await;
        let denied = harness
            .mailbox
            .deny_ticket(None, Some(TransferCode::TicketExpired))
            .await
            .unwrap();
        assert_eq!(denied.status, RedemptionStatus::TicketRejectedByHost);
        assert_eq!(request.await.unwrap().status, denied.status);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acceptance_checks() {
        let cases = [
            (0, String::new(), RedemptionStatus::NotAValidTransferAmount),
            (
                ValidationConfig::default().max_redemption_amount + 1,
                String::new(),
                RedemptionStatus::TransferAmountExceededCreditLimit,
            ),
            (
                500,
                "999999999999999999".to_string(),
                RedemptionStatus::ValidationNumberDoesNotMatch,
            ),
        ];
        for (amount, barcode, status) in cases {
            let harness = Harness::new().await;
            let request = harness.read(1).await;
            let denied = harness
                .mailbox
                .accept_ticket(HostTicketData {
                    transfer_code: TransferCode::ValidCashableTicket,
                    amount,
                    barcode,
                    pool_id: 0,
                })
                .await
                .unwrap();
            assert_eq!(denied.status, status);
            assert_eq!(request.await.unwrap().status, status);
            assert_eq!(
                harness.state().await,
                RedemptionState::AcknowledgementPending
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_ticket_replaces_unread_ticket() {
        let harness = Harness::new().await;
        let first = harness.insert(1, BARCODE);
        settle().await;
        let second = harness.insert(2, "004000020565515228");
        settle().await;

        let replaced = first.await.unwrap();
        assert_eq!(
            replaced.status,
            RedemptionStatus::NotCompatibleWithCurrentRedemptionCycle
        );
        assert_eq!(harness.mocks.host.raised(HostException::TicketInserted), 2);

        let data = harness.mailbox.get_ticket_data().await.unwrap();
        assert_eq!(data.transaction_id, Some(TransactionId(2)));
        harness.accept(100).await.unwrap();
        assert_eq!(
            second.await.unwrap().status,
            RedemptionStatus::TicketRedemptionPending
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticket_refused_while_host_holds_another() {
        let harness = Harness::new().await;
        let _request = harness.read(1).await;
        let refused = harness.insert(2, BARCODE).await.unwrap();
        assert_eq!(
            refused.status,
            RedemptionStatus::NotCompatibleWithCurrentRedemptionCycle
        );
        assert_eq!(harness.state().await, RedemptionState::ValidationDataPending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_ticket_while_awaiting_acknowledgement() {
        let harness = Harness::new().await;
        harness.redeem(1, 1_000).await;

        let request = harness.insert(2, "004000020565515228");
        settle().await;
        assert_eq!(
            harness.state().await,
            RedemptionState::ValidationRequestPendingWithAckPending
        );

        // Reading the next ticket acknowledges the previous outcome.
        let data = harness.mailbox.get_ticket_data().await.unwrap();
        assert_eq!(data.transaction_id, Some(TransactionId(2)));
        assert_eq!(harness.mocks.ledger.acknowledged(), vec![TransactionId(1)]);
        assert_eq!(harness.state().await, RedemptionState::ValidationDataPending);

        harness.accept(500).await.unwrap();
        request.await.unwrap();
        harness.mailbox.commit_ticket().await.unwrap();
        assert_eq!(harness.mocks.bank.balance(CreditKind::Cashable), 1_500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledgement_while_next_ticket_waits() {
        let harness = Harness::new().await;
        harness.redeem(1, 1_000).await;
        let request = harness.insert(2, BARCODE);
        settle().await;

        harness
            .mailbox
            .redemption_status_acknowledged()
            .await
            .unwrap();
        assert_eq!(
            harness.state().await,
            RedemptionState::ValidationRequestPending
        );
        // The new ticket was not announced twice.
        assert_eq!(harness.mocks.host.raised(HostException::TicketInserted), 2);

        // A timeout now returns straight to idle.
        let denied = request.await.unwrap();
        assert_eq!(denied.status, RedemptionStatus::TicketRejectedDueToTimeout);
        assert_eq!(harness.state().await, RedemptionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unread_ticket_during_acknowledgement_times_out_back() {
        let harness = Harness::new().await;
        harness.redeem(1, 1_000).await;
        let request = harness.insert(2, BARCODE);
        let denied = request.await.unwrap();
        assert_eq!(denied.status, RedemptionStatus::TicketRejectedDueToTimeout);
        assert_eq!(
            harness.state().await,
            RedemptionState::AcknowledgementPending
        );
        // The previous outcome is still the one reported.
        let report = harness.mailbox.current_status().await.unwrap();
        assert_eq!(
            report.ticket.unwrap().status,
            RedemptionStatus::CashableTicketRedeemed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_offline() {
        let harness = Harness::new().await;
        let request = harness.read(1).await;
        harness.mailbox.host_offline().await;
        let denied = request.await.unwrap();
        assert_eq!(
            denied.status,
            RedemptionStatus::TicketRejectedDueToCommLinkDown
        );
        assert_eq!(
            harness.state().await,
            RedemptionState::AcknowledgementPending
        );

        // Accepted tickets still complete.
        let harness = Harness::new().await;
        let request = harness.read(1).await;
        harness.accept(300).await.unwrap();
        request.await.unwrap();
        harness.mailbox.host_offline().await;
        assert_eq!(harness.state().await, RedemptionState::RequestPending);
        let redeemed = harness.mailbox.commit_ticket().await.unwrap();
        assert!(redeemed.is_redeemed());

        // Nothing is announced while the host is away.
        let harness = Harness::new().await;
        harness.mocks.host.set_online(false);
        let denied = harness.insert(1, BARCODE).await.unwrap();
        assert_eq!(
            denied.status,
            RedemptionStatus::TicketRejectedDueToCommLinkDown
        );
        assert_eq!(harness.state().await, RedemptionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_credit_is_rolled_back() {
        let harness = Harness::new().await;
        let request = harness.read(1).await;
        harness.accept(2_000).await.unwrap();
        request.await.unwrap();

        harness.store.fail_writes(true);
        assert_eq!(
            harness.mailbox.commit_ticket().await,
            Err(TransitionError::NotPersisted {
                target: RedemptionState::AcknowledgementPending
            })
        );
        assert_eq!(harness.mocks.bank.balance(CreditKind::Cashable), 0);
        assert_eq!(harness.state().await, RedemptionState::RequestPending);
        assert_eq!(
            harness
                .mocks
                .host
                .raised(HostException::TicketTransferComplete),
            0
        );

        // The stacked ticket can still be credited once the store recovers.
        harness.store.fail_writes(false);
        let redeemed = harness.mailbox.commit_ticket().await.unwrap();
        assert_eq!(redeemed.status, RedemptionStatus::CashableTicketRedeemed);
        assert_eq!(harness.mocks.bank.balance(CreditKind::Cashable), 2_000);
        let recorded = harness.mocks.ledger.get(TransactionId(1)).unwrap();
        assert!(recorded.committed);
        assert_eq!(recorded.status, RedemptionStatus::CashableTicketRedeemed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_deposit_refuses_ticket() {
        let harness = Harness::new().await;
        let request = harness.read(1).await;
        harness.accept(2_000).await.unwrap();
        request.await.unwrap();

        harness.mocks.bank.fail_deposits(true);
        let denied = harness.mailbox.commit_ticket().await.unwrap();
        assert_eq!(
            denied.status,
            RedemptionStatus::GamingMachineUnableToAcceptTransfer
        );
        assert_eq!(harness.mocks.bank.balance(CreditKind::Cashable), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acceptance_must_be_durable() {
        let harness = Harness::new().await;
        let request = harness.read(1).await;
        harness.store.fail_writes(true);
        assert_eq!(
            harness.accept(2_000).await,
            Err(TransitionError::NotPersisted {
                target: RedemptionState::AcknowledgementPending
            })
        );
        settle().await;
        assert!(!request.is_finished());
        assert_eq!(harness.state().await, RedemptionState::ValidationDataPending);

        // The wait timer is still armed and refuses the ticket once writes succeed.
        harness.store.fail_writes(false);
        let denied = request.await.unwrap();
        assert_eq!(denied.status, RedemptionStatus::TicketRejectedDueToTimeout);
        assert_eq!(
            harness.state().await,
            RedemptionState::AcknowledgementPending
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_refusal_must_be_durable() {
        let harness = Harness::new().await;
        let request = harness.read(1).await;
        harness.store.fail_writes(true);
        harness.mocks.ledger.fail_writes(true);
        assert_eq!(
            harness
                .mailbox
                .deny_ticket(None, Some(TransferCode::TicketAlreadyRedeemed))
                .await,
            Err(TransitionError::NotPersisted {
                target: RedemptionState::AcknowledgementPending
            })
        );
        settle().await;
        assert!(!request.is_finished());
        assert_eq!(
            harness
                .mocks
                .host
                .raised(HostException::TicketTransferComplete),
            0
        );
        assert_eq!(harness.state().await, RedemptionState::ValidationDataPending);
        let snapshot = load_redemption(harness.store.as_ref())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.state, RedemptionState::ValidationDataPending);
        assert!(!snapshot.committed);

        harness.store.fail_writes(false);
        harness.mocks.ledger.fail_writes(false);
        let denied = harness
            .mailbox
            .deny_ticket(None, Some(TransferCode::TicketAlreadyRedeemed))
            .await
            .unwrap();
        assert_eq!(denied.status, RedemptionStatus::TicketRejectedByHost);
        assert_eq!(request.await.unwrap(), denied);
        assert_eq!(
            harness
                .mocks
                .host
                .raised(HostException::TicketTransferComplete),
            1
        );

        // The refusal survives a restart and is announced again.
        let harness = harness.restart().await;
        assert_eq!(
            harness.state().await,
            RedemptionState::AcknowledgementPending
        );
        let report = harness.mailbox.current_status().await.unwrap();
        assert_eq!(report.ticket, Some(denied));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrecorded_ticket_is_refused() {
        let harness = Harness::new().await;
        let request = harness.insert(1, BARCODE);
        settle().await;
        harness.mocks.ledger.fail_writes(true);
        assert!(harness.mailbox.get_ticket_data().await.is_none());

        let denied = request.await.unwrap();
        assert_eq!(
            denied.status,
            RedemptionStatus::GamingMachineUnableToAcceptTransfer
        );
        assert_eq!(harness.state().await, RedemptionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_current_status_request_does_not_transition() {
        let harness = Harness::new().await;
        let redeemed = harness.redeem(1, 700).await;
        let status = harness
            .mailbox
            .accept_ticket(HostTicketData {
                transfer_code: TransferCode::RequestForCurrentTicketStatus,
                amount: 0,
                barcode: String::new(),
                pool_id: 0,
            })
            .await
            .unwrap();
        assert_eq!(status, redeemed);
        assert_eq!(
            harness.state().await,
            RedemptionState::AcknowledgementPending
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlisted_triggers_are_rejected() {
        let harness = Harness::new().await;
        assert_eq!(
            harness.mailbox.redemption_status_acknowledged().await,
            Err(TransitionError::InvalidStateTransition {
                state: RedemptionState::Idle,
                trigger: Trigger::StatusAcknowledged,
            })
        );
        assert!(harness.mailbox.commit_ticket().await.is_err());
        assert!(harness.accept(100).await.is_err());
        assert!(harness.mailbox.get_ticket_data().await.is_none());
        assert_eq!(harness.state().await, RedemptionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_reannounces_committed_outcome() {
        let harness = Harness::new().await;
        harness.redeem(1, 2_000).await;
        let harness = harness.restart().await;

        assert_eq!(
            harness.state().await,
            RedemptionState::AcknowledgementPending
        );
        assert_eq!(
            harness
                .mocks
                .host
                .raised(HostException::TicketTransferComplete),
            2
        );
        // Credited exactly once.
        assert_eq!(harness.mocks.bank.balance(CreditKind::Cashable), 2_000);

        harness
            .mailbox
            .redemption_status_acknowledged()
            .await
            .unwrap();
        let harness = harness.restart().await;
        assert_eq!(harness.state().await, RedemptionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_refuses_uncredited_acceptance() {
        let harness = Harness::new().await;
        let request = harness.read(1).await;
        harness.accept(2_000).await.unwrap();
        request.await.unwrap();
        let harness = harness.restart().await;

        let report = harness.mailbox.current_status().await.unwrap();
        assert_eq!(report.state, RedemptionState::AcknowledgementPending);
        let ticket = report.ticket.unwrap();
        assert_eq!(
            ticket.status,
            RedemptionStatus::GamingMachineUnableToAcceptTransfer
        );
        let recorded = harness.mocks.ledger.get(TransactionId(1)).unwrap();
        assert!(recorded.committed);
        assert_eq!(harness.mocks.bank.balance(CreditKind::Cashable), 0);

        // A second restart finds the same outcome.
        let harness = harness.restart().await;
        let again = harness.mailbox.current_status().await.unwrap();
        assert_eq!(again.ticket, Some(ticket));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_abandons_undecided_ticket() {
        let harness = Harness::new().await;
        let _request = harness.read(1).await;
        let harness = harness.restart().await;
        let report = harness.mailbox.current_status().await.unwrap();
        assert_eq!(report.state, RedemptionState::Idle);
        assert!(report.ticket.is_none());
    }
}
