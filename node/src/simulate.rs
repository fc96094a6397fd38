//! Scripted cash-out and redemption cycles against in-memory collaborators.
//!
//! The host side is played inline: it answers system validation requests, collects validation
//! records and classifies inserted tickets.

use anyhow::{Context, Result};
use egm_types::{
    CreditKind, HandpayTransaction, HandpayType, RedemptionStatus, TicketOutInfo, TicketType,
    TransactionId, TransferCode, VoucherInTransaction, VoucherOutTransaction,
    HISTORY_POLL_CURRENT,
};
use egm_validation::{
    mocks::mock_ports,
    redemption::HostTicketData,
    store::Memory,
    CashoutType, ValidationConfig, ValidationMode, ValidationService,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tokio::time::sleep;
use tracing::{debug, info};

/// Validation system id the simulated host answers with.
const SIMULATED_SYSTEM_ID: u8 = 7;

/// Largest simulated cash-out, in cents.
const MAX_AMOUNT: u64 = 50_000;

/// How often the simulated host polls.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

type Service = Arc<ValidationService<Memory>>;

#[derive(Clone, Debug)]
pub struct Scenario {
    pub cashouts: u32,
    pub handpays: u32,
    pub redemptions: u32,
    pub seed: u64,
    /// Machine validation id sent by the host when secure-enhanced validation is unconfigured.
    pub machine_validation_id: u32,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            cashouts: 5,
            handpays: 1,
            redemptions: 3,
            seed: 0,
            machine_validation_id: 1,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Report {
    pub mode: ValidationMode,
    pub tickets_printed: u32,
    pub tickets_refused: u32,
    pub handpays: u32,
    pub history_records_read: u32,
    pub tickets_redeemed: u32,
    pub tickets_rejected: u32,
    pub credits: u64,
    pub barcodes: Vec<String>,
}

/// Runs `scenario` against a fresh engine configured by `config`.
pub async fn run(config: ValidationConfig, scenario: &Scenario) -> Result<Report> {
    let (ports, mocks) = mock_ports();
    let mode = config.mode;
    let service: Service = Arc::new(
        ValidationService::start(config, ports, Arc::new(Memory::default()))
            .await
            .context("failed to start validation service")?,
    );
    if let Some(info) = service.validation_information().await {
        if !info.configured {
            service
                .set_validation_id(scenario.machine_validation_id, 0)
                .await?;
        }
    }

    let mut rng = StdRng::seed_from_u64(scenario.seed);
    let mut report = Report {
        mode,
        ..Report::default()
    };
    let mut next_id = 0u64;
    let mut next_number = 0u64;

    for _ in 0..scenario.cashouts {
        let amount = rng.gen_range(1..=MAX_AMOUNT);
        let cashout = CashoutType::Ticket(TicketType::CashOut);
        let Some(ticket) = validate(&service, amount, cashout, &mut next_number).await else {
            report.tickets_refused += 1;
            continue;
        };
        next_id += 1;
        service
            .on_ticket_out_completed(&VoucherOutTransaction {
                id: TransactionId(next_id),
                amount: ticket.amount,
                barcode: ticket.barcode.clone(),
                ticket_type: ticket.ticket_type,
                issued_at: ticket.issued_at,
                expiration_days: ticket.expiration_days,
                pool_id: ticket.pool_id,
            })
            .await?;
        report.tickets_printed += 1;
        report.history_records_read += collect(&service).await;
        report.barcodes.push(ticket.barcode);
    }

    for _ in 0..scenario.handpays {
        let amount = rng.gen_range(1..=MAX_AMOUNT);
        let cashout = CashoutType::Handpay(HandpayType::GameWin);
        let Some(receipt) = validate(&service, amount, cashout, &mut next_number).await else {
            continue;
        };
        next_id += 1;
        service
            .on_handpay_completed(&HandpayTransaction {
                id: TransactionId(next_id),
                amount: receipt.amount,
                handpay_type: HandpayType::GameWin,
                barcode: receipt.barcode.clone(),
                issued_at: receipt.issued_at,
            })
            .await?;
        report.handpays += 1;
        report.history_records_read += collect(&service).await;
    }

    for round in 0..scenario.redemptions {
        let barcode = match report.barcodes.len() {
            0 => format!("{:018}", round),
            len => report.barcodes[round as usize % len].clone(),
        };
        let amount = rng.gen_range(1..=MAX_AMOUNT);
        let transfer_code = if rng.gen_bool(0.2) {
            TransferCode::TicketAlreadyRedeemed
        } else {
            TransferCode::ValidCashableTicket
        };
        next_id += 1;
        match redeem(&service, TransactionId(next_id), barcode, amount, transfer_code).await? {
            Some(credited) => {
                report.tickets_redeemed += 1;
                report.credits += credited;
            }
            None => report.tickets_rejected += 1,
        }
    }

    debug!(
        exceptions = mocks.host.exceptions().len(),
        balance = mocks.bank.balance(CreditKind::Cashable),
        "simulation finished"
    );
    info!(
        ?mode,
        printed = report.tickets_printed,
        redeemed = report.tickets_redeemed,
        "simulation complete"
    );
    if let Ok(service) = Arc::try_unwrap(service) {
        service.shutdown();
    }
    Ok(report)
}

/// Requests a validation, answering as the host when the number is host-assigned.
async fn validate(
    service: &Service,
    amount: u64,
    cashout: CashoutType,
    next_number: &mut u64,
) -> Option<TicketOutInfo> {
    let request = tokio::spawn({
        let service = service.clone();
        async move {
            match cashout {
                CashoutType::Ticket(ticket_type) => {
                    service
                        .request_ticket_out_validation(amount, ticket_type)
                        .await
                }
                CashoutType::Handpay(handpay_type) => Some(
                    service
                        .request_handpay_validation(amount, handpay_type)
                        .await,
                ),
            }
        }
    });

    if service.mode() == ValidationMode::System {
        while !request.is_finished() {
            if let Some(data) = service.get_pending_validation_data().await {
                *next_number += 1;
                debug!(
                    amount = data.amount,
                    number = *next_number,
                    "host assigning validation number"
                );
                service
                    .set_host_validation_result(SIMULATED_SYSTEM_ID, *next_number)
                    .await;
                break;
            }
            sleep(POLL_INTERVAL).await;
        }
    }
    request.await.ok().flatten()
}

/// Host reads (and acknowledges) the current validation record.
async fn collect(service: &Service) -> u32 {
    let response = service.get_response_from_info(HISTORY_POLL_CURRENT).await;
    u32::from(response.record().is_some())
}

/// Inserts a ticket and plays the host through long-polls 70 and 71. Returns the credited amount.
async fn redeem(
    service: &Service,
    id: TransactionId,
    barcode: String,
    amount: u64,
    transfer_code: TransferCode,
) -> Result<Option<u64>> {
    let redemption = service.redemption().clone();
    let request = tokio::spawn({
        let redemption = redemption.clone();
        let transaction = VoucherInTransaction::new(id, barcode);
        async move { redemption.validation_ticket(transaction).await }
    });

    let data = loop {
        let status = redemption
            .current_status()
            .await
            .context("redemption coordinator stopped")?;
        if status.state.is_awaiting_data_request() {
            if let Some(data) = redemption.get_ticket_data().await {
                break Some(data);
            }
        }
        if request.is_finished() {
            break None;
        }
        sleep(POLL_INTERVAL).await;
    };
    let Some(data) = data else {
        let refused = request.await?;
        debug!(%id, status = ?refused.status, "ticket refused before the host read it");
        return Ok(None);
    };

    redemption
        .accept_ticket(HostTicketData {
            transfer_code,
            amount,
            barcode: data.barcode,
            pool_id: 0,
        })
        .await?;
    let decision = request.await?;
    let credited = if decision.status == RedemptionStatus::TicketRedemptionPending {
        let ticket = redemption.commit_ticket().await?;
        ticket.is_redeemed().then_some(ticket.amount)
    } else {
        None
    };
    redemption.redemption_status_acknowledged().await?;
    Ok(credited)
}
