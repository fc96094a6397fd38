use anyhow::Result;
use egm_types::{HandpayTransaction, HandpayType, TicketOutInfo, TicketType, VoucherOutTransaction};
use tracing::{debug, info};

use super::{PolicyBase, ValidationPolicy};
use crate::{barcode::standard_barcode, config::ValidationMode};

/// Standard barcodes computed from amount and time; no host interaction.
#[derive(Clone)]
pub struct NonePolicy {
    base: PolicyBase,
}

impl NonePolicy {
    pub fn new(base: PolicyBase) -> Self {
        Self { base }
    }
}

impl ValidationPolicy for NonePolicy {
    fn mode(&self) -> ValidationMode {
        ValidationMode::None
    }

    async fn can_validate_ticket_out(&self, amount: u64, ticket_type: TicketType) -> bool {
        self.base.check_ticket_out(amount, ticket_type).is_ok()
    }

    async fn request_ticket_out_validation(
        &self,
        amount: u64,
        ticket_type: TicketType,
    ) -> Option<TicketOutInfo> {
        if let Err(reason) = self.base.check_ticket_out(amount, ticket_type) {
            info!(amount, ?ticket_type, %reason, "ticket-out validation refused");
            return None;
        }
        let now = self.base.now();
        let barcode = standard_barcode(amount, now.time());
        match self.base.ticket_out(amount, ticket_type, now, barcode) {
            Ok(ticket) => Some(ticket),
            Err(reason) => {
                info!(amount, ?ticket_type, %reason, "ticket-out validation refused");
                None
            }
        }
    }

    async fn request_handpay_validation(
        &self,
        amount: u64,
        handpay_type: HandpayType,
    ) -> TicketOutInfo {
        let now = self.base.now();
        debug!(amount, ?handpay_type, "standard handpay validation");
        self.base
            .handpay(amount, now, standard_barcode(amount, now.time()))
    }

    async fn on_ticket_out_completed(&self, transaction: &VoucherOutTransaction) -> Result<()> {
        debug!(id = %transaction.id, "ticket-out completed");
        Ok(())
    }

    async fn on_handpay_completed(&self, transaction: &HandpayTransaction) -> Result<()> {
        debug!(id = %transaction.id, "handpay completed");
        Ok(())
    }
}
