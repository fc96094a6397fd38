//! Ticket redemption (ticket-in).
//!
//! A single actor task owns the redemption state machine; every host poll, device event and
//! timer expiry reaches it as a [Mailbox] message and is handled to completion before the next.

use anyhow::Result;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;

use crate::{config::ValidationConfig, ports::Ports, store::Store};

mod actor;
pub use actor::Actor;
mod ingress;
pub use ingress::{HostTicketData, Mailbox, RedemptionReport};
mod machine;
pub use machine::{next_transition, Transition, Trigger};
mod recovery;
pub use recovery::{plan_recovery, RecoveryPlan};

/// Configuration for the redemption coordinator.
#[derive(Clone, Debug)]
pub struct Config {
    /// How long the host has to progress an announced or read ticket.
    pub redemption_timeout: Duration,

    /// Period of the final-status re-announcement while awaiting acknowledgement.
    pub acknowledgement_retry: Duration,

    /// Largest amount credited from a single ticket.
    pub max_redemption_amount: u64,

    /// Number of messages to hold before callers block.
    pub mailbox_size: usize,
}

impl From<&ValidationConfig> for Config {
    fn from(config: &ValidationConfig) -> Self {
        Self {
            redemption_timeout: config.redemption_timeout(),
            acknowledgement_retry: config.acknowledgement_retry(),
            max_redemption_amount: config.max_redemption_amount,
            mailbox_size: 64,
        }
    }
}

/// Recovers the persisted redemption and spawns the coordinator.
pub async fn start<S: Store>(
    config: Config,
    ports: Ports,
    store: Arc<S>,
) -> Result<(Mailbox, JoinHandle<()>)> {
    let (actor, mailbox) = Actor::new(config, ports, store);
    let handle = actor.start().await?;
    Ok((mailbox, handle))
}
