use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use crate::{
    config::{ValidationConfig, ValidationMode},
    history::SharedHistory,
    policy::{ActivePolicy, NonePolicy, PolicyBase, SecureEnhancedPolicy, SystemPolicy},
    ports::Ports,
    store::Store,
};

/// Builds the policy named by the configuration.
pub struct ValidationPolicySelector;

impl ValidationPolicySelector {
    pub async fn select<S: Store>(
        config: Arc<ValidationConfig>,
        ports: Ports,
        store: Arc<S>,
        history: SharedHistory,
    ) -> Result<ActivePolicy<S>> {
        let base = PolicyBase::new(config.clone(), ports.clock.clone());
        let policy = match config.mode {
            ValidationMode::None => ActivePolicy::None(NonePolicy::new(base)),
            ValidationMode::SecureEnhanced => ActivePolicy::SecureEnhanced(
                SecureEnhancedPolicy::load(base, ports, store, history).await?,
            ),
            ValidationMode::System => {
                ActivePolicy::System(SystemPolicy::new(base, ports, store, history))
            }
        };
        info!(mode = ?config.mode, "validation policy selected");
        Ok(policy)
    }
}
