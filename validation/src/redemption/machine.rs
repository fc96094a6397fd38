//! Transition table of the ticket redemption state machine.
//!
//! The table is pure: it names the target state for every accepted `(state, trigger)` pair and
//! rejects everything else. Entry actions (persistence, host exceptions, timers) live in the
//! actor.

use egm_types::RedemptionState;
use serde::{Deserialize, Serialize};

use crate::error::TransitionError;

/// Events that drive a redemption.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Trigger {
    /// A ticket was inserted and needs validation.
    TicketInserted,
    /// The host asked for the inserted ticket's data (long-poll 70).
    ValidationDataRequested,
    /// The host classified the ticket as redeemable (long-poll 71).
    HostAccepted,
    /// The host or the machine refused the ticket.
    HostRejected,
    /// The host did not progress the redemption in time.
    ValidationTimedOut,
    /// Credits were deposited and the outcome recorded.
    CommitCompleted,
    /// The host acknowledged the final status.
    StatusAcknowledged,
    /// The host link went down.
    HostOffline,
}

/// Outcome of a trigger that the current state accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// Move to (or re-enter) a state, running its entry actions.
    Enter(RedemptionState),
    /// Handle in place; no entry actions.
    Internal,
}

/// Looks up `(state, trigger)` in the transition table.
pub fn next_transition(
    state: RedemptionState,
    trigger: Trigger,
) -> Result<Transition, TransitionError> {
    use RedemptionState::*;
    use Transition::*;
    use Trigger::*;

    let transition = match (state, trigger) {
        (Idle, TicketInserted) => Enter(ValidationRequestPending),
        (Idle, HostOffline) => Internal,

        (ValidationRequestPending, TicketInserted) => Enter(ValidationRequestPending),
        (ValidationRequestPending, ValidationDataRequested) => Enter(ValidationDataPending),
        (ValidationRequestPending, HostRejected | ValidationTimedOut | HostOffline) => Enter(Idle),

        (ValidationRequestPendingWithAckPending, TicketInserted) => {
            Enter(ValidationRequestPendingWithAckPending)
        }
        (ValidationRequestPendingWithAckPending, ValidationDataRequested) => {
            Enter(ValidationDataPending)
        }
        (
            ValidationRequestPendingWithAckPending,
            HostRejected | ValidationTimedOut | HostOffline,
        ) => Enter(AcknowledgementPending),
        (ValidationRequestPendingWithAckPending, StatusAcknowledged) => {
            Enter(ValidationRequestPending)
        }

        (ValidationDataPending, ValidationDataRequested) => Internal,
        (ValidationDataPending, HostAccepted) => Enter(RequestPending),
        (ValidationDataPending, HostRejected | ValidationTimedOut | HostOffline) => {
            Enter(AcknowledgementPending)
        }

        (RequestPending, ValidationDataRequested | HostOffline) => Internal,
        (RequestPending, CommitCompleted | HostRejected) => Enter(AcknowledgementPending),

        (AcknowledgementPending, StatusAcknowledged) => Enter(Idle),
        (AcknowledgementPending, TicketInserted) => Enter(ValidationRequestPendingWithAckPending),
        (AcknowledgementPending, HostOffline) => Internal,

        (state, trigger) => {
            return Err(TransitionError::InvalidStateTransition { state, trigger });
        }
    };
    Ok(transition)
}
