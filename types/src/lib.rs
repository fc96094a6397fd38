//! Ticket validation domain types.
//!
//! Defines the ticket, validation and redemption records shared by the validation engine and the
//! tools built on it, together with the protocol code tables and their binary encodings.

mod codec;
mod constants;
mod state;
mod ticket;
mod transaction;
mod validation;

pub use codec::{
    read_date, read_datetime, read_string, string_encode_size, write_date, write_datetime,
    write_string, DATETIME_ENCODE_SIZE,
};
pub use constants::*;
pub use state::*;
pub use ticket::*;
pub use transaction::*;
pub use validation::*;

#[cfg(test)]
mod tests;
