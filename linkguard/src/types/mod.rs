//! Small value types shared across the supervisor.

mod backoff;
mod mac_addr;

pub use backoff::Backoff;
pub use mac_addr::{MacAddr, ParseMacError};
