//! Status derivation: classification, ping watchers, outage alerts and the
//! rendered chat message.

mod alert;
mod classify;
mod embed;
mod history;
mod pings;

pub use alert::*;
pub use classify::*;
pub use embed::*;
pub use history::*;
pub use pings::*;
