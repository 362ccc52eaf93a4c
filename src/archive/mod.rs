//! Result archive for statusboard.
//!
//! Keeps a bounded in-memory history of poll results per target.

mod models;
mod store;

pub use models::*;
pub use store::*;

#[cfg(test)]
pub(crate) use models::fixtures;
