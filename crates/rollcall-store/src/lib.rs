//! rollcall-store — SQLite implementation of [`AttendanceStore`].
//!
//! One file, one connection, descriptor blobs encrypted at rest with
//! AES-256-GCM. The dedup and capacity checks run inside transactions
//! on the single writer connection, which is what makes the ledger's
//! check-and-insert atomic.
//!
//! [`AttendanceStore`]: rollcall_core::store::AttendanceStore

mod crypto;
mod encode;
mod error;
mod schema;
mod store;

#[cfg(test)]
mod tests;

pub use crypto::DescriptorCipher;
pub use error::{Error, Result};
pub use store::SqliteStore;
