#![forbid(unsafe_code)]

//! Transaction scopes, isolation negotiation and connection ownership.

/// Isolation level negotiation.
pub mod isolation;
/// Connection handles and per-operation leases.
pub(crate) mod lease;
/// Sessions and transaction guards.
pub mod session;

pub use isolation::negotiate;
pub use session::{Lob, Session, Transaction};
