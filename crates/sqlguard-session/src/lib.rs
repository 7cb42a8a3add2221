//! Database handles and transactions for sqlguard.
//!
//! A [`Database`] wraps a [`Driver`](sqlguard_core::Driver) and sends every statement
//! through the same path: apply the default timeout if the caller gave no deadline,
//! call the hooks, dispatch, classify the error, call the hooks again.
//!
//! # Transactions
//!
//! - [`Database::run_in_transaction`] commits when the body returns `Ok`, rolls back
//!   when it returns `Err` or panics, and lets the panic continue afterwards.
//! - [`Transaction`] is also a guard: dropping it while active rolls it back.
//! - [`Executor`] is implemented by both, so query helpers can take `&impl Executor`.
//!
//! # Example
//!
//! ```ignore
//! let db = Database::open(&registry, DatabaseConfig::new("sqlite", "app.db"))?;
//! let ctx = Context::background().with_timeout(Duration::from_secs(2));
//!
//! db.run_in_transaction(&ctx, &TxOptions::default(), |tx| {
//!     tx.execute(&ctx, "INSERT INTO users (email) VALUES (?)", &[email.into()])?;
//!     Ok(())
//! })?;
//! ```

mod database;
mod executor;
mod statement;
mod transaction;

#[cfg(test)]
mod testing;

pub use database::{Database, OPEN_PING_TIMEOUT};
pub use executor::{Executor, OneRow, is_not_found};
pub use statement::Statement;
pub use transaction::Transaction;
