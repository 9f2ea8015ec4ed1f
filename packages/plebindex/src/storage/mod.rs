//! Durable storage backends.

mod postgres;

pub use postgres::PostgresIndexStore;
