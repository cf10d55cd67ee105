//! Attendance - ledger storage and ingestion
//!
//! ## Responsibilities
//!
//! - `AttendanceStore` contract with MySQL and in-memory implementations
//! - `AttendanceIngester`: canonical events to attendance rows, exactly once
//!
//! The ledger is append-only; rows are removed only by explicit purge.

mod ingester;
mod memory;
mod repository;
mod store;
mod types;

pub use ingester::{idempotency_key, record_timestamp, AttendanceIngester};
pub use memory::MemoryAttendanceStore;
pub use repository::MySqlAttendanceStore;
pub use store::AttendanceStore;
pub use types::*;
