//! Turnstile Bridge Library
//!
//! Connects a gym-management database to ISAPI access-control terminals.
//!
//! ## Architecture
//!
//! 1. DigestAuthClient - one RFC 2617 authenticated exchange
//! 2. DeviceGateway - ISAPI operations with dialect fallback
//! 3. EventNormalizer - XML/JSON/push payloads to canonical events
//! 4. AttendanceIngester - exactly-once attendance rows, member access times
//! 5. LifecycleReconciler - idle members to inactive
//! 6. PollingOrchestrator - concurrent per-device event polling
//! 7. WebAPI - REST endpoints and push intake
//!
//! Flow: gateway -> raw payload -> normalizer -> ingester -> storage.
//! The reconciler runs independently over storage.

pub mod attendance;
pub mod device_gateway;
pub mod device_registry;
pub mod device_status_tracker;
pub mod digest_auth;
pub mod direction_table;
pub mod error;
pub mod event_normalizer;
pub mod lifecycle_reconciler;
pub mod polling_orchestrator;
pub mod state;
pub mod web_api;

pub use error::{Error, Result};
pub use state::AppState;
