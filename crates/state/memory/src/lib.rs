//! In-memory state store backend for Ferry.
//!
//! The reference [`StateStore`](ferry_state::StateStore) implementation:
//! a [`dashmap::DashMap`] with lazy TTL eviction. Suitable for tests and
//! single-process deployments.

mod store;

pub use store::MemoryStateStore;
