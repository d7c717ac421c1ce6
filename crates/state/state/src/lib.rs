//! State store trait abstractions for Ferry persistence.
//!
//! Jobs, media items, and credential sessions are persisted as opaque
//! JSON strings addressed by [`StateKey`]. Backends implement
//! [`StateStore`]; the conformance suite in [`testing`] defines the
//! behavior every backend must satisfy.

pub mod error;
pub mod key;
pub mod store;
pub mod testing;

pub use error::StateError;
pub use key::{KeyKind, StateKey};
pub use store::StateStore;
