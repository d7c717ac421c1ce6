//! Capability traits the Ferry core depends on.
//!
//! Concrete transports (a real content source, a real messaging
//! destination) implement these traits outside the core; new sources or
//! destinations slot in without touching the orchestrator. Each trait
//! comes in two forms: a strongly-typed native-async version and an
//! object-safe `Dyn*` twin provided by a blanket implementation.

pub mod deliver;
pub mod error;
pub mod fetch;
pub mod media;
pub mod validate;

pub use deliver::{Deliverer, DynDeliverer};
pub use error::ProviderError;
pub use fetch::{DynFetcher, Fetcher};
pub use media::{DeliveryReceipt, RemoteMedia, Validation};
pub use validate::{CredentialValidator, DynCredentialValidator};
