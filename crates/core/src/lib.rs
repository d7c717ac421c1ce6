//! Core types and shared abstractions for the Ferry media relay.
//!
//! Ferry turns a single submitted content reference into a tracked
//! multi-file job: the reference expands into an ordered list of media
//! items, each independently fetched from the upstream source and
//! delivered to a messaging destination. This crate holds the domain
//! model — jobs, items, credential sessions — and the pure aggregate
//! fold that derives a job's status from its item states.

pub mod item;
pub mod job;
pub mod report;
pub mod session;
pub mod types;

pub use item::{DeliveryState, FetchState, MediaItem, MediaKind};
pub use job::{Job, JobRequest, JobStatus, fold_status};
pub use report::{ItemReport, JobReport};
pub use session::{Session, SessionSource, SessionState, SessionSummary};
pub use types::{DeliveryId, ItemId, JobId, OwnerScope, SessionId};
