//! feedpulse
//!
//! Polls a link-aggregation forum API and a microblog search API on a
//! fixed interval, normalizes both feeds into one item shape, and
//! upserts them into a local SQLite store keyed by a globally unique
//! item ID. The query/presentation layer consumes the bounded read
//! queries on [`store::Store`] and the synchronous refresh trigger on
//! [`scheduler::PollScheduler`].

pub mod config;
pub mod coordinator;
pub mod error;
pub mod http_client;
pub mod scheduler;
pub mod schemas;
pub mod sources;
pub mod store;

pub use config::Config;
pub use coordinator::{Coordinator, CycleReport, SourceReport};
pub use error::{PollError, Result};
pub use scheduler::{PollScheduler, RefreshSummary};
pub use schemas::{Item, RawItem, Source};
pub use store::{SourceCount, Store};
