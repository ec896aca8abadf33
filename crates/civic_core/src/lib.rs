pub mod active_orgs;
pub mod config;
pub mod db;
pub mod error;
pub mod meeting;
pub mod orchestrator;
pub mod reconcile;
pub mod report;
pub mod schema;
pub mod source;
pub mod store;
pub mod taxonomy;
pub mod trigger;

pub use error::{StoreError, TriggerError};
pub use orchestrator::{Orchestrator, SourceEntry};
pub use report::{RunReport, RunStatus};
pub use schema::{ActiveOrgsDocument, MeetingRecord, ScraperRun, SourceDocument};
