//! Job lifecycle tracking.
//!
//! - [`event`]: parsing orchestrator state-change events
//! - [`job`]: the persisted per-job record
//! - [`reconciler`]: the state machine that folds events into records
//! - [`time_saved`]: the per-interruption duration ledger

pub mod event;
pub mod job;
pub mod reconciler;
pub mod time_saved;

pub use event::{JobEvent, LocatorExtractor};
pub use job::{JobRecord, JobStatus, UNKNOWN};
pub use reconciler::{apply_event, Reconciler, ResolvedInstance, Transition};
pub use time_saved::{TimeSavedEntry, TimeSavedLedger, TimeSavedTotal};
