//! Concurrent chapter downloads.
//!
//! A [`DownloadEngine`] expands each chapter into [`PageTask`]s, fetches them
//! through a shared [`ConcurrencyGate`] and reassembles the results in page
//! order. Page failures are retried, then recorded on the [`PageResult`]; the
//! chapter's [`ChapterOutcome`] follows the failure-ratio rule.

mod engine;
mod gate;
mod page;
mod session;

pub use engine::{
    DEFAULT_ESCALATION_THRESHOLD, DEFAULT_GRACE_PERIOD, DEFAULT_MAX_FAILURE_RATIO,
    DEFAULT_WORKERS, DownloadEngine, DownloadOptions, DownloadStats, EngineError, MAX_WORKERS,
    MIN_WORKERS,
};
pub use gate::{ConcurrencyGate, GatePermit};
pub use page::{
    CANCELLED_REASON, ChapterDownload, ChapterOutcome, PageResult, PageTask, evaluate_outcome,
};
