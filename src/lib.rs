//! Yomi Core Library
//!
//! This library archives serialized web content (manga chapters) into portable,
//! metadata-rich container files.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`registry`] - Remote site-definition feed, local cache, slug/URL resolution
//! - [`transport`] - Lightweight and browser-simulating fetch strategies
//! - [`catalog`] - Chapter enumeration, page-list extraction and range filtering
//! - [`download`] - Bounded concurrent page fetching with retry and escalation
//! - [`metadata`] - Best-effort series metadata enrichment
//! - [`assemble`] - Folder, PDF and CBZ container writers
//! - [`pipeline`] - End-to-end run wiring and the per-chapter run summary

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod assemble;
pub mod catalog;
pub mod download;
pub mod metadata;
pub mod pipeline;
pub mod registry;
pub mod transport;
mod user_agent;

// Re-export commonly used types
pub use assemble::{AssembleError, Assembler, OutputFormat, OutputJob};
pub use catalog::{CatalogError, ChapterDescriptor, ChapterEnumerator, ChapterRange, PageSource};
pub use download::{
    ChapterDownload, ChapterOutcome, ConcurrencyGate, DEFAULT_WORKERS, DownloadEngine,
    DownloadOptions, DownloadStats, EngineError, MAX_WORKERS, MIN_WORKERS, PageResult, PageTask,
};
pub use metadata::{
    AniListProvider, CompletionStatus, MetadataEnricher, MetadataProvider, SeriesMetadata,
};
pub use pipeline::{
    ChapterReport, ChapterStatus, DownloadRequest, NoopObserver, Pipeline, PipelineConfig,
    PipelineError, RunObserver, RunStats, RunSummary,
};
pub use registry::{
    FeedLoader, RegistryError, SeriesTarget, SiteDefinition, SiteFeed, SiteRegistry,
    TransportKind,
};
pub use transport::{
    FailureType, FetchError, RetryDecision, RetryPolicy, Transport, TransportOptions,
    classify_error,
};
