//! Output module for records and metrics
//!
//! This module handles:
//! - Writing scraped records through a `RecordSink` (JSON lines by default)
//! - Frontier metrics and their console rendering

mod jsonl;
pub mod stats;
mod traits;

pub use jsonl::JsonLinesSink;
pub use stats::{print_metrics, DomainMetrics, FrontierMetrics, MetricsTotals};
pub use traits::{CrawlRecord, RecordSink, SinkError, SinkResult};
