//! Crawler module: collaborators, workers and the coordinator
//!
//! This module contains the moving parts around the frontier, including:
//! - The fetch and parse collaborator boundaries and their HTTP/HTML defaults
//! - The worker loop (lease, fetch, parse, report)
//! - Crawl coordination (epochs, seeding, shutdown)

mod coordinator;
mod fetcher;
mod parser;
mod worker;

pub use coordinator::{Collaborators, Coordinator, RunOptions, SeedReport, StopReason};
pub use fetcher::{
    build_http_client, classify_status, parse_retry_after, FetchError, FetchedContent, Fetcher,
    HttpFetcher,
};
pub use parser::{parse_html, HtmlLinkParser, ParseError, ParseOutput, ParsedPage, Parser};
pub use worker::{RobotsPrefetch, Worker, WorkerContext};

pub use crate::output::{RecordSink, SinkError};
