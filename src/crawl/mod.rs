pub mod detail;
pub mod listing;
pub mod runner;

pub use detail::{extract_job, trim_html, CollectOptions, ExtractionSettings, JobDetailCollector};
pub use listing::{scan_listing, ScanOptions, ScanOutcome};
pub use runner::{run_pipeline, CrawlPlan, CrawlRunner};
