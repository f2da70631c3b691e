//! Filesystem discovery: the incremental crawler.

pub mod crawler;

pub use crawler::{CrawlReport, CrawlerConfig, IncrementalCrawler};
