//! Reference collaborator implementations.

mod http;

pub use http::{HttpCrawler, HttpScraper};
