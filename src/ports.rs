//! Narrow interfaces to the collaborators the research engine drives.
//!
//! Concrete implementations live in [`crate::llm`], [`crate::search`] and
//! [`crate::fetcher`]; tests substitute scripted fakes.

use async_trait::async_trait;

use crate::data_models::{SearchResultRecord, TimeRange};
use crate::errors::PortError;

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a completion for `prompt`. `stop` of `None` means no stop
    /// sequences are sent to the backend.
    async fn generate(
        &self,
        prompt: &str,
        max_tokens: usize,
        stop: Option<&[String]>,
    ) -> Result<String, PortError>;
}

#[async_trait]
pub trait WebSearch: Send + Sync {
    /// Ranked results, numbered from 1. May be empty.
    async fn search(
        &self,
        query: &str,
        time_range: TimeRange,
        max_results: usize,
    ) -> Result<Vec<SearchResultRecord>, PortError>;
}

#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Site-policy pre-check.
    async fn can_fetch(&self, url: &str) -> bool;

    /// Extracted page text, or `None` when nothing could be retrieved.
    async fn fetch(&self, url: &str) -> Option<String>;

    /// Fetch several URLs, results in input order. Implementations may fetch
    /// concurrently.
    async fn fetch_many(&self, urls: &[String]) -> Vec<(String, Option<String>)> {
        let mut out = Vec::with_capacity(urls.len());
        for url in urls {
            out.push((url.clone(), self.fetch(url).await));
        }
        out
    }
}
