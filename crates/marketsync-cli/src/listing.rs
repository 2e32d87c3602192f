// SPDX-License-Identifier: MIT OR Apache-2.0
//! The production [`ListingSource`] wiring: a [`Fetcher`] paginated by a
//! `page` query parameter, the cursor being the next page number.
//!
//! `marketsync-coordinator` keeps its trait deliberately decoupled from
//! `marketsync-fetch` so the pipeline can be exercised against a fixture; this
//! is the one real implementation a crawl process binds against.

use marketsync_coordinator::{CoordinatorError, ListingPage, ListingSource};
use marketsync_fetch::{Fetcher, RetryConfig};

/// Fetches listing pages from `{base_url}?page=N`, stopping at the first
/// empty response or once `page_limit` pages have been fetched.
pub struct HttpListingSource {
    fetcher: Fetcher,
    retry: RetryConfig,
    base_url: String,
    category: Option<String>,
    page_limit: Option<u32>,
}

impl HttpListingSource {
    /// Build a source that pages through `base_url`, fetching through
    /// `fetcher` and stopping after `page_limit` pages if given.
    #[must_use]
    pub fn new(fetcher: Fetcher, base_url: impl Into<String>, page_limit: Option<u32>) -> Self {
        Self {
            fetcher,
            retry: RetryConfig::default(),
            base_url: base_url.into(),
            category: None,
            page_limit,
        }
    }

    /// Restrict every listing request to `category`.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    fn decode_cursor(cursor: Option<&[u8]>) -> u32 {
        match cursor {
            Some(bytes) if bytes.len() == 4 => u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            _ => 0,
        }
    }
}

#[async_trait::async_trait]
impl ListingSource for HttpListingSource {
    async fn fetch_page(&self, cursor: Option<&[u8]>) -> Result<ListingPage, CoordinatorError> {
        let page_no = Self::decode_cursor(cursor);
        if let Some(limit) = self.page_limit {
            if page_no >= limit {
                return Ok(ListingPage::default());
            }
        }

        let mut url = format!("{}?page={}", self.base_url, page_no + 1);
        if let Some(category) = &self.category {
            url.push_str("&category=");
            url.push_str(category);
        }
        let fetched = self.fetcher.fetch(&url, &self.retry).await.map_err(|e| CoordinatorError::Source(e.to_string()))?;
        if fetched.body.trim().is_empty() {
            return Ok(ListingPage::default());
        }

        Ok(ListingPage {
            html_documents: vec![fetched.body],
            next_cursor: Some((page_no + 1).to_be_bytes().to_vec()),
        })
    }
}
