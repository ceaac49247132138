use anyhow::{Result, bail};
use async_trait::async_trait;
use futures::future::join_all;
use html2text::from_read;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use scraper::{Html, Selector};

use crate::config::FetcherConfig;
use crate::ports::ContentFetcher;
use crate::prompts::{collapse_whitespace, truncate_chars};
use crate::robots::RobotsPolicy;

/// Wrap width handed to html2text; lines are flattened afterwards anyway.
const RENDER_WIDTH: usize = 120;

/// Content fetch port over plain HTTP, honouring robots.txt.
pub struct PageFetcher {
    client: Client,
    robots: RobotsPolicy,
    max_chars: usize,
}

impl PageFetcher {
    pub fn new(config: &FetcherConfig) -> Result<PageFetcher> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .build()?;
        Ok(PageFetcher {
            robots: RobotsPolicy::new(client.clone(), config.user_agent.clone()),
            client,
            max_chars: config.max_chars,
        })
    }

    async fn fetch_page(&self, url: &str) -> Result<String> {
        let res = self.client.get(url).send().await?.error_for_status()?;
        let content_type = res
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_lowercase();
        let body = res.text().await?;

        let text = if content_type.contains("html") {
            extract_text(&body)?
        } else if content_type.starts_with("text/") {
            body
        } else {
            bail!("unsupported content type {content_type}");
        };

        let text = collapse_whitespace(&text);
        if text.is_empty() {
            bail!("page has no text content");
        }
        Ok(truncate_chars(&text, self.max_chars).to_string())
    }
}

/// Title plus readable body text of an HTML document. Scripts, styles and
/// markup are dropped.
pub fn extract_text(html: &str) -> Result<String> {
    let document = Html::parse_document(html);
    let title_selector = Selector::parse("title").map_err(|e| anyhow::anyhow!("{e}"))?;
    let title = document
        .select(&title_selector)
        .next()
        .map(|t| t.text().collect::<String>().trim().to_string())
        .unwrap_or_default();

    let body = from_read(html.as_bytes(), RENDER_WIDTH)?;
    let body = body.trim();
    if title.is_empty() || body.starts_with(&title) {
        Ok(body.to_string())
    } else {
        Ok(format!("{title}\n\n{body}"))
    }
}

#[async_trait]
impl ContentFetcher for PageFetcher {
    async fn can_fetch(&self, url: &str) -> bool {
        self.robots.can_fetch(url).await
    }

    async fn fetch(&self, url: &str) -> Option<String> {
        match self.fetch_page(url).await {
            Ok(text) => Some(text),
            Err(e) => {
                log::error!("error fetching page {url}, error: {:#}", e);
                None
            }
        }
    }

    async fn fetch_many(&self, urls: &[String]) -> Vec<(String, Option<String>)> {
        let pages = join_all(urls.iter().map(|url| self.fetch(url))).await;
        urls.iter().cloned().zip(pages).collect()
    }
}
