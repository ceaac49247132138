use async_trait::async_trait;
use reqwest::{Client, Url};
use scraper::{ElementRef, Html, Selector};

use crate::data_models::{SearchResultRecord, TimeRange};
use crate::errors::PortError;
use crate::ports::WebSearch;

const DUCKDUCKGO_HTML_ENDPOINT: &str = "https://html.duckduckgo.com/html/";

/// Web search port backed by DuckDuckGo's HTML endpoint.
pub struct DuckDuckGoSearch {
    client: Client,
    endpoint: String,
}

impl DuckDuckGoSearch {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            endpoint: DUCKDUCKGO_HTML_ENDPOINT.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl WebSearch for DuckDuckGoSearch {
    async fn search(
        &self,
        query: &str,
        time_range: TimeRange,
        max_results: usize,
    ) -> Result<Vec<SearchResultRecord>, PortError> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let mut params = vec![("q", query)];
        if !time_range.is_none() {
            params.push(("df", time_range.as_str()));
        }

        let response = self
            .client
            .get(&self.endpoint)
            .query(&params)
            .header("Accept", "text/html,application/xhtml+xml")
            .header("Accept-Language", "en-US,en;q=0.5")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PortError::status(status.as_u16(), body));
        }
        let html = response.text().await?;

        let results = parse_results(&html, max_results)?;
        log::info!(
            "duckduckgo returned {} results for {:?} (time range {})",
            results.len(),
            query,
            time_range
        );
        Ok(results)
    }
}

fn selector(css: &str) -> Result<Selector, PortError> {
    Selector::parse(css).map_err(|e| PortError::Parse(format!("bad selector {css}: {e}")))
}

/// Extracts ranked results from a DuckDuckGo HTML results page. Ads and
/// entries without a usable link are skipped; duplicates keep their first
/// position.
pub fn parse_results(html: &str, max_results: usize) -> Result<Vec<SearchResultRecord>, PortError> {
    let document = Html::parse_document(html);
    let result_selector = selector("div.result")?;
    let title_selector = selector("a.result__a")?;
    let snippet_selector = selector(".result__snippet")?;

    let mut results: Vec<SearchResultRecord> = Vec::new();
    for element in document.select(&result_selector) {
        if results.len() == max_results {
            break;
        }
        if element.value().classes().any(|c| c == "result--ad") {
            continue;
        }
        let Some(link) = element.select(&title_selector).next() else {
            continue;
        };
        let Some(url) = link.value().attr("href").and_then(resolve_href) else {
            continue;
        };
        if results.iter().any(|r| r.url == url) {
            continue;
        }

        let title = element_text(&link);
        let snippet = element
            .select(&snippet_selector)
            .next()
            .map(|s| element_text(&s))
            .unwrap_or_default();
        results.push(SearchResultRecord::new(results.len() + 1, title, snippet, url));
    }
    Ok(results)
}

fn element_text(element: &ElementRef) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Result links point at a DuckDuckGo redirect carrying the target in the
/// `uddg` parameter.
fn resolve_href(href: &str) -> Option<String> {
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else {
        href.to_string()
    };
    let url = Url::parse(&absolute).ok()?;

    let is_redirect = url
        .host_str()
        .is_some_and(|h| h.ends_with("duckduckgo.com"))
        && url.path().starts_with("/l/");
    let target = if is_redirect {
        let (_, target) = url.query_pairs().find(|(k, _)| k == "uddg")?;
        Url::parse(&target).ok()?
    } else {
        url
    };

    match target.scheme() {
        "http" | "https" => Some(target.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESULTS_PAGE: &str = r##"
<html><body>
<div class="result results_links result--ad">
  <h2 class="result__title"><a class="result__a" href="https://ads.example/buy">Buy now</a></h2>
  <a class="result__snippet">Sponsored</a>
</div>
<div class="result results_links results_links_deep web-result">
  <h2 class="result__title">
    <a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fmars.nasa.gov%2Fmars2020%2F&amp;rut=abc">Mars 2020
      Perseverance Rover</a>
  </h2>
  <a class="result__snippet" href="#">The <b>rover</b> is searching for signs of ancient life.</a>
</div>
<div class="result results_links web-result">
  <h2 class="result__title"><a class="result__a" href="https://en.wikipedia.org/wiki/Curiosity_(rover)">Curiosity (rover)</a></h2>
</div>
<div class="result results_links web-result">
  <h2 class="result__title"><a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fmars.nasa.gov%2Fmars2020%2F">Duplicate</a></h2>
</div>
<div class="result results_links web-result">
  <h2 class="result__title"><a class="result__a" href="https://www.esa.int/mars">ESA Mars</a></h2>
  <a class="result__snippet">Europe's missions to Mars.</a>
</div>
</body></html>
"##;

    #[test]
    fn test_parse_results_ranks_and_cleans() {
        let results = parse_results(RESULTS_PAGE, 10).unwrap();
        assert_eq!(results.len(), 3);

        assert_eq!(results[0].rank, 1);
        assert_eq!(results[0].title, "Mars 2020 Perseverance Rover");
        assert_eq!(results[0].url, "https://mars.nasa.gov/mars2020/");
        assert_eq!(
            results[0].snippet,
            "The rover is searching for signs of ancient life."
        );

        assert_eq!(results[1].rank, 2);
        assert_eq!(results[1].url, "https://en.wikipedia.org/wiki/Curiosity_(rover)");
        assert_eq!(results[1].snippet, "");

        assert_eq!(results[2].rank, 3);
        assert_eq!(results[2].title, "ESA Mars");
    }

    #[test]
    fn test_parse_results_respects_max() {
        let results = parse_results(RESULTS_PAGE, 1).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].url, "https://mars.nasa.gov/mars2020/");
    }

    #[test]
    fn test_parse_results_empty_page() {
        assert!(parse_results("<html><body>No results.</body></html>", 10)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_resolve_href() {
        assert_eq!(
            resolve_href("//duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com%2Fa%3Fb%3D1&rut=x"),
            Some("https://example.com/a?b=1".to_string())
        );
        assert_eq!(
            resolve_href("https://example.com/"),
            Some("https://example.com/".to_string())
        );
        assert_eq!(resolve_href("/relative"), None);
        assert_eq!(resolve_href("javascript:void(0)"), None);
    }
}
