use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Recency window passed to the web search provider.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TimeRange {
    #[serde(rename = "d")]
    Day,
    #[serde(rename = "w")]
    Week,
    #[serde(rename = "m")]
    Month,
    #[serde(rename = "y")]
    Year,
    #[default]
    None,
}

impl TimeRange {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeRange::Day => "d",
            TimeRange::Week => "w",
            TimeRange::Month => "m",
            TimeRange::Year => "y",
            TimeRange::None => "none",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, TimeRange::None)
    }
}

impl FromStr for TimeRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "d" => Ok(TimeRange::Day),
            "w" => Ok(TimeRange::Week),
            "m" => Ok(TimeRange::Month),
            "y" => Ok(TimeRange::Year),
            "none" => Ok(TimeRange::None),
            other => Err(format!("unknown time range: {other}")),
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ranked hit returned by the web search provider.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SearchResultRecord {
    /// 1-based rank in provider order.
    pub rank: usize,
    pub title: String,
    pub snippet: String,
    pub url: String,
}

impl SearchResultRecord {
    pub fn new(rank: usize, title: String, snippet: String, url: String) -> SearchResultRecord {
        SearchResultRecord {
            rank,
            title,
            snippet,
            url,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSelection {
    pub selected_result_numbers: Vec<usize>,
    pub reasoning: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Answer,
    Refine,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Answer => "answer",
            Decision::Refine => "refine",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed sufficiency judgment. `decision` is `None` when the model did not
/// produce one of the two definitive values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub text: String,
    pub decision: Option<Decision>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ScrapedPage {
    pub url: String,
    pub text: String,
}

/// Pages fetched during one attempt, in the order they were requested.
/// URLs refused by site policy are counted in `blocked`, fetches that yielded
/// nothing in `failed`; neither has an entry in `pages`.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ScrapedContent {
    pub pages: Vec<ScrapedPage>,
    pub blocked: usize,
    pub failed: usize,
}

impl ScrapedContent {
    pub fn insert(&mut self, url: String, text: String) {
        if let Some(existing) = self.pages.iter_mut().find(|p| p.url == url) {
            existing.text = text;
        } else {
            self.pages.push(ScrapedPage { url, text });
        }
    }

    pub fn get(&self, url: &str) -> Option<&str> {
        self.pages
            .iter()
            .find(|p| p.url == url)
            .map(|p| p.text.as_str())
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnswerKind {
    /// Synthesized from content the model judged sufficient.
    Primary,
    /// Synthesized after the attempt budget ran out.
    BestEffort,
}

impl AnswerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerKind::Primary => "primary",
            AnswerKind::BestEffort => "best_effort",
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct FinalAnswer {
    pub text: String,
    pub kind: AnswerKind,
    pub attempts: usize,
}

/// Terminal state of a research run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Answered(FinalAnswer),
    Cancelled,
}

impl RunOutcome {
    pub fn answer(&self) -> Option<&FinalAnswer> {
        match self {
            RunOutcome::Answered(answer) => Some(answer),
            RunOutcome::Cancelled => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RunOutcome::Cancelled)
    }
}

/// Cooperative stop flag for a single run. Clones share the same flag, so the
/// handle given to a UI or signal handler can stop the run it was created for.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    token: CancellationToken,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once `stop` has been called.
    pub async fn stopped(&self) {
        self.token.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scraped_content_insert_replaces_same_url() {
        let mut content = ScrapedContent::default();
        content.insert("https://a.example".into(), "first".into());
        content.insert("https://b.example".into(), "other".into());
        content.insert("https://a.example".into(), "second".into());

        assert_eq!(content.len(), 2);
        assert_eq!(content.get("https://a.example"), Some("second"));
        assert_eq!(content.pages[0].url, "https://a.example");
        assert_eq!(content.get("https://missing.example"), None);
    }

    #[test]
    fn test_time_range_parsing() {
        assert_eq!(" W ".parse::<TimeRange>(), Ok(TimeRange::Week));
        assert!("decade".parse::<TimeRange>().is_err());
        assert_eq!(TimeRange::Month.to_string(), "m");
    }
}
