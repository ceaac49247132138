//! The self-improving search loop.
//!
//! One run repeatedly formulates a query, searches, picks pages, scrapes them
//! and asks the model whether the content answers the question. It ends with
//! exactly one [`FinalAnswer`] or with [`RunOutcome::Cancelled`]; port failures
//! are never surfaced to the caller, they only use up attempts.

use std::sync::Arc;

use nanoid::nanoid;
use serde_json::json;

use crate::config::ResearchSettings;
use crate::data_models::{
    AnswerKind, Decision, Evaluation, FinalAnswer, RunOutcome, ScrapedContent,
    SearchResultRecord, StopSignal, TimeRange,
};
use crate::events::{EventKind, EventSink, SearchEvent};
use crate::parser::{self, SELECTED_PAGE_COUNT};
use crate::ports::{ContentFetcher, TextGenerator, WebSearch};
use crate::prompts::{self, truncate_chars};

pub const ANSWER_FAILED_MESSAGE: &str = "I apologize, but I couldn't generate a satisfactory answer based on the available information.";
pub const BEST_EFFORT_FAILED_MESSAGE: &str = "I apologize, but after multiple attempts, I wasn't able to find a satisfactory answer to your question. Please try rephrasing your question or breaking it down into smaller, more specific queries.";
pub const EVALUATION_FAILED_MESSAGE: &str = "Failed to evaluate content.";

/// Why an attempt ended without a decision.
#[derive(Debug)]
enum Abort {
    Cancelled,
    Failed(String),
}

type StepResult<T> = Result<T, Abort>;

/// State of one loop iteration. Built at the top of the loop and dropped at
/// the bottom; nothing carries over to the next attempt.
#[derive(Debug, Default)]
pub struct Attempt {
    pub index: usize,
    pub query: String,
    pub time_range: TimeRange,
    pub results: Vec<SearchResultRecord>,
    pub selected_urls: Vec<String>,
    pub content: ScrapedContent,
    pub evaluation: Option<Evaluation>,
}

impl Attempt {
    fn new(index: usize) -> Self {
        Self {
            index,
            ..Self::default()
        }
    }
}

pub struct ResearchEngine {
    llm: Arc<dyn TextGenerator>,
    search: Arc<dyn WebSearch>,
    fetcher: Arc<dyn ContentFetcher>,
    sink: Arc<dyn EventSink>,
    settings: ResearchSettings,
}

impl ResearchEngine {
    pub fn new(
        llm: Arc<dyn TextGenerator>,
        search: Arc<dyn WebSearch>,
        fetcher: Arc<dyn ContentFetcher>,
        sink: Arc<dyn EventSink>,
        settings: ResearchSettings,
    ) -> Self {
        Self {
            llm,
            search,
            fetcher,
            sink,
            settings,
        }
    }

    /// Runs the loop for `user_query` until an answer is produced or `stop`
    /// is set. Each call owns its own counters, so one engine can serve
    /// several runs concurrently as long as each gets its own `StopSignal`.
    pub async fn search_and_improve(&self, user_query: &str, stop: &StopSignal) -> RunOutcome {
        let run = Run {
            engine: self,
            user_query,
            prompt_query: truncate_chars(user_query, self.settings.prompt_query_chars),
            stop,
            run_id: nanoid!(8),
        };
        run.execute().await
    }
}

struct Run<'a> {
    engine: &'a ResearchEngine,
    user_query: &'a str,
    /// `user_query` cut to the prompt length limit.
    prompt_query: &'a str,
    stop: &'a StopSignal,
    run_id: String,
}

impl Run<'_> {
    fn settings(&self) -> &ResearchSettings {
        &self.engine.settings
    }

    fn emit(&self, kind: EventKind, message: impl Into<String>, data: Option<serde_json::Value>) {
        let event = SearchEvent::new(kind, message);
        let event = match data {
            Some(data) => event.with_data(data),
            None => event,
        };
        self.engine.sink.handle_message(event);
    }

    fn info(&self, message: impl Into<String>) {
        self.emit(EventKind::Info, message, None);
    }

    fn checkpoint(&self) -> StepResult<()> {
        if self.stop.is_stopped() {
            return Err(Abort::Cancelled);
        }
        Ok(())
    }

    async fn execute(&self) -> RunOutcome {
        let max_attempts = self.settings().max_attempts;
        log::info!(
            "[{}] starting research for {:?} (max {} attempts)",
            self.run_id,
            self.user_query,
            max_attempts
        );
        self.info("Starting research process...");

        let mut used = 0;
        while used < max_attempts {
            if self.stop.is_stopped() {
                return self.cancelled();
            }
            used += 1;
            let mut attempt = Attempt::new(used);
            self.emit(
                EventKind::Info,
                format!("Search attempt {used}:"),
                Some(json!({ "attempt": used, "max_attempts": max_attempts })),
            );

            match self.run_attempt(&mut attempt).await {
                Ok(Decision::Answer) => {
                    return match self.generate_final_answer(&attempt.content).await {
                        Ok(text) => self.finish(text, AnswerKind::Primary, used),
                        Err(_) => self.cancelled(),
                    };
                }
                Ok(Decision::Refine) => {
                    self.info("Refining search...");
                }
                Err(Abort::Cancelled) => return self.cancelled(),
                Err(Abort::Failed(reason)) => {
                    log::warn!("[{}] attempt {} failed: {}", self.run_id, used, reason);
                    self.emit(EventKind::Error, reason, None);
                }
            }
            log::debug!("[{}] attempt finished: {:?}", self.run_id, attempt);
        }

        if self.stop.is_stopped() {
            return self.cancelled();
        }
        match self.synthesize_final_answer().await {
            Ok(text) => self.finish(text, AnswerKind::BestEffort, used),
            Err(_) => self.cancelled(),
        }
    }

    async fn run_attempt(&self, attempt: &mut Attempt) -> StepResult<Decision> {
        self.checkpoint()?;
        let (query, time_range) = self.formulate_query().await?;
        self.info(format!("Original query: {}", self.user_query));
        self.emit(
            EventKind::Info,
            format!("Formulated query: {query}\nTime range: {time_range}"),
            Some(json!({ "query": query, "time_range": time_range.as_str() })),
        );
        attempt.query = query;
        attempt.time_range = time_range;

        self.checkpoint()?;
        attempt.results = self
            .perform_search(&attempt.query, attempt.time_range)
            .await?;

        self.checkpoint()?;
        attempt.selected_urls = self.select_relevant_pages(&attempt.results).await?;

        self.checkpoint()?;
        attempt.content = self.scrape_content(&attempt.selected_urls).await?;

        self.checkpoint()?;
        let evaluation = self.evaluate_scraped_content(&attempt.content).await?;
        let decision = evaluation.decision.unwrap_or(Decision::Refine);
        self.emit(
            EventKind::Info,
            format!("Evaluation: {}\nDecision: {}", evaluation.text, decision),
            Some(json!({ "decision": decision.as_str() })),
        );
        attempt.evaluation = Some(evaluation);

        self.checkpoint()?;
        Ok(decision)
    }

    async fn formulate_query(&self) -> StepResult<(String, TimeRange)> {
        let settings = self.settings();
        let prompt = prompts::query_prompt(self.prompt_query);

        for retry in 1..=settings.retry.query_retries {
            self.checkpoint()?;
            let response = self
                .engine
                .llm
                .generate(&prompt, settings.query_tokens, None)
                .await;
            self.checkpoint()?;
            match response {
                Ok(text) => {
                    log::debug!("[{}] query formulation output:\n{}", self.run_id, text);
                    let (query, time_range) =
                        parser::parse_query_response(&text, settings.query_max_chars);
                    if !query.is_empty() {
                        return Ok((query, time_range));
                    }
                    log::warn!(
                        "[{}] no search query in model output (try {retry})",
                        self.run_id
                    );
                }
                Err(e) => {
                    log::warn!(
                        "[{}] query formulation failed (try {retry}): {:#}",
                        self.run_id,
                        e
                    );
                    self.emit(EventKind::Error, format!("Error generating search query: {e}"), None);
                }
            }
        }

        let query = parser::fallback_query(self.user_query, settings.fallback_query_words);
        if query.is_empty() {
            return Err(Abort::Failed(
                "Error: Empty search query. Retrying...".to_string(),
            ));
        }
        self.info(format!("Using fallback search query: {query}"));
        Ok((query, TimeRange::None))
    }

    async fn perform_search(
        &self,
        query: &str,
        time_range: TimeRange,
    ) -> StepResult<Vec<SearchResultRecord>> {
        self.info("Searching...");
        let response = self
            .engine
            .search
            .search(query, time_range, self.settings().max_results)
            .await;
        self.checkpoint()?;

        let results = response.map_err(|e| {
            log::error!("[{}] search for {:?} failed: {:#}", self.run_id, query, e);
            Abort::Failed(format!("Search error: {e}"))
        })?;
        if results.is_empty() {
            return Err(Abort::Failed(
                "No results found. Retrying with a different query...".to_string(),
            ));
        }

        self.emit(
            EventKind::Info,
            format!("Number of results: {}", results.len()),
            serde_json::to_value(&results).ok(),
        );
        Ok(results)
    }

    async fn select_relevant_pages(
        &self,
        results: &[SearchResultRecord],
    ) -> StepResult<Vec<String>> {
        let settings = self.settings();
        let prompt =
            prompts::selection_prompt(self.user_query, results, settings.snippet_preview_chars);

        for retry in 1..=settings.retry.selection_retries {
            self.checkpoint()?;
            let text = self
                .engine
                .llm
                .generate(&prompt, settings.selection_tokens, None)
                .await
                .map_err(|e| {
                    log::error!("[{}] page selection failed: {:#}", self.run_id, e);
                    Abort::Failed(format!("Error selecting pages: {e}"))
                })?;
            self.checkpoint()?;

            let selection = parser::parse_page_selection_response(&text)
                .filter(|s| parser::validate_page_selection(s, results.len()));
            let Some(selection) = selection else {
                log::warn!("[{}] invalid page selection (try {retry}):\n{}", self.run_id, text);
                self.info("Warning: Invalid page selection. Retrying.");
                continue;
            };

            let allowed = self
                .allowed_urls(parser::selected_urls(results, &selection))
                .await?;
            if !allowed.is_empty() {
                self.emit(
                    EventKind::Info,
                    format!("Selected {} pages", allowed.len()),
                    Some(json!({ "urls": allowed, "reasoning": selection.reasoning })),
                );
                return Ok(allowed);
            }
            self.info("Warning: All selected URLs are disallowed by robots.txt. Retrying selection.");
        }

        self.info("Warning: All attempts to select relevant pages failed. Falling back to top allowed results.");
        let mut fallback = Vec::with_capacity(SELECTED_PAGE_COUNT);
        for result in results {
            if fallback.len() == SELECTED_PAGE_COUNT {
                break;
            }
            self.checkpoint()?;
            if self.engine.fetcher.can_fetch(&result.url).await {
                fallback.push(result.url.clone());
            }
        }
        self.checkpoint()?;

        if fallback.is_empty() {
            return Err(Abort::Failed(
                "No relevant URLs found. Retrying...".to_string(),
            ));
        }
        self.emit(
            EventKind::Info,
            format!("Selected {} pages", fallback.len()),
            Some(json!({ "urls": fallback, "fallback": true })),
        );
        Ok(fallback)
    }

    async fn allowed_urls(&self, urls: Vec<String>) -> StepResult<Vec<String>> {
        let mut allowed = Vec::with_capacity(urls.len());
        for url in urls {
            self.checkpoint()?;
            if self.engine.fetcher.can_fetch(&url).await {
                allowed.push(url);
            } else {
                log::info!("[{}] robots.txt disallows {}", self.run_id, url);
            }
        }
        self.checkpoint()?;
        Ok(allowed)
    }

    async fn scrape_content(&self, urls: &[String]) -> StepResult<ScrapedContent> {
        let settings = self.settings();
        self.info(format!("Scraping {} pages...", urls.len()));

        let mut content = ScrapedContent::default();
        let mut to_fetch = Vec::with_capacity(urls.len());
        for url in urls {
            self.checkpoint()?;
            if self.engine.fetcher.can_fetch(url).await {
                to_fetch.push(url.clone());
            } else {
                log::warn!("[{}] robots.txt disallows scraping of {}", self.run_id, url);
                content.blocked += 1;
            }
        }

        self.checkpoint()?;
        let fetched = self.engine.fetcher.fetch_many(&to_fetch).await;
        self.checkpoint()?;

        for (url, text) in fetched {
            match text {
                Some(text) if !text.trim().is_empty() => {
                    log::info!("[{}] scraped {} ({} chars)", self.run_id, url, text.len());
                    self.info(format!("Successfully scraped: {url}"));
                    content.insert(url, text);
                }
                _ => {
                    log::warn!("[{}] no content from {}", self.run_id, url);
                    content.failed += 1;
                }
            }
        }

        self.emit(
            EventKind::Info,
            format!("Scraped content received for {} URLs", content.len()),
            Some(json!({
                "scraped": content.len(),
                "failed": content.failed,
                "blocked": content.blocked,
            })),
        );
        if content.blocked > 0 {
            self.info(format!(
                "Warning: {} URL(s) were not scraped due to robots.txt restrictions.",
                content.blocked
            ));
        }
        if content.is_empty() {
            return Err(Abort::Failed(
                "Failed to scrape content. Retrying...".to_string(),
            ));
        }

        for page in &content.pages {
            self.info(format!(
                "URL: {}\nContent: {}...",
                page.url,
                truncate_chars(&page.text, settings.content_preview_chars)
            ));
        }
        Ok(content)
    }

    /// Asks whether `content` is enough to answer. An undecided model after
    /// all retries counts as `refine`.
    async fn evaluate_scraped_content(&self, content: &ScrapedContent) -> StepResult<Evaluation> {
        let settings = self.settings();
        self.info("Thinking...");
        let prompt = prompts::evaluation_prompt(self.prompt_query, content);

        for retry in 1..=settings.retry.evaluation_retries {
            self.checkpoint()?;
            let response = self
                .engine
                .llm
                .generate(&prompt, settings.evaluation_tokens, None)
                .await;
            self.checkpoint()?;
            match response {
                Ok(text) => {
                    let evaluation = parser::parse_evaluation_response(&text);
                    if evaluation.decision.is_some() {
                        return Ok(evaluation);
                    }
                    log::warn!("[{}] no decision in evaluation (try {retry}):\n{}", self.run_id, text);
                }
                Err(e) => {
                    log::warn!("[{}] evaluation failed (try {retry}): {:#}", self.run_id, e);
                    self.emit(EventKind::Error, format!("Error evaluating content: {e}"), None);
                }
            }
        }

        // TODO: revisit whether an undecided evaluation should answer with what was scraped instead of refining.
        log::warn!("[{}] no valid decision from evaluation, defaulting to refine", self.run_id);
        Ok(Evaluation {
            text: EVALUATION_FAILED_MESSAGE.to_string(),
            decision: Some(Decision::Refine),
        })
    }

    async fn generate_final_answer(&self, content: &ScrapedContent) -> StepResult<String> {
        let settings = self.settings();
        self.info("Generating final answer...");
        let prompt = prompts::answer_prompt(self.prompt_query, content);
        self.generate_with_retries(&prompt, settings.answer_tokens, None, ANSWER_FAILED_MESSAGE)
            .await
    }

    async fn synthesize_final_answer(&self) -> StepResult<String> {
        let settings = self.settings();
        self.info("Synthesizing final answer...");
        let prompt = prompts::best_effort_prompt(self.user_query);
        self.generate_with_retries(
            &prompt,
            settings.best_effort_tokens,
            settings.best_effort_stop.as_deref(),
            BEST_EFFORT_FAILED_MESSAGE,
        )
        .await
    }

    async fn generate_with_retries(
        &self,
        prompt: &str,
        max_tokens: usize,
        stop: Option<&[String]>,
        placeholder: &str,
    ) -> StepResult<String> {
        let retries = self.settings().retry.answer_retries;
        for retry in 1..=retries {
            self.checkpoint()?;
            let response = self.engine.llm.generate(prompt, max_tokens, stop).await;
            self.checkpoint()?;
            match response {
                Ok(text) if !text.trim().is_empty() => return Ok(text.trim().to_string()),
                Ok(_) => log::warn!("[{}] empty answer (try {retry})", self.run_id),
                Err(e) => {
                    log::warn!("[{}] answer generation failed (try {retry}): {:#}", self.run_id, e);
                    self.emit(EventKind::Error, format!("Error generating answer: {e}"), None);
                }
            }
        }
        log::warn!(
            "[{}] failed to generate a response after {} attempts",
            self.run_id,
            retries
        );
        Ok(placeholder.to_string())
    }

    fn finish(&self, text: String, kind: AnswerKind, attempts: usize) -> RunOutcome {
        log::info!(
            "[{}] finished after {} attempt(s) with {} answer",
            self.run_id,
            attempts,
            kind.as_str()
        );
        self.emit(
            EventKind::Result,
            text.clone(),
            Some(json!({
                "run_id": self.run_id,
                "attempts": attempts,
                "kind": kind.as_str(),
            })),
        );
        RunOutcome::Answered(FinalAnswer {
            text,
            kind,
            attempts,
        })
    }

    fn cancelled(&self) -> RunOutcome {
        log::info!("[{}] stopped by user", self.run_id);
        self.info("Search stopped by user");
        RunOutcome::Cancelled
    }
}
