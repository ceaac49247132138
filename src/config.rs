use dotenvy::dotenv;
use once_cell::sync::Lazy;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub static CONFIG: Lazy<Config> = Lazy::new(|| {
    dotenv().ok(); // Load .env file if present
    let llm = LlmConfig {
        backend: get_env_parsed_or_default("LLM_TYPE", LlmBackend::OpenAi),
        base_url: get_env_or_default("LLM_BASE_URL", "http://localhost:1234/v1"),
        model_name: get_env_or_default("LLM_MODEL", "local-model"),
        api_key: env::var("LLM_API_KEY").ok(),
        temperature: get_env_parsed_or_default("LLM_TEMPERATURE", 0.7),
        top_p: get_env_parsed_or_default("LLM_TOP_P", 0.9),
        max_tokens: get_env_parsed_or_default("LLM_MAX_TOKENS", 1024),
        n_ctx: get_env_parsed_or_default("LLM_N_CTX", 55_000),
        stop: get_env_or_default("LLM_STOP", "User:")
            .split('|')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect(),
        timeout: Duration::from_secs(get_env_parsed_or_default("LLM_TIMEOUT_SECS", 30)),
        max_retries: get_env_parsed_or_default("LLM_MAX_RETRIES", 3),
    };
    let research = ResearchSettings {
        max_attempts: get_env_parsed_or_default("SEARCH_MAX_ATTEMPTS", 5),
        max_results: get_env_parsed_or_default("SEARCH_MAX_RESULTS", 10),
        ..ResearchSettings::for_llm(&llm)
    };
    Config {
        llm,
        research,
        fetcher: FetcherConfig {
            user_agent: get_env_or_default("SIFT_USER_AGENT", DEFAULT_USER_AGENT),
            timeout: Duration::from_secs(get_env_parsed_or_default("FETCH_TIMEOUT_SECS", 15)),
            max_chars: get_env_parsed_or_default("FETCH_MAX_CHARS", 20_000),
        },
    }
});

pub const DEFAULT_USER_AGENT: &str = concat!("sift/", env!("CARGO_PKG_VERSION"));

pub struct Config {
    pub llm: LlmConfig,
    pub research: ResearchSettings,
    pub fetcher: FetcherConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    /// Any endpoint speaking the `/chat/completions` protocol.
    OpenAi,
    Ollama,
}

impl FromStr for LlmBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(LlmBackend::OpenAi),
            "ollama" => Ok(LlmBackend::Ollama),
            other => Err(format!("invalid LLM_TYPE: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub base_url: String,
    pub model_name: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: usize,
    pub n_ctx: usize,
    pub stop: Vec<String>,
    /// Per-call timeout.
    pub timeout: Duration,
    pub max_retries: usize,
}

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub user_agent: String,
    pub timeout: Duration,
    /// Extracted page text is cut to this many characters.
    pub max_chars: usize,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(15),
            max_chars: 20_000,
        }
    }
}

/// How many times each step re-asks the model before falling back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub query_retries: usize,
    pub selection_retries: usize,
    pub evaluation_retries: usize,
    pub answer_retries: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            query_retries: 3,
            selection_retries: 3,
            evaluation_retries: 3,
            answer_retries: 3,
        }
    }
}

impl RetryPolicy {
    /// Same retry count for every step.
    pub fn uniform(retries: usize) -> Self {
        Self {
            query_retries: retries,
            selection_retries: retries,
            evaluation_retries: retries,
            answer_retries: retries,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResearchSettings {
    pub max_attempts: usize,
    pub max_results: usize,
    pub retry: RetryPolicy,

    pub query_max_chars: usize,
    /// The user query is cut to this length when embedded in prompts.
    pub prompt_query_chars: usize,
    pub snippet_preview_chars: usize,
    pub content_preview_chars: usize,
    pub fallback_query_words: usize,

    pub query_tokens: usize,
    pub selection_tokens: usize,
    pub evaluation_tokens: usize,
    pub answer_tokens: usize,
    pub best_effort_tokens: usize,
    pub best_effort_stop: Option<Vec<String>>,
}

impl Default for ResearchSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            max_results: 10,
            retry: RetryPolicy::default(),
            query_max_chars: 100,
            prompt_query_chars: 200,
            snippet_preview_chars: 200,
            content_preview_chars: 4000,
            fallback_query_words: 5,
            query_tokens: 50,
            selection_tokens: 200,
            evaluation_tokens: 200,
            answer_tokens: 1024,
            best_effort_tokens: 1024,
            best_effort_stop: None,
        }
    }
}

impl ResearchSettings {
    /// Defaults with the best-effort budget and stop sequences taken from the
    /// generation backend's own settings.
    pub fn for_llm(llm: &LlmConfig) -> Self {
        let mut best_effort_tokens = llm.max_tokens;
        if llm.backend == LlmBackend::OpenAi && best_effort_tokens > 4096 {
            best_effort_tokens = 4096;
        }
        Self {
            best_effort_tokens,
            best_effort_stop: if llm.stop.is_empty() {
                None
            } else {
                Some(llm.stop.clone())
            },
            ..Self::default()
        }
    }
}

fn get_env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn get_env_parsed_or_default<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            log::warn!("ignoring unparseable value for {key}: {raw:?}");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn llm_config(backend: LlmBackend, max_tokens: usize, stop: Vec<String>) -> LlmConfig {
        LlmConfig {
            backend,
            base_url: "http://localhost".into(),
            model_name: "m".into(),
            api_key: None,
            temperature: 0.7,
            top_p: 0.9,
            max_tokens,
            n_ctx: 2048,
            stop,
            timeout: Duration::from_secs(1),
            max_retries: 1,
        }
    }

    #[test]
    fn test_best_effort_budget_capped_for_openai() {
        let s = ResearchSettings::for_llm(&llm_config(LlmBackend::OpenAi, 8000, vec![]));
        assert_eq!(s.best_effort_tokens, 4096);
        assert_eq!(s.best_effort_stop, None);

        let s = ResearchSettings::for_llm(&llm_config(LlmBackend::Ollama, 8000, vec![]));
        assert_eq!(s.best_effort_tokens, 8000);
    }

    #[test]
    fn test_best_effort_stop_from_llm_config() {
        let s = ResearchSettings::for_llm(&llm_config(
            LlmBackend::OpenAi,
            1024,
            vec!["User:".into()],
        ));
        assert_eq!(s.best_effort_stop, Some(vec!["User:".to_string()]));
        assert_eq!(s.answer_tokens, 1024);
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!("OpenAI".parse::<LlmBackend>(), Ok(LlmBackend::OpenAi));
        assert_eq!(" ollama ".parse::<LlmBackend>(), Ok(LlmBackend::Ollama));
        assert!("gpt".parse::<LlmBackend>().is_err());
    }
}
