//! Configuration for runs, retries and the OpenAI-backed oracle
//!
//! Every struct here is plain data with a `Default` impl and serde support, so
//! it can be built in code or loaded from whatever config format the caller
//! prefers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default model used by [`OracleConfig`] when none is given.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Per-run limits and resilience settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    /// Maximum number of oracle turns before the run fails
    pub max_turns: usize,

    /// Timeout applied to each oracle call
    pub oracle_timeout: Option<Duration>,

    /// Timeout applied to each tool invocation
    pub tool_timeout: Option<Duration>,

    /// Timeout applied to each handoff callback
    pub handoff_callback_timeout: Option<Duration>,

    /// Retry policy for oracle calls and tool transport failures
    pub retry: Option<RetryConfig>,

    /// Capacity of the event channel used by streamed runs
    pub stream_buffer: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_turns: 10,
            oracle_timeout: None,
            tool_timeout: None,
            handoff_callback_timeout: None,
            retry: None,
            stream_buffer: 1,
        }
    }
}

impl RunConfig {
    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_oracle_timeout(mut self, timeout: Duration) -> Self {
        self.oracle_timeout = Some(timeout);
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = Some(timeout);
        self
    }

    pub fn with_handoff_callback_timeout(mut self, timeout: Duration) -> Self {
        self.handoff_callback_timeout = Some(timeout);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_stream_buffer(mut self, capacity: usize) -> Self {
        self.stream_buffer = capacity;
        self
    }
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retries
    pub max_retries: usize,

    /// Initial retry delay
    pub initial_delay: Duration,

    /// Maximum retry delay
    pub max_delay: Duration,

    /// Exponential backoff multiplier
    pub backoff_multiplier: f32,

    /// Jitter to add randomness to retries
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// A policy with `max_retries` immediate retries and no jitter.
    pub fn immediate(max_retries: usize) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }
}

/// Connection settings for [`crate::openai::OpenAIOracle`].
///
/// Credentials are passed explicitly; nothing is read from or written to
/// process-wide state except through [`OracleConfig::from_env`].
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OracleConfig {
    pub model: String,
    pub api_key: Option<String>,
    pub api_base: Option<String>,
    pub organization: Option<String>,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            api_base: None,
            organization: None,
        }
    }
}

impl OracleConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    /// Reads `OPENAI_API_KEY`, `OPENAI_BASE_URL`, `OPENAI_ORG_ID` and
    /// `OPENAI_MODEL`, falling back to defaults for anything unset.
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            model: var("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_key: var("OPENAI_API_KEY"),
            api_base: var("OPENAI_BASE_URL"),
            organization: var("OPENAI_ORG_ID"),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = Some(base.into());
        self
    }

    pub fn with_organization(mut self, org: impl Into<String>) -> Self {
        self.organization = Some(org.into());
        self
    }
}

impl fmt::Debug for OracleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OracleConfig")
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_base", &self.api_base)
            .field("organization", &self.organization)
            .finish()
    }
}
