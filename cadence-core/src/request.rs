use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Unique identifier for a request
pub type RequestId = String;

/// Sampling parameters for generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingParams {
    /// Number of outputs returned for the request
    pub n: usize,
    /// Number of candidates generated; defaults to `n` when unset
    pub best_of: Option<usize>,
    pub temperature: f64,
    pub top_p: Option<f64>,
    pub top_k: Option<usize>,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
    pub use_beam_search: bool,
    /// Alternatives reported for every generated token
    pub logprobs: Option<usize>,
    /// Alternatives reported for every prompt token
    pub prompt_logprobs: Option<usize>,
    pub max_tokens: usize,
    pub seed: Option<u64>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            n: 1,
            best_of: None,
            temperature: 1.0,
            top_p: None,
            top_k: None,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            use_beam_search: false,
            logprobs: None,
            prompt_logprobs: None,
            max_tokens: 16,
            seed: None,
        }
    }
}

impl SamplingParams {
    /// Deterministic single-output decoding
    pub fn greedy() -> Self {
        Self {
            temperature: 0.0,
            ..Default::default()
        }
    }

    pub fn with_n(mut self, n: usize) -> Self {
        self.n = n;
        self
    }

    pub fn with_best_of(mut self, best_of: usize) -> Self {
        self.best_of = Some(best_of);
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_top_p(mut self, top_p: f64) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_presence_penalty(mut self, penalty: f32) -> Self {
        self.presence_penalty = penalty;
        self
    }

    pub fn with_frequency_penalty(mut self, penalty: f32) -> Self {
        self.frequency_penalty = penalty;
        self
    }

    pub fn with_beam_search(mut self) -> Self {
        self.use_beam_search = true;
        self
    }

    pub fn with_logprobs(mut self, logprobs: usize) -> Self {
        self.logprobs = Some(logprobs);
        self
    }

    pub fn with_prompt_logprobs(mut self, logprobs: usize) -> Self {
        self.prompt_logprobs = Some(logprobs);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Number of candidates the engine generates for this request
    pub fn best_of(&self) -> usize {
        self.best_of.unwrap_or(self.n)
    }

    pub fn is_greedy(&self) -> bool {
        self.temperature == 0.0
    }

    /// Check ranges and cross-field consistency.
    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = |msg: String| Err(EngineError::InvalidConfiguration(msg));

        if self.n == 0 {
            return invalid("n must be at least 1".to_string());
        }
        if self.best_of() < self.n {
            return invalid(format!(
                "best_of must be greater than or equal to n, got n={} and best_of={}",
                self.n,
                self.best_of()
            ));
        }
        if self.temperature.is_nan() || self.temperature < 0.0 {
            return invalid(format!("temperature must be non-negative, got {}", self.temperature));
        }
        if let Some(top_p) = self.top_p {
            if top_p.is_nan() || top_p <= 0.0 || top_p > 1.0 {
                return invalid(format!("top_p must be in (0, 1], got {}", top_p));
            }
        }
        if self.top_k == Some(0) {
            return invalid("top_k must be at least 1".to_string());
        }
        for (name, value) in [
            ("presence_penalty", self.presence_penalty),
            ("frequency_penalty", self.frequency_penalty),
        ] {
            if !(-2.0..=2.0).contains(&value) {
                return invalid(format!("{} must be in [-2, 2], got {}", name, value));
            }
        }
        if self.max_tokens == 0 {
            return invalid("max_tokens must be at least 1".to_string());
        }

        if self.use_beam_search {
            if self.best_of() < 2 {
                return invalid(format!(
                    "best_of must be greater than 1 when using beam search, got {}",
                    self.best_of()
                ));
            }
            if self.temperature != 0.0 {
                return invalid("temperature must be 0 when using beam search".to_string());
            }
            if self.top_k.is_some() {
                return invalid("top_k must be unset when using beam search".to_string());
            }
            if self.top_p.map_or(false, |p| p < 1.0) {
                return invalid("top_p must be 1 when using beam search".to_string());
            }
        }

        Ok(())
    }
}

/// Request for inference
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub prompt: String,
    pub params: SamplingParams,
    /// Scheduling hint for the engine; lower values are served first
    pub priority: i32,
}

impl Request {
    pub fn new(
        id: impl Into<RequestId>,
        prompt: impl Into<String>,
        params: SamplingParams,
        priority: i32,
    ) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            params,
            priority,
        }
    }
}

/// Reason for completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinishReason {
    /// End-of-sequence token produced
    Stop,
    /// `max_tokens` reached
    Length,
}

/// Log-probability of one token plus the most likely alternatives at that position
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenLogprob {
    pub token_id: u32,
    pub logprob: f32,
    /// Highest-probability tokens, most likely first
    pub top: Vec<(u32, f32)>,
}

/// One generated sequence of a request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionOutput {
    pub index: usize,
    pub text: String,
    pub token_ids: Vec<u32>,
    pub cumulative_logprob: f64,
    pub logprobs: Option<Vec<TokenLogprob>>,
    pub finish_reason: Option<FinishReason>,
}

impl CompletionOutput {
    pub fn is_finished(&self) -> bool {
        self.finish_reason.is_some()
    }
}

/// Progress of one request after an engine step
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestOutput {
    pub request_id: RequestId,
    pub prompt: String,
    pub prompt_token_ids: Vec<u32>,
    /// One entry per prompt token; the first is always `None`
    pub prompt_logprobs: Option<Vec<Option<TokenLogprob>>>,
    pub outputs: Vec<CompletionOutput>,
    /// Set exactly once per request, on its last output
    pub finished: bool,
}

impl RequestOutput {
    /// An output that carries only the identifier and terminal flag.
    pub fn new(request_id: impl Into<RequestId>, finished: bool) -> Self {
        Self {
            request_id: request_id.into(),
            prompt: String::new(),
            prompt_token_ids: Vec::new(),
            prompt_logprobs: None,
            outputs: Vec::new(),
            finished,
        }
    }
}
