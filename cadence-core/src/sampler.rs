//! Sampler module - token selection, penalties and log-probabilities

use std::collections::HashMap;

use anyhow::Result;
use candle_core::{Tensor, D};
use candle_transformers::generation::{LogitsProcessor, Sampling};

use crate::request::{SamplingParams, TokenLogprob};

/// Create a logits processor for sampling
pub fn create_logits_processor(
    seed: u64,
    temperature: f64,
    top_p: Option<f64>,
    top_k: Option<usize>,
) -> LogitsProcessor {
    let sampling = if temperature <= 0. {
        Sampling::ArgMax
    } else {
        match (top_k, top_p) {
            (None, None) => Sampling::All { temperature },
            (Some(k), None) => Sampling::TopK { k, temperature },
            (None, Some(p)) => Sampling::TopP { p, temperature },
            (Some(k), Some(p)) => Sampling::TopKThenTopP { k, p, temperature },
        }
    };
    LogitsProcessor::from_sampling(seed, sampling)
}

/// Token sampler for one candidate sequence
pub struct Sampler {
    processor: LogitsProcessor,
}

impl Sampler {
    pub fn new(seed: u64, params: &SamplingParams) -> Self {
        Self {
            processor: create_logits_processor(seed, params.temperature, params.top_p, params.top_k),
        }
    }

    /// Sample a token from 1-D logits
    pub fn sample(&mut self, logits: &Tensor) -> Result<u32> {
        Ok(self.processor.sample(logits)?)
    }
}

/// Apply presence and frequency penalties for tokens already generated.
///
/// Each distinct token loses `presence` once plus `frequency` per occurrence.
pub fn apply_penalties(logits: &mut [f32], generated: &[u32], presence: f32, frequency: f32) {
    if presence == 0.0 && frequency == 0.0 {
        return;
    }
    let mut counts: HashMap<u32, usize> = HashMap::new();
    for &token in generated {
        *counts.entry(token).or_insert(0) += 1;
    }
    for (token, count) in counts {
        if let Some(logit) = logits.get_mut(token as usize) {
            *logit -= presence + frequency * count as f32;
        }
    }
}

/// Log-softmax over the vocabulary
pub fn log_probs(logits: &Tensor) -> Result<Vec<f32>> {
    let log_probs = candle_nn::ops::log_softmax(logits, D::Minus1)?;
    Ok(log_probs.to_vec1::<f32>()?)
}

/// The `k` most likely tokens, best first (ties broken by lower id)
pub fn top_logprobs(log_probs: &[f32], k: usize) -> Vec<(u32, f32)> {
    let mut indexed: Vec<(u32, f32)> = log_probs
        .iter()
        .copied()
        .enumerate()
        .map(|(i, lp)| (i as u32, lp))
        .collect();
    indexed.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    indexed.truncate(k);
    indexed
}

/// Log-probability record for `token_id` with its top `k` alternatives
pub fn token_logprob(log_probs: &[f32], token_id: u32, k: usize) -> TokenLogprob {
    TokenLogprob {
        token_id,
        logprob: log_probs
            .get(token_id as usize)
            .copied()
            .unwrap_or(f32::NEG_INFINITY),
        top: top_logprobs(log_probs, k),
    }
}
