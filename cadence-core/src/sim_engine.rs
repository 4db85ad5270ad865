//! Reference engine with continuous batching
//!
//! [`SimEngine`] puts the scheduler, the page pool and the synthetic model
//! behind the [`Engine`] trait, so the driver can run end to end without
//! model weights. Every step advances each running request by one token; the
//! first step of a request also computes its prompt log-probabilities.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use candle_core::Tensor;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::engine::Engine;
use crate::error::EngineError;
use crate::kv_cache::{pages_for_tokens, CacheStats, PagePool};
use crate::model::SyntheticModel;
use crate::request::{
    CompletionOutput, FinishReason, Request, RequestId, RequestOutput, SamplingParams,
    TokenLogprob,
};
use crate::sampler::{apply_penalties, log_probs, token_logprob, top_logprobs, Sampler};
use crate::scheduler::{Scheduler, SchedulerStats, DEFAULT_MAX_NUM_SEQS};

/// Configuration for the reference engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimEngineConfig {
    /// Seed for the synthetic model and for requests without their own seed
    pub seed: u64,
    /// Maximum number of requests advanced per step
    pub max_num_seqs: usize,
    /// Number of KV cache pages
    pub num_kv_pages: usize,
}

impl Default for SimEngineConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            max_num_seqs: DEFAULT_MAX_NUM_SEQS,
            num_kv_pages: 1024, // 1024 pages * 16 tokens
        }
    }
}

/// Statistics for the reference engine
#[derive(Debug, Clone, Default)]
pub struct SimEngineStats {
    pub total_requests: u64,
    pub completed_requests: u64,
    pub total_tokens_generated: u64,
    pub steps: u64,
    pub current_batch_size: usize,
    pub scheduler: SchedulerStats,
    pub cache: CacheStats,
}

/// One candidate sequence (a sample or a beam)
#[derive(Debug, Clone, Default)]
struct Candidate {
    token_ids: Vec<u32>,
    cumulative_logprob: f64,
    logprobs: Vec<TokenLogprob>,
    finish_reason: Option<FinishReason>,
}

impl Candidate {
    fn is_finished(&self) -> bool {
        self.finish_reason.is_some()
    }

    /// Beam ranking score, length-normalized
    fn beam_score(&self) -> f64 {
        self.cumulative_logprob / self.token_ids.len().max(1) as f64
    }
}

/// State for a request being processed
struct ActiveRequest {
    request: Request,
    prompt_tokens: Vec<u32>,
    prompt_logprobs: Option<Vec<Option<TokenLogprob>>>,
    /// Samples, or the live beams under beam search
    candidates: Vec<Candidate>,
    /// One per sample; empty under beam search
    samplers: Vec<Sampler>,
    finished_beams: Vec<Candidate>,
    prefilled: bool,
}

impl ActiveRequest {
    fn is_finished(&self) -> bool {
        let params = &self.request.params;
        if params.use_beam_search {
            self.candidates.is_empty() || self.finished_beams.len() >= params.best_of()
        } else {
            self.candidates.iter().all(Candidate::is_finished)
        }
    }
}

struct EngineState {
    scheduler: Scheduler,
    active: HashMap<RequestId, ActiveRequest>,
}

/// Deterministic engine over a synthetic model
pub struct SimEngine {
    model: SyntheticModel,
    kv_cache: Arc<PagePool>,
    state: Mutex<EngineState>,
    stats: Mutex<SimEngineStats>,
}

impl SimEngine {
    pub fn new(config: SimEngineConfig) -> Self {
        info!(
            seed = config.seed,
            max_num_seqs = config.max_num_seqs,
            "Initializing reference engine with {} KV pages",
            config.num_kv_pages
        );

        let kv_cache = Arc::new(PagePool::new(config.num_kv_pages));
        let scheduler = Scheduler::new(kv_cache.clone(), config.max_num_seqs);

        Self {
            model: SyntheticModel::new(config.seed),
            kv_cache,
            state: Mutex::new(EngineState {
                scheduler,
                active: HashMap::new(),
            }),
            stats: Mutex::new(SimEngineStats::default()),
        }
    }

    /// Get engine statistics
    pub fn stats(&self) -> SimEngineStats {
        let scheduler = self.state.lock().scheduler.stats();
        let mut stats = self.stats.lock().clone();
        stats.scheduler = scheduler;
        stats.cache = self.kv_cache.stats();
        stats
    }

    /// Log-probabilities of the next token after `prompt` + `candidate`
    fn next_logits(
        &self,
        prompt: &[u32],
        candidate: &Candidate,
        params: &SamplingParams,
    ) -> Result<Tensor> {
        let mut context = Vec::with_capacity(prompt.len() + candidate.token_ids.len());
        context.extend_from_slice(prompt);
        context.extend_from_slice(&candidate.token_ids);

        let mut logits = self.model.logits(&context, candidate.token_ids.len());
        apply_penalties(
            &mut logits,
            &candidate.token_ids,
            params.presence_penalty,
            params.frequency_penalty,
        );
        self.model.to_tensor(logits)
    }

    /// First entry is `None`: nothing precedes the first prompt token.
    fn compute_prompt_logprobs(&self, prompt: &[u32], k: usize) -> Result<Vec<Option<TokenLogprob>>> {
        let mut out = Vec::with_capacity(prompt.len());
        for (pos, &token) in prompt.iter().enumerate() {
            if pos == 0 {
                out.push(None);
                continue;
            }
            let logits = self.model.to_tensor(self.model.logits(&prompt[..pos], 0))?;
            let lps = log_probs(&logits)?;
            out.push(Some(token_logprob(&lps, token, k)));
        }
        Ok(out)
    }

    /// Advance a request by one token; returns the number of tokens appended
    fn advance(&self, active: &mut ActiveRequest) -> Result<usize> {
        if active.is_finished() {
            return Ok(0);
        }
        if !active.prefilled {
            if let Some(k) = active.request.params.prompt_logprobs {
                active.prompt_logprobs = Some(self.compute_prompt_logprobs(&active.prompt_tokens, k)?);
            }
            active.prefilled = true;
        }

        if active.request.params.use_beam_search {
            self.beam_step(active)
        } else {
            self.sample_step(active)
        }
    }

    fn sample_step(&self, active: &mut ActiveRequest) -> Result<usize> {
        let ActiveRequest {
            request,
            prompt_tokens,
            candidates,
            samplers,
            ..
        } = active;
        let params = &request.params;
        let eos = self.model.eos_token_id();

        let mut generated = 0;
        for (candidate, sampler) in candidates.iter_mut().zip(samplers.iter_mut()) {
            if candidate.is_finished() {
                continue;
            }
            let logits = self.next_logits(&prompt_tokens[..], candidate, params)?;
            let token = sampler.sample(&logits)?;
            let lps = log_probs(&logits)?;
            let logprob = lps
                .get(token as usize)
                .copied()
                .ok_or_else(|| anyhow!("sampled token {} outside the vocabulary", token))?;

            candidate.cumulative_logprob += f64::from(logprob);
            if token == eos {
                candidate.finish_reason = Some(FinishReason::Stop);
                continue;
            }
            if let Some(k) = params.logprobs {
                candidate.logprobs.push(token_logprob(&lps, token, k));
            }
            candidate.token_ids.push(token);
            generated += 1;
            if candidate.token_ids.len() >= params.max_tokens {
                candidate.finish_reason = Some(FinishReason::Length);
            }
        }
        Ok(generated)
    }

    fn beam_step(&self, active: &mut ActiveRequest) -> Result<usize> {
        let params = active.request.params.clone();
        let width = params.best_of();
        let eos = self.model.eos_token_id();

        // Every live beam proposes its best continuations
        let mut beam_logprobs = Vec::with_capacity(active.candidates.len());
        let mut expansions = Vec::new();
        for (beam_idx, beam) in active.candidates.iter().enumerate() {
            let logits = self.next_logits(&active.prompt_tokens, beam, &params)?;
            let lps = log_probs(&logits)?;
            for (token, logprob) in top_logprobs(&lps, 2 * width) {
                let score = beam.cumulative_logprob + f64::from(logprob);
                expansions.push((score, beam_idx, token));
            }
            beam_logprobs.push(lps);
        }
        expansions.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut next_beams = Vec::with_capacity(width);
        for (score, beam_idx, token) in expansions {
            if next_beams.len() >= width {
                break;
            }
            let mut beam = active.candidates[beam_idx].clone();
            beam.cumulative_logprob = score;
            if token == eos {
                if active.finished_beams.len() < width {
                    beam.finish_reason = Some(FinishReason::Stop);
                    active.finished_beams.push(beam);
                }
                continue;
            }
            if let Some(k) = params.logprobs {
                beam.logprobs.push(token_logprob(&beam_logprobs[beam_idx], token, k));
            }
            beam.token_ids.push(token);
            next_beams.push(beam);
        }

        let generated = next_beams.len();
        active.candidates.clear();
        for mut beam in next_beams {
            if beam.token_ids.len() >= params.max_tokens {
                beam.finish_reason = Some(FinishReason::Length);
                active.finished_beams.push(beam);
            } else {
                active.candidates.push(beam);
            }
        }
        Ok(generated)
    }

    /// Advance the scheduled batch with `advance` and retire what finished.
    ///
    /// Finished requests are only released once the whole batch has advanced,
    /// so a fault part way through leaves every request in place and its
    /// terminal output is returned by a later step.
    fn step_with<F>(&self, mut advance: F) -> Result<Vec<RequestOutput>, EngineError>
    where
        F: FnMut(&Self, &mut ActiveRequest) -> Result<usize>,
    {
        let mut state = self.state.lock();
        let EngineState { scheduler, active } = &mut *state;

        let batch = scheduler.schedule();
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let batch_size = batch.request_ids.len();

        let mut outputs = Vec::with_capacity(batch_size);
        let mut finished_ids = Vec::new();
        let mut tokens_generated = 0;
        for id in &batch.request_ids {
            let request = active
                .get_mut(id)
                .ok_or_else(|| EngineError::request_fault(id.clone(), "scheduled request has no state"))?;
            tokens_generated += advance(self, request)
                .map_err(|e| EngineError::request_fault(id.clone(), format!("{:#}", e)))?;

            let finished = request.is_finished();
            outputs.push(self.build_output(request, finished));
            if finished {
                finished_ids.push(id);
            }
        }

        let completed = finished_ids.len() as u64;
        for id in finished_ids {
            scheduler.finish(id);
            active.remove(id);
        }
        drop(state);

        debug!(
            "Step advanced {} requests ({} prefill, {} decode), {} finished",
            batch_size,
            batch.num_prefill,
            batch.num_decode,
            completed
        );

        let mut stats = self.stats.lock();
        stats.steps += 1;
        stats.completed_requests += completed;
        stats.total_tokens_generated += tokens_generated as u64;
        stats.current_batch_size = batch_size;

        Ok(outputs)
    }

    fn build_output(&self, active: &ActiveRequest, finished: bool) -> RequestOutput {
        let params = &active.request.params;
        let n = params.n;

        let selected: Vec<&Candidate> = if params.use_beam_search && finished {
            let mut beams: Vec<&Candidate> = active.finished_beams.iter().collect();
            beams.sort_by(|a, b| b.beam_score().total_cmp(&a.beam_score()));
            beams.truncate(n);
            beams
        } else if finished && params.best_of() > n {
            let mut samples: Vec<&Candidate> = active.candidates.iter().collect();
            samples.sort_by(|a, b| b.cumulative_logprob.total_cmp(&a.cumulative_logprob));
            samples.truncate(n);
            samples
        } else {
            active.candidates.iter().take(n).collect()
        };

        let outputs = selected
            .into_iter()
            .enumerate()
            .map(|(index, candidate)| CompletionOutput {
                index,
                text: self.model.decode(&candidate.token_ids),
                token_ids: candidate.token_ids.clone(),
                cumulative_logprob: candidate.cumulative_logprob,
                logprobs: params.logprobs.map(|_| candidate.logprobs.clone()),
                finish_reason: candidate.finish_reason,
            })
            .collect();

        RequestOutput {
            request_id: active.request.id.clone(),
            prompt: active.request.prompt.clone(),
            prompt_token_ids: active.prompt_tokens.clone(),
            prompt_logprobs: active.prompt_logprobs.clone(),
            outputs,
            finished,
        }
    }
}

impl Engine for SimEngine {
    fn submit(&self, request: Request) -> Result<(), EngineError> {
        request.params.validate()?;

        let mut state = self.state.lock();
        if state.active.contains_key(&request.id) {
            return Err(EngineError::DuplicateIdentifier(request.id));
        }

        let prompt_tokens = self.model.encode(&request.prompt);
        let params = &request.params;
        let width = params.best_of();
        let pages_needed = prompt_tokens
            .len()
            .checked_add(params.max_tokens)
            .and_then(|tokens| pages_for_tokens(tokens).checked_mul(width))
            .ok_or_else(|| {
                EngineError::InvalidConfiguration(format!(
                    "request {} needs more KV pages than addressable",
                    request.id
                ))
            })?;
        if pages_needed > self.kv_cache.total_pages() {
            return Err(EngineError::InvalidConfiguration(format!(
                "request {} needs {} KV pages but the cache only has {}",
                request.id,
                pages_needed,
                self.kv_cache.total_pages()
            )));
        }

        let (candidates, samplers) = if params.use_beam_search {
            (vec![Candidate::default()], Vec::new())
        } else {
            let seed = params.seed.unwrap_or_else(|| self.model.seed_for(&request.id));
            let samplers = (0..width)
                .map(|i| Sampler::new(seed.wrapping_add(i as u64), params))
                .collect();
            (vec![Candidate::default(); width], samplers)
        };

        debug!(
            "Submitted request {} with {} prompt tokens, {} pages reserved",
            request.id,
            prompt_tokens.len(),
            pages_needed
        );
        state
            .scheduler
            .add_request(request.id.clone(), request.priority, pages_needed);
        state.active.insert(
            request.id.clone(),
            ActiveRequest {
                request,
                prompt_tokens,
                prompt_logprobs: None,
                candidates,
                samplers,
                finished_beams: Vec::new(),
                prefilled: false,
            },
        );
        drop(state);

        self.stats.lock().total_requests += 1;
        Ok(())
    }

    fn step(&self) -> Result<Vec<RequestOutput>, EngineError> {
        self.step_with(Self::advance)
    }

    fn has_pending_work(&self) -> bool {
        !self.state.lock().scheduler.is_idle()
    }
}
