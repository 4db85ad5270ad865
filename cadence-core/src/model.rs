//! Synthetic model for the reference engine
//!
//! Stands in for real weights: a byte-level vocabulary plus an end-of-sequence
//! token, and deterministic pseudo-logits derived from the seed, the previous
//! token and the position. The end-of-sequence logit grows with the number of
//! generated tokens so every sequence eventually stops on its own.

use anyhow::Result;
use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// End-of-sequence token id (one past the byte range)
pub const EOS_TOKEN: u32 = 256;

/// 256 byte tokens plus EOS
pub const VOCAB_SIZE: usize = 257;

const EOS_BASE_LOGIT: f32 = -6.0;
/// Added to the EOS logit for every generated token
const EOS_RAMP: f32 = 0.6;
/// Control and non-ASCII bytes are effectively never produced
const UNPRINTABLE_LOGIT: f32 = -12.0;
const LOGIT_RANGE: f32 = 3.0;

pub struct SyntheticModel {
    seed: u64,
    device: Device,
}

impl SyntheticModel {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            device: Device::Cpu,
        }
    }

    pub fn eos_token_id(&self) -> u32 {
        EOS_TOKEN
    }

    /// Encode a prompt to tokens (one token per byte)
    pub fn encode(&self, prompt: &str) -> Vec<u32> {
        prompt.bytes().map(u32::from).collect()
    }

    /// Decode tokens to text, skipping EOS
    pub fn decode(&self, tokens: &[u32]) -> String {
        let bytes: Vec<u8> = tokens
            .iter()
            .filter_map(|&t| u8::try_from(t).ok())
            .collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Default sampling seed for a request that did not set one
    pub fn seed_for(&self, request_id: &str) -> u64 {
        // FNV-1a over the id, then mixed with the model seed
        let hash = request_id
            .bytes()
            .fold(0xcbf2_9ce4_8422_2325u64, |acc, b| {
                (acc ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
            });
        mix(self.seed, hash, 0)
    }

    /// Next-token logits after `context`, of which the last `generated`
    /// tokens were produced by the model.
    pub fn logits(&self, context: &[u32], generated: usize) -> Vec<f32> {
        let last = context.last().copied().unwrap_or(EOS_TOKEN);
        let mut rng = StdRng::seed_from_u64(mix(self.seed, u64::from(last), context.len() as u64));

        let mut logits: Vec<f32> = (0..VOCAB_SIZE)
            .map(|token| {
                if (32..127).contains(&token) {
                    rng.gen_range(-LOGIT_RANGE..LOGIT_RANGE)
                } else {
                    UNPRINTABLE_LOGIT
                }
            })
            .collect();
        logits[EOS_TOKEN as usize] = EOS_BASE_LOGIT + EOS_RAMP * generated as f32;
        logits
    }

    /// Wrap logits in a tensor on the model's device
    pub fn to_tensor(&self, logits: Vec<f32>) -> Result<Tensor> {
        Ok(Tensor::from_vec(logits, VOCAB_SIZE, &self.device)?)
    }
}

fn mix(seed: u64, a: u64, b: u64) -> u64 {
    let mut x = seed
        ^ a.wrapping_mul(0x9e37_79b9_7f4a_7c15)
        ^ b.wrapping_mul(0xc2b2_ae3d_27d4_eb4f);
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}
