//! llama.cpp-backed engine: thin, call-per-capability adapter over the `gg`
//! bindings. Construction is split load-model / new-context so the context
//! can borrow the model for the life of the process.

use std::num::NonZeroU32;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use gg::context::LlamaContext;
use gg::context::params::LlamaContextParams;
use gg::llama_backend::LlamaBackend;
use gg::llama_batch::LlamaBatch;
use gg::model::params::LlamaModelParams;
use gg::model::{AddBos, LlamaModel, Special};
use gg::sampling::LlamaSampler;
use gg::token::LlamaToken;

use super::{Engine, EngineError, SamplerOptions, Token};

pub fn supports_mlock() -> bool {
    gg::llama_supports_mlock()
}

/// Load the model into memory (GPU layers enabled by default) and return
/// backend+model. With `use_mlock` the weights are pinned so the pager
/// cannot evict them mid-decode.
pub fn load_model(path: &Path, use_mlock: bool) -> Result<(LlamaBackend, LlamaModel), EngineError> {
    let backend = LlamaBackend::init().map_err(|e| EngineError::ModelLoad(e.to_string()))?;
    let params = LlamaModelParams::default()
        .with_n_gpu_layers(u32::MAX)
        .with_use_mlock(use_mlock);
    let model = LlamaModel::load_from_file(&backend, path, &params)
        .map_err(|e| EngineError::ModelLoad(e.to_string()))?;
    Ok((backend, model))
}

pub struct LlamaEngine<'m> {
    ctx: LlamaContext<'m>,
    batch: LlamaBatch<'m>,
    sampler: LlamaSampler,
    /// Batch index of the most recent slot that requested logits.
    logits_slot: i32,
    batch_cap: usize,
}

impl<'m> LlamaEngine<'m> {
    pub fn new(
        backend: &LlamaBackend,
        model: &'m LlamaModel,
        ctx_len: usize,
        batch_size: usize,
        threads: i32,
    ) -> Result<Self, EngineError> {
        let params = LlamaContextParams::default()
            .with_n_ctx(NonZeroU32::new(ctx_len as u32))
            .with_n_threads(threads)
            .with_n_threads_batch(threads)
            .with_n_batch(batch_size as u32)
            .with_n_ubatch(batch_size as u32);
        let ctx = model
            .new_context(backend, params)
            .map_err(|e| EngineError::Context(e.to_string()))?;
        let batch = LlamaBatch::new(batch_size, 1);
        Ok(Self {
            ctx,
            batch,
            sampler: LlamaSampler::greedy(),
            logits_slot: 0,
            batch_cap: batch_size,
        })
    }
}

/// Sub-second clock noise; good enough to decorrelate stochastic runs.
fn clock_seed() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(31337)
}

fn build_sampler(opts: &SamplerOptions) -> LlamaSampler {
    if opts.is_greedy() {
        return LlamaSampler::greedy();
    }
    LlamaSampler::chain_simple([
        LlamaSampler::penalties(opts.repeat_last_n, opts.repeat_penalty, 0.0, 0.0),
        LlamaSampler::top_k(opts.top_k),
        LlamaSampler::top_p(opts.top_p, 1),
        LlamaSampler::temp(opts.temp),
        LlamaSampler::dist(clock_seed()),
    ])
}

impl Engine for LlamaEngine<'_> {
    fn tokenize(&self, text: &str, add_special: bool) -> Result<Vec<Token>, EngineError> {
        let add_bos = if add_special { AddBos::Always } else { AddBos::Never };
        let toks = self
            .ctx
            .model
            .str_to_token(text, add_bos)
            .map_err(|e| EngineError::Tokenize(e.to_string()))?;
        Ok(toks.iter().map(|t| t.0).collect())
    }

    fn piece(&self, token: Token) -> Result<Vec<u8>, EngineError> {
        self.ctx
            .model
            .token_to_bytes(LlamaToken(token), Special::Tokenize)
            .map_err(|e| EngineError::Detokenize(e.to_string()))
    }

    fn is_eog(&self, token: Token) -> bool {
        self.ctx.model.is_eog_token(LlamaToken(token))
    }

    fn batch_capacity(&self) -> usize {
        self.batch_cap
    }

    fn batch_clear(&mut self) {
        self.batch.clear();
    }

    fn batch_push(
        &mut self,
        token: Token,
        pos: usize,
        want_logits: bool,
    ) -> Result<(), EngineError> {
        self.batch
            .add(LlamaToken(token), pos as i32, &[0], want_logits)
            .map_err(|e| EngineError::Batch(e.to_string()))?;
        if want_logits {
            self.logits_slot = self.batch.n_tokens() - 1;
        }
        Ok(())
    }

    fn decode(&mut self) -> Result<(), EngineError> {
        self.ctx.decode(&mut self.batch).map_err(|e| match e {
            gg::DecodeError::NoKvCacheSlot => EngineError::KvCacheFull,
            other => EngineError::Decode(other.to_string()),
        })
    }

    fn last_logits(&self) -> Option<&[f32]> {
        Some(self.ctx.get_logits_ith(self.logits_slot))
    }

    fn sampler_start(&mut self, opts: &SamplerOptions) {
        self.sampler = build_sampler(opts);
    }

    fn sample(&mut self) -> Token {
        self.sampler.sample(&self.ctx, self.logits_slot).0
    }

    fn accept(&mut self, token: Token) {
        self.sampler.accept(LlamaToken(token));
    }

    fn kv_clear(&mut self) {
        self.ctx.clear_kv_cache();
    }

    fn kv_remove(&mut self, from: usize, to: Option<usize>) -> Result<(), EngineError> {
        self.ctx
            .clear_kv_cache_seq(Some(0), Some(from as u32), to.map(|t| t as u32))
            .map(|_| ())
            .map_err(|e| EngineError::Kv(e.to_string()))
    }

    fn kv_shift(&mut self, from: usize, to: usize, delta: i32) -> Result<(), EngineError> {
        self.ctx
            .kv_cache_seq_add(0, Some(from as u32), Some(to as u32), delta)
            .map_err(|e| EngineError::Kv(e.to_string()))
    }

    fn kv_can_shift(&self) -> bool {
        // The unified cache in these bindings always accepts position shifts.
        true
    }

    fn state_save(&self, path: &Path, tokens: &[Token]) -> Result<(), EngineError> {
        let toks: Vec<LlamaToken> = tokens.iter().map(|&t| LlamaToken(t)).collect();
        self.ctx
            .save_session_file(path, &toks)
            .map_err(|e| EngineError::StateIo(e.to_string()))
    }

    fn state_load(&mut self, path: &Path, max_tokens: usize) -> Result<Vec<Token>, EngineError> {
        let toks = self
            .ctx
            .load_session_file(path, max_tokens)
            .map_err(|e| EngineError::StateIo(e.to_string()))?;
        tracing::debug!("restored {} tokens from {}", toks.len(), path.display());
        Ok(toks.iter().map(|t| t.0).collect())
    }
}
