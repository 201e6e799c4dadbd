#![cfg(test)]
//! Deterministic in-memory engine for hermetic tests: byte-level vocabulary,
//! scripted or derived next-token logits, and a bounded cell store that
//! reproduces the cache-full failure mode.

use std::collections::VecDeque;
use std::path::Path;

use super::{Engine, EngineError, SamplerOptions, Token};

pub const MOCK_BOS: Token = 1;
pub const MOCK_EOG: Token = 2;
/// Byte `b` tokenizes to `BYTE_BASE + b`.
pub const BYTE_BASE: Token = 8;

const VOCAB: usize = BYTE_BASE as usize + 256;

pub struct MockEngine {
    batch_cap: usize,
    /// Decode fails with `KvCacheFull` once the store would exceed this.
    pub cell_cap: usize,
    pub can_shift: bool,
    /// (token, position) cells currently resident for sequence 0.
    pub cells: Vec<(Token, usize)>,
    staged: Vec<(Token, usize, bool)>,
    /// Every batch that reached `decode`, for prefill-shape assertions.
    pub batches: Vec<Vec<(Token, usize, bool)>>,
    logits: Vec<f32>,
    script: VecDeque<Token>,
    pub accepted: Vec<Token>,
    pub sampler_starts: usize,
    /// Duplicate the top logit so the top-2 margin collapses to zero.
    pub tie_logits: bool,
}

impl MockEngine {
    pub fn new(batch_cap: usize) -> Self {
        Self {
            batch_cap,
            cell_cap: usize::MAX,
            can_shift: true,
            cells: Vec::new(),
            staged: Vec::new(),
            batches: Vec::new(),
            logits: vec![0.0; VOCAB],
            script: VecDeque::new(),
            accepted: Vec::new(),
            sampler_starts: 0,
            tie_logits: false,
        }
    }

    /// Engine that emits the given tokens in order, then derived ones.
    pub fn scripted(batch_cap: usize, tokens: impl IntoIterator<Item = Token>) -> Self {
        let mut engine = Self::new(batch_cap);
        engine.script = tokens.into_iter().collect();
        engine
    }

    pub fn positions(&self) -> Vec<usize> {
        let mut ps: Vec<usize> = self.cells.iter().map(|&(_, p)| p).collect();
        ps.sort_unstable();
        ps
    }

    /// Next token the derived rule would produce after `last`.
    pub fn derived_next(last: Token) -> Token {
        BYTE_BASE + (last * 31 + 7).rem_euclid(256)
    }
}

impl Engine for MockEngine {
    fn tokenize(&self, text: &str, add_special: bool) -> Result<Vec<Token>, EngineError> {
        let mut toks = Vec::with_capacity(text.len() + 1);
        if add_special {
            toks.push(MOCK_BOS);
        }
        toks.extend(text.bytes().map(|b| BYTE_BASE + b as Token));
        Ok(toks)
    }

    fn piece(&self, token: Token) -> Result<Vec<u8>, EngineError> {
        if token < BYTE_BASE {
            return Ok(Vec::new());
        }
        Ok(vec![(token - BYTE_BASE) as u8])
    }

    fn is_eog(&self, token: Token) -> bool {
        token == MOCK_EOG
    }

    fn batch_capacity(&self) -> usize {
        self.batch_cap
    }

    fn batch_clear(&mut self) {
        self.staged.clear();
    }

    fn batch_push(
        &mut self,
        token: Token,
        pos: usize,
        want_logits: bool,
    ) -> Result<(), EngineError> {
        if self.staged.len() == self.batch_cap {
            return Err(EngineError::Batch("batch is at capacity".into()));
        }
        self.staged.push((token, pos, want_logits));
        Ok(())
    }

    fn decode(&mut self) -> Result<(), EngineError> {
        if self.staged.is_empty() {
            return Err(EngineError::Decode("empty batch".into()));
        }
        if self.cells.len() + self.staged.len() > self.cell_cap {
            return Err(EngineError::KvCacheFull);
        }
        for &(token, pos, _) in &self.staged {
            self.cells.push((token, pos));
        }
        if let Some(&(token, _, _)) = self.staged.iter().rev().find(|&&(_, _, want)| want) {
            let winner = self
                .script
                .front()
                .copied()
                .unwrap_or_else(|| Self::derived_next(token));
            self.logits.fill(0.0);
            self.logits[winner as usize] = 1.0;
            let runner_up = (winner as usize + 1) % VOCAB;
            self.logits[runner_up] = if self.tie_logits { 1.0 } else { 0.5 };
        }
        self.batches.push(self.staged.clone());
        Ok(())
    }

    fn last_logits(&self) -> Option<&[f32]> {
        Some(&self.logits)
    }

    fn sampler_start(&mut self, _opts: &SamplerOptions) {
        self.sampler_starts += 1;
        self.accepted.clear();
    }

    fn sample(&mut self) -> Token {
        if let Some(token) = self.script.pop_front() {
            return token;
        }
        let (winner, _) = self
            .logits
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .unwrap();
        winner as Token
    }

    fn accept(&mut self, token: Token) {
        self.accepted.push(token);
    }

    fn kv_clear(&mut self) {
        self.cells.clear();
    }

    fn kv_remove(&mut self, from: usize, to: Option<usize>) -> Result<(), EngineError> {
        let to = to.unwrap_or(usize::MAX);
        self.cells.retain(|&(_, p)| p < from || p >= to);
        Ok(())
    }

    fn kv_shift(&mut self, from: usize, to: usize, delta: i32) -> Result<(), EngineError> {
        for cell in &mut self.cells {
            if cell.1 >= from && cell.1 < to {
                cell.1 = (cell.1 as i64 + delta as i64) as usize;
            }
        }
        Ok(())
    }

    fn kv_can_shift(&self) -> bool {
        self.can_shift
    }

    fn state_save(&self, path: &Path, tokens: &[Token]) -> Result<(), EngineError> {
        let bytes =
            postcard::to_allocvec(tokens).map_err(|e| EngineError::StateIo(e.to_string()))?;
        std::fs::write(path, bytes).map_err(|e| EngineError::StateIo(e.to_string()))
    }

    fn state_load(&mut self, path: &Path, max_tokens: usize) -> Result<Vec<Token>, EngineError> {
        let bytes = std::fs::read(path).map_err(|e| EngineError::StateIo(e.to_string()))?;
        let mut tokens: Vec<Token> =
            postcard::from_bytes(&bytes).map_err(|e| EngineError::StateIo(e.to_string()))?;
        tokens.truncate(max_tokens);
        self.cells = tokens.iter().enumerate().map(|(p, &t)| (t, p)).collect();
        Ok(tokens)
    }
}
