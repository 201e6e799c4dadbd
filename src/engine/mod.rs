//! Backend capability seam: everything the runner needs from the native
//! inference library, bundled behind one trait so the generation loop, cache
//! policy and session control stay testable without real weights.

use std::path::Path;

pub mod llama;
#[cfg(test)]
pub mod mock;

/// Token id as the backend vocabulary numbers them.
pub type Token = i32;

/// Sampling parameters for one generation run.
#[derive(Debug, Clone, Copy)]
pub struct SamplerOptions {
    pub temp: f32,
    pub top_k: i32,
    pub top_p: f32,
    pub repeat_last_n: i32,
    pub repeat_penalty: f32,
}

impl SamplerOptions {
    /// The fast preset collapses to plain argmax: no penalties, no draw.
    pub fn is_greedy(&self) -> bool {
        self.temp <= 0.0 && self.top_p >= 1.0 && self.top_k <= 1
    }
}

#[derive(Debug)]
pub enum EngineError {
    ModelLoad(String),
    Context(String),
    Tokenize(String),
    Detokenize(String),
    Batch(String),
    KvCacheFull,
    Decode(String),
    Kv(String),
    StateIo(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::ModelLoad(e) => write!(f, "model load failed: {e}"),
            EngineError::Context(e) => write!(f, "context creation failed: {e}"),
            EngineError::Tokenize(e) => write!(f, "tokenization failed: {e}"),
            EngineError::Detokenize(e) => write!(f, "detokenization failed: {e}"),
            EngineError::Batch(e) => write!(f, "batch slot rejected: {e}"),
            EngineError::KvCacheFull => write!(f, "no free kv cache slot"),
            EngineError::Decode(e) => write!(f, "decode failed: {e}"),
            EngineError::Kv(e) => write!(f, "kv cache operation failed: {e}"),
            EngineError::StateIo(e) => write!(f, "state file i/o failed: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

/// One loaded model plus its decode context, batch and sampler, seen as a
/// set of single-call capabilities. No policy lives behind this trait.
pub trait Engine {
    fn tokenize(&self, text: &str, add_special: bool) -> Result<Vec<Token>, EngineError>;
    /// Byte fragment a token renders to; fragments concatenate to the text.
    fn piece(&self, token: Token) -> Result<Vec<u8>, EngineError>;
    fn is_eog(&self, token: Token) -> bool;

    fn batch_capacity(&self) -> usize;
    fn batch_clear(&mut self);
    /// Stage one slot: token at an absolute cache position, optionally
    /// requesting logits for that slot.
    fn batch_push(&mut self, token: Token, pos: usize, want_logits: bool)
    -> Result<(), EngineError>;
    /// Run the staged batch through the model.
    fn decode(&mut self) -> Result<(), EngineError>;
    /// Logits of the most recent slot that requested them.
    fn last_logits(&self) -> Option<&[f32]>;

    /// Build a fresh sampler for a generation run; state never carries over.
    fn sampler_start(&mut self, opts: &SamplerOptions);
    /// Pick a token from the last logits slot.
    fn sample(&mut self) -> Token;
    /// Feed a picked token back into the repetition window.
    fn accept(&mut self, token: Token);

    fn kv_clear(&mut self);
    /// Drop cache cells of sequence 0 with positions in `[from, to)`;
    /// `None` means to the end.
    fn kv_remove(&mut self, from: usize, to: Option<usize>) -> Result<(), EngineError>;
    /// Renumber cells in `[from, to)` by `delta` positions.
    fn kv_shift(&mut self, from: usize, to: usize, delta: i32) -> Result<(), EngineError>;
    fn kv_can_shift(&self) -> bool;

    /// Persist the cache alongside the token sequence that produced it.
    fn state_save(&self, path: &Path, tokens: &[Token]) -> Result<(), EngineError>;
    /// Restore a saved cache; returns the tokens it logically contains.
    fn state_load(&mut self, path: &Path, max_tokens: usize) -> Result<Vec<Token>, EngineError>;
}
