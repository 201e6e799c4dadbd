//! Flag and environment resolution. Flags are single-dash in the style the
//! parent orchestrator already speaks; positional words join into the
//! single-shot prompt. Warmup toggles are tri-state: flag, then environment,
//! then a model-size heuristic.

use std::path::PathBuf;

use crate::engine::SamplerOptions;


pub const USAGE: &str = "\
usage: nox-runner [flags] [prompt words...]

  -model PATH         model file (default assets/models/nox.gguf)
  -max-tokens N       generation cap per prompt (default 128)
  -ctx N              context capacity in tokens (default 1024)
  -batch N            prefill batch size (default 32)
  -temp F             sampling temperature (default 0.6)
  -top-p F            nucleus mass (default 0.9)
  -top-k N            top-k truncation (default 40)
  -repeat-last-n N    repetition window (default 64)
  -repeat-penalty F   repetition penalty (default 1.05)
  -fast               deterministic argmax preset
  -raw                no 'nox:' header, no trailing newline, no timing line
  -stream-bytes N     coalesce stdout flushes to N bytes (default 0: every piece)
  -kv-window N        sliding cache window in tokens (default 0: disabled)
  -metrics            per-token top-2 logit lines on stderr
  -bench              per-prompt bench line on stderr
  -chat               wrap the prompt in a chat template
  -cot                chat template with a reasoning instruction
  -system TEXT        chat system message
  -serve              read prompts from stdin until EOF, one per line
  -serve-rs           serve with ASCII record-separator delimiting
  -keep-cache         reuse the longest shared prompt prefix across turns
  -append             continue the conversation; prompts extend the cache
  -input-only         drop generated tokens from the cache after each turn
  -state-save PATH    persist cache state after prefill
  -state-load PATH    restore cache state at startup
  -prepack BOOL       mlock the weights (default: auto by model size)
  -prefetch BOOL      warm the page cache sequentially (default: auto)
  -help               this text

environment: NOX_NUM_THREADS, NOX_PREPACK, NOX_PREFETCH
";

/// Explicit tri-state for warmup toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Toggle {
    #[default]
    Auto,
    On,
    Off,
}

impl Toggle {
    /// Flag wins, then environment, then the auto heuristic.
    pub fn resolve(self, env: Option<bool>, auto: bool) -> bool {
        match self {
            Toggle::On => true,
            Toggle::Off => false,
            Toggle::Auto => env.unwrap_or(auto),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub model: PathBuf,
    pub max_tokens: usize,
    pub ctx: usize,
    pub batch: usize,
    pub temp: f32,
    pub top_p: f32,
    pub top_k: i32,
    pub repeat_last_n: i32,
    pub repeat_penalty: f32,
    pub fast: bool,
    pub raw: bool,
    pub stream_bytes: usize,
    pub kv_window: usize,
    pub metrics: bool,
    pub bench: bool,
    pub chat: bool,
    pub cot: bool,
    pub system: Option<String>,
    pub serve: bool,
    pub use_rs: bool,
    pub keep_cache: bool,
    pub append_only: bool,
    pub input_only: bool,
    pub state_save: Option<PathBuf>,
    pub state_load: Option<PathBuf>,
    pub prepack: Toggle,
    pub prefetch: Toggle,
    pub prompt: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            model: PathBuf::from("assets/models/nox.gguf"),
            max_tokens: 128,
            ctx: 1024,
            batch: 32,
            temp: 0.6,
            top_p: 0.9,
            top_k: 40,
            repeat_last_n: 64,
            repeat_penalty: 1.05,
            fast: false,
            raw: false,
            stream_bytes: 0,
            kv_window: 0,
            metrics: false,
            bench: false,
            chat: false,
            cot: false,
            system: None,
            serve: false,
            use_rs: false,
            keep_cache: false,
            append_only: false,
            input_only: false,
            state_save: None,
            state_load: None,
            prepack: Toggle::Auto,
            prefetch: Toggle::Auto,
            prompt: String::new(),
        }
    }
}

impl RunnerConfig {
    pub fn is_serve(&self) -> bool {
        self.serve || self.use_rs
    }

    pub fn chat_active(&self) -> bool {
        self.chat || self.cot || self.system.is_some()
    }

    pub fn sampler_options(&self) -> SamplerOptions {
        SamplerOptions {
            temp: self.temp,
            top_k: self.top_k,
            top_p: self.top_p,
            repeat_last_n: self.repeat_last_n,
            repeat_penalty: self.repeat_penalty,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum OptionsError {
    /// `-help` was given; not a failure.
    Help,
    Invalid(String),
}

impl std::fmt::Display for OptionsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptionsError::Help => write!(f, "help requested"),
            OptionsError::Invalid(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for OptionsError {}

/// Parse command-line arguments (without the binary name) into a resolved
/// configuration: fast-preset rewrite and forced-append normalization
/// already applied.
pub fn parse<I: IntoIterator<Item = String>>(args: I) -> Result<RunnerConfig, OptionsError> {
    let mut cfg = RunnerConfig::default();
    let mut words: Vec<String> = Vec::new();
    let mut it = args.into_iter();

    while let Some(arg) = it.next() {
        match arg.as_str() {
            "-model" => cfg.model = PathBuf::from(value(&mut it, "-model")?),
            "-max-tokens" => cfg.max_tokens = number(&mut it, "-max-tokens")?,
            "-ctx" => cfg.ctx = number(&mut it, "-ctx")?,
            "-batch" => cfg.batch = number(&mut it, "-batch")?,
            "-temp" => cfg.temp = number(&mut it, "-temp")?,
            "-top-p" => cfg.top_p = number(&mut it, "-top-p")?,
            "-top-k" => cfg.top_k = number(&mut it, "-top-k")?,
            "-repeat-last-n" => cfg.repeat_last_n = number(&mut it, "-repeat-last-n")?,
            "-repeat-penalty" => cfg.repeat_penalty = number(&mut it, "-repeat-penalty")?,
            "-fast" => cfg.fast = true,
            "-raw" => cfg.raw = true,
            "-stream-bytes" => cfg.stream_bytes = number(&mut it, "-stream-bytes")?,
            "-kv-window" => cfg.kv_window = number(&mut it, "-kv-window")?,
            "-metrics" => cfg.metrics = true,
            "-bench" => cfg.bench = true,
            "-chat" => cfg.chat = true,
            "-cot" => cfg.cot = true,
            "-system" => cfg.system = Some(value(&mut it, "-system")?),
            "-serve" => cfg.serve = true,
            "-serve-rs" => cfg.use_rs = true,
            "-keep-cache" => cfg.keep_cache = true,
            "-append" => cfg.append_only = true,
            "-input-only" => cfg.input_only = true,
            "-state-save" => cfg.state_save = Some(PathBuf::from(value(&mut it, "-state-save")?)),
            "-state-load" => cfg.state_load = Some(PathBuf::from(value(&mut it, "-state-load")?)),
            "-prepack" => cfg.prepack = toggle(&mut it, "-prepack")?,
            "-prefetch" => cfg.prefetch = toggle(&mut it, "-prefetch")?,
            "-help" | "-h" | "--help" => return Err(OptionsError::Help),
            flag if flag.starts_with('-') => {
                return Err(OptionsError::Invalid(format!("unknown flag {flag}")));
            }
            _ => words.push(arg),
        }
    }
    cfg.prompt = words.join(" ");

    if cfg.fast {
        cfg.temp = 0.0;
        cfg.top_p = 1.0;
        cfg.top_k = 1;
        cfg.repeat_last_n = 0;
        cfg.repeat_penalty = 1.0;
    }

    // A restored conversation with no retention mode chosen continues by
    // appending.
    if cfg.state_load.is_some() && !cfg.append_only && !cfg.keep_cache {
        cfg.append_only = true;
    }

    Ok(cfg)
}

fn value<I: Iterator<Item = String>>(it: &mut I, flag: &str) -> Result<String, OptionsError> {
    it.next()
        .ok_or_else(|| OptionsError::Invalid(format!("{flag} needs a value")))
}

fn number<T: std::str::FromStr, I: Iterator<Item = String>>(
    it: &mut I,
    flag: &str,
) -> Result<T, OptionsError> {
    let raw = value(it, flag)?;
    raw.parse()
        .map_err(|_| OptionsError::Invalid(format!("bad value for {flag}: {raw}")))
}

fn toggle<I: Iterator<Item = String>>(it: &mut I, flag: &str) -> Result<Toggle, OptionsError> {
    let raw = value(it, flag)?;
    match parse_bool(&raw) {
        Some(true) => Ok(Toggle::On),
        Some(false) => Ok(Toggle::Off),
        None => Err(OptionsError::Invalid(format!("bad value for {flag}: {raw}"))),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Boolean environment override, `None` when unset or unparsable.
pub fn env_bool(name: &str) -> Option<bool> {
    std::env::var(name).ok().and_then(|v| parse_bool(&v))
}

/// `NOX_NUM_THREADS` when it parses to a positive integer, else 4.
pub fn thread_count() -> i32 {
    std::env::var("NOX_NUM_THREADS")
        .ok()
        .and_then(|v| v.parse::<i32>().ok())
        .filter(|&n| n > 0)
        .unwrap_or(4)
}
