//! The generation loop: chunked prefill of a token sequence at an absolute
//! cache offset, then one decode-sample step per emitted token, with
//! sliding-window shifts keeping a bounded cache alive indefinitely.

use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::engine::{Engine, EngineError, SamplerOptions, Token};
use crate::kv;
use crate::stream::StreamWriter;


/// One generation run over tokens already (partially) resident in cache.
/// `tokens[..start_pos]` is assumed cached; `pos_offset` is the absolute
/// position of `tokens[0]`, i.e. the count of cells resident before it.
pub struct Request<'a> {
    pub tokens: &'a [Token],
    pub start_pos: usize,
    pub pos_offset: usize,
    pub max_tokens: usize,
    /// 0 disables the sliding window.
    pub kv_window: usize,
    pub metrics: bool,
    pub sampler: SamplerOptions,
    /// Persist cache + logical tokens right after prefill.
    pub save_state: Option<(&'a Path, &'a [Token])>,
}

/// Per-prompt timing and counts.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunStats {
    pub prompt_tokens: usize,
    pub generated_tokens: usize,
    pub prefill: Duration,
    pub generate: Duration,
}

impl RunStats {
    pub fn total(&self) -> Duration {
        self.prefill + self.generate
    }

    pub fn bench_line(&self) -> String {
        let gen_secs = self.generate.as_secs_f64();
        let tok_s = if gen_secs > 0.0 {
            self.generated_tokens as f64 / gen_secs
        } else {
            0.0
        };
        format!(
            "bench: prompt_tokens={} generated_tokens={} prefill_ms={} gen_ms={} total_ms={} tok_s={tok_s:.2}",
            self.prompt_tokens,
            self.generated_tokens,
            self.prefill.as_millis(),
            self.generate.as_millis(),
            self.total().as_millis(),
        )
    }
}

#[derive(Debug)]
pub enum GenerateError {
    /// The prompt cannot fit below the sliding window; nothing was decoded.
    PromptTooLong { need: usize, window: usize },
    /// Prefill decode failed; the cache holds an incomplete prompt.
    Prefill(EngineError),
    /// Post-prefill state persistence failed.
    State(EngineError),
    /// A mid-generation decode failed; the tokens produced so far were
    /// already streamed and are carried here for bookkeeping.
    Generation {
        generated: Vec<Token>,
        window: usize,
        cause: EngineError,
    },
    Io(std::io::Error),
}

impl std::fmt::Display for GenerateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerateError::PromptTooLong { need, window } => {
                write!(f, "prompt needs {need} cache positions but kv_window is {window}")
            }
            GenerateError::Prefill(EngineError::KvCacheFull) => {
                write!(f, "kv cache filled during prefill; raise -ctx or enable -kv-window")
            }
            GenerateError::Prefill(e) => write!(f, "prefill failed: {e}"),
            GenerateError::State(e) => write!(f, "state save failed: {e}"),
            GenerateError::Generation { generated, window, cause } => {
                if *window > 0 {
                    write!(
                        f,
                        "generation stopped after {} tokens (kv_window={window}): {cause}",
                        generated.len()
                    )
                } else {
                    write!(
                        f,
                        "generation stopped after {} tokens (kv_window disabled): {cause}",
                        generated.len()
                    )
                }
            }
            GenerateError::Io(e) => write!(f, "output stream error: {e}"),
        }
    }
}

impl std::error::Error for GenerateError {}

/// Prefill `req.tokens[start_pos..]` in batch-sized chunks, then stream up
/// to `max_tokens` sampled tokens through `out`. Telemetry lines (one
/// `NR|…` per token when `metrics` is set) go to `telemetry`.
/// Returns the generated tokens and the run timings.
pub fn run<E: Engine, W: Write, M: Write>(
    engine: &mut E,
    req: &Request,
    out: &mut StreamWriter<W>,
    telemetry: &mut M,
) -> Result<(Vec<Token>, RunStats), GenerateError> {
    let toks = req.tokens;
    let start = req.start_pos.min(toks.len());
    if req.kv_window > 0 && req.pos_offset + toks.len() > req.kv_window {
        return Err(GenerateError::PromptTooLong {
            need: req.pos_offset + toks.len(),
            window: req.kv_window,
        });
    }

    engine.sampler_start(&req.sampler);

    let mut stats = RunStats {
        prompt_tokens: toks.len(),
        ..RunStats::default()
    };

    // Prefill. Only the final slot of the whole prompt requests logits.
    let prefill_started = Instant::now();
    let capacity = engine.batch_capacity();
    let mut pos = start;
    while pos < toks.len() {
        let take = capacity.min(toks.len() - pos);
        engine.batch_clear();
        for idx in pos..pos + take {
            let is_final = idx + 1 == toks.len();
            engine
                .batch_push(toks[idx], req.pos_offset + idx, is_final)
                .map_err(GenerateError::Prefill)?;
        }
        engine.decode().map_err(GenerateError::Prefill)?;
        pos += take;
    }
    stats.prefill = prefill_started.elapsed();

    if let Some((path, logical)) = req.save_state {
        engine
            .state_save(path, logical)
            .map_err(GenerateError::State)?;
        tracing::debug!("saved {} tokens of state to {}", logical.len(), path.display());
    }

    let mut generated: Vec<Token> = Vec::new();
    let generate_started = Instant::now();

    let Some(&seed) = toks.last() else {
        // Nothing to continue from; the caller provides a seed token when
        // resuming saved state.
        out.flush().map_err(GenerateError::Io)?;
        return Ok((generated, stats));
    };

    let mut last = seed;
    let mut cur_pos = req.pos_offset + toks.len();

    for _ in 0..req.max_tokens {
        if req.kv_window > 0 && cur_pos >= req.kv_window {
            match kv::slide_window(engine, cur_pos, req.kv_window) {
                Ok(shifted) => cur_pos = shifted,
                Err(cause) => {
                    return Err(GenerateError::Generation {
                        generated,
                        window: req.kv_window,
                        cause,
                    });
                }
            }
        }

        engine.batch_clear();
        let step = engine
            .batch_push(last, cur_pos, true)
            .and_then(|_| engine.decode());
        if let Err(cause) = step {
            return Err(GenerateError::Generation {
                generated,
                window: req.kv_window,
                cause,
            });
        }

        let top = req
            .metrics
            .then(|| top_two(engine.last_logits().unwrap_or(&[])));

        let token = engine.sample();
        engine.accept(token);

        if engine.is_eog(token) {
            break;
        }

        if let Some((max1, max2)) = top {
            writeln!(telemetry, "NR|{token}|{max1}|{max2}|{}", max1 - max2)
                .map_err(GenerateError::Io)?;
        }

        generated.push(token);
        let piece = match engine.piece(token) {
            Ok(piece) => piece,
            Err(cause) => {
                return Err(GenerateError::Generation {
                    generated,
                    window: req.kv_window,
                    cause,
                });
            }
        };
        out.write_piece(&piece).map_err(GenerateError::Io)?;

        last = token;
        cur_pos += 1;
    }

    out.flush().map_err(GenerateError::Io)?;
    stats.generate = generate_started.elapsed();
    stats.generated_tokens = generated.len();
    Ok((generated, stats))
}

/// Largest and second-largest logit in one pass; duplicate maxima collapse
/// the margin to zero.
fn top_two(logits: &[f32]) -> (f32, f32) {
    let mut max1 = f32::NEG_INFINITY;
    let mut max2 = f32::NEG_INFINITY;
    for &v in logits {
        if v > max1 {
            max2 = max1;
            max1 = v;
        } else if v > max2 {
            max2 = v;
        }
    }
    (max1, max2)
}
