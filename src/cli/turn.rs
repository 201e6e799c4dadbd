//! One serve turn: wrap, tokenize, reuse whatever prefix the cache already
//! holds, generate, then reconcile the logical token history with the cache.

use std::io::Write;

use eyre::{Result, WrapErr, eyre};

use crate::chat;
use crate::cli::io::{END_SENTINEL, RECORD_SEPARATOR};
use crate::cli::options::RunnerConfig;
use crate::engine::{Engine, Token};
use crate::generate::{self, GenerateError, Request};
use crate::kv;
use crate::stream::StreamWriter;


/// Run one prompt against the engine, mutating `prev_tokens` to mirror what
/// the cache holds afterwards. Emits the end-of-turn sentinel on success; a
/// failed turn emits none, so the parent can notice.
pub fn run_turn<E: Engine, W: Write, M: Write>(
    engine: &mut E,
    cfg: &RunnerConfig,
    prev_tokens: &mut Vec<Token>,
    prompt: &str,
    out: &mut StreamWriter<W>,
    telemetry: &mut M,
) -> Result<()> {
    let continuing = cfg.append_only && !prev_tokens.is_empty();
    let text = if cfg.chat_active() {
        if continuing {
            chat::wrap_continuation(prompt)
        } else {
            chat::wrap(prompt, cfg.system.as_deref(), cfg.cot)
        }
    } else {
        prompt.to_string()
    };

    // BOS belongs to the first tokens of a conversation only.
    let toks = engine
        .tokenize(&text, !continuing)
        .wrap_err("tokenize prompt")?;
    if toks.is_empty() {
        return Err(eyre!("tokenize prompt: tokenizer produced no tokens"));
    }

    let (start_pos, pos_offset) = if cfg.append_only {
        (0, prev_tokens.len())
    } else if cfg.keep_cache {
        let shared = kv::retain_prefix(engine, prev_tokens, &toks).wrap_err("prepare cache")?;
        (shared, 0)
    } else {
        engine.kv_clear();
        (0, 0)
    };

    let req = Request {
        tokens: &toks,
        start_pos,
        pos_offset,
        max_tokens: cfg.max_tokens,
        kv_window: cfg.kv_window,
        metrics: cfg.metrics,
        sampler: cfg.sampler_options(),
        save_state: None,
    };

    let (generated, stats) = match generate::run(engine, &req, out, telemetry) {
        Ok((generated, stats)) => (generated, Some(stats)),
        Err(GenerateError::Generation { generated, window, cause }) => {
            // The partial output is resident in cache; reconcile history
            // before reporting, and skip the sentinel.
            let failure = GenerateError::Generation {
                generated: generated.clone(),
                window,
                cause,
            };
            settle_history(engine, cfg, prev_tokens, toks, &generated)?;
            return Err(eyre!("{failure}")).wrap_err("generate");
        }
        Err(other) => return Err(eyre!("{other}")).wrap_err("generate"),
    };

    settle_history(engine, cfg, prev_tokens, toks, &generated)?;

    let sentinel: &[u8] = if cfg.use_rs {
        &[RECORD_SEPARATOR]
    } else {
        END_SENTINEL
    };
    out.write_piece(sentinel).wrap_err("write delimiter")?;
    out.flush().wrap_err("write delimiter")?;

    if let Some(stats) = stats {
        if !cfg.raw {
            eprintln!("\ncompleted in {:?}", stats.total());
        }
        if cfg.bench {
            eprintln!("{}", stats.bench_line());
        }
    }
    Ok(())
}

/// Post-turn bookkeeping: `prev_tokens` absorbs the prompt (and on retention
/// paths the generated tail), `input_only` evicts everything past the
/// prompt, and the window trim keeps history aligned with a bounded cache.
fn settle_history<E: Engine>(
    engine: &mut E,
    cfg: &RunnerConfig,
    prev_tokens: &mut Vec<Token>,
    toks: Vec<Token>,
    generated: &[Token],
) -> Result<()> {
    let retaining = cfg.append_only || cfg.keep_cache;
    if cfg.append_only {
        prev_tokens.extend_from_slice(&toks);
    } else {
        *prev_tokens = toks;
    }

    if cfg.input_only {
        engine
            .kv_remove(prev_tokens.len(), None)
            .wrap_err("trim cache")?;
    } else if retaining {
        prev_tokens.extend_from_slice(generated);
    }

    kv::trim_history(prev_tokens, cfg.kv_window);
    Ok(())
}
