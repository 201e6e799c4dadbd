//! Top-level flow: resolve options, warm up, load the model, then run a
//! single prompt or hand the engine to the serve loop.

use eyre::{Result, WrapErr, eyre};

use crate::chat;
use crate::cli::io;
use crate::cli::options::{self, OptionsError, RunnerConfig, USAGE};
use crate::cli::serve;
use crate::engine::llama::{self, LlamaEngine};
use crate::engine::{Engine, Token};
use crate::generate::{self, Request};
use crate::stream::StreamWriter;
use crate::warmup;

pub fn run() -> Result<()> {
    let cfg = match options::parse(std::env::args().skip(1)) {
        Ok(cfg) => cfg,
        Err(OptionsError::Help) => {
            print!("{USAGE}");
            return Ok(());
        }
        Err(err) => {
            eprint!("{USAGE}");
            return Err(eyre!(err)).wrap_err("parse flags");
        }
    };

    let threads = options::thread_count();
    eprintln!(
        "loading model: {} (threads={threads} ctx={} batch={})",
        cfg.model.display(),
        cfg.ctx,
        cfg.batch,
    );

    let big_model = warmup::model_size(&cfg.model) >= warmup::LARGE_MODEL_BYTES;
    if cfg
        .prefetch
        .resolve(options::env_bool("NOX_PREFETCH"), big_model)
    {
        // Best-effort: a cold cache slows the load down, never fails it.
        if let Err(err) = warmup::prefetch(&cfg.model) {
            eprintln!("prefetch failed: {err}");
        }
    }
    let mut use_mlock = cfg
        .prepack
        .resolve(options::env_bool("NOX_PREPACK"), big_model);
    if use_mlock {
        if llama::supports_mlock() {
            eprintln!("prepack: mlock enabled");
        } else {
            eprintln!("prepack: mlock not supported on this device");
            use_mlock = false;
        }
    }

    let (backend, model) = llama::load_model(&cfg.model, use_mlock).wrap_err("load model")?;
    let mut engine =
        LlamaEngine::new(&backend, &model, cfg.ctx, cfg.batch, threads).wrap_err("create context")?;

    let loaded = match &cfg.state_load {
        Some(path) => engine.state_load(path, cfg.ctx).wrap_err("load state")?,
        None => Vec::new(),
    };

    if cfg.is_serve() {
        serve::serve_forever(&mut engine, &cfg, loaded)
    } else {
        single_shot(&mut engine, &cfg, loaded)
    }
}

fn single_shot<E: Engine>(engine: &mut E, cfg: &RunnerConfig, loaded: Vec<Token>) -> Result<()> {
    let mut prompt = cfg.prompt.clone();
    if prompt.is_empty() {
        if let Some(piped) = io::read_whole_stdin().wrap_err("read prompt")? {
            prompt = piped.trim().to_string();
        }
    }
    if prompt.is_empty() && loaded.is_empty() {
        return Err(eyre!("read prompt: no prompt given and no state to resume"));
    }

    let text = if cfg.chat_active() {
        chat::wrap(&prompt, cfg.system.as_deref(), cfg.cot)
    } else {
        prompt
    };

    // Which tokens to feed, where they sit in the cache, and what a state
    // save must capture.
    let (toks, start_pos, pos_offset, save_tokens) = if loaded.is_empty() {
        let toks = engine.tokenize(&text, true).wrap_err("tokenize prompt")?;
        if toks.is_empty() {
            return Err(eyre!("tokenize prompt: tokenizer produced no tokens"));
        }
        let save = toks.clone();
        (toks, 0, 0, save)
    } else if text.is_empty() {
        // Resuming without new input: re-decode the last restored token so
        // the next sample continues exactly where the saved run stopped.
        let seed = loaded[loaded.len() - 1];
        let offset = loaded.len() - 1;
        (vec![seed], 1, offset, loaded)
    } else {
        // The restored prefix already carries the BOS.
        let toks = engine.tokenize(&text, false).wrap_err("tokenize prompt")?;
        let offset = loaded.len();
        let mut save = loaded;
        save.extend_from_slice(&toks);
        (toks, 0, offset, save)
    };

    let stdout = std::io::stdout();
    let mut out = StreamWriter::new(stdout.lock(), cfg.stream_bytes);
    if !cfg.raw {
        out.write_piece(b"nox:\n").wrap_err("write output")?;
    }

    let req = Request {
        tokens: &toks,
        start_pos,
        pos_offset,
        max_tokens: cfg.max_tokens,
        kv_window: cfg.kv_window,
        metrics: cfg.metrics,
        sampler: cfg.sampler_options(),
        save_state: cfg
            .state_save
            .as_deref()
            .map(|path| (path, save_tokens.as_slice())),
    };
    let mut telemetry = std::io::stderr();
    let (_generated, stats) = match generate::run(engine, &req, &mut out, &mut telemetry) {
        Ok(done) => done,
        Err(err) => {
            // Whatever was produced is already on its way out.
            out.flush().ok();
            return Err(eyre!("{err}")).wrap_err("generate");
        }
    };

    if !cfg.raw {
        out.write_piece(b"\n").wrap_err("write output")?;
    }
    out.flush().wrap_err("write output")?;

    if !cfg.raw {
        eprintln!("\ncompleted in {:?}", stats.total());
    }
    if cfg.bench {
        eprintln!("{}", stats.bench_line());
    }
    Ok(())
}
