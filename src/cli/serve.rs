//! Serve mode: consume prompts from stdin until EOF or a quit word, one
//! bracketed output per turn. A failed turn is reported on stderr and the
//! loop keeps going; only the stdin stream ending stops it.

use eyre::Result;

use crate::cli::io;
use crate::cli::options::RunnerConfig;
use crate::cli::turn::run_turn;
use crate::engine::{Engine, Token};
use crate::stream::StreamWriter;

pub fn serve_forever<E: Engine>(
    engine: &mut E,
    cfg: &RunnerConfig,
    loaded: Vec<Token>,
) -> Result<()> {
    let mut prev_tokens = loaded;
    let stdin = std::io::stdin();
    let mut input = stdin.lock();
    let stdout = std::io::stdout();
    let mut out = StreamWriter::new(stdout.lock(), cfg.stream_bytes);
    let mut telemetry = std::io::stderr();

    while let Some(raw) = io::read_prompt(&mut input, cfg.use_rs)? {
        let prompt = raw.trim();
        if prompt.is_empty() {
            continue;
        }
        if prompt == "exit" || prompt == "quit" {
            break;
        }
        if let Err(err) = run_turn(engine, cfg, &mut prev_tokens, prompt, &mut out, &mut telemetry)
        {
            eprintln!("failed to {err:#}");
        }
    }
    Ok(())
}
