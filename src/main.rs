//! Command-line entrypoint for the nox inference runner.

pub mod chat;
pub mod cli;
pub mod engine;
pub mod generate;
pub mod kv;
pub mod logging;
pub mod stream;
pub mod warmup;

fn main() {
    logging::init();
    if let Err(err) = cli::run() {
        eprintln!("failed to {err:#}");
        std::process::exit(1);
    }
}
