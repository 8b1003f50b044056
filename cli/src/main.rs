// Good defaults
#![forbid(unused_must_use)]
#![deny(unsafe_code)]

use anyhow::Result;

async fn run() -> Result<()> {
    tagctl_utils::tracing_util::initialize_tracing();
    tracing::trace!("starting");
    tagctl::cli::run_from_iter(std::env::args()).await
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
