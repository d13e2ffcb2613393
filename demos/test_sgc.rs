use clap::Parser;

use candle_sgc::cli::{run, Cli};

// cargo run --release --example test_sgc -- --dataset cora --ptb_rate 0.05
fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    run(&Cli::parse())?;
    Ok(())
}
