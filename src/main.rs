use anyhow::Result;
use clap::Parser;
use hls_encode_queue::{cli::Cli, run};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    run(cli).await
}
