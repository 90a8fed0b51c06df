use anyhow::Result;
use deepseek_chat::cli;

#[tokio::main]
async fn main() -> Result<()> {
    cli::run().await
}
