use std::path::PathBuf;

use anyhow::Result;
use knockrelay::config::{CONFIG_ENV, Config};
use knockrelay::{Server, logging};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(CONFIG_ENV).ok())
        .map(PathBuf::from);

    let config = Config::load(path.as_deref())?;
    logging::init(&config.logging);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), config = ?path, "starting knockrelay");

    let server = Server::bind(config).await?;
    server.run().await;

    Ok(())
}
