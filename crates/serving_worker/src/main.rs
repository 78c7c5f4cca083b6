use clap::Parser;
use serving_worker::{
    config::Config,
    lifecycle,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    let _tracing_guard = cmd_util::env::config_service(Some(&config.log_path()))?;
    tracing::info!(?config, "starting serving worker");
    lifecycle::run(config).await
}
