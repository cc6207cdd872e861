use std::sync::Arc;

use agent_headless::args::Cli;
use agent_headless::config::{HeadlessConfig, InputFormat};
use agent_headless::output::OutputWriter;
use agent_headless::session::Session;
use agent_headless::tools::LocalTools;
use agent_headless::{build_transport, logging};
use anyhow::Context;
use clap::Parser;
use tokio::io::BufReader;
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init();

    let config = HeadlessConfig::from_cli(&cli).context("invalid configuration")?;
    let workspace = match &config.workspace {
        Some(path) => path.clone(),
        None => std::env::current_dir().context("failed to resolve current directory")?,
    };
    let tools = Arc::new(LocalTools::new(workspace).map_err(anyhow::Error::msg)?);
    let transport = build_transport(&config).context("failed to initialize agent transport")?;

    let session_id = Uuid::new_v4().to_string();
    let output = Arc::new(OutputWriter::stdio(config.output_format, session_id.clone()));
    let session = Session::new(&config, session_id, transport, tools, output.clone());

    let handle = session.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received interrupt signal; shutting down");
            handle.shutdown();
        }
    });

    let read_stdin = config.input_format == InputFormat::StreamJson || config.prompt.is_none();
    let input = read_stdin.then(|| BufReader::new(tokio::io::stdin()));
    let exit = session.run(input).await;
    output.finish();

    // A pending blocking stdin read would otherwise hold the runtime open.
    std::process::exit(i32::from(exit.code()))
}
