use std::path::PathBuf;

use clap::Parser;
use goallist::config::Config;
use goallist::error::Result;
use goallist::server;

#[derive(Parser, Debug)]
#[command(name = "goallistd")]
#[command(about = "Goal list web daemon")]
#[command(version = goallist::version())]
struct Cli {
    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    /// SQLite database path; overrides the config file and `GOALLIST_DB`.
    #[arg(long)]
    db: Option<String>,

    /// JSON configuration file; convention defaults are used when omitted.
    #[arg(long, env = "GOALLIST_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    goallist::logging::init_tracing("goallistd");
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref(), cli.db.as_deref())?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    server::run_with_shutdown(config, async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to listen for Ctrl-C");
            futures::future::pending::<()>().await;
        }
        tracing::info!("Shutdown requested");
    })
    .await
}
