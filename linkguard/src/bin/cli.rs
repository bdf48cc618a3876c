//! Command-line interface for linkguard.
//!
//! Talks to the daemon over its HTTP status API.

use anyhow::Result;
use clap::{Parser, Subcommand};

use linkguard::api_client::{ApiClient, DEFAULT_URL};

#[derive(Parser, Debug)]
#[command(name = "linkguard-cli", about = "Query the linkguard daemon")]
struct Cli {
    /// Daemon API base URL.
    #[arg(long, env = "LINKGUARD_URL", default_value = DEFAULT_URL)]
    url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show overall health as JSON.
    Status,
    /// Show the link snapshot as JSON.
    Link,
    /// Exit 0 if the link is established, 1 otherwise.
    Up,
    /// Forward a remote reachability report (online/offline, 1/0, true/false).
    Report { payload: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = ApiClient::new(cli.url);

    match cli.command {
        Command::Status => {
            let health = client.health().await?;
            println!("{}", serde_json::to_string_pretty(&health)?);
        }
        Command::Link => {
            let link = client.link().await?;
            println!("{}", serde_json::to_string_pretty(&link)?);
        }
        Command::Up => {
            let up = client.link_up().await?;
            println!("{}", if up { "up" } else { "down" });
            if !up {
                std::process::exit(1);
            }
        }
        Command::Report { payload } => {
            let reply = client.report_remote(&payload).await?;
            println!("{}", reply.state);
        }
    }
    Ok(())
}
