//! factreel CLI entry point.
//!
//! `invoke` runs the handler once with an event built from flags or a file;
//! `youtube-token` mints the refresh token the video publisher needs.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;

use factreel::handler;
use factreel::oauth::{run_installed_flow, ClientSecrets};
use factreel::observability::{init_tracing, LogFormat};

#[derive(Parser, Debug)]
#[command(name = "factreel")]
#[command(about = "Generate a fact, render it as a video and publish it")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log output format (text or json)
    #[arg(long, env = "FACTREEL_LOG_FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Load environment variables from this file instead of ./.env
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the handler once and print the response JSON
    Invoke {
        /// Action to run (generate_fact, create_video, full_pipeline)
        #[arg(short, long)]
        action: Option<String>,

        /// Read the event from a JSON file ("-" for stdin)
        #[arg(short, long)]
        event: Option<String>,

        /// Fact to use instead of generating one, as a JSON object
        #[arg(long)]
        fact_json: Option<String>,

        /// Pretty-print the response
        #[arg(long)]
        pretty: bool,
    },

    /// Run the OAuth consent flow and print YouTube credentials
    YoutubeToken {
        /// Client secrets file downloaded from the cloud console
        #[arg(long)]
        client_secrets: PathBuf,

        /// Loopback port for the redirect (0 picks a free port)
        #[arg(long, default_value = "0")]
        port: u16,
    },
}

fn read_event(source: Option<&str>) -> anyhow::Result<serde_json::Value> {
    let text = match source {
        None => return Ok(serde_json::json!({})),
        Some("-") => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("reading event from stdin")?;
            buf
        }
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading event file {path}"))?,
    };
    let event: serde_json::Value = serde_json::from_str(&text).context("parsing event JSON")?;
    if !event.is_object() {
        bail!("event must be a JSON object");
    }
    Ok(event)
}

fn build_event(
    action: Option<String>,
    event: Option<&str>,
    fact_json: Option<&str>,
) -> anyhow::Result<serde_json::Value> {
    let mut event = read_event(event)?;
    if let Some(map) = event.as_object_mut() {
        if let Some(action) = action {
            map.insert("action".to_string(), serde_json::Value::String(action));
        }
        if let Some(fact) = fact_json {
            let fact: serde_json::Value =
                serde_json::from_str(fact).context("parsing --fact-json")?;
            map.insert("fact_data".to_string(), fact);
        }
    }
    Ok(event)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.env_file {
        Some(path) => {
            dotenvy::from_path(path)
                .with_context(|| format!("loading env file {}", path.display()))?;
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }

    init_tracing(cli.log_format).context("installing tracing subscriber")?;

    match cli.command {
        Commands::Invoke {
            action,
            event,
            fact_json,
            pretty,
        } => {
            let event = build_event(action, event.as_deref(), fact_json.as_deref())?;
            let response = handler::invoke_from_env(&event).await;
            let value = response.to_value();
            let out = if pretty {
                serde_json::to_string_pretty(&value)?
            } else {
                serde_json::to_string(&value)?
            };
            println!("{out}");
            if response.is_error() {
                std::process::exit(1);
            }
        }

        Commands::YoutubeToken {
            client_secrets,
            port,
        } => {
            let secrets = ClientSecrets::load(&client_secrets)?;
            let refresh_token = run_installed_flow(&secrets, port).await?;
            println!("YOUTUBE_CLIENT_ID={}", secrets.client_id);
            println!("YOUTUBE_CLIENT_SECRET={}", secrets.client_secret);
            println!("YOUTUBE_REFRESH_TOKEN={refresh_token}");
        }
    }

    Ok(())
}
