//! Geekmarks CLI - query a Geekmarks server with the stored token.
//!
//! This is the main binary entry point. See the `geekmarks_hub` library
//! for the core functionality.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use geekmarks_hub::credentials::{self, CredentialStore};
use geekmarks_hub::{ClientFactory, Config, RpcCall};
use mimalloc::MiMalloc;

/// Global allocator configured per M-MIMALLOC-APPS guideline.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "geekmarks")]
#[command(version, about = "Geekmarks bookmark server client")]
struct Cli {
    /// Seconds to wait for the server before giving up
    #[arg(long, global = true, default_value_t = 30)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Find tags matching a pattern
    Tags {
        /// Pattern to match tag paths against
        pattern: String,
        /// Include a suggestion for a tag that does not exist yet
        #[arg(long)]
        allow_new: bool,
    },
    /// Print the whole tag tree
    Tree,
    /// List bookmarks by URL or by tags
    Bookmarks {
        /// Bookmarks saved for this URL
        #[arg(long, conflicts_with = "tag_id")]
        url: Option<String>,
        /// Bookmarks carrying all of these tags
        #[arg(long = "tag-id", required_unless_present = "url")]
        tag_id: Vec<u64>,
    },
    /// Print one bookmark
    Bookmark {
        /// Bookmark id
        id: u64,
    },
    /// Store an auth token obtained elsewhere
    SetToken {
        /// Token issued by the server
        token: String,
    },
    /// Forget the stored token
    Logout,
    /// Print the effective configuration
    Config,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli.command, Duration::from_secs(cli.timeout))) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands, timeout: Duration) -> Result<ExitCode> {
    let config = Config::load()?;

    let call = match command {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            return Ok(ExitCode::SUCCESS);
        }
        Commands::SetToken { token } => {
            let store = credentials::default_store()?;
            store
                .set(credentials::Credentials::with_token(token))
                .await
                .context("Failed to store token")?;
            println!("Token saved.");
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Logout => {
            let factory = ClientFactory::new(config, Arc::from(credentials::default_store()?))?;
            factory.logout().await?;
            println!("Logged out.");
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Tags { pattern, allow_new } => RpcCall::GetTagsByPattern { pattern, allow_new },
        Commands::Tree => RpcCall::GetTagsTree,
        Commands::Bookmarks { url: Some(url), .. } => RpcCall::GetBookmarksByUrl { url },
        Commands::Bookmarks { url: None, tag_id } => RpcCall::GetTaggedBookmarks { tag_ids: tag_id },
        Commands::Bookmark { id } => RpcCall::GetBookmarkById { id },
    };

    let factory = ClientFactory::new(config, Arc::from(credentials::default_store()?))?;
    let Some(client) = factory.create_logged_in().await? else {
        eprintln!("Not logged in. Run `geekmarks set-token <token>` first.");
        return Ok(ExitCode::FAILURE);
    };

    log::info!("Calling {}", call.func_name());
    let response = client.call_with_timeout(&call, timeout).await;
    client.close();
    let response = response.with_context(|| format!("{} failed", call.func_name()))?;

    println!("{}", serde_json::to_string_pretty(&response.body)?);
    if response.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!("Server answered {}", response.status);
        Ok(ExitCode::FAILURE)
    }
}
