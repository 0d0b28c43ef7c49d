#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! CLI for poking at an IMAP server with the protocol engine

use clap::{Parser, Subcommand};
use imap_engine::{Capabilities, ImapConfig, ImapEngine, TlsValidation, UntaggedResponse};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "imap-cli")]
#[command(about = "Exercise an IMAP server through the protocol engine")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Accept any TLS certificate (self-signed bridges)
    #[arg(long, global = true)]
    insecure: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Show the server greeting and capabilities
    Capabilities,

    /// List folders matching a pattern
    Folders {
        /// LIST pattern
        #[arg(long, default_value = "*")]
        pattern: String,
    },

    /// SELECT a folder and print its counters
    Select {
        /// Folder to select
        #[arg(default_value = "INBOX")]
        folder: String,
    },

    /// IDLE on a folder and print pushed updates
    Idle {
        /// Folder to watch
        #[arg(default_value = "INBOX")]
        folder: String,

        /// Seconds to stay in IDLE
        #[arg(long, default_value = "60")]
        seconds: u64,
    },

    /// Send a raw command and print its tagged result
    Raw {
        /// The command line, without tag or CRLF
        line: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = ImapConfig::from_env()?;
    let validation = if args.insecure {
        TlsValidation::AcceptAll
    } else {
        TlsValidation::Platform
    };

    let cancel = CancellationToken::new();
    let mut engine = ImapEngine::connect(&config, validation, cancel.clone()).await?;
    engine
        .authenticate(vec![], (&config.username, &config.password), cancel.clone())
        .await?;

    match &args.command {
        Command::Capabilities => {
            println!("greeting: {}", engine.greeting());
            println!("quirks:   {:?}", engine.quirks());
            println!("caps:     {:?}", engine.capabilities());
            for mech in &engine.capability_sets().auth_mechanisms {
                println!("auth:     {mech}");
            }
        }
        Command::Folders { pattern } => {
            let ids = engine.list("", pattern, cancel.clone()).await?;
            for id in ids {
                let folder = engine.folder_cache().get(id);
                println!(
                    "{}{}",
                    folder.full_name,
                    if folder.attributes.is_empty() {
                        String::new()
                    } else {
                        format!("  {:?}", folder.attributes)
                    }
                );
            }
        }
        Command::Select { folder } => {
            let id = engine.select(folder, true, cancel.clone()).await?;
            let folder = engine.folder_cache().get(id).clone();
            println!("exists:       {}", folder.exists);
            println!("recent:       {}", folder.recent);
            println!("unseen:       {}", folder.unread);
            println!("uidvalidity:  {}", folder.uid_validity);
            if let Some(uid_next) = folder.uid_next {
                println!("uidnext:      {uid_next}");
            }
        }
        Command::Idle { folder, seconds } => {
            if !engine.capabilities().contains(Capabilities::IDLE) {
                anyhow::bail!("server does not advertise IDLE");
            }
            engine.select(folder, true, cancel.clone()).await?;
            let done = CancellationToken::new();
            let timer = done.clone();
            let seconds = *seconds;
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_secs(seconds)).await;
                timer.cancel();
            });
            println!("idling on {folder} for {seconds}s...");
            engine.idle(done, cancel.clone()).await?;
            let id = engine.selected().expect("folder still selected");
            println!("exists now: {}", engine.folder_cache().get(id).exists);
        }
        Command::Raw { line } => {
            let template = format!("{line}\r\n");
            let mut cmd = engine.command(&template, vec![])?;
            cmd.on_untagged("FETCH", |_, response| {
                if let UntaggedResponse::Fetch(attrs) = response {
                    println!("fetch: {attrs:?}");
                }
                Ok(())
            });
            let cmd = engine.run(cmd).await?;
            if let Some(response) = cmd.response() {
                println!("{} {}", response.kind, response.text);
                for code in &response.codes {
                    println!("code: {code:?}");
                }
            }
        }
    }

    engine.disconnect(true).await;
    Ok(())
}
