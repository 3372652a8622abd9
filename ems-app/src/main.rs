//! EMS assistant binary: HTTP chat service plus admin subcommands.

mod assistant;
mod config;
mod http_auth;
mod init;
mod routes;
mod server;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Debug, Parser)]
#[command(name = "ems", version, about = "Event management assistant")]
struct Cli {
    /// Config file (defaults to ~/.ems/config.toml).
    #[arg(long, global = true, env = "EMS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the HTTP service (default).
    Serve,
    /// Write the config template and create the database schema (idempotent).
    Init,
    /// Validate config, open the store and report what would be served.
    Doctor,
    /// Send one message as `username` and print the assistant's reply.
    Chat { username: String, message: String },
    /// Mark an organizer application as approved.
    ApproveOrganizer { id: i64 },
    /// Mark an organizer application as rejected.
    RejectOrganizer { id: i64 },
    /// Delete every expired pending action.
    PurgePending,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("ignoring unreadable .env: {e}");
        }
    }
    init_tracing()?;
    install_panic_hook();

    let cli = Cli::parse();
    let config_path = cli.config;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => server::serve(config_path).await,
        Command::Init => {
            let report = init::initialize(config_path).await?;
            if report.config_created {
                println!("ems init: wrote {}", report.config_path.display());
            } else {
                println!(
                    "ems init: kept existing config {}",
                    report.config_path.display()
                );
            }
            println!("ems init: database ready at {}", report.database);
            Ok(())
        }
        Command::Doctor => server::doctor(config_path).await,
        Command::Chat { username, message } => {
            let reply = server::chat_one_shot(config_path, &username, &message).await?;
            println!("{reply}");
            Ok(())
        }
        Command::ApproveOrganizer { id } => {
            server::set_organizer_status(config_path, id, ems_store::OrganizerStatus::Approved)
                .await
        }
        Command::RejectOrganizer { id } => {
            server::set_organizer_status(config_path, id, ems_store::OrganizerStatus::Rejected)
                .await
        }
        Command::PurgePending => {
            let purged = server::purge_pending(config_path).await?;
            println!("ems: purged {purged} expired pending action(s)");
            Ok(())
        }
    }
}

fn init_tracing() -> anyhow::Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(v) => v,
        Err(_) => EnvFilter::new(
            "info,ems=debug,ems_app=debug,ems_store=debug,ems_llm=debug,tower_http=info",
        ),
    };
    let log_format = std::env::var("EMS_LOG_FORMAT")
        .unwrap_or_else(|_| "json".to_string())
        .to_ascii_lowercase();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr);

    match log_format.as_str() {
        "json" => builder
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(true)
            .init(),
        "pretty" => builder.pretty().init(),
        "compact" => builder.compact().init(),
        other => {
            return Err(anyhow::anyhow!(
                "unsupported EMS_LOG_FORMAT={other:?}; expected one of: json, pretty, compact"
            ));
        }
    }

    tracing::info!(
        log_format = %log_format,
        env_filter = ?std::env::var("RUST_LOG").ok(),
        "tracing initialized"
    );
    Ok(())
}

fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = panic_payload_to_string(panic_info.payload());
        tracing::error!(
            panic_location = %location,
            panic_payload = %payload,
            "panic captured"
        );
        default_hook(panic_info);
    }));
}

fn panic_payload_to_string(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        return msg.to_string();
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg.clone();
    }
    "non-string panic payload".to_string()
}
