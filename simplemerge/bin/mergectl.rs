//! Command-line utility for a running simplemerge daemon
//!
//! This tool talks to the daemon's control socket to:
//! - Watch campaign progress per sender
//! - Stop the running campaign
//! - Preview the template with sample values
//! - Read and answer the unified inbox

#![allow(clippy::single_match_else)]

use clap::{Parser, Subcommand};
use simplemerge_campaign::{ProgressSnapshot, RecipientOutcome, inbox::ThreadSummary};
use simplemerge_control::{
    CampaignCommand, ControlClient, DEFAULT_CONTROL_SOCKET, InboxCommand, RequestCommand,
    ResponseData, SystemCommand, protocol::format_timestamp,
};

/// Command-line utility for a running simplemerge daemon
#[derive(Parser, Debug)]
#[command(name = "mergectl")]
#[command(about = "Control a running simplemerge campaign", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the control socket
    #[arg(short = 'c', long, default_value = DEFAULT_CONTROL_SOCKET)]
    control_socket: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show per-sender progress of the current run
    Status {
        /// Watch mode - continuously update progress
        #[arg(long)]
        watch: bool,

        /// Update interval in seconds (for watch mode)
        #[arg(long, default_value = "2")]
        interval: u64,

        /// List every recipient handled so far
        #[arg(long)]
        recipients: bool,
    },
    /// Show daemon information
    Info,
    /// Ask the running campaign to stop
    Stop,
    /// Check the daemon is responding
    Ping,
    /// Render the configured template with sample values
    Preview,
    /// List the newest inbox threads across every sender
    Inbox {
        /// Threads fetched per sender account
        #[arg(long, default_value = "10")]
        max: usize,
    },
    /// Reply to an inbox thread as the sender that owns it
    Reply {
        /// Thread id, as shown by `mergectl inbox`
        thread_id: String,

        /// HTML body of the reply
        #[arg(long)]
        body: String,

        /// Only consider threads in this sender's inbox
        #[arg(long)]
        account: Option<String>,

        /// Threads fetched per sender account while looking up the thread
        #[arg(long, default_value = "10")]
        max: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let client = check_control_socket(&cli.control_socket)?;

    match cli.command {
        Commands::Status {
            watch,
            interval,
            recipients,
        } => cmd_status(client, watch, interval, recipients).await,
        Commands::Info => cmd_info(&client).await,
        Commands::Stop => {
            println!("✓ {}", client.stop().await?);
            Ok(())
        }
        Commands::Ping => {
            client.ping().await?;
            println!("✓ Pong! simplemerge is responding");
            Ok(())
        }
        Commands::Preview => cmd_preview(&client).await,
        Commands::Inbox { max } => cmd_inbox(&client, max).await,
        Commands::Reply {
            thread_id,
            body,
            account,
            max,
        } => cmd_reply(&client, &thread_id, body, account.as_deref(), max).await,
    }
}

/// Check control socket connectivity and return client
fn check_control_socket(socket_path: &str) -> anyhow::Result<ControlClient> {
    let client = ControlClient::new(socket_path);

    if let Err(e) = client.check_socket_exists() {
        anyhow::bail!(
            "Cannot connect to simplemerge control socket at {socket_path}.\n\
             Error: {e}\n\
             \n\
             Is a campaign running?\n\
             You can configure the socket path with --control-socket or in simplemerge.config.ron"
        );
    }

    Ok(client)
}

async fn fetch(client: &ControlClient, command: RequestCommand) -> anyhow::Result<ResponseData> {
    client
        .command(command)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Server returned no data"))
}

/// Show campaign progress
async fn cmd_status(
    client: ControlClient,
    watch: bool,
    interval: u64,
    recipients: bool,
) -> anyhow::Result<()> {
    if watch {
        let client = client.with_persistent_connection();
        loop {
            let data = fetch(&client, RequestCommand::Campaign(CampaignCommand::Progress)).await?;

            // Clear screen
            print!("\x1B[2J\x1B[1;1H");

            let terminal = match data {
                ResponseData::Progress(progress) => {
                    display_progress(&progress, recipients);
                    progress.phase.is_terminal()
                }
                other => anyhow::bail!("Unexpected response for status: {other:?}"),
            };

            if terminal {
                return Ok(());
            }

            println!("\nPress Ctrl+C to exit");
            tokio::time::sleep(std::time::Duration::from_secs(interval)).await;
        }
    }

    match fetch(&client, RequestCommand::Campaign(CampaignCommand::Progress)).await? {
        ResponseData::Progress(progress) => display_progress(&progress, recipients),
        other => anyhow::bail!("Unexpected response for status: {other:?}"),
    }

    Ok(())
}

fn display_progress(progress: &ProgressSnapshot, recipients: bool) {
    println!("=== Campaign {} ===", progress.run_id);
    println!();
    println!(
        "Phase:     {}{}",
        progress.phase,
        if progress.dry_run { " (dry run)" } else { "" }
    );
    if let Some(subject) = &progress.subject {
        println!("Subject:   {subject}");
    }
    println!(
        "Sent:      {} / {}",
        progress.total_sent, progress.total_goal
    );
    println!("Rounds:    {}", progress.rounds);
    if progress.ledger_failures > 0 {
        println!("Ledger write failures: {}", progress.ledger_failures);
    }
    println!();

    println!("{:<36} {:<24} {:>6}  STATUS", "SENDER", "TARGET", "SENT");
    for row in &progress.senders {
        println!(
            "{:<36} {:<24} {:>6}  {}",
            row.sender,
            row.target.as_deref().unwrap_or("-"),
            row.sent,
            row.status
        );

        if recipients {
            for report in &row.recipients {
                let outcome = match &report.outcome {
                    RecipientOutcome::Sent => "sent".to_string(),
                    RecipientOutcome::Simulated => "sent (dry run)".to_string(),
                    RecipientOutcome::Skipped => "skipped".to_string(),
                    RecipientOutcome::Errored(reason) => format!("error: {reason}"),
                };
                println!("    → {:<40} {outcome}", report.address);
            }
        }
    }
}

/// Show daemon information
async fn cmd_info(client: &ControlClient) -> anyhow::Result<()> {
    match fetch(client, RequestCommand::System(SystemCommand::Status)).await? {
        ResponseData::SystemStatus(status) => {
            println!("=== simplemerge ===\n");
            println!("Version:   {}", status.version);
            println!("Uptime:    {}", format_duration(status.uptime_secs));
            println!("Senders:   {}", status.senders);
            println!("Dry run:   {}", if status.dry_run { "yes" } else { "no" });
            match (status.run_id, status.phase) {
                (Some(run_id), Some(phase)) => println!("Run:       {run_id} ({phase})"),
                _ => println!("Run:       none"),
            }
        }
        other => anyhow::bail!("Unexpected response for info: {other:?}"),
    }

    Ok(())
}

/// Show the template rendered with sample values
async fn cmd_preview(client: &ControlClient) -> anyhow::Result<()> {
    match fetch(client, RequestCommand::Campaign(CampaignCommand::Preview)).await? {
        ResponseData::Preview(preview) => print!("{preview}"),
        other => anyhow::bail!("Unexpected response for preview: {other:?}"),
    }

    Ok(())
}

async fn list_inbox(client: &ControlClient, max: usize) -> anyhow::Result<Vec<ThreadSummary>> {
    match fetch(
        client,
        RequestCommand::Inbox(InboxCommand::List {
            max_per_account: max,
        }),
    )
    .await?
    {
        ResponseData::Inbox(threads) => Ok(threads),
        other => anyhow::bail!("Unexpected response for inbox: {other:?}"),
    }
}

/// Show the unified inbox
async fn cmd_inbox(client: &ControlClient, max: usize) -> anyhow::Result<()> {
    let threads = list_inbox(client, max).await?;

    if threads.is_empty() {
        println!("No threads found");
        return Ok(());
    }

    println!("=== Inbox ({} threads) ===\n", threads.len());
    println!(
        "{:<24} {:<18} {:<28} {:<30} SUBJECT",
        "RECEIVED", "THREAD", "ACCOUNT", "FROM"
    );
    for thread in &threads {
        println!(
            "{:<24} {:<18} {:<28} {:<30} {}",
            format_timestamp(thread.last_message_at),
            thread.thread_id,
            thread.account,
            truncate(&thread.counterpart, 30),
            thread.subject
        );
        if !thread.snippet.is_empty() {
            println!("    {}", truncate(&thread.snippet, 100));
        }
    }

    Ok(())
}

/// Reply to a thread found in the unified inbox
async fn cmd_reply(
    client: &ControlClient,
    thread_id: &str,
    body: String,
    account: Option<&str>,
    max: usize,
) -> anyhow::Result<()> {
    let thread = list_inbox(client, max)
        .await?
        .into_iter()
        .find(|thread| {
            thread.thread_id == thread_id && account.is_none_or(|account| thread.account == account)
        })
        .ok_or_else(|| {
            anyhow::anyhow!("Thread {thread_id} is not among the newest {max} threads of any sender")
        })?;

    match fetch(
        client,
        RequestCommand::Inbox(InboxCommand::Reply { thread, body }),
    )
    .await?
    {
        ResponseData::Message(message) => println!("✓ {message}"),
        other => anyhow::bail!("Unexpected response for reply: {other:?}"),
    }

    Ok(())
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        text.to_string()
    } else {
        let mut short: String = text.chars().take(width.saturating_sub(1)).collect();
        short.push('…');
        short
    }
}

/// Format duration in human-readable form
fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        let mins = secs / 60;
        let rem_secs = secs % 60;
        format!("{mins}m {rem_secs}s")
    } else if secs < 86400 {
        let hours = secs / 3600;
        let rem_mins = (secs % 3600) / 60;
        format!("{hours}h {rem_mins}m")
    } else {
        let days = secs / 86400;
        let rem_hours = (secs % 86400) / 3600;
        format!("{days}d {rem_hours}h")
    }
}
