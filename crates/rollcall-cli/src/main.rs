use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;

mod client;

use client::RollcallProxy;

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance verification CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new identity
    Register {
        /// Display name
        #[arg(short, long)]
        name: String,
        /// External roll / reference code
        #[arg(short, long)]
        roll: String,
    },
    /// Enroll descriptor samples for an identity
    Enroll {
        /// Identity UUID
        #[arg(short, long)]
        identity: String,
        /// Path to a JSON file with an array of {values, quality} samples
        #[arg(short, long)]
        file: String,
        /// Replace the existing descriptor set instead of appending
        #[arg(long)]
        replace: bool,
    },
    /// Verify a probe descriptor and record attendance
    Verify {
        /// Subject / class the attendance is for
        #[arg(short, long)]
        subject: String,
        /// Path to a JSON file with the probe descriptor
        #[arg(short, long)]
        file: String,
        /// Attach the event to a session
        #[arg(long)]
        session: Option<String>,
    },
    /// Manage QR attendance sessions
    #[command(subcommand)]
    Session(SessionCommands),
    /// Query the attendance ledger
    Query {
        #[arg(long)]
        subject: Option<String>,
        /// Calendar day, YYYY-MM-DD
        #[arg(long)]
        day: Option<String>,
        #[arg(long)]
        identity: Option<String>,
        #[arg(long)]
        session: Option<String>,
    },
    /// Administratively purge ledger events matching the filters
    Purge {
        #[arg(long)]
        subject: Option<String>,
        #[arg(long)]
        day: Option<String>,
        #[arg(long)]
        identity: Option<String>,
        #[arg(long)]
        session: Option<String>,
    },
    /// Show daemon status
    Status,
}

#[derive(Subcommand)]
enum SessionCommands {
    /// Create a session and print its token payload
    Create {
        #[arg(short, long)]
        subject: String,
        /// Creator id recorded on the session
        #[arg(long)]
        creator: Option<String>,
        /// Session duration in minutes (daemon default if omitted)
        #[arg(long)]
        duration: Option<i64>,
        /// Minutes after which a scan counts as late
        #[arg(long)]
        late_threshold: Option<i64>,
        /// Reject scans past the late threshold instead of marking late
        #[arg(long)]
        no_late_entry: bool,
        /// Maximum number of attendees
        #[arg(long)]
        capacity: Option<u32>,
    },
    /// Validate a scanned session token (phase one)
    Scan {
        /// Raw token payload, or a path to a file holding it
        payload: String,
    },
    /// Record attendance for an identity under a session (phase two)
    Mark {
        #[arg(short, long)]
        session: String,
        #[arg(short, long)]
        identity: String,
    },
    /// Explicitly end a session
    End { session: String },
    /// Show aggregates for a session
    Stats { session: String },
    /// List sessions currently accepting scans
    List,
}

/// Replies are JSON strings; pretty-print them for the terminal.
fn print_reply(reply: &str) {
    match serde_json::from_str::<serde_json::Value>(reply) {
        Ok(value) => println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default()),
        Err(_) => println!("{reply}"),
    }
}

fn read_payload_arg(payload: &str) -> Result<String> {
    if std::path::Path::new(payload).exists() {
        std::fs::read_to_string(payload).context("reading payload file")
    } else {
        Ok(payload.to_owned())
    }
}

fn filters_json(
    subject: Option<String>,
    day: Option<String>,
    identity: Option<String>,
    session: Option<String>,
) -> String {
    json!({
        "subject": subject,
        "day": day,
        "identity_id": identity,
        "session_id": session,
    })
    .to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let connection = zbus::Connection::session()
        .await
        .context("connecting to the session bus — is rollcalld running?")?;
    let proxy = RollcallProxy::new(&connection).await?;

    match cli.command {
        Commands::Register { name, roll } => {
            let reply = proxy.register_identity(&name, &roll).await?;
            print_reply(&reply);
        }
        Commands::Enroll { identity, file, replace } => {
            let descriptors =
                std::fs::read_to_string(&file).context("reading descriptor file")?;
            let reply = proxy.enroll(&identity, &descriptors, replace).await?;
            print_reply(&reply);
        }
        Commands::Verify { subject, file, session } => {
            let probe = std::fs::read_to_string(&file).context("reading probe file")?;
            let reply = proxy
                .verify_face(&subject, &probe, session.as_deref().unwrap_or(""))
                .await?;
            print_reply(&reply);
        }
        Commands::Session(command) => match command {
            SessionCommands::Create {
                subject,
                creator,
                duration,
                late_threshold,
                no_late_entry,
                capacity,
            } => {
                let request = json!({
                    "subject": subject,
                    "created_by": creator,
                    "duration_minutes": duration,
                    "late_threshold_minutes": late_threshold,
                    "allow_late_entry": !no_late_entry,
                    "capacity": capacity,
                })
                .to_string();
                let reply = proxy.create_session(&request).await?;
                print_reply(&reply);
            }
            SessionCommands::Scan { payload } => {
                let payload = read_payload_arg(&payload)?;
                let reply = proxy.scan_session_token(&payload).await?;
                print_reply(&reply);
            }
            SessionCommands::Mark { session, identity } => {
                let reply = proxy.scan_identity_token(&session, &identity).await?;
                print_reply(&reply);
            }
            SessionCommands::End { session } => {
                let reply = proxy.end_session(&session).await?;
                print_reply(&reply);
            }
            SessionCommands::Stats { session } => {
                let reply = proxy.session_stats(&session).await?;
                print_reply(&reply);
            }
            SessionCommands::List => {
                let reply = proxy.active_sessions().await?;
                print_reply(&reply);
            }
        },
        Commands::Query { subject, day, identity, session } => {
            let reply = proxy
                .query_events(&filters_json(subject, day, identity, session))
                .await?;
            print_reply(&reply);
        }
        Commands::Purge { subject, day, identity, session } => {
            let reply = proxy
                .purge_events(&filters_json(subject, day, identity, session))
                .await?;
            print_reply(&reply);
        }
        Commands::Status => {
            let reply = proxy.status().await?;
            print_reply(&reply);
        }
    }

    Ok(())
}
