// ============================================================================
// joingate-db — CLI inspection tool for the JoinGate status store
// ============================================================================
// Usage:
//   joingate-db stats                              Show verification statistics
//   joingate-db show --user ID                     Show one user's record
//   joingate-db list [--verified | --pending]      List records
//   joingate-db set --user ID --field F --value V  Overwrite one field
//   joingate-db export --format json               Export all records as JSON
// ============================================================================

use anyhow::Result;
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use joingate_core::{StatusStore, StatusUpdate, StoreError, VerificationRecord};

/// JoinGate status store inspection tool
#[derive(Parser)]
#[command(name = "joingate-db", version, about = "Inspect and manage the JoinGate verification store")]
struct Cli {
    /// Path to the database file (default: ~/.joingate/status.redb)
    #[arg(long, global = true)]
    db_path: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show verification statistics
    Stats,

    /// Show a single user's verification record
    Show {
        #[arg(long)]
        user: i64,
    },

    /// List verification records
    List {
        /// Only verified users
        #[arg(long, conflicts_with = "pending")]
        verified: bool,

        /// Only users still pending verification
        #[arg(long)]
        pending: bool,
    },

    /// Overwrite one field of an existing record
    Set {
        #[arg(long)]
        user: i64,

        /// has_joined_channel, has_joined_group, verified, prompt_message_ref
        #[arg(long)]
        field: String,

        /// true/false for flags, CHAT_ID:MESSAGE_ID or none for prompt_message_ref
        #[arg(long)]
        value: String,
    },

    /// Export all records as JSON
    Export {
        /// Output format (currently only json is supported)
        #[arg(long, default_value = "json")]
        format: String,
    },
}

fn format_timestamp(ts: i64) -> String {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| format!("(invalid: {})", ts))
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let store = StatusStore::open(cli.db_path.as_deref())?;

    match cli.command {
        Commands::Stats => cmd_stats(&store),
        Commands::Show { user } => cmd_show(&store, user),
        Commands::List { verified, pending } => {
            let filter = match (verified, pending) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            cmd_list(&store, filter)
        }
        Commands::Set { user, field, value } => cmd_set(&store, user, &field, &value),
        Commands::Export { format } => cmd_export(&store, &format),
    }
}

fn cmd_stats(store: &StatusStore) -> Result<()> {
    let stats = store.stats()?;

    println!("=== JoinGate Verification Stats ===");
    println!("Database: {}", store.path().display());
    println!();
    println!("Users:    {} total", stats.total_users);
    println!("  {:12} {}", "verified", stats.verified_users);
    println!("  {:12} {}", "pending", stats.pending_users);
    println!("  {:12} {}", "prompted", stats.prompted_users);

    Ok(())
}

fn print_record(record: &VerificationRecord) {
    println!("User:        {}", record.user_id);
    println!("Channel:     {}", yes_no(record.has_joined_channel));
    println!("Group:       {}", yes_no(record.has_joined_group));
    println!("Verified:    {}", yes_no(record.verified));
    match record.prompt_message_ref {
        Some(m) => println!("Prompt:      chat {} message {}", m.chat_id, m.message_id),
        None => println!("Prompt:      -"),
    }
    println!("Created:     {}", format_timestamp(record.created_at));
    println!("Updated:     {}", format_timestamp(record.updated_at));
}

fn cmd_show(store: &StatusStore, user: i64) -> Result<()> {
    match store.get(user)? {
        Some(record) => print_record(&record),
        None => println!("No record for user {}.", user),
    }
    Ok(())
}

fn cmd_list(store: &StatusStore, filter: Option<bool>) -> Result<()> {
    let records = store.list(filter)?;

    if records.is_empty() {
        println!("No records found.");
        return Ok(());
    }

    println!(
        "{:<16}  {:<8}  {:<8}  {:<9}  {}",
        "USER ID", "CHANNEL", "GROUP", "VERIFIED", "UPDATED AT"
    );
    println!("{}", "-".repeat(72));

    for record in &records {
        println!(
            "{:<16}  {:<8}  {:<8}  {:<9}  {}",
            record.user_id,
            yes_no(record.has_joined_channel),
            yes_no(record.has_joined_group),
            yes_no(record.verified),
            format_timestamp(record.updated_at)
        );
    }

    println!("\nTotal: {} records", records.len());
    Ok(())
}

fn cmd_set(store: &StatusStore, user: i64, field: &str, value: &str) -> Result<()> {
    let mut update = StatusUpdate::default();
    update.set(field, value)?;

    if update.verified == Some(true) {
        let current = store.get(user)?.ok_or(StoreError::NotFound(user))?;
        if !(current.has_joined_channel && current.has_joined_group) {
            anyhow::bail!(
                "Refusing to mark user {} verified: channel={} group={}",
                user,
                current.has_joined_channel,
                current.has_joined_group
            );
        }
    }

    let record = store.update(user, &update)?;
    println!("Updated {} for user {}", field, user);
    println!();
    print_record(&record);
    Ok(())
}

fn cmd_export(store: &StatusStore, format: &str) -> Result<()> {
    if format != "json" {
        anyhow::bail!("Unsupported format '{}'. Only 'json' is supported.", format);
    }

    let records = store.list(None)?;
    let stats = store.stats()?;

    let export = serde_json::json!({
        "exported_at": Utc::now().to_rfc3339(),
        "stats": stats,
        "records": records,
    });

    println!("{}", serde_json::to_string_pretty(&export)?);
    Ok(())
}
