//! xpost-queue - Manage scheduled posts
//!
//! Unix-style tool for inspecting and editing the scheduled post queue. It
//! never publishes; xpost-send picks up every change on its next sync.

use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand};
use libcrosspost::config::resolve_db_path;
use libcrosspost::scheduling::parse_schedule;
use libcrosspost::{
    build_workflow, logging, Config, CrosspostError, Database, PostStatus, QueueStats, Result,
    ScheduledPost, Scheduler,
};

#[derive(Parser, Debug)]
#[command(name = "xpost-queue")]
#[command(version)]
#[command(about = "Manage scheduled posts")]
#[command(long_about = "\
xpost-queue - Manage scheduled posts

COMMANDS:
    list        List scheduled posts, soonest first
    show        Show one post
    cancel      Cancel a pending post
    update      Change the caption or time of a pending post
    stats       Show counts per status and the next post due

USAGE EXAMPLES:
    xpost-queue list --status pending
    xpost-queue list --format json
    xpost-queue cancel <POST_ID>
    xpost-queue update <POST_ID> --at \"tomorrow 3pm\"
    xpost-queue update <POST_ID> --caption \"New caption\"
    xpost-queue stats

CONFIGURATION:
    Configuration file: ~/.config/crosspost/config.toml
    Database location: ~/.local/share/crosspost/schedule.db

    Override with environment variables:
        CROSSPOST_CONFIG    - Path to config file
        CROSSPOST_DB_PATH   - Path to database file

EXIT CODES:
    0 - Success
    1 - Operation failed
    3 - Invalid input (unknown post ID, post not pending, bad time)
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List scheduled posts
    List {
        /// Only posts with this status (pending, published, failed, cancelled)
        #[arg(short, long)]
        status: Option<String>,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show a single post
    Show {
        post_id: String,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Cancel a pending post
    Cancel { post_id: String },

    /// Change a pending post
    Update {
        post_id: String,

        /// New caption
        #[arg(long)]
        caption: Option<String>,

        /// New time (e.g. "tomorrow 3pm", "2h", RFC 3339)
        #[arg(long, value_name = "TIME")]
        at: Option<String>,
    },

    /// Show queue statistics
    Stats {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_from_env(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let db_path = resolve_db_path(Some(&config.database.path))?;
    let db = Database::new(&db_path.to_string_lossy()).await?;
    let scheduler = Scheduler::open(db, Arc::new(build_workflow(&config)?)).await?;

    match cli.command {
        Commands::List { status, format } => cmd_list(&scheduler, status.as_deref(), &format).await,
        Commands::Show { post_id, format } => cmd_show(&scheduler, &post_id, &format).await,
        Commands::Cancel { post_id } => {
            scheduler.cancel(&post_id).await?;
            println!("Cancelled {}", post_id);
            Ok(())
        }
        Commands::Update {
            post_id,
            caption,
            at,
        } => cmd_update(&scheduler, &post_id, caption, at.as_deref()).await,
        Commands::Stats { format } => cmd_stats(&scheduler, &format).await,
    }
}

fn validate_format(format: &str) -> Result<()> {
    if format != "text" && format != "json" {
        return Err(CrosspostError::InvalidInput(format!(
            "Invalid format '{}'. Must be 'text' or 'json'",
            format
        )));
    }
    Ok(())
}

async fn cmd_list(scheduler: &Scheduler, status: Option<&str>, format: &str) -> Result<()> {
    validate_format(format)?;
    let status = status.map(str::parse::<PostStatus>).transpose()?;
    let posts = scheduler.posts(status).await;

    if format == "json" {
        println!("{}", serde_json::json!(posts));
        return Ok(());
    }

    let now = Utc::now();
    for post in &posts {
        println!(
            "{} | {} | {} | {} | {}",
            post.id,
            post.status,
            describe_time(now, post),
            platform_list(post),
            truncate_content(&post.caption, 50)
        );
    }
    Ok(())
}

async fn cmd_show(scheduler: &Scheduler, post_id: &str, format: &str) -> Result<()> {
    validate_format(format)?;
    let post = scheduler
        .get(post_id)
        .await
        .ok_or_else(|| CrosspostError::NotFound("Post not found".to_string()))?;

    if format == "json" {
        println!("{}", serde_json::json!(post));
        return Ok(());
    }

    println!("ID:        {}", post.id);
    println!("Status:    {}", post.status);
    println!("Scheduled: {} ({})", local_time(post.scheduled_time), describe_time(Utc::now(), &post));
    println!("Created:   {}", local_time(post.created_at));
    println!("Platforms: {}", platform_list(&post));
    println!("Image:     {}", post.image_ref);
    println!("Caption:\n{}", post.caption);
    Ok(())
}

async fn cmd_update(
    scheduler: &Arc<Scheduler>,
    post_id: &str,
    caption: Option<String>,
    at: Option<&str>,
) -> Result<()> {
    if caption.is_none() && at.is_none() {
        return Err(CrosspostError::InvalidInput(
            "Nothing to update: pass --caption and/or --at".to_string(),
        ));
    }
    let scheduled_time = at.map(parse_schedule).transpose()?;
    scheduler.update(post_id, caption, scheduled_time).await?;
    println!("Updated {}", post_id);
    Ok(())
}

async fn cmd_stats(scheduler: &Scheduler, format: &str) -> Result<()> {
    validate_format(format)?;
    let stats = scheduler.stats().await;

    if format == "json" {
        println!("{}", stats_json(&stats));
        return Ok(());
    }

    println!("Pending:   {}", stats.pending);
    println!("Published: {}", stats.published);
    println!("Failed:    {}", stats.failed);
    println!("Cancelled: {}", stats.cancelled);
    println!("Total:     {}", stats.total());
    if let Some((id, due)) = &stats.next_due {
        println!("Next due:  {} at {}", id, local_time(*due));
    }
    Ok(())
}

fn stats_json(stats: &QueueStats) -> serde_json::Value {
    serde_json::json!({
        "pending": stats.pending,
        "published": stats.published,
        "failed": stats.failed,
        "cancelled": stats.cancelled,
        "total": stats.total(),
        "next_due": stats.next_due.as_ref().map(|(id, due)| {
            serde_json::json!({ "id": id, "scheduled_time": due })
        }),
    })
}

fn platform_list(post: &ScheduledPost) -> String {
    post.platforms
        .iter()
        .map(|p| p.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

fn local_time(time: DateTime<Utc>) -> String {
    time.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

/// Truncate content to `max_chars` characters with ellipsis
fn truncate_content(content: &str, max_chars: usize) -> String {
    let single_line = content.replace('\n', " ");
    if single_line.chars().count() <= max_chars {
        single_line
    } else {
        let head: String = single_line.chars().take(max_chars).collect();
        format!("{}...", head)
    }
}

fn describe_time(now: DateTime<Utc>, post: &ScheduledPost) -> String {
    if post.status.is_terminal() {
        return local_time(post.scheduled_time);
    }
    format_time_until(now, post.scheduled_time)
}

/// Format time until scheduled time in human-readable format
fn format_time_until(now: DateTime<Utc>, scheduled: DateTime<Utc>) -> String {
    let diff = (scheduled - now).num_seconds();

    if diff < 0 {
        return "overdue".to_string();
    }

    let minutes = diff / 60;
    let hours = minutes / 60;
    let days = hours / 24;

    if days > 0 {
        format!("in {} day{}", days, if days == 1 { "" } else { "s" })
    } else if hours > 0 {
        format!("in {} hour{}", hours, if hours == 1 { "" } else { "s" })
    } else if minutes > 0 {
        format!("in {} minute{}", minutes, if minutes == 1 { "" } else { "s" })
    } else {
        "in <1 minute".to_string()
    }
}
