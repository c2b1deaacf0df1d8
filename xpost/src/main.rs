//! xpost - Publish an image and caption to several platforms

use std::collections::{BTreeMap, BTreeSet};
use std::io::{IsTerminal, Read};
use std::sync::Arc;

use clap::Parser;
use libcrosspost::config::resolve_db_path;
use libcrosspost::error::PlatformError;
use libcrosspost::images::validate_image;
use libcrosspost::poster::summarize_reports;
use libcrosspost::scheduling::parse_schedule;
use libcrosspost::templates::format_hashtags;
use libcrosspost::types::{parse_platform_list, FailureKind};
use libcrosspost::{
    build_workflow, logging, Config, CrosspostError, Database, PlatformName, PlatformReport,
    PublishContent, Result, Scheduler, TemplateSet,
};

#[derive(Parser, Debug)]
#[command(name = "xpost")]
#[command(version)]
#[command(about = "Publish an image and caption to several platforms at once")]
#[command(long_about = "\
xpost - Publish an image and caption to several platforms at once

USAGE EXAMPLES:
    # Publish now to every configured platform
    xpost photo.jpg \"Sunset over the bay #sunset\"

    # Caption from stdin, selected platforms
    echo \"Hello\" | xpost photo.jpg --platform wordpress,facebook

    # Schedule for later (xpost-send publishes it)
    xpost photo.jpg \"Good morning\" --at \"tomorrow 9am\"

    # Wrap the caption in a template
    xpost photo.jpg \"Stay hungry\" --template quote --var author=Someone
    xpost photo.jpg \"New mural\" --template simple --hashtags art,streetart
    xpost --list-templates

    # Check which configured platforms respond
    xpost --test-connections

IMAGES:
    Local images must exist, be at most [images] max_size_mb (default 10)
    and be one of [images] supported_formats (default jpg, jpeg, png, webp).
    URLs are passed through unchecked.

CONFIGURATION:
    Configuration file: ~/.config/crosspost/config.toml
    Override with CROSSPOST_CONFIG and CROSSPOST_DB_PATH.

EXIT CODES:
    0 - Every platform succeeded (or the post was scheduled)
    1 - At least one platform failed
    2 - Every failed platform rejected the credentials
    3 - Invalid input
")]
struct Cli {
    /// Image path or URL
    #[arg(required_unless_present_any = ["test_connections", "list_templates"])]
    image: Option<String>,

    /// Caption (reads from stdin if not provided)
    caption: Option<String>,

    /// Target platform(s), comma-separated (default: all configured)
    #[arg(short, long)]
    platform: Option<String>,

    /// Schedule instead of publishing now ("30m", "tomorrow 3pm", RFC 3339)
    #[arg(long, value_name = "TIME")]
    at: Option<String>,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Caption template; the caption fills its {content} placeholder
    #[arg(short, long, value_name = "NAME")]
    template: Option<String>,

    /// Template value, repeatable (e.g. --var author=Someone)
    #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
    vars: Vec<(String, String)>,

    /// Hashtags for the template's {hashtags} placeholder ("sunset,beach")
    #[arg(long, requires = "template")]
    hashtags: Option<String>,

    /// List caption templates and exit
    #[arg(long)]
    list_templates: bool,

    /// Test the configured platforms and exit
    #[arg(long)]
    test_connections: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
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
    if cli.format != "text" && cli.format != "json" {
        return Err(CrosspostError::InvalidInput(format!(
            "Invalid format '{}'. Must be 'text' or 'json'",
            cli.format
        )));
    }

    let config = Config::load()?;
    let templates = TemplateSet::from_config(&config)?;
    if cli.list_templates {
        print_templates(&templates, &cli.format);
        return Ok(());
    }

    let workflow = Arc::new(build_workflow(&config)?);

    if cli.test_connections {
        let results = workflow.orchestrator().test_connections().await;
        print_connections(&results, &cli.format);
        return Ok(());
    }

    let platforms = select_platforms(cli.platform.as_deref(), &config)?;
    let image = cli
        .image
        .ok_or_else(|| CrosspostError::InvalidInput("An image is required".to_string()))?;
    validate_image(&image, &config.images)?;

    let mut caption = read_caption(cli.caption)?;
    if let Some(name) = &cli.template {
        let template = templates.get(name).ok_or_else(|| {
            CrosspostError::InvalidInput(format!(
                "Unknown template '{}'. Run xpost --list-templates",
                name
            ))
        })?;
        let mut values: BTreeMap<String, String> = cli.vars.into_iter().collect();
        values.insert("content".to_string(), caption);
        values
            .entry("hashtags".to_string())
            .or_insert_with(|| cli.hashtags.as_deref().map(format_hashtags).unwrap_or_default());
        caption = template.apply(&values)?;
    }
    let content = PublishContent::new(image, caption);

    if let Some(at) = cli.at {
        let scheduled_time = parse_schedule(&at)?;
        let db_path = resolve_db_path(Some(&config.database.path))?;
        let db = Database::new(&db_path.to_string_lossy()).await?;
        let scheduler = Scheduler::open(db, workflow).await?;
        let id = scheduler.schedule(content, platforms, scheduled_time).await?;

        if cli.format == "json" {
            println!(
                "{}",
                serde_json::json!({ "id": id, "scheduled_time": scheduled_time })
            );
        } else {
            println!("{}", id);
        }
        return Ok(());
    }

    let reports = workflow.execute(&content, &platforms).await;
    print_reports(&reports, &cli.format);

    let failures: Vec<Option<FailureKind>> = reports
        .values()
        .filter(|r| !r.success)
        .map(|r| r.failure)
        .collect();
    if failures.is_empty() {
        return Ok(());
    }
    let summary = format!("{} of {} platform(s) failed", failures.len(), reports.len());
    if failures.iter().all(|kind| *kind == Some(FailureKind::Authentication)) {
        return Err(PlatformError::Authentication(summary).into());
    }
    Err(PlatformError::Posting(summary).into())
}

fn parse_var(raw: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing key in '{}'", raw));
    }
    Ok((key.to_string(), value.to_string()))
}

fn select_platforms(requested: Option<&str>, config: &Config) -> Result<BTreeSet<PlatformName>> {
    let platforms = match requested {
        Some(list) => parse_platform_list(list)?,
        None => config.configured_platforms().into_iter().collect(),
    };
    if platforms.is_empty() {
        return Err(CrosspostError::InvalidInput(
            "No platforms selected and none configured".to_string(),
        ));
    }
    Ok(platforms)
}

fn read_caption(caption: Option<String>) -> Result<String> {
    if let Some(caption) = caption {
        return Ok(caption);
    }
    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        return Ok(String::new());
    }
    let mut buffer = String::new();
    stdin
        .lock()
        .read_to_string(&mut buffer)
        .map_err(|e| CrosspostError::InvalidInput(format!("Failed to read stdin: {}", e)))?;
    Ok(buffer.trim_end().to_string())
}

fn print_reports(reports: &BTreeMap<PlatformName, PlatformReport>, format: &str) {
    if format == "json" {
        println!("{}", serde_json::json!({ "platforms": reports }));
        return;
    }
    println!("{}", summarize_reports(reports));
    for (platform, report) in reports {
        for entry in report.attempts.entries() {
            println!("  {} {}", platform.display_name(), entry);
        }
    }
}

fn print_templates(templates: &TemplateSet, format: &str) {
    if format == "json" {
        let json: Vec<_> = templates
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "category": t.category,
                    "variables": t.variables(),
                    "template": t.body,
                })
            })
            .collect();
        println!("{}", serde_json::json!(json));
        return;
    }
    for category in templates.categories() {
        println!("{}:", category);
        for template in templates.by_category(category) {
            println!("  {} ({})", template.name, template.variables().join(", "));
        }
    }
}

fn print_connections(results: &BTreeMap<PlatformName, (bool, String)>, format: &str) {
    if format == "json" {
        let json: BTreeMap<_, _> = results
            .iter()
            .map(|(p, (ok, message))| (*p, serde_json::json!({ "ok": ok, "message": message })))
            .collect();
        println!("{}", serde_json::json!(json));
        return;
    }
    if results.is_empty() {
        println!("No platforms configured");
    }
    for (platform, (ok, message)) in results {
        let mark = if *ok { "✅" } else { "❌" };
        println!("{} {}: {}", mark, platform.display_name(), message);
    }
}
