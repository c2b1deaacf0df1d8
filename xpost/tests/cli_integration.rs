//! Integration tests for xpost

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

const PNG_HEADER: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

/// Wordpress succeeds via `echo`, facebook fails via `sh`
const DEFAULT_PLATFORMS: &str = r#"
[platforms.wordpress]
command = ["echo", "posted {caption} to {platform}"]

[platforms.facebook]
command = ["sh", "-c", "echo 'HTTP 503' >&2; exit 1"]
"#;

struct TestEnv {
    _temp_dir: TempDir,
    config_path: String,
    db_path: String,
    image: String,
}

/// Helper to escape path for TOML on Windows
fn escape_path_for_toml(path: &str) -> String {
    path.replace('\\', "\\\\")
}

fn setup_test_env() -> TestEnv {
    setup_with_platforms(DEFAULT_PLATFORMS)
}

fn setup_with_platforms(platforms: &str) -> TestEnv {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    let db_path = temp_dir.path().join("schedule.db");
    let image = temp_dir.path().join("photo.png");
    fs::write(&image, PNG_HEADER).unwrap();

    let config_content = format!(
        r#"
[database]
path = "{}"

[publishing]
max_attempts = 2
retry_delay = "10ms"

[templates.weekly]
template = "This week: {{content}}"
{}"#,
        escape_path_for_toml(&db_path.to_string_lossy()),
        platforms,
    );
    fs::write(&config_path, config_content).unwrap();

    TestEnv {
        config_path: config_path.to_string_lossy().to_string(),
        db_path: db_path.to_string_lossy().to_string(),
        image: image.to_string_lossy().to_string(),
        _temp_dir: temp_dir,
    }
}

fn xpost(config_path: &str) -> Command {
    let mut cmd = Command::cargo_bin("xpost").unwrap();
    cmd.env("CROSSPOST_CONFIG", config_path)
        .env_remove("CROSSPOST_DB_PATH");
    cmd
}

#[test]
fn test_help() {
    Command::cargo_bin("xpost")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Publish an image and caption"));
}

#[test]
fn test_missing_image_is_usage_error() {
    let env = setup_test_env();
    xpost(&env.config_path).assert().failure();
}

#[test]
fn test_invalid_format() {
    let env = setup_test_env();
    xpost(&env.config_path)
        .args([env.image.as_str(), "hi", "--format", "xml"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Invalid format"));
}

#[test]
fn test_unknown_platform() {
    let env = setup_test_env();
    xpost(&env.config_path)
        .args([env.image.as_str(), "hi", "--platform", "myspace"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Unknown platform 'myspace'"));
}

#[test]
fn test_missing_image_file_is_rejected_before_publishing() {
    let env = setup_test_env();
    xpost(&env.config_path)
        .args(["/nonexistent/photo.jpg", "hi", "--platform", "wordpress"])
        .assert()
        .code(3)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Image file not found"));
}

#[test]
fn test_unsupported_image_is_rejected_when_scheduling() {
    let env = setup_test_env();
    let gif = std::path::Path::new(&env.image).with_file_name("anim.gif");
    fs::write(&gif, b"GIF89a\x01\0\x01\0").unwrap();

    xpost(&env.config_path)
        .args([gif.to_str().unwrap(), "hi", "--platform", "wordpress", "--at", "2h"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Unsupported image format: gif"));
    assert!(!std::path::Path::new(&env.db_path).exists());
}

#[cfg(unix)]
#[test]
fn test_publish_success_to_selected_platform() {
    let env = setup_test_env();
    xpost(&env.config_path)
        .args([env.image.as_str(), "Hello", "--platform", "wordpress"])
        .assert()
        .success()
        .stdout(predicate::str::contains("✅ Successfully posted to: WordPress"))
        .stdout(predicate::str::contains("posted Hello to wordpress"));
}

#[cfg(unix)]
#[test]
fn test_partial_failure_exit_code_and_history() {
    let env = setup_test_env();
    xpost(&env.config_path)
        .args([env.image.as_str(), "Hello"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("✅ WordPress"))
        .stdout(predicate::str::contains("❌ Facebook: Failed after 2 attempts"))
        .stdout(predicate::str::contains("attempt 1 failed:"))
        .stderr(predicate::str::contains("1 of 2 platform(s) failed"));
}

#[cfg(unix)]
#[test]
fn test_rejected_credentials_exit_code() {
    let env = setup_with_platforms(
        r#"
[platforms.wordpress]
command = ["echo", "ok"]

[platforms.instagram]
command = ["sh", "-c", "echo 'token expired' >&2; exit 77"]
"#,
    );

    // every failure is an authentication failure
    xpost(&env.config_path)
        .args([env.image.as_str(), "Hello"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("❌ Instagram"))
        .stdout(predicate::str::contains("token expired"))
        .stdout(predicate::str::contains("attempt 1 failed").not())
        .stderr(predicate::str::contains("Authentication failed: 1 of 2 platform(s) failed"));

    // an unconfigured platform failing alongside is a plain failure
    xpost(&env.config_path)
        .args([env.image.as_str(), "Hello", "--platform", "instagram,facebook"])
        .assert()
        .code(1);
}

#[cfg(unix)]
#[test]
fn test_not_configured_platform_json() {
    let env = setup_test_env();
    let output = xpost(&env.config_path)
        .args([
            env.image.as_str(),
            "Hello",
            "--platform",
            "wordpress,instagram",
            "--format",
            "json",
        ])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["platforms"]["wordpress"]["success"], true);
    assert_eq!(json["platforms"]["instagram"]["success"], false);
    assert_eq!(json["platforms"]["instagram"]["message"], "Service not configured");
    assert_eq!(json["platforms"]["instagram"]["failure"], "not_configured");
    assert_eq!(
        json["platforms"]["instagram"]["attempts"].as_array().unwrap().len(),
        0
    );
}

#[cfg(unix)]
#[test]
fn test_caption_from_stdin_is_used() {
    let env = setup_test_env();
    xpost(&env.config_path)
        .args([env.image.as_str(), "--platform", "wordpress"])
        .write_stdin("Caption from a pipe\n")
        .assert()
        .stdout(predicate::str::contains("Caption from a pipe"));
}

#[cfg(unix)]
#[test]
fn test_template_wraps_caption() {
    let env = setup_test_env();
    xpost(&env.config_path)
        .args([
            env.image.as_str(),
            "Stay hungry",
            "--platform",
            "wordpress",
            "--template",
            "Quote",
            "--var",
            "author=Someone",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"Stay hungry\""))
        .stdout(predicate::str::contains("- Someone"));

    xpost(&env.config_path)
        .args([
            env.image.as_str(),
            "Mural",
            "--platform",
            "wordpress",
            "--template",
            "simple",
            "--hashtags",
            "art, #street",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("#art #street"));
}

#[test]
fn test_template_errors() {
    let env = setup_test_env();
    xpost(&env.config_path)
        .args([env.image.as_str(), "hi", "--platform", "wordpress", "--template", "limerick"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Unknown template 'limerick'"));

    xpost(&env.config_path)
        .args([env.image.as_str(), "hi", "--platform", "wordpress", "--template", "quote"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("needs a value for: author"));
}

#[test]
fn test_list_templates_includes_custom() {
    let env = setup_test_env();
    let output = xpost(&env.config_path)
        .args(["--list-templates", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let templates = json.as_array().unwrap();
    assert_eq!(templates.len(), 11);
    let weekly = templates.iter().find(|t| t["name"] == "weekly").unwrap();
    assert_eq!(weekly["category"], "custom");
    assert_eq!(weekly["variables"], serde_json::json!(["content"]));

    xpost(&env.config_path)
        .arg("--list-templates")
        .assert()
        .success()
        .stdout(predicate::str::contains("Event Promotion (date, location, time, content)"));
}

#[test]
fn test_schedule_prints_id_and_persists() {
    let env = setup_test_env();
    let output = xpost(&env.config_path)
        .args([env.image.as_str(), "Later", "--platform", "wordpress", "--at", "2h"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let id = String::from_utf8(output.stdout).unwrap().trim().to_string();
    assert_eq!(id.len(), 36, "expected a UUID, got {:?}", id);
    assert!(std::path::Path::new(&env.db_path).exists());
}

#[test]
fn test_schedule_in_the_past_is_rejected() {
    let env = setup_test_env();
    xpost(&env.config_path)
        .args([
            env.image.as_str(),
            "Too late",
            "--platform",
            "wordpress",
            "--at",
            "2001-01-01T00:00:00Z",
        ])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Scheduled time must be in the future"));
}

#[test]
fn test_test_connections_lists_configured() {
    let env = setup_test_env();
    xpost(&env.config_path)
        .arg("--test-connections")
        .assert()
        .stdout(predicate::str::contains("WordPress"))
        .stdout(predicate::str::contains("Facebook"));
}
