//! Adapter that delegates a publish to an external command
//!
//! The platform-specific REST work lives in a separate tool; this adapter only
//! fills in placeholders, runs it, and maps the exit status.
//!
//! A failing command can say why through its exit status, using the
//! `sysexits.h` values:
//!
//! | Exit | Meaning                   | Error            |
//! |------|---------------------------|------------------|
//! | 77   | credentials rejected      | `Authentication` |
//! | 75   | rate limited, try later   | `RateLimit`      |
//! | 69   | service unreachable       | `Network`        |
//! | else | any other failure         | `Posting`        |
//!
//! Whatever the command wrote to stderr becomes the error message.

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{ConfigError, PlatformError, Result};
use crate::platforms::PlatformAdapter;
use crate::types::{PlatformName, PublishContent};

const EXIT_UNAVAILABLE: i32 = 69;
const EXIT_TEMPFAIL: i32 = 75;
const EXIT_NOPERM: i32 = 77;

pub struct CommandAdapter {
    platform: PlatformName,
    program: String,
    args: Vec<String>,
}

impl CommandAdapter {
    /// Create an adapter from `[program, args...]`
    ///
    /// Arguments may contain `{image}`, `{caption}` and `{platform}`.
    pub fn new(platform: PlatformName, command: Vec<String>) -> Result<Self> {
        let mut parts = command.into_iter();
        let program = parts
            .next()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingField(format!("platforms.{}.command", platform)))?;

        Ok(Self {
            platform,
            program: shellexpand::tilde(&program).to_string(),
            args: parts.collect(),
        })
    }

    fn render_args(&self, content: &PublishContent) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{image}", &content.image_ref)
                    .replace("{caption}", &content.caption)
                    .replace("{platform}", self.platform.as_str())
            })
            .collect()
    }
}

#[async_trait]
impl PlatformAdapter for CommandAdapter {
    async fn share(&self, content: &PublishContent) -> Result<String> {
        let args = self.render_args(content);
        tracing::debug!("Running {} share command: {}", self.platform, self.program);

        let output = Command::new(&self.program)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                PlatformError::Posting(format!("failed to run '{}': {}", self.program, e))
            })?;

        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if stdout.is_empty() {
                Ok(format!("Posted to {}", self.platform.display_name()))
            } else {
                Ok(stdout)
            }
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let reason = if stderr.is_empty() {
                format!("'{}' exited with {}", self.program, output.status)
            } else {
                stderr
            };
            Err(classify_exit(output.status.code(), reason).into())
        }
    }

    fn platform(&self) -> PlatformName {
        self.platform
    }

    async fn test_connection(&self) -> Result<String> {
        if which_program(&self.program) {
            Ok(format!(
                "{} command '{}' available",
                self.platform.display_name(),
                self.program
            ))
        } else {
            Err(PlatformError::Posting(format!(
                "{} command '{}' not found",
                self.platform.display_name(),
                self.program
            ))
            .into())
        }
    }
}

fn classify_exit(code: Option<i32>, reason: String) -> PlatformError {
    match code {
        Some(EXIT_NOPERM) => PlatformError::Authentication(reason),
        Some(EXIT_TEMPFAIL) => PlatformError::RateLimit(reason),
        Some(EXIT_UNAVAILABLE) => PlatformError::Network(reason),
        _ => PlatformError::Posting(reason),
    }
}

/// Whether `program` is a path to a file or resolves on `PATH`
fn which_program(program: &str) -> bool {
    let path = std::path::Path::new(program);
    if path.components().count() > 1 {
        return path.is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
        .unwrap_or(false)
}
