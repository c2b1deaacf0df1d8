//! Image checks and the resize collaborator
//!
//! Pixel work happens outside this crate. A resizer takes an image reference
//! and returns a reference to a copy that fits inside the requested box.

use std::io::Read;
use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::ImagesConfig;
use crate::error::{ConfigError, CrosspostError, Result};

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Check a local image before it is published or scheduled
///
/// The file must exist, fit within `max_size_mb`, and hold data in one of
/// `supported_formats`. The format is detected from the file contents, not
/// its name. Remote references are left to the platforms.
pub fn validate_image(image_ref: &str, config: &ImagesConfig) -> Result<()> {
    if is_remote(image_ref) {
        return Ok(());
    }
    let invalid = |reason: String| CrosspostError::InvalidInput(reason);

    let metadata = std::fs::metadata(image_ref).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => invalid(format!("Image file not found: {}", image_ref)),
        _ => invalid(format!("Cannot read image {}: {}", image_ref, e)),
    })?;
    if !metadata.is_file() {
        return Err(invalid(format!("Image is not a file: {}", image_ref)));
    }

    let limit = config.max_size_mb * BYTES_PER_MB;
    if metadata.len() > limit {
        return Err(invalid(format!(
            "Image size ({:.2}MB) exceeds limit ({}MB)",
            metadata.len() as f64 / BYTES_PER_MB as f64,
            config.max_size_mb
        )));
    }

    let mut head = Vec::with_capacity(32);
    std::fs::File::open(image_ref)
        .and_then(|file| file.take(32).read_to_end(&mut head))
        .map_err(|e| invalid(format!("Cannot read image {}: {}", image_ref, e)))?;
    let format = image::guess_format(&head)
        .map_err(|_| invalid(format!("Not a recognized image: {}", image_ref)))?;

    let supported = format.extensions_str().iter().any(|ext| {
        config
            .supported_formats
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(ext))
    });
    if !supported {
        let name = format.extensions_str().first().copied().unwrap_or("unknown");
        return Err(invalid(format!(
            "Unsupported image format: {} (supported: {})",
            name,
            config.supported_formats.join(", ")
        )));
    }
    Ok(())
}

#[async_trait]
pub trait ImageResizer: Send + Sync {
    /// Resize preserving aspect ratio so the image fits `max_width` x `max_height`
    async fn resize(&self, image_ref: &str, max_width: u32, max_height: u32) -> Result<String>;
}

/// Resizer used when no tool is configured; always fails so callers keep the original
pub struct NoResize;

#[async_trait]
impl ImageResizer for NoResize {
    async fn resize(&self, _image_ref: &str, _max_width: u32, _max_height: u32) -> Result<String> {
        Err(CrosspostError::Config(ConfigError::MissingField(
            "images.resize_command".to_string(),
        )))
    }
}

/// Runs an external tool with `{input}`, `{output}`, `{width}` and `{height}` placeholders
pub struct CommandResizer {
    program: String,
    args: Vec<String>,
}

impl CommandResizer {
    pub fn new(command: Vec<String>) -> Result<Self> {
        let mut parts = command.into_iter();
        let program = parts
            .next()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingField("images.resize_command".to_string()))?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }
}

#[async_trait]
impl ImageResizer for CommandResizer {
    async fn resize(&self, image_ref: &str, max_width: u32, max_height: u32) -> Result<String> {
        if is_remote(image_ref) {
            return Err(CrosspostError::InvalidInput(format!(
                "cannot resize remote image {}",
                image_ref
            )));
        }

        let output_path = resized_path(image_ref, max_width, max_height);
        let args: Vec<String> = self
            .args
            .iter()
            .map(|arg| {
                arg.replace("{input}", image_ref)
                    .replace("{output}", &output_path)
                    .replace("{width}", &max_width.to_string())
                    .replace("{height}", &max_height.to_string())
            })
            .collect();

        let status = Command::new(&self.program)
            .args(&args)
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| {
                CrosspostError::InvalidInput(format!("failed to run '{}': {}", self.program, e))
            })?;

        if !status.success() {
            return Err(CrosspostError::InvalidInput(format!(
                "'{}' exited with {}",
                self.program, status
            )));
        }
        if !Path::new(&output_path).exists() {
            return Err(CrosspostError::InvalidInput(format!(
                "resize produced no file at {}",
                output_path
            )));
        }

        Ok(output_path)
    }
}

fn is_remote(image_ref: &str) -> bool {
    image_ref.starts_with("http://") || image_ref.starts_with("https://")
}

/// `photo.jpg` -> `photo_1080x1080.jpg`, next to the original
fn resized_path(image_ref: &str, max_width: u32, max_height: u32) -> String {
    let path = Path::new(image_ref);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "image".to_string());
    let file_name = match path.extension() {
        Some(ext) => format!("{}_{}x{}.{}", stem, max_width, max_height, ext.to_string_lossy()),
        None => format!("{}_{}x{}", stem, max_width, max_height),
    };
    path.with_file_name(file_name).to_string_lossy().to_string()
}
