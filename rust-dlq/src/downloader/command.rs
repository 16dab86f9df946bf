//! Command construction for the external download tool.

use std::path::Path;

use crate::config::AppConfig;
use crate::queue::Job;

/// Resolution ladder used when a job asks for a specific height.
const RESOLUTION_LADDER: [u32; 6] = [360, 480, 720, 1080, 1440, 2160];

/// Builds the argument vector for one attempt of one job.
///
/// Pure: no side effects, and the queue core never interprets the
/// resulting arguments.
pub trait CommandBuilder: Send + Sync {
    fn build_args(&self, job: &Job, config: &AppConfig) -> Vec<String>;
}

/// Argument builder for yt-dlp.
#[derive(Debug, Clone, Copy, Default)]
pub struct YtDlpCommandBuilder;

impl YtDlpCommandBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Detect the version of the configured binary.
    ///
    /// Returns `None` when the binary is missing or does not answer
    /// `--version`.
    pub fn detect_version(path: &Path) -> Option<String> {
        let mut cmd = process_utils::std_command(path);
        cmd.arg("--version");
        cmd.output().ok().and_then(|output| {
            String::from_utf8(output.stdout)
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
    }

    /// Build the `-f` format string for a requested height.
    ///
    /// Prefers the requested height, then each higher rung, finally
    /// whatever yt-dlp considers best. Each rung tries a merged
    /// video+audio pair before a pre-muxed file.
    fn format_for_height(height: u32) -> String {
        let mut parts = Vec::new();
        for rung in RESOLUTION_LADDER.into_iter().filter(|r| *r >= height) {
            parts.push(format!("bestvideo[height={rung}]+bestaudio"));
            parts.push(format!("best[height={rung}]"));
        }
        parts.push("best".to_string());
        parts.join("/")
    }

    /// First integer embedded in a selector like `"720p"` or `"1080p60"`.
    fn parse_height(selector: &str) -> Option<u32> {
        let digits: String = selector
            .chars()
            .skip_while(|c| !c.is_ascii_digit())
            .take_while(|c| c.is_ascii_digit())
            .collect();
        digits.parse().ok()
    }
}

impl CommandBuilder for YtDlpCommandBuilder {
    fn build_args(&self, job: &Job, config: &AppConfig) -> Vec<String> {
        let output_template = match &job.display_name {
            Some(name) => config.output_dir.join(format!("{name}.%(ext)s")),
            None => config.output_dir.join("%(title)s.%(ext)s"),
        };

        let mut args = vec![
            job.url.clone(),
            "-o".to_string(),
            output_template.to_string_lossy().to_string(),
            // One progress report per line, so output stays parseable as a
            // line stream.
            "--newline".to_string(),
            "--concurrent-fragments".to_string(),
            config.concurrent_fragments.to_string(),
        ];

        match job.format_selector.trim() {
            "" | "best" => {}
            "audio" => {
                args.extend(["-f".to_string(), "bestaudio".to_string(), "-x".to_string()]);
            }
            selector => {
                let height = Self::parse_height(selector).unwrap_or(720);
                args.extend(["-f".to_string(), Self::format_for_height(height)]);
            }
        }

        args
    }
}
