#![forbid(unsafe_code)]

//! Thin wrapper around the yt-dlp executable.
//!
//! The service never talks to media sites itself: metadata comes from
//! `yt-dlp --dump-single-json` and files are materialized by a second
//! invocation carrying a [`DownloadDirective`]. Both calls block, so callers
//! on the async side run them through `spawn_blocking`.

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use uuid::Uuid;

use crate::formats::{
    DownloadDirective, EncodingDescriptor, ThumbnailCandidate, lenient_f64,
};

/// Transport-level retry budget handed to the engine. Fragment retries use the
/// same count so flaky DASH segments recover without a second request.
const RETRY_COUNT: &str = "5";
/// An Android-flavored UA tends to receive richer format lists.
const USER_AGENT: &str = "Mozilla/5.0 (Linux; Android 13)";
/// Player clients that expose HD DASH/HLS formats instead of the capped web
/// defaults.
const PLAYER_CLIENTS: &str = "youtube:player_client=android,android_creator,ios,tv_embedded,mobile";

/// Metadata response for one URL. Only the fields the service publishes or
/// classifies are read; everything is optional because extractors differ
/// wildly in what they fill in.
#[derive(Debug, Default, Deserialize)]
pub struct MediaInfo {
    pub title: Option<String>,
    pub uploader: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub duration: Option<f64>,
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub thumbnails: Vec<ThumbnailCandidate>,
    #[serde(default)]
    pub formats: Vec<EncodingDescriptor>,
    pub extractor_key: Option<String>,
    pub extractor: Option<String>,
}

impl MediaInfo {
    /// Label of the site the metadata came from.
    pub fn site(&self) -> &str {
        self.extractor_key
            .as_deref()
            .or(self.extractor.as_deref())
            .unwrap_or("Unknown")
    }
}

/// Capability handle for the directory downloads land in. Constructed once and
/// passed explicitly so tests point it at a temporary location.
#[derive(Debug, Clone)]
pub struct DownloadRoot {
    path: PathBuf,
}

impl DownloadRoot {
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        fs::create_dir_all(&path)
            .with_context(|| format!("creating download directory {}", path.display()))?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fresh output stem for one request. Concurrent downloads write distinct
    /// files because every request gets its own uuid.
    pub fn unique_stem(&self) -> PathBuf {
        self.path.join(Uuid::new_v4().to_string())
    }

    /// Resolves a bare produced-file name back to its on-disk location.
    pub fn resolve(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }
}

/// Handle on the engine executable plus the per-install options every
/// invocation shares.
#[derive(Debug, Clone)]
pub struct Engine {
    binary: PathBuf,
    cookies: Option<PathBuf>,
}

impl Engine {
    pub fn new(binary: impl Into<PathBuf>, cookies: Option<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            cookies,
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Fetches the full metadata payload for a URL without downloading
    /// anything. Failures carry the engine's last stderr line so unsupported
    /// or unreachable URLs surface a usable message.
    pub fn fetch_metadata(&self, url: &str) -> Result<MediaInfo> {
        let mut command = self.base_command();
        command.arg("--dump-single-json").arg("--skip-download").arg(url);

        let output = command
            .output()
            .with_context(|| format!("launching {}", self.binary.display()))?;
        if !output.status.success() {
            bail!(
                "could not read metadata for {url}: {}",
                failure_line(&output.stderr, output.status)
            );
        }

        serde_json::from_slice(&output.stdout).context("parsing the extractor's metadata JSON")
    }

    /// Materializes one download described by `directive` and returns the
    /// exact path the engine wrote.
    ///
    /// The path comes from the engine itself (`--print after_move:filepath`),
    /// never from scanning the output directory, so concurrent requests cannot
    /// pick up each other's files. A run that exits successfully without a
    /// locatable file is its own error, distinct from a failed download.
    pub fn download(&self, url: &str, directive: &DownloadDirective) -> Result<PathBuf> {
        let mut command = self.base_command();
        command
            .arg("--format")
            .arg(&directive.selector)
            .arg("--output")
            .arg(directive.output_template.to_string_lossy().to_string())
            .arg("--print")
            .arg("after_move:filepath")
            .arg("--no-simulate");

        if let Some(container) = directive.merge_container {
            command.arg("--merge-output-format").arg(container);
        }
        if let Some(extract) = &directive.extract_audio {
            command
                .arg("--extract-audio")
                .arg("--audio-format")
                .arg(extract.codec)
                .arg("--audio-quality")
                .arg(extract.quality);
        }
        command.arg(url);

        let output = command
            .output()
            .with_context(|| format!("launching {}", self.binary.display()))?;
        if !output.status.success() {
            bail!(
                "download failed for {url}: {}",
                failure_line(&output.stderr, output.status)
            );
        }

        let printed = printed_filepath(&output.stdout).filter(|path| path.is_file());
        printed
            .or_else(|| literal_template_fallback(&directive.output_template))
            .ok_or_else(|| anyhow!("download finished but no file was produced"))
    }

    fn base_command(&self) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .arg("--no-warnings")
            .arg("--no-progress")
            .arg("--no-check-certificates")
            .arg("--retries")
            .arg(RETRY_COUNT)
            .arg("--fragment-retries")
            .arg(RETRY_COUNT)
            .arg("--user-agent")
            .arg(USER_AGENT)
            .arg("--extractor-args")
            .arg(PLAYER_CLIENTS);

        if let Some(cookies) = &self.cookies
            && cookies.exists()
        {
            command
                .arg("--cookies")
                .arg(cookies.to_string_lossy().to_string());
        }

        command
    }
}

/// Last usable line the engine printed; postprocessors may print progress
/// noise before the final filepath.
fn printed_filepath(stdout: &[u8]) -> Option<PathBuf> {
    let text = String::from_utf8_lossy(stdout);
    text.lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(PathBuf::from)
}

/// When the output template carries no `%(...)s` placeholder its expansion is
/// the template itself, so the audio-extract path can be probed directly even
/// if the engine printed nothing.
fn literal_template_fallback(template: &Path) -> Option<PathBuf> {
    let literal = template.to_string_lossy();
    if literal.contains("%(") {
        return None;
    }
    Some(template.to_path_buf()).filter(|path| path.is_file())
}

fn failure_line(stderr: &[u8], status: ExitStatus) -> String {
    let text = String::from_utf8_lossy(stderr);
    text.lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("exit status {status}"))
}
