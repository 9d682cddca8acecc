#![forbid(unsafe_code)]

//! Format classification and download-directive construction.
//!
//! The extractor reports every reachable encoding of a media URL as one entry
//! in a flat `formats` array: muxed tracks, DASH video-only streams, audio-only
//! streams, and assorted noise such as storyboards. This module partitions that
//! list into the three groups the frontend renders, and later translates the
//! user's pick back into a single format selector for the download call.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Container the engine re-muxes into whenever streams are merged.
pub const MERGE_CONTAINER: &str = "mp4";
/// Target codec for the fixed "give me an mp3" directive.
pub const AUDIO_EXTRACT_CODEC: &str = "mp3";
/// Target quality passed alongside [`AUDIO_EXTRACT_CODEC`].
pub const AUDIO_EXTRACT_QUALITY: &str = "192";
/// Shown when neither the metadata nor its candidate list yields a thumbnail.
pub const PLACEHOLDER_THUMBNAIL: &str = "https://via.placeholder.com/300x169?text=No+Thumbnail";

/// One encoding as reported by the engine.
///
/// Everything except `format_id` is optional because extractors routinely omit
/// fields, and the numeric ones decode leniently: a mangled value becomes
/// absent instead of failing the whole metadata response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EncodingDescriptor {
    #[serde(default)]
    pub format_id: String,
    #[serde(default)]
    pub ext: Option<String>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub height: Option<u32>,
    #[serde(default)]
    pub vcodec: Option<String>,
    #[serde(default)]
    pub acodec: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub fps: Option<f64>,
    /// Total bitrate; preferred over `abr` when publishing the entry.
    #[serde(default, deserialize_with = "lenient_f64")]
    pub tbr: Option<f64>,
    /// Average audio bitrate; the ranking key for the audio-only group.
    #[serde(default, deserialize_with = "lenient_f64")]
    pub abr: Option<f64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub filesize: Option<u64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub filesize_approx: Option<u64>,
    #[serde(default)]
    pub format_note: Option<String>,
}

impl EncodingDescriptor {
    /// Usable resolution. Extractors emit `height: 0` for some degenerate
    /// entries; those behave exactly like a missing height.
    fn usable_height(&self) -> Option<u32> {
        self.height.filter(|height| *height > 0)
    }

    fn bitrate(&self) -> Option<f64> {
        self.tbr.or(self.abr)
    }

    /// Exact size when the extractor knows it, the estimate otherwise.
    fn size_bytes(&self) -> Option<u64> {
        self.filesize.or(self.filesize_approx)
    }
}

/// A thumbnail candidate from the metadata response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ThumbnailCandidate {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub width: Option<u64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub height: Option<u64>,
}

/// One retained encoding, shaped for the frontend. Video-bearing entries carry
/// `resolution`/`height`/`fps`; audio-only entries carry `abr` instead.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormatEntry {
    pub format_id: String,
    pub ext: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abr: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filesize: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Output of [`classify`]: the three ranked groups plus the signals derived
/// while walking the descriptor list.
#[derive(Debug, Clone, Serialize)]
pub struct ClassificationResult {
    pub combined: Vec<FormatEntry>,
    pub video_only: Vec<FormatEntry>,
    pub audio_only: Vec<FormatEntry>,
    /// True when the source exposed nothing above 360p, which usually means a
    /// degraded or restricted metadata response.
    pub limited_formats: bool,
    pub thumbnail: String,
}

/// Partitions the raw descriptor list into combined / video-only / audio-only
/// groups, deduplicates each group by format id, ranks them, and picks a
/// thumbnail.
///
/// Classification looks only at (has-height, video-codec, audio-codec), first
/// matching rule wins, and every descriptor lands in at most one group:
/// storyboards and other trackless entries are dropped. Sorting is stable so
/// entries of equal rank keep their input order.
pub fn classify(
    descriptors: &[EncodingDescriptor],
    candidates: &[ThumbnailCandidate],
    direct_thumbnail: Option<&str>,
) -> ClassificationResult {
    let mut combined = Vec::new();
    let mut video_only = Vec::new();
    let mut audio_only = Vec::new();
    let mut max_height = 0u32;

    for descriptor in descriptors {
        let height = descriptor.usable_height();
        let has_video = codec_present(descriptor.vcodec.as_deref());
        let has_audio = codec_present(descriptor.acodec.as_deref());

        match (height, has_video, has_audio) {
            (Some(height), true, true) => {
                combined.push(video_entry(descriptor, height));
                max_height = max_height.max(height);
            }
            (Some(height), true, false) => {
                video_only.push(video_entry(descriptor, height));
                max_height = max_height.max(height);
            }
            (None, _, true) => {
                audio_only.push(audio_entry(descriptor));
            }
            // Neither a usable video nor audio signal.
            _ => {}
        }
    }

    let mut combined = dedup_by_format_id(combined);
    let mut video_only = dedup_by_format_id(video_only);
    let mut audio_only = dedup_by_format_id(audio_only);

    combined.sort_by(|a, b| b.height.cmp(&a.height));
    video_only.sort_by(|a, b| b.height.cmp(&a.height));
    audio_only.sort_by(|a, b| b.abr.unwrap_or(0.0).total_cmp(&a.abr.unwrap_or(0.0)));

    ClassificationResult {
        combined,
        video_only,
        audio_only,
        limited_formats: max_height <= 360,
        thumbnail: pick_thumbnail(direct_thumbnail, candidates),
    }
}

/// A codec slot counts as populated unless the extractor omitted it or wrote
/// the literal "none".
fn codec_present(codec: Option<&str>) -> bool {
    !matches!(codec, None | Some("none"))
}

fn video_entry(descriptor: &EncodingDescriptor, height: u32) -> FormatEntry {
    FormatEntry {
        format_id: descriptor.format_id.clone(),
        ext: descriptor.ext.clone().unwrap_or_default(),
        resolution: Some(format!("{height}p")),
        height: Some(height),
        abr: None,
        fps: descriptor.fps,
        bitrate: descriptor.bitrate(),
        filesize: human_size(descriptor.size_bytes()),
        note: descriptor.format_note.clone(),
    }
}

fn audio_entry(descriptor: &EncodingDescriptor) -> FormatEntry {
    FormatEntry {
        format_id: descriptor.format_id.clone(),
        ext: descriptor.ext.clone().unwrap_or_default(),
        resolution: None,
        height: None,
        abr: Some(descriptor.abr.unwrap_or(0.0)),
        fps: None,
        bitrate: descriptor.bitrate(),
        filesize: human_size(descriptor.size_bytes()),
        note: descriptor.format_note.clone(),
    }
}

/// Keeps the first entry seen for each format id; later duplicates are dropped
/// without merging their data.
fn dedup_by_format_id(entries: Vec<FormatEntry>) -> Vec<FormatEntry> {
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .filter(|entry| seen.insert(entry.format_id.clone()))
        .collect()
}

/// Renders a byte count with base-1024 units, two decimals, trailing zeros
/// trimmed. Zero, negative, or unparseable sizes come through as `None` so the
/// frontend never shows "0 B".
pub fn human_size(bytes: Option<u64>) -> Option<String> {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    let bytes = bytes.filter(|bytes| *bytes > 0)?;
    let mut exponent = 0usize;
    let mut threshold = 1024u64;
    while exponent + 1 < UNITS.len() && bytes >= threshold {
        exponent += 1;
        threshold = threshold.saturating_mul(1024);
    }

    let scaled = bytes as f64 / 1024f64.powi(exponent as i32);
    let mut text = format!("{:.2}", (scaled * 100.0).round() / 100.0);
    while text.ends_with('0') {
        text.pop();
    }
    if text.ends_with('.') {
        text.pop();
    }
    Some(format!("{text} {}", UNITS[exponent]))
}

/// Direct thumbnail wins; otherwise the candidate with the largest pixel area
/// (missing dimensions count as zero, first seen wins ties); otherwise the
/// placeholder.
pub fn pick_thumbnail(direct: Option<&str>, candidates: &[ThumbnailCandidate]) -> String {
    if let Some(url) = direct.filter(|url| !url.trim().is_empty()) {
        return url.to_string();
    }

    let mut best: Option<(u64, &str)> = None;
    for candidate in candidates {
        let Some(url) = candidate.url.as_deref() else {
            continue;
        };
        let area = candidate.width.unwrap_or(0).saturating_mul(candidate.height.unwrap_or(0));
        match best {
            Some((best_area, _)) if area <= best_area => {}
            _ => best = Some((area, url)),
        }
    }

    best.map(|(_, url)| url.to_string())
        .unwrap_or_else(|| PLACEHOLDER_THUMBNAIL.to_string())
}

/// Which group the client picked its format id from. Anything unrecognized is
/// treated like a combined pick, matching the permissive download contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatKind {
    Combined,
    VideoOnly,
    AudioOnly,
    Unspecified,
}

impl FormatKind {
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(|value| value.trim().to_ascii_lowercase()).as_deref() {
            Some("combined") => Self::Combined,
            Some("video_only") => Self::VideoOnly,
            Some("audio_only") => Self::AudioOnly,
            _ => Self::Unspecified,
        }
    }
}

/// Post-download audio transcode instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioExtract {
    pub codec: &'static str,
    pub quality: &'static str,
}

/// Everything the engine needs for one download: a format selector in the
/// engine's mini-language (`id`, `id+id` merges, `a/b/c` fallbacks), an
/// optional merge-container hint, an optional audio transcode, and the output
/// template the produced file is named from.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadDirective {
    pub selector: String,
    pub merge_container: Option<&'static str>,
    pub extract_audio: Option<AudioExtract>,
    pub output_template: PathBuf,
}

/// Maps a chosen format id plus its group to a single download directive.
///
/// A video-only pick is paired with the best available audio track, preferring
/// one already in an mp4-compatible container, and the merged artifact is
/// forced into [`MERGE_CONTAINER`]. Combined picks get the same container
/// normalization; audio-only picks keep their native container.
pub fn build_directive(format_id: &str, kind: FormatKind, output_stem: &Path) -> DownloadDirective {
    let mut output_template = output_stem.to_path_buf();
    output_template.set_extension("%(ext)s");

    match kind {
        FormatKind::VideoOnly => DownloadDirective {
            selector: format!("{format_id}+bestaudio[ext=m4a]/bestaudio/best"),
            merge_container: Some(MERGE_CONTAINER),
            extract_audio: None,
            output_template,
        },
        FormatKind::AudioOnly => DownloadDirective {
            selector: format_id.to_string(),
            merge_container: None,
            extract_audio: None,
            output_template,
        },
        FormatKind::Combined | FormatKind::Unspecified => DownloadDirective {
            selector: format_id.to_string(),
            merge_container: Some(MERGE_CONTAINER),
            extract_audio: None,
            output_template,
        },
    }
}

/// The fixed "standalone mp3 regardless of source container" directive: best
/// available audio, else best available anything, transcoded after download.
/// The final extension is known up front, so the template carries it directly.
pub fn audio_extract_directive(output_stem: &Path) -> DownloadDirective {
    let mut output_template = output_stem.to_path_buf();
    output_template.set_extension(AUDIO_EXTRACT_CODEC);

    DownloadDirective {
        selector: "bestaudio/best".to_string(),
        merge_container: None,
        extract_audio: Some(AudioExtract {
            codec: AUDIO_EXTRACT_CODEC,
            quality: AUDIO_EXTRACT_QUALITY,
        }),
        output_template,
    }
}

// Lenient numeric decoding: extractors hand back numbers, numeric strings, or
// garbage in the same slots depending on the site. Anything unusable becomes
// absent rather than an error, so one bad descriptor never sinks the response.

pub(crate) fn lenient_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value
        .as_u64()
        .or_else(|| value.as_f64().filter(|value| *value >= 0.0).map(|value| value as u64))
        .or_else(|| value.as_str().and_then(|text| text.trim().parse().ok())))
}

pub(crate) fn lenient_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let wide = lenient_u64(deserializer)?;
    Ok(wide.and_then(|value| u32::try_from(value).ok()))
}

pub(crate) fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value
        .as_f64()
        .or_else(|| value.as_str().and_then(|text| text.trim().parse().ok())))
}
