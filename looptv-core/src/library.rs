use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rand::seq::SliceRandom;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Extension allow-list for playable content.
pub const MEDIA_EXTENSIONS: &[&str] = &["mp4", "avi", "mkv", "webm"];

/// ffprobe prints `H:MM:SS.ffffff`; everything past millisecond precision is
/// dropped.
const DURATION_WIDTH: usize = 11;

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("library has no playable items")]
    Empty,
    #[error("duration prober not found: {0}")]
    ProberMissing(PathBuf),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type LibraryResult<T> = Result<T, LibraryError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentItem {
    pub path: PathBuf,
    pub category: String,
    /// Display name filtered to a printable subset.
    pub name: String,
    /// Sexagesimal duration as reported by the prober (`H:MM:SS[.mmm]`).
    pub duration: String,
    pub duration_ms: i64,
    /// Immediate parent directory, used for display grouping.
    pub group: String,
}

#[derive(Debug, Clone, Default)]
pub struct Library {
    items: Vec<ContentItem>,
    play_cursor: usize,
}

impl Library {
    pub fn new(items: Vec<ContentItem>) -> Self {
        Self {
            items,
            play_cursor: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[ContentItem] {
        &self.items
    }

    pub fn play_cursor(&self) -> usize {
        self.play_cursor
    }

    /// Round-robin selection: `items[cursor % len]`, then advance the cursor.
    /// The cursor is never reset except on a full rebuild, so coverage is
    /// guaranteed across rebuilds within one process lifetime.
    pub fn select(&mut self) -> LibraryResult<ContentItem> {
        if self.items.is_empty() {
            return Err(LibraryError::Empty);
        }
        let item = self.items[self.play_cursor % self.items.len()].clone();
        self.play_cursor += 1;
        Ok(item)
    }

    /// Collapse several libraries into one flat rotation, shuffled once.
    /// Used in calendar-less mode.
    pub fn merged<'a, I>(libraries: I) -> Self
    where
        I: IntoIterator<Item = &'a Library>,
    {
        let mut items: Vec<ContentItem> = libraries
            .into_iter()
            .flat_map(|library| library.items.iter().cloned())
            .collect();
        items.shuffle(&mut rand::thread_rng());
        Self::new(items)
    }
}

#[async_trait]
pub trait DurationProber: Send + Sync {
    /// Probe a media file, returning its sexagesimal duration string.
    async fn probe(&self, path: &Path) -> io::Result<String>;
}

/// Invokes ffprobe once per discovered file.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    pub binary: PathBuf,
}

impl FfprobeProber {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl DurationProber for FfprobeProber {
    async fn probe(&self, path: &Path) -> io::Result<String> {
        let output = Command::new(&self.binary)
            .arg("-v")
            .arg("error")
            .arg("-show_entries")
            .arg("format=duration")
            .arg("-of")
            .arg("default=noprint_wrappers=1:nokey=1")
            .arg("-sexagesimal")
            .arg(path)
            .output()
            .await?;
        if !output.status.success() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!(
                    "ffprobe exited with status {:?} for {}",
                    output.status.code(),
                    path.display()
                ),
            ));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let duration: String = stdout.trim().chars().take(DURATION_WIDTH).collect();
        Ok(duration)
    }
}

/// Scan `root/<category>/` for every requested category. Items whose probe
/// fails are dropped, not retried. Order is randomized once per build.
pub async fn build_libraries(
    root: &Path,
    categories: &[String],
    prober: &dyn DurationProber,
) -> LibraryResult<HashMap<String, Library>> {
    let mut libraries = HashMap::new();
    for category in categories {
        let library = build_category(root, category, prober).await?;
        info!(
            category = category.as_str(),
            items = library.len(),
            "library built"
        );
        libraries.insert(category.clone(), library);
    }
    Ok(libraries)
}

async fn build_category(
    root: &Path,
    category: &str,
    prober: &dyn DurationProber,
) -> LibraryResult<Library> {
    let folder = root.join(category);
    if !folder.is_dir() {
        warn!(path = %folder.display(), "category folder missing");
        return Ok(Library::default());
    }

    let mut items = Vec::new();
    for entry in WalkDir::new(&folder).into_iter().filter_map(|entry| {
        entry
            .map_err(|error| debug!(%error, "skipping unreadable entry"))
            .ok()
    }) {
        let path = entry.path();
        if !entry.file_type().is_file() || !has_media_extension(path) {
            continue;
        }
        let duration = match prober.probe(path).await {
            Ok(duration) => duration,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                return Err(LibraryError::ProberMissing(path.to_path_buf()));
            }
            Err(error) => {
                warn!(path = %path.display(), %error, "probe failed, dropping item");
                continue;
            }
        };
        let Some(duration_ms) = parse_duration_ms(&duration) else {
            warn!(path = %path.display(), duration, "unparseable duration, dropping item");
            continue;
        };
        let name = path
            .file_stem()
            .map(|stem| sanitize_name(&stem.to_string_lossy()))
            .unwrap_or_default();
        let group = path
            .parent()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        items.push(ContentItem {
            path: path.to_path_buf(),
            category: category.to_string(),
            name,
            duration,
            duration_ms,
            group,
        });
    }

    items.shuffle(&mut rand::thread_rng());
    Ok(Library::new(items))
}

fn has_media_extension(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            MEDIA_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Keep space, ASCII alphanumerics, hyphen and the Cyrillic letter block.
pub fn sanitize_name(raw: &str) -> String {
    raw.chars()
        .filter(|c| {
            *c == ' ' || *c == '-' || c.is_ascii_alphanumeric() || ('\u{0400}'..='\u{04FF}').contains(c)
        })
        .collect()
}

/// Parse a colon-delimited `H:MM:SS[.mmm]` duration into milliseconds.
/// Hours and minutes are unbounded integers; seconds are truncated to the
/// integer part; milliseconds default to zero when absent.
pub fn parse_duration_ms(value: &str) -> Option<i64> {
    let mut parts = value.trim().splitn(3, ':');
    let hours: i64 = parts.next()?.parse().ok()?;
    let minutes: i64 = parts.next()?.parse().ok()?;
    let seconds_part = parts.next()?;
    let (seconds, millis) = match seconds_part.split_once('.') {
        Some((whole, frac)) => {
            let frac: String = frac.chars().take(3).collect();
            (
                whole.parse::<i64>().ok()?,
                if frac.is_empty() {
                    0
                } else {
                    frac.parse::<i64>().ok()?
                },
            )
        }
        None => (seconds_part.parse::<i64>().ok()?, 0),
    };
    Some(hours * 3_600_000 + minutes * 60_000 + seconds * 1_000 + millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_keeps_allowed_alphabet() {
        assert_eq!(sanitize_name("Some Movie (2021)!"), "Some Movie 2021");
        assert_eq!(sanitize_name("клип-01"), "клип-01");
        assert_eq!(sanitize_name("a_b.c"), "abc");
    }

    #[test]
    fn media_extension_filter_is_case_insensitive() {
        assert!(has_media_extension(Path::new("a/b/clip.MP4")));
        assert!(has_media_extension(Path::new("clip.webm")));
        assert!(!has_media_extension(Path::new("notes.txt")));
        assert!(!has_media_extension(Path::new("noext")));
    }
}
