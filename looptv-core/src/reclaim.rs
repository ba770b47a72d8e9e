use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use regex::Regex;
use tracing::{debug, warn};

use crate::stream::MANIFEST_NAME;

/// Deletes output segments no longer referenced by the live manifest,
/// bounding disk usage for the rolling window. Every failure here is a
/// no-op: the next pass after the manifest settles will self-correct.
#[derive(Debug)]
pub struct SegmentReclaimer {
    output_dir: PathBuf,
    reference: Regex,
    segment_name: Regex,
}

impl SegmentReclaimer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            reference: Regex::new(r"stream\d+\.ts").expect("static pattern"),
            segment_name: Regex::new(r"^stream\d+\.ts$").expect("static pattern"),
        }
    }

    /// Returns the number of segment files removed.
    pub fn reclaim(&self) -> usize {
        let manifest_path = self.output_dir.join(MANIFEST_NAME);
        let manifest = match fs::read_to_string(&manifest_path) {
            Ok(content) => content,
            Err(error) => {
                debug!(path = %manifest_path.display(), %error, "manifest unreadable, skipping reclaim");
                return 0;
            }
        };
        let referenced: HashSet<&str> = self
            .reference
            .find_iter(&manifest)
            .map(|m| m.as_str())
            .collect();

        let entries = match fs::read_dir(&self.output_dir) {
            Ok(entries) => entries,
            Err(error) => {
                warn!(path = %self.output_dir.display(), %error, "output directory unreadable");
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let name = file_name.to_string_lossy();
            if !self.segment_name.is_match(&name) || referenced.contains(name.as_ref()) {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(error) => {
                    warn!(segment = %name, %error, "failed to remove stale segment");
                }
            }
        }
        if removed > 0 {
            debug!(removed, "reclaimed stale segments");
        }
        removed
    }
}
