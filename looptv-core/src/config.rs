use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ChannelConfig {
    pub channel: ChannelSection,
    pub paths: PathsSection,
    pub schedule: ScheduleSection,
    pub ffmpeg: FfmpegSection,
    pub weather: WeatherSection,
}

impl ChannelConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.paths.base_dir).join(path)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelSection {
    pub name: String,
    pub resolution: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub base_dir: String,
    pub video_root: String,
    pub output_dir: String,
    /// Recurring-event calendar file. Absent means calendar-less rotation.
    pub calendar: Option<String>,
    /// Remote source for the calendar file, refreshed on every rebuild.
    pub calendar_url: Option<String>,
    pub overlay_image: String,
    pub font: String,
    pub weather_file: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleSection {
    pub length: usize,
    pub ad_every: usize,
    pub ad_category: String,
    pub categories: Vec<String>,
    pub low_watermark: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FfmpegSection {
    pub binary: String,
    pub ffprobe: String,
    pub log_level: String,
    pub hls_time: f64,
    pub hls_list_size: u32,
    pub segment_wrap: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeatherSection {
    pub enabled: bool,
    pub url: String,
}

pub fn load_channel_config<P: AsRef<Path>>(path: P) -> Result<ChannelConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
