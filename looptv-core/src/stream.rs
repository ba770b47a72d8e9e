use std::path::PathBuf;

use crate::config::ChannelConfig;
use crate::library::ContentItem;

/// Live manifest filename inside the output directory. ffmpeg derives the
/// segment names from it (`stream0.ts`, `stream1.ts`, ...).
pub const MANIFEST_NAME: &str = "stream.m3u8";

/// Everything needed to compose one transcoder invocation.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub channel_name: String,
    pub resolution: String,
    pub overlay_image: PathBuf,
    pub font: PathBuf,
    pub weather_file: PathBuf,
    pub output_dir: PathBuf,
    pub log_level: String,
    pub hls_time: f64,
    pub hls_list_size: u32,
    pub segment_wrap: u32,
}

impl StreamSettings {
    pub fn from_config(config: &ChannelConfig) -> Self {
        Self {
            channel_name: config.channel.name.clone(),
            resolution: config.channel.resolution.clone(),
            overlay_image: config.resolve_path(&config.paths.overlay_image),
            font: config.resolve_path(&config.paths.font),
            weather_file: config.resolve_path(&config.paths.weather_file),
            output_dir: config.resolve_path(&config.paths.output_dir),
            log_level: config.ffmpeg.log_level.clone(),
            hls_time: config.ffmpeg.hls_time,
            hls_list_size: config.ffmpeg.hls_list_size,
            segment_wrap: config.ffmpeg.segment_wrap,
        }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.output_dir.join(MANIFEST_NAME)
    }
}

/// Argument vector for one playout invocation: source plus overlay image in,
/// scaled and padded video with drawtext overlays out, rolling HLS window.
pub fn compose(item: &ContentItem, next_name: Option<&str>, settings: &StreamSettings) -> Vec<String> {
    let resolution = &settings.resolution;
    let filter = format!(
        "scale={resolution}:force_original_aspect_ratio=decrease,\
         pad={resolution}:(ow-iw)/2:(oh-ih)/2,\
         overlay=0:0,\
         drawtext=fontsize=18:fontfile={font}:fontcolor=white:textfile={weather}:x=w-tw+20:y=(-35),\
         drawtext=fontsize=25:fontcolor=white:text='{channel}':x=25:y=25,\
         drawtext=fontsize=11:fontcolor=white:text='%{{pts\\:hms}}':x=(6):y=h-th-13,\
         drawtext=fontsize=11:fontcolor=white:text='{duration}':x=(10):y=h-th-2,\
         drawtext=fontsize=16:fontcolor=white:text='{name}':x=(w-tw-25):y=h-th-35,\
         drawtext=fontsize=13:fontcolor=white:text='{preview}':x=(w-tw-25):y=h-th-19,\
         drawtext=fontsize=18:fontcolor=white:text='%{{localtime\\:%T}}':x=35:y=83[v]",
        font = settings.font.display(),
        weather = settings.weather_file.display(),
        channel = escape_drawtext(&settings.channel_name),
        duration = escape_drawtext(&format!("  0{}", item.duration)),
        name = escape_drawtext(&item.name),
        preview = escape_drawtext(next_name.unwrap_or(&item.category)),
    );

    vec![
        "-nostdin".to_string(),
        "-re".to_string(),
        "-i".to_string(),
        item.path.to_string_lossy().to_string(),
        "-i".to_string(),
        settings.overlay_image.to_string_lossy().to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-c:a".to_string(),
        "copy".to_string(),
        "-loglevel".to_string(),
        settings.log_level.clone(),
        "-filter_complex".to_string(),
        filter,
        "-map".to_string(),
        "[v]".to_string(),
        "-map".to_string(),
        "0:a".to_string(),
        "-hls_time".to_string(),
        settings.hls_time.to_string(),
        "-hls_list_size".to_string(),
        settings.hls_list_size.to_string(),
        "-f".to_string(),
        "hls".to_string(),
        "-segment_wrap".to_string(),
        settings.segment_wrap.to_string(),
        "-hls_flags".to_string(),
        "delete_segments+append_list+omit_endlist".to_string(),
        settings.manifest_path().to_string_lossy().to_string(),
    ]
}

/// Colons separate drawtext options, so literal ones must be escaped.
fn escape_drawtext(text: &str) -> String {
    text.replace('\\', "\\\\").replace(':', "\\:")
}
