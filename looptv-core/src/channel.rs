use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::calendar::{self, Calendar};
use crate::config::ChannelConfig;
use crate::library::{self, DurationProber, FfprobeProber, Library, LibraryError};
use crate::playout::{
    control_channel, ControlHandle, FfmpegLauncher, PlayoutCommand, PlayoutError, SchedulePlanner,
    Supervisor, TranscodeLauncher,
};
use crate::schedule::{Schedule, ScheduleBuilder};
use crate::stream::StreamSettings;
use crate::weather::WeatherFetcher;

const CONTROL_CAPACITY: usize = 16;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("failed to prepare output directory {path}: {source}")]
    OutputDir { source: io::Error, path: PathBuf },
    #[error("library error: {0}")]
    Library(#[from] LibraryError),
    #[error("playout error: {0}")]
    Playout(#[from] PlayoutError),
}

pub type ChannelResult<T> = Result<T, ChannelError>;

/// Rebuilds the schedule from scratch: refresh collaborator inputs, rescan
/// the content tree, reload the calendar wholesale, then materialize.
/// Library cursors reset with the rescan; within one schedule they still
/// guarantee round-robin coverage.
pub struct ChannelPlanner {
    video_root: PathBuf,
    categories: Vec<String>,
    ad_category: String,
    calendar_path: Option<PathBuf>,
    calendar_url: Option<String>,
    builder: ScheduleBuilder,
    prober: Arc<dyn DurationProber>,
    weather: Option<WeatherFetcher>,
}

impl ChannelPlanner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        video_root: PathBuf,
        categories: Vec<String>,
        ad_category: String,
        calendar_path: Option<PathBuf>,
        calendar_url: Option<String>,
        builder: ScheduleBuilder,
        prober: Arc<dyn DurationProber>,
        weather: Option<WeatherFetcher>,
    ) -> Self {
        Self {
            video_root,
            categories,
            ad_category,
            calendar_path,
            calendar_url,
            builder,
            prober,
            weather,
        }
    }

    fn load_calendar(&self) -> Option<Calendar> {
        let path = self.calendar_path.as_ref()?;
        match Calendar::load(path) {
            Ok(calendar) => Some(calendar),
            Err(error) => {
                // Recoverable: an empty calendar resolves nothing, so all
                // non-ad slots are skipped until the file comes back.
                warn!(path = %path.display(), %error, "calendar unavailable, using empty calendar");
                Some(Calendar::default())
            }
        }
    }

    fn split_ads(
        &self,
        libraries: &mut HashMap<String, Library>,
    ) -> (Library, Library) {
        let ads = libraries.remove(&self.ad_category).unwrap_or_default();
        let flat = Library::merged(libraries.values());
        (flat, ads)
    }
}

#[async_trait]
impl SchedulePlanner for ChannelPlanner {
    async fn rebuild(&mut self, now: DateTime<Utc>) -> crate::library::LibraryResult<Schedule> {
        if let Some(weather) = &self.weather {
            if let Err(error) = weather.refresh().await {
                warn!(%error, "weather refresh failed, overlay stays stale");
            }
        }
        if let (Some(url), Some(path)) = (&self.calendar_url, &self.calendar_path) {
            if let Err(error) = calendar::fetch_calendar(url, path).await {
                warn!(%error, "calendar refresh failed, using local copy");
            }
        }
        let mut libraries =
            library::build_libraries(&self.video_root, &self.categories, self.prober.as_ref())
                .await?;
        let schedule = match self.calendar_path {
            Some(_) => {
                let calendar = self.load_calendar().unwrap_or_default();
                self.builder.build(&calendar, &mut libraries, now)
            }
            None => {
                let (mut flat, mut ads) = self.split_ads(&mut libraries);
                self.builder.build_flat(&mut flat, &mut ads, now)
            }
        };
        Ok(schedule)
    }
}

/// One broadcast channel: configuration, planner and supervisor bound into a
/// single explicit context. Nothing here is global, so tests can run several
/// channels side by side.
pub struct Channel {
    supervisor: Supervisor<ChannelPlanner>,
    commands: mpsc::Receiver<PlayoutCommand>,
    control: ControlHandle,
}

impl Channel {
    /// Prepare the output directory, refresh collaborators and materialize
    /// the first schedule. Fails loudly only on configuration errors: an
    /// uncreatable output directory or a missing prober executable.
    pub async fn start(config: ChannelConfig) -> ChannelResult<Self> {
        let settings = StreamSettings::from_config(&config);
        prepare_output_dir(&settings.output_dir)?;

        let weather = config
            .weather
            .enabled
            .then(|| WeatherFetcher::new(config.weather.url.clone(), &settings.weather_file));
        let prober: Arc<dyn DurationProber> =
            Arc::new(FfprobeProber::new(&config.ffmpeg.ffprobe));
        let launcher: Arc<dyn TranscodeLauncher> =
            Arc::new(FfmpegLauncher::new(&config.ffmpeg.binary));

        let calendar_path = config
            .paths
            .calendar
            .as_ref()
            .map(|path| config.resolve_path(path));
        let wrap = calendar_path.is_none();
        let builder = ScheduleBuilder::new(
            config.schedule.length,
            config.schedule.ad_every,
            config.schedule.ad_category.clone(),
        );
        let mut planner = ChannelPlanner::new(
            config.resolve_path(&config.paths.video_root),
            config.schedule.categories.clone(),
            config.schedule.ad_category.clone(),
            calendar_path,
            config.paths.calendar_url.clone(),
            builder,
            prober,
            weather,
        );

        let schedule = planner.rebuild(Utc::now()).await?;
        info!(slots = schedule.len(), wrap, "channel ready");

        let supervisor = Supervisor::new(
            schedule,
            planner,
            launcher,
            settings,
            wrap,
            config.schedule.low_watermark,
        );
        let (control, commands) = control_channel(CONTROL_CAPACITY);
        Ok(Self {
            supervisor,
            commands,
            control,
        })
    }

    pub fn control(&self) -> ControlHandle {
        self.control.clone()
    }

    /// Consume the channel and run the playout loop until shutdown.
    pub async fn run(self) -> ChannelResult<()> {
        self.supervisor.run(self.commands).await?;
        Ok(())
    }
}

/// Create the output directory and drop stale stream files from a previous
/// run. Failure here is a configuration error, not a runtime fault.
fn prepare_output_dir(output_dir: &PathBuf) -> ChannelResult<()> {
    std::fs::create_dir_all(output_dir).map_err(|source| ChannelError::OutputDir {
        source,
        path: output_dir.clone(),
    })?;
    let entries = std::fs::read_dir(output_dir).map_err(|source| ChannelError::OutputDir {
        source,
        path: output_dir.clone(),
    })?;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("stream") && (name.ends_with(".ts") || name.ends_with(".m3u8")) {
            if let Err(error) = std::fs::remove_file(entry.path()) {
                warn!(file = %name, %error, "failed to remove stale stream file");
            }
        }
    }
    Ok(())
}
