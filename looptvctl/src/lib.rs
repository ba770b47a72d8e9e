use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;
use looptv_core::{
    load_channel_config, resolve_category, Channel, ChannelConfig, ChannelPlanner, FfprobeProber,
    ScheduleBuilder, SchedulePlanner, SegmentReclaimer,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] looptv_core::ConfigError),
    #[error("channel error: {0}")]
    Channel(#[from] looptv_core::ChannelError),
    #[error("library error: {0}")]
    Library(#[from] looptv_core::LibraryError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("invalid timestamp: {0}")]
    Timestamp(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "looptv broadcast channel control", long_about = None)]
pub struct Cli {
    /// Path to the channel config
    #[arg(long, default_value = "configs/looptv.toml")]
    pub config: PathBuf,
    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the channel daemon
    Run,
    /// Materialize a schedule without playing it
    Schedule(ScheduleArgs),
    /// Resolve the calendar category for an instant
    Resolve(ResolveArgs),
    /// Delete output segments not referenced by the live manifest
    Reclaim,
    /// Verify configured paths and external tools
    Health,
}

#[derive(Args, Debug)]
pub struct ScheduleArgs {
    /// Number of slots to materialize (defaults to the configured length)
    #[arg(long)]
    pub length: Option<usize>,
}

#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// RFC 3339 instant, defaults to now
    #[arg(long)]
    pub at: Option<String>,
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = load_channel_config(&cli.config)?;

    match &cli.command {
        Commands::Run => {
            let channel = Channel::start(config).await?;
            channel.run().await?;
        }
        Commands::Schedule(args) => {
            let preview = preview_schedule(&config, args).await?;
            render(&preview, cli.format)?;
        }
        Commands::Resolve(args) => {
            let result = resolve(&config, args)?;
            render(&result, cli.format)?;
        }
        Commands::Reclaim => {
            let reclaimer =
                SegmentReclaimer::new(config.resolve_path(&config.paths.output_dir));
            let removed = reclaimer.reclaim();
            render(&ReclaimResult { removed }, cli.format)?;
        }
        Commands::Health => {
            let report = health_check(&config).await;
            render(&report, cli.format)?;
        }
    }
    Ok(())
}

async fn preview_schedule(config: &ChannelConfig, args: &ScheduleArgs) -> Result<SchedulePreview> {
    let builder = ScheduleBuilder::new(
        args.length.unwrap_or(config.schedule.length),
        config.schedule.ad_every,
        config.schedule.ad_category.clone(),
    );
    let mut planner = ChannelPlanner::new(
        config.resolve_path(&config.paths.video_root),
        config.schedule.categories.clone(),
        config.schedule.ad_category.clone(),
        config
            .paths
            .calendar
            .as_ref()
            .map(|path| config.resolve_path(path)),
        None,
        builder,
        Arc::new(FfprobeProber::new(&config.ffmpeg.ffprobe)),
        None,
    );
    let schedule = planner.rebuild(Utc::now()).await?;
    Ok(SchedulePreview {
        entries: schedule
            .iter()
            .enumerate()
            .map(|(index, entry)| PreviewEntry {
                index,
                name: entry.item.name.clone(),
                category: entry.item.category.clone(),
                group: entry.item.group.clone(),
                duration: entry.item.duration.clone(),
                start: entry.start,
            })
            .collect(),
    })
}

fn resolve(config: &ChannelConfig, args: &ResolveArgs) -> Result<ResolveResult> {
    let at = match &args.at {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map_err(|_| AppError::Timestamp(raw.clone()))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };
    let category = config
        .paths
        .calendar
        .as_ref()
        .and_then(|path| resolve_category(config.resolve_path(path), at));
    Ok(ResolveResult { at, category })
}

async fn health_check(config: &ChannelConfig) -> Vec<HealthEntry> {
    let mut results = Vec::new();
    results.push(check_directory(
        "video_root",
        &config.resolve_path(&config.paths.video_root),
    ));
    results.push(check_directory(
        "output_dir",
        &config.resolve_path(&config.paths.output_dir),
    ));
    if let Some(calendar) = &config.paths.calendar {
        results.push(check_file("calendar", &config.resolve_path(calendar)));
    }
    results.push(check_file(
        "overlay_image",
        &config.resolve_path(&config.paths.overlay_image),
    ));
    results.push(check_file("font", &config.resolve_path(&config.paths.font)));
    results.push(check_binary("ffmpeg", &config.ffmpeg.binary).await);
    results.push(check_binary("ffprobe", &config.ffmpeg.ffprobe).await);
    results
}

fn check_directory(name: &str, path: &std::path::Path) -> HealthEntry {
    if path.is_dir() {
        HealthEntry::ok(name, path.display().to_string())
    } else {
        HealthEntry::error(name, format!("{} missing", path.display()))
    }
}

fn check_file(name: &str, path: &std::path::Path) -> HealthEntry {
    if path.is_file() {
        HealthEntry::ok(name, path.display().to_string())
    } else {
        HealthEntry::warn(name, format!("{} missing", path.display()))
    }
}

async fn check_binary(name: &str, binary: &str) -> HealthEntry {
    match tokio::process::Command::new(binary)
        .arg("-version")
        .output()
        .await
    {
        Ok(output) if output.status.success() => {
            let first_line = String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .unwrap_or("")
                .to_string();
            HealthEntry::ok(name, first_line)
        }
        Ok(output) => HealthEntry::warn(name, format!("exited with {:?}", output.status.code())),
        Err(error) => HealthEntry::error(name, format!("{binary}: {error}")),
    }
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug, Serialize)]
pub struct SchedulePreview {
    pub entries: Vec<PreviewEntry>,
}

#[derive(Debug, Serialize)]
pub struct PreviewEntry {
    pub index: usize,
    pub name: String,
    pub category: String,
    pub group: String,
    pub duration: String,
    pub start: DateTime<Utc>,
}

impl DisplayFallback for SchedulePreview {
    fn display(&self) -> String {
        if self.entries.is_empty() {
            return "schedule is empty".to_string();
        }
        self.entries
            .iter()
            .map(|entry| {
                format!(
                    "{:>3} {} [{}] {} ({})",
                    entry.index,
                    entry.start.format("%H:%M:%S"),
                    entry.category,
                    entry.name,
                    entry.duration
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct ResolveResult {
    pub at: DateTime<Utc>,
    pub category: Option<String>,
}

impl DisplayFallback for ResolveResult {
    fn display(&self) -> String {
        match &self.category {
            Some(category) => format!("{} -> {}", self.at.to_rfc3339(), category),
            None => format!("{} -> no program", self.at.to_rfc3339()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReclaimResult {
    pub removed: usize,
}

impl DisplayFallback for ReclaimResult {
    fn display(&self) -> String {
        format!("removed {} stale segments", self.removed)
    }
}

#[derive(Debug, Serialize)]
pub struct HealthEntry {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub enum CheckStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "error")]
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Warn => "WARN",
            CheckStatus::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

impl HealthEntry {
    fn ok(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Ok,
            detail: detail.into(),
        }
    }

    fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Warn,
            detail: detail.into(),
        }
    }

    fn error(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Error,
            detail: detail.into(),
        }
    }
}

impl DisplayFallback for Vec<HealthEntry> {
    fn display(&self) -> String {
        self.iter()
            .map(|entry| {
                format!(
                    "[{status}] {name}: {detail}",
                    status = entry.status,
                    name = entry.name,
                    detail = entry.detail
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
