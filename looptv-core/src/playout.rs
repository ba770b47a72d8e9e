use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::reclaim::SegmentReclaimer;
use crate::schedule::{Schedule, ScheduleEntry};
use crate::stream::{self, StreamSettings};

/// Sleep between attempts while the schedule is empty.
const IDLE_BACKOFF: StdDuration = StdDuration::from_secs(5);

#[derive(Debug, Error)]
pub enum PlayoutError {
    #[error("failed to spawn transcoder for {item}: {source}")]
    Spawn { source: io::Error, item: PathBuf },
    #[error("transcoder wait failed: {0}")]
    Wait(#[from] io::Error),
}

pub type PlayoutResult<T> = Result<T, PlayoutError>;

/// How the active transcoding process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeExit {
    Code(i32),
    /// Killed by signal, i.e. an external skip or seek.
    Terminated,
}

impl TranscodeExit {
    pub fn is_success(&self) -> bool {
        matches!(self, TranscodeExit::Code(0))
    }
}

#[async_trait]
pub trait ActiveTranscode: Send {
    async fn wait(&mut self) -> io::Result<TranscodeExit>;
    async fn terminate(&mut self) -> io::Result<()>;
}

#[async_trait]
pub trait TranscodeLauncher: Send + Sync {
    async fn launch(&self, args: &[String]) -> io::Result<Box<dyn ActiveTranscode>>;
}

/// Spawns the real ffmpeg process.
#[derive(Debug, Clone)]
pub struct FfmpegLauncher {
    pub binary: PathBuf,
}

impl FfmpegLauncher {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl TranscodeLauncher for FfmpegLauncher {
    async fn launch(&self, args: &[String]) -> io::Result<Box<dyn ActiveTranscode>> {
        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        let child = command.spawn()?;
        Ok(Box::new(FfmpegTranscode { child }))
    }
}

struct FfmpegTranscode {
    child: Child,
}

#[async_trait]
impl ActiveTranscode for FfmpegTranscode {
    async fn wait(&mut self) -> io::Result<TranscodeExit> {
        let status = self.child.wait().await?;
        Ok(match status.code() {
            Some(code) => TranscodeExit::Code(code),
            None => TranscodeExit::Terminated,
        })
    }

    async fn terminate(&mut self) -> io::Result<()> {
        self.child.start_kill()
    }
}

/// Rebuild seam: the supervisor requests a fresh schedule through this and
/// never touches libraries directly.
#[async_trait]
pub trait SchedulePlanner: Send {
    async fn rebuild(&mut self, now: DateTime<Utc>) -> crate::library::LibraryResult<Schedule>;
}

/// Control surface boundary. HTTP or anything else sits on top of this.
#[derive(Debug)]
pub enum PlayoutCommand {
    Skip,
    Seek(usize),
    Refill,
    Status(oneshot::Sender<PlayoutStatus>),
}

#[derive(Debug, Clone)]
pub struct PlayoutStatus {
    pub position: usize,
    pub playing: Option<String>,
    pub entries: Vec<StatusEntry>,
}

#[derive(Debug, Clone)]
pub struct StatusEntry {
    pub index: usize,
    pub name: String,
    pub category: String,
    pub start: DateTime<Utc>,
    pub current: bool,
}

#[derive(Debug, Error)]
#[error("playout control channel closed")]
pub struct ControlClosed;

#[derive(Debug, Clone)]
pub struct ControlHandle {
    tx: mpsc::Sender<PlayoutCommand>,
}

impl ControlHandle {
    pub async fn skip(&self) -> Result<(), ControlClosed> {
        self.tx
            .send(PlayoutCommand::Skip)
            .await
            .map_err(|_| ControlClosed)
    }

    pub async fn seek(&self, position: usize) -> Result<(), ControlClosed> {
        self.tx
            .send(PlayoutCommand::Seek(position))
            .await
            .map_err(|_| ControlClosed)
    }

    pub async fn refill(&self) -> Result<(), ControlClosed> {
        self.tx
            .send(PlayoutCommand::Refill)
            .await
            .map_err(|_| ControlClosed)
    }

    pub async fn status(&self) -> Result<PlayoutStatus, ControlClosed> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PlayoutCommand::Status(reply_tx))
            .await
            .map_err(|_| ControlClosed)?;
        reply_rx.await.map_err(|_| ControlClosed)
    }
}

pub fn control_channel(capacity: usize) -> (ControlHandle, mpsc::Receiver<PlayoutCommand>) {
    let (tx, rx) = mpsc::channel(capacity);
    (ControlHandle { tx }, rx)
}

#[derive(Debug, Clone)]
pub struct PlayoutEvent {
    pub name: String,
    pub category: String,
    pub exit: TranscodeExit,
    pub position_after: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Owns the lifecycle of the single active transcoding process. One slot at
/// a time: select, launch, wait, classify, reap, advance. Exactly one child
/// can exist because the loop holds it by value through the whole cycle.
pub struct Supervisor<P: SchedulePlanner> {
    schedule: Schedule,
    position: usize,
    /// Wrap-around indexing; true only in calendar-less mode.
    wrap: bool,
    low_watermark: usize,
    planner: P,
    launcher: Arc<dyn TranscodeLauncher>,
    settings: StreamSettings,
    reclaimer: SegmentReclaimer,
    refill_requested: bool,
}

impl<P: SchedulePlanner> Supervisor<P> {
    pub fn new(
        schedule: Schedule,
        planner: P,
        launcher: Arc<dyn TranscodeLauncher>,
        settings: StreamSettings,
        wrap: bool,
        low_watermark: usize,
    ) -> Self {
        let reclaimer = SegmentReclaimer::new(&settings.output_dir);
        Self {
            schedule,
            position: 0,
            wrap,
            low_watermark,
            planner,
            launcher,
            settings,
            reclaimer,
            refill_requested: false,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Loop over `run_once` forever, sleeping while the schedule is empty.
    /// Stops only when the caller drops or aborts the future; a closed
    /// control channel merely ends command polling.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<PlayoutCommand>,
    ) -> PlayoutResult<()> {
        loop {
            match self.run_once(&mut commands).await? {
                Some(event) => {
                    debug!(
                        item = event.name,
                        position = event.position_after,
                        "slot complete"
                    );
                }
                None => tokio::time::sleep(IDLE_BACKOFF).await,
            }
        }
    }

    /// Process exactly one schedule slot. Returns `None` when the schedule is
    /// empty (idle); spawn failure is fatal, everything else advances.
    pub async fn run_once(
        &mut self,
        commands: &mut mpsc::Receiver<PlayoutCommand>,
    ) -> PlayoutResult<Option<PlayoutEvent>> {
        // Idle: absorb control traffic that arrived between slots.
        self.drain_pending(commands);

        if self.refill_requested
            || self.schedule.is_empty()
            || (!self.wrap && self.position >= self.schedule.len())
        {
            self.rebuild().await;
        }
        // Still empty or exhausted after a failed rebuild: idle, try later.
        if self.schedule.is_empty() || (!self.wrap && self.position >= self.schedule.len()) {
            return Ok(None);
        }

        let index = if self.wrap {
            self.position % self.schedule.len()
        } else {
            self.position
        };
        let entry = self.schedule[index].clone();
        let next_name = self.peek_next_name(index);

        // Launching
        let args = stream::compose(&entry.item, next_name.as_deref(), &self.settings);
        let mut active =
            self.launcher
                .launch(&args)
                .await
                .map_err(|source| PlayoutError::Spawn {
                    source,
                    item: entry.item.path.clone(),
                })?;
        let started_at = Utc::now();
        info!(
            item = entry.item.name,
            category = entry.item.category,
            position = self.position,
            "playout started"
        );

        // Playing: wait for the child while serving control events. The wait
        // future is recreated after each served command; both implementations
        // of `wait` are cancel safe.
        let mut pending_seek = None;
        let mut commands_open = true;
        let exit = loop {
            let command = tokio::select! {
                status = active.wait() => break status?,
                command = commands.recv(), if commands_open => command,
            };
            match command {
                Some(PlayoutCommand::Skip) => {
                    info!(item = entry.item.name, "skip requested");
                    if let Err(error) = active.terminate().await {
                        warn!(%error, "failed to terminate transcoder");
                    }
                }
                Some(PlayoutCommand::Seek(target)) => {
                    info!(target, "seek requested");
                    pending_seek = Some(target);
                    if let Err(error) = active.terminate().await {
                        warn!(%error, "failed to terminate transcoder");
                    }
                }
                Some(PlayoutCommand::Refill) => self.refill_requested = true,
                Some(PlayoutCommand::Status(reply)) => {
                    let _ = reply.send(self.status_snapshot(Some(&entry)));
                }
                None => commands_open = false,
            }
        };
        let finished_at = Utc::now();

        // Reaping: a bad exit is a skip event, never fatal.
        match exit {
            TranscodeExit::Code(0) => {
                info!(item = entry.item.name, "playout completed")
            }
            TranscodeExit::Code(code) => {
                warn!(
                    item = entry.item.name,
                    code,
                    duration = entry.item.duration,
                    "transcoder failed, skipping item"
                )
            }
            TranscodeExit::Terminated => {
                info!(item = entry.item.name, "playout interrupted")
            }
        }

        self.reclaimer.reclaim();

        self.position = pending_seek.unwrap_or(self.position + 1);
        if self.refill_requested
            || (!self.wrap && self.position + self.low_watermark >= self.schedule.len())
        {
            self.rebuild().await;
        }

        Ok(Some(PlayoutEvent {
            name: entry.item.name.clone(),
            category: entry.item.category.clone(),
            exit,
            position_after: self.position,
            started_at,
            finished_at,
        }))
    }

    fn drain_pending(&mut self, commands: &mut mpsc::Receiver<PlayoutCommand>) {
        while let Ok(command) = commands.try_recv() {
            match command {
                PlayoutCommand::Skip => {}
                PlayoutCommand::Seek(target) => self.position = target,
                PlayoutCommand::Refill => self.refill_requested = true,
                PlayoutCommand::Status(reply) => {
                    let _ = reply.send(self.status_snapshot(None));
                }
            }
        }
    }

    async fn rebuild(&mut self) {
        self.refill_requested = false;
        match self.planner.rebuild(Utc::now()).await {
            Ok(schedule) => {
                info!(slots = schedule.len(), "schedule rebuilt");
                self.schedule = schedule;
                self.position = 0;
            }
            Err(error) => {
                warn!(%error, "schedule rebuild failed, keeping current playlist");
            }
        }
    }

    fn peek_next_name(&self, index: usize) -> Option<String> {
        let next = index + 1;
        let entry = if self.wrap && !self.schedule.is_empty() {
            self.schedule.get(next % self.schedule.len())
        } else {
            self.schedule.get(next)
        }?;
        Some(entry.item.name.clone())
    }

    fn status_snapshot(&self, playing: Option<&ScheduleEntry>) -> PlayoutStatus {
        let current_index = if self.schedule.is_empty() {
            self.position
        } else if self.wrap {
            self.position % self.schedule.len()
        } else {
            self.position
        };
        PlayoutStatus {
            position: self.position,
            playing: playing.map(|entry| entry.item.name.clone()),
            entries: self
                .schedule
                .iter()
                .enumerate()
                .map(|(index, entry)| StatusEntry {
                    index,
                    name: entry.item.name.clone(),
                    category: entry.item.category.clone(),
                    start: entry.start,
                    current: index == current_index,
                })
                .collect(),
        }
    }
}
