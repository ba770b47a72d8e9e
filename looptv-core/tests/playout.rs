use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use looptv_core::{
    control_channel, ActiveTranscode, ContentItem, LibraryError, LibraryResult, PlayoutError,
    Schedule, ScheduleEntry, SchedulePlanner, StreamSettings, Supervisor, TranscodeExit,
    TranscodeLauncher,
};
use tokio::sync::{mpsc, Notify};

fn item(name: &str) -> ContentItem {
    ContentItem {
        path: format!("video/music/{name}.mp4").into(),
        category: "music".to_string(),
        name: name.to_string(),
        duration: "0:00:10.000".to_string(),
        duration_ms: 10_000,
        group: "music".to_string(),
    }
}

fn schedule(names: &[&str]) -> Schedule {
    names
        .iter()
        .map(|name| ScheduleEntry {
            item: item(name),
            start: Utc::now(),
        })
        .collect()
}

fn settings(output_dir: &std::path::Path) -> StreamSettings {
    StreamSettings {
        channel_name: "usual tv".to_string(),
        resolution: "720:480".to_string(),
        overlay_image: "overlay.png".into(),
        font: "font.ttf".into(),
        weather_file: "weather.txt".into(),
        output_dir: output_dir.to_path_buf(),
        log_level: "error".to_string(),
        hls_time: 0.25,
        hls_list_size: 5,
        segment_wrap: 6,
    }
}

/// What the next launched transcode should do.
#[derive(Debug, Clone, Copy)]
enum Script {
    Exit(i32),
    /// Block until terminated.
    Hang,
}

struct ScriptedLauncher {
    scripts: Mutex<VecDeque<Script>>,
    launched: mpsc::UnboundedSender<String>,
}

impl ScriptedLauncher {
    fn new(scripts: &[Script]) -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (launched, rx) = mpsc::unbounded_channel();
        let launcher = Arc::new(Self {
            scripts: Mutex::new(scripts.iter().copied().collect()),
            launched,
        });
        (launcher, rx)
    }
}

#[async_trait]
impl TranscodeLauncher for ScriptedLauncher {
    async fn launch(&self, args: &[String]) -> io::Result<Box<dyn ActiveTranscode>> {
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script::Exit(0));
        // args[3] is the input path; good enough to identify the item.
        let _ = self.launched.send(args[3].clone());
        match script {
            Script::Exit(code) => Ok(Box::new(ImmediateTranscode { code })),
            Script::Hang => Ok(Box::new(HangingTranscode {
                stop: Arc::new(Notify::new()),
            })),
        }
    }
}

struct ImmediateTranscode {
    code: i32,
}

#[async_trait]
impl ActiveTranscode for ImmediateTranscode {
    async fn wait(&mut self) -> io::Result<TranscodeExit> {
        Ok(TranscodeExit::Code(self.code))
    }

    async fn terminate(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct HangingTranscode {
    stop: Arc<Notify>,
}

#[async_trait]
impl ActiveTranscode for HangingTranscode {
    async fn wait(&mut self) -> io::Result<TranscodeExit> {
        self.stop.notified().await;
        Ok(TranscodeExit::Terminated)
    }

    async fn terminate(&mut self) -> io::Result<()> {
        self.stop.notify_one();
        Ok(())
    }
}

struct BrokenLauncher;

#[async_trait]
impl TranscodeLauncher for BrokenLauncher {
    async fn launch(&self, _args: &[String]) -> io::Result<Box<dyn ActiveTranscode>> {
        Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))
    }
}

struct TestPlanner {
    template: Option<Schedule>,
    rebuilds: Arc<AtomicUsize>,
}

impl TestPlanner {
    fn failing() -> (Self, Arc<AtomicUsize>) {
        let rebuilds = Arc::new(AtomicUsize::new(0));
        (
            Self {
                template: None,
                rebuilds: rebuilds.clone(),
            },
            rebuilds,
        )
    }

    fn with_template(template: Schedule) -> (Self, Arc<AtomicUsize>) {
        let rebuilds = Arc::new(AtomicUsize::new(0));
        (
            Self {
                template: Some(template),
                rebuilds: rebuilds.clone(),
            },
            rebuilds,
        )
    }
}

#[async_trait]
impl SchedulePlanner for TestPlanner {
    async fn rebuild(&mut self, _now: DateTime<Utc>) -> LibraryResult<Schedule> {
        self.rebuilds.fetch_add(1, Ordering::SeqCst);
        match &self.template {
            Some(template) => Ok(template.clone()),
            None => Err(LibraryError::Empty),
        }
    }
}

#[tokio::test]
async fn failed_transcode_is_skipped_not_retried() {
    let dir = tempfile::tempdir().unwrap();
    let (launcher, mut launched) =
        ScriptedLauncher::new(&[Script::Exit(0), Script::Exit(1), Script::Exit(0)]);
    let (planner, rebuilds) = TestPlanner::failing();
    let mut supervisor = Supervisor::new(
        schedule(&["a", "b", "c"]),
        planner,
        launcher,
        settings(dir.path()),
        false,
        0,
    );
    let (_handle, mut commands) = control_channel(4);

    let mut events = Vec::new();
    for _ in 0..3 {
        events.push(supervisor.run_once(&mut commands).await.unwrap().unwrap());
    }

    let names: Vec<&str> = events.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, ["a", "b", "c"]);
    assert_eq!(events[1].exit, TranscodeExit::Code(1));
    assert_eq!(events[2].exit, TranscodeExit::Code(0));
    let positions: Vec<usize> = events.iter().map(|e| e.position_after).collect();
    assert_eq!(positions, [1, 2, 3]);

    // The failed item was launched once and never again.
    let mut launches = Vec::new();
    while let Ok(path) = launched.try_recv() {
        launches.push(path);
    }
    assert_eq!(launches.len(), 3);
    assert_eq!(rebuilds.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn exhausted_schedule_idles_when_rebuild_fails() {
    let dir = tempfile::tempdir().unwrap();
    let (launcher, _launched) = ScriptedLauncher::new(&[Script::Exit(0)]);
    let (planner, rebuilds) = TestPlanner::failing();
    let mut supervisor = Supervisor::new(
        schedule(&["a"]),
        planner,
        launcher,
        settings(dir.path()),
        false,
        0,
    );
    let (_handle, mut commands) = control_channel(4);

    assert!(supervisor.run_once(&mut commands).await.unwrap().is_some());
    // Position is past the end and the planner keeps failing.
    assert!(supervisor.run_once(&mut commands).await.unwrap().is_none());
    assert!(rebuilds.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn skip_terminates_the_active_transcode() {
    let dir = tempfile::tempdir().unwrap();
    let (launcher, mut launched) = ScriptedLauncher::new(&[Script::Hang]);
    let (planner, _rebuilds) = TestPlanner::failing();
    let mut supervisor = Supervisor::new(
        schedule(&["a", "b"]),
        planner,
        launcher,
        settings(dir.path()),
        false,
        0,
    );
    let (handle, mut commands) = control_channel(4);

    let task = tokio::spawn(async move {
        let event = supervisor.run_once(&mut commands).await;
        (supervisor, event)
    });
    launched.recv().await.unwrap();
    handle.skip().await.unwrap();

    let (supervisor, event) = task.await.unwrap();
    let event = event.unwrap().unwrap();
    assert_eq!(event.exit, TranscodeExit::Terminated);
    assert_eq!(event.position_after, 1);
    assert_eq!(supervisor.position(), 1);
}

#[tokio::test]
async fn seek_jumps_to_the_requested_slot() {
    let dir = tempfile::tempdir().unwrap();
    let (launcher, mut launched) = ScriptedLauncher::new(&[Script::Hang, Script::Exit(0)]);
    let (planner, _rebuilds) = TestPlanner::failing();
    let mut supervisor = Supervisor::new(
        schedule(&["a", "b", "c"]),
        planner,
        launcher,
        settings(dir.path()),
        false,
        0,
    );
    let (handle, mut commands) = control_channel(4);

    let task = tokio::spawn(async move {
        let event = supervisor.run_once(&mut commands).await;
        (supervisor, commands, event)
    });
    launched.recv().await.unwrap();
    handle.seek(2).await.unwrap();

    let (mut supervisor, mut commands, event) = task.await.unwrap();
    let event = event.unwrap().unwrap();
    assert_eq!(event.exit, TranscodeExit::Terminated);
    assert_eq!(event.position_after, 2);

    // The next slot is the seek target, not the one after the interrupted item.
    let event = supervisor.run_once(&mut commands).await.unwrap().unwrap();
    assert_eq!(event.name, "c");
}

#[tokio::test]
async fn status_reports_the_playing_item() {
    let dir = tempfile::tempdir().unwrap();
    let (launcher, mut launched) = ScriptedLauncher::new(&[Script::Hang]);
    let (planner, _rebuilds) = TestPlanner::failing();
    let mut supervisor = Supervisor::new(
        schedule(&["a", "b"]),
        planner,
        launcher,
        settings(dir.path()),
        false,
        0,
    );
    let (handle, mut commands) = control_channel(4);

    let task = tokio::spawn(async move {
        let event = supervisor.run_once(&mut commands).await;
        (supervisor, event)
    });
    launched.recv().await.unwrap();

    let status = handle.status().await.unwrap();
    assert_eq!(status.playing.as_deref(), Some("a"));
    assert_eq!(status.position, 0);
    assert_eq!(status.entries.len(), 2);
    assert!(status.entries[0].current);
    assert!(!status.entries[1].current);

    handle.skip().await.unwrap();
    task.await.unwrap().1.unwrap().unwrap();
}

#[tokio::test]
async fn refill_rebuilds_after_the_current_slot() {
    let dir = tempfile::tempdir().unwrap();
    let (launcher, mut launched) = ScriptedLauncher::new(&[Script::Hang]);
    let (planner, rebuilds) = TestPlanner::with_template(schedule(&["x", "y", "z"]));
    let mut supervisor = Supervisor::new(
        schedule(&["a", "b", "c"]),
        planner,
        launcher,
        settings(dir.path()),
        false,
        0,
    );
    let (handle, mut commands) = control_channel(4);

    let task = tokio::spawn(async move {
        let event = supervisor.run_once(&mut commands).await;
        (supervisor, event)
    });
    launched.recv().await.unwrap();
    handle.refill().await.unwrap();
    handle.skip().await.unwrap();

    let (supervisor, event) = task.await.unwrap();
    event.unwrap().unwrap();
    assert_eq!(rebuilds.load(Ordering::SeqCst), 1);
    assert_eq!(supervisor.position(), 0);
    assert_eq!(supervisor.schedule()[0].item.name, "x");
}

#[tokio::test]
async fn low_watermark_triggers_an_early_rebuild() {
    let dir = tempfile::tempdir().unwrap();
    let (launcher, _launched) = ScriptedLauncher::new(&[Script::Exit(0)]);
    let (planner, rebuilds) = TestPlanner::with_template(schedule(&["x", "y", "z"]));
    let mut supervisor = Supervisor::new(
        schedule(&["a", "b", "c"]),
        planner,
        launcher,
        settings(dir.path()),
        false,
        2,
    );
    let (_handle, mut commands) = control_channel(4);

    let event = supervisor.run_once(&mut commands).await.unwrap().unwrap();
    assert_eq!(event.name, "a");
    assert_eq!(rebuilds.load(Ordering::SeqCst), 1);
    assert_eq!(supervisor.position(), 0);
    assert_eq!(supervisor.schedule().len(), 3);
}

#[tokio::test]
async fn wrap_mode_loops_without_rebuilding() {
    let dir = tempfile::tempdir().unwrap();
    let (launcher, _launched) =
        ScriptedLauncher::new(&[Script::Exit(0), Script::Exit(0), Script::Exit(0)]);
    let (planner, rebuilds) = TestPlanner::failing();
    let mut supervisor = Supervisor::new(
        schedule(&["a", "b"]),
        planner,
        launcher,
        settings(dir.path()),
        true,
        0,
    );
    let (_handle, mut commands) = control_channel(4);

    let mut names = Vec::new();
    for _ in 0..3 {
        let event = supervisor.run_once(&mut commands).await.unwrap().unwrap();
        names.push(event.name);
    }
    assert_eq!(names, ["a", "b", "a"]);
    assert_eq!(rebuilds.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn empty_schedule_yields_idle() {
    let dir = tempfile::tempdir().unwrap();
    let (launcher, _launched) = ScriptedLauncher::new(&[]);
    let (planner, rebuilds) = TestPlanner::failing();
    let mut supervisor = Supervisor::new(
        Vec::new(),
        planner,
        launcher,
        settings(dir.path()),
        false,
        0,
    );
    let (_handle, mut commands) = control_channel(4);

    assert!(supervisor.run_once(&mut commands).await.unwrap().is_none());
    assert_eq!(rebuilds.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn spawn_failure_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let (planner, _rebuilds) = TestPlanner::failing();
    let mut supervisor = Supervisor::new(
        schedule(&["a"]),
        planner,
        Arc::new(BrokenLauncher),
        settings(dir.path()),
        false,
        0,
    );
    let (_handle, mut commands) = control_channel(4);

    let result = supervisor.run_once(&mut commands).await;
    assert!(matches!(result, Err(PlayoutError::Spawn { .. })));
}

#[tokio::test]
async fn queued_seek_applies_before_the_next_slot() {
    let dir = tempfile::tempdir().unwrap();
    let (launcher, _launched) = ScriptedLauncher::new(&[Script::Exit(0)]);
    let (planner, _rebuilds) = TestPlanner::failing();
    let mut supervisor = Supervisor::new(
        schedule(&["a", "b", "c"]),
        planner,
        launcher,
        settings(dir.path()),
        false,
        0,
    );
    let (handle, mut commands) = control_channel(4);

    handle.seek(2).await.unwrap();
    let event = supervisor.run_once(&mut commands).await.unwrap().unwrap();
    assert_eq!(event.name, "c");
}
