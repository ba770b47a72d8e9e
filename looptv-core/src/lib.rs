pub mod calendar;
pub mod channel;
pub mod config;
pub mod error;
pub mod library;
pub mod playout;
pub mod reclaim;
pub mod schedule;
pub mod stream;
pub mod weather;

pub use calendar::{
    fetch_calendar, resolve_category, Calendar, CalendarError, CalendarEvent, CalendarResult,
    Frequency, RecurrenceRule,
};
pub use channel::{Channel, ChannelError, ChannelPlanner, ChannelResult};
pub use config::{load_channel_config, ChannelConfig};
pub use error::{ConfigError, Result};
pub use library::{
    build_libraries, parse_duration_ms, sanitize_name, ContentItem, DurationProber, FfprobeProber,
    Library, LibraryError, LibraryResult, MEDIA_EXTENSIONS,
};
pub use playout::{
    control_channel, ActiveTranscode, ControlClosed, ControlHandle, FfmpegLauncher, PlayoutCommand,
    PlayoutError, PlayoutEvent, PlayoutResult, PlayoutStatus, SchedulePlanner, StatusEntry,
    Supervisor, TranscodeExit, TranscodeLauncher,
};
pub use reclaim::SegmentReclaimer;
pub use schedule::{Schedule, ScheduleBuilder, ScheduleEntry};
pub use stream::{StreamSettings, MANIFEST_NAME};
pub use weather::{WeatherError, WeatherFetcher};
