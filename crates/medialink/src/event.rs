// Events delivered to subscribers

use medialink_engine::{EventKind, LogLevel, MetaKey, ParsedStatus, PlayerState, RawEvent};

/// Events emitted by a `Media`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaEvent {
    ParsedChanged(ParsedStatus),
    /// Duration in milliseconds
    DurationChanged(i64),
    MetaChanged(MetaKey),
    StateChanged(PlayerState),
}

impl MediaEvent {
    pub(crate) fn from_raw(event: &RawEvent) -> Option<Self> {
        let value = i32::try_from(event.value).ok();
        match event.kind {
            EventKind::MediaParsedChanged => value.and_then(ParsedStatus::from_raw).map(MediaEvent::ParsedChanged),
            EventKind::MediaDurationChanged => Some(MediaEvent::DurationChanged(event.value)),
            EventKind::MediaMetaChanged => value.and_then(MetaKey::from_raw).map(MediaEvent::MetaChanged),
            EventKind::MediaStateChanged => value.and_then(PlayerState::from_raw).map(MediaEvent::StateChanged),
            _ => None,
        }
    }
}

/// Events emitted by a `MediaPlayer`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerEvent {
    Opening,
    Playing,
    Paused,
    Stopped,
    EndReached,
    EncounteredError,
    /// Position in milliseconds; throttled per subscriber
    TimeChanged(i64),
    /// Length in milliseconds
    LengthChanged(i64),
    MediaChanged,
}

impl PlayerEvent {
    pub(crate) fn from_raw(event: &RawEvent) -> Option<Self> {
        let event = match event.kind {
            EventKind::PlayerOpening => PlayerEvent::Opening,
            EventKind::PlayerPlaying => PlayerEvent::Playing,
            EventKind::PlayerPaused => PlayerEvent::Paused,
            EventKind::PlayerStopped => PlayerEvent::Stopped,
            EventKind::PlayerEndReached => PlayerEvent::EndReached,
            EventKind::PlayerEncounteredError => PlayerEvent::EncounteredError,
            EventKind::PlayerTimeChanged => PlayerEvent::TimeChanged(event.value),
            EventKind::PlayerLengthChanged => PlayerEvent::LengthChanged(event.value),
            EventKind::PlayerMediaChanged => PlayerEvent::MediaChanged,
            _ => return None,
        };
        Some(event)
    }
}

/// One engine log line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub level: LogLevel,
    pub module: String,
    pub message: String,
}

/// What travels through the relay queue
#[derive(Debug, Clone)]
pub(crate) enum Payload {
    Media(MediaEvent),
    Player(PlayerEvent),
    Log(LogEntry),
}

impl Payload {
    pub(crate) fn from_raw(event: &RawEvent) -> Option<Self> {
        if event.kind.is_media_event() {
            MediaEvent::from_raw(event).map(Payload::Media)
        } else {
            PlayerEvent::from_raw(event).map(Payload::Player)
        }
    }

    pub(crate) fn is_time_changed(&self) -> bool {
        matches!(self, Payload::Player(PlayerEvent::TimeChanged(_)))
    }
}
