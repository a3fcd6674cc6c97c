// Native player objects
//
// Each play session runs on its own thread and paces packets against a
// `PlaybackClock` instead of an output device.

use crate::callback::{EventKind, EventManager, RawEvent};
use crate::clock::PlaybackClock;
use crate::decode::AudioDecoder;
use crate::demux::Demuxer;
use crate::error::{EngineError, Result};
use crate::instance::{emit, Instance};
use crate::media::MediaItem;
use crate::source::{open_source, CountingSource};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Longest uninterrupted sleep of a playback thread
const PACING_SLICE: Duration = Duration::from_millis(20);

/// Window over which bitrates are measured
const BITRATE_WINDOW: Duration = Duration::from_secs(1);

const NO_SEEK: i64 = -1;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayerState {
    NothingSpecial = 0,
    Opening = 1,
    /// Never entered: sources are local and the sink never starves
    Buffering = 2,
    Playing = 3,
    Paused = 4,
    Stopped = 5,
    Ended = 6,
    Error = 7,
}

impl PlayerState {
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(PlayerState::NothingSpecial),
            1 => Some(PlayerState::Opening),
            2 => Some(PlayerState::Buffering),
            3 => Some(PlayerState::Playing),
            4 => Some(PlayerState::Paused),
            5 => Some(PlayerState::Stopped),
            6 => Some(PlayerState::Ended),
            7 => Some(PlayerState::Error),
            _ => None,
        }
    }

    fn event(self) -> Option<EventKind> {
        match self {
            PlayerState::Opening => Some(EventKind::PlayerOpening),
            PlayerState::Playing => Some(EventKind::PlayerPlaying),
            PlayerState::Paused => Some(EventKind::PlayerPaused),
            PlayerState::Stopped => Some(EventKind::PlayerStopped),
            PlayerState::Ended => Some(EventKind::PlayerEndReached),
            PlayerState::Error => Some(EventKind::PlayerEncounteredError),
            PlayerState::NothingSpecial | PlayerState::Buffering => None,
        }
    }
}

/// State shared between a player and its playback thread
struct PlayerShared {
    instance: Arc<Instance>,
    state: AtomicI32,
    time_ms: AtomicI64,
    length_ms: AtomicI64,
    events: EventManager,
}

impl PlayerShared {
    fn state(&self) -> PlayerState {
        PlayerState::from_raw(self.state.load(Ordering::Acquire)).unwrap_or(PlayerState::NothingSpecial)
    }

    /// Move to `state`, mirror it on the media and report it
    fn transition(&self, state: PlayerState, item: &MediaItem) {
        self.state.store(state as i32, Ordering::Release);
        log::debug!("Player state changed to: {:?}", state);
        item.set_state(state);
        if let Some(kind) = state.event() {
            self.events.emit(RawEvent::new(kind));
        }
    }

    fn set_time(&self, ms: i64) {
        self.time_ms.store(ms, Ordering::Release);
        self.events
            .emit(RawEvent::with_value(EventKind::PlayerTimeChanged, ms));
    }

    fn set_length(&self, ms: i64) {
        if self.length_ms.swap(ms, Ordering::AcqRel) != ms {
            self.events
                .emit(RawEvent::with_value(EventKind::PlayerLengthChanged, ms));
        }
    }
}

/// Control block of one play session
struct SessionControl {
    stop: Arc<AtomicBool>,
    /// Set once the session has its outcome, before reporting it
    finished: AtomicBool,
    paused: Mutex<bool>,
    wake: Condvar,
    seek_to: AtomicI64,
}

impl SessionControl {
    fn new() -> Self {
        Self {
            stop: Arc::new(AtomicBool::new(false)),
            finished: AtomicBool::new(false),
            paused: Mutex::new(false),
            wake: Condvar::new(),
            seek_to: AtomicI64::new(NO_SEEK),
        }
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn finish(&self) {
        self.finished.store(true, Ordering::Release);
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
        self.wake.notify_all();
    }

    fn set_paused(&self, paused: bool) {
        *self.paused.lock() = paused;
        self.wake.notify_all();
    }

    fn is_paused(&self) -> bool {
        *self.paused.lock()
    }

    fn interrupted(&self) -> bool {
        self.stopped() || self.is_paused() || self.seek_to.load(Ordering::Acquire) != NO_SEEK
    }

    /// Block while paused, holding the clock. Returns false once stopped.
    fn wait_while_paused(&self, clock: &mut PlaybackClock) -> bool {
        let mut paused = self.paused.lock();
        if *paused {
            clock.pause();
        }
        while *paused && !self.stopped() {
            self.wake.wait_for(&mut paused, PACING_SLICE);
        }
        clock.resume();
        !self.stopped()
    }
}

struct Session {
    control: Arc<SessionControl>,
    thread: JoinHandle<()>,
}

impl Session {
    /// False as soon as the session has ended, even if its thread is
    /// still reporting the outcome
    fn is_running(&self) -> bool {
        !self.control.is_finished() && !self.thread.is_finished()
    }

    fn shutdown(self) {
        self.control.request_stop();
        if self.thread.thread().id() == thread::current().id() {
            log::warn!("Player stopped from its own playback thread; not joining");
            return;
        }
        if self.thread.join().is_err() {
            log::error!("Playback thread panicked");
        }
    }
}

enum Finish {
    Ended,
    Stopped,
}

pub struct Player {
    shared: Arc<PlayerShared>,
    media: Mutex<Option<Arc<MediaItem>>>,
    session: Mutex<Option<Session>>,
}

impl Player {
    pub fn new(instance: Arc<Instance>) -> Self {
        emit!(instance, Debug, "player", "New player");
        Self {
            shared: Arc::new(PlayerShared {
                instance,
                state: AtomicI32::new(PlayerState::NothingSpecial as i32),
                time_ms: AtomicI64::new(0),
                length_ms: AtomicI64::new(-1),
                events: EventManager::new(),
            }),
            media: Mutex::new(None),
            session: Mutex::new(None),
        }
    }

    pub fn events(&self) -> &EventManager {
        &self.shared.events
    }

    pub fn media(&self) -> Option<Arc<MediaItem>> {
        self.media.lock().clone()
    }

    /// Bind a media item (or none); stops the current session
    pub fn set_media(&self, item: Option<Arc<MediaItem>>) {
        self.stop();
        let length = item.as_ref().map(|i| i.duration_ms()).unwrap_or(-1);
        *self.media.lock() = item;
        self.shared.time_ms.store(0, Ordering::Release);
        self.shared.length_ms.store(length, Ordering::Release);
        self.shared.events.emit(RawEvent::new(EventKind::PlayerMediaChanged));
    }

    /// Start or resume playback
    pub fn play(&self) -> Result<()> {
        let item = self
            .media
            .lock()
            .clone()
            .ok_or_else(|| EngineError::InvalidState("No media bound to player".to_string()))?;
        if item.is_unplayable() {
            emit!(self.shared.instance, Error, "player", "{} cannot be played", item.mrl());
            return Err(EngineError::InvalidState(format!("{} cannot be played", item.mrl())));
        }

        let mut session = self.session.lock();
        if let Some(current) = session.as_ref() {
            if current.is_running() {
                if current.control.is_paused() {
                    current.control.set_paused(false);
                    self.shared.transition(PlayerState::Playing, &item);
                }
                return Ok(());
            }
        }
        if let Some(finished) = session.take() {
            finished.shutdown();
        }

        let control = Arc::new(SessionControl::new());
        self.shared.time_ms.store(0, Ordering::Release);
        self.shared.transition(PlayerState::Opening, &item);

        let shared = Arc::clone(&self.shared);
        let thread_control = Arc::clone(&control);
        let thread = thread::Builder::new()
            .name("mle-playback".to_string())
            .spawn(move || run_session(shared, item, thread_control))?;

        *session = Some(Session { control, thread });
        Ok(())
    }

    pub fn pause(&self) {
        let session = self.session.lock();
        let Some(current) = session.as_ref().filter(|s| s.is_running()) else {
            return;
        };
        if self.shared.state() != PlayerState::Playing {
            return;
        }
        current.control.set_paused(true);
        if let Some(item) = self.media() {
            self.shared.transition(PlayerState::Paused, &item);
        }
    }

    /// Stop playback; safe in any state
    pub fn stop(&self) {
        let Some(session) = self.session.lock().take() else {
            return;
        };
        session.shutdown();
        self.shared.time_ms.store(0, Ordering::Release);
        if let Some(item) = self.media() {
            self.shared.transition(PlayerState::Stopped, &item);
        }
    }

    /// Request a seek in the running session
    pub fn set_time(&self, ms: i64) -> Result<()> {
        let session = self.session.lock();
        match session.as_ref().filter(|s| s.is_running()) {
            Some(current) => {
                current.control.seek_to.store(ms.max(0), Ordering::Release);
                current.control.wake.notify_all();
                Ok(())
            }
            None => {
                emit!(self.shared.instance, Warning, "player", "Ignoring seek to {} ms: not playing", ms);
                Err(EngineError::InvalidState("Nothing is playing".to_string()))
            }
        }
    }

    pub fn time(&self) -> i64 {
        self.shared.time_ms.load(Ordering::Acquire)
    }

    pub fn length(&self) -> i64 {
        self.shared.length_ms.load(Ordering::Acquire)
    }

    pub fn state(&self) -> PlayerState {
        self.shared.state()
    }

    pub fn is_playing(&self) -> bool {
        matches!(
            self.shared.state(),
            PlayerState::Opening | PlayerState::Buffering | PlayerState::Playing
        )
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.shutdown();
        }
        log::debug!("Player released");
    }
}

fn run_session(shared: Arc<PlayerShared>, item: Arc<MediaItem>, control: Arc<SessionControl>) {
    let outcome = play_through(&shared, &item, &control);
    control.finish();
    match outcome {
        Ok(Finish::Ended) => {
            emit!(shared.instance, Debug, "player", "End of {}", item.mrl());
            shared.transition(PlayerState::Ended, &item);
        }
        Ok(Finish::Stopped) => {}
        Err(_) if control.stopped() => {}
        Err(e) => {
            emit!(shared.instance, Error, "player", "Playback of {} failed: {}", item.mrl(), e);
            shared.transition(PlayerState::Error, &item);
        }
    }
}

fn play_through(shared: &PlayerShared, item: &MediaItem, control: &SessionControl) -> Result<Finish> {
    let options = shared.instance.options().merged_with(&item.options());
    let stats = Arc::clone(item.stats());

    let (source, hint) = open_source(item.source(), Arc::clone(&control.stop))?;
    let source = CountingSource::new(source, Arc::clone(&stats));
    let mut demuxer = Demuxer::from_media_source(Box::new(source), hint)?;

    let length = demuxer.duration_ms();
    if length >= 0 {
        if item.duration_ms() < 0 {
            item.set_duration(length);
        }
        shared.set_length(length);
    }

    let mut decoder = if options.audio {
        Some(AudioDecoder::from_demuxer(&demuxer)?)
    } else {
        None
    };

    if control.stopped() {
        return Ok(Finish::Stopped);
    }
    shared.transition(PlayerState::Playing, item);

    let mut clock = PlaybackClock::new(options.rate);
    clock.resume();

    let mut window_start = Instant::now();
    let mut window_read = stats.read_bytes();
    let mut window_demux = stats.demux_read_bytes();

    loop {
        if !control.wait_while_paused(&mut clock) {
            return Ok(Finish::Stopped);
        }

        let target = control.seek_to.swap(NO_SEEK, Ordering::AcqRel);
        if target != NO_SEEK {
            if length >= 0 && target >= length {
                return Ok(Finish::Ended);
            }
            let reached = demuxer.seek(target as u64)?;
            if let Some(decoder) = decoder.as_mut() {
                decoder.reset();
            }
            clock.set_time(reached);
            shared.set_time(reached);
        }

        let Some(packet) = demuxer.next_packet()? else {
            return Ok(Finish::Ended);
        };
        stats.add_demux_bytes(packet.buf().len() as u64);
        if demuxer.discontinuity() {
            stats.inc_demux_discontinuity();
        }

        let decoded = match decoder.as_mut() {
            Some(decoder) => match decoder.decode(&packet)? {
                Some(_) => {
                    stats.inc_decoded_audio();
                    true
                }
                None => {
                    stats.inc_demux_corrupted();
                    stats.inc_lost_audio_buffers();
                    false
                }
            },
            None => false,
        };

        let end_ms = demuxer.packet_end_ms(&packet);
        loop {
            let wait = clock.wall_time_until(end_ms);
            if wait.is_zero() || control.interrupted() {
                break;
            }
            thread::sleep(wait.min(PACING_SLICE));
        }
        if control.stopped() {
            return Ok(Finish::Stopped);
        }

        if decoded {
            stats.inc_played_audio_buffers();
        }
        shared.set_time(end_ms);

        let elapsed = window_start.elapsed();
        if elapsed >= BITRATE_WINDOW {
            let secs = elapsed.as_secs_f32();
            let read = stats.read_bytes();
            let demuxed = stats.demux_read_bytes();
            stats.set_bitrates(
                (read - window_read) as f32 / 1000.0 / secs,
                (demuxed - window_demux) as f32 / 1000.0 / secs,
            );
            window_start = Instant::now();
            window_read = read;
            window_demux = demuxed;
        }
    }
}
