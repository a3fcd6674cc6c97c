// Native media objects
//
// A `MediaItem` is the shared state of one playable item. Each native
// reference handed out through the ABI is a separate `Media` onto the same
// item, so duplicates observe each other's metadata and parse state.

use crate::callback::{EventKind, EventManager, RawEvent};
use crate::demux::{Demuxer, TrackInfo};
use crate::error::{EngineError, Result};
use crate::instance::{emit, Instance};
use crate::meta::{self, MetaKey, MetaStore};
use crate::parse::{ParseFlags, ParseState, ParsedStatus};
use crate::player::PlayerState;
use crate::source::{open_source, SourceSpec};
use crate::stats::MediaStats;
use crossbeam_channel::RecvTimeoutError;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// What a successful parse found
struct ParseOutcome {
    tracks: Vec<TrackInfo>,
    duration_ms: i64,
    tags: Vec<(MetaKey, String)>,
}

pub struct MediaItem {
    instance: Arc<Instance>,
    source: SourceSpec,
    mrl: String,
    options: Mutex<Vec<String>>,
    meta: Mutex<MetaStore>,
    tracks: RwLock<Vec<TrackInfo>>,
    duration_ms: AtomicI64,
    parse: ParseState,
    /// Serialises applying a parse result against stopping the parse
    parse_gate: Mutex<()>,
    parse_cancel: Arc<AtomicBool>,
    stats: Arc<MediaStats>,
    state: AtomicI32,
    events: EventManager,
}

impl MediaItem {
    pub fn new(instance: Arc<Instance>, source: SourceSpec) -> Self {
        let mrl = source.mrl();
        emit!(instance, Debug, "media", "New media {}", mrl);
        Self {
            instance,
            source,
            mrl,
            options: Mutex::new(Vec::new()),
            meta: Mutex::new(MetaStore::new()),
            tracks: RwLock::new(Vec::new()),
            duration_ms: AtomicI64::new(-1),
            parse: ParseState::new(),
            parse_gate: Mutex::new(()),
            parse_cancel: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(MediaStats::new()),
            state: AtomicI32::new(PlayerState::NothingSpecial as i32),
            events: EventManager::new(),
        }
    }

    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    pub fn source(&self) -> &SourceSpec {
        &self.source
    }

    pub fn mrl(&self) -> &str {
        &self.mrl
    }

    pub fn events(&self) -> &EventManager {
        &self.events
    }

    pub fn stats(&self) -> &Arc<MediaStats> {
        &self.stats
    }

    pub fn add_option(&self, option: &str) {
        emit!(self.instance, Debug, "media", "Option {} added to {}", option, self.mrl);
        self.options.lock().push(option.to_string());
    }

    pub fn options(&self) -> Vec<String> {
        self.options.lock().clone()
    }

    pub fn duration_ms(&self) -> i64 {
        self.duration_ms.load(Ordering::Acquire)
    }

    /// Record a duration learnt outside parsing (e.g. when playback opens)
    pub fn set_duration(&self, ms: i64) {
        if self.duration_ms.swap(ms, Ordering::AcqRel) != ms {
            self.emit(EventKind::MediaDurationChanged, ms);
        }
    }

    pub fn tracks(&self) -> Vec<TrackInfo> {
        self.tracks.read().clone()
    }

    pub fn meta(&self, key: MetaKey) -> Option<String> {
        self.meta.lock().get(key).map(str::to_string)
    }

    pub fn set_meta(&self, key: MetaKey, value: String) {
        let changed = self.meta.lock().set(key, value);
        if changed {
            self.emit(EventKind::MediaMetaChanged, key as i64);
        }
    }

    /// Persist metadata next to a file-backed media
    pub fn save_meta(&self) -> bool {
        let Some(path) = self.source.path() else {
            emit!(self.instance, Warning, "media", "Cannot save metadata of {}", self.mrl);
            return false;
        };
        match self.meta.lock().save(path) {
            Ok(()) => true,
            Err(e) => {
                emit!(self.instance, Error, "media", "Saving metadata failed: {}", e);
                false
            }
        }
    }

    pub fn state(&self) -> PlayerState {
        PlayerState::from_raw(self.state.load(Ordering::Acquire)).unwrap_or(PlayerState::NothingSpecial)
    }

    pub fn set_state(&self, state: PlayerState) {
        if self.state.swap(state as i32, Ordering::AcqRel) != state as i32 {
            self.emit(EventKind::MediaStateChanged, state as i64);
        }
    }

    pub fn parsed_status(&self) -> ParsedStatus {
        self.parse.get()
    }

    /// Known to be unplayable: no input, or parsing already failed
    pub fn is_unplayable(&self) -> bool {
        matches!(self.source, SourceSpec::Node(_) | SourceSpec::Location(_))
            || self.parse.get() == ParsedStatus::Failed
    }

    fn emit(&self, kind: EventKind, value: i64) {
        self.events.emit(RawEvent::with_value(kind, value));
    }

    /// Start parsing.
    ///
    /// A negative `timeout_ms` uses the instance default, 0 waits forever.
    /// Calls while a parse runs, or after one finished, are no-ops.
    pub fn parse(self: &Arc<Self>, flags: ParseFlags, timeout_ms: i32) -> Result<()> {
        if !self.parse.begin() {
            emit!(self.instance, Debug, "parse", "{} already {:?}", self.mrl, self.parse.get());
            return Ok(());
        }

        match &self.source {
            SourceSpec::Node(_) => {
                self.finish_parse(ParsedStatus::Skipped);
                return Ok(());
            }
            SourceSpec::Location(_) => {
                let outcome = if flags.contains(ParseFlags::NETWORK) {
                    emit!(self.instance, Error, "parse", "No network access for {}", self.mrl);
                    ParsedStatus::Failed
                } else {
                    ParsedStatus::Skipped
                };
                self.finish_parse(outcome);
                return Ok(());
            }
            SourceSpec::Path(_) | SourceSpec::Stream(_) => {}
        }

        let timeout = match timeout_ms {
            t if t < 0 => self.instance.options().parse_timeout_ms,
            t => t as u64,
        };
        let timeout = (timeout > 0).then(|| Duration::from_millis(timeout));

        let item = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("mle-parse".to_string())
            .spawn(move || item.run_parse(timeout));
        if let Err(e) = spawned {
            self.finish_parse(ParsedStatus::Failed);
            return Err(EngineError::Io(e));
        }
        Ok(())
    }

    /// Abandon a running parse; it ends as `Timeout`
    pub fn parse_stop(&self) {
        if self.parse.get() == ParsedStatus::Parsing {
            self.parse_cancel.store(true, Ordering::Release);
            self.finish_parse(ParsedStatus::Timeout);
        }
    }

    fn run_parse(self: Arc<Self>, timeout: Option<Duration>) {
        let started = Instant::now();
        let (tx, rx) = crossbeam_channel::bounded(1);

        let worker_item = Arc::clone(&self);
        let spawned = thread::Builder::new()
            .name("mle-parse-worker".to_string())
            .spawn(move || {
                let _ = tx.send(worker_item.probe());
            });
        if let Err(e) = spawned {
            emit!(self.instance, Error, "parse", "Cannot start parse worker: {}", e);
            self.finish_parse(ParsedStatus::Failed);
            return;
        }

        let received = match timeout {
            Some(timeout) => rx.recv_timeout(timeout),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match received {
            Ok(Ok(outcome)) => {
                emit!(
                    self.instance,
                    Debug,
                    "parse",
                    "{} parsed in {} ms",
                    self.mrl,
                    started.elapsed().as_millis()
                );
                self.apply_outcome(outcome);
            }
            Ok(Err(e)) => {
                emit!(self.instance, Error, "parse", "{} failed: {}", self.mrl, e);
                self.finish_parse(ParsedStatus::Failed);
            }
            Err(RecvTimeoutError::Timeout) => {
                emit!(self.instance, Warning, "parse", "{} timed out", self.mrl);
                self.parse_cancel.store(true, Ordering::Release);
                self.finish_parse(ParsedStatus::Timeout);
            }
            Err(RecvTimeoutError::Disconnected) => {
                emit!(self.instance, Error, "parse", "Parse worker for {} vanished", self.mrl);
                self.finish_parse(ParsedStatus::Failed);
            }
        }
    }

    fn probe(&self) -> Result<ParseOutcome> {
        let (source, hint) = open_source(&self.source, Arc::clone(&self.parse_cancel))?;
        let demuxer = Demuxer::from_media_source(source, hint)?;

        let mut tags = demuxer.tags().to_vec();
        if let Some(path) = self.source.path() {
            match meta::load_sidecar(path) {
                Ok(Some(saved)) => tags.extend(saved),
                Ok(None) => {}
                Err(e) => emit!(self.instance, Warning, "parse", "Ignoring unreadable metadata sidecar: {}", e),
            }
        }

        Ok(ParseOutcome {
            tracks: demuxer.tracks(),
            duration_ms: demuxer.duration_ms(),
            tags,
        })
    }

    fn apply_outcome(&self, outcome: ParseOutcome) {
        let _gate = self.parse_gate.lock();
        if self.parse.get() != ParsedStatus::Parsing {
            emit!(self.instance, Debug, "parse", "Dropping late result for {}", self.mrl);
            return;
        }

        *self.tracks.write() = outcome.tracks;
        let changed = self.meta.lock().merge_parsed(outcome.tags);
        for key in changed {
            self.emit(EventKind::MediaMetaChanged, key as i64);
        }
        if outcome.duration_ms >= 0 {
            self.set_duration(outcome.duration_ms);
        }

        if self.parse.finish(ParsedStatus::Done) {
            self.emit(EventKind::MediaParsedChanged, ParsedStatus::Done as i64);
        }
    }

    fn finish_parse(&self, outcome: ParsedStatus) {
        let _gate = self.parse_gate.lock();
        if self.parse.finish(outcome) {
            emit!(self.instance, Debug, "parse", "{} -> {:?}", self.mrl, outcome);
            self.emit(EventKind::MediaParsedChanged, outcome as i64);
        }
    }
}

impl Drop for MediaItem {
    fn drop(&mut self) {
        log::debug!("Media item {} released", self.mrl);
    }
}

/// One native media reference
pub struct Media {
    item: Arc<MediaItem>,
}

impl Media {
    pub fn new(item: MediaItem) -> Self {
        Self::from_item(Arc::new(item))
    }

    pub fn from_item(item: Arc<MediaItem>) -> Self {
        Self { item }
    }

    pub fn item(&self) -> &Arc<MediaItem> {
        &self.item
    }

    /// A new reference onto the same item
    pub fn duplicate(&self) -> Self {
        Self {
            item: Arc::clone(&self.item),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::EngineOptions;
    use std::os::raw::c_void;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;

    fn instance() -> Arc<Instance> {
        Arc::new(Instance::new(EngineOptions::default()))
    }

    fn write_wav(path: &Path) {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for _ in 0..44_100 {
            writer.write_sample(0i16).unwrap();
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn wait_terminal(item: &MediaItem) -> ParsedStatus {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !item.parsed_status().is_terminal() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        item.parsed_status()
    }

    unsafe extern "C" fn count_parsed(_: *const RawEvent, opaque: *mut c_void) {
        (*(opaque as *const AtomicUsize)).fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_parse_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("silence.wav");
        write_wav(&path);

        let item = Arc::new(MediaItem::new(instance(), SourceSpec::Path(path)));
        let parsed = AtomicUsize::new(0);
        item.events().attach(
            EventKind::MediaParsedChanged,
            count_parsed,
            &parsed as *const AtomicUsize as *mut c_void,
        );

        item.parse(ParseFlags::LOCAL, -1).unwrap();
        item.parse(ParseFlags::LOCAL, -1).unwrap();
        assert_eq!(wait_terminal(&item), ParsedStatus::Done);
        assert_eq!(item.duration_ms(), 1000);
        assert_eq!(item.tracks().len(), 1);
        let deadline = Instant::now() + Duration::from_secs(2);
        while parsed.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        thread::sleep(Duration::from_millis(50));
        assert_eq!(parsed.load(Ordering::SeqCst), 1);

        item.events().detach(
            EventKind::MediaParsedChanged,
            count_parsed,
            &parsed as *const AtomicUsize as *mut c_void,
        );
    }

    #[test]
    fn test_parse_missing_file_fails() {
        let item = Arc::new(MediaItem::new(
            instance(),
            SourceSpec::Path("/nonexistent/medialink.wav".into()),
        ));
        item.parse(ParseFlags::LOCAL, 0).unwrap();
        assert_eq!(wait_terminal(&item), ParsedStatus::Failed);
        assert!(item.is_unplayable());
    }

    #[test]
    fn test_locations_and_nodes() {
        let remote = Arc::new(MediaItem::new(instance(), SourceSpec::from_location("http://example.org/a.ogg")));
        remote.parse(ParseFlags::LOCAL, -1).unwrap();
        assert_eq!(remote.parsed_status(), ParsedStatus::Skipped);

        let remote = Arc::new(MediaItem::new(instance(), SourceSpec::from_location("http://example.org/a.ogg")));
        remote.parse(ParseFlags::NETWORK, -1).unwrap();
        assert_eq!(remote.parsed_status(), ParsedStatus::Failed);

        let node = Arc::new(MediaItem::new(instance(), SourceSpec::Node("folder".into())));
        node.parse(ParseFlags::LOCAL, -1).unwrap();
        assert_eq!(node.parsed_status(), ParsedStatus::Skipped);
        assert_eq!(node.mrl(), "folder");
    }

    #[test]
    fn test_parse_stop_is_terminal() {
        let item = Arc::new(MediaItem::new(instance(), SourceSpec::Node("x".into())));
        item.parse_stop();
        assert_eq!(item.parsed_status(), ParsedStatus::NotParsed);
    }

    #[test]
    fn test_meta_shared_between_references() {
        let media = Media::new(MediaItem::new(instance(), SourceSpec::Node("n".into())));
        let copy = media.duplicate();
        media.item().set_meta(MetaKey::Title, "Shared".to_string());
        assert_eq!(copy.item().meta(MetaKey::Title).as_deref(), Some("Shared"));
        assert!(!copy.item().save_meta());
    }

    #[test]
    fn test_save_meta_sidecar_applies_on_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tagged.wav");
        write_wav(&path);

        let first = Arc::new(MediaItem::new(instance(), SourceSpec::Path(path.clone())));
        first.set_meta(MetaKey::Artist, "Someone".to_string());
        assert!(first.save_meta());

        let second = Arc::new(MediaItem::new(instance(), SourceSpec::Path(path)));
        second.parse(ParseFlags::LOCAL, 0).unwrap();
        assert_eq!(wait_terminal(&second), ParsedStatus::Done);
        assert_eq!(second.meta(MetaKey::Artist).as_deref(), Some("Someone"));
    }
}
