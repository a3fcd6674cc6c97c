// Media resources
//
// A `Media` owns one native media reference. Duplicates get their own native
// reference onto the same engine-side item, so parse state, metadata and
// statistics are shared while lifetimes are not.

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::event::{MediaEvent, Payload};
use crate::ffi::{borrow_string, take_string, to_cstring};
use crate::handle::{HandleId, InstanceKind, MediaKind, NativeHandle};
use crate::relay::{relay_event, EventRelay, NativeListener, SubscriptionId};
use crate::stream::StreamBridge;
use crossbeam_channel::bounded;
use medialink_engine::abi::{self, TrackDescriptor, TrackKind};
use medialink_engine::{EventKind, MetaKey, ParseFlags, ParsedStatus};
use parking_lot::Mutex;
use std::ffi::CString;
use std::io;
use std::os::raw::{c_char, c_int};
use std::path::Path;
use std::ptr;
use std::sync::Arc;
use std::time::Duration;

pub use medialink_engine::StatsSnapshot as Statistics;

/// How the string given to `Media::new` is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FromType {
    /// A local filesystem path
    FromPath,
    /// A location such as `file:///...` or `http://...`
    FromLocation,
    /// A named node with no input of its own
    AsNode,
}

/// Options for `Media::parse_with`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseOptions {
    pub flags: ParseFlags,
    /// `None` uses the engine default, `Some(Duration::ZERO)` waits forever
    pub timeout: Option<Duration>,
}

impl ParseOptions {
    fn timeout_ms(&self) -> c_int {
        match self.timeout {
            None => -1,
            Some(timeout) => c_int::try_from(timeout.as_millis()).unwrap_or(c_int::MAX),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackData {
    Audio { channels: u32, rate: u32 },
    Video { width: u32, height: u32 },
    Subtitle { encoding: Option<String> },
    Unknown,
}

/// An elementary stream found by parsing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub id: u32,
    pub codec: String,
    pub language: Option<String>,
    pub description: Option<String>,
    pub data: TrackData,
}

impl Track {
    /// # Safety
    /// String fields must be null or valid C strings.
    unsafe fn from_descriptor(descriptor: &TrackDescriptor) -> Self {
        let data = match descriptor.kind {
            TrackKind::Audio => TrackData::Audio {
                channels: descriptor.channels,
                rate: descriptor.rate,
            },
            TrackKind::Video => TrackData::Video {
                width: descriptor.width,
                height: descriptor.height,
            },
            TrackKind::Text => TrackData::Subtitle {
                encoding: optional_string(descriptor.encoding),
            },
            TrackKind::Unknown => TrackData::Unknown,
        };
        Track {
            id: descriptor.id,
            codec: borrow_string(descriptor.codec),
            language: optional_string(descriptor.language),
            description: optional_string(descriptor.description),
            data,
        }
    }
}

unsafe fn optional_string(raw: *const c_char) -> Option<String> {
    (!raw.is_null()).then(|| borrow_string(raw))
}

pub(crate) struct MediaInner {
    handle: NativeHandle<MediaKind>,
    instance: NativeHandle<InstanceKind>,
    relay: Arc<EventRelay>,
    listener: Mutex<Option<Box<NativeListener>>>,
}

impl MediaInner {
    /// Wrap a fresh native media reference and route its events to the relay
    fn new(raw: *mut medialink_engine::Media, instance: NativeHandle<InstanceKind>, relay: Arc<EventRelay>) -> Result<Self> {
        // SAFETY: `raw` is null or a reference the engine just handed us.
        let handle = unsafe { NativeHandle::<MediaKind>::acquire(raw) }?;
        let listener = relay.listener(handle.id());
        let opaque = listener.as_opaque();
        handle.with_ptr(|raw| {
            for kind in EventKind::MEDIA {
                // SAFETY: the listener outlives the attachment; see `dispose`.
                unsafe { abi::mle_media_event_attach(raw, kind as c_int, relay_event, opaque) };
            }
        })?;
        Ok(Self {
            handle,
            instance,
            relay,
            listener: Mutex::new(Some(listener)),
        })
    }

    pub(crate) fn handle(&self) -> &NativeHandle<MediaKind> {
        &self.handle
    }

    pub(crate) fn relay(&self) -> &Arc<EventRelay> {
        &self.relay
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.handle.is_valid()
    }

    fn dispose(&self) {
        let Some(listener) = self.listener.lock().take() else {
            return;
        };
        let _ = self.handle.with_ptr(|raw| {
            for kind in EventKind::MEDIA {
                // SAFETY: detach returns once no callback with this listener runs.
                unsafe { abi::mle_media_event_detach(raw, kind as c_int, relay_event, listener.as_opaque()) };
            }
            // SAFETY: live pointer under the handle's read lock.
            unsafe { abi::mle_media_parse_stop(raw) };
        });
        drop(listener);
        // Released first: `subscribe` registers under the handle lock, so
        // nothing can be added for this source after the sweep.
        self.handle.release();
        self.relay.forget_source(self.handle.id());
        self.instance.release();
        log::debug!("Media {} disposed", self.handle.id());
    }
}

impl Drop for MediaInner {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// One playable item
pub struct Media {
    inner: Arc<MediaInner>,
}

impl Media {
    /// Create a media from a path, a location or a node name
    pub fn new(engine: &Engine, mrl: &str, from: FromType) -> Result<Self> {
        let what = match from {
            FromType::FromPath => "media path",
            FromType::FromLocation => "media location",
            FromType::AsNode => "node name",
        };
        let text = to_cstring(mrl, what)?;
        let instance = engine.instance()?;
        let raw = instance.with_ptr(|inst| {
            // SAFETY: live instance and a valid C string for the duration of the call.
            unsafe {
                match from {
                    FromType::FromPath => abi::mle_media_new_path(inst, text.as_ptr()),
                    FromType::FromLocation => abi::mle_media_new_location(inst, text.as_ptr()),
                    FromType::AsNode => abi::mle_media_new_as_node(inst, text.as_ptr()),
                }
            }
        })?;
        let media = Self::wrap(raw, instance, Arc::clone(engine.relay()))?;
        log::debug!("Media {} created {:?} {}", media.handle_id(), from, mrl);
        Ok(media)
    }

    pub fn from_path(engine: &Engine, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = path
            .to_str()
            .ok_or_else(|| Error::Argument(format!("path {} is not valid UTF-8", path.display())))?;
        Self::new(engine, text, FromType::FromPath)
    }

    pub fn from_location(engine: &Engine, location: &str) -> Result<Self> {
        Self::new(engine, location, FromType::FromLocation)
    }

    /// Create a media reading from a stream; the engine takes over the bridge
    pub fn from_stream(engine: &Engine, bridge: StreamBridge) -> Result<Self> {
        let instance = engine.instance()?;
        let (callbacks, opaque) = bridge.into_callbacks();
        let raw = instance
            .with_ptr(|inst| {
                // SAFETY: the table is copied by the engine; opaque is a boxed bridge.
                unsafe { abi::mle_media_new_callbacks(inst, &callbacks, opaque) }
            })
            .unwrap_or(ptr::null_mut());
        if raw.is_null() {
            // SAFETY: the engine did not take ownership of the bridge.
            drop(unsafe { StreamBridge::reclaim(opaque) });
            return Err(Error::InvalidHandle);
        }
        let media = Self::wrap(raw, instance, Arc::clone(engine.relay()))?;
        log::debug!("Media {} created from stream", media.handle_id());
        Ok(media)
    }

    fn wrap(raw: *mut medialink_engine::Media, instance: NativeHandle<InstanceKind>, relay: Arc<EventRelay>) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(MediaInner::new(raw, instance, relay)?),
        })
    }

    pub(crate) fn from_inner(inner: Arc<MediaInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Arc<MediaInner> {
        &self.inner
    }

    /// Resource locator, empty once disposed
    pub fn mrl(&self) -> String {
        self.inner
            .handle
            .with_ptr(|raw| unsafe { take_string(abi::mle_media_get_mrl(raw)) })
            .ok()
            .flatten()
            .unwrap_or_default()
    }

    /// Add a per-media option (e.g. `:no-audio`); applies to the next play
    pub fn add_option(&self, option: &str) -> Result<()> {
        let option = to_cstring(option, "option")?;
        let rc = self
            .inner
            .handle
            .with_ptr(|raw| unsafe { abi::mle_media_add_option(raw, option.as_ptr()) })?;
        if rc != 0 {
            return Err(Error::InvalidHandle);
        }
        Ok(())
    }

    /// Start parsing with default options; returns immediately
    pub fn parse(&self) -> Result<()> {
        self.parse_with(ParseOptions::default())
    }

    pub fn parse_with(&self, options: ParseOptions) -> Result<()> {
        let rc = self.inner.handle.with_ptr(|raw| unsafe {
            abi::mle_media_parse_with_options(raw, options.flags.0, options.timeout_ms())
        })?;
        if rc != 0 {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::Other,
                "engine could not start parsing",
            )));
        }
        Ok(())
    }

    pub fn parsed_status(&self) -> ParsedStatus {
        self.inner
            .handle
            .with_ptr(|raw| unsafe { abi::mle_media_get_parsed_status(raw) })
            .ok()
            .and_then(ParsedStatus::from_raw)
            .unwrap_or(ParsedStatus::NotParsed)
    }

    pub fn is_parsed(&self) -> bool {
        self.parsed_status() == ParsedStatus::Done
    }

    /// Block until parsing reaches a terminal status
    pub fn wait_for_parse(&self, timeout: Duration) -> Result<ParsedStatus> {
        if !self.inner.is_valid() {
            return Err(Error::InvalidHandle);
        }
        let (tx, rx) = bounded(1);
        let subscription = self.subscribe(move |event| {
            if let MediaEvent::ParsedChanged(status) = event {
                if status.is_terminal() {
                    let _ = tx.try_send(*status);
                }
            }
        })?;

        let status = self.parsed_status();
        let result = if status.is_terminal() {
            Ok(status)
        } else {
            rx.recv_timeout(timeout).map_err(|_| Error::Timeout("parse"))
        };
        self.unsubscribe(subscription);
        result
    }

    /// Duration in milliseconds, -1 if unknown
    pub fn duration(&self) -> i64 {
        self.inner
            .handle
            .with_ptr(|raw| unsafe { abi::mle_media_get_duration(raw) })
            .unwrap_or(-1)
    }

    /// Value for `key`; `None` when unset
    pub fn meta(&self, key: MetaKey) -> Option<String> {
        self.inner
            .handle
            .with_ptr(|raw| unsafe { take_string(abi::mle_media_get_meta(raw, key as c_int)) })
            .ok()
            .flatten()
    }

    pub fn set_meta(&self, key: MetaKey, value: &str) -> Result<()> {
        let value = CString::new(value).map_err(|_| Error::Argument("meta value contains a NUL byte".to_string()))?;
        let rc = self
            .inner
            .handle
            .with_ptr(|raw| unsafe { abi::mle_media_set_meta(raw, key as c_int, value.as_ptr()) })?;
        if rc != 0 {
            return Err(Error::InvalidHandle);
        }
        Ok(())
    }

    /// Persist metadata next to the media file; false for stream media or
    /// when writing fails
    pub fn save_meta(&self) -> bool {
        self.inner
            .handle
            .with_ptr(|raw| unsafe { abi::mle_media_save_meta(raw) == 1 })
            .unwrap_or(false)
    }

    /// Tracks found by the last successful parse
    pub fn tracks(&self) -> Vec<Track> {
        self.inner
            .handle
            .with_ptr(|raw| {
                let mut descriptors: *mut TrackDescriptor = ptr::null_mut();
                // SAFETY: the engine fills `descriptors` with `count` entries
                // which are released below after copying.
                unsafe {
                    let count = abi::mle_media_tracks_get(raw, &mut descriptors);
                    if descriptors.is_null() {
                        return Vec::new();
                    }
                    let tracks = std::slice::from_raw_parts(descriptors, count)
                        .iter()
                        .map(|d| Track::from_descriptor(d))
                        .collect();
                    abi::mle_tracks_release(descriptors, count);
                    tracks
                }
            })
            .unwrap_or_default()
    }

    /// Latest counters; all zero before playback or after disposal
    pub fn statistics(&self) -> Statistics {
        let mut stats = Statistics::default();
        let _ = self
            .inner
            .handle
            .with_ptr(|raw| unsafe { abi::mle_media_get_stats(raw, &mut stats) });
        stats
    }

    /// Another media with its own native reference onto the same item
    pub fn duplicate(&self) -> Result<Media> {
        let instance = self.inner.instance.duplicate()?;
        let raw = self
            .inner
            .handle
            .with_ptr(|raw| unsafe { abi::mle_media_duplicate(raw) })?;
        Self::wrap(raw, instance, Arc::clone(&self.inner.relay))
    }

    /// Release the native reference. Subscribers receive nothing once this
    /// returns, and a running parse is abandoned.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        !self.inner.is_valid()
    }

    /// Native pointer, null once disposed
    pub fn native_reference(&self) -> *mut medialink_engine::Media {
        self.inner.handle.as_ptr()
    }

    pub fn handle_id(&self) -> HandleId {
        self.inner.handle.id()
    }

    /// Fails with `InvalidHandle` once the media is disposed
    pub fn subscribe(&self, callback: impl Fn(&MediaEvent) + Send + Sync + 'static) -> Result<SubscriptionId> {
        let relay = &self.inner.relay;
        self.inner.handle.with_ptr(|_| {
            relay.subscribe(self.handle_id(), move |payload| {
                if let Payload::Media(event) = payload {
                    callback(event);
                }
            })
        })
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.relay.unsubscribe(id)
    }
}

impl std::fmt::Debug for Media {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Media")
            .field("handle", &self.inner.handle)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_inputs_are_rejected() {
        let engine = Engine::new(&["--quiet"]).unwrap();
        for from in [FromType::FromPath, FromType::FromLocation, FromType::AsNode] {
            assert!(matches!(Media::new(&engine, "", from), Err(Error::Argument(_))));
        }
    }

    #[test]
    fn test_node_parse_is_skipped() {
        let engine = Engine::new(&["--quiet"]).unwrap();
        let media = Media::new(&engine, "playlist", FromType::AsNode).unwrap();
        assert_eq!(media.mrl(), "playlist");
        media.parse().unwrap();
        assert_eq!(media.wait_for_parse(Duration::from_secs(2)).unwrap(), ParsedStatus::Skipped);
        assert!(!media.is_parsed());
        assert!(media.tracks().is_empty());
        assert_eq!(media.duration(), -1);
    }

    #[test]
    fn test_location_with_file_scheme_is_a_path() {
        let engine = Engine::new(&["--quiet"]).unwrap();
        let media = Media::from_location(&engine, "file:///tmp/medialink-missing.wav").unwrap();
        assert_eq!(media.mrl(), "file:///tmp/medialink-missing.wav");

        let remote = Media::from_location(&engine, "http://example.invalid/a.mp3").unwrap();
        remote
            .parse_with(ParseOptions {
                flags: ParseFlags::NETWORK,
                timeout: None,
            })
            .unwrap();
        assert_eq!(remote.wait_for_parse(Duration::from_secs(2)).unwrap(), ParsedStatus::Failed);
    }

    #[test]
    fn test_disposed_queries_return_sentinels() {
        let engine = Engine::new(&["--quiet"]).unwrap();
        let media = Media::new(&engine, "node", FromType::AsNode).unwrap();
        media.dispose();
        media.dispose();
        assert!(media.is_disposed());
        assert!(media.native_reference().is_null());
        assert_eq!(media.mrl(), "");
        assert_eq!(media.duration(), -1);
        assert_eq!(media.parsed_status(), ParsedStatus::NotParsed);
        assert_eq!(media.statistics(), Statistics::default());
        assert!(media.meta(MetaKey::Title).is_none());
        assert!(!media.save_meta());
        assert!(matches!(media.add_option(":no-audio"), Err(Error::InvalidHandle)));
        assert!(matches!(media.duplicate(), Err(Error::InvalidHandle)));
        assert!(matches!(
            media.wait_for_parse(Duration::from_millis(10)),
            Err(Error::InvalidHandle)
        ));
    }

    #[test]
    fn test_subscribe_after_dispose_is_refused() {
        let engine = Engine::new(&["--quiet"]).unwrap();
        let media = Media::new(&engine, "node", FromType::AsNode).unwrap();
        let id = media.handle_id();
        media.subscribe(|_| {}).unwrap();
        assert_eq!(engine.relay().subscriber_count(id), 1);

        media.dispose();
        assert_eq!(engine.relay().subscriber_count(id), 0);
        assert!(matches!(media.subscribe(|_| {}), Err(Error::InvalidHandle)));
        assert_eq!(engine.relay().subscriber_count(id), 0);
    }

    #[test]
    fn test_parse_timeout_conversion() {
        assert_eq!(ParseOptions::default().timeout_ms(), -1);
        let forever = ParseOptions {
            timeout: Some(Duration::ZERO),
            ..Default::default()
        };
        assert_eq!(forever.timeout_ms(), 0);
        let long = ParseOptions {
            timeout: Some(Duration::from_secs(u64::MAX)),
            ..Default::default()
        };
        assert_eq!(long.timeout_ms(), c_int::MAX);
    }
}
