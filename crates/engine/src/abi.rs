// C ABI
//
// Instances, media and players are handed out as `Arc` raw pointers and
// reference counted through the `*_retain` / `*_release` pairs. Status codes
// are 0 on success and -1 on failure; strings returned by the engine are
// released with `mle_string_free`.

use crate::callback::{EventCallback, EventKind, EventManager};
use crate::demux::TrackInfo;
pub use crate::demux::TrackKind;
use crate::error::{EngineError, Result};
use crate::instance::{Instance, LogCallback};
use crate::media::{Media, MediaItem};
use crate::meta::MetaKey;
use crate::options::EngineOptions;
use crate::parse::{ParseFlags, ParsedStatus};
use crate::player::{Player, PlayerState};
use crate::source::{SourceSpec, StreamCallbacks, StreamEndpoint};
use crate::stats::StatsSnapshot;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::ptr;
use std::sync::Arc;

/// Track description handed to C callers.
///
/// String fields are owned by the array and released by `mle_tracks_release`.
#[repr(C)]
#[derive(Debug)]
pub struct TrackDescriptor {
    pub id: u32,
    pub kind: TrackKind,
    pub codec: *mut c_char,
    /// Null when unknown
    pub language: *mut c_char,
    /// Null when unknown
    pub description: *mut c_char,
    pub channels: u32,
    pub rate: u32,
    pub width: u32,
    pub height: u32,
    /// Subtitle encoding; null for other kinds
    pub encoding: *mut c_char,
}

impl TrackDescriptor {
    fn from_info(info: &TrackInfo) -> Self {
        Self {
            id: info.id,
            kind: info.kind,
            codec: into_c_string(&info.codec),
            language: info.language.as_deref().map_or(ptr::null_mut(), into_c_string),
            description: ptr::null_mut(),
            channels: info.channels,
            rate: info.rate,
            width: 0,
            height: 0,
            encoding: ptr::null_mut(),
        }
    }
}

/// Run `f`, turning a panic into `fallback` so it never unwinds into C
fn guard<R>(fallback: R, f: impl FnOnce() -> R) -> R {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(_) => {
            log::error!("Panic caught at the C boundary");
            fallback
        }
    }
}

fn to_code(result: Result<()>) -> c_int {
    match result {
        Ok(_) => 0,
        Err(err) => {
            log::error!("FFI error: {}", err);
            -1
        }
    }
}

fn into_raw<T>(value: Arc<T>) -> *mut T {
    Arc::into_raw(value) as *mut T
}

fn into_c_string(text: &str) -> *mut c_char {
    CString::new(text.replace('\0', "\u{FFFD}"))
        .map(CString::into_raw)
        .unwrap_or(ptr::null_mut())
}

unsafe fn c_str<'a>(text: *const c_char) -> Option<&'a str> {
    if text.is_null() {
        return None;
    }
    match CStr::from_ptr(text).to_str() {
        Ok(text) => Some(text),
        Err(_) => {
            log::error!("FFI error: string argument is not valid UTF-8");
            None
        }
    }
}

unsafe fn media_item<'a>(media: *mut Media) -> Result<&'a Arc<MediaItem>> {
    media
        .as_ref()
        .map(Media::item)
        .ok_or_else(|| EngineError::InvalidState("Null media".to_string()))
}

unsafe fn player_ref<'a>(player: *mut Player) -> Result<&'a Player> {
    player
        .as_ref()
        .ok_or_else(|| EngineError::InvalidState("Null player".to_string()))
}

fn attach(events: &EventManager, kind: c_int, media_family: bool, callback: EventCallback, opaque: *mut c_void) -> c_int {
    match EventKind::from_raw(kind) {
        Some(kind) if kind.is_media_event() == media_family => {
            events.attach(kind, callback, opaque);
            0
        }
        _ => {
            log::error!("FFI error: event type {} not emitted by this object", kind);
            -1
        }
    }
}

fn detach(events: &EventManager, kind: c_int, callback: EventCallback, opaque: *mut c_void) -> c_int {
    match EventKind::from_raw(kind) {
        Some(kind) if events.detach(kind, callback, opaque) => 0,
        _ => -1,
    }
}

fn new_media(instance: *mut Instance, source: impl FnOnce() -> Option<SourceSpec>) -> *mut Media {
    guard(ptr::null_mut(), || {
        // SAFETY: caller passes a live instance or null.
        let Some(instance) = (unsafe { instance.as_ref() }) else {
            log::error!("FFI error: media created without an instance");
            return ptr::null_mut();
        };
        // SAFETY: the pointer came from `Arc::into_raw` and the caller holds a reference.
        let instance = unsafe {
            Arc::increment_strong_count(instance as *const Instance);
            Arc::from_raw(instance as *const Instance)
        };
        match source() {
            Some(source) => into_raw(Arc::new(Media::new(MediaItem::new(instance, source)))),
            None => ptr::null_mut(),
        }
    })
}

// -----------------------------------------------------------------------------
// Instance
// -----------------------------------------------------------------------------

/// Create an engine instance from `argc` option strings.
///
/// # Safety
/// `argv` must point to `argc` valid C strings (or be null when `argc` is 0).
#[no_mangle]
pub unsafe extern "C" fn mle_instance_new(argc: c_int, argv: *const *const c_char) -> *mut Instance {
    guard(ptr::null_mut(), || {
        let mut args = Vec::new();
        if !argv.is_null() {
            for i in 0..argc.max(0) as usize {
                let arg = *argv.add(i);
                if arg.is_null() {
                    log::error!("FFI error: null option string at {}", i);
                    return ptr::null_mut();
                }
                args.push(CStr::from_ptr(arg).to_string_lossy().into_owned());
            }
        }
        into_raw(Arc::new(Instance::new(EngineOptions::parse(&args))))
    })
}

/// # Safety
/// `instance` must be a live instance pointer.
#[no_mangle]
pub unsafe extern "C" fn mle_instance_retain(instance: *mut Instance) {
    if !instance.is_null() {
        Arc::increment_strong_count(instance as *const Instance);
    }
}

/// # Safety
/// `instance` must be a live instance pointer; it is invalid afterwards.
#[no_mangle]
pub unsafe extern "C" fn mle_instance_release(instance: *mut Instance) {
    if !instance.is_null() {
        guard((), || Arc::decrement_strong_count(instance as *const Instance));
    }
}

/// Install (or clear with a null callback) the log callback.
///
/// # Safety
/// `callback` and `opaque` must stay valid until replaced or cleared.
#[no_mangle]
pub unsafe extern "C" fn mle_instance_set_log(
    instance: *mut Instance,
    callback: Option<LogCallback>,
    opaque: *mut c_void,
) {
    if let Some(instance) = instance.as_ref() {
        guard((), || instance.set_log_callback(callback, opaque));
    }
}

// -----------------------------------------------------------------------------
// Media
// -----------------------------------------------------------------------------

/// # Safety
/// `instance` must be live; `path` must be a C string.
#[no_mangle]
pub unsafe extern "C" fn mle_media_new_path(instance: *mut Instance, path: *const c_char) -> *mut Media {
    new_media(instance, || {
        c_str(path)
            .filter(|p| !p.is_empty())
            .map(|p| SourceSpec::Path(PathBuf::from(p)))
    })
}

/// # Safety
/// `instance` must be live; `location` must be a C string.
#[no_mangle]
pub unsafe extern "C" fn mle_media_new_location(instance: *mut Instance, location: *const c_char) -> *mut Media {
    new_media(instance, || {
        c_str(location)
            .filter(|l| !l.is_empty())
            .map(SourceSpec::from_location)
    })
}

/// # Safety
/// `instance` must be live; `name` must be a C string.
#[no_mangle]
pub unsafe extern "C" fn mle_media_new_as_node(instance: *mut Instance, name: *const c_char) -> *mut Media {
    new_media(instance, || {
        c_str(name)
            .filter(|n| !n.is_empty())
            .map(|n| SourceSpec::Node(n.to_string()))
    })
}

/// Create a media reading through stream callbacks.
///
/// On success the engine owns `opaque` and calls `free` once it is done with
/// it. On failure (null returned) ownership stays with the caller.
///
/// # Safety
/// `callbacks` must point to a valid table; the callbacks must be callable
/// from any thread with `opaque`.
#[no_mangle]
pub unsafe extern "C" fn mle_media_new_callbacks(
    instance: *mut Instance,
    callbacks: *const StreamCallbacks,
    opaque: *mut c_void,
) -> *mut Media {
    new_media(instance, || {
        let callbacks = *callbacks.as_ref()?;
        Some(SourceSpec::Stream(Arc::new(StreamEndpoint::new(callbacks, opaque))))
    })
}

/// # Safety
/// `media` must be a live media pointer.
#[no_mangle]
pub unsafe extern "C" fn mle_media_retain(media: *mut Media) {
    if !media.is_null() {
        Arc::increment_strong_count(media as *const Media);
    }
}

/// # Safety
/// `media` must be a live media pointer; it is invalid afterwards.
#[no_mangle]
pub unsafe extern "C" fn mle_media_release(media: *mut Media) {
    if !media.is_null() {
        guard((), || Arc::decrement_strong_count(media as *const Media));
    }
}

/// A new, separately released reference onto the same media item
///
/// # Safety
/// `media` must be a live media pointer.
#[no_mangle]
pub unsafe extern "C" fn mle_media_duplicate(media: *mut Media) -> *mut Media {
    guard(ptr::null_mut(), || match media.as_ref() {
        Some(media) => into_raw(Arc::new(media.duplicate())),
        None => ptr::null_mut(),
    })
}

/// # Safety
/// `media` must be a live media pointer.
#[no_mangle]
pub unsafe extern "C" fn mle_media_get_mrl(media: *mut Media) -> *mut c_char {
    guard(ptr::null_mut(), || match media_item(media) {
        Ok(item) => into_c_string(item.mrl()),
        Err(_) => ptr::null_mut(),
    })
}

/// # Safety
/// `media` must be live; `option` must be a C string.
#[no_mangle]
pub unsafe extern "C" fn mle_media_add_option(media: *mut Media, option: *const c_char) -> c_int {
    guard(-1, || {
        to_code(media_item(media).and_then(|item| {
            let option = c_str(option)
                .filter(|o| !o.is_empty())
                .ok_or_else(|| EngineError::InvalidState("Empty option".to_string()))?;
            item.add_option(option);
            Ok(())
        }))
    })
}

/// Start an asynchronous parse. Negative `timeout_ms` uses the instance
/// default, 0 waits forever.
///
/// # Safety
/// `media` must be a live media pointer.
#[no_mangle]
pub unsafe extern "C" fn mle_media_parse_with_options(media: *mut Media, flags: u32, timeout_ms: c_int) -> c_int {
    guard(-1, || {
        to_code(media_item(media).and_then(|item| item.parse(ParseFlags(flags), timeout_ms)))
    })
}

/// # Safety
/// `media` must be a live media pointer.
#[no_mangle]
pub unsafe extern "C" fn mle_media_parse_stop(media: *mut Media) {
    guard((), || {
        if let Ok(item) = media_item(media) {
            item.parse_stop();
        }
    })
}

/// # Safety
/// `media` must be a live media pointer.
#[no_mangle]
pub unsafe extern "C" fn mle_media_get_parsed_status(media: *mut Media) -> c_int {
    guard(ParsedStatus::NotParsed as c_int, || match media_item(media) {
        Ok(item) => item.parsed_status() as c_int,
        Err(_) => ParsedStatus::NotParsed as c_int,
    })
}

/// Duration in milliseconds, -1 if unknown
///
/// # Safety
/// `media` must be a live media pointer.
#[no_mangle]
pub unsafe extern "C" fn mle_media_get_duration(media: *mut Media) -> i64 {
    guard(-1, || media_item(media).map(|item| item.duration_ms()).unwrap_or(-1))
}

/// Value for `key`, or null when unset
///
/// # Safety
/// `media` must be a live media pointer.
#[no_mangle]
pub unsafe extern "C" fn mle_media_get_meta(media: *mut Media, key: c_int) -> *mut c_char {
    guard(ptr::null_mut(), || {
        let value = media_item(media)
            .ok()
            .zip(MetaKey::from_raw(key))
            .and_then(|(item, key)| item.meta(key));
        value.as_deref().map_or(ptr::null_mut(), into_c_string)
    })
}

/// # Safety
/// `media` must be live; `value` must be a C string.
#[no_mangle]
pub unsafe extern "C" fn mle_media_set_meta(media: *mut Media, key: c_int, value: *const c_char) -> c_int {
    guard(-1, || {
        to_code(media_item(media).and_then(|item| {
            let key = MetaKey::from_raw(key)
                .ok_or_else(|| EngineError::InvalidState(format!("Unknown meta key {}", key)))?;
            let value = c_str(value).ok_or_else(|| EngineError::InvalidState("Null meta value".to_string()))?;
            item.set_meta(key, value.to_string());
            Ok(())
        }))
    })
}

/// Persist metadata. Returns 1 when saved, 0 otherwise.
///
/// # Safety
/// `media` must be a live media pointer.
#[no_mangle]
pub unsafe extern "C" fn mle_media_save_meta(media: *mut Media) -> c_int {
    guard(0, || media_item(media).map(|item| item.save_meta() as c_int).unwrap_or(0))
}

/// Store a track array in `*out` and return its length.
///
/// # Safety
/// `media` must be live and `out` writable. The array is released with
/// `mle_tracks_release(*out, count)`.
#[no_mangle]
pub unsafe extern "C" fn mle_media_tracks_get(media: *mut Media, out: *mut *mut TrackDescriptor) -> usize {
    guard(0, || {
        if out.is_null() {
            return 0;
        }
        *out = ptr::null_mut();
        let Ok(item) = media_item(media) else {
            return 0;
        };
        let tracks: Box<[TrackDescriptor]> = item.tracks().iter().map(TrackDescriptor::from_info).collect();
        let count = tracks.len();
        if count > 0 {
            *out = Box::into_raw(tracks) as *mut TrackDescriptor;
        }
        count
    })
}

/// # Safety
/// `tracks` and `count` must come from one `mle_media_tracks_get` call.
#[no_mangle]
pub unsafe extern "C" fn mle_tracks_release(tracks: *mut TrackDescriptor, count: usize) {
    if tracks.is_null() {
        return;
    }
    let tracks = Box::from_raw(ptr::slice_from_raw_parts_mut(tracks, count));
    for track in tracks.iter() {
        for text in [track.codec, track.language, track.description, track.encoding] {
            mle_string_free(text);
        }
    }
}

/// # Safety
/// `media` must be live and `out` writable.
#[no_mangle]
pub unsafe extern "C" fn mle_media_get_stats(media: *mut Media, out: *mut StatsSnapshot) -> c_int {
    guard(-1, || {
        to_code(media_item(media).and_then(|item| {
            let out = out
                .as_mut()
                .ok_or_else(|| EngineError::InvalidState("Null statistics buffer".to_string()))?;
            *out = item.stats().snapshot();
            Ok(())
        }))
    })
}

/// # Safety
/// `media` must be live; `callback`/`opaque` must stay valid until detached.
#[no_mangle]
pub unsafe extern "C" fn mle_media_event_attach(
    media: *mut Media,
    kind: c_int,
    callback: EventCallback,
    opaque: *mut c_void,
) -> c_int {
    guard(-1, || match media_item(media) {
        Ok(item) => attach(item.events(), kind, true, callback, opaque),
        Err(_) => -1,
    })
}

/// Detach a listener. Returns once no call to it is in flight.
///
/// # Safety
/// `media` must be a live media pointer.
#[no_mangle]
pub unsafe extern "C" fn mle_media_event_detach(
    media: *mut Media,
    kind: c_int,
    callback: EventCallback,
    opaque: *mut c_void,
) -> c_int {
    guard(-1, || match media_item(media) {
        Ok(item) => detach(item.events(), kind, callback, opaque),
        Err(_) => -1,
    })
}

// -----------------------------------------------------------------------------
// Player
// -----------------------------------------------------------------------------

/// # Safety
/// `instance` must be a live instance pointer.
#[no_mangle]
pub unsafe extern "C" fn mle_player_new(instance: *mut Instance) -> *mut Player {
    guard(ptr::null_mut(), || {
        if instance.is_null() {
            return ptr::null_mut();
        }
        Arc::increment_strong_count(instance as *const Instance);
        let instance = Arc::from_raw(instance as *const Instance);
        into_raw(Arc::new(Player::new(instance)))
    })
}

/// # Safety
/// `media` must be a live media pointer.
#[no_mangle]
pub unsafe extern "C" fn mle_player_new_from_media(media: *mut Media) -> *mut Player {
    guard(ptr::null_mut(), || match media_item(media) {
        Ok(item) => {
            let player = Player::new(Arc::clone(item.instance()));
            player.set_media(Some(Arc::clone(item)));
            into_raw(Arc::new(player))
        }
        Err(_) => ptr::null_mut(),
    })
}

/// # Safety
/// `player` must be a live player pointer.
#[no_mangle]
pub unsafe extern "C" fn mle_player_retain(player: *mut Player) {
    if !player.is_null() {
        Arc::increment_strong_count(player as *const Player);
    }
}

/// Release a player; the last release stops playback.
///
/// # Safety
/// `player` must be a live player pointer; it is invalid afterwards.
#[no_mangle]
pub unsafe extern "C" fn mle_player_release(player: *mut Player) {
    if !player.is_null() {
        guard((), || Arc::decrement_strong_count(player as *const Player));
    }
}

/// Bind `media` (null unbinds)
///
/// # Safety
/// `player` must be live; `media` live or null.
#[no_mangle]
pub unsafe extern "C" fn mle_player_set_media(player: *mut Player, media: *mut Media) -> c_int {
    guard(-1, || {
        to_code(player_ref(player).map(|player| {
            let item = media.as_ref().map(|m| Arc::clone(m.item()));
            player.set_media(item);
        }))
    })
}

/// New media reference onto the bound item, or null
///
/// # Safety
/// `player` must be a live player pointer.
#[no_mangle]
pub unsafe extern "C" fn mle_player_get_media(player: *mut Player) -> *mut Media {
    guard(ptr::null_mut(), || {
        match player_ref(player).ok().and_then(Player::media) {
            Some(item) => into_raw(Arc::new(Media::from_item(item))),
            None => ptr::null_mut(),
        }
    })
}

/// # Safety
/// `player` must be a live player pointer.
#[no_mangle]
pub unsafe extern "C" fn mle_player_play(player: *mut Player) -> c_int {
    guard(-1, || to_code(player_ref(player).and_then(Player::play)))
}

/// # Safety
/// `player` must be a live player pointer.
#[no_mangle]
pub unsafe extern "C" fn mle_player_pause(player: *mut Player) {
    guard((), || {
        if let Ok(player) = player_ref(player) {
            player.pause();
        }
    })
}

/// # Safety
/// `player` must be a live player pointer.
#[no_mangle]
pub unsafe extern "C" fn mle_player_stop(player: *mut Player) {
    guard((), || {
        if let Ok(player) = player_ref(player) {
            player.stop();
        }
    })
}

/// # Safety
/// `player` must be a live player pointer.
#[no_mangle]
pub unsafe extern "C" fn mle_player_set_time(player: *mut Player, ms: i64) -> c_int {
    guard(-1, || to_code(player_ref(player).and_then(|p| p.set_time(ms))))
}

/// # Safety
/// `player` must be a live player pointer.
#[no_mangle]
pub unsafe extern "C" fn mle_player_get_time(player: *mut Player) -> i64 {
    guard(-1, || player_ref(player).map(Player::time).unwrap_or(-1))
}

/// # Safety
/// `player` must be a live player pointer.
#[no_mangle]
pub unsafe extern "C" fn mle_player_get_length(player: *mut Player) -> i64 {
    guard(-1, || player_ref(player).map(Player::length).unwrap_or(-1))
}

/// # Safety
/// `player` must be a live player pointer.
#[no_mangle]
pub unsafe extern "C" fn mle_player_get_state(player: *mut Player) -> c_int {
    guard(PlayerState::Error as c_int, || {
        player_ref(player)
            .map(|p| p.state() as c_int)
            .unwrap_or(PlayerState::NothingSpecial as c_int)
    })
}

/// # Safety
/// `player` must be a live player pointer.
#[no_mangle]
pub unsafe extern "C" fn mle_player_is_playing(player: *mut Player) -> c_int {
    guard(0, || player_ref(player).map(|p| p.is_playing() as c_int).unwrap_or(0))
}

/// # Safety
/// `player` must be live; `callback`/`opaque` must stay valid until detached.
#[no_mangle]
pub unsafe extern "C" fn mle_player_event_attach(
    player: *mut Player,
    kind: c_int,
    callback: EventCallback,
    opaque: *mut c_void,
) -> c_int {
    guard(-1, || match player_ref(player) {
        Ok(player) => attach(player.events(), kind, false, callback, opaque),
        Err(_) => -1,
    })
}

/// Detach a listener. Returns once no call to it is in flight.
///
/// # Safety
/// `player` must be a live player pointer.
#[no_mangle]
pub unsafe extern "C" fn mle_player_event_detach(
    player: *mut Player,
    kind: c_int,
    callback: EventCallback,
    opaque: *mut c_void,
) -> c_int {
    guard(-1, || match player_ref(player) {
        Ok(player) => detach(player.events(), kind, callback, opaque),
        Err(_) => -1,
    })
}

/// # Safety
/// `text` must come from this library, or be null.
#[no_mangle]
pub unsafe extern "C" fn mle_string_free(text: *mut c_char) {
    if !text.is_null() {
        drop(CString::from_raw(text));
    }
}
