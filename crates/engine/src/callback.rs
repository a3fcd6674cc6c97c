// Native event dispatch
//
// Listeners are plain C callbacks with a user-data pointer. They are invoked
// on engine threads (parse coordinator, playback thread) and must return
// quickly.

use parking_lot::RwLock;
use std::os::raw::c_void;

/// User data pointer handed back to a C callback.
///
/// The engine never dereferences it; ownership stays with whoever attached the
/// callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Opaque(pub(crate) *mut c_void);

// SAFETY: the pointer is only passed back to the callback that registered it.
// Callers attaching a callback promise that it is callable from any thread.
unsafe impl Send for Opaque {}
unsafe impl Sync for Opaque {}

/// Event types emitted by media and player objects
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// `value` carries the new `ParsedStatus`
    MediaParsedChanged = 0,
    /// `value` carries the duration in milliseconds
    MediaDurationChanged = 1,
    /// `value` carries the `MetaKey` that changed
    MediaMetaChanged = 2,
    /// `value` carries the `PlayerState` of the media
    MediaStateChanged = 3,

    PlayerOpening = 0x100,
    PlayerPlaying = 0x101,
    PlayerPaused = 0x102,
    PlayerStopped = 0x103,
    PlayerEndReached = 0x104,
    PlayerEncounteredError = 0x105,
    /// `value` carries the playback position in milliseconds
    PlayerTimeChanged = 0x106,
    /// `value` carries the media length in milliseconds
    PlayerLengthChanged = 0x107,
    PlayerMediaChanged = 0x108,
}

impl EventKind {
    pub const MEDIA: [EventKind; 4] = [
        EventKind::MediaParsedChanged,
        EventKind::MediaDurationChanged,
        EventKind::MediaMetaChanged,
        EventKind::MediaStateChanged,
    ];

    pub const PLAYER: [EventKind; 9] = [
        EventKind::PlayerOpening,
        EventKind::PlayerPlaying,
        EventKind::PlayerPaused,
        EventKind::PlayerStopped,
        EventKind::PlayerEndReached,
        EventKind::PlayerEncounteredError,
        EventKind::PlayerTimeChanged,
        EventKind::PlayerLengthChanged,
        EventKind::PlayerMediaChanged,
    ];

    pub fn is_media_event(self) -> bool {
        (self as i32) < 0x100
    }

    pub fn from_raw(raw: i32) -> Option<Self> {
        Self::MEDIA
            .iter()
            .chain(Self::PLAYER.iter())
            .copied()
            .find(|kind| *kind as i32 == raw)
    }
}

/// Event record passed to listeners
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent {
    pub kind: EventKind,
    /// Payload; meaning depends on `kind`
    pub value: i64,
}

impl RawEvent {
    pub fn new(kind: EventKind) -> Self {
        Self { kind, value: 0 }
    }

    pub fn with_value(kind: EventKind, value: i64) -> Self {
        Self { kind, value }
    }
}

/// Listener signature
pub type EventCallback = unsafe extern "C" fn(event: *const RawEvent, opaque: *mut c_void);

struct Listener {
    kind: EventKind,
    callback: EventCallback,
    opaque: Opaque,
}

impl Listener {
    fn matches(&self, kind: EventKind, callback: EventCallback, opaque: Opaque) -> bool {
        self.kind == kind && self.callback as usize == callback as usize && self.opaque == opaque
    }
}

/// Per-object listener registry
///
/// `emit` holds the read lock for the duration of the callbacks, so `detach`
/// (write lock) returns only once no callback for this object is in flight.
/// Callbacks must therefore never attach or detach on the object that is
/// emitting.
#[derive(Default)]
pub struct EventManager {
    listeners: RwLock<Vec<Listener>>,
}

impl EventManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. Attaching the same triple twice is a no-op.
    pub fn attach(&self, kind: EventKind, callback: EventCallback, opaque: *mut c_void) -> bool {
        let opaque = Opaque(opaque);
        let mut listeners = self.listeners.write();
        if listeners.iter().any(|l| l.matches(kind, callback, opaque)) {
            return false;
        }
        listeners.push(Listener {
            kind,
            callback,
            opaque,
        });
        true
    }

    /// Remove a listener, waiting for any in-flight dispatch to finish
    pub fn detach(&self, kind: EventKind, callback: EventCallback, opaque: *mut c_void) -> bool {
        let opaque = Opaque(opaque);
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| !l.matches(kind, callback, opaque));
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn emit(&self, event: RawEvent) {
        let listeners = self.listeners.read();
        for listener in listeners.iter().filter(|l| l.kind == event.kind) {
            // SAFETY: the attacher guarantees callback and opaque stay valid
            // until detach returns, and detach cannot return while we hold
            // the read lock.
            unsafe { (listener.callback)(&event, listener.opaque.0) };
        }
    }
}
