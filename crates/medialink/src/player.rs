// Playback controller
//
// A player holds a weak binding to its media: the media's lifetime is its
// owner's business, and a player bound to a disposed media refuses to play.

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::event::{Payload, PlayerEvent};
use crate::handle::{HandleId, NativeHandle, PlayerKind};
use crate::media::{Media, MediaInner};
use crate::relay::{relay_event, EventRelay, NativeListener, SubscriptionId};
use medialink_engine::{abi, EventKind, PlayerState};
use parking_lot::Mutex;
use std::os::raw::c_int;
use std::ptr;
use std::sync::{Arc, Weak};

pub struct MediaPlayer {
    handle: NativeHandle<PlayerKind>,
    relay: Arc<EventRelay>,
    listener: Mutex<Option<Box<NativeListener>>>,
    media: Mutex<Option<Weak<MediaInner>>>,
}

impl MediaPlayer {
    /// A player with no media bound
    pub fn new(engine: &Engine) -> Result<Self> {
        let instance = engine.instance()?;
        let raw = instance.with_ptr(|inst| unsafe { abi::mle_player_new(inst) })?;
        Self::wrap(raw, Arc::clone(engine.relay()))
    }

    /// A player bound to `media`, on the engine the media was created from
    pub fn with_media(media: &Media) -> Result<Self> {
        let inner = media.inner();
        let raw = inner
            .handle()
            .with_ptr(|m| unsafe { abi::mle_player_new_from_media(m) })
            .map_err(|_| Error::Argument("media is disposed".to_string()))?;
        let player = Self::wrap(raw, Arc::clone(inner.relay()))?;
        *player.media.lock() = Some(Arc::downgrade(inner));
        Ok(player)
    }

    fn wrap(raw: *mut medialink_engine::Player, relay: Arc<EventRelay>) -> Result<Self> {
        // SAFETY: `raw` is null or a reference the engine just handed us.
        let handle = unsafe { NativeHandle::<PlayerKind>::acquire(raw) }?;
        let listener = relay.listener(handle.id());
        let opaque = listener.as_opaque();
        handle.with_ptr(|raw| {
            for kind in EventKind::PLAYER {
                // SAFETY: the listener outlives the attachment; see `dispose`.
                unsafe { abi::mle_player_event_attach(raw, kind as c_int, relay_event, opaque) };
            }
        })?;
        log::debug!("Player {} created", handle.id());
        Ok(Self {
            handle,
            relay,
            listener: Mutex::new(Some(listener)),
            media: Mutex::new(None),
        })
    }

    /// Bind `media`, or unbind with `None`; stops the current playback
    pub fn set_media(&self, media: Option<&Media>) -> Result<()> {
        let rc = match media {
            Some(media) => media
                .inner()
                .handle()
                .with_ptr(|m| self.handle.with_ptr(|p| unsafe { abi::mle_player_set_media(p, m) }))??,
            None => self
                .handle
                .with_ptr(|p| unsafe { abi::mle_player_set_media(p, ptr::null_mut()) })?,
        };
        if rc != 0 {
            return Err(Error::InvalidHandle);
        }
        *self.media.lock() = media.map(|media| Arc::downgrade(media.inner()));
        Ok(())
    }

    /// The bound media, if it is still alive
    pub fn media(&self) -> Option<Media> {
        self.media
            .lock()
            .as_ref()
            .and_then(Weak::upgrade)
            .map(Media::from_inner)
    }

    /// Start, resume or restart playback of the bound media.
    ///
    /// Returns false when nothing playable is bound; format errors found
    /// later surface as `PlayerEvent::EncounteredError`.
    pub fn play(&self) -> bool {
        let bound = self.media.lock().as_ref().and_then(Weak::upgrade);
        match bound {
            Some(inner) if inner.is_valid() => {}
            Some(_) => {
                log::warn!("Player {}: bound media is disposed", self.handle.id());
                return false;
            }
            None => {
                log::warn!("Player {}: no media to play", self.handle.id());
                return false;
            }
        }
        self.handle
            .with_ptr(|p| unsafe { abi::mle_player_play(p) == 0 })
            .unwrap_or(false)
    }

    /// Bind `media` and play it
    pub fn play_media(&self, media: &Media) -> bool {
        if let Err(e) = self.set_media(Some(media)) {
            log::warn!("Player {}: cannot bind media: {}", self.handle.id(), e);
            return false;
        }
        self.play()
    }

    pub fn pause(&self) {
        let _ = self.handle.with_ptr(|p| unsafe { abi::mle_player_pause(p) });
    }

    /// Stop playback; safe to call in any state
    pub fn stop(&self) {
        let _ = self.handle.with_ptr(|p| unsafe { abi::mle_player_stop(p) });
    }

    /// Position in milliseconds
    pub fn time(&self) -> i64 {
        self.handle
            .with_ptr(|p| unsafe { abi::mle_player_get_time(p) })
            .unwrap_or(-1)
    }

    /// Seek to `ms`. Ignored (false) when nothing is playing; seeking past
    /// the end ends playback.
    pub fn set_time(&self, ms: i64) -> bool {
        self.handle
            .with_ptr(|p| unsafe { abi::mle_player_set_time(p, ms) == 0 })
            .unwrap_or(false)
    }

    /// Length of the playing media in milliseconds, -1 if unknown
    pub fn length(&self) -> i64 {
        self.handle
            .with_ptr(|p| unsafe { abi::mle_player_get_length(p) })
            .unwrap_or(-1)
    }

    pub fn state(&self) -> PlayerState {
        self.handle
            .with_ptr(|p| unsafe { abi::mle_player_get_state(p) })
            .ok()
            .and_then(PlayerState::from_raw)
            .unwrap_or(PlayerState::NothingSpecial)
    }

    pub fn is_playing(&self) -> bool {
        self.handle
            .with_ptr(|p| unsafe { abi::mle_player_is_playing(p) == 1 })
            .unwrap_or(false)
    }

    /// Fails with `InvalidHandle` once the player is disposed
    pub fn subscribe(&self, callback: impl Fn(&PlayerEvent) + Send + Sync + 'static) -> Result<SubscriptionId> {
        self.handle.with_ptr(|_| {
            self.relay.subscribe(self.handle.id(), move |payload| {
                if let Payload::Player(event) = payload {
                    callback(event);
                }
            })
        })
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.relay.unsubscribe(id)
    }

    /// Stop playback and release the player. Subscribers receive nothing
    /// once this returns.
    pub fn dispose(&self) {
        let Some(listener) = self.listener.lock().take() else {
            return;
        };
        let _ = self.handle.with_ptr(|raw| {
            for kind in EventKind::PLAYER {
                // SAFETY: detach returns once no callback with this listener runs.
                unsafe { abi::mle_player_event_detach(raw, kind as c_int, relay_event, listener.as_opaque()) };
            }
            // SAFETY: live pointer under the handle's read lock.
            unsafe { abi::mle_player_stop(raw) };
        });
        drop(listener);
        self.handle.release();
        self.relay.forget_source(self.handle.id());
        self.media.lock().take();
        log::debug!("Player {} disposed", self.handle.id());
    }

    pub fn is_disposed(&self) -> bool {
        !self.handle.is_valid()
    }

    pub fn native_reference(&self) -> *mut medialink_engine::Player {
        self.handle.as_ptr()
    }

    pub fn handle_id(&self) -> HandleId {
        self.handle.id()
    }
}

impl Drop for MediaPlayer {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for MediaPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaPlayer")
            .field("handle", &self.handle)
            .field("state", &self.state())
            .finish()
    }
}
