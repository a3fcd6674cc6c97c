// Owned references to native engine objects

use crate::error::{Error, Result};
use medialink_engine::abi;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::fmt;
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_HANDLE_ID: Lazy<AtomicU64> = Lazy::new(|| AtomicU64::new(1));

/// A kind of native object and its reference counting entry points
pub trait NativeKind {
    type Raw;
    const NAME: &'static str;

    /// # Safety
    /// `raw` must be a live pointer of this kind.
    unsafe fn retain(raw: *mut Self::Raw);

    /// # Safety
    /// `raw` must be a live pointer of this kind; one reference is given up.
    unsafe fn release(raw: *mut Self::Raw);
}

pub enum InstanceKind {}
pub enum MediaKind {}
pub enum PlayerKind {}

impl NativeKind for InstanceKind {
    type Raw = medialink_engine::Instance;
    const NAME: &'static str = "instance";

    unsafe fn retain(raw: *mut Self::Raw) {
        abi::mle_instance_retain(raw)
    }

    unsafe fn release(raw: *mut Self::Raw) {
        abi::mle_instance_release(raw)
    }
}

impl NativeKind for MediaKind {
    type Raw = medialink_engine::Media;
    const NAME: &'static str = "media";

    unsafe fn retain(raw: *mut Self::Raw) {
        abi::mle_media_retain(raw)
    }

    unsafe fn release(raw: *mut Self::Raw) {
        abi::mle_media_release(raw)
    }
}

impl NativeKind for PlayerKind {
    type Raw = medialink_engine::Player;
    const NAME: &'static str = "player";

    unsafe fn retain(raw: *mut Self::Raw) {
        abi::mle_player_retain(raw)
    }

    unsafe fn release(raw: *mut Self::Raw) {
        abi::mle_player_release(raw)
    }
}

/// Process-unique identity of a handle wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl HandleId {
    pub(crate) fn next() -> Self {
        HandleId(NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct RawPtr<T>(*mut T);

// SAFETY: engine objects are internally synchronised and may be used and
// released from any thread.
unsafe impl<T> Send for RawPtr<T> {}
unsafe impl<T> Sync for RawPtr<T> {}

/// One owned reference to a native object.
///
/// The pointer is read under a shared lock for the duration of each native
/// call, so `release` (exclusive) never frees the object under a running
/// call. Released handles report a null pointer.
pub struct NativeHandle<K: NativeKind> {
    raw: RwLock<Option<RawPtr<K::Raw>>>,
    id: HandleId,
    _kind: PhantomData<K>,
}

impl<K: NativeKind> NativeHandle<K> {
    /// Take ownership of one reference returned by the engine
    ///
    /// # Safety
    /// `raw` must be null or a pointer of kind `K` whose reference the
    /// caller hands over.
    pub unsafe fn acquire(raw: *mut K::Raw) -> Result<Self> {
        if raw.is_null() {
            log::warn!("Engine returned a null {} handle", K::NAME);
            return Err(Error::InvalidHandle);
        }
        let handle = Self {
            raw: RwLock::new(Some(RawPtr(raw))),
            id: HandleId::next(),
            _kind: PhantomData,
        };
        log::trace!("Acquired {} handle {}", K::NAME, handle.id);
        Ok(handle)
    }

    /// Another owned reference to the same native object, with its own identity
    pub fn duplicate(&self) -> Result<Self> {
        let raw = self.raw.read();
        let ptr = raw.as_ref().ok_or(Error::InvalidHandle)?.0;
        // SAFETY: the pointer is live while we hold the read lock.
        unsafe {
            K::retain(ptr);
            Self::acquire(ptr)
        }
    }

    /// Give up the reference. Only the first call has an effect.
    pub fn release(&self) -> bool {
        let Some(raw) = self.raw.write().take() else {
            return false;
        };
        log::trace!("Releasing {} handle {}", K::NAME, self.id);
        // SAFETY: we owned exactly one reference and no call is in flight.
        unsafe { K::release(raw.0) };
        true
    }

    pub fn is_valid(&self) -> bool {
        self.raw.read().is_some()
    }

    /// The native pointer, or null once released
    pub fn as_ptr(&self) -> *mut K::Raw {
        self.raw.read().as_ref().map_or(ptr::null_mut(), |raw| raw.0)
    }

    /// Run a native call with the pointer, keeping it alive for the call
    pub fn with_ptr<R>(&self, f: impl FnOnce(*mut K::Raw) -> R) -> Result<R> {
        let raw = self.raw.read();
        let ptr = raw.as_ref().ok_or(Error::InvalidHandle)?.0;
        Ok(f(ptr))
    }

    pub fn id(&self) -> HandleId {
        self.id
    }
}

impl<K: NativeKind> fmt::Debug for NativeHandle<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeHandle")
            .field("kind", &K::NAME)
            .field("id", &self.id)
            .field("ptr", &self.as_ptr())
            .finish()
    }
}

impl<K: NativeKind> Drop for NativeHandle<K> {
    fn drop(&mut self) {
        self.release();
    }
}
