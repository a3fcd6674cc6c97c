// Media sources: files and caller-supplied stream callbacks
//
// A stream endpoint is shared by every reference of a media item, but the
// underlying stream has a single read position, so only one session (parse
// or playback) may read it at a time.

use crate::callback::Opaque;
use crate::error::{EngineError, Result};
use crate::stats::MediaStats;
use parking_lot::{Condvar, Mutex};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::os::raw::{c_int, c_void};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use symphonia::core::io::MediaSource;
use symphonia::core::probe::Hint;

/// Size reported by an open callback when the stream length is unknown
pub const UNKNOWN_SIZE: u64 = u64::MAX;

const SESSION_POLL: Duration = Duration::from_millis(50);

/// How long a new session waits for the stream to be free. A read callback
/// that never returns keeps its session for good.
const SESSION_WAIT: Duration = Duration::from_secs(10);

/// Open the stream and report its size. Returns 0 on success.
pub type OpenCallback = unsafe extern "C" fn(opaque: *mut c_void, size: *mut u64) -> c_int;
/// Read up to `len` bytes. Returns the count, 0 at end of stream, negative on error.
pub type ReadCallback = unsafe extern "C" fn(opaque: *mut c_void, buf: *mut u8, len: usize) -> isize;
/// Seek to an absolute offset. Returns 0 on success.
pub type SeekCallback = unsafe extern "C" fn(opaque: *mut c_void, offset: u64) -> c_int;
pub type CloseCallback = unsafe extern "C" fn(opaque: *mut c_void);
/// Called once when the engine no longer needs `opaque`
pub type FreeCallback = unsafe extern "C" fn(opaque: *mut c_void);

#[repr(C)]
#[derive(Clone, Copy)]
pub struct StreamCallbacks {
    pub open: Option<OpenCallback>,
    pub read: ReadCallback,
    pub seek: Option<SeekCallback>,
    pub close: Option<CloseCallback>,
    pub free: Option<FreeCallback>,
}

/// Where a media item reads its bytes from
#[derive(Clone)]
pub enum SourceSpec {
    Path(PathBuf),
    Location(String),
    Node(String),
    Stream(Arc<StreamEndpoint>),
}

impl SourceSpec {
    /// Classify a location string; `file://` locations become paths
    pub fn from_location(location: &str) -> Self {
        match location.strip_prefix("file://") {
            Some(path) => SourceSpec::Path(PathBuf::from(path)),
            None => SourceSpec::Location(location.to_string()),
        }
    }

    pub fn mrl(&self) -> String {
        match self {
            SourceSpec::Path(path) => format!("file://{}", path.display()),
            SourceSpec::Location(location) => location.clone(),
            SourceSpec::Node(name) => name.clone(),
            SourceSpec::Stream(_) => "stream://".to_string(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            SourceSpec::Path(path) => Some(path),
            _ => None,
        }
    }
}

/// Caller-supplied stream callbacks plus their user data.
///
/// Dropping the last reference calls `free`.
pub struct StreamEndpoint {
    callbacks: StreamCallbacks,
    opaque: Opaque,
    busy: Mutex<bool>,
    idle: Condvar,
}

impl StreamEndpoint {
    pub fn new(callbacks: StreamCallbacks, opaque: *mut c_void) -> Self {
        Self {
            callbacks,
            opaque: Opaque(opaque),
            busy: Mutex::new(false),
            idle: Condvar::new(),
        }
    }

    /// Wait up to `wait` until no other session reads the stream, then claim it
    fn begin_session(&self, cancel: &AtomicBool, wait: Duration) -> Result<()> {
        let deadline = Instant::now() + wait;
        let mut busy = self.busy.lock();
        while *busy {
            if cancel.load(Ordering::Acquire) {
                return Err(EngineError::Cancelled);
            }
            if Instant::now() >= deadline {
                return Err(EngineError::Load(format!(
                    "Stream still held by another session after {:?}",
                    wait
                )));
            }
            self.idle.wait_for(&mut busy, SESSION_POLL);
        }
        *busy = true;
        Ok(())
    }

    fn end_session(&self) {
        *self.busy.lock() = false;
        self.idle.notify_one();
    }
}

impl Drop for StreamEndpoint {
    fn drop(&mut self) {
        if let Some(free) = self.callbacks.free {
            log::debug!("Freeing stream callbacks");
            // SAFETY: called exactly once, after the last session closed.
            unsafe { free(self.opaque.0) };
        }
    }
}

/// One open session over a `StreamEndpoint`
pub struct CallbackSource {
    endpoint: Arc<StreamEndpoint>,
    cancel: Arc<AtomicBool>,
    size: Option<u64>,
    position: u64,
}

impl CallbackSource {
    pub fn open(endpoint: Arc<StreamEndpoint>, cancel: Arc<AtomicBool>) -> Result<Self> {
        Self::open_within(endpoint, cancel, SESSION_WAIT)
    }

    fn open_within(endpoint: Arc<StreamEndpoint>, cancel: Arc<AtomicBool>, wait: Duration) -> Result<Self> {
        endpoint.begin_session(&cancel, wait)?;

        let mut size = UNKNOWN_SIZE;
        if let Some(open) = endpoint.callbacks.open {
            // SAFETY: opaque belongs to these callbacks and outlives the endpoint.
            let rc = unsafe { open(endpoint.opaque.0, &mut size) };
            if rc != 0 {
                endpoint.end_session();
                return Err(EngineError::Load(format!("Stream open callback failed ({})", rc)));
            }
        }

        let size = (size != UNKNOWN_SIZE).then_some(size);
        log::debug!("Opened callback stream, size {:?}", size);
        Ok(Self {
            endpoint,
            cancel,
            size,
            position: 0,
        })
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }
}

impl Read for CallbackSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.cancelled() {
            return Err(io::Error::new(io::ErrorKind::Other, "stream read cancelled"));
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let read = self.endpoint.callbacks.read;
        // SAFETY: buf is valid for buf.len() bytes for the duration of the call.
        let n = unsafe { read(self.endpoint.opaque.0, buf.as_mut_ptr(), buf.len()) };
        if n < 0 {
            return Err(io::Error::new(io::ErrorKind::Other, "stream read callback failed"));
        }
        let n = (n as usize).min(buf.len());
        self.position += n as u64;
        Ok(n)
    }
}

impl Seek for CallbackSource {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Current(0) => return Ok(self.position),
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(delta) => self.position as i64 + delta,
            SeekFrom::End(delta) => match self.size {
                Some(size) => size as i64 + delta,
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::Unsupported,
                        "Cannot seek from end: stream size unknown",
                    ))
                }
            },
        };

        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Cannot seek to negative position",
            ));
        }

        let Some(seek) = self.endpoint.callbacks.seek else {
            return Err(io::Error::new(io::ErrorKind::Unsupported, "stream is not seekable"));
        };

        // SAFETY: see `read`.
        let rc = unsafe { seek(self.endpoint.opaque.0, target as u64) };
        if rc != 0 {
            return Err(io::Error::new(io::ErrorKind::Other, "stream seek callback failed"));
        }
        self.position = target as u64;
        Ok(self.position)
    }
}

impl MediaSource for CallbackSource {
    fn is_seekable(&self) -> bool {
        self.endpoint.callbacks.seek.is_some() && self.size.is_some()
    }

    fn byte_len(&self) -> Option<u64> {
        self.size
    }
}

impl Drop for CallbackSource {
    fn drop(&mut self) {
        if let Some(close) = self.endpoint.callbacks.close {
            // SAFETY: see `read`.
            unsafe { close(self.endpoint.opaque.0) };
        }
        self.endpoint.end_session();
    }
}

/// Counts bytes handed to the demuxer into `read_bytes`
pub struct CountingSource {
    inner: Box<dyn MediaSource>,
    stats: Arc<MediaStats>,
}

impl CountingSource {
    pub fn new(inner: Box<dyn MediaSource>, stats: Arc<MediaStats>) -> Self {
        Self { inner, stats }
    }
}

impl Read for CountingSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.stats.add_read_bytes(n as u64);
        Ok(n)
    }
}

impl Seek for CountingSource {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

impl MediaSource for CountingSource {
    fn is_seekable(&self) -> bool {
        self.inner.is_seekable()
    }

    fn byte_len(&self) -> Option<u64> {
        self.inner.byte_len()
    }
}

/// Open a readable source for `spec`
pub fn open_source(spec: &SourceSpec, cancel: Arc<AtomicBool>) -> Result<(Box<dyn MediaSource>, Hint)> {
    match spec {
        SourceSpec::Path(path) => {
            let file = File::open(path)
                .map_err(|e| EngineError::Load(format!("Failed to open {}: {}", path.display(), e)))?;
            Ok((Box::new(file), create_hint_from_path(path)))
        }
        SourceSpec::Stream(endpoint) => {
            let source = CallbackSource::open(Arc::clone(endpoint), cancel)?;
            Ok((Box::new(source), Hint::new()))
        }
        SourceSpec::Location(location) => Err(EngineError::Load(format!(
            "No access module for location {}",
            location
        ))),
        SourceSpec::Node(name) => Err(EngineError::InvalidState(format!(
            "Node {} has no input",
            name
        ))),
    }
}

/// Create a hint from file extension
pub fn create_hint_from_path(path: &Path) -> Hint {
    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(extension);
    }
    hint
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct Fixture {
        data: Cursor<Vec<u8>>,
        opened: usize,
        closed: usize,
    }

    unsafe extern "C" fn fx_open(opaque: *mut c_void, size: *mut u64) -> c_int {
        let fx = &mut *(opaque as *mut Fixture);
        fx.opened += 1;
        fx.data.set_position(0);
        *size = fx.data.get_ref().len() as u64;
        0
    }

    unsafe extern "C" fn fx_read(opaque: *mut c_void, buf: *mut u8, len: usize) -> isize {
        let fx = &mut *(opaque as *mut Fixture);
        let out = std::slice::from_raw_parts_mut(buf, len);
        fx.data.read(out).map(|n| n as isize).unwrap_or(-1)
    }

    unsafe extern "C" fn fx_seek(opaque: *mut c_void, offset: u64) -> c_int {
        let fx = &mut *(opaque as *mut Fixture);
        fx.data.set_position(offset);
        0
    }

    unsafe extern "C" fn fx_close(opaque: *mut c_void) {
        let fx = &mut *(opaque as *mut Fixture);
        fx.closed += 1;
    }

    unsafe extern "C" fn failing_read(_: *mut c_void, _: *mut u8, _: usize) -> isize {
        -1
    }

    fn callbacks() -> StreamCallbacks {
        StreamCallbacks {
            open: Some(fx_open),
            read: fx_read,
            seek: Some(fx_seek),
            close: Some(fx_close),
            free: None,
        }
    }

    #[test]
    fn test_callback_source_reads_and_seeks() {
        let mut fixture = Fixture {
            data: Cursor::new(b"hello world".to_vec()),
            opened: 0,
            closed: 0,
        };
        let endpoint = Arc::new(StreamEndpoint::new(
            callbacks(),
            &mut fixture as *mut Fixture as *mut c_void,
        ));
        let cancel = Arc::new(AtomicBool::new(false));

        {
            let mut source = CallbackSource::open(Arc::clone(&endpoint), Arc::clone(&cancel)).unwrap();
            assert_eq!(source.byte_len(), Some(11));
            assert!(source.is_seekable());

            let mut buf = [0u8; 5];
            source.read_exact(&mut buf).unwrap();
            assert_eq!(&buf, b"hello");
            assert_eq!(source.seek(SeekFrom::Current(0)).unwrap(), 5);
            assert_eq!(source.seek(SeekFrom::End(-5)).unwrap(), 6);
            source.read_exact(&mut buf).unwrap();
            assert_eq!(&buf, b"world");

            cancel.store(true, Ordering::Release);
            assert!(source.read(&mut buf).is_err());
        }

        drop(endpoint);
        assert_eq!(fixture.opened, 1);
        assert_eq!(fixture.closed, 1);
    }

    #[test]
    fn test_read_error_is_reported() {
        let mut fixture = Fixture {
            data: Cursor::new(Vec::new()),
            opened: 0,
            closed: 0,
        };
        let mut cbs = callbacks();
        cbs.read = failing_read;
        cbs.seek = None;
        let endpoint = Arc::new(StreamEndpoint::new(cbs, &mut fixture as *mut Fixture as *mut c_void));
        let mut source = CallbackSource::open(endpoint, Arc::new(AtomicBool::new(false))).unwrap();

        assert!(!source.is_seekable());
        assert!(source.read(&mut [0u8; 4]).is_err());
        assert!(source.seek(SeekFrom::Start(0)).is_err());
    }

    #[test]
    fn test_second_session_waits_for_first() {
        let mut fixture = Fixture {
            data: Cursor::new(vec![1, 2, 3]),
            opened: 0,
            closed: 0,
        };
        let endpoint = Arc::new(StreamEndpoint::new(
            callbacks(),
            &mut fixture as *mut Fixture as *mut c_void,
        ));
        let first = CallbackSource::open(Arc::clone(&endpoint), Arc::new(AtomicBool::new(false))).unwrap();

        let cancelled = Arc::new(AtomicBool::new(true));
        assert!(matches!(
            CallbackSource::open(Arc::clone(&endpoint), cancelled),
            Err(EngineError::Cancelled)
        ));

        drop(first);
        let second = CallbackSource::open(Arc::clone(&endpoint), Arc::new(AtomicBool::new(false)));
        assert!(second.is_ok());
    }

    #[test]
    fn test_held_stream_gives_up() {
        let mut fixture = Fixture {
            data: Cursor::new(vec![1, 2, 3]),
            opened: 0,
            closed: 0,
        };
        let endpoint = Arc::new(StreamEndpoint::new(
            callbacks(),
            &mut fixture as *mut Fixture as *mut c_void,
        ));
        let stuck = CallbackSource::open(Arc::clone(&endpoint), Arc::new(AtomicBool::new(false))).unwrap();

        let started = Instant::now();
        let waiting = CallbackSource::open_within(
            Arc::clone(&endpoint),
            Arc::new(AtomicBool::new(false)),
            Duration::from_millis(150),
        );
        assert!(matches!(waiting, Err(EngineError::Load(_))));
        assert!(started.elapsed() >= Duration::from_millis(150));
        assert!(started.elapsed() < Duration::from_secs(5));

        drop(stuck);
        drop(endpoint);
        assert_eq!(fixture.opened, 1);
    }

    #[test]
    fn test_location_classification() {
        assert!(matches!(SourceSpec::from_location("file:///tmp/a.wav"), SourceSpec::Path(_)));
        let remote = SourceSpec::from_location("http://example.org/a.mp3");
        assert_eq!(remote.mrl(), "http://example.org/a.mp3");
        assert!(open_source(&remote, Arc::new(AtomicBool::new(false))).is_err());
        assert_eq!(SourceSpec::Path(PathBuf::from("/tmp/a.wav")).mrl(), "file:///tmp/a.wav");
    }
}
