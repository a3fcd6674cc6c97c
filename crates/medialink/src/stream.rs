// Adapts Rust byte streams to the engine's stream callbacks
//
// The bridge is boxed and handed to the engine as the callbacks' opaque
// pointer. The engine serialises sessions over one stream, so the
// trampolines never run concurrently for the same bridge, and it calls
// `free` exactly once when the last media reference is gone.

use crate::ffi::guard;
use medialink_engine::source::{SeekCallback, StreamCallbacks};
use medialink_engine::UNKNOWN_SIZE;
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};
use std::os::raw::{c_int, c_void};

/// `open` result when the stream length cannot be determined
pub const SIZE_UNKNOWN: i64 = -1;

/// `open` result when the stream cannot be (re)opened
pub const OPEN_FAILED: i64 = -2;

trait SeekableInput: Read + Seek + Send {}

impl<T: Read + Seek + Send> SeekableInput for T {}

enum Input {
    Seekable(Box<dyn SeekableInput>),
    ForwardOnly {
        reader: Box<dyn Read + Send>,
        /// Set once any byte was read; a consumed stream cannot be reopened
        consumed: bool,
    },
}

/// Pull-based view of a byte stream: open, read, seek, close
pub struct StreamBridge {
    input: Input,
    opens: u32,
}

impl StreamBridge {
    /// Bridge over a stream that can be rewound; every `open` restarts at 0
    pub fn seekable<R>(reader: R) -> Self
    where
        R: Read + Seek + Send + 'static,
    {
        Self {
            input: Input::Seekable(Box::new(reader)),
            opens: 0,
        }
    }

    /// Bridge over a stream that can only be read once, front to back
    pub fn forward_only<R>(reader: R) -> Self
    where
        R: Read + Send + 'static,
    {
        Self {
            input: Input::ForwardOnly {
                reader: Box::new(reader),
                consumed: false,
            },
            opens: 0,
        }
    }

    pub fn is_seekable(&self) -> bool {
        matches!(self.input, Input::Seekable(_))
    }

    /// Open (or reopen) the stream at offset 0.
    ///
    /// Returns the size in bytes, `SIZE_UNKNOWN`, or `OPEN_FAILED`.
    pub fn open(&mut self) -> i64 {
        self.opens += 1;
        match &mut self.input {
            Input::Seekable(stream) => {
                let size = stream.seek(SeekFrom::End(0));
                if let Err(e) = stream.seek(SeekFrom::Start(0)) {
                    log::warn!("Failed to rewind stream: {}", e);
                    return OPEN_FAILED;
                }
                match size {
                    Ok(size) => i64::try_from(size).unwrap_or(SIZE_UNKNOWN),
                    Err(e) => {
                        log::debug!("Stream size unknown: {}", e);
                        SIZE_UNKNOWN
                    }
                }
            }
            Input::ForwardOnly { consumed: true, .. } => {
                log::warn!("Forward-only stream cannot be reopened after it was read");
                OPEN_FAILED
            }
            Input::ForwardOnly { .. } => SIZE_UNKNOWN,
        }
    }

    /// Read into `buf`. Returns the count, 0 at end of stream, -1 on error.
    pub fn read(&mut self, buf: &mut [u8]) -> isize {
        let result = match &mut self.input {
            Input::Seekable(stream) => read_retrying(stream.as_mut(), buf),
            Input::ForwardOnly { reader, consumed } => {
                let result = read_retrying(reader.as_mut(), buf);
                if matches!(result, Ok(n) if n > 0) {
                    *consumed = true;
                }
                result
            }
        };
        match result {
            Ok(n) => isize::try_from(n).unwrap_or(isize::MAX),
            Err(e) => {
                log::warn!("Stream read failed: {}", e);
                -1
            }
        }
    }

    /// Seek to an absolute offset; always fails on forward-only streams
    pub fn seek(&mut self, offset: u64) -> bool {
        match &mut self.input {
            Input::Seekable(stream) => match stream.seek(SeekFrom::Start(offset)) {
                Ok(_) => true,
                Err(e) => {
                    log::warn!("Stream seek to {} failed: {}", offset, e);
                    false
                }
            },
            Input::ForwardOnly { .. } => false,
        }
    }

    pub fn close(&mut self) {
        log::trace!("Stream closed after {} open(s)", self.opens);
    }

    /// Number of times the engine opened this stream
    pub fn open_count(&self) -> u32 {
        self.opens
    }

    /// Hand the bridge over as a callback table plus opaque pointer.
    ///
    /// The engine frees the pointer through the table's `free` callback. If
    /// the engine rejects the table, the caller must give the pointer back to
    /// `reclaim`.
    pub(crate) fn into_callbacks(self) -> (StreamCallbacks, *mut c_void) {
        let callbacks = StreamCallbacks {
            open: Some(bridge_open),
            read: bridge_read,
            seek: self.is_seekable().then_some(bridge_seek as SeekCallback),
            close: Some(bridge_close),
            free: Some(bridge_free),
        };
        (callbacks, Box::into_raw(Box::new(self)) as *mut c_void)
    }

    /// Take back a bridge the engine never took ownership of
    ///
    /// # Safety
    /// `opaque` must come from `into_callbacks` and not have been freed.
    pub(crate) unsafe fn reclaim(opaque: *mut c_void) -> Self {
        *Box::from_raw(opaque as *mut StreamBridge)
    }
}

impl fmt::Debug for StreamBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamBridge")
            .field("seekable", &self.is_seekable())
            .field("opens", &self.opens)
            .finish()
    }
}

fn read_retrying(reader: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match reader.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            result => return result,
        }
    }
}

/// # Safety
/// `opaque` must be a live bridge from `into_callbacks` not used concurrently.
unsafe fn bridge<'a>(opaque: *mut c_void) -> &'a mut StreamBridge {
    &mut *(opaque as *mut StreamBridge)
}

unsafe extern "C" fn bridge_open(opaque: *mut c_void, size: *mut u64) -> c_int {
    guard(-1, || {
        let opened = bridge(opaque).open();
        if opened == OPEN_FAILED {
            return -1;
        }
        if !size.is_null() {
            *size = u64::try_from(opened).unwrap_or(UNKNOWN_SIZE);
        }
        0
    })
}

unsafe extern "C" fn bridge_read(opaque: *mut c_void, buf: *mut u8, len: usize) -> isize {
    guard(-1, || {
        if buf.is_null() || len == 0 {
            return 0;
        }
        let buf = std::slice::from_raw_parts_mut(buf, len);
        bridge(opaque).read(buf)
    })
}

unsafe extern "C" fn bridge_seek(opaque: *mut c_void, offset: u64) -> c_int {
    guard(-1, || if bridge(opaque).seek(offset) { 0 } else { -1 })
}

unsafe extern "C" fn bridge_close(opaque: *mut c_void) {
    guard((), || bridge(opaque).close())
}

unsafe extern "C" fn bridge_free(opaque: *mut c_void) {
    guard((), || drop(StreamBridge::reclaim(opaque)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct Failing;

    impl Read for Failing {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "device gone"))
        }
    }

    struct Panicking;

    impl Read for Panicking {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            panic!("reader bug")
        }
    }

    #[test]
    fn test_seekable_reports_size_and_rewinds() {
        let mut bridge = StreamBridge::seekable(Cursor::new(vec![1u8, 2, 3, 4, 5]));
        assert_eq!(bridge.open(), 5);

        let mut buf = [0u8; 3];
        assert_eq!(bridge.read(&mut buf), 3);
        assert_eq!(buf, [1, 2, 3]);
        assert!(bridge.seek(4));
        assert_eq!(bridge.read(&mut buf), 1);
        assert_eq!(buf[0], 5);
        assert_eq!(bridge.read(&mut buf), 0);

        assert_eq!(bridge.open(), 5);
        assert_eq!(bridge.read(&mut buf), 3);
        assert_eq!(buf, [1, 2, 3]);
        assert_eq!(bridge.open_count(), 2);
    }

    #[test]
    fn test_forward_only_rejects_seek_and_reopen() {
        let mut bridge = StreamBridge::forward_only(Cursor::new(vec![9u8; 4]));
        assert!(!bridge.is_seekable());
        assert_eq!(bridge.open(), SIZE_UNKNOWN);
        assert_eq!(bridge.open(), SIZE_UNKNOWN);
        assert!(!bridge.seek(0));

        let mut buf = [0u8; 8];
        assert_eq!(bridge.read(&mut buf), 4);
        bridge.close();
        assert_eq!(bridge.open(), OPEN_FAILED);
    }

    #[test]
    fn test_read_error_is_negative() {
        let mut bridge = StreamBridge::forward_only(Failing);
        let mut buf = [0u8; 8];
        assert_eq!(bridge.read(&mut buf), -1);
    }

    #[test]
    fn test_trampolines_round_trip() {
        let (callbacks, opaque) = StreamBridge::seekable(Cursor::new(b"abcdef".to_vec())).into_callbacks();
        assert!(callbacks.seek.is_some());

        unsafe {
            let mut size = 0u64;
            assert_eq!((callbacks.open.unwrap())(opaque, &mut size), 0);
            assert_eq!(size, 6);

            let mut buf = [0u8; 4];
            assert_eq!((callbacks.read)(opaque, buf.as_mut_ptr(), buf.len()), 4);
            assert_eq!(&buf, b"abcd");
            assert_eq!((callbacks.seek.unwrap())(opaque, 5), 0);
            assert_eq!((callbacks.read)(opaque, buf.as_mut_ptr(), buf.len()), 1);
            assert_eq!(buf[0], b'f');

            (callbacks.close.unwrap())(opaque);
            (callbacks.free.unwrap())(opaque);
        }
    }

    #[test]
    fn test_forward_only_open_reports_unknown_size() {
        let (callbacks, opaque) = StreamBridge::forward_only(Cursor::new(vec![0u8; 2])).into_callbacks();
        assert!(callbacks.seek.is_none());
        let bridge = unsafe {
            let mut size = 0u64;
            assert_eq!((callbacks.open.unwrap())(opaque, &mut size), 0);
            assert_eq!(size, UNKNOWN_SIZE);
            StreamBridge::reclaim(opaque)
        };
        assert_eq!(bridge.open_count(), 1);
    }

    #[test]
    fn test_panic_never_crosses_callback() {
        let (callbacks, opaque) = StreamBridge::forward_only(Panicking).into_callbacks();
        let mut buf = [0u8; 4];
        unsafe {
            assert_eq!((callbacks.read)(opaque, buf.as_mut_ptr(), buf.len()), -1);
            (callbacks.free.unwrap())(opaque);
        }
    }
}
