// Shared fixtures for the integration tests

#![allow(dead_code)]

use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub const SAMPLE_RATE: u32 = 44_100;
pub const CHANNELS: u16 = 2;

pub fn init() {
    medialink::init_logging();
}

/// Write a 16-bit stereo 44.1 kHz sawtooth of `seconds` length
pub fn write_wav(path: &Path, seconds: u32) {
    let spec = hound::WavSpec {
        channels: CHANNELS,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..(SAMPLE_RATE * seconds) {
        let sample = ((i % 200) as i16 - 100) * 150;
        writer.write_sample(sample).unwrap();
        writer.write_sample(sample).unwrap();
    }
    writer.finalize().unwrap();
}

/// A WAV fixture inside its own temporary directory
pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub path: PathBuf,
}

impl Fixture {
    pub fn new(name: &str, seconds: u32) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        write_wav(&path, seconds);
        Self { dir, path }
    }

    pub fn bytes(&self) -> Vec<u8> {
        std::fs::read(&self.path).unwrap()
    }
}

/// Poll `done` every 10 ms until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if done() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
}

/// In-memory seekable stream counting how often its size is queried.
///
/// Only opening a bridge seeks relative to the end; the engine translates its
/// own seeks to absolute offsets.
pub struct OpenCounter {
    inner: Cursor<Vec<u8>>,
    opens: Arc<AtomicUsize>,
}

impl OpenCounter {
    pub fn new(bytes: Vec<u8>) -> (Self, Arc<AtomicUsize>) {
        let opens = Arc::new(AtomicUsize::new(0));
        let stream = Self {
            inner: Cursor::new(bytes),
            opens: Arc::clone(&opens),
        };
        (stream, opens)
    }
}

impl Read for OpenCounter {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Seek for OpenCounter {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        if matches!(pos, SeekFrom::End(_)) {
            self.opens.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.seek(pos)
    }
}

/// Produces one zero byte every 100 ms, forever
pub struct TrickleReader;

impl Read for TrickleReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        thread::sleep(Duration::from_millis(100));
        match buf.first_mut() {
            Some(byte) => {
                *byte = 0;
                Ok(1)
            }
            None => Ok(0),
        }
    }
}

/// Fails every read
pub struct BrokenReader;

impl Read for BrokenReader {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "source went away"))
    }
}
