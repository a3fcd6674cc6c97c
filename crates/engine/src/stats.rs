// Per-media playback statistics

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

/// Live counters, updated by playback threads
#[derive(Debug, Default)]
pub struct MediaStats {
    read_bytes: AtomicI64,
    input_bitrate: AtomicU32,
    demux_read_bytes: AtomicI64,
    demux_bitrate: AtomicU32,
    demux_corrupted: AtomicI64,
    demux_discontinuity: AtomicI64,
    decoded_audio: AtomicI64,
    played_audio_buffers: AtomicI64,
    lost_audio_buffers: AtomicI64,
}

/// Point-in-time copy of `MediaStats`, counter by counter
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatsSnapshot {
    pub read_bytes: i64,
    /// Kilobytes per second
    pub input_bitrate: f32,
    pub demux_read_bytes: i64,
    pub demux_bitrate: f32,
    pub demux_corrupted: i64,
    pub demux_discontinuity: i64,
    pub decoded_audio: i64,
    /// Always 0: the engine decodes audio only
    pub decoded_video: i64,
    /// Always 0, like `decoded_video`
    pub displayed_pictures: i64,
    /// Always 0, like `decoded_video`
    pub lost_pictures: i64,
    pub played_audio_buffers: i64,
    pub lost_audio_buffers: i64,
}

impl MediaStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_read_bytes(&self, n: u64) {
        self.read_bytes.fetch_add(n as i64, Ordering::Relaxed);
    }

    pub fn add_demux_bytes(&self, n: u64) {
        self.demux_read_bytes.fetch_add(n as i64, Ordering::Relaxed);
    }

    pub fn inc_demux_corrupted(&self) {
        self.demux_corrupted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_demux_discontinuity(&self) {
        self.demux_discontinuity.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_decoded_audio(&self) {
        self.decoded_audio.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_played_audio_buffers(&self) {
        self.played_audio_buffers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_lost_audio_buffers(&self) {
        self.lost_audio_buffers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_bitrates(&self, input_kbps: f32, demux_kbps: f32) {
        self.input_bitrate.store(input_kbps.to_bits(), Ordering::Relaxed);
        self.demux_bitrate.store(demux_kbps.to_bits(), Ordering::Relaxed);
    }

    pub fn read_bytes(&self) -> i64 {
        self.read_bytes.load(Ordering::Relaxed)
    }

    pub fn demux_read_bytes(&self) -> i64 {
        self.demux_read_bytes.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            read_bytes: self.read_bytes.load(Ordering::Relaxed),
            input_bitrate: f32::from_bits(self.input_bitrate.load(Ordering::Relaxed)),
            demux_read_bytes: self.demux_read_bytes.load(Ordering::Relaxed),
            demux_bitrate: f32::from_bits(self.demux_bitrate.load(Ordering::Relaxed)),
            demux_corrupted: self.demux_corrupted.load(Ordering::Relaxed),
            demux_discontinuity: self.demux_discontinuity.load(Ordering::Relaxed),
            decoded_audio: self.decoded_audio.load(Ordering::Relaxed),
            decoded_video: 0,
            displayed_pictures: 0,
            lost_pictures: 0,
            played_audio_buffers: self.played_audio_buffers.load(Ordering::Relaxed),
            lost_audio_buffers: self.lost_audio_buffers.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = MediaStats::new();
        stats.add_read_bytes(4096);
        stats.add_demux_bytes(1024);
        stats.inc_decoded_audio();
        stats.inc_decoded_audio();
        stats.inc_played_audio_buffers();
        stats.inc_demux_discontinuity();
        stats.set_bitrates(12.5, 11.0);

        let snap = stats.snapshot();
        assert_eq!(snap.read_bytes, 4096);
        assert_eq!(snap.demux_read_bytes, 1024);
        assert_eq!(snap.decoded_audio, 2);
        assert_eq!(snap.played_audio_buffers, 1);
        assert_eq!(snap.demux_discontinuity, 1);
        assert_eq!(snap.input_bitrate, 12.5);
        assert_eq!(snap.decoded_video, 0);
    }
}
