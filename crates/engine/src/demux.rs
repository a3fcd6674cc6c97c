// Demuxing using Symphonia

use crate::error::{EngineError, Result};
use crate::meta::MetaKey;
use symphonia::core::codecs::CODEC_TYPE_NULL;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Packet, SeekMode, SeekTo, Track};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardTagKey};
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

/// Elementary stream categories.
///
/// Symphonia only demuxes audio, so `Video` and `Text` are never produced
/// here; they are part of the track layout handed to C callers.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Unknown = -1,
    Audio = 0,
    Video = 1,
    Text = 2,
}

/// Elementary stream description
#[derive(Debug, Clone, PartialEq)]
pub struct TrackInfo {
    pub id: u32,
    pub kind: TrackKind,
    pub codec: String,
    pub language: Option<String>,
    pub channels: u32,
    pub rate: u32,
}

/// Tracks where the next packet of a track is expected to start
#[derive(Debug, Default)]
struct Continuity {
    next_ts: Option<u64>,
}

impl Continuity {
    /// Record a packet; true when it does not start where the previous one ended
    fn observe(&mut self, ts: u64, dur: u64) -> bool {
        let gap = matches!(self.next_ts, Some(expected) if expected != ts);
        self.next_ts = Some(ts + dur);
        gap
    }

    fn reset(&mut self) {
        self.next_ts = None;
    }
}

/// Demuxer wrapper around a probed format reader
pub struct Demuxer {
    format_reader: Box<dyn FormatReader>,
    track_id: u32,
    tags: Vec<(MetaKey, String)>,
    continuity: Continuity,
    discontinuity: bool,
}

impl Demuxer {
    /// Probe a media source and select its default track
    pub fn from_media_source(media_source: Box<dyn MediaSource>, hint: Hint) -> Result<Self> {
        let media_source_stream = MediaSourceStream::new(media_source, Default::default());

        let mut probe_result = symphonia::default::get_probe()
            .format(
                &hint,
                media_source_stream,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| EngineError::UnsupportedFormat(format!("Failed to probe media: {}", e)))?;

        let mut tags = Vec::new();
        if let Some(metadata) = probe_result.metadata.get() {
            if let Some(revision) = metadata.current() {
                collect_tags(revision, &mut tags);
            }
        }

        let mut format_reader = probe_result.format;
        if let Some(revision) = format_reader.metadata().current() {
            collect_tags(revision, &mut tags);
        }

        let track_id = format_reader
            .default_track()
            .ok_or_else(|| EngineError::UnsupportedFormat("No default track found".to_string()))?
            .id;

        Ok(Self {
            format_reader,
            track_id,
            tags,
            continuity: Continuity::default(),
            discontinuity: false,
        })
    }

    /// Tags found in the container, later revisions last
    pub fn tags(&self) -> &[(MetaKey, String)] {
        &self.tags
    }

    pub fn tracks(&self) -> Vec<TrackInfo> {
        self.format_reader.tracks().iter().map(track_info).collect()
    }

    fn default_track(&self) -> Option<&Track> {
        self.format_reader
            .tracks()
            .iter()
            .find(|t| t.id == self.track_id)
    }

    /// Duration of the default track in milliseconds, -1 if unknown
    pub fn duration_ms(&self) -> i64 {
        let Some(track) = self.default_track() else {
            return -1;
        };
        let params = &track.codec_params;
        match (params.n_frames, params.time_base, params.sample_rate) {
            (Some(n_frames), Some(tb), _) => time_to_ms(tb.calc_time(n_frames)),
            (Some(n_frames), None, Some(rate)) if rate > 0 => (n_frames * 1000 / rate as u64) as i64,
            _ => -1,
        }
    }

    /// Timestamp of the default track in milliseconds
    pub fn ts_to_ms(&self, ts: u64) -> i64 {
        let params = self.default_track().map(|t| &t.codec_params);
        match params.and_then(|p| p.time_base) {
            Some(tb) => time_to_ms(tb.calc_time(ts)),
            None => match params.and_then(|p| p.sample_rate) {
                Some(rate) if rate > 0 => (ts * 1000 / rate as u64) as i64,
                _ => 0,
            },
        }
    }

    /// End time of a packet in milliseconds
    pub fn packet_end_ms(&self, packet: &Packet) -> i64 {
        self.ts_to_ms(packet.ts() + packet.dur())
    }

    /// Next packet of the default track, `None` at end of stream
    pub fn next_packet(&mut self) -> Result<Option<Packet>> {
        loop {
            match self.format_reader.next_packet() {
                Ok(packet) if packet.track_id() == self.track_id => {
                    self.discontinuity = self.continuity.observe(packet.ts(), packet.dur());
                    return Ok(Some(packet));
                }
                Ok(_) => continue,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(None)
                }
                Err(e) => {
                    return Err(EngineError::Decoding(format!("Failed to read packet: {}", e)))
                }
            }
        }
    }

    /// Whether the last packet from `next_packet` left a gap after the one before
    pub fn discontinuity(&self) -> bool {
        self.discontinuity
    }

    /// Seek to `time_ms`; returns the position actually reached
    pub fn seek(&mut self, time_ms: u64) -> Result<i64> {
        let time = Time::new(time_ms / 1000, (time_ms % 1000) as f64 / 1000.0);
        let seeked = self
            .format_reader
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time,
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| EngineError::Playback(format!("Seek failed: {}", e)))?;
        self.continuity.reset();
        self.discontinuity = false;
        Ok(self.ts_to_ms(seeked.required_ts))
    }

    pub fn format_reader(&self) -> &dyn FormatReader {
        &*self.format_reader
    }

    pub fn track_id(&self) -> u32 {
        self.track_id
    }
}

fn track_info(track: &Track) -> TrackInfo {
    let params = &track.codec_params;
    let codec = symphonia::default::get_codecs()
        .get_codec(params.codec)
        .map(|d| d.short_name.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let kind = if params.codec != CODEC_TYPE_NULL && (params.sample_rate.is_some() || params.channels.is_some()) {
        TrackKind::Audio
    } else {
        TrackKind::Unknown
    };
    TrackInfo {
        id: track.id,
        kind,
        codec,
        language: track.language.clone(),
        channels: params.channels.map(|c| c.count() as u32).unwrap_or(0),
        rate: params.sample_rate.unwrap_or(0),
    }
}

fn time_to_ms(time: Time) -> i64 {
    (time.seconds * 1000) as i64 + (time.frac * 1000.0) as i64
}

fn collect_tags(revision: &MetadataRevision, out: &mut Vec<(MetaKey, String)>) {
    for tag in revision.tags() {
        if let Some(key) = tag.std_key.and_then(meta_key_for) {
            out.push((key, tag.value.to_string()));
        }
    }
}

fn meta_key_for(key: StandardTagKey) -> Option<MetaKey> {
    let mapped = match key {
        StandardTagKey::TrackTitle => MetaKey::Title,
        StandardTagKey::Artist => MetaKey::Artist,
        StandardTagKey::Album => MetaKey::Album,
        StandardTagKey::AlbumArtist => MetaKey::AlbumArtist,
        StandardTagKey::Genre => MetaKey::Genre,
        StandardTagKey::Date | StandardTagKey::ReleaseDate => MetaKey::Date,
        StandardTagKey::Comment | StandardTagKey::Description => MetaKey::Description,
        StandardTagKey::Copyright => MetaKey::Copyright,
        StandardTagKey::TrackNumber => MetaKey::TrackNumber,
        StandardTagKey::TrackTotal => MetaKey::TrackTotal,
        StandardTagKey::DiscNumber => MetaKey::DiscNumber,
        StandardTagKey::DiscTotal => MetaKey::DiscTotal,
        StandardTagKey::Language => MetaKey::Language,
        StandardTagKey::Label => MetaKey::Publisher,
        StandardTagKey::EncodedBy | StandardTagKey::Encoder => MetaKey::EncodedBy,
        StandardTagKey::Rating => MetaKey::Rating,
        _ => return None,
    };
    Some(mapped)
}
