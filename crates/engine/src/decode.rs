// Audio decoding using Symphonia
//
// The null sink only needs to know that a packet decoded, so samples are not
// converted or kept.

use crate::demux::Demuxer;
use crate::error::{EngineError, Result};
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::Packet;

/// Audio decoder for the demuxer's default track
pub struct AudioDecoder {
    decoder: Box<dyn Decoder>,
}

impl AudioDecoder {
    /// Create decoder from demuxer
    pub fn from_demuxer(demuxer: &Demuxer) -> Result<Self> {
        let track = demuxer
            .format_reader()
            .tracks()
            .iter()
            .find(|t| t.id == demuxer.track_id())
            .ok_or_else(|| EngineError::Load("Track not found".to_string()))?;

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| EngineError::UnsupportedFormat(format!("Failed to create decoder: {}", e)))?;

        Ok(Self { decoder })
    }

    /// Decode a packet.
    ///
    /// Returns the number of decoded frames, or `None` for a corrupt packet
    /// that was skipped.
    pub fn decode(&mut self, packet: &Packet) -> Result<Option<usize>> {
        match self.decoder.decode(packet) {
            Ok(buffer) => Ok(Some(buffer.frames())),
            Err(SymphoniaError::DecodeError(reason)) => {
                log::warn!("Skipping corrupt packet: {}", reason);
                Ok(None)
            }
            Err(e) => Err(EngineError::Decoding(format!("Decoding failed: {}", e))),
        }
    }

    /// Reset after a seek
    pub fn reset(&mut self) {
        self.decoder.reset();
    }
}
