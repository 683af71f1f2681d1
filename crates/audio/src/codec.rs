//! Opus-Decoder Wrapper
//!
//! Kapselt audiopus und liefert normalisierte f32-PCM-Samples.

use audiopus::{coder::Decoder, Channels, SampleRate};
use tracing::debug;

use crate::error::{AudioError, AudioResult};

/// Laengster Opus-Frame in Millisekunden
const MAX_FRAME_MS: usize = 120;

/// Laenge eines verdeckten Frames (PLC) in Millisekunden
pub const PLC_FRAME_MS: usize = 20;

/// Opus-Decoder: dekodiert Opus-Bytes zu f32-PCM
pub struct OpusDecoder {
    decoder: Decoder,
    sample_rate: u32,
    channels: u16,
    /// Puffer fuer einen maximal langen Frame
    puffer: Vec<f32>,
}

impl OpusDecoder {
    /// Erstellt einen neuen Decoder
    pub fn neu(sample_rate: u32, channels: u16) -> AudioResult<Self> {
        let sr = rate_to_audiopus(sample_rate)?;
        let ch = channels_to_audiopus(channels)?;

        let decoder = Decoder::new(sr, ch).map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        let max_samples = sample_rate as usize / 1000 * MAX_FRAME_MS * channels as usize;

        debug!(sample_rate, channels, "OpusDecoder erstellt");

        Ok(Self {
            decoder,
            sample_rate,
            channels,
            puffer: vec![0.0; max_samples],
        })
    }

    /// Dekodiert Opus-Bytes zu f32-PCM (bei Stereo verschraenkt)
    pub fn decode(&mut self, opus_data: &[u8]) -> AudioResult<Vec<f32>> {
        let decoded = self
            .decoder
            .decode_float(Some(opus_data), &mut self.puffer, false)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        Ok(self.puffer[..decoded * self.channels as usize].to_vec())
    }

    /// Verdeckt ein verlorenes Paket (PLC) mit genau einem 20-ms-Frame
    pub fn decode_plc(&mut self) -> AudioResult<Vec<f32>> {
        let frame = self.sample_rate as usize / 1000 * PLC_FRAME_MS * self.channels as usize;
        let decoded = self
            .decoder
            .decode_float(None::<&[u8]>, &mut self.puffer[..frame], false)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        Ok(self.puffer[..decoded * self.channels as usize].to_vec())
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}

// ---------------------------------------------------------------------------
// Konvertierungs-Hilfsfunktionen
// ---------------------------------------------------------------------------

fn rate_to_audiopus(rate: u32) -> AudioResult<SampleRate> {
    match rate {
        8000 => Ok(SampleRate::Hz8000),
        12000 => Ok(SampleRate::Hz12000),
        16000 => Ok(SampleRate::Hz16000),
        24000 => Ok(SampleRate::Hz24000),
        48000 => Ok(SampleRate::Hz48000),
        andere => Err(AudioError::Konfiguration(format!(
            "Opus unterstuetzt keine Abtastrate von {} Hz",
            andere
        ))),
    }
}

fn channels_to_audiopus(channels: u16) -> AudioResult<Channels> {
    match channels {
        1 => Ok(Channels::Mono),
        2 => Ok(Channels::Stereo),
        andere => Err(AudioError::Konfiguration(format!(
            "Opus unterstuetzt {} Kanaele nicht",
            andere
        ))),
    }
}
