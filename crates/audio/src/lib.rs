//! talky-audio – Empfangsseitige Audio-Pipeline
//!
//! Vom Netzwerk dekodierte Samples laufen ueber einen lock-freien Kanal in
//! den Render-Thread, werden dort im Ring-Buffer zwischengespeichert und in
//! festen Quanten vom cpal-Callback gelesen:
//!
//! ```text
//! RTP/Opus -> OpusDecoder -> PlaybackSink --(crossbeam)--> PcmRenderer
//!                               |                           |
//!                           LevelMeter                 RingBuffer -> cpal
//! ```

pub mod codec;
pub mod error;
pub mod pipeline;
pub mod playback;
pub mod ring_buffer;

// Bequeme Re-Exporte der wichtigsten Typen
pub use codec::OpusDecoder;
pub use error::{AudioError, AudioResult};
pub use pipeline::{playback_pipeline, LevelMeter, PcmRenderer, PlaybackSink};
pub use playback::{PlaybackConfig, PlaybackThread};
pub use ring_buffer::RingBuffer;
