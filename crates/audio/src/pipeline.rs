//! Playback-Pipeline: Netzwerkseite -> Render-Callback
//!
//! Die Netzwerkseite ([`PlaybackSink`]) und der Render-Callback
//! ([`PcmRenderer`]) laufen auf unabhaengigen Takten. Dekodierte Bloecke
//! wandern ueber einen beschraenkten crossbeam-Kanal; nur der Renderer
//! besitzt den [`RingBuffer`]. Der Callback blockiert nie und faellt bei
//! zu wenig Daten auf Stille zurueck.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::trace;

use crate::ring_buffer::RingBuffer;

/// Maximale Anzahl wartender Bloecke zwischen Netzwerk und Renderer
const BLOCK_KANAL_GROESSE: usize = 256;

// ---------------------------------------------------------------------------
// LevelMeter
// ---------------------------------------------------------------------------

/// Pegel-Abgriff fuer die Analyse des empfangenen Signals
///
/// Speichert RMS und Spitze des zuletzt empfangenen Blocks als f32-Bits in
/// Atomics, lesbar aus jedem Thread.
#[derive(Clone, Default)]
pub struct LevelMeter {
    inner: Arc<LevelMeterInner>,
}

#[derive(Default)]
struct LevelMeterInner {
    rms: AtomicU32,
    peak: AtomicU32,
    bloecke: AtomicU64,
}

impl LevelMeter {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Misst einen Block
    pub fn messen(&self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }
        let summe: f32 = samples.iter().map(|s| s * s).sum();
        let rms = (summe / samples.len() as f32).sqrt();
        let peak = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));

        self.inner.rms.store(rms.to_bits(), Ordering::Relaxed);
        self.inner.peak.store(peak.to_bits(), Ordering::Relaxed);
        self.inner.bloecke.fetch_add(1, Ordering::Relaxed);
    }

    /// RMS des letzten Blocks (linear, 0.0..1.0)
    pub fn rms(&self) -> f32 {
        f32::from_bits(self.inner.rms.load(Ordering::Relaxed))
    }

    pub fn peak(&self) -> f32 {
        f32::from_bits(self.inner.peak.load(Ordering::Relaxed))
    }

    /// RMS in dBFS, mindestens -100 dB
    pub fn rms_db(&self) -> f32 {
        let rms = self.rms();
        if rms <= 1e-5 {
            -100.0
        } else {
            20.0 * rms.log10()
        }
    }

    /// Anzahl gemessener Bloecke
    pub fn bloecke(&self) -> u64 {
        self.inner.bloecke.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// PlaybackSink
// ---------------------------------------------------------------------------

/// Netzwerkseitiger Eingang der Playback-Pipeline
#[derive(Clone)]
pub struct PlaybackSink {
    tx: Sender<Vec<f32>>,
    meter: LevelMeter,
}

impl PlaybackSink {
    /// Uebergibt einen dekodierten Block an den Renderer.
    ///
    /// Blockiert nie. Ist der Kanal voll oder der Renderer beendet, wird
    /// der Block verworfen und `false` zurueckgegeben.
    pub fn push(&self, samples: Vec<f32>) -> bool {
        self.meter.messen(&samples);
        match self.tx.try_send(samples) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                trace!("Playback-Kanal voll, Block verworfen");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    pub fn meter(&self) -> &LevelMeter {
        &self.meter
    }
}

// ---------------------------------------------------------------------------
// PcmRenderer
// ---------------------------------------------------------------------------

/// Render-seitiger Ausgang der Playback-Pipeline
pub struct PcmRenderer {
    rx: Receiver<Vec<f32>>,
    ring: RingBuffer,
    underruns: u64,
    verworfen: u64,
}

impl PcmRenderer {
    /// Fuellt `out` mit genau `out.len()` Samples.
    ///
    /// Holt zuerst alle wartenden Bloecke ohne zu blockieren in den
    /// Ring-Buffer. Reichen die Samples nicht, wird Stille geschrieben und
    /// `false` zurueckgegeben; der Ring-Buffer bleibt dann unveraendert.
    pub fn render(&mut self, out: &mut [f32]) -> bool {
        for block in self.rx.try_iter() {
            self.verworfen += self.ring.push(&block) as u64;
        }

        if self.ring.pop_into(out) {
            true
        } else {
            out.fill(0.0);
            self.underruns += 1;
            trace!(
                vorhanden = self.ring.size(),
                benoetigt = out.len(),
                "Playback Underrun"
            );
            false
        }
    }

    /// Anzahl der Render-Aufrufe die Stille liefern mussten
    pub fn underruns(&self) -> u64 {
        self.underruns
    }

    /// Anzahl der bei Ueberlauf verworfenen Samples
    pub fn verworfen(&self) -> u64 {
        self.verworfen
    }

    pub fn gepuffert(&self) -> usize {
        self.ring.size()
    }
}

/// Erstellt eine verbundene Sink/Renderer-Paarung
pub fn playback_pipeline(capacity: usize) -> (PlaybackSink, PcmRenderer) {
    let (tx, rx) = crossbeam_channel::bounded(BLOCK_KANAL_GROESSE);
    (
        PlaybackSink {
            tx,
            meter: LevelMeter::neu(),
        },
        PcmRenderer {
            rx,
            ring: RingBuffer::new(capacity),
            underruns: 0,
            verworfen: 0,
        },
    )
}
