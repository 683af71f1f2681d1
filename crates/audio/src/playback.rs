//! Audio-Playback via cpal
//!
//! cpal::Stream ist !Send. Der Stream lebt deshalb in einem dedizierten
//! std::thread, der den [`PcmRenderer`] besitzt und bis zum Stopp-Signal
//! am Leben bleibt.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use tracing::{debug, error, info};

use crate::error::{AudioError, AudioResult};
use crate::pipeline::PcmRenderer;

/// Pruefintervall des Audio-Threads auf das Stopp-Signal
const STOPP_INTERVALL: Duration = Duration::from_millis(50);

/// Konfiguration fuer den Audio-Playback
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Abtastrate in Hz
    pub sample_rate: u32,
    /// Kanalanzahl des Ausgabegeraets (Signal wird mono gerendert)
    pub channels: u16,
    /// Ring-Buffer Kapazitaet in Samples
    pub buffer_size: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 1,
            buffer_size: 800_000,
        }
    }
}

// ---------------------------------------------------------------------------
// PlaybackThread
// ---------------------------------------------------------------------------

/// Haelt den cpal-Ausgabestream in einem eigenen Thread
pub struct PlaybackThread {
    running: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl PlaybackThread {
    /// Startet den Audio-Thread und wartet bis der Stream laeuft
    pub fn starten(config: PlaybackConfig, renderer: PcmRenderer) -> AudioResult<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);

        // Rueckmeldung ob der Stream geoeffnet werden konnte
        let (bereit_tx, bereit_rx) = std::sync::mpsc::sync_channel::<Result<(), String>>(1);

        let handle = std::thread::Builder::new()
            .name("talky-playback".to_string())
            .spawn(move || {
                let host = cpal::default_host();
                let stream = match host.default_output_device() {
                    Some(device) => open_output_stream(&device, &config, renderer),
                    None => Err(AudioError::KeinStandardAusgabegeraet),
                };

                let _stream = match stream {
                    Ok(s) => {
                        let _ = bereit_tx.send(Ok(()));
                        s
                    }
                    Err(e) => {
                        let _ = bereit_tx.send(Err(e.to_string()));
                        return;
                    }
                };

                while thread_running.load(Ordering::Relaxed) {
                    std::thread::sleep(STOPP_INTERVALL);
                }
                debug!("Playback-Thread beendet, cpal-Stream wird gedroppt");
            })?;

        match bereit_rx.recv() {
            Ok(Ok(())) => {
                info!("Playback gestartet");
                Ok(Self {
                    running,
                    handle: Some(handle),
                })
            }
            Ok(Err(grund)) => {
                let _ = handle.join();
                Err(AudioError::StreamFehler(grund))
            }
            Err(_) => {
                let _ = handle.join();
                Err(AudioError::Thread(
                    "Playback-Thread ohne Rueckmeldung beendet".into(),
                ))
            }
        }
    }

    pub fn laeuft(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Stoppt den Stream und wartet auf den Thread
    pub fn stoppen(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Playback-Thread ist abgestuerzt");
            }
            info!("Playback gestoppt");
        }
    }
}

impl Drop for PlaybackThread {
    fn drop(&mut self) {
        self.stoppen();
    }
}

// ---------------------------------------------------------------------------
// Stream oeffnen
// ---------------------------------------------------------------------------

/// Oeffnet einen Ausgabestream, dessen Callback den Renderer treibt.
///
/// Der Renderer liefert mono; bei mehreren Ausgabekanaelen wird jedes
/// Sample auf alle Kanaele kopiert.
fn open_output_stream(
    device: &Device,
    config: &PlaybackConfig,
    mut renderer: PcmRenderer,
) -> AudioResult<Stream> {
    let stream_config = StreamConfig {
        channels: config.channels,
        sample_rate: config.sample_rate,
        buffer_size: cpal::BufferSize::Default,
    };
    let kanaele = config.channels.max(1) as usize;

    let sample_format = device
        .default_output_config()
        .map(|c| c.sample_format())
        .unwrap_or(SampleFormat::F32);

    let err_fn = |err| error!("Playback-Fehler: {}", err);

    // Mono-Quantum, waechst nur beim ersten Callback einer neuen Groesse
    let mut mono: Vec<f32> = Vec::new();

    let stream = match sample_format {
        SampleFormat::F32 => device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _| {
                    mono.resize(data.len() / kanaele, 0.0);
                    renderer.render(&mut mono);
                    for (frame, s) in data.chunks_mut(kanaele).zip(mono.iter()) {
                        frame.fill(*s);
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?,
        SampleFormat::I16 => device
            .build_output_stream(
                &stream_config,
                move |data: &mut [i16], _| {
                    mono.resize(data.len() / kanaele, 0.0);
                    renderer.render(&mut mono);
                    for (frame, s) in data.chunks_mut(kanaele).zip(mono.iter()) {
                        let wert = (*s * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32);
                        frame.fill(wert as i16);
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?,
        _ => {
            return Err(AudioError::StreamFehler(format!(
                "Nicht unterstuetztes Sample-Format: {:?}",
                sample_format
            )))
        }
    };

    stream
        .play()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?;

    debug!(
        "Playback-Stream geoeffnet: {}Hz {}ch",
        config.sample_rate, config.channels
    );

    Ok(stream)
}
