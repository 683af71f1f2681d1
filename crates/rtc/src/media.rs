//! Eingehende Medien: RTP -> Opus -> Playback

use std::sync::Arc;

use talky_audio::{OpusDecoder, PlaybackSink};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_remote::TrackRemote;

/// Dekodiert ein Opus-Paket und uebergibt es dem Playback.
///
/// Gibt `false` zurueck wenn das Paket nicht dekodiert werden konnte oder
/// der Block verworfen wurde.
pub fn paket_abspielen(decoder: &mut OpusDecoder, payload: &[u8], sink: &PlaybackSink) -> bool {
    if payload.is_empty() {
        return false;
    }
    match decoder.decode(payload) {
        Ok(samples) => sink.push(samples),
        Err(e) => {
            warn!(fehler = %e, bytes = payload.len(), "Opus-Paket nicht dekodierbar");
            false
        }
    }
}

/// Laengste Luecke, die noch per PLC verdeckt wird (5 x 20 ms)
const MAX_VERDECKTE_PAKETE: u16 = 5;

/// Zahl der verlorenen Pakete zwischen zwei RTP-Sequenznummern.
///
/// `None` fuer doppelte oder verspaetete Pakete; das erste Paket einer
/// Spur hat keine Luecke.
pub fn sequenz_luecke(vorher: Option<u16>, aktuell: u16) -> Option<u16> {
    let Some(vorher) = vorher else {
        return Some(0);
    };
    match aktuell.wrapping_sub(vorher) {
        0 => None,
        abstand if abstand >= 0x8000 => None,
        abstand => Some(abstand - 1),
    }
}

/// Verdeckt verlorene Pakete per PLC, gibt die Zahl der erzeugten Frames zurueck.
///
/// Laengere Luecken bleiben Stille; der Decoder synchronisiert sich am
/// naechsten echten Paket neu.
pub fn verlust_verbergen(decoder: &mut OpusDecoder, verloren: u16, sink: &PlaybackSink) -> u16 {
    if verloren == 0 || verloren > MAX_VERDECKTE_PAKETE {
        return 0;
    }
    let mut erzeugt = 0;
    for _ in 0..verloren {
        match decoder.decode_plc() {
            Ok(samples) => {
                sink.push(samples);
                erzeugt += 1;
            }
            Err(e) => {
                warn!(fehler = %e, "PLC fehlgeschlagen");
                break;
            }
        }
    }
    erzeugt
}

/// Liest eine eingehende Spur bis zu ihrem Ende oder bis zum Abbruch.
///
/// Dekodierfehler beenden die Schleife nicht.
pub async fn spur_abspielen(
    track: Arc<TrackRemote>,
    sample_rate: u32,
    sink: PlaybackSink,
    cancel: CancellationToken,
) {
    let ssrc = track.ssrc();
    if track.kind() != RTPCodecType::Audio {
        debug!(ssrc, "Keine Audio-Spur, ignoriert");
        return;
    }

    let mut decoder = match OpusDecoder::neu(sample_rate, 1) {
        Ok(d) => d,
        Err(e) => {
            warn!(ssrc, fehler = %e, "Opus-Decoder konnte nicht erstellt werden");
            return;
        }
    };

    info!(ssrc, "Eingehende Audio-Spur");
    let mut pakete: u64 = 0;
    let mut verloren: u64 = 0;
    let mut letzte_sequenz: Option<u16> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            gelesen = track.read_rtp() => match gelesen {
                Ok((paket, _)) => {
                    pakete += 1;
                    let sequenz = paket.header.sequence_number;
                    let Some(luecke) = sequenz_luecke(letzte_sequenz, sequenz) else {
                        trace!(ssrc, sequenz, "Verspaetetes Paket verworfen");
                        continue;
                    };
                    letzte_sequenz = Some(sequenz);
                    if luecke > 0 {
                        verloren += u64::from(luecke);
                        let verdeckt = verlust_verbergen(&mut decoder, luecke, &sink);
                        debug!(ssrc, luecke, verdeckt, "Paketverlust");
                    }
                    if !paket_abspielen(&mut decoder, &paket.payload, &sink) {
                        trace!(ssrc, "Paket nicht abgespielt");
                    }
                }
                Err(e) => {
                    debug!(ssrc, fehler = %e, "Spur beendet");
                    break;
                }
            },
        }
    }

    info!(ssrc, pakete, verloren, "Audio-Spur geschlossen");
}
