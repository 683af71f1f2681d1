//! talky-client – Bibliotheks-Root
//!
//! Setzt Presence-Steuerkanal, Peer-Session und Audio-Wiedergabe zusammen.

pub mod config;

use std::time::Duration;

use anyhow::Result;
use config::ClientConfig;
use talky_audio::{playback_pipeline, PlaybackSink, PlaybackThread};
use talky_core::event::{ClientEvent, EventBus, EventSubscription};
use talky_core::types::{ChannelId, ConnectionState, NicheId};
use talky_presence::{
    EnvTokenSource, FileTokenSource, PresenceClient, PresenceHandle, StaticTokenSource,
    TokenRefresher, TokenSource, WsConnector,
};
use talky_rtc::{PeerSessionNegotiator, WebRtcPeerFactory};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Umgebungsvariable fuer das Token, wenn die Konfiguration keines nennt
pub const ENV_TOKEN: &str = "TALKY_TOKEN";

/// Haelt den laufenden Client zusammen
pub struct Client {
    pub config: ClientConfig,
}

impl Client {
    pub fn neu(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Startet alle Teilsysteme und laeuft bis zum Shutdown-Signal
    ///
    /// Reihenfolge:
    /// 1. Audio-Wiedergabe (optional)
    /// 2. Token-Refresh
    /// 3. Presence-Client (WebSocket)
    /// 4. Peer-Session-Negotiator (WebRTC)
    /// 5. Auf Ctrl-C warten, dann geordnet herunterfahren
    pub async fn starten(self) -> Result<()> {
        let cancel = CancellationToken::new();
        let bus = EventBus::neu();

        let (sink, mut playback) = self.playback_starten();

        let (token_tx, token_rx) = watch::channel(None);
        let refresher = TokenRefresher::neu(
            token_quelle(&self.config),
            Duration::from_secs(self.config.auth.refresh_vorlauf_sek),
        )
        .starten(token_tx, cancel.child_token());

        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let connector = WsConnector::neu(self.config.presence_config().connect_timeout);
        let (handle, presence_task) = PresenceClient::starten(
            self.config.presence_config(),
            connector,
            bus.clone(),
            token_rx,
            peer_tx,
            cancel.child_token(),
        );

        let factory = WebRtcPeerFactory::neu(self.config.peer_config())?;
        let negotiator =
            PeerSessionNegotiator::neu(factory, bus.clone(), handle.signal_sender(), sink);
        let negotiator_task = tokio::spawn(negotiator.ausfuehren(peer_rx, cancel.child_token()));

        let protokoll_task = tokio::spawn(ereignisse_protokollieren(
            bus.subscribe(),
            cancel.child_token(),
        ));

        let auto_task = self.config.auto_kanal().map(|(id, niche)| {
            tokio::spawn(auto_beitritt(
                handle.clone(),
                ChannelId::neu(id),
                NicheId::neu(niche),
                cancel.child_token(),
            ))
        });

        info!(url = %self.config.verbindung.url, "Client laeuft. Warte auf Shutdown-Signal (Ctrl-C)...");
        tokio::signal::ctrl_c().await?;
        info!("Shutdown-Signal empfangen, Client wird beendet");

        if let Err(e) = handle.shutdown().await {
            debug!(fehler = %e, "Presence-Client bereits beendet");
        }
        cancel.cancel();

        let _ = presence_task.await;
        let _ = negotiator_task.await;
        let _ = refresher.await;
        let _ = protokoll_task.await;
        if let Some(task) = auto_task {
            let _ = task.await;
        }
        if let Some(thread) = playback.as_mut() {
            thread.stoppen();
        }

        info!("Client beendet");
        Ok(())
    }

    /// Oeffnet den Ausgabestream; ohne Geraet laeuft der Client ohne Wiedergabe weiter
    fn playback_starten(&self) -> (Option<PlaybackSink>, Option<PlaybackThread>) {
        if !self.config.audio.aktiviert {
            info!("Audio-Wiedergabe deaktiviert");
            return (None, None);
        }

        let playback_config = self.config.playback_config();
        let (sink, renderer) = playback_pipeline(playback_config.buffer_size);
        match PlaybackThread::starten(playback_config, renderer) {
            Ok(thread) => (Some(sink), Some(thread)),
            Err(e) => {
                warn!(fehler = %e, "Audio-Wiedergabe nicht verfuegbar");
                (None, None)
            }
        }
    }
}

/// Waehlt die Token-Quelle aus der Konfiguration
pub fn token_quelle(config: &ClientConfig) -> Box<dyn TokenSource> {
    if let Some(token) = config.auth.token.as_ref().filter(|t| !t.is_empty()) {
        return Box::new(StaticTokenSource::neu(token.clone()));
    }
    if let Some(pfad) = &config.auth.token_datei {
        return Box::new(FileTokenSource::neu(pfad.clone()));
    }
    Box::new(EnvTokenSource::neu(ENV_TOKEN))
}

/// Tritt dem konfigurierten Kanal bei, sobald der Steuerkanal verbunden ist
///
/// Beigetreten wird nur, solange noch kein Kanal gemerkt ist. Der gemerkte
/// Kanal ueberdauert Neuverbindungen, danach folgt also kein zweiter Join.
pub async fn auto_beitritt(
    handle: PresenceHandle,
    channel_id: ChannelId,
    niche_id: NicheId,
    cancel: CancellationToken,
) {
    let mut zustand = handle.watch_state();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            ok = zustand_abwarten(&mut zustand, true) => {
                if !ok {
                    return;
                }
            }
        }

        if handle.channel().is_none() {
            match handle
                .join_channel(channel_id.clone(), niche_id.clone())
                .await
            {
                Ok(true) => info!(channel_id = %channel_id, "Automatischer Kanalbeitritt"),
                Ok(false) => warn!(channel_id = %channel_id, "Automatischer Kanalbeitritt fehlgeschlagen"),
                Err(_) => return,
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            ok = zustand_abwarten(&mut zustand, false) => {
                if !ok {
                    return;
                }
            }
        }
    }
}

/// `false` wenn der Presence-Client beendet wurde
async fn zustand_abwarten(zustand: &mut watch::Receiver<ConnectionState>, verbunden: bool) -> bool {
    zustand
        .wait_for(|s| (*s == ConnectionState::Connected) == verbunden)
        .await
        .is_ok()
}

/// Gibt die Ereignisse des Busses im Log aus
async fn ereignisse_protokollieren(mut events: EventSubscription, cancel: CancellationToken) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return,
            event = events.recv() => match event {
                Some(e) => e,
                None => return,
            },
        };

        match event {
            ClientEvent::StateChanged(state) => info!(state = %state, "Verbindungszustand"),
            ClientEvent::ActiveClientsUpdated { clients, .. } => {
                info!(anzahl = clients.len(), "Aktive Clients")
            }
            ClientEvent::ChatMessageReceived(chat) => {
                info!(von = ?chat.user_id, inhalt = %chat.content, "Chat")
            }
            ClientEvent::ServerError { message } => error!(fehler = %message, "Server meldet Fehler"),
            ClientEvent::MaxRetriesExceeded { retries } => {
                error!(retries, "Verbindung aufgegeben")
            }
            ClientEvent::NegotiationFailed { step, message } => {
                warn!(step = %step, fehler = %message, "Peer-Verhandlung fehlgeschlagen")
            }
            andere => debug!(event = andere.kind().name(), "Ereignis"),
        }
    }
}
