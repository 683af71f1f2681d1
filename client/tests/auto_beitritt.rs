//! Automatischer Kanalbeitritt gegen den In-Memory-Transport

use std::time::Duration;

use talky_client::{auto_beitritt, config::ClientConfig, token_quelle};
use talky_core::event::EventBus;
use talky_core::types::{ChannelId, ConnectionState, NicheId};
use talky_presence::memory::MemoryConnector;
use talky_presence::{PeerSignal, PresenceClient, PresenceConfig, TokenSource};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

async fn warten(mut bedingung: impl FnMut() -> bool) {
    for _ in 0..200 {
        if bedingung() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("Bedingung nicht erfuellt");
}

fn joins(server: &MemoryConnector) -> usize {
    server
        .sockets()
        .into_iter()
        .flat_map(|id| server.gesendet(id))
        .filter(|f| f.contains(r#""type":"join""#))
        .count()
}

#[tokio::test(start_paused = true)]
async fn einmaliger_beitritt_ueberdauert_neuverbindung() {
    let server = MemoryConnector::neu();
    let (_token_tx, token_rx) = watch::channel(Some("tok".to_string()));
    let (peer_tx, mut peer_rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    let (handle, task) = PresenceClient::starten(
        PresenceConfig::default(),
        server.clone(),
        EventBus::neu(),
        token_rx,
        peer_tx,
        cancel.clone(),
    );
    let auto = tokio::spawn(auto_beitritt(
        handle.clone(),
        ChannelId::neu("c1"),
        NicheId::neu("n1"),
        cancel.clone(),
    ));

    warten(|| server.letzter().is_some()).await;
    let socket = server.letzter().unwrap();
    server.oeffnen(socket);

    warten(|| joins(&server) == 1).await;
    assert_eq!(
        peer_rx.recv().await.unwrap(),
        PeerSignal::KanalBeigetreten {
            channel_id: ChannelId::neu("c1"),
            niche_id: NicheId::neu("n1"),
        }
    );

    // Solange ein Kanal gemerkt ist, wird nach einer Neuverbindung nicht erneut beigetreten
    server.schliessen(socket, 1006, "");
    warten(|| handle.state() == ConnectionState::Reconnecting).await;
    tokio::time::sleep(Duration::from_secs(4)).await;
    let zweiter = server.letzter().unwrap();
    assert_ne!(zweiter, socket);
    server.oeffnen(zweiter);
    warten(|| handle.state() == ConnectionState::Connected).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(joins(&server), 1);

    cancel.cancel();
    task.await.unwrap();
    auto.await.unwrap();
}

#[test]
fn token_quelle_folgt_der_konfiguration() {
    let config = ClientConfig::aus_toml("[auth]\ntoken = \"abc\"\n").unwrap();
    let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
    let token = rt.block_on(token_quelle(&config).token_holen()).unwrap();
    assert_eq!(token, "abc");
}
