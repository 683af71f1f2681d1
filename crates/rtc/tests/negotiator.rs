//! Negotiator gegen ein aufzeichnendes Peer-Backend

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use talky_core::event::{ClientEvent, EventBus, EventKind};
use talky_core::types::{ChannelId, NicheId};
use talky_presence::PeerSignal;
use talky_protocol::{IceCandidate, OutgoingMessage};
use talky_rtc::negotiator::schritt;
use talky_rtc::{
    PeerConnection, PeerFactory, PeerHooks, PeerSessionNegotiator, RtcError, RtcResult,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Protokoll {
    aufrufe: Vec<String>,
    erstellt: usize,
    geschlossen: usize,
    fehler_bei: Option<&'static str>,
    hooks: Vec<PeerHooks>,
}

#[derive(Clone, Default)]
struct AttrappenFactory {
    protokoll: Arc<Mutex<Protokoll>>,
}

impl AttrappenFactory {
    fn aufrufe(&self) -> Vec<String> {
        self.protokoll.lock().aufrufe.clone()
    }

    fn fehler_bei(&self, schritt: &'static str) {
        self.protokoll.lock().fehler_bei = Some(schritt);
    }

    /// Simuliert einen lokal gefundenen Kandidaten der letzten Session
    fn lokaler_kandidat(&self, kandidat: IceCandidate) {
        let hooks = self.protokoll.lock().hooks.last().cloned().unwrap();
        (hooks.lokaler_kandidat)(kandidat);
    }
}

struct AttrappenPeer {
    nummer: usize,
    protokoll: Arc<Mutex<Protokoll>>,
}

impl AttrappenPeer {
    fn schritt(&self, name: &'static str, detail: &str) -> RtcResult<()> {
        let mut p = self.protokoll.lock();
        p.aufrufe.push(format!("{}#{}:{}", name, self.nummer, detail));
        if p.fehler_bei == Some(name) {
            return Err(RtcError::Sdp(format!("{} abgelehnt", name)));
        }
        Ok(())
    }
}

#[async_trait]
impl PeerConnection for AttrappenPeer {
    async fn set_remote_offer(&self, sdp: String) -> RtcResult<()> {
        self.schritt("remote", &sdp)
    }

    async fn create_answer(&self) -> RtcResult<String> {
        self.schritt("answer", "")?;
        Ok(format!("antwort-{}", self.nummer))
    }

    async fn set_local_answer(&self, sdp: String) -> RtcResult<()> {
        self.schritt("local", &sdp)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> RtcResult<()> {
        self.schritt("ice", &candidate.candidate)
    }

    async fn close(&self) -> RtcResult<()> {
        self.protokoll.lock().geschlossen += 1;
        self.schritt("close", "")
    }
}

#[async_trait]
impl PeerFactory for AttrappenFactory {
    async fn erstellen(&self, hooks: PeerHooks) -> RtcResult<Box<dyn PeerConnection>> {
        let mut p = self.protokoll.lock();
        if p.fehler_bei == Some("erstellen") {
            return Err(RtcError::Geschlossen);
        }
        p.erstellt += 1;
        p.hooks.push(hooks);
        Ok(Box::new(AttrappenPeer {
            nummer: p.erstellt,
            protokoll: Arc::clone(&self.protokoll),
        }))
    }
}

struct Aufbau {
    negotiator: PeerSessionNegotiator<AttrappenFactory>,
    factory: AttrappenFactory,
    signale: mpsc::UnboundedReceiver<OutgoingMessage>,
    bus: EventBus,
}

fn aufbau() -> Aufbau {
    let factory = AttrappenFactory::default();
    let bus = EventBus::neu();
    let (signal_tx, signale) = mpsc::unbounded_channel();
    Aufbau {
        negotiator: PeerSessionNegotiator::neu(factory.clone(), bus.clone(), signal_tx, None),
        factory,
        signale,
        bus,
    }
}

fn kandidat(sdp_mid: Option<&str>) -> IceCandidate {
    IceCandidate {
        candidate: "candidate:1 1 udp 2122260223 10.0.0.2 50000 typ host".into(),
        sdp_mid: sdp_mid.map(String::from),
        sdp_mline_index: Some(0),
        username_fragment: None,
    }
}

#[tokio::test]
async fn angebot_wird_genau_einmal_beantwortet() {
    let mut a = aufbau();
    a.negotiator
        .kanal_beigetreten(ChannelId::neu("c1"), NicheId::neu("n1"))
        .await;
    a.negotiator.handle_offer("v=0 angebot".into()).await;

    assert_eq!(
        a.factory.aufrufe(),
        vec![
            "remote#1:v=0 angebot".to_string(),
            "answer#1:".to_string(),
            "local#1:antwort-1".to_string(),
        ]
    );

    assert_eq!(
        a.signale.try_recv().unwrap(),
        OutgoingMessage::Answer {
            answer: "antwort-1".into(),
            channel_id: ChannelId::neu("c1"),
            niche_id: NicheId::neu("n1"),
        }
    );
    assert!(a.signale.try_recv().is_err());
}

#[tokio::test]
async fn angebot_ohne_session_meldet_fehler() {
    let mut a = aufbau();
    let mut events = a.bus.subscribe();

    a.negotiator.handle_offer("v=0".into()).await;

    assert!(a.factory.aufrufe().is_empty());
    assert!(a.signale.try_recv().is_err());
    assert_eq!(
        events.drain(),
        vec![ClientEvent::NegotiationFailed {
            step: schritt::OFFER.to_string(),
            message: "keine aktive Peer-Session".to_string(),
        }]
    );
}

#[tokio::test]
async fn kandidat_ohne_sdp_mid_wird_verworfen() {
    let mut a = aufbau();
    let mut events = a.bus.subscribe();
    a.negotiator
        .kanal_beigetreten(ChannelId::neu("c1"), NicheId::neu("n1"))
        .await;

    a.negotiator.handle_candidate(kandidat(None)).await;
    a.negotiator
        .handle_candidate(IceCandidate {
            candidate: String::new(),
            ..kandidat(Some("0"))
        })
        .await;

    assert!(a.factory.aufrufe().is_empty());
    assert!(events.drain().is_empty());
    assert!(a.negotiator.session_aktiv());

    a.negotiator.handle_candidate(kandidat(Some("0"))).await;
    assert_eq!(a.factory.aufrufe().len(), 1);
    assert!(a.factory.aufrufe()[0].starts_with("ice#1:candidate:1"));
}

#[tokio::test]
async fn kandidat_ohne_session_wird_verworfen() {
    let mut a = aufbau();
    let mut events = a.bus.subscribe();
    a.negotiator.handle_candidate(kandidat(Some("0"))).await;
    assert!(a.factory.aufrufe().is_empty());
    assert!(events.drain().is_empty());
}

#[tokio::test]
async fn lokale_kandidaten_tragen_den_kanal() {
    let mut a = aufbau();
    a.negotiator
        .kanal_beigetreten(ChannelId::neu("c7"), NicheId::neu("n7"))
        .await;

    a.factory.lokaler_kandidat(kandidat(Some("0")));

    match a.signale.try_recv().unwrap() {
        OutgoingMessage::Candidate {
            candidate,
            channel_id,
            niche_id,
        } => {
            assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
            assert_eq!(channel_id, ChannelId::neu("c7"));
            assert_eq!(niche_id, NicheId::neu("n7"));
        }
        andere => panic!("unerwartete Nachricht: {:?}", andere),
    }
}

#[tokio::test]
async fn neuer_kanal_ersetzt_die_session() {
    let mut a = aufbau();
    a.negotiator
        .kanal_beigetreten(ChannelId::neu("c1"), NicheId::neu("n1"))
        .await;
    a.negotiator
        .kanal_beigetreten(ChannelId::neu("c2"), NicheId::neu("n1"))
        .await;

    {
        let p = a.factory.protokoll.lock();
        assert_eq!(p.erstellt, 2);
        assert_eq!(p.geschlossen, 1);
    }
    assert_eq!(a.negotiator.kanal().unwrap().0, &ChannelId::neu("c2"));

    a.negotiator.handle_offer("v=0".into()).await;
    match a.signale.try_recv().unwrap() {
        OutgoingMessage::Answer {
            answer, channel_id, ..
        } => {
            assert_eq!(answer, "antwort-2");
            assert_eq!(channel_id, ChannelId::neu("c2"));
        }
        andere => panic!("unerwartete Nachricht: {:?}", andere),
    }
}

#[tokio::test]
async fn fehlerhafter_schritt_sendet_keine_antwort() {
    let mut a = aufbau();
    let mut events = a.bus.subscribe();
    a.negotiator
        .kanal_beigetreten(ChannelId::neu("c1"), NicheId::neu("n1"))
        .await;
    a.factory.fehler_bei("remote");

    a.negotiator.handle_offer("kaputt".into()).await;

    assert!(a.signale.try_recv().is_err());
    let fehler: Vec<_> = events
        .drain()
        .into_iter()
        .filter(|e| e.kind() == EventKind::NegotiationFailed)
        .collect();
    assert_eq!(fehler.len(), 1);
    match &fehler[0] {
        ClientEvent::NegotiationFailed { step, .. } => {
            assert_eq!(step, schritt::REMOTE_DESCRIPTION)
        }
        _ => unreachable!(),
    }
    // Session bleibt bestehen
    assert!(a.negotiator.session_aktiv());
}

#[tokio::test]
async fn erstellen_scheitert() {
    let mut a = aufbau();
    let mut events = a.bus.subscribe();
    a.factory.fehler_bei("erstellen");

    a.negotiator
        .kanal_beigetreten(ChannelId::neu("c1"), NicheId::neu("n1"))
        .await;

    assert!(!a.negotiator.session_aktiv());
    assert!(events
        .drain()
        .iter()
        .any(|e| e.kind() == EventKind::NegotiationFailed));
}

#[tokio::test]
async fn signal_schleife_und_abbruch() {
    let a = aufbau();
    let factory = a.factory.clone();
    let mut ausgang = a.signale;
    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(a.negotiator.ausfuehren(rx, cancel.clone()));

    tx.send(PeerSignal::KanalBeigetreten {
        channel_id: ChannelId::neu("c1"),
        niche_id: NicheId::neu("n1"),
    })
    .unwrap();
    tx.send(PeerSignal::Offer { sdp: "v=0".into() }).unwrap();

    let antwort = ausgang.recv().await.unwrap();
    assert_eq!(antwort.tag(), "answer");

    cancel.cancel();
    task.await.unwrap();
    assert_eq!(factory.protokoll.lock().geschlossen, 1);
}
