//! Gemeinsame Test-Infrastruktur der Integrationstests
//!
//! Ein skriptbares Gegenueber auf einem echten TCP-Socket (spricht das
//! Frame-Protokoll) plus Fakes fuer die externen Faehigkeiten
//! (Token, REST, Medien, Peer-Verbindung, Klingel).

#![allow(dead_code)]

use async_trait::async_trait;
use funke_core::types::UserId;
use funke_core::Result;
use funke_protocol::envelope::zeitstempel_jetzt;
use funke_protocol::{
    AnrufArt, Envelope, FrameCodec, IceKandidat, InboundFrame, SdpBeschreibung,
};
use funke_realtime::config::RealtimeConfig;
use funke_realtime::extern_api::{ChatRestApi, RestNachricht, TokenQuelle};
use funke_realtime::media::{
    FernStream, KlingelSignal, LokalerStream, MedienGeraete, PeerEreignis, PeerFabrik,
    PeerVerbindung, VerbindungsStatistik,
};
use funke_realtime::transport::Transport;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

pub const TEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Initialisiert das Test-Logging (RUST_LOG steuert den Filter)
pub fn protokollierung_initialisieren() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "funke_realtime=debug,warn".into()),
        )
        .try_init();
}

// ---------------------------------------------------------------------------
// Test-Server
// ---------------------------------------------------------------------------

/// Oeffnet einen Listener auf einem freien Port
pub async fn test_listener() -> (TcpListener, u16) {
    protokollierung_initialisieren();
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Listener muss sich binden lassen");
    let port = listener.local_addr().expect("Adresse vorhanden").port();
    (listener, port)
}

/// Konfiguration mit kurzen Timeouts fuer Tests
pub fn test_config(port: u16) -> RealtimeConfig {
    let mut config = RealtimeConfig::default();
    config.verbindung.adresse = "127.0.0.1".into();
    config.verbindung.port = port;
    config.verbindung.auth_timeout_ms = 2_000;
    config.backoff.basis_ms = 50;
    config.backoff.jitter_ms = 0;
    config
}

/// Akzeptiert eine Verbindung und fuehrt den Auth-Handshake serverseitig
pub async fn akzeptieren(listener: &TcpListener, user_id: UserId) -> Framed<TcpStream, FrameCodec> {
    let (stream, _) = tokio::time::timeout(TEST_TIMEOUT, listener.accept())
        .await
        .expect("Zeitlimit beim Accept")
        .expect("Accept fehlgeschlagen");
    let mut framed = Framed::new(stream, FrameCodec::new());

    match naechste_nachricht(&mut framed).await {
        Envelope::Auth { token } => assert_eq!(token, "test-token"),
        andere => panic!("Erwartet Auth, erhalten: {:?}", andere),
    }
    framed
        .send(Envelope::AuthOk {
            user_id,
            server_time: zeitstempel_jetzt(),
        })
        .await
        .expect("AuthOk muss gesendet werden");
    framed
}

/// Liest die naechste zuordenbare Nachricht vom Client
pub async fn naechste_nachricht(framed: &mut Framed<TcpStream, FrameCodec>) -> Envelope {
    loop {
        let frame = tokio::time::timeout(TEST_TIMEOUT, framed.next())
            .await
            .expect("Zeitlimit beim Lesen")
            .expect("Verbindung beendet")
            .expect("Frame-Fehler");
        match frame {
            InboundFrame::Nachricht(envelope) => return envelope,
            InboundFrame::Unbekannt { .. } => continue,
        }
    }
}

/// Baut einen Transport, verbindet ihn und gibt die Serverseite zurueck
pub async fn verbundener_transport(
    listener: &TcpListener,
    user_id: UserId,
) -> (Transport, Framed<TcpStream, FrameCodec>) {
    let port = listener.local_addr().expect("Adresse vorhanden").port();
    let transport = Transport::neu(test_config(port), Arc::new(FesterToken));
    let (verbunden, server) =
        tokio::join!(transport.verbinden(), akzeptieren(listener, user_id));
    assert!(verbunden, "Verbindungsaufbau muss gelingen");
    (transport, server)
}

/// Wartet bis die Bedingung erfuellt ist (Polling mit Zeitlimit)
pub async fn warte_bis(mut bedingung: impl FnMut() -> bool) {
    let frist = tokio::time::Instant::now() + TEST_TIMEOUT;
    while !bedingung() {
        if tokio::time::Instant::now() > frist {
            panic!("Bedingung nicht innerhalb des Zeitlimits erfuellt");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ---------------------------------------------------------------------------
// Token und REST
// ---------------------------------------------------------------------------

/// TokenQuelle mit festem Token
pub struct FesterToken;

#[async_trait]
impl TokenQuelle for FesterToken {
    async fn bearer_token(&self) -> Result<String> {
        Ok("test-token".into())
    }
}

/// REST-Fallback der alle Nachrichten aufzeichnet
#[derive(Default)]
pub struct FakeRest {
    pub nachrichten: parking_lot::Mutex<Vec<RestNachricht>>,
}

#[async_trait]
impl ChatRestApi for FakeRest {
    async fn nachricht_senden(&self, nachricht: &RestNachricht) -> Result<()> {
        self.nachrichten.lock().push(nachricht.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Medien-Fakes
// ---------------------------------------------------------------------------

/// Lokaler Stream der Freigaben und Toggles aufzeichnet
pub struct FakeStream {
    pub video: bool,
    pub stopps: AtomicU32,
    pub audio_an: AtomicBool,
    pub video_an: AtomicBool,
}

impl FakeStream {
    pub fn neu(video: bool) -> Self {
        Self {
            video,
            stopps: AtomicU32::new(0),
            audio_an: AtomicBool::new(true),
            video_an: AtomicBool::new(video),
        }
    }

    pub fn gestoppt(&self) -> bool {
        self.stopps.load(Ordering::Relaxed) > 0
    }
}

impl LokalerStream for FakeStream {
    fn stoppen(&self) {
        self.stopps.fetch_add(1, Ordering::Relaxed);
    }
    fn audio_setzen(&self, aktiv: bool) {
        self.audio_an.store(aktiv, Ordering::Relaxed);
    }
    fn video_setzen(&self, aktiv: bool) {
        self.video_an.store(aktiv, Ordering::Relaxed);
    }
    fn hat_video(&self) -> bool {
        self.video
    }
}

/// Medienerfassung die Streams aufzeichnet und auf Wunsch fehlschlaegt
#[derive(Default)]
pub struct FakeMedien {
    pub streams: parking_lot::Mutex<Vec<Arc<FakeStream>>>,
    pub fehlschlagen: AtomicBool,
}

impl FakeMedien {
    pub fn erfasst(&self) -> usize {
        self.streams.lock().len()
    }

    pub fn letzter_stream(&self) -> Arc<FakeStream> {
        self.streams
            .lock()
            .last()
            .cloned()
            .expect("Es wurde noch kein Stream erfasst")
    }
}

#[async_trait]
impl MedienGeraete for FakeMedien {
    async fn erfassen(&self, art: AnrufArt) -> Result<Arc<dyn LokalerStream>> {
        if self.fehlschlagen.load(Ordering::Relaxed) {
            return Err(funke_core::FunkeError::Medien(
                "Zugriff verweigert".into(),
            ));
        }
        let stream = Arc::new(FakeStream::neu(art == AnrufArt::Video));
        self.streams.lock().push(Arc::clone(&stream));
        Ok(stream)
    }
}

/// Ferner Stream mit fester Kennung
pub struct FakeFernStream(pub String);

impl FernStream for FakeFernStream {
    fn kennung(&self) -> String {
        self.0.clone()
    }
}

// ---------------------------------------------------------------------------
// Peer-Fakes
// ---------------------------------------------------------------------------

/// Peer-Verbindung die alle Aufrufe aufzeichnet
pub struct FakePeer {
    pub angehaengt: parking_lot::Mutex<Vec<Arc<dyn LokalerStream>>>,
    pub remote: parking_lot::Mutex<Vec<SdpBeschreibung>>,
    pub kandidaten: parking_lot::Mutex<Vec<IceKandidat>>,
    pub offers: AtomicU32,
    pub answers: AtomicU32,
    pub ice_neustarts: AtomicU32,
    pub geschlossen: AtomicU32,
}

impl FakePeer {
    fn neu() -> Self {
        Self {
            angehaengt: parking_lot::Mutex::new(Vec::new()),
            remote: parking_lot::Mutex::new(Vec::new()),
            kandidaten: parking_lot::Mutex::new(Vec::new()),
            offers: AtomicU32::new(0),
            answers: AtomicU32::new(0),
            ice_neustarts: AtomicU32::new(0),
            geschlossen: AtomicU32::new(0),
        }
    }

    pub fn ist_geschlossen(&self) -> bool {
        self.geschlossen.load(Ordering::Relaxed) > 0
    }
}

#[async_trait]
impl PeerVerbindung for FakePeer {
    async fn lokalen_stream_anhaengen(&self, stream: Arc<dyn LokalerStream>) -> Result<()> {
        self.angehaengt.lock().push(stream);
        Ok(())
    }
    async fn offer_erstellen(&self) -> Result<SdpBeschreibung> {
        self.offers.fetch_add(1, Ordering::Relaxed);
        Ok(SdpBeschreibung::offer("v=0 test-offer"))
    }
    async fn answer_erstellen(&self) -> Result<SdpBeschreibung> {
        self.answers.fetch_add(1, Ordering::Relaxed);
        Ok(SdpBeschreibung::answer("v=0 test-answer"))
    }
    async fn remote_beschreibung_setzen(&self, beschreibung: SdpBeschreibung) -> Result<()> {
        self.remote.lock().push(beschreibung);
        Ok(())
    }
    async fn ice_kandidat_hinzufuegen(&self, kandidat: IceKandidat) -> Result<()> {
        self.kandidaten.lock().push(kandidat);
        Ok(())
    }
    async fn ice_neustart(&self) -> Result<()> {
        self.ice_neustarts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
    async fn statistik(&self) -> Option<VerbindungsStatistik> {
        Some(VerbindungsStatistik {
            rtt_ms: Some(40),
            verlust_rate: Some(0.0),
        })
    }
    async fn schliessen(&self) {
        self.geschlossen.fetch_add(1, Ordering::Relaxed);
    }
}

/// Fabrik die erstellte Peers samt Ereignis-Sender aufbewahrt
#[derive(Default)]
pub struct FakePeerFabrik {
    pub erstellt: parking_lot::Mutex<Vec<(Arc<FakePeer>, mpsc::Sender<PeerEreignis>)>>,
}

impl FakePeerFabrik {
    pub fn anzahl(&self) -> usize {
        self.erstellt.lock().len()
    }

    pub fn letzter(&self) -> (Arc<FakePeer>, mpsc::Sender<PeerEreignis>) {
        self.erstellt
            .lock()
            .last()
            .cloned()
            .expect("Es wurde noch kein Peer erstellt")
    }
}

#[async_trait]
impl PeerFabrik for FakePeerFabrik {
    async fn erstellen(
        &self,
    ) -> Result<(Arc<dyn PeerVerbindung>, mpsc::Receiver<PeerEreignis>)> {
        let (tx, rx) = mpsc::channel(16);
        let peer = Arc::new(FakePeer::neu());
        self.erstellt.lock().push((Arc::clone(&peer), tx));
        Ok((peer, rx))
    }
}

// ---------------------------------------------------------------------------
// Klingel-Fake
// ---------------------------------------------------------------------------

/// Klingel die Starts und Stopps zaehlt
#[derive(Default)]
pub struct FakeKlingel {
    pub starts: AtomicU32,
    pub stopps: AtomicU32,
}

impl FakeKlingel {
    pub fn laeutet(&self) -> bool {
        self.starts.load(Ordering::Relaxed) > self.stopps.load(Ordering::Relaxed)
    }
}

impl KlingelSignal for FakeKlingel {
    fn starten(&self) {
        self.starts.fetch_add(1, Ordering::Relaxed);
    }
    fn stoppen(&self) {
        self.stopps.fetch_add(1, Ordering::Relaxed);
    }
}
