//! Integrationstests fuer die Anruf-Zustandsmaschine
//!
//! Der Signalisierungs-Gegenpart ist der skriptbare TCP-Server aus
//! util/mod.rs, Medien und Peer-Verbindung sind aufzeichnende Fakes.
//! Getestet werden die kompletten Ablaeufe inklusive der
//! Ordnungs-Gefahren (fruehe Offers/Kandidaten) und der Terminalpfade.

mod util;

use funke_core::types::UserId;
use funke_protocol::{AnrufArt, Envelope, IceKandidat, RaumId};
use funke_realtime::call::{AnrufStatus, AnrufZustand, CallManager};
use funke_realtime::config::RealtimeConfig;
use funke_realtime::media::PeerEreignis;
use funke_realtime::signaling::CallSignaling;
use funke_realtime::transport::Transport;
use futures_util::SinkExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::Framed;

use util::*;

// ---------------------------------------------------------------------------
// Aufbau
// ---------------------------------------------------------------------------

struct Umgebung {
    server: Framed<TcpStream, funke_protocol::FrameCodec>,
    transport: Transport,
    manager: CallManager,
    medien: Arc<FakeMedien>,
    peers: Arc<FakePeerFabrik>,
    klingel: Arc<FakeKlingel>,
    benutzer: UserId,
}

async fn umgebung(anpassen: impl FnOnce(&mut RealtimeConfig)) -> Umgebung {
    let (listener, port) = test_listener().await;
    let mut config = test_config(port);
    anpassen(&mut config);

    let transport = Transport::neu(config.clone(), Arc::new(FesterToken));
    let benutzer = UserId::new();
    let (verbunden, server) =
        tokio::join!(transport.verbinden(), akzeptieren(&listener, benutzer));
    assert!(verbunden, "Verbindungsaufbau muss gelingen");

    let medien = Arc::new(FakeMedien::default());
    let peers = Arc::new(FakePeerFabrik::default());
    let klingel = Arc::new(FakeKlingel::default());
    let manager = CallManager::neu(
        CallSignaling::neu(&transport),
        medien.clone(),
        peers.clone(),
        klingel.clone(),
        &config,
    );

    Umgebung {
        server,
        transport,
        manager,
        medien,
        peers,
        klingel,
        benutzer,
    }
}

/// Liest Status-Ereignisse bis der Ziel-Zustand erreicht ist
async fn warte_auf_zustand(
    rx: &mut broadcast::Receiver<AnrufStatus>,
    ziel: AnrufZustand,
) -> AnrufStatus {
    let frist = tokio::time::Instant::now() + TEST_TIMEOUT;
    loop {
        match tokio::time::timeout_at(frist, rx.recv()).await {
            Ok(Ok(status)) if status.zustand == ziel => return status,
            Ok(Ok(_)) => continue,
            Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            Ok(Err(broadcast::error::RecvError::Closed)) => {
                panic!("Status-Kanal geschlossen bevor {:?} erreicht wurde", ziel)
            }
            Err(_) => panic!("Zeitlimit beim Warten auf {:?}", ziel),
        }
    }
}

/// Fuehrt einen ausgehenden Anruf bis `Verbunden` durch
async fn verbundener_anruf(
    umg: &mut Umgebung,
    status_rx: &mut broadcast::Receiver<AnrufStatus>,
) -> (
    RaumId,
    Arc<FakePeer>,
    mpsc::Sender<PeerEreignis>,
    Arc<FakeStream>,
) {
    let ziel = UserId::new();
    let raum = umg
        .manager
        .anruf_starten(ziel, AnrufArt::Video, None)
        .await
        .expect("Anrufstart muss gelingen");

    assert!(matches!(
        naechste_nachricht(&mut umg.server).await,
        Envelope::InitiateCall { .. }
    ));

    umg.server
        .send(Envelope::CallAnswered { room: raum.clone() })
        .await
        .expect("CallAnswered");
    assert!(matches!(
        naechste_nachricht(&mut umg.server).await,
        Envelope::WebrtcOffer { .. }
    ));
    umg.server
        .send(Envelope::WebrtcAnswer {
            room: raum.clone(),
            sdp: "v=0 remote-answer".into(),
        })
        .await
        .expect("WebrtcAnswer");

    warte_bis(|| umg.peers.anzahl() == 1).await;
    let (peer, ereignis_tx) = umg.peers.letzter();
    warte_bis(|| !peer.remote.lock().is_empty()).await;

    ereignis_tx
        .send(PeerEreignis::FernerTrack(Arc::new(FakeFernStream(
            "remote-1".into(),
        ))))
        .await
        .expect("Ereignis muss ankommen");
    warte_auf_zustand(status_rx, AnrufZustand::Verbunden).await;

    let stream = umg.medien.letzter_stream();
    (raum, peer, ereignis_tx, stream)
}

fn test_kandidat(n: u32) -> IceKandidat {
    IceKandidat {
        candidate: format!("candidate:{} 1 UDP 1 10.0.0.{} 4444 typ host", n, n),
        sdp_mid: "0".into(),
        sdp_m_line_index: 0,
    }
}

// ---------------------------------------------------------------------------
// Ausgehender Anruf
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ausgehender_anruf_kompletter_ablauf() {
    let mut umg = umgebung(|_| {}).await;
    let mut status_rx = umg.manager.status_abonnieren();
    let ziel = UserId::new();

    let raum = umg
        .manager
        .anruf_starten(ziel, AnrufArt::Video, Some("Anna".into()))
        .await
        .expect("Anrufstart muss gelingen");
    assert_eq!(raum, RaumId::anruf(umg.benutzer, ziel));
    warte_auf_zustand(&mut status_rx, AnrufZustand::Waehlt).await;

    // Einladung auf der Leitung
    match naechste_nachricht(&mut umg.server).await {
        Envelope::InitiateCall {
            room,
            caller_id,
            target_id,
            call_type,
            caller_name,
        } => {
            assert_eq!(room, raum);
            assert_eq!(caller_id, umg.benutzer);
            assert_eq!(target_id, ziel);
            assert_eq!(call_type, AnrufArt::Video);
            assert_eq!(caller_name.as_deref(), Some("Anna"));
        }
        andere => panic!("Erwartet InitiateCall, erhalten: {:?}", andere),
    }

    // Geraet der Gegenseite klingelt
    umg.server
        .send(Envelope::ReceiverReady { room: raum.clone() })
        .await
        .expect("ReceiverReady");
    warte_auf_zustand(&mut status_rx, AnrufZustand::Klingelt).await;

    // Abgenommen: Peer entsteht, Offer geht raus
    umg.server
        .send(Envelope::CallAnswered { room: raum.clone() })
        .await
        .expect("CallAnswered");
    match naechste_nachricht(&mut umg.server).await {
        Envelope::WebrtcOffer { room, sdp } => {
            assert_eq!(room, raum);
            assert_eq!(sdp, "v=0 test-offer");
        }
        andere => panic!("Erwartet WebrtcOffer, erhalten: {:?}", andere),
    }
    warte_auf_zustand(&mut status_rx, AnrufZustand::Verbindet).await;

    let (peer, ereignis_tx) = umg.peers.letzter();
    // Lokale Medien haengen an der Peer-Verbindung
    assert_eq!(peer.angehaengt.lock().len(), 1);

    // Answer der Gegenseite
    umg.server
        .send(Envelope::WebrtcAnswer {
            room: raum.clone(),
            sdp: "v=0 remote-answer".into(),
        })
        .await
        .expect("WebrtcAnswer");
    warte_bis(|| !peer.remote.lock().is_empty()).await;

    // ICE beide Richtungen
    umg.server
        .send(Envelope::WebrtcIce {
            room: raum.clone(),
            kandidat: test_kandidat(1),
        })
        .await
        .expect("WebrtcIce");
    warte_bis(|| peer.kandidaten.lock().len() == 1).await;

    ereignis_tx
        .send(PeerEreignis::LokalerKandidat(test_kandidat(2)))
        .await
        .expect("Ereignis muss ankommen");
    match naechste_nachricht(&mut umg.server).await {
        Envelope::WebrtcIce { kandidat, .. } => {
            assert!(kandidat.candidate.contains("10.0.0.2"));
        }
        andere => panic!("Erwartet WebrtcIce, erhalten: {:?}", andere),
    }

    // Erst der ferne Track schaltet auf Verbunden (Dauer-Timer!)
    ereignis_tx
        .send(PeerEreignis::FernerTrack(Arc::new(FakeFernStream(
            "remote-1".into(),
        ))))
        .await
        .expect("Ereignis muss ankommen");
    let status = warte_auf_zustand(&mut status_rx, AnrufZustand::Verbunden).await;
    assert!(status.hat_fernen_stream);

    // Auflegen raeumt alles ab
    umg.manager.auflegen().await;
    match naechste_nachricht(&mut umg.server).await {
        Envelope::EndCall { reason, .. } => assert_eq!(reason, "hung_up"),
        andere => panic!("Erwartet EndCall, erhalten: {:?}", andere),
    }
    let status = warte_auf_zustand(&mut status_rx, AnrufZustand::Beendet).await;
    assert_eq!(status.grund.as_deref(), Some("hung_up"));
    assert!(umg.medien.letzter_stream().gestoppt());
    assert!(peer.ist_geschlossen());
}

#[tokio::test]
async fn anruf_starten_ohne_verbindung_schlaegt_sofort_fehl() {
    let (_listener, port) = test_listener().await;
    let config = test_config(port);
    let transport = Transport::neu(config.clone(), Arc::new(FesterToken));

    let medien = Arc::new(FakeMedien::default());
    let peers = Arc::new(FakePeerFabrik::default());
    let manager = CallManager::neu(
        CallSignaling::neu(&transport),
        medien.clone(),
        peers.clone(),
        Arc::new(FakeKlingel::default()),
        &config,
    );

    let ergebnis = manager
        .anruf_starten(UserId::new(), AnrufArt::Video, None)
        .await;
    assert!(matches!(
        ergebnis,
        Err(funke_core::FunkeError::NichtVerbunden)
    ));
    // Weder Medien erfasst noch eine Peer-Verbindung erstellt
    assert_eq!(medien.erfasst(), 0);
    assert_eq!(peers.anzahl(), 0);
    assert!(manager.status().await.is_none());
}

#[tokio::test]
async fn besetzt_fehler_gibt_die_medien_sofort_frei() {
    let mut umg = umgebung(|_| {}).await;
    let mut status_rx = umg.manager.status_abonnieren();

    umg.manager
        .anruf_starten(UserId::new(), AnrufArt::Audio, None)
        .await
        .expect("Anrufstart muss gelingen");
    let raum = match naechste_nachricht(&mut umg.server).await {
        Envelope::InitiateCall { room, .. } => room,
        andere => panic!("Erwartet InitiateCall, erhalten: {:?}", andere),
    };
    warte_bis(|| umg.medien.erfasst() == 1).await;

    umg.server
        .send(Envelope::CallError {
            room: raum,
            error: "busy".into(),
        })
        .await
        .expect("CallError");

    let status = warte_auf_zustand(&mut status_rx, AnrufZustand::Besetzt).await;
    assert_eq!(status.grund.as_deref(), Some("busy"));
    assert!(umg.medien.letzter_stream().gestoppt());
}

#[tokio::test]
async fn abbruch_unterdrueckt_die_verspaetete_annahme() {
    let mut umg = umgebung(|_| {}).await;
    let mut status_rx = umg.manager.status_abonnieren();

    umg.manager
        .anruf_starten(UserId::new(), AnrufArt::Audio, None)
        .await
        .expect("Anrufstart muss gelingen");
    let raum = match naechste_nachricht(&mut umg.server).await {
        Envelope::InitiateCall { room, .. } => room,
        andere => panic!("Erwartet InitiateCall, erhalten: {:?}", andere),
    };

    // Auflegen bevor die Gegenseite abnimmt
    umg.manager.auflegen().await;
    assert!(matches!(
        naechste_nachricht(&mut umg.server).await,
        Envelope::EndCall { .. }
    ));
    warte_auf_zustand(&mut status_rx, AnrufZustand::Beendet).await;

    // Die verspaetete Annahme ist ein No-op
    umg.server
        .send(Envelope::CallAnswered { room: raum })
        .await
        .expect("CallAnswered");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(umg.peers.anzahl(), 0, "Kein Peer fuer den abgebrochenen Anruf");
    let status = umg.manager.status().await.expect("Status vorhanden");
    assert_eq!(status.zustand, AnrufZustand::Beendet);
}

#[tokio::test]
async fn grace_frist_verbindet_auch_ohne_fernen_track() {
    let mut umg = umgebung(|config| config.anruf.verbunden_grace_ms = 150).await;
    let mut status_rx = umg.manager.status_abonnieren();

    umg.manager
        .anruf_starten(UserId::new(), AnrufArt::Audio, None)
        .await
        .expect("Anrufstart muss gelingen");
    let raum = match naechste_nachricht(&mut umg.server).await {
        Envelope::InitiateCall { room, .. } => room,
        andere => panic!("Erwartet InitiateCall, erhalten: {:?}", andere),
    };

    umg.server
        .send(Envelope::CallAnswered { room: raum })
        .await
        .expect("CallAnswered");
    assert!(matches!(
        naechste_nachricht(&mut umg.server).await,
        Envelope::WebrtcOffer { .. }
    ));

    // Kein ferner Track – nach der Gnadenfrist gilt die Signalisierung
    let status = warte_auf_zustand(&mut status_rx, AnrufZustand::Verbunden).await;
    assert!(!status.hat_fernen_stream);
}

// ---------------------------------------------------------------------------
// Eingehender Anruf
// ---------------------------------------------------------------------------

#[tokio::test]
async fn eingehender_anruf_mit_fruehem_offer_und_ice() {
    let mut umg = umgebung(|_| {}).await;
    let mut status_rx = umg.manager.status_abonnieren();
    let anrufer = UserId::new();
    let raum = RaumId::anruf(umg.benutzer, anrufer);

    umg.server
        .send(Envelope::IncomingCall {
            room: raum.clone(),
            caller_id: anrufer,
            call_type: AnrufArt::Audio,
            caller_name: Some("Sam".into()),
        })
        .await
        .expect("IncomingCall");

    warte_auf_zustand(&mut status_rx, AnrufZustand::Klingelt).await;
    assert!(umg.klingel.laeutet());
    assert!(matches!(
        naechste_nachricht(&mut umg.server).await,
        Envelope::ReceiverReady { .. }
    ));

    // Netz-Jitter: Offer und Kandidat treffen VOR der Annahme ein –
    // die lokale Peer-Verbindung existiert noch gar nicht
    umg.server
        .send(Envelope::WebrtcIce {
            room: raum.clone(),
            kandidat: test_kandidat(7),
        })
        .await
        .expect("WebrtcIce");
    umg.server
        .send(Envelope::WebrtcOffer {
            room: raum.clone(),
            sdp: "v=0 remote-offer".into(),
        })
        .await
        .expect("WebrtcOffer");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(umg.peers.anzahl(), 0, "Gepuffert, nicht verworfen");

    // Annahme: Medien, Peer, gepuffertes Offer -> Answer, Kandidaten-Flush
    umg.manager.annehmen().await.expect("Annahme muss gelingen");
    assert!(!umg.klingel.laeutet());
    assert!(matches!(
        naechste_nachricht(&mut umg.server).await,
        Envelope::AnswerCall { .. }
    ));
    match naechste_nachricht(&mut umg.server).await {
        Envelope::WebrtcAnswer { sdp, .. } => assert_eq!(sdp, "v=0 test-answer"),
        andere => panic!("Erwartet WebrtcAnswer, erhalten: {:?}", andere),
    }

    let (peer, _tx) = umg.peers.letzter();
    assert_eq!(peer.remote.lock().len(), 1, "Gepuffertes Offer angewendet");
    warte_bis(|| peer.kandidaten.lock().len() == 1).await;
    assert!(peer.kandidaten.lock()[0].candidate.contains("10.0.0.7"));
}

#[tokio::test]
async fn eingehender_anruf_bei_aktiver_session_wird_besetzt_abgelehnt() {
    let mut umg = umgebung(|_| {}).await;

    umg.manager
        .anruf_starten(UserId::new(), AnrufArt::Audio, None)
        .await
        .expect("Anrufstart muss gelingen");
    let aktiver_raum = match naechste_nachricht(&mut umg.server).await {
        Envelope::InitiateCall { room, .. } => room,
        andere => panic!("Erwartet InitiateCall, erhalten: {:?}", andere),
    };

    // Zweite Einladung waehrend die erste Session aktiv ist
    let fremder = UserId::new();
    umg.server
        .send(Envelope::IncomingCall {
            room: RaumId::anruf(umg.benutzer, fremder),
            caller_id: fremder,
            call_type: AnrufArt::Video,
            caller_name: None,
        })
        .await
        .expect("IncomingCall");

    match naechste_nachricht(&mut umg.server).await {
        Envelope::RejectCall { room, reason } => {
            assert_eq!(room, RaumId::anruf(umg.benutzer, fremder));
            assert_eq!(reason, "busy");
        }
        andere => panic!("Erwartet RejectCall, erhalten: {:?}", andere),
    }

    // Die aktive Session bleibt unberuehrt
    let status = umg.manager.status().await.expect("Status vorhanden");
    assert_eq!(status.raum, aktiver_raum);
    assert_eq!(status.zustand, AnrufZustand::Waehlt);
}

#[tokio::test]
async fn aufgelegt_waehrend_es_laeutet_ist_ein_verpasster_anruf() {
    let mut umg = umgebung(|_| {}).await;
    let mut status_rx = umg.manager.status_abonnieren();
    let anrufer = UserId::new();
    let raum = RaumId::anruf(umg.benutzer, anrufer);

    umg.server
        .send(Envelope::IncomingCall {
            room: raum.clone(),
            caller_id: anrufer,
            call_type: AnrufArt::Audio,
            caller_name: None,
        })
        .await
        .expect("IncomingCall");
    warte_auf_zustand(&mut status_rx, AnrufZustand::Klingelt).await;

    umg.server
        .send(Envelope::CallEnded {
            room: raum,
            reason: "caller_hung_up".into(),
        })
        .await
        .expect("CallEnded");

    let status = warte_auf_zustand(&mut status_rx, AnrufZustand::Verpasst).await;
    assert_eq!(status.grund.as_deref(), Some("caller_hung_up"));
    assert!(!umg.klingel.laeutet());
}

// ---------------------------------------------------------------------------
// Verbundene Anrufe: Idempotenz, Toggles, Wiederverbindung
// ---------------------------------------------------------------------------

#[tokio::test]
async fn doppeltes_call_ended_ist_ein_noop() {
    let mut umg = umgebung(|_| {}).await;
    let mut status_rx = umg.manager.status_abonnieren();
    let (raum, peer, _tx, stream) = verbundener_anruf(&mut umg, &mut status_rx).await;

    umg.server
        .send(Envelope::CallEnded {
            room: raum.clone(),
            reason: "hung_up".into(),
        })
        .await
        .expect("CallEnded");
    warte_auf_zustand(&mut status_rx, AnrufZustand::Beendet).await;
    assert_eq!(stream.stopps.load(std::sync::atomic::Ordering::Relaxed), 1);
    assert_eq!(peer.geschlossen.load(std::sync::atomic::Ordering::Relaxed), 1);

    // Zweites call_ended: keine doppelte Freigabe, kein neues Status-Ereignis
    while status_rx.try_recv().is_ok() {}
    umg.server
        .send(Envelope::CallEnded {
            room: raum,
            reason: "hung_up".into(),
        })
        .await
        .expect("CallEnded");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(stream.stopps.load(std::sync::atomic::Ordering::Relaxed), 1);
    assert_eq!(peer.geschlossen.load(std::sync::atomic::Ordering::Relaxed), 1);
    assert!(status_rx.try_recv().is_err(), "Kein doppeltes UI-Ereignis");
}

#[tokio::test]
async fn toggles_wirken_auf_den_lokalen_stream() {
    let mut umg = umgebung(|_| {}).await;
    let mut status_rx = umg.manager.status_abonnieren();
    let (_raum, _peer, _tx, stream) = verbundener_anruf(&mut umg, &mut status_rx).await;

    assert!(!umg.manager.mikro_umschalten().await);
    assert!(!stream.audio_an.load(std::sync::atomic::Ordering::Relaxed));
    assert!(umg.manager.mikro_umschalten().await);
    assert!(stream.audio_an.load(std::sync::atomic::Ordering::Relaxed));

    assert!(!umg.manager.kamera_umschalten().await);
    assert!(!stream.video_an.load(std::sync::atomic::Ordering::Relaxed));

    // Lautsprecher ist nur ein beobachtbares Flag
    assert!(!umg.manager.lautsprecher_umschalten().await);
    let status = umg.manager.status().await.expect("Status vorhanden");
    assert!(!status.lautsprecher_an);
}

#[tokio::test]
async fn ice_trennung_mit_erholung_bleibt_verbunden() {
    let mut umg = umgebung(|_| {}).await;
    let mut status_rx = umg.manager.status_abonnieren();
    let (_raum, peer, ereignis_tx, _stream) = verbundener_anruf(&mut umg, &mut status_rx).await;

    // ICE bricht weg: Reconnecting-Flag, kein Terminaluebergang
    ereignis_tx
        .send(PeerEreignis::IceZustand(
            funke_realtime::media::IceVerbindungsZustand::Getrennt,
        ))
        .await
        .expect("Ereignis muss ankommen");

    let frist = tokio::time::Instant::now() + TEST_TIMEOUT;
    loop {
        match tokio::time::timeout_at(frist, status_rx.recv()).await {
            Ok(Ok(status)) => {
                assert_ne!(status.zustand, AnrufZustand::Beendet, "Kein Abbruch");
                if status.reconnecting {
                    break;
                }
            }
            Ok(Err(_)) => continue,
            Err(_) => panic!("Reconnecting-Flag wurde nie gemeldet"),
        }
    }
    assert_eq!(peer.ice_neustarts.load(std::sync::atomic::Ordering::Relaxed), 1);

    // Erholung innerhalb des Fensters: weiter verbunden, Flag geloescht
    ereignis_tx
        .send(PeerEreignis::IceZustand(
            funke_realtime::media::IceVerbindungsZustand::Verbunden,
        ))
        .await
        .expect("Ereignis muss ankommen");
    let frist = tokio::time::Instant::now() + TEST_TIMEOUT;
    loop {
        let status = umg.manager.status().await.expect("Status vorhanden");
        if !status.reconnecting && status.zustand == AnrufZustand::Verbunden {
            break;
        }
        if tokio::time::Instant::now() > frist {
            panic!("Reconnecting-Flag wurde nicht geloescht");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!peer.ist_geschlossen(), "Die Session lebt weiter");
}

#[tokio::test]
async fn ice_trennung_ohne_erholung_beendet_mit_connection_lost() {
    let mut umg = umgebung(|config| config.anruf.ice_reconnect_fenster_ms = 200).await;
    let mut status_rx = umg.manager.status_abonnieren();
    let (_raum, peer, ereignis_tx, stream) = verbundener_anruf(&mut umg, &mut status_rx).await;

    ereignis_tx
        .send(PeerEreignis::IceZustand(
            funke_realtime::media::IceVerbindungsZustand::Getrennt,
        ))
        .await
        .expect("Ereignis muss ankommen");

    // Fenster laeuft ab ohne Erholung
    let status = warte_auf_zustand(&mut status_rx, AnrufZustand::Beendet).await;
    assert_eq!(status.grund.as_deref(), Some("connection_lost"));
    match naechste_nachricht(&mut umg.server).await {
        Envelope::EndCall { reason, .. } => assert_eq!(reason, "connection_lost"),
        andere => panic!("Erwartet EndCall, erhalten: {:?}", andere),
    }
    assert!(stream.gestoppt());
    assert!(peer.ist_geschlossen());
}

#[tokio::test]
async fn zweiter_anruf_waehrend_einer_laeuft_wird_abgelehnt() {
    let mut umg = umgebung(|_| {}).await;

    umg.manager
        .anruf_starten(UserId::new(), AnrufArt::Audio, None)
        .await
        .expect("Erster Anruf muss starten");
    assert!(matches!(
        naechste_nachricht(&mut umg.server).await,
        Envelope::InitiateCall { .. }
    ));
    let erster_status = umg.manager.status().await.expect("Status vorhanden");

    // Zweiter Versuch zu einem anderen Ziel
    let ergebnis = umg
        .manager
        .anruf_starten(UserId::new(), AnrufArt::Video, None)
        .await;
    assert!(matches!(ergebnis, Err(funke_core::FunkeError::AnrufAktiv)));

    // Erste Session unveraendert, nur ein Medien-Zugriff
    let status = umg.manager.status().await.expect("Status vorhanden");
    assert_eq!(status.raum, erster_status.raum);
    assert_eq!(umg.medien.erfasst(), 1);
    let _ = umg.transport;
}
