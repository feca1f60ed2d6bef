//! CallManager – Die Anruf-Zustandsmaschine
//!
//! Besitzt genau eine Peer-Verbindung und fuehrt sie anhand der
//! Signalisierungs-Ereignisse und lokaler Benutzeraktionen durch den
//! Lebenszyklus:
//!
//! ```text
//! Leerlauf -> Waehlt -> Klingelt -> Verbindet -> Verbunden
//!                                        |            |
//!                                        v            v
//!                      {Beendet | Abgelehnt | Verpasst | Besetzt}
//! ```
//!
//! `Klingelt` ist beidseitig: der Anrufer wartet auf Abnahme, der
//! Angerufene wird benachrichtigt. Terminalzustaende werden nie
//! wiederverwendet – ein neuer Anruf beginnt immer eine frische Session.
//!
//! ## Verbunden-Erkennung
//! Primaer zaehlt der erste eingetroffene Medien-Track der Gegenseite –
//! "angenommen" und "Medien fliessen" sind auf echten Netzen beobachtbar
//! verschiedene Ereignisse, und die UI (Dauer-Timer!) haengt am zweiten.
//! Kommt innerhalb der Gnadenfrist kein Track, stuft der Grace-Timer die
//! angenommene Session als sekundaeres Signal trotzdem auf verbunden.
//!
//! ## Ordnungs-Gefahr
//! ICE-Kandidaten (und sogar das Offer) koennen eintreffen bevor die
//! lokale Peer-Verbindung existiert. Solche Signale werden NIE verworfen,
//! sondern gepuffert und geflusht sobald die Verbindung bereit ist.
//!
//! Ein Klingel-Timeout (niemand nimmt ab) ist bewusst NICHT Teil der
//! Maschine – das ist eine Policy der UI-Schicht.

use funke_core::types::{CallId, UserId};
use funke_core::{FunkeError, Result};
use funke_protocol::{AnrufArt, IceKandidat, RaumId, SdpBeschreibung};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::RealtimeConfig;
use crate::media::{
    FernStream, IceVerbindungsZustand, KlingelSignal, LokalerStream, MedienGeraete,
    PeerEreignis, PeerFabrik, PeerVerbindung,
};
use crate::quality::{NetzQualitaet, QualitaetsMonitor};
use crate::signaling::{CallSignaling, SignalEvent};

/// Groesse des Broadcast-Kanals fuer Status-Schnappschuesse
const STATUS_KANAL_GROESSE: usize = 64;

// ---------------------------------------------------------------------------
// Zustaende
// ---------------------------------------------------------------------------

/// Lebenszyklus einer Anruf-Session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AnrufZustand {
    /// Kein Anruf
    #[serde(rename = "idle")]
    Leerlauf,
    /// Ausgehend: Einladung gesendet, Gegenseite noch nicht erreicht
    #[serde(rename = "calling")]
    Waehlt,
    /// Es laeutet (beim Anrufer wie beim Angerufenen)
    #[serde(rename = "ringing")]
    Klingelt,
    /// Angenommen, Offer/Answer/ICE laufen
    #[serde(rename = "connecting")]
    Verbindet,
    /// Medien fliessen
    #[serde(rename = "connected")]
    Verbunden,
    /// Terminal: aufgelegt oder verloren
    #[serde(rename = "ended")]
    Beendet,
    /// Terminal: abgelehnt
    #[serde(rename = "rejected")]
    Abgelehnt,
    /// Terminal: laeutete, Anrufer gab auf
    #[serde(rename = "missed")]
    Verpasst,
    /// Terminal: Gegenseite ist besetzt
    #[serde(rename = "busy")]
    Besetzt,
}

impl AnrufZustand {
    /// Terminalzustaende kennen keine weiteren Uebergaenge
    pub fn ist_terminal(&self) -> bool {
        matches!(
            self,
            AnrufZustand::Beendet
                | AnrufZustand::Abgelehnt
                | AnrufZustand::Verpasst
                | AnrufZustand::Besetzt
        )
    }
}

/// Richtung des Anrufs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Richtung {
    Ausgehend,
    Eingehend,
}

/// Beobachtbarer Schnappschuss der Session fuer die UI-Schicht
#[derive(Debug, Clone, Serialize)]
pub struct AnrufStatus {
    pub zustand: AnrufZustand,
    pub raum: RaumId,
    pub partner: UserId,
    pub art: AnrufArt,
    pub richtung: Richtung,
    /// ICE kurzzeitig getrennt, Wiederverbindung laeuft (kein eigener
    /// Top-Level-Zustand)
    pub reconnecting: bool,
    pub mikro_an: bool,
    pub kamera_an: bool,
    pub lautsprecher_an: bool,
    /// Gespraechsdauer seit dem ersten Medien-Track
    pub dauer_sek: u64,
    pub qualitaet: NetzQualitaet,
    /// Terminal-Grund (z.B. "busy", "connection_lost", "media_denied")
    pub grund: Option<String>,
    pub hat_fernen_stream: bool,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Die eine aktive (oder terminal auslaufende) Anruf-Session
struct AnrufSitzung {
    anruf_id: CallId,
    raum: RaumId,
    partner: UserId,
    art: AnrufArt,
    richtung: Richtung,
    zustand: AnrufZustand,
    lokaler_stream: Option<Arc<dyn LokalerStream>>,
    ferner_stream: Option<Arc<dyn FernStream>>,
    peer: Option<Arc<dyn PeerVerbindung>>,
    /// Wurde die entfernte Beschreibung bereits gesetzt? (Kandidaten
    /// davor muessen gepuffert werden)
    remote_beschreibung_gesetzt: bool,
    /// Offer das vor der Peer-Erstellung eintraf
    wartendes_offer: Option<SdpBeschreibung>,
    /// ICE-Kandidaten die vor der Bereitschaft eintrafen
    wartende_kandidaten: Vec<IceKandidat>,
    reconnecting: bool,
    mikro_an: bool,
    kamera_an: bool,
    lautsprecher_an: bool,
    verbunden_seit: Option<Instant>,
    grund: Option<String>,
    /// Ressourcen bereits freigegeben? (macht den Terminalpfad idempotent)
    freigegeben: bool,
    monitor: Option<QualitaetsMonitor>,
    grace_timer: Option<JoinHandle<()>>,
    reconnect_timer: Option<JoinHandle<()>>,
    peer_weiterleitung: Option<JoinHandle<()>>,
}

impl AnrufSitzung {
    fn neu(
        raum: RaumId,
        partner: UserId,
        art: AnrufArt,
        richtung: Richtung,
        zustand: AnrufZustand,
    ) -> Self {
        Self {
            anruf_id: CallId::new(),
            raum,
            partner,
            art,
            richtung,
            zustand,
            lokaler_stream: None,
            ferner_stream: None,
            peer: None,
            remote_beschreibung_gesetzt: false,
            wartendes_offer: None,
            wartende_kandidaten: Vec::new(),
            reconnecting: false,
            mikro_an: true,
            kamera_an: art == AnrufArt::Video,
            lautsprecher_an: art == AnrufArt::Video,
            verbunden_seit: None,
            grund: None,
            freigegeben: false,
            monitor: None,
            grace_timer: None,
            reconnect_timer: None,
            peer_weiterleitung: None,
        }
    }

    fn status(&self) -> AnrufStatus {
        AnrufStatus {
            zustand: self.zustand,
            raum: self.raum.clone(),
            partner: self.partner,
            art: self.art,
            richtung: self.richtung,
            reconnecting: self.reconnecting,
            mikro_an: self.mikro_an,
            kamera_an: self.kamera_an,
            lautsprecher_an: self.lautsprecher_an,
            dauer_sek: self
                .verbunden_seit
                .map(|seit| seit.elapsed().as_secs())
                .unwrap_or(0),
            qualitaet: self
                .monitor
                .as_ref()
                .map(|m| m.aktuelle())
                .unwrap_or(NetzQualitaet::Offline),
            grund: self.grund.clone(),
            hat_fernen_stream: self.ferner_stream.is_some(),
        }
    }
}

// ---------------------------------------------------------------------------
// CallManager
// ---------------------------------------------------------------------------

/// Orchestriert die eine aktive Anruf-Session
///
/// Clone teilt den inneren Zustand. Angesteuert wird die Maschine
/// ausschliesslich ueber Signalisierungs-Ereignisse und die expliziten
/// Benutzeraktionen hier – kein anderer Baustein mutiert die Session.
#[derive(Clone)]
pub struct CallManager {
    inner: Arc<CallManagerInner>,
}

struct CallManagerInner {
    signal: CallSignaling,
    medien: Arc<dyn MedienGeraete>,
    peers: Arc<dyn PeerFabrik>,
    klingel: Arc<dyn KlingelSignal>,
    verbunden_grace: Duration,
    ice_reconnect_fenster: Duration,
    quali_intervall: Duration,
    sitzung: tokio::sync::Mutex<Option<AnrufSitzung>>,
    status_tx: broadcast::Sender<AnrufStatus>,
}

impl CallManager {
    /// Erstellt den Manager und abonniert die Anruf-Signale
    pub fn neu(
        signal: CallSignaling,
        medien: Arc<dyn MedienGeraete>,
        peers: Arc<dyn PeerFabrik>,
        klingel: Arc<dyn KlingelSignal>,
        config: &RealtimeConfig,
    ) -> Self {
        let inner = Arc::new(CallManagerInner {
            signal: signal.clone(),
            medien,
            peers,
            klingel,
            verbunden_grace: Duration::from_millis(config.anruf.verbunden_grace_ms),
            ice_reconnect_fenster: Duration::from_millis(config.anruf.ice_reconnect_fenster_ms),
            quali_intervall: Duration::from_millis(config.qualitaet.messintervall_ms),
            sitzung: tokio::sync::Mutex::new(None),
            status_tx: broadcast::channel(STATUS_KANAL_GROESSE).0,
        });

        let mut signale = signal.ereignisse_abonnieren();
        let task_inner = Arc::clone(&inner);
        tokio::spawn(async move {
            while let Some(signal) = signale.recv().await {
                CallManagerInner::signal_verarbeiten(&task_inner, signal).await;
            }
        });

        Self { inner }
    }

    /// Startet einen ausgehenden Anruf
    ///
    /// Schlaegt sofort fehl wenn der Transport nicht verbunden ist oder
    /// bereits eine Session in einem Nicht-Terminalzustand existiert –
    /// dann wird weder eine Peer-Verbindung erstellt noch Medien erfasst.
    pub async fn anruf_starten(
        &self,
        ziel: UserId,
        art: AnrufArt,
        anrufer_name: Option<String>,
    ) -> Result<RaumId> {
        if !self.inner.signal.transport().ist_verbunden() {
            return Err(FunkeError::NichtVerbunden);
        }

        let raum = {
            let mut guard = self.inner.sitzung.lock().await;
            if let Some(aktiv) = guard.as_ref() {
                if !aktiv.zustand.ist_terminal() {
                    return Err(FunkeError::AnrufAktiv);
                }
            }
            let raum = self.inner.signal.anruf_starten(ziel, art, anrufer_name)?;
            let sitzung = AnrufSitzung::neu(
                raum.clone(),
                ziel,
                art,
                Richtung::Ausgehend,
                AnrufZustand::Waehlt,
            );
            tracing::info!(anruf = %sitzung.anruf_id, raum = %raum, art = ?art, "Anruf gestartet");
            self.inner.status_melden(&sitzung);
            *guard = Some(sitzung);
            raum
        };

        // Medien ausserhalb des Locks erfassen – Auflegen darf waehrend
        // der Erfassung nicht blockieren
        match self.inner.medien.erfassen(art).await {
            Ok(stream) => {
                let mut guard = self.inner.sitzung.lock().await;
                match guard.as_mut() {
                    Some(s) if s.raum == raum && !s.zustand.ist_terminal() => {
                        if let Some(peer) = s.peer.clone() {
                            // Annahme kam schon waehrend der Erfassung an
                            if let Err(e) = peer.lokalen_stream_anhaengen(stream.clone()).await {
                                tracing::warn!(fehler = %e, "Stream-Anhaengen fehlgeschlagen");
                            }
                        }
                        s.lokaler_stream = Some(stream);
                        Ok(raum)
                    }
                    _ => {
                        // Anruf wurde waehrend der Erfassung abgebrochen –
                        // Geraete sofort wieder freigeben
                        stream.stoppen();
                        Ok(raum)
                    }
                }
            }
            Err(e) => {
                self.inner.signal.beenden(raum.clone(), "media_denied");
                let mut guard = self.inner.sitzung.lock().await;
                if let Some(s) = guard.as_mut() {
                    if s.raum == raum {
                        self.inner
                            .beenden_intern(s, AnrufZustand::Beendet, "media_denied")
                            .await;
                    }
                }
                Err(e)
            }
        }
    }

    /// Nimmt den laeutenden eingehenden Anruf an
    pub async fn annehmen(&self) -> Result<()> {
        let (raum, art) = {
            let mut guard = self.inner.sitzung.lock().await;
            let s = guard
                .as_mut()
                .filter(|s| {
                    s.zustand == AnrufZustand::Klingelt && s.richtung == Richtung::Eingehend
                })
                .ok_or_else(|| {
                    FunkeError::Signalisierung("kein laeutender eingehender Anruf".into())
                })?;
            s.zustand = AnrufZustand::Verbindet;
            self.inner.klingel.stoppen();
            self.inner.status_melden(s);
            (s.raum.clone(), s.art)
        };

        if !self.inner.signal.annehmen(raum.clone()) {
            let mut guard = self.inner.sitzung.lock().await;
            if let Some(s) = guard.as_mut() {
                if s.raum == raum {
                    self.inner
                        .beenden_intern(s, AnrufZustand::Beendet, "not_connected")
                        .await;
                }
            }
            return Err(FunkeError::NichtVerbunden);
        }

        match self.inner.medien.erfassen(art).await {
            Ok(stream) => {
                let mut guard = self.inner.sitzung.lock().await;
                match guard.as_mut() {
                    Some(s) if s.raum == raum && !s.zustand.ist_terminal() => {
                        s.lokaler_stream = Some(stream);
                        if let Err(e) = CallManagerInner::peer_erstellen(&self.inner, s).await {
                            self.inner.signal.beenden(raum, "peer_failed");
                            self.inner
                                .beenden_intern(s, AnrufZustand::Beendet, "peer_failed")
                                .await;
                            return Err(e);
                        }
                        // Ein frueh eingetroffenes Offer liegt im Puffer
                        if let Some(offer) = s.wartendes_offer.take() {
                            if let Err(e) =
                                CallManagerInner::offer_anwenden(&self.inner, s, offer).await
                            {
                                self.inner.signal.beenden(raum, "signaling_failed");
                                self.inner
                                    .beenden_intern(s, AnrufZustand::Beendet, "signaling_failed")
                                    .await;
                                return Err(e);
                            }
                        }
                        Ok(())
                    }
                    _ => {
                        stream.stoppen();
                        Ok(())
                    }
                }
            }
            Err(e) => {
                self.inner.signal.beenden(raum.clone(), "media_denied");
                let mut guard = self.inner.sitzung.lock().await;
                if let Some(s) = guard.as_mut() {
                    if s.raum == raum {
                        self.inner
                            .beenden_intern(s, AnrufZustand::Beendet, "media_denied")
                            .await;
                    }
                }
                Err(e)
            }
        }
    }

    /// Lehnt den laeutenden eingehenden Anruf ab
    pub async fn ablehnen(&self, grund: impl Into<String>) -> Result<()> {
        let grund = grund.into();
        let mut guard = self.inner.sitzung.lock().await;
        let s = guard
            .as_mut()
            .filter(|s| s.zustand == AnrufZustand::Klingelt && s.richtung == Richtung::Eingehend)
            .ok_or_else(|| {
                FunkeError::Signalisierung("kein laeutender eingehender Anruf".into())
            })?;
        self.inner.signal.ablehnen(s.raum.clone(), grund.clone());
        self.inner
            .beenden_intern(s, AnrufZustand::Abgelehnt, &grund)
            .await;
        Ok(())
    }

    /// Legt auf (in jedem Nicht-Terminalzustand erlaubt)
    ///
    /// Bricht auch einen noch waehlenden Anruf sauber ab; eine danach
    /// eintreffende Annahme ist ein No-op.
    pub async fn auflegen(&self) {
        let mut guard = self.inner.sitzung.lock().await;
        if let Some(s) = guard.as_mut() {
            if !s.zustand.ist_terminal() {
                self.inner.signal.beenden(s.raum.clone(), "hung_up");
                self.inner
                    .beenden_intern(s, AnrufZustand::Beendet, "hung_up")
                    .await;
            }
        }
    }

    /// Schaltet das Mikrofon um; gibt den neuen Zustand zurueck
    pub async fn mikro_umschalten(&self) -> bool {
        let mut guard = self.inner.sitzung.lock().await;
        if let Some(s) = guard.as_mut() {
            if !s.zustand.ist_terminal() {
                s.mikro_an = !s.mikro_an;
                if let Some(stream) = &s.lokaler_stream {
                    stream.audio_setzen(s.mikro_an);
                }
                self.inner.status_melden(s);
                return s.mikro_an;
            }
        }
        false
    }

    /// Schaltet die Kamera um; gibt den neuen Zustand zurueck
    pub async fn kamera_umschalten(&self) -> bool {
        let mut guard = self.inner.sitzung.lock().await;
        if let Some(s) = guard.as_mut() {
            if !s.zustand.ist_terminal() {
                s.kamera_an = !s.kamera_an;
                if let Some(stream) = &s.lokaler_stream {
                    stream.video_setzen(s.kamera_an);
                }
                self.inner.status_melden(s);
                return s.kamera_an;
            }
        }
        false
    }

    /// Schaltet den Lautsprecher um; gibt den neuen Zustand zurueck
    ///
    /// Das Audio-Routing selbst ist Sache der Plattform – hier lebt nur
    /// das beobachtbare Flag.
    pub async fn lautsprecher_umschalten(&self) -> bool {
        let mut guard = self.inner.sitzung.lock().await;
        if let Some(s) = guard.as_mut() {
            if !s.zustand.ist_terminal() {
                s.lautsprecher_an = !s.lautsprecher_an;
                self.inner.status_melden(s);
                return s.lautsprecher_an;
            }
        }
        false
    }

    /// Aktueller Status-Schnappschuss (None wenn nie ein Anruf lief)
    pub async fn status(&self) -> Option<AnrufStatus> {
        self.inner.sitzung.lock().await.as_ref().map(|s| s.status())
    }

    /// Abonniert Status-Schnappschuesse (jede beobachtbare Aenderung)
    pub fn status_abonnieren(&self) -> broadcast::Receiver<AnrufStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Lokaler Medien-Stream der aktiven Session
    pub async fn lokaler_stream(&self) -> Option<Arc<dyn LokalerStream>> {
        self.inner
            .sitzung
            .lock()
            .await
            .as_ref()
            .and_then(|s| s.lokaler_stream.clone())
    }

    /// Medien-Stream der Gegenseite
    pub async fn ferner_stream(&self) -> Option<Arc<dyn FernStream>> {
        self.inner
            .sitzung
            .lock()
            .await
            .as_ref()
            .and_then(|s| s.ferner_stream.clone())
    }
}

// ---------------------------------------------------------------------------
// Interne Maschine
// ---------------------------------------------------------------------------

impl CallManagerInner {
    fn status_melden(&self, s: &AnrufSitzung) {
        let _ = self.status_tx.send(s.status());
    }

    /// Verarbeitet ein eingehendes Signalisierungs-Ereignis
    async fn signal_verarbeiten(inner: &Arc<CallManagerInner>, signal: SignalEvent) {
        let raum = signal.raum().clone();
        let mut guard = inner.sitzung.lock().await;

        match signal {
            SignalEvent::Eingehend {
                raum,
                anrufer,
                art,
                anrufer_name,
            } => {
                if let Some(aktiv) = guard.as_ref() {
                    if !aktiv.zustand.ist_terminal() {
                        if aktiv.raum == raum {
                            tracing::debug!(raum = %raum, "Doppelte Anruf-Einladung ignoriert");
                        } else {
                            // Besetzt: am Signal-Layer ablehnen, die aktive
                            // Session bleibt unberuehrt
                            tracing::info!(raum = %raum, "Eingehender Anruf bei aktiver Session – besetzt");
                            inner.signal.ablehnen(raum, "busy");
                        }
                        return;
                    }
                }
                let sitzung = AnrufSitzung::neu(
                    raum.clone(),
                    anrufer,
                    art,
                    Richtung::Eingehend,
                    AnrufZustand::Klingelt,
                );
                tracing::info!(
                    anruf = %sitzung.anruf_id,
                    raum = %raum,
                    anrufer = %anrufer,
                    name = anrufer_name.as_deref().unwrap_or("?"),
                    "Eingehender Anruf"
                );
                inner.klingel.starten();
                inner.signal.empfaenger_bereit(raum);
                inner.status_melden(&sitzung);
                *guard = Some(sitzung);
            }

            SignalEvent::EmpfaengerBereit { raum } => {
                if let Some(s) = sitzung_fuer(&mut guard, &raum) {
                    if s.zustand == AnrufZustand::Waehlt {
                        s.zustand = AnrufZustand::Klingelt;
                        inner.status_melden(s);
                    }
                }
            }

            SignalEvent::Angenommen { raum } => {
                let Some(s) = sitzung_fuer(&mut guard, &raum) else {
                    // Z.B. nach lokalem Abbruch waehrend des Waehlens –
                    // die verspaetete Annahme ist ein No-op
                    tracing::debug!(raum = %raum, "Annahme fuer inaktiven Anruf ignoriert");
                    return;
                };
                if s.richtung != Richtung::Ausgehend
                    || !matches!(s.zustand, AnrufZustand::Waehlt | AnrufZustand::Klingelt)
                {
                    tracing::debug!(raum = %raum, zustand = ?s.zustand, "Unerwartete Annahme ignoriert");
                    return;
                }
                s.zustand = AnrufZustand::Verbindet;
                if let Err(e) = CallManagerInner::peer_erstellen(inner, s).await {
                    tracing::warn!(fehler = %e, "Peer-Erstellung fehlgeschlagen");
                    inner.signal.beenden(raum, "peer_failed");
                    inner
                        .beenden_intern(s, AnrufZustand::Beendet, "peer_failed")
                        .await;
                    return;
                }
                let Some(peer) = s.peer.clone() else {
                    return;
                };
                match peer.offer_erstellen().await {
                    Ok(offer) => {
                        inner.signal.offer_senden(raum, offer);
                        CallManagerInner::grace_starten(inner, s);
                        inner.status_melden(s);
                    }
                    Err(e) => {
                        tracing::warn!(fehler = %e, "Offer-Erstellung fehlgeschlagen");
                        inner.signal.beenden(raum, "signaling_failed");
                        inner
                            .beenden_intern(s, AnrufZustand::Beendet, "signaling_failed")
                            .await;
                    }
                }
            }

            SignalEvent::Offer { raum, sdp } => {
                let Some(s) = sitzung_fuer(&mut guard, &raum) else {
                    tracing::debug!(raum = %raum, "Offer fuer inaktiven Anruf ignoriert");
                    return;
                };
                if s.peer.is_some() {
                    if let Err(e) = CallManagerInner::offer_anwenden(inner, s, sdp).await {
                        tracing::warn!(fehler = %e, "Offer-Verarbeitung fehlgeschlagen");
                        inner.signal.beenden(raum, "signaling_failed");
                        inner
                            .beenden_intern(s, AnrufZustand::Beendet, "signaling_failed")
                            .await;
                    }
                } else {
                    // Peer existiert noch nicht (Medien werden gerade
                    // erfasst) – Offer puffern statt verwerfen
                    s.wartendes_offer = Some(sdp);
                }
            }

            SignalEvent::Answer { raum, sdp } => {
                let Some(s) = sitzung_fuer(&mut guard, &raum) else {
                    tracing::debug!(raum = %raum, "Answer fuer inaktiven Anruf ignoriert");
                    return;
                };
                let Some(peer) = s.peer.clone() else {
                    tracing::warn!(raum = %raum, "Answer ohne Peer-Verbindung ignoriert");
                    return;
                };
                match peer.remote_beschreibung_setzen(sdp).await {
                    Ok(()) => {
                        s.remote_beschreibung_gesetzt = true;
                        CallManagerInner::kandidaten_flushen(s, &peer).await;
                    }
                    Err(e) => {
                        tracing::warn!(fehler = %e, "Answer-Verarbeitung fehlgeschlagen");
                        inner.signal.beenden(raum, "signaling_failed");
                        inner
                            .beenden_intern(s, AnrufZustand::Beendet, "signaling_failed")
                            .await;
                    }
                }
            }

            SignalEvent::Ice { raum, kandidat } => {
                let Some(s) = sitzung_fuer(&mut guard, &raum) else {
                    tracing::debug!(raum = %raum, "ICE-Kandidat fuer inaktiven Anruf verworfen");
                    return;
                };
                match s.peer.clone() {
                    Some(peer) if s.remote_beschreibung_gesetzt => {
                        if let Err(e) = peer.ice_kandidat_hinzufuegen(kandidat).await {
                            tracing::warn!(fehler = %e, "ICE-Kandidat abgelehnt");
                        }
                    }
                    _ => {
                        // Netz-Jitter: Kandidat kam vor der Bereitschaft –
                        // puffern, beim Flush anwenden
                        s.wartende_kandidaten.push(kandidat);
                    }
                }
            }

            SignalEvent::Abgelehnt { raum, grund } => {
                if let Some(s) = sitzung_fuer(&mut guard, &raum) {
                    inner
                        .beenden_intern(s, AnrufZustand::Abgelehnt, &grund)
                        .await;
                }
            }

            SignalEvent::Fehler { raum, fehler } => {
                if let Some(s) = sitzung_fuer(&mut guard, &raum) {
                    // Serverseitige Ablehnung: besetzt oder offline
                    let terminal = if fehler == "busy" {
                        AnrufZustand::Besetzt
                    } else {
                        AnrufZustand::Abgelehnt
                    };
                    inner.beenden_intern(s, terminal, &fehler).await;
                }
            }

            SignalEvent::Beendet { grund, .. } => {
                match guard.as_mut() {
                    Some(s) if s.raum == raum && !s.zustand.ist_terminal() => {
                        // Legt der Anrufer auf waehrend es hier noch laeutet,
                        // ist das ein verpasster Anruf
                        let terminal = if s.zustand == AnrufZustand::Klingelt
                            && s.richtung == Richtung::Eingehend
                        {
                            AnrufZustand::Verpasst
                        } else {
                            AnrufZustand::Beendet
                        };
                        inner.beenden_intern(s, terminal, &grund).await;
                    }
                    _ => {
                        // Zweites call_ended fuer eine bereits beendete
                        // Session: No-op, kein Fehler
                        tracing::debug!(raum = %raum, "call_ended fuer beendete Session ignoriert");
                    }
                }
            }
        }
    }

    /// Verarbeitet ein Ereignis der Peer-Verbindung
    async fn peer_ereignis(inner: &Arc<CallManagerInner>, raum: RaumId, ereignis: PeerEreignis) {
        let mut guard = inner.sitzung.lock().await;
        let Some(s) = sitzung_fuer(&mut guard, &raum) else {
            return;
        };

        match ereignis {
            PeerEreignis::FernerTrack(stream) => {
                tracing::debug!(raum = %raum, stream = %stream.kennung(), "Ferner Track eingetroffen");
                s.ferner_stream = Some(stream);
                // Der erste ferne Track ist DAS Verbunden-Signal
                if matches!(s.zustand, AnrufZustand::Verbindet) {
                    CallManagerInner::verbunden_markieren(inner, s);
                }
                inner.status_melden(s);
            }

            PeerEreignis::LokalerKandidat(kandidat) => {
                inner.signal.ice_senden(raum, kandidat);
            }

            PeerEreignis::IceZustand(zustand) => match zustand {
                IceVerbindungsZustand::Getrennt | IceVerbindungsZustand::Fehlgeschlagen
                    if s.zustand == AnrufZustand::Verbunden =>
                {
                    if !s.reconnecting {
                        tracing::info!(raum = %raum, "ICE getrennt – Wiederverbindung laeuft");
                        s.reconnecting = true;
                        if let Some(peer) = s.peer.clone() {
                            if let Err(e) = peer.ice_neustart().await {
                                tracing::warn!(fehler = %e, "ICE-Neustart fehlgeschlagen");
                            }
                        }
                        CallManagerInner::reconnect_fenster_starten(inner, s);
                        inner.status_melden(s);
                    }
                }
                IceVerbindungsZustand::Fehlgeschlagen
                    if s.zustand == AnrufZustand::Verbindet =>
                {
                    inner.signal.beenden(raum, "ice_failed");
                    inner
                        .beenden_intern(s, AnrufZustand::Beendet, "ice_failed")
                        .await;
                }
                IceVerbindungsZustand::Verbunden => {
                    if s.reconnecting {
                        tracing::info!(raum = %raum, "ICE wieder verbunden");
                        s.reconnecting = false;
                        if let Some(timer) = s.reconnect_timer.take() {
                            timer.abort();
                        }
                        inner.status_melden(s);
                    }
                }
                _ => {}
            },
        }
    }

    /// Erstellt die Peer-Verbindung, haengt Medien an und startet
    /// Ereignis-Weiterleitung + Qualitaetsmonitor
    async fn peer_erstellen(
        inner: &Arc<CallManagerInner>,
        s: &mut AnrufSitzung,
    ) -> Result<()> {
        let (peer, mut ereignisse) = inner.peers.erstellen().await?;
        if let Some(stream) = s.lokaler_stream.clone() {
            peer.lokalen_stream_anhaengen(stream).await?;
        }
        s.monitor = Some(QualitaetsMonitor::starten(
            Arc::clone(&peer),
            inner.quali_intervall,
        ));
        s.peer = Some(Arc::clone(&peer));

        let raum = s.raum.clone();
        let task_inner = Arc::clone(inner);
        s.peer_weiterleitung = Some(tokio::spawn(async move {
            while let Some(ereignis) = ereignisse.recv().await {
                CallManagerInner::peer_ereignis(&task_inner, raum.clone(), ereignis).await;
            }
        }));
        Ok(())
    }

    /// Wendet das entfernte Offer an und sendet das lokale Answer
    async fn offer_anwenden(
        inner: &Arc<CallManagerInner>,
        s: &mut AnrufSitzung,
        sdp: SdpBeschreibung,
    ) -> Result<()> {
        let peer = s
            .peer
            .clone()
            .ok_or_else(|| FunkeError::Signalisierung("Offer ohne Peer-Verbindung".into()))?;
        peer.remote_beschreibung_setzen(sdp).await?;
        s.remote_beschreibung_gesetzt = true;
        let answer = peer.answer_erstellen().await?;
        inner.signal.answer_senden(s.raum.clone(), answer);
        CallManagerInner::kandidaten_flushen(s, &peer).await;
        // Ab jetzt zaehlt die Gnadenfrist als sekundaeres Verbunden-Signal
        CallManagerInner::grace_starten(inner, s);
        inner.status_melden(s);
        Ok(())
    }

    /// Flusht die gepufferten ICE-Kandidaten in die Peer-Verbindung
    async fn kandidaten_flushen(s: &mut AnrufSitzung, peer: &Arc<dyn PeerVerbindung>) {
        for kandidat in s.wartende_kandidaten.drain(..) {
            if let Err(e) = peer.ice_kandidat_hinzufuegen(kandidat).await {
                tracing::warn!(fehler = %e, "Gepufferter ICE-Kandidat abgelehnt");
            }
        }
    }

    /// Markiert die Session als verbunden (Dauer-Timer startet)
    fn verbunden_markieren(inner: &Arc<CallManagerInner>, s: &mut AnrufSitzung) {
        s.zustand = AnrufZustand::Verbunden;
        if s.verbunden_seit.is_none() {
            s.verbunden_seit = Some(Instant::now());
        }
        s.reconnecting = false;
        if let Some(timer) = s.grace_timer.take() {
            timer.abort();
        }
        inner.klingel.stoppen();
        tracing::info!(anruf = %s.anruf_id, raum = %s.raum, "Anruf verbunden");
    }

    /// Startet die Gnadenfrist: ohne fernen Track wird die angenommene
    /// Session nach Ablauf trotzdem als verbunden gemeldet
    fn grace_starten(inner: &Arc<CallManagerInner>, s: &mut AnrufSitzung) {
        if let Some(alt) = s.grace_timer.take() {
            alt.abort();
        }
        let raum = s.raum.clone();
        let frist = inner.verbunden_grace;
        let task_inner = Arc::clone(inner);
        s.grace_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(frist).await;
            let mut guard = task_inner.sitzung.lock().await;
            if let Some(s) = sitzung_fuer(&mut guard, &raum) {
                if s.zustand == AnrufZustand::Verbindet {
                    tracing::debug!(raum = %raum, "Kein ferner Track innerhalb der Gnadenfrist – verbunden per Signalisierung");
                    CallManagerInner::verbunden_markieren(&task_inner, s);
                    task_inner.status_melden(s);
                }
            }
        }));
    }

    /// Startet das ICE-Reconnect-Fenster: ohne Erholung wird die Session
    /// nach Ablauf mit `connection_lost` beendet
    fn reconnect_fenster_starten(inner: &Arc<CallManagerInner>, s: &mut AnrufSitzung) {
        if let Some(alt) = s.reconnect_timer.take() {
            alt.abort();
        }
        let raum = s.raum.clone();
        let fenster = inner.ice_reconnect_fenster;
        let task_inner = Arc::clone(inner);
        s.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(fenster).await;
            let mut guard = task_inner.sitzung.lock().await;
            if let Some(s) = sitzung_fuer(&mut guard, &raum) {
                if s.reconnecting {
                    tracing::warn!(raum = %raum, "ICE-Reconnect-Fenster abgelaufen");
                    task_inner.signal.beenden(raum.clone(), "connection_lost");
                    task_inner
                        .beenden_intern(s, AnrufZustand::Beendet, "connection_lost")
                        .await;
                }
            }
        }));
    }

    /// Terminaluebergang: Klingeln stoppen, Medien freigeben, Peer
    /// abbauen – idempotent und von jedem Fehlerpfad erreichbar
    async fn beenden_intern(
        &self,
        s: &mut AnrufSitzung,
        zustand: AnrufZustand,
        grund: &str,
    ) {
        if s.zustand.ist_terminal() && s.freigegeben {
            return;
        }
        s.zustand = zustand;
        s.grund = Some(grund.to_string());
        self.klingel.stoppen();

        if !s.freigegeben {
            s.freigegeben = true;
            if let Some(stream) = s.lokaler_stream.take() {
                stream.stoppen();
            }
            s.ferner_stream = None;
            if let Some(timer) = s.grace_timer.take() {
                timer.abort();
            }
            if let Some(timer) = s.reconnect_timer.take() {
                timer.abort();
            }
            if let Some(monitor) = s.monitor.take() {
                monitor.stoppen();
            }
            if let Some(peer) = s.peer.take() {
                peer.schliessen().await;
            }
            // Zuletzt, rein synchroner Rest: die Weiterleitung darf sich
            // hier auch selbst beenden
            if let Some(task) = s.peer_weiterleitung.take() {
                task.abort();
            }
        }
        s.reconnecting = false;
        self.status_melden(s);
        tracing::info!(
            anruf = %s.anruf_id,
            raum = %s.raum,
            zustand = ?zustand,
            grund = grund,
            "Anruf beendet"
        );
    }
}

/// Aktive Session zum Raum, sofern nicht terminal
fn sitzung_fuer<'a>(
    guard: &'a mut Option<AnrufSitzung>,
    raum: &RaumId,
) -> Option<&'a mut AnrufSitzung> {
    guard
        .as_mut()
        .filter(|s| s.raum == *raum && !s.zustand.ist_terminal())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
