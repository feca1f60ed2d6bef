//! Transport – Die eine persistente Verbindung zum Realtime-Gateway
//!
//! Besitzt exklusiv den Socket und multiplext den gesamten Verkehr:
//! Praesenz, Chat, Anruf-Signalisierung und Match-Ereignisse teilen sich
//! eine Leitung, abonniert wird pro Kategorie. Kein anderer Baustein
//! sendet oder empfaengt direkt auf dem Socket.
//!
//! ## State Machine
//! ```text
//! Getrennt -> Verbindet -> Authentifizierung -> Verbunden
//!     ^                         |                  |
//!     |                         v                  v
//!     +---- trennen() ---- AuthFehler       WiederVerbindet (Backoff)
//! ```
//!
//! ## Wiederverbindung
//! - Exponentieller Backoff (Basis 1s, Deckel 30s) mit Jitter
//! - Nach `max_versuche` Fehlversuchen laeuft der Backoff am Deckel
//!   weiter; Aufrufer koennen solange den REST-Fallback markieren
//! - Auth-Fehler brechen den Backoff ab: mit demselben Credential wird
//!   nicht erneut versucht, der Aufrufer muss es erst erneuern

use futures_util::{SinkExt, StreamExt};
use funke_core::types::UserId;
use funke_core::FunkeError;
use funke_protocol::envelope::zeitstempel_jetzt;
use funke_protocol::{Envelope, FrameCodec, InboundFrame, Kategorie};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use crate::config::RealtimeConfig;
use crate::extern_api::TokenQuelle;

// ---------------------------------------------------------------------------
// Verbindungszustand
// ---------------------------------------------------------------------------

/// Lebenszyklus der Verbindung
///
/// Jeder Uebergang wird an die Zustands-Abonnenten gemeldet – auch die
/// durch Netzverlust ausgeloesten, nicht nur explizite Aufrufe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbindungsZustand {
    /// Keine Verbindung, kein Versuch im Gange
    Getrennt,
    /// TCP-Aufbau laeuft
    Verbindet,
    /// Auth-Handshake laeuft
    Authentifizierung,
    /// Authentifiziert, Verkehr fliesst
    Verbunden,
    /// Verbindung verloren, Backoff-Wiederverbindung laeuft
    WiederVerbindet,
    /// Credential abgelehnt – kein automatischer Neuversuch
    AuthFehler,
}

// ---------------------------------------------------------------------------
// Kategorie-Kanaele
// ---------------------------------------------------------------------------

/// Ein broadcast-Sender je Kategorie
///
/// Die Sender leben so lange wie der Transport: Abonnements ueberleben
/// Trennung und Wiederverbindung, niemand muss sich neu registrieren.
struct KategorieKanaele {
    praesenz: broadcast::Sender<Envelope>,
    chat: broadcast::Sender<Envelope>,
    anruf: broadcast::Sender<Envelope>,
    matches: broadcast::Sender<Envelope>,
}

impl KategorieKanaele {
    fn neu(puffer: usize) -> Self {
        Self {
            praesenz: broadcast::channel(puffer).0,
            chat: broadcast::channel(puffer).0,
            anruf: broadcast::channel(puffer).0,
            matches: broadcast::channel(puffer).0,
        }
    }

    fn sender(&self, kategorie: Kategorie) -> &broadcast::Sender<Envelope> {
        match kategorie {
            Kategorie::Praesenz => &self.praesenz,
            Kategorie::Chat => &self.chat,
            Kategorie::Anruf => &self.anruf,
            Kategorie::Match => &self.matches,
        }
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Die eine persistente Verbindung zum Realtime-Gateway
///
/// Explizit konstruiertes Service-Objekt (kein impliziter Singleton):
/// Init beim Login, Teardown beim Logout. Clone teilt den inneren
/// Zustand, Tests konstruieren beliebig viele isolierte Instanzen.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

struct TransportInner {
    config: RealtimeConfig,
    token_quelle: Arc<dyn TokenQuelle>,
    /// Aktueller Lebenszyklus-Zustand
    zustand: parking_lot::RwLock<VerbindungsZustand>,
    /// Meldet jeden Zustandsuebergang
    zustand_tx: broadcast::Sender<VerbindungsZustand>,
    /// Fan-out je Kategorie
    kanaele: KategorieKanaele,
    /// Sende-Queue der aktuell offenen Verbindung (None wenn keine offen)
    sende_tx: parking_lot::RwLock<Option<mpsc::Sender<Envelope>>>,
    /// Serialisiert verbinden()/trennen() – macht verbinden() idempotent
    verbinden_mutex: tokio::sync::Mutex<()>,
    /// Authentifizierte Identitaet
    benutzer_id: parking_lot::RwLock<Option<UserId>>,
    /// Zuletzt bekannter Offset Serverzeit - lokale Zeit (ms)
    server_offset_ms: AtomicI64,
    /// Aufrufer hat den REST-Fallback markiert
    rest_fallback: AtomicBool,
    /// trennen() wurde explizit aufgerufen – kein Auto-Reconnect
    explizit_getrennt: AtomicBool,
    /// Laufender IO-Task der offenen Verbindung
    io_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    /// Laufender Backoff-Reconnect-Task
    reconnect_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Transport {
    /// Erstellt einen neuen Transport (noch nicht verbunden)
    pub fn neu(config: RealtimeConfig, token_quelle: Arc<dyn TokenQuelle>) -> Self {
        let abo_puffer = config.kanaele.abo_puffer;
        Self {
            inner: Arc::new(TransportInner {
                config,
                token_quelle,
                zustand: parking_lot::RwLock::new(VerbindungsZustand::Getrennt),
                zustand_tx: broadcast::channel(32).0,
                kanaele: KategorieKanaele::neu(abo_puffer),
                sende_tx: parking_lot::RwLock::new(None),
                verbinden_mutex: tokio::sync::Mutex::new(()),
                benutzer_id: parking_lot::RwLock::new(None),
                server_offset_ms: AtomicI64::new(0),
                rest_fallback: AtomicBool::new(false),
                explizit_getrennt: AtomicBool::new(false),
                io_task: parking_lot::Mutex::new(None),
                reconnect_task: parking_lot::Mutex::new(None),
            }),
        }
    }

    /// Baut die Verbindung auf und authentifiziert sich
    ///
    /// Idempotent: laeuft bereits ein Aufbau oder steht die Verbindung,
    /// wird deren Ergebnis zurueckgegeben statt eine zweite Verbindung
    /// zu oeffnen. `true` erst nachdem der Server die Authentifizierung
    /// bestaetigt hat; `false` bei Handshake-Fehler oder Zeitlimit.
    pub async fn verbinden(&self) -> bool {
        let _gate = self.inner.verbinden_mutex.lock().await;
        if self.zustand() == VerbindungsZustand::Verbunden {
            return true;
        }

        self.inner.explizit_getrennt.store(false, Ordering::Relaxed);
        TransportInner::reconnect_abbrechen(&self.inner);
        // Der Reconnect-Task kann gerade eben erfolgreich gewesen sein
        if self.zustand() == VerbindungsZustand::Verbunden {
            return true;
        }

        match TransportInner::aufbau_versuchen(&self.inner).await {
            Ok(()) => true,
            Err(FunkeError::Authentifizierung(grund)) => {
                tracing::warn!(grund = %grund, "Authentifizierung abgelehnt");
                false
            }
            Err(e) => {
                tracing::warn!(fehler = %e, "Verbindungsaufbau fehlgeschlagen");
                TransportInner::reconnect_starten(Arc::clone(&self.inner));
                false
            }
        }
    }

    /// Trennt die Verbindung und stoppt alle Reconnect-Versuche
    ///
    /// Die Abonnement-Registrierungen bleiben bestehen – nach einem
    /// erneuten `verbinden()` fliessen Nachrichten wieder an dieselben
    /// Empfaenger.
    pub async fn trennen(&self) {
        let _gate = self.inner.verbinden_mutex.lock().await;
        self.inner.explizit_getrennt.store(true, Ordering::Relaxed);
        TransportInner::reconnect_abbrechen(&self.inner);
        if let Some(io) = self.inner.io_task.lock().take() {
            io.abort();
        }
        *self.inner.sende_tx.write() = None;
        *self.inner.benutzer_id.write() = None;
        self.inner.zustand_setzen(VerbindungsZustand::Getrennt);
        tracing::info!("Verbindung getrennt");
    }

    /// Reiht eine Nachricht in die Sende-Queue ein
    ///
    /// Gibt `false` zurueck wenn gerade keine authentifizierte Verbindung
    /// steht oder die Queue voll ist – Fallback-Verhalten (z.B. REST) ist
    /// Sache des Aufrufers.
    pub fn senden(&self, envelope: Envelope) -> bool {
        if self.zustand() != VerbindungsZustand::Verbunden {
            return false;
        }
        let tx = self.inner.sende_tx.read().clone();
        match tx {
            Some(tx) => match tx.try_send(envelope) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!("Sende-Queue voll – Nachricht verworfen");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            },
            None => false,
        }
    }

    /// Abonniert alle Nachrichten einer Kategorie
    ///
    /// Jeder Abonnent sieht jede Nachricht seiner Kategorie genau einmal,
    /// in Empfangsreihenfolge (FIFO je Kategorie). Drop des Empfaengers
    /// beendet das Abonnement sofort.
    pub fn abonnieren(&self, kategorie: Kategorie) -> broadcast::Receiver<Envelope> {
        self.inner.kanaele.sender(kategorie).subscribe()
    }

    /// Abonniert die Lebenszyklus-Uebergaenge der Verbindung
    pub fn zustand_abonnieren(&self) -> broadcast::Receiver<VerbindungsZustand> {
        self.inner.zustand_tx.subscribe()
    }

    /// Aktueller Verbindungszustand
    pub fn zustand(&self) -> VerbindungsZustand {
        *self.inner.zustand.read()
    }

    /// Steht eine authentifizierte Verbindung?
    pub fn ist_verbunden(&self) -> bool {
        self.zustand() == VerbindungsZustand::Verbunden
    }

    /// Authentifizierte Identitaet (None wenn nie verbunden)
    pub fn benutzer_id(&self) -> Option<UserId> {
        *self.inner.benutzer_id.read()
    }

    /// Zuletzt bekannter Offset Serverzeit - lokale Zeit in Millisekunden
    pub fn server_zeit_offset_ms(&self) -> i64 {
        self.inner.server_offset_ms.load(Ordering::Relaxed)
    }

    /// Markiert bzw. loescht den REST-Fallback-Modus
    ///
    /// Rein advisory: die Wiederverbindung laeuft im Hintergrund weiter,
    /// der ChatService fragt das Flag fuer seine Fallback-Entscheidung ab.
    pub fn rest_fallback_setzen(&self, aktiv: bool) {
        self.inner.rest_fallback.store(aktiv, Ordering::Relaxed);
    }

    /// Ist der REST-Fallback-Modus markiert?
    pub fn ist_rest_fallback(&self) -> bool {
        self.inner.rest_fallback.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Interne Verbindungslogik
// ---------------------------------------------------------------------------

impl TransportInner {
    fn zustand_setzen(&self, neu: VerbindungsZustand) {
        {
            let mut guard = self.zustand.write();
            if *guard == neu {
                return;
            }
            *guard = neu;
        }
        tracing::debug!(zustand = ?neu, "Verbindungszustand gewechselt");
        let _ = self.zustand_tx.send(neu);
    }

    /// Ein einzelner Aufbau-Versuch: TCP + Auth-Handshake unter einem
    /// gemeinsamen Zeitlimit, danach Start des IO-Tasks.
    async fn aufbau_versuchen(inner: &Arc<TransportInner>) -> funke_core::Result<()> {
        // Eine eventuell noch offene alte Verbindung zuerst kappen –
        // es darf nie mehr als ein Socket gleichzeitig offen sein.
        if let Some(alt) = inner.io_task.lock().take() {
            alt.abort();
        }
        *inner.sende_tx.write() = None;

        inner.zustand_setzen(VerbindungsZustand::Verbindet);

        let frist = tokio::time::Instant::now()
            + std::time::Duration::from_millis(inner.config.verbindung.auth_timeout_ms);
        let adresse = inner.config.verbindung.sockel_adresse();

        let stream = tokio::time::timeout_at(frist, TcpStream::connect(&adresse))
            .await
            .map_err(|_| FunkeError::Zeitlimit(format!("TCP-Aufbau zu {}", adresse)))?
            .map_err(|e| FunkeError::Verbindung(e.to_string()))?;
        let mut framed = Framed::new(stream, FrameCodec::new());

        inner.zustand_setzen(VerbindungsZustand::Authentifizierung);
        let token = inner.token_quelle.bearer_token().await?;
        framed
            .send(Envelope::Auth { token })
            .await
            .map_err(|e| FunkeError::Verbindung(e.to_string()))?;

        // Auf AuthOk warten; Server-Pings werden schon hier beantwortet
        let (user_id, server_time) = loop {
            let frame = tokio::time::timeout_at(frist, framed.next())
                .await
                .map_err(|_| FunkeError::Zeitlimit("Auth-Handshake".into()))?;
            match frame {
                Some(Ok(InboundFrame::Nachricht(Envelope::AuthOk {
                    user_id,
                    server_time,
                }))) => break (user_id, server_time),
                Some(Ok(InboundFrame::Nachricht(Envelope::AuthError { error }))) => {
                    inner.zustand_setzen(VerbindungsZustand::AuthFehler);
                    return Err(FunkeError::Authentifizierung(error));
                }
                Some(Ok(InboundFrame::Nachricht(Envelope::Ping { timestamp }))) => {
                    framed
                        .send(Envelope::pong(timestamp))
                        .await
                        .map_err(|e| FunkeError::Verbindung(e.to_string()))?;
                }
                Some(Ok(frame)) => {
                    tracing::debug!(?frame, "Nachricht vor AuthOk ignoriert");
                }
                Some(Err(e)) => return Err(FunkeError::Verbindung(e.to_string())),
                None => {
                    return Err(FunkeError::Verbindung(
                        "Verbindung waehrend des Handshakes getrennt".into(),
                    ))
                }
            }
        };

        inner
            .server_offset_ms
            .store(server_time - zeitstempel_jetzt(), Ordering::Relaxed);
        *inner.benutzer_id.write() = Some(user_id);

        // IO-Task starten: liest Frames, verteilt nach Kategorie, leert
        // die Sende-Queue
        let (sende_tx, sende_rx) = mpsc::channel(inner.config.kanaele.sende_puffer);
        *inner.sende_tx.write() = Some(sende_tx);
        let io = tokio::spawn(TransportInner::io_schleife(
            Arc::clone(inner),
            framed,
            sende_rx,
        ));
        *inner.io_task.lock() = Some(io);

        inner.zustand_setzen(VerbindungsZustand::Verbunden);
        tracing::info!(benutzer = %user_id, adresse = %adresse, "Verbunden und authentifiziert");
        Ok(())
    }

    /// Lese-/Schreibschleife der offenen Verbindung
    async fn io_schleife(
        inner: Arc<TransportInner>,
        mut framed: Framed<TcpStream, FrameCodec>,
        mut sende_rx: mpsc::Receiver<Envelope>,
    ) {
        loop {
            tokio::select! {
                ausgehend = sende_rx.recv() => {
                    match ausgehend {
                        Some(envelope) => {
                            if let Err(e) = framed.send(envelope).await {
                                tracing::warn!(fehler = %e, "Senden fehlgeschlagen");
                                break;
                            }
                        }
                        None => break,
                    }
                }

                frame = framed.next() => {
                    match frame {
                        Some(Ok(InboundFrame::Nachricht(Envelope::Ping { timestamp }))) => {
                            if framed.send(Envelope::pong(timestamp)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(InboundFrame::Nachricht(envelope))) => {
                            match envelope.kategorie() {
                                Some(kategorie) => {
                                    // send schlaegt nur fehl wenn gerade niemand
                                    // abonniert hat – das ist kein Fehler
                                    let _ = inner.kanaele.sender(kategorie).send(envelope);
                                }
                                None => {
                                    tracing::debug!(
                                        ?envelope,
                                        "Transport-interne Nachricht ausserhalb des Handshakes ignoriert"
                                    );
                                }
                            }
                        }
                        Some(Ok(InboundFrame::Unbekannt { typ })) => {
                            tracing::warn!(typ = %typ, "Unroutbare Nachricht verworfen");
                        }
                        Some(Err(e)) => {
                            tracing::warn!(fehler = %e, "Frame-Lesefehler");
                            break;
                        }
                        None => {
                            tracing::info!("Verbindung vom Server getrennt");
                            break;
                        }
                    }
                }
            }
        }

        *inner.sende_tx.write() = None;
        if inner.explizit_getrennt.load(Ordering::Relaxed) {
            inner.zustand_setzen(VerbindungsZustand::Getrennt);
        } else {
            inner.zustand_setzen(VerbindungsZustand::WiederVerbindet);
            TransportInner::reconnect_starten(inner.clone());
        }
    }

    /// Startet den Backoff-Reconnect-Task falls keiner laeuft
    fn reconnect_starten(inner: Arc<TransportInner>) {
        let mut slot = inner.reconnect_task.lock();
        if slot.as_ref().map_or(false, |h| !h.is_finished()) {
            return;
        }
        let task_inner = Arc::clone(&inner);
        *slot = Some(tokio::spawn(async move {
            let mut versuch: u32 = 0;
            loop {
                if task_inner.explizit_getrennt.load(Ordering::Relaxed) {
                    break;
                }
                task_inner.zustand_setzen(VerbindungsZustand::WiederVerbindet);
                let wartezeit = task_inner.config.backoff.wartezeit(versuch);
                tracing::debug!(versuch, wartezeit_ms = wartezeit.as_millis() as u64, "Warte vor Wiederverbindung");
                tokio::time::sleep(wartezeit).await;
                if task_inner.explizit_getrennt.load(Ordering::Relaxed) {
                    break;
                }

                match TransportInner::aufbau_versuchen(&task_inner).await {
                    Ok(()) => break,
                    Err(FunkeError::Authentifizierung(grund)) => {
                        // Nicht mit demselben Credential weiterhaemmern
                        tracing::warn!(grund = %grund, "Wiederverbindung: Credential abgelehnt");
                        break;
                    }
                    Err(e) => {
                        versuch = versuch.saturating_add(1);
                        if versuch == task_inner.config.backoff.max_versuche {
                            tracing::warn!(
                                versuche = versuch,
                                "Wiederverbindung schlaegt weiter fehl – REST-Fallback moeglich"
                            );
                        }
                        tracing::debug!(fehler = %e, versuch, "Wiederverbindung fehlgeschlagen");
                    }
                }
            }
        }));
    }

    /// Bricht einen laufenden Reconnect-Task ab
    fn reconnect_abbrechen(inner: &Arc<TransportInner>) {
        if let Some(task) = inner.reconnect_task.lock().take() {
            task.abort();
        }
    }
}

impl Drop for TransportInner {
    fn drop(&mut self) {
        if let Some(io) = self.io_task.lock().take() {
            io.abort();
        }
        if let Some(task) = self.reconnect_task.lock().take() {
            task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
