//! CallSignaling – Typisierte Anruf-Signalisierung ueber den Transport
//!
//! Duenne Huelle ueber die Anruf-Kategorie: ausgehende Operationen
//! (einladen, annehmen, ablehnen, beenden, Offer/Answer/ICE-Relay) und
//! die Normalisierung aller eingehenden Signale in ein stabiles lokales
//! Format. Raum-IDs werden deterministisch aus den beiden Teilnehmern
//! abgeleitet – beide Seiten berechnen dieselbe ID ohne Roundtrip.

use funke_core::types::UserId;
use funke_core::{FunkeError, Result};
use funke_protocol::{AnrufArt, Envelope, IceKandidat, Kategorie, RaumId, SdpBeschreibung};
use tokio::sync::{broadcast, mpsc};

use crate::transport::Transport;

/// Puffer je Signal-Abonnement
const SIGNAL_ABO_PUFFER: usize = 64;

// ---------------------------------------------------------------------------
// Ereignisse
// ---------------------------------------------------------------------------

/// Normalisierte eingehende Anruf-Signale
#[derive(Debug, Clone, PartialEq)]
pub enum SignalEvent {
    /// Jemand ruft an
    Eingehend {
        raum: RaumId,
        anrufer: UserId,
        art: AnrufArt,
        anrufer_name: Option<String>,
    },
    /// Die Gegenseite hat abgenommen
    Angenommen { raum: RaumId },
    /// Die Gegenseite hat abgelehnt
    Abgelehnt { raum: RaumId, grund: String },
    /// Die Gegenseite (oder der Server) hat den Anruf beendet
    Beendet { raum: RaumId, grund: String },
    /// Serverseitige Ablehnung (Ziel besetzt, offline, ...)
    Fehler { raum: RaumId, fehler: String },
    /// Das Geraet der Gegenseite klingelt
    EmpfaengerBereit { raum: RaumId },
    /// SDP-Offer der Gegenseite
    Offer { raum: RaumId, sdp: SdpBeschreibung },
    /// SDP-Answer der Gegenseite
    Answer { raum: RaumId, sdp: SdpBeschreibung },
    /// ICE-Kandidat der Gegenseite
    Ice { raum: RaumId, kandidat: IceKandidat },
}

impl SignalEvent {
    /// Raum auf den sich das Signal bezieht
    pub fn raum(&self) -> &RaumId {
        match self {
            SignalEvent::Eingehend { raum, .. }
            | SignalEvent::Angenommen { raum }
            | SignalEvent::Abgelehnt { raum, .. }
            | SignalEvent::Beendet { raum, .. }
            | SignalEvent::Fehler { raum, .. }
            | SignalEvent::EmpfaengerBereit { raum }
            | SignalEvent::Offer { raum, .. }
            | SignalEvent::Answer { raum, .. }
            | SignalEvent::Ice { raum, .. } => raum,
        }
    }
}

// ---------------------------------------------------------------------------
// CallSignaling
// ---------------------------------------------------------------------------

/// Typisierte Sicht auf die Anruf-Kategorie
#[derive(Clone)]
pub struct CallSignaling {
    transport: Transport,
}

impl CallSignaling {
    /// Erstellt den Signalkanal
    pub fn neu(transport: &Transport) -> Self {
        Self {
            transport: transport.clone(),
        }
    }

    /// Laedt einen Benutzer zu einem Anruf ein
    ///
    /// Schlaegt sofort fehl wenn keine Verbindung steht – es wird weder
    /// eine Peer-Verbindung erstellt noch Medien erfasst.
    pub fn anruf_starten(
        &self,
        ziel: UserId,
        art: AnrufArt,
        anrufer_name: Option<String>,
    ) -> Result<RaumId> {
        let anrufer = self
            .transport
            .benutzer_id()
            .ok_or(FunkeError::NichtVerbunden)?;
        let raum = RaumId::anruf(anrufer, ziel);

        let gesendet = self.transport.senden(Envelope::InitiateCall {
            room: raum.clone(),
            caller_id: anrufer,
            target_id: ziel,
            call_type: art,
            caller_name: anrufer_name,
        });
        if !gesendet {
            return Err(FunkeError::NichtVerbunden);
        }
        Ok(raum)
    }

    /// Nimmt einen eingehenden Anruf an
    pub fn annehmen(&self, raum: RaumId) -> bool {
        self.transport.senden(Envelope::AnswerCall { room: raum })
    }

    /// Lehnt einen eingehenden Anruf ab
    pub fn ablehnen(&self, raum: RaumId, grund: impl Into<String>) -> bool {
        self.transport.senden(Envelope::RejectCall {
            room: raum,
            reason: grund.into(),
        })
    }

    /// Beendet einen Anruf
    pub fn beenden(&self, raum: RaumId, grund: impl Into<String>) -> bool {
        self.transport.senden(Envelope::EndCall {
            room: raum,
            reason: grund.into(),
        })
    }

    /// Meldet der Gegenseite dass das eigene Geraet klingelt
    pub fn empfaenger_bereit(&self, raum: RaumId) -> bool {
        self.transport
            .senden(Envelope::ReceiverReady { room: raum })
    }

    /// Relays das lokale SDP-Offer an die Gegenseite
    pub fn offer_senden(&self, raum: RaumId, sdp: SdpBeschreibung) -> bool {
        self.transport.senden(Envelope::WebrtcOffer {
            room: raum,
            sdp: sdp.sdp,
        })
    }

    /// Relays das lokale SDP-Answer an die Gegenseite
    pub fn answer_senden(&self, raum: RaumId, sdp: SdpBeschreibung) -> bool {
        self.transport.senden(Envelope::WebrtcAnswer {
            room: raum,
            sdp: sdp.sdp,
        })
    }

    /// Relays einen lokalen ICE-Kandidaten an die Gegenseite
    pub fn ice_senden(&self, raum: RaumId, kandidat: IceKandidat) -> bool {
        self.transport.senden(Envelope::WebrtcIce {
            room: raum,
            kandidat,
        })
    }

    /// Abonniert die normalisierten eingehenden Signale
    ///
    /// Drop des Empfaengers beendet das Abonnement.
    pub fn ereignisse_abonnieren(&self) -> mpsc::Receiver<SignalEvent> {
        let (tx, rx) = mpsc::channel(SIGNAL_ABO_PUFFER);
        let mut anruf_rx = self.transport.abonnieren(Kategorie::Anruf);

        tokio::spawn(async move {
            loop {
                match anruf_rx.recv().await {
                    Ok(envelope) => {
                        if let Some(signal) = normalisieren(envelope) {
                            if tx.send(signal).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(verpasst = n, "Anruf-Signale verpasst");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        rx
    }

    /// Zugrunde liegender Transport (fuer die Zustandsmaschine)
    pub fn transport(&self) -> &Transport {
        &self.transport
    }
}

/// Normalisiert eine Anruf-Nachricht in das lokale Signalformat
fn normalisieren(envelope: Envelope) -> Option<SignalEvent> {
    match envelope {
        Envelope::IncomingCall {
            room,
            caller_id,
            call_type,
            caller_name,
        } => Some(SignalEvent::Eingehend {
            raum: room,
            anrufer: caller_id,
            art: call_type,
            anrufer_name: caller_name,
        }),
        Envelope::CallAnswered { room } => Some(SignalEvent::Angenommen { raum: room }),
        Envelope::CallRejected { room, reason } => Some(SignalEvent::Abgelehnt {
            raum: room,
            grund: reason,
        }),
        Envelope::CallEnded { room, reason } => Some(SignalEvent::Beendet {
            raum: room,
            grund: reason,
        }),
        Envelope::CallError { room, error } => Some(SignalEvent::Fehler {
            raum: room,
            fehler: error,
        }),
        Envelope::ReceiverReady { room } => Some(SignalEvent::EmpfaengerBereit { raum: room }),
        Envelope::WebrtcOffer { room, sdp } => Some(SignalEvent::Offer {
            raum: room,
            sdp: SdpBeschreibung::offer(sdp),
        }),
        Envelope::WebrtcAnswer { room, sdp } => Some(SignalEvent::Answer {
            raum: room,
            sdp: SdpBeschreibung::answer(sdp),
        }),
        Envelope::WebrtcIce { room, kandidat } => Some(SignalEvent::Ice {
            raum: room,
            kandidat,
        }),
        andere => {
            // Ausgehende Nachrichtentypen sollte der Server nicht zurueckspiegeln
            tracing::debug!(?andere, "Unerwartete Nachricht auf der Anruf-Kategorie");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
