//! ChatService – Raumbezogene Nachrichten ueber die Echtzeit-Verbindung
//!
//! Nachrichten, Tipp-Indikatoren und Lese-/Zustellquittungen laufen ueber
//! die Chat-Kategorie des Transports. Faellt die Verbindung aus, wird
//! eine einzelne Nachricht ueber den REST-Collaborator zugestellt
//! (at-least-once, idempotent per client-generierter `message_id`).
//!
//! Die Asymmetrie ist Absicht: Nachrichteninhalte duerfen bei einem
//! kurzen Verbindungsabriss nicht verloren gehen, ephemere Signale
//! (Tippen, Quittungen) sind best-effort und haben keinen Fallback.

use funke_core::types::UserId;
use funke_core::{FunkeError, Result};
use funke_protocol::{Envelope, Kategorie, RaumId};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::extern_api::{ChatRestApi, RestNachricht};
use crate::transport::Transport;

/// Puffer je Raum-Abonnement
const RAUM_ABO_PUFFER: usize = 64;

// ---------------------------------------------------------------------------
// Ereignisse
// ---------------------------------------------------------------------------

/// Ueber welchen Weg wurde eine Nachricht zugestellt?
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendeWeg {
    /// Ueber die stehende Echtzeit-Verbindung
    Echtzeit,
    /// Ueber den REST-Fallback (Verbindung lag brach)
    Rest,
}

/// Typisierte Chat-Ereignisse eines Raums
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// Neue Nachricht
    Nachricht {
        raum: RaumId,
        message_id: Uuid,
        absender: UserId,
        text: String,
        zeitstempel: Option<i64>,
    },
    /// Gegenseite tippt (oder hat aufgehoert)
    Tippt {
        raum: RaumId,
        conversation_id: String,
        absender: UserId,
        is_typing: bool,
    },
    /// Unterhaltung wurde gelesen (traegt keinen Raum auf der Leitung)
    Gelesen {
        conversation_id: String,
        leser: UserId,
    },
    /// Nachricht wurde zugestellt
    Zugestellt { raum: RaumId, message_id: Uuid },
}

impl ChatEvent {
    /// Raum des Ereignisses, falls es einen traegt
    ///
    /// Lesequittungen sind per Unterhaltung adressiert und werden an alle
    /// Raum-Abonnenten durchgereicht.
    fn raum(&self) -> Option<&RaumId> {
        match self {
            ChatEvent::Nachricht { raum, .. }
            | ChatEvent::Tippt { raum, .. }
            | ChatEvent::Zugestellt { raum, .. } => Some(raum),
            ChatEvent::Gelesen { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// ChatService
// ---------------------------------------------------------------------------

/// Raumbezogener Chat ueber die Echtzeit-Verbindung mit REST-Fallback
#[derive(Clone)]
pub struct ChatService {
    transport: Transport,
    rest: Arc<dyn ChatRestApi>,
}

impl ChatService {
    /// Erstellt den Service
    pub fn neu(transport: &Transport, rest: Arc<dyn ChatRestApi>) -> Self {
        Self {
            transport: transport.clone(),
            rest,
        }
    }

    /// Sendet eine Nachricht in einen Raum
    ///
    /// Zuerst ueber den Transport; meldet der `false` (nicht verbunden),
    /// wird bei bekanntem Empfaenger ueber REST zugestellt. Ohne
    /// Empfaenger-ID gibt es keinen Fallback-Pfad.
    pub async fn nachricht_senden(
        &self,
        raum: RaumId,
        text: impl Into<String>,
        empfaenger: Option<UserId>,
    ) -> Result<SendeWeg> {
        let absender = self
            .transport
            .benutzer_id()
            .ok_or(FunkeError::NichtVerbunden)?;
        let text = text.into();
        let message_id = Uuid::new_v4();

        let envelope = Envelope::ChatMessage {
            room: raum.clone(),
            message_id,
            sender_id: absender,
            receiver_id: empfaenger,
            text: text.clone(),
            timestamp: Some(funke_protocol::envelope::zeitstempel_jetzt()),
        };

        if self.transport.senden(envelope) {
            return Ok(SendeWeg::Echtzeit);
        }

        match empfaenger {
            Some(empfaenger) => {
                tracing::debug!(
                    raum = %raum,
                    "Transport nicht verbunden – Nachricht geht ueber REST"
                );
                self.rest
                    .nachricht_senden(&RestNachricht {
                        raum,
                        message_id,
                        empfaenger,
                        text,
                    })
                    .await?;
                Ok(SendeWeg::Rest)
            }
            None => Err(FunkeError::NichtVerbunden),
        }
    }

    /// Sendet einen Tipp-Indikator (best-effort, kein Fallback)
    pub fn tippen_senden(
        &self,
        raum: RaumId,
        conversation_id: impl Into<String>,
        empfaenger: UserId,
        is_typing: bool,
    ) -> bool {
        let absender = match self.transport.benutzer_id() {
            Some(id) => id,
            None => return false,
        };
        self.transport.senden(Envelope::Typing {
            room: raum,
            conversation_id: conversation_id.into(),
            sender_id: absender,
            receiver_id: empfaenger,
            is_typing,
        })
    }

    /// Markiert eine Unterhaltung als gelesen (best-effort)
    pub fn gelesen_markieren(&self, conversation_id: impl Into<String>) -> bool {
        let leser = match self.transport.benutzer_id() {
            Some(id) => id,
            None => return false,
        };
        self.transport.senden(Envelope::MessageRead {
            conversation_id: conversation_id.into(),
            reader_id: leser,
        })
    }

    /// Quittiert die Zustellung einer Nachricht (best-effort)
    pub fn zugestellt_markieren(&self, message_id: Uuid, raum: RaumId) -> bool {
        self.transport
            .senden(Envelope::MessageDelivered { message_id, room: raum })
    }

    /// Abonniert die typisierten Ereignisse eines Raums
    ///
    /// Drop des Empfaengers beendet das Abonnement.
    pub fn raum_abonnieren(&self, raum: RaumId) -> mpsc::Receiver<ChatEvent> {
        let (tx, rx) = mpsc::channel(RAUM_ABO_PUFFER);
        let mut chat_rx = self.transport.abonnieren(Kategorie::Chat);

        tokio::spawn(async move {
            loop {
                match chat_rx.recv().await {
                    Ok(envelope) => {
                        let Some(ereignis) = ereignis_aus(envelope) else {
                            continue;
                        };
                        if let Some(ereignis_raum) = ereignis.raum() {
                            if *ereignis_raum != raum {
                                continue;
                            }
                        }
                        if tx.send(ereignis).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(verpasst = n, raum = %raum, "Chat-Ereignisse verpasst");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        rx
    }
}

/// Normalisiert eine Chat-Nachricht in das lokale Ereignisformat
fn ereignis_aus(envelope: Envelope) -> Option<ChatEvent> {
    match envelope {
        Envelope::ChatMessage {
            room,
            message_id,
            sender_id,
            text,
            timestamp,
            ..
        } => Some(ChatEvent::Nachricht {
            raum: room,
            message_id,
            absender: sender_id,
            text,
            zeitstempel: timestamp,
        }),
        Envelope::Typing {
            room,
            conversation_id,
            sender_id,
            is_typing,
            ..
        } => Some(ChatEvent::Tippt {
            raum: room,
            conversation_id,
            absender: sender_id,
            is_typing,
        }),
        Envelope::MessageRead {
            conversation_id,
            reader_id,
        } => Some(ChatEvent::Gelesen {
            conversation_id,
            leser: reader_id,
        }),
        Envelope::MessageDelivered { message_id, room } => Some(ChatEvent::Zugestellt {
            raum: room,
            message_id,
        }),
        andere => {
            tracing::debug!(?andere, "Unerwartete Nachricht auf der Chat-Kategorie");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
