//! Match-Kanal – Lebenszyklus-Ereignisse neuer Matches
//!
//! Neues Match, Ablaufwarnung und "Chat gestartet" laufen ueber dieselbe
//! Leitung wie Chat und Anrufe, sind aber fachlich unabhaengig davon.
//! Dieser Kanal ist eine duenne typisierte Sicht auf die Match-Kategorie.

use funke_core::types::{MatchId, UserId};
use funke_protocol::{Envelope, Kategorie, RaumId};
use tokio::sync::broadcast;

use crate::transport::Transport;

/// Groesse des Broadcast-Kanals fuer Match-Ereignisse
const MATCH_KANAL_GROESSE: usize = 64;

/// Typisierte Match-Ereignisse
#[derive(Debug, Clone, PartialEq)]
pub enum MatchEvent {
    /// Ein neues Match ist entstanden
    Neu {
        match_id: MatchId,
        partner: UserId,
        partner_name: Option<String>,
    },
    /// Das Match laeuft bald ab (Erinnerung, den Chat zu starten)
    LaeuftAb {
        match_id: MatchId,
        verbleibend_sek: u64,
    },
    /// Der Chat zu diesem Match wurde eroeffnet
    ChatGestartet { match_id: MatchId, raum: RaumId },
}

/// Duenne typisierte Sicht auf die Match-Kategorie
#[derive(Clone)]
pub struct MatchKanal {
    ereignis_tx: broadcast::Sender<MatchEvent>,
}

impl MatchKanal {
    /// Erstellt den Kanal und abonniert die Match-Kategorie
    pub fn neu(transport: &Transport) -> Self {
        let ereignis_tx = broadcast::channel(MATCH_KANAL_GROESSE).0;

        let mut rx = transport.abonnieren(Kategorie::Match);
        let tx = broadcast::Sender::clone(&ereignis_tx);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) => {
                        if let Some(ereignis) = Self::normalisieren(envelope) {
                            let _ = tx.send(ereignis);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(verpasst = n, "Match-Ereignisse verpasst");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Self { ereignis_tx }
    }

    /// Abonniert die typisierten Match-Ereignisse
    pub fn abonnieren(&self) -> broadcast::Receiver<MatchEvent> {
        self.ereignis_tx.subscribe()
    }

    fn normalisieren(envelope: Envelope) -> Option<MatchEvent> {
        match envelope {
            Envelope::NewMatch {
                match_id,
                user_id,
                user_name,
                ..
            } => Some(MatchEvent::Neu {
                match_id,
                partner: user_id,
                partner_name: user_name,
            }),
            Envelope::MatchExpiring {
                match_id,
                expires_in_seconds,
            } => Some(MatchEvent::LaeuftAb {
                match_id,
                verbleibend_sek: expires_in_seconds,
            }),
            Envelope::ChatStarted { match_id, room } => Some(MatchEvent::ChatGestartet {
                match_id,
                raum: room,
            }),
            andere => {
                tracing::debug!(?andere, "Unerwartete Nachricht auf der Match-Kategorie");
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
