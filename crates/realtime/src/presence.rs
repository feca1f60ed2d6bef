//! Presence-Tracker – Wer ist gerade online?
//!
//! Leitet die Online-Menge ausschliesslich aus serverbestaetigten
//! Praesenz-Nachrichten ab (`user_online`/`user_offline`) – nie aus
//! Chat- oder Anrufaktivitaet geraten. Beliebig viele Konsumenten lesen
//! den Schnappschuss oder abonnieren Aenderungen; keine Screen besitzt
//! die Menge.

use dashmap::DashSet;
use funke_core::types::UserId;
use funke_protocol::{Envelope, Kategorie};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::transport::Transport;

/// Groesse des Broadcast-Kanals fuer Praesenz-Aenderungen
const AENDERUNGS_KANAL_GROESSE: usize = 256;

// ---------------------------------------------------------------------------
// Ereignisse
// ---------------------------------------------------------------------------

/// Aenderung der Online-Menge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceAenderung {
    /// Benutzer ist online gegangen
    Online(UserId),
    /// Benutzer ist offline gegangen
    Offline(UserId),
}

// ---------------------------------------------------------------------------
// PresenceTracker
// ---------------------------------------------------------------------------

/// Verwaltet die Menge der aktuell online gemeldeten Benutzer
///
/// Thread-safe via Arc + DashSet. Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct PresenceTracker {
    inner: Arc<PresenceTrackerInner>,
}

struct PresenceTrackerInner {
    online: DashSet<UserId>,
    aenderung_tx: broadcast::Sender<PresenceAenderung>,
}

impl PresenceTracker {
    /// Erstellt den Tracker und abonniert die Praesenz-Kategorie
    pub fn neu(transport: &Transport) -> Self {
        let inner = Arc::new(PresenceTrackerInner {
            online: DashSet::new(),
            aenderung_tx: broadcast::channel(AENDERUNGS_KANAL_GROESSE).0,
        });

        let mut rx = transport.abonnieren(Kategorie::Praesenz);
        let task_inner = Arc::clone(&inner);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) => task_inner.verarbeiten(envelope),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(verpasst = n, "Praesenz-Nachrichten verpasst");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Self { inner }
    }

    /// Ist der Benutzer aktuell online gemeldet?
    pub fn ist_online(&self, user_id: &UserId) -> bool {
        self.inner.online.contains(user_id)
    }

    /// Schnappschuss aller online gemeldeten Benutzer (Kopie)
    pub fn online_benutzer(&self) -> Vec<UserId> {
        self.inner.online.iter().map(|e| *e.key()).collect()
    }

    /// Anzahl der online gemeldeten Benutzer
    pub fn online_anzahl(&self) -> usize {
        self.inner.online.len()
    }

    /// Abonniert Aenderungen der Online-Menge
    pub fn aenderungen_abonnieren(&self) -> broadcast::Receiver<PresenceAenderung> {
        self.inner.aenderung_tx.subscribe()
    }
}

impl PresenceTrackerInner {
    fn verarbeiten(&self, envelope: Envelope) {
        match envelope {
            Envelope::UserOnline { user_id, .. } => {
                // insert meldet ob der Eintrag neu war – Duplikate vom
                // Server loesen kein zweites Ereignis aus
                if self.online.insert(user_id) {
                    tracing::debug!(benutzer = %user_id, "Online");
                    let _ = self.aenderung_tx.send(PresenceAenderung::Online(user_id));
                }
            }
            Envelope::UserOffline { user_id, .. } => {
                if self.online.remove(&user_id).is_some() {
                    tracing::debug!(benutzer = %user_id, "Offline");
                    let _ = self.aenderung_tx.send(PresenceAenderung::Offline(user_id));
                }
            }
            andere => {
                tracing::debug!(?andere, "Unerwartete Nachricht auf der Praesenz-Kategorie");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
