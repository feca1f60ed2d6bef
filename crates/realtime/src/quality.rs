//! Netzqualitaet – Einstufung und Ueberwachung waehrend eines Anrufs
//!
//! Tastet die Verbindungsmetriken der Peer-Verbindung periodisch ab und
//! stuft sie in eine geordnete Skala ein. Verschlechterungen werden als
//! Hinweis an die UI gemeldet – beendet wird ein Anruf dadurch nie, das
//! tut ausschliesslich das ICE-Reconnect-Fenster der Zustandsmaschine.
//!
//! ## Schwellwerte
//! - Verlust > 5% ist der klassische Eingriffspunkt, > 15% ist kritisch
//! - RTT wird grob gestaffelt (100/250/500 ms)

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::media::{PeerVerbindung, VerbindungsStatistik};

/// Groesse des Broadcast-Kanals fuer Qualitaets-Hinweise
const QUALITAETS_KANAL_GROESSE: usize = 16;

// ---------------------------------------------------------------------------
// Skala
// ---------------------------------------------------------------------------

/// Geordnete Qualitaetsskala (schlechter < besser)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NetzQualitaet {
    Offline,
    #[serde(rename = "poor")]
    Schlecht,
    #[serde(rename = "fair")]
    Maessig,
    #[serde(rename = "good")]
    Gut,
    #[serde(rename = "excellent")]
    Exzellent,
}

/// Stuft eine Metrik-Momentaufnahme in die Skala ein
pub fn einstufen(statistik: &VerbindungsStatistik) -> NetzQualitaet {
    let rtt = match statistik.rtt_ms {
        Some(rtt) => rtt,
        // Keine RTT messbar -> Verbindung liegt brach
        None => return NetzQualitaet::Offline,
    };
    let verlust = statistik.verlust_rate.unwrap_or(0.0);

    if verlust > 0.15 || rtt > 500 {
        NetzQualitaet::Schlecht
    } else if verlust > 0.05 || rtt > 250 {
        NetzQualitaet::Maessig
    } else if verlust > 0.01 || rtt > 100 {
        NetzQualitaet::Gut
    } else {
        NetzQualitaet::Exzellent
    }
}

// ---------------------------------------------------------------------------
// QualitaetsMonitor
// ---------------------------------------------------------------------------

/// Periodische Qualitaets-Sonde einer laufenden Peer-Verbindung
///
/// Lebensdauer ist an die Anruf-Session gebunden: die Zustandsmaschine
/// startet den Monitor beim Verbindungsaufbau und stoppt ihn auf jedem
/// Terminalpfad.
pub struct QualitaetsMonitor {
    aktuelle: Arc<parking_lot::RwLock<NetzQualitaet>>,
    hinweis_tx: broadcast::Sender<NetzQualitaet>,
    task: JoinHandle<()>,
}

impl QualitaetsMonitor {
    /// Startet die Sonde auf der gegebenen Peer-Verbindung
    pub fn starten(peer: Arc<dyn PeerVerbindung>, messintervall: Duration) -> Self {
        let aktuelle = Arc::new(parking_lot::RwLock::new(NetzQualitaet::Offline));
        let hinweis_tx = broadcast::channel(QUALITAETS_KANAL_GROESSE).0;

        let task_aktuelle = Arc::clone(&aktuelle);
        let task_tx = broadcast::Sender::clone(&hinweis_tx);
        let task = tokio::spawn(async move {
            let mut tick = tokio::time::interval(messintervall);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                let statistik = peer.statistik().await.unwrap_or_default();
                let neu = einstufen(&statistik);
                let alt = {
                    let mut guard = task_aktuelle.write();
                    let alt = *guard;
                    *guard = neu;
                    alt
                };
                if neu != alt {
                    tracing::debug!(von = ?alt, nach = ?neu, "Netzqualitaet geaendert");
                    let _ = task_tx.send(neu);
                }
            }
        });

        Self {
            aktuelle,
            hinweis_tx,
            task,
        }
    }

    /// Zuletzt eingestufte Qualitaet
    pub fn aktuelle(&self) -> NetzQualitaet {
        *self.aktuelle.read()
    }

    /// Abonniert Qualitaets-Hinweise (nur Aenderungen)
    pub fn abonnieren(&self) -> broadcast::Receiver<NetzQualitaet> {
        self.hinweis_tx.subscribe()
    }

    /// Beendet die Sonde
    pub fn stoppen(&self) {
        self.task.abort();
    }
}

impl Drop for QualitaetsMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
