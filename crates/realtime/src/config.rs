//! Realtime-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Layer ohne Konfigurationsdatei
//! lauffaehig ist.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Vollstaendige Realtime-Konfiguration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct RealtimeConfig {
    /// Verbindungs-Einstellungen
    pub verbindung: VerbindungsEinstellungen,
    /// Backoff-Einstellungen fuer die Wiederverbindung
    pub backoff: BackoffEinstellungen,
    /// Anruf-Einstellungen
    pub anruf: AnrufEinstellungen,
    /// Netzqualitaets-Einstellungen
    pub qualitaet: QualitaetsEinstellungen,
    /// Kanal-Puffergroessen
    pub kanaele: KanalEinstellungen,
}

/// Verbindungs-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerbindungsEinstellungen {
    /// Hostname oder IP des Realtime-Gateways
    pub adresse: String,
    /// Port des Realtime-Gateways
    pub port: u16,
    /// Zeitlimit fuer Verbindungsaufbau + Auth-Handshake zusammen
    pub auth_timeout_ms: u64,
}

impl Default for VerbindungsEinstellungen {
    fn default() -> Self {
        Self {
            adresse: "127.0.0.1".into(),
            port: 9442,
            auth_timeout_ms: 10_000,
        }
    }
}

impl VerbindungsEinstellungen {
    /// Gibt die vollstaendige Verbindungsadresse zurueck
    pub fn sockel_adresse(&self) -> String {
        format!("{}:{}", self.adresse, self.port)
    }
}

/// Backoff-Einstellungen fuer die Wiederverbindung
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffEinstellungen {
    /// Basis-Wartezeit nach dem ersten Fehlversuch
    pub basis_ms: u64,
    /// Obergrenze der Wartezeit
    pub maximum_ms: u64,
    /// Zufaelliger Aufschlag (0..=jitter_ms), verhindert Reconnect-Gewitter
    pub jitter_ms: u64,
    /// Anzahl Fehlversuche bevor der REST-Fallback empfohlen wird
    pub max_versuche: u32,
}

impl Default for BackoffEinstellungen {
    fn default() -> Self {
        Self {
            basis_ms: 1_000,
            maximum_ms: 30_000,
            jitter_ms: 250,
            max_versuche: 3,
        }
    }
}

impl BackoffEinstellungen {
    /// Berechnet die Wartezeit vor dem naechsten Versuch
    ///
    /// Exponentiell ab `basis_ms`, gedeckelt auf `maximum_ms`, plus Jitter.
    pub fn wartezeit(&self, versuch: u32) -> Duration {
        let exponent = versuch.min(10);
        let roh = self
            .basis_ms
            .saturating_mul(1u64 << exponent)
            .min(self.maximum_ms);
        let jitter = if self.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        } else {
            0
        };
        Duration::from_millis(roh + jitter)
    }
}

/// Anruf-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnrufEinstellungen {
    /// Gnadenfrist nach "angenommen" bevor die Session auch ohne
    /// Medien-Track als verbunden gilt
    pub verbunden_grace_ms: u64,
    /// Fenster fuer ICE-Wiederverbindung bevor der Anruf beendet wird
    pub ice_reconnect_fenster_ms: u64,
}

impl Default for AnrufEinstellungen {
    fn default() -> Self {
        Self {
            verbunden_grace_ms: 5_000,
            ice_reconnect_fenster_ms: 30_000,
        }
    }
}

/// Netzqualitaets-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualitaetsEinstellungen {
    /// Messintervall der Qualitaets-Sonde
    pub messintervall_ms: u64,
}

impl Default for QualitaetsEinstellungen {
    fn default() -> Self {
        Self {
            messintervall_ms: 2_000,
        }
    }
}

/// Kanal-Puffergroessen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KanalEinstellungen {
    /// Puffer je Kategorie-Abonnement (broadcast)
    pub abo_puffer: usize,
    /// Puffer der ausgehenden Sende-Queue
    pub sende_puffer: usize,
}

impl Default for KanalEinstellungen {
    fn default() -> Self {
        Self {
            abo_puffer: 256,
            sende_puffer: 64,
        }
    }
}

impl RealtimeConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }
}
