//! Externe Collaborator-Schnittstellen: Geraetemedien und Peer-Verbindung
//!
//! Medienerfassung (Kamera/Mikrofon) und die Peer-Verbindung mit
//! Standard-Offer/Answer/ICE-Semantik sind externe Faehigkeiten der
//! Plattform. Der Realtime-Layer implementiert keine Codecs – er haelt
//! nur die Handles und gibt sie auf jedem Terminalpfad wieder frei.

use async_trait::async_trait;
use funke_core::Result;
use funke_protocol::{AnrufArt, IceKandidat, SdpBeschreibung};
use std::sync::Arc;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Lokale und entfernte Medien-Streams
// ---------------------------------------------------------------------------

/// Handle auf den lokal erfassten Medien-Stream
///
/// `stoppen` muss idempotent sein: der Terminalpfad der Zustandsmaschine
/// darf doppelt freigeben ohne Schaden anzurichten.
pub trait LokalerStream: Send + Sync {
    /// Gibt Kamera und Mikrofon frei (idempotent)
    fn stoppen(&self);
    /// Schaltet die Audio-Tracks an/aus (Mute)
    fn audio_setzen(&self, aktiv: bool);
    /// Schaltet die Video-Tracks an/aus (Kamera aus)
    fn video_setzen(&self, aktiv: bool);
    /// Enthaelt der Stream Video-Tracks?
    fn hat_video(&self) -> bool;
}

/// Handle auf den vom Peer empfangenen Medien-Stream
pub trait FernStream: Send + Sync {
    /// Stabile Kennung des Streams (fuer Logging und UI-Anbindung)
    fn kennung(&self) -> String;
}

/// Erfasst Geraetemedien fuer einen Anruf
#[async_trait]
pub trait MedienGeraete: Send + Sync {
    /// Erfasst Mikrofon (Audio) bzw. Kamera+Mikrofon (Video)
    async fn erfassen(&self, art: AnrufArt) -> Result<Arc<dyn LokalerStream>>;
}

// ---------------------------------------------------------------------------
// Peer-Verbindung
// ---------------------------------------------------------------------------

/// ICE-Verbindungszustand der Peer-Verbindung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceVerbindungsZustand {
    Neu,
    Prueft,
    Verbunden,
    Getrennt,
    Fehlgeschlagen,
    Geschlossen,
}

/// Ereignisse der Peer-Verbindung
pub enum PeerEreignis {
    /// Erster/naechster Medien-Track des Peers ist eingetroffen
    FernerTrack(Arc<dyn FernStream>),
    /// Lokal gesammelter ICE-Kandidat (an den Peer zu relayen)
    LokalerKandidat(IceKandidat),
    /// ICE-Verbindungszustand hat sich geaendert
    IceZustand(IceVerbindungsZustand),
}

impl std::fmt::Debug for PeerEreignis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerEreignis::FernerTrack(s) => write!(f, "FernerTrack({})", s.kennung()),
            PeerEreignis::LokalerKandidat(k) => write!(f, "LokalerKandidat({})", k.candidate),
            PeerEreignis::IceZustand(z) => write!(f, "IceZustand({:?})", z),
        }
    }
}

/// Momentaufnahme der Verbindungsmetriken (fuer den Qualitaetsmonitor)
#[derive(Debug, Clone, Copy, Default)]
pub struct VerbindungsStatistik {
    pub rtt_ms: Option<u32>,
    /// Paketverlust-Rate 0.0..=1.0
    pub verlust_rate: Option<f64>,
}

/// Peer-Verbindung mit Standard-Offer/Answer/ICE-Semantik
///
/// `schliessen` muss idempotent sein – der Terminalpfad darf mehrfach
/// durchlaufen werden.
#[async_trait]
pub trait PeerVerbindung: Send + Sync {
    /// Haengt den lokalen Medien-Stream an die Verbindung
    async fn lokalen_stream_anhaengen(&self, stream: Arc<dyn LokalerStream>) -> Result<()>;
    /// Erstellt ein SDP-Offer und setzt es als lokale Beschreibung
    async fn offer_erstellen(&self) -> Result<SdpBeschreibung>;
    /// Erstellt ein SDP-Answer und setzt es als lokale Beschreibung
    async fn answer_erstellen(&self) -> Result<SdpBeschreibung>;
    /// Setzt die entfernte Beschreibung (Offer oder Answer)
    async fn remote_beschreibung_setzen(&self, beschreibung: SdpBeschreibung) -> Result<()>;
    /// Fuegt einen entfernten ICE-Kandidaten hinzu
    async fn ice_kandidat_hinzufuegen(&self, kandidat: IceKandidat) -> Result<()>;
    /// Stoesst einen ICE-Neustart an (nach Verbindungsverlust)
    async fn ice_neustart(&self) -> Result<()>;
    /// Aktuelle Verbindungsmetriken, falls verfuegbar
    async fn statistik(&self) -> Option<VerbindungsStatistik>;
    /// Baut die Verbindung ab (idempotent)
    async fn schliessen(&self);
}

/// Erstellt Peer-Verbindungen samt Ereignis-Strom
///
/// Der Ereignis-Empfaenger gehoert dem Aufrufer – ein Drop beendet die
/// Weiterleitung, die Verbindung selbst wird via `schliessen` abgebaut.
#[async_trait]
pub trait PeerFabrik: Send + Sync {
    async fn erstellen(
        &self,
    ) -> Result<(Arc<dyn PeerVerbindung>, mpsc::Receiver<PeerEreignis>)>;
}

// ---------------------------------------------------------------------------
// Klingelsignal
// ---------------------------------------------------------------------------

/// Lokales Klingeln/Vibrieren waehrend ein Anruf laeutet
///
/// Jeder Terminaluebergang der Zustandsmaschine ruft `stoppen` auf –
/// auch mehrfach, die Implementierung muss das aushalten.
pub trait KlingelSignal: Send + Sync {
    fn starten(&self);
    fn stoppen(&self);
}

/// No-op Implementierung fuer Tests und Plattformen ohne Klingelausgabe
pub struct StillesKlingeln;

impl KlingelSignal for StillesKlingeln {
    fn starten(&self) {}
    fn stoppen(&self) {}
}
