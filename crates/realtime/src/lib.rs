//! funke-realtime – Realtime-Layer des Funke-Clients
//!
//! Eine einzige persistente Verbindung multiplext vier logisch getrennte
//! Protokolle (Praesenz, Chat, Anruf-Signalisierung, Match-Ereignisse).
//! Darauf aufbauend orchestriert die Anruf-Zustandsmaschine eine
//! Peer-to-Peer Audio/Video-Session.
//!
//! ## Architektur
//! ```text
//! Transport (1 Verbindung, Kategorie-Fan-out)
//!    |-- PresenceTracker      (user_online / user_offline)
//!    |-- ChatService          (Nachrichten, Tippen, Lese-/Zustellquittungen)
//!    |-- CallSignaling -----> CallManager (Anruf-Zustandsmaschine)
//!    `-- MatchKanal           (new_match / match_expiring / chat_started)
//! ```
//!
//! Externe Faehigkeiten (Auth-Credential, REST-Fallback, Geraetemedien,
//! Peer-Verbindung, Klingelton) werden ueber schmale Traits konsumiert –
//! der Layer selbst rendert nichts und persistiert nichts.

pub mod call;
pub mod chat;
pub mod config;
pub mod extern_api;
pub mod matches;
pub mod media;
pub mod presence;
pub mod quality;
pub mod signaling;
pub mod transport;

// Re-Exporte fuer bequemen Zugriff
pub use call::{AnrufStatus, AnrufZustand, CallManager};
pub use chat::{ChatEvent, ChatService, SendeWeg};
pub use config::RealtimeConfig;
pub use matches::{MatchEvent, MatchKanal};
pub use presence::{PresenceAenderung, PresenceTracker};
pub use quality::NetzQualitaet;
pub use signaling::{CallSignaling, SignalEvent};
pub use transport::{Transport, VerbindungsZustand};
