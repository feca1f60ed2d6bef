//! funke-protocol – Wire-Protokoll des Funke Realtime-Layers
//!
//! Definiert die Envelope-Nachrichten die ueber die persistente Verbindung
//! laufen, die deterministische Raum-ID-Ableitung und den Frame-Codec
//! (u32 BE Laenge + JSON-Payload).

pub mod envelope;
pub mod room;
pub mod wire;

// Re-Exporte fuer bequemen Zugriff
pub use envelope::{AnrufArt, Envelope, IceKandidat, Kategorie, SdpBeschreibung, SdpTyp};
pub use room::RaumId;
pub use wire::{FrameCodec, InboundFrame};
