//! Envelope – Kategorisierte Nachrichten der persistenten Verbindung
//!
//! Eine einzige Verbindung multiplext vier logisch getrennte Protokolle:
//! Praesenz, Chat, Anruf-Signalisierung und Match-Ereignisse. Jede
//! Nachricht ist ein flaches JSON-Objekt mit `type`-Diskriminator:
//!
//! ```text
//! { "type": "chat_message", "room": "dm_<a>_<b>", ..., "timestamp": 1712... }
//! ```
//!
//! ## Design
//! - Tagged Enum statt stringly-typed Dispatch: der Compiler erzwingt
//!   Vollstaendigkeit ueber alle Kategorien.
//! - Eingehende Payloads werden beim Deserialisieren normalisiert:
//!   fehlende optionale Felder bekommen explizite Defaults (z.B.
//!   `sdpMLineIndex` -> 0).

use chrono::Utc;
use funke_core::types::{MatchId, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::room::RaumId;

// ---------------------------------------------------------------------------
// Kategorien
// ---------------------------------------------------------------------------

/// Die vier Nachrichten-Kategorien der Verbindung
///
/// Auth und Keepalive gehoeren bewusst NICHT dazu – sie werden vom
/// Transport selbst verarbeitet und nie an Abonnenten ausgeliefert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kategorie {
    /// Online/Offline-Ereignisse
    Praesenz,
    /// Chat-Nachrichten, Tipp-Indikatoren, Lese-/Zustellbestaetigungen
    Chat,
    /// Anruf-Signalisierung inkl. WebRTC Offer/Answer/ICE
    Anruf,
    /// Match-Lebenszyklus (neues Match, Ablaufwarnung, Chat gestartet)
    Match,
}

impl Kategorie {
    /// Alle Kategorien in fester Reihenfolge
    pub const ALLE: [Kategorie; 4] = [
        Kategorie::Praesenz,
        Kategorie::Chat,
        Kategorie::Anruf,
        Kategorie::Match,
    ];
}

// ---------------------------------------------------------------------------
// Signalisierungs-Payloads (normalisierte lokale Formen)
// ---------------------------------------------------------------------------

/// Art des Anrufs – bestimmt welche Medien erfasst werden
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnrufArt {
    /// Nur Mikrofon
    Audio,
    /// Kamera und Mikrofon
    Video,
}

/// Offer oder Answer – das SDP selbst traegt die Richtung nicht
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpTyp {
    Offer,
    Answer,
}

/// Normalisierte Session-Beschreibung (SDP)
#[derive(Debug, Clone, PartialEq)]
pub struct SdpBeschreibung {
    pub typ: SdpTyp,
    pub sdp: String,
}

impl SdpBeschreibung {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            typ: SdpTyp::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            typ: SdpTyp::Answer,
            sdp: sdp.into(),
        }
    }
}

fn standard_sdp_mid() -> String {
    "0".to_string()
}

/// Normalisierter ICE-Kandidat
///
/// Server-Eigenheiten werden hier glattgezogen: fehlt `sdpMid` wird "0"
/// angenommen, fehlt `sdpMLineIndex` wird 0 angenommen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceKandidat {
    pub candidate: String,
    #[serde(rename = "sdpMid", default = "standard_sdp_mid")]
    pub sdp_mid: String,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_m_line_index: u32,
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Eine einzelne Nachricht auf der Leitung
///
/// Flaches JSON mit `type`-Feld als Diskriminator. Jede eingehende
/// Nachricht ist genau einer Kategorie zuordenbar (siehe [`kategorie`]);
/// Auth- und Keepalive-Nachrichten verarbeitet der Transport intern.
///
/// [`kategorie`]: Envelope::kategorie
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    // -----------------------------------------------------------------------
    // Transport-intern: Auth-Handshake und Keepalive
    // -----------------------------------------------------------------------
    /// Authentifizierung mit Bearer-Token (Client -> Server, erste Nachricht)
    Auth { token: String },
    /// Bestaetigung der Authentifizierung
    AuthOk {
        user_id: UserId,
        /// Serverzeit in Unix-Millisekunden (fuer die Offset-Berechnung)
        server_time: i64,
    },
    /// Authentifizierung abgelehnt (ungueltiges/abgelaufenes Credential)
    AuthError { error: String },
    /// Keepalive-Ping (beide Richtungen)
    Ping {
        #[serde(default)]
        timestamp: i64,
    },
    /// Keepalive-Antwort
    Pong {
        #[serde(default)]
        timestamp: i64,
    },

    // -----------------------------------------------------------------------
    // Praesenz
    // -----------------------------------------------------------------------
    UserOnline {
        user_id: UserId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },
    UserOffline {
        user_id: UserId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },

    // -----------------------------------------------------------------------
    // Chat
    // -----------------------------------------------------------------------
    ChatMessage {
        room: RaumId,
        /// Client-generierte ID – haelt den REST-Fallback idempotent
        message_id: Uuid,
        sender_id: UserId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        receiver_id: Option<UserId>,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },
    Typing {
        room: RaumId,
        conversation_id: String,
        sender_id: UserId,
        receiver_id: UserId,
        is_typing: bool,
    },
    MessageRead {
        conversation_id: String,
        reader_id: UserId,
    },
    MessageDelivered { message_id: Uuid, room: RaumId },

    // -----------------------------------------------------------------------
    // Anruf-Signalisierung
    // -----------------------------------------------------------------------
    InitiateCall {
        room: RaumId,
        caller_id: UserId,
        target_id: UserId,
        call_type: AnrufArt,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caller_name: Option<String>,
    },
    IncomingCall {
        room: RaumId,
        caller_id: UserId,
        call_type: AnrufArt,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caller_name: Option<String>,
    },
    AnswerCall { room: RaumId },
    CallAnswered { room: RaumId },
    RejectCall {
        room: RaumId,
        #[serde(default)]
        reason: String,
    },
    CallRejected {
        room: RaumId,
        #[serde(default)]
        reason: String,
    },
    EndCall {
        room: RaumId,
        #[serde(default)]
        reason: String,
    },
    CallEnded {
        room: RaumId,
        #[serde(default)]
        reason: String,
    },
    /// Serverseitige Ablehnung (Ziel offline, besetzt, ...)
    CallError { room: RaumId, error: String },
    /// Bereitschaftssignal des Angerufenen (Geraet klingelt)
    ReceiverReady { room: RaumId },
    WebrtcOffer { room: RaumId, sdp: String },
    WebrtcAnswer { room: RaumId, sdp: String },
    WebrtcIce {
        room: RaumId,
        #[serde(flatten)]
        kandidat: IceKandidat,
    },

    // -----------------------------------------------------------------------
    // Match-Lebenszyklus
    // -----------------------------------------------------------------------
    NewMatch {
        match_id: MatchId,
        user_id: UserId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },
    MatchExpiring {
        match_id: MatchId,
        #[serde(default)]
        expires_in_seconds: u64,
    },
    ChatStarted { match_id: MatchId, room: RaumId },
}

impl Envelope {
    /// Ordnet die Nachricht ihrer Kategorie zu
    ///
    /// `None` bedeutet transport-intern (Auth, Keepalive) – solche
    /// Nachrichten erreichen die Kategorie-Abonnenten nie.
    pub fn kategorie(&self) -> Option<Kategorie> {
        match self {
            Envelope::Auth { .. }
            | Envelope::AuthOk { .. }
            | Envelope::AuthError { .. }
            | Envelope::Ping { .. }
            | Envelope::Pong { .. } => None,

            Envelope::UserOnline { .. } | Envelope::UserOffline { .. } => {
                Some(Kategorie::Praesenz)
            }

            Envelope::ChatMessage { .. }
            | Envelope::Typing { .. }
            | Envelope::MessageRead { .. }
            | Envelope::MessageDelivered { .. } => Some(Kategorie::Chat),

            Envelope::InitiateCall { .. }
            | Envelope::IncomingCall { .. }
            | Envelope::AnswerCall { .. }
            | Envelope::CallAnswered { .. }
            | Envelope::RejectCall { .. }
            | Envelope::CallRejected { .. }
            | Envelope::EndCall { .. }
            | Envelope::CallEnded { .. }
            | Envelope::CallError { .. }
            | Envelope::ReceiverReady { .. }
            | Envelope::WebrtcOffer { .. }
            | Envelope::WebrtcAnswer { .. }
            | Envelope::WebrtcIce { .. } => Some(Kategorie::Anruf),

            Envelope::NewMatch { .. }
            | Envelope::MatchExpiring { .. }
            | Envelope::ChatStarted { .. } => Some(Kategorie::Match),
        }
    }

    /// Erstellt einen Ping mit aktuellem Zeitstempel
    pub fn ping() -> Self {
        Envelope::Ping {
            timestamp: zeitstempel_jetzt(),
        }
    }

    /// Erstellt die Pong-Antwort auf einen Ping
    pub fn pong(ping_timestamp: i64) -> Self {
        Envelope::Pong {
            timestamp: ping_timestamp,
        }
    }
}

/// Aktuelle Wanduhrzeit in Unix-Millisekunden
pub fn zeitstempel_jetzt() -> i64 {
    Utc::now().timestamp_millis()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
