//! Externe Collaborator-Schnittstellen: Auth und REST-Fallback
//!
//! Der Realtime-Layer kennt weder den Auth-Stack noch den REST-Client der
//! App – er konsumiert beides ueber schmale Traits. Tests haengen hier
//! ihre Fakes ein.

use async_trait::async_trait;
use funke_core::types::UserId;
use funke_core::Result;
use funke_protocol::RaumId;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Auth-Credential
// ---------------------------------------------------------------------------

/// Liefert das Bearer-Token fuer den Auth-Handshake
///
/// Die Erneuerung eines abgelaufenen Tokens ist Sache des Anbieters:
/// der Transport wiederholt nach einem Auth-Fehler NICHT mit demselben
/// Credential, sondern meldet den Fehlschlag an den Aufrufer.
#[async_trait]
pub trait TokenQuelle: Send + Sync {
    /// Aktuelles Bearer-Token
    async fn bearer_token(&self) -> Result<String>;
}

// ---------------------------------------------------------------------------
// REST-Fallback fuer Chat-Nachrichten
// ---------------------------------------------------------------------------

/// Eine Chat-Nachricht fuer den REST-Fallback-Pfad
///
/// Die client-generierte `message_id` macht die Zustellung idempotent –
/// der Server darf Duplikate anhand der ID verwerfen.
#[derive(Debug, Clone)]
pub struct RestNachricht {
    pub raum: RaumId,
    pub message_id: Uuid,
    pub empfaenger: UserId,
    pub text: String,
}

/// REST-Endpunkt fuer die at-least-once Zustellung einzelner Nachrichten
///
/// Nur Nachrichteninhalte laufen ueber diesen Pfad; ephemere Signale
/// (Tippen, Lese-/Zustellquittungen) haben bewusst keinen Fallback.
#[async_trait]
pub trait ChatRestApi: Send + Sync {
    /// Sendet eine einzelne Nachricht ueber REST
    async fn nachricht_senden(&self, nachricht: &RestNachricht) -> Result<()>;
}
