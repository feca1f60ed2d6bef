//! Fehlertypen fuer Funke
//!
//! Zentraler Fehler-Enum der alle moeglichen Fehlerzustaende abdeckt.
//! Untermodule koennen eigene Fehler definieren und via `#[from]` konvertieren.

use thiserror::Error;

/// Globaler Result-Alias fuer Funke
pub type Result<T> = std::result::Result<T, FunkeError>;

/// Alle moeglichen Fehler im Funke-System
#[derive(Debug, Error)]
pub enum FunkeError {
    // --- Verbindung & Netzwerk ---
    #[error("Verbindung fehlgeschlagen: {0}")]
    Verbindung(String),

    #[error("Nicht verbunden")]
    NichtVerbunden,

    #[error("Zeitlimit ueberschritten: {0}")]
    Zeitlimit(String),

    // --- Authentifizierung ---
    #[error("Authentifizierung fehlgeschlagen: {0}")]
    Authentifizierung(String),

    // --- Protokoll ---
    #[error("Ungueltige Nachricht: {0}")]
    Protokoll(String),

    // --- Anruf ---
    #[error("Bereits ein aktiver Anruf vorhanden")]
    AnrufAktiv,

    #[error("Medienzugriff fehlgeschlagen: {0}")]
    Medien(String),

    #[error("Signalisierung fehlgeschlagen: {0}")]
    Signalisierung(String),

    // --- Intern ---
    #[error("Interner Fehler: {0}")]
    Intern(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl FunkeError {
    /// Erstellt einen internen Fehler aus einer beliebigen Nachricht
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Gibt true zurueck wenn der Fehler wiederholbar sein koennte
    ///
    /// Authentifizierungsfehler sind bewusst NICHT wiederholbar: das
    /// Credential muss zuerst erneuert werden, stures Wiederholen mit
    /// demselben Token bringt nichts.
    pub fn ist_wiederholbar(&self) -> bool {
        matches!(
            self,
            Self::Zeitlimit(_) | Self::Verbindung(_) | Self::NichtVerbunden
        )
    }
}
