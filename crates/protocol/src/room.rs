//! Raum-IDs – Deterministische Ableitung aus den beiden Teilnehmern
//!
//! Direktnachrichten und Anrufe sind immer auf genau zwei Teilnehmer
//! beschraenkt. Die Raum-ID wird aus den beiden User-IDs abgeleitet
//! (kleinere ID zuerst), sodass beide Seiten ohne Roundtrip dieselbe
//! ID berechnen.

use funke_core::types::UserId;
use serde::{Deserialize, Serialize};

/// Praefix fuer Direktnachrichten-Raeume
const DM_PRAEFIX: &str = "dm";
/// Praefix fuer Anruf-Raeume
const ANRUF_PRAEFIX: &str = "call";

/// Deterministische Raum-ID fuer Chat oder Anruf
///
/// Format: `dm_<minUserId>_<maxUserId>` bzw. `call_<minUserId>_<maxUserId>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RaumId(String);

impl RaumId {
    /// Leitet die Direktnachrichten-Raum-ID fuer zwei Teilnehmer ab
    pub fn direkt(a: UserId, b: UserId) -> Self {
        Self::ableiten(DM_PRAEFIX, a, b)
    }

    /// Leitet die Anruf-Raum-ID fuer zwei Teilnehmer ab
    pub fn anruf(a: UserId, b: UserId) -> Self {
        Self::ableiten(ANRUF_PRAEFIX, a, b)
    }

    fn ableiten(praefix: &str, a: UserId, b: UserId) -> Self {
        let (kleiner, groesser) = if a <= b { (a, b) } else { (b, a) };
        Self(format!(
            "{}_{}_{}",
            praefix,
            kleiner.inner(),
            groesser.inner()
        ))
    }

    /// Gibt die Raum-ID als String-Slice zurueck
    pub fn als_str(&self) -> &str {
        &self.0
    }

    /// Prueft ob es sich um einen Anruf-Raum handelt
    pub fn ist_anruf_raum(&self) -> bool {
        self.0.starts_with(ANRUF_PRAEFIX)
    }
}

impl From<String> for RaumId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for RaumId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
