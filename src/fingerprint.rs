//! Content fingerprints used to decide whether a synced highlight changed.

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};

use crate::model::{HighlightSource, UnifiedHighlight};

pub const FINGERPRINT_LEN: usize = 16;

const SEPARATOR: &str = "\n";

pub fn normalize_text(s: &str) -> String {
    s.replace("\r\n", "\n").replace('\r', "\n").trim().to_string()
}

pub fn format_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn color_name(highlight: &UnifiedHighlight, source_key: &str) -> &'static str {
    let source = HighlightSource::from_key(source_key).unwrap_or(highlight.source);
    highlight.color_index.map(|i| source.color_name(i)).unwrap_or("")
}

/// Short hex digest over text, note, colour, added date and location.
///
/// The modification date and the uuid are deliberately left out: a highlight
/// whose content is untouched keeps its fingerprint.
pub fn fingerprint(highlight: &UnifiedHighlight, source_key: &str) -> String {
    let text = normalize_text(&highlight.text);
    let note = highlight.note.as_deref().map(normalize_text).unwrap_or_default();
    let added = highlight.date_added.as_ref().map(format_date).unwrap_or_default();
    let location = highlight.location.clone().unwrap_or_default();

    let payload = [text.as_str(), note.as_str(), color_name(highlight, source_key), &added, &location].join(SEPARATOR);
    let digest = Sha256::digest(payload.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(FINGERPRINT_LEN);
    hex
}

/// Token stored next to a synced highlight.
///
/// Sources whose modification timestamp is authoritative may use it in place
/// of the content hash; highlights without one fall back to [`fingerprint`].
pub fn change_token(highlight: &UnifiedHighlight, source_key: &str, prefer_modified: bool) -> String {
    match (prefer_modified, highlight.date_modified) {
        (true, Some(modified)) => format!("m{}", modified.timestamp_millis()),
        _ => fingerprint(highlight, source_key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn highlight() -> UnifiedHighlight {
        UnifiedHighlight {
            uuid: "h-1".to_string(),
            text: "The map is not the territory.".to_string(),
            note: Some("Korzybski".to_string()),
            color_index: Some(1),
            date_added: Some(Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap()),
            date_modified: Some(Utc.with_ymd_and_hms(2024, 3, 2, 9, 30, 0).unwrap()),
            location: Some("Chapter 2".to_string()),
            source: HighlightSource::AppleBooks,
        }
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let h = highlight();
        let first = fingerprint(&h, "appleBooks");
        assert_eq!(first, fingerprint(&h, "appleBooks"));
        assert_eq!(first.len(), FINGERPRINT_LEN);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let h = highlight();
        let base = fingerprint(&h, "appleBooks");

        let mut text_changed = h.clone();
        text_changed.text.push('!');
        assert_ne!(base, fingerprint(&text_changed, "appleBooks"));

        let mut note_changed = h.clone();
        note_changed.note = None;
        assert_ne!(base, fingerprint(&note_changed, "appleBooks"));

        let mut color_changed = h.clone();
        color_changed.color_index = Some(2);
        assert_ne!(base, fingerprint(&color_changed, "appleBooks"));
    }

    #[test]
    fn test_fingerprint_ignores_unrelated_metadata() {
        let h = highlight();
        let base = fingerprint(&h, "appleBooks");

        let mut touched = h.clone();
        touched.date_modified = Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        touched.uuid = "other".to_string();
        assert_eq!(base, fingerprint(&touched, "appleBooks"));
    }

    #[test]
    fn test_fingerprint_normalizes_whitespace() {
        let h = highlight();
        let mut messy = h.clone();
        messy.text = "  The map is not the territory.\r\n".to_string();
        messy.note = Some("Korzybski\r".to_string());
        assert_eq!(fingerprint(&h, "appleBooks"), fingerprint(&messy, "appleBooks"));
    }

    #[test]
    fn test_color_resolves_against_source_key() {
        let h = highlight();
        // index 1 is green for both sources, index 0 is not
        let mut orange = h.clone();
        orange.color_index = Some(0);
        assert_ne!(fingerprint(&orange, "appleBooks"), fingerprint(&orange, "goodLinks"));
    }

    #[test]
    fn test_change_token_prefers_modification_date() {
        let h = highlight();
        assert_eq!(change_token(&h, "dedao", false), fingerprint(&h, "dedao"));
        assert!(change_token(&h, "dedao", true).starts_with('m'));

        let mut undated = h.clone();
        undated.date_modified = None;
        assert_eq!(change_token(&undated, "dedao", true), fingerprint(&undated, "dedao"));
    }
}
