//! Query and record normalization.
//!
//! Names are case-folded, stripped of legal-form tokens and punctuation so
//! that `ООО «Ромашка»`, `Romashka LLC` style variants of one spelling compare
//! equal. Registry identifiers are pulled out of digit runs by length.

use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;

use crate::types::candidate::{Candidate, RawRecord, SourceId};
use crate::types::query::{Identifier, IdentifierKind, Query};

lazy_static! {
    // Spelled-out forms first so "акционерное общество" is not left half-stripped.
    static ref LEGAL_FORMS: Regex = Regex::new(
        r"\b(?:общество с ограниченной ответственностью|публичное акционерное общество|закрытое акционерное общество|открытое акционерное общество|непубличное акционерное общество|акционерное общество|индивидуальный предприниматель|некоммерческое партнерство|limited liability company|ооо|оао|зао|пао|ао|ип|нп|нко|фгуп|гуп|муп|llc|ltd|limited|inc|incorporated|corp|corporation|co|jsc|pjsc|ojsc|cjsc|gmbh|plc)\b"
    ).unwrap();

    static ref NON_WORD: Regex = Regex::new(r"[^a-z0-9а-я]+").unwrap();

    static ref DIGIT_RUN: Regex = Regex::new(r"[0-9]+").unwrap();
}

/// Canonicalize a company name for comparison.
pub fn normalize_name(raw: &str) -> String {
    let lowered = raw.to_lowercase().replace('ё', "е");
    let spaced = NON_WORD.replace_all(&lowered, " ");
    let stripped = LEGAL_FORMS.replace_all(&spaced, " ");
    collapse_whitespace(&stripped)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Find a registry identifier in free text.
///
/// Prefers an INN over an OGRN when both appear.
pub fn extract_identifier(text: &str) -> Option<Identifier> {
    let found: Vec<Identifier> = DIGIT_RUN
        .find_iter(text)
        .filter_map(|m| Identifier::parse(m.as_str()))
        .collect();

    found
        .iter()
        .find(|id| id.kind == IdentifierKind::Inn)
        .or_else(|| found.first())
        .cloned()
}

/// Identifier carried by a record.
///
/// Explicit `inn`/`ogrn` fields win over digits found inside the names. Fields
/// may carry labels (`ИНН 7701234567`); only the digits count.
pub fn record_identifier(record: &RawRecord) -> Option<Identifier> {
    let explicit = |field: &Option<String>, kind: IdentifierKind| {
        field
            .as_deref()
            .map(digits_only)
            .and_then(|digits| Identifier::parse_as(kind, &digits))
    };

    explicit(&record.inn, IdentifierKind::Inn)
        .or_else(|| explicit(&record.ogrn, IdentifierKind::Ogrn))
        .or_else(|| record.name_full.as_deref().and_then(extract_identifier))
        .or_else(|| record.name_short.as_deref().and_then(extract_identifier))
}

fn digits_only(text: &str) -> String {
    text.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Normalize a raw query.
pub fn normalize_query(raw: impl Into<String>) -> Query {
    let raw = raw.into();
    let normalized = normalize_name(&raw);
    let identifier = extract_identifier(&raw);
    Query::from_parts(raw, normalized, identifier)
}

/// Normalize a raw record into a candidate stamped with the current time.
pub fn normalize_candidate(source: SourceId, record: RawRecord, confidence: f64) -> Candidate {
    let normalized_name = normalize_name(record.display_name());
    let identifier = record_identifier(&record);
    Candidate {
        source,
        record,
        normalized_name,
        identifier,
        confidence: confidence.clamp(0.0, 1.0),
        retrieved_at: Utc::now(),
    }
}

/// Sørensen-Dice similarity of two normalized names (0.0 - 1.0).
pub fn name_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    strsim::sorensen_dice(a, b)
}

/// Confidence a source reports for one of its records.
///
/// `base` is the source's trust in its own search results. Records with a
/// registration number match outright, a tax number almost so, and name-only
/// records are discounted by how closely they match the query (never below
/// half).
pub fn reported_confidence(base: f64, query: &Query, record: &RawRecord) -> f64 {
    let coefficient = match record_identifier(record).map(|id| id.kind) {
        Some(IdentifierKind::Ogrn) => 1.0,
        Some(IdentifierKind::Inn) => 0.9,
        None => {
            let name = normalize_name(record.display_name());
            name_similarity(query.normalized(), &name).max(0.5)
        }
    };
    (base * coefficient).clamp(0.0, 1.0)
}

/// Same-entity rule: identifiers decide when present, otherwise exact
/// normalized names.
pub fn same_entity(a: &Candidate, b: &Candidate) -> bool {
    a.key() == b.key()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_legal_forms_and_punctuation() {
        assert_eq!(normalize_name("ООО «Ромашка»"), "ромашка");
        assert_eq!(normalize_name("Romashka LLC"), "romashka");
        assert_eq!(normalize_name("  ПАО   \"Сбербанк\"  "), "сбербанк");
        assert_eq!(
            normalize_name("Общество с ограниченной ответственностью \"Умное пространство\""),
            "умное пространство"
        );
        assert_eq!(normalize_name("Ёлка Ltd."), "елка");
    }

    #[test]
    fn test_normalize_keeps_words_containing_legal_tokens() {
        // "ао" inside a word must survive
        assert_eq!(normalize_name("Даоса"), "даоса");
        assert_eq!(normalize_name("Incubator Inc"), "incubator");
    }

    #[test]
    fn test_extract_identifier_prefers_inn() {
        let id = extract_identifier("ОГРН 1027700000355, ИНН 7707083893").unwrap();
        assert_eq!(id.kind, IdentifierKind::Inn);
        assert_eq!(id.value, "7707083893");

        let id = extract_identifier("ОГРН 1027700000355").unwrap();
        assert_eq!(id.kind, IdentifierKind::Ogrn);

        assert!(extract_identifier("Romashka 2024").is_none());
    }

    #[test]
    fn test_record_identifier_tolerates_labels() {
        let record = RawRecord::new("Ромашка").with_inn("ИНН 7701234567");
        assert_eq!(
            record_identifier(&record),
            Identifier::parse("7701234567")
        );

        let record = RawRecord::new("Ромашка").with_ogrn("ОГРН 1027700000355");
        assert_eq!(
            record_identifier(&record).map(|id| id.kind),
            Some(IdentifierKind::Ogrn)
        );
    }

    #[test]
    fn test_explicit_inn_wins_over_name_digits() {
        let record = RawRecord::new("Ромашка 7709999999").with_inn("7701234567");
        assert_eq!(record_identifier(&record).unwrap().value, "7701234567");
    }

    #[test]
    fn test_malformed_explicit_inn_is_ignored() {
        let record = RawRecord::new("Ромашка").with_inn("77012");
        assert!(record_identifier(&record).is_none());
    }

    #[test]
    fn test_normalize_query_extracts_identifier() {
        let q = normalize_query("Romashka LLC 7701234567");
        assert_eq!(q.normalized(), "romashka 7701234567");
        assert_eq!(q.identifier().map(|i| i.value.as_str()), Some("7701234567"));
        assert!(!q.is_empty());

        assert!(normalize_query(" ООО ").is_empty());
    }

    #[test]
    fn test_same_entity_identifier_beats_name() {
        let a = Candidate::new("fns", RawRecord::new("Ромашка").with_inn("7701234567"), 1.0);
        let b = Candidate::new("kontur", RawRecord::new("Romashka LLC").with_inn("7701234567"), 1.0);
        assert!(same_entity(&a, &b));

        let c = Candidate::new("hh", RawRecord::new("Ромашка").with_inn("7709999999"), 1.0);
        assert!(!same_entity(&a, &c));
    }

    #[test]
    fn test_same_entity_by_name_only_without_identifiers() {
        let a = Candidate::new("hh", RawRecord::new("ООО Ромашка"), 0.7);
        let b = Candidate::new("kontur", RawRecord::new("Ромашка"), 0.7);
        assert!(same_entity(&a, &b));

        let with_id = Candidate::new("fns", RawRecord::new("Ромашка").with_inn("7701234567"), 1.0);
        assert!(!same_entity(&a, &with_id));
    }

    #[test]
    fn test_reported_confidence_coefficients() {
        let q = normalize_query("Ромашка");
        let with_ogrn = RawRecord::new("Ромашка").with_ogrn("1027700000355");
        let with_inn = RawRecord::new("Ромашка").with_inn("7701234567");
        let exact_name = RawRecord::new("ООО Ромашка");
        let other_name = RawRecord::new("Лютик");

        assert!((reported_confidence(1.0, &q, &with_ogrn) - 1.0).abs() < 1e-9);
        assert!((reported_confidence(1.0, &q, &with_inn) - 0.9).abs() < 1e-9);
        assert!((reported_confidence(0.7, &q, &exact_name) - 0.7).abs() < 1e-9);
        assert!((reported_confidence(0.7, &q, &other_name) - 0.35).abs() < 1e-9);
    }
}
