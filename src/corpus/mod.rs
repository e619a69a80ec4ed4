//! Static reference-document corpus.
//!
//! Two read-only corpora back the AI features: `advice_docs.json` is seeded
//! into the database once at startup, and `reference_docs.json` (knowledge
//! base excerpts used by distress alerts) is loaded here into an immutable
//! in-memory structure. The corpus is built exactly once in `create_app` and
//! shared by reference; it is never reloaded.

use std::path::Path;

use serde::Deserialize;

/// One knowledge-base excerpt from the reference corpus.
#[derive(Debug, Clone, Deserialize)]
pub struct ReferenceDoc {
    /// Source label (publication or program name).
    #[serde(default)]
    pub source: String,
    /// Page range within the source, free-form.
    #[serde(default)]
    pub pages: Option<String>,
    /// Topic tags, e.g. `emotional_regulation`.
    #[serde(default)]
    pub topics: Vec<String>,
    /// Skills the excerpt targets.
    #[serde(default)]
    pub skills_targeted: Vec<String>,
    /// Emotion tag the excerpt addresses.
    #[serde(default)]
    pub emotion: Option<String>,
    /// Support context, e.g. `home_routine` or `therapy`.
    #[serde(default)]
    pub support_context: Option<String>,
    /// Age range string: `"5+"`, `"3-7"`, or an exact `"6"`.
    #[serde(default)]
    pub age_range: Option<String>,
    /// The recommendation text itself.
    #[serde(default)]
    pub recommendation: String,
}

impl ReferenceDoc {
    /// Whether the document's age range covers the given child age.
    ///
    /// `"N+"` matches ages >= N, `"N-M"` matches [N, M], a bare `"N"`
    /// matches only N. A missing range, a malformed range, or a zero age
    /// never matches.
    pub fn age_matches(&self, age: i64) -> bool {
        let Some(raw) = self.age_range.as_deref() else {
            return false;
        };
        let raw = raw.trim();
        if age <= 0 || raw.is_empty() {
            return false;
        }

        if let Some(base) = raw.strip_suffix('+') {
            return base.trim().parse::<i64>().is_ok_and(|base| age >= base);
        }
        if let Some((start, end)) = raw.split_once('-') {
            return match (start.trim().parse::<i64>(), end.trim().parse::<i64>()) {
                (Ok(start), Ok(end)) => start <= age && age <= end,
                _ => false,
            };
        }
        raw.parse::<i64>().is_ok_and(|exact| age == exact)
    }
}

/// One seeded advice document.
#[derive(Debug, Clone, Deserialize)]
pub struct AdviceSeed {
    /// Stable identifier from the seed file.
    pub id: Option<i64>,
    /// Advice category.
    #[serde(default)]
    pub category: Option<String>,
    /// Short title.
    #[serde(default)]
    pub title: Option<String>,
    /// The advice text.
    #[serde(default)]
    pub advice: Option<String>,
}

/// Immutable in-memory reference corpus.
#[derive(Debug, Default)]
pub struct ReferenceCorpus {
    docs: Vec<ReferenceDoc>,
}

impl ReferenceCorpus {
    /// Load the reference corpus from `reference_docs.json` in the data
    /// directory. A missing or unparsable file yields an empty corpus with a
    /// warning; distress alerts then run without supporting documents.
    pub fn load(data_dir: &Path) -> Self {
        let path = data_dir.join("reference_docs.json");
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "reference_docs.json not readable");
                return Self::default();
            }
        };

        match serde_json::from_str::<Vec<ReferenceDoc>>(&raw) {
            Ok(docs) => {
                tracing::info!(count = docs.len(), "Reference corpus loaded");
                Self { docs }
            }
            Err(err) => {
                tracing::error!(path = %path.display(), error = %err, "Failed to parse reference_docs.json");
                Self::default()
            }
        }
    }

    /// Build a corpus from in-memory documents (used by tests).
    pub fn from_docs(docs: Vec<ReferenceDoc>) -> Self {
        Self { docs }
    }

    /// All documents, in seed-file order.
    pub fn reference_docs(&self) -> &[ReferenceDoc] {
        &self.docs
    }
}

/// Load the advice seed documents from `advice_docs.json` in the data
/// directory. Missing file yields an empty list.
pub fn load_advice_seeds(data_dir: &Path) -> Vec<AdviceSeed> {
    let path = data_dir.join("advice_docs.json");
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(_) => return Vec::new(),
    };

    match serde_json::from_str(&raw) {
        Ok(seeds) => seeds,
        Err(err) => {
            tracing::error!(path = %path.display(), error = %err, "Failed to parse advice_docs.json");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_with_range(range: &str) -> ReferenceDoc {
        ReferenceDoc {
            source: "Test".to_string(),
            pages: None,
            topics: Vec::new(),
            skills_targeted: Vec::new(),
            emotion: None,
            support_context: None,
            age_range: Some(range.to_string()),
            recommendation: String::new(),
        }
    }

    #[test]
    fn test_open_ended_range() {
        let doc = doc_with_range("5+");
        assert!(doc.age_matches(5));
        assert!(doc.age_matches(11));
        assert!(!doc.age_matches(4));
    }

    #[test]
    fn test_bounded_range() {
        let doc = doc_with_range("3-7");
        assert!(doc.age_matches(3));
        assert!(doc.age_matches(7));
        assert!(!doc.age_matches(2));
        assert!(!doc.age_matches(8));
    }

    #[test]
    fn test_exact_range() {
        let doc = doc_with_range("6");
        assert!(doc.age_matches(6));
        assert!(!doc.age_matches(5));
        assert!(!doc.age_matches(7));
    }

    #[test]
    fn test_malformed_range_matches_nothing() {
        assert!(!doc_with_range("five and up").age_matches(6));
        assert!(!doc_with_range("3-x").age_matches(4));
        assert!(!doc_with_range("").age_matches(4));
    }

    #[test]
    fn test_zero_age_never_matches() {
        assert!(!doc_with_range("0").age_matches(0));
    }

    #[test]
    fn test_missing_file_yields_empty_corpus() {
        let dir = tempfile::tempdir().expect("tempdir");
        let corpus = ReferenceCorpus::load(dir.path());
        assert!(corpus.reference_docs().is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("reference_docs.json"),
            r#"[{"source": "Calm Routines", "topics": ["emotional_regulation"], "age_range": "4-8", "recommendation": "Practice breathing."}]"#,
        )
        .expect("write");

        let corpus = ReferenceCorpus::load(dir.path());
        assert_eq!(corpus.reference_docs().len(), 1);
        assert_eq!(corpus.reference_docs()[0].source, "Calm Routines");
    }
}
