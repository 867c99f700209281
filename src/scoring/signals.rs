//! Per-document scoring signals: semantic, quality and recency
//!
//! Every signal lands in [0, 1].

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Semantic value used when raw similarity scores are unavailable
pub const NEUTRAL_SEMANTIC: f64 = 0.7;

/// Recency value used when a document carries no usable timestamp
pub const NEUTRAL_RECENCY: f64 = 0.3;

// ============ Semantic ============

/// Min-max normalize raw similarity scores across the candidate set.
/// Identical scores all map to 1.0.
pub fn semantic_scores(raw: &[f64]) -> Vec<f64> {
    let min = raw.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = raw.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    if raw.is_empty() || max == min {
        return vec![1.0; raw.len()];
    }

    raw.iter().map(|s| (s - min) / (max - min)).collect()
}

// ============ Quality ============

/// Tunable constants of the metadata quality heuristic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityParams {
    pub formatted_bonus: f64,
    pub structured_bonus: f64,
    pub plain_bonus: f64,
    pub density_scale: f64,
    pub density_cap: f64,
    /// Chunks at or before this position ratio get `early_position_bonus`
    pub early_position_ratio: f64,
    pub early_position_bonus: f64,
    pub middle_position_ratio: f64,
    pub middle_position_bonus: f64,
    pub optimal_words_min: f64,
    pub optimal_words_max: f64,
    pub optimal_words_bonus: f64,
    pub near_optimal_words_min: f64,
    pub near_optimal_words_max: f64,
    pub near_optimal_words_bonus: f64,
    pub first_chunk_bonus: f64,
    pub first_page_bonus: f64,
}

impl Default for QualityParams {
    fn default() -> Self {
        Self {
            formatted_bonus: 0.3,
            structured_bonus: 0.2,
            plain_bonus: 0.1,
            density_scale: 5.0,
            density_cap: 0.3,
            early_position_ratio: 0.2,
            early_position_bonus: 0.2,
            middle_position_ratio: 0.5,
            middle_position_bonus: 0.1,
            optimal_words_min: 100.0,
            optimal_words_max: 1000.0,
            optimal_words_bonus: 0.1,
            near_optimal_words_min: 50.0,
            near_optimal_words_max: 2000.0,
            near_optimal_words_bonus: 0.05,
            first_chunk_bonus: 0.1,
            first_page_bonus: 0.1,
        }
    }
}

fn number(metadata: &Map<String, Value>, key: &str) -> Option<f64> {
    metadata.get(key).and_then(Value::as_f64).filter(|v| v.is_finite())
}

fn flag(metadata: &Map<String, Value>, key: &str) -> bool {
    metadata.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// Additive metadata heuristic, clamped to [0, 1]
pub fn quality_score(metadata: &Map<String, Value>, params: &QualityParams) -> f64 {
    let mut score = match metadata.get("document_type").and_then(Value::as_str) {
        Some("formatted_document") => params.formatted_bonus,
        Some("structured_text") => params.structured_bonus,
        Some("plain_text") => params.plain_bonus,
        _ => 0.0,
    };

    if let Some(density) = number(metadata, "content_density").filter(|d| *d > 0.0) {
        score += (density * params.density_scale).min(params.density_cap);
    }

    let position = number(metadata, "chunk_position_ratio").unwrap_or(0.5);
    if position <= params.early_position_ratio {
        score += params.early_position_bonus;
    } else if position <= params.middle_position_ratio {
        score += params.middle_position_bonus;
    }

    let words = number(metadata, "word_count").unwrap_or(0.0);
    if (params.optimal_words_min..=params.optimal_words_max).contains(&words) {
        score += params.optimal_words_bonus;
    } else if (params.near_optimal_words_min..params.optimal_words_min).contains(&words)
        || (words > params.optimal_words_max && words <= params.near_optimal_words_max)
    {
        score += params.near_optimal_words_bonus;
    }

    if flag(metadata, "is_first_chunk") {
        score += params.first_chunk_bonus;
    }
    if flag(metadata, "is_first_page") {
        score += params.first_page_bonus;
    }

    score.clamp(0.0, 1.0)
}

// ============ Recency ============

/// Accepts RFC 3339, naive ISO date-times (read as UTC) and plain dates
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn timestamp(metadata: &Map<String, Value>, key: &str) -> Option<DateTime<Utc>> {
    metadata.get(key).and_then(Value::as_str).and_then(parse_timestamp)
}

/// Age-bracketed freshness from modification and ingestion times.
/// Documents with neither timestamp get [`NEUTRAL_RECENCY`].
pub fn recency_score(metadata: &Map<String, Value>, now: DateTime<Utc>) -> f64 {
    let modified = timestamp(metadata, "file_modified_timestamp");
    let ingested = timestamp(metadata, "ingestion_timestamp");

    if modified.is_none() && ingested.is_none() {
        return NEUTRAL_RECENCY;
    }

    let mut score = 0.0;

    if let Some(modified) = modified {
        score += match (now - modified).num_days() {
            d if d <= 7 => 0.5,
            d if d <= 30 => 0.3,
            d if d <= 90 => 0.2,
            d if d <= 365 => 0.1,
            _ => 0.0,
        };
    }

    if let Some(ingested) = ingested {
        let hours = (now - ingested).num_seconds() as f64 / 3600.0;
        if hours <= 24.0 {
            score += 0.2;
        } else if hours <= 168.0 {
            score += 0.1;
        }
    }

    score
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn meta(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_semantic_min_max() {
        let scores = semantic_scores(&[0.2, 0.6, 0.4]);
        assert_eq!(scores, vec![0.0, 1.0, 0.5]);
    }

    #[test]
    fn test_semantic_equal_scores() {
        assert_eq!(semantic_scores(&[0.55, 0.55]), vec![1.0, 1.0]);
    }

    #[test]
    fn test_quality_formatted_first_chunk() {
        let metadata = meta(json!({
            "document_type": "formatted_document",
            "content_density": 0.15,
            "chunk_position_ratio": 0.0,
            "word_count": 400,
            "is_first_chunk": true,
            "is_first_page": true
        }));
        // 0.3 + min(0.75, 0.3) + 0.2 + 0.1 + 0.1 + 0.1 = 1.1, clamped
        assert_eq!(quality_score(&metadata, &QualityParams::default()), 1.0);
    }

    #[test]
    fn test_quality_defaults_without_metadata() {
        // Default position 0.5 earns the middle bonus only
        let score = quality_score(&Map::new(), &QualityParams::default());
        assert!((score - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_quality_word_brackets() {
        let params = QualityParams::default();
        let near = quality_score(&meta(json!({"word_count": 60, "chunk_position_ratio": 0.9})), &params);
        let long = quality_score(&meta(json!({"word_count": 1500, "chunk_position_ratio": 0.9})), &params);
        let huge = quality_score(&meta(json!({"word_count": 5000, "chunk_position_ratio": 0.9})), &params);

        assert!((near - 0.05).abs() < 1e-9);
        assert!((long - 0.05).abs() < 1e-9);
        assert_eq!(huge, 0.0);
    }

    #[test]
    fn test_recency_brackets() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let fresh = meta(json!({
            "file_modified_timestamp": (now - Duration::days(3)).to_rfc3339(),
            "ingestion_timestamp": (now - Duration::hours(2)).to_rfc3339()
        }));
        assert!((recency_score(&fresh, now) - 0.7).abs() < 1e-9);

        let quarter = meta(json!({"file_modified_timestamp": "2025-03-15T08:00:00"}));
        assert!((recency_score(&quarter, now) - 0.2).abs() < 1e-9);

        let week_old_ingest = meta(json!({"ingestion_timestamp": "2025-05-28"}));
        assert!((recency_score(&week_old_ingest, now) - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_recency_stale_document_scores_zero() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let stale = meta(json!({"file_modified_timestamp": "2022-01-01"}));
        assert_eq!(recency_score(&stale, now), 0.0);
    }

    #[test]
    fn test_recency_neutral_when_unparseable() {
        let now = Utc::now();
        let garbage = meta(json!({"file_modified_timestamp": "last tuesday"}));
        assert_eq!(recency_score(&garbage, now), NEUTRAL_RECENCY);
        assert_eq!(recency_score(&Map::new(), now), NEUTRAL_RECENCY);
    }
}
