//! Multi-signal document scoring
//!
//! Combines semantic similarity, TF-IDF keyword overlap, metadata quality
//! and recency into one score per retrieved chunk, then filters, dedupes
//! and caps the ranked list.
//!
//! Scoring is a pure function of its inputs (plus an explicit `now`), so
//! one engine can be shared across concurrent requests.

pub mod keyword;
pub mod signals;

pub use signals::{QualityParams, NEUTRAL_RECENCY, NEUTRAL_SEMANTIC};

use crate::config::{RetrievalConfig, ScoringConfig};
use crate::error::OrchestrationError;
use crate::models::{KnowledgeDocument, RetrievedDocument};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, error, info, warn};

const WEIGHT_TOLERANCE: f64 = 0.01;

/// Relative weight of each signal in the combined score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub semantic: f64,
    pub keyword: f64,
    pub quality: f64,
    pub recency: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            semantic: 0.4,
            keyword: 0.3,
            quality: 0.2,
            recency: 0.1,
        }
    }
}

impl ScoringWeights {
    pub fn sum(&self) -> f64 {
        self.semantic + self.keyword + self.quality + self.recency
    }

    /// Rescale so the weights sum to 1.0. Returns the weights to use and
    /// whether they were adjusted. Negative weights count as zero; a
    /// non-positive or non-finite total falls back to the defaults.
    pub fn normalized(&self) -> (Self, bool) {
        let clamped = Self {
            semantic: self.semantic.max(0.0),
            keyword: self.keyword.max(0.0),
            quality: self.quality.max(0.0),
            recency: self.recency.max(0.0),
        };
        let total = clamped.sum();

        if !total.is_finite() || total <= 0.0 {
            return (Self::default(), true);
        }
        if (total - 1.0).abs() <= WEIGHT_TOLERANCE && clamped == *self {
            return (*self, false);
        }

        (
            Self {
                semantic: clamped.semantic / total,
                keyword: clamped.keyword / total,
                quality: clamped.quality / total,
                recency: clamped.recency / total,
            },
            true,
        )
    }
}

/// Individual signals and their weighted combination
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub semantic: f64,
    pub keyword: f64,
    pub quality: f64,
    pub recency: f64,
    pub combined: f64,
}

/// A candidate with its scores, internal to the ranking step
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDocument {
    pub document: RetrievedDocument,
    pub breakdown: ScoreBreakdown,
}

impl ScoredDocument {
    pub fn score(&self) -> f64 {
        self.breakdown.combined
    }

    pub fn source(&self) -> Option<&str> {
        self.document.metadata.get("source").and_then(Value::as_str)
    }

    /// Dedup key: (source, chunk index), defaulting to ("", 0). The index
    /// is keyed on its stored value; integral floats match their integer.
    pub fn dedup_key(&self) -> (String, String) {
        let chunk_index = match self.document.metadata.get("chunk_index") {
            None | Some(Value::Null) => "0".to_string(),
            Some(Value::Number(n)) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => i.to_string(),
                (None, Some(f)) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                    (f as i64).to_string()
                }
                _ => n.to_string(),
            },
            Some(other) => other.to_string(),
        };
        (self.source().unwrap_or("").to_string(), chunk_index)
    }

    fn into_knowledge(self) -> KnowledgeDocument {
        let source = self.source().unwrap_or("unknown").to_string();
        KnowledgeDocument {
            content: self.document.content,
            score: self.breakdown.combined,
            source,
            metadata: self.document.metadata,
        }
    }
}

/// Keep documents scoring at or above `threshold`, preserving order
pub fn filter_by_threshold(scored: Vec<ScoredDocument>, threshold: f64) -> Vec<ScoredDocument> {
    let before = scored.len();
    let kept: Vec<ScoredDocument> = scored.into_iter().filter(|d| d.score() >= threshold).collect();
    debug!(before, after = kept.len(), threshold, "Threshold filter applied");
    kept
}

/// First occurrence per (source, chunk index) wins; order is preserved
pub fn dedupe(scored: Vec<ScoredDocument>) -> Vec<ScoredDocument> {
    let mut seen = HashSet::with_capacity(scored.len());
    scored
        .into_iter()
        .filter(|d| seen.insert(d.dedup_key()))
        .collect()
}

/// Ranks retrieved chunks for a query
#[derive(Debug, Clone)]
pub struct ScoringEngine {
    weights: ScoringWeights,
    quality: QualityParams,
    max_features: usize,
    threshold: f64,
    max_results: usize,
}

impl Default for ScoringEngine {
    fn default() -> Self {
        Self::new(ScoringWeights::default(), QualityParams::default())
    }
}

impl ScoringEngine {
    pub fn new(weights: ScoringWeights, quality: QualityParams) -> Self {
        let (weights, adjusted) = weights.normalized();
        if adjusted {
            warn!(
                semantic = weights.semantic,
                keyword = weights.keyword,
                quality = weights.quality,
                recency = weights.recency,
                "Scoring weights did not sum to 1.0, normalized"
            );
        }

        Self {
            weights,
            quality,
            max_features: 1000,
            threshold: 0.25,
            max_results: 8,
        }
    }

    pub fn from_config(scoring: &ScoringConfig, retrieval: &RetrievalConfig) -> Self {
        Self::new(scoring.weights, scoring.quality.clone())
            .with_max_features(scoring.max_features)
            .with_threshold(retrieval.threshold)
            .with_max_results(retrieval.max_results)
    }

    pub fn with_max_features(mut self, max_features: usize) -> Self {
        self.max_features = max_features;
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    /// Effective (normalized) weights
    pub fn weights(&self) -> ScoringWeights {
        self.weights
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Score every candidate and sort by combined score, highest first.
    /// Equal scores keep their input order.
    pub fn rank(
        &self,
        query: &str,
        documents: &[RetrievedDocument],
        raw_scores: Option<&[f64]>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScoredDocument>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let semantic = match raw_scores {
            Some(raw) if raw.len() == documents.len() && !raw.is_empty() => {
                if let Some(bad) = raw.iter().find(|s| !s.is_finite()) {
                    return Err(OrchestrationError::ScoringError(format!(
                        "non-finite similarity score: {}",
                        bad
                    )));
                }
                signals::semantic_scores(raw)
            }
            Some(raw) if !raw.is_empty() => {
                warn!(
                    documents = documents.len(),
                    scores = raw.len(),
                    "Mismatched similarity scores, using neutral semantic signal"
                );
                vec![NEUTRAL_SEMANTIC; documents.len()]
            }
            _ => {
                debug!("No similarity scores supplied, using neutral semantic signal");
                vec![NEUTRAL_SEMANTIC; documents.len()]
            }
        };

        let contents: Vec<&str> = documents.iter().map(|d| d.content.as_str()).collect();
        let keyword = keyword::keyword_scores(query, &contents, self.max_features);

        let mut scored = Vec::with_capacity(documents.len());
        for (i, document) in documents.iter().enumerate() {
            let quality = signals::quality_score(&document.metadata, &self.quality);
            let recency = signals::recency_score(&document.metadata, now);

            let combined = self.weights.semantic * semantic[i]
                + self.weights.keyword * keyword[i]
                + self.weights.quality * quality
                + self.weights.recency * recency;

            if !combined.is_finite() {
                return Err(OrchestrationError::ScoringError(format!(
                    "non-finite combined score for candidate {}",
                    i
                )));
            }

            let breakdown = ScoreBreakdown {
                semantic: semantic[i],
                keyword: keyword[i],
                quality,
                recency,
                combined: combined.clamp(0.0, 1.0),
            };
            debug!(
                doc = i,
                semantic = breakdown.semantic,
                keyword = breakdown.keyword,
                quality = breakdown.quality,
                recency = breakdown.recency,
                combined = breakdown.combined,
                "Document scored"
            );

            scored.push(ScoredDocument {
                document: document.clone(),
                breakdown,
            });
        }

        scored.sort_by(|a, b| b.score().total_cmp(&a.score()));
        Ok(scored)
    }

    /// Rank, threshold, dedupe and cap, evaluated at the current time
    pub fn score_and_pack(
        &self,
        query: &str,
        documents: &[RetrievedDocument],
        raw_scores: Option<&[f64]>,
    ) -> Vec<KnowledgeDocument> {
        self.score_and_pack_at(query, documents, raw_scores, Utc::now())
    }

    /// Rank, threshold, dedupe and cap. Any scoring failure is logged and
    /// yields an empty list.
    pub fn score_and_pack_at(
        &self,
        query: &str,
        documents: &[RetrievedDocument],
        raw_scores: Option<&[f64]>,
        now: DateTime<Utc>,
    ) -> Vec<KnowledgeDocument> {
        if documents.is_empty() {
            debug!("No documents to score");
            return Vec::new();
        }

        let ranked = match self.rank(query, documents, raw_scores, now) {
            Ok(ranked) => ranked,
            Err(e) => {
                error!(error = %e, "Scoring failed, returning no documents");
                return Vec::new();
            }
        };

        let filtered = filter_by_threshold(ranked, self.threshold);
        if filtered.is_empty() {
            info!(threshold = self.threshold, "No documents above threshold");
            return Vec::new();
        }

        let mut unique = dedupe(filtered);
        unique.truncate(self.max_results);

        let packed: Vec<KnowledgeDocument> =
            unique.into_iter().map(ScoredDocument::into_knowledge).collect();

        info!(
            candidates = documents.len(),
            packed = packed.len(),
            threshold = self.threshold,
            max_results = self.max_results,
            "Documents scored and packed"
        );
        packed
    }
}
