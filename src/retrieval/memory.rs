//! In-process retriever
//!
//! Holds chunks in memory and ranks them by cosine similarity of term
//! count vectors. Used for development, the demo binary and tests.

use super::{RetrievalBatch, RetrievalRequest, Retriever, SearchType};
use crate::models::RetrievedDocument;
use crate::scoring::keyword::tokenize;
use crate::scoring::NEUTRAL_SEMANTIC;
use crate::Result;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

pub struct InMemoryRetriever {
    documents: Vec<RetrievedDocument>,
    vectors: Vec<HashMap<String, f64>>,
    diversity_lambda: f64,
}

impl InMemoryRetriever {
    pub fn new(documents: Vec<RetrievedDocument>) -> Self {
        let vectors = documents.iter().map(|d| term_vector(&d.content)).collect();
        Self {
            documents,
            vectors,
            diversity_lambda: 0.5,
        }
    }

    /// Relevance/diversity trade-off for MMR (1.0 = pure relevance)
    pub fn with_diversity_lambda(mut self, lambda: f64) -> Self {
        self.diversity_lambda = lambda.clamp(0.0, 1.0);
        self
    }

    /// Load chunks from a JSON array of `{content, metadata}` objects
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let documents: Vec<RetrievedDocument> = serde_json::from_str(&contents)?;
        info!(
            path = %path.as_ref().display(),
            documents = documents.len(),
            "Knowledge base loaded"
        );
        Ok(Self::new(documents))
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Permitted candidates with their similarity to the query, best first
    fn similarity_ranked(&self, request: &RetrievalRequest) -> Vec<(usize, f64)> {
        let query = term_vector(&request.query);

        let mut ranked: Vec<(usize, f64)> = self
            .documents
            .iter()
            .enumerate()
            .filter(|(_, doc)| request.filter.permits(&doc.metadata))
            .map(|(i, _)| (i, cosine(&query, &self.vectors[i])))
            .collect();

        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
    }

    /// Greedy maximal marginal relevance selection
    fn mmr_select(&self, candidates: &[(usize, f64)], k: usize) -> Vec<usize> {
        let mut selected: Vec<usize> = Vec::with_capacity(k);
        let mut remaining: Vec<(usize, f64)> = candidates.to_vec();

        while selected.len() < k && !remaining.is_empty() {
            let mut best = 0;
            let mut best_value = f64::NEG_INFINITY;

            for (pos, (index, relevance)) in remaining.iter().enumerate() {
                let redundancy = selected
                    .iter()
                    .map(|s| cosine(&self.vectors[*index], &self.vectors[*s]))
                    .fold(0.0_f64, f64::max);
                let value =
                    self.diversity_lambda * relevance - (1.0 - self.diversity_lambda) * redundancy;
                if value > best_value {
                    best_value = value;
                    best = pos;
                }
            }

            selected.push(remaining.remove(best).0);
        }
        selected
    }
}

#[async_trait::async_trait]
impl Retriever for InMemoryRetriever {
    async fn retrieve_with_scores(&self, request: &RetrievalRequest) -> Result<RetrievalBatch> {
        let ranked = self.similarity_ranked(request);

        let batch = match request.search_type {
            SearchType::Similarity => {
                let top: Vec<(usize, f64)> = ranked.into_iter().take(request.k).collect();
                RetrievalBatch::scored(
                    top.iter().map(|(i, _)| self.documents[*i].clone()).collect(),
                    top.iter().map(|(_, s)| *s).collect(),
                )
            }
            SearchType::Mmr => {
                let picked = self.mmr_select(&ranked, request.k);
                let scores = vec![NEUTRAL_SEMANTIC; picked.len()];
                RetrievalBatch::scored(
                    picked.into_iter().map(|i| self.documents[i].clone()).collect(),
                    scores,
                )
            }
        };

        debug!(
            query = %request.query,
            tenant_id = %request.filter.tenant_id,
            returned = batch.documents.len(),
            "In-memory retrieval"
        );
        Ok(batch)
    }

    async fn retrieve(&self, request: &RetrievalRequest) -> Result<Vec<RetrievedDocument>> {
        Ok(self.retrieve_with_scores(request).await?.documents)
    }
}

fn term_vector(text: &str) -> HashMap<String, f64> {
    let mut counts = HashMap::new();
    for token in tokenize(text) {
        *counts.entry(token).or_insert(0.0) += 1.0;
    }
    counts
}

fn cosine(a: &HashMap<String, f64>, b: &HashMap<String, f64>) -> f64 {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let dot: f64 = small
        .iter()
        .filter_map(|(term, x)| large.get(term).map(|y| x * y))
        .sum();

    let norm_a = a.values().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.values().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}
