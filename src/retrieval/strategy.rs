//! Single-query vs multi-aspect retrieval
//!
//! One aspect (or none) means one call for the whole `k`. Several aspects
//! fan out into one call per aspect, each asking for `k / M + 1`
//! documents with the aspect appended to the original query. Results are
//! unioned in aspect order and ranked by the scoring engine against the
//! original query.

use super::{AccessFilter, RetrievalBatch, RetrievalRequest, Retriever, SearchType};
use crate::config::AppConfig;
use crate::error::with_timeout;
use crate::models::{KnowledgeDocument, QueryContext, RetrievedDocument};
use crate::scoring::{ScoringEngine, NEUTRAL_SEMANTIC};
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// One retrieval call the strategy will issue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedCall {
    pub query: String,
    pub k: usize,
}

#[derive(Clone)]
pub struct RetrievalStrategy {
    retriever: Arc<dyn Retriever>,
    engine: ScoringEngine,
    k: usize,
    search_type: SearchType,
    timeout: Duration,
}

impl RetrievalStrategy {
    pub fn new(retriever: Arc<dyn Retriever>, engine: ScoringEngine, k: usize) -> Self {
        Self {
            retriever,
            engine,
            k,
            search_type: SearchType::Similarity,
            timeout: Duration::from_secs(15),
        }
    }

    pub fn from_config(retriever: Arc<dyn Retriever>, config: &AppConfig) -> Self {
        let engine = ScoringEngine::from_config(&config.scoring, &config.retrieval);
        Self::new(retriever, engine, config.retrieval.k)
            .with_search_type(config.retrieval.search_type)
            .with_timeout(config.retrieval.timeout())
    }

    pub fn with_search_type(mut self, search_type: SearchType) -> Self {
        self.search_type = search_type;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Calls to issue for `query` and its aspects
    pub fn plan(query: &str, aspects: &[String], k: usize) -> Vec<PlannedCall> {
        match aspects {
            [] => vec![PlannedCall {
                query: query.to_string(),
                k,
            }],
            [only] => vec![PlannedCall {
                query: only.clone(),
                k,
            }],
            many => {
                let per_aspect = k / many.len() + 1;
                many.iter()
                    .map(|aspect| PlannedCall {
                        query: format!("{} {}", query, aspect),
                        k: per_aspect,
                    })
                    .collect()
            }
        }
    }

    /// Retrieve and rank knowledge for the request. Never fails: retrieval
    /// problems degrade to fewer (or no) documents.
    pub async fn gather(&self, ctx: &QueryContext, aspects: &[String]) -> Vec<KnowledgeDocument> {
        let filter = AccessFilter::from(ctx);
        let calls = Self::plan(&ctx.query, aspects, self.k);

        info!(
            tenant_id = %ctx.tenant_id,
            user_role = %ctx.user_role,
            calls = calls.len(),
            "Retrieving knowledge"
        );

        let (documents, scores) = if calls.len() == 1 {
            self.single(&calls[0], filter).await
        } else {
            self.fan_out(calls, filter).await
        };

        let packed = self
            .engine
            .score_and_pack(&ctx.query, &documents, scores.as_deref());
        info!(
            candidates = documents.len(),
            returned = packed.len(),
            "Knowledge ranked"
        );
        packed
    }

    fn request(&self, call: &PlannedCall, filter: AccessFilter) -> RetrievalRequest {
        RetrievalRequest::new(call.query.clone(), filter, call.k).with_search_type(self.search_type)
    }

    async fn single(
        &self,
        call: &PlannedCall,
        filter: AccessFilter,
    ) -> (Vec<RetrievedDocument>, Option<Vec<f64>>) {
        let request = self.request(call, filter);

        let scored = with_timeout(
            self.timeout,
            "retrieval",
            self.retriever.retrieve_with_scores(&request),
        )
        .await;

        match scored {
            Ok(batch) => (batch.documents, batch.scores),
            Err(e) => {
                warn!(error = %e, "Scored retrieval failed, retrying without scores");
                let plain = with_timeout(self.timeout, "retrieval", self.retriever.retrieve(&request)).await;
                match plain {
                    Ok(documents) => {
                        let scores = vec![NEUTRAL_SEMANTIC; documents.len()];
                        (documents, Some(scores))
                    }
                    Err(e) => {
                        warn!(error = %e, "Plain retrieval failed, continuing without documents");
                        (Vec::new(), None)
                    }
                }
            }
        }
    }

    async fn fan_out(
        &self,
        calls: Vec<PlannedCall>,
        filter: AccessFilter,
    ) -> (Vec<RetrievedDocument>, Option<Vec<f64>>) {
        let mut tasks = JoinSet::new();
        for (index, call) in calls.iter().enumerate() {
            let retriever = Arc::clone(&self.retriever);
            let request = self.request(call, filter.clone());
            let limit = self.timeout;
            tasks.spawn(async move {
                let result = with_timeout(limit, "aspect retrieval", retriever.retrieve_with_scores(&request)).await;
                (index, request.query, result)
            });
        }

        let mut batches: Vec<Option<RetrievalBatch>> = vec![None; calls.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, _, Ok(batch))) => {
                    debug!(aspect = index, documents = batch.documents.len(), "Aspect retrieved");
                    batches[index] = Some(batch);
                }
                Ok((index, query, Err(e))) => {
                    warn!(aspect = index, query = %query, error = %e, "Aspect retrieval failed, skipping");
                }
                Err(e) => {
                    warn!(error = %e, "Aspect retrieval task aborted");
                }
            }
        }

        union(batches.into_iter().flatten())
    }
}

/// Concatenate batches, filling missing scores with the neutral raw value
fn union<I>(batches: I) -> (Vec<RetrievedDocument>, Option<Vec<f64>>)
where
    I: IntoIterator<Item = RetrievalBatch>,
{
    let mut documents = Vec::new();
    let mut scores = Vec::new();

    for batch in batches {
        match batch.scores {
            Some(batch_scores) if batch_scores.len() == batch.documents.len() => {
                scores.extend(batch_scores)
            }
            _ => scores.extend(std::iter::repeat(NEUTRAL_SEMANTIC).take(batch.documents.len())),
        }
        documents.extend(batch.documents);
    }

    (documents, Some(scores))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{kb_chunk, sample_knowledge_base, RecordingRetriever};

    fn ctx(query: &str) -> QueryContext {
        QueryContext::new(query, "acme", "customer")
    }

    fn aspects(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_plan_single_and_empty() {
        let calls = RetrievalStrategy::plan("refund status", &[], 6);
        assert_eq!(calls, vec![PlannedCall { query: "refund status".into(), k: 6 }]);

        let calls = RetrievalStrategy::plan("refund status", &aspects(&["refund timeline"]), 6);
        assert_eq!(calls, vec![PlannedCall { query: "refund timeline".into(), k: 6 }]);
    }

    #[test]
    fn test_plan_fan_out_keeps_query_context() {
        let calls = RetrievalStrategy::plan("cancel plan", &aspects(&["a", "b", "c", "d", "e", "f", "g"]), 6);
        assert_eq!(calls.len(), 7);
        assert!(calls.iter().all(|c| c.k == 1));
        assert_eq!(calls[0].query, "cancel plan a");
    }

    #[tokio::test]
    async fn test_two_aspects_issue_two_calls_of_four() {
        let retriever = Arc::new(RecordingRetriever::new(sample_knowledge_base()));
        let strategy = RetrievalStrategy::new(retriever.clone(), ScoringEngine::default(), 6);

        let docs = strategy
            .gather(
                &ctx("I want to cancel my policy"),
                &aspects(&["payment policies", "cancellation fees"]),
            )
            .await;

        let requests = retriever.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|r| r.k == 4));
        assert!(requests.iter().all(|r| r.filter.tenant_id == "acme"));
        assert!(requests
            .iter()
            .any(|r| r.query == "I want to cancel my policy payment policies"));
        // Both aspects return the same chunks; dedup keeps one copy each
        assert!(!docs.is_empty());
        let sources: std::collections::HashSet<&str> = docs.iter().map(|d| d.source.as_str()).collect();
        assert_eq!(sources.len(), docs.len());
    }

    #[tokio::test]
    async fn test_failed_aspect_is_skipped() {
        let retriever = Arc::new(RecordingRetriever::new(sample_knowledge_base()).failing_on("fees"));
        let strategy = RetrievalStrategy::new(retriever.clone(), ScoringEngine::default(), 6);

        let docs = strategy
            .gather(&ctx("cancel"), &aspects(&["refund timeline", "cancellation fees"]))
            .await;

        assert_eq!(retriever.requests().len(), 2);
        assert!(!docs.is_empty());
    }

    #[tokio::test]
    async fn test_single_call_falls_back_to_plain_path() {
        let retriever = Arc::new(RecordingRetriever::new(sample_knowledge_base()).without_scores());
        let strategy = RetrievalStrategy::new(retriever.clone(), ScoringEngine::default(), 6);

        let docs = strategy.gather(&ctx("refund for cancelled policy"), &[]).await;

        assert_eq!(retriever.requests().len(), 2);
        assert!(!docs.is_empty());
        assert!(docs.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn test_plain_path_scores_match_fan_out_fill() {
        let retriever = Arc::new(RecordingRetriever::new(sample_knowledge_base()).without_scores());
        let strategy = RetrievalStrategy::new(retriever, ScoringEngine::default(), 6);
        let call = PlannedCall { query: "refund".into(), k: 6 };

        let (documents, scores) = strategy.single(&call, AccessFilter::new("acme", "customer")).await;

        assert_eq!(documents.len(), 3);
        assert_eq!(scores, Some(vec![NEUTRAL_SEMANTIC; 3]));
    }

    #[tokio::test]
    async fn test_total_failure_yields_no_documents() {
        let retriever = Arc::new(RecordingRetriever::new(sample_knowledge_base()).failing_on("refund"));
        let strategy = RetrievalStrategy::new(retriever, ScoringEngine::default(), 6);

        let docs = strategy.gather(&ctx("refund"), &[]).await;
        assert!(docs.is_empty());
    }

    #[test]
    fn test_union_fills_missing_scores() {
        let scored = RetrievalBatch::scored(vec![kb_chunk("a", "a.pdf", 0)], vec![0.4]);
        let unscored = RetrievalBatch::unscored(vec![kb_chunk("b", "b.pdf", 0), kb_chunk("c", "c.pdf", 0)]);

        let (documents, scores) = union(vec![scored, unscored]);
        assert_eq!(documents.len(), 3);
        assert_eq!(scores, Some(vec![0.4, NEUTRAL_SEMANTIC, NEUTRAL_SEMANTIC]));
    }
}
