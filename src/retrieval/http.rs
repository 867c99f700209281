//! Remote vector store over HTTP
//!
//! Posts the query and the tenant/role filter document to
//! `<base_url>/search` and expects `{"results": [{content, metadata, score?}]}`.

use super::{RetrievalBatch, RetrievalRequest, Retriever, SearchType};
use crate::error::OrchestrationError;
use crate::models::RetrievedDocument;
use crate::Result;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct HttpRetriever {
    client: Client,
    base_url: String,
    diversity_lambda: f64,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    content: String,
    #[serde(default)]
    metadata: Map<String, Value>,
    #[serde(default)]
    score: Option<f64>,
}

impl HttpRetriever {
    pub fn new(base_url: &str, timeout: Duration, diversity_lambda: f64) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            diversity_lambda,
        })
    }

    fn body(&self, request: &RetrievalRequest, with_scores: bool) -> Value {
        let mut body = json!({
            "query": request.query,
            "k": request.k,
            "search_type": request.search_type,
            "with_scores": with_scores,
            "filter": request.filter.to_json(),
        });
        if request.search_type == SearchType::Mmr {
            body["lambda_mult"] = json!(self.diversity_lambda);
        }
        body
    }

    async fn search(&self, request: &RetrievalRequest, with_scores: bool) -> Result<Vec<SearchHit>> {
        let url = format!("{}/search", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&self.body(request, with_scores))
            .send()
            .await
            .map_err(|e| OrchestrationError::RetrievalError(format!("Vector store request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(OrchestrationError::RetrievalError(format!(
                "Vector store returned {}: {}",
                status, text
            )));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| OrchestrationError::RetrievalError(format!("Invalid search response: {}", e)))?;

        debug!(
            query = %request.query,
            tenant_id = %request.filter.tenant_id,
            hits = parsed.results.len(),
            "Vector store search"
        );
        Ok(parsed.results)
    }
}

#[async_trait::async_trait]
impl Retriever for HttpRetriever {
    async fn retrieve_with_scores(&self, request: &RetrievalRequest) -> Result<RetrievalBatch> {
        let hits = self.search(request, true).await?;

        let scores: Option<Vec<f64>> = match request.search_type {
            SearchType::Mmr => Some(vec![crate::scoring::NEUTRAL_SEMANTIC; hits.len()]),
            SearchType::Similarity => hits.iter().map(|h| h.score).collect(),
        };
        if scores.is_none() && !hits.is_empty() {
            warn!("Vector store omitted relevance scores");
        }

        let documents = hits
            .into_iter()
            .map(|h| RetrievedDocument::new(h.content, h.metadata))
            .collect();

        Ok(RetrievalBatch { documents, scores })
    }

    async fn retrieve(&self, request: &RetrievalRequest) -> Result<Vec<RetrievedDocument>> {
        let hits = self.search(request, false).await?;
        Ok(hits
            .into_iter()
            .map(|h| RetrievedDocument::new(h.content, h.metadata))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::AccessFilter;

    #[test]
    fn test_request_body() {
        let retriever = HttpRetriever::new("http://vectors:8000/", Duration::from_secs(5), 0.4).unwrap();
        let request = RetrievalRequest::new("card dispute", AccessFilter::new("acme", "customer"), 4)
            .with_search_type(SearchType::Mmr);

        let body = retriever.body(&request, true);
        assert_eq!(body["k"], 4);
        assert_eq!(body["search_type"], "mmr");
        assert_eq!(body["lambda_mult"], 0.4);
        assert_eq!(body["filter"]["$and"][0]["tenant_id"], "acme");
        assert_eq!(retriever.base_url, "http://vectors:8000");
    }

    #[test]
    fn test_search_response_parsing() {
        let raw = json!({
            "results": [
                {"content": "Chargebacks take 45 days", "metadata": {"source": "cards.pdf"}, "score": 0.81},
                {"content": "Dispute form", "metadata": {}}
            ]
        });
        let parsed: SearchResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.results.len(), 2);
        assert_eq!(parsed.results[0].score, Some(0.81));
        assert_eq!(parsed.results[1].score, None);
    }

    #[tokio::test]
    async fn test_unreachable_store_is_retrieval_error() {
        let retriever = HttpRetriever::new("http://127.0.0.1:9", Duration::from_millis(500), 0.5).unwrap();
        let request = RetrievalRequest::new("refund", AccessFilter::new("acme", "customer"), 2);

        let result = retriever.retrieve_with_scores(&request).await;
        assert!(matches!(result, Err(OrchestrationError::RetrievalError(_))));
    }
}
