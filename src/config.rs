//! Application configuration
//!
//! Settings come from a TOML file (`BFSI_CONFIG`, default
//! `config/base.toml`). Every section is optional and falls back to its
//! defaults. Secrets and service endpoints are taken from the environment
//! (after `.env` is loaded) and override whatever the file says.

use crate::error::OrchestrationError;
use crate::retrieval::SearchType;
use crate::scoring::{QualityParams, ScoringWeights};
use crate::Result;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

pub const CONFIG_PATH_ENV: &str = "BFSI_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/base.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub model: ModelConfig,
    pub retrieval: RetrievalConfig,
    pub scoring: ScoringConfig,
    pub decision: DecisionConfig,
    pub workflow: WorkflowConfig,
    pub server: ServerConfig,
    pub services: ServicesConfig,
}

/// Language model settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub name: String,
    pub base_url: String,
    /// Never read from the file in practice; `GEMINI_API_KEY` wins
    pub api_key: String,
    pub temperature: f32,
    pub max_output_tokens: i32,
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "gemini-2.5-flash".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta/models".to_string(),
            api_key: String::new(),
            temperature: 0.3,
            max_output_tokens: 2048,
            timeout_secs: 30,
        }
    }
}

impl ModelConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Documents requested per single retrieval call
    pub k: usize,
    pub search_type: SearchType,
    /// MMR relevance/diversity trade-off (1.0 = pure relevance)
    pub diversity_lambda: f64,
    pub threshold: f64,
    pub max_results: usize,
    pub timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: 6,
            search_type: SearchType::Similarity,
            diversity_lambda: 0.5,
            threshold: 0.25,
            max_results: 8,
            timeout_secs: 15,
        }
    }
}

impl RetrievalConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: ScoringWeights,
    pub quality: QualityParams,
    /// Vocabulary cap for the keyword signal
    pub max_features: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            quality: QualityParams::default(),
            max_features: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    pub min_confidence: f64,
    pub max_refund_amount: f64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.7,
            max_refund_amount: 50_000.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// verify ⇄ tools rounds allowed per request
    pub max_tool_rounds: u32,
    /// Hard cap on node visits per request
    pub max_steps: usize,
    pub tool_timeout_secs: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: 3,
            max_steps: 32,
            tool_timeout_secs: 20,
        }
    }
}

impl WorkflowConfig {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// External service endpoints. Absent values select the in-process
/// implementations.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    pub vector_store_url: Option<String>,
    /// JSON chunk file for the in-process retriever
    pub knowledge_base_path: Option<String>,
    pub database_url: Option<String>,
    pub jira: Option<JiraConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct JiraConfig {
    pub base_url: String,
    pub email: String,
    pub api_token: String,
    pub project_key: String,
}

impl AppConfig {
    /// Load from `BFSI_CONFIG` (or the default path) and apply env overrides
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::from_file(&path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file. A missing file yields defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&contents)?;
        info!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| OrchestrationError::ConfigError(e.to_string()))
    }

    /// Overlay environment values. `lookup` abstracts the environment so
    /// the mapping can be exercised without touching process state.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("GEMINI_API_KEY") {
            self.model.api_key = key;
        }
        if let Some(name) = lookup("MODEL_NAME") {
            self.model.name = name;
        }
        if let Some(url) = lookup("VECTOR_STORE_URL") {
            self.services.vector_store_url = Some(url);
        }
        if let Some(path) = lookup("KNOWLEDGE_BASE_PATH") {
            self.services.knowledge_base_path = Some(path);
        }
        if let Some(url) = lookup("DATABASE_URL") {
            self.services.database_url = Some(url);
        }
        if let Some(port) = lookup("PORT")
            .or_else(|| lookup("API_PORT"))
            .and_then(|p| p.parse().ok())
        {
            self.server.port = port;
        }

        if let Some(base_url) = lookup("JIRA_BASE_URL") {
            let jira = self.services.jira.get_or_insert_with(JiraConfig::default);
            jira.base_url = base_url;
        }
        if let Some(jira) = self.services.jira.as_mut() {
            if let Some(email) = lookup("JIRA_EMAIL") {
                jira.email = email;
            }
            if let Some(token) = lookup("JIRA_API_TOKEN") {
                jira.api_token = token;
            }
            if let Some(project) = lookup("JIRA_PROJECT_KEY") {
                jira.project_key = project;
            }
        }
    }

    /// Reject values the workflow cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.retrieval.k == 0 {
            return Err(OrchestrationError::ConfigError("retrieval.k must be positive".to_string()));
        }
        if self.retrieval.max_results == 0 {
            return Err(OrchestrationError::ConfigError(
                "retrieval.max_results must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.decision.min_confidence) {
            return Err(OrchestrationError::ConfigError(
                "decision.min_confidence must lie in [0, 1]".to_string(),
            ));
        }
        if self.workflow.max_steps == 0 {
            return Err(OrchestrationError::ConfigError(
                "workflow.max_steps must be positive".to_string(),
            ));
        }
        if let Some(jira) = &self.services.jira {
            if jira.project_key.is_empty() {
                return Err(OrchestrationError::ConfigError(
                    "services.jira.project_key is required when Jira is configured".to_string(),
                ));
            }
        }
        Ok(())
    }
}
