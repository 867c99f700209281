//! Workflow stages
//!
//! Each stage reads the shared state and returns a `StateUpdate`. Model
//! calls are attempted through a `Result`-returning method; on failure
//! the stage logs and substitutes the output of a pure fallback function,
//! so no stage ever fails the run.

pub mod answer;
pub mod intent;
pub mod report;
pub mod scope;
pub mod verify;

pub use answer::AnswerStage;
pub use intent::IntentStage;
pub use report::ReportStage;
pub use scope::{out_of_scope_update, OUT_OF_SCOPE_MESSAGE};
pub use verify::VerifyStage;

use crate::models::KnowledgeDocument;

pub(crate) const NO_DOCUMENTS: &str = "No relevant documents found in knowledge base.";

/// Numbered knowledge documents with source file name and relevance
pub fn format_kb_context(docs: &[KnowledgeDocument]) -> String {
    if docs.is_empty() {
        return NO_DOCUMENTS.to_string();
    }

    let mut parts = vec!["=== Knowledge Base Documents ===\n".to_string()];
    for (i, doc) in docs.iter().enumerate() {
        parts.push(format!(
            "\n[Document {}] (Source: {}, Relevance: {:.2})\n{}\n",
            i + 1,
            doc.source_name(),
            doc.score,
            doc.content
        ));
    }
    parts.push("\n=== End of Knowledge Base Documents ===".to_string());
    parts.join("\n")
}
