//! Scope boundary for non-BFSI queries

use crate::state::StateUpdate;
use tracing::info;

pub const OUT_OF_SCOPE_MESSAGE: &str = "I'm sorry, but your query appears to be outside the scope of BFSI (Banking, Financial Services, Insurance) services. I can only assist with questions related to insurance policies, claims, banking services, loans, credit cards, investments, and other financial products. Please try again with a query related to these topics.";

pub fn out_of_scope_update() -> StateUpdate {
    info!("Query outside BFSI scope");
    StateUpdate {
        final_answer: Some(OUT_OF_SCOPE_MESSAGE.to_string()),
        ..StateUpdate::default()
    }
}
