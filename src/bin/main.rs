use bfsi_claim_orchestrator::{config::AppConfig, graph::Orchestrator, models::QueryContext};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Run one customer query through the claim workflow.
#[derive(Debug, Parser)]
#[command(name = "orchestrator")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Tenant the query belongs to
    #[arg(long, default_value = "default")]
    tenant: String,

    /// Role of the caller, used for document access
    #[arg(long, default_value = "customer")]
    role: String,

    /// Customer user id handed to the tools
    #[arg(long)]
    user_id: Option<String>,

    /// Customer email handed to the tools
    #[arg(long)]
    email: Option<String>,

    /// The customer's query
    #[arg(required = true)]
    query: Vec<String>,
}

impl Cli {
    fn query_text(&self) -> String {
        self.query.join(" ")
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let query = cli.query_text();
    if query.trim().is_empty() {
        eprintln!("Query must not be empty");
        std::process::exit(2);
    }

    let config = AppConfig::load()?;
    let orchestrator = Orchestrator::from_config(&config)?;

    let ctx = QueryContext::new(query, cli.tenant, cli.role).with_user(cli.user_id, cli.email);
    info!(tenant_id = %ctx.tenant_id, "Running workflow");

    match orchestrator.run(ctx).await {
        Ok(outcome) => {
            println!("\n=== RESULT ===");
            println!("Route: {:?}", outcome.route);
            if let Some(intent) = &outcome.intent {
                println!(
                    "Intent: {} (urgency {}, sentiment {})",
                    intent.intent,
                    intent.urgency.as_str(),
                    intent.sentiment.as_str()
                );
            }
            if let Some(decision) = &outcome.verification {
                println!(
                    "Decision: {} (confidence {:.2}, ticket {})",
                    decision.is_valid, decision.confidence, decision.action_plan.create_ticket
                );
            }
            println!("Documents: {}", outcome.documents.len());
            println!("Audit ID: {}", outcome.audit_id);
            println!("\n{}", outcome.final_answer);
            Ok(())
        }
        Err(e) => {
            eprintln!("Workflow failed: {}", e);
            Err(Box::new(e) as Box<dyn std::error::Error>)
        }
    }
}
