//! End-to-end demo: match a prompt against the template catalog, run the
//! matched app with in-memory stores and an echoing AI client, and print
//! the run record.
//!
//! Usage: `microapp-demo [prompt]`

use std::sync::Arc;

use microapp::{matcher, EchoAiClient, OrchestratorBuilder, RunScope};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let prompt = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "help me split the bill with a tip".to_string());

    let Some(template) = matcher::find_matching_template(&prompt) else {
        println!("No catalog template matched {prompt:?}; a generator call would be needed.");
        return Ok(());
    };
    println!(
        "Matched template: {} ({})",
        template.name, template.description
    );

    let app = matcher::template_to_app_config(template);
    let orchestrator = OrchestratorBuilder::new(Arc::new(EchoAiClient)).build();
    let scope = RunScope::new("demo-app", "demo-user");

    let inputs = match template.id {
        "tip-calculator" => json!({"amount": "84.50", "percent": 20, "people": 3}),
        "text-summarizer" => json!({"text": "A long article about micro apps."}),
        "expense-tracker" => json!({"amount": "12.80", "category": "food", "note": "lunch"}),
        _ => json!({"text": "one two three"}),
    };
    println!("Inputs: {inputs}");

    let response = orchestrator.run(&app, &scope, inputs).await;
    println!(
        "Run {} finished in {} ms (success: {})",
        response.run_id, response.duration_ms, response.success
    );
    match response.error {
        Some(error) => println!("Error: {error}"),
        None => println!("Outputs: {}", serde_json::to_string_pretty(&response.outputs)?),
    }

    for record in orchestrator.run_history("demo-app", 5).await {
        println!(
            "History: {:?} via {} at {}",
            record.status, record.engine, record.created_at
        );
    }
    Ok(())
}
