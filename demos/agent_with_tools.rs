//! Function, hosted and agent tools on one assistant.

use std::sync::Arc;

use agents_runtime::{
    tool_args, Agent, AgentGraph, FunctionTool, HostedService, HostedTool, OpenAIOracle,
    OracleConfig, RunContext, Runner,
};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tower::BoxError;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tool_args]
struct WeatherQuery {
    /// City to get the weather for
    city: String,
}

#[derive(Serialize)]
struct Weather {
    city: String,
    temperature_range: String,
    conditions: String,
}

/// Stand-in search backend returning canned results.
struct CannedSearch;

#[async_trait]
impl HostedService for CannedSearch {
    fn service_name(&self) -> &str {
        "canned-search"
    }

    async fn call(&self, _tool: &str, args: Value) -> Result<Value, BoxError> {
        let query = args["query"].as_str().unwrap_or_default();
        Ok(json!({ "results": [format!("No live results for \"{query}\" in this demo")] }))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let get_weather: FunctionTool = FunctionTool::from_fn(
        "get_weather",
        "Get the weather in a given city",
        |args: WeatherQuery| {
            info!(city = %args.city, "get_weather called");
            Ok(Weather {
                city: args.city,
                temperature_range: "20-25".into(),
                conditions: "sunny".into(),
            })
        },
    );

    let spanish: Agent = Agent::builder("Spanish agent")
        .instructions("You translate the user's message to Spanish")
        .build()?;

    let assistant: Agent = Agent::builder("Assistant")
        .instructions(
            "You are a helpful assistant. Use get_weather for the weather in a city, \
             web_search to look things up and translate_to_spanish to translate the \
             user's message to Spanish.",
        )
        .model("gpt-4o-mini")
        .tool(get_weather)
        .tool(HostedTool::web_search(Arc::new(CannedSearch)))
        .tool(spanish.as_tool("translate_to_spanish", "Translate the user's message to Spanish")?)
        .build()?;

    for spec in assistant.tools().specs() {
        println!("{} ({:?}): {}", spec.name, spec.kind, spec.description);
    }

    let input = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "What's the weather in Tokyo?".to_string());
    let graph = AgentGraph::single(assistant)?;
    let result = Runner::new(OpenAIOracle::new(OracleConfig::from_env()))
        .run(&graph, "Assistant", input, RunContext::empty())
        .await?;
    println!("{}", result.final_output_text());
    Ok(())
}
