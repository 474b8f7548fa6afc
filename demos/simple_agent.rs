//! One agent, three ways to run it: blocking, awaited and streamed.
//!
//! Needs `OPENAI_API_KEY`; `OPENAI_MODEL` picks the model.

use std::io::Write;

use agents_runtime::{Agent, AgentGraph, OpenAIOracle, OracleConfig, RunContext, Runner, StreamEvent};
use futures::StreamExt;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let agent: Agent = Agent::builder("Assistant")
        .instructions("You are a helpful assistant")
        .build()?;
    let graph = AgentGraph::single(agent)?;
    let runner = Runner::new(OpenAIOracle::new(OracleConfig::from_env()));

    // Blocking: no async runtime needed.
    let result = runner.run_blocking(&graph, "Assistant", "What is the capital of France?", RunContext::empty())?;
    println!("{}", result.final_output_text());

    tokio::runtime::Runtime::new()?.block_on(async {
        let result = runner
            .run(&graph, "Assistant", "What is the purpose of the universe?", RunContext::empty())
            .await?;
        println!("{}", result.final_output_text());

        let mut run = runner.run_streamed(&graph, "Assistant", "Tell me 3 jokes about a chicken", RunContext::empty());
        while let Some(event) = run.next().await {
            match event {
                StreamEvent::TextDelta { delta, .. } => {
                    print!("{delta}");
                    std::io::stdout().flush()?;
                }
                StreamEvent::RunCompleted(result) => {
                    println!("\n\n{}", result.usage.summary());
                }
                StreamEvent::RunFailed(error) => return Err(error.into()),
                _ => {}
            }
        }
        Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
    })
}
