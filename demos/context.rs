//! Instructions derived from caller-owned context.
//!
//! Usage: `cargo run --example context -- pirate`

use std::str::FromStr;

use agents_runtime::{Agent, OpenAIOracle, OracleConfig, RunContext, Runner};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy)]
enum Style {
    Haiku,
    Pirate,
    Robot,
}

impl FromStr for Style {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "haiku" => Ok(Style::Haiku),
            "pirate" => Ok(Style::Pirate),
            "robot" => Ok(Style::Robot),
            other => Err(format!("unknown style `{other}`, expected haiku, pirate or robot")),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let style: Style = std::env::args()
        .nth(1)
        .as_deref()
        .unwrap_or("haiku")
        .parse()?;

    let agent: Agent<Style> = Agent::builder("Style Agent")
        .instructions_fn(|ctx: &RunContext<Style>, _agent: &Agent<Style>| {
            let style = match ctx.read(|s| *s) {
                Style::Haiku => "haiku",
                Style::Pirate => "pirate",
                Style::Robot => "robot",
            };
            format!("Respond in {style} style")
        })
        .model("gpt-4o-mini")
        .build()?;

    let result = Runner::new(OpenAIOracle::new(OracleConfig::from_env()))
        .run_agent(agent, "Write a poem about carrot", RunContext::new(style))
        .await?;
    println!("{}", result.final_output_text());
    Ok(())
}
