//! Handoffs versus agents-as-tools, and specialists that hand control back.
//!
//! Usage: `cargo run --example agent_handoffs -- 100`

use agents_runtime::{
    output_type, tool_args, Agent, AgentGraph, FunctionTool, Handoff, HandoffEvent, OpenAIOracle,
    OracleConfig, RunContext, Runner,
};
use rand::Rng;
use tower::BoxError;
use tracing_subscriber::EnvFilter;

#[tool_args]
struct MaxNumber {
    max_number: i64,
}

#[tool_args]
struct Operand {
    x: i64,
}

#[output_type]
struct FinalResult {
    result: i64,
}

fn random_number() -> FunctionTool {
    FunctionTool::from_fn("random_number", "Generate a random number", |args: MaxNumber| {
        Ok(rand::thread_rng().gen_range(0..=args.max_number.max(0)))
    })
}

fn add_one() -> FunctionTool {
    FunctionTool::from_fn("add_one", "Add one to the user's number", |args: Operand| Ok(args.x + 1))
}

fn multiply_by_two() -> FunctionTool {
    FunctionTool::from_fn("multiply_by_two", "Simple multiplication by two", |args: Operand| {
        Ok(args.x * 2)
    })
}

fn announced(target: &str) -> Handoff {
    Handoff::to(target).on_handoff(|_ctx: RunContext, event: HandoffEvent| async move {
        println!("\nHandoff just happened: {} -> {}", event.from_agent, event.to_agent);
        Ok::<(), BoxError>(())
    })
}

fn specialist(name: &str, instructions: &str, tool: FunctionTool, back_to: Option<&str>) -> Result<Agent, BoxError> {
    let mut builder = Agent::builder(name)
        .instructions(instructions)
        .tool(tool)
        .output_type::<FinalResult>();
    if let Some(main) = back_to {
        builder = builder.handoff(announced(main));
    }
    Ok(builder.build()?)
}

const ROUTING: &str = "Generate a random number. If it's even, hand off to the addition agent. \
                       If it's odd, hand off to the multiply agent.";

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let max = std::env::args().nth(1).unwrap_or_else(|| "100".to_string());
    let input = format!("Generate a random number between 0 and {max}");
    let runner = Runner::new(OpenAIOracle::new(OracleConfig::from_env()));

    // Specialists take over and answer directly.
    let multiply = specialist("Multiply Agent", "You multiply the user's message by 2", multiply_by_two(), None)?;
    let addition = specialist("Addition Agent", "You add 1 to the user's number", add_one(), None)?;
    let main_agent: Agent = Agent::builder("Agent Handoffs")
        .instructions(ROUTING)
        .tool(random_number())
        .handoff(Handoff::to("Multiply Agent"))
        .handoff(announced("Addition Agent"))
        .build()?;
    let graph = AgentGraph::builder()
        .agent(main_agent)
        .agent(multiply.clone())
        .agent(addition.clone())
        .build()?;
    let result = runner.run(&graph, "Agent Handoffs", input.clone(), RunContext::empty()).await?;
    println!("{{\"result\": {}}}", result.final_output_as::<FinalResult>()?.result);

    // The caller keeps control and phrases the answer itself.
    let tools_agent: Agent = Agent::builder("Agent Tools")
        .instructions(ROUTING)
        .tool(random_number())
        .tool(multiply.as_tool("multiply_agent", "Multiply the user's number")?)
        .tool(addition.as_tool("addition_agent", "Add the number to user's number")?)
        .build()?;
    let result = runner.run_agent(tools_agent, input.clone(), RunContext::empty()).await?;
    println!("{}", result.final_output_text());

    // Specialists hand the result back to the main agent.
    let main_agent: Agent = Agent::builder("Main Agent")
        .instructions(ROUTING)
        .tool(random_number())
        .handoff(announced("Multiply Agent"))
        .handoff(announced("Addition Agent"))
        .build()?;
    let multiply = specialist(
        "Multiply Agent",
        "You multiply the user's message by 2. Once you have the result, hand off the result to the main agent.",
        multiply_by_two(),
        Some("Main Agent"),
    )?;
    let addition = specialist(
        "Addition Agent",
        "You add 1 to the user's number. Once you have the result, hand off the result to the main agent.",
        add_one(),
        Some("Main Agent"),
    )?;
    let graph = AgentGraph::builder()
        .agent(main_agent)
        .agent(multiply)
        .agent(addition)
        .build()?;
    let result = runner.run(&graph, "Main Agent", input, RunContext::empty()).await?;
    println!("{} (handoffs: {})", result.final_output_text(), result.handoffs.len());
    Ok(())
}
