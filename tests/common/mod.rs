#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use agents_runtime::{
    output_type, tool_args, Agent, AgentGraph, FunctionTool, Handoff, HandoffEvent, RunContext,
};
use tower::BoxError;

pub const MAIN: &str = "Agent Handoffs";
pub const MULTIPLY: &str = "Multiply Agent";
pub const ADDITION: &str = "Addition Agent";

#[output_type]
#[derive(Debug, Clone, PartialEq)]
pub struct FinalResult {
    pub result: i64,
}

#[tool_args]
pub struct MaxNumber {
    pub max_number: i64,
}

#[tool_args]
pub struct Operand {
    pub x: i64,
}

/// Always draws 43 (capped at `max_number`) so scenarios are reproducible.
pub fn random_number<C: Send + 'static>() -> FunctionTool<C> {
    FunctionTool::from_fn("random_number", "Generate a random number", |args: MaxNumber| {
        Ok(43_i64.min(args.max_number))
    })
}

pub fn multiply_by_two<C: Send + 'static>() -> FunctionTool<C> {
    FunctionTool::from_fn("multiply_by_two", "Simple multiplication by two", |args: Operand| {
        Ok(args.x * 2)
    })
}

pub fn add_one<C: Send + 'static>() -> FunctionTool<C> {
    FunctionTool::from_fn("add_one", "Add one to the user's number", |args: Operand| {
        Ok(args.x + 1)
    })
}

/// A handoff whose callback counts its invocations.
pub fn counted_handoff<C: Send + 'static>(target: &str, calls: &Arc<AtomicUsize>) -> Handoff<C> {
    let calls = calls.clone();
    Handoff::to(target).on_handoff(move |_ctx: RunContext<C>, _event: HandoffEvent| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<(), BoxError>(())
        }
    })
}

pub fn multiply_agent() -> Agent {
    Agent::builder(MULTIPLY)
        .instructions("You multiply the user's message by 2")
        .tool(multiply_by_two())
        .output_type::<FinalResult>()
        .build()
        .unwrap()
}

pub fn addition_agent() -> Agent {
    Agent::builder(ADDITION)
        .instructions("You add 1 to the user's number")
        .tool(add_one())
        .output_type::<FinalResult>()
        .build()
        .unwrap()
}

/// Main agent draws a number and hands off to one of two specialists.
pub fn handoff_graph(callback_calls: &Arc<AtomicUsize>) -> AgentGraph {
    let main = Agent::builder(MAIN)
        .instructions(
            "Generate a random number. If it's even, hand off to the addition agent. \
             If it's odd, hand off to the multiply agent.",
        )
        .tool(random_number())
        .handoff(Handoff::to(MULTIPLY))
        .handoff(counted_handoff(ADDITION, callback_calls))
        .build()
        .unwrap();
    AgentGraph::builder()
        .agent(main)
        .agent(multiply_agent())
        .agent(addition_agent())
        .build()
        .unwrap()
}
