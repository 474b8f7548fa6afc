mod common;

use agents_runtime::{
    Action, Agent, AgentGraph, AgentTool, AgentsError, RunContext, Runner, ScriptedOracle,
    ToolErrorPolicy, ToolKind, Turn,
};
use common::*;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

const TOOLS: &str = "Agent Tools";

fn tools_agent(policy: ToolErrorPolicy) -> Agent {
    Agent::builder(TOOLS)
        .instructions(
            "Generate a random number. If it's even, use the addition agent. \
             If it's odd, use the multiply agent.",
        )
        .tool(random_number())
        .tool(
            multiply_agent()
                .as_tool("multiply_agent", "Multiply the user's number")
                .unwrap(),
        )
        .tool(
            addition_agent()
                .as_tool("addition_agent", "Add the number to user's number")
                .unwrap(),
        )
        .tool_error_policy(policy)
        .build()
        .unwrap()
}

#[tokio::test]
async fn parent_sees_only_the_final_output() {
    let oracle = Arc::new(
        ScriptedOracle::new()
            .then_for(TOOLS, Action::tool_call("random_number", json!({ "max_number": 100 })))
            .then_for(TOOLS, Action::tool_call("multiply_agent", json!({ "input": "43" })))
            .then_for(MULTIPLY, Action::tool_call("multiply_by_two", json!({ "x": 43 })))
            .then_for(MULTIPLY, Action::final_answer(json!({ "result": 86 })))
            .then_for(
                TOOLS,
                Action::text(
                    "The random number generated was 43, which is odd. \
                     The result after processing with the multiply agent is 86.",
                ),
            ),
    );

    let result = Runner::from_arc(oracle.clone())
        .run_agent(tools_agent(ToolErrorPolicy::Fail), "Generate a random number between 0 and 100", RunContext::empty())
        .await
        .unwrap();

    assert_eq!(result.last_agent, TOOLS);
    assert!(result.final_output_text().ends_with("is 86."));
    assert!(result.handoffs.is_empty());

    // user, 2 × (call, result), answer
    assert_eq!(result.history.len(), 6);
    let calls: Vec<_> = result.history.tool_calls().collect();
    assert_eq!(calls, vec![(TOOLS, "random_number"), (TOOLS, "multiply_agent")]);
    assert_eq!(
        result.history.turns()[4],
        Turn::ToolResult {
            call_id: "call_2".into(),
            tool: "multiply_agent".into(),
            output: json!({ "result": 86 }),
            error: None,
        }
    );
    assert!(result.history.iter().all(|t| t.agent() != Some(MULTIPLY)));

    // The nested run talked to the oracle as the multiply agent.
    let agents: Vec<_> = oracle.requests().into_iter().map(|r| r.agent).collect();
    assert_eq!(agents, vec![TOOLS, TOOLS, MULTIPLY, MULTIPLY, TOOLS]);

    // Nested usage is not merged into the parent's accounting.
    assert!(!result.usage.by_agent.contains_key(MULTIPLY));
}

#[tokio::test]
async fn agent_tools_are_advertised_with_an_input_schema() {
    let oracle = Arc::new(ScriptedOracle::new().then(Action::text("nothing to do")));
    Runner::from_arc(oracle.clone())
        .run_agent(tools_agent(ToolErrorPolicy::Fail), "hi", RunContext::empty())
        .await
        .unwrap();

    let request = &oracle.requests()[0];
    let spec = request
        .tools
        .iter()
        .find(|t| t.name == "multiply_agent")
        .unwrap();
    assert_eq!(spec.kind, ToolKind::Agent);
    assert_eq!(spec.parameters.as_value()["required"], json!(["input"]));
}

#[tokio::test]
async fn nested_failure_surfaces_as_tool_execution() {
    // The multiply agent answers with the wrong shape.
    let oracle = ScriptedOracle::new()
        .then_for(TOOLS, Action::tool_call("multiply_agent", json!({ "input": "43" })))
        .then_for(MULTIPLY, Action::final_answer(json!({ "value": 86 })));

    let err = Runner::new(oracle)
        .run_agent(tools_agent(ToolErrorPolicy::Fail), "go", RunContext::empty())
        .await
        .unwrap_err();

    assert_eq!(err.last_agent, TOOLS);
    match &err.error {
        AgentsError::ToolExecution { tool, source } => {
            assert_eq!(tool, "multiply_agent");
            assert!(source.to_string().contains("output schema"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.state.len(), 1);
}

#[tokio::test]
async fn nested_failure_can_be_reported_to_the_oracle() {
    let oracle = ScriptedOracle::new()
        .then_for(TOOLS, Action::tool_call("multiply_agent", json!({ "input": "43" })))
        .then_for(MULTIPLY, Action::final_answer(json!({ "value": 86 })))
        .then_for(TOOLS, Action::text("The multiply agent failed."));

    let result = Runner::new(oracle)
        .run_agent(tools_agent(ToolErrorPolicy::ReportToOracle), "go", RunContext::empty())
        .await
        .unwrap();

    match &result.history.turns()[2] {
        Turn::ToolResult { error, .. } => assert!(error.is_some()),
        other => panic!("unexpected turn: {other:?}"),
    }
    assert_eq!(result.final_output_text(), "The multiply agent failed.");
}

#[tokio::test]
async fn agent_tool_can_start_inside_a_graph() {
    let graph = handoff_graph(&Default::default());
    let tool = AgentTool::new(graph, MAIN, "number_pipeline", "Draw and transform a number").unwrap();
    let parent: Agent = Agent::builder("Parent").tool(tool).build().unwrap();

    let oracle = ScriptedOracle::new()
        .then_for("Parent", Action::tool_call("number_pipeline", json!({ "input": "100" })))
        .then_for(MAIN, Action::handoff(MULTIPLY))
        .then_for(MULTIPLY, Action::final_answer(json!({ "result": 2 })))
        .then_for("Parent", Action::text("2"));

    let result = Runner::new(oracle)
        .run(&AgentGraph::single(parent).unwrap(), "Parent", "go", RunContext::empty())
        .await
        .unwrap();
    assert_eq!(result.final_output_text(), "2");
    assert!(result.handoffs.is_empty());
}
