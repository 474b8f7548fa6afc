use std::sync::{Arc, Mutex};

use agents_runtime::{
    Action, Agent, AgentGraph, FunctionTool, Handoff, HandoffEvent, RunContext, Runner, Schema,
    ScriptedOracle,
};
use pretty_assertions::assert_eq;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;
use tower::BoxError;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Style {
    Haiku,
    Pirate,
    Robot,
}

#[derive(Debug, Clone)]
struct Session {
    style: Style,
    purchases: Vec<String>,
    transfers: u32,
}

impl Session {
    fn new(style: Style) -> Self {
        Self {
            style,
            purchases: Vec::new(),
            transfers: 0,
        }
    }
}

fn style_agent() -> Agent<Session> {
    Agent::builder("Style Agent")
        .instructions_fn(|ctx: &RunContext<Session>, _agent: &Agent<Session>| {
            let instructions = match ctx.read(|s| s.style) {
                Style::Haiku => "Respond in haiku style",
                Style::Pirate => "Respond in pirate style",
                Style::Robot => "Respond in robot style",
            };
            instructions.to_string()
        })
        .model("gpt-4o-mini")
        .build()
        .unwrap()
}

#[tokio::test]
async fn instructions_follow_the_context() {
    for (style, expected) in [
        (Style::Haiku, "Respond in haiku style"),
        (Style::Pirate, "Respond in pirate style"),
        (Style::Robot, "Respond in robot style"),
    ] {
        let oracle = Arc::new(ScriptedOracle::new().then(Action::text("Orange root below")));
        Runner::from_arc(oracle.clone())
            .run_agent(style_agent(), "Write a poem about carrot", RunContext::new(Session::new(style)))
            .await
            .unwrap();

        let requests = oracle.requests();
        assert_eq!(requests[0].instructions, expected);
        assert_eq!(requests[0].settings.model.as_deref(), Some("gpt-4o-mini"));
    }
}

#[tokio::test]
async fn instructions_are_derived_again_every_turn() {
    #[derive(Deserialize, JsonSchema)]
    struct Restyle {
        pirate: bool,
    }

    let restyle = FunctionTool::typed("restyle", "Switch style", |args: Restyle, ctx: RunContext<Session>| async move {
        ctx.update(|s| s.style = if args.pirate { Style::Pirate } else { Style::Robot });
        Ok::<_, BoxError>(json!("ok"))
    });
    let agent: Agent<Session> = Agent::builder("Style Agent")
        .instructions_fn(|ctx: &RunContext<Session>, agent: &Agent<Session>| {
            format!("{} speaks {:?}", agent.name(), ctx.read(|s| s.style))
        })
        .tool(restyle)
        .build()
        .unwrap();
    let oracle = Arc::new(
        ScriptedOracle::new()
            .then(Action::tool_call("restyle", json!({ "pirate": true })))
            .then(Action::text("Arr")),
    );

    Runner::from_arc(oracle.clone())
        .run_agent(agent, "poem", RunContext::new(Session::new(Style::Haiku)))
        .await
        .unwrap();

    let instructions: Vec<_> = oracle.requests().into_iter().map(|r| r.instructions).collect();
    assert_eq!(instructions, vec!["Style Agent speaks Haiku", "Style Agent speaks Pirate"]);
}

#[tokio::test]
async fn tools_and_callbacks_share_the_callers_context() {
    #[derive(Deserialize, JsonSchema)]
    struct Purchase {
        item: String,
    }

    let buy = FunctionTool::typed("buy", "Buy an item", |args: Purchase, ctx: RunContext<Session>| async move {
        let count = ctx.update(|s| {
            s.purchases.push(args.item);
            s.purchases.len()
        });
        Ok::<_, BoxError>(count)
    });
    let shop: Agent<Session> = Agent::builder("Shop")
        .tool(buy)
        .handoff(Handoff::to("Checkout").on_handoff(
            |ctx: RunContext<Session>, _event: HandoffEvent| async move {
                ctx.update(|s| s.transfers += 1);
                Ok::<(), BoxError>(())
            },
        ))
        .build()
        .unwrap();
    let checkout: Agent<Session> = Agent::builder("Checkout")
        .instructions_fn(|ctx: &RunContext<Session>, _agent: &Agent<Session>| {
            format!("Confirm {} item(s)", ctx.read(|s| s.purchases.len()))
        })
        .build()
        .unwrap();
    let graph = AgentGraph::builder().agent(shop).agent(checkout).build().unwrap();

    let oracle = Arc::new(
        ScriptedOracle::new()
            .then(Action::tool_call("buy", json!({ "item": "carrot" })))
            .then(Action::tool_call("buy", json!({ "item": "parsnip" })))
            .then(Action::handoff("Checkout"))
            .then(Action::text("Two items confirmed.")),
    );
    let context = RunContext::new(Session::new(Style::Robot));

    let result = Runner::from_arc(oracle.clone())
        .run(&graph, "Shop", "buy vegetables", context.clone())
        .await
        .unwrap();

    assert_eq!(result.last_agent, "Checkout");
    let session = context.snapshot();
    assert_eq!(session.purchases, vec!["carrot", "parsnip"]);
    assert_eq!(session.transfers, 1);
    assert_eq!(oracle.requests()[3].instructions, "Confirm 2 item(s)");

    // The oracle never sees the context itself.
    let serialized = serde_json::to_string(&oracle.requests()).unwrap();
    assert!(!serialized.contains("purchases"));
    assert!(!serialized.contains("transfers"));
}

#[tokio::test]
async fn isolated_agent_tools_get_a_fresh_context() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = seen.clone();
    let probe = FunctionTool::new(
        "probe",
        "Reports how many purchases the context holds",
        Schema::any(),
        move |_args, ctx: RunContext<Session>| {
            let record = record.clone();
            async move {
                let count = ctx.read(|s| s.purchases.len());
                record.lock().unwrap().push(count);
                Ok::<_, BoxError>(json!(count))
            }
        },
    );
    let inner: Agent<Session> = Agent::builder("Inner").tool(probe).build().unwrap();
    let shared = inner.clone().as_tool("shared_inner", "Runs inner with the caller's context").unwrap();
    let isolated = inner
        .as_tool("isolated_inner", "Runs inner with a fresh context")
        .unwrap()
        .with_isolated_context(|| Session::new(Style::Haiku));
    let outer: Agent<Session> = Agent::builder("Outer").tool(shared).tool(isolated).build().unwrap();
    let graph = AgentGraph::single(outer).unwrap();

    let oracle = ScriptedOracle::new()
        .then_for("Outer", Action::tool_call("shared_inner", json!({ "input": "count" })))
        .then_for("Outer", Action::tool_call("isolated_inner", json!({ "input": "count" })))
        .then_for("Outer", Action::text("done"))
        .then_for("Inner", Action::tool_call("probe", json!({})))
        .then_for("Inner", Action::final_answer(json!("seen")))
        .then_for("Inner", Action::tool_call("probe", json!({})))
        .then_for("Inner", Action::final_answer(json!("seen")));

    let mut session = Session::new(Style::Robot);
    session.purchases.push("carrot".into());
    let result = Runner::new(oracle)
        .run(&graph, "Outer", "go", RunContext::new(session))
        .await
        .unwrap();

    assert_eq!(result.final_output_text(), "done");
    assert_eq!(*seen.lock().unwrap(), vec![1, 0]);
}
