//! OpenAI Chat Completions oracle
//!
//! Wraps the async-openai crate. The active agent's instructions become the
//! system message, conversation turns become chat messages, and both tools and
//! handoffs are offered as function tools. The first tool call of a response
//! (or its content) is mapped back to an [`Action`].

use std::collections::BTreeMap;

use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionTool, ChatCompletionToolType, CompletionUsage, CreateChatCompletionRequest,
    CreateChatCompletionRequestArgs, FunctionCall, FunctionObject, ResponseFormat,
    ResponseFormatJsonSchema,
};
use async_openai::Client;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::OracleConfig;
use crate::conversation::{value_text, Turn};
use crate::error::{AgentsError, Result};
use crate::oracle::{Action, DeltaSink, Oracle, OracleRequest, Proposal};
use crate::usage::Usage;

/// Oracle backed by an OpenAI-compatible Chat Completions endpoint.
pub struct OpenAIOracle {
    client: Client<OpenAIConfig>,
    config: OracleConfig,
}

impl std::fmt::Debug for OpenAIOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIOracle")
            .field("config", &self.config)
            .finish()
    }
}

impl OpenAIOracle {
    pub fn new(config: OracleConfig) -> Self {
        let mut openai = OpenAIConfig::new();
        if let Some(key) = &config.api_key {
            openai = openai.with_api_key(key);
        }
        if let Some(base) = &config.api_base {
            openai = openai.with_api_base(base);
        }
        if let Some(org) = &config.organization {
            openai = openai.with_org_id(org);
        }
        Self {
            client: Client::with_config(openai),
            config,
        }
    }

    /// Create with a custom client
    pub fn with_client(client: Client<OpenAIConfig>, config: OracleConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &OracleConfig {
        &self.config
    }

    fn build_request(&self, request: &OracleRequest) -> Result<CreateChatCompletionRequest> {
        let model = request
            .settings
            .model
            .clone()
            .unwrap_or_else(|| self.config.model.clone());

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(model).messages(convert_messages(request)?);

        let tools = convert_tools(request);
        if !tools.is_empty() {
            args.tools(tools);
        }
        if let Some(schema) = &request.output_schema {
            args.response_format(ResponseFormat::JsonSchema {
                json_schema: ResponseFormatJsonSchema {
                    name: "final_output".to_string(),
                    description: None,
                    schema: Some(schema.as_value().clone()),
                    strict: None,
                },
            });
        }
        if let Some(temperature) = request.settings.temperature {
            args.temperature(temperature);
        }
        if let Some(max) = request.settings.max_tokens {
            args.max_completion_tokens(max);
        }
        Ok(args.build()?)
    }
}

#[async_trait]
impl Oracle for OpenAIOracle {
    fn name(&self) -> &str {
        &self.config.model
    }

    async fn propose(&self, request: &OracleRequest) -> Result<Proposal> {
        let body = self.build_request(request)?;
        debug!(agent = %request.agent, model = %body.model, "Requesting chat completion");
        let response = self.client.chat().create(body).await?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AgentsError::MalformedOracleResponse {
                message: "No choices in response".to_string(),
            })?;

        let tool_call = choice
            .message
            .tool_calls
            .and_then(|calls| calls.into_iter().next())
            .map(|call| (call.id, call.function.name, call.function.arguments));
        let action = to_action(request, choice.message.content, tool_call)?;

        Ok(Proposal::new(action).with_usage(convert_usage(response.usage)))
    }

    async fn propose_streaming(
        &self,
        request: &OracleRequest,
        sink: &DeltaSink,
    ) -> Result<Proposal> {
        let body = self.build_request(request)?;
        debug!(agent = %request.agent, model = %body.model, "Streaming chat completion");
        let mut stream = self.client.chat().create_stream(body).await?;

        let mut content: Option<String> = None;
        // Tool call fragments keyed by their index in the response
        let mut calls: BTreeMap<u32, (String, String, String)> = BTreeMap::new();
        let mut usage = None;
        let mut saw_choice = false;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if chunk.usage.is_some() {
                usage = chunk.usage;
            }
            for choice in chunk.choices {
                saw_choice = true;
                if let Some(delta) = choice.delta.content {
                    if !delta.is_empty() {
                        sink.emit(delta.clone()).await?;
                        content.get_or_insert_with(String::new).push_str(&delta);
                    }
                }
                for fragment in choice.delta.tool_calls.unwrap_or_default() {
                    let entry = calls.entry(fragment.index).or_default();
                    if let Some(id) = fragment.id {
                        entry.0 = id;
                    }
                    if let Some(function) = fragment.function {
                        if let Some(name) = function.name {
                            entry.1.push_str(&name);
                        }
                        if let Some(arguments) = function.arguments {
                            entry.2.push_str(&arguments);
                        }
                    }
                }
            }
        }

        if !saw_choice {
            return Err(AgentsError::MalformedOracleResponse {
                message: "No choices in streamed response".to_string(),
            });
        }
        let tool_call = calls.into_values().next();
        let action = to_action(request, content, tool_call)?;
        Ok(Proposal::new(action).with_usage(convert_usage(usage)))
    }
}

fn convert_usage(usage: Option<CompletionUsage>) -> Usage {
    match usage {
        Some(u) => Usage::new(u.prompt_tokens as usize, u.completion_tokens as usize),
        None => Usage::request(),
    }
}

/// Maps the first tool call, or else the content, of a response to an action.
fn to_action(
    request: &OracleRequest,
    content: Option<String>,
    tool_call: Option<(String, String, String)>,
) -> Result<Action> {
    if let Some((id, name, arguments)) = tool_call {
        let call_id = (!id.is_empty()).then_some(id);
        if let Some(handoff) = request.handoffs.iter().find(|h| h.tool_name == name) {
            return Ok(Action::Handoff {
                call_id,
                target: handoff.target.clone(),
            });
        }
        let arguments = if arguments.trim().is_empty() {
            json!({})
        } else {
            serde_json::from_str(&arguments).unwrap_or(Value::String(arguments))
        };
        return Ok(Action::ToolCall {
            call_id,
            name,
            arguments,
        });
    }

    let text = content.ok_or_else(|| AgentsError::MalformedOracleResponse {
        message: "Response has neither content nor tool calls".to_string(),
    })?;
    let content = match &request.output_schema {
        Some(_) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
        None => Value::String(text),
    };
    Ok(Action::FinalAnswer { content })
}

fn convert_tools(request: &OracleRequest) -> Vec<ChatCompletionTool> {
    let tools = request.tools.iter().map(|spec| ChatCompletionTool {
        r#type: ChatCompletionToolType::Function,
        function: FunctionObject {
            name: spec.name.clone(),
            description: Some(spec.description.clone()),
            parameters: Some(spec.parameters.as_value().clone()),
            strict: None,
        },
    });
    let handoffs = request.handoffs.iter().map(|spec| ChatCompletionTool {
        r#type: ChatCompletionToolType::Function,
        function: FunctionObject {
            name: spec.tool_name.clone(),
            description: Some(spec.description.clone()),
            parameters: Some(json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false
            })),
            strict: None,
        },
    });
    tools.chain(handoffs).collect()
}

fn tool_call_message(
    call_id: &str,
    name: &str,
    arguments: String,
) -> Result<ChatCompletionRequestMessage> {
    Ok(ChatCompletionRequestAssistantMessageArgs::default()
        .tool_calls(vec![ChatCompletionMessageToolCall {
            id: call_id.to_string(),
            r#type: ChatCompletionToolType::Function,
            function: FunctionCall {
                name: name.to_string(),
                arguments,
            },
        }])
        .build()?
        .into())
}

fn tool_output_message(call_id: &str, content: String) -> Result<ChatCompletionRequestMessage> {
    Ok(ChatCompletionRequestToolMessageArgs::default()
        .content(content)
        .tool_call_id(call_id)
        .build()?
        .into())
}

fn convert_messages(request: &OracleRequest) -> Result<Vec<ChatCompletionRequestMessage>> {
    let mut messages = Vec::with_capacity(request.conversation.len() + 1);
    if !request.instructions.is_empty() {
        messages.push(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(request.instructions.clone())
                .build()?
                .into(),
        );
    }

    for turn in request.conversation.iter() {
        match turn {
            Turn::User { content } => messages.push(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(content.clone())
                    .build()?
                    .into(),
            ),
            Turn::Assistant { content, .. } => messages.push(
                ChatCompletionRequestAssistantMessageArgs::default()
                    .content(value_text(content))
                    .build()?
                    .into(),
            ),
            Turn::ToolCall {
                call_id,
                tool,
                arguments,
                ..
            } => messages.push(tool_call_message(call_id, tool, arguments.to_string())?),
            Turn::ToolResult { call_id, .. } => {
                messages.push(tool_output_message(call_id, turn.content_text())?)
            }
            Turn::Handoff { call_id, tool, .. } => {
                messages.push(tool_call_message(call_id, tool, "{}".into())?);
                messages.push(tool_output_message(call_id, turn.content_text())?);
            }
        }
    }
    Ok(messages)
}
