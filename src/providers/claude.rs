use anyhow::{Context, Result, anyhow};
use futures_util::FutureExt;
use serde::Deserialize;
use serde_json::json;

use super::{
    Provider, ProviderFuture, RemoteRequest, format_error_parts, parse_tool_args,
    render_system_prompt, tool_spec,
};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1/messages";
const DEFAULT_MODEL: &str = "claude-3-5-haiku-latest";
const MAX_TOKENS: u32 = 256;

#[derive(Debug, Clone)]
pub struct Claude {
    key: String,
    model: String,
    client: reqwest::Client,
}

impl Claude {
    pub fn new(key: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            key: key.into(),
            model: DEFAULT_MODEL.to_string(),
            client,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !model.trim().is_empty() {
            self.model = model;
        }
        self
    }
}

impl Provider for Claude {
    fn name(&self) -> &'static str {
        "Claude"
    }

    fn translate(&self, request: &RemoteRequest) -> ProviderFuture {
        let provider = self.clone();
        let request = request.clone();
        async move { call_messages(provider, request).await }.boxed()
    }
}

fn base_url() -> String {
    std::env::var("ANTHROPIC_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string())
}

async fn call_messages(provider: Claude, request: RemoteRequest) -> Result<String> {
    let tool = tool_spec();
    let system = render_system_prompt(&request)?;

    let body = json!({
        "model": provider.model,
        "max_tokens": MAX_TOKENS,
        "system": system,
        "messages": [
            {"role": "user", "content": [{"type": "text", "text": request.text}]}
        ],
        "tools": [
            {
                "name": tool.name,
                "description": tool.description,
                "input_schema": tool.parameters
            }
        ],
        "tool_choice": {"type": "tool", "name": tool.name}
    });

    let response = provider
        .client
        .post(base_url())
        .header("x-api-key", &provider.key)
        .header("anthropic-version", "2023-06-01")
        .json(&body)
        .send()
        .await
        .with_context(|| "Claude request failed")?;

    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(anyhow!(
            "Claude API error ({}): {}",
            status,
            extract_claude_error(&text).unwrap_or(text)
        ));
    }
    extract_translation(&text, &tool.name)
}

fn extract_translation(text: &str, tool_name: &str) -> Result<String> {
    let payload: ClaudeResponse = serde_json::from_str(text)
        .map_err(|err| anyhow!("failed to parse Claude response JSON: {}", err))?;
    let input = payload
        .content
        .into_iter()
        .find(|block| block.kind == "tool_use" && block.name.as_deref() == Some(tool_name))
        .ok_or_else(|| anyhow!("no tool call returned from Claude"))?
        .input
        .ok_or_else(|| anyhow!("Claude tool_use missing input"))?;
    parse_tool_args(input)
}

fn extract_claude_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<ClaudeError>,
    }

    #[derive(Deserialize)]
    struct ClaudeError {
        #[serde(rename = "type")]
        kind: Option<String>,
        message: Option<String>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let error = parsed.error?;
    Some(format_error_parts(error.message, error.kind, None))
}

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    content: Vec<ClaudeContent>,
}

#[derive(Debug, Deserialize)]
struct ClaudeContent {
    #[serde(rename = "type")]
    kind: String,
    name: Option<String>,
    input: Option<serde_json::Value>,
}
