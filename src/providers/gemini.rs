use anyhow::{Context, Result, anyhow};
use futures_util::FutureExt;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{
    Provider, ProviderFuture, RemoteRequest, format_error_parts, parse_tool_args,
    render_system_prompt, tool_spec,
};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const DEFAULT_MODEL: &str = "gemini-1.5-flash";

#[derive(Debug, Clone)]
pub struct Gemini {
    key: String,
    model: String,
    client: reqwest::Client,
}

impl Gemini {
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

impl Provider for Gemini {
    fn name(&self) -> &'static str {
        "Gemini"
    }

    fn translate(&self, request: &RemoteRequest) -> ProviderFuture {
        let provider = self.clone();
        let request = request.clone();
        async move { call_generate_content(provider, request).await }.boxed()
    }
}

fn base_url() -> String {
    std::env::var("GEMINI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string())
}

async fn call_generate_content(provider: Gemini, request: RemoteRequest) -> Result<String> {
    let url = format!("{}/{}:generateContent", base_url(), provider.model);
    let tool = tool_spec();
    let system = render_system_prompt(&request)?;

    let body = json!({
        "contents": [
            {"role": "user", "parts": [{"text": request.text}]}
        ],
        "systemInstruction": {"parts": [{"text": system}]},
        "tools": [
            {
                "function_declarations": [
                    {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters
                    }
                ]
            }
        ],
        "tool_config": {
            "function_calling_config": {
                "mode": "ANY",
                "allowed_function_names": [tool.name]
            }
        }
    });

    let response = provider
        .client
        .post(&url)
        .header("x-goog-api-key", &provider.key)
        .json(&body)
        .send()
        .await
        .with_context(|| "Gemini request failed")?;

    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(anyhow!(
            "Gemini API error ({}): {}",
            status,
            extract_gemini_error(&text).unwrap_or(text)
        ));
    }
    extract_translation(&text, &tool.name)
}

fn extract_translation(text: &str, tool_name: &str) -> Result<String> {
    let payload: GeminiResponse = serde_json::from_str(text)
        .map_err(|err| anyhow!("failed to parse Gemini response JSON: {}", err))?;
    let content = payload
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .ok_or_else(|| anyhow!("no candidate returned from Gemini"))?;

    let args = content
        .parts
        .into_iter()
        .filter_map(|part| part.function_call)
        .find(|call| call.name == tool_name)
        .map(|call| call.args)
        .ok_or_else(|| anyhow!("no tool call returned from Gemini"))?;
    parse_tool_args(args)
}

fn extract_gemini_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<GeminiError>,
    }

    #[derive(Deserialize)]
    struct GeminiError {
        message: Option<String>,
        status: Option<String>,
        code: Option<i32>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let error = parsed.error?;
    Some(format_error_parts(
        error.message,
        error.status,
        error.code.map(|value| value.to_string()),
    ))
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    #[serde(rename = "functionCall")]
    function_call: Option<GeminiFunctionCall>,
}

#[derive(Debug, Deserialize)]
struct GeminiFunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}
