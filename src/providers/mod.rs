use anyhow::{Context, Result, anyhow};
use futures_util::future::BoxFuture;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tera::{Context as TeraContext, Tera};

use crate::glossary::Category;

mod claude;
mod gemini;
mod openai;

pub use claude::Claude;
pub use gemini::Gemini;
pub use openai::OpenAI;

pub const TOOL_NAME: &str = "deliver_translation";

const SYSTEM_PROMPT_TEMPLATE: &str = include_str!("system_prompt.tera");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAI,
    Gemini,
    Claude,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "openai",
            ProviderKind::Gemini => "gemini",
            ProviderKind::Claude => "claude",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderSelection {
    pub provider: ProviderKind,
    pub requested_model: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// One remote translation call: a single string, a fixed source language
/// and the requested target language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRequest {
    pub text: String,
    pub source_lang: String,
    pub target_lang: String,
    pub category: Category,
}

pub type ProviderFuture = BoxFuture<'static, Result<String>>;

/// Remote fallback transport. The future resolves to the translated text;
/// any `Err` is a transport failure.
pub trait Provider: Send + Sync + 'static {
    fn name(&self) -> &'static str;
    fn translate(&self, request: &RemoteRequest) -> ProviderFuture;
}

#[derive(Debug, Clone)]
pub enum ProviderImpl {
    OpenAI(OpenAI),
    Gemini(Gemini),
    Claude(Claude),
}

impl Provider for ProviderImpl {
    fn name(&self) -> &'static str {
        match self {
            ProviderImpl::OpenAI(provider) => provider.name(),
            ProviderImpl::Gemini(provider) => provider.name(),
            ProviderImpl::Claude(provider) => provider.name(),
        }
    }

    fn translate(&self, request: &RemoteRequest) -> ProviderFuture {
        match self {
            ProviderImpl::OpenAI(provider) => provider.translate(request),
            ProviderImpl::Gemini(provider) => provider.translate(request),
            ProviderImpl::Claude(provider) => provider.translate(request),
        }
    }
}

pub fn build_provider(
    provider: ProviderKind,
    key: String,
    model: Option<String>,
    timeout: Duration,
) -> Result<ProviderImpl> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .with_context(|| "failed to build HTTP client")?;
    let model = model.unwrap_or_default();
    Ok(match provider {
        ProviderKind::OpenAI => ProviderImpl::OpenAI(OpenAI::new(key, client).with_model(model)),
        ProviderKind::Gemini => ProviderImpl::Gemini(Gemini::new(key, client).with_model(model)),
        ProviderKind::Claude => ProviderImpl::Claude(Claude::new(key, client).with_model(model)),
    })
}

/// Picks a provider from `provider[:model]`, or from whichever API key is
/// present in the environment. `None` means no credential is configured.
pub fn resolve_provider_selection(
    model_arg: Option<&str>,
    override_key: Option<&str>,
) -> Result<Option<ProviderSelection>> {
    match model_arg.filter(|value| !value.trim().is_empty()) {
        Some(model) => parse_model_arg(model).map(Some),
        None => Ok(default_provider_selection(override_key)),
    }
}

pub fn resolve_key(provider: ProviderKind, override_key: Option<&str>) -> Option<String> {
    if let Some(key) = override_key.filter(|key| !key.trim().is_empty()) {
        return Some(key.to_string());
    }

    match provider {
        ProviderKind::OpenAI => get_env("OPENAI_API_KEY"),
        ProviderKind::Gemini => get_env("GEMINI_API_KEY").or_else(|| get_env("GOOGLE_API_KEY")),
        ProviderKind::Claude => get_env("ANTHROPIC_API_KEY"),
    }
}

fn default_provider_selection(override_key: Option<&str>) -> Option<ProviderSelection> {
    let provider = if get_env("OPENAI_API_KEY").is_some() {
        ProviderKind::OpenAI
    } else if get_env("GEMINI_API_KEY").is_some() || get_env("GOOGLE_API_KEY").is_some() {
        ProviderKind::Gemini
    } else if get_env("ANTHROPIC_API_KEY").is_some() {
        ProviderKind::Claude
    } else if override_key.is_some_and(|key| !key.trim().is_empty()) {
        ProviderKind::OpenAI
    } else {
        return None;
    };
    Some(ProviderSelection {
        provider,
        requested_model: None,
    })
}

fn parse_model_arg(model_arg: &str) -> Result<ProviderSelection> {
    let raw = model_arg.trim();
    let lower = raw.to_lowercase();
    if let Some(provider) = provider_from_name(&lower) {
        return Ok(ProviderSelection {
            provider,
            requested_model: None,
        });
    }

    if let Some((provider_part, model_part)) = raw.split_once(':')
        && let Some(provider) = provider_from_name(&provider_part.to_lowercase())
    {
        let model = model_part.trim();
        return Ok(ProviderSelection {
            provider,
            requested_model: (!model.is_empty()).then(|| model.to_string()),
        });
    }

    Err(anyhow!(
        "unable to infer provider from model '{}'. Use provider:model (openai:, gemini:, claude:)",
        raw
    ))
}

fn provider_from_name(name: &str) -> Option<ProviderKind> {
    match name {
        "openai" => Some(ProviderKind::OpenAI),
        "gemini" | "google" => Some(ProviderKind::Gemini),
        "claude" | "anthropic" => Some(ProviderKind::Claude),
        _ => None,
    }
}

fn get_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

pub(crate) fn tool_spec() -> ToolSpec {
    ToolSpec {
        name: TOOL_NAME.to_string(),
        description: "Return the translated UI string.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "translation": {"type": "string"}
            },
            "required": ["translation"]
        }),
    }
}

pub(crate) fn render_system_prompt(request: &RemoteRequest) -> Result<String> {
    let mut context = TeraContext::new();
    context.insert("source_lang", request.source_lang.as_str());
    context.insert("target_lang", request.target_lang.as_str());
    context.insert("category", request.category.as_str());
    context.insert("tool_name", TOOL_NAME);
    let prompt = Tera::one_off(SYSTEM_PROMPT_TEMPLATE, &context, false)
        .with_context(|| "failed to render system prompt")?;
    Ok(prompt.trim_end().to_string())
}

/// Pulls the translated string out of the tool arguments. An empty
/// translation counts as a malformed payload.
pub(crate) fn parse_tool_args(args: Value) -> Result<String> {
    #[derive(Deserialize)]
    struct ToolArgs {
        translation: String,
    }

    let args: ToolArgs =
        serde_json::from_value(args).with_context(|| "tool arguments missing translation")?;
    let translation = args.translation.trim();
    if translation.is_empty() {
        return Err(anyhow!("tool returned an empty translation"));
    }
    Ok(translation.to_string())
}

pub(crate) fn format_error_parts(
    message: Option<String>,
    kind: Option<String>,
    code: Option<String>,
) -> String {
    let present = |value: &Option<String>| value.as_deref().is_some_and(|v| !v.trim().is_empty());
    let mut parts = Vec::new();
    if present(&message) {
        parts.extend(message);
    }
    if present(&kind) {
        parts.extend(kind.map(|kind| format!("type: {}", kind)));
    }
    if present(&code) {
        parts.extend(code.map(|code| format!("code: {}", code)));
    }
    if parts.is_empty() {
        "unknown error".to_string()
    } else {
        parts.join(" | ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_snapshot;

    fn request() -> RemoteRequest {
        RemoteRequest {
            text: "Chop down".to_string(),
            source_lang: "en".to_string(),
            target_lang: "ru".to_string(),
            category: Category::Action,
        }
    }

    #[test]
    fn system_prompt_snapshot() {
        let prompt = render_system_prompt(&request()).unwrap();
        assert_snapshot!(prompt, @r"
        You translate short user-interface strings from a video game.
        Translate the user's text from en to ru.
        UI role of the text: action.
        Keep markup tags, numbers and punctuation unchanged.
        Reply only by calling the deliver_translation tool with the translated text.
        ");
    }

    #[test]
    fn parses_translation_argument() {
        assert_eq!(
            parse_tool_args(json!({"translation": " Срубить "})).unwrap(),
            "Срубить"
        );
        assert!(parse_tool_args(json!({"translation": "  "})).is_err());
        assert!(parse_tool_args(json!({"text": "Срубить"})).is_err());
    }

    #[test]
    fn parses_provider_model_pairs() {
        let selection = parse_model_arg("claude:claude-3-5-haiku-latest").unwrap();
        assert_eq!(selection.provider, ProviderKind::Claude);
        assert_eq!(
            selection.requested_model.as_deref(),
            Some("claude-3-5-haiku-latest")
        );
        let bare = parse_model_arg("Google").unwrap();
        assert_eq!(bare.provider, ProviderKind::Gemini);
        assert!(bare.requested_model.is_none());
        assert!(parse_model_arg("mystery-model").is_err());
    }

    #[test]
    fn explicit_key_wins_over_environment() {
        assert_eq!(
            resolve_key(ProviderKind::Claude, Some("sk-test")).as_deref(),
            Some("sk-test")
        );
    }

    #[test]
    fn error_parts_skip_blank_fields() {
        assert_eq!(
            format_error_parts(Some("bad key".to_string()), Some("auth".to_string()), None),
            "bad key | type: auth"
        );
        assert_eq!(format_error_parts(None, None, None), "unknown error");
    }
}
