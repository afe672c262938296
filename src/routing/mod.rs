pub mod policy;

pub use policy::select_route;

use crate::config::RouteTarget;

/// Upstream provider family. Closed: every provider has its own request
/// shape and stream adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    OpenAi,
    OpenRouter,
    Gemini,
    Dashscope,
}

impl Provider {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::OpenRouter => "openrouter",
            Provider::Gemini => "gemini",
            Provider::Dashscope => "dashscope",
        }
    }

    /// Environment variable holding this provider's credential.
    #[must_use]
    pub fn credential_env(self) -> &'static str {
        match self {
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::OpenRouter => "OPENROUTER_API_KEY",
            Provider::Gemini => "GEMINI_API_KEY",
            Provider::Dashscope => "DASHSCOPE_API_KEY",
        }
    }
}

/// What the caller asked for; drives provider choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Step,
    Help,
    Check,
    Coordinates,
    ImageAnalysis,
}

impl Operation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Step => "step",
            Operation::Help => "help",
            Operation::Check => "check",
            Operation::Coordinates => "coordinates",
            Operation::ImageAnalysis => "image_analysis",
        }
    }
}

/// A provider credential. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// `None` for an absent or blank value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// Provider credentials present in this process.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub openai: Option<ApiKey>,
    pub openrouter: Option<ApiKey>,
    pub gemini: Option<ApiKey>,
    pub dashscope: Option<ApiKey>,
}

impl Credentials {
    /// Read every provider credential from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read credentials through an arbitrary lookup, for tests and embedding.
    pub fn from_lookup<F>(mut lookup: F) -> Self
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut read = |provider: Provider| lookup(provider.credential_env()).and_then(ApiKey::new);
        Self {
            openai: read(Provider::OpenAi),
            openrouter: read(Provider::OpenRouter),
            gemini: read(Provider::Gemini),
            dashscope: read(Provider::Dashscope),
        }
    }

    #[must_use]
    pub fn get(&self, provider: Provider) -> Option<&ApiKey> {
        match provider {
            Provider::OpenAi => self.openai.as_ref(),
            Provider::OpenRouter => self.openrouter.as_ref(),
            Provider::Gemini => self.gemini.as_ref(),
            Provider::Dashscope => self.dashscope.as_ref(),
        }
    }

    /// Names of the providers that have a credential.
    #[must_use]
    pub fn configured(&self) -> Vec<&'static str> {
        [
            Provider::OpenAi,
            Provider::OpenRouter,
            Provider::Gemini,
            Provider::Dashscope,
        ]
        .into_iter()
        .filter(|provider| self.get(*provider).is_some())
        .map(Provider::as_str)
        .collect()
    }
}

/// Fully resolved upstream choice for one request.
#[derive(Debug, Clone)]
pub struct Route {
    pub provider: Provider,
    pub model: String,
    pub reasoning_effort: Option<String>,
    pub thinking_level: Option<String>,
    pub provider_order: Vec<String>,
    pub allow_fallbacks: Option<bool>,
    pub api_key: ApiKey,
}

impl Route {
    pub(crate) fn from_target(provider: Provider, target: &RouteTarget, api_key: ApiKey) -> Self {
        Self {
            provider,
            model: target.model.clone(),
            reasoning_effort: target.reasoning_effort.clone(),
            thinking_level: target.thinking_level.clone(),
            provider_order: target.provider_order.clone(),
            allow_fallbacks: target.allow_fallbacks,
            api_key,
        }
    }
}

/// Normalize a configured base path to `""` or `/segment[/...]` without a trailing slash.
#[must_use]
pub fn normalize_base_path(base_path: &str) -> String {
    let trimmed = base_path.trim();
    if trimmed.is_empty() || trimmed == "/" {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.trim_end_matches('/').to_string()
    } else {
        format!("/{}", trimmed.trim_end_matches('/'))
    }
}
