use crate::config::RoutingConfig;
use crate::error::GatewayError;

use super::{Credentials, Operation, Provider, Route};

/// Native provider serving each operation when its credential is present.
#[must_use]
pub fn primary_provider(operation: Operation) -> Provider {
    match operation {
        Operation::Step | Operation::Help | Operation::ImageAnalysis => Provider::OpenAi,
        Operation::Check => Provider::Gemini,
        Operation::Coordinates => Provider::Dashscope,
    }
}

/// Pick the upstream for `operation`.
///
/// The operation's native provider wins when its credential is set;
/// otherwise the configured fallback is served through OpenRouter.
///
/// # Errors
///
/// Returns [`GatewayError::Config`] when neither side has a credential (or
/// the operation has no fallback and the primary credential is missing).
pub fn select_route(
    operation: Operation,
    routing: &RoutingConfig,
    credentials: &Credentials,
) -> Result<Route, GatewayError> {
    let table = match operation {
        Operation::Step => &routing.step,
        Operation::Help => &routing.help,
        Operation::Check => &routing.check,
        Operation::Coordinates => &routing.coordinates,
        Operation::ImageAnalysis => &routing.image_analysis,
    };

    let primary = primary_provider(operation);
    if let Some(key) = credentials.get(primary) {
        return Ok(Route::from_target(primary, &table.primary, key.clone()));
    }

    if let (Some(fallback), Some(key)) = (table.fallback.as_ref(), credentials.openrouter.as_ref()) {
        tracing::debug!(
            operation = operation.as_str(),
            primary = primary.as_str(),
            "primary credential missing, using OpenRouter fallback"
        );
        return Ok(Route::from_target(Provider::OpenRouter, fallback, key.clone()));
    }

    let mut wanted = vec![primary.credential_env()];
    if table.fallback.is_some() {
        wanted.push(Provider::OpenRouter.credential_env());
    }
    Err(GatewayError::Config(format!(
        "no provider credentials for {}: set {}",
        operation.as_str(),
        wanted.join(" or ")
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::ApiKey;

    fn creds(keys: &[Provider]) -> Credentials {
        let mut creds = Credentials::default();
        for provider in keys {
            let key = ApiKey::new(format!("{}-key", provider.as_str()));
            match provider {
                Provider::OpenAi => creds.openai = key,
                Provider::OpenRouter => creds.openrouter = key,
                Provider::Gemini => creds.gemini = key,
                Provider::Dashscope => creds.dashscope = key,
            }
        }
        creds
    }

    #[test]
    fn test_step_prefers_openai() {
        let route = select_route(
            Operation::Step,
            &RoutingConfig::default(),
            &creds(&[Provider::OpenAi, Provider::OpenRouter]),
        )
        .unwrap();
        assert_eq!(route.provider, Provider::OpenAi);
        assert_eq!(route.model, "gpt-5-mini-2025-08-07");
        assert_eq!(route.reasoning_effort.as_deref(), Some("low"));
    }

    #[test]
    fn test_check_falls_back_to_openrouter() {
        let route = select_route(
            Operation::Check,
            &RoutingConfig::default(),
            &creds(&[Provider::OpenRouter]),
        )
        .unwrap();
        assert_eq!(route.provider, Provider::OpenRouter);
        assert_eq!(route.model, "google/gemini-3-flash-preview");
        assert_eq!(route.provider_order, vec!["Google AI Studio".to_string()]);
        assert_eq!(route.allow_fallbacks, Some(true));
        assert_eq!(route.reasoning_effort.as_deref(), Some("minimal"));
        assert_eq!(route.api_key.expose(), "openrouter-key");
    }

    #[test]
    fn test_check_primary_carries_thinking_level() {
        let route = select_route(
            Operation::Check,
            &RoutingConfig::default(),
            &creds(&[Provider::Gemini]),
        )
        .unwrap();
        assert_eq!(route.provider, Provider::Gemini);
        assert_eq!(route.thinking_level.as_deref(), Some("MINIMAL"));
    }

    #[test]
    fn test_coordinates_routes() {
        let routing = RoutingConfig::default();
        let primary =
            select_route(Operation::Coordinates, &routing, &creds(&[Provider::Dashscope])).unwrap();
        assert_eq!(primary.provider, Provider::Dashscope);
        assert_eq!(primary.model, "qwen3-vl-flash");

        let fallback =
            select_route(Operation::Coordinates, &routing, &creds(&[Provider::OpenRouter])).unwrap();
        assert_eq!(fallback.model, "qwen/qwen3-vl-30b-a3b-instruct");
        assert_eq!(fallback.provider_order, vec!["Fireworks".to_string()]);
    }

    #[test]
    fn test_no_credentials_is_config_error() {
        let err = select_route(Operation::Help, &RoutingConfig::default(), &Credentials::default())
            .unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
        assert!(err.to_string().contains("OPENAI_API_KEY or OPENROUTER_API_KEY"));
    }

    #[test]
    fn test_image_analysis_has_no_fallback() {
        let err = select_route(
            Operation::ImageAnalysis,
            &RoutingConfig::default(),
            &creds(&[Provider::OpenRouter]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
        assert!(!err.to_string().contains("OPENROUTER"));
    }
}
