use std::collections::HashSet;

use super::{AppConfig, ConfigError, OperationRoute};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_server_config(config)?;
    validate_provider_urls(config)?;
    validate_routing(config)?;
    validate_tools(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_server_config(config: &AppConfig) -> Result<(), ConfigError> {
    let server = &config.server;
    if server.http_pool_max_idle_per_host == 0 {
        return Err(validation_err(
            "server.http_pool_max_idle_per_host must be greater than 0",
        ));
    }
    if server.timeout == 0 {
        return Err(validation_err("server.timeout must be greater than 0"));
    }
    if server.connect_timeout_secs == 0 {
        return Err(validation_err(
            "server.connect_timeout_secs must be greater than 0",
        ));
    }
    if server.max_upload_bytes == 0 {
        return Err(validation_err("server.max_upload_bytes must be greater than 0"));
    }
    if server.max_upload_files == 0 {
        return Err(validation_err("server.max_upload_files must be greater than 0"));
    }
    if let Some(worker_threads) = server.runtime_worker_threads {
        if worker_threads == 0 {
            return Err(validation_err(
                "server.runtime_worker_threads must be greater than 0 when set",
            ));
        }
    }
    if let Some(max_blocking_threads) = server.runtime_max_blocking_threads {
        if max_blocking_threads == 0 {
            return Err(validation_err(
                "server.runtime_max_blocking_threads must be greater than 0 when set",
            ));
        }
    }
    if server.base_path.contains(char::is_whitespace) {
        return Err(validation_err("server.base_path must not contain whitespace"));
    }
    Ok(())
}

fn validate_provider_urls(config: &AppConfig) -> Result<(), ConfigError> {
    let providers = &config.providers;
    for (field, value) in [
        ("openai_base_url", providers.openai_base_url.as_str()),
        ("openrouter_base_url", providers.openrouter_base_url.as_str()),
        ("gemini_base_url", providers.gemini_base_url.as_str()),
        ("dashscope_url", providers.dashscope_url.as_str()),
    ] {
        let parsed = url::Url::parse(value.trim()).map_err(|err| {
            validation_err(format!("providers.{field} is not a valid URL: {err}"))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(validation_err(format!(
                "providers.{field} must use http:// or https://"
            )));
        }
    }
    Ok(())
}

const VALID_THINKING_LEVELS: &[&str] = &["MINIMAL", "LOW", "MEDIUM", "HIGH"];

fn validate_routing(config: &AppConfig) -> Result<(), ConfigError> {
    let routing = &config.routing;
    for (operation, route) in [
        ("step", &routing.step),
        ("help", &routing.help),
        ("check", &routing.check),
        ("coordinates", &routing.coordinates),
        ("image_analysis", &routing.image_analysis),
    ] {
        validate_operation_route(operation, route)?;
    }
    Ok(())
}

fn validate_operation_route(operation: &str, route: &OperationRoute) -> Result<(), ConfigError> {
    let targets = std::iter::once(("primary", &route.primary))
        .chain(route.fallback.as_ref().map(|fallback| ("fallback", fallback)));
    for (side, target) in targets {
        if target.model.trim().is_empty() {
            return Err(validation_err(format!(
                "routing.{operation}.{side}.model cannot be empty"
            )));
        }
        if let Some(level) = target.thinking_level.as_deref() {
            if !VALID_THINKING_LEVELS.contains(&level.to_uppercase().as_str()) {
                return Err(validation_err(format!(
                    "routing.{operation}.{side}.thinking_level must be one of {VALID_THINKING_LEVELS:?}"
                )));
            }
        }
        if target.provider_order.iter().any(|p| p.trim().is_empty()) {
            return Err(validation_err(format!(
                "routing.{operation}.{side}.provider_order contains an empty entry"
            )));
        }
    }
    Ok(())
}

fn validate_tools(config: &AppConfig) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for tool in &config.tools {
        let name = tool.name.trim();
        if name.is_empty() {
            return Err(validation_err("tools: tool name cannot be empty"));
        }
        if name.contains('"') || name.contains(char::is_whitespace) {
            return Err(validation_err(format!(
                "tools: tool name '{name}' must not contain quotes or whitespace"
            )));
        }
        if !seen.insert(name) {
            return Err(validation_err(format!("tools: duplicate tool '{name}'")));
        }
        if !tool.argument_schema.is_object() {
            return Err(validation_err(format!(
                "tools: argument_schema of '{name}' must be a JSON object"
            )));
        }
    }
    Ok(())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let valid_levels = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];
    if !valid_levels.contains(&config.features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}
