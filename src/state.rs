use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::GatewayError;
use crate::fc::{ToolCallExtractor, ToolRegistry};
use crate::routing::{select_route, Credentials, Operation, Route};
use crate::transport::HttpTransport;

/// Shared application state accessible to all handlers. Read-only after startup.
pub struct AppState {
    pub config: AppConfig,
    pub credentials: Credentials,
    pub transport: HttpTransport,
    tools: Arc<ToolRegistry>,
}

impl AppState {
    #[must_use]
    pub fn new(config: AppConfig, credentials: Credentials, transport: HttpTransport) -> Self {
        let tools = Arc::new(ToolRegistry::from_config(&config.tools));
        Self {
            config,
            credentials,
            transport,
            tools,
        }
    }

    /// Resolve the upstream for `operation` against current credentials.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] when no usable credential exists.
    pub fn route(&self, operation: Operation) -> Result<Route, GatewayError> {
        select_route(operation, &self.config.routing, &self.credentials)
    }

    #[must_use]
    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// Fresh per-request extractor, or `None` when no tools are registered.
    #[must_use]
    pub fn tool_extractor(&self) -> Option<ToolCallExtractor> {
        ToolCallExtractor::for_registry(&self.tools)
    }
}
