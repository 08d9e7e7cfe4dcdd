use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use toolgate_core::catalog::build_dispatcher;
use toolgate_core::config::ServerInfoConfig;
use toolgate_core::{Dispatcher, GatewayConfig, Guard, ToolFilter};

/// Gateway configuration plus the overrides the network binary accepts
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub gateway: GatewayConfig,
}

impl ServerConfig {
    /// Load the config file, letting an explicit API key (flag or
    /// `MCP_API_KEY`) take precedence over `[auth].api_key`
    pub fn load(config_path: &Path, api_key: Option<String>) -> Result<Self> {
        let mut gateway = GatewayConfig::load(config_path)
            .with_context(|| format!("Failed to load {}", config_path.display()))?;

        if let Some(key) = api_key.filter(|key| !key.is_empty()) {
            gateway.auth.api_key = Some(key);
        }

        Ok(Self { gateway })
    }

    pub fn api_key(&self) -> Option<&str> {
        self.gateway.auth.api_key.as_deref().filter(|key| !key.is_empty())
    }
}

/// Application state shared across handlers
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub guard: Arc<Guard>,
    pub filter: ToolFilter,
    pub server: ServerInfoConfig,
}

impl AppState {
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let gateway = &config.gateway;
        let dispatcher = Arc::new(build_dispatcher(gateway).context("Failed to build tool registry")?);
        let guard = Arc::new(Guard::new(config.api_key(), &gateway.rate_limit));

        if guard.is_open() {
            tracing::warn!("No API key configured; the network transport accepts anonymous requests");
        }

        Ok(Self {
            dispatcher,
            guard,
            filter: ToolFilter::from_allow_list(gateway.tools.allowed.as_deref()),
            server: gateway.server.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_flag_overrides_file_key() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[auth]\napi_key = \"from-file\"").unwrap();

        let config = ServerConfig::load(file.path(), None).unwrap();
        assert_eq!(config.api_key(), Some("from-file"));

        let config = ServerConfig::load(file.path(), Some("from-flag".into())).unwrap();
        assert_eq!(config.api_key(), Some("from-flag"));

        let config = ServerConfig::load(file.path(), Some(String::new())).unwrap();
        assert_eq!(config.api_key(), Some("from-file"));
    }

    #[test]
    fn test_allow_list_becomes_filter() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[tools]\nallowed = [\"health\"]").unwrap();

        let config = ServerConfig::load(file.path(), None).unwrap();
        let state = AppState::new(&config).unwrap();
        assert!(state.filter.allows("health"));
        assert!(!state.filter.allows("get_item"));
        assert!(state.guard.is_open());
    }
}
