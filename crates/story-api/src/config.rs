//! API configuration.

/// Persistence backend for the pipeline stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// Process-local; for development and tests
    Memory,
    Firestore,
}

impl StoreBackend {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Some(StoreBackend::Memory),
            "firestore" => Some(StoreBackend::Firestore),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StoreBackend::Memory => "memory",
            StoreBackend::Firestore => "firestore",
        }
    }
}

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Max request body size
    pub max_body_size: usize,
    /// Environment (development/production)
    pub environment: String,
    pub store_backend: StoreBackend,
    pub metrics_enabled: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            max_body_size: 2 * 1024 * 1024, // 2MB
            environment: "development".to_string(),
            store_backend: StoreBackend::Firestore,
            metrics_enabled: true,
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: std::env::var("API_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),
            max_body_size: std::env::var("MAX_BODY_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_body_size),
            environment: std::env::var("ENVIRONMENT").unwrap_or(defaults.environment),
            store_backend: std::env::var("STORE_BACKEND")
                .ok()
                .and_then(|s| StoreBackend::parse(&s))
                .unwrap_or(defaults.store_backend),
            metrics_enabled: std::env::var("METRICS_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.metrics_enabled),
        }
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "production"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_from_env_reads_backend_and_origins() {
        std::env::set_var("STORE_BACKEND", "Memory");
        std::env::set_var("CORS_ORIGINS", "https://a.example, https://b.example");
        std::env::set_var("METRICS_ENABLED", "0");

        let config = ApiConfig::from_env();
        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert_eq!(config.cors_origins, vec!["https://a.example", "https://b.example"]);
        assert!(!config.metrics_enabled);

        for key in ["STORE_BACKEND", "CORS_ORIGINS", "METRICS_ENABLED"] {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_unknown_backend_falls_back_to_default() {
        std::env::set_var("STORE_BACKEND", "postgres");
        assert_eq!(ApiConfig::from_env().store_backend, StoreBackend::Firestore);
        std::env::remove_var("STORE_BACKEND");
    }
}
