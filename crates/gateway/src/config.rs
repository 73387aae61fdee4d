use inference::backend::ort::ExecutionProvider;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

pub use common::Environment;

const DEFAULT_ADDR: &str = "0.0.0.0:8000";
const DEFAULT_MODEL_PATH: &str = "api/model/best.onnx";
const DEFAULT_METRICS_JSON: &str = "api/training/metrics.json";
const DEFAULT_RESULTS_CSV: &str = "api/training/results.csv";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub environment: Environment,
    pub addr: SocketAddr,
    pub model_path: PathBuf,
    pub metrics_json: PathBuf,
    pub results_csv: PathBuf,
    pub class_names_path: Option<PathBuf>,
    pub max_upload_bytes: usize,
    pub execution_provider: ExecutionProvider,
    pub otel_endpoint: Option<String>,
}

impl GatewayConfig {
    /// Load configuration from environment variables with sensible defaults
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = lookup("ENVIRONMENT")
            .map(|value| Environment::parse(&value))
            .unwrap_or(Environment::Development);

        let addr_raw = lookup("GATEWAY_ADDR").unwrap_or_else(|| DEFAULT_ADDR.to_string());
        let addr = addr_raw
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid GATEWAY_ADDR {:?}: {}", addr_raw, e))?;

        let model_path = lookup("MODEL_PATH")
            .unwrap_or_else(|| DEFAULT_MODEL_PATH.to_string())
            .into();

        let metrics_json = lookup("METRICS_JSON")
            .unwrap_or_else(|| DEFAULT_METRICS_JSON.to_string())
            .into();

        let results_csv = lookup("RESULTS_CSV")
            .unwrap_or_else(|| DEFAULT_RESULTS_CSV.to_string())
            .into();

        let class_names_path = lookup("CLASS_NAMES_PATH")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        let max_upload_bytes = lookup("GATEWAY_MAX_UPLOAD_BYTES")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES);

        let execution_provider = lookup("EXECUTION_PROVIDER")
            .map(|s| ExecutionProvider::parse(&s))
            .unwrap_or_default();

        let otel_endpoint = lookup("OTEL_EXPORTER_OTLP_ENDPOINT").filter(|s| !s.is_empty());

        Ok(Self {
            environment,
            addr,
            model_path,
            metrics_json,
            results_csv,
            class_names_path,
            max_upload_bytes,
            execution_provider,
            otel_endpoint,
        })
    }

    /// Create default configuration for testing
    #[cfg(test)]
    pub fn test_default() -> Self {
        Self {
            environment: Environment::Development,
            addr: DEFAULT_ADDR.parse().unwrap(),
            model_path: DEFAULT_MODEL_PATH.into(),
            metrics_json: DEFAULT_METRICS_JSON.into(),
            results_csv: DEFAULT_RESULTS_CSV.into(),
            class_names_path: None,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            execution_provider: ExecutionProvider::Cpu,
            otel_endpoint: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = GatewayConfig::from_lookup(lookup_from(&[])).unwrap();
        let expected = GatewayConfig::test_default();

        assert_eq!(config.addr, expected.addr);
        assert_eq!(config.model_path, expected.model_path);
        assert_eq!(config.metrics_json, expected.metrics_json);
        assert_eq!(config.results_csv, expected.results_csv);
        assert_eq!(config.class_names_path, None);
        assert_eq!(config.max_upload_bytes, expected.max_upload_bytes);
        assert_eq!(config.execution_provider, ExecutionProvider::Cpu);
        assert_eq!(config.environment, Environment::Development);
        assert!(config.otel_endpoint.is_none());
    }

    #[test]
    fn test_overrides_from_variables() {
        let config = GatewayConfig::from_lookup(lookup_from(&[
            ("ENVIRONMENT", "production"),
            ("GATEWAY_ADDR", "127.0.0.1:9000"),
            ("MODEL_PATH", "/models/waste.onnx"),
            ("METRICS_JSON", "/runs/metrics.json"),
            ("RESULTS_CSV", "/runs/results.csv"),
            ("CLASS_NAMES_PATH", "/models/classes.txt"),
            ("GATEWAY_MAX_UPLOAD_BYTES", "1024"),
            ("EXECUTION_PROVIDER", "cuda"),
            ("OTEL_EXPORTER_OTLP_ENDPOINT", "http://collector:4317"),
        ]))
        .unwrap();

        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.model_path, PathBuf::from("/models/waste.onnx"));
        assert_eq!(config.metrics_json, PathBuf::from("/runs/metrics.json"));
        assert_eq!(config.results_csv, PathBuf::from("/runs/results.csv"));
        assert_eq!(config.class_names_path, Some(PathBuf::from("/models/classes.txt")));
        assert_eq!(config.max_upload_bytes, 1024);
        assert_eq!(config.execution_provider, ExecutionProvider::Cuda);
        assert_eq!(config.otel_endpoint.as_deref(), Some("http://collector:4317"));
    }

    #[test]
    fn test_unparseable_numbers_fall_back_to_defaults() {
        let config =
            GatewayConfig::from_lookup(lookup_from(&[("GATEWAY_MAX_UPLOAD_BYTES", "lots")]))
                .unwrap();

        assert_eq!(config.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
    }

    #[test]
    fn test_invalid_address_is_an_error() {
        let result = GatewayConfig::from_lookup(lookup_from(&[("GATEWAY_ADDR", "not-an-addr")]));

        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn test_from_env_reads_process_environment() {
        // SAFETY: serialised with every other test touching the process environment.
        unsafe { env::set_var("MODEL_PATH", "/tmp/from-env.onnx") };
        let config = GatewayConfig::from_env().unwrap();
        unsafe { env::remove_var("MODEL_PATH") };

        assert_eq!(config.model_path, PathBuf::from("/tmp/from-env.onnx"));
    }
}
