//! Configuration for a single invocation run.
//!
//! Configuration is loaded from environment variables with sensible defaults.

use bytes::Bytes;
use http::header::HOST;
use http::{HeaderName, HeaderValue, Method, Request};
use orbit_core::providers::DnsSource;
use orbit_core::{FunctionSpec, InvocationContext, InvokerConfig, TriggerKind};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("ORBIT_WASM is not set")]
    MissingWasm,

    #[error("invalid value for {var}: {reason}")]
    InvalidValue { var: &'static str, reason: String },

    #[error("malformed header `{0}`, expected `Name: value`")]
    InvalidHeader(String),

    #[error("failed to read request body from {path}: {source}")]
    Body {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid request: {0}")]
    Request(#[from] http::Error),
}

/// Everything needed to run one function once.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Guest module file (raw, gzip or zip).
    pub wasm: PathBuf,

    /// Function name (default: the module file stem).
    pub name: String,

    /// Export to call (default: the function name).
    pub call: String,

    /// Module name override.
    pub module: Option<String>,

    /// Declared memory in bytes; 0 means undeclared.
    pub memory: u64,

    /// Call deadline; zero means the invoker default.
    pub timeout: Duration,

    /// Trigger kind (default: http).
    pub trigger: TriggerKind,

    /// Method, paths and domains the function is bound to.
    pub bind_method: Option<String>,
    pub bind_paths: Vec<String>,
    pub bind_domains: Vec<String>,

    /// Request overrides; fall back to the function bindings.
    pub method: Option<String>,
    pub path: Option<String>,
    pub host: Option<String>,

    /// Request body.
    pub body: Bytes,

    /// Extra request headers.
    pub headers: Vec<(String, String)>,

    /// Identity exposed to the guest.
    pub project: String,
    pub application: Option<String>,
    pub function_id: Option<String>,

    /// DNS configuration source (default: system).
    pub dns: DnsSource,

    /// Cap on outbound HTTP requests.
    pub http_timeout: Option<Duration>,
}

impl RunConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `ORBIT_WASM` | required |
    /// | `ORBIT_NAME` | module file stem |
    /// | `ORBIT_CALL` | function name |
    /// | `ORBIT_MODULE` | `functions/<name>` |
    /// | `ORBIT_MEMORY` | `0` (bytes) |
    /// | `ORBIT_TIMEOUT_MS` | `0` (invoker default) |
    /// | `ORBIT_TRIGGER` | `http` |
    /// | `ORBIT_BIND_METHOD` | unset |
    /// | `ORBIT_BIND_PATHS` | unset (comma separated) |
    /// | `ORBIT_BIND_DOMAINS` | unset (comma separated) |
    /// | `ORBIT_METHOD` | bound method, then `GET` |
    /// | `ORBIT_PATH` | first bound path, then `/` |
    /// | `ORBIT_HOST` | first bound domain, then `localhost` |
    /// | `ORBIT_BODY` | empty (literal, or `@file`) |
    /// | `ORBIT_HEADERS` | unset (`Name: value` pairs separated by `;`) |
    /// | `ORBIT_PROJECT` | `local` |
    /// | `ORBIT_APPLICATION` | unset |
    /// | `ORBIT_FUNCTION_ID` | function name |
    /// | `ORBIT_DNS` | `system` (system, builtin) |
    /// | `ORBIT_HTTP_TIMEOUT_MS` | unset |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through `lookup` instead of the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.is_empty());

        let wasm = var("ORBIT_WASM")
            .map(PathBuf::from)
            .ok_or(ConfigError::MissingWasm)?;
        let name = var("ORBIT_NAME").unwrap_or_else(|| file_stem(&wasm));
        let call = var("ORBIT_CALL").unwrap_or_else(|| name.clone());

        let memory = match var("ORBIT_MEMORY") {
            Some(v) => parse("ORBIT_MEMORY", &v)?,
            None => 0,
        };
        let timeout = match var("ORBIT_TIMEOUT_MS") {
            Some(v) => Duration::from_millis(parse("ORBIT_TIMEOUT_MS", &v)?),
            None => Duration::ZERO,
        };
        let trigger = match var("ORBIT_TRIGGER") {
            Some(v) => parse("ORBIT_TRIGGER", &v)?,
            None => TriggerKind::Http,
        };
        let dns = match var("ORBIT_DNS") {
            Some(v) => parse("ORBIT_DNS", &v)?,
            None => DnsSource::System,
        };
        let http_timeout = match var("ORBIT_HTTP_TIMEOUT_MS") {
            Some(v) => Some(Duration::from_millis(parse("ORBIT_HTTP_TIMEOUT_MS", &v)?)),
            None => None,
        };

        let body = match var("ORBIT_BODY") {
            Some(v) => read_body(&v)?,
            None => Bytes::new(),
        };
        let headers = match var("ORBIT_HEADERS") {
            Some(v) => parse_headers(&v)?,
            None => Vec::new(),
        };

        Ok(Self {
            wasm,
            call,
            module: var("ORBIT_MODULE"),
            memory,
            timeout,
            trigger,
            bind_method: var("ORBIT_BIND_METHOD"),
            bind_paths: var("ORBIT_BIND_PATHS").map(|v| split_list(&v)).unwrap_or_default(),
            bind_domains: var("ORBIT_BIND_DOMAINS").map(|v| split_list(&v)).unwrap_or_default(),
            method: var("ORBIT_METHOD"),
            path: var("ORBIT_PATH"),
            host: var("ORBIT_HOST"),
            body,
            headers,
            project: var("ORBIT_PROJECT").unwrap_or_else(|| "local".to_string()),
            application: var("ORBIT_APPLICATION"),
            function_id: var("ORBIT_FUNCTION_ID"),
            dns,
            http_timeout,
            name,
        })
    }

    /// The function being run.
    pub fn function_spec(&self) -> FunctionSpec {
        let mut spec = FunctionSpec::http(self.name.clone(), self.call.clone())
            .with_memory(self.memory)
            .with_timeout(self.timeout)
            .with_trigger(self.trigger);
        if let Some(id) = &self.function_id {
            spec.id = id.clone();
        }
        spec.module = self.module.clone();
        spec.method = self.bind_method.clone();
        spec.paths = self.bind_paths.clone();
        spec.domains = self.bind_domains.clone();
        spec
    }

    /// Identity for the invocation.
    pub fn context(&self, spec: &FunctionSpec) -> InvocationContext {
        let ctx = InvocationContext::new(self.project.clone(), spec.id.clone());
        match &self.application {
            Some(application) => ctx.with_application(application.clone()),
            None => ctx,
        }
    }

    /// Invoker settings.
    pub fn invoker_config(&self) -> InvokerConfig {
        InvokerConfig {
            dns_source: self.dns,
            http_timeout: self.http_timeout,
            ..InvokerConfig::default()
        }
    }

    /// Build the triggering request.
    pub fn request(&self, spec: &FunctionSpec) -> Result<Request<Bytes>, ConfigError> {
        let method = self
            .method
            .as_deref()
            .or(spec.method.as_deref())
            .unwrap_or("GET");
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes()).map_err(|e| {
            ConfigError::InvalidValue {
                var: "ORBIT_METHOD",
                reason: e.to_string(),
            }
        })?;
        let path = self
            .path
            .as_deref()
            .or(spec.paths.first().map(String::as_str))
            .unwrap_or("/");
        let host = self
            .host
            .as_deref()
            .or(spec.domains.first().map(String::as_str))
            .unwrap_or("localhost");

        let mut builder = Request::builder().method(method).uri(path).header(HOST, host);
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ConfigError::InvalidHeader(name.clone()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| ConfigError::InvalidHeader(format!("{name}: {value}")))?;
            builder = builder.header(name, value);
        }
        Ok(builder.body(self.body.clone())?)
    }
}

fn parse<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        var,
        reason: e.to_string(),
    })
}

fn file_stem(path: &Path) -> String {
    let stem = path
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.split('.').next())
        .unwrap_or_default();
    if stem.is_empty() {
        "function".to_string()
    } else {
        stem.to_string()
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// `@path` reads the body from a file; anything else is the body itself.
fn read_body(value: &str) -> Result<Bytes, ConfigError> {
    match value.strip_prefix('@') {
        Some(path) => std::fs::read(path)
            .map(Bytes::from)
            .map_err(|source| ConfigError::Body {
                path: PathBuf::from(path),
                source,
            }),
        None => Ok(Bytes::from(value.to_string())),
    }
}

fn parse_headers(value: &str) -> Result<Vec<(String, String)>, ConfigError> {
    value
        .split(';')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (name, value) = pair
                .split_once(':')
                .ok_or_else(|| ConfigError::InvalidHeader(pair.to_string()))?;
            let name = name.trim();
            if name.is_empty() {
                return Err(ConfigError::InvalidHeader(pair.to_string()));
            }
            Ok((name.to_string(), value.trim().to_string()))
        })
        .collect()
}
