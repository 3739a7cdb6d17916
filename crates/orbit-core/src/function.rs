//! Function specification consumed by the invoker.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// What fires a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    /// Plain HTTP request
    Http,
    /// HTTPS request
    Https,
    /// Pub/sub message
    PubSub,
    /// Peer-to-peer stream
    P2p,
}

impl TriggerKind {
    /// Whether an HTTP request can drive this trigger.
    pub fn is_http(self) -> bool {
        matches!(self, Self::Http | Self::Https)
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerKind::Http => write!(f, "http"),
            TriggerKind::Https => write!(f, "https"),
            TriggerKind::PubSub => write!(f, "pubsub"),
            TriggerKind::P2p => write!(f, "p2p"),
        }
    }
}

impl FromStr for TriggerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            "pubsub" => Ok(Self::PubSub),
            "p2p" => Ok(Self::P2p),
            other => Err(format!("unknown trigger kind `{other}`")),
        }
    }
}

/// A deployed function as seen by the invoker. Read-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSpec {
    /// Resource id.
    pub id: String,
    /// Function name.
    pub name: String,
    /// Export symbol to call.
    pub call: String,
    /// Module name; defaults to `functions/<name>`.
    #[serde(default)]
    pub module: Option<String>,
    /// Declared memory ceiling in bytes. 0 means no declared ceiling (the
    /// platform maximum applies), not a zero-byte sandbox.
    #[serde(default)]
    pub memory: u64,
    /// Call deadline; zero means the invoker default.
    #[serde(default)]
    pub timeout: Duration,
    /// Trigger kind.
    pub trigger: TriggerKind,
    /// HTTP method the function is bound to.
    #[serde(default)]
    pub method: Option<String>,
    /// HTTP paths the function is bound to.
    #[serde(default)]
    pub paths: Vec<String>,
    /// Domains the function is served on.
    #[serde(default)]
    pub domains: Vec<String>,
}

impl FunctionSpec {
    /// Create an HTTP function with defaults for everything else.
    pub fn http(name: impl Into<String>, call: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name,
            call: call.into(),
            module: None,
            memory: 0,
            timeout: Duration::ZERO,
            trigger: TriggerKind::Http,
            method: None,
            paths: Vec::new(),
            domains: Vec::new(),
        }
    }

    /// Module name the loader resolves.
    pub fn module_name(&self) -> String {
        match &self.module {
            Some(module) => module.clone(),
            None => format!("functions/{}", self.name),
        }
    }

    /// Set the declared memory size in bytes.
    pub fn with_memory(mut self, bytes: u64) -> Self {
        self.memory = bytes;
        self
    }

    /// Set the call deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the trigger kind.
    pub fn with_trigger(mut self, trigger: TriggerKind) -> Self {
        self.trigger = trigger;
        self
    }
}
