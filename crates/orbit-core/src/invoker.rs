//! Invoker - drives one HTTP-triggered function call end to end.
//!
//! Each invocation resolves the module, boots a fresh sandbox with the
//! event, HTTP client, self and DNS providers, hands the guest one event
//! handle under a deadline, and always tears the sandbox down.

use crate::context::InvocationContext;
use crate::error::{InvokeError, Result};
use crate::function::FunctionSpec;
use crate::loader::ModuleLoader;
use crate::providers::{
    DnsProvider, DnsSource, EventProvider, EventTable, HttpClientProvider, SelfProvider,
};
use bytes::Bytes;
use http::{Request, Response};
use orbit_vm::{
    CallError, CapabilityProvider, LinkError, SandboxInstance, SandboxService, TeardownError,
};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Deadline used when a function declares none.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Invoker settings.
#[derive(Debug, Clone)]
pub struct InvokerConfig {
    /// Deadline for functions that declare none (default: 30s).
    pub default_timeout: Duration,
    /// Where DNS resolvers read their configuration (default: system).
    pub dns_source: DnsSource,
    /// Upper bound on each outbound HTTP request (default: none beyond the
    /// invocation deadline).
    pub http_timeout: Option<Duration>,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_TIMEOUT,
            dns_source: DnsSource::System,
            http_timeout: None,
        }
    }
}

impl InvokerConfig {
    /// The deadline that applies to `spec`.
    pub fn deadline_for(&self, spec: &FunctionSpec) -> Duration {
        if spec.timeout.is_zero() {
            self.default_timeout
        } else {
            spec.timeout
        }
    }
}

/// A completed invocation.
#[derive(Debug)]
pub struct Invocation {
    response: Response<Bytes>,
    elapsed: Duration,
    teardown_error: Option<TeardownError>,
}

impl Invocation {
    /// The response the guest built.
    pub fn response(&self) -> &Response<Bytes> {
        &self.response
    }

    /// Total time from invoke to teardown.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Teardown failure that followed a successful call, if any.
    pub fn teardown_error(&self) -> Option<&TeardownError> {
        self.teardown_error.as_ref()
    }

    /// Take the response, ignoring any teardown failure.
    pub fn into_response(self) -> Response<Bytes> {
        self.response
    }

    /// Take the response, failing if teardown failed.
    pub fn into_strict(self) -> Result<Response<Bytes>> {
        match self.teardown_error {
            Some(err) => Err(InvokeError::Teardown(err)),
            None => Ok(self.response),
        }
    }
}

/// Runs functions.
#[derive(Debug, Clone)]
pub struct Invoker {
    loader: ModuleLoader,
    service: SandboxService,
    config: InvokerConfig,
}

impl Invoker {
    /// Create an invoker with default settings.
    pub fn new(loader: ModuleLoader) -> Self {
        Self {
            loader,
            service: SandboxService::with_defaults(),
            config: InvokerConfig::default(),
        }
    }

    /// Replace the settings.
    pub fn with_config(mut self, config: InvokerConfig) -> Self {
        self.config = config;
        self
    }

    /// Boot sandboxes from `service`.
    pub fn with_service(mut self, service: SandboxService) -> Self {
        self.service = service;
        self
    }

    /// Settings in use.
    pub fn config(&self) -> &InvokerConfig {
        &self.config
    }

    /// The sandbox service, for inspecting live instance counts.
    pub fn service(&self) -> &SandboxService {
        &self.service
    }

    /// Invoke `spec` with `request`.
    ///
    /// Only HTTP and HTTPS functions are accepted; anything else is rejected
    /// before any resource is acquired.
    pub async fn invoke(
        &self,
        ctx: &InvocationContext,
        spec: &FunctionSpec,
        request: Request<Bytes>,
    ) -> Result<Invocation> {
        if !spec.trigger.is_http() {
            return Err(InvokeError::UnsupportedTrigger(spec.trigger));
        }
        if ctx.cancellation().is_cancelled() {
            return Err(InvokeError::Cancelled(spec.call.clone()));
        }

        let start = Instant::now();
        let invocation_id = Uuid::new_v4();
        let module = spec.module_name();
        let deadline = self.config.deadline_for(spec);
        tracing::info!(
            %invocation_id,
            function = %spec.name,
            module = %module,
            export = %spec.call,
            method = %request.method(),
            path = %request.uri().path(),
            "Invoking function"
        );

        let loaded = self.loader.load(&module).await?;

        let events = EventTable::new();
        let providers: Vec<Box<dyn CapabilityProvider>> = vec![
            Box::new(EventProvider::new(events.clone())),
            Box::new(HttpClientProvider::new(self.config.http_timeout)),
            Box::new(SelfProvider::from_context(ctx, spec.name.clone())),
            Box::new(DnsProvider::new(self.config.dns_source)),
        ];

        let mut instance = self
            .service
            .instance()
            .memory_bytes(spec.memory)
            .providers(providers)
            .cancellation(ctx.cancellation())
            .boot()
            .await?;

        // one countdown from `start` covers instantiation (and any start
        // function) as well as the call itself
        let expires_at = tokio::time::Instant::from_std(start) + deadline;
        let interrupt = instance.cancellation().clone();
        let outcome = {
            let work = run(
                &mut instance,
                &events,
                spec,
                &module,
                &loaded.bytes,
                request,
                expires_at,
            );
            tokio::pin!(work);

            tokio::select! {
                res = &mut work => res,
                _ = tokio::time::sleep_until(expires_at) => {
                    interrupt.cancel();
                    let _ = work.await;
                    tracing::warn!(%invocation_id, ?deadline, "Invocation exceeded its deadline");
                    Err(InvokeError::Timeout {
                        export: spec.call.clone(),
                        deadline,
                    })
                }
            }
        }
        .map_err(|e| e.with_deadline(deadline));

        let teardown = instance.close().await;
        let elapsed = start.elapsed();

        match (outcome, teardown) {
            (Ok(response), teardown) => {
                let teardown_error = teardown.err();
                if let Some(err) = &teardown_error {
                    tracing::warn!(%invocation_id, error = %err, "Teardown failed after successful call");
                }
                tracing::info!(
                    %invocation_id,
                    status = response.status().as_u16(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Invocation finished"
                );
                Ok(Invocation {
                    response,
                    elapsed,
                    teardown_error,
                })
            }
            (Err(err), teardown) => {
                if let Err(teardown_err) = teardown {
                    tracing::warn!(%invocation_id, error = %teardown_err, "Teardown failed after failed call");
                }
                tracing::info!(
                    %invocation_id,
                    error = %err,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Invocation failed"
                );
                Err(err)
            }
        }
    }
}

async fn run(
    instance: &mut SandboxInstance,
    events: &EventTable,
    spec: &FunctionSpec,
    module: &str,
    bytes: &[u8],
    request: Request<Bytes>,
    expires_at: tokio::time::Instant,
) -> Result<Response<Bytes>> {
    let event = events.mint_http(request);

    instance
        .load_module(module, bytes)
        .await
        .map_err(|e| match e {
            LinkError::Interrupted(_) => InvokeError::Cancelled(spec.call.clone()),
            other => InvokeError::Link(other),
        })?;
    let function = instance.function(module, &spec.call)?;
    let remaining = expires_at.saturating_duration_since(tokio::time::Instant::now());
    instance
        .call(&function, event, remaining)
        .await
        .map_err(InvokeError::from_call)?;

    events
        .take_response(event)
        .ok_or_else(|| InvokeError::GuestTrap {
            export: spec.call.clone(),
            reason: "event released before the response was collected".into(),
            code: None,
        })
}

impl InvokeError {
    fn from_call(err: CallError) -> Self {
        match err {
            CallError::DeadlineExceeded { export, deadline } => Self::Timeout { export, deadline },
            CallError::Cancelled { export } => Self::Cancelled(export),
            CallError::Trap { export, reason } => Self::GuestTrap {
                export,
                reason,
                code: None,
            },
            CallError::ErrorCode { export, code } => Self::GuestTrap {
                export,
                reason: format!("returned error code {code}"),
                code: Some(code),
            },
            CallError::Closed => Self::Link(LinkError::Closed),
        }
    }

    /// Report the declared deadline rather than what was left of it.
    fn with_deadline(self, deadline: Duration) -> Self {
        match self {
            Self::Timeout { export, .. } => Self::Timeout { export, deadline },
            other => other,
        }
    }
}
