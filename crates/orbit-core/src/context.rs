//! Invocation context: who is running and how to abandon the run.

use tokio_util::sync::CancellationToken;

/// Identity and cancellation for one invocation.
#[derive(Debug, Clone, Default)]
pub struct InvocationContext {
    project: String,
    application: Option<String>,
    resource: String,
    cancel: CancellationToken,
}

impl InvocationContext {
    /// Create a context for `project` and `resource` (the function id).
    pub fn new(project: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            application: None,
            resource: resource.into(),
            cancel: CancellationToken::new(),
        }
    }

    /// Attach the owning application.
    pub fn with_application(mut self, application: impl Into<String>) -> Self {
        let application = application.into();
        self.application = (!application.is_empty()).then_some(application);
        self
    }

    /// Derive cancellation from `parent`.
    pub fn with_cancellation(mut self, parent: &CancellationToken) -> Self {
        self.cancel = parent.child_token();
        self
    }

    /// Project id.
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Application id, if the function belongs to one.
    pub fn application(&self) -> Option<&str> {
        self.application.as_deref()
    }

    /// Resource (function) id.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Token the caller cancels to abandon the invocation.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}
