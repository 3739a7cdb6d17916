//! Self provider: lets the guest read its own identity.

use crate::context::InvocationContext;
use orbit_vm::memory::{status, write_into, write_size};
use orbit_vm::{CapabilityProvider, Errno, HostOperation, ProviderError};
use std::sync::Arc;

/// Identity values exposed to the guest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelfInfo {
    pub project: String,
    pub application: Option<String>,
    pub id: String,
    pub function: String,
}

/// Serves `selfProject`, `selfApplication`, `selfId` and `selfFunction`.
#[derive(Debug, Clone)]
pub struct SelfProvider {
    info: Arc<SelfInfo>,
}

impl SelfProvider {
    /// Expose `info`.
    pub fn new(info: SelfInfo) -> Self {
        Self {
            info: Arc::new(info),
        }
    }

    /// Identity from an invocation context and the function name.
    pub fn from_context(ctx: &InvocationContext, function: impl Into<String>) -> Self {
        Self::new(SelfInfo {
            project: ctx.project().to_string(),
            application: ctx.application().map(str::to_string),
            id: ctx.resource().to_string(),
            function: function.into(),
        })
    }

    fn pair(&self, name: &str, get: fn(&SelfInfo) -> Option<&str>) -> [HostOperation; 2] {
        let size_info = Arc::clone(&self.info);
        let value_info = Arc::clone(&self.info);
        [
            HostOperation::immediate(format!("{name}Size"), 1, move |caller, args| {
                let result = get(&size_info)
                    .ok_or(Errno::NotFound)
                    .and_then(|v| write_size(caller, args[0], v.as_bytes()));
                status(result)
            }),
            HostOperation::immediate(name, 2, move |caller, args| {
                let result = get(&value_info)
                    .ok_or(Errno::NotFound)
                    .and_then(|v| write_into(caller, args[0], args[1], v.as_bytes()));
                status(result)
            }),
        ]
    }
}

impl CapabilityProvider for SelfProvider {
    fn name(&self) -> &str {
        "self"
    }

    fn operations(&mut self) -> Result<Vec<HostOperation>, ProviderError> {
        let mut ops = Vec::with_capacity(8);
        ops.extend(self.pair("selfProject", |i| Some(i.project.as_str())));
        ops.extend(self.pair("selfApplication", |i| i.application.as_deref()));
        ops.extend(self.pair("selfId", |i| Some(i.id.as_str())));
        ops.extend(self.pair("selfFunction", |i| Some(i.function.as_str())));
        Ok(ops)
    }

    fn close(&mut self) -> Result<(), ProviderError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_context() {
        let ctx = InvocationContext::new("proj-1", "fn-9").with_application("shop");
        let provider = SelfProvider::from_context(&ctx, "ping");
        assert_eq!(
            *provider.info,
            SelfInfo {
                project: "proj-1".into(),
                application: Some("shop".into()),
                id: "fn-9".into(),
                function: "ping".into(),
            }
        );
    }

    #[test]
    fn test_operation_names() {
        let mut provider = SelfProvider::new(SelfInfo::default());
        let ops = provider.operations().expect("ops");
        let names: Vec<&str> = ops.iter().map(HostOperation::name).collect();
        assert_eq!(
            names,
            [
                "selfProjectSize",
                "selfProject",
                "selfApplicationSize",
                "selfApplication",
                "selfIdSize",
                "selfId",
                "selfFunctionSize",
                "selfFunction",
            ]
        );
    }
}
