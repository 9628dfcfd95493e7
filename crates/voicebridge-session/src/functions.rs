//! Dispatch table for provider-invoked functions/tools (spec.md §4.8 step 5).
//! Handlers are registered once per session and looked up by name; an
//! unregistered name is always an error rather than a silent no-op.

use std::collections::HashMap;

use futures::future::BoxFuture;
use serde_json::Value;

use voicebridge_core::VoiceError;

pub type HandlerFn = Box<dyn Fn(Value) -> BoxFuture<'static, Result<Value, VoiceError>> + Send + Sync>;

/// The three functions `RealtimeSession` wires up today: `transfer_call`,
/// `create_ticket`, `lookup_customer`.
#[derive(Default)]
pub struct FunctionRegistry {
    handlers: HashMap<&'static str, HandlerFn>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &'static str, handler: HandlerFn) {
        self.handlers.insert(name, handler);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub async fn dispatch(&self, name: &str, arguments: Value) -> Result<Value, VoiceError> {
        match self.handlers.get(name) {
            Some(handler) => handler(arguments).await,
            None => Err(VoiceError::Internal {
                detail: format!("no handler registered for function `{name}`"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn dispatches_to_registered_handler() {
        let mut registry = FunctionRegistry::new();
        registry.register(
            "lookup_customer",
            Box::new(|args: Value| Box::pin(async move { Ok(json!({"echo": args})) })),
        );

        let result = registry.dispatch("lookup_customer", json!({"phone": "+1"})).await.unwrap();
        assert_eq!(result["echo"]["phone"], "+1");
    }

    #[tokio::test]
    async fn unregistered_name_is_an_error() {
        let registry = FunctionRegistry::new();
        let err = registry.dispatch("unknown_tool", Value::Null).await.unwrap_err();
        assert!(matches!(err, VoiceError::Internal { .. }));
    }
}
