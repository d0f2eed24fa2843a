//! Named mutation table.
//!
//! Each entry is a closed record that decodes its raw JSON arguments and
//! invokes the domain function. The registry itself never re-validates.

use crate::context::RequestContext;
use crate::error::{DispatchError, MutationError};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Type-erased mutation handler.
pub type MutationFn = dyn Fn(&RequestContext, Value) -> Result<(), MutationError> + Send + Sync;

struct Registered {
    handler: Arc<MutationFn>,
    typed: bool,
}

/// Maps mutation names to handlers.
///
/// Built once before the server starts; dispatch takes `&self` and may run
/// concurrently for different client groups.
#[derive(Default)]
pub struct MutationRegistry {
    mutations: HashMap<String, Registered>,
}

impl MutationRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler whose input is decoded from the raw arguments.
    ///
    /// A decode failure is reported as [`MutationError::InvalidArgs`].
    /// Registering an existing name replaces the previous handler.
    pub fn register<I, F>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        I: DeserializeOwned,
        F: Fn(&RequestContext, I) -> Result<(), MutationError> + Send + Sync + 'static,
    {
        let invoke = move |ctx: &RequestContext, raw: Value| {
            let input: I = serde_json::from_value(raw)
                .map_err(|err| MutationError::InvalidArgs(err.to_string()))?;
            handler(ctx, input)
        };
        self.insert(name.into(), Arc::new(invoke), true)
    }

    /// Exposes a domain function that validates its own arguments.
    pub fn expose<F>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(&RequestContext, Value) -> Result<(), MutationError> + Send + Sync + 'static,
    {
        self.insert(name.into(), Arc::new(handler), false)
    }

    fn insert(&mut self, name: String, handler: Arc<MutationFn>, typed: bool) -> &mut Self {
        if self.mutations.contains_key(&name) {
            tracing::debug!(mutation = %name, "replacing registered mutation");
        }
        self.mutations.insert(name, Registered { handler, typed });
        self
    }

    /// Runs the handler registered under `name`.
    pub fn execute(&self, ctx: &RequestContext, name: &str, args: Value) -> Result<(), DispatchError> {
        let registered = self
            .mutations
            .get(name)
            .ok_or_else(|| DispatchError::NotFound(name.to_string()))?;
        (registered.handler)(ctx, args)?;
        Ok(())
    }

    /// Returns true if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.mutations.contains_key(name)
    }

    /// Returns the registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.mutations.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Returns the number of registered mutations.
    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }
}

impl fmt::Debug for MutationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for name in self.names() {
            let kind = if self.mutations[name].typed { "typed" } else { "exposed" };
            map.entry(&name, &kind);
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde::Deserialize;
    use serde_json::json;
    use syncline_protocol::Actor;

    #[derive(Deserialize)]
    struct CreateUser {
        email: String,
    }

    fn ctx() -> RequestContext {
        RequestContext::new(Actor::user("u", "w"))
    }

    #[test]
    fn typed_handler_receives_decoded_input() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let mut registry = MutationRegistry::new();
        registry.register("user_create", move |_ctx, input: CreateUser| {
            sink.lock().push(input.email);
            Ok(())
        });

        registry
            .execute(&ctx(), "user_create", json!({ "email": "a@b.c" }))
            .unwrap();
        assert_eq!(*seen.lock(), vec!["a@b.c".to_string()]);
    }

    #[test]
    fn bad_args_are_handler_failures() {
        let mut registry = MutationRegistry::new();
        registry.register("user_create", |_ctx, _input: CreateUser| Ok(()));

        let err = registry
            .execute(&ctx(), "user_create", json!({ "mail": 1 }))
            .unwrap_err();
        assert!(matches!(err, DispatchError::Handler(MutationError::InvalidArgs(_))));
    }

    #[test]
    fn unknown_name_is_not_found() {
        let registry = MutationRegistry::new();
        let err = registry.execute(&ctx(), "missing", Value::Null).unwrap_err();
        assert_eq!(err, DispatchError::NotFound("missing".into()));
    }

    #[test]
    fn last_registration_wins() {
        let mut registry = MutationRegistry::new();
        registry
            .expose("issue_resolve", |_ctx, _args| {
                Err(MutationError::Internal("old".into()))
            })
            .expose("issue_resolve", |_ctx, _args| Ok(()));

        assert_eq!(registry.len(), 1);
        assert!(registry.execute(&ctx(), "issue_resolve", json!([])).is_ok());
    }

    #[test]
    fn handler_sees_request_actor() {
        let mut registry = MutationRegistry::new();
        registry.expose("whoami", |ctx, _args| match ctx.actor().workspace_id() {
            Some("w") => Ok(()),
            _ => Err(MutationError::Visible("wrong workspace".into())),
        });

        assert!(registry.execute(&ctx(), "whoami", Value::Null).is_ok());
        let err = registry
            .execute(&RequestContext::new(Actor::system("other")), "whoami", Value::Null)
            .unwrap_err();
        assert!(err.is_visible());
    }

    #[test]
    fn names_are_sorted() {
        let mut registry = MutationRegistry::new();
        registry
            .expose("b", |_c, _a| Ok(()))
            .register("a", |_c, _i: Value| Ok(()));
        assert_eq!(registry.names(), vec!["a", "b"]);
        assert!(registry.contains("a"));
        assert!(!registry.is_empty());
        assert_eq!(format!("{registry:?}"), r#"{"a": "typed", "b": "exposed"}"#);
    }
}
