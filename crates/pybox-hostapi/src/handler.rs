//! The native handler abstraction registered against a dispatch handle.
//!
//! A handler is whatever native closure the embedding application wants the
//! guest to be able to call by name. The engine facade hands it the
//! decoded `(args, kwargs)` pair and gets back either a JSON result, a
//! regular exception (encoded back into the guest as a Python exception at
//! the call site), or a request to escape the guest entirely.

use serde_json::{Map, Value};
use std::fmt;

/// What a handler invocation produced.
pub enum HandlerOutcome {
    /// A normal return value, JSON-encoded and handed back to the guest.
    Result(Value),
    /// The handler raised; the guest call site sees this as a Python
    /// exception but execution continues.
    Raised(String),
    /// The handler wants to abort the entire `exec` call. The guest
    /// unwinds without running any more Python, and the engine facade
    /// re-raises `payload` on the thread that called `exec`.
    Escape(Box<dyn std::any::Any + Send>),
}

impl fmt::Debug for HandlerOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Result(v) => f.debug_tuple("Result").field(v).finish(),
            Self::Raised(msg) => f.debug_tuple("Raised").field(msg).finish(),
            Self::Escape(_) => f.debug_tuple("Escape").field(&"..").finish(),
        }
    }
}

/// A native callback reachable from the guest via one dispatch handle.
pub trait Handler: Send {
    fn call(&mut self, args: Vec<Value>, kwargs: Map<String, Value>) -> HandlerOutcome;
}

/// Blanket impl so any `FnMut` closure with the right shape can be
/// registered directly without a bespoke struct.
pub struct HandlerFn<F>(pub F)
where
    F: FnMut(Vec<Value>, Map<String, Value>) -> HandlerOutcome + Send;

impl<F> Handler for HandlerFn<F>
where
    F: FnMut(Vec<Value>, Map<String, Value>) -> HandlerOutcome + Send,
{
    fn call(&mut self, args: Vec<Value>, kwargs: Map<String, Value>) -> HandlerOutcome {
        (self.0)(args, kwargs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn handler_fn_forwards_call() {
        let mut h = HandlerFn(|args: Vec<Value>, _kwargs| {
            HandlerOutcome::Result(json!(args.len()))
        });
        match h.call(vec![json!(1), json!(2)], Map::new()) {
            HandlerOutcome::Result(v) => assert_eq!(v, json!(2)),
            _ => panic!("expected Result"),
        }
    }

    #[test]
    fn handler_fn_can_raise() {
        let mut h =
            HandlerFn(|_args: Vec<Value>, _kwargs| HandlerOutcome::Raised("boom".into()));
        match h.call(vec![], Map::new()) {
            HandlerOutcome::Raised(msg) => assert_eq!(msg, "boom"),
            _ => panic!("expected Raised"),
        }
    }
}
