//! Call envelopes: the unit of work submitted to the executors.
//!
//! An envelope binds a [`CallTarget`] to one set of arguments. Batches
//! are usually built through [`normalize_call_batch`], which accepts the
//! caller-friendly parameter shapes and produces a uniform envelope list.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Positional and named arguments for a single call.
///
/// Arguments are JSON values so an envelope can be shipped to a worker
/// process unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallArgs {
    pub positional: Vec<Value>,
    pub named: BTreeMap<String, Value>,
}

impl CallArgs {
    /// Arguments consisting of a single positional value.
    pub fn single(value: Value) -> Self {
        Self {
            positional: vec![value],
            named: BTreeMap::new(),
        }
    }

    /// Arguments from explicit positional values.
    pub fn positional(values: Vec<Value>) -> Self {
        Self {
            positional: values,
            named: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }
}

/// An operation invocable with [`CallArgs`].
///
/// Targets meant for the process pool must also be registered in the
/// [`registry`](crate::registry) so a re-executed worker binary can
/// resolve them by name.
pub trait CallTarget: Send + Sync {
    /// Name used in diagnostics and for out-of-process dispatch.
    fn name(&self) -> &str;

    /// Run the operation.
    fn invoke(&self, args: &CallArgs) -> Result<Value>;
}

/// Adapter giving a closure a diagnostic name.
pub struct FnTarget<F> {
    name: String,
    f: F,
}

impl<F> FnTarget<F>
where
    F: Fn(&CallArgs) -> Result<Value> + Send + Sync,
{
    pub fn new<S: Into<String>>(name: S, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> CallTarget for FnTarget<F>
where
    F: Fn(&CallArgs) -> Result<Value> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, args: &CallArgs) -> Result<Value> {
        (self.f)(args)
    }
}

impl<F> fmt::Debug for FnTarget<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTarget").field("name", &self.name).finish()
    }
}

/// Shorthand for wrapping a closure as a shareable [`CallTarget`].
pub fn target<S, F>(name: S, f: F) -> Arc<dyn CallTarget>
where
    S: Into<String>,
    F: Fn(&CallArgs) -> Result<Value> + Send + Sync + 'static,
{
    Arc::new(FnTarget::new(name, f))
}

/// One unit of work: a target plus the arguments for a single call.
///
/// Immutable once constructed; consumed exactly once by a worker.
#[derive(Clone)]
pub struct CallEnvelope {
    target: Arc<dyn CallTarget>,
    args: CallArgs,
}

impl CallEnvelope {
    pub fn new(target: Arc<dyn CallTarget>, args: CallArgs) -> Self {
        Self { target, args }
    }

    pub fn target_name(&self) -> &str {
        self.target.name()
    }

    pub fn args(&self) -> &CallArgs {
        &self.args
    }

    /// Human-readable call string, e.g. `reboot("vm-3", hard=true)`.
    pub fn describe(&self) -> String {
        let mut parts: Vec<String> = self.args.positional.iter().map(Value::to_string).collect();
        parts.extend(self.args.named.iter().map(|(k, v)| format!("{k}={v}")));
        format!("{}({})", self.target.name(), parts.join(", "))
    }

    /// Run the target with this envelope's arguments.
    pub fn invoke(&self) -> Result<Value> {
        self.target.invoke(&self.args)
    }
}

impl fmt::Debug for CallEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallEnvelope")
            .field("target", &self.target.name())
            .field("args", &self.args)
            .finish()
    }
}

/// Build a uniform envelope list from per-call parameters.
///
/// `params` must be a JSON array in one of two shapes:
///
/// - bare values: each element becomes the sole positional argument, or
/// - pairs: each element is `[positional-array, named-object]`.
///
/// The shape is chosen by the first element. An empty array yields an
/// empty batch and no worker is ever launched for it.
///
/// # Errors
///
/// [`Error::InvalidParams`] when `params` is not an array, or a
/// pair-shaped element does not match `(sequence, mapping)`.
pub fn normalize_call_batch(
    target: Arc<dyn CallTarget>,
    params: &Value,
) -> Result<Vec<CallEnvelope>> {
    let items = params
        .as_array()
        .ok_or_else(|| Error::invalid_params("per-call parameters must be a list"))?;

    if items.is_empty() {
        return Ok(Vec::new());
    }

    if !items[0].is_array() {
        // List of bare values.
        return Ok(items
            .iter()
            .map(|value| CallEnvelope::new(target.clone(), CallArgs::single(value.clone())))
            .collect());
    }

    items
        .iter()
        .map(|item| Ok(CallEnvelope::new(target.clone(), pair_args(item)?)))
        .collect()
}

fn pair_args(item: &Value) -> Result<CallArgs> {
    let pair = item.as_array().ok_or_else(|| {
        Error::invalid_params("parameter elements must all be pairs when the first one is")
    })?;

    let (positional, named) = match pair.as_slice() {
        [positional, named] => (positional, named),
        _ => {
            return Err(Error::invalid_params(
                "a parameter pair must have exactly two elements",
            ))
        }
    };

    let positional = positional
        .as_array()
        .ok_or_else(|| Error::invalid_params("the first element of a pair must be a list"))?;
    let named = named
        .as_object()
        .ok_or_else(|| Error::invalid_params("the second element of a pair must be a mapping"))?;

    Ok(CallArgs {
        positional: positional.clone(),
        named: named
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_target() -> Arc<dyn CallTarget> {
        target("echo", |args: &CallArgs| {
            Ok(args.positional.first().cloned().unwrap_or(Value::Null))
        })
    }

    #[test]
    fn test_bare_values_become_sole_positional() {
        let batch = normalize_call_batch(echo_target(), &json!([1, "two", null])).unwrap();

        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].args().positional, vec![json!(1)]);
        assert_eq!(batch[1].args().positional, vec![json!("two")]);
        assert!(batch[2].args().named.is_empty());
    }

    #[test]
    fn test_pairs_carry_positional_and_named() {
        let params = json!([[[1, 2], { "mode": "fast" }], [[3], {}]]);
        let batch = normalize_call_batch(echo_target(), &params).unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].args().positional, vec![json!(1), json!(2)]);
        assert_eq!(batch[0].args().named.get("mode"), Some(&json!("fast")));
        assert!(batch[1].args().named.is_empty());
    }

    #[test]
    fn test_empty_batch() {
        let batch = normalize_call_batch(echo_target(), &json!([])).unwrap();
        assert!(batch.is_empty());
    }

    #[test]
    fn test_non_list_params_rejected() {
        let err = normalize_call_batch(echo_target(), &json!({"a": 1})).unwrap_err();
        assert!(matches!(err, Error::InvalidParams(_)));
    }

    #[test]
    fn test_malformed_pair_rejected() {
        // Second pair element must be a mapping.
        let err = normalize_call_batch(echo_target(), &json!([[[1], 5]])).unwrap_err();
        assert!(matches!(err, Error::InvalidParams(_)));

        let err = normalize_call_batch(echo_target(), &json!([[[1], {}, 3]])).unwrap_err();
        assert!(matches!(err, Error::InvalidParams(_)));
    }

    #[test]
    fn test_describe_renders_call_string() {
        let params = json!([[["vm-3"], { "hard": true }]]);
        let batch = normalize_call_batch(target("reboot", |_| Ok(Value::Null)), &params).unwrap();

        assert_eq!(batch[0].describe(), "reboot(\"vm-3\", hard=true)");
    }

    #[test]
    fn test_invoke_runs_target() {
        let batch = normalize_call_batch(echo_target(), &json!([41])).unwrap();
        assert_eq!(batch[0].invoke().unwrap(), json!(41));
    }
}
