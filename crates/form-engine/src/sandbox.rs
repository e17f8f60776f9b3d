//! Name resolution scope handed to the formula evaluator.
//!
//! Names resolve in this order: native helpers, `self`, the interpreter
//! context, then field labels. Every field label looked up is recorded so
//! the engine learns which fields a formula depends on.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;

use form_model::filters;
use form_store::FormNode;
use serde_json::Value;

use crate::bridge::BridgeEnv;
use crate::error::EvalError;
use crate::helpers::{Helper, parse_content};
use crate::view::{cutoff, field_values};

/// What a name resolves to.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    Helper(Helper),
    /// The sandbox itself.
    Scope,
    Value(Value),
    Undefined,
}

pub struct Sandbox {
    node: FormNode,
    env: Rc<BridgeEnv>,
    reads: RefCell<BTreeSet<String>>,
}

impl Sandbox {
    pub(crate) fn new(node: FormNode, env: Rc<BridgeEnv>) -> Self {
        Self {
            node,
            env,
            reads: RefCell::new(BTreeSet::new()),
        }
    }

    pub fn language(&self) -> &str {
        &self.env.config.language
    }

    /// True when `key` would resolve to something other than
    /// [`Binding::Undefined`]. Does not record a read.
    pub fn has(&self, key: &str) -> bool {
        Helper::lookup(key).is_some()
            || key == "self"
            || self.env.context.contains_key(key)
            || self.latest_values(key).is_some_and(|values| !values.is_empty())
    }

    pub fn get(&self, key: &str) -> Binding {
        if key == "undefined" {
            return Binding::Undefined;
        }
        if let Some(helper) = Helper::lookup(key) {
            return Binding::Helper(helper);
        }
        if key == "self" {
            return Binding::Scope;
        }
        if let Some(variable) = self.env.context.get(key) {
            return Binding::Value(variable());
        }
        Binding::Value(self.field(key))
    }

    /// The latest value of every record labelled `label`, as an array of
    /// serialized field values. Empty when the field has no value.
    pub fn field(&self, label: &str) -> Value {
        self.reads.borrow_mut().insert(label.to_string());
        Value::Array(self.latest_values(label).unwrap_or_default())
    }

    /// The latest value of `label` as a formula sees it: measures in base
    /// units, dates in epoch milliseconds.
    pub fn value(&self, label: &str) -> Option<Value> {
        let field = self.field(label);
        let content = field.as_array()?.first()?.get("content")?;
        parse_content(content, self.language(), false)
    }

    pub fn number(&self, label: &str) -> Option<f64> {
        self.value(label).as_ref().and_then(Value::as_f64)
    }

    /// Calls a helper by path, e.g. `"Math.max"` or `"hasOption"`.
    pub fn call(&self, path: &str, args: &[Value]) -> Result<Value, EvalError> {
        Helper::lookup_path(path)
            .ok_or_else(|| EvalError::UnknownHelper(path.to_string()))?
            .call(self, args)
    }

    /// Field labels read so far.
    pub fn reads(&self) -> BTreeSet<String> {
        self.reads.borrow().clone()
    }

    pub(crate) fn take_reads(&self) -> BTreeSet<String> {
        self.reads.take()
    }

    fn latest_values(&self, label: &str) -> Option<Vec<Value>> {
        let filter = filters::latest_with_label(label);
        let values = field_values(
            &self.node,
            cutoff(&self.node, self.env.as_of),
            &*filter,
        );
        values
            .into_values()
            .map(|versions| {
                versions
                    .into_iter()
                    .next()
                    .and_then(|version| serde_json::to_value(version.value).ok())
            })
            .collect()
    }
}

impl fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sandbox")
            .field("node", &self.node.id())
            .field("language", &self.language())
            .field("reads", &self.reads.borrow())
            .finish()
    }
}
