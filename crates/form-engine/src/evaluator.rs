//! Formula evaluation.
//!
//! The formula language is opaque to the engine: an evaluator receives the
//! formula text and a [`Sandbox`] to resolve names against, and returns a
//! JSON-like result.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use futures_util::FutureExt;
use futures_util::future::{self, LocalBoxFuture};
use serde_json::Value;

use crate::error::EvalError;
use crate::sandbox::Sandbox;

pub trait FormulaEvaluator {
    fn evaluate<'a>(
        &'a self,
        formula: &'a str,
        sandbox: &'a Sandbox,
    ) -> LocalBoxFuture<'a, Result<Value, EvalError>>;
}

type Formula = Rc<dyn Fn(&Sandbox) -> Result<Value, EvalError>>;

/// Evaluator backed by Rust closures registered under their formula text.
#[derive(Clone, Default)]
pub struct ClosureEvaluator {
    formulas: BTreeMap<String, Formula>,
}

impl ClosureEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_formula(
        mut self,
        formula: impl Into<String>,
        body: impl Fn(&Sandbox) -> Result<Value, EvalError> + 'static,
    ) -> Self {
        self.register(formula, body);
        self
    }

    pub fn register(
        &mut self,
        formula: impl Into<String>,
        body: impl Fn(&Sandbox) -> Result<Value, EvalError> + 'static,
    ) {
        self.formulas.insert(formula.into(), Rc::new(body));
    }

    pub fn contains(&self, formula: &str) -> bool {
        self.formulas.contains_key(formula)
    }
}

impl FormulaEvaluator for ClosureEvaluator {
    fn evaluate<'a>(
        &'a self,
        formula: &'a str,
        sandbox: &'a Sandbox,
    ) -> LocalBoxFuture<'a, Result<Value, EvalError>> {
        let result = match self.formulas.get(formula) {
            Some(body) => body(sandbox),
            None => Err(EvalError::UnknownFormula(formula.to_string())),
        };
        future::ready(result).boxed_local()
    }
}

impl fmt::Debug for ClosureEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClosureEvaluator")
            .field("formulas", &self.formulas.keys().collect::<Vec<_>>())
            .finish()
    }
}
