//! Formula evaluations and the dependencies they revealed.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use form_model::{FieldMetadata, RevisionsFilter};
use futures_util::future::{LocalBoxFuture, Shared};
use serde_json::Value;

use crate::error::EvalError;

/// Result of one evaluation, awaitable any number of times.
pub type ComputationResult = Shared<LocalBoxFuture<'static, Result<Value, EvalError>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputationStatus {
    /// Evaluating, or waiting to be written.
    Pending,
    /// Written, superseded by an edit of the field, or without effect.
    Resolved,
    /// The formula failed.
    Rejected,
}

/// One evaluation of the formula of a field.
#[derive(Clone)]
pub struct Computation {
    pub(crate) id: u64,
    pub metadata: FieldMetadata,
    pub revisions_filter: RevisionsFilter,
    pub formula: String,
    pub(crate) result: ComputationResult,
    pub status: ComputationStatus,
}

impl Computation {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The evaluation itself. Nothing runs until it is polled.
    pub fn result(&self) -> ComputationResult {
        self.result.clone()
    }

    pub fn is_pending(&self) -> bool {
        self.status == ComputationStatus::Pending
    }
}

impl fmt::Debug for Computation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computation")
            .field("id", &self.id)
            .field("label", &self.metadata.label)
            .field("formula", &self.formula)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Field labels read by each formula, accumulated over evaluations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyCache {
    reads: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the labels read by one evaluation of `formula`.
    pub fn record(&mut self, formula: &str, labels: impl IntoIterator<Item = String>) {
        self.reads
            .entry(formula.to_string())
            .or_default()
            .extend(labels);
    }

    pub fn dependencies(&self, formula: &str) -> Option<&BTreeSet<String>> {
        self.reads.get(formula)
    }

    /// A formula is skipped only when its dependencies are known, not
    /// empty and disjoint from `changed`.
    pub fn should_recompute(&self, formula: &str, changed: &[String]) -> bool {
        match self.reads.get(formula) {
            Some(labels) if !labels.is_empty() => {
                changed.iter().any(|label| labels.contains(label))
            }
            _ => true,
        }
    }

    pub fn len(&self) -> usize {
        self.reads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reads.is_empty()
    }
}
