//! Reactive bridge over a store node.
//!
//! A [`FormBridge`] exposes a [`FormNode`] as domain values and keeps
//! computed fields up to date. Each store mutation supersedes the bridge:
//! a new bridge wraps the new node, becomes the lineage's latest and the
//! lineage's listeners receive a [`BridgeChange`]. A lineage holds only its
//! latest bridge; superseded bridges live as long as their handles.
//!
//! Computations are scheduled when a bridge is built and run when
//! [`FormBridge::settle`] polls them. Their results are always applied to
//! the newest bridge of the lineage, and only while the computation is
//! still the pending entry for its field. Writes made while applying a
//! result build the next bridge one level deeper; past
//! [`EngineConfig::max_recompute_depth`] nothing more is scheduled.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use form_model::dates::any_date_to_millis;
use form_model::{
    FieldFormula, FieldMetadata, FieldValidators, FieldValue, Revision, Version, VersionedData,
};
use form_store::{FormNode, NodeChange, Observers, Subscription};
use futures_util::future::join_all;
use futures_util::stream::FuturesUnordered;
use futures_util::{FutureExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::computation::{Computation, ComputationStatus, DependencyCache};
use crate::config::EngineConfig;
use crate::error::{EvalError, Result};
use crate::evaluator::{ClosureEvaluator, FormulaEvaluator};
use crate::helpers::is_truthy;
use crate::provider::{FormulaProvider, InterpreterContext, NoFormulas, ValidatorsProvider};
use crate::sandbox::Sandbox;
use crate::view::{cutoff, field_values, to_field_metadata, to_service, to_service_metadata};

static NEXT_BRIDGE_ID: AtomicU64 = AtomicU64::new(0);

/// Collaborators shared by every bridge of a form tree.
pub(crate) struct BridgeEnv {
    pub(crate) evaluator: Rc<dyn FormulaEvaluator>,
    pub(crate) initial_values: Rc<dyn FormulaProvider>,
    pub(crate) dependent_values: Rc<dyn FormulaProvider>,
    pub(crate) validators: Rc<dyn ValidatorsProvider>,
    pub(crate) context: InterpreterContext,
    pub(crate) config: EngineConfig,
    pub(crate) as_of: Option<i64>,
}

/// State shared by every bridge of a lineage.
struct Lineage {
    latest: RefCell<Rc<BridgeInner>>,
    computations: RefCell<BTreeMap<String, Computation>>,
    cache: Rc<RefCell<DependencyCache>>,
    observers: Observers<BridgeChange>,
    next_computation: Cell<u64>,
    /// Set while a computed value is written.
    applying: Cell<bool>,
    subscription: RefCell<Option<Subscription>>,
    /// One lineage per child node lineage, reused across parent versions.
    children: RefCell<Vec<FormBridge>>,
}

impl Lineage {
    fn new(first: Rc<BridgeInner>) -> Self {
        Self {
            latest: RefCell::new(first),
            computations: RefCell::new(BTreeMap::new()),
            cache: Rc::new(RefCell::new(DependencyCache::new())),
            observers: Observers::new(),
            next_computation: Cell::new(0),
            applying: Cell::new(false),
            subscription: RefCell::new(None),
            children: RefCell::new(Vec::new()),
        }
    }

    fn set_status(&self, label: &str, status: ComputationStatus) {
        if let Some(computation) = self.computations.borrow_mut().get_mut(label) {
            computation.status = status;
        }
    }
}

/// A bridge superseded by a store mutation, with the fields it changed.
#[derive(Debug, Clone)]
pub struct BridgeChange {
    pub bridge: FormBridge,
    pub changed: Vec<FieldMetadata>,
}

/// Metadata that disagrees with the displayed contact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscordantMetadata {
    /// The configured responsible, when it differs from the recorded owner.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// The recorded value date, when it is too far from the contact.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_date: Option<i64>,
}

impl DiscordantMetadata {
    pub fn is_empty(&self) -> bool {
        self.owner.is_none() && self.value_date.is_none()
    }
}

impl Drop for Lineage {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.get_mut().take() {
            subscription.unsubscribe();
        }
    }
}

struct BridgeInner {
    id: u64,
    node: FormNode,
    env: Rc<BridgeEnv>,
    depth: usize,
}

impl BridgeInner {
    fn new(node: FormNode, env: Rc<BridgeEnv>, depth: usize) -> Rc<Self> {
        Rc::new(Self {
            id: NEXT_BRIDGE_ID.fetch_add(1, Ordering::Relaxed),
            node,
            env,
            depth,
        })
    }
}

/// One version of a form lineage.
#[derive(Clone)]
pub struct FormBridge {
    inner: Rc<BridgeInner>,
    lineage: Rc<Lineage>,
}

pub struct BridgeBuilder {
    node: FormNode,
    evaluator: Rc<dyn FormulaEvaluator>,
    initial_values: Rc<dyn FormulaProvider>,
    dependent_values: Rc<dyn FormulaProvider>,
    validators: Rc<dyn ValidatorsProvider>,
    context: InterpreterContext,
    config: EngineConfig,
    as_of: Option<i64>,
}

impl BridgeBuilder {
    #[must_use]
    pub fn evaluator(mut self, evaluator: impl FormulaEvaluator + 'static) -> Self {
        self.evaluator = Rc::new(evaluator);
        self
    }

    #[must_use]
    pub fn initial_values(mut self, provider: impl FormulaProvider + 'static) -> Self {
        self.initial_values = Rc::new(provider);
        self
    }

    #[must_use]
    pub fn dependent_values(mut self, provider: impl FormulaProvider + 'static) -> Self {
        self.dependent_values = Rc::new(provider);
        self
    }

    #[must_use]
    pub fn validators(mut self, provider: impl ValidatorsProvider + 'static) -> Self {
        self.validators = Rc::new(provider);
        self
    }

    #[must_use]
    pub fn context(mut self, context: InterpreterContext) -> Self {
        self.context = context;
        self
    }

    #[must_use]
    pub fn variable(mut self, name: impl Into<String>, value: impl Fn() -> Value + 'static) -> Self {
        self.context.insert(name.into(), Rc::new(value));
        self
    }

    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Displays the form as of a past contact created at `created`:
    /// versions recorded after it are hidden.
    #[must_use]
    pub fn as_of(mut self, created: i64) -> Self {
        self.as_of = Some(created);
        self
    }

    /// Builds the first bridge of a lineage and schedules the initial and
    /// dependent values of the form.
    pub fn build(self) -> Result<FormBridge> {
        self.config.validate()?;
        let env = Rc::new(BridgeEnv {
            evaluator: self.evaluator,
            initial_values: self.initial_values,
            dependent_values: self.dependent_values,
            validators: self.validators,
            context: self.context,
            config: self.config,
            as_of: self.as_of,
        });
        Ok(FormBridge::first(self.node, env))
    }
}

impl FormBridge {
    pub fn builder(node: FormNode) -> BridgeBuilder {
        BridgeBuilder {
            node,
            evaluator: Rc::new(ClosureEvaluator::default()),
            initial_values: Rc::new(NoFormulas),
            dependent_values: Rc::new(NoFormulas),
            validators: Rc::new(NoFormulas),
            context: InterpreterContext::new(),
            config: EngineConfig::default(),
            as_of: None,
        }
    }

    /// Starts a lineage over `node`, listening to every version of the
    /// node's lineage.
    fn first(node: FormNode, env: Rc<BridgeEnv>) -> Self {
        let inner = BridgeInner::new(node, env, 0);
        let lineage = Rc::new(Lineage::new(Rc::clone(&inner)));
        let weak = Rc::downgrade(&lineage);
        let subscription = inner.node.subscribe(move |change: &NodeChange| {
            if let Some(lineage) = weak.upgrade() {
                FormBridge::latest_of(lineage).supersede(change);
            }
        });
        *lineage.subscription.borrow_mut() = Some(subscription);
        let bridge = Self { inner, lineage };
        bridge.schedule(None);
        bridge
    }

    fn latest_of(lineage: Rc<Lineage>) -> Self {
        let inner = Rc::clone(&lineage.latest.borrow());
        Self { inner, lineage }
    }

    fn supersede(&self, change: &NodeChange) {
        let labels: Vec<String> = change.changed_labels().map(str::to_string).collect();
        for label in &labels {
            self.lineage.set_status(label, ComputationStatus::Resolved);
        }
        let depth = if self.lineage.applying.get() {
            self.inner.depth + 1
        } else {
            0
        };
        let changed = change.changed.iter().map(to_field_metadata).collect();
        self.advance(change.node.clone(), &labels, depth, changed);
    }

    /// Replaces this bridge without a store mutation, so listeners see a
    /// computation that ended without writing anything.
    fn prune(&self) {
        self.advance(self.inner.node.clone(), &[], self.inner.depth, Vec::new());
    }

    fn advance(&self, node: FormNode, labels: &[String], depth: usize, changed: Vec<FieldMetadata>) {
        let inner = BridgeInner::new(node, Rc::clone(&self.inner.env), depth);
        *self.lineage.latest.borrow_mut() = Rc::clone(&inner);
        let next = Self {
            inner,
            lineage: Rc::clone(&self.lineage),
        };
        debug!(
            bridge = self.id(),
            next = next.id(),
            node = next.inner.node.id(),
            depth,
            changed = changed.len(),
            "bridge superseded"
        );
        next.schedule(Some(labels));
        self.lineage.observers.notify(&BridgeChange {
            bridge: next,
            changed,
        });
    }

    fn schedule(&self, changed: Option<&[String]>) {
        let Some(template_id) = self.template_id() else {
            return;
        };
        if changed.is_some_and(<[String]>::is_empty) {
            return;
        }
        let env = &self.inner.env;
        if self.inner.depth > env.config.max_recompute_depth {
            warn!(
                bridge = self.id(),
                depth = self.inner.depth,
                max = env.config.max_recompute_depth,
                "recomputation depth exceeded, not scheduling formulas"
            );
            return;
        }
        let anchor_id = self.inner.node.form().anchor_id.as_deref();

        if changed.is_none() {
            for formula in env.initial_values.formulas(anchor_id, Some(template_id)) {
                let label = &formula.metadata.label;
                if self.lineage.computations.borrow().contains_key(label)
                    || !self.values(&*formula.revisions_filter).is_empty()
                {
                    continue;
                }
                trace!(bridge = self.id(), field = %label, "scheduling initial value");
                self.start(formula);
            }
        }

        for formula in env.dependent_values.formulas(anchor_id, Some(template_id)) {
            let run = changed.is_none_or(|labels| {
                self.lineage
                    .cache
                    .borrow()
                    .should_recompute(&formula.formula, labels)
            });
            if run {
                trace!(bridge = self.id(), field = %formula.metadata.label, "scheduling dependent value");
                self.start(formula);
            } else {
                trace!(
                    bridge = self.id(),
                    field = %formula.metadata.label,
                    "dependencies unchanged, skipping"
                );
            }
        }
    }

    /// Records a pending computation of `formula`, replacing any previous
    /// computation of the same field.
    fn start(&self, formula: FieldFormula) {
        let lineage = &self.lineage;
        let id = lineage.next_computation.get();
        lineage.next_computation.set(id + 1);

        let sandbox = Sandbox::new(self.inner.node.clone(), Rc::clone(&self.inner.env));
        let env = Rc::clone(&self.inner.env);
        let cache = Rc::clone(&lineage.cache);
        let text = formula.formula.clone();
        let result = async move {
            let result = env.evaluator.evaluate(&text, &sandbox).await;
            cache.borrow_mut().record(&text, sandbox.take_reads());
            result
        }
        .boxed_local()
        .shared();

        let computation = Computation {
            id,
            metadata: formula.metadata,
            revisions_filter: formula.revisions_filter,
            formula: formula.formula,
            result,
            status: ComputationStatus::Pending,
        };
        lineage
            .computations
            .borrow_mut()
            .insert(computation.metadata.label.clone(), computation);
    }

    /// Runs pending computations until none is left, writing each result
    /// to the newest bridge of the lineage. Computations scheduled by
    /// those writes are picked up as they appear.
    pub async fn settle(&self) {
        let mut started = BTreeSet::new();
        let mut running = FuturesUnordered::new();
        loop {
            for (label, computation) in self.lineage.computations.borrow().iter() {
                if computation.is_pending() && started.insert(computation.id) {
                    let label = label.clone();
                    let id = computation.id;
                    running.push(computation.result().map(move |result| (label, id, result)));
                }
            }
            let Some((label, id, result)) = running.next().await else {
                break;
            };
            self.latest().apply(&label, id, result);
        }
    }

    fn apply(&self, label: &str, id: u64, result: std::result::Result<Value, EvalError>) {
        let lineage = &self.lineage;
        let entry = lineage
            .computations
            .borrow()
            .get(label)
            .filter(|computation| computation.id == id && computation.is_pending())
            .map(|computation| {
                (
                    computation.metadata.clone(),
                    Rc::clone(&computation.revisions_filter),
                )
            });
        let Some((metadata, filter)) = entry else {
            debug!(bridge = self.id(), field = label, computation = id, "dropping stale result");
            return;
        };

        let language = self.inner.env.config.language.clone();
        let value = match result {
            Ok(raw) => FieldValue::from_raw(&raw).map(|value| value.localize(&language)),
            Err(error) => {
                warn!(bridge = self.id(), field = label, %error, "formula evaluation failed");
                lineage.set_status(label, ComputationStatus::Rejected);
                return;
            }
        };
        let current = self.values(&*filter);
        lineage.set_status(label, ComputationStatus::Resolved);
        if value.is_none() && current.is_empty() {
            self.prune();
            return;
        }

        let mut metadata = metadata;
        if metadata.owner.is_none() {
            metadata.owner.clone_from(&self.inner.env.config.responsible);
        }
        let id = current.keys().next().cloned();
        lineage.applying.set(true);
        let written = self.set_value(label, &language, value.as_ref(), id.as_deref(), Some(&metadata));
        lineage.applying.set(false);
        match written {
            Ok(true) => {}
            Ok(false) => self.prune(),
            Err(error) => {
                warn!(bridge = self.id(), field = label, %error, "cannot write computed value");
                self.prune();
            }
        }
    }

    /// Newest bridge of the lineage.
    pub fn latest(&self) -> FormBridge {
        Self::latest_of(Rc::clone(&self.lineage))
    }

    /// True once a successor exists. Obsolete bridges never apply
    /// computation results.
    pub fn is_obsolete(&self) -> bool {
        !Rc::ptr_eq(&self.inner, &self.lineage.latest.borrow())
    }

    /// Process-unique id of this bridge, for log correlation.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn node(&self) -> &FormNode {
        &self.inner.node
    }

    pub fn label(&self) -> &str {
        self.inner.node.label()
    }

    pub fn template_id(&self) -> Option<&str> {
        self.inner.node.template_id()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.env.config
    }

    /// Consecutive computation-driven transitions that led to this bridge.
    pub fn depth(&self) -> usize {
        self.inner.depth
    }

    /// Values visible from the displayed contact whose revisions pass
    /// `filter`.
    pub fn values(
        &self,
        filter: &dyn Fn(&str, &[Version<FieldMetadata>]) -> Vec<Revision>,
    ) -> VersionedData<FieldValue> {
        field_values(&self.inner.node, self.cutoff(), filter)
    }

    pub fn metadata(&self, id: &str, revisions: &[Revision]) -> VersionedData<FieldMetadata> {
        self.inner
            .node
            .metadata(id, revisions)
            .into_iter()
            .map(|(id, versions)| {
                let versions = versions
                    .into_iter()
                    .map(|version| version.map(|meta| to_field_metadata(&meta)))
                    .collect();
                (id, versions)
            })
            .collect()
    }

    /// Writes the content of `value` for `language`; `None` clears it.
    pub fn set_value(
        &self,
        label: &str,
        language: &str,
        value: Option<&FieldValue>,
        id: Option<&str>,
        metadata: Option<&FieldMetadata>,
    ) -> Result<bool> {
        let service = value.map(|value| to_service(&value.clone().localize(language)));
        let metadata = metadata.map(to_service_metadata);
        Ok(self
            .inner
            .node
            .set_value(label, language, service.as_ref(), id, metadata.as_ref())?)
    }

    /// Like [`FormBridge::set_value`] for an untrusted JSON field value,
    /// validated before anything is written. `null` clears the field.
    pub fn set_json_value(
        &self,
        label: &str,
        language: &str,
        value: &Value,
        id: Option<&str>,
        metadata: Option<&FieldMetadata>,
    ) -> Result<bool> {
        let value = match value {
            Value::Null => None,
            json => Some(FieldValue::from_json(json)?),
        };
        self.set_value(label, language, value.as_ref(), id, metadata)
    }

    pub fn set_metadata(&self, meta: &FieldMetadata, id: Option<&str>) -> Result<bool> {
        Ok(self.inner.node.set_metadata(&to_service_metadata(meta), id)?)
    }

    pub fn delete(&self, id: &str) -> bool {
        self.inner.node.delete(id)
    }

    /// Listens to every transition of the lineage.
    pub fn subscribe(&self, listener: impl Fn(&BridgeChange) + 'static) -> Subscription {
        self.lineage.observers.subscribe(listener)
    }

    pub fn is_field_being_computed(&self, label: &str) -> bool {
        self.lineage
            .computations
            .borrow()
            .get(label)
            .is_some_and(Computation::is_pending)
    }

    /// The computation currently recorded for `label`.
    pub fn computation(&self, label: &str) -> Option<Computation> {
        self.lineage.computations.borrow().get(label).cloned()
    }

    /// Field labels `formula` has been seen reading.
    pub fn dependencies(&self, formula: &str) -> Option<BTreeSet<String>> {
        self.lineage
            .cache
            .borrow()
            .dependencies(formula)
            .cloned()
    }

    /// Latest bridges of the child forms. Each child lineage is created on
    /// first access and shared by every bridge of this lineage.
    pub fn children(&self) -> Vec<FormBridge> {
        let newest = Rc::clone(&self.lineage.latest.borrow());
        let mut known = self.lineage.children.borrow_mut();
        known.retain(|bridge| {
            newest
                .node
                .children()
                .iter()
                .any(|child| child.same_lineage(bridge.node()))
        });
        self.inner
            .node
            .children()
            .iter()
            .map(|child| {
                if let Some(bridge) = known
                    .iter()
                    .find(|bridge| bridge.node().same_lineage(child))
                    .map(FormBridge::latest)
                {
                    return bridge;
                }
                let bridge = Self::first(child.clone(), Rc::clone(&self.inner.env));
                known.push(bridge.clone());
                bridge
            })
            .collect()
    }

    pub async fn add_child(&self, anchor_id: &str, template_id: &str, label: &str) -> Result<()> {
        Ok(self.inner.node.add_child(anchor_id, template_id, label).await?)
    }

    pub async fn remove_child(&self, child: &FormBridge) -> Result<()> {
        Ok(self.inner.node.remove_child(child.node()).await?)
    }

    /// Compares `meta` with the configured responsible and the date of the
    /// displayed contact.
    pub fn discordant_metadata(&self, meta: &FieldMetadata) -> DiscordantMetadata {
        let config = &self.inner.env.config;
        let owner = config
            .responsible
            .as_ref()
            .filter(|responsible| meta.owner.as_ref() != Some(*responsible))
            .cloned();
        let displayed = self
            .inner
            .env
            .as_of
            .unwrap_or(self.inner.node.current().created);
        let value_date = meta.value_date.filter(|value_date| {
            let recorded = any_date_to_millis(*value_date).unwrap_or(0);
            let displayed = any_date_to_millis(displayed).unwrap_or(0);
            (recorded - displayed).abs() > config.discordance_window_millis()
        });
        DiscordantMetadata { owner, value_date }
    }

    /// Runs the validators of the form against this bridge's values.
    /// Fields are validated concurrently, the validators of one field in
    /// order. A validator that fails to evaluate counts as satisfied.
    pub async fn validation_errors(&self) -> Vec<(FieldMetadata, String)> {
        let Some(template_id) = self.template_id() else {
            return Vec::new();
        };
        let anchor_id = self.inner.node.form().anchor_id.as_deref();
        let fields = self.inner.env.validators.validators(anchor_id, template_id);
        join_all(fields.into_iter().map(|field| self.field_errors(field)))
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    async fn field_errors(&self, field: FieldValidators) -> Vec<(FieldMetadata, String)> {
        let env = &self.inner.env;
        let mut errors = Vec::new();
        for validator in field.validators {
            let sandbox = Sandbox::new(self.inner.node.clone(), Rc::clone(env));
            match env.evaluator.evaluate(&validator.validation, &sandbox).await {
                Ok(result) if !is_truthy(&result) => {
                    errors.push((field.metadata.clone(), validator.message));
                }
                Ok(_) => {}
                Err(error) => warn!(
                    bridge = self.id(),
                    field = %field.metadata.label,
                    %error,
                    "validator evaluation failed"
                ),
            }
        }
        errors
    }

    fn cutoff(&self) -> Option<i64> {
        cutoff(&self.inner.node, self.inner.env.as_of)
    }
}

impl fmt::Debug for FormBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormBridge")
            .field("id", &self.inner.id)
            .field("node", &self.inner.node)
            .field("depth", &self.inner.depth)
            .field("obsolete", &self.is_obsolete())
            .finish_non_exhaustive()
    }
}
