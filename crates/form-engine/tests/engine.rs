//! Tests for the reactive bridge: scheduling, fixed point, stale results
//! and validation.

use std::cell::{Cell, RefCell};
use std::io;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use form_engine::helpers::to_js_string;
use form_engine::{
    Binding, BridgeChange, ClosureEvaluator, ComputationStatus, EngineConfig, EngineError,
    EvalError, FormBridge, FormulaEvaluator, LogConfig, LogFormat, Sandbox, logging,
    set_log_data,
};
use form_model::{
    Code, Contact, Content, FieldFormula, FieldMetadata, FieldValidators, FieldValue, FormInstance,
    ModelError, PrimitiveType, Service, ServiceLink, SubContact, Validator, filters,
};
use form_store::{FormNode, NodeFactories};
use futures_util::FutureExt;
use futures_util::future::LocalBoxFuture;
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tracing::Level;

fn formula(label: &str, text: &str) -> FieldFormula {
    FieldFormula::new(
        FieldMetadata::new(label),
        filters::latest_with_label(label),
        text,
    )
}

fn anchored(form_id: &str, service_ids: &[&str]) -> SubContact {
    SubContact {
        form_id: Some(form_id.to_string()),
        services: service_ids
            .iter()
            .map(|id| ServiceLink {
                service_id: (*id).to_string(),
            })
            .collect(),
        ..SubContact::default()
    }
}

fn node(template: &str, current: Contact, history: Vec<Contact>) -> FormNode {
    FormNode::new(
        FormInstance::new("form-1", template),
        Rc::new(current),
        history.into_iter().map(Rc::new).collect(),
        Vec::new(),
        NodeFactories::default(),
    )
    .expect("valid node")
}

fn empty_vitals() -> FormNode {
    node("vitals", Contact::new("ctc", 1_000), Vec::new())
}

/// Writes a number as the user would, reusing the field's record.
fn write(bridge: &FormBridge, label: &str, value: f64) {
    write_value(bridge, label, PrimitiveType::number(value));
}

fn write_value(bridge: &FormBridge, label: &str, value: PrimitiveType) {
    let latest = bridge.latest();
    let filter = filters::latest_with_label(label);
    let id = latest.values(&*filter).into_keys().next();
    latest
        .set_value(label, "en", Some(&FieldValue::new("en", value)), id.as_deref(), None)
        .expect("write succeeds");
}

fn primitive(bridge: &FormBridge, label: &str) -> Option<PrimitiveType> {
    let filter = filters::latest_with_label(label);
    let values = bridge.values(&*filter);
    let versions = values.into_values().next()?;
    versions.first()?.value.primitive("en").cloned()
}

fn number(bridge: &FormBridge, label: &str) -> Option<f64> {
    primitive(bridge, label)?.parse(false)?.as_f64()
}

fn track(bridge: &FormBridge) -> Rc<RefCell<Vec<BridgeChange>>> {
    let changes = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&changes);
    let _subscription = bridge.subscribe(move |change| sink.borrow_mut().push(change.clone()));
    changes
}

fn arithmetic() -> ClosureEvaluator {
    ClosureEvaluator::new()
        .with_formula("a * 2", |sandbox| {
            Ok(sandbox.number("a").map_or(Value::Null, |a| json!(a * 2.0)))
        })
        .with_formula("b + 1", |sandbox| {
            Ok(sandbox.number("b").map_or(Value::Null, |b| json!(b + 1.0)))
        })
        .with_formula("a + 1", |sandbox| {
            Ok(sandbox.number("a").map_or(Value::Null, |a| json!(a + 1.0)))
        })
}

#[tokio::test]
async fn initial_value_fills_empty_field() {
    let bridge = FormBridge::builder(empty_vitals())
        .evaluator(ClosureEvaluator::new().with_formula("42", |_| Ok(json!(42))))
        .config(EngineConfig::default().with_responsible("hcp-9"))
        .initial_values(|_: Option<&str>, template: Option<&str>| {
            if template == Some("vitals") {
                vec![formula("score", "42")]
            } else {
                Vec::new()
            }
        })
        .build()
        .unwrap();
    let changes = track(&bridge);
    assert!(bridge.is_field_being_computed("score"));

    bridge.settle().await;

    let latest = bridge.latest();
    assert_eq!(number(&latest, "score"), Some(42.0));
    assert!(!latest.is_field_being_computed("score"));
    assert_eq!(changes.borrow().len(), 1);
    assert_eq!(changes.borrow()[0].changed[0].label, "score");

    let filter = filters::latest_with_label("score");
    let id = latest.values(&*filter).into_keys().next().unwrap();
    let metadata = latest.metadata(&id, &[None]);
    assert_eq!(metadata[&id][0].value.owner.as_deref(), Some("hcp-9"));
}

#[tokio::test]
async fn initial_value_skips_filled_field() {
    let mut current = Contact::new("ctc", 1_000);
    current
        .services
        .push(Service::new("s1", "score").with_content("en", Content::number(7.0)));
    current.sub_contacts.push(anchored("form-1", &["s1"]));
    let bridge = FormBridge::builder(node("vitals", current, Vec::new()))
        .evaluator(ClosureEvaluator::new().with_formula("42", |_| Ok(json!(42))))
        .initial_values(|_: Option<&str>, _: Option<&str>| vec![formula("score", "42")])
        .build()
        .unwrap();

    assert!(bridge.computation("score").is_none());
    bridge.settle().await;
    assert!(!bridge.is_obsolete());
    assert_eq!(number(&bridge, "score"), Some(7.0));
}

#[tokio::test]
async fn dependent_values_reach_fixed_point() {
    let bridge = FormBridge::builder(empty_vitals())
        .evaluator(arithmetic())
        .dependent_values(|_: Option<&str>, _: Option<&str>| {
            vec![formula("b", "a * 2"), formula("c", "b + 1")]
        })
        .build()
        .unwrap();
    bridge.settle().await;
    assert_eq!(number(&bridge.latest(), "b"), None);

    write(&bridge, "a", 5.0);
    bridge.settle().await;

    let latest = bridge.latest();
    assert_eq!(number(&latest, "b"), Some(10.0));
    assert_eq!(number(&latest, "c"), Some(11.0));
    assert!(!latest.is_field_being_computed("b"));
    assert!(!latest.is_field_being_computed("c"));
    assert_eq!(
        latest.dependencies("b + 1").unwrap().into_iter().collect::<Vec<_>>(),
        ["b"]
    );
}

#[tokio::test]
async fn dependency_gating_skips_unrelated_changes() {
    let evaluations = Rc::new(Cell::new(0));
    let counter = Rc::clone(&evaluations);
    let evaluator = ClosureEvaluator::new().with_formula("a * 2", move |sandbox| {
        counter.set(counter.get() + 1);
        Ok(sandbox.number("a").map_or(Value::Null, |a| json!(a * 2.0)))
    });
    let bridge = FormBridge::builder(empty_vitals())
        .evaluator(evaluator)
        .dependent_values(|_: Option<&str>, _: Option<&str>| vec![formula("b", "a * 2")])
        .build()
        .unwrap();
    bridge.settle().await;
    assert_eq!(evaluations.get(), 1);

    write(&bridge, "note", 1.0);
    bridge.settle().await;
    assert_eq!(evaluations.get(), 1);

    write(&bridge, "a", 3.0);
    bridge.settle().await;
    assert_eq!(evaluations.get(), 2);
    assert_eq!(number(&bridge.latest(), "b"), Some(6.0));
}

/// Answers every formula with the number sent through the gate.
struct Gate {
    receiver: RefCell<Option<oneshot::Receiver<f64>>>,
}

impl FormulaEvaluator for Gate {
    fn evaluate<'a>(
        &'a self,
        _formula: &'a str,
        _sandbox: &'a Sandbox,
    ) -> LocalBoxFuture<'a, Result<Value, EvalError>> {
        let receiver = self.receiver.borrow_mut().take();
        async move {
            match receiver {
                Some(receiver) => receiver
                    .await
                    .map(Value::from)
                    .map_err(|e| EvalError::Failed(e.to_string())),
                None => Ok(Value::Null),
            }
        }
        .boxed_local()
    }
}

#[tokio::test]
async fn stale_results_are_dropped() {
    let (sender, receiver) = oneshot::channel();
    let bridge = FormBridge::builder(empty_vitals())
        .evaluator(Gate {
            receiver: RefCell::new(Some(receiver)),
        })
        .initial_values(|_: Option<&str>, _: Option<&str>| vec![formula("weight", "slow")])
        .build()
        .unwrap();
    let changes = track(&bridge);

    let user = async {
        tokio::task::yield_now().await;
        write(&bridge, "weight", 80.0);
        assert!(bridge.is_obsolete());
        assert!(!bridge.latest().is_field_being_computed("weight"));
        sender.send(60.0).expect("evaluation is waiting");
    };
    tokio::join!(bridge.settle(), user);

    assert_eq!(number(&bridge.latest(), "weight"), Some(80.0));
    assert_eq!(changes.borrow().len(), 1);
    assert_eq!(
        bridge.latest().computation("weight").unwrap().status,
        ComputationStatus::Resolved
    );
}

#[tokio::test]
async fn formula_cycles_are_truncated() {
    let bridge = FormBridge::builder(empty_vitals())
        .evaluator(arithmetic())
        .dependent_values(|_: Option<&str>, _: Option<&str>| {
            vec![formula("a", "b + 1"), formula("b", "a + 1")]
        })
        .config(EngineConfig::default().with_max_recompute_depth(5))
        .build()
        .unwrap();
    bridge.settle().await;

    write(&bridge, "a", 1.0);
    assert_eq!(bridge.latest().depth(), 0);
    bridge.settle().await;

    let latest = bridge.latest();
    assert_eq!(latest.depth(), 6);
    assert_eq!(number(&latest, "b"), Some(6.0));
    assert_eq!(number(&latest, "a"), Some(7.0));
    assert!(!latest.is_field_being_computed("a"));
    assert!(!latest.is_field_being_computed("b"));

    // An external write resets the counter.
    write(&bridge, "a", 100.0);
    assert_eq!(bridge.latest().depth(), 0);
    bridge.settle().await;
    assert_eq!(bridge.latest().depth(), 6);
    assert_eq!(number(&bridge.latest(), "a"), Some(106.0));
}

#[tokio::test]
async fn formula_errors_only_affect_their_field() {
    let evaluator = ClosureEvaluator::new()
        .with_formula("broken", |_| Err(EvalError::Failed("division by zero".to_string())))
        .with_formula("a * 2", |sandbox| {
            Ok(sandbox.number("a").map_or(Value::Null, |a| json!(a * 2.0)))
        });
    let bridge = FormBridge::builder(empty_vitals())
        .evaluator(evaluator)
        .dependent_values(|_: Option<&str>, _: Option<&str>| {
            vec![formula("x", "broken"), formula("b", "a * 2")]
        })
        .build()
        .unwrap();
    write(&bridge, "a", 4.0);
    bridge.settle().await;

    let latest = bridge.latest();
    assert_eq!(number(&latest, "b"), Some(8.0));
    assert_eq!(
        latest.computation("x").unwrap().status,
        ComputationStatus::Rejected
    );
    assert!(!latest.is_field_being_computed("x"));
}

fn vitals_validators(_: Option<&str>, template: &str) -> Vec<FieldValidators> {
    if template != "vitals" {
        return Vec::new();
    }
    vec![
        FieldValidators {
            metadata: FieldMetadata::new("weight"),
            validators: vec![
                Validator::new("notBlank(weight)", "required"),
                Validator::new("weight > 0", "must be positive"),
            ],
        },
        FieldValidators {
            metadata: FieldMetadata::new("height"),
            validators: vec![Validator::new("unknown formula", "never reported")],
        },
    ]
}

#[tokio::test]
async fn validation_reports_falsy_validators() {
    let evaluator = ClosureEvaluator::new()
        .with_formula("notBlank(weight)", |sandbox| {
            sandbox.call("validate.notBlank", &[json!("weight")])
        })
        .with_formula("weight > 0", |sandbox| {
            Ok(json!(sandbox.number("weight").is_some_and(|w| w > 0.0)))
        });
    let bridge = FormBridge::builder(empty_vitals())
        .evaluator(evaluator)
        .validators(vitals_validators)
        .build()
        .unwrap();

    let errors = bridge.validation_errors().await;
    insta::assert_json_snapshot!(errors, @r#"
    [
      [
        {
          "label": "weight"
        },
        "required"
      ],
      [
        {
          "label": "weight"
        },
        "must be positive"
      ]
    ]
    "#);

    write(&bridge, "weight", 70.0);
    assert!(bridge.latest().validation_errors().await.is_empty());
}

#[tokio::test]
async fn sandbox_resolution_order() {
    let checked = Rc::new(Cell::new(false));
    let flag = Rc::clone(&checked);
    let evaluator = ClosureEvaluator::new().with_formula("check", move |sandbox| {
        assert!(matches!(sandbox.get("Math"), Binding::Helper(_)));
        assert_eq!(sandbox.get("self"), Binding::Scope);
        assert_eq!(sandbox.get("undefined"), Binding::Undefined);
        assert_eq!(sandbox.get("weight"), Binding::Value(json!([])));
        assert_eq!(sandbox.get("language"), Binding::Value(json!("fr")));
        assert!(sandbox.has("language"));
        assert!(sandbox.has("parseInt"));
        assert!(!sandbox.has("weight"));
        assert_eq!(
            sandbox.reads().into_iter().collect::<Vec<_>>(),
            ["weight"]
        );
        assert_eq!(sandbox.call("Math.max", &[json!(2), json!(9)])?, json!(9.0));
        assert_eq!(sandbox.call("Promise", &[json!("done")])?, json!("done"));
        assert_eq!(
            sandbox.call("Math", &[]),
            Err(EvalError::UnknownHelper("Math".to_string()))
        );
        flag.set(true);
        Ok(json!(true))
    });
    let bridge = FormBridge::builder(empty_vitals())
        .evaluator(evaluator)
        .validators(|_: Option<&str>, _: &str| {
            vec![FieldValidators {
                metadata: FieldMetadata::new("weight"),
                validators: vec![Validator::new("check", "check failed")],
            }]
        })
        .variable("Math", || json!("shadowed"))
        .variable("language", || json!("fr"))
        .build()
        .unwrap();

    assert!(bridge.validation_errors().await.is_empty());
    assert!(checked.get());
}

#[tokio::test]
async fn option_helpers_read_codes() {
    let evaluator = ClosureEvaluator::new().with_formula("risk", |sandbox| {
        let smoker = sandbox.field("smoker");
        let score = sandbox.call("score", &[smoker.clone()])?;
        let yes = sandbox.call("hasOption", &[smoker.clone(), json!("SMOKER|2|1")])?;
        let label = sandbox.call("text", &[smoker])?;
        Ok(json!(format!(
            "{}:{}:{}",
            to_js_string(&label),
            to_js_string(&score),
            to_js_string(&yes)
        )))
    });
    let bridge = FormBridge::builder(empty_vitals())
        .evaluator(evaluator)
        .dependent_values(|_: Option<&str>, _: Option<&str>| vec![formula("risk", "risk")])
        .build()
        .unwrap();
    let smoker = FieldValue::new("en", PrimitiveType::string("Yes"))
        .with_codes(vec![Code::new("SMOKER|2|1"), Code::new("RISK|3|1")]);
    bridge
        .set_value("smoker", "en", Some(&smoker), None, None)
        .unwrap();
    bridge.settle().await;

    assert_eq!(
        primitive(&bridge.latest(), "risk"),
        Some(PrimitiveType::string("Yes:5:true"))
    );
}

/// A visit form holding one allergy sub-form anchored at `a1`.
fn visit_with_allergy() -> FormNode {
    let current = Rc::new(Contact::new("ctc", 1_000));
    let mut allergy = FormInstance::new("form-2", "allergy");
    allergy.anchor_id = Some("a1".to_string());
    allergy.parent_id = Some("form-1".to_string());
    let child = FormNode::new(
        allergy,
        Rc::clone(&current),
        Vec::new(),
        Vec::new(),
        NodeFactories::default(),
    )
    .unwrap();
    FormNode::new(
        FormInstance::new("form-1", "visit"),
        current,
        Vec::new(),
        vec![child],
        NodeFactories::default(),
    )
    .unwrap()
}

fn severity(sandbox: &Sandbox) -> Result<Value, EvalError> {
    Ok(match sandbox.value("substance") {
        Some(Value::String(substance)) if substance == "peanut" => json!("high"),
        Some(_) => json!("low"),
        None => Value::Null,
    })
}

fn allergy_formulas(anchor: Option<&str>, template: Option<&str>) -> Vec<FieldFormula> {
    if anchor == Some("a1") && template == Some("allergy") {
        vec![formula("severity", "severity")]
    } else {
        Vec::new()
    }
}

#[tokio::test]
async fn child_bridges_bubble_to_the_root() {
    let bridge = FormBridge::builder(visit_with_allergy())
        .evaluator(ClosureEvaluator::new().with_formula("severity", severity))
        .dependent_values(allergy_formulas)
        .build()
        .unwrap();
    let root_changes = track(&bridge);
    assert!(bridge.computation("severity").is_none());

    let children = bridge.children();
    assert_eq!(children.len(), 1);
    let allergy = &children[0];
    assert!(allergy.is_field_being_computed("severity"));
    allergy.settle().await;

    write_value(allergy, "substance", PrimitiveType::string("peanut"));
    allergy.settle().await;
    assert_eq!(
        primitive(&allergy.latest(), "severity"),
        Some(PrimitiveType::string("high"))
    );

    // One root transition per child write, none of them changing root fields.
    assert_eq!(root_changes.borrow().len(), 2);
    assert!(root_changes.borrow().iter().all(|change| change.changed.is_empty()));
    let root = bridge.latest();
    assert!(bridge.is_obsolete());
    let child = &root.children()[0];
    assert_eq!(
        primitive(child, "substance"),
        Some(PrimitiveType::string("peanut"))
    );
    assert_eq!(primitive(child, "severity"), Some(PrimitiveType::string("high")));
}

#[tokio::test]
async fn child_lineages_survive_parent_transitions() {
    let evaluations = Rc::new(Cell::new(0));
    let counter = Rc::clone(&evaluations);
    let evaluator = ClosureEvaluator::new().with_formula("severity", move |sandbox| {
        counter.set(counter.get() + 1);
        severity(sandbox)
    });
    let bridge = FormBridge::builder(visit_with_allergy())
        .evaluator(evaluator)
        .dependent_values(allergy_formulas)
        .build()
        .unwrap();

    let allergy = bridge.children()[0].clone();
    allergy.settle().await;
    write_value(&allergy, "substance", PrimitiveType::string("peanut"));
    allergy.settle().await;
    assert_eq!(evaluations.get(), 2);

    // The newest root hands out the same child lineage.
    let child = bridge.latest().children()[0].clone();
    assert!(!child.is_obsolete());
    assert!(!child.is_field_being_computed("severity"));
    let changes = track(&child);

    write_value(&child, "substance", PrimitiveType::string("milk"));
    bridge.latest().children()[0].settle().await;

    assert_eq!(evaluations.get(), 3);
    assert_eq!(changes.borrow().len(), 2);
    assert_eq!(
        primitive(&allergy.latest(), "severity"),
        Some(PrimitiveType::string("low"))
    );
}

#[test]
fn superseded_versions_are_released() {
    let bridge = FormBridge::builder(empty_vitals()).build().unwrap();
    let contacts: Vec<_> = (0..50)
        .map(|weight| {
            write(&bridge, "weight", f64::from(weight));
            Rc::downgrade(bridge.latest().node().current())
        })
        .collect();

    let alive = contacts
        .iter()
        .filter(|contact| contact.upgrade().is_some())
        .count();
    assert_eq!(alive, 1);
    assert!(bridge.is_obsolete());
    assert_eq!(number(&bridge.latest(), "weight"), Some(49.0));
}

#[test]
fn as_of_hides_later_versions() {
    let mut past = Contact::new("ctc-1", 2_000);
    past.rev = Some("1-a".to_string());
    past.services
        .push(Service::new("s1", "weight").with_content("en", Content::number(70.0)));
    past.sub_contacts.push(anchored("form-1", &["s1"]));
    let mut current = Contact::new("ctc-2", 5_000);
    current
        .services
        .push(Service::new("s1", "weight").with_content("en", Content::number(90.0)));
    current.sub_contacts.push(anchored("form-1", &["s1"]));
    let node = node("vitals", current, vec![past]);

    let live = FormBridge::builder(node.clone()).build().unwrap();
    assert_eq!(number(&live, "weight"), Some(90.0));
    let past = FormBridge::builder(node).as_of(2_000).build().unwrap();
    assert_eq!(number(&past, "weight"), Some(70.0));

    let metadata = live.metadata("s1", &[None, Some("1-a".to_string())]);
    assert_eq!(metadata["s1"].len(), 2);
    assert_eq!(metadata["s1"][0].value.label, "weight");
}

#[test]
fn json_values_are_validated() {
    let bridge = FormBridge::builder(empty_vitals()).build().unwrap();
    let err = bridge
        .set_json_value(
            "weight",
            "en",
            &json!({"content": {"en": {"type": "number", "value": "x"}}}),
            None,
            None,
        )
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Model(ModelError::TagMismatch { .. })
    ));
    assert!(!bridge.is_obsolete());

    assert!(
        bridge
            .set_json_value(
                "weight",
                "en",
                &json!({"content": {"en": {"type": "measure", "value": 72, "unit": "kg"}}}),
                Some("s1"),
                None,
            )
            .unwrap()
    );
    assert_eq!(number(&bridge.latest(), "weight"), Some(72.0));
}

#[test]
fn metadata_discordance() {
    let node = node("vitals", Contact::new("ctc", 1_700_000_000_000), Vec::new());
    let bridge = FormBridge::builder(node)
        .config(EngineConfig::default().with_responsible("hcp-1"))
        .build()
        .unwrap();

    let same_day = FieldMetadata::new("weight")
        .with_owner("hcp-1")
        .with_value_date(20231114);
    assert!(bridge.discordant_metadata(&same_day).is_empty());

    let other = FieldMetadata::new("weight")
        .with_owner("hcp-2")
        .with_value_date(20231110);
    let discordant = bridge.discordant_metadata(&other);
    assert_eq!(discordant.owner.as_deref(), Some("hcp-1"));
    assert_eq!(discordant.value_date, Some(20231110));
}

#[test]
fn invalid_config_is_rejected() {
    let err = FormBridge::builder(empty_vitals())
        .config(EngineConfig::default().with_max_recompute_depth(0))
        .build()
        .unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
}

#[test]
fn metadata_round_trips_through_the_bridge() {
    let bridge = FormBridge::builder(empty_vitals())
        .config(EngineConfig::default().with_responsible("hcp-7"))
        .build()
        .unwrap();
    let meta = FieldMetadata::new("weight").with_owner("hcp-7");
    assert!(bridge.set_metadata(&meta, Some("s1")).unwrap());

    let latest = bridge.latest();
    let metadata = latest.metadata("s1", &[None]);
    assert_eq!(metadata["s1"][0].value.owner.as_deref(), Some("hcp-7"));
    assert!(latest.discordant_metadata(&metadata["s1"][0].value).owner.is_none());
}

/// Log output collected in memory.
#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Captured {
    fn take(&self) -> String {
        String::from_utf8(std::mem::take(&mut *self.0.lock().unwrap())).unwrap()
    }
}

#[tokio::test]
async fn formula_logs_redact_values() {
    let captured = Captured::default();
    let writer = captured.clone();
    let config = LogConfig::default()
        .with_level(Level::DEBUG)
        .with_format(LogFormat::Json)
        .with_env(false);
    let _guard =
        tracing::subscriber::set_default(logging::subscriber(&config, move || writer.clone()));

    let evaluator = ClosureEvaluator::new().with_formula("trace weight", |sandbox| {
        sandbox.call("log", &[json!("weight"), json!(72)])?;
        Ok(json!(true))
    });
    let bridge = FormBridge::builder(empty_vitals())
        .evaluator(evaluator)
        .validators(|_: Option<&str>, _: &str| {
            vec![FieldValidators {
                metadata: FieldMetadata::new("weight"),
                validators: vec![Validator::new("trace weight", "unreachable")],
            }]
        })
        .build()
        .unwrap();

    assert!(bridge.validation_errors().await.is_empty());
    let redacted = captured.take();
    assert!(redacted.contains(r#""line":"[REDACTED]""#), "{redacted}");
    assert!(!redacted.contains("weight 72"));

    set_log_data(true);
    assert!(bridge.validation_errors().await.is_empty());
    set_log_data(false);
    let plain = captured.take();
    assert!(plain.contains(r#""line":"weight 72""#), "{plain}");
}
