//! Sources of formulas and validators, scoped by the anchor and template
//! of the form being displayed.

use std::collections::BTreeMap;
use std::rc::Rc;

use form_model::{FieldFormula, FieldValidators};
use serde_json::Value;

pub trait FormulaProvider {
    fn formulas(&self, anchor_id: Option<&str>, template_id: Option<&str>) -> Vec<FieldFormula>;
}

impl<F> FormulaProvider for F
where
    F: Fn(Option<&str>, Option<&str>) -> Vec<FieldFormula>,
{
    fn formulas(&self, anchor_id: Option<&str>, template_id: Option<&str>) -> Vec<FieldFormula> {
        self(anchor_id, template_id)
    }
}

pub trait ValidatorsProvider {
    fn validators(&self, anchor_id: Option<&str>, template_id: &str) -> Vec<FieldValidators>;
}

impl<F> ValidatorsProvider for F
where
    F: Fn(Option<&str>, &str) -> Vec<FieldValidators>,
{
    fn validators(&self, anchor_id: Option<&str>, template_id: &str) -> Vec<FieldValidators> {
        self(anchor_id, template_id)
    }
}

/// Provides neither formulas nor validators.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFormulas;

impl FormulaProvider for NoFormulas {
    fn formulas(&self, _anchor_id: Option<&str>, _template_id: Option<&str>) -> Vec<FieldFormula> {
        Vec::new()
    }
}

impl ValidatorsProvider for NoFormulas {
    fn validators(&self, _anchor_id: Option<&str>, _template_id: &str) -> Vec<FieldValidators> {
        Vec::new()
    }
}

/// Extra sandbox variables, evaluated on each lookup.
pub type InterpreterContext = BTreeMap<String, Rc<dyn Fn() -> Value>>;
