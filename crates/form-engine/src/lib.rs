//! Reactive computation engine for clinical forms.
//!
//! A [`FormBridge`] wraps a [`form_store::FormNode`], exposes its values as
//! domain [`form_model::FieldValue`]s and evaluates the form's formulas
//! through a [`FormulaEvaluator`]: initial values for empty fields, and
//! dependent values recomputed whenever a field they read changes, until a
//! fixed point is reached.

pub mod bridge;
pub mod computation;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod helpers;
pub mod logging;
pub mod provider;
pub mod sandbox;
mod view;

pub use bridge::{BridgeBuilder, BridgeChange, DiscordantMetadata, FormBridge};
pub use computation::{Computation, ComputationResult, ComputationStatus, DependencyCache};
pub use config::EngineConfig;
pub use error::{EngineError, EvalError, Result};
pub use evaluator::{ClosureEvaluator, FormulaEvaluator};
pub use helpers::Helper;
pub use logging::{LogConfig, LogFormat, init_logging, redact_value, set_log_data};
pub use provider::{FormulaProvider, InterpreterContext, NoFormulas, ValidatorsProvider};
pub use sandbox::{Binding, Sandbox};
