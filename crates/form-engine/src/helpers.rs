//! Native helpers exposed to formulas.
//!
//! Values follow the loose conventions of dynamic formula languages: any
//! value can be coerced to a number, a string or a boolean, and numbers
//! that cannot be represented (NaN, infinities) become `null`.

use chrono::DateTime;
use form_model::dates::{any_date_to_millis, now_millis};
use form_model::{ANY_LANGUAGE, PrimitiveType};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::EvalError;
use crate::logging::redact_value;
use crate::sandbox::Sandbox;

const GLOBALS: &[&str] = &[
    "parseInt",
    "parseFloat",
    "Number",
    "String",
    "Boolean",
    "Date",
    "Math",
    "Array",
    "Object",
    "hasOption",
    "score",
    "parseContent",
    "text",
    "validate",
    "log",
    "Promise",
];

static NULL: Value = Value::Null;

const MATH: &[&str] = &[
    "abs", "ceil", "floor", "round", "max", "min", "pow", "sqrt", "trunc", "sign", "log10", "exp",
];

/// A native helper, possibly a member of a namespace such as `Math`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Helper {
    namespace: Option<&'static str>,
    name: &'static str,
}

impl Helper {
    pub fn lookup(name: &str) -> Option<Self> {
        GLOBALS.iter().find(|global| **global == name).map(|name| Self {
            namespace: None,
            name,
        })
    }

    /// Resolves `Math.max`-style paths.
    pub fn lookup_path(path: &str) -> Option<Self> {
        match path.split_once('.') {
            Some((namespace, member)) => Self::lookup(namespace)?.member(member),
            None => Self::lookup(path),
        }
    }

    pub fn member(&self, name: &str) -> Option<Self> {
        let members: &[&'static str] = match (self.namespace, self.name) {
            (None, "Math") => MATH,
            (None, "validate") => &["notBlank"],
            (None, "Date") => &["now"],
            _ => &[],
        };
        members.iter().find(|member| **member == name).map(|member| Self {
            namespace: Some(self.name),
            name: member,
        })
    }

    pub fn name(&self) -> String {
        match self.namespace {
            Some(namespace) => format!("{namespace}.{}", self.name),
            None => self.name.to_string(),
        }
    }

    pub fn call(&self, sandbox: &Sandbox, args: &[Value]) -> Result<Value, EvalError> {
        let arg = |index: usize| args.get(index).unwrap_or(&NULL);
        match (self.namespace, self.name) {
            (None, "parseInt") => Ok(parse_int_with_radix(arg(0), args.get(1))),
            (None, "parseFloat") => {
                Ok(parse_float(&to_js_string(arg(0))).map_or(Value::Null, Value::from))
            }
            (None, "Number") => Ok(Value::from(to_number(arg(0)))),
            (None, "String") => Ok(Value::String(to_js_string(arg(0)))),
            (None, "Boolean") => Ok(Value::Bool(is_truthy(arg(0)))),
            (Some("Date"), "now") => Ok(Value::from(now_millis())),
            (None, "Date") if args.is_empty() => Ok(Value::from(now_millis())),
            (None, "Date") => date(arg(0)),
            (None, "Array") => Ok(Value::Array(args.to_vec())),
            (None, "Object") => Ok(match arg(0) {
                Value::Object(object) => Value::Object(object.clone()),
                _ => Value::Object(Map::new()),
            }),
            (None, "hasOption") => {
                let option = to_js_string(arg(1));
                Ok(Value::Bool(code_ids(arg(0)).any(|id| {
                    id == option || id.split('|').nth(1) == Some(option.as_str())
                })))
            }
            (None, "score") => Ok(score(arg(0))),
            (None, "parseContent") => Ok(parse_content(
                arg(0),
                sandbox.language(),
                is_truthy(arg(1)),
            )
            .unwrap_or(Value::Null)),
            (None, "text") => Ok(text(arg(0), sandbox.language())),
            (Some("validate"), "notBlank") => {
                // Accepts `(self, label)` as well as `(label)`.
                let label = args.last().map(to_js_string).unwrap_or_default();
                let field = sandbox.field(&label);
                let content = field
                    .as_array()
                    .and_then(|values| values.first())
                    .and_then(|value| value.get("content"));
                let blank = content
                    .and_then(|content| parse_content(content, sandbox.language(), false))
                    .is_none_or(|value| to_js_string(&value).trim().is_empty());
                Ok(Value::Bool(!blank))
            }
            (None, "log") => {
                let line = args.iter().map(to_js_string).collect::<Vec<_>>().join(" ");
                debug!(line = redact_value(&line), "formula log");
                Ok(Value::Null)
            }
            (None, "Promise") => Ok(arg(0).clone()),
            (Some("Math"), name) => math(name, args),
            _ => Err(EvalError::UnknownHelper(self.name())),
        }
    }
}

fn math(name: &str, args: &[Value]) -> Result<Value, EvalError> {
    let numbers: Vec<f64> = args.iter().map(to_number).collect();
    let first = numbers.first().copied().unwrap_or(f64::NAN);
    let result = match name {
        "abs" => first.abs(),
        "ceil" => first.ceil(),
        "floor" => first.floor(),
        // Halves round towards positive infinity.
        "round" => (first + 0.5).floor(),
        "trunc" => first.trunc(),
        "sign" => {
            if first == 0.0 || first.is_nan() {
                first
            } else {
                first.signum()
            }
        }
        "sqrt" => first.sqrt(),
        "log10" => first.log10(),
        "exp" => first.exp(),
        "pow" => first.powf(numbers.get(1).copied().unwrap_or(f64::NAN)),
        "max" => numbers.iter().copied().fold(f64::NEG_INFINITY, |acc, n| {
            if acc.is_nan() || n.is_nan() { f64::NAN } else { acc.max(n) }
        }),
        "min" => numbers.iter().copied().fold(f64::INFINITY, |acc, n| {
            if acc.is_nan() || n.is_nan() { f64::NAN } else { acc.min(n) }
        }),
        other => return Err(EvalError::UnknownHelper(format!("Math.{other}"))),
    };
    Ok(Value::from(result))
}

fn date(value: &Value) -> Result<Value, EvalError> {
    let millis = match value {
        Value::Number(number) => number.as_i64().and_then(any_date_to_millis),
        Value::String(text) => DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|instant| instant.timestamp_millis()),
        Value::Null => Some(now_millis()),
        _ => None,
    };
    millis.map(Value::from).ok_or_else(|| EvalError::InvalidArgument {
        helper: "Date".to_string(),
        message: format!("cannot read a date from {value}"),
    })
}

/// Code ids of a field value, or of the latest value of a field.
/// `parseInt(text, radix)`. A radix of 0 or none detects hexadecimal;
/// any other radix outside 2..=36 yields `null`.
fn parse_int_with_radix(text: &Value, radix: Option<&Value>) -> Value {
    let radix = radix.map(to_number).filter(|radix| radix.is_finite()).map_or(0.0, f64::trunc);
    if radix != 0.0 && !(2.0..=36.0).contains(&radix) {
        return Value::Null;
    }
    parse_int(&to_js_string(text), radix as u32).map_or(Value::Null, Value::from)
}

/// Sum of the numeric code parts (`type|code|version`) of a field's codes.
/// A code without a code part counts as 0; a non-numeric code part makes
/// the whole score `null`.
fn score(item: &Value) -> Value {
    code_ids(item)
        .map(|id| id.split('|').nth(1).map_or(Some(0.0), |code| parse_int(code, 10)))
        .sum::<Option<f64>>()
        .map_or(Value::Null, Value::from)
}

fn code_ids(item: &Value) -> impl Iterator<Item = &str> {
    let item = match item {
        Value::Array(values) => values.first().unwrap_or(&NULL),
        other => other,
    };
    item.get("codes")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|code| code.get("id").and_then(Value::as_str))
}

/// Reads the primitive of `content` for `language`, falling back to the
/// wildcard language, then to any language.
pub fn parse_content(content: &Value, language: &str, to_string: bool) -> Option<Value> {
    let languages = content.as_object()?;
    let primitive = languages
        .get(language)
        .or_else(|| languages.get(ANY_LANGUAGE))
        .or_else(|| languages.values().next())?;
    PrimitiveType::from_json(primitive).ok()?.parse(to_string)
}

/// Display text of one field value or of a list of them.
fn text(item: &Value, language: &str) -> Value {
    let items = match item {
        Value::Null => return Value::Null,
        Value::Array(items) => items.iter().collect::<Vec<_>>(),
        single => vec![single],
    };
    let parts: Vec<String> = items
        .into_iter()
        .filter_map(|item| item.get("content"))
        .filter_map(|content| parse_content(content, language, true))
        .map(|value| to_js_string(&value))
        .filter(|text| !text.is_empty())
        .collect();
    Value::String(parts.join(", "))
}

pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(value) => *value,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

pub fn to_number(value: &Value) -> f64 {
    match value {
        Value::Null => 0.0,
        Value::Bool(value) => f64::from(u8::from(*value)),
        Value::Number(number) => number.as_f64().unwrap_or(f64::NAN),
        Value::String(text) => {
            let text = text.trim();
            if text.is_empty() {
                0.0
            } else {
                text.parse().unwrap_or(f64::NAN)
            }
        }
        Value::Array(values) => match values.as_slice() {
            [] => 0.0,
            [single] => to_number(single),
            _ => f64::NAN,
        },
        Value::Object(_) => f64::NAN,
    }
}

pub fn to_js_string(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(value) => value.to_string(),
        Value::Number(number) => match number.as_f64() {
            Some(n) if n.fract() == 0.0 && n.abs() < 1e21 => format!("{n:.0}"),
            Some(n) => n.to_string(),
            None => number.to_string(),
        },
        Value::String(text) => text.clone(),
        Value::Array(values) => values
            .iter()
            .map(|value| match value {
                Value::Null => String::new(),
                other => to_js_string(other),
            })
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

/// Integer prefix of `text`; radix 0 detects a `0x` prefix.
fn parse_int(text: &str, radix: u32) -> Option<f64> {
    let text = text.trim_start();
    let (negative, rest) = match text.chars().next() {
        Some('-') => (true, &text[1..]),
        Some('+') => (false, &text[1..]),
        _ => (false, text),
    };
    let hex = rest.starts_with("0x") || rest.starts_with("0X");
    let (radix, rest) = match radix {
        0 | 16 if hex => (16, &rest[2..]),
        0 => (10, rest),
        radix => (radix, rest),
    };
    let value = rest
        .chars()
        .map_while(|c| c.to_digit(radix))
        .fold(None, |acc: Option<f64>, digit| {
            Some(acc.unwrap_or(0.0) * f64::from(radix) + f64::from(digit))
        })?;
    Some(if negative { -value } else { value })
}

/// Longest decimal prefix of `text`.
fn parse_float(text: &str) -> Option<f64> {
    let text = text.trim_start();
    let bytes = text.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end += 1;
    }
    let digits_start = end;
    while bytes.get(end).is_some_and(u8::is_ascii_digit) {
        end += 1;
    }
    if bytes.get(end) == Some(&b'.') {
        end += 1;
        while bytes.get(end).is_some_and(u8::is_ascii_digit) {
            end += 1;
        }
    }
    if end == digits_start || &text[digits_start..end] == "." {
        return None;
    }
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exponent = end + 1;
        if matches!(bytes.get(exponent), Some(b'+' | b'-')) {
            exponent += 1;
        }
        if bytes.get(exponent).is_some_and(u8::is_ascii_digit) {
            end = exponent;
            while bytes.get(end).is_some_and(u8::is_ascii_digit) {
                end += 1;
            }
        }
    }
    text[..end].parse().ok()
}
