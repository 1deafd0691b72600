//! Validation pipeline types and built-in checks.
//!
//! Each field has an ordered list of checks: built-ins derived from the
//! field's attributes first, then user validators registered on the
//! dataset. Every check that applies contributes a [`ValidationResult`];
//! together they form the cell's [`CellErrors`]. A cell with no applicable
//! check has no errors entry at all.
//!
//! Validation never fails an operation. It only annotates cell and row
//! state, and the escalation flags on each result decide whether a view may
//! leave the editor or the row while the result is failing.

use std::fmt;
use std::sync::Arc;

use crate::field::{Field, FieldType};
use crate::nav::Nav;
use crate::row::RowId;
use crate::value::Value;

/// Outcome of one check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub message: String,
    pub passed: bool,
    /// A failure still lets the user leave the editor.
    pub must_allow_exit_edit: bool,
    /// A failure prevents leaving the row.
    pub must_not_allow_exit_row: bool,
    /// Reported by the server; kept until the cell is edited again.
    pub server: bool,
}

impl ValidationResult {
    fn check(message: impl Into<String>, passed: bool) -> Self {
        Self {
            message: message.into(),
            passed,
            must_allow_exit_edit: false,
            must_not_allow_exit_row: false,
            server: false,
        }
    }
}

/// Accumulated validation results of one cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellErrors {
    pub results: Vec<ValidationResult>,
    pub passed: bool,
}

impl CellErrors {
    /// Wrap results; `None` if no check applied.
    pub fn from_results(results: Vec<ValidationResult>) -> Option<Self> {
        if results.is_empty() {
            return None;
        }
        let passed = results.iter().all(|r| r.passed);
        Some(Self { results, passed })
    }

    /// A single failing server-reported error.
    pub fn server(message: impl Into<String>) -> Self {
        let mut result = ValidationResult::check(message, false);
        result.server = true;
        Self {
            results: vec![result],
            passed: false,
        }
    }

    /// Failing results.
    pub fn failures(&self) -> impl Iterator<Item = &ValidationResult> {
        self.results.iter().filter(|r| !r.passed)
    }

    /// Message of the first failing result.
    pub fn first_message(&self) -> Option<&str> {
        self.failures().next().map(|r| r.message.as_str())
    }

    /// Returns `true` if every failing result lets the user leave the editor.
    pub fn allows_exit_edit(&self) -> bool {
        self.failures().all(|r| r.must_allow_exit_edit)
    }

    /// Returns `true` if some failing result forbids leaving the row.
    pub fn forbids_exit_row(&self) -> bool {
        self.failures().any(|r| r.must_not_allow_exit_row)
    }

    /// Returns `true` if any result came from the server.
    pub fn is_server(&self) -> bool {
        self.results.iter().any(|r| r.server)
    }
}

/// Verdict of a user check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    /// Fail with the validator's own message.
    Fail,
    /// Fail with a specific message.
    FailWith(String),
}

impl From<bool> for Verdict {
    fn from(passed: bool) -> Self {
        if passed { Verdict::Pass } else { Verdict::Fail }
    }
}

/// What a check can see besides the value.
pub struct ValidationCtx<'a> {
    pub nav: &'a Nav,
    pub row: RowId,
    /// Field being validated; `None` for row validators.
    pub fi: Option<usize>,
}

impl ValidationCtx<'_> {
    /// Field being validated.
    pub fn field(&self) -> Option<&Field> {
        self.fi.map(|fi| self.nav.schema().field(fi))
    }

    /// Committed value of another cell of the same row.
    pub fn cell_val(&self, col: &str) -> &Value {
        self.nav.cell_val(self.row, col)
    }
}

/// Cell check function.
pub type CheckFn = Arc<dyn Fn(&Value, &ValidationCtx<'_>) -> Verdict + Send + Sync>;
/// Row check function.
pub type RowCheckFn = Arc<dyn Fn(&ValidationCtx<'_>) -> Verdict + Send + Sync>;

/// A user-defined cell validator.
#[derive(Clone)]
pub struct Validator {
    pub message: String,
    pub must_allow_exit_edit: bool,
    pub must_not_allow_exit_row: bool,
    check: CheckFn,
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator")
            .field("message", &self.message)
            .field("must_allow_exit_edit", &self.must_allow_exit_edit)
            .field("must_not_allow_exit_row", &self.must_not_allow_exit_row)
            .finish_non_exhaustive()
    }
}

impl Validator {
    /// Create a validator with a default failure message.
    pub fn new<F>(message: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Value, &ValidationCtx<'_>) -> Verdict + Send + Sync + 'static,
    {
        Self {
            message: message.into(),
            must_allow_exit_edit: false,
            must_not_allow_exit_row: false,
            check: Arc::new(check),
        }
    }

    /// Builder: failures still let the user leave the editor.
    pub fn must_allow_exit_edit(mut self) -> Self {
        self.must_allow_exit_edit = true;
        self
    }

    /// Builder: failures prevent leaving the row.
    pub fn must_not_allow_exit_row(mut self) -> Self {
        self.must_not_allow_exit_row = true;
        self
    }

    /// Run the check.
    pub fn run(&self, value: &Value, ctx: &ValidationCtx<'_>) -> ValidationResult {
        let (passed, message) = match (self.check)(value, ctx) {
            Verdict::Pass => (true, self.message.clone()),
            Verdict::Fail => (false, self.message.clone()),
            Verdict::FailWith(message) => (false, message),
        };
        ValidationResult {
            message,
            passed,
            must_allow_exit_edit: self.must_allow_exit_edit,
            must_not_allow_exit_row: self.must_not_allow_exit_row,
            server: false,
        }
    }
}

/// A user-defined row validator, run after all cell checks.
#[derive(Clone)]
pub struct RowValidator {
    pub message: String,
    pub must_not_allow_exit_row: bool,
    check: RowCheckFn,
}

impl fmt::Debug for RowValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowValidator")
            .field("message", &self.message)
            .field("must_not_allow_exit_row", &self.must_not_allow_exit_row)
            .finish_non_exhaustive()
    }
}

impl RowValidator {
    pub fn new<F>(message: impl Into<String>, check: F) -> Self
    where
        F: Fn(&ValidationCtx<'_>) -> Verdict + Send + Sync + 'static,
    {
        Self {
            message: message.into(),
            must_not_allow_exit_row: false,
            check: Arc::new(check),
        }
    }

    /// Builder: failures prevent leaving the row.
    pub fn must_not_allow_exit_row(mut self) -> Self {
        self.must_not_allow_exit_row = true;
        self
    }

    /// Run the check; `None` if it passed, otherwise the failure message.
    pub fn run(&self, ctx: &ValidationCtx<'_>) -> Option<String> {
        match (self.check)(ctx) {
            Verdict::Pass => None,
            Verdict::Fail => Some(self.message.clone()),
            Verdict::FailWith(message) => Some(message),
        }
    }
}

fn trim_float(f: f64) -> String {
    Value::number(f).to_string()
}

/// Checks derived from a field's attributes, in pipeline order.
///
/// Null short-circuits: it fails when the field disallows null and is
/// otherwise not checked at all.
pub fn builtin_results(field: &Field, value: &Value) -> Vec<ValidationResult> {
    if value.is_null() {
        if field.allow_null {
            return Vec::new();
        }
        return vec![ValidationResult::check("Value is required", false)];
    }

    let mut results = Vec::new();
    match field.field_type {
        FieldType::Number => {
            let number = value.as_f64().filter(|f| !f.is_nan());
            results.push(ValidationResult::check("Invalid number", number.is_some()));
            let Some(n) = number else {
                return results;
            };
            if let Some(m) = field.multiple_of {
                let ok = m == 0.0 || ((n / m).round() * m - n).abs() < 1e-9;
                let message = if m == 1.0 {
                    "Value must be an integer".to_string()
                } else {
                    format!("Value must be a multiple of {}", trim_float(m))
                };
                results.push(ValidationResult::check(message, ok));
            }
            if let Some(min) = field.min {
                results.push(ValidationResult::check(
                    format!("Value must be at least {}", trim_float(min)),
                    n >= min,
                ));
            }
            if let Some(max) = field.max {
                results.push(ValidationResult::check(
                    format!("Value must be at most {}", trim_float(max)),
                    n <= max,
                ));
            }
        }
        FieldType::Date | FieldType::Datetime => {
            results.push(ValidationResult::check("Invalid date", value.is_number()));
        }
        FieldType::Bool => {
            results.push(ValidationResult::check("Invalid boolean", value.as_bool().is_some()));
        }
        FieldType::Text => {
            if let Some(maxlen) = field.maxlen {
                let len = value.to_string().chars().count();
                results.push(ValidationResult::check(
                    format!("Text is too long (maximum {maxlen} characters)"),
                    len <= maxlen,
                ));
            }
        }
    }

    if let Some(allowed) = &field.enum_values {
        results.push(ValidationResult::check("Value is not in the list", allowed.contains(value)));
    }
    results
}

/// Result of a primary-key uniqueness check.
pub(crate) fn unique_result(duplicate: bool) -> ValidationResult {
    ValidationResult::check("Duplicate key", !duplicate)
}

/// Result of a parent-reference check in a hierarchical dataset.
pub(crate) fn parent_result(acyclic: bool) -> ValidationResult {
    ValidationResult::check("Row cannot be its own ancestor", acyclic)
}

/// Result of a lookup membership check.
pub(crate) fn lookup_result(rowset: &str, found: bool) -> ValidationResult {
    ValidationResult::check(format!("Value not found in {rowset}"), found)
}
