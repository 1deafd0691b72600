//! Field definitions.
//!
//! A field's effective attributes are merged from several layers, lowest to
//! highest precedence:
//!
//! 1. defaults shared by all field types
//! 2. the preset for the field's [`FieldType`]
//! 3. attributes supplied by the rowset document
//! 4. per-column overrides from the dataset configuration
//! 5. per-instance property overrides
//!
//! Each layer is a [`FieldAttrs`] bag of optional attributes; [`Field`] is
//! the resolved result.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::sort::SortDir;
use crate::value::Value;

/// Data type of a field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Free text.
    #[default]
    Text,
    /// Integer or float.
    Number,
    /// Boolean.
    Bool,
    /// Calendar date stored as a unix timestamp.
    Date,
    /// Date and time stored as a unix timestamp.
    Datetime,
}

/// Horizontal alignment hint for views.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Align {
    #[default]
    Left,
    Center,
    Right,
}

/// A bag of optional field attributes (one precedence layer).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldAttrs {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub field_type: Option<FieldType>,
    pub text: Option<String>,
    pub align: Option<Align>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub decimals: Option<u32>,
    pub multiple_of: Option<f64>,
    pub maxlen: Option<usize>,
    pub editable: Option<bool>,
    pub focusable: Option<bool>,
    pub visible: Option<bool>,
    pub sortable: Option<bool>,
    pub allow_null: Option<bool>,
    pub nosave: Option<bool>,
    pub default: Option<Value>,
    pub client_default: Option<Value>,
    pub null_text: Option<String>,
    pub empty_text: Option<String>,
    pub true_text: Option<String>,
    pub false_text: Option<String>,
    pub enum_values: Option<Vec<Value>>,
    pub exclude_vals: Option<Vec<Value>>,
    pub lookup_rowset: Option<String>,
    pub lookup_col: Option<String>,
    pub display_col: Option<String>,
}

macro_rules! merge_attrs {
    ($dst:ident, $src:ident; $($attr:ident),* $(,)?) => {
        $(
            if $src.$attr.is_some() {
                $dst.$attr = $src.$attr.clone();
            }
        )*
    };
}

impl FieldAttrs {
    /// Attributes with only a name set.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Builder: set the field type.
    pub fn with_type(mut self, field_type: FieldType) -> Self {
        self.field_type = Some(field_type);
        self
    }

    /// Builder: set the numeric range.
    pub fn with_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    /// Builder: set whether null is accepted.
    pub fn with_allow_null(mut self, allow_null: bool) -> Self {
        self.allow_null = Some(allow_null);
        self
    }

    /// Builder: set the server default.
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Builder: set the default applied to client-inserted rows.
    pub fn with_client_default(mut self, default: impl Into<Value>) -> Self {
        self.client_default = Some(default.into());
        self
    }

    /// Builder: set editability.
    pub fn with_editable(mut self, editable: bool) -> Self {
        self.editable = Some(editable);
        self
    }

    /// Builder: set visibility.
    pub fn with_visible(mut self, visible: bool) -> Self {
        self.visible = Some(visible);
        self
    }

    /// Builder: link the field to a lookup dataset.
    pub fn with_lookup(
        mut self,
        rowset: impl Into<String>,
        lookup_col: impl Into<String>,
        display_col: impl Into<String>,
    ) -> Self {
        self.lookup_rowset = Some(rowset.into());
        self.lookup_col = Some(lookup_col.into());
        self.display_col = Some(display_col.into());
        self
    }

    /// Defaults shared by every field type.
    pub fn base() -> Self {
        Self {
            align: Some(Align::Left),
            allow_null: Some(true),
            editable: Some(true),
            focusable: Some(true),
            visible: Some(true),
            sortable: Some(true),
            nosave: Some(false),
            maxlen: Some(256),
            default: Some(Value::Null),
            null_text: Some(String::new()),
            empty_text: Some(String::new()),
            true_text: Some("true".to_string()),
            false_text: Some("false".to_string()),
            ..Default::default()
        }
    }

    /// Type preset layered over [`FieldAttrs::base`].
    pub fn preset(field_type: FieldType) -> Self {
        match field_type {
            FieldType::Text => Self::default(),
            FieldType::Number | FieldType::Date | FieldType::Datetime => Self {
                align: Some(Align::Right),
                ..Default::default()
            },
            FieldType::Bool => Self {
                align: Some(Align::Center),
                ..Default::default()
            },
        }
    }

    /// Overlay every attribute `over` sets onto `self`.
    pub fn merge(&mut self, over: &FieldAttrs) {
        merge_attrs!(self, over;
            name, field_type, text, align, min, max, decimals, multiple_of, maxlen,
            editable, focusable, visible, sortable, allow_null, nosave, default,
            client_default, null_text, empty_text, true_text, false_text,
            enum_values, exclude_vals, lookup_rowset, lookup_col, display_col,
        );
    }
}

/// Value comparator override.
pub type CompareValsFn = Arc<dyn Fn(&Value, &Value) -> Ordering + Send + Sync>;
/// Display formatter override.
pub type FormatFn = Arc<dyn Fn(&Value) -> String + Send + Sync>;
/// Input converter override.
pub type ConvertFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Non-serializable per-field behavior.
#[derive(Clone, Default)]
pub struct FieldHooks {
    pub compare_vals: Option<CompareValsFn>,
    pub format: Option<FormatFn>,
    pub convert: Option<ConvertFn>,
}

impl fmt::Debug for FieldHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldHooks")
            .field("compare_vals", &self.compare_vals.is_some())
            .field("format", &self.format.is_some())
            .field("convert", &self.convert.is_some())
            .finish()
    }
}

/// Link from a field to the dataset its values are looked up in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupLink {
    /// Registry name of the lookup dataset.
    pub rowset: String,
    /// Column of the lookup dataset matched against this field's value.
    pub lookup_col: String,
    /// Column of the lookup dataset shown instead of the value; the lookup
    /// dataset's name column when unset.
    pub display_col: Option<String>,
}

/// A resolved field.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    /// Index of the field's value slot in every row.
    pub val_index: usize,
    pub field_type: FieldType,
    pub text: String,
    pub align: Align,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub decimals: Option<u32>,
    pub multiple_of: Option<f64>,
    pub maxlen: Option<usize>,
    pub editable: bool,
    pub focusable: bool,
    pub visible: bool,
    pub sortable: bool,
    pub allow_null: bool,
    pub nosave: bool,
    pub default: Value,
    pub client_default: Option<Value>,
    pub null_text: String,
    pub empty_text: String,
    pub true_text: String,
    pub false_text: String,
    pub enum_values: Option<Vec<Value>>,
    pub exclude_vals: Option<Vec<Value>>,
    pub lookup: Option<LookupLink>,
    pub sort_dir: Option<SortDir>,
    pub sort_priority: Option<usize>,
    pub hooks: FieldHooks,
}

impl Field {
    /// Resolve a field from its precedence layers (lowest first).
    pub fn resolve(name: String, val_index: usize, layers: &[&FieldAttrs]) -> Field {
        let field_type = layers
            .iter()
            .rev()
            .find_map(|layer| layer.field_type)
            .unwrap_or_default();

        let mut attrs = FieldAttrs::base();
        attrs.merge(&FieldAttrs::preset(field_type));
        for layer in layers {
            attrs.merge(layer);
        }

        let lookup = attrs.lookup_rowset.clone().map(|rowset| LookupLink {
            rowset,
            lookup_col: attrs.lookup_col.clone().unwrap_or_else(|| "id".to_string()),
            display_col: attrs.display_col.clone(),
        });

        Field {
            text: attrs.text.unwrap_or_else(|| display_name(&name)),
            name,
            val_index,
            field_type,
            align: attrs.align.unwrap_or_default(),
            min: attrs.min,
            max: attrs.max,
            decimals: attrs.decimals,
            multiple_of: attrs.multiple_of,
            maxlen: attrs.maxlen.filter(|_| field_type == FieldType::Text),
            editable: attrs.editable.unwrap_or(true),
            focusable: attrs.focusable.unwrap_or(true),
            visible: attrs.visible.unwrap_or(true),
            sortable: attrs.sortable.unwrap_or(true),
            allow_null: attrs.allow_null.unwrap_or(true),
            nosave: attrs.nosave.unwrap_or(false),
            default: attrs.default.unwrap_or_default(),
            client_default: attrs.client_default,
            null_text: attrs.null_text.unwrap_or_default(),
            empty_text: attrs.empty_text.unwrap_or_default(),
            true_text: attrs.true_text.unwrap_or_else(|| "true".to_string()),
            false_text: attrs.false_text.unwrap_or_else(|| "false".to_string()),
            enum_values: attrs.enum_values,
            exclude_vals: attrs.exclude_vals,
            lookup,
            sort_dir: None,
            sort_priority: None,
            hooks: FieldHooks::default(),
        }
    }

    /// Convert raw input into this field's value domain.
    ///
    /// Unconvertible input is returned unchanged so validation can report it.
    pub fn convert(&self, value: Value) -> Value {
        if let Some(convert) = &self.hooks.convert {
            return convert(value);
        }
        match (self.field_type, value) {
            (FieldType::Number | FieldType::Date | FieldType::Datetime, Value::Text(s)) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    Value::Null
                } else {
                    trimmed.parse::<f64>().map_or(Value::Text(s), Value::number)
                }
            }
            (FieldType::Bool, Value::Text(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Value::Bool(true),
                "false" | "0" | "no" => Value::Bool(false),
                "" => Value::Null,
                _ => Value::Text(s),
            },
            (FieldType::Bool, Value::Int(i)) => Value::Bool(i != 0),
            (_, value) => value,
        }
    }

    /// Format a non-null value for display.
    pub fn format(&self, value: &Value) -> String {
        if let Some(format) = &self.hooks.format {
            return format(value);
        }
        match (self.field_type, value) {
            (FieldType::Number, v) if v.is_number() => match (self.decimals, v.as_f64()) {
                (Some(decimals), Some(f)) => format!("{:.*}", decimals as usize, f),
                _ => v.to_string(),
            },
            (FieldType::Bool, Value::Bool(b)) => {
                if *b {
                    self.true_text.clone()
                } else {
                    self.false_text.clone()
                }
            }
            (FieldType::Date, v) => format_timestamp(v, "%Y-%m-%d"),
            (FieldType::Datetime, v) => format_timestamp(v, "%Y-%m-%d %H:%M:%S"),
            (_, v) => v.to_string(),
        }
    }

    /// Compare two values with the field's comparator.
    pub fn compare_vals(&self, a: &Value, b: &Value) -> Ordering {
        match &self.hooks.compare_vals {
            Some(compare) => compare(a, b),
            None => a.compare(b),
        }
    }
}

fn format_timestamp(value: &Value, pattern: &str) -> String {
    value
        .as_f64()
        .and_then(|secs| chrono::DateTime::from_timestamp(secs.floor() as i64, 0))
        .map_or_else(|| value.to_string(), |dt| dt.format(pattern).to_string())
}

/// Generate display text from a column name: `order_qty` becomes `Order Qty`.
pub fn display_name(name: &str) -> String {
    name.split(['_', ' '])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Pick a unique column name.
///
/// Spaces become underscores, a missing name becomes `f<index>`, and
/// collisions get a numeric suffix starting at 2.
pub fn unique_name(requested: Option<&str>, index: usize, taken: impl Fn(&str) -> bool) -> String {
    let base = match requested {
        Some(name) if !name.trim().is_empty() => name.trim().replace(' ', "_"),
        _ => format!("f{index}"),
    };
    if !taken(&base) {
        return base;
    }
    (2..)
        .map(|n| format!("{base}{n}"))
        .find(|candidate| !taken(candidate))
        .unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_precedence() {
        let rowset = FieldAttrs::named("qty").with_type(FieldType::Number).with_range(Some(0.0), None);
        let col_override = FieldAttrs {
            max: Some(10.0),
            editable: Some(false),
            ..Default::default()
        };
        let prop_override = FieldAttrs {
            editable: Some(true),
            ..Default::default()
        };

        let field = Field::resolve("qty".into(), 0, &[&rowset, &col_override, &prop_override]);
        assert_eq!(field.field_type, FieldType::Number);
        assert_eq!(field.align, Align::Right);
        assert_eq!(field.min, Some(0.0));
        assert_eq!(field.max, Some(10.0));
        assert!(field.editable);
        assert!(field.allow_null);
        assert_eq!(field.maxlen, None);
        assert_eq!(field.text, "Qty");
    }

    #[test]
    fn test_text_defaults() {
        let field = Field::resolve("order_note".into(), 3, &[&FieldAttrs::named("order_note")]);
        assert_eq!(field.field_type, FieldType::Text);
        assert_eq!(field.maxlen, Some(256));
        assert_eq!(field.text, "Order Note");
        assert_eq!(field.val_index, 3);
        assert!(field.default.is_null());
    }

    #[test]
    fn test_unique_name() {
        let taken = ["id", "name", "name2"];
        let is_taken = |n: &str| taken.contains(&n);
        assert_eq!(unique_name(Some("qty"), 0, is_taken), "qty");
        assert_eq!(unique_name(Some("name"), 1, is_taken), "name3");
        assert_eq!(unique_name(Some("unit price"), 2, is_taken), "unit_price");
        assert_eq!(unique_name(None, 4, is_taken), "f4");
    }

    #[test]
    fn test_convert_number_input() {
        let field = Field::resolve("n".into(), 0, &[&FieldAttrs::named("n").with_type(FieldType::Number)]);
        assert_eq!(field.convert(Value::from(" 12 ")), Value::Int(12));
        assert_eq!(field.convert(Value::from("1.5")), Value::Float(1.5));
        assert_eq!(field.convert(Value::from("")), Value::Null);
        assert_eq!(field.convert(Value::from("abc")), Value::from("abc"));
    }

    #[test]
    fn test_format() {
        let mut attrs = FieldAttrs::named("price").with_type(FieldType::Number);
        attrs.decimals = Some(2);
        let price = Field::resolve("price".into(), 0, &[&attrs]);
        assert_eq!(price.format(&Value::Int(3)), "3.00");

        let day = Field::resolve("day".into(), 0, &[&FieldAttrs::named("day").with_type(FieldType::Date)]);
        assert_eq!(day.format(&Value::Int(86_400)), "1970-01-02");

        let mut flag_attrs = FieldAttrs::named("active").with_type(FieldType::Bool);
        flag_attrs.true_text = Some("yes".into());
        let flag = Field::resolve("active".into(), 0, &[&flag_attrs]);
        assert_eq!(flag.format(&Value::Bool(true)), "yes");
        assert_eq!(flag.format(&Value::Bool(false)), "false");
    }
}
