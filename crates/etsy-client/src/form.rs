//! Form encoding with Etsy's array convention
//!
//! The Etsy v3 API expects list-valued form fields as repeated `key[]=value`
//! pairs, one per element, which plain `application/x-www-form-urlencoded`
//! serializers don't produce. This encoder also preserves field insertion
//! order and drops unset optional fields entirely (an absent field and a
//! field set to empty are different things to the API).

use std::fmt::Write;

/// One form field value: a scalar or a list expanded as `key[]=`.
#[derive(Debug, Clone, PartialEq)]
pub enum FormValue {
    Text(String),
    List(Vec<String>),
}

/// Ordered form fields for a request body.
#[derive(Debug, Clone, Default)]
pub struct FormData {
    fields: Vec<(String, FormValue)>,
}

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a scalar field.
    pub fn text(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.fields
            .push((key.into(), FormValue::Text(value.to_string())));
        self
    }

    /// Append a list field, expanded as repeated `key[]=value` pairs.
    pub fn list<I, T>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: ToString,
    {
        self.fields.push((
            key.into(),
            FormValue::List(values.into_iter().map(|v| v.to_string()).collect()),
        ));
        self
    }

    /// Append a scalar field only when the value is present. `None` is
    /// omitted from the output entirely.
    pub fn maybe_text(self, key: impl Into<String>, value: Option<impl ToString>) -> Self {
        match value {
            Some(v) => self.text(key, v),
            None => self,
        }
    }

    /// Append a list field only when non-empty.
    pub fn maybe_list<T: ToString>(self, key: impl Into<String>, values: &[T]) -> Self {
        if values.is_empty() {
            self
        } else {
            self.list(key, values.iter().map(|v| v.to_string()))
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Encode as a form body. Values are percent-encoded; insertion order
    /// of fields (and element order within lists) is preserved.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.fields {
            match value {
                FormValue::Text(v) => {
                    if !out.is_empty() {
                        out.push('&');
                    }
                    let _ = write!(out, "{key}={}", urlencoding::encode(v));
                }
                FormValue::List(items) => {
                    for item in items {
                        if !out.is_empty() {
                            out.push('&');
                        }
                        let _ = write!(out, "{key}[]={}", urlencoding::encode(item));
                    }
                }
            }
        }
        out
    }
}
