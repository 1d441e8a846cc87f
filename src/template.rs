//! `%(keyword)` filename templates.
//!
//! Parameter files describe input and output paths with templates such as
//! `"cmip6.historical.%(model).r1i1p1f1.mon.%(variable).nc"`.
//! [`StringConstructor`] fills those keywords in and can also recover
//! keyword values from a concrete filename.

use crate::errors::{PmpError, Result};
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

#[derive(Debug, Clone, Default)]
pub struct StringConstructor {
    template: String,
    defaults: HashMap<String, String>,
}

impl StringConstructor {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            defaults: HashMap::new(),
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Set a fallback value used when `construct` is not given `key`.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.defaults.insert(key.into(), value.into());
        self
    }

    /// Keywords in order of first appearance, without duplicates.
    pub fn keys(&self) -> Vec<String> {
        template_keys(&self.template)
    }

    /// Replace every keyword. Missing ones are reported and filled with
    /// their default (empty unless [`StringConstructor::set`] was used).
    pub fn construct<K, V>(&self, values: &[(K, V)]) -> String
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut out = self.template.clone();
        for key in self.keys() {
            let value = match values.iter().find(|(k, _)| k.as_ref() == key) {
                Some((_, v)) => v.as_ref().to_string(),
                None => {
                    warn!(keyword = %key, "keyword not provided for filling the template");
                    self.defaults.get(&key).cloned().unwrap_or_default()
                }
            };
            out = out.replace(&format!("%({key})"), &value);
        }
        out
    }

    /// Derive keyword values from a filename produced by this template.
    ///
    /// # Errors
    ///
    /// Returns an error when `name` cannot have been generated by the template.
    pub fn reverse(&self, name: &str) -> Result<BTreeMap<String, String>> {
        let invalid = || PmpError::Generic(format!("Invalid pattern sent: '{name}'"));
        let mut out = BTreeMap::new();
        let mut template = self.template.clone();

        for key in self.keys() {
            let marker = format!("%({key})");
            let mut parts = template.split(marker.as_str());
            let before = parts.next().unwrap_or("");
            let after = parts.next().unwrap_or("");

            let start = name.find(before).ok_or_else(invalid)? + before.len();
            let value = match after.find("%(") {
                None if after.is_empty() => &name[start..],
                None => {
                    let end = name.find(after).ok_or_else(invalid)?;
                    name.get(start..end).ok_or_else(invalid)?
                }
                Some(next) => {
                    let end = name[start..].find(&after[..next]).ok_or_else(invalid)?;
                    &name[start..start + end]
                }
            };
            template = template.replace(&marker, value);
            out.insert(key, value.to_string());
        }

        let pairs: Vec<(&str, &str)> = out.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        if self.construct(&pairs) != name {
            return Err(invalid());
        }
        Ok(out)
    }
}

fn template_keys(template: &str) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for chunk in template.split("%(").skip(1) {
        let key = chunk.split(')').next().unwrap_or("").to_string();
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

/// One-shot template filling.
pub fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    StringConstructor::new(template).construct(values)
}
