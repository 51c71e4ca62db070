//! Filter rules: the flat rule file and the compiled form
//!
//! A rule file is a TOML array of `[[filter]]` tables using Gmail's
//! export property names:
//!
//! ```toml
//! [[filter]]
//! from = "notifications@github.com"
//! label = "GitHub"
//! shouldArchive = true
//! ```
//!
//! [`compile`] turns those tables into [`Rule`]s: a Gmail search query
//! plus the typed actions to apply to every message it matches.

use crate::action::Action;
use crate::error::{Error, Result};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Free-text search condition.
pub const HAS_THE_WORD: &str = "hasTheWord";
/// Label action: whitespace-separated label names.
pub const LABEL: &str = "label";
pub const MARK_AS_READ: &str = "shouldMarkAsRead";
pub const ARCHIVE: &str = "shouldArchive";
pub const TRASH: &str = "shouldTrash";

/// Conditions that compile to `field:value` terms, in query order.
const FIELD_TERMS: [&str; 3] = ["from", "subject", "to"];

/// Marker Gmail uses in the `hasTheWord` of label-seeding filters.
const SMART_LABEL_MARKER: &str = "^smartlabel";

/// A rule property value.
///
/// Integers keep their type so a rule file round-trips them unquoted.
/// Floats and other scalars are read as their text form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PropValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl<'de> Deserialize<'de> for PropValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(PropValueVisitor)
    }
}

struct PropValueVisitor;

impl Visitor<'_> for PropValueVisitor {
    type Value = PropValue;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a string, boolean or number")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<PropValue, E> {
        Ok(PropValue::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<PropValue, E> {
        Ok(PropValue::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<PropValue, E> {
        Ok(i64::try_from(v).map_or_else(|_| PropValue::Text(v.to_string()), PropValue::Int))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<PropValue, E> {
        Ok(PropValue::Text(v.to_string()))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<PropValue, E> {
        Ok(PropValue::Text(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<PropValue, E> {
        Ok(PropValue::Text(v))
    }
}

impl PropValue {
    /// Read an exported string value, recognising `true`/`false`.
    #[must_use]
    pub fn from_export(value: &str) -> Self {
        match value {
            "true" => Self::Bool(true),
            "false" => Self::Bool(false),
            other => Self::Text(other.to_string()),
        }
    }

    /// Truthiness of a boolean directive. Text values count when they
    /// spell `true` in any case.
    #[must_use]
    pub fn is_true(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Int(_) => false,
            Self::Text(s) => s.eq_ignore_ascii_case("true"),
        }
    }
}

impl fmt::Display for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for PropValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<bool> for PropValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// One filter as written in the rule file: property name to value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlatRule(BTreeMap<String, PropValue>);

impl FlatRule {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<PropValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<PropValue>) {
        self.0.insert(key.to_string(), value.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&PropValue> {
        self.0.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut PropValue> {
        self.0.get_mut(key)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PropValue)> {
        self.0.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whitespace-separated labels of the `label` property.
    #[must_use]
    pub fn labels(&self) -> Vec<String> {
        self.get(LABEL)
            .map(|v| v.to_string().split_whitespace().map(ToString::to_string).collect())
            .unwrap_or_default()
    }
}

impl<'a> IntoIterator for &'a FlatRule {
    type Item = (&'a String, &'a PropValue);
    type IntoIter = std::collections::btree_map::Iter<'a, String, PropValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// The on-disk rule list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleFile {
    #[serde(default, rename = "filter")]
    pub filters: Vec<FlatRule>,
}

impl RuleFile {
    /// Parse a rule list from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rules`] if the text is not a valid rule list.
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Rules(e.to_string()))
    }

    /// Load a rule list from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read and
    /// [`Error::Rules`] if it cannot be parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| Error::Rules(format!("{}: {e}", path.display())))
    }

    /// Render the rule list as TOML.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rules`] if a value cannot be represented.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Rules(e.to_string()))
    }

    /// Write the rule list to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if rendering or writing fails.
    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }
}

/// Compilation switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompileOptions {
    /// Drop Gmail's label-seeding `^smartlabel` pseudo-filters.
    pub skip_smart_labels: bool,
}

/// A compiled rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    /// Search clauses in `hasTheWord, from, subject, to` order.
    pub query_terms: Vec<String>,
    /// Clauses joined with single spaces.
    pub query: String,
    /// Actions in execution order.
    pub actions: Vec<Action>,
    /// The rule as it was read.
    pub source: FlatRule,
}

impl Rule {
    /// Compile a single rule. Never fails: properties that cannot be
    /// executed become [`Action::Unsupported`].
    #[must_use]
    pub fn compile(source: &FlatRule) -> Self {
        let mut query_terms = Vec::new();
        if let Some(words) = source.get(HAS_THE_WORD) {
            query_terms.push(words.to_string());
        }
        for field in FIELD_TERMS {
            if let Some(value) = source.get(field) {
                query_terms.push(format!("{field}:{value}"));
            }
        }
        let query = query_terms.join(" ");

        let mut actions = Vec::new();
        let labels = source.labels();
        if !labels.is_empty() {
            actions.push(Action::AddLabels(labels));
        }
        if source.get(MARK_AS_READ).is_some_and(PropValue::is_true) {
            actions.push(Action::MarkAsRead);
        }
        if source.get(ARCHIVE).is_some_and(PropValue::is_true) {
            actions.push(Action::Archive);
        }
        if source.get(TRASH).is_some_and(PropValue::is_true) {
            actions.push(Action::Trash);
        }
        for (key, value) in source {
            if !is_known_key(key) {
                actions.push(Action::Unsupported {
                    key: key.clone(),
                    value: value.to_string(),
                });
            }
        }

        Self {
            query_terms,
            query,
            actions,
            source: source.clone(),
        }
    }

    /// Whether this is a `^smartlabel` label-seeding filter.
    #[must_use]
    pub fn is_smart_label(source: &FlatRule) -> bool {
        source
            .get(HAS_THE_WORD)
            .is_some_and(|v| v.to_string().contains(SMART_LABEL_MARKER))
    }
}

fn is_known_key(key: &str) -> bool {
    key == HAS_THE_WORD
        || FIELD_TERMS.contains(&key)
        || [LABEL, MARK_AS_READ, ARCHIVE, TRASH].contains(&key)
}

/// Compile a rule list, preserving order.
#[must_use]
pub fn compile(rules: &[FlatRule], options: &CompileOptions) -> Vec<Rule> {
    rules
        .iter()
        .filter(|r| !(options.skip_smart_labels && Rule::is_smart_label(r)))
        .map(Rule::compile)
        .collect()
}
