// Configuration is the nested mapping a contributor hands back after a solve: divider
// settings, resulting rates and the selected variants, keyed by name. It holds plain values
// only and has no link back to the model or the solution it was read from. Rates are exact
// rationals and serialize as integers when integral and as floats otherwise; keys are kept
// in sorted order so the JSON export is stable.

//! Typed, hierarchical plan configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::error::PlanResult;
use crate::core::ratio::Ratio;

/// One configuration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Int(i64),
    Rate(Ratio),
    Flag(bool),
    Text(String),
    List(Vec<ConfigValue>),
    Map(Configuration),
}

impl ConfigValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(v) => Some(*v),
            ConfigValue::Rate(r) => r.to_integer(),
            _ => None,
        }
    }

    pub fn as_rate(&self) -> Option<Ratio> {
        match self {
            ConfigValue::Int(v) => Some(Ratio::from_int(*v)),
            ConfigValue::Rate(r) => Some(*r),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ConfigValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Configuration> {
        match self {
            ConfigValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ConfigValue]> {
        match self {
            ConfigValue::List(v) => Some(v),
            _ => None,
        }
    }
}

impl From<i64> for ConfigValue {
    fn from(v: i64) -> Self {
        ConfigValue::Int(v)
    }
}

impl From<Ratio> for ConfigValue {
    fn from(v: Ratio) -> Self {
        match v.to_integer() {
            Some(i) => ConfigValue::Int(i),
            None => ConfigValue::Rate(v),
        }
    }
}

impl From<bool> for ConfigValue {
    fn from(v: bool) -> Self {
        ConfigValue::Flag(v)
    }
}

impl From<&str> for ConfigValue {
    fn from(v: &str) -> Self {
        ConfigValue::Text(v.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(v: String) -> Self {
        ConfigValue::Text(v)
    }
}

impl From<Configuration> for ConfigValue {
    fn from(v: Configuration) -> Self {
        ConfigValue::Map(v)
    }
}

impl<T: Into<ConfigValue>> From<Vec<T>> for ConfigValue {
    fn from(v: Vec<T>) -> Self {
        ConfigValue::List(v.into_iter().map(Into::into).collect())
    }
}

/// Sorted string-keyed map of configuration values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration {
    entries: BTreeMap<String, ConfigValue>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Configuration::insert`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ConfigValue>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.entries.get(key)
    }

    /// Follow nested maps along `path`.
    pub fn path(&self, path: &[&str]) -> Option<&ConfigValue> {
        let (last, parents) = path.split_last()?;
        let mut map = self;
        for key in parents {
            map = map.get(key)?.as_map()?;
        }
        map.get(last)
    }

    pub fn int(&self, path: &[&str]) -> Option<i64> {
        self.path(path)?.as_int()
    }

    pub fn rate(&self, path: &[&str]) -> Option<Ratio> {
        self.path(path)?.as_rate()
    }

    pub fn text(&self, path: &[&str]) -> Option<&str> {
        self.path(path)?.as_text()
    }

    pub fn map(&self, path: &[&str]) -> Option<&Configuration> {
        self.path(path)?.as_map()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_json(&self) -> PlanResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_json_value(&self) -> PlanResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}
