//! Configuration consumed by the phase pipeline. The pipeline never owns the
//! storage of these values, it only looks them up by [`ConfigKey`].

use hashbrown::HashMap;
use strum::{EnumIter, EnumString, IntoStaticStr};

/// Sentinel accepted by every phase list meaning "every registered phase".
pub const ALL_PHASES: &str = "ALL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum ConfigKey {
    /// Phases that are skipped
    DisablePhases,
    /// Phases whose bodies run in verbose mode
    VerbosePhases,
    /// Phases whose input tree is dumped
    DumpBefore,
    /// Phases whose output tree is dumped
    DumpAfter,
    /// Phases dumped on both sides
    Dump,
    /// Element names that are never dumped
    ExcludeFromDump,
    /// Report the time spent in each phase
    TimePhases,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValue {
    Names(Vec<String>),
    Flag(bool),
}

#[derive(Debug, Clone, Default)]
pub struct Configuration {
    values: HashMap<ConfigKey, ConfigValue>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: ConfigKey, value: ConfigValue) {
        self.values.insert(key, value);
    }

    pub fn with_names<I, S>(mut self, key: ConfigKey, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set(
            key,
            ConfigValue::Names(names.into_iter().map(Into::into).collect()),
        );
        self
    }

    pub fn with_flag(mut self, key: ConfigKey, value: bool) -> Self {
        self.set(key, ConfigValue::Flag(value));
        self
    }

    pub fn get(&self, key: ConfigKey) -> Option<&ConfigValue> {
        self.values.get(&key)
    }

    /// The list stored under `key`, empty if absent or not a list.
    pub fn names(&self, key: ConfigKey) -> &[String] {
        match self.values.get(&key) {
            Some(ConfigValue::Names(names)) => names,
            _ => &[],
        }
    }

    /// The flag stored under `key`, `false` if absent or not a flag.
    pub fn flag(&self, key: ConfigKey) -> bool {
        matches!(self.values.get(&key), Some(ConfigValue::Flag(true)))
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_missing_keys_read_as_empty() {
        let config = Configuration::new();

        assert!(config.names(ConfigKey::DumpBefore).is_empty());
        assert!(!config.flag(ConfigKey::TimePhases));
    }

    #[test]
    fn test_mismatched_value_kinds_read_as_empty() {
        let config = Configuration::new()
            .with_flag(ConfigKey::DumpAfter, true)
            .with_names(ConfigKey::TimePhases, ["x"]);

        assert!(config.names(ConfigKey::DumpAfter).is_empty());
        assert!(!config.flag(ConfigKey::TimePhases));
    }

    #[test]
    fn test_keys_use_kebab_case_names() {
        assert_eq!(
            ConfigKey::from_str("exclude-from-dump").unwrap(),
            ConfigKey::ExcludeFromDump
        );
        let name: &'static str = ConfigKey::DisablePhases.into();
        assert_eq!(name, "disable-phases");
    }
}
