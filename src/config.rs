//! Routing policy of the facade.
//!
//! The defaults match the runtime this allocator was written for: requests
//! under 4000 bytes are pooled in 8-byte size classes and pools compact
//! their frame chains every 300 releases. Each knob can be overridden from
//! the environment:
//! - `SLABARENA_CUTOFF`
//! - `SLABARENA_ALIGNMENT`
//! - `SLABARENA_COMPACT_INTERVAL`

use crate::{error::ConfigError, frame::SLOT_ALIGN, utils::checked_align};

/// Requests strictly below this size are served by pools.
pub const DEFAULT_CUTOFF: usize = 4000;

/// Pool size classes are multiples of this.
pub const DEFAULT_ALIGNMENT: usize = 8;

/// Number of releases on a pool between two compaction passes.
pub const DEFAULT_COMPACT_INTERVAL: usize = 300;

/// Upper bound on the size-class registry of one allocator.
pub const MAX_SIZE_CLASSES: usize = 1 << 16;

const CUTOFF_VAR: &str = "SLABARENA_CUTOFF";
const ALIGNMENT_VAR: &str = "SLABARENA_ALIGNMENT";
const COMPACT_INTERVAL_VAR: &str = "SLABARENA_COMPACT_INTERVAL";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub cutoff: usize,
    pub alignment: usize,
    pub compact_interval: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cutoff: DEFAULT_CUTOFF,
            alignment: DEFAULT_ALIGNMENT,
            compact_interval: DEFAULT_COMPACT_INTERVAL,
        }
    }
}

impl Config {
    #[must_use]
    pub fn with_cutoff(mut self, cutoff: usize) -> Self {
        self.cutoff = cutoff;
        self
    }

    #[must_use]
    pub fn with_alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment;
        self
    }

    #[must_use]
    pub fn with_compact_interval(mut self, compact_interval: usize) -> Self {
        self.compact_interval = compact_interval;
        self
    }

    /// Checks the invariants the facade relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cutoff == 0 {
            return Err(ConfigError::Zero { name: "cutoff" });
        }
        if self.compact_interval == 0 {
            return Err(ConfigError::Zero { name: "compact_interval" });
        }
        if !self.alignment.is_power_of_two() || self.alignment > SLOT_ALIGN {
            return Err(ConfigError::Alignment(self.alignment));
        }
        if self.size_classes().is_none_or(|classes| classes > MAX_SIZE_CLASSES) {
            return Err(ConfigError::Cutoff {
                cutoff: self.cutoff,
                alignment: self.alignment,
            });
        }
        Ok(())
    }

    /// Number of pooled size classes below the cutoff. `None` when the
    /// rounding overflows.
    pub(crate) fn size_classes(&self) -> Option<usize> {
        let top = checked_align(self.cutoff.checked_sub(1)?, self.alignment)?;
        Some(top / self.alignment)
    }

    /// Builds a configuration from the process environment. Unset
    /// variables keep their default.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`Config::from_env`] with a caller-supplied variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            cutoff: parse_var(&lookup, CUTOFF_VAR)?.unwrap_or(defaults.cutoff),
            alignment: parse_var(&lookup, ALIGNMENT_VAR)?.unwrap_or(defaults.alignment),
            compact_interval: parse_var(&lookup, COMPACT_INTERVAL_VAR)?
                .unwrap_or(defaults.compact_interval),
        };
        config.validate()?;
        Ok(config)
    }
}

fn parse_var<F>(lookup: &F, var: &'static str) -> Result<Option<usize>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Parse { var, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert_eq!(config.cutoff, 4000);
        assert_eq!(config.alignment, 8);
        assert_eq!(config.compact_interval, 300);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_bad_values() {
        assert_eq!(
            Config::default().with_alignment(12).validate(),
            Err(ConfigError::Alignment(12))
        );
        assert_eq!(
            Config::default().with_cutoff(0).validate(),
            Err(ConfigError::Zero { name: "cutoff" })
        );
        assert_eq!(
            Config::default().with_compact_interval(0).validate(),
            Err(ConfigError::Zero { name: "compact_interval" })
        );
        assert_eq!(
            Config::default().with_alignment(64).validate(),
            Err(ConfigError::Alignment(64))
        );
    }

    #[test]
    fn cutoff_bounds_the_class_table() {
        let at_cap = Config::default().with_cutoff(MAX_SIZE_CLASSES * DEFAULT_ALIGNMENT + 1);
        assert_eq!(at_cap.size_classes(), Some(MAX_SIZE_CLASSES));
        assert!(at_cap.validate().is_ok());

        for cutoff in [at_cap.cutoff + DEFAULT_ALIGNMENT, usize::MAX >> 20, usize::MAX] {
            assert_eq!(
                Config::default().with_cutoff(cutoff).validate(),
                Err(ConfigError::Cutoff { cutoff, alignment: DEFAULT_ALIGNMENT })
            );
        }

        let max = usize::MAX.to_string();
        let err = Config::from_lookup(lookup_from(&[("SLABARENA_CUTOFF", &max)])).unwrap_err();
        assert!(matches!(err, ConfigError::Cutoff { .. }));
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = Config::from_lookup(lookup_from(&[
            ("SLABARENA_CUTOFF", "2048"),
            ("SLABARENA_COMPACT_INTERVAL", " 10 "),
        ]))
        .unwrap();

        assert_eq!(config.cutoff, 2048);
        assert_eq!(config.alignment, DEFAULT_ALIGNMENT);
        assert_eq!(config.compact_interval, 10);
    }

    #[test]
    fn environment_parse_errors_name_the_variable() {
        let err = Config::from_lookup(lookup_from(&[("SLABARENA_ALIGNMENT", "eight")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Parse {
                var: "SLABARENA_ALIGNMENT",
                value: "eight".to_string()
            }
        );

        let err = Config::from_lookup(lookup_from(&[("SLABARENA_ALIGNMENT", "6")])).unwrap_err();
        assert_eq!(err, ConfigError::Alignment(6));
    }
}
