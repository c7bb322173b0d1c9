//! Sampler parameters and the overlay rules for changing them.

use std::collections::BTreeMap;
use std::str::FromStr;
use crate::error::{GenerationError, Result};

/// Every field name a [`ConfigOverrides`] may carry.
pub const FIELDS: [&str; 8] = [
    "steps",
    "sigma_min",
    "sigma_max",
    "rho",
    "s_churn",
    "s_min",
    "s_max",
    "s_noise",
];

/// Parameters of the sampling trajectory.
///
/// Values are never mutated in place by the generator: overlays produce a new
/// config, and the config in effect when a batch starts governs that batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationConfig {
    /// Number of denoising steps
    pub steps: usize,
    /// Lowest noise level of the schedule
    pub sigma_min: f64,
    /// Highest noise level of the schedule
    pub sigma_max: f64,
    /// Karras schedule curvature
    pub rho: f64,
    /// Strength of stochastic noise re-injection
    pub s_churn: f64,
    /// Lowest noise level at which churn applies
    pub s_min: f64,
    /// Highest noise level at which churn applies, may be infinite
    pub s_max: f64,
    /// Scale of the re-injected noise
    pub s_noise: f64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            steps: 18,
            sigma_min: 0.002,
            sigma_max: 80.0,
            rho: 7.0,
            s_churn: 0.0,
            s_min: 0.0,
            s_max: f64::INFINITY,
            s_noise: 1.0,
        }
    }
}

impl GenerationConfig {
    /// Overlay `overrides` onto this config.
    ///
    /// Fields named in `overrides` are replaced, all others retained. Unknown field
    /// names and values outside a field's domain are rejected.
    pub fn merge(&self, overrides: &ConfigOverrides) -> Result<Self> {
        let mut merged = *self;
        for (name, &value) in overrides.iter() {
            merged.set(name, value)?;
        }
        merged.validate()?;
        Ok(merged)
    }

    /// Check every field against its domain.
    pub fn validate(&self) -> Result<()> {
        if self.steps == 0 {
            return Err(invalid("steps", "must be at least 1"));
        }
        if !(self.sigma_min.is_finite() && self.sigma_min > 0.0) {
            return Err(invalid("sigma_min", "must be a positive finite number"));
        }
        if !(self.sigma_max.is_finite() && self.sigma_max > self.sigma_min) {
            return Err(invalid("sigma_max", "must be finite and greater than sigma_min"));
        }
        if !(self.rho.is_finite() && self.rho > 0.0) {
            return Err(invalid("rho", "must be a positive finite number"));
        }
        if !(self.s_churn.is_finite() && self.s_churn >= 0.0) {
            return Err(invalid("s_churn", "must be a non-negative finite number"));
        }
        if !(self.s_min.is_finite() && self.s_min >= 0.0) {
            return Err(invalid("s_min", "must be a non-negative finite number"));
        }
        if self.s_max.is_nan() {
            return Err(invalid("s_max", "must be a number"));
        }
        if !(self.s_noise.is_finite() && self.s_noise > 0.0) {
            return Err(invalid("s_noise", "must be a positive finite number"));
        }
        Ok(())
    }

    fn set(&mut self, name: &str, value: f64) -> Result<()> {
        match name {
            "steps" => self.steps = whole_steps(value)?,
            "sigma_min" => self.sigma_min = value,
            "sigma_max" => self.sigma_max = value,
            "rho" => self.rho = value,
            "s_churn" => self.s_churn = value,
            "s_min" => self.s_min = value,
            "s_max" => self.s_max = value,
            "s_noise" => self.s_noise = value,
            other => return Err(GenerationError::UnknownConfigField(other.to_string())),
        }
        Ok(())
    }
}

fn whole_steps(value: f64) -> Result<usize> {
    if value.is_finite() && value >= 1.0 && value.fract() == 0.0 && value <= u32::MAX as f64 {
        Ok(value as usize)
    } else {
        Err(invalid("steps", format!("{value} is not a positive whole number")))
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> GenerationError {
    GenerationError::InvalidConfig {
        field,
        reason: reason.into(),
    }
}

/// A partial mapping of config field name to value.
///
/// Names are only checked against [`FIELDS`] when merged, so a typo surfaces as
/// [`GenerationError::UnknownConfigField`] at the first merge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides(BTreeMap<String, f64>);

impl ConfigOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`ConfigOverrides::insert`].
    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &f64)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse one `name=value` assignment. `inf` is accepted as a value.
    pub fn parse_assignment(assignment: &str) -> Result<(String, f64)> {
        let (name, value) = assignment.split_once('=').ok_or_else(|| {
            invalid("overrides", format!("'{assignment}' is not of the form name=value"))
        })?;
        let name = name.trim();
        let value = value.trim().parse::<f64>().map_err(|_| {
            invalid("overrides", format!("'{value}' is not a number in '{assignment}'"))
        })?;
        Ok((name.to_string(), value))
    }
}

impl FromIterator<(String, f64)> for ConfigOverrides {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Parses comma separated assignments such as `steps=40,s_churn=10`.
impl FromStr for ConfigOverrides {
    type Err = GenerationError;

    fn from_str(s: &str) -> Result<Self> {
        s.split(',')
            .filter(|piece| !piece.trim().is_empty())
            .map(ConfigOverrides::parse_assignment)
            .collect()
    }
}
