//! Model parameter schemas and string-keyed parameter maps.
//!
//! Every model type publishes a [`ParamSchema`]: an ordered mapping from
//! parameter key to [`ParamDescriptor`] (default value, kind, fixed or
//! randomizable, optional range and free-form metadata). A property editor
//! renders and validates forms from the schema alone.
//!
//! Parameter values travel as a [`ParamMap`] of strings, which is what
//! `Model::init` consumes and `Model::save` produces. The typed readers and
//! writers here agree on one text format per kind so that save then init
//! round-trips.

use std::collections::BTreeMap;
use std::net::IpAddr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// String-keyed parameter values, as consumed by `init` and produced by `save`.
pub type ParamMap = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while reading or validating parameters.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParamError {
    #[error("missing parameter '{0}'")]
    Missing(String),
    #[error("parameter '{key}': cannot read '{value}' as {kind:?}")]
    Invalid {
        key: String,
        value: String,
        kind: ParamKind,
    },
    #[error("parameter '{key}': {value} outside range [{min}, {max}]")]
    OutOfRange {
        key: String,
        value: f64,
        min: f64,
        max: f64,
    },
}

// ---------------------------------------------------------------------------
// Descriptors
// ---------------------------------------------------------------------------

/// The type tag of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamKind {
    Text,
    Int,
    Float,
    Bool,
    /// `yes` / `no`.
    YesNo,
    Ip,
    File,
    /// Name of another model.
    ModelRef,
    /// Names of other models, separated by whitespace or commas.
    ModelRefList,
    /// `lat,lon`.
    GpsPoint,
    /// `x,y;x,y;...`.
    CoordinateList,
}

/// Whether a parameter keeps its configured value or may be drawn at random
/// per trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Variability {
    #[default]
    Fixed,
    Randomizable,
}

/// Schema entry for one parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamDescriptor {
    pub default: String,
    pub kind: ParamKind,
    #[serde(default)]
    pub variability: Variability,
    /// Inclusive numeric range for Int and Float kinds.
    #[serde(default)]
    pub range: Option<(f64, f64)>,
    /// Required model type tag for ModelRef and ModelRefList kinds.
    #[serde(default)]
    pub model_type: Option<String>,
    /// Free-form metadata for editors (units, file filters, ...).
    #[serde(default)]
    pub aux: BTreeMap<String, String>,
    #[serde(default)]
    pub description: String,
}

impl ParamDescriptor {
    pub fn new(kind: ParamKind, default: impl Into<String>) -> Self {
        Self {
            default: default.into(),
            kind,
            variability: Variability::Fixed,
            range: None,
            model_type: None,
            aux: BTreeMap::new(),
            description: String::new(),
        }
    }

    pub fn randomizable(mut self) -> Self {
        self.variability = Variability::Randomizable;
        self
    }

    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.range = Some((min, max));
        self
    }

    pub fn model_type(mut self, tag: impl Into<String>) -> Self {
        self.model_type = Some(tag.into());
        self
    }

    pub fn aux(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.aux.insert(key.into(), value.into());
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Check that `value` parses as this descriptor's kind and lies in range.
    pub fn check(&self, key: &str, value: &str) -> Result<(), ParamError> {
        let invalid = || ParamError::Invalid {
            key: key.to_string(),
            value: value.to_string(),
            kind: self.kind,
        };
        let numeric = match self.kind {
            ParamKind::Int => Some(parse_i64(value).ok_or_else(invalid)? as f64),
            ParamKind::Float => Some(parse_f64(value).ok_or_else(invalid)?),
            ParamKind::Bool => {
                parse_bool(value).ok_or_else(invalid)?;
                None
            }
            ParamKind::YesNo => {
                parse_yes_no(value).ok_or_else(invalid)?;
                None
            }
            ParamKind::Ip => {
                value.trim().parse::<IpAddr>().map_err(|_| invalid())?;
                None
            }
            ParamKind::GpsPoint => {
                parse_gps(value).ok_or_else(invalid)?;
                None
            }
            ParamKind::CoordinateList => {
                parse_coords(value).ok_or_else(invalid)?;
                None
            }
            ParamKind::ModelRef => {
                if value.trim().contains(char::is_whitespace) {
                    return Err(invalid());
                }
                None
            }
            ParamKind::Text | ParamKind::File | ParamKind::ModelRefList => None,
        };
        if let (Some(v), Some((min, max))) = (numeric, self.range)
            && (v < min || v > max)
        {
            return Err(ParamError::OutOfRange {
                key: key.to_string(),
                value: v,
                min,
                max,
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// Ordered mapping from parameter key to descriptor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamSchema {
    entries: IndexMap<String, ParamDescriptor>,
}

impl ParamSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert; keeps declaration order.
    pub fn with(mut self, key: impl Into<String>, descriptor: ParamDescriptor) -> Self {
        self.insert(key, descriptor);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, descriptor: ParamDescriptor) {
        self.entries.insert(key.into(), descriptor);
    }

    pub fn get(&self, key: &str) -> Option<&ParamDescriptor> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamDescriptor)> {
        self.entries.iter().map(|(k, d)| (k.as_str(), d))
    }

    /// Keys of parameters that may be randomized per trial.
    pub fn randomizable_keys(&self) -> impl Iterator<Item = &str> {
        self.iter()
            .filter(|(_, d)| d.variability == Variability::Randomizable)
            .map(|(k, _)| k)
    }

    /// A map holding every default value.
    pub fn defaults(&self) -> ParamMap {
        self.iter()
            .map(|(k, d)| (k.to_string(), d.default.clone()))
            .collect()
    }

    /// `params` overlaid on the defaults. Keys unknown to the schema are kept.
    pub fn with_defaults(&self, params: &ParamMap) -> ParamMap {
        let mut merged = self.defaults();
        merged.extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }

    /// Check every schema key present in `params`. Absent keys fall back to
    /// defaults and are not reported.
    pub fn validate(&self, params: &ParamMap) -> Result<(), ParamError> {
        for (key, descriptor) in self.iter() {
            if let Some(value) = params.get(key) {
                descriptor.check(key, value)?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Text formats
// ---------------------------------------------------------------------------

fn parse_i64(s: &str) -> Option<i64> {
    s.trim().parse().ok()
}

fn parse_f64(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

fn parse_yes_no(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "yes" | "y" => Some(true),
        "no" | "n" => Some(false),
        _ => None,
    }
}

fn parse_pair(s: &str) -> Option<(f64, f64)> {
    let (a, b) = s.split_once(',')?;
    Some((parse_f64(a)?, parse_f64(b)?))
}

fn parse_gps(s: &str) -> Option<GpsPoint> {
    let (lat, lon) = parse_pair(s)?;
    ((-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon))
        .then_some(GpsPoint { lat, lon })
}

fn parse_coords(s: &str) -> Option<Vec<(f64, f64)>> {
    s.split(';')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(parse_pair)
        .collect()
}

/// Split a model reference list on whitespace and commas, dropping empties.
pub fn split_model_refs(s: &str) -> Vec<String> {
    s.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub lat: f64,
    pub lon: f64,
}

/// Format a GPS point as `lat,lon`.
pub fn format_gps(p: GpsPoint) -> String {
    format!("{},{}", p.lat, p.lon)
}

/// Format coordinates as `x,y;x,y`.
pub fn format_coords(coords: &[(f64, f64)]) -> String {
    coords
        .iter()
        .map(|(x, y)| format!("{x},{y}"))
        .collect::<Vec<_>>()
        .join(";")
}

/// Format a yes/no value.
pub fn format_yes_no(v: bool) -> String {
    (if v { "yes" } else { "no" }).to_string()
}

// ---------------------------------------------------------------------------
// Typed readers
// ---------------------------------------------------------------------------

/// Typed access to a [`ParamMap`].
pub trait ParamMapExt {
    fn get_str(&self, key: &str) -> Result<&str, ParamError>;
    fn get_i64(&self, key: &str) -> Result<i64, ParamError>;
    fn get_f64(&self, key: &str) -> Result<f64, ParamError>;
    fn get_bool(&self, key: &str) -> Result<bool, ParamError>;
    fn get_yes_no(&self, key: &str) -> Result<bool, ParamError>;
    fn get_ip(&self, key: &str) -> Result<IpAddr, ParamError>;
    fn get_gps(&self, key: &str) -> Result<GpsPoint, ParamError>;
    fn get_coords(&self, key: &str) -> Result<Vec<(f64, f64)>, ParamError>;
    fn get_model_refs(&self, key: &str) -> Result<Vec<String>, ParamError>;
}

fn read<T>(
    map: &ParamMap,
    key: &str,
    kind: ParamKind,
    parse: impl FnOnce(&str) -> Option<T>,
) -> Result<T, ParamError> {
    let value = map
        .get(key)
        .ok_or_else(|| ParamError::Missing(key.to_string()))?;
    parse(value.as_str()).ok_or_else(|| ParamError::Invalid {
        key: key.to_string(),
        value: value.clone(),
        kind,
    })
}

impl ParamMapExt for ParamMap {
    fn get_str(&self, key: &str) -> Result<&str, ParamError> {
        self.get(key)
            .map(String::as_str)
            .ok_or_else(|| ParamError::Missing(key.to_string()))
    }

    fn get_i64(&self, key: &str) -> Result<i64, ParamError> {
        read(self, key, ParamKind::Int, parse_i64)
    }

    fn get_f64(&self, key: &str) -> Result<f64, ParamError> {
        read(self, key, ParamKind::Float, parse_f64)
    }

    fn get_bool(&self, key: &str) -> Result<bool, ParamError> {
        read(self, key, ParamKind::Bool, parse_bool)
    }

    fn get_yes_no(&self, key: &str) -> Result<bool, ParamError> {
        read(self, key, ParamKind::YesNo, parse_yes_no)
    }

    fn get_ip(&self, key: &str) -> Result<IpAddr, ParamError> {
        read(self, key, ParamKind::Ip, |s| s.trim().parse().ok())
    }

    fn get_gps(&self, key: &str) -> Result<GpsPoint, ParamError> {
        read(self, key, ParamKind::GpsPoint, parse_gps)
    }

    fn get_coords(&self, key: &str) -> Result<Vec<(f64, f64)>, ParamError> {
        read(self, key, ParamKind::CoordinateList, parse_coords)
    }

    fn get_model_refs(&self, key: &str) -> Result<Vec<String>, ParamError> {
        read(self, key, ParamKind::ModelRefList, |s| Some(split_model_refs(s)))
    }
}

/// Build a [`ParamMap`] from `(key, value)` pairs.
pub fn param_map<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> ParamMap
where
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
