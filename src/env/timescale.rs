//! Time specifications such as `"10 ms"` and conversion between units.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Supported time units, seconds down to femtoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    S,
    Ms,
    Us,
    Ns,
    Ps,
    Fs,
}

impl TimeUnit {
    /// Power of ten relative to one second.
    pub fn exponent(self) -> i32 {
        match self {
            Self::S => 0,
            Self::Ms => -3,
            Self::Us => -6,
            Self::Ns => -9,
            Self::Ps => -12,
            Self::Fs => -15,
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::S => "s",
            Self::Ms => "ms",
            Self::Us => "us",
            Self::Ns => "ns",
            Self::Ps => "ps",
            Self::Fs => "fs",
        };
        write!(f, "{s}")
    }
}

impl FromStr for TimeUnit {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "s" => Ok(Self::S),
            "ms" => Ok(Self::Ms),
            "us" => Ok(Self::Us),
            "ns" => Ok(Self::Ns),
            "ps" => Ok(Self::Ps),
            "fs" => Ok(Self::Fs),
            other => Err(ConfigError::InvalidTime {
                spec: other.to_string(),
                reason: "unknown unit".to_string(),
            }),
        }
    }
}

/// A magnitude paired with its unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeValue {
    pub magnitude: f64,
    pub unit: TimeUnit,
}

impl TimeValue {
    pub fn new(magnitude: f64, unit: TimeUnit) -> Self {
        Self { magnitude, unit }
    }

    pub fn seconds(magnitude: f64) -> Self {
        Self::new(magnitude, TimeUnit::S)
    }
}

impl fmt::Display for TimeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.magnitude, self.unit)
    }
}

/// Optional magnitude followed by a unit, surrounding whitespace allowed.
static TIME_SPEC: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+(?:\.\d*)?|\.\d+)?\s*([fpnum]?s)\s*$"));

/// Parse `"<magnitude> <unit>"`. The magnitude is optional (`"ms"` is one
/// millisecond) and the separating whitespace may be omitted.
pub fn parse_time(spec: &str) -> Result<TimeValue, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidTime {
        spec: spec.to_string(),
        reason,
    };
    let pattern = TIME_SPEC.as_ref().map_err(|e| invalid(e.to_string()))?;
    let captures = pattern.captures(spec).ok_or_else(|| {
        invalid("expected \"<magnitude> <unit>\" with unit s, ms, us, ns, ps or fs".to_string())
    })?;

    let magnitude = match captures.get(1) {
        Some(number) => number
            .as_str()
            .parse::<f64>()
            .map_err(|e| invalid(e.to_string()))?,
        None => 1.0,
    };
    if !magnitude.is_finite() {
        return Err(invalid("magnitude must be finite".to_string()));
    }

    let unit = captures.get(2).map_or("", |m| m.as_str()).parse::<TimeUnit>()?;
    Ok(TimeValue::new(magnitude, unit))
}

/// Express `time` as a multiple of `scale`.
pub fn scale_time(time: TimeValue, scale: TimeValue) -> f64 {
    let exponent = time.unit.exponent() - scale.unit.exponent();
    time.magnitude / scale.magnitude * 10f64.powi(exponent)
}
