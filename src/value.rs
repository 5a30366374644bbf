use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shef_time::ZoneCode;

/// Value recorded when a message reports a parameter as missing.
pub const MISSING_VALUE: f64 = -9999.0;

/// Value recorded for a trace report (`T`): a measurable-but-unquantified
/// amount, carried as a real number with [`ShefValue::trace`] set.
pub const TRACE_VALUE: f64 = 0.001;

/// Units system a message declared with `DU`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UnitSystem {
    #[default]
    English,
    Metric,
}

impl UnitSystem {
    pub fn from_letter(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'E' => Some(UnitSystem::English),
            'S' => Some(UnitSystem::Metric),
            _ => None,
        }
    }

    pub fn letter(&self) -> char {
        match self {
            UnitSystem::English => 'E',
            UnitSystem::Metric => 'S',
        }
    }
}

/// One decoded observation: the unit every message expands into.
///
/// Times are always UTC by the time a value leaves the decoder; the original
/// reporting zone is kept as provenance in [`ShefValue::zone`]. The
/// six-character [`ShefValue::parameter_code`] is physical element (2) +
/// type/source (2) + extremum (1) + probability bucket (1), with unspecified
/// positions already filled from registry defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShefValue {
    pub location: String,
    pub obs_time: DateTime<Utc>,
    pub creation_time: Option<DateTime<Utc>>,
    pub parameter_code: String,
    pub duration_code: char,
    /// Duration in minutes; -1 when the duration is variable or unknown.
    pub duration_value: i32,
    pub value: f64,
    pub qualifier: char,
    pub probability: f64,
    pub revised: bool,
    pub trace: bool,
    pub units: UnitSystem,
    pub zone: ZoneCode,
    pub comment: String,
    /// 1 on the first value of a (location, parameter, qualifier) run within
    /// one message, 2 on the rest. Meaningless across messages.
    pub time_series_code: u8,
}

impl ShefValue {
    pub fn is_missing(&self) -> bool {
        self.value == MISSING_VALUE
    }

    /// Physical element: the first two characters of the parameter code.
    pub fn pe(&self) -> &str {
        &self.parameter_code[0..2]
    }

    pub fn type_source(&self) -> &str {
        &self.parameter_code[2..4]
    }

    pub fn extremum(&self) -> char {
        self.parameter_code[4..5].chars().next().unwrap_or('Z')
    }

    pub fn probability_code(&self) -> char {
        self.parameter_code[5..6].chars().next().unwrap_or('Z')
    }

    /// Key that delimits a time-series run inside one message.
    pub fn series_key(&self) -> (String, String, char) {
        (
            self.location.clone(),
            self.parameter_code.clone(),
            self.qualifier,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample() -> ShefValue {
        ShefValue {
            location: "KEYO2".to_string(),
            obs_time: NaiveDate::from_ymd_opt(2025, 11, 7)
                .unwrap()
                .and_hms_opt(14, 0, 0)
                .unwrap()
                .and_utc(),
            creation_time: None,
            parameter_code: "HTRZZZ".to_string(),
            duration_code: 'I',
            duration_value: 0,
            value: 637.74,
            qualifier: 'Z',
            probability: -1.0,
            revised: false,
            trace: false,
            units: UnitSystem::English,
            zone: ZoneCode::UTC,
            comment: String::new(),
            time_series_code: 1,
        }
    }

    #[test]
    fn parameter_code_accessors() {
        let v = sample();
        assert_eq!(v.pe(), "HT");
        assert_eq!(v.type_source(), "RZ");
        assert_eq!(v.extremum(), 'Z');
        assert_eq!(v.probability_code(), 'Z');
    }

    #[test]
    fn serializes_for_downstream_consumers() {
        let v = sample();
        let json = serde_json::to_string(&v).unwrap();
        let back: ShefValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }
}
