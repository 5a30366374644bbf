//! Parameter-code and value-token grammar.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ShefError;
use crate::registry::ParamRegistry;

/// A fully resolved parameter code: every position filled, either from the
/// message text or from registry defaults.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ParamCode {
    pub pe: String,
    pub duration: char,
    pub type_source: String,
    pub extremum: char,
    pub probability: char,
}

impl ParamCode {
    /// The six-character code carried on emitted values: PE + type/source +
    /// extremum + probability.
    pub fn value_code(&self) -> String {
        format!(
            "{}{}{}{}",
            self.pe, self.type_source, self.extremum, self.probability
        )
    }
}

/// Expand a message parameter token into a [`ParamCode`], filling omitted
/// trailing positions with defaults (duration from the PE entry, type/source
/// `RZ`, extremum `Z`, probability `Z`) and validating every position
/// against the registry. Tokens may be 2, 3, 5, 6 or 7 characters; send
/// codes expand to their full seven-character form first.
pub(crate) fn parse_param_code(
    token: &str,
    registry: &ParamRegistry,
    line: usize,
) -> Result<ParamCode, ShefError> {
    let token = token.to_uppercase();
    let expanded = registry
        .lookup_send_code(&token)
        .map(|s| s.to_string())
        .unwrap_or(token);

    let n = expanded.len();
    if !matches!(n, 2 | 3 | 5 | 6 | 7) || !expanded.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ShefError::Syntax {
            line,
            text: expanded,
        });
    }

    let pe = expanded[0..2].to_string();
    let entry = registry.lookup_pe(&pe).ok_or_else(|| ShefError::RegistryMiss {
        line,
        table: "physical element",
        code: pe.clone(),
    })?;

    let duration = if n >= 3 {
        expanded[2..3].chars().next().unwrap_or('I')
    } else {
        entry.default_duration
    };
    if registry.lookup_duration_code(duration).is_none() {
        return Err(ShefError::RegistryMiss {
            line,
            table: "duration",
            code: duration.to_string(),
        });
    }

    let type_source = if n >= 5 {
        expanded[3..5].to_string()
    } else {
        "RZ".to_string()
    };
    if !registry.lookup_type_source(&type_source) {
        return Err(ShefError::RegistryMiss {
            line,
            table: "type/source",
            code: type_source,
        });
    }

    let extremum = if n >= 6 {
        expanded[5..6].chars().next().unwrap_or('Z')
    } else {
        'Z'
    };
    if !registry.lookup_extremum(extremum) {
        return Err(ShefError::RegistryMiss {
            line,
            table: "extremum",
            code: extremum.to_string(),
        });
    }

    let probability = if n >= 7 {
        expanded[6..7].chars().next().unwrap_or('Z')
    } else {
        'Z'
    };
    if registry.lookup_probability(probability).is_none() {
        return Err(ShefError::RegistryMiss {
            line,
            table: "probability",
            code: probability.to_string(),
        });
    }

    Ok(ParamCode {
        pe,
        duration,
        type_source,
        extremum,
        probability,
    })
}

/// What a single value token resolved to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum RawValue {
    Number(f64),
    Missing,
    Trace,
    /// `+` or an empty slot: the position is consumed but nothing is emitted.
    Null,
}

static NUMERIC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([+-]?(?:[0-9]+\.?[0-9]*|\.[0-9]+))([A-Za-z])?$").unwrap());

/// Parse one value token. Returns the resolved value and the trailing
/// qualifier letter, if the token carried one (e.g. `12.3E`).
pub(crate) fn parse_value_token(
    token: &str,
    line: usize,
) -> Result<(RawValue, Option<char>), ShefError> {
    let trimmed = token.trim();
    if trimmed.is_empty() || trimmed == "+" {
        return Ok((RawValue::Null, None));
    }
    match trimmed.to_ascii_uppercase().as_str() {
        "M" | "MSG" | "-9999" => return Ok((RawValue::Missing, None)),
        "T" => return Ok((RawValue::Trace, None)),
        _ => {}
    }

    let caps = NUMERIC_RE.captures(trimmed).ok_or_else(|| ShefError::Numeric {
        line,
        text: trimmed.to_string(),
    })?;
    let number: f64 = caps
        .get(1)
        .map(|m| m.as_str())
        .unwrap_or("")
        .parse()
        .map_err(|_| ShefError::Numeric {
            line,
            text: trimmed.to_string(),
        })?;
    let qualifier = caps
        .get(2)
        .and_then(|m| m.as_str().chars().next())
        .map(|c| c.to_ascii_uppercase());

    if number == crate::value::MISSING_VALUE {
        return Ok((RawValue::Missing, qualifier));
    }
    Ok((RawValue::Number(number), qualifier))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_codes_pick_up_defaults() {
        let reg = ParamRegistry::default();
        let p = parse_param_code("HT", &reg, 1).unwrap();
        assert_eq!(p.pe, "HT");
        assert_eq!(p.duration, 'I');
        assert_eq!(p.type_source, "RZ");
        assert_eq!(p.extremum, 'Z');
        assert_eq!(p.probability, 'Z');
        assert_eq!(p.value_code(), "HTRZZZ");
    }

    #[test]
    fn full_codes_parse_every_position() {
        let reg = ParamRegistry::default();
        let p = parse_param_code("tairzxM", &reg, 1).unwrap();
        assert_eq!(p.pe, "TA");
        assert_eq!(p.duration, 'I');
        assert_eq!(p.type_source, "RZ");
        assert_eq!(p.extremum, 'X');
        assert_eq!(p.probability, 'M');
    }

    #[test]
    fn send_codes_expand() {
        let reg = ParamRegistry::default();
        let p = parse_param_code("PY", &reg, 1).unwrap();
        assert_eq!(p.pe, "PP");
        assert_eq!(p.duration, 'D');
    }

    #[test]
    fn unknown_pe_is_a_registry_miss() {
        let reg = ParamRegistry::default();
        let err = parse_param_code("XX", &reg, 3).unwrap_err();
        assert!(matches!(
            err,
            ShefError::RegistryMiss {
                table: "physical element",
                ..
            }
        ));
    }

    #[test]
    fn four_character_codes_are_malformed() {
        let reg = ParamRegistry::default();
        assert!(matches!(
            parse_param_code("HGIR", &reg, 1),
            Err(ShefError::Syntax { .. })
        ));
    }

    #[test]
    fn value_token_forms() {
        assert_eq!(
            parse_value_token("637.74", 1).unwrap(),
            (RawValue::Number(637.74), None)
        );
        assert_eq!(
            parse_value_token("-2.5", 1).unwrap(),
            (RawValue::Number(-2.5), None)
        );
        assert_eq!(
            parse_value_token("12.3E", 1).unwrap(),
            (RawValue::Number(12.3), Some('E'))
        );
        assert_eq!(parse_value_token("M", 1).unwrap(), (RawValue::Missing, None));
        assert_eq!(
            parse_value_token("msg", 1).unwrap(),
            (RawValue::Missing, None)
        );
        assert_eq!(parse_value_token("T", 1).unwrap(), (RawValue::Trace, None));
        assert_eq!(parse_value_token("+", 1).unwrap(), (RawValue::Null, None));
        assert_eq!(parse_value_token("", 1).unwrap(), (RawValue::Null, None));
        assert_eq!(
            parse_value_token("-9999", 1).unwrap(),
            (RawValue::Missing, None)
        );
    }

    #[test]
    fn junk_value_is_a_numeric_error() {
        assert!(matches!(
            parse_value_token("bad", 9),
            Err(ShefError::Numeric { line: 9, .. })
        ));
        assert!(matches!(
            parse_value_token("1.2.3", 9),
            Err(ShefError::Numeric { .. })
        ));
    }
}
