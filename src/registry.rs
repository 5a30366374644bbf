//! Canonical SHEF code tables: physical elements, durations, type/source,
//! extremum, probability, send codes and data qualifiers, plus the error
//! budget. Built once at startup, optionally overridden from a SHEFPARM text
//! file, and read-only for the rest of the run.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;

use itertools::Itertools;
use serde::Serialize;

/// One physical-element table entry.
///
/// `metric_factor` converts a metric reading to the base (English) unit;
/// `english_factor` is almost always 1.0 but SHEFPARM files may rescale.
/// Temperature elements carry base unit `F`; the decoder applies the +32
/// affine step for those on top of the factor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeEntry {
    pub base_unit: String,
    pub english_factor: f64,
    pub metric_factor: f64,
    pub default_duration: char,
}

/// Whether a SHEFPARM line was applied or thrown away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideLevel {
    Applied,
    Rejected,
}

/// Record of one SHEFPARM line's effect on the registry.
#[derive(Debug, Clone)]
pub struct OverrideDiagnostic {
    pub line: usize,
    pub level: OverrideLevel,
    pub message: String,
}

impl Display for OverrideDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SHEFPARM line {}: {}", self.line, self.message)
    }
}

const SECTION_PE: &str = "PE Codes And Conversion Factors";
const SECTION_DURATION: &str = "Duration Codes And Associated Values";
const SECTION_TS: &str = "TS Codes";
const SECTION_EXTREMUM: &str = "Extremum Codes";
const SECTION_PROBABILITY: &str = "Probability Codes And Associated Values";
const SECTION_SEND: &str = "Send Codes Or Duration Defaults Other Than I";
const SECTION_QUALIFIER: &str = "Data Qualifier Codes";
const SECTION_MAX_ERRORS: &str = "Max Number Of Errors";

const DEFAULT_MAX_ERRORS: u32 = 100;

/// (code, base unit, metric-to-english factor, default duration)
const BUILTIN_PE: &[(&str, &str, f64, char)] = &[
    // agricultural / surface observations
    ("AF", "", 1.0, 'I'),
    ("AG", "%", 1.0, 'I'),
    ("AT", "hr", 1.0, 'D'),
    ("AU", "hr", 1.0, 'D'),
    ("AW", "hr", 1.0, 'D'),
    // evaporation
    ("EA", "in", 0.03937, 'D'),
    ("EP", "in", 0.03937, 'D'),
    ("ER", "in", 0.03937, 'D'),
    ("ET", "in", 0.03937, 'D'),
    ("EV", "in", 0.03937, 'D'),
    // fish counts
    ("FA", "", 1.0, 'I'),
    ("FL", "", 1.0, 'I'),
    ("FT", "", 1.0, 'I'),
    // ground frost
    ("GD", "in", 0.3937, 'I'),
    ("GR", "", 1.0, 'I'),
    ("GS", "", 1.0, 'I'),
    ("GT", "in", 0.3937, 'I'),
    // heights, stages and elevations
    ("HA", "ft", 3.28084, 'I'),
    ("HB", "ft", 3.28084, 'I'),
    ("HC", "ft", 3.28084, 'I'),
    ("HD", "ft", 3.28084, 'I'),
    ("HE", "ft", 3.28084, 'I'),
    ("HF", "ft", 3.28084, 'I'),
    ("HG", "ft", 3.28084, 'I'),
    ("HH", "ft", 3.28084, 'I'),
    ("HI", "", 1.0, 'I'),
    ("HJ", "ft", 3.28084, 'I'),
    ("HK", "ft", 3.28084, 'I'),
    ("HL", "ft", 3.28084, 'I'),
    ("HM", "ft", 3.28084, 'I'),
    ("HO", "ft", 3.28084, 'I'),
    ("HP", "ft", 3.28084, 'I'),
    ("HQ", "ft", 3.28084, 'I'),
    ("HR", "ft", 3.28084, 'I'),
    ("HS", "ft", 3.28084, 'I'),
    ("HT", "ft", 3.28084, 'I'),
    ("HU", "ft", 3.28084, 'I'),
    ("HW", "ft", 3.28084, 'I'),
    ("HZ", "kft", 0.00328084, 'I'),
    // ice
    ("IC", "%", 1.0, 'I'),
    ("IE", "mi", 0.62137, 'I'),
    ("IR", "", 1.0, 'I'),
    ("IT", "in", 0.3937, 'I'),
    // lake area and storage
    ("LA", "kac", 0.247105, 'I'),
    ("LC", "kaf", 0.000811, 'I'),
    ("LS", "kaf", 0.000811, 'I'),
    // moisture and fuels
    ("MM", "%", 1.0, 'I'),
    ("MS", "%", 1.0, 'I'),
    ("MT", "F", 1.8, 'I'),
    ("MW", "%", 1.0, 'I'),
    // gates and generating units
    ("NC", "", 1.0, 'I'),
    ("NG", "ft", 3.28084, 'I'),
    ("NL", "", 1.0, 'I'),
    ("NN", "", 1.0, 'I'),
    ("NO", "", 1.0, 'I'),
    ("NS", "", 1.0, 'I'),
    // pressure and precipitation
    ("PA", "in-hg", 0.2953, 'I'),
    ("PC", "in", 0.03937, 'I'),
    ("PD", "in-hg", 0.2953, 'I'),
    ("PL", "in-hg", 0.2953, 'I'),
    ("PP", "in", 0.03937, 'I'),
    ("PR", "in/day", 0.03937, 'I'),
    ("PT", "", 1.0, 'I'),
    // discharge and runoff
    ("QA", "kcfs", 0.035315, 'I'),
    ("QB", "kcfs", 0.035315, 'I'),
    ("QC", "kaf", 0.000811, 'I'),
    ("QD", "kcfs", 0.035315, 'I'),
    ("QG", "kcfs", 0.035315, 'I'),
    ("QI", "kcfs", 0.035315, 'I'),
    ("QM", "kcfs", 0.035315, 'I'),
    ("QP", "kcfs", 0.035315, 'I'),
    ("QR", "kcfs", 0.035315, 'I'),
    ("QS", "kcfs", 0.035315, 'I'),
    ("QT", "kcfs", 0.035315, 'I'),
    ("QU", "kcfs", 0.035315, 'I'),
    ("QV", "kaf", 0.000811, 'I'),
    // radiation and sunshine
    ("RA", "%", 1.0, 'I'),
    ("RI", "ly", 1.0, 'D'),
    ("RN", "ly", 1.0, 'D'),
    ("RP", "%", 1.0, 'D'),
    ("RT", "hr", 1.0, 'D'),
    // snow
    ("SD", "in", 0.3937, 'I'),
    ("SF", "in", 0.3937, 'I'),
    ("SI", "in", 0.3937, 'I'),
    ("SW", "in", 0.03937, 'I'),
    // temperature (base unit F gets the affine +32 step on metric input)
    ("TA", "F", 1.8, 'I'),
    ("TC", "DF", 1.0, 'D'),
    ("TD", "F", 1.8, 'I'),
    ("TH", "DF", 1.0, 'D'),
    ("TM", "F", 1.8, 'I'),
    ("TN", "F", 1.8, 'D'),
    ("TP", "F", 1.8, 'I'),
    ("TS", "F", 1.8, 'I'),
    ("TW", "F", 1.8, 'I'),
    ("TX", "F", 1.8, 'D'),
    // wind
    ("UC", "mi", 0.62137, 'I'),
    ("UD", "deg", 1.0, 'I'),
    ("UG", "mph", 2.23694, 'I'),
    ("UP", "mph", 2.23694, 'I'),
    ("UR", "deg", 1.0, 'I'),
    ("US", "mph", 2.23694, 'I'),
    // generation and battery
    ("VB", "V", 1.0, 'I'),
    ("VH", "MWh", 1.0, 'D'),
    ("VT", "MWh", 1.0, 'D'),
    // water quality
    ("WC", "umho", 1.0, 'I'),
    ("WO", "ppm", 1.0, 'I'),
    ("WP", "pH", 1.0, 'I'),
    ("WS", "ppt", 1.0, 'I'),
    ("WT", "JTU", 1.0, 'I'),
    ("WV", "ft/s", 3.28084, 'I'),
    // weather, humidity, visibility
    ("XC", "tenths", 1.0, 'I'),
    ("XR", "%", 1.0, 'I'),
    ("XU", "%", 1.0, 'I'),
    ("XV", "mi", 0.62137, 'I'),
    ("XW", "", 1.0, 'I'),
];

const BUILTIN_DURATIONS: &[(char, i32)] = &[
    ('I', 0),
    ('U', 1),
    ('E', 5),
    ('G', 10),
    ('C', 15),
    ('J', 30),
    ('H', 60),
    ('B', 120),
    ('T', 180),
    ('F', 240),
    ('Q', 360),
    ('A', 480),
    ('K', 720),
    ('L', 1080),
    ('D', 1440),
    ('W', 10080),
    ('N', 43200),
    ('M', 43200),
    ('Y', 525600),
    ('P', -1),
    ('R', -1),
    ('S', -1),
    ('V', -1),
    ('X', -1),
    ('Z', -1),
];

const BUILTIN_TYPE_SOURCES: &[&str] = &[
    // observed
    "RZ", "RG", "RM", "RP", "RR", "RS", "RT", "RV", "RW", "RX",
    // forecast
    "FZ", "FA", "FB", "FC", "FD", "FE", "FG", "FL", "FM", "FP", "FR", "FU", "FV", "FW", "FX",
    // contingency
    "CZ", "CA", "CB", "CC", "CD", "CE", "CG", "CL", "CM", "CP", "CR", "CU", "CV", "CW", "CX",
    // processed
    "PZ", "PA", "PB", "PC", "PD", "PE", "PG", "PL", "PM", "PP", "PR", "PU", "PV", "PW", "PX",
    // historical / model
    "HZ", "MZ",
];

const BUILTIN_EXTREMUMS: &[char] = &[
    'Z', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'P', 'R', 'S', 'T', 'U', 'V',
    'W', 'X', 'Y',
];

const BUILTIN_PROBABILITIES: &[(char, f64)] = &[
    ('1', 0.1),
    ('2', 0.2),
    ('3', 0.3),
    ('4', 0.4),
    ('5', 0.5),
    ('6', 0.6),
    ('7', 0.7),
    ('8', 0.8),
    ('9', 0.9),
    ('A', 0.002),
    ('B', 0.004),
    ('C', 0.01),
    ('D', 0.02),
    ('E', 0.04),
    ('F', 0.05),
    ('G', 0.25),
    ('H', 0.95),
    ('J', 0.96),
    ('K', 0.98),
    ('L', 0.99),
    ('M', 0.5),
    ('N', 0.996),
    ('P', 0.998),
    ('T', 0.75),
    ('Z', -1.0),
];

/// Shorthand parameter tokens that expand to a full seven-character code
/// (physical element, duration, type/source, extremum, probability).
const BUILTIN_SEND_CODES: &[(&str, &str)] = &[
    ("PY", "PPDRZZZ"),
    ("QY", "QRDRZZZ"),
    ("HY", "HGDRZZZ"),
];

const BUILTIN_QUALIFIERS: &[char] = &[
    'B', 'E', 'F', 'G', 'M', 'P', 'Q', 'R', 'S', 'T', 'V', 'W', 'Z',
];

/// The code tables a decoding run consults. Construct once (optionally merge
/// SHEFPARM overrides), then share read-only.
#[derive(Debug, Clone)]
pub struct ParamRegistry {
    pe: BTreeMap<String, PeEntry>,
    durations: BTreeMap<char, i32>,
    type_sources: BTreeSet<String>,
    extremums: BTreeSet<char>,
    probabilities: BTreeMap<char, f64>,
    send_codes: BTreeMap<String, String>,
    qualifiers: BTreeSet<char>,
    max_errors: u32,
}

impl Default for ParamRegistry {
    fn default() -> Self {
        let pe = BUILTIN_PE
            .iter()
            .map(|(code, unit, factor, dur)| {
                (
                    code.to_string(),
                    PeEntry {
                        base_unit: unit.to_string(),
                        english_factor: 1.0,
                        metric_factor: *factor,
                        default_duration: *dur,
                    },
                )
            })
            .collect();
        ParamRegistry {
            pe,
            durations: BUILTIN_DURATIONS.iter().copied().collect(),
            type_sources: BUILTIN_TYPE_SOURCES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            extremums: BUILTIN_EXTREMUMS.iter().copied().collect(),
            probabilities: BUILTIN_PROBABILITIES.iter().copied().collect(),
            send_codes: BUILTIN_SEND_CODES
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            qualifiers: BUILTIN_QUALIFIERS.iter().copied().collect(),
            max_errors: DEFAULT_MAX_ERRORS,
        }
    }
}

impl ParamRegistry {
    pub fn lookup_pe(&self, code: &str) -> Option<&PeEntry> {
        self.pe.get(code)
    }

    /// Minutes for a duration code; -1 means variable or unknown.
    pub fn lookup_duration_code(&self, c: char) -> Option<i32> {
        self.durations.get(&c).copied()
    }

    pub fn lookup_type_source(&self, code: &str) -> bool {
        self.type_sources.contains(code)
    }

    pub fn lookup_extremum(&self, c: char) -> bool {
        self.extremums.contains(&c)
    }

    pub fn lookup_probability(&self, c: char) -> Option<f64> {
        self.probabilities.get(&c).copied()
    }

    /// Reverse probability lookup, used when re-reading emitted text where
    /// only the numeric value survives.
    pub fn probability_code_for(&self, value: f64) -> Option<char> {
        self.probabilities
            .iter()
            .find(|(_, v)| (**v - value).abs() < 1e-9)
            .map(|(c, _)| *c)
    }

    pub fn lookup_send_code(&self, code: &str) -> Option<&str> {
        self.send_codes.get(code).map(|s| s.as_str())
    }

    pub fn lookup_qualifier(&self, c: char) -> bool {
        self.qualifiers.contains(&c)
    }

    pub fn max_errors(&self) -> u32 {
        self.max_errors
    }

    /// Apply one SHEFPARM file on top of the current state. Every applied
    /// change produces an `Applied` diagnostic (logged at INFO); every line
    /// that cannot be parsed produces a `Rejected` diagnostic (logged at
    /// WARN) and is skipped. Merging never fails.
    pub fn merge_shefparm(&mut self, text: &str) -> Vec<OverrideDiagnostic> {
        let mut diags = Vec::new();
        let mut section: Option<&'static str> = None;

        for (idx, raw) in text.lines().enumerate() {
            let lineno = idx + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with(':') {
                continue;
            }

            if let Some(header) = match_section(line) {
                section = Some(header);
                continue;
            }

            let outcome = match section {
                None => Err(format!("'{line}' appears before any section header")),
                Some(SECTION_PE) => self.merge_pe_line(line),
                Some(SECTION_DURATION) => self.merge_duration_line(line),
                Some(SECTION_TS) => self.merge_ts_line(line),
                Some(SECTION_EXTREMUM) => self.merge_extremum_line(line),
                Some(SECTION_PROBABILITY) => self.merge_probability_line(line),
                Some(SECTION_SEND) => self.merge_send_line(line),
                Some(SECTION_QUALIFIER) => self.merge_qualifier_line(line),
                Some(SECTION_MAX_ERRORS) => self.merge_max_errors_line(line),
                Some(_) => unreachable!("match_section only returns known headers"),
            };

            match outcome {
                Ok(message) => {
                    log::info!("SHEFPARM line {lineno}: {message}");
                    diags.push(OverrideDiagnostic {
                        line: lineno,
                        level: OverrideLevel::Applied,
                        message,
                    });
                }
                Err(message) => {
                    log::warn!("SHEFPARM line {lineno} ignored: {message}");
                    diags.push(OverrideDiagnostic {
                        line: lineno,
                        level: OverrideLevel::Rejected,
                        message,
                    });
                }
            }
        }

        diags
    }

    fn merge_pe_line(&mut self, line: &str) -> Result<String, String> {
        let tokens = line.split_whitespace().collect_vec();
        let (code, rest) = tokens
            .split_first()
            .ok_or_else(|| "empty entry".to_string())?;
        if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(format!("'{code}' is not a physical-element code"));
        }
        if rest.len() < 2 || rest.len() > 4 {
            return Err(format!(
                "expected 'CODE ENGLISH METRIC [UNIT] [DURATION]', got '{line}'"
            ));
        }
        let english_factor: f64 = rest[0]
            .parse()
            .map_err(|_| format!("'{}' is not a conversion factor", rest[0]))?;
        let metric_factor: f64 = rest[1]
            .parse()
            .map_err(|_| format!("'{}' is not a conversion factor", rest[1]))?;
        // "-" stands for a dimensionless element so emitted files re-merge cleanly
        let base_unit = match rest.get(2) {
            None | Some(&"-") => String::new(),
            Some(unit) => unit.to_string(),
        };
        let default_duration = match rest.get(3) {
            Some(tok) if tok.len() == 1 => tok.chars().next().unwrap_or('I'),
            Some(tok) => return Err(format!("'{tok}' is not a duration code")),
            None => self
                .pe
                .get(*code)
                .map(|e| e.default_duration)
                .unwrap_or('I'),
        };
        let code = code.to_uppercase();
        self.pe.insert(
            code.clone(),
            PeEntry {
                base_unit,
                english_factor,
                metric_factor,
                default_duration,
            },
        );
        Ok(format!("physical element {code} set"))
    }

    fn merge_duration_line(&mut self, line: &str) -> Result<String, String> {
        let (code, minutes) = two_tokens(line)?;
        let code = single_char(code)?;
        let minutes: i32 = minutes
            .parse()
            .map_err(|_| format!("'{minutes}' is not a minute count"))?;
        self.durations.insert(code, minutes);
        Ok(format!("duration {code} -> {minutes} minutes"))
    }

    fn merge_ts_line(&mut self, line: &str) -> Result<String, String> {
        let code = one_token(line)?;
        if code.len() != 2 {
            return Err(format!("'{code}' is not a type/source code"));
        }
        let code = code.to_uppercase();
        self.type_sources.insert(code.clone());
        Ok(format!("type/source {code} admitted"))
    }

    fn merge_extremum_line(&mut self, line: &str) -> Result<String, String> {
        let code = single_char(one_token(line)?)?;
        self.extremums.insert(code);
        Ok(format!("extremum {code} admitted"))
    }

    fn merge_probability_line(&mut self, line: &str) -> Result<String, String> {
        let (code, value) = two_tokens(line)?;
        let code = single_char(code)?;
        let value: f64 = value
            .parse()
            .map_err(|_| format!("'{value}' is not a probability value"))?;
        self.probabilities.insert(code, value);
        Ok(format!("probability {code} -> {value}"))
    }

    fn merge_send_line(&mut self, line: &str) -> Result<String, String> {
        let (code, expansion) = two_tokens(line)?;
        if expansion.len() != 7 {
            return Err(format!(
                "send-code expansion '{expansion}' is not 7 characters"
            ));
        }
        let code = code.to_uppercase();
        let expansion = expansion.to_uppercase();
        self.send_codes.insert(code.clone(), expansion.clone());
        Ok(format!("send code {code} -> {expansion}"))
    }

    fn merge_qualifier_line(&mut self, line: &str) -> Result<String, String> {
        let code = single_char(one_token(line)?)?;
        self.qualifiers.insert(code);
        Ok(format!("qualifier {code} admitted"))
    }

    fn merge_max_errors_line(&mut self, line: &str) -> Result<String, String> {
        let n: u32 = one_token(line)?
            .parse()
            .map_err(|_| format!("'{line}' is not an error count"))?;
        self.max_errors = n;
        Ok(format!("max errors -> {n}"))
    }

    /// Write the current state back out in SHEFPARM form. Re-merging the
    /// result into a default registry reproduces this registry.
    pub fn emit_shefparm(&self) -> String {
        let mut out = String::new();
        out.push_str(": SHEFPARM written from the active registry\n");

        out.push_str(SECTION_PE);
        out.push('\n');
        for (code, e) in &self.pe {
            let unit = if e.base_unit.is_empty() {
                "-".to_string()
            } else {
                e.base_unit.clone()
            };
            out.push_str(&format!(
                "{code} {} {} {unit} {}\n",
                e.english_factor, e.metric_factor, e.default_duration
            ));
        }

        out.push_str(SECTION_DURATION);
        out.push('\n');
        for (code, minutes) in &self.durations {
            out.push_str(&format!("{code} {minutes}\n"));
        }

        out.push_str(SECTION_TS);
        out.push('\n');
        for code in &self.type_sources {
            out.push_str(code);
            out.push('\n');
        }

        out.push_str(SECTION_EXTREMUM);
        out.push('\n');
        for code in &self.extremums {
            out.push_str(&format!("{code}\n"));
        }

        out.push_str(SECTION_PROBABILITY);
        out.push('\n');
        for (code, value) in &self.probabilities {
            out.push_str(&format!("{code} {value}\n"));
        }

        out.push_str(SECTION_SEND);
        out.push('\n');
        for (code, expansion) in &self.send_codes {
            out.push_str(&format!("{code} {expansion}\n"));
        }

        out.push_str(SECTION_QUALIFIER);
        out.push('\n');
        for code in &self.qualifiers {
            out.push_str(&format!("{code}\n"));
        }

        out.push_str(SECTION_MAX_ERRORS);
        out.push('\n');
        out.push_str(&format!("{}\n", self.max_errors));

        out
    }
}

fn match_section(line: &str) -> Option<&'static str> {
    let wanted = [
        SECTION_PE,
        SECTION_DURATION,
        SECTION_TS,
        SECTION_EXTREMUM,
        SECTION_PROBABILITY,
        SECTION_SEND,
        SECTION_QUALIFIER,
        SECTION_MAX_ERRORS,
    ];
    wanted
        .into_iter()
        .find(|header| line.eq_ignore_ascii_case(header))
}

fn one_token(line: &str) -> Result<&str, String> {
    let mut it = line.split_whitespace();
    let tok = it.next().ok_or_else(|| "empty entry".to_string())?;
    if it.next().is_some() {
        return Err(format!("unexpected trailing text in '{line}'"));
    }
    Ok(tok)
}

fn two_tokens(line: &str) -> Result<(&str, &str), String> {
    let mut it = line.split_whitespace();
    let a = it.next().ok_or_else(|| "empty entry".to_string())?;
    let b = it
        .next()
        .ok_or_else(|| format!("'{line}' is missing its value"))?;
    if it.next().is_some() {
        return Err(format!("unexpected trailing text in '{line}'"));
    }
    Ok((a, b))
}

fn single_char(tok: &str) -> Result<char, String> {
    let mut chars = tok.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c.to_ascii_uppercase()),
        _ => Err(format!("'{tok}' is not a single code letter")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_lookups() {
        let reg = ParamRegistry::default();
        let ht = reg.lookup_pe("HT").unwrap();
        assert_eq!(ht.base_unit, "ft");
        assert_eq!(ht.default_duration, 'I');
        assert_eq!(reg.lookup_duration_code('H'), Some(60));
        assert_eq!(reg.lookup_duration_code('V'), Some(-1));
        assert!(reg.lookup_type_source("RZ"));
        assert!(!reg.lookup_type_source("QQ"));
        assert!(reg.lookup_extremum('X'));
        assert_eq!(reg.lookup_probability('Z'), Some(-1.0));
        assert_eq!(reg.lookup_probability('M'), Some(0.5));
        assert!(reg.lookup_qualifier('G'));
        assert_eq!(reg.lookup_send_code("PY"), Some("PPDRZZZ"));
        assert_eq!(reg.max_errors(), 100);
    }

    #[test]
    fn probability_reverse_lookup() {
        let reg = ParamRegistry::default();
        assert_eq!(reg.probability_code_for(-1.0), Some('Z'));
        assert_eq!(reg.probability_code_for(0.25), Some('G'));
        assert_eq!(reg.probability_code_for(0.123), None);
    }

    #[test]
    fn merge_applies_and_rejects() {
        let mut reg = ParamRegistry::default();
        let text = "\
: local site additions
PE Codes And Conversion Factors
ZQ 1.0 2.5 widgets I
bogus line that is not an entry
Duration Codes And Associated Values
O 90
Max Number Of Errors
7
";
        let diags = reg.merge_shefparm(text);
        assert_eq!(diags.len(), 4);
        assert_eq!(diags[0].level, OverrideLevel::Applied);
        assert_eq!(diags[1].level, OverrideLevel::Rejected);
        assert_eq!(diags[2].level, OverrideLevel::Applied);
        assert_eq!(diags[3].level, OverrideLevel::Applied);

        let zq = reg.lookup_pe("ZQ").unwrap();
        assert_eq!(zq.metric_factor, 2.5);
        assert_eq!(zq.base_unit, "widgets");
        assert_eq!(reg.lookup_duration_code('O'), Some(90));
        assert_eq!(reg.max_errors(), 7);
    }

    #[test]
    fn illegal_lines_never_abort() {
        let mut reg = ParamRegistry::default();
        let diags = reg.merge_shefparm("complete nonsense\nTS Codes\nQ\n");
        assert!(diags
            .iter()
            .all(|d| matches!(d.level, OverrideLevel::Rejected)));
        // registry unchanged
        assert_eq!(reg.max_errors(), 100);
    }

    #[test]
    fn emit_round_trips_through_defaults() {
        let mut reg = ParamRegistry::default();
        reg.merge_shefparm(
            "Probability Codes And Associated Values\nQ -0.33\nMax Number Of Errors\n42\n",
        );
        let text = reg.emit_shefparm();

        let mut rebuilt = ParamRegistry::default();
        let diags = rebuilt.merge_shefparm(&text);
        assert!(diags
            .iter()
            .all(|d| matches!(d.level, OverrideLevel::Applied)));
        assert_eq!(rebuilt.max_errors(), 42);
        assert_eq!(rebuilt.lookup_probability('Q'), Some(-0.33));
        assert_eq!(format!("{:?}", rebuilt.pe), format!("{:?}", reg.pe));
    }
}
