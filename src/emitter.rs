//! The two fixed-column output formats, and their re-parsers for inputs that
//! were already decoded once (`--processed`).
//!
//! Format 1 (long form) spends one generously padded line per value; format 2
//! (compact form) splits the timestamps into whitespace-separated fields and
//! truncates retained comments at 66 characters. Both formats carry enough of
//! the record to reconstruct it: re-parsing an emitted line yields the
//! original observation, up to format 2's value precision and comment
//! truncation.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::error::ShefError;
use crate::registry::ParamRegistry;
use crate::shef_time::ZoneCode;
use crate::value::{ShefValue, UnitSystem};

pub const COMPACT_COMMENT_LIMIT: usize = 66;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmitFormat {
    #[default]
    Long,
    Compact,
}

impl EmitFormat {
    pub fn from_flag(flag: u8) -> Option<Self> {
        match flag {
            1 => Some(EmitFormat::Long),
            2 => Some(EmitFormat::Compact),
            _ => None,
        }
    }
}

pub fn emit(v: &ShefValue, format: EmitFormat) -> String {
    match format {
        EmitFormat::Long => emit_format1(v),
        EmitFormat::Compact => emit_format2(v),
    }
}

/// Encode minutes in the thousands duration convention: 0 instantaneous,
/// minutes up to 999 as-is, then 1000+hours, 2000+days, 3000+months,
/// 4000+years; -1 for variable/unknown.
pub(crate) fn minutes_to_coded(minutes: i32) -> i32 {
    if minutes < 0 {
        -1
    } else if minutes == 0 {
        0
    } else if minutes % 525_600 == 0 {
        4000 + minutes / 525_600
    } else if minutes % 43_200 == 0 {
        3000 + minutes / 43_200
    } else if minutes % 1440 == 0 {
        2000 + minutes / 1440
    } else if minutes % 60 == 0 {
        1000 + minutes / 60
    } else if minutes < 1000 {
        minutes
    } else {
        // no exact encoding at this magnitude; report as variable
        -1
    }
}

pub(crate) fn coded_to_minutes(coded: i32) -> i32 {
    match coded {
        c if c < 0 => -1,
        0 => 0,
        c @ 1..=999 => c,
        c @ 1000..=1999 => (c - 1000) * 60,
        c @ 2000..=2999 => (c - 2000) * 1440,
        c @ 3000..=3999 => (c - 3000) * 43_200,
        c @ 4000..=4999 => (c - 4000) * 525_600,
        _ => -1,
    }
}

const NULL_TIMESTAMP: &str = "0000-00-00 00:00:00";

fn long_timestamp(t: Option<DateTime<Utc>>) -> String {
    match t {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => NULL_TIMESTAMP.to_string(),
    }
}

/// Marker column shared by both formats: `T` for trace, `S` for metric
/// source units, then the reporting zone when it was not Zulu. Zone bases
/// never start with `T` or `S`, so the string reads back unambiguously.
fn flags_string(v: &ShefValue) -> String {
    let mut flags = String::new();
    if v.trace {
        flags.push('T');
    }
    if v.units == UnitSystem::Metric {
        flags.push('S');
    }
    if v.zone != ZoneCode::UTC {
        flags.push_str(&v.zone.to_string());
    }
    flags
}

fn parse_flags(flags: &str, line: usize) -> Result<(bool, UnitSystem, ZoneCode), ShefError> {
    let mut rest = flags;
    let trace = rest.starts_with('T');
    if trace {
        rest = &rest[1..];
    }
    let units = if rest.starts_with('S') {
        rest = &rest[1..];
        UnitSystem::Metric
    } else {
        UnitSystem::English
    };
    let zone = if rest.is_empty() {
        ZoneCode::UTC
    } else {
        rest.parse().map_err(|_| ShefError::Syntax {
            line,
            text: format!("bad flags column '{flags}'"),
        })?
    };
    Ok((trace, units, zone))
}

/// One value per line, fixed columns:
///
/// ```text
/// <loc:10><obs:19>  <created:19>  <pe+dur+ts+ext:6>    <value:12.4> <qual>
///  <probability:8.3> <coded dur:5> <revised> <series> <flags:10> "comment"
/// ```
pub fn emit_format1(v: &ShefValue) -> String {
    let param6 = format!(
        "{}{}{}{}",
        v.pe(),
        v.duration_code,
        v.type_source(),
        v.extremum()
    );
    let coded = minutes_to_coded(v.duration_value);
    let dur = if coded < 0 {
        "-1".to_string()
    } else {
        format!("{coded:04}")
    };
    let comment = if v.comment.is_empty() {
        " ".to_string()
    } else {
        v.comment.clone()
    };
    format!(
        "{:<10}{}  {}  {}    {:>12.4} {} {:>8.3} {:>5} {} {} {:<10} \"{}\"",
        v.location,
        long_timestamp(Some(v.obs_time)),
        long_timestamp(v.creation_time),
        param6,
        v.value,
        v.qualifier,
        v.probability,
        dur,
        u8::from(v.revised),
        v.time_series_code,
        flags_string(v),
        comment
    )
}

fn column<'a>(line: &'a str, range: std::ops::Range<usize>, what: &str, lineno: usize) -> Result<&'a str, ShefError> {
    line.get(range).ok_or_else(|| ShefError::Syntax {
        line: lineno,
        text: format!("line too short for the {what} column"),
    })
}

fn parse_long_timestamp(text: &str, lineno: usize) -> Result<Option<DateTime<Utc>>, ShefError> {
    if text == NULL_TIMESTAMP {
        return Ok(None);
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
        .map(|t| Some(t.and_utc()))
        .map_err(|_| ShefError::Time {
            line: lineno,
            reason: format!("'{text}' is not a decoded timestamp"),
        })
}

/// Re-parse a format 1 line. The probability bucket letter is recovered from
/// the numeric column through the registry.
pub fn parse_format1(
    line: &str,
    lineno: usize,
    registry: &ParamRegistry,
) -> Result<ShefValue, ShefError> {
    let location = column(line, 0..10, "location", lineno)?.trim().to_string();
    let obs_time = parse_long_timestamp(column(line, 10..29, "observation time", lineno)?, lineno)?
        .ok_or_else(|| ShefError::Time {
            line: lineno,
            reason: "observation time is the null timestamp".to_string(),
        })?;
    let creation_time =
        parse_long_timestamp(column(line, 31..50, "creation time", lineno)?, lineno)?;

    let param6 = column(line, 52..58, "parameter", lineno)?;
    let pe = param6[0..2].to_string();
    let duration_code = param6[2..3].chars().next().unwrap_or('I');
    let type_source = param6[3..5].to_string();
    let extremum = param6[5..6].chars().next().unwrap_or('Z');

    let value_col = column(line, 62..74, "value", lineno)?.trim();
    let value: f64 = value_col.parse().map_err(|_| ShefError::Numeric {
        line: lineno,
        text: value_col.to_string(),
    })?;
    let qualifier = column(line, 75..76, "qualifier", lineno)?
        .chars()
        .next()
        .unwrap_or('Z');
    let prob_col = column(line, 77..85, "probability", lineno)?.trim();
    let probability: f64 = prob_col.parse().map_err(|_| ShefError::Numeric {
        line: lineno,
        text: prob_col.to_string(),
    })?;
    let dur_col = column(line, 86..91, "duration", lineno)?.trim();
    let coded: i32 = dur_col.parse().map_err(|_| ShefError::Numeric {
        line: lineno,
        text: dur_col.to_string(),
    })?;
    let revised = column(line, 92..93, "revision flag", lineno)? == "1";
    let time_series_code: u8 = column(line, 94..95, "series code", lineno)?
        .parse()
        .unwrap_or(1);
    let (trace, units, zone) =
        parse_flags(column(line, 96..106, "flags", lineno)?.trim(), lineno)?;

    let comment_col = line.get(107..).unwrap_or("").trim();
    let comment = comment_col
        .strip_prefix('"')
        .and_then(|c| c.strip_suffix('"'))
        .unwrap_or(comment_col);
    let comment = if comment == " " { "" } else { comment };

    let prob_code = registry.probability_code_for(probability).unwrap_or('Z');
    Ok(ShefValue {
        location,
        obs_time,
        creation_time,
        parameter_code: format!("{pe}{type_source}{extremum}{prob_code}"),
        duration_code,
        duration_value: coded_to_minutes(coded),
        value,
        qualifier,
        probability,
        revised,
        trace,
        units,
        zone,
        comment: comment.to_string(),
        time_series_code,
    })
}

const NULL_COMPACT_CREATION: &str = "000000 00 00 00";

/// One value per line, whitespace-separated compact columns: location, the
/// observation instant split as `YYYYMM DD HH MM SS`, the creation instant
/// split the same way (zeros when absent), physical element, the
/// type/source+extremum triple, qualifier+probability bucket, value, zone,
/// duration in minutes, a revised/trace/units flag triple, the series code,
/// and the retained comment truncated to 66 characters.
pub fn emit_format2(v: &ShefValue) -> String {
    let obs = v.obs_time.format("%Y%m %d %H %M %S").to_string();
    let creation = match v.creation_time {
        Some(t) => t.format("%Y%m %d %H %M").to_string(),
        None => NULL_COMPACT_CREATION.to_string(),
    };
    let dur = if v.duration_value < 0 {
        "-1.00".to_string()
    } else {
        format!("{:.2}", f64::from(v.duration_value))
    };
    let flags = format!(
        "{}{}{}",
        u8::from(v.revised),
        if v.trace { 'T' } else { '-' },
        v.units.letter()
    );
    let mut line = format!(
        "{:<8} {obs}    {creation}    {} {}{} {}{} {:>10.3} {:<2} {dur:>8}    {flags} {}",
        v.location,
        v.pe(),
        v.type_source(),
        v.extremum(),
        v.qualifier,
        v.probability_code(),
        v.value,
        v.zone,
        v.time_series_code
    );
    if !v.comment.is_empty() {
        let truncated: String = v.comment.chars().take(COMPACT_COMMENT_LIMIT).collect();
        line.push(' ');
        line.push_str(&truncated);
    }
    line
}

/// Cut `n` whitespace-separated tokens off the front of `line`, returning
/// them and the untouched remainder (the comment field, which keeps its
/// internal spacing).
fn split_tokens(line: &str, n: usize) -> Option<(Vec<&str>, &str)> {
    let mut tokens = Vec::with_capacity(n);
    let mut rest = line;
    for _ in 0..n {
        rest = rest.trim_start();
        let end = rest
            .find(char::is_whitespace)
            .unwrap_or(rest.len());
        if end == 0 {
            return None;
        }
        tokens.push(&rest[..end]);
        rest = &rest[end..];
    }
    Some((tokens, rest.strip_prefix(' ').unwrap_or(rest)))
}

pub fn parse_format2(
    line: &str,
    lineno: usize,
    registry: &ParamRegistry,
) -> Result<ShefValue, ShefError> {
    let (tokens, comment) = split_tokens(line, 17).ok_or_else(|| ShefError::Syntax {
        line: lineno,
        text: "compact line has too few columns".to_string(),
    })?;

    let bad_time = |what: &str| ShefError::Time {
        line: lineno,
        reason: format!("bad {what} field"),
    };

    let obs_date = parse_compact_date(tokens[1], tokens[2]).ok_or_else(|| bad_time("date"))?;
    let obs_time = obs_date
        .and_hms_opt(
            tokens[3].parse().unwrap_or(99),
            tokens[4].parse().unwrap_or(99),
            tokens[5].parse().unwrap_or(99),
        )
        .ok_or_else(|| bad_time("time"))?
        .and_utc();

    let creation_time = if tokens[6] == "000000" {
        None
    } else {
        let d = parse_compact_date(tokens[6], tokens[7]).ok_or_else(|| bad_time("creation date"))?;
        Some(
            d.and_hms_opt(
                tokens[8].parse().unwrap_or(99),
                tokens[9].parse().unwrap_or(99),
                0,
            )
            .ok_or_else(|| bad_time("creation time"))?
            .and_utc(),
        )
    };

    let pe = tokens[10].to_string();
    let tse = tokens[11];
    if pe.len() != 2 || tse.len() != 3 {
        return Err(ShefError::Syntax {
            line: lineno,
            text: format!("bad parameter fields '{pe} {tse}'"),
        });
    }
    let qp = tokens[12];
    if qp.len() != 2 {
        return Err(ShefError::Syntax {
            line: lineno,
            text: format!("bad qualifier/probability field '{qp}'"),
        });
    }
    let qualifier = qp[0..1].chars().next().unwrap_or('Z');
    let prob_code = qp[1..2].chars().next().unwrap_or('Z');

    let value: f64 = tokens[13].parse().map_err(|_| ShefError::Numeric {
        line: lineno,
        text: tokens[13].to_string(),
    })?;
    let zone: ZoneCode = tokens[14].parse().map_err(|_| ShefError::Syntax {
        line: lineno,
        text: format!("bad zone field '{}'", tokens[14]),
    })?;
    let dur: f64 = tokens[15].parse().map_err(|_| ShefError::Numeric {
        line: lineno,
        text: tokens[15].to_string(),
    })?;

    let flags = tokens[16];
    if flags.len() != 3 {
        return Err(ShefError::Syntax {
            line: lineno,
            text: format!("bad flags field '{flags}'"),
        });
    }
    let revised = flags.starts_with('1');
    let trace = flags[1..2] == *"T";
    let units = UnitSystem::from_letter(flags[2..3].chars().next().unwrap_or('E'))
        .unwrap_or(UnitSystem::English);

    // the remainder is the series code then the optional comment
    let (ts_tok, comment) = split_tokens(comment, 1).ok_or_else(|| ShefError::Syntax {
        line: lineno,
        text: "compact line is missing its series code".to_string(),
    })?;
    let time_series_code: u8 = ts_tok[0].parse().unwrap_or(1);

    Ok(ShefValue {
        location: tokens[0].to_string(),
        obs_time,
        creation_time,
        parameter_code: format!("{pe}{tse}{prob_code}"),
        duration_code: duration_code_for_minutes(dur as i32),
        duration_value: dur as i32,
        value,
        qualifier,
        probability: registry.lookup_probability(prob_code).unwrap_or(-1.0),
        revised,
        trace,
        units,
        zone,
        comment: comment.to_string(),
        time_series_code,
    })
}

fn parse_compact_date(yyyymm: &str, dd: &str) -> Option<NaiveDate> {
    if yyyymm.len() != 6 {
        return None;
    }
    NaiveDate::from_ymd_opt(
        yyyymm[0..4].parse().ok()?,
        yyyymm[4..6].parse().ok()?,
        dd.parse().ok()?,
    )
}

/// Best-effort duration letter for a minute count read back from compact
/// output, which does not carry the original letter.
fn duration_code_for_minutes(minutes: i32) -> char {
    match minutes {
        0 => 'I',
        1 => 'U',
        5 => 'E',
        10 => 'G',
        15 => 'C',
        30 => 'J',
        60 => 'H',
        120 => 'B',
        180 => 'T',
        240 => 'F',
        360 => 'Q',
        480 => 'A',
        720 => 'K',
        1080 => 'L',
        1440 => 'D',
        10080 => 'W',
        43_200 => 'M',
        525_600 => 'Y',
        m if m < 0 => 'Z',
        _ => 'V',
    }
}

/// Tell the two emitted formats apart: format 1 carries its dashed
/// observation timestamp at a fixed column.
pub fn detect_format(line: &str) -> Option<EmitFormat> {
    let bytes = line.as_bytes();
    if bytes.len() > 17 && bytes[14] == b'-' && bytes[17] == b'-' {
        Some(EmitFormat::Long)
    } else if !line.trim().is_empty() {
        Some(EmitFormat::Compact)
    } else {
        None
    }
}

/// Re-parse one line of previously emitted output, whichever format it is in.
pub fn parse_processed_line(
    line: &str,
    lineno: usize,
    registry: &ParamRegistry,
) -> Result<Option<ShefValue>, ShefError> {
    match detect_format(line) {
        None => Ok(None),
        Some(EmitFormat::Long) => parse_format1(line, lineno, registry).map(Some),
        Some(EmitFormat::Compact) => parse_format2(line, lineno, registry).map(Some),
    }
}
