//! The inherited-context bag: every default a message header seeds and body
//! `D*` fields mutate while the decoder walks the value positions.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::decoder::param::ParamCode;
use crate::error::ShefError;
use crate::registry::ParamRegistry;
use crate::shef_time::{self, RelativeUnit, TimeMode, ZoneCode};
use crate::value::UnitSystem;

/// Inherited defaults, alive for one message. Cloned wherever a local
/// override must not leak backward into already-emitted values.
#[derive(Debug, Clone)]
pub(crate) struct Context {
    pub location: String,
    pub obs_date: NaiveDate,
    pub obs_time: NaiveTime,
    /// 1 after `DH24`: the observation belongs to 00:00 of the next day.
    pub extra_days: i64,
    pub zone: ZoneCode,
    pub creation: Option<NaiveDateTime>,
    pub units: UnitSystem,
    /// `DI` series interval for `.E` expansion.
    pub interval: Option<(RelativeUnit, i32)>,
    /// `DV` variable-duration override, in minutes.
    pub variable_duration: Option<i32>,
    pub qualifier: char,
    pub comment: String,
    /// `DR` relative shift applied when a value's time is resolved.
    pub relative: Option<(RelativeUnit, i32)>,
    pub param: Option<ParamCode>,
}

impl Context {
    fn new(location: String, obs_date: NaiveDate) -> Self {
        Context {
            location,
            obs_date,
            obs_time: NaiveTime::MIN,
            extra_days: 0,
            zone: ZoneCode::UTC,
            creation: None,
            units: UnitSystem::English,
            interval: None,
            variable_duration: None,
            qualifier: 'Z',
            comment: String::new(),
            relative: None,
            param: None,
        }
    }

    /// Local wall-clock observation time before the `DR` shift: date, time
    /// and any `DH24` rollover. This is the clock an `.E` series steps.
    pub fn local_obs_time_base(&self, line: usize) -> Result<NaiveDateTime, ShefError> {
        let date = self
            .obs_date
            .checked_add_signed(TimeDelta::days(self.extra_days))
            .ok_or_else(|| ShefError::Time {
                line,
                reason: "observation date out of range".to_string(),
            })?;
        Ok(date.and_time(self.obs_time))
    }

    /// Local wall-clock observation time before zone resolution, with any
    /// `DH24` rollover and `DR` shift applied.
    pub fn local_obs_time(&self, line: usize) -> Result<NaiveDateTime, ShefError> {
        let base = self.local_obs_time_base(line)?;
        match self.relative {
            Some((unit, amount)) => {
                shef_time::apply_relative(base, unit, amount).map_err(|e| ShefError::Time {
                    line,
                    reason: e.to_string(),
                })
            }
            None => Ok(base),
        }
    }

    /// Replace the wall-clock time with an explicit slot time (`.E`
    /// expansion keeps its own running clock).
    pub fn set_local_obs_time(&mut self, t: NaiveDateTime) {
        self.obs_date = t.date();
        self.obs_time = t.time();
        self.extra_days = 0;
    }
}

static LOCATION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z][A-Z0-9]{0,7}$").unwrap());
static D_FIELD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^D[A-Z]").unwrap());

pub(crate) fn is_d_field(token: &str) -> bool {
    D_FIELD_RE.is_match(&token.to_uppercase())
}

pub(crate) fn is_location(token: &str) -> bool {
    let upper = token.to_uppercase();
    LOCATION_RE.is_match(&upper) && !matches!(upper.as_str(), "M" | "MSG" | "T")
}

/// Parse the positional header: location, observation date, optional zone.
/// Any further space-separated tokens ahead of the first `/` are `D*`
/// fields and mutate the fresh context in order.
pub(crate) fn parse_header(
    text: &str,
    line: usize,
    registry: &ParamRegistry,
    mode: TimeMode,
    today: NaiveDate,
) -> Result<(Context, String), ShefError> {
    let (head, fields) = match text.find('/') {
        Some(i) => (&text[..i], &text[i + 1..]),
        None => (text, ""),
    };

    let mut tokens = head.split_whitespace();
    let location = tokens
        .next()
        .filter(|t| is_location(t))
        .map(|t| t.to_uppercase())
        .ok_or_else(|| ShefError::Syntax {
            line,
            text: head.to_string(),
        })?;
    let date_tok = tokens.next().ok_or_else(|| ShefError::Syntax {
        line,
        text: head.to_string(),
    })?;
    let obs_date = parse_obs_date(date_tok, today, line)?;

    let mut ctx = Context::new(location, obs_date);

    let mut rest = tokens.peekable();
    if let Some(tok) = rest.peek() {
        if tok.len() <= 2 && tok.chars().all(|c| c.is_ascii_alphabetic()) {
            ctx.zone = tok.parse().map_err(|_| ShefError::Time {
                line,
                reason: format!("'{tok}' is not a time zone designator"),
            })?;
            rest.next();
        }
    }
    for tok in rest {
        apply_d_field(&mut ctx, tok, line, registry, mode)?;
    }

    Ok((ctx, fields.to_string()))
}

/// Observation dates come as `YYYYMMDD`, `YYMMDD` (century rule) or `MMDD`
/// (year taken from the run's calendar anchor, rolling back one year when
/// the result would sit more than half a year in the future).
fn parse_obs_date(token: &str, today: NaiveDate, line: usize) -> Result<NaiveDate, ShefError> {
    if !token.chars().all(|c| c.is_ascii_digit()) {
        return Err(ShefError::Syntax {
            line,
            text: token.to_string(),
        });
    }
    let bad_time = |reason: String| ShefError::Time { line, reason };

    match token.len() {
        8 => {
            let y: i32 = token[0..4].parse().unwrap_or(0);
            let m: u32 = token[4..6].parse().unwrap_or(0);
            let d: u32 = token[6..8].parse().unwrap_or(0);
            NaiveDate::from_ymd_opt(y, m, d)
                .ok_or_else(|| bad_time(format!("'{token}' is not a calendar date")))
        }
        6 => {
            let yy: u32 = token[0..2].parse().unwrap_or(0);
            let m: u32 = token[2..4].parse().unwrap_or(0);
            let d: u32 = token[4..6].parse().unwrap_or(0);
            NaiveDate::from_ymd_opt(shef_time::century_year(yy), m, d)
                .ok_or_else(|| bad_time(format!("'{token}' is not a calendar date")))
        }
        4 => {
            let m: u32 = token[0..2].parse().unwrap_or(0);
            let d: u32 = token[2..4].parse().unwrap_or(0);
            let this_year = NaiveDate::from_ymd_opt(today.year(), m, d)
                .ok_or_else(|| bad_time(format!("'{token}' is not a calendar date")))?;
            if this_year.signed_duration_since(today) > TimeDelta::days(183) {
                NaiveDate::from_ymd_opt(today.year() - 1, m, d)
                    .ok_or_else(|| bad_time(format!("'{token}' is not a calendar date")))
            } else {
                Ok(this_year)
            }
        }
        _ => Err(bad_time(format!("'{token}' is not an observation date"))),
    }
}

/// Apply one `D*` field to the context. Unknown letters and malformed
/// payloads are reported without touching the context.
pub(crate) fn apply_d_field(
    ctx: &mut Context,
    token: &str,
    line: usize,
    registry: &ParamRegistry,
    _mode: TimeMode,
) -> Result<(), ShefError> {
    let token = token.to_uppercase();
    let payload = token.get(2..).unwrap_or("");
    let syntax = || ShefError::Syntax {
        line,
        text: token.clone(),
    };

    let mut chars = token.chars();
    let (Some('D'), Some(kind)) = (chars.next(), chars.next()) else {
        return Err(syntax());
    };

    match kind {
        'H' => {
            let (time, rolled) = parse_clock(payload).ok_or_else(syntax)?;
            ctx.obs_time = time;
            ctx.extra_days = i64::from(rolled);
        }
        'M' => {
            let (month, day, year) = parse_month_day_year(payload).ok_or_else(syntax)?;
            let year = year.unwrap_or(ctx.obs_date.year());
            ctx.obs_date =
                NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| ShefError::Time {
                    line,
                    reason: format!("'{token}' is not a calendar date"),
                })?;
        }
        'D' => {
            if payload.len() != 2 || !payload.chars().all(|c| c.is_ascii_digit()) {
                return Err(syntax());
            }
            let day: u32 = payload.parse().unwrap_or(0);
            ctx.obs_date = ctx.obs_date.with_day(day).ok_or_else(|| ShefError::Time {
                line,
                reason: format!("day {day} does not exist in {}", ctx.obs_date.format("%Y-%m")),
            })?;
        }
        'C' => {
            ctx.creation = Some(parse_creation(payload, ctx.obs_date, line)?);
        }
        'I' => {
            let (unit, amount) = parse_unit_amount(payload).ok_or_else(syntax)?;
            // end-of-month stepping belongs to DR, not to series intervals
            if unit == RelativeUnit::EndOfMonth {
                return Err(syntax());
            }
            ctx.interval = Some((unit, amount));
        }
        'U' => {
            let c = single_letter(payload).ok_or_else(syntax)?;
            ctx.units = UnitSystem::from_letter(c).ok_or_else(syntax)?;
        }
        'V' => {
            ctx.variable_duration = Some(parse_variable_duration(payload).ok_or_else(syntax)?);
        }
        'Q' => {
            let c = single_letter(payload).ok_or_else(syntax)?;
            if !registry.lookup_qualifier(c) {
                return Err(ShefError::RegistryMiss {
                    line,
                    table: "qualifier",
                    code: c.to_string(),
                });
            }
            ctx.qualifier = c;
        }
        'R' => {
            let (unit, amount) = parse_unit_amount(payload).ok_or_else(syntax)?;
            ctx.relative = Some((unit, amount));
        }
        'T' => {
            let (time, rolled) = parse_clock(payload).ok_or_else(syntax)?;
            let base_date = ctx
                .creation
                .map(|c| c.date())
                .unwrap_or(ctx.obs_date)
                .checked_add_signed(TimeDelta::days(i64::from(rolled)))
                .ok_or_else(|| ShefError::Time {
                    line,
                    reason: "creation date out of range".to_string(),
                })?;
            ctx.creation = Some(base_date.and_time(time));
        }
        _ => return Err(syntax()),
    }
    Ok(())
}

/// `HH`, `HHMM` or `HHMMSS`; hour 24 with zero minutes/seconds rolls to
/// 00:00 of the next day.
fn parse_clock(payload: &str) -> Option<(NaiveTime, bool)> {
    if !payload.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let (h, m, s) = match payload.len() {
        2 => (payload[0..2].parse().ok()?, 0, 0),
        4 => (payload[0..2].parse().ok()?, payload[2..4].parse().ok()?, 0),
        6 => (
            payload[0..2].parse().ok()?,
            payload[2..4].parse().ok()?,
            payload[4..6].parse().ok()?,
        ),
        _ => return None,
    };
    if h == 24 && m == 0 && s == 0 {
        return Some((NaiveTime::MIN, true));
    }
    NaiveTime::from_hms_opt(h, m, s).map(|t| (t, false))
}

/// `MMDD`, `MMDDYY` or `MMDDYYYY`.
fn parse_month_day_year(payload: &str) -> Option<(u32, u32, Option<i32>)> {
    if !payload.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let month: u32 = payload.get(0..2)?.parse().ok()?;
    let day: u32 = payload.get(2..4)?.parse().ok()?;
    let year = match payload.len() {
        4 => None,
        6 => Some(crate::shef_time::century_year(payload[4..6].parse().ok()?)),
        8 => Some(payload[4..8].parse().ok()?),
        _ => return None,
    };
    Some((month, day, year))
}

/// `DC` payloads: `MMDDHHMM`, `YYMMDDHHMM` or `YYYYMMDDHHMM`.
fn parse_creation(
    payload: &str,
    obs_date: NaiveDate,
    line: usize,
) -> Result<NaiveDateTime, ShefError> {
    let syntax = || ShefError::Syntax {
        line,
        text: format!("DC{payload}"),
    };
    if !payload.chars().all(|c| c.is_ascii_digit()) {
        return Err(syntax());
    }
    let (year, rest) = match payload.len() {
        8 => (obs_date.year(), payload),
        10 => (
            shef_time::century_year(payload[0..2].parse().unwrap_or(0)),
            &payload[2..],
        ),
        12 => (payload[0..4].parse().unwrap_or(0), &payload[4..]),
        _ => return Err(syntax()),
    };
    let month: u32 = rest[0..2].parse().unwrap_or(0);
    let day: u32 = rest[2..4].parse().unwrap_or(0);
    let hour: u32 = rest[4..6].parse().unwrap_or(0);
    let minute: u32 = rest[6..8].parse().unwrap_or(0);
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, 0))
        .ok_or_else(|| ShefError::Time {
            line,
            reason: format!("DC{payload} is not a calendar date/time"),
        })
}

/// `DV` payloads: `<letter><signed integer>` in minutes. The letter set is
/// `M/H/D/Y` only, with `M` meaning minutes here.
fn parse_variable_duration(payload: &str) -> Option<i32> {
    let mut chars = payload.chars();
    let scale = match chars.next()?.to_ascii_uppercase() {
        'M' => 1,
        'H' => 60,
        'D' => 1440,
        'Y' => 525_600,
        _ => return None,
    };
    let rest = chars.as_str();
    if rest.is_empty() {
        return None;
    }
    let amount: i32 = rest.parse().ok()?;
    Some(amount.saturating_mul(scale))
}

/// `<unit letter><signed integer>` payloads shared by `DI` and `DR`.
fn parse_unit_amount(payload: &str) -> Option<(RelativeUnit, i32)> {
    let mut chars = payload.chars();
    let unit = RelativeUnit::from_letter(chars.next()?)?;
    let rest = chars.as_str();
    if rest.is_empty() {
        return None;
    }
    let amount: i32 = rest.parse().ok()?;
    Some((unit, amount))
}

fn single_letter(payload: &str) -> Option<char> {
    let mut chars = payload.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_alphabetic() => Some(c),
        _ => None,
    }
}
