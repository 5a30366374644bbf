//! Calendar and time-zone arithmetic for SHEF messages.
//!
//! SHEF reports local times against a one- or two-letter zone designator. A
//! bare letter means the zone's civil time (daylight saving applied while in
//! effect); an `S` or `D` suffix pins the offset to standard or daylight
//! time. Conversion to UTC runs in one of two modes:
//!
//! - [`TimeMode::Modern`] resolves bare-letter zones through the tz database,
//!   so historical daylight-saving transitions follow the real rules for the
//!   representative location of each zone.
//! - [`TimeMode::Legacy`] reproduces the arithmetic of the historical Fortran
//!   decoder: fixed offset tables, the US daylight-saving rule applied
//!   uniformly, Yukon pinned to UTC-9, and Newfoundland daylight time left
//!   on its fixed offset.

use std::fmt::Display;
use std::str::FromStr;

use chrono::{
    DateTime, Datelike, FixedOffset, Months, NaiveDate, NaiveDateTime, TimeDelta, TimeZone, Utc,
    Weekday,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Which UTC-conversion rules a decoding run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeMode {
    #[default]
    Modern,
    Legacy,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TimeError {
    #[error("'{0}' is not a SHEF time zone designator")]
    UnknownZone(String),
    #[error("local time {0} does not exist in zone {1} (daylight saving gap)")]
    NonexistentLocal(NaiveDateTime, ZoneCode),
    #[error("local time {0} is ambiguous in zone {1} (daylight saving overlap)")]
    AmbiguousLocal(NaiveDateTime, ZoneCode),
    #[error("date/time out of representable range")]
    OutOfRange,
}

/// Standard/daylight pinning of a zone designator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ZoneVariant {
    /// Bare letter: civil time of the zone.
    Civil,
    /// `S` suffix: standard time year-round.
    Standard,
    /// `D` suffix: daylight time year-round.
    Daylight,
}

/// A SHEF time zone designator, e.g. `Z`, `C`, `CS`, `CD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ZoneCode {
    base: char,
    variant: ZoneVariant,
}

/// Bases that accept S/D suffixes. `Z` and `J` are fixed-offset zones and
/// take no suffix.
const SUFFIXED_BASES: &str = "NAECMPYLHB";

impl ZoneCode {
    pub const UTC: ZoneCode = ZoneCode {
        base: 'Z',
        variant: ZoneVariant::Civil,
    };

    pub fn base(&self) -> char {
        self.base
    }

    pub fn variant(&self) -> ZoneVariant {
        self.variant
    }

    /// Standard-time offset from UTC, in minutes.
    fn standard_offset_minutes(&self) -> i32 {
        match self.base {
            'Z' => 0,
            'N' => -210,
            'A' => -240,
            'E' => -300,
            'C' => -360,
            'M' => -420,
            'P' => -480,
            'Y' | 'L' => -540,
            'H' => -600,
            'B' => -660,
            'J' => 480,
            _ => unreachable!("constructor only admits known bases"),
        }
    }

    /// tz-database zone used for bare-letter designators in modern mode.
    fn tz_database_zone(&self) -> Tz {
        match self.base {
            'Z' => chrono_tz::UTC,
            'N' => chrono_tz::America::St_Johns,
            'A' => chrono_tz::America::Halifax,
            'E' => chrono_tz::America::New_York,
            'C' => chrono_tz::America::Chicago,
            'M' => chrono_tz::America::Denver,
            'P' => chrono_tz::America::Los_Angeles,
            'Y' => chrono_tz::America::Whitehorse,
            'L' => chrono_tz::America::Anchorage,
            'H' => chrono_tz::Pacific::Honolulu,
            'B' => chrono_tz::America::Adak,
            'J' => chrono_tz::Asia::Shanghai,
            _ => unreachable!("constructor only admits known bases"),
        }
    }

    /// Fixed offset for pinned (`S`/`D`) designators, in minutes.
    fn pinned_offset_minutes(&self) -> i32 {
        let std = self.standard_offset_minutes();
        match self.variant {
            ZoneVariant::Standard => std,
            ZoneVariant::Daylight => std + 60,
            ZoneVariant::Civil => std,
        }
    }

    /// Convert a local wall-clock reading in this zone to UTC.
    pub fn to_utc(&self, local: NaiveDateTime, mode: TimeMode) -> Result<DateTime<Utc>, TimeError> {
        match self.variant {
            ZoneVariant::Standard | ZoneVariant::Daylight => {
                Ok(fixed_to_utc(local, self.pinned_offset_minutes()))
            }
            ZoneVariant::Civil => match mode {
                TimeMode::Modern => {
                    let tz = self.tz_database_zone();
                    match tz.from_local_datetime(&local) {
                        chrono::LocalResult::Single(t) => Ok(t.with_timezone(&Utc)),
                        chrono::LocalResult::None => {
                            Err(TimeError::NonexistentLocal(local, *self))
                        }
                        chrono::LocalResult::Ambiguous(_, _) => {
                            Err(TimeError::AmbiguousLocal(local, *self))
                        }
                    }
                }
                TimeMode::Legacy => Ok(fixed_to_utc(local, self.legacy_offset_minutes(local))),
            },
        }
    }

    /// Convert a UTC instant back to this zone's wall clock. Used when
    /// composing SHEF text, where both halves of a daylight-saving overlap
    /// render the same way.
    pub fn from_utc(&self, utc: DateTime<Utc>, mode: TimeMode) -> NaiveDateTime {
        match self.variant {
            ZoneVariant::Standard | ZoneVariant::Daylight => utc
                .with_timezone(&fixed_offset(self.pinned_offset_minutes()))
                .naive_local(),
            ZoneVariant::Civil => match mode {
                TimeMode::Modern => utc.with_timezone(&self.tz_database_zone()).naive_local(),
                TimeMode::Legacy => {
                    let standard = utc
                        .with_timezone(&fixed_offset(self.standard_offset_minutes()))
                        .naive_local();
                    utc.with_timezone(&fixed_offset(self.legacy_offset_minutes(standard)))
                        .naive_local()
                }
            },
        }
    }

    /// Offset the historical decoder would have used for a bare-letter zone.
    ///
    /// Yukon stays pinned to UTC-9 and Hawaii, China and Zulu never shift;
    /// every other zone (Newfoundland included, on the unmodified mainland
    /// schedule) gets one hour of daylight saving per [`us_dst_in_effect`].
    fn legacy_offset_minutes(&self, local: NaiveDateTime) -> i32 {
        let std = self.standard_offset_minutes();
        let shifts = !matches!(self.base, 'Z' | 'J' | 'H' | 'Y');
        if shifts && us_dst_in_effect(local) {
            std + 60
        } else {
            std
        }
    }
}

impl FromStr for ZoneCode {
    type Err = TimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let base = chars
            .next()
            .ok_or_else(|| TimeError::UnknownZone(s.to_string()))?
            .to_ascii_uppercase();
        let suffix = chars.next().map(|c| c.to_ascii_uppercase());
        if chars.next().is_some() {
            return Err(TimeError::UnknownZone(s.to_string()));
        }

        let variant = match suffix {
            None => ZoneVariant::Civil,
            Some('S') if SUFFIXED_BASES.contains(base) => ZoneVariant::Standard,
            Some('D') if SUFFIXED_BASES.contains(base) => ZoneVariant::Daylight,
            Some(_) => return Err(TimeError::UnknownZone(s.to_string())),
        };

        if !"ZNAECMPYLHBJ".contains(base) {
            return Err(TimeError::UnknownZone(s.to_string()));
        }

        Ok(ZoneCode { base, variant })
    }
}

impl Display for ZoneCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.variant {
            ZoneVariant::Civil => write!(f, "{}", self.base),
            ZoneVariant::Standard => write!(f, "{}S", self.base),
            ZoneVariant::Daylight => write!(f, "{}D", self.base),
        }
    }
}

impl Default for ZoneCode {
    fn default() -> Self {
        ZoneCode::UTC
    }
}

fn fixed_offset(minutes: i32) -> FixedOffset {
    // offsets in the zone table are all well inside the +-1 day bound
    FixedOffset::east_opt(minutes * 60).expect("zone offset out of range")
}

fn fixed_to_utc(local: NaiveDateTime, offset_minutes: i32) -> DateTime<Utc> {
    let shifted = local - TimeDelta::minutes(offset_minutes as i64);
    shifted.and_utc()
}

/// US daylight-saving rule for the given local wall-clock time: second Sunday
/// in March through first Sunday in November from 2007 on, first Sunday in
/// April through last Sunday in October before that. Transitions at 02:00.
pub fn us_dst_in_effect(local: NaiveDateTime) -> bool {
    let year = local.year();
    let (start, end) = if year >= 2007 {
        (
            nth_weekday(year, 3, Weekday::Sun, 2),
            nth_weekday(year, 11, Weekday::Sun, 1),
        )
    } else {
        (
            nth_weekday(year, 4, Weekday::Sun, 1),
            last_weekday(year, 10, Weekday::Sun),
        )
    };
    let (Some(start), Some(end)) = (start, end) else {
        return false;
    };
    let start = start.and_hms_opt(2, 0, 0).expect("02:00 is always valid");
    let end = end.and_hms_opt(2, 0, 0).expect("02:00 is always valid");
    local >= start && local < end
}

fn nth_weekday(year: i32, month: u32, weekday: Weekday, n: u8) -> Option<NaiveDate> {
    NaiveDate::from_weekday_of_month_opt(year, month, weekday, n)
}

fn last_weekday(year: i32, month: u32, weekday: Weekday) -> Option<NaiveDate> {
    NaiveDate::from_weekday_of_month_opt(year, month, weekday, 5)
        .or_else(|| NaiveDate::from_weekday_of_month_opt(year, month, weekday, 4))
}

/// Map a two-digit SHEF year onto a century: `00`-`69` are 2000s, `70`-`99`
/// are 1900s.
pub fn century_year(yy: u32) -> i32 {
    if yy < 70 {
        2000 + yy as i32
    } else {
        1900 + yy as i32
    }
}

/// Units of a relative date adjustment (`DR`) or series interval (`DI`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelativeUnit {
    Minutes,
    Hours,
    Days,
    Months,
    Years,
    /// Month offset snapped to the last day of the resulting month.
    EndOfMonth,
}

impl RelativeUnit {
    pub fn from_letter(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'N' => Some(RelativeUnit::Minutes),
            'H' => Some(RelativeUnit::Hours),
            'D' => Some(RelativeUnit::Days),
            'M' => Some(RelativeUnit::Months),
            'Y' => Some(RelativeUnit::Years),
            'E' => Some(RelativeUnit::EndOfMonth),
            _ => None,
        }
    }

    pub fn letter(&self) -> char {
        match self {
            RelativeUnit::Minutes => 'N',
            RelativeUnit::Hours => 'H',
            RelativeUnit::Days => 'D',
            RelativeUnit::Months => 'M',
            RelativeUnit::Years => 'Y',
            RelativeUnit::EndOfMonth => 'E',
        }
    }
}

/// Shift a local date/time by a signed amount of the given unit. Month and
/// year steps clamp to the last valid day of the target month, so
/// 31 Jan + 1 month lands on 28/29 Feb.
pub fn apply_relative(
    t: NaiveDateTime,
    unit: RelativeUnit,
    amount: i32,
) -> Result<NaiveDateTime, TimeError> {
    let shift_months = |t: NaiveDateTime, months: i32| -> Result<NaiveDateTime, TimeError> {
        let m = Months::new(months.unsigned_abs());
        let shifted = if months >= 0 {
            t.checked_add_months(m)
        } else {
            t.checked_sub_months(m)
        };
        shifted.ok_or(TimeError::OutOfRange)
    };

    match unit {
        RelativeUnit::Minutes => t
            .checked_add_signed(TimeDelta::minutes(amount as i64))
            .ok_or(TimeError::OutOfRange),
        RelativeUnit::Hours => t
            .checked_add_signed(TimeDelta::hours(amount as i64))
            .ok_or(TimeError::OutOfRange),
        RelativeUnit::Days => t
            .checked_add_signed(TimeDelta::days(amount as i64))
            .ok_or(TimeError::OutOfRange),
        RelativeUnit::Months => shift_months(t, amount),
        RelativeUnit::Years => shift_months(t, amount.saturating_mul(12)),
        RelativeUnit::EndOfMonth => {
            let shifted = shift_months(t, amount)?;
            let date = shifted.date();
            let last = last_day_of_month(date.year(), date.month())?;
            Ok(last.and_time(shifted.time()))
        }
    }
}

pub fn last_day_of_month(year: i32, month: u32) -> Result<NaiveDate, TimeError> {
    let first = NaiveDate::from_ymd_opt(year, month, 1).ok_or(TimeError::OutOfRange)?;
    let next = first
        .checked_add_months(Months::new(1))
        .ok_or(TimeError::OutOfRange)?;
    next.pred_opt().ok_or(TimeError::OutOfRange)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn utc(s: &str) -> DateTime<Utc> {
        naive(s).and_utc()
    }

    #[test]
    fn zone_parsing() {
        assert_eq!(
            "Z".parse::<ZoneCode>().unwrap(),
            ZoneCode {
                base: 'Z',
                variant: ZoneVariant::Civil
            }
        );
        assert_eq!("cs".parse::<ZoneCode>().unwrap().to_string(), "CS");
        assert!("Q".parse::<ZoneCode>().is_err());
        assert!("ZD".parse::<ZoneCode>().is_err());
        assert!("JD".parse::<ZoneCode>().is_err());
        assert!("CSX".parse::<ZoneCode>().is_err());
    }

    #[test]
    fn utc_zone_is_identity() {
        let t = naive("2025-11-07 14:00:00");
        let got = ZoneCode::UTC.to_utc(t, TimeMode::Modern).unwrap();
        assert_eq!(got, utc("2025-11-07 14:00:00"));
    }

    #[test]
    fn pinned_offsets_ignore_dst() {
        let t = naive("2024-07-01 12:00:00");
        let cs: ZoneCode = "CS".parse().unwrap();
        let cd: ZoneCode = "CD".parse().unwrap();
        assert_eq!(cs.to_utc(t, TimeMode::Modern).unwrap(), utc("2024-07-01 18:00:00"));
        assert_eq!(cd.to_utc(t, TimeMode::Modern).unwrap(), utc("2024-07-01 17:00:00"));
        // pinned variants behave identically in both modes
        assert_eq!(
            cs.to_utc(t, TimeMode::Legacy).unwrap(),
            cs.to_utc(t, TimeMode::Modern).unwrap()
        );
    }

    #[test]
    fn civil_zone_follows_dst() {
        let c: ZoneCode = "C".parse().unwrap();
        // mid-winter: CST, UTC-6
        assert_eq!(
            c.to_utc(naive("2024-01-15 06:00:00"), TimeMode::Modern).unwrap(),
            utc("2024-01-15 12:00:00")
        );
        // mid-summer: CDT, UTC-5
        assert_eq!(
            c.to_utc(naive("2024-07-15 06:00:00"), TimeMode::Modern).unwrap(),
            utc("2024-07-15 11:00:00")
        );
    }

    #[test]
    fn spring_forward_gap_is_an_error() {
        let c: ZoneCode = "C".parse().unwrap();
        // 2024-03-10 02:30 does not exist in America/Chicago
        let r = c.to_utc(naive("2024-03-10 02:30:00"), TimeMode::Modern);
        assert!(matches!(r, Err(TimeError::NonexistentLocal(_, _))));
    }

    #[test]
    fn fall_back_overlap_is_an_error() {
        let c: ZoneCode = "C".parse().unwrap();
        // 2024-11-03 01:30 occurs twice in America/Chicago
        let r = c.to_utc(naive("2024-11-03 01:30:00"), TimeMode::Modern);
        assert!(matches!(r, Err(TimeError::AmbiguousLocal(_, _))));
    }

    #[test]
    fn legacy_mode_is_gapless() {
        let c: ZoneCode = "C".parse().unwrap();
        // the same instant that modern mode rejects resolves on the fixed table
        let r = c.to_utc(naive("2024-03-10 02:30:00"), TimeMode::Legacy).unwrap();
        assert_eq!(r, utc("2024-03-10 07:30:00"));
    }

    #[test]
    fn legacy_yukon_stays_on_utc_minus_nine() {
        let y: ZoneCode = "Y".parse().unwrap();
        let t = naive("2024-07-01 12:00:00");
        assert_eq!(y.to_utc(t, TimeMode::Legacy).unwrap(), utc("2024-07-01 21:00:00"));
    }

    #[test]
    fn us_dst_rule_boundaries() {
        // 2024: second Sunday in March is the 10th, first Sunday in November the 3rd
        assert!(!us_dst_in_effect(naive("2024-03-10 01:59:59")));
        assert!(us_dst_in_effect(naive("2024-03-10 02:00:00")));
        assert!(us_dst_in_effect(naive("2024-11-03 01:59:59")));
        assert!(!us_dst_in_effect(naive("2024-11-03 02:00:00")));
        // 1995: first Sunday in April is the 2nd, last Sunday in October the 29th
        assert!(!us_dst_in_effect(naive("1995-04-02 01:00:00")));
        assert!(us_dst_in_effect(naive("1995-04-02 03:00:00")));
        assert!(!us_dst_in_effect(naive("1995-10-29 03:00:00")));
    }

    #[test]
    fn century_rule() {
        assert_eq!(century_year(0), 2000);
        assert_eq!(century_year(69), 2069);
        assert_eq!(century_year(70), 1970);
        assert_eq!(century_year(99), 1999);
    }

    #[test]
    fn relative_month_clamps() {
        let t = naive("2025-01-31 12:00:00");
        let got = apply_relative(t, RelativeUnit::Months, 1).unwrap();
        assert_eq!(got, naive("2025-02-28 12:00:00"));

        let leap = naive("2024-01-31 12:00:00");
        let got = apply_relative(leap, RelativeUnit::Months, 1).unwrap();
        assert_eq!(got, naive("2024-02-29 12:00:00"));
    }

    #[test]
    fn relative_end_of_month() {
        let t = naive("2025-03-15 06:00:00");
        let got = apply_relative(t, RelativeUnit::EndOfMonth, -1).unwrap();
        assert_eq!(got, naive("2025-02-28 06:00:00"));
        let got = apply_relative(t, RelativeUnit::EndOfMonth, 0).unwrap();
        assert_eq!(got, naive("2025-03-31 06:00:00"));
    }

    #[test]
    fn relative_negative_hours() {
        let t = naive("2025-03-01 02:00:00");
        let got = apply_relative(t, RelativeUnit::Hours, -3).unwrap();
        assert_eq!(got, naive("2025-02-28 23:00:00"));
    }
}
