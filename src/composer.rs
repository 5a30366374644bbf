//! Synthesis of SHEF text from decoded value streams: the mirror of the
//! decoder, used by exporters that pull time series back out of a store.
//!
//! Runs of values sharing a location and parameter are examined for uniform
//! spacing: three or more samples at one interval become a single `.E`
//! message with the values split across continuation lines; anything else is
//! re-emitted as `.A` messages, with consecutive values that share an
//! instant folded into one multi-parameter message.

use chrono::TimeDelta;
use itertools::Itertools;

use crate::registry::ParamRegistry;
use crate::shef_time::TimeMode;
use crate::value::ShefValue;

const VALUES_PER_LINE: usize = 12;

pub fn compose(values: &[ShefValue], registry: &ParamRegistry, mode: TimeMode) -> String {
    let mut out = String::new();
    let mut pending: Vec<&ShefValue> = Vec::new();

    for (_, group) in &values
        .iter()
        .group_by(|v| (v.location.clone(), v.parameter_code.clone(), v.duration_code))
    {
        let run = group.collect_vec();
        if let Some(interval) = uniform_interval(&run) {
            flush_a(&mut out, &mut pending, registry, mode);
            out.push_str(&e_message(&run, interval, registry, mode));
        } else {
            for v in run {
                let breaks = pending
                    .last()
                    .map(|p| {
                        p.location != v.location || p.obs_time != v.obs_time || p.zone != v.zone
                    })
                    .unwrap_or(false);
                if breaks {
                    flush_a(&mut out, &mut pending, registry, mode);
                }
                pending.push(v);
            }
        }
    }
    flush_a(&mut out, &mut pending, registry, mode);
    out
}

fn flush_a(
    out: &mut String,
    pending: &mut Vec<&ShefValue>,
    registry: &ParamRegistry,
    mode: TimeMode,
) {
    if !pending.is_empty() {
        out.push_str(&a_message(pending, registry, mode));
        pending.clear();
    }
}

/// Three or more samples at one positive spacing make a regular series.
fn uniform_interval(run: &[&ShefValue]) -> Option<TimeDelta> {
    if run.len() < 3 {
        return None;
    }
    let step = run[1].obs_time - run[0].obs_time;
    if step <= TimeDelta::zero() {
        return None;
    }
    run.windows(2)
        .all(|w| w[1].obs_time - w[0].obs_time == step)
        .then_some(step)
}

/// Shortest parameter token that decodes back to the same code: trailing
/// default positions (probability `Z`, extremum `Z`, type/source `RZ`, then
/// the element's default duration) are dropped from the right.
fn param_token(v: &ShefValue, registry: &ParamRegistry) -> String {
    let default_duration = registry
        .lookup_pe(v.pe())
        .map(|e| e.default_duration)
        .unwrap_or('I');

    let mut token = format!(
        "{}{}{}{}{}",
        v.pe(),
        v.duration_code,
        v.type_source(),
        v.extremum(),
        v.probability_code()
    );
    if token.ends_with('Z') {
        token.pop();
        if token.ends_with('Z') {
            token.pop();
            if token.ends_with("RZ") {
                token.truncate(token.len() - 2);
                if token.ends_with(default_duration) {
                    token.pop();
                }
            }
        }
    }
    token
}

fn value_token(v: &ShefValue) -> String {
    let mut token = if v.is_missing() {
        "M".to_string()
    } else if v.trace {
        "T".to_string()
    } else {
        format!("{:.2}", v.value)
    };
    if v.qualifier != 'Z' && !v.is_missing() && !v.trace {
        token.push(v.qualifier);
    }
    token
}

fn header_prefix(kind: char, first: &ShefValue, mode: TimeMode) -> String {
    let local = first.zone.from_utc(first.obs_time, mode);
    let clock = if local.format("%S").to_string() == "00" {
        local.format("%H%M").to_string()
    } else {
        local.format("%H%M%S").to_string()
    };
    let mut header = format!(
        ".{kind}{} {} {} {} DH{clock}",
        if first.revised { "R" } else { "" },
        first.location,
        local.format("%Y%m%d"),
        first.zone
    );
    if let Some(created) = first.creation_time {
        let created_local = first.zone.from_utc(created, mode);
        header.push_str(&format!("/DC{}", created_local.format("%Y%m%d%H%M")));
    }
    header
}

fn interval_token(interval: TimeDelta) -> String {
    let minutes = interval.num_minutes();
    if minutes % 1440 == 0 {
        format!("DID{:02}", minutes / 1440)
    } else if minutes % 60 == 0 {
        format!("DIH{:02}", minutes / 60)
    } else {
        format!("DIN{:02}", minutes)
    }
}

fn e_message(
    run: &[&ShefValue],
    interval: TimeDelta,
    registry: &ParamRegistry,
    mode: TimeMode,
) -> String {
    let first = run[0];
    let mut out = header_prefix('E', first, mode);
    out.push('/');
    out.push_str(&param_token(first, registry));
    out.push('/');
    out.push_str(&interval_token(interval));

    let mut continuation = 0usize;
    for (i, chunk) in run.chunks(VALUES_PER_LINE).enumerate() {
        if i > 0 {
            continuation += 1;
            out.push('\n');
            out.push_str(&format!(
                ".E{}{continuation} ",
                if first.revised { "R" } else { "" }
            ));
        }
        let mut prev_comment = "";
        for (j, v) in chunk.iter().enumerate() {
            if i > 0 && j == 0 {
                // continuation lines begin directly with a value
            } else {
                out.push('/');
            }
            out.push_str(&value_token(v));
            if !v.comment.is_empty() && v.comment != prev_comment {
                out.push_str(&format!("\"{}\"", v.comment));
            }
            prev_comment = &v.comment;
        }
    }
    out.push('\n');
    out
}

fn a_message(group: &[&ShefValue], registry: &ParamRegistry, mode: TimeMode) -> String {
    let first = group[0];
    let mut out = header_prefix('A', first, mode);
    let mut prev_comment = "";
    for v in group {
        out.push('/');
        out.push_str(&param_token(v, registry));
        out.push(' ');
        out.push_str(&value_token(v));
        if !v.comment.is_empty() && v.comment != prev_comment {
            out.push_str(&format!("\"{}\"", v.comment));
        }
        prev_comment = &v.comment;
    }
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{DecodeOptions, Decoder};
    use crate::tokenizer::Tokenizer;
    use chrono::NaiveDate;

    fn decode(input: &str) -> Vec<ShefValue> {
        let registry = ParamRegistry::default();
        let opts = DecodeOptions {
            strict: false,
            time_mode: TimeMode::Modern,
            today: NaiveDate::from_ymd_opt(2025, 11, 7).unwrap(),
        };
        let mut decoder = Decoder::new(&registry, opts);
        let mut values = Vec::new();
        for rec in Tokenizer::new(input.as_bytes()) {
            values.extend(decoder.decode_message(&rec.unwrap()).values);
        }
        values
    }

    #[test]
    fn regular_series_becomes_one_e_message() {
        let values = decode(
            ".E KEYO2 20251107 Z DH1400/HT/DIH01/637.74/637.73/638.00/638.01\n",
        );
        let registry = ParamRegistry::default();
        let text = compose(&values, &registry, TimeMode::Modern);
        assert_eq!(
            text,
            ".E KEYO2 20251107 Z DH1400/HT/DIH01/637.74/637.73/638.00/638.01\n"
        );
    }

    #[test]
    fn composed_series_decodes_back() {
        let original = decode(
            ".E KEYO2 20251107 Z DH1400/HT/DIH01/637.74/637.73/638.00/638.01\n",
        );
        let registry = ParamRegistry::default();
        let text = compose(&original, &registry, TimeMode::Modern);
        let reparsed = decode(&text);
        assert_eq!(reparsed.len(), original.len());
        for (a, b) in reparsed.iter().zip(&original) {
            assert_eq!(a.obs_time, b.obs_time);
            assert_eq!(a.parameter_code, b.parameter_code);
            assert!((a.value - b.value).abs() < 1e-9);
        }
    }

    #[test]
    fn long_series_splits_into_continuations() {
        let values = decode(
            ".E KEYO2 20251107 Z DH0000/HT/DIH01/1/2/3/4/5/6/7/8/9/10/11/12\n.E1 13/14/15\n",
        );
        assert_eq!(values.len(), 15);
        let registry = ParamRegistry::default();
        let text = compose(&values, &registry, TimeMode::Modern);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with(".E1 "));
        let reparsed = decode(&text);
        assert_eq!(reparsed.len(), 15);
        assert_eq!(reparsed[14].obs_time, values[14].obs_time);
    }

    #[test]
    fn missing_values_hold_their_slots() {
        let values = decode(".E KEYO2 20251107 Z DH1400/HT/DIH01/1.00/M/3.00\n");
        let registry = ParamRegistry::default();
        let text = compose(&values, &registry, TimeMode::Modern);
        assert!(text.contains("/1.00/M/3.00"));
        let reparsed = decode(&text);
        assert!(reparsed[1].is_missing());
        assert_eq!(reparsed[2].obs_time, values[2].obs_time);
    }

    #[test]
    fn irregular_values_fold_into_a_messages() {
        let values = decode(
            ".A TNSO2 20240630 Z DH0630/PC 1.25/TA 78.50\n.A TNSO2 20240630 Z DH0930/TA 81.25\n",
        );
        assert_eq!(values.len(), 3);
        let registry = ParamRegistry::default();
        let text = compose(&values, &registry, TimeMode::Modern);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], ".A TNSO2 20240630 Z DH0630/PC 1.25/TA 78.50");
        assert_eq!(lines[1], ".A TNSO2 20240630 Z DH0930/TA 81.25");
    }

    #[test]
    fn non_default_zone_renders_local_clock() {
        let values = decode(".A OKCO2 20250101 CS DH06/HG 5.25\n");
        let registry = ParamRegistry::default();
        let text = compose(&values, &registry, TimeMode::Modern);
        assert_eq!(text, ".A OKCO2 20250101 CS DH0600/HG 5.25\n");
        let reparsed = decode(&text);
        assert_eq!(reparsed[0].obs_time, values[0].obs_time);
    }
}
