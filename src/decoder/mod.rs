//! Message records to observations: header parsing, inherited-default
//! resolution, positional body walking and `.E` series expansion.
//!
//! The decoder is a state machine over one [`Context`] bag per message. Body
//! fields are processed strictly in document order, so an in-line `D*`
//! override can never reach back and change a value that was already
//! emitted. Two recovery modes exist: permissive (default) skips a bad token
//! to the next `/` and keeps mining the rest of the message; strict throws
//! the whole message away on the first problem.

mod context;
mod param;

use chrono::{NaiveDate, NaiveDateTime, Utc};

use crate::error::{Diagnostic, ShefError};
use crate::registry::ParamRegistry;
use crate::shef_time::{self, TimeMode};
use crate::tokenizer::{MessageKind, MessageRecord, RecordLine};
use crate::value::{ShefValue, UnitSystem, MISSING_VALUE, TRACE_VALUE};

use context::{apply_d_field, is_d_field, is_location, parse_header, Context};
use param::{parse_param_code, parse_value_token, ParamCode, RawValue};

#[derive(Debug, Clone)]
pub struct DecodeOptions {
    /// Reject the whole message on the first recoverable error.
    pub strict: bool,
    pub time_mode: TimeMode,
    /// Calendar anchor for month/day-only observation dates. Taken as an
    /// explicit input so decoding is a pure function of its arguments.
    pub today: NaiveDate,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        DecodeOptions {
            strict: false,
            time_mode: TimeMode::Modern,
            today: Utc::now().date_naive(),
        }
    }
}

/// Everything one message produced.
#[derive(Debug, Default)]
pub struct DecodeOutcome {
    pub values: Vec<ShefValue>,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Default)]
struct Sink {
    values: Vec<ShefValue>,
    diagnostics: Vec<Diagnostic>,
    last_series: Option<(String, String, char)>,
    aborted: bool,
}

impl Sink {
    fn into_outcome(self, strict: bool) -> DecodeOutcome {
        DecodeOutcome {
            values: if strict && self.aborted {
                Vec::new()
            } else {
                self.values
            },
            diagnostics: self.diagnostics,
        }
    }
}

/// Decodes message records against a shared registry, tracking the
/// cumulative recoverable-error count of the run.
pub struct Decoder<'r> {
    registry: &'r ParamRegistry,
    options: DecodeOptions,
    error_count: u32,
}

impl<'r> Decoder<'r> {
    pub fn new(registry: &'r ParamRegistry, options: DecodeOptions) -> Self {
        Decoder {
            registry,
            options,
            error_count: 0,
        }
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    /// True once the run has burned through the registry's error budget;
    /// callers should flush what they have and stop feeding records.
    pub fn budget_exhausted(&self) -> bool {
        self.error_count >= self.registry.max_errors()
    }

    pub fn decode_message(&mut self, rec: &MessageRecord) -> DecodeOutcome {
        match rec.kind {
            MessageKind::Unrecognized => {
                let why = rec.note.as_deref().unwrap_or("matches no message rule");
                log::warn!(
                    "line {}: dropping unrecognized input ({why}): {}",
                    rec.start_line,
                    rec.lines.first().map(|l| l.text.as_str()).unwrap_or("")
                );
                DecodeOutcome::default()
            }
            MessageKind::A => self.decode_a(rec),
            MessageKind::E => self.decode_e(rec),
            MessageKind::B => self.decode_b(rec),
        }
    }

    fn report(&mut self, sink: &mut Sink, error: ShefError, pe: Option<&str>) {
        let diag = match pe {
            Some(pe) => Diagnostic::with_pe(error, pe),
            None => Diagnostic::new(error),
        };
        log::warn!("{diag}");
        if diag.error.is_recoverable() {
            self.error_count += 1;
        }
        sink.diagnostics.push(diag);
        if self.options.strict {
            sink.aborted = true;
        }
    }

    fn header(&mut self, sink: &mut Sink, line: &RecordLine) -> Option<(Context, String)> {
        match parse_header(
            &line.text,
            line.number,
            self.registry,
            self.options.time_mode,
            self.options.today,
        ) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                self.report(sink, e, None);
                None
            }
        }
    }

    fn decode_a(&mut self, rec: &MessageRecord) -> DecodeOutcome {
        let mut sink = Sink::default();
        let Some((mut ctx, rest)) = self.header(&mut sink, &rec.lines[0]) else {
            return sink.into_outcome(self.options.strict);
        };

        'message: for (line_no, segment) in body_segments(rec, &rest) {
            for field in split_fields(&segment) {
                if sink.aborted {
                    break 'message;
                }
                let (body, comment) = take_comment(&field);
                if let Some(c) = comment {
                    ctx.comment = c;
                }
                if body.is_empty() {
                    continue;
                }
                if is_d_field(&body) {
                    if let Err(e) =
                        apply_d_field(&mut ctx, &body, line_no, self.registry, self.options.time_mode)
                    {
                        self.report(&mut sink, e, None);
                    }
                    continue;
                }

                let mut tokens = body.split_whitespace();
                let param_tok = tokens.next().unwrap_or("");
                let value_tok = tokens.next().unwrap_or("");
                if value_tok.is_empty() || tokens.next().is_some() {
                    self.report(
                        &mut sink,
                        ShefError::Syntax {
                            line: line_no,
                            text: body.clone(),
                        },
                        None,
                    );
                    continue;
                }

                let code = match parse_param_code(param_tok, self.registry, line_no) {
                    Ok(code) => code,
                    Err(e) => {
                        self.report(&mut sink, e, Some(param_tok));
                        continue;
                    }
                };
                ctx.param = Some(code);

                match parse_value_token(value_tok, line_no) {
                    Ok((raw, qual)) => {
                        if let Err(e) = self.emit(&mut sink, &ctx, rec.revised, raw, qual, line_no)
                        {
                            self.report(&mut sink, e, Some(param_tok));
                        }
                    }
                    Err(e) => self.report(&mut sink, e, Some(param_tok)),
                }
            }
        }

        sink.into_outcome(self.options.strict)
    }

    fn decode_e(&mut self, rec: &MessageRecord) -> DecodeOutcome {
        let mut sink = Sink::default();
        let Some((mut ctx, rest)) = self.header(&mut sink, &rec.lines[0]) else {
            return sink.into_outcome(self.options.strict);
        };

        // running wall clock of the series; None until the first value slot
        let mut current: Option<NaiveDateTime> = None;

        'message: for (line_no, segment) in body_segments(rec, &rest) {
            for field in split_fields(&segment) {
                if sink.aborted {
                    break 'message;
                }
                let (body, comment) = take_comment(&field);
                if let Some(c) = comment {
                    ctx.comment = c;
                }

                if !body.is_empty() && is_d_field(&body) {
                    if let Err(e) =
                        apply_d_field(&mut ctx, &body, line_no, self.registry, self.options.time_mode)
                    {
                        self.report(&mut sink, e, None);
                    }
                    continue;
                }
                if looks_like_param(&body) {
                    match parse_param_code(&body, self.registry, line_no) {
                        Ok(code) => ctx.param = Some(code),
                        Err(e) => self.report(&mut sink, e, Some(&body)),
                    }
                    continue;
                }

                // a value slot: consumes one interval step even when empty,
                // null or malformed, so later values keep their positions
                let slot = match next_slot(&mut current, &ctx, line_no) {
                    Ok(slot) => slot,
                    Err(e) => {
                        self.report(&mut sink, e, ctx.param.as_ref().map(|p| p.pe.as_str()));
                        continue;
                    }
                };
                if body.is_empty() {
                    continue;
                }
                match parse_value_token(&body, line_no) {
                    Ok((raw, qual)) => {
                        let mut slot_ctx = ctx.clone();
                        slot_ctx.set_local_obs_time(slot);
                        if let Err(e) =
                            self.emit(&mut sink, &slot_ctx, rec.revised, raw, qual, line_no)
                        {
                            self.report(&mut sink, e, slot_ctx.param.as_ref().map(|p| p.pe.as_str()));
                        }
                    }
                    Err(e) => {
                        self.report(&mut sink, e, ctx.param.as_ref().map(|p| p.pe.as_str()))
                    }
                }
            }
        }

        sink.into_outcome(self.options.strict)
    }

    fn decode_b(&mut self, rec: &MessageRecord) -> DecodeOutcome {
        let mut sink = Sink::default();
        let Some((ctx, rest)) = self.header(&mut sink, &rec.lines[0]) else {
            return sink.into_outcome(self.options.strict);
        };

        let columns = self.parse_b_columns(&mut sink, rec, &rest);
        if sink.aborted {
            return sink.into_outcome(self.options.strict);
        }

        'message: for row in rec.lines.iter().skip(1).filter(|l| !l.continuation) {
            if sink.aborted {
                break 'message;
            }
            self.decode_b_row(&mut sink, &ctx, &columns, row, rec.revised);
        }

        sink.into_outcome(self.options.strict)
    }

    /// Walk the `.B` header fields into the declared column list. A column
    /// whose parameter code does not parse is reported once and kept as a
    /// dead slot so row values stay aligned.
    fn parse_b_columns(
        &mut self,
        sink: &mut Sink,
        rec: &MessageRecord,
        rest: &str,
    ) -> Vec<BColumn> {
        let mut columns = Vec::new();
        let mut pending: Vec<(usize, String)> = Vec::new();

        let header_lines = rec.lines.iter().skip(1).filter(|l| l.continuation);
        let segments = std::iter::once((rec.lines[0].number, rest.to_string()))
            .chain(header_lines.map(|l| (l.number, l.text.clone())));

        for (line_no, segment) in segments {
            for field in split_fields(&segment) {
                let field = field.trim().to_string();
                if field.is_empty() {
                    continue;
                }
                if is_d_field(&field) {
                    pending.push((line_no, field));
                    continue;
                }
                let param = match parse_param_code(&field, self.registry, line_no) {
                    Ok(code) => Some(code),
                    Err(e) => {
                        self.report(sink, e, Some(&field));
                        None
                    }
                };
                columns.push(BColumn {
                    d_fields: std::mem::take(&mut pending),
                    param,
                });
            }
        }

        if columns.is_empty() {
            self.report(
                sink,
                ShefError::Context {
                    line: rec.start_line,
                    what: "a .B header must declare at least one parameter column".to_string(),
                },
                None,
            );
        }
        columns
    }

    fn decode_b_row(
        &mut self,
        sink: &mut Sink,
        message_ctx: &Context,
        columns: &[BColumn],
        row: &RecordLine,
        revised: bool,
    ) {
        let line_no = row.number;
        let mut ctx = message_ctx.clone();

        let mut fields = split_fields(&row.text);
        if fields.is_empty() {
            return;
        }

        // the leading field may carry the location and row-level D overrides
        // ahead of the first value
        let (first_body, first_comment) = take_comment(&fields[0]);
        if let Some(c) = first_comment {
            ctx.comment = c;
        }
        let mut head_tokens = first_body.split_whitespace().peekable();
        if let Some(tok) = head_tokens.peek() {
            if is_location(tok) && !is_d_field(tok) {
                ctx.location = tok.to_uppercase();
                head_tokens.next();
            }
        }
        let mut leftover = Vec::new();
        for tok in head_tokens {
            if leftover.is_empty() && is_d_field(tok) {
                if let Err(e) =
                    apply_d_field(&mut ctx, tok, line_no, self.registry, self.options.time_mode)
                {
                    self.report(sink, e, None);
                }
            } else {
                leftover.push(tok.to_string());
            }
        }
        fields[0] = leftover.join(" ");
        if fields[0].is_empty() {
            fields.remove(0);
        }

        let mut col_idx = 0usize;
        for field in fields {
            if sink.aborted {
                return;
            }
            let (body, comment) = take_comment(&field);
            if let Some(c) = comment {
                ctx.comment = c;
            }
            if !body.is_empty() && is_d_field(&body) {
                if let Err(e) =
                    apply_d_field(&mut ctx, &body, line_no, self.registry, self.options.time_mode)
                {
                    self.report(sink, e, None);
                }
                continue;
            }

            let Some(column) = columns.get(col_idx) else {
                self.report(
                    sink,
                    ShefError::Syntax {
                        line: line_no,
                        text: format!("value '{body}' beyond the {} declared columns", columns.len()),
                    },
                    None,
                );
                break;
            };
            col_idx += 1;

            // column defaults apply even when the slot turns out to be
            // empty, since they also cover the columns after this one
            for (d_line, d_field) in &column.d_fields {
                if let Err(e) =
                    apply_d_field(&mut ctx, d_field, *d_line, self.registry, self.options.time_mode)
                {
                    self.report(sink, e, None);
                }
            }
            if body.is_empty() {
                continue;
            }
            let Some(code) = column.param.clone() else {
                continue; // dead column, slot consumed
            };
            let pe = code.pe.clone();
            ctx.param = Some(code);

            match parse_value_token(&body, line_no) {
                Ok((raw, qual)) => {
                    if let Err(e) = self.emit(sink, &ctx, revised, raw, qual, line_no) {
                        self.report(sink, e, Some(&pe));
                    }
                }
                Err(e) => self.report(sink, e, Some(&pe)),
            }
        }

        if col_idx < columns.len() && !sink.aborted {
            self.report(
                sink,
                ShefError::Syntax {
                    line: line_no,
                    text: format!(
                        "row supplies {col_idx} of {} declared columns",
                        columns.len()
                    ),
                },
                None,
            );
        }
    }

    /// Build and record one observation from the current context.
    fn emit(
        &self,
        sink: &mut Sink,
        ctx: &Context,
        revised: bool,
        raw: RawValue,
        qualifier_override: Option<char>,
        line: usize,
    ) -> Result<(), ShefError> {
        let param = ctx.param.as_ref().ok_or_else(|| ShefError::Context {
            line,
            what: "no parameter code in scope for this value".to_string(),
        })?;

        let (value, trace) = match raw {
            RawValue::Null => return Ok(()),
            RawValue::Missing => (MISSING_VALUE, false),
            RawValue::Trace => (TRACE_VALUE, true),
            RawValue::Number(v) => (self.convert_units(v, param, ctx.units, line)?, false),
        };

        let local = ctx.local_obs_time(line)?;
        let obs_time = ctx
            .zone
            .to_utc(local, self.options.time_mode)
            .map_err(|e| ShefError::Time {
                line,
                reason: e.to_string(),
            })?;
        let creation_time = match ctx.creation {
            Some(c) => Some(ctx.zone.to_utc(c, self.options.time_mode).map_err(|e| {
                ShefError::Time {
                    line,
                    reason: e.to_string(),
                }
            })?),
            None => None,
        };

        let qualifier = match qualifier_override {
            Some(q) => {
                if !self.registry.lookup_qualifier(q) {
                    return Err(ShefError::RegistryMiss {
                        line,
                        table: "qualifier",
                        code: q.to_string(),
                    });
                }
                q
            }
            None => ctx.qualifier,
        };

        let duration_value = match ctx.variable_duration {
            Some(minutes) => minutes,
            None => self
                .registry
                .lookup_duration_code(param.duration)
                .unwrap_or(-1),
        };
        let probability = self
            .registry
            .lookup_probability(param.probability)
            .unwrap_or(-1.0);

        let parameter_code = param.value_code();
        let key = (ctx.location.clone(), parameter_code.clone(), qualifier);
        let time_series_code = if sink.last_series.as_ref() == Some(&key) {
            2
        } else {
            1
        };
        sink.last_series = Some(key);

        sink.values.push(ShefValue {
            location: ctx.location.clone(),
            obs_time,
            creation_time,
            parameter_code,
            duration_code: param.duration,
            duration_value,
            value,
            qualifier,
            probability,
            revised,
            trace,
            units: ctx.units,
            zone: ctx.zone,
            comment: ctx.comment.clone(),
            time_series_code,
        });
        Ok(())
    }

    fn convert_units(
        &self,
        v: f64,
        param: &ParamCode,
        units: UnitSystem,
        line: usize,
    ) -> Result<f64, ShefError> {
        let entry = self
            .registry
            .lookup_pe(&param.pe)
            .ok_or_else(|| ShefError::RegistryMiss {
                line,
                table: "physical element",
                code: param.pe.clone(),
            })?;
        Ok(match units {
            UnitSystem::English => v * entry.english_factor,
            UnitSystem::Metric => {
                let scaled = v * entry.metric_factor;
                // temperatures need the affine step on top of the factor
                if entry.base_unit == "F" {
                    scaled + 32.0
                } else {
                    scaled
                }
            }
        })
    }
}

struct BColumn {
    d_fields: Vec<(usize, String)>,
    param: Option<ParamCode>,
}

/// The body of an `.A`/`.E` message: the header line's remainder after its
/// positional fields, then each continuation line.
fn body_segments(rec: &MessageRecord, header_rest: &str) -> Vec<(usize, String)> {
    let mut segments = vec![(rec.lines[0].number, header_rest.to_string())];
    for line in rec.lines.iter().skip(1) {
        segments.push((line.number, line.text.clone()));
    }
    segments
}

/// Split on `/` outside retained-comment quotes. A single trailing separator
/// is a formatting artifact, not a null slot.
fn split_fields(text: &str) -> Vec<String> {
    let mut fields = vec![String::new()];
    let mut in_quotes = false;
    for c in text.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                fields.last_mut().expect("fields never empty").push(c);
            }
            '/' if !in_quotes => fields.push(String::new()),
            _ => fields.last_mut().expect("fields never empty").push(c),
        }
    }
    if fields.last().map(|f| f.trim().is_empty()).unwrap_or(false) {
        fields.pop();
    }
    fields.into_iter().map(|f| f.trim().to_string()).collect()
}

/// Pull the first double-quoted run out of a field. Returns the field text
/// without the quoted part, and the retained comment if one was present.
/// An unclosed quote runs to the end of the field.
fn take_comment(field: &str) -> (String, Option<String>) {
    let Some(start) = field.find('"') else {
        return (field.trim().to_string(), None);
    };
    let after = &field[start + 1..];
    let end = after.find('"').map(|i| start + 1 + i).unwrap_or(field.len());
    let comment = field[start + 1..end].to_string();
    let mut rest = field[..start].to_string();
    if end + 1 < field.len() {
        rest.push_str(&field[end + 1..]);
    }
    (rest.trim().to_string(), Some(comment))
}

/// In an `.E` body a bare alphabetic token (that is not a value sentinel)
/// names the series parameter.
fn looks_like_param(body: &str) -> bool {
    if body.len() < 2 || body.contains(' ') {
        return false;
    }
    let upper = body.to_uppercase();
    if matches!(upper.as_str(), "MSG") {
        return false;
    }
    upper
        .chars()
        .next()
        .map(|c| c.is_ascii_alphabetic())
        .unwrap_or(false)
        && upper.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Advance the `.E` running clock by one slot: the first slot sits at the
/// header time, later slots step by the interval in scope.
fn next_slot(
    current: &mut Option<NaiveDateTime>,
    ctx: &Context,
    line: usize,
) -> Result<NaiveDateTime, ShefError> {
    let t = match *current {
        None => ctx.local_obs_time_base(line)?,
        Some(prev) => {
            let (unit, amount) = ctx.interval.ok_or_else(|| ShefError::Context {
                line,
                what: "series interval (DI) for an .E value list".to_string(),
            })?;
            shef_time::apply_relative(prev, unit, amount).map_err(|e| ShefError::Time {
                line,
                reason: e.to_string(),
            })?
        }
    };
    *current = Some(t);
    Ok(t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::Tokenizer;

    fn options() -> DecodeOptions {
        DecodeOptions {
            strict: false,
            time_mode: TimeMode::Modern,
            today: NaiveDate::from_ymd_opt(2025, 11, 7).unwrap(),
        }
    }

    fn decode_with(input: &str, opts: DecodeOptions) -> (Vec<ShefValue>, Vec<Diagnostic>) {
        let registry = ParamRegistry::default();
        let mut decoder = Decoder::new(&registry, opts);
        let mut values = Vec::new();
        let mut diags = Vec::new();
        for rec in Tokenizer::new(input.as_bytes()) {
            let outcome = decoder.decode_message(&rec.unwrap());
            values.extend(outcome.values);
            diags.extend(outcome.diagnostics);
        }
        (values, diags)
    }

    fn decode(input: &str) -> (Vec<ShefValue>, Vec<Diagnostic>) {
        decode_with(input, options())
    }

    fn utc(s: &str) -> chrono::DateTime<Utc> {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
            .unwrap()
            .and_utc()
    }

    #[test]
    fn simple_e_series() {
        let (values, diags) = decode(".E KEYO2 20251107 Z DH1400/HT/DIH01/637.74/637.73\n");
        assert!(diags.is_empty());
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].location, "KEYO2");
        assert_eq!(values[0].obs_time, utc("2025-11-07 14:00:00"));
        assert_eq!(values[0].parameter_code, "HTRZZZ");
        assert_eq!(values[0].duration_code, 'I');
        assert_eq!(values[0].value, 637.74);
        assert_eq!(values[0].time_series_code, 1);
        assert_eq!(values[1].obs_time, utc("2025-11-07 15:00:00"));
        assert_eq!(values[1].value, 637.73);
        assert_eq!(values[1].time_series_code, 2);
    }

    #[test]
    fn e_series_continuation_stays_monotonic() {
        let input = "\
.E KEYO2 20251107 Z DH1400/HT/DIH01/637.74/637.73
.E01 638.00/638.01
";
        let (values, diags) = decode(input);
        assert!(diags.is_empty());
        assert_eq!(values.len(), 4);
        for (i, v) in values.iter().enumerate() {
            assert_eq!(
                v.obs_time,
                utc("2025-11-07 14:00:00") + chrono::TimeDelta::hours(i as i64)
            );
        }
    }

    #[test]
    fn a_message_with_retained_comment() {
        let (values, diags) = decode(".A TNSO2 20240630 DH0000/PC 0.00\"15:OKMN\"/TA 78.5\n");
        assert!(diags.is_empty());
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].obs_time, utc("2024-06-30 00:00:00"));
        assert_eq!(values[1].obs_time, utc("2024-06-30 00:00:00"));
        assert_eq!(values[0].pe(), "PC");
        assert_eq!(values[0].comment, "15:OKMN");
        // retained comments persist until replaced
        assert_eq!(values[1].comment, "15:OKMN");
        assert_eq!(values[1].pe(), "TA");
        assert_eq!(values[1].value, 78.5);
    }

    #[test]
    fn missing_sentinel() {
        let (values, diags) = decode(".A ABCD1 20250101 Z DH12/PC M\n");
        assert!(diags.is_empty());
        assert_eq!(values.len(), 1);
        assert!(values[0].is_missing());
        assert_eq!(values[0].value, MISSING_VALUE);
    }

    #[test]
    fn permissive_recovery_keeps_good_fields() {
        let (values, diags) = decode(".A OKCO2 20250101 Z DH12/HG 5.0/XX bad/TA 72/\n");
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].pe(), "HG");
        assert_eq!(values[1].pe(), "TA");
        assert_eq!(diags.len(), 1);
        assert!(matches!(
            diags[0].error,
            ShefError::RegistryMiss {
                table: "physical element",
                ..
            }
        ));
    }

    #[test]
    fn strict_mode_rejects_whole_message() {
        let mut opts = options();
        opts.strict = true;
        let (values, diags) =
            decode_with(".A OKCO2 20250101 Z DH12/HG 5.0/XX bad/TA 72/\n", opts);
        assert!(values.is_empty());
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn inline_override_never_reaches_back() {
        let (values, diags) = decode(".A OKCO2 20250101 Z DH12/TA 70/DQG/TA 71\n");
        assert!(diags.is_empty());
        assert_eq!(values[0].qualifier, 'Z');
        assert_eq!(values[1].qualifier, 'G');
        // same series until the qualifier changed it
        assert_eq!(values[0].time_series_code, 1);
        assert_eq!(values[1].time_series_code, 1);
    }

    #[test]
    fn trace_null_and_qualified_values() {
        let (values, diags) = decode(".A OKCO2 20250101 Z DH12/PC T/HG +/TA 71.5E\n");
        assert!(diags.is_empty());
        // the null `+` suppresses the HG value entirely
        assert_eq!(values.len(), 2);
        assert!(values[0].trace);
        assert_eq!(values[0].value, TRACE_VALUE);
        assert_eq!(values[1].qualifier, 'E');
    }

    #[test]
    fn metric_conversion_applies_factor_and_temperature_offset() {
        let (values, diags) = decode(".A OKCO2 20250101 Z DH12/DUS/TA 25.0/HG 2.0\n");
        assert!(diags.is_empty());
        assert!((values[0].value - 77.0).abs() < 1e-9);
        assert!((values[1].value - 6.56168).abs() < 1e-4);
        assert_eq!(values[0].units, UnitSystem::Metric);
    }

    #[test]
    fn e_series_without_interval_reports_context_errors() {
        let (values, diags) = decode(".E KEYO2 20251107 Z DH1400/HT/637.74/637.73\n");
        assert_eq!(values.len(), 1);
        assert!(matches!(diags[0].error, ShefError::Context { .. }));
    }

    #[test]
    fn e_null_slots_keep_spacing() {
        let (values, diags) =
            decode(".E KEYO2 20251107 Z DH1400/HT/DIH01/637.74/+/637.72\n");
        assert!(diags.is_empty());
        assert_eq!(values.len(), 2);
        assert_eq!(values[1].obs_time, utc("2025-11-07 16:00:00"));
    }

    #[test]
    fn b_message_row_major_order() {
        let input = "\
.B STR 20240601 Z DH12/HG/PC
LOC1 1.2/2.3
LOC2 4.5/6.7
.END
";
        let (values, diags) = decode(input);
        assert!(diags.is_empty());
        assert_eq!(values.len(), 4);
        let got: Vec<_> = values
            .iter()
            .map(|v| (v.location.as_str(), v.pe(), v.value))
            .collect();
        assert_eq!(
            got,
            vec![
                ("LOC1", "HG", 1.2),
                ("LOC1", "PC", 2.3),
                ("LOC2", "HG", 4.5),
                ("LOC2", "PC", 6.7),
            ]
        );
        assert!(values.iter().all(|v| v.obs_time == utc("2024-06-01 12:00:00")));
    }

    #[test]
    fn b_row_without_location_inherits_header() {
        let input = "\
.B STR 20240601 Z DH12/HG
7.7
.END
";
        let (values, diags) = decode(input);
        assert!(diags.is_empty());
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].location, "STR");
        assert_eq!(values[0].value, 7.7);
    }

    #[test]
    fn b_short_row_is_reported() {
        let input = "\
.B STR 20240601 Z DH12/HG/PC
LOC1 1.2
.END
";
        let (values, diags) = decode(input);
        assert_eq!(values.len(), 1);
        assert_eq!(diags.len(), 1);
        assert!(matches!(diags[0].error, ShefError::Syntax { .. }));
    }

    #[test]
    fn revised_flag_carries_to_values() {
        let (values, _) = decode(".AR OKCO2 20250101 Z DH12/HG 5.0\n");
        assert!(values[0].revised);
    }

    #[test]
    fn creation_time_converts_with_the_message_zone() {
        let (values, diags) =
            decode(".A OKCO2 20250101 CS DH12/DC202501010800/HG 5.0\n");
        assert!(diags.is_empty());
        // CS is UTC-6: 08:00 local creation is 14:00 UTC
        assert_eq!(values[0].creation_time, Some(utc("2025-01-01 14:00:00")));
        assert_eq!(values[0].obs_time, utc("2025-01-01 18:00:00"));
    }

    #[test]
    fn relative_date_shift() {
        let (values, diags) = decode(".A OKCO2 20250101 Z DH12/DRD-1/HG 5.0\n");
        assert!(diags.is_empty());
        assert_eq!(values[0].obs_time, utc("2024-12-31 12:00:00"));
    }

    #[test]
    fn error_budget_accumulates_across_messages() {
        let registry = ParamRegistry::default();
        let mut decoder = Decoder::new(&registry, options());
        let input = ".A OKCO2 20250101 Z DH12/XX 1/YY 2/QQ 3\n";
        for rec in Tokenizer::new(input.as_bytes()) {
            decoder.decode_message(&rec.unwrap());
        }
        assert_eq!(decoder.error_count(), 3);
        assert!(!decoder.budget_exhausted());
    }

    #[test]
    fn strict_output_is_subset_of_permissive() {
        let input = ".E KEYO2 20251107 Z DH1400/HT/DIH01/637.74/bogus/637.72\n";
        let (permissive, _) = decode(input);
        let mut opts = options();
        opts.strict = true;
        let (strict, _) = decode_with(input, opts);
        assert_eq!(permissive.len(), 2);
        assert!(strict.is_empty());
    }
}
