//! Pipe-delimited positional payload parsing.
//!
//! The in-game bridge packs each event kind into a fixed field order,
//! e.g. a violation is `type|speed|location|violationNumber`. The tables
//! below are that contract. Missing or blank positions fall back to
//! neutral values (numeric `0`, text `"Unknown"`) instead of failing the
//! record; positions beyond the table are ignored.

use drivetrace_events::{EventKind, EventValue, keys};
use std::collections::HashMap;

/// Neutral value for an absent text position.
pub const NEUTRAL_TEXT: &str = "Unknown";

/// How a pipe position parses into a typed field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldParse {
    /// Floating-point number; blank or unparseable becomes `0.0`.
    Float,
    /// Integer; blank or unparseable becomes `0`.
    Integer,
    /// Free text; blank becomes `"Unknown"`.
    Text,
}

/// One position in a pipe-delimited payload.
#[derive(Debug, Clone, Copy)]
pub struct PipeField {
    /// Field key the position maps to.
    pub key: &'static str,
    /// How the position's text parses.
    pub parse: FieldParse,
}

const VIOLATION_TABLE: &[PipeField] = &[
    PipeField { key: keys::TYPE, parse: FieldParse::Text },
    PipeField { key: keys::SPEED, parse: FieldParse::Float },
    PipeField { key: keys::LOCATION, parse: FieldParse::Text },
    PipeField { key: keys::VIOLATION_NUMBER, parse: FieldParse::Integer },
];

const COLLISION_TABLE: &[PipeField] = &[
    PipeField { key: keys::TYPE, parse: FieldParse::Text },
    PipeField { key: keys::OBJECT_HIT, parse: FieldParse::Text },
    PipeField { key: keys::IMPACT_FORCE, parse: FieldParse::Float },
];

const DRIVING_EVENT_TABLE: &[PipeField] = &[
    PipeField { key: keys::TYPE, parse: FieldParse::Text },
    PipeField { key: keys::SPEED, parse: FieldParse::Float },
    PipeField { key: keys::DISTANCE, parse: FieldParse::Float },
    PipeField { key: keys::LOCATION, parse: FieldParse::Text },
];

const PROGRESS_TABLE: &[PipeField] = &[
    PipeField { key: keys::SCORE, parse: FieldParse::Integer },
    PipeField { key: keys::LEVEL, parse: FieldParse::Integer },
];

const PERFORMANCE_TABLE: &[PipeField] = &[
    PipeField { key: keys::FPS, parse: FieldParse::Float },
    PipeField { key: keys::MEMORY_MB, parse: FieldParse::Float },
];

const SESSION_CONTROL_TABLE: &[PipeField] = &[
    PipeField { key: keys::ACTION, parse: FieldParse::Text },
];

/// Positional field table for a kind.
pub fn pipe_table(kind: EventKind) -> &'static [PipeField] {
    match kind {
        EventKind::Violation => VIOLATION_TABLE,
        EventKind::Collision => COLLISION_TABLE,
        EventKind::DrivingEvent => DRIVING_EVENT_TABLE,
        EventKind::Progress => PROGRESS_TABLE,
        EventKind::PerformanceSnapshot => PERFORMANCE_TABLE,
        EventKind::SessionControl => SESSION_CONTROL_TABLE,
    }
}

/// Parse a pipe-delimited payload against the kind's positional table.
///
/// Infallible: every table position produces a field, defaulted when the
/// payload runs short or a position does not parse.
pub fn parse_pipe_payload(kind: EventKind, payload: &str) -> HashMap<String, EventValue> {
    let mut segments = payload.split('|');
    let table = pipe_table(kind);

    let mut fields = HashMap::with_capacity(table.len());
    for spec in table {
        let segment = segments.next().map(str::trim).unwrap_or("");
        fields.insert(spec.key.to_owned(), parse_segment(spec.parse, segment));
    }
    fields
}

fn parse_segment(parse: FieldParse, segment: &str) -> EventValue {
    match parse {
        FieldParse::Float => EventValue::Float(segment.parse::<f64>().unwrap_or(0.0)),
        FieldParse::Integer => EventValue::Integer(parse_integer(segment)),
        FieldParse::Text => {
            if segment.is_empty() {
                EventValue::String(NEUTRAL_TEXT.to_owned())
            } else {
                EventValue::String(segment.to_owned())
            }
        }
    }
}

// Clients occasionally send integers with a decimal point ("3.0").
fn parse_integer(segment: &str) -> i64 {
    if let Ok(value) = segment.parse::<i64>() {
        return value;
    }
    match segment.parse::<f64>() {
        Ok(value) if value.is_finite() => value as i64,
        _ => 0,
    }
}
