//! Wire payload normalization for DriveTrace submissions.
//!
//! Upstream callers submit events in two formats, and both are load-bearing:
//! the in-game bridge sends compact pipe-delimited positional payloads
//! (`"Speeding|75.5|Highway Test|1"`), while the web shell sends JSON
//! objects (`{"type":"Vehicle","objectHit":"Car_A","impactForce":60}`).
//! Normalization converts either into the same [`NormalizedEvent`] so the
//! rest of the pipeline never sees a wire format.
//!
//! Format detection is by first non-whitespace character: `{` means JSON,
//! anything else is treated as pipe-delimited. A payload that opens with
//! `{` but fails to parse as a JSON object is malformed; it is never
//! re-interpreted as pipe data.
//!
//! Normalization is a pure function of its inputs. Timestamps come from
//! the caller (server clock), never from the payload.

#![deny(static_mut_refs)]

use drivetrace_events::{EventKind, NormalizedEvent, UNKNOWN_USER};
use thiserror::Error;

pub mod json;
pub mod pipe;

pub use json::{ParsedPayload, parse_json_payload};
pub use pipe::parse_pipe_payload;

/// A submission as received from a transport, before normalization.
///
/// The transport declares the event kind and may attach ambient session
/// and user context (the game bridge knows which session token it holds).
/// JSON payloads can also carry `sessionId` / `userId` inline; explicit
/// transport context wins over inline keys.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSubmission {
    /// Event kind declared by the transport.
    pub kind: EventKind,
    /// Opaque wire payload, pipe-delimited or JSON.
    pub payload: String,
    /// Session context supplied by the transport.
    pub session_id: Option<String>,
    /// User context supplied by the transport.
    pub user_id: Option<String>,
}

impl RawSubmission {
    /// Create a submission without ambient context.
    pub fn new(kind: EventKind, payload: impl Into<String>) -> Self {
        Self {
            kind,
            payload: payload.into(),
            session_id: None,
            user_id: None,
        }
    }

    /// Attach transport-level session context.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Attach transport-level user context.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// Why a submission could not be normalized.
///
/// These errors are terminal for the submission: retrying the same bytes
/// can never succeed, so the pipeline logs and drops.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    /// The payload could not be parsed in either wire format.
    #[error("malformed payload: {reason}")]
    MalformedPayload {
        /// Parser diagnostic for the log line.
        reason: String,
    },
    /// A field the pipeline cannot proceed without was absent.
    #[error("missing required field: {field}")]
    MissingRequiredField {
        /// Name of the absent field.
        field: &'static str,
    },
}

/// Normalize a raw submission into a canonical event.
///
/// `occurred_at_ms` is the server-assigned ingestion timestamp. The
/// returned event has `sequence` 0; the orchestrator stamps per-session
/// sequence numbers after deduplication context is known.
///
/// # Errors
/// [`NormalizeError::MalformedPayload`] when a JSON payload does not
/// parse as an object; [`NormalizeError::MissingRequiredField`] when no
/// session id can be determined from transport context or payload.
pub fn normalize(
    raw: &RawSubmission,
    occurred_at_ms: u64,
) -> Result<NormalizedEvent, NormalizeError> {
    let trimmed = raw.payload.trim();

    let parsed = if trimmed.starts_with('{') {
        parse_json_payload(trimmed)?
    } else {
        ParsedPayload::from_fields(parse_pipe_payload(raw.kind, trimmed))
    };

    let session_id = non_empty(raw.session_id.as_deref())
        .map(str::to_owned)
        .or_else(|| parsed.session_id.clone().filter(|id| !id.is_empty()))
        .ok_or(NormalizeError::MissingRequiredField { field: "sessionId" })?;

    let user_id = non_empty(raw.user_id.as_deref())
        .map(str::to_owned)
        .or_else(|| parsed.user_id.clone().filter(|id| !id.is_empty()))
        .unwrap_or_else(|| UNKNOWN_USER.to_owned());

    let mut event = NormalizedEvent::builder(raw.kind)
        .session_id(session_id)
        .user_id(user_id)
        .occurred_at_ms(occurred_at_ms)
        .build();
    event.fields = parsed.fields;
    Ok(event)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use drivetrace_events::{EventValue, keys};

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    const AT_MS: u64 = 1_700_000_000_000;

    #[test]
    fn test_pipe_violation_submission() -> TestResult {
        let raw = RawSubmission::new(EventKind::Violation, "Speeding|75.5|Highway Test|1")
            .with_session("s1")
            .with_user("driver-7");

        let event = normalize(&raw, AT_MS)?;

        assert_eq!(event.kind, EventKind::Violation);
        assert_eq!(event.session_id, "s1");
        assert_eq!(event.user_id, "driver-7");
        assert_eq!(event.occurred_at_ms, AT_MS);
        assert_eq!(event.sequence, 0);
        assert_eq!(event.subtype(), Some("Speeding"));
        assert_eq!(event.speed(), Some(75.5));
        assert_eq!(event.text(keys::LOCATION), Some("Highway Test"));
        assert_eq!(
            event.field(keys::VIOLATION_NUMBER),
            Some(&EventValue::Integer(1))
        );
        Ok(())
    }

    #[test]
    fn test_json_collision_submission() -> TestResult {
        let raw = RawSubmission::new(
            EventKind::Collision,
            r#"{"type":"Vehicle","objectHit":"Car_A","impactForce":60}"#,
        )
        .with_session("s1");

        let event = normalize(&raw, AT_MS)?;

        assert_eq!(event.kind, EventKind::Collision);
        assert_eq!(event.subtype(), Some("Vehicle"));
        assert_eq!(event.text(keys::OBJECT_HIT), Some("Car_A"));
        assert_eq!(event.numeric(keys::IMPACT_FORCE), Some(60.0));
        Ok(())
    }

    #[test]
    fn test_transport_context_wins_over_inline_ids() -> TestResult {
        let raw = RawSubmission::new(
            EventKind::Progress,
            r#"{"sessionId":"inline","userId":"inline-user","score":500,"level":2}"#,
        )
        .with_session("transport")
        .with_user("transport-user");

        let event = normalize(&raw, AT_MS)?;

        assert_eq!(event.session_id, "transport");
        assert_eq!(event.user_id, "transport-user");
        // Identity keys never leak into payload fields.
        assert!(event.field("sessionId").is_none());
        assert!(event.field("userId").is_none());
        Ok(())
    }

    #[test]
    fn test_inline_ids_used_when_transport_has_none() -> TestResult {
        let raw = RawSubmission::new(
            EventKind::Progress,
            r#"{"sessionId":"inline","score":100,"level":1}"#,
        );

        let event = normalize(&raw, AT_MS)?;
        assert_eq!(event.session_id, "inline");
        assert_eq!(event.user_id, UNKNOWN_USER);
        Ok(())
    }

    #[test]
    fn test_missing_session_is_rejected() {
        let raw = RawSubmission::new(EventKind::Violation, "Speeding|70|Main St|1");

        let result = normalize(&raw, AT_MS);
        assert_eq!(
            result,
            Err(NormalizeError::MissingRequiredField { field: "sessionId" })
        );
    }

    #[test]
    fn test_empty_transport_session_is_treated_as_absent() {
        let raw = RawSubmission::new(EventKind::Violation, "Speeding|70|Main St|1")
            .with_session("");

        assert!(normalize(&raw, AT_MS).is_err());
    }

    #[test]
    fn test_malformed_json_is_not_retried_as_pipe() {
        let raw = RawSubmission::new(EventKind::Collision, r#"{"type": "Vehicle""#)
            .with_session("s1");

        let result = normalize(&raw, AT_MS);
        assert!(matches!(
            result,
            Err(NormalizeError::MalformedPayload { .. })
        ));
    }

    #[test]
    fn test_whitespace_before_brace_still_detects_json() {
        let raw = RawSubmission::new(EventKind::Collision, "  {\"impactForce\": 30}")
            .with_session("s1");

        let event = normalize(&raw, AT_MS);
        assert!(event.is_ok());
    }

    #[test]
    fn test_empty_payload_yields_neutral_fields() -> TestResult {
        let raw = RawSubmission::new(EventKind::Violation, "").with_session("s1");

        let event = normalize(&raw, AT_MS)?;
        assert_eq!(event.subtype(), Some("Unknown"));
        assert_eq!(event.speed(), Some(0.0));
        Ok(())
    }

    #[test]
    fn test_pipe_and_json_agree_on_full_precision_floats() -> TestResult {
        // Shortest round-trip decimals need all 17 significant digits;
        // both parsers must land on the same f64 bit pattern.
        for literal in [
            "116.72589157756991",
            "199.99999999999997",
            "0.30000000000000004",
        ] {
            let pipe = RawSubmission::new(
                EventKind::Violation,
                format!("Speeding|{literal}|Main St|1"),
            )
            .with_session("s1");
            let json = RawSubmission::new(
                EventKind::Violation,
                format!(
                    r#"{{"type":"Speeding","speed":{literal},"location":"Main St","violationNumber":1}}"#
                ),
            )
            .with_session("s1");

            let from_pipe = normalize(&pipe, AT_MS)?;
            let from_json = normalize(&json, AT_MS)?;

            assert_eq!(from_pipe.speed(), literal.parse::<f64>().ok());
            assert_eq!(from_pipe, from_json, "speed literal {literal}");
        }
        Ok(())
    }

    #[test]
    fn test_error_display() {
        let malformed = NormalizeError::MalformedPayload {
            reason: "unexpected end of input".to_owned(),
        };
        let missing = NormalizeError::MissingRequiredField { field: "sessionId" };

        assert_eq!(
            malformed.to_string(),
            "malformed payload: unexpected end of input"
        );
        assert_eq!(missing.to_string(), "missing required field: sessionId");
    }

    #[cfg(test)]
    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn never_panics_on_arbitrary_payload(payload in ".*") {
                let raw = RawSubmission::new(EventKind::Violation, payload).with_session("s1");
                // Must never panic regardless of input.
                let _ = normalize(&raw, 0);
            }

            #[test]
            fn never_panics_on_arbitrary_json_ish_payload(body in ".*") {
                let raw = RawSubmission::new(EventKind::Collision, format!("{{{body}"))
                    .with_session("s1");
                let _ = normalize(&raw, 0);
            }

            #[test]
            fn pipe_and_json_agree_on_violations(
                speed in 0.0f64..200.0,
                number in 0i64..1000,
                location in "[A-Za-z ]{1,20}",
            ) {
                let location = location.trim().to_owned();
                prop_assume!(!location.is_empty());

                let pipe = RawSubmission::new(
                    EventKind::Violation,
                    format!("Speeding|{speed}|{location}|{number}"),
                )
                .with_session("s1");
                let json = RawSubmission::new(
                    EventKind::Violation,
                    serde_json::json!({
                        "type": "Speeding",
                        "speed": speed,
                        "location": location,
                        "violationNumber": number,
                    })
                    .to_string(),
                )
                .with_session("s1");

                let from_pipe = normalize(&pipe, 42).map_err(|e| {
                    TestCaseError::fail(format!("pipe: {e}"))
                })?;
                let from_json = normalize(&json, 42).map_err(|e| {
                    TestCaseError::fail(format!("json: {e}"))
                })?;

                prop_assert_eq!(from_pipe, from_json);
            }
        }
    }
}
