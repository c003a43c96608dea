//! Severity classification for violations and collisions.
//!
//! The classifier is a deterministic threshold table: violation subtypes
//! map to fixed labels (with speeding graded against configurable speed
//! thresholds), and collision impact force maps to a monotonic step
//! function of damage scores. It performs no I/O and keeps no state
//! beyond its thresholds, so classifying the same event twice always
//! yields the same annotation.
//!
//! | Input | Severity | Score |
//! |---|---|---|
//! | Speeding, speed > 80 | High | 85 |
//! | Speeding, speed > 65 | Medium | 60 |
//! | Speeding, otherwise | Low | 30 |
//! | Red Light | High | 90 |
//! | Stop Sign | Medium | 60 |
//! | Other violation | Medium | 50 |
//! | Impact force > 50 | High | 100 |
//! | Impact force > 25 | Medium | 75 |
//! | Impact force > 10 | Low | 50 |
//! | Impact force <= 10 | Low | 25 |
//!
//! Events of any other kind are not the classifier's business and come
//! back as `None`.

#![deny(static_mut_refs)]

use drivetrace_events::{EventKind, NormalizedEvent, Severity, SeverityAnnotation, keys};
use serde::{Deserialize, Serialize};

/// Violation subtypes with dedicated classification rules.
pub mod subtypes {
    /// Speed-limit violation; graded against the speeding thresholds.
    pub const SPEEDING: &str = "Speeding";
    /// Ran a red light; always High.
    pub const RED_LIGHT: &str = "Red Light";
    /// Rolled a stop sign; always Medium.
    pub const STOP_SIGN: &str = "Stop Sign";
}

/// Speed above which speeding is High severity.
pub const DEFAULT_SPEEDING_HIGH: f64 = 80.0;
/// Speed above which speeding is Medium severity.
pub const DEFAULT_SPEEDING_MEDIUM: f64 = 65.0;
/// Impact force above which a collision scores 100.
pub const DEFAULT_IMPACT_SEVERE: f64 = 50.0;
/// Impact force above which a collision scores 75.
pub const DEFAULT_IMPACT_MAJOR: f64 = 25.0;
/// Impact force above which a collision scores 50.
pub const DEFAULT_IMPACT_MINOR: f64 = 10.0;

// Damage scores per impact band.
const SCORE_IMPACT_SEVERE: u8 = 100;
const SCORE_IMPACT_MAJOR: u8 = 75;
const SCORE_IMPACT_MINOR: u8 = 50;
const SCORE_IMPACT_GLANCING: u8 = 25;

// Scores per violation outcome.
const SCORE_SPEEDING_HIGH: u8 = 85;
const SCORE_SPEEDING_MEDIUM: u8 = 60;
const SCORE_SPEEDING_LOW: u8 = 30;
const SCORE_RED_LIGHT: u8 = 90;
const SCORE_STOP_SIGN: u8 = 60;
const SCORE_OTHER_VIOLATION: u8 = 50;

/// Configurable classification thresholds.
///
/// All comparisons are strict (`>`): a speed of exactly 80.0 is Medium,
/// an impact force of exactly 50.0 scores 75.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityThresholds {
    /// Speeding is High above this speed.
    pub speeding_high: f64,
    /// Speeding is Medium above this speed.
    pub speeding_medium: f64,
    /// Collisions score 100 above this impact force.
    pub impact_severe: f64,
    /// Collisions score 75 above this impact force.
    pub impact_major: f64,
    /// Collisions score 50 above this impact force.
    pub impact_minor: f64,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            speeding_high: DEFAULT_SPEEDING_HIGH,
            speeding_medium: DEFAULT_SPEEDING_MEDIUM,
            impact_severe: DEFAULT_IMPACT_SEVERE,
            impact_major: DEFAULT_IMPACT_MAJOR,
            impact_minor: DEFAULT_IMPACT_MINOR,
        }
    }
}

/// Stateless severity classifier over a threshold table.
#[derive(Debug, Clone, Default)]
pub struct SeverityClassifier {
    thresholds: SeverityThresholds,
}

impl SeverityClassifier {
    /// Create a classifier with the given thresholds.
    pub fn new(thresholds: SeverityThresholds) -> Self {
        Self { thresholds }
    }

    /// The thresholds in effect.
    pub fn thresholds(&self) -> &SeverityThresholds {
        &self.thresholds
    }

    /// Derive the severity annotation for an event.
    ///
    /// Only Violation and Collision events are classified; every other
    /// kind returns `None`. Missing numeric fields read as 0, landing in
    /// the lowest band rather than failing the event.
    pub fn classify(&self, event: &NormalizedEvent) -> Option<SeverityAnnotation> {
        match event.kind {
            EventKind::Violation => Some(self.classify_violation(event)),
            EventKind::Collision => Some(self.classify_collision(event)),
            _ => None,
        }
    }

    fn classify_violation(&self, event: &NormalizedEvent) -> SeverityAnnotation {
        match event.subtype() {
            Some(subtypes::SPEEDING) => {
                let speed = event.speed().unwrap_or(0.0);
                if speed > self.thresholds.speeding_high {
                    SeverityAnnotation::new(Severity::High, SCORE_SPEEDING_HIGH)
                } else if speed > self.thresholds.speeding_medium {
                    SeverityAnnotation::new(Severity::Medium, SCORE_SPEEDING_MEDIUM)
                } else {
                    SeverityAnnotation::new(Severity::Low, SCORE_SPEEDING_LOW)
                }
            }
            Some(subtypes::RED_LIGHT) => {
                SeverityAnnotation::new(Severity::High, SCORE_RED_LIGHT)
            }
            Some(subtypes::STOP_SIGN) => {
                SeverityAnnotation::new(Severity::Medium, SCORE_STOP_SIGN)
            }
            _ => SeverityAnnotation::new(Severity::Medium, SCORE_OTHER_VIOLATION),
        }
    }

    fn classify_collision(&self, event: &NormalizedEvent) -> SeverityAnnotation {
        let force = event.numeric(keys::IMPACT_FORCE).unwrap_or(0.0);
        if force > self.thresholds.impact_severe {
            SeverityAnnotation::new(Severity::High, SCORE_IMPACT_SEVERE)
        } else if force > self.thresholds.impact_major {
            SeverityAnnotation::new(Severity::Medium, SCORE_IMPACT_MAJOR)
        } else if force > self.thresholds.impact_minor {
            SeverityAnnotation::new(Severity::Low, SCORE_IMPACT_MINOR)
        } else {
            SeverityAnnotation::new(Severity::Low, SCORE_IMPACT_GLANCING)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn violation(subtype: &str, speed: f64) -> NormalizedEvent {
        NormalizedEvent::builder(EventKind::Violation)
            .session_id("s1")
            .field(keys::TYPE, subtype)
            .field(keys::SPEED, speed)
            .build()
    }

    fn collision(force: f64) -> NormalizedEvent {
        NormalizedEvent::builder(EventKind::Collision)
            .session_id("s1")
            .field(keys::TYPE, "Vehicle")
            .field(keys::OBJECT_HIT, "Car_A")
            .field(keys::IMPACT_FORCE, force)
            .build()
    }

    fn classify(event: &NormalizedEvent) -> SeverityAnnotation {
        SeverityClassifier::default()
            .classify(event)
            .unwrap_or(SeverityAnnotation::new(Severity::Low, 0))
    }

    #[test]
    fn test_speeding_bands() -> TestResult {
        let mid = classify(&violation(subtypes::SPEEDING, 75.5));
        assert_eq!(mid.severity, Severity::Medium);
        assert_eq!(mid.score, 60);

        let high = classify(&violation(subtypes::SPEEDING, 95.0));
        assert_eq!(high.severity, Severity::High);
        assert_eq!(high.score, 85);

        let low = classify(&violation(subtypes::SPEEDING, 40.0));
        assert_eq!(low.severity, Severity::Low);
        assert_eq!(low.score, 30);
        Ok(())
    }

    #[test]
    fn test_speeding_boundaries_are_strict() -> TestResult {
        // Exactly at a threshold stays in the lower band.
        assert_eq!(classify(&violation(subtypes::SPEEDING, 80.0)).severity, Severity::Medium);
        assert_eq!(classify(&violation(subtypes::SPEEDING, 65.0)).severity, Severity::Low);
        assert_eq!(classify(&violation(subtypes::SPEEDING, 80.001)).severity, Severity::High);
        Ok(())
    }

    #[test]
    fn test_fixed_violation_subtypes() -> TestResult {
        let red = classify(&violation(subtypes::RED_LIGHT, 0.0));
        assert_eq!(red.severity, Severity::High);
        assert_eq!(red.score, 90);

        let stop = classify(&violation(subtypes::STOP_SIGN, 0.0));
        assert_eq!(stop.severity, Severity::Medium);
        assert_eq!(stop.score, 60);

        let other = classify(&violation("Tailgating", 0.0));
        assert_eq!(other.severity, Severity::Medium);
        assert_eq!(other.score, 50);
        Ok(())
    }

    #[test]
    fn test_violation_without_subtype_defaults_medium() -> TestResult {
        let event = NormalizedEvent::builder(EventKind::Violation)
            .session_id("s1")
            .build();
        let annotation = classify(&event);
        assert_eq!(annotation.severity, Severity::Medium);
        Ok(())
    }

    #[test]
    fn test_collision_step_function() -> TestResult {
        let severe = classify(&collision(60.0));
        assert_eq!(severe.severity, Severity::High);
        assert_eq!(severe.score, 100);

        let major = classify(&collision(30.0));
        assert_eq!(major.severity, Severity::Medium);
        assert_eq!(major.score, 75);

        let minor = classify(&collision(15.0));
        assert_eq!(minor.severity, Severity::Low);
        assert_eq!(minor.score, 50);

        let glancing = classify(&collision(5.0));
        assert_eq!(glancing.severity, Severity::Low);
        assert_eq!(glancing.score, 25);
        Ok(())
    }

    #[test]
    fn test_collision_boundaries_are_strict() -> TestResult {
        assert_eq!(classify(&collision(50.0)).score, 75);
        assert_eq!(classify(&collision(25.0)).score, 50);
        assert_eq!(classify(&collision(10.0)).score, 25);
        Ok(())
    }

    #[test]
    fn test_collision_without_force_is_glancing() -> TestResult {
        let event = NormalizedEvent::builder(EventKind::Collision)
            .session_id("s1")
            .field(keys::OBJECT_HIT, "Cone")
            .build();
        assert_eq!(classify(&event).score, 25);
        Ok(())
    }

    #[test]
    fn test_other_kinds_are_not_classified() -> TestResult {
        let classifier = SeverityClassifier::default();
        let progress = NormalizedEvent::builder(EventKind::Progress)
            .session_id("s1")
            .field(keys::SCORE, 500)
            .build();
        let control = NormalizedEvent::builder(EventKind::SessionControl)
            .session_id("s1")
            .field(keys::ACTION, "end")
            .build();

        assert!(classifier.classify(&progress).is_none());
        assert!(classifier.classify(&control).is_none());
        Ok(())
    }

    #[test]
    fn test_custom_thresholds_move_the_bands() -> TestResult {
        let classifier = SeverityClassifier::new(SeverityThresholds {
            speeding_high: 100.0,
            speeding_medium: 90.0,
            ..SeverityThresholds::default()
        });

        let event = violation(subtypes::SPEEDING, 95.0);
        let annotation = classifier
            .classify(&event)
            .unwrap_or(SeverityAnnotation::new(Severity::Low, 0));
        assert_eq!(annotation.severity, Severity::Medium);
        Ok(())
    }

    #[test]
    fn test_thresholds_deserialize_with_defaults() -> TestResult {
        let thresholds: SeverityThresholds =
            serde_json::from_str(r#"{"speeding_high": 90.0}"#)?;
        assert!((thresholds.speeding_high - 90.0).abs() < f64::EPSILON);
        assert!((thresholds.speeding_medium - DEFAULT_SPEEDING_MEDIUM).abs() < f64::EPSILON);
        Ok(())
    }

    #[cfg(test)]
    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn classification_is_deterministic(force in -50.0f64..200.0) {
                let classifier = SeverityClassifier::default();
                let event = collision(force);
                prop_assert_eq!(classifier.classify(&event), classifier.classify(&event));
            }

            #[test]
            fn collision_score_is_monotonic(a in 0.0f64..200.0, b in 0.0f64..200.0) {
                let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
                let classifier = SeverityClassifier::default();
                let lo_score = classifier.classify(&collision(lo)).map(|s| s.score);
                let hi_score = classifier.classify(&collision(hi)).map(|s| s.score);
                prop_assert!(lo_score <= hi_score);
            }

            #[test]
            fn scores_stay_in_range(speed in -100.0f64..500.0, force in -100.0f64..500.0) {
                let classifier = SeverityClassifier::default();
                for event in [violation(subtypes::SPEEDING, speed), collision(force)] {
                    if let Some(annotation) = classifier.classify(&event) {
                        prop_assert!(annotation.score <= SeverityAnnotation::MAX_SCORE);
                    }
                }
            }

            #[test]
            fn violations_and_collisions_always_classify(speed in any::<f64>()) {
                let classifier = SeverityClassifier::default();
                prop_assert!(classifier.classify(&violation(subtypes::SPEEDING, speed)).is_some());
                prop_assert!(classifier.classify(&collision(speed)).is_some());
            }
        }
    }
}
