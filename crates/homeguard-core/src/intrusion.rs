//! Authorized/intrusion classification and consecutive-frame debounce.

use crate::types::MatchResult;
use serde::Serialize;

/// Consecutive intrusion frames needed before an alert fires.
pub const DEFAULT_INTRUSION_FRAMES: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FaceStatus {
    Authorized,
    Intrusion,
}

impl FaceStatus {
    pub fn display_name(self) -> &'static str {
        match self {
            FaceStatus::Authorized => "Authorized",
            FaceStatus::Intrusion => "Intrusion",
        }
    }
}

/// Decision for one face in a frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceVerdict {
    /// `(x1, y1, x2, y2)` in frame pixels.
    pub bbox: (u32, u32, u32, u32),
    pub label: String,
    pub status: FaceStatus,
}

/// All verdicts for one frame.
#[derive(Debug, Clone, Default)]
pub struct FrameAssessment {
    pub verdicts: Vec<FaceVerdict>,
    /// Matched persons, first-seen order, no duplicates.
    pub authorized_persons: Vec<String>,
    pub intrusion_count: usize,
}

impl FrameAssessment {
    pub fn has_intrusion(&self) -> bool {
        self.intrusion_count > 0
    }

    /// Human-readable summary, e.g.
    /// `"Authorized persons: alice. 1 intrusion(s)"`.
    pub fn summary(&self) -> String {
        let persons = if self.authorized_persons.is_empty() {
            "None".to_string()
        } else {
            self.authorized_persons.join(", ")
        };
        let intrusions = if self.intrusion_count > 0 {
            format!("{} intrusion(s)", self.intrusion_count)
        } else {
            "No intrusions".to_string()
        };
        format!("Authorized persons: {persons}. {intrusions}")
    }
}

/// Turn per-face match results into verdicts. Unmatched faces are labelled
/// `"Intrusion 1"`, `"Intrusion 2"`, ... in frame order.
pub fn classify<I>(faces: I) -> FrameAssessment
where
    I: IntoIterator<Item = ((u32, u32, u32, u32), MatchResult)>,
{
    let mut assessment = FrameAssessment::default();

    for (bbox, result) in faces {
        match result.person {
            Some(person) if result.matched => {
                if !assessment.authorized_persons.contains(&person) {
                    assessment.authorized_persons.push(person.clone());
                }
                assessment.verdicts.push(FaceVerdict {
                    bbox,
                    label: person,
                    status: FaceStatus::Authorized,
                });
            }
            _ => {
                assessment.intrusion_count += 1;
                assessment.verdicts.push(FaceVerdict {
                    bbox,
                    label: format!("Intrusion {}", assessment.intrusion_count),
                    status: FaceStatus::Intrusion,
                });
            }
        }
    }

    assessment
}

/// Counts consecutive intrusion frames and fires once the run is long enough.
#[derive(Debug, Clone)]
pub struct IntrusionDebouncer {
    threshold: u32,
    consecutive: u32,
}

impl Default for IntrusionDebouncer {
    fn default() -> Self {
        Self::new(DEFAULT_INTRUSION_FRAMES)
    }
}

impl IntrusionDebouncer {
    pub fn new(threshold: u32) -> Self {
        Self { threshold: threshold.max(1), consecutive: 0 }
    }

    /// Record one assessed frame. Returns `true` when the run reaches the
    /// threshold; the run restarts from zero after firing.
    pub fn observe(&mut self, intrusion_in_frame: bool) -> bool {
        if !intrusion_in_frame {
            self.consecutive = 0;
            return false;
        }

        self.consecutive += 1;
        if self.consecutive >= self.threshold {
            self.consecutive = 0;
            return true;
        }
        false
    }

    /// Break the run (frame not assessed).
    pub fn reset(&mut self) {
        self.consecutive = 0;
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(person: &str) -> MatchResult {
        MatchResult { matched: true, distance: 0.2, person: Some(person.into()) }
    }

    fn miss() -> MatchResult {
        MatchResult { matched: false, distance: 1.4, person: None }
    }

    #[test]
    fn test_classify_labels_intrusions_in_order() {
        let a = classify(vec![
            ((0, 0, 10, 10), miss()),
            ((20, 0, 30, 10), hit("alice")),
            ((40, 0, 50, 10), miss()),
            ((60, 0, 70, 10), hit("alice")),
        ]);

        let labels: Vec<&str> = a.verdicts.iter().map(|v| v.label.as_str()).collect();
        assert_eq!(labels, vec!["Intrusion 1", "alice", "Intrusion 2", "alice"]);
        assert_eq!(a.authorized_persons, vec!["alice".to_string()]);
        assert_eq!(a.intrusion_count, 2);
        assert_eq!(a.verdicts[1].status, FaceStatus::Authorized);
        assert!(a.has_intrusion());
    }

    #[test]
    fn test_summary_messages() {
        let clean = classify(vec![((0, 0, 1, 1), hit("alice")), ((0, 0, 1, 1), hit("bob"))]);
        assert_eq!(clean.summary(), "Authorized persons: alice, bob. No intrusions");

        let intruded = classify(vec![((0, 0, 1, 1), miss())]);
        assert_eq!(intruded.summary(), "Authorized persons: None. 1 intrusion(s)");
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&FaceStatus::Intrusion).unwrap(), "\"intrusion\"");
    }

    #[test]
    fn test_debouncer_fires_on_tenth_frame_and_restarts() {
        let mut d = IntrusionDebouncer::default();
        for _ in 0..9 {
            assert!(!d.observe(true));
        }
        assert!(d.observe(true));
        assert_eq!(d.consecutive(), 0);
        assert!(!d.observe(true));
        assert_eq!(d.consecutive(), 1);
    }

    #[test]
    fn test_debouncer_clean_frame_breaks_run() {
        let mut d = IntrusionDebouncer::new(3);
        assert!(!d.observe(true));
        assert!(!d.observe(true));
        assert!(!d.observe(false));
        assert!(!d.observe(true));
        assert!(!d.observe(true));
        assert!(d.observe(true));
    }

    #[test]
    fn test_debouncer_reset() {
        let mut d = IntrusionDebouncer::new(2);
        d.observe(true);
        d.reset();
        assert!(!d.observe(true));
        assert!(d.observe(true));
    }
}
