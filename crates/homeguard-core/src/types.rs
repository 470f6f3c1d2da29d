use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Integer corner coordinates `(x1, y1, x2, y2)`, grown by `pad` pixels on
    /// every side and clamped to a `frame_width` × `frame_height` frame.
    pub fn to_corners(&self, pad: u32, frame_width: u32, frame_height: u32) -> (u32, u32, u32, u32) {
        let pad = pad as i64;
        let x1 = (self.x as i64 - pad).clamp(0, frame_width as i64);
        let y1 = (self.y as i64 - pad).clamp(0, frame_height as i64);
        let x2 = ((self.x + self.width) as i64 + pad).clamp(0, frame_width as i64);
        let y2 = ((self.y + self.height) as i64 + pad).clamp(0, frame_height as i64);
        (x1 as u32, y1 as u32, x2 as u32, y2 as u32)
    }

    /// Intersection over union; 0.0 when either box has no area.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let overlap_w = (self.x + self.width).min(other.x + other.width) - self.x.max(other.x);
        let overlap_h = (self.y + self.height).min(other.y + other.height) - self.y.max(other.y);
        let inter = overlap_w.max(0.0) * overlap_h.max(0.0);
        let union = self.width * self.height + other.width * other.height - inter;
        if union > 0.0 { inter / union } else { 0.0 }
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values, model_version: None }
    }

    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One stored embedding of a registered person.
#[derive(Debug, Clone)]
pub struct RegisteredFace {
    pub person: String,
    /// 1-based variation number (`image_<n>` on disk).
    pub variation: u32,
    pub embedding: Embedding,
}

/// Result of matching a probe embedding against the gallery.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub matched: bool,
    /// Euclidean distance to the nearest registered embedding (`+inf` for an empty gallery).
    pub distance: f32,
    /// Nearest person, set only when `matched`.
    pub person: Option<String>,
}

/// Strategy for comparing a probe embedding against the registered faces.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &[RegisteredFace], threshold: f32) -> MatchResult;
}

/// Nearest-neighbour matcher over Euclidean distance.
///
/// Each person scores the minimum distance over their variations; the person
/// with the lowest score wins. A match requires that score to be strictly
/// below the threshold.
pub struct NearestNeighborMatcher;

impl Matcher for NearestNeighborMatcher {
    fn compare(&self, probe: &Embedding, gallery: &[RegisteredFace], threshold: f32) -> MatchResult {
        let mut best_distance = f32::INFINITY;
        let mut best_person: Option<&str> = None;

        for face in gallery {
            let distance = probe.euclidean_distance(&face.embedding);
            if distance < best_distance {
                best_distance = distance;
                best_person = Some(&face.person);
            }
        }

        match best_person {
            Some(person) if best_distance < threshold => MatchResult {
                matched: true,
                distance: best_distance,
                person: Some(person.to_string()),
            },
            _ => MatchResult {
                matched: false,
                distance: best_distance,
                person: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(person: &str, variation: u32, values: Vec<f32>) -> RegisteredFace {
        RegisteredFace {
            person: person.into(),
            variation,
            embedding: Embedding::new(values),
        }
    }

    #[test]
    fn test_euclidean_distance() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_matcher_picks_nearest_person_across_variations() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let gallery = vec![
            face("alice", 1, vec![0.0, 1.0]),
            face("bob", 1, vec![0.5, 0.5]),
            face("alice", 2, vec![0.9, 0.1]),
        ];

        let result = NearestNeighborMatcher.compare(&probe, &gallery, 0.7);
        assert!(result.matched);
        assert_eq!(result.person.as_deref(), Some("alice"));
        assert!(result.distance < 0.2);
    }

    #[test]
    fn test_matcher_threshold_is_strict() {
        let probe = Embedding::new(vec![0.0, 0.0]);
        let gallery = vec![face("carol", 1, vec![0.7, 0.0])];

        let result = NearestNeighborMatcher.compare(&probe, &gallery, 0.7);
        assert!(!result.matched);
        assert!(result.person.is_none());
        assert!((result.distance - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_matcher_tie_keeps_first_person() {
        let probe = Embedding::new(vec![0.0, 0.0]);
        let gallery = vec![
            face("first", 1, vec![0.1, 0.0]),
            face("second", 1, vec![0.0, 0.1]),
        ];

        let result = NearestNeighborMatcher.compare(&probe, &gallery, 0.7);
        assert_eq!(result.person.as_deref(), Some("first"));
    }

    #[test]
    fn test_matcher_empty_gallery() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let result = NearestNeighborMatcher.compare(&probe, &[], 0.7);
        assert!(!result.matched);
        assert!(result.distance.is_infinite());
    }

    #[test]
    fn test_iou() {
        let a = BoundingBox { x: 0.0, y: 0.0, width: 10.0, height: 10.0, confidence: 1.0, landmarks: None };
        let b = BoundingBox { x: 5.0, ..a.clone() };
        let far = BoundingBox { x: 50.0, ..a.clone() };
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(a.iou(&far), 0.0);
    }

    #[test]
    fn test_to_corners_pads_and_clamps() {
        let bbox = BoundingBox {
            x: 10.0, y: 30.0, width: 50.0, height: 60.0,
            confidence: 0.9, landmarks: None,
        };
        assert_eq!(bbox.to_corners(20, 640, 80), (0, 10, 80, 80));
        assert_eq!(bbox.to_corners(0, 640, 480), (10, 30, 60, 90));
    }
}
