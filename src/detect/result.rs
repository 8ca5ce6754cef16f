/// One detected object.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub label: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }

    /// Finite and within `[0, 1]`.
    pub fn has_valid_confidence(&self) -> bool {
        self.confidence.is_finite() && (0.0..=1.0).contains(&self.confidence)
    }
}

/// Class names of the COCO dataset, in model output order.
pub const COCO_LABELS: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coco_bird_index_matches_model_class_id() {
        assert_eq!(COCO_LABELS[14], "bird");
    }

    #[test]
    fn confidence_validity() {
        assert!(Detection::new("bird", 0.0).has_valid_confidence());
        assert!(Detection::new("bird", 1.0).has_valid_confidence());
        assert!(!Detection::new("bird", 1.2).has_valid_confidence());
        assert!(!Detection::new("bird", f32::NAN).has_valid_confidence());
    }
}
