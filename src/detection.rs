use crate::labels::ClassLabels;
use serde::Serialize;

/// Raw detector output, in original-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub class_id: usize,
    pub confidence: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl Prediction {
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.) * (self.y2 - self.y1).max(0.)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub bbox: [f32; 4],
    pub conf: f32,
    #[serde(rename = "class")]
    pub class_name: String,
}

impl Detection {
    pub fn from_prediction(prediction: &Prediction, labels: &ClassLabels) -> Self {
        Self {
            bbox: [prediction.x1, prediction.y1, prediction.x2, prediction.y2],
            conf: prediction.confidence,
            class_name: labels.name(prediction.class_id),
        }
    }
}

/// Message sent back on the socket for one frame.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum FrameResponse {
    Detections { detections: Vec<Detection> },
    Error { error: String },
}

impl FrameResponse {
    pub fn error(message: impl ToString) -> Self {
        FrameResponse::Error {
            error: message.to_string(),
        }
    }
}
