use crate::{
    detection::Detection,
    labels::ClassLabels,
    model_service::{ModelError, ModelService},
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::RgbImage;
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Frame has no ',' separator")]
    MissingSeparator,
    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Empty image payload")]
    EmptyPayload,
    #[error("Expected a text frame")]
    NotText,
    #[error(transparent)]
    Model(#[from] ModelError),
}

#[derive(Debug)]
pub enum FrameOutcome {
    Detected(Vec<Detection>),
    /// The payload was not a decodable image; nothing is sent back.
    Dropped,
    Failed(FrameError),
}

/// Everything after the first `,` of a data URL.
pub fn split_payload(text: &str) -> Result<&str, FrameError> {
    text.split_once(',')
        .map(|(_prefix, payload)| payload)
        .ok_or(FrameError::MissingSeparator)
}

/// Standard padded base64. ASCII whitespace anywhere is ignored, so line-wrapped
/// payloads decode; any other non-alphabet byte is an error.
pub fn decode_payload(payload: &str) -> Result<Vec<u8>, FrameError> {
    let compact: Vec<u8> = payload
        .bytes()
        .filter(|byte| !byte.is_ascii_whitespace())
        .collect();
    let bytes = STANDARD.decode(compact)?;
    if bytes.is_empty() {
        return Err(FrameError::EmptyPayload);
    }
    Ok(bytes)
}

pub fn decode_image(bytes: &[u8]) -> Option<RgbImage> {
    match image::load_from_memory(bytes) {
        Ok(image) => Some(image.to_rgb8()),
        Err(e) => {
            tracing::debug!("Dropping undecodable frame: {}", e);
            None
        }
    }
}

pub struct FrameProcessor {
    model_service: Arc<dyn ModelService>,
    labels: ClassLabels,
    min_probability: f32,
}

impl FrameProcessor {
    pub fn new(
        model_service: Arc<dyn ModelService>,
        labels: ClassLabels,
        min_probability: f32,
    ) -> Self {
        Self {
            model_service,
            labels,
            min_probability,
        }
    }

    #[instrument(skip_all)]
    pub async fn process(&self, text: &str) -> FrameOutcome {
        match self.try_process(text).await {
            Ok(Some(detections)) => FrameOutcome::Detected(detections),
            Ok(None) => FrameOutcome::Dropped,
            Err(e) => FrameOutcome::Failed(e),
        }
    }

    async fn try_process(&self, text: &str) -> Result<Option<Vec<Detection>>, FrameError> {
        let payload = split_payload(text)?;
        let bytes = decode_payload(payload)?;
        let Some(image) = decode_image(&bytes) else {
            return Ok(None);
        };

        let predictions = self
            .model_service
            .predict(&image, self.min_probability)
            .await?;

        let detections: Vec<Detection> = predictions
            .iter()
            .filter(|prediction| prediction.confidence >= self.min_probability)
            .map(|prediction| Detection::from_prediction(prediction, &self.labels))
            .collect();

        tracing::debug!(
            "Returning {} detections for {}x{} frame",
            detections.len(),
            image.width(),
            image.height()
        );

        Ok(Some(detections))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Prediction;
    use async_trait::async_trait;
    use image::{ImageBuffer, Rgb};
    use std::io::Cursor;

    struct MockModelService {}

    #[async_trait]
    impl ModelService for MockModelService {
        async fn predict(
            &self,
            image: &RgbImage,
            _min_probability: f32,
        ) -> Result<Vec<Prediction>, ModelError> {
            if image.pixels().all(|pixel| pixel.0.iter().all(|&c| c < 16)) {
                return Ok(vec![]);
            }

            Ok(vec![
                Prediction {
                    class_id: 0,
                    confidence: 0.95,
                    x1: 10.0,
                    y1: 20.0,
                    x2: 100.0,
                    y2: 150.0,
                },
                Prediction {
                    class_id: 1,
                    confidence: 0.2,
                    x1: 200.0,
                    y1: 50.0,
                    x2: 300.0,
                    y2: 200.0,
                },
                Prediction {
                    class_id: 5,
                    confidence: 0.4,
                    x1: 0.0,
                    y1: 0.0,
                    x2: 1.0,
                    y2: 1.0,
                },
            ])
        }
    }

    struct FailingModelService {}

    #[async_trait]
    impl ModelService for FailingModelService {
        async fn predict(
            &self,
            _image: &RgbImage,
            _min_probability: f32,
        ) -> Result<Vec<Prediction>, ModelError> {
            Err(ModelError::Inference("device lost".to_string()))
        }
    }

    fn processor(model_service: Arc<dyn ModelService>) -> FrameProcessor {
        let labels = ClassLabels::new(vec!["person".to_string(), "bicycle".to_string()]);
        FrameProcessor::new(model_service, labels, 0.4)
    }

    fn encoded_frame(color: [u8; 3], format: image::ImageFormat) -> String {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(10, 10, Rgb(color));
        let mut cursor = Cursor::new(Vec::new());
        img.write_to(&mut cursor, format).unwrap();
        format!("data:image/jpeg;base64,{}", STANDARD.encode(cursor.into_inner()))
    }

    #[test]
    fn test_split_payload_on_first_comma() {
        assert_eq!(split_payload("data:image/png;base64,abc").unwrap(), "abc");
        assert_eq!(split_payload("a,b,c").unwrap(), "b,c");
        assert!(matches!(
            split_payload("no separator"),
            Err(FrameError::MissingSeparator)
        ));
    }

    #[test]
    fn test_decode_payload() {
        assert_eq!(decode_payload("aGVsbG8=").unwrap(), b"hello");
        assert!(matches!(
            decode_payload("validbase64!!"),
            Err(FrameError::Base64(_))
        ));
        assert!(matches!(decode_payload(""), Err(FrameError::EmptyPayload)));
    }

    #[test]
    fn test_decode_line_wrapped_payload() {
        assert_eq!(decode_payload(" aGVs\r\nbG8g\nd29y bGQ= \n").unwrap(), b"hello world");
        assert!(matches!(decode_payload(" \n "), Err(FrameError::EmptyPayload)));
    }

    #[tokio::test]
    async fn test_black_frame_has_no_detections() {
        let processor = processor(Arc::new(MockModelService {}));
        let frame = encoded_frame([0, 0, 0], image::ImageFormat::Jpeg);

        match processor.process(&frame).await {
            FrameOutcome::Detected(detections) => assert!(detections.is_empty()),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_detections_respect_threshold_and_labels() {
        let processor = processor(Arc::new(MockModelService {}));
        let frame = encoded_frame([255, 255, 255], image::ImageFormat::Png);

        let FrameOutcome::Detected(detections) = processor.process(&frame).await else {
            panic!("expected detections");
        };

        assert_eq!(detections.len(), 2);
        assert!(detections.iter().all(|d| d.conf >= 0.4));
        assert_eq!(detections[0].class_name, "person");
        assert_eq!(detections[0].bbox, [10.0, 20.0, 100.0, 150.0]);
        assert_eq!(detections[1].class_name, "Unknown class 5");
    }

    #[tokio::test]
    async fn test_missing_separator_is_reported() {
        let processor = processor(Arc::new(MockModelService {}));

        assert!(matches!(
            processor.process("garbage").await,
            FrameOutcome::Failed(FrameError::MissingSeparator)
        ));
    }

    #[tokio::test]
    async fn test_invalid_base64_is_reported() {
        let processor = processor(Arc::new(MockModelService {}));

        assert!(matches!(
            processor.process("not,validbase64!!").await,
            FrameOutcome::Failed(FrameError::Base64(_))
        ));
    }

    #[tokio::test]
    async fn test_undecodable_image_is_dropped() {
        let processor = processor(Arc::new(MockModelService {}));
        let frame = format!("data:image/jpeg;base64,{}", STANDARD.encode(b"not an image"));

        assert!(matches!(
            processor.process(&frame).await,
            FrameOutcome::Dropped
        ));
    }

    #[tokio::test]
    async fn test_model_failure_is_reported() {
        let processor = processor(Arc::new(FailingModelService {}));
        let frame = encoded_frame([0, 0, 0], image::ImageFormat::Png);

        let FrameOutcome::Failed(error) = processor.process(&frame).await else {
            panic!("expected failure");
        };
        assert_eq!(error.to_string(), "Inference failed: device lost");
    }
}
