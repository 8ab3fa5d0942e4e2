use crate::detection::Prediction;
use async_trait::async_trait;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to load model: {0}")]
    Load(String),
    #[error("Failed to build input tensor: {0}")]
    Input(String),
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Unexpected model output: {0}")]
    Output(String),
}

/// Object detector behind the relay. Returned predictions are in the
/// coordinate space of `image`, with confidence at or above `min_probability`.
#[async_trait]
pub trait ModelService: Send + Sync + 'static {
    async fn predict(
        &self,
        image: &RgbImage,
        min_probability: f32,
    ) -> Result<Vec<Prediction>, ModelError>;
}
