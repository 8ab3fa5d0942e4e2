use crate::{
    config::{ModelConfig, Validatable},
    detection::Prediction,
    model_service::{ModelError, ModelService},
};
use async_trait::async_trait;
use image::{
    imageops::{self, FilterType},
    RgbImage,
};
use ndarray::{Array, ArrayD, ArrayViewD, Axis, Ix2, Ix4, IxDyn};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex, MutexGuard,
};

const OUTPUT_NAME: &str = "output0";
const PAD_VALUE: f32 = 114. / 255.;

fn intersection(box1: &Prediction, box2: &Prediction) -> f32 {
    let width = (box1.x2.min(box2.x2) - box1.x1.max(box2.x1)).max(0.);
    let height = (box1.y2.min(box2.y2) - box1.y1.max(box2.y1)).max(0.);
    width * height
}

fn union(box1: &Prediction, box2: &Prediction) -> f32 {
    box1.area() + box2.area() - intersection(box1, box2)
}

fn iou(box1: &Prediction, box2: &Prediction) -> f32 {
    let union = union(box1, box2);
    if union <= 0. {
        return 0.;
    }
    intersection(box1, box2) / union
}

/// Per-class NMS. Output is sorted by descending confidence.
pub fn non_max_suppression(mut boxes: Vec<Prediction>, iou_threshold: f32) -> Vec<Prediction> {
    boxes.sort_by(|box1, box2| box2.confidence.total_cmp(&box1.confidence));
    let mut result = Vec::new();

    while !boxes.is_empty() {
        let best = boxes.remove(0);
        boxes.retain(|other| other.class_id != best.class_id || iou(&best, other) < iou_threshold);
        result.push(best);
    }

    result
}

/// Aspect-preserving fit of a frame into the square network input, centred
/// with grey padding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub width: u32,
    pub height: u32,
    pub pad_x: u32,
    pub pad_y: u32,
}

impl Letterbox {
    pub fn new(img_width: u32, img_height: u32, input_size: u32) -> Self {
        let scale = (input_size as f32 / img_width.max(1) as f32)
            .min(input_size as f32 / img_height.max(1) as f32);
        let width = ((img_width as f32 * scale).round() as u32).clamp(1, input_size);
        let height = ((img_height as f32 * scale).round() as u32).clamp(1, input_size);

        Self {
            scale,
            width,
            height,
            pad_x: (input_size - width) / 2,
            pad_y: (input_size - height) / 2,
        }
    }

    /// Network-input coordinates back to frame coordinates.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }
}

pub fn transform_image(image: &RgbImage, input_size: u32) -> (Array<f32, Ix4>, Letterbox) {
    let letterbox = Letterbox::new(image.width(), image.height(), input_size);
    let resized = imageops::resize(
        image,
        letterbox.width,
        letterbox.height,
        FilterType::CatmullRom,
    );
    let size = input_size as usize;

    let mut input = Array::from_elem((1, 3, size, size), PAD_VALUE);
    for (x, y, pixel) in resized.enumerate_pixels() {
        let x = (x + letterbox.pad_x) as usize;
        let y = (y + letterbox.pad_y) as usize;
        let [r, g, b] = pixel.0;
        input[[0, 0, y, x]] = (r as f32) / 255.;
        input[[0, 1, y, x]] = (g as f32) / 255.;
        input[[0, 2, y, x]] = (b as f32) / 255.;
    }

    (input, letterbox)
}

/// Decodes a YOLOv8 head of shape `[1, 4 + classes, candidates]` into boxes in
/// frame coordinates, clipped to the frame.
pub fn decode_output(
    output: ArrayViewD<f32>,
    img_width: u32,
    img_height: u32,
    letterbox: &Letterbox,
    min_probability: f32,
) -> Result<Vec<Prediction>, ModelError> {
    let shape = output.shape().to_vec();
    if shape.len() != 3 || shape[0] != 1 || shape[1] <= 4 {
        return Err(ModelError::Output(format!(
            "expected [1, 4 + classes, candidates], got {:?}",
            shape
        )));
    }

    let output = output
        .index_axis(Axis(0), 0)
        .into_dimensionality::<Ix2>()
        .map_err(|e| ModelError::Output(e.to_string()))?;

    let max_x = img_width as f32;
    let max_y = img_height as f32;

    let mut boxes = Vec::new();
    for candidate in output.axis_iter(Axis(1)) {
        let Some((class_id, prob)) = candidate
            .iter()
            .skip(4)
            .copied()
            .enumerate()
            .reduce(|accum, item| if item.1 > accum.1 { item } else { accum })
        else {
            continue;
        };

        if prob < min_probability {
            continue;
        }

        let (xc, yc, w, h) = (candidate[0], candidate[1], candidate[2], candidate[3]);
        let (x1, y1) = letterbox.unmap(xc - w / 2., yc - h / 2.);
        let (x2, y2) = letterbox.unmap(xc + w / 2., yc + h / 2.);

        boxes.push(Prediction {
            class_id,
            confidence: prob,
            x1: x1.clamp(0., max_x),
            y1: y1.clamp(0., max_y),
            x2: x2.clamp(0., max_x),
            y2: y2.clamp(0., max_y),
        });
    }

    Ok(boxes)
}

fn require_output<'a>(mut names: impl Iterator<Item = &'a str>) -> Result<(), ModelError> {
    if names.any(|name| name == OUTPUT_NAME) {
        return Ok(());
    }
    Err(ModelError::Load(format!(
        "model has no `{}` output; export it with ultralytics `format=onnx`",
        OUTPUT_NAME
    )))
}

// A panic while a session was borrowed leaves nothing half-written on our side,
// so the session stays usable.
fn lock_session<T>(session: &Mutex<T>, index: usize) -> MutexGuard<'_, T> {
    session.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("Session {} mutex was poisoned, recovering", index);
        poisoned.into_inner()
    })
}

fn load_error(e: impl std::fmt::Display) -> ModelError {
    ModelError::Load(e.to_string())
}

#[derive(Clone)]
pub struct OrtModelService {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    input_size: u32,
    iou_threshold: f32,
}

impl OrtModelService {
    pub fn new(model_config: &ModelConfig) -> Result<Self, ModelError> {
        let model_path = model_config.get_path();
        let num_instances = model_config.num_instances.max(1);

        let sessions = (0..num_instances)
            .map(|_| {
                let mut builder = Session::builder()
                    .map_err(load_error)?
                    .with_optimization_level(GraphOptimizationLevel::Level3)
                    .map_err(load_error)?;
                if let Some(threads) = model_config.intra_threads {
                    builder = builder.with_intra_threads(threads).map_err(load_error)?;
                }
                let session = builder.commit_from_file(&model_path).map_err(load_error)?;
                require_output(session.outputs.iter().map(|output| output.name.as_str()))?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, ModelError>>()?;

        tracing::info!(
            "Created {} ONNX sessions from {:?}",
            num_instances,
            model_path
        );

        Ok(Self {
            sessions: Arc::new(sessions),
            counter: Arc::new(AtomicUsize::new(0)),
            input_size: model_config.input_size,
            iou_threshold: model_config.iou_threshold,
        })
    }

    pub fn run_inference(&self, input: &Array<f32, Ix4>) -> Result<ArrayD<f32>, ModelError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let mut session = lock_session(&self.sessions[index], index);

        tracing::debug!("Handling frame with session {}", index);
        let owned_buffer;
        let input_view = if input.view().is_standard_layout() {
            input.view()
        } else {
            owned_buffer = input.as_standard_layout().into_owned();
            owned_buffer.view()
        };

        let tensor_ref = TensorRef::from_array_view(input_view)
            .map_err(|e| ModelError::Input(e.to_string()))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| ModelError::Inference(e.to_string()))?;

        let output = outputs
            .get(OUTPUT_NAME)
            .ok_or_else(|| ModelError::Output(format!("missing `{}` output", OUTPUT_NAME)))?;
        let (shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::Output(e.to_string()))?;

        let dims: Vec<usize> = shape.iter().map(|&dim| dim as usize).collect();
        let array = ArrayD::from_shape_vec(IxDyn(&dims), data.to_vec())
            .map_err(|e| ModelError::Output(format!("invalid tensor shape: {}", e)))?;

        Ok(array)
    }
}

#[async_trait]
impl ModelService for OrtModelService {
    async fn predict(
        &self,
        image: &RgbImage,
        min_probability: f32,
    ) -> Result<Vec<Prediction>, ModelError> {
        let (input, letterbox) = transform_image(image, self.input_size);
        let outputs = self.run_inference(&input)?;

        let boxes = decode_output(
            outputs.view(),
            image.width(),
            image.height(),
            &letterbox,
            min_probability,
        )?;

        Ok(non_max_suppression(boxes, self.iou_threshold))
    }
}
