use crate::error::{PipelineError, Result};
use crate::geometry::CropGeometry;
use crate::minibatch::MiniBatch;
use std::collections::HashMap;
use tch::Tensor;

/// Reusable batch buffer: images `[N, C, H, W]` and optional labels
/// `[N, 1, H, W]`, stored flat.
///
/// Buffers are allocated once and rewritten in place; [`Batch::reshape`]
/// only reallocates when the geometry actually changes.
#[derive(Debug, Clone)]
pub struct Batch {
    batch_size: usize,
    channels: usize,
    geometry: CropGeometry,
    images: Vec<f32>,
    labels: Option<Vec<f32>>,
}

impl Batch {
    pub fn new(batch_size: usize, channels: usize, geometry: CropGeometry, with_labels: bool) -> Self {
        let area = geometry.area();
        Self {
            batch_size,
            channels,
            geometry,
            images: vec![0.0; batch_size * channels * area],
            labels: with_labels.then(|| vec![0.0; batch_size * area]),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn geometry(&self) -> CropGeometry {
        self.geometry
    }

    /// Shape of the image buffer, `[N, C, H, W]`.
    pub fn image_shape(&self) -> [usize; 4] {
        [
            self.batch_size,
            self.channels,
            self.geometry.height as usize,
            self.geometry.width as usize,
        ]
    }

    pub fn images(&self) -> &[f32] {
        &self.images
    }

    pub fn labels(&self) -> Option<&[f32]> {
        self.labels.as_deref()
    }

    pub fn has_labels(&self) -> bool {
        self.labels.is_some()
    }

    /// Address of the image storage, identifying the underlying buffer.
    pub fn buffer_id(&self) -> usize {
        self.images.as_ptr() as usize
    }

    /// Resizes the buffers for a new geometry and/or channel count.
    pub fn reshape(&mut self, channels: usize, geometry: CropGeometry) {
        if channels == self.channels && geometry == self.geometry {
            return;
        }
        self.channels = channels;
        self.geometry = geometry;
        let area = geometry.area();
        self.images.resize(self.batch_size * channels * area, 0.0);
        if let Some(labels) = self.labels.as_mut() {
            labels.resize(self.batch_size * area, 0.0);
        }
    }

    /// Image and label slots of item `index`.
    pub fn slot_mut(&mut self, index: usize) -> Result<(&mut [f32], Option<&mut [f32]>)> {
        if index >= self.batch_size {
            return Err(PipelineError::config(format!(
                "slot {} out of range for batch of {}",
                index, self.batch_size
            )));
        }
        let area = self.geometry.area();
        let image_len = self.channels * area;
        let image = &mut self.images[index * image_len..(index + 1) * image_len];
        let label = self
            .labels
            .as_mut()
            .map(|labels| &mut labels[index * area..(index + 1) * area]);
        Ok((image, label))
    }

    pub fn image(&self, index: usize) -> &[f32] {
        let len = self.channels * self.geometry.area();
        &self.images[index * len..(index + 1) * len]
    }

    pub fn label(&self, index: usize) -> Option<&[f32]> {
        let area = self.geometry.area();
        self.labels
            .as_ref()
            .map(|labels| &labels[index * area..(index + 1) * area])
    }

    /// Copies the buffers into named tensors:
    /// - `"image"`: `[N, C, H, W]` f32
    /// - `"label"`: `[N, 1, H, W]` f32 (when labels are produced)
    /// - `"size"`: `[2]` i64 holding `[H, W]`
    pub fn to_minibatch(&self) -> MiniBatch {
        let [n, c, h, w] = self.image_shape().map(|d| d as i64);
        let mut tensors = HashMap::with_capacity(3);
        tensors.insert(
            "image".to_string(),
            Tensor::from_slice(&self.images).reshape(&[n, c, h, w]),
        );
        if let Some(labels) = &self.labels {
            tensors.insert(
                "label".to_string(),
                Tensor::from_slice(labels).reshape(&[n, 1, h, w]),
            );
        }
        tensors.insert("size".to_string(), Tensor::from_slice(&[h, w]));
        MiniBatch { tensors }
    }
}
