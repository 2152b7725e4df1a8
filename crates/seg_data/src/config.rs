//! src/config.rs
//!
//! Configuration for the transformer and the prefetch pipeline.
//!
//! Each option axis is a tagged union (`ResizeMode`, `CropMode`,
//! `NormalizationMode`), so contradictory combinations cannot be built in
//! code. The flat key/value surface that job files use
//! ([`TransformParams`], [`PipelineParams`]) is checked once when it is
//! converted into these types.
//!
//! Example:
//! ```ignore
//! let transform = TransformConfig::builder()
//!     .crop(CropMode::FixedRect { height: 321, width: 321 })
//!     .mirror(true)
//!     .normalization(NormalizationMode::MeanValues(vec![104.0, 117.0, 123.0]))
//!     .phase(Phase::Train)
//!     .build();
//!
//! let pipeline = PipelineConfig::builder()
//!     .batch_size(10)
//!     .rand_skip(100)
//!     .seed(42)
//!     .build();
//! ```

use crate::error::{ensure_config, PipelineError, Result};
use crate::geometry::{CropGeometry, GeometryConstraints};
use safetensors::{tensor::Dtype, SafeTensors};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Name of the tensor a mean file must contain.
pub const MEAN_TENSOR_NAME: &str = "mean";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Train,
    Test,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResizeMode {
    #[default]
    None,
    /// Resize to `size x size`, ignoring aspect ratio.
    FixedSquare(u32),
    /// Resize so the shorter side is drawn uniformly from `[min, max]`.
    ShortSideRange { min: u32, max: u32 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CropMode {
    #[default]
    None,
    FixedSquare(u32),
    FixedRect { height: u32, width: u32 },
    /// Shape planned per batch from the first item's aspect ratio.
    AspectRatioDerived,
}

impl CropMode {
    /// Crop shape known up front, if any.
    pub fn fixed_geometry(&self) -> Option<CropGeometry> {
        match *self {
            CropMode::FixedSquare(size) => Some(CropGeometry::new(size, size)),
            CropMode::FixedRect { height, width } => Some(CropGeometry::new(height, width)),
            CropMode::None | CropMode::AspectRatioDerived => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum NormalizationMode {
    #[default]
    None,
    /// Per-pixel mean with the pre-crop image's shape.
    MeanFile(MeanTensor),
    /// One value per channel, or a single value broadcast to all channels.
    MeanValues(Vec<f32>),
}

/// Planar `[C, H, W]` mean image.
#[derive(Debug, Clone, PartialEq)]
pub struct MeanTensor {
    pub channels: u32,
    pub height: u32,
    pub width: u32,
    pub data: Vec<f32>,
}

impl MeanTensor {
    pub fn new(channels: u32, height: u32, width: u32, data: Vec<f32>) -> Result<Self> {
        ensure_config!(
            data.len() == channels as usize * height as usize * width as usize,
            "mean tensor has {} values, expected {}x{}x{}",
            data.len(),
            channels,
            height,
            width
        );
        Ok(Self {
            channels,
            height,
            width,
            data,
        })
    }

    /// Loads the `"mean"` tensor (f32, shape `[C, H, W]`) of a safetensors file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| PipelineError::io(path, e))?;
        let tensors = SafeTensors::deserialize(&bytes).map_err(|e| {
            PipelineError::config(format!("mean file {}: {}", path.display(), e))
        })?;
        let view = tensors.tensor(MEAN_TENSOR_NAME).map_err(|e| {
            PipelineError::config(format!(
                "mean file {} has no '{}' tensor: {}",
                path.display(),
                MEAN_TENSOR_NAME,
                e
            ))
        })?;
        ensure_config!(
            view.dtype() == Dtype::F32,
            "mean tensor must be F32 (got {:?})",
            view.dtype()
        );
        let shape = view.shape();
        ensure_config!(
            shape.len() == 3,
            "mean tensor must have shape [C, H, W] (got {:?})",
            shape
        );
        ensure_config!(
            view.data().len() % std::mem::size_of::<f32>() == 0,
            "mean tensor payload of {} bytes is not a whole number of f32 values",
            view.data().len()
        );
        let data: Vec<f32> = bytemuck::pod_collect_to_vec(view.data());
        Self::new(shape[0] as u32, shape[1] as u32, shape[2] as u32, data)
    }

    /// Writes the tensor in the format [`MeanTensor::load`] reads.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let shape = vec![
            self.channels as usize,
            self.height as usize,
            self.width as usize,
        ];
        let bytes: &[u8] = bytemuck::cast_slice(&self.data);
        let view = safetensors::tensor::TensorView::new(Dtype::F32, shape, bytes)
            .map_err(|e| PipelineError::config(e.to_string()))?;
        let serialized = safetensors::serialize([(MEAN_TENSOR_NAME, view)], &None)
            .map_err(|e| PipelineError::config(e.to_string()))?;
        fs::write(path, serialized).map_err(|e| PipelineError::io(path, e))
    }

    #[inline]
    pub fn at(&self, c: usize, h: usize, w: usize) -> f32 {
        self.data[(c * self.height as usize + h) * self.width as usize + w]
    }
}

// ============================================================================
// TransformConfig
// ============================================================================

/// Options for [`crate::transformer::Transformer`].
#[derive(Debug, Clone, PartialEq)]
pub struct TransformConfig {
    pub resize: ResizeMode,
    pub crop: CropMode,
    /// Coin-flip horizontal mirroring, active in the training phase only.
    pub mirror: bool,
    pub normalization: NormalizationMode,
    /// Multiplier applied after mean subtraction.
    pub scale: f32,
    pub phase: Phase,
    /// Used only by [`CropMode::AspectRatioDerived`].
    pub constraints: GeometryConstraints,
    /// When set, difficult pixels (255) are emitted as `num_classes + 1`.
    /// Label maps that still hold raw 255 values need it; without it such a
    /// label is a configuration error.
    pub num_classes: Option<u32>,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            resize: ResizeMode::None,
            crop: CropMode::None,
            mirror: false,
            normalization: NormalizationMode::None,
            scale: 1.0,
            phase: Phase::Train,
            constraints: GeometryConstraints::default(),
            num_classes: None,
        }
    }
}

impl TransformConfig {
    pub fn builder() -> TransformConfigBuilder {
        TransformConfigBuilder::default()
    }

    /// Checks value ranges that the variant types cannot express.
    pub fn validate(&self) -> Result<()> {
        match self.resize {
            ResizeMode::None => {}
            ResizeMode::FixedSquare(size) => {
                ensure_config!(size > 0, "resize_size must be positive")
            }
            ResizeMode::ShortSideRange { min, max } => {
                ensure_config!(min > 0, "resize_short_side_min must be positive");
                ensure_config!(
                    max >= min,
                    "resize_short_side_max ({}) is below resize_short_side_min ({})",
                    max,
                    min
                );
            }
        }
        match self.crop {
            CropMode::None => {}
            CropMode::FixedSquare(size) => ensure_config!(size > 0, "crop_size must be positive"),
            CropMode::FixedRect { height, width } => ensure_config!(
                height > 0 && width > 0,
                "crop_height and crop_width must both be positive (got {}x{})",
                height,
                width
            ),
            CropMode::AspectRatioDerived => {
                self.constraints.validate()?;
                let initial = self.constraints.initial_geometry();
                ensure_config!(
                    initial.height > 0 && initial.width > 0,
                    "min size {}x{} rounds down to an empty shape with multiples {}/{}",
                    self.constraints.min_height,
                    self.constraints.min_width,
                    self.constraints.height_multiple,
                    self.constraints.width_multiple
                );
            }
        }
        if let NormalizationMode::MeanValues(values) = &self.normalization {
            ensure_config!(!values.is_empty(), "mean_value list is empty");
        }
        ensure_config!(self.scale.is_finite(), "scale must be finite (got {})", self.scale);
        Ok(())
    }
}

/// Builder for TransformConfig with method chaining
#[derive(Default)]
pub struct TransformConfigBuilder {
    config: TransformConfig,
}

impl TransformConfigBuilder {
    pub fn resize(mut self, resize: ResizeMode) -> Self {
        self.config.resize = resize;
        self
    }

    pub fn crop(mut self, crop: CropMode) -> Self {
        self.config.crop = crop;
        self
    }

    pub fn mirror(mut self, mirror: bool) -> Self {
        self.config.mirror = mirror;
        self
    }

    pub fn normalization(mut self, normalization: NormalizationMode) -> Self {
        self.config.normalization = normalization;
        self
    }

    pub fn scale(mut self, scale: f32) -> Self {
        self.config.scale = scale;
        self
    }

    pub fn phase(mut self, phase: Phase) -> Self {
        self.config.phase = phase;
        self
    }

    /// Bounds for aspect-ratio-derived cropping.
    pub fn constraints(mut self, constraints: GeometryConstraints) -> Self {
        self.config.constraints = constraints;
        self
    }

    pub fn num_classes(mut self, num_classes: u32) -> Self {
        self.config.num_classes = Some(num_classes);
        self
    }

    pub fn build(self) -> TransformConfig {
        self.config
    }
}

// ============================================================================
// PipelineConfig
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Items per batch (must be > 0).
    pub batch_size: usize,
    /// Upper bound for the number of records skipped once at startup.
    /// The actual count is drawn from `[0, rand_skip)`.
    pub rand_skip: u32,
    /// Base seed; `None` draws one at construction.
    pub seed: Option<u64>,
    /// Whether batches carry label tensors.
    pub output_labels: bool,
    /// Maximum time a consumer waits for a batch. `None` blocks indefinitely.
    pub timeout: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            rand_skip: 0,
            seed: None,
            output_labels: true,
            timeout: None,
        }
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        ensure_config!(self.batch_size > 0, "batch_size must be positive");
        if let Some(timeout) = self.timeout {
            ensure_config!(!timeout.is_zero(), "timeout must be non-zero when set");
        }
        Ok(())
    }
}

/// Builder for PipelineConfig with method chaining
#[derive(Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    pub fn rand_skip(mut self, skip: u32) -> Self {
        self.config.rand_skip = skip;
        self
    }

    /// Fixes the base seed so the whole random decision stream is reproducible.
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    pub fn output_labels(mut self, output_labels: bool) -> Self {
        self.config.output_labels = output_labels;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> PipelineConfig {
        self.config
    }
}

// ============================================================================
// Flat option surface
// ============================================================================

/// Transform options as they appear in a job file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransformParams {
    pub resize_size: Option<u32>,
    pub resize_short_side_min: Option<u32>,
    pub resize_short_side_max: Option<u32>,
    pub crop_size: Option<u32>,
    pub crop_height: Option<u32>,
    pub crop_width: Option<u32>,
    pub mirror: bool,
    pub mean_file: Option<String>,
    pub mean_value: Vec<f32>,
    pub scale: Option<f32>,
    pub min_height: Option<u32>,
    pub min_width: Option<u32>,
    pub height_multiple: Option<u32>,
    pub width_multiple: Option<u32>,
    pub phase: Phase,
    pub num_classes: Option<u32>,
}

impl TransformParams {
    /// Resolves the flat options into a validated [`TransformConfig`].
    ///
    /// Crop selection: `crop_size` or `crop_height`/`crop_width` give a fixed
    /// crop; otherwise `min_height`/`min_width` select aspect-ratio cropping.
    pub fn into_config(self) -> Result<TransformConfig> {
        let resize = match (
            self.resize_size,
            self.resize_short_side_min,
            self.resize_short_side_max,
        ) {
            (None, None, None) => ResizeMode::None,
            (Some(size), None, None) => ResizeMode::FixedSquare(size),
            (None, Some(min), Some(max)) => ResizeMode::ShortSideRange { min, max },
            (Some(_), _, _) => {
                return Err(PipelineError::config(
                    "resize_size cannot be combined with resize_short_side_min/max",
                ))
            }
            _ => {
                return Err(PipelineError::config(
                    "resize_short_side_min and resize_short_side_max must be given together",
                ))
            }
        };

        let crop = match (self.crop_size, self.crop_height, self.crop_width) {
            (Some(size), None, None) => CropMode::FixedSquare(size),
            (Some(_), _, _) => {
                return Err(PipelineError::config(
                    "crop_size and crop_height/crop_width can not both be set",
                ))
            }
            (None, Some(height), Some(width)) => CropMode::FixedRect { height, width },
            (None, Some(_), None) | (None, None, Some(_)) => {
                return Err(PipelineError::config(
                    "crop_height and crop_width must be given together",
                ))
            }
            (None, None, None) if self.min_height.is_some() || self.min_width.is_some() => {
                CropMode::AspectRatioDerived
            }
            (None, None, None) => CropMode::None,
        };

        let normalization = match (self.mean_file, self.mean_value.is_empty()) {
            (Some(_), false) => {
                return Err(PipelineError::config(
                    "mean_file and mean_value cannot both be set",
                ))
            }
            (Some(path), true) => NormalizationMode::MeanFile(MeanTensor::load(path)?),
            (None, false) => NormalizationMode::MeanValues(self.mean_value),
            (None, true) => NormalizationMode::None,
        };

        let config = TransformConfig {
            resize,
            crop,
            mirror: self.mirror,
            normalization,
            scale: self.scale.unwrap_or(1.0),
            phase: self.phase,
            constraints: GeometryConstraints {
                min_height: self.min_height.unwrap_or(0),
                min_width: self.min_width.unwrap_or(0),
                height_multiple: self.height_multiple.unwrap_or(1),
                width_multiple: self.width_multiple.unwrap_or(1),
            },
            num_classes: self.num_classes,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Pipeline options as they appear in a job file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineParams {
    pub batch_size: usize,
    pub rand_skip: u32,
    pub seed: Option<u64>,
    pub output_labels: bool,
    pub timeout_ms: Option<u64>,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            batch_size: 1,
            rand_skip: 0,
            seed: None,
            output_labels: true,
            timeout_ms: None,
        }
    }
}

impl PipelineParams {
    pub fn into_config(self) -> Result<PipelineConfig> {
        let config = PipelineConfig {
            batch_size: self.batch_size,
            rand_skip: self.rand_skip,
            seed: self.seed,
            output_labels: self.output_labels,
            timeout: self.timeout_ms.map(Duration::from_millis),
        };
        config.validate()?;
        Ok(config)
    }
}

/// A job file: `{"transform": {...}, "pipeline": {...}}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobParams {
    pub transform: TransformParams,
    pub pipeline: PipelineParams,
}

impl JobParams {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| PipelineError::config(format!("job file: {}", e)))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        Self::from_json_str(&text)
    }

    pub fn into_configs(self) -> Result<(TransformConfig, PipelineConfig)> {
        Ok((self.transform.into_config()?, self.pipeline.into_config()?))
    }
}
