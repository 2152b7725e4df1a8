//! Image/label transformer.
//!
//! Every call runs the same fixed sequence on one item:
//!
//! ```text
//! resize ──► crop offset ──► mirror coin ──► normalize + scale
//!   │             │               │
//!   └─ labels: nearest-neighbor   └─ labels: same offset, same flip
//! ```
//!
//! Random draws (short-side length, crop offsets, mirror coin) happen in that
//! order and only in the training phase, so a seeded RNG reproduces the
//! whole decision sequence. Output is planar `[C, H, W]` f32 written into a
//! caller-provided slot; labels go to a `[H, W]` slot.

use crate::codec::{Codec, RawImage};
use crate::config::{CropMode, NormalizationMode, Phase, ResizeMode, TransformConfig};
use crate::error::{ensure_config, PipelineError, Result};
use crate::geometry::{plan_from_aspect_ratio, CropGeometry};
use crate::label_map::{difficult_sentinel, resize_nearest, DIFFICULT_LABEL};
use crate::record::Record;
use rand::Rng;
use std::borrow::Cow;
use std::sync::Arc;

/// Pixels of one item as the transformer receives them.
#[derive(Debug, Clone, Copy)]
pub enum ImageSource<'a> {
    /// A raw (not codec-encoded) record, planar bytes or floats.
    Record(&'a Record),
    /// A decoded image, interleaved.
    Decoded(&'a RawImage),
}

impl ImageSource<'_> {
    pub fn channels(&self) -> u32 {
        match self {
            ImageSource::Record(r) => r.channels,
            ImageSource::Decoded(img) => img.channels,
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            ImageSource::Record(r) => r.height,
            ImageSource::Decoded(img) => img.height,
        }
    }

    pub fn width(&self) -> u32 {
        match self {
            ImageSource::Record(r) => r.width,
            ImageSource::Decoded(img) => img.width,
        }
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.height() as f64 / self.width() as f64
    }
}

/// Decisions taken by one [`Transformer::apply`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformOutcome {
    /// Source size after the resize step.
    pub source_height: u32,
    pub source_width: u32,
    pub h_off: u32,
    pub w_off: u32,
    pub mirrored: bool,
}

enum Pixels<'a> {
    Planar(&'a [u8]),
    PlanarFloat(&'a [f32]),
    Interleaved(Cow<'a, RawImage>),
}

/// Item after the resize step.
struct Resized<'a> {
    channels: usize,
    height: usize,
    width: usize,
    pixels: Pixels<'a>,
    labels: Option<Cow<'a, [i32]>>,
}

pub struct Transformer {
    config: TransformConfig,
    codec: Arc<dyn Codec>,
    /// Replacement for difficult labels, when remapping is enabled.
    sentinel: Option<i32>,
}

impl Transformer {
    pub fn new(config: TransformConfig, codec: Arc<dyn Codec>) -> Result<Self> {
        config.validate()?;
        ensure_config!(
            !(matches!(config.resize, ResizeMode::ShortSideRange { .. })
                && config.crop == CropMode::None),
            "short-side resize yields per-item sizes and needs a crop to form uniform batches"
        );
        let sentinel = config.num_classes.map(difficult_sentinel);
        Ok(Self {
            config,
            codec,
            sentinel,
        })
    }

    pub fn config(&self) -> &TransformConfig {
        &self.config
    }

    /// Output shape for a batch whose first item is `first`.
    ///
    /// Fixed crops ignore the item; aspect-ratio cropping plans from its
    /// ratio; without a crop the output is the (resized) item size.
    pub fn batch_geometry(&self, first: &ImageSource<'_>) -> Result<CropGeometry> {
        if let Some(fixed) = self.config.crop.fixed_geometry() {
            return Ok(fixed);
        }
        match self.config.crop {
            CropMode::AspectRatioDerived => {
                plan_from_aspect_ratio(first.aspect_ratio(), &self.config.constraints)
            }
            _ => Ok(match self.config.resize {
                ResizeMode::FixedSquare(size) => CropGeometry::new(size, size),
                _ => CropGeometry::new(first.height(), first.width()),
            }),
        }
    }

    /// Transforms one item into `out_image` (`[C, H, W]`) and, when given,
    /// `out_label` (`[H, W]`), where `H x W` is `geometry`.
    ///
    /// `labels` is row-major over the source image as stored (before resize).
    pub fn apply<R: Rng + ?Sized>(
        &self,
        source: ImageSource<'_>,
        labels: Option<&[i32]>,
        geometry: CropGeometry,
        rng: &mut R,
        out_image: &mut [f32],
        out_label: Option<&mut [f32]>,
    ) -> Result<TransformOutcome> {
        let item = self.resize(source, labels, rng)?;
        let (crop_h, crop_w) = (geometry.height as usize, geometry.width as usize);

        ensure_config!(
            crop_h > 0 && crop_w > 0,
            "output geometry {}x{} is empty",
            crop_h,
            crop_w
        );
        ensure_config!(
            crop_h <= item.height && crop_w <= item.width,
            "crop {}x{} is larger than source {}x{}",
            crop_h,
            crop_w,
            item.height,
            item.width
        );
        if self.config.crop == CropMode::None {
            ensure_config!(
                crop_h == item.height && crop_w == item.width,
                "uncropped item {}x{} does not match batch shape {}x{}",
                item.height,
                item.width,
                crop_h,
                crop_w
            );
        }
        ensure_config!(
            out_image.len() == item.channels * crop_h * crop_w,
            "image slot holds {} values, item needs {}x{}x{}",
            out_image.len(),
            item.channels,
            crop_h,
            crop_w
        );

        // Crop offset.
        let (h_off, w_off) = match self.config.phase {
            Phase::Train if self.config.crop != CropMode::None => (
                rng.random_range(0..=item.height - crop_h),
                rng.random_range(0..=item.width - crop_w),
            ),
            _ => ((item.height - crop_h) / 2, (item.width - crop_w) / 2),
        };

        // Mirror coin.
        let mirrored =
            self.config.mirror && self.config.phase == Phase::Train && rng.random_bool(0.5);

        let means = self.channel_means(&item)?;
        match &item.pixels {
            Pixels::Planar(data) => {
                let (h, w) = (item.height, item.width);
                self.write_image(&item, &means, geometry, h_off, w_off, mirrored, out_image, |c, y, x| {
                    data[(c * h + y) * w + x] as f32
                })
            }
            Pixels::PlanarFloat(data) => {
                let (h, w) = (item.height, item.width);
                self.write_image(&item, &means, geometry, h_off, w_off, mirrored, out_image, |c, y, x| {
                    data[(c * h + y) * w + x]
                })
            }
            Pixels::Interleaved(img) => {
                self.write_image(&item, &means, geometry, h_off, w_off, mirrored, out_image, |c, y, x| {
                    img.at(c, y, x) as f32
                })
            }
        }

        if let Some(out_label) = out_label {
            self.write_labels(&item, geometry, h_off, w_off, mirrored, out_label)?;
        }

        Ok(TransformOutcome {
            source_height: item.height as u32,
            source_width: item.width as u32,
            h_off: h_off as u32,
            w_off: w_off as u32,
            mirrored,
        })
    }

    // ========================================================================
    // Resize
    // ========================================================================

    fn resize<'a, R: Rng + ?Sized>(
        &self,
        source: ImageSource<'a>,
        labels: Option<&'a [i32]>,
        rng: &mut R,
    ) -> Result<Resized<'a>> {
        let (height, width) = (source.height(), source.width());
        let target = match self.config.resize {
            ResizeMode::None => None,
            ResizeMode::FixedSquare(size) => Some((size, size)),
            ResizeMode::ShortSideRange { min, max } => {
                let short = match self.config.phase {
                    Phase::Train => rng.random_range(min..=max),
                    Phase::Test => min + (max - min) / 2,
                };
                Some(short_side_dims(height, width, short))
            }
        }
        .filter(|&dims| dims != (height, width));

        let pixels = match source {
            ImageSource::Record(record) => {
                if record.encoded {
                    return Err(PipelineError::Record(
                        "encoded record must be decoded before transforming".to_string(),
                    ));
                }
                match target {
                    None if !record.data.is_empty() => Pixels::Planar(&record.data),
                    None => Pixels::PlanarFloat(&record.float_data),
                    Some(_) if record.data.is_empty() => {
                        return Err(PipelineError::config(
                            "float-sample records cannot be resized",
                        ))
                    }
                    Some((h, w)) => {
                        let img = RawImage::from_planar(record.channels, height, width, &record.data)?;
                        Pixels::Interleaved(Cow::Owned(self.codec.resize(&img, h, w)?))
                    }
                }
            }
            ImageSource::Decoded(img) => match target {
                None => Pixels::Interleaved(Cow::Borrowed(img)),
                Some((h, w)) => Pixels::Interleaved(Cow::Owned(self.codec.resize(img, h, w)?)),
            },
        };

        let (out_h, out_w) = target.unwrap_or((height, width));
        let labels = match (labels, target) {
            (None, _) => None,
            (Some(l), None) => Some(Cow::Borrowed(l)),
            (Some(l), Some((h, w))) => Some(Cow::Owned(resize_nearest(l, height, width, h, w)?)),
        };

        Ok(Resized {
            channels: source.channels() as usize,
            height: out_h as usize,
            width: out_w as usize,
            pixels,
            labels,
        })
    }

    // ========================================================================
    // Normalize
    // ========================================================================

    /// Per-channel mean values, or `None` for no/per-pixel normalization.
    fn channel_means(&self, item: &Resized<'_>) -> Result<Option<Vec<f32>>> {
        match &self.config.normalization {
            NormalizationMode::None => Ok(None),
            NormalizationMode::MeanFile(mean) => {
                ensure_config!(
                    mean.channels as usize == item.channels
                        && mean.height as usize == item.height
                        && mean.width as usize == item.width,
                    "mean tensor {}x{}x{} does not match image {}x{}x{}",
                    mean.channels,
                    mean.height,
                    mean.width,
                    item.channels,
                    item.height,
                    item.width
                );
                Ok(None)
            }
            NormalizationMode::MeanValues(values) => {
                ensure_config!(
                    values.len() == 1 || values.len() == item.channels,
                    "specify either 1 mean_value or as many as channels ({}), got {}",
                    item.channels,
                    values.len()
                );
                if values.len() == 1 {
                    Ok(Some(vec![values[0]; item.channels]))
                } else {
                    Ok(Some(values.clone()))
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write_image<F: Fn(usize, usize, usize) -> f32>(
        &self,
        item: &Resized<'_>,
        means: &Option<Vec<f32>>,
        geometry: CropGeometry,
        h_off: usize,
        w_off: usize,
        mirrored: bool,
        out: &mut [f32],
        pixel: F,
    ) {
        let (height, width) = (geometry.height as usize, geometry.width as usize);
        let scale = self.config.scale;
        let mean_file = match &self.config.normalization {
            NormalizationMode::MeanFile(mean) => Some(mean),
            _ => None,
        };
        for c in 0..item.channels {
            for h in 0..height {
                let row = (c * height + h) * width;
                for w in 0..width {
                    let (sy, sx) = (h + h_off, w + w_off);
                    let value = pixel(c, sy, sx);
                    let centered = match (mean_file, means) {
                        (Some(mean), _) => value - mean.at(c, sy, sx),
                        (None, Some(means)) => value - means[c],
                        (None, None) => value,
                    };
                    let col = if mirrored { width - 1 - w } else { w };
                    out[row + col] = centered * scale;
                }
            }
        }
    }

    fn write_labels(
        &self,
        item: &Resized<'_>,
        geometry: CropGeometry,
        h_off: usize,
        w_off: usize,
        mirrored: bool,
        out: &mut [f32],
    ) -> Result<()> {
        let (height, width) = (geometry.height as usize, geometry.width as usize);
        ensure_config!(
            out.len() == height * width,
            "label slot holds {} values, expected {}x{}",
            out.len(),
            height,
            width
        );
        let labels = item
            .labels
            .as_deref()
            .ok_or_else(|| PipelineError::Record("record carries no label map".to_string()))?;
        for h in 0..height {
            for w in 0..width {
                let index = (h + h_off) * item.width + w + w_off;
                ensure_config!(
                    index < labels.len(),
                    "label index {} out of range for {} labels",
                    index,
                    labels.len()
                );
                let label = match (labels[index], self.sentinel) {
                    (DIFFICULT_LABEL, Some(sentinel)) => sentinel,
                    (DIFFICULT_LABEL, None) => {
                        return Err(PipelineError::config(
                            "label 255 (difficult) found but num_classes is not set",
                        ))
                    }
                    (label, _) => label,
                };
                let col = if mirrored { width - 1 - w } else { w };
                out[h * width + col] = label as f32;
            }
        }
        Ok(())
    }
}

/// Aspect-preserving size whose shorter side is `short`.
pub fn short_side_dims(height: u32, width: u32, short: u32) -> (u32, u32) {
    if height > width {
        let h = (height as f64 / width as f64 * short as f64).ceil() as u32;
        (h, short)
    } else {
        let w = (width as f64 / height as f64 * short as f64).ceil() as u32;
        (short, w)
    }
}
