//! Image bytestream codec.
//!
//! Pixel grids move through the pipeline as [`RawImage`]s (interleaved
//! `[H, W, C]` bytes). The [`Codec`] trait covers decode, encode and the
//! bilinear resize primitive; [`ImageCodec`] implements it on top of the
//! `image` crate.

use crate::error::{ensure_config, PipelineError, Result};
use image::{imageops, imageops::FilterType, DynamicImage, GrayImage, ImageFormat, RgbImage};
use std::io::Cursor;

/// Decoded 8-bit pixel grid, interleaved `[H, W, C]`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawImage {
    pub channels: u32,
    pub height: u32,
    pub width: u32,
    pub data: Vec<u8>,
}

impl RawImage {
    pub fn new(channels: u32, height: u32, width: u32, data: Vec<u8>) -> Result<Self> {
        let expected = channels as usize * height as usize * width as usize;
        if data.len() != expected {
            return Err(PipelineError::Decode(format!(
                "pixel buffer has {} bytes, expected {} ({}x{}x{})",
                data.len(),
                expected,
                channels,
                height,
                width
            )));
        }
        Ok(Self {
            channels,
            height,
            width,
            data,
        })
    }

    /// Builds an image from planar `[C, H, W]` bytes, as stored in raw records.
    pub fn from_planar(channels: u32, height: u32, width: u32, planar: &[u8]) -> Result<Self> {
        let (c, h, w) = (channels as usize, height as usize, width as usize);
        if planar.len() != c * h * w {
            return Err(PipelineError::Record(format!(
                "planar buffer has {} bytes, expected {}",
                planar.len(),
                c * h * w
            )));
        }
        let mut data = vec![0u8; planar.len()];
        for ch in 0..c {
            for y in 0..h {
                for x in 0..w {
                    data[(y * w + x) * c + ch] = planar[(ch * h + y) * w + x];
                }
            }
        }
        Self::new(channels, height, width, data)
    }

    /// Sample at channel `c`, row `h`, column `w`.
    #[inline]
    pub fn at(&self, c: usize, h: usize, w: usize) -> u8 {
        self.data[(h * self.width as usize + w) * self.channels as usize + c]
    }

    /// Converts between grayscale and RGB. Same channel count is a no-op.
    pub fn with_channels(self, channels: u32) -> Result<Self> {
        if channels == self.channels {
            return Ok(self);
        }
        let converted = match channels {
            1 => DynamicImage::ImageRgb8(self.to_rgb()?).to_luma8().into_raw(),
            3 => DynamicImage::ImageLuma8(self.to_gray()?).to_rgb8().into_raw(),
            other => {
                return Err(PipelineError::config(format!(
                    "cannot convert {}-channel image to {} channels",
                    self.channels, other
                )))
            }
        };
        Self::new(channels, self.height, self.width, converted)
    }

    fn to_gray(&self) -> Result<GrayImage> {
        GrayImage::from_raw(self.width, self.height, self.data.clone())
            .ok_or_else(|| PipelineError::Decode("not a grayscale buffer".to_string()))
    }

    fn to_rgb(&self) -> Result<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.data.clone())
            .ok_or_else(|| PipelineError::Decode("not an RGB buffer".to_string()))
    }

    fn to_dynamic(&self) -> Result<DynamicImage> {
        match self.channels {
            1 => Ok(DynamicImage::ImageLuma8(self.to_gray()?)),
            3 => Ok(DynamicImage::ImageRgb8(self.to_rgb()?)),
            other => Err(PipelineError::config(format!(
                "unsupported channel count {}",
                other
            ))),
        }
    }
}

/// Opaque image codec used by the pipeline and dataset construction.
pub trait Codec: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<RawImage>;

    fn encode(&self, image: &RawImage, format: ImageFormat) -> Result<Vec<u8>>;

    /// Resizes to exactly `height x width` with bilinear interpolation.
    fn resize(&self, image: &RawImage, height: u32, width: u32) -> Result<RawImage>;
}

/// [`Codec`] backed by the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCodec;

impl Codec for ImageCodec {
    fn decode(&self, bytes: &[u8]) -> Result<RawImage> {
        let img = image::load_from_memory(bytes).map_err(|e| PipelineError::Decode(e.to_string()))?;
        let (width, height) = (img.width(), img.height());
        match img {
            DynamicImage::ImageLuma8(gray) => RawImage::new(1, height, width, gray.into_raw()),
            other => RawImage::new(3, height, width, other.to_rgb8().into_raw()),
        }
    }

    fn encode(&self, image: &RawImage, format: ImageFormat) -> Result<Vec<u8>> {
        let mut buf = Cursor::new(Vec::new());
        image
            .to_dynamic()?
            .write_to(&mut buf, format)
            .map_err(|e| PipelineError::Decode(format!("encode failed: {}", e)))?;
        Ok(buf.into_inner())
    }

    fn resize(&self, image: &RawImage, height: u32, width: u32) -> Result<RawImage> {
        ensure_config!(
            height > 0 && width > 0,
            "resize target must be positive (got {}x{})",
            height,
            width
        );
        if image.height == height && image.width == width {
            return Ok(image.clone());
        }
        let data = match image.to_dynamic()? {
            DynamicImage::ImageLuma8(gray) => {
                imageops::resize(&gray, width, height, FilterType::Triangle).into_raw()
            }
            other => imageops::resize(&other.to_rgb8(), width, height, FilterType::Triangle)
                .into_raw(),
        };
        RawImage::new(image.channels, height, width, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(channels: u32, height: u32, width: u32) -> RawImage {
        let data = (0..channels * height * width).map(|i| (i % 251) as u8).collect();
        RawImage::new(channels, height, width, data).unwrap()
    }

    #[test]
    fn test_png_preserves_pixels() -> Result<()> {
        let codec = ImageCodec;
        for channels in [1, 3] {
            let img = gradient(channels, 5, 7);
            let decoded = codec.decode(&codec.encode(&img, ImageFormat::Png)?)?;
            assert_eq!(decoded, img);
        }
        Ok(())
    }

    #[test]
    fn test_jpeg_keeps_dimensions() -> Result<()> {
        let codec = ImageCodec;
        let img = gradient(3, 16, 24);
        let decoded = codec.decode(&codec.encode(&img, ImageFormat::Jpeg)?)?;
        assert_eq!((decoded.channels, decoded.height, decoded.width), (3, 16, 24));
        Ok(())
    }

    #[test]
    fn test_decode_garbage_is_decode_error() {
        let err = ImageCodec.decode(b"definitely not an image").unwrap_err();
        assert!(matches!(err, PipelineError::Decode(_)));
    }

    #[test]
    fn test_resize_shape_and_constant() -> Result<()> {
        let img = RawImage::new(3, 4, 6, vec![80; 72])?;
        let resized = ImageCodec.resize(&img, 9, 3)?;
        assert_eq!((resized.height, resized.width), (9, 3));
        assert!(resized.data.iter().all(|&v| v == 80));
        assert!(ImageCodec.resize(&img, 0, 3).unwrap_err().is_configuration());
        Ok(())
    }

    #[test]
    fn test_planar_to_interleaved() -> Result<()> {
        // Two channels would be unusual for the codec, but layout conversion is generic.
        let planar = [1, 2, 3, 4, 10, 20, 30, 40];
        let img = RawImage::from_planar(2, 2, 2, &planar)?;
        assert_eq!(img.data, vec![1, 10, 2, 20, 3, 30, 4, 40]);
        assert_eq!(img.at(1, 1, 0), 30);
        Ok(())
    }

    #[test]
    fn test_channel_conversion() -> Result<()> {
        let gray = RawImage::new(1, 1, 2, vec![7, 200])?;
        let rgb = gray.clone().with_channels(3)?;
        assert_eq!(rgb.data, vec![7, 7, 7, 200, 200, 200]);
        let back = rgb.with_channels(1)?;
        assert_eq!(back, gray);
        Ok(())
    }
}
