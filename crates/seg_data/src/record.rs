use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};

/// One stored training item: an image plus an optional per-pixel label map.
///
/// Pixel payload is exactly one of:
/// - `data` holding either codec-encoded bytes (`encoded = true`) or raw
///   planar bytes in `[C, H, W]` order,
/// - `float_data` holding raw planar samples in `[C, H, W]` order.
///
/// `labels`, when present, is row-major with one entry per pixel
/// (`height * width` entries). `label` is the single-label slot of the wire
/// format and is carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub channels: u32,
    pub height: u32,
    pub width: u32,
    pub data: Vec<u8>,
    pub float_data: Vec<f32>,
    pub label: i32,
    pub labels: Vec<i32>,
    pub encoded: bool,
}

impl Record {
    /// Raw planar byte record.
    pub fn from_bytes(channels: u32, height: u32, width: u32, data: Vec<u8>) -> Self {
        Self {
            channels,
            height,
            width,
            data,
            ..Default::default()
        }
    }

    /// Raw planar float record.
    pub fn from_floats(channels: u32, height: u32, width: u32, float_data: Vec<f32>) -> Self {
        Self {
            channels,
            height,
            width,
            float_data,
            ..Default::default()
        }
    }

    /// Codec-encoded record. Dimensions describe the encoded image.
    pub fn from_encoded(channels: u32, height: u32, width: u32, bytes: Vec<u8>) -> Self {
        Self {
            channels,
            height,
            width,
            data: bytes,
            encoded: true,
            ..Default::default()
        }
    }

    pub fn with_labels(mut self, labels: Vec<i32>) -> Self {
        self.labels = labels;
        self
    }

    pub fn has_labels(&self) -> bool {
        !self.labels.is_empty()
    }

    pub fn pixel_count(&self) -> usize {
        self.height as usize * self.width as usize
    }

    /// Height over width of the stored dimensions.
    pub fn aspect_ratio(&self) -> f64 {
        self.height as f64 / self.width as f64
    }

    /// Checks the payload invariants of the data model.
    pub fn validate(&self) -> Result<()> {
        if self.channels == 0 || self.height == 0 || self.width == 0 {
            return Err(PipelineError::Record(format!(
                "non-positive dimensions {}x{}x{}",
                self.channels, self.height, self.width
            )));
        }
        let has_bytes = !self.data.is_empty();
        let has_floats = !self.float_data.is_empty();
        if has_bytes == has_floats {
            return Err(PipelineError::Record(
                "exactly one of data or float_data must be populated".to_string(),
            ));
        }
        if self.encoded && has_floats {
            return Err(PipelineError::Record(
                "encoded records carry bytes, not float samples".to_string(),
            ));
        }
        if !self.encoded {
            let expected = self.channels as usize * self.pixel_count();
            let actual = if has_bytes {
                self.data.len()
            } else {
                self.float_data.len()
            };
            if actual != expected {
                return Err(PipelineError::Record(format!(
                    "raw payload has {} samples, expected {} ({}x{}x{})",
                    actual, expected, self.channels, self.height, self.width
                )));
            }
        }
        if self.has_labels() && self.labels.len() != self.pixel_count() {
            return Err(PipelineError::Record(format!(
                "label map has {} entries, expected {} ({}x{})",
                self.labels.len(),
                self.pixel_count(),
                self.height,
                self.width
            )));
        }
        Ok(())
    }

    /// Serializes the record into its stored byte form.
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| PipelineError::Record(e.to_string()))
    }

    /// Parses and validates a stored record.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let record: Record =
            bincode::deserialize(bytes).map_err(|e| PipelineError::Record(e.to_string()))?;
        record.validate()?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_record_validates() {
        let record = Record::from_bytes(1, 2, 3, vec![0; 6]).with_labels(vec![1; 6]);
        assert!(record.validate().is_ok());
        assert!(record.has_labels());
        assert!((record.aspect_ratio() - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_payload_exclusivity() {
        let mut record = Record::from_bytes(1, 1, 2, vec![0; 2]);
        record.float_data = vec![0.0; 2];
        assert!(record.validate().is_err());

        let empty = Record {
            channels: 1,
            height: 1,
            width: 1,
            ..Default::default()
        };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_size_mismatches_rejected() {
        assert!(Record::from_floats(3, 2, 2, vec![0.0; 11]).validate().is_err());
        let bad_labels = Record::from_bytes(1, 2, 2, vec![0; 4]).with_labels(vec![0; 3]);
        assert!(bad_labels.validate().is_err());
        // Encoded payload length is unrelated to the pixel count.
        let encoded = Record::from_encoded(3, 10, 10, vec![1, 2, 3]).with_labels(vec![0; 100]);
        assert!(encoded.validate().is_ok());
    }

    #[test]
    fn test_wire_encoding_preserves_fields() -> anyhow::Result<()> {
        let mut record = Record::from_encoded(3, 4, 5, vec![9, 8, 7]).with_labels(vec![21; 20]);
        record.label = 4;
        let bytes = record.encode()?;
        assert_eq!(Record::decode(&bytes)?, record);
        assert!(Record::decode(&bytes[..bytes.len() / 2]).is_err());
        Ok(())
    }
}
