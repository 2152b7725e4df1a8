use anyhow::{anyhow, Result};
use std::collections::HashMap;
use tch::{Device, Tensor};

/// The `MiniBatch` struct is the model-facing view of a prepared batch.
///
/// It holds a map from feature names to batched tensors, each with shape
/// `[batch_size, ...]` except `"size"`, which describes the batch as a whole.
///
/// # Features
/// For a batch of 10 RGB items cropped to 321x321:
/// - `"image"` -> shape `[10, 3, 321, 321]` (f32, mean-subtracted and scaled)
/// - `"label"` -> shape `[10, 1, 321, 321]` (f32 class ids; absent when labels are off)
/// - `"size"`  -> shape `[2]` (i64 `[height, width]` of the crop)
#[derive(Debug)]
pub struct MiniBatch {
    pub tensors: HashMap<String, Tensor>,
}

impl MiniBatch {
    /// Returns the number of items in the batch.
    pub fn batch_size(&self) -> Result<i64> {
        self.get("image").map(|t| t.size()[0])
    }

    /// Returns a reference to the tensor for a given feature key.
    pub fn get(&self, feature: &str) -> Result<&Tensor> {
        self.tensors
            .get(feature)
            .ok_or_else(|| anyhow!("Feature '{}' not found in mini-batch", feature))
    }

    /// Returns an iterator over all feature keys in the batch.
    pub fn features(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    /// Transfers all tensors to the target device (CPU/GPU)
    pub fn to_device(&self, device: Device) -> Self {
        Self {
            tensors: self
                .tensors
                .iter()
                .map(|(feature_name, tensor)| (feature_name.clone(), tensor.to_device(device)))
                .collect(),
        }
    }
}

#[cfg(test)]
mod minibatch_test {
    use crate::batch::Batch;
    use crate::geometry::CropGeometry;
    use anyhow::Result;
    use tch::Device;

    #[test]
    fn test_minibatch_features() -> Result<()> {
        let mut batch = Batch::new(2, 1, CropGeometry::new(1, 2), true);
        for i in 0..2 {
            let (image, label) = batch.slot_mut(i)?;
            image.copy_from_slice(&[i as f32, 0.5]);
            label.unwrap().copy_from_slice(&[3.0, 21.0]);
        }
        let mb = batch.to_minibatch();

        let mut features: Vec<&str> = mb.features().collect();
        features.sort_unstable();
        assert_eq!(features, vec!["image", "label", "size"]);

        let images: Vec<f32> = mb.get("image")?.flatten(0, -1).try_into()?;
        assert_eq!(images, vec![0.0, 0.5, 1.0, 0.5]);
        let labels: Vec<f32> = mb.get("label")?.flatten(0, -1).try_into()?;
        assert_eq!(labels, vec![3.0, 21.0, 3.0, 21.0]);
        assert!(mb.get("missing").is_err());
        Ok(())
    }

    #[test]
    fn test_minibatch_without_labels() -> Result<()> {
        let mb = Batch::new(4, 3, CropGeometry::new(2, 2), false).to_minibatch();
        assert_eq!(mb.batch_size()?, 4);
        assert!(mb.get("label").is_err());
        Ok(())
    }

    #[test]
    fn test_minibatch_to_device() -> Result<()> {
        let cpu_batch = Batch::new(2, 3, CropGeometry::new(2, 2), true).to_minibatch();
        let target_device = Device::cuda_if_available();
        let moved_batch = cpu_batch.to_device(target_device);

        for feature in moved_batch.features() {
            assert_eq!(moved_batch.get(feature)?.device(), target_device);
            assert_eq!(cpu_batch.get(feature)?.device(), Device::Cpu);
        }
        Ok(())
    }
}
