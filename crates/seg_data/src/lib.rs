//! Training-data preparation for semantic segmentation.
//!
//! Records (encoded image + per-pixel label grid) are read from a key-ordered
//! store, transformed (resize, crop, mirror, mean normalization) with image
//! and labels kept in lockstep, and assembled into fixed-shape batches by a
//! double-buffered background producer.
//!
//! ```text
//! store ─► Record ─► Codec ─► Transformer ─► Batch (filling) ══handoff══► Batch (active) ─► MiniBatch
//! ```
//!
//! ```text
//! src/
//! ├── error.rs        → PipelineError, Result
//! ├── record.rs       → Record data type + wire encoding
//! ├── store/          → RecordStore / Cursor / Transaction; FileStore, MemoryStore
//! ├── codec.rs        → Codec trait, RawImage, ImageCodec
//! ├── label_map.rs    → label grid parsing, difficult-pixel remap, nearest-neighbor resize
//! ├── geometry.rs     → CropGeometry, aspect-ratio crop planning
//! ├── config.rs       → TransformConfig, PipelineConfig, flat job-file params
//! ├── transformer.rs  → resize → crop → mirror → normalize
//! ├── batch.rs        → reusable batch buffers
//! ├── minibatch.rs    → named tch tensors
//! ├── pipeline.rs     → PrefetchPipeline
//! ├── builder.rs      → dataset construction
//! └── telemetry.rs    → tracing subscriber setup
//! ```

pub mod batch;
pub mod builder;
pub mod codec;
pub mod config;
pub mod error;
pub mod geometry;
pub mod label_map;
pub mod minibatch;
pub mod pipeline;
pub mod record;
pub mod store;
pub mod telemetry;
pub mod transformer;

pub use batch::Batch;
pub use codec::{Codec, ImageCodec, RawImage};
pub use config::{
    CropMode, MeanTensor, NormalizationMode, Phase, PipelineConfig, ResizeMode, TransformConfig,
};
pub use error::{PipelineError, Result};
pub use geometry::{plan_from_aspect_ratio, CropGeometry, GeometryConstraints};
pub use minibatch::MiniBatch;
pub use pipeline::{PipelineState, PrefetchPipeline};
pub use record::Record;
pub use store::{Cursor, FileStore, MemoryStore, OpenMode, RecordStore, Transaction};
pub use transformer::{ImageSource, TransformOutcome, Transformer};
