//! src/pipeline.rs
//!
//! Double-buffered prefetch pipeline.
//!
//! Exactly two [`Batch`] buffers exist. The consumer holds the *active* one;
//! a single background producer thread fills the other. Ownership moves
//! through two single-slot channels:
//!
//! ```text
//!            task channel (buffer, batch index)
//!  consumer ───────────────────────────────────► producer thread
//!     ▲                                               │ cursor → decode →
//!     │      output channel (filled buffer)           │ transform × N
//!     └───────────────────────────────────────────────┘
//! ```
//!
//! `next_batch` waits for the filled buffer, swaps it in as active, and
//! immediately hands the previous active buffer back to the producer, so the
//! next batch is prepared while the caller works on this one. A buffer is
//! never reachable from both sides at once.
//!
//! # Ordering
//! Items are read in cursor order and the cursor wraps to the first record
//! when exhausted, so the pipeline never runs dry. With aspect-ratio cropping
//! the first item of each batch fixes the batch shape; records should be
//! stored grouped by aspect ratio or later items may be smaller than the crop.
//!
//! # Determinism
//! The producer reseeds its RNG at the start of every batch with
//! `base_seed + batch_index`, so a fixed [`PipelineConfig::seed`] reproduces
//! every resize, crop and mirror decision.

use crate::batch::Batch;
use crate::codec::{Codec, ImageCodec, RawImage};
use crate::config::{CropMode, PipelineConfig, TransformConfig};
use crate::error::{PipelineError, Result};
use crate::geometry::CropGeometry;
use crate::record::Record;
use crate::store::{Cursor, RecordStore};
use crate::transformer::{ImageSource, Transformer};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::mem;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Batches whose timing is logged at `info`; later ones go to `debug`.
const VERBOSE_TIMING_BATCHES: u64 = 10;

/// Handoff state as seen by the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// No production running (halted or shut down).
    Idle,
    /// The producer is writing the next batch.
    Filling,
    /// The next batch is complete and waiting for `next_batch`.
    Ready,
}

/// Work item sent to the producer: a buffer to fill and its batch index.
struct FillTask {
    batch: Batch,
    batch_index: u64,
}

pub struct PrefetchPipeline {
    active: Batch,
    producer: Option<thread::JoinHandle<()>>,
    task_tx: Option<Sender<FillTask>>,
    output_rx: Receiver<Result<Batch>>,
    in_flight: bool,
    next_index: u64,
    served: u64,
    base_seed: u64,
    timeout: Option<Duration>,
    halted: Option<String>,
}

impl PrefetchPipeline {
    /// Starts a pipeline over `store` using the `image` crate codec.
    pub fn new<S>(store: &S, transform: TransformConfig, config: PipelineConfig) -> Result<Self>
    where
        S: RecordStore + ?Sized,
    {
        Self::with_codec(store, transform, config, Arc::new(ImageCodec))
    }

    /// Starts a pipeline and launches production of the first batch.
    ///
    /// The first record (after the random skip) fixes the channel count and
    /// the initial buffer shape.
    pub fn with_codec<S>(
        store: &S,
        transform: TransformConfig,
        config: PipelineConfig,
        codec: Arc<dyn Codec>,
    ) -> Result<Self>
    where
        S: RecordStore + ?Sized,
    {
        config.validate()?;
        let transformer = Transformer::new(transform, codec.clone())?;
        let cursor = store.cursor()?;
        if cursor.is_empty() {
            return Err(PipelineError::store("<cursor>", "record store holds no records"));
        }

        let base_seed = config.seed.unwrap_or_else(|| rand::rng().random());
        let mut producer = Producer {
            cursor,
            codec,
            transformer,
            channels: 0,
            output_labels: config.output_labels,
            base_seed,
            batches_done: 0,
        };

        if config.rand_skip > 0 {
            let skip = StdRng::seed_from_u64(base_seed).random_range(0..config.rand_skip);
            info!("Skipping first {} data points", skip);
            for _ in 0..skip {
                producer.advance()?;
            }
        }

        let (channels, geometry) = producer.initial_shape()?;
        producer.channels = channels;
        info!(
            channels,
            height = geometry.height,
            width = geometry.width,
            batch_size = config.batch_size,
            "Reshape batch buffers"
        );

        let active = Batch::new(config.batch_size, channels as usize, geometry, config.output_labels);
        let filling = active.clone();

        let (task_tx, task_rx) = bounded::<FillTask>(1);
        let (output_tx, output_rx) = bounded::<Result<Batch>>(1);
        let handle = thread::Builder::new()
            .name("seg-prefetch".to_string())
            .spawn(move || producer.run(task_rx, output_tx))
            .map_err(|e| PipelineError::Producer(format!("failed to spawn producer thread: {}", e)))?;

        let mut pipeline = Self {
            active,
            producer: Some(handle),
            task_tx: Some(task_tx),
            output_rx,
            in_flight: false,
            next_index: 0,
            served: 0,
            base_seed,
            timeout: config.timeout,
            halted: None,
        };
        pipeline.launch(filling)?;
        Ok(pipeline)
    }

    /// Blocks until the batch in production is complete, makes it the active
    /// buffer and starts filling the previous active buffer.
    pub fn next_batch(&mut self) -> Result<&Batch> {
        if let Some(reason) = &self.halted {
            return Err(PipelineError::Producer(format!("pipeline halted: {}", reason)));
        }
        let received = match self.timeout {
            Some(timeout) => match self.output_rx.recv_timeout(timeout) {
                Ok(result) => result,
                // The producer keeps running; a later call may still succeed.
                Err(RecvTimeoutError::Timeout) => {
                    return Err(PipelineError::Producer(format!(
                        "no batch within {:?}",
                        timeout
                    )))
                }
                Err(RecvTimeoutError::Disconnected) => return Err(self.halt(producer_exited())),
            },
            None => match self.output_rx.recv() {
                Ok(result) => result,
                Err(_) => return Err(self.halt(producer_exited())),
            },
        };
        let filled = match received {
            Ok(batch) => batch,
            Err(e) => return Err(self.halt(e)),
        };
        self.in_flight = false;
        self.served += 1;

        let recycled = mem::replace(&mut self.active, filled);
        if let Err(e) = self.launch(recycled) {
            // The batch in hand is still valid; the error surfaces on the next call.
            self.halted = Some(e.to_string());
        }
        Ok(&self.active)
    }

    /// Converts the next batch into named tensors.
    pub fn next_minibatch(&mut self) -> Result<crate::minibatch::MiniBatch> {
        self.next_batch().map(Batch::to_minibatch)
    }

    pub fn state(&self) -> PipelineState {
        if !self.in_flight {
            PipelineState::Idle
        } else if self.output_rx.is_empty() {
            PipelineState::Filling
        } else {
            PipelineState::Ready
        }
    }

    /// Geometry of the active batch.
    pub fn geometry(&self) -> CropGeometry {
        self.active.geometry()
    }

    pub fn channels(&self) -> usize {
        self.active.channels()
    }

    pub fn base_seed(&self) -> u64 {
        self.base_seed
    }

    /// Number of batches handed to the consumer so far.
    pub fn batches_served(&self) -> u64 {
        self.served
    }

    /// Waits for the outstanding producer task to finish and stops the thread.
    pub fn shutdown(&mut self) {
        self.task_tx.take();
        if let Some(handle) = self.producer.take() {
            if handle.join().is_err() {
                warn!("prefetch producer panicked");
            }
        }
        self.in_flight = false;
        self.halted.get_or_insert_with(|| "pipeline shut down".to_string());
    }

    fn launch(&mut self, batch: Batch) -> Result<()> {
        let task = FillTask {
            batch,
            batch_index: self.next_index,
        };
        let tx = self
            .task_tx
            .as_ref()
            .ok_or_else(|| PipelineError::Producer("pipeline shut down".to_string()))?;
        tx.send(task).map_err(|_| producer_exited())?;
        self.next_index += 1;
        self.in_flight = true;
        Ok(())
    }

    fn halt(&mut self, error: PipelineError) -> PipelineError {
        self.in_flight = false;
        self.halted = Some(error.to_string());
        error
    }
}

fn producer_exited() -> PipelineError {
    PipelineError::Producer("producer thread exited".to_string())
}

impl Drop for PrefetchPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// Producer
// ============================================================================

/// State owned by the background thread: cursor, codec and RNG seeding.
struct Producer {
    cursor: Box<dyn Cursor>,
    codec: Arc<dyn Codec>,
    transformer: Transformer,
    channels: u32,
    output_labels: bool,
    base_seed: u64,
    batches_done: u64,
}

impl Producer {
    fn run(mut self, task_rx: Receiver<FillTask>, output_tx: Sender<Result<Batch>>) {
        for task in task_rx {
            let result = self.fill(task.batch, task.batch_index);
            if output_tx.send(result).is_err() {
                break;
            }
        }
    }

    /// Channel count and buffer shape derived from the current record.
    fn initial_shape(&mut self) -> Result<(u32, CropGeometry)> {
        let record = self.read_record()?;
        let decoded = self.decode(&record)?;
        let source = source_of(&record, decoded.as_ref());
        let geometry = match self.transformer.config().crop {
            CropMode::AspectRatioDerived => self.transformer.config().constraints.initial_geometry(),
            _ => self.transformer.batch_geometry(&source)?,
        };
        Ok((source.channels(), geometry))
    }

    fn fill(&mut self, mut batch: Batch, batch_index: u64) -> Result<Batch> {
        let batch_start = Instant::now();
        let mut read_time = Duration::ZERO;
        let mut transform_time = Duration::ZERO;
        let mut rng = StdRng::seed_from_u64(self.base_seed.wrapping_add(batch_index));

        for item in 0..batch.batch_size() {
            let timer = Instant::now();
            let record = self.read_record()?;
            let decoded = self.decode(&record)?;
            let source = source_of(&record, decoded.as_ref());

            if item == 0 {
                let geometry = self.transformer.batch_geometry(&source)?;
                if self.transformer.config().crop == CropMode::AspectRatioDerived {
                    debug!(
                        aspect_ratio = source.aspect_ratio(),
                        height = geometry.height,
                        width = geometry.width,
                        "aspect-ratio crop geometry"
                    );
                }
                batch.reshape(self.channels as usize, geometry);
            }
            read_time += timer.elapsed();

            let timer = Instant::now();
            let geometry = batch.geometry();
            let labels = self.output_labels.then_some(record.labels.as_slice());
            let (image_slot, label_slot) = batch.slot_mut(item)?;
            self.transformer
                .apply(source, labels, geometry, &mut rng, image_slot, label_slot)?;
            transform_time += timer.elapsed();

            self.advance()?;
        }

        let total_ms = batch_start.elapsed().as_secs_f64() * 1000.0;
        let read_ms = read_time.as_secs_f64() * 1000.0;
        let transform_ms = transform_time.as_secs_f64() * 1000.0;
        if self.batches_done < VERBOSE_TIMING_BATCHES {
            info!(batch_index, total_ms, read_ms, transform_ms, "Prefetch batch");
        } else {
            debug!(batch_index, total_ms, read_ms, transform_ms, "Prefetch batch");
        }
        self.batches_done += 1;
        Ok(batch)
    }

    fn read_record(&self) -> Result<Record> {
        let value = self
            .cursor
            .value()
            .ok_or_else(|| PipelineError::store("<cursor>", "cursor is not positioned on a record"))?;
        Record::decode(value)
    }

    /// Decodes encoded records, converting to the pipeline's channel count
    /// when they disagree.
    fn decode(&self, record: &Record) -> Result<Option<RawImage>> {
        if !record.encoded {
            return Ok(None);
        }
        let image = self.codec.decode(&record.data)?;
        if self.channels != 0 && image.channels != self.channels {
            warn!(
                decoded = image.channels,
                expected = self.channels,
                "dataset contains encoded images with mixed channel counts; \
                 consider rebuilding it with a uniform color mode"
            );
            return image.with_channels(self.channels).map(Some);
        }
        Ok(Some(image))
    }

    /// Moves to the next record, wrapping to the first one when exhausted.
    fn advance(&mut self) -> Result<()> {
        self.cursor.next()?;
        if !self.cursor.valid() {
            debug!("Restarting data prefetching from start.");
            self.cursor.seek_to_first()?;
        }
        Ok(())
    }
}

fn source_of<'a>(record: &'a Record, decoded: Option<&'a RawImage>) -> ImageSource<'a> {
    match decoded {
        Some(image) => ImageSource::Decoded(image),
        None => ImageSource::Record(record),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Phase;
    use crate::store::MemoryStore;

    fn store_of(count: u8, size: u32) -> MemoryStore {
        let records = (0..count).map(|i| {
            let area = (size * size) as usize;
            Record::from_bytes(1, size, size, vec![i; area]).with_labels(vec![i as i32; area])
        });
        MemoryStore::from_records(records).unwrap()
    }

    #[test]
    fn test_batches_wrap_around_small_store() -> anyhow::Result<()> {
        let store = store_of(3, 4);
        let transform = TransformConfig::builder().phase(Phase::Test).build();
        let config = PipelineConfig::builder().batch_size(5).seed(1).build();
        let mut pipeline = PrefetchPipeline::new(&store, transform, config)?;

        let first = pipeline.next_batch()?;
        let values: Vec<f32> = (0..5).map(|i| first.image(i)[0]).collect();
        assert_eq!(values, vec![0.0, 1.0, 2.0, 0.0, 1.0]);

        // The second batch continues where the cursor stopped.
        let second = pipeline.next_batch()?;
        let values: Vec<f32> = (0..5).map(|i| second.image(i)[0]).collect();
        assert_eq!(values, vec![2.0, 0.0, 1.0, 2.0, 0.0]);
        assert!(second.label(4).unwrap().iter().all(|&l| l == 0.0));
        Ok(())
    }

    #[test]
    fn test_buffers_alternate() -> anyhow::Result<()> {
        let store = store_of(2, 3);
        let config = PipelineConfig::builder().batch_size(3).seed(5).build();
        let mut pipeline = PrefetchPipeline::new(&store, TransformConfig::default(), config)?;
        let ids: Vec<usize> = (0..4)
            .map(|_| pipeline.next_batch().map(Batch::buffer_id))
            .collect::<Result<_>>()?;
        assert_ne!(ids[0], ids[1]);
        assert_eq!(ids[0], ids[2]);
        assert_eq!(ids[1], ids[3]);
        assert_eq!(pipeline.batches_served(), 4);
        Ok(())
    }

    #[test]
    fn test_empty_store_rejected() {
        let store = MemoryStore::new();
        let err = PrefetchPipeline::new(&store, TransformConfig::default(), PipelineConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::Store { .. }));
    }

    #[test]
    fn test_fatal_error_halts_pipeline() -> anyhow::Result<()> {
        // The second record is smaller than the crop.
        let store = MemoryStore::from_records(vec![
            Record::from_bytes(1, 4, 4, vec![0; 16]),
            Record::from_bytes(1, 2, 2, vec![0; 4]),
        ])?;
        let transform = TransformConfig::builder()
            .crop(CropMode::FixedSquare(3))
            .phase(Phase::Test)
            .build();
        let config = PipelineConfig::builder()
            .batch_size(2)
            .output_labels(false)
            .seed(0)
            .build();
        let mut pipeline = PrefetchPipeline::new(&store, transform, config)?;
        assert!(pipeline.next_batch().unwrap_err().is_configuration());
        assert_eq!(pipeline.state(), PipelineState::Idle);
        assert!(matches!(pipeline.next_batch(), Err(PipelineError::Producer(_))));
        Ok(())
    }

    #[test]
    fn test_shutdown_joins_producer() -> anyhow::Result<()> {
        let store = store_of(2, 2);
        let config = PipelineConfig::builder().batch_size(1).seed(2).build();
        let mut pipeline = PrefetchPipeline::new(&store, TransformConfig::default(), config)?;
        pipeline.next_batch()?;
        pipeline.shutdown();
        assert_eq!(pipeline.state(), PipelineState::Idle);
        assert!(pipeline.next_batch().is_err());
        Ok(())
    }
}
