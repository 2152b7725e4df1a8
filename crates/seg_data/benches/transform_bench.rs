use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::SeedableRng;
use seg_data::{
    CropGeometry, CropMode, ImageCodec, ImageSource, MemoryStore, NormalizationMode, Phase,
    PipelineConfig, PrefetchPipeline, Record, ResizeMode, TransformConfig, Transformer,
};
use std::sync::Arc;

/// Benchmarks for the per-item transform and the prefetch handoff.
///
/// This measures:
/// 1. Transform cost: crop + mirror + mean subtraction on raw records, with
///    and without a short-side resize
/// 2. Pipeline throughput: batches per second through `next_batch`
///
/// To run these, use:
/// ```bash
/// cargo bench --bench transform_bench
/// ```

/// Square source sizes swept by both groups.
const SIZES: [u32; 3] = [128, 256, 512];

const CROP: u32 = 96;

fn make_record(size: u32) -> Record {
    let area = (size * size) as usize;
    let data = (0..3 * area).map(|i| (i % 251) as u8).collect();
    let labels = (0..area).map(|i| (i % 21) as i32).collect();
    Record::from_bytes(3, size, size, data).with_labels(labels)
}

fn train_config(resize: ResizeMode) -> TransformConfig {
    TransformConfig::builder()
        .resize(resize)
        .crop(CropMode::FixedSquare(CROP))
        .mirror(true)
        .normalization(NormalizationMode::MeanValues(vec![104.0, 117.0, 123.0]))
        .phase(Phase::Train)
        .num_classes(20)
        .build()
}

/// Measure a single transform into preallocated slots
fn bench_transform(c: &mut Criterion) {
    let mut group = c.benchmark_group("Transform");
    let geometry = CropGeometry::new(CROP, CROP);

    for &size in &SIZES {
        let record = make_record(size);
        let mut image = vec![0.0f32; 3 * geometry.area()];
        let mut label = vec![0.0f32; geometry.area()];
        group.throughput(Throughput::Elements(1));

        let cases = [
            ("crop", ResizeMode::None),
            ("resize+crop", ResizeMode::ShortSideRange { min: CROP, max: size }),
        ];
        for (name, resize) in cases {
            let transformer = Transformer::new(train_config(resize), Arc::new(ImageCodec)).unwrap();
            let mut rng = StdRng::seed_from_u64(0);
            group.bench_with_input(BenchmarkId::new(name, size), &record, |b, record| {
                b.iter(|| {
                    let outcome = transformer
                        .apply(
                            ImageSource::Record(record),
                            Some(record.labels.as_slice()),
                            geometry,
                            &mut rng,
                            &mut image,
                            Some(label.as_mut_slice()),
                        )
                        .unwrap();
                    black_box(outcome)
                })
            });
        }
    }
    group.finish();
}

/// Measure batches delivered by the double-buffered pipeline
fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("Pipeline");
    const BATCH_SIZE: usize = 8;

    for &size in &SIZES {
        let store = MemoryStore::from_records((0..32).map(|_| make_record(size))).unwrap();
        let config = PipelineConfig::builder()
            .batch_size(BATCH_SIZE)
            .seed(0)
            .build();
        let mut pipeline =
            PrefetchPipeline::new(&store, train_config(ResizeMode::None), config).unwrap();
        group.throughput(Throughput::Elements(BATCH_SIZE as u64));

        group.bench_function(BenchmarkId::new("next_batch", size), |b| {
            b.iter(|| {
                let batch = pipeline.next_batch().unwrap();
                black_box(batch.images()[0])
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_transform, bench_pipeline);
criterion_main!(benches);
