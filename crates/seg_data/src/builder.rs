//! Dataset construction: image + label-grid pairs into a record store.
//!
//! For each name in the list file:
//!
//! ```text
//! <image_dir>/<name>.<image_ext>  ──decode──┐
//!                                           ├─► enlarge to minimum size ─► encode ─► Record ─► put
//! <label_dir>/<name>.<label_ext>  ──parse───┘     (labels: nearest-neighbor)
//! ```
//!
//! Label files hold one whitespace-separated row of integers per image row.
//! Difficult pixels (255) are stored as `num_classes + 1`. Items that fail to
//! load are logged and skipped; sequential keys only count written items.

use crate::codec::{Codec, ImageCodec, RawImage};
use crate::error::{PipelineError, Result};
use crate::label_map::{
    difficult_sentinel, enlarge_dims, parse_label_grid, remap_difficult, resize_nearest,
};
use crate::record::Record;
use crate::store::{sequential_key, FileStore, OpenMode, RecordStore, Transaction};
use image::ImageFormat;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Written items between commits.
pub const COMMIT_INTERVAL: usize = 200;

/// Encoding used for images inside the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum StoredFormat {
    #[default]
    Png,
    Jpeg,
}

impl StoredFormat {
    pub fn image_format(self) -> ImageFormat {
        match self {
            StoredFormat::Png => ImageFormat::Png,
            StoredFormat::Jpeg => ImageFormat::Jpeg,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub image_dir: PathBuf,
    pub label_dir: PathBuf,
    pub list_file: PathBuf,
    pub shuffle: bool,
    pub seed: Option<u64>,
    pub min_height: u32,
    pub min_width: u32,
    /// Key records by item name instead of an 8-digit counter.
    pub image_name_as_key: bool,
    pub num_classes: u32,
    pub image_ext: String,
    pub label_ext: String,
    pub format: StoredFormat,
}

impl BuildOptions {
    pub fn new(
        image_dir: impl Into<PathBuf>,
        label_dir: impl Into<PathBuf>,
        list_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            image_dir: image_dir.into(),
            label_dir: label_dir.into(),
            list_file: list_file.into(),
            shuffle: false,
            seed: None,
            min_height: 1,
            min_width: 1,
            image_name_as_key: false,
            num_classes: 20,
            image_ext: "jpg".to_string(),
            label_ext: "txt".to_string(),
            format: StoredFormat::Png,
        }
    }

    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Items smaller than this are enlarged, keeping their aspect ratio.
    pub fn min_size(mut self, min_height: u32, min_width: u32) -> Self {
        self.min_height = min_height;
        self.min_width = min_width;
        self
    }

    pub fn image_name_as_key(mut self, enabled: bool) -> Self {
        self.image_name_as_key = enabled;
        self
    }

    pub fn num_classes(mut self, num_classes: u32) -> Self {
        self.num_classes = num_classes;
        self
    }

    pub fn image_ext(mut self, ext: impl Into<String>) -> Self {
        self.image_ext = ext.into();
        self
    }

    pub fn label_ext(mut self, ext: impl Into<String>) -> Self {
        self.label_ext = ext.into();
        self
    }

    pub fn format(mut self, format: StoredFormat) -> Self {
        self.format = format;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildSummary {
    pub written: usize,
    pub skipped: usize,
}

/// Creates a new [`FileStore`] at `output` and fills it.
pub fn build_dataset(options: &BuildOptions, output: impl AsRef<Path>) -> Result<BuildSummary> {
    let store = FileStore::open(output, OpenMode::New)?;
    build_into(&store, options, &ImageCodec)
}

/// Fills `store` from the list file described by `options`.
pub fn build_into<S>(store: &S, options: &BuildOptions, codec: &dyn Codec) -> Result<BuildSummary>
where
    S: RecordStore + ?Sized,
{
    let names = read_list(&options.list_file)?;
    let names = if options.shuffle {
        let seed = options.seed.unwrap_or_else(|| rand::rng().random());
        info!(seed, "Shuffling data");
        let mut names = names;
        names.shuffle(&mut StdRng::seed_from_u64(seed));
        names
    } else {
        names
    };
    info!("A total of {} images.", names.len());

    let mut txn = store.transaction()?;
    let mut summary = BuildSummary::default();
    for name in &names {
        let record = match load_item(name, options, codec) {
            Ok(record) => record,
            Err(e) => {
                warn!(item = %name, error = %e, "skipping item");
                summary.skipped += 1;
                continue;
            }
        };
        let key = if options.image_name_as_key {
            name.clone()
        } else {
            sequential_key(summary.written)
        };
        txn.put(key.as_bytes(), record.encode()?);
        summary.written += 1;

        if summary.written % COMMIT_INTERVAL == 0 {
            commit(txn.as_mut(), summary.written)?;
        }
    }
    if txn.pending() > 0 {
        commit(txn.as_mut(), summary.written)?;
    }
    info!(
        written = summary.written,
        skipped = summary.skipped,
        "dataset construction finished"
    );
    Ok(summary)
}

fn commit(txn: &mut (dyn Transaction + '_), written: usize) -> Result<()> {
    txn.commit()?;
    info!("Processed {} files.", written);
    Ok(())
}

/// Item names, one per whitespace-separated token.
pub fn read_list(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
    Ok(text.split_whitespace().map(str::to_string).collect())
}

/// Reads, enlarges and encodes one image/label pair.
pub fn load_item(name: &str, options: &BuildOptions, codec: &dyn Codec) -> Result<Record> {
    let image_path = options
        .image_dir
        .join(format!("{}.{}", name, options.image_ext));
    let label_path = options
        .label_dir
        .join(format!("{}.{}", name, options.label_ext));

    let bytes = fs::read(&image_path).map_err(|e| PipelineError::io(&image_path, e))?;
    let image = codec.decode(&bytes)?.with_channels(3)?;
    let text = fs::read_to_string(&label_path).map_err(|e| PipelineError::io(&label_path, e))?;
    let mut labels = parse_label_grid(&text, image.height, image.width)?;
    remap_difficult(&mut labels, difficult_sentinel(options.num_classes));

    let (image, labels) = enlarge(codec, image, labels, options.min_height, options.min_width)?;
    let encoded = codec.encode(&image, options.format.image_format())?;
    Ok(Record::from_encoded(image.channels, image.height, image.width, encoded).with_labels(labels))
}

/// Upscales an item below the minimum size; labels follow by nearest neighbor.
pub fn enlarge(
    codec: &dyn Codec,
    image: RawImage,
    labels: Vec<i32>,
    min_height: u32,
    min_width: u32,
) -> Result<(RawImage, Vec<i32>)> {
    let (height, width) = enlarge_dims(image.height, image.width, min_height, min_width);
    if (height, width) == (image.height, image.width) {
        return Ok((image, labels));
    }
    let labels = resize_nearest(&labels, image.height, image.width, height, width)?;
    let image = codec.resize(&image, height, width)?;
    Ok((image, labels))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use tempfile::tempdir;

    fn write_item(dir: &Path, name: &str, height: u32, width: u32, label: i32) -> anyhow::Result<()> {
        let image = RawImage::new(3, height, width, vec![50; (3 * height * width) as usize])?;
        fs::write(
            dir.join(format!("{}.png", name)),
            ImageCodec.encode(&image, ImageFormat::Png)?,
        )?;
        let row = vec![label.to_string(); width as usize].join(" ");
        let grid = vec![row; height as usize].join("\n");
        fs::write(dir.join(format!("{}.txt", name)), grid)?;
        Ok(())
    }

    #[test]
    fn test_build_skips_broken_items() -> anyhow::Result<()> {
        let dir = tempdir()?;
        write_item(dir.path(), "a", 4, 6, 255)?;
        write_item(dir.path(), "c", 3, 3, 1)?;
        // "b" has no files at all.
        fs::write(dir.path().join("list.txt"), "a b\nc\n")?;

        let options = BuildOptions::new(dir.path(), dir.path(), dir.path().join("list.txt")).image_ext("png");
        let store = MemoryStore::new();
        let summary = build_into(&store, &options, &ImageCodec)?;
        assert_eq!(summary, BuildSummary { written: 2, skipped: 1 });

        let mut cursor = store.cursor()?;
        assert_eq!(cursor.key(), Some(&b"00000000"[..]));
        let first = Record::decode(cursor.value().unwrap())?;
        assert!(first.encoded);
        assert_eq!((first.height, first.width), (4, 6));
        assert!(first.labels.iter().all(|&l| l == 21));
        cursor.next()?;
        assert_eq!(cursor.key(), Some(&b"00000001"[..]));
        Ok(())
    }

    #[test]
    fn test_small_items_are_enlarged() -> anyhow::Result<()> {
        let dir = tempdir()?;
        write_item(dir.path(), "tiny", 2, 4, 3)?;
        fs::write(dir.path().join("list.txt"), "tiny")?;
        let options = BuildOptions::new(dir.path(), dir.path(), dir.path().join("list.txt"))
            .image_ext("png")
            .min_size(6, 1)
            .image_name_as_key(true);

        let store = MemoryStore::new();
        build_into(&store, &options, &ImageCodec)?;
        let cursor = store.cursor()?;
        assert_eq!(cursor.key(), Some(&b"tiny"[..]));
        let record = Record::decode(cursor.value().unwrap())?;
        assert_eq!((record.height, record.width), (6, 12));
        assert_eq!(record.labels.len(), 72);
        assert!(record.labels.iter().all(|&l| l == 3));
        Ok(())
    }

    #[test]
    fn test_mismatched_label_grid_is_skipped() -> anyhow::Result<()> {
        let dir = tempdir()?;
        write_item(dir.path(), "x", 3, 3, 0)?;
        fs::write(dir.path().join("x.txt"), "0 0 0\n0 0 0\n")?;
        fs::write(dir.path().join("list.txt"), "x")?;
        let options = BuildOptions::new(dir.path(), dir.path(), dir.path().join("list.txt")).image_ext("png");
        let summary = build_into(&MemoryStore::new(), &options, &ImageCodec)?;
        assert_eq!(summary, BuildSummary { written: 0, skipped: 1 });
        Ok(())
    }

    #[test]
    fn test_shuffle_is_seeded() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let names: Vec<String> = (0..8).map(|i| format!("item{}", i)).collect();
        for (i, name) in names.iter().enumerate() {
            write_item(dir.path(), name, 2, 2, i as i32)?;
        }
        fs::write(dir.path().join("list.txt"), names.join("\n"))?;
        let options = BuildOptions::new(dir.path(), dir.path(), dir.path().join("list.txt"))
            .image_ext("png")
            .shuffle(true)
            .seed(9);

        let a = MemoryStore::new();
        let b = MemoryStore::new();
        build_into(&a, &options, &ImageCodec)?;
        build_into(&b, &options, &ImageCodec)?;
        let (mut ca, mut cb) = (a.cursor()?, b.cursor()?);
        let mut order = Vec::new();
        while ca.valid() {
            order.push(Record::decode(ca.value().unwrap())?.labels[0]);
            assert_eq!(ca.value(), cb.value());
            ca.next()?;
            cb.next()?;
        }
        assert_eq!(order.len(), 8);
        let mut sorted = order.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..8).collect::<Vec<i32>>());
        Ok(())
    }
}
