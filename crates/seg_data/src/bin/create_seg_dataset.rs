//! Builds a segmentation record store from an image directory, a directory of
//! label grids and a list of item names.
//!
//! ```text
//! create_seg_dataset <IMAGE_DIR> <LABEL_DIR> <LIST_FILE> <OUTPUT_DB> [--shuffle] ...
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use seg_data::builder::{build_dataset, BuildOptions, StoredFormat};
use seg_data::telemetry::init_tracing;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Convert image/label pairs into a segmentation record store", long_about = None)]
struct Args {
    /// Directory holding `<name>.<image-ext>` images
    image_dir: PathBuf,
    /// Directory holding `<name>.<label-ext>` label grids
    label_dir: PathBuf,
    /// Whitespace-separated item names
    list_file: PathBuf,
    /// Store directory to create (must not exist)
    output: PathBuf,

    /// Randomly shuffle the item order
    #[arg(long)]
    shuffle: bool,
    /// Seed for --shuffle
    #[arg(long)]
    seed: Option<u64>,
    /// Enlarge images shorter than this, keeping the aspect ratio
    #[arg(long, default_value_t = 1)]
    min_height: u32,
    /// Enlarge images narrower than this, keeping the aspect ratio
    #[arg(long, default_value_t = 1)]
    min_width: u32,
    /// Key records by item name instead of a sequential counter
    #[arg(long)]
    image_name_as_key: bool,
    /// Number of foreground classes; difficult pixels (255) become num_classes + 1
    #[arg(long, default_value_t = 20)]
    num_classes: u32,
    #[arg(long, default_value = "jpg")]
    image_ext: String,
    #[arg(long, default_value = "txt")]
    label_ext: String,
    /// Encoding of images inside the store
    #[arg(long, value_enum, default_value_t = StoredFormat::Png)]
    format: StoredFormat,
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut options = BuildOptions::new(&args.image_dir, &args.label_dir, &args.list_file)
        .shuffle(args.shuffle)
        .min_size(args.min_height, args.min_width)
        .image_name_as_key(args.image_name_as_key)
        .num_classes(args.num_classes)
        .image_ext(args.image_ext)
        .label_ext(args.label_ext)
        .format(args.format);
    if let Some(seed) = args.seed {
        options = options.seed(seed);
    }

    let summary = build_dataset(&options, &args.output)
        .with_context(|| format!("Failed to build dataset at {}", args.output.display()))?;
    tracing::info!(
        written = summary.written,
        skipped = summary.skipped,
        output = %args.output.display(),
        "done"
    );
    Ok(())
}
