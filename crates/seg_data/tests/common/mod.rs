#![allow(dead_code)]

use seg_data::{Codec, ImageCodec, RawImage, Record};

use anyhow::Result;
use image::ImageFormat;
use std::fs;
use std::path::Path;

/// Planar record where pixel `(c, h, w)` holds `h * 10 + w + c` and the label
/// at `(h, w)` holds `h * 10 + w`.
pub fn gradient_record(channels: u32, height: u32, width: u32) -> Record {
    let mut data = Vec::with_capacity((channels * height * width) as usize);
    for c in 0..channels {
        for h in 0..height {
            for w in 0..width {
                data.push((h * 10 + w + c) as u8);
            }
        }
    }
    let labels = (0..height)
        .flat_map(|h| (0..width).map(move |w| (h * 10 + w) as i32))
        .collect();
    Record::from_bytes(channels, height, width, data).with_labels(labels)
}

/// Single-channel record filled with `value`, labels filled with `label`.
pub fn constant_record(height: u32, width: u32, value: u8, label: i32) -> Record {
    let area = (height * width) as usize;
    Record::from_bytes(1, height, width, vec![value; area]).with_labels(vec![label; area])
}

/// Interleaved RGB image whose pixel `(h, w)` is `[seed + h, seed + w, seed]`.
pub fn rgb_image(height: u32, width: u32, seed: u8) -> Result<RawImage> {
    let mut data = Vec::with_capacity((height * width * 3) as usize);
    for h in 0..height {
        for w in 0..width {
            data.extend_from_slice(&[seed + h as u8, seed + w as u8, seed]);
        }
    }
    Ok(RawImage::new(3, height, width, data)?)
}

/// PNG-encoded record built from [`rgb_image`].
pub fn png_record(height: u32, width: u32, seed: u8, labels: Vec<i32>) -> Result<Record> {
    let image = rgb_image(height, width, seed)?;
    let bytes = ImageCodec.encode(&image, ImageFormat::Png)?;
    Ok(Record::from_encoded(3, height, width, bytes).with_labels(labels))
}

/// Writes `image` as `<dir>/<name>.png`.
pub fn write_png(dir: &Path, name: &str, image: &RawImage) -> Result<()> {
    let bytes = ImageCodec.encode(image, ImageFormat::Png)?;
    fs::write(dir.join(format!("{}.png", name)), bytes)?;
    Ok(())
}

/// Writes a label grid as `<dir>/<name>.txt`, one row per line.
pub fn write_labels(dir: &Path, name: &str, rows: &[Vec<i32>]) -> Result<()> {
    let text: Vec<String> = rows
        .iter()
        .map(|row| {
            row.iter()
                .map(i32::to_string)
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect();
    fs::write(dir.join(format!("{}.txt", name)), text.join("\n"))?;
    Ok(())
}
