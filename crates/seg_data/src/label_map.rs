//! Per-pixel label grids.
//!
//! Labels are categorical, so every resampling here is nearest-neighbor.
//! Output pixel `(i, j)` of an `H_out x W_out` grid reads source pixel
//! `(round(i / (H_out - 1) * (H_in - 1)), round(j / (W_out - 1) * (W_in - 1)))`
//! with half-up rounding. Both the dataset builder and the transformer use
//! [`resize_nearest`] so label semantics agree wherever a grid is resized.

use crate::error::{ensure_config, PipelineError, Result};

/// Raw label value marking a difficult/unlabeled pixel.
pub const DIFFICULT_LABEL: i32 = 255;

/// Sentinel class a difficult pixel maps to for a `num_classes`-class problem
/// (background is class 0, so 20 classes give sentinel 21).
pub fn difficult_sentinel(num_classes: u32) -> i32 {
    num_classes as i32 + 1
}

/// Replaces every [`DIFFICULT_LABEL`] with `sentinel`.
pub fn remap_difficult(labels: &mut [i32], sentinel: i32) {
    for label in labels.iter_mut().filter(|l| **l == DIFFICULT_LABEL) {
        *label = sentinel;
    }
}

/// Parses a whitespace-separated label grid, one image row per line.
///
/// The grid must have exactly `height` non-empty rows of `width` values each.
pub fn parse_label_grid(text: &str, height: u32, width: u32) -> Result<Vec<i32>> {
    let mut labels = Vec::with_capacity(height as usize * width as usize);
    let mut rows = 0u32;
    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let before = labels.len();
        for token in line.split_whitespace() {
            let value = token.parse::<i32>().map_err(|e| {
                PipelineError::Record(format!("line {}: bad label '{}': {}", line_no + 1, token, e))
            })?;
            labels.push(value);
        }
        let row_len = labels.len() - before;
        if row_len != width as usize {
            return Err(PipelineError::Record(format!(
                "line {}: label row has {} values, image width is {}",
                line_no + 1,
                row_len,
                width
            )));
        }
        rows += 1;
    }
    if rows != height {
        return Err(PipelineError::Record(format!(
            "label grid has {} rows, image height is {}",
            rows, height
        )));
    }
    Ok(labels)
}

/// Source index for output index `i` along an axis of `len_out` samples
/// drawn from `len_in` samples.
#[inline]
pub fn nearest_source_index(i: usize, len_in: usize, len_out: usize) -> usize {
    if len_out <= 1 || len_in <= 1 {
        return 0;
    }
    let pos = i as f64 / (len_out - 1) as f64 * (len_in - 1) as f64;
    ((pos + 0.5).floor() as usize).min(len_in - 1)
}

/// Nearest-neighbor resize of a row-major label grid.
pub fn resize_nearest(
    labels: &[i32],
    height_in: u32,
    width_in: u32,
    height_out: u32,
    width_out: u32,
) -> Result<Vec<i32>> {
    let (h_in, w_in) = (height_in as usize, width_in as usize);
    let (h_out, w_out) = (height_out as usize, width_out as usize);
    ensure_config!(
        h_out > 0 && w_out > 0,
        "label resize target must be positive (got {}x{})",
        h_out,
        w_out
    );
    if labels.len() != h_in * w_in {
        return Err(PipelineError::Record(format!(
            "label grid has {} entries, expected {}x{}",
            labels.len(),
            h_in,
            w_in
        )));
    }
    let cols: Vec<usize> = (0..w_out)
        .map(|j| nearest_source_index(j, w_in, w_out))
        .collect();
    let mut out = Vec::with_capacity(h_out * w_out);
    for i in 0..h_out {
        let row = nearest_source_index(i, h_in, h_out) * w_in;
        out.extend(cols.iter().map(|&c| labels[row + c]));
    }
    Ok(out)
}

/// Smallest aspect-preserving size with `height >= min_height` and
/// `width >= min_width`. Sizes already meeting both minimums are unchanged.
pub fn enlarge_dims(height: u32, width: u32, min_height: u32, min_width: u32) -> (u32, u32) {
    let short_h = height < min_height;
    let short_w = width < min_width;
    let (h, w) = (height as f64, width as f64);
    match (short_h, short_w) {
        (false, false) => (height, width),
        (true, false) => (min_height, (w * min_height as f64 / h).ceil() as u32),
        (false, true) => ((h * min_width as f64 / w).ceil() as u32, min_width),
        // The side with the larger factor lands exactly on its minimum.
        (true, true) if min_height as f64 / h >= min_width as f64 / w => (
            min_height,
            ((w * min_height as f64 / h).ceil() as u32).max(min_width),
        ),
        (true, true) => (
            ((h * min_width as f64 / w).ceil() as u32).max(min_height),
            min_width,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_grid() -> Result<()> {
        let labels = parse_label_grid("0 1 2\n255 4 5\n", 2, 3)?;
        assert_eq!(labels, vec![0, 1, 2, 255, 4, 5]);
        assert!(parse_label_grid("0 1\n2 3 4\n", 2, 2).is_err());
        assert!(parse_label_grid("0 1\n", 2, 2).is_err());
        assert!(parse_label_grid("0 x\n", 1, 2).is_err());
        Ok(())
    }

    #[test]
    fn test_difficult_remap() {
        let mut labels = vec![0, 255, 7, 255];
        remap_difficult(&mut labels, difficult_sentinel(20));
        assert_eq!(labels, vec![0, 21, 7, 21]);
    }

    #[test]
    fn test_identity_resize() -> Result<()> {
        let labels: Vec<i32> = (0..12).collect();
        assert_eq!(resize_nearest(&labels, 3, 4, 3, 4)?, labels);
        Ok(())
    }

    #[test]
    fn test_integer_scale_round_trip() -> Result<()> {
        let labels: Vec<i32> = (0..9).collect();
        // 3 -> 5 keeps the source samples at output positions 0, 2, 4.
        let up = resize_nearest(&labels, 3, 3, 5, 5)?;
        assert_eq!(&up[0..5], &[0, 1, 1, 2, 2]);
        let down = resize_nearest(&up, 5, 5, 3, 3)?;
        assert_eq!(down, labels);
        Ok(())
    }

    #[test]
    fn test_single_row_or_column_target() -> Result<()> {
        let labels = vec![1, 2, 3, 4];
        assert_eq!(resize_nearest(&labels, 2, 2, 1, 1)?, vec![1]);
        assert_eq!(resize_nearest(&labels, 2, 2, 1, 3)?, vec![1, 2, 2]);
        Ok(())
    }

    #[test]
    fn test_enlarge_dims() {
        assert_eq!(enlarge_dims(10, 10, 5, 5), (10, 10));
        assert_eq!(enlarge_dims(5, 10, 10, 1), (10, 20));
        assert_eq!(enlarge_dims(10, 3, 1, 4), (14, 4));
        // Both short: the larger factor wins (4x on height vs 2x on width).
        assert_eq!(enlarge_dims(2, 5, 8, 10), (8, 20));
        // Width factor wins (5x vs 2x).
        assert_eq!(enlarge_dims(4, 2, 8, 10), (20, 10));
    }

    #[test]
    fn test_enlarge_dims_hits_minimum_exactly() {
        assert_eq!(enlarge_dims(113, 100, 480, 101), (480, 425));
        assert_eq!(enlarge_dims(299, 100, 599, 101), (599, 201));
        for h in 102..124 {
            let (height, width) = enlarge_dims(h, 100, 480, 500);
            assert!(height >= 480 && width == 500, "{} -> {}x{}", h, height, width);
            let (height, width) = enlarge_dims(100, h, 500, 480);
            assert!(height == 500 && width >= 480, "{} -> {}x{}", h, height, width);
        }
    }
}
