//! Factor-2 downsampling of label and raw volumes.
use ndarray::{ArrayD, Dimension, IxDyn, Slice};

use crate::cellmap::Encoding;

const FACTOR: usize = 2;

/// Mean over non-overlapping blocks of side 2.
///
/// Blocks overhanging the input are padded with zeros, so the output has
/// `ceil(len / 2)` elements along every axis.
pub fn downscale_local_mean(input: &ArrayD<f64>) -> ArrayD<f64> {
    let out_shape: Vec<usize> = input.shape().iter().map(|s| s.div_ceil(FACTOR)).collect();
    let block_size = FACTOR.pow(input.ndim() as u32) as f64;
    let mut out = ArrayD::<f64>::zeros(IxDyn(&out_shape));
    let mut out_index = vec![0usize; input.ndim()];
    for (index, value) in input.indexed_iter() {
        for (o, i) in out_index.iter_mut().zip(index.slice()) {
            *o = i / FACTOR;
        }
        out[IxDyn(&out_index)] += value;
    }
    out.mapv_inplace(|v| v / block_size);
    out
}

/// Slice every axis to an even length.
pub fn crop_to_even<T: Clone>(input: ArrayD<T>) -> ArrayD<T> {
    input
        .slice_each_axis(|ax| Slice::from(0..(ax.len / 2) * 2))
        .to_owned()
}

/// Downsample a label volume, then even-crop it and mark mixed blocks unknown.
pub fn downsample_labels(input: &ArrayD<f64>, encoding: &Encoding) -> ArrayD<f32> {
    let mut out = downsample_raw(input);
    smooth_labels(&mut out, encoding);
    out
}

/// Downsample a raw volume to float32 and even-crop it.
pub fn downsample_raw(input: &ArrayD<f64>) -> ArrayD<f32> {
    crop_to_even(downscale_local_mean(input).mapv(|v| v as f32))
}

/// Values above both `present` and `absent` can only come from blocks
/// containing unknown voxels.
pub fn smooth_labels(labels: &mut ArrayD<f32>, encoding: &Encoding) {
    let max = encoding.max_annotated() as f32;
    let unknown = encoding.unknown as f32;
    labels.mapv_inplace(|v| if v > max { unknown } else { v });
}

/// Counts of smoothed labels as `(absent, unknown)`.
///
/// `absent` sums the distance from `present` over all known voxels, rounded to
/// two decimals.
pub fn complement_counts(labels: &ArrayD<f32>, encoding: &Encoding) -> (f64, f64) {
    let unknown = encoding.unknown as f32;
    let present = encoding.present as f64;
    let mut absent = 0.0;
    let mut n_unknown = 0u64;
    for v in labels {
        if *v == unknown {
            n_unknown += 1;
        } else {
            absent += present - *v as f64;
        }
    }
    ((absent * 100.0).round() / 100.0, n_unknown as f64)
}

/// Counts of binarised labels as `(absent, unknown)`.
///
/// Known values are split at the midpoint between `present` and `absent`.
pub fn binarized_counts(labels: &ArrayD<f64>, encoding: &Encoding) -> (u64, u64) {
    let unknown = encoding.unknown as f64;
    let threshold = encoding.midpoint();
    let absent_below = encoding.absent < encoding.present;
    let mut n_unknown = 0;
    let mut n_present = 0;
    for v in labels {
        if *v == unknown {
            n_unknown += 1;
        } else if (*v > threshold) == absent_below {
            n_present += 1;
        }
    }
    let n_absent = labels.len() as u64 - n_unknown - n_present;
    (n_absent, n_unknown)
}

/// Scale and translation of the next coarser level.
///
/// Voxel centres move by half of the finer voxel size.
pub fn next_level_transform(scale: &[f64], translation: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let next_scale = scale.iter().map(|s| s * FACTOR as f64).collect();
    let next_translation = scale
        .iter()
        .zip(translation)
        .map(|(s, t)| s * 0.5 + t)
        .collect();
    (next_scale, next_translation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, array};
    use serde_json::Map;

    fn encoding() -> Encoding {
        Encoding {
            present: 1,
            absent: 0,
            unknown: 255,
            extra: Map::new(),
        }
    }

    #[test]
    fn block_mean_pads_with_zero() {
        let input = array![[1.0, 3.0, 5.0], [1.0, 3.0, 5.0]].into_dyn();
        let out = downscale_local_mean(&input);
        assert_eq!(out, array![[2.0, 2.5]].into_dyn());
    }

    #[test]
    fn even_crop() {
        let input = ArrayD::<u8>::zeros(IxDyn(&[3, 4, 5]));
        assert_eq!(crop_to_even(input).shape(), &[2, 4, 4]);
    }

    #[test]
    fn labels_4x4x4() {
        // one octant present, one unknown, one half present
        let mut input = Array3::<f64>::zeros((4, 4, 4));
        input.slice_mut(ndarray::s![0..2, 0..2, 0..2]).fill(1.0);
        input.slice_mut(ndarray::s![2..4, 2..4, 2..4]).fill(255.0);
        input.slice_mut(ndarray::s![0..1, 2..4, 2..4]).fill(1.0);
        input[[2, 0, 0]] = 255.0;
        let out = downsample_labels(&input.into_dyn(), &encoding());
        assert_eq!(out.shape(), &[2, 2, 2]);
        let (absent, unknown) = complement_counts(&out, &encoding());
        let out = out.into_dimensionality::<ndarray::Ix3>().unwrap();
        assert_eq!(out[[0, 0, 0]], 1.0);
        assert_eq!(out[[0, 1, 1]], 0.5);
        assert_eq!(out[[1, 1, 1]], 255.0);
        assert_eq!(out[[1, 0, 0]], 255.0);
        assert_eq!(out[[0, 1, 0]], 0.0);
        assert_eq!(unknown, 2.0);
        assert_eq!(absent, 0.5 + 4.0);
    }

    #[test]
    fn odd_extent_is_cropped() {
        let input = ArrayD::<f64>::zeros(IxDyn(&[5, 6, 7]));
        assert_eq!(downsample_raw(&input).shape(), &[2, 2, 4]);
    }

    #[test]
    fn binarized_counts_split_at_midpoint() {
        let labels = array![0.0, 0.25, 0.75, 1.0, 255.0].into_dyn();
        assert_eq!(binarized_counts(&labels, &encoding()), (2, 1));

        let inverted = Encoding {
            present: 0,
            absent: 1,
            ..encoding()
        };
        assert_eq!(binarized_counts(&labels, &inverted), (2, 1));
    }

    #[test]
    fn next_level() {
        let (scale, translation) = next_level_transform(&[4.0, 4.0, 2.0], &[2.0, 2.0, 1.0]);
        assert_eq!(scale, vec![8.0, 8.0, 4.0]);
        assert_eq!(translation, vec![4.0, 4.0, 2.0]);
    }
}
