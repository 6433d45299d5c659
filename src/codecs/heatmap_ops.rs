//! Helpers shared by the heatmap codecs.
//!
//! Gaussian blurring runs as burn convolutions on `[N, C, H, W]` tensors. Peak
//! search and sub-pixel refinement work on single `[H, W]` maps copied to the
//! host in row-major order.

use burn::backend::NdArray;
use burn::prelude::Backend;
use burn::tensor::module::conv2d;
use burn::tensor::ops::ConvOptions;
use burn::tensor::{Device, Int, Tensor, TensorData};

/// Backend the codecs use for host side target generation.
pub(crate) type HostBackend = NdArray<f32>;

/// Sigma OpenCV derives for a gaussian kernel when none is given.
pub(crate) fn kernel_sigma(kernel_size: usize) -> f32 {
    0.3 * ((kernel_size as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

/// OpenCV keeps fixed binomial kernels for the small sizes.
fn binomial_kernel(kernel_size: usize) -> Option<&'static [f32]> {
    match kernel_size {
        1 => Some(&[1.0]),
        3 => Some(&[0.25, 0.5, 0.25]),
        5 => Some(&[0.0625, 0.25, 0.375, 0.25, 0.0625]),
        7 => Some(&[0.03125, 0.109375, 0.21875, 0.28125, 0.21875, 0.109375, 0.03125]),
        _ => None,
    }
}

/// Normalized 1D gaussian kernel of odd `kernel_size`, as `cv2.getGaussianKernel(k, 0)`.
pub(crate) fn gaussian_kernel<B: Backend>(kernel_size: usize, device: &Device<B>) -> Tensor<B, 1> {
    if let Some(taps) = binomial_kernel(kernel_size) {
        return Tensor::from_data(TensorData::new(taps.to_vec(), [kernel_size]), device);
    }

    let sigma = kernel_sigma(kernel_size);
    let center = (kernel_size / 2) as f32;
    let kernel = Tensor::<B, 1, Int>::arange(0..kernel_size as i64, device)
        .float()
        .sub_scalar(center)
        .powf_scalar(2.0)
        .div_scalar(-2.0 * sigma * sigma)
        .exp();
    let total = kernel.clone().sum();

    kernel / total
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Border {
    /// Values outside the map are zero.
    Zero,
    /// `gfedcb|abcdefgh|gfedcba`, OpenCV's default border.
    Reflect101,
}

/// Source index of every position of a `len` axis padded by `pad` on both sides.
fn reflect_101_indices(len: usize, pad: usize) -> Vec<i64> {
    let last = len as i64 - 1;
    (-(pad as i64)..len as i64 + pad as i64)
        .map(|i| {
            if last == 0 {
                return 0;
            }
            let m = i.rem_euclid(2 * last);
            if m > last { 2 * last - m } else { m }
        })
        .collect()
}

fn reflect_101_pad<B: Backend>(maps: Tensor<B, 4>, pad: usize) -> Tensor<B, 4> {
    let [_, _, height, width] = maps.dims();
    let device = maps.device();
    let index = |len: usize| {
        let idx = reflect_101_indices(len, pad);
        let n = idx.len();
        Tensor::<B, 1, Int>::from_data(TensorData::new(idx, [n]), &device)
    };

    maps.select(2, index(height)).select(3, index(width))
}

/// Separable gaussian blur of every `[H, W]` map of a `[N, C, H, W]` tensor.
pub(crate) fn gaussian_blur<B: Backend>(maps: Tensor<B, 4>, kernel_size: usize, border: Border) -> Tensor<B, 4> {
    let [batch, channels, height, width] = maps.dims();
    let radius = kernel_size / 2;
    let kernel = gaussian_kernel::<B>(kernel_size, &maps.device());

    let maps = maps.reshape([batch * channels, 1, height, width]);
    let (maps, padding) = match border {
        Border::Zero => (maps, radius),
        Border::Reflect101 => (reflect_101_pad(maps, radius), 0),
    };

    let rows = conv2d(
        maps,
        kernel.clone().reshape([1, 1, 1, kernel_size]),
        None,
        ConvOptions::new([1, 1], [0, padding], [1, 1], 1),
    );
    let blurred = conv2d(
        rows,
        kernel.reshape([1, 1, kernel_size, 1]),
        None,
        ConvOptions::new([1, 1], [padding, 0], [1, 1], 1),
    );

    blurred.reshape([batch, channels, height, width])
}

/// Blurs every map with a zero border and rescales it back to its original maximum.
pub(crate) fn blur_keep_max<B: Backend>(maps: Tensor<B, 4>, kernel_size: usize) -> Tensor<B, 4> {
    let [batch, channels, height, width] = maps.dims();
    let origin_max = maps.clone().reshape([batch, channels, height * width]).max_dim(2);

    let blurred = gaussian_blur(maps, kernel_size, Border::Zero).reshape([batch, channels, height * width]);
    let blurred_max = blurred.clone().max_dim(2);

    // all zero maps are left as they are
    let flat = blurred_max.clone().equal_elem(0.0);
    let ratio = (origin_max / blurred_max.mask_fill(flat.clone(), 1.0)).mask_fill(flat, 1.0);

    (blurred * ratio).reshape([batch, channels, height, width])
}

/// Blurs `[C, H, W]` row-major maps kept on the host.
pub(crate) fn blur_host_maps(
    data: Vec<f32>,
    [channels, height, width]: [usize; 3],
    kernel_size: usize,
    border: Border,
) -> Vec<f32> {
    let device = Default::default();
    let maps = Tensor::<HostBackend, 4>::from_data(TensorData::new(data, [1, channels, height, width]), &device);

    gaussian_blur(maps, kernel_size, border).into_data().iter::<f32>().collect()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Peak {
    pub x: usize,
    pub y: usize,
    pub value: f32,
}

/// Location of the maximum response, first occurrence in row-major order on ties.
pub(crate) fn heatmap_maximum(map: &[f32], width: usize) -> Peak {
    let mut best = 0;
    for (i, v) in map.iter().enumerate() {
        if *v > map[best] {
            best = i;
        }
    }
    Peak {
        x: best % width,
        y: best / width,
        value: map.get(best).copied().unwrap_or(0.0),
    }
}

/// `sign` with `sign(0) = 0`.
pub(crate) fn sign(v: f32) -> f32 {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Quarter pixel shift toward the higher neighbour along each axis.
pub(crate) fn quarter_offset(map: &[f32], height: usize, width: usize, x: usize, y: usize) -> [f32; 2] {
    let at = |xx: usize, yy: usize| map[yy * width + xx];

    let dx = if 1 < x && x + 1 < width && 0 < y && y < height {
        at(x + 1, y) - at(x - 1, y)
    } else {
        0.0
    };
    let dy = if 1 < y && y + 1 < height && 0 < x && x < width {
        at(x, y + 1) - at(x, y - 1)
    } else {
        0.0
    };

    [sign(dx) * 0.25, sign(dy) * 0.25]
}

/// Distribution aware sub-pixel offset from a log heatmap.
///
/// Approximates the log response around the peak with a second order Taylor
/// expansion and takes one Newton step:
///
/// ```text
///  offset = -H⁻¹ ∇      H = ⎡dxx dxy⎤   ∇ = ⎡dx⎤
///                           ⎣dxy dyy⎦       ⎣dy⎦
/// ```
///
/// Returns a zero offset near the border or when `H` is singular.
pub(crate) fn dark_offset(log_map: &[f32], height: usize, width: usize, x: usize, y: usize) -> [f32; 2] {
    if !(1 < x && x + 2 < width && 1 < y && y + 2 < height) {
        return [0.0, 0.0];
    }
    let at = |xx: usize, yy: usize| log_map[yy * width + xx];

    let dx = 0.5 * (at(x + 1, y) - at(x - 1, y));
    let dy = 0.5 * (at(x, y + 1) - at(x, y - 1));
    let dxx = 0.25 * (at(x + 2, y) - 2.0 * at(x, y) + at(x - 2, y));
    let dxy = 0.25 * (at(x + 1, y + 1) - at(x + 1, y - 1) - at(x - 1, y + 1) + at(x - 1, y - 1));
    let dyy = 0.25 * (at(x, y + 2) - 2.0 * at(x, y) + at(x, y - 2));

    let det = dxx * dyy - dxy * dxy;
    if det == 0.0 {
        return [0.0, 0.0];
    }

    [
        -(dyy * dx - dxy * dy) / det,
        -(dxx * dy - dxy * dx) / det,
    ]
}
