use burn::{
    prelude::Backend,
    tensor::{Device, Int, Tensor},
};

/// Pixel coordinates of a `height x width` grid, flattened row-major.
///
/// Returns `(xs, ys)` each of shape `[height * width]` where `xs` is the column
/// index and `ys` the row index of every location.
pub fn pixel_grid<B: Backend>(height: usize, width: usize, device: &Device<B>) -> (Tensor<B, 1>, Tensor<B, 1>) {
    let cols = Tensor::<B, 1, Int>::arange(0..width as i64, device).float();
    let rows = Tensor::<B, 1, Int>::arange(0..height as i64, device).float();

    let xs = cols.reshape([1, width]).repeat_dim(0, height);
    let ys = rows.reshape([height, 1]).repeat_dim(1, width);

    (xs.reshape([height * width]), ys.reshape([height * width]))
}

/// Broadcasts per-keypoint weights `[B, K]` over the spatial dims of a heatmap.
pub fn spatial_weights<B: Backend>(weights: Tensor<B, 2>, height: usize, width: usize) -> Tensor<B, 4> {
    let [batch, keypoints] = weights.dims();

    weights
        .reshape([batch, keypoints, 1, 1])
        .repeat_dim(2, height)
        .repeat_dim(3, width)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{NdArray, ndarray::NdArrayDevice};
    use burn::tensor::Tolerance;

    type B = NdArray<f32>;
    type FT = burn::tensor::ops::FloatElem<B>;

    #[test]
    fn test_pixel_grid_is_row_major() {
        let device = &NdArrayDevice::default();

        let (xs, ys) = pixel_grid::<B>(2, 3, device);

        Tensor::<B, 1>::from_data([0.0, 1.0, 2.0, 0.0, 1.0, 2.0], device)
            .into_data()
            .assert_approx_eq::<FT>(&xs.to_data(), Tolerance::default());
        Tensor::<B, 1>::from_data([0.0, 0.0, 0.0, 1.0, 1.0, 1.0], device)
            .into_data()
            .assert_approx_eq::<FT>(&ys.to_data(), Tolerance::default());
    }

    #[test]
    fn test_single_pixel_grid() {
        let device = &NdArrayDevice::default();
        let (xs, ys) = pixel_grid::<B>(1, 1, device);
        assert_eq!(xs.dims(), [1]);
        assert_eq!(ys.into_data().to_vec::<f32>().unwrap(), vec![0.0]);
    }

    #[test]
    fn test_spatial_weights() {
        let device = &NdArrayDevice::default();

        let w = Tensor::<B, 2>::from_data([[1.0, 0.0]], device);
        let w = spatial_weights(w, 2, 3);

        assert_eq!(w.dims(), [1, 2, 2, 3]);
        Tensor::<B, 4>::from_data(
            [[[[1.0, 1.0, 1.0], [1.0, 1.0, 1.0]], [[0.0, 0.0, 0.0], [0.0, 0.0, 0.0]]]],
            device,
        )
        .into_data()
        .assert_approx_eq::<FT>(&w.to_data(), Tolerance::default());
    }
}
