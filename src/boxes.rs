use burn::tensor::Tensor;
use burn::prelude::Backend;

/// Default guard for the union and enclosing areas of degenerate boxes.
pub const GIOU_EPS: f32 = 1e-6;

/// Boxes split into their `(x1, y1, x2, y2)` coordinate tensors, all with the same shape.
pub type BoxComponents<B, const D: usize> = (Tensor<B, D>, Tensor<B, D>, Tensor<B, D>, Tensor<B, D>);

/// Builds one axis aligned box per location from a location and its offset.
///
/// One corner is the location itself, the other is the location moved by the
/// offset. The two corners are ordered per axis by the sign of the offset so
/// the result is always a valid `xyxy` box:
///
/// ```text
///   off_x > 0, off_y > 0         off_x < 0, off_y > 0
///
///   (x, y)──────┐                ┌──────(x, y)
///   │           │                │           │
///   └──(x+ox, y+oy)    (x+ox, y+oy)──────────┘
/// ```
///
/// A zero offset yields a degenerate box with zero width (or height) that the
/// GIoU computation handles through [`GIOU_EPS`].
///
/// # Arguments
/// * `xs`, `ys` - Location coordinates (column, row).
/// * `off_x`, `off_y` - Offsets of the second corner, same shape as the locations.
pub fn offset_boxes<B: Backend, const D: usize>(
    xs: Tensor<B, D>,
    ys: Tensor<B, D>,
    off_x: Tensor<B, D>,
    off_y: Tensor<B, D>,
) -> BoxComponents<B, D> {
    let x_end = xs.clone() + off_x;
    let y_end = ys.clone() + off_y;

    (
        xs.clone().min_pair(x_end.clone()),
        ys.clone().min_pair(y_end.clone()),
        xs.max_pair(x_end),
        ys.max_pair(y_end),
    )
}

/// Computes the area of boxes given as components.
pub fn box_area<B: Backend, const D: usize>(boxes: &BoxComponents<B, D>) -> Tensor<B, D> {
    let (x1, y1, x2, y2) = boxes.clone();
    (x2 - x1) * (y2 - y1)
}

/// Computes the Generalized IoU between two aligned sets of boxes in `xyxy` format.
///
/// Entry `i` of the result is the GIoU between `pred[i]` and `target[i]`; no
/// pairwise matrix is built.
///
/// ```text
///            overlap                 enclose - union
///  IoU  = ─────────────     GIoU = IoU - ───────────────
///          max(union, ε)                 max(enclose, ε)
/// ```
///
/// where `enclose` is the area of the smallest box containing both boxes.
///
/// # Returns
/// * `Tensor<B, D>` - GIoU values in `[-1, 1]`, same shape as the box components.
pub fn aligned_giou<B: Backend, const D: usize>(
    pred: BoxComponents<B, D>,
    target: BoxComponents<B, D>,
    eps: f32,
) -> Tensor<B, D> {
    let area_pred = box_area(&pred);
    let area_target = box_area(&target);

    let (px1, py1, px2, py2) = pred;
    let (tx1, ty1, tx2, ty2) = target;

    // --- Intersection ---
    let left = px1.clone().max_pair(tx1.clone());
    let top = py1.clone().max_pair(ty1.clone());
    let right = px2.clone().min_pair(tx2.clone());
    let bottom = py2.clone().min_pair(ty2.clone());

    let overlap = (right - left).clamp_min(0.0) * (bottom - top).clamp_min(0.0);

    // --- Union ---
    let union = (area_pred + area_target - overlap.clone()).clamp_min(eps);
    let iou = overlap / union.clone();

    // --- Smallest enclosing box ---
    let enclose_w = (px2.max_pair(tx2) - px1.min_pair(tx1)).clamp_min(0.0);
    let enclose_h = (py2.max_pair(ty2) - py1.min_pair(ty1)).clamp_min(0.0);
    let enclose = (enclose_w * enclose_h).clamp_min(eps);

    iou - (enclose.clone() - union) / enclose
}
