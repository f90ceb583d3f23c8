//! Tolerance comparisons between splats, for checking quantization round trips.

use crate::structures::{GaussianCloud, Splat};

/// `true` when `|a - b|` is below `epsilon`, or within `epsilon` relative to
/// the larger magnitude.
#[inline]
pub fn equals_epsilon(a: f32, b: f32, epsilon: f32) -> bool {
    let d = (a - b).abs();
    d < epsilon || d <= a.abs().max(b.abs()) * epsilon
}

fn slices_equal_epsilon(a: &[f32], b: &[f32], epsilon: f32) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(&x, &y)| equals_epsilon(x, y, epsilon))
}

/// Compares rotations as orientations: `q` and `-q` are the same rotation.
fn rotations_equal_epsilon(a: &[f32], b: &[f32], epsilon: f32) -> bool {
    slices_equal_epsilon(a, b, epsilon)
        || (a.len() == b.len()
            && a
                .iter()
                .zip(b)
                .all(|(&x, &y)| equals_epsilon(x, -y, epsilon)))
}

pub fn splat_views_equal_epsilon(a: &Splat<'_>, b: &Splat<'_>, epsilon: f32) -> bool {
    slices_equal_epsilon(a.position, b.position, epsilon)
        && slices_equal_epsilon(a.scale, b.scale, epsilon)
        && rotations_equal_epsilon(a.rotation, b.rotation, epsilon)
        && equals_epsilon(a.alpha, b.alpha, epsilon)
        && slices_equal_epsilon(a.color, b.color, epsilon)
        && slices_equal_epsilon(a.sh, b.sh, epsilon)
}

/// Compares splat `index_a` of `a` with splat `index_b` of `b`.
///
/// Returns `false` when either index is out of range or the SH degrees differ.
pub fn splats_equal_epsilon(
    a: &GaussianCloud,
    index_a: usize,
    b: &GaussianCloud,
    index_b: usize,
    epsilon: f32,
) -> bool {
    if a.sh_degree() != b.sh_degree() {
        return false;
    }
    match (a.splat(index_a), b.splat(index_b)) {
        (Some(sa), Some(sb)) => splat_views_equal_epsilon(&sa, &sb, epsilon),
        _ => false,
    }
}

/// Compares two clouds point by point. Point counts and SH degrees must match.
pub fn clouds_equal_epsilon(a: &GaussianCloud, b: &GaussianCloud, epsilon: f32) -> bool {
    if a.num_points() != b.num_points() {
        return false;
    }
    (0..a.num_points() as usize).all(|i| {
        let equal = splats_equal_epsilon(a, i, b, i, epsilon);
        if !equal {
            log::debug!("Splats at index {} differ beyond {}", i, epsilon);
        }
        equal
    })
}
