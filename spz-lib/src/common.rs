/// Fractional bits used for 24-bit fixed-point positions written by this crate.
pub const FRACTIONAL_BITS: u8 = 12;

/// Symmetric scale applied to base colors before byte quantization.
pub const COLOR_SCALE: f32 = 0.15;

/// Bounds applied to `inv_sigmoid` so boundary alpha bytes decode to finite values.
pub const INV_SIGMOID_LIMIT: f32 = 20.0;

/// Bits kept per channel for degree-1 SH coefficients.
pub const SH_DEGREE1_BITS: u32 = 5;

/// Bits kept per channel for SH coefficients of degree 2 and above.
pub const SH_DEGREE_N_BITS: u32 = 4;

#[inline]
pub fn to_byte(x: f32) -> u8 {
    x.round().clamp(0.0, 255.0) as u8
}

/// Quantizes one SH value to a byte, snapped to the center of a bucket of
/// `bucket_size` steps.
#[inline]
pub fn quantize_sh(x: f32, bucket_size: i32) -> u8 {
    // Anything past ±8 already clamps to 0 or 255; bounding first keeps the
    // bucket arithmetic from overflowing for huge inputs.
    let q = ((x * 128.0).round() as i32).clamp(-1024, 1024) + 128;
    let q = ((q + bucket_size / 2) / bucket_size) * bucket_size;
    q.clamp(0, 255) as u8
}

#[inline]
pub fn unquantize_sh(x: u8) -> f32 {
    (x as f32 - 128.0) / 128.0
}

/// Bucket width used by [`quantize_sh`] for the SH coefficient at `coefficient`.
///
/// Degree-1 coefficients (the first three) keep 5 bits, all others keep 4.
#[inline]
pub fn sh_bucket_size(coefficient: usize) -> i32 {
    let bits = if coefficient < sh_dimensions_for_degree(1) {
        SH_DEGREE1_BITS
    } else {
        SH_DEGREE_N_BITS
    };
    1 << (8 - bits)
}

#[inline]
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[inline]
pub fn inv_sigmoid(x: f32) -> f32 {
    (x / (1.0 - x))
        .ln()
        .clamp(-INV_SIGMOID_LIMIT, INV_SIGMOID_LIMIT)
}

/// Number of SH coefficients per color channel for a degree: `(degree + 1)² - 1`.
#[inline]
pub const fn sh_dimensions_for_degree(degree: u8) -> usize {
    let d = degree as usize + 1;
    d * d - 1
}

#[inline]
pub(crate) fn normalize_quat(q: [f32; 4]) -> [f32; 4] {
    let norm = (q[0] * q[0] + q[1] * q[1] + q[2] * q[2] + q[3] * q[3]).sqrt();
    [q[0] / norm, q[1] / norm, q[2] / norm, q[3] / norm]
}

#[inline]
pub(crate) const fn times_quat(a: [f32; 4], s: f32) -> [f32; 4] {
    [a[0] * s, a[1] * s, a[2] * s, a[3] * s]
}
