//! Conversions between [`GaussianCloud`] floats and the quantized byte
//! sections of an SPZ stream.

use crate::common::{
    inv_sigmoid, normalize_quat, quantize_sh, sh_bucket_size, sigmoid, times_quat, to_byte,
    unquantize_sh, COLOR_SCALE, FRACTIONAL_BITS,
};
use crate::structures::{GaussianCloud, PackedGaussians, SpzVersion};
use std::f32::consts::FRAC_1_SQRT_2;

const ROTATION_V2_SCALE: f32 = 127.5;
const ROTATION_V3_MASK: u32 = (1 << 9) - 1;
const SCALE_OFFSET: f32 = 10.0;
const SCALE_STEPS: f32 = 16.0;

pub(crate) fn pack_gaussians(gc: &GaussianCloud, version: SpzVersion) -> PackedGaussians {
    let mut pg = PackedGaussians::new(
        gc.num_points(),
        gc.sh_degree(),
        FRACTIONAL_BITS,
        gc.is_antialiased(),
        version,
    );
    log::trace!("Packing {} points as SPZ {}", gc.num_points(), version);

    pack_positions(gc.positions(), &mut pg.positions, FRACTIONAL_BITS);
    pack_scales(gc.scales(), &mut pg.scales);
    match version {
        SpzVersion::V2 => pack_rotations_v2(gc.rotations(), &mut pg.rotations),
        SpzVersion::V3 => pack_rotations_v3(gc.rotations(), &mut pg.rotations),
    }
    pack_alphas(gc.alphas(), &mut pg.alphas);
    pack_colors(gc.colors(), &mut pg.colors);
    pack_sh(gc.sh(), &mut pg.sh, gc.sh_dim());
    pg
}

pub(crate) fn unpack_gaussians(pg: &PackedGaussians) -> GaussianCloud {
    let mut cloud = GaussianCloud::with_antialiasing(pg.num_points, pg.sh_degree, pg.antialiased);
    log::trace!("Unpacking {} points from SPZ {}", pg.num_points, pg.version);

    unpack_positions(&pg.positions, cloud.positions_mut(), pg.fractional_bits);
    unpack_scales(&pg.scales, cloud.scales_mut());
    match pg.version {
        SpzVersion::V2 => unpack_rotations_v2(&pg.rotations, cloud.rotations_mut()),
        SpzVersion::V3 => unpack_rotations_v3(&pg.rotations, cloud.rotations_mut()),
    }
    unpack_alphas(&pg.alphas, cloud.alphas_mut());
    unpack_colors(&pg.colors, cloud.colors_mut());
    unpack_sh(&pg.sh, cloud.sh_mut());
    cloud
}

/// Signed 24-bit fixed point, least significant byte first. Values outside
/// the representable range wrap.
fn pack_positions(positions: &[f32], out: &mut [u8], fractional_bits: u8) {
    let sf = 2f32.powi(fractional_bits as i32);
    positions
        .iter()
        .zip(out.chunks_exact_mut(3))
        .for_each(|(&val, bytes)| {
            let fixed = (val * sf).round() as i32;
            bytes[0] = (fixed & 0xFF) as u8;
            bytes[1] = ((fixed >> 8) & 0xFF) as u8;
            bytes[2] = ((fixed >> 16) & 0xFF) as u8;
        });
}

#[inline]
fn parse_3bytes(bytes: &[u8]) -> i32 {
    let b0 = bytes[0] as u32;
    let b1 = bytes[1] as u32;
    let b2 = bytes[2] as u32;
    let mut fixed = b0 | (b1 << 8) | (b2 << 16);
    if (fixed & 0x0080_0000) != 0 {
        fixed |= 0xFF00_0000; // Sign extend
    }
    fixed as i32
}

fn unpack_positions(bytes: &[u8], positions: &mut [f32], fractional_bits: u8) {
    let scale = 1.0 / 2f32.powi(fractional_bits as i32);
    positions
        .iter_mut()
        .zip(bytes.chunks_exact(3))
        .for_each(|(p, chunk)| {
            *p = parse_3bytes(chunk) as f32 * scale;
        });
}

fn pack_scales(scales: &[f32], out: &mut [u8]) {
    out.iter_mut()
        .zip(scales.iter())
        .for_each(|(b, &s)| *b = to_byte((s + SCALE_OFFSET) * SCALE_STEPS));
}

fn unpack_scales(bytes: &[u8], scales: &mut [f32]) {
    scales
        .iter_mut()
        .zip(bytes.iter())
        .for_each(|(s, &b)| *s = b as f32 / SCALE_STEPS - SCALE_OFFSET);
}

/// Stores x, y, z of the normalized quaternion with w forced non-negative.
fn pack_rotations_v2(rotations: &[f32], out: &mut [u8]) {
    rotations
        .chunks_exact(4)
        .zip(out.chunks_exact_mut(3))
        .for_each(|(quat, bytes)| {
            // A zero quaternion normalizes to NaN and packs as [0, 0, 0].
            let q = normalize_quat([quat[0], quat[1], quat[2], quat[3]]);
            let scale = if q[3] < 0.0 {
                -ROTATION_V2_SCALE
            } else {
                ROTATION_V2_SCALE
            };
            let q = times_quat(q, scale);
            bytes[0] = to_byte(q[0] + ROTATION_V2_SCALE);
            bytes[1] = to_byte(q[1] + ROTATION_V2_SCALE);
            bytes[2] = to_byte(q[2] + ROTATION_V2_SCALE);
        });
}

fn unpack_rotations_v2(bytes: &[u8], rotations: &mut [f32]) {
    let rotation_scale = 1.0 / ROTATION_V2_SCALE;
    bytes
        .chunks_exact(3)
        .zip(rotations.chunks_exact_mut(4))
        .for_each(|(r_chunk, rot_chunk)| {
            let x = r_chunk[0] as f32 * rotation_scale - 1.0;
            let y = r_chunk[1] as f32 * rotation_scale - 1.0;
            let z = r_chunk[2] as f32 * rotation_scale - 1.0;
            let w = (1.0 - (x * x + y * y + z * z)).max(0.0).sqrt();

            rot_chunk[0] = x;
            rot_chunk[1] = y;
            rot_chunk[2] = z;
            rot_chunk[3] = w;
        });
}

/// Packs a quaternion into the "smallest three" word.
///
/// The largest-magnitude component is dropped and its index kept in bits
/// 30..31. The others are written from the lowest index up, each shifting the
/// word left by 10 bits, so the highest retained index ends up in bits 0..9.
/// Each 10-bit field is a 9-bit magnitude in units of `(1/√2) / 511` plus a
/// sign bit, relative to a quaternion whose largest component is positive.
fn pack_quaternion_smallest_three(quat: [f32; 4]) -> u32 {
    // A zero quaternion normalizes to NaN and packs as the all-zero word.
    let q = normalize_quat(quat);
    let largest = (1..4).fold(0, |best, i| {
        if q[i].abs() > q[best].abs() {
            i
        } else {
            best
        }
    });
    let negate = q[largest] < 0.0;

    let mut comp = largest as u32;
    for (i, &c) in q.iter().enumerate() {
        if i == largest {
            continue;
        }
        let negbit = ((c < 0.0) ^ negate) as u32;
        let mag = (ROTATION_V3_MASK as f32 * (c.abs() / FRAC_1_SQRT_2) + 0.5) as u32;
        comp = (comp << 10) | (negbit << 9) | mag.min(ROTATION_V3_MASK);
    }
    comp
}

fn unpack_quaternion_smallest_three(word: u32) -> [f32; 4] {
    let mut comp = word;
    let largest = (comp >> 30) as usize;
    let mut q = [0.0f32; 4];
    let mut sum_squares = 0.0;
    for j in (0..4).rev() {
        if j == largest {
            continue;
        }
        let magnitude = comp & ROTATION_V3_MASK;
        let negative = (comp >> 9) & 0x1 == 1;
        let r = FRAC_1_SQRT_2 * magnitude as f32 / ROTATION_V3_MASK as f32;
        q[j] = if negative { -r } else { r };
        sum_squares += r * r;
        comp >>= 10;
    }
    q[largest] = (1.0 - sum_squares).max(0.0).sqrt();
    q
}

fn pack_rotations_v3(rotations: &[f32], out: &mut [u8]) {
    rotations
        .chunks_exact(4)
        .zip(out.chunks_exact_mut(4))
        .for_each(|(quat, bytes)| {
            let word = pack_quaternion_smallest_three([quat[0], quat[1], quat[2], quat[3]]);
            bytes.copy_from_slice(&word.to_le_bytes());
        });
}

fn unpack_rotations_v3(bytes: &[u8], rotations: &mut [f32]) {
    bytes
        .chunks_exact(4)
        .zip(rotations.chunks_exact_mut(4))
        .for_each(|(r_chunk, rot_chunk)| {
            let word = u32::from_le_bytes([r_chunk[0], r_chunk[1], r_chunk[2], r_chunk[3]]);
            rot_chunk.copy_from_slice(&unpack_quaternion_smallest_three(word));
        });
}

fn pack_alphas(alphas: &[f32], out: &mut [u8]) {
    out.iter_mut()
        .zip(alphas.iter())
        .for_each(|(b, &a)| *b = to_byte(sigmoid(a) * 255.0));
}

fn unpack_alphas(bytes: &[u8], alphas: &mut [f32]) {
    alphas
        .iter_mut()
        .zip(bytes.iter())
        .for_each(|(a, &b)| *a = inv_sigmoid(b as f32 / 255.0));
}

fn pack_colors(colors: &[f32], out: &mut [u8]) {
    let color_factor = COLOR_SCALE * 255.0;
    let color_offset = 127.5; // 0.5 * 255.0
    out.iter_mut()
        .zip(colors.iter())
        .for_each(|(b, &c)| *b = to_byte(c * color_factor + color_offset));
}

fn unpack_colors(bytes: &[u8], colors: &mut [f32]) {
    colors
        .iter_mut()
        .zip(bytes.iter())
        .for_each(|(c, &b)| *c = (b as f32 / 255.0 - 0.5) / COLOR_SCALE);
}

/// Iterates point, coefficient, channel; the bucket width depends on the
/// coefficient only.
fn pack_sh(sh: &[f32], out: &mut [u8], sh_dim: usize) {
    if sh_dim == 0 {
        return;
    }
    sh.chunks_exact(sh_dim * 3)
        .zip(out.chunks_exact_mut(sh_dim * 3))
        .for_each(|(point, bytes)| {
            point
                .chunks_exact(3)
                .zip(bytes.chunks_exact_mut(3))
                .enumerate()
                .for_each(|(j, (coeff, coeff_bytes))| {
                    let bucket = sh_bucket_size(j);
                    for (b, &x) in coeff_bytes.iter_mut().zip(coeff) {
                        *b = quantize_sh(x, bucket);
                    }
                });
        });
}

fn unpack_sh(bytes: &[u8], sh: &mut [f32]) {
    sh.iter_mut()
        .zip(bytes.iter())
        .for_each(|(s, &b)| *s = unquantize_sh(b));
}
