use crate::structures::GaussianCloud;
use std::fmt;
use std::str::FromStr;

/// Axis convention of a cloud: Left/Right for X, Down/Up for Y, Back/Front for Z.
///
/// The X/Y/Z letters live in bits 0/1/2 of `code - 1`, so `LDB` is all-zero
/// and `RUF` is all-one.
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoordinateSystem {
    #[default]
    Unspecified = 0,
    Ldb = 1,
    Rdb = 2,
    Lub = 3,
    Rub = 4,
    Ldf = 5,
    Rdf = 6,
    Luf = 7,
    Ruf = 8,
}

impl CoordinateSystem {
    pub const ALL: [CoordinateSystem; 9] = [
        CoordinateSystem::Unspecified,
        CoordinateSystem::Ldb,
        CoordinateSystem::Rdb,
        CoordinateSystem::Lub,
        CoordinateSystem::Rub,
        CoordinateSystem::Ldf,
        CoordinateSystem::Rdf,
        CoordinateSystem::Luf,
        CoordinateSystem::Ruf,
    ];

    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Axis bits, or `None` for [`CoordinateSystem::Unspecified`].
    const fn axis_bits(self) -> Option<u8> {
        match self {
            CoordinateSystem::Unspecified => None,
            cs => Some(cs as u8 - 1),
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            CoordinateSystem::Unspecified => "UNSPECIFIED",
            CoordinateSystem::Ldb => "LDB",
            CoordinateSystem::Rdb => "RDB",
            CoordinateSystem::Lub => "LUB",
            CoordinateSystem::Rub => "RUB",
            CoordinateSystem::Ldf => "LDF",
            CoordinateSystem::Rdf => "RDF",
            CoordinateSystem::Luf => "LUF",
            CoordinateSystem::Ruf => "RUF",
        }
    }
}

impl fmt::Display for CoordinateSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CoordinateSystem {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CoordinateSystem::ALL
            .iter()
            .copied()
            .find(|cs| cs.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown coordinate system: {}", s))
    }
}

/// Per-axis sign flips between two coordinate systems.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateConverter {
    pub flip_p: [f32; 3],
    pub flip_q: [f32; 3],
    pub flip_sh: [f32; 15],
}

impl CoordinateConverter {
    pub fn new(from: CoordinateSystem, to: CoordinateSystem) -> Self {
        let [x, y, z] = axes_match(from, to).map(|m| if m { 1.0 } else { -1.0 });
        CoordinateConverter {
            flip_p: [x, y, z],
            flip_q: [y * z, x * z, x * y],
            flip_sh: [
                y,
                z,
                x,
                x * y,
                y * z,
                1.0,
                x * z,
                1.0,
                y,
                x * y * z,
                y,
                z,
                x,
                z,
                x,
            ],
        }
    }

    pub fn is_identity(&self) -> bool {
        self.flip_p == [1.0; 3]
    }

    /// Applies the flips in place. The w component of each rotation is left
    /// untouched.
    pub fn apply(&self, cloud: &mut GaussianCloud) {
        let sh_dim = cloud.sh_dim();
        let (positions, rotations, sh) = cloud.geometry_mut();

        for p in positions.chunks_exact_mut(3) {
            p.iter_mut().zip(self.flip_p).for_each(|(v, f)| *v *= f);
        }
        for q in rotations.chunks_exact_mut(4) {
            q.iter_mut().zip(self.flip_q).for_each(|(v, f)| *v *= f);
        }
        if sh_dim > 0 {
            for point in sh.chunks_exact_mut(sh_dim * 3) {
                for (j, coeff) in point.chunks_exact_mut(3).enumerate() {
                    let flip = self.flip_sh[j % self.flip_sh.len()];
                    coeff.iter_mut().for_each(|v| *v *= flip);
                }
            }
        }
    }
}

fn axes_match(a: CoordinateSystem, b: CoordinateSystem) -> [bool; 3] {
    match (a.axis_bits(), b.axis_bits()) {
        (Some(a), Some(b)) => [0, 1, 2].map(|k| (a >> k) & 1 == (b >> k) & 1),
        _ => [true; 3],
    }
}

/// Converts a cloud between coordinate systems by flipping signs in place.
/// Either side being [`CoordinateSystem::Unspecified`] leaves the cloud unchanged.
pub fn convert_coordinates(
    cloud: &mut GaussianCloud,
    from: CoordinateSystem,
    to: CoordinateSystem,
) {
    let converter = CoordinateConverter::new(from, to);
    if converter.is_identity() {
        log::debug!("Coordinate conversion {} -> {} is a no-op", from, to);
        return;
    }
    converter.apply(cloud);
}
