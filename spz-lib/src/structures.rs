use crate::common::sh_dimensions_for_degree;
use crate::error::SpzError;
use std::fmt;
use zerocopy::byteorder::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

pub const MAGIC: u32 = 0x5053474E; // 'NGSP'
pub const FLAG_ANTIALIASED: u8 = 0x1;
pub const HEADER_SIZE: usize = std::mem::size_of::<PackedGaussiansHeader>();

/// Wire revision of an SPZ stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpzVersion {
    /// Rotations stored as three biased bytes (x, y, z), w recovered on decode.
    V2,
    /// Rotations stored as a 32-bit "smallest three" word.
    V3,
}

impl SpzVersion {
    pub const fn as_u32(self) -> u32 {
        match self {
            SpzVersion::V2 => 2,
            SpzVersion::V3 => 3,
        }
    }

    pub const fn rotation_bytes(self) -> usize {
        match self {
            SpzVersion::V2 => 3,
            SpzVersion::V3 => 4,
        }
    }
}

impl TryFrom<u32> for SpzVersion {
    type Error = SpzError;

    fn try_from(version: u32) -> Result<Self, Self::Error> {
        match version {
            2 => Ok(SpzVersion::V2),
            3 => Ok(SpzVersion::V3),
            v => Err(SpzError::UnsupportedVersion(v)),
        }
    }
}

impl fmt::Display for SpzVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.as_u32())
    }
}

/// In-memory Gaussian cloud.
///
/// All buffers are point-major and interleaved: `[x, y, z]` positions and
/// scales, `[x, y, z, w]` rotations, one alpha, `[r, g, b]` colors and
/// `M` RGB triplets of SH coefficients per point, where
/// `M = sh_dimensions_for_degree(sh_degree)`. Buffer lengths are fixed at
/// construction; element values may be mutated freely.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct GaussianCloud {
    num_points: u32,
    sh_degree: u8,
    antialiased: bool,
    positions: Vec<f32>,
    scales: Vec<f32>,
    rotations: Vec<f32>,
    alphas: Vec<f32>,
    colors: Vec<f32>,
    sh: Vec<f32>,
}

impl GaussianCloud {
    /// Creates a zero-initialized, non-antialiased cloud.
    pub fn new(num_points: u32, sh_degree: u8) -> Self {
        Self::with_antialiasing(num_points, sh_degree, false)
    }

    pub fn with_antialiasing(num_points: u32, sh_degree: u8, antialiased: bool) -> Self {
        let np = num_points as usize;
        let sh_dim = sh_dimensions_for_degree(sh_degree);
        GaussianCloud {
            num_points,
            sh_degree,
            antialiased,
            positions: vec![0.0; np * 3],
            scales: vec![0.0; np * 3],
            rotations: vec![0.0; np * 4],
            alphas: vec![0.0; np],
            colors: vec![0.0; np * 3],
            sh: vec![0.0; np * sh_dim * 3],
        }
    }

    pub fn num_points(&self) -> u32 {
        self.num_points
    }

    pub fn sh_degree(&self) -> u8 {
        self.sh_degree
    }

    /// SH coefficients per color channel and point.
    pub fn sh_dim(&self) -> usize {
        sh_dimensions_for_degree(self.sh_degree)
    }

    pub fn is_antialiased(&self) -> bool {
        self.antialiased
    }

    pub fn positions(&self) -> &[f32] {
        &self.positions
    }

    pub fn positions_mut(&mut self) -> &mut [f32] {
        &mut self.positions
    }

    pub fn scales(&self) -> &[f32] {
        &self.scales
    }

    pub fn scales_mut(&mut self) -> &mut [f32] {
        &mut self.scales
    }

    pub fn rotations(&self) -> &[f32] {
        &self.rotations
    }

    pub fn rotations_mut(&mut self) -> &mut [f32] {
        &mut self.rotations
    }

    pub fn alphas(&self) -> &[f32] {
        &self.alphas
    }

    pub fn alphas_mut(&mut self) -> &mut [f32] {
        &mut self.alphas
    }

    pub fn colors(&self) -> &[f32] {
        &self.colors
    }

    pub fn colors_mut(&mut self) -> &mut [f32] {
        &mut self.colors
    }

    pub fn sh(&self) -> &[f32] {
        &self.sh
    }

    pub fn sh_mut(&mut self) -> &mut [f32] {
        &mut self.sh
    }

    /// Mutable views of positions, rotations and SH at once, for passes that
    /// touch several buffers per point.
    pub(crate) fn geometry_mut(&mut self) -> (&mut [f32], &mut [f32], &mut [f32]) {
        (&mut self.positions, &mut self.rotations, &mut self.sh)
    }

    /// Borrowed view of a single splat, or `None` when `index` is out of range.
    pub fn splat(&self, index: usize) -> Option<Splat<'_>> {
        if index >= self.num_points as usize {
            return None;
        }
        let sh_dim = self.sh_dim();
        Some(Splat {
            index,
            position: &self.positions[index * 3..index * 3 + 3],
            scale: &self.scales[index * 3..index * 3 + 3],
            rotation: &self.rotations[index * 4..index * 4 + 4],
            alpha: self.alphas[index],
            color: &self.colors[index * 3..index * 3 + 3],
            sh: &self.sh[index * sh_dim * 3..(index + 1) * sh_dim * 3],
        })
    }
}

/// One splat of a [`GaussianCloud`].
#[derive(Debug, Clone, Copy)]
pub struct Splat<'a> {
    pub index: usize,
    pub position: &'a [f32],
    pub scale: &'a [f32],
    pub rotation: &'a [f32],
    pub alpha: f32,
    pub color: &'a [f32],
    /// SH coefficients as consecutive RGB triplets.
    pub sh: &'a [f32],
}

fn write_floats(f: &mut fmt::Formatter<'_>, values: &[f32]) -> fmt::Result {
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{:.6}", v)?;
    }
    writeln!(f)
}

impl fmt::Display for Splat<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Splat {}: ", self.index)?;
        write!(f, "  position: ")?;
        write_floats(f, self.position)?;
        write!(f, "  scale   : ")?;
        write_floats(f, self.scale)?;
        write!(f, "  rotation: ")?;
        write_floats(f, self.rotation)?;
        write!(f, "  alpha   : ")?;
        write_floats(f, &[self.alpha])?;
        write!(f, "  color   : ")?;
        write_floats(f, self.color)?;
        for (j, triplet) in self.sh.chunks_exact(3).enumerate() {
            write!(f, "  sh {:2}   : ", j)?;
            write_floats(f, triplet)?;
        }
        Ok(())
    }
}

/// Quantized cloud, laid out byte-for-byte as the sections of an SPZ stream.
#[derive(Debug, Clone)]
pub(crate) struct PackedGaussians {
    pub num_points: u32,
    pub sh_degree: u8,
    pub fractional_bits: u8,
    pub antialiased: bool,
    pub version: SpzVersion,
    pub positions: Vec<u8>,
    pub scales: Vec<u8>,
    pub rotations: Vec<u8>,
    pub alphas: Vec<u8>,
    pub colors: Vec<u8>,
    pub sh: Vec<u8>,
}

impl PackedGaussians {
    /// Zeroed sections sized for `num_points` points at the given version.
    pub fn new(
        num_points: u32,
        sh_degree: u8,
        fractional_bits: u8,
        antialiased: bool,
        version: SpzVersion,
    ) -> Self {
        let np = num_points as usize;
        let sh_dim = sh_dimensions_for_degree(sh_degree);
        PackedGaussians {
            num_points,
            sh_degree,
            fractional_bits,
            antialiased,
            version,
            positions: vec![0; np * 3 * 3],
            scales: vec![0; np * 3],
            rotations: vec![0; np * version.rotation_bytes()],
            alphas: vec![0; np],
            colors: vec![0; np * 3],
            sh: vec![0; np * sh_dim * 3],
        }
    }

    /// Describes the stream behind `header` with every section still empty.
    /// Nothing is allocated from the header counts; the reader grows each
    /// section as bytes arrive.
    pub fn from_header(header: &PackedGaussiansHeader) -> Result<Self, SpzError> {
        let version = SpzVersion::try_from(header.version.get())?;
        Ok(PackedGaussians {
            num_points: header.num_points.get(),
            sh_degree: header.sh_degree,
            fractional_bits: header.fractional_bits,
            antialiased: header.flags & FLAG_ANTIALIASED != 0,
            version,
            positions: Vec::new(),
            scales: Vec::new(),
            rotations: Vec::new(),
            alphas: Vec::new(),
            colors: Vec::new(),
            sh: Vec::new(),
        })
    }

    /// Expected byte length of each section, in stream order. `None` when a
    /// length does not fit in `usize`.
    pub fn section_lengths(&self) -> Option<[usize; 6]> {
        let np = usize::try_from(self.num_points).ok()?;
        let sh_dim = sh_dimensions_for_degree(self.sh_degree);
        Some([
            np.checked_mul(9)?,
            np,
            np.checked_mul(3)?,
            np.checked_mul(3)?,
            np.checked_mul(self.version.rotation_bytes())?,
            np.checked_mul(sh_dim)?.checked_mul(3)?,
        ])
    }

    pub fn header(&self) -> PackedGaussiansHeader {
        PackedGaussiansHeader {
            magic: U32::new(MAGIC),
            version: U32::new(self.version.as_u32()),
            num_points: U32::new(self.num_points),
            sh_degree: self.sh_degree,
            fractional_bits: self.fractional_bits,
            flags: if self.antialiased { FLAG_ANTIALIASED } else { 0 },
            reserved: 0,
        }
    }

    /// Sections in stream order: positions, alphas, colors, scales, rotations, SH.
    pub fn sections(&self) -> [&[u8]; 6] {
        [
            &self.positions,
            &self.alphas,
            &self.colors,
            &self.scales,
            &self.rotations,
            &self.sh,
        ]
    }

    pub fn sections_mut(&mut self) -> [&mut Vec<u8>; 6] {
        [
            &mut self.positions,
            &mut self.alphas,
            &mut self.colors,
            &mut self.scales,
            &mut self.rotations,
            &mut self.sh,
        ]
    }
}

/// The 16-byte little-endian header that starts every decompressed SPZ stream.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub(crate) struct PackedGaussiansHeader {
    pub magic: U32,
    pub version: U32,
    pub num_points: U32,
    pub sh_degree: u8,
    pub fractional_bits: u8,
    pub flags: u8,
    pub reserved: u8,
}

impl PackedGaussiansHeader {
    /// Parses and validates the magic. The version is validated by
    /// [`PackedGaussians::from_header`].
    pub fn decode(bytes: &[u8; HEADER_SIZE]) -> Result<Self, SpzError> {
        let header =
            PackedGaussiansHeader::read_from_bytes(bytes).map_err(|_| SpzError::UnexpectedEof)?;
        if header.magic.get() != MAGIC {
            return Err(SpzError::InvalidMagic(header.magic.get()));
        }
        Ok(header)
    }
}
