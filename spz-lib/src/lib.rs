pub mod common;
pub mod compare;
pub mod coordinates;
pub mod error;
mod packing;
mod structures;

use error::SpzError;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use packing::pack_gaussians;
use packing::unpack_gaussians;
use std::io::{Read, Write};
use structures::PackedGaussians;
use structures::PackedGaussiansHeader;
use structures::HEADER_SIZE;
use zerocopy::IntoBytes;

pub use common::sh_dimensions_for_degree;
pub use coordinates::{convert_coordinates, CoordinateConverter, CoordinateSystem};
pub use structures::{GaussianCloud, Splat, SpzVersion, FLAG_ANTIALIASED, MAGIC};

/// Creates a zero-initialized cloud with `antialiased = false`.
pub fn create_cloud(num_points: u32, sh_degree: u8) -> GaussianCloud {
    GaussianCloud::new(num_points, sh_degree)
}

fn log_header(header: &PackedGaussiansHeader) {
    log::debug!(
        "SPZ header: version {}, {} points, SH degree {}, {} fractional bits, antialiased {}",
        header.version.get(),
        header.num_points.get(),
        header.sh_degree,
        header.fractional_bits,
        header.flags & FLAG_ANTIALIASED != 0
    );
}

/// Reads the header and all six sections from an already decompressed stream.
fn deserialize_packed_gaussians<R: Read>(reader: &mut R) -> Result<PackedGaussians, SpzError> {
    let mut header_bytes = [0u8; HEADER_SIZE];
    reader
        .read_exact(&mut header_bytes)
        .map_err(SpzError::from_read)?;
    let header = PackedGaussiansHeader::decode(&header_bytes)?;
    let mut packed = PackedGaussians::from_header(&header)?;
    log_header(&header);

    // A length past usize can never be satisfied by the stream.
    let lengths = packed.section_lengths().ok_or(SpzError::UnexpectedEof)?;
    for (section, len) in packed.sections_mut().into_iter().zip(lengths) {
        read_section(reader, section, len)?;
    }
    Ok(packed)
}

/// Reads exactly `len` bytes into `section`. The buffer grows with the data
/// actually decoded, never with the length taken from the header.
fn read_section<R: Read>(
    reader: &mut R,
    section: &mut Vec<u8>,
    len: usize,
) -> Result<(), SpzError> {
    reader
        .by_ref()
        .take(len as u64)
        .read_to_end(section)
        .map_err(SpzError::from_read)?;
    if section.len() != len {
        return Err(SpzError::UnexpectedEof);
    }
    Ok(())
}

fn serialize_packed_gaussians<W: Write>(
    pg: &PackedGaussians,
    writer: &mut W,
) -> Result<(), SpzError> {
    writer.write_all(pg.header().as_bytes())?;
    for section in pg.sections() {
        writer.write_all(section)?;
    }
    Ok(())
}

/// Reads a gzip-compressed SPZ stream of version 2 or 3.
///
/// Only the first gzip member is decoded, and only as far as the header and
/// sections require.
pub fn read_spz<R: Read>(reader: R) -> Result<GaussianCloud, SpzError> {
    let mut decoder = GzDecoder::new(reader);
    let packed = deserialize_packed_gaussians(&mut decoder)?;
    Ok(unpack_gaussians(&packed))
}

/// Writes `cloud` as a single gzip member in the given wire revision.
pub fn write_spz<W: Write>(
    cloud: &GaussianCloud,
    writer: W,
    version: SpzVersion,
) -> Result<(), SpzError> {
    let packed = pack_gaussians(cloud, version);
    let mut encoder = GzEncoder::new(writer, Compression::default());
    serialize_packed_gaussians(&packed, &mut encoder)?;
    let mut inner = encoder.finish()?;
    inner.flush()?;
    log::debug!(
        "Wrote SPZ {} with {} points, SH degree {}",
        version,
        cloud.num_points(),
        cloud.sh_degree()
    );
    Ok(())
}

pub fn write_spz_v2<W: Write>(cloud: &GaussianCloud, writer: W) -> Result<(), SpzError> {
    write_spz(cloud, writer, SpzVersion::V2)
}

pub fn write_spz_v3<W: Write>(cloud: &GaussianCloud, writer: W) -> Result<(), SpzError> {
    write_spz(cloud, writer, SpzVersion::V3)
}

cfg_if::cfg_if! {
if #[cfg(feature = "async")] {
    use async_compression::tokio::bufread::GzipDecoder;
    use async_compression::tokio::write::GzipEncoder;
    use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

    /// Async counterpart of [`read_spz`]; accepts the same bytes.
    pub async fn read_spz_async<R: AsyncRead + Unpin>(reader: R) -> Result<GaussianCloud, SpzError> {
        let mut decoder = GzipDecoder::new(BufReader::new(reader));

        let mut header_bytes = [0u8; HEADER_SIZE];
        decoder
            .read_exact(&mut header_bytes)
            .await
            .map_err(SpzError::from_read)?;
        let header = PackedGaussiansHeader::decode(&header_bytes)?;
        let mut packed = PackedGaussians::from_header(&header)?;
        log_header(&header);

        let lengths = packed.section_lengths().ok_or(SpzError::UnexpectedEof)?;
        for (section, len) in packed.sections_mut().into_iter().zip(lengths) {
            (&mut decoder)
                .take(len as u64)
                .read_to_end(section)
                .await
                .map_err(SpzError::from_read)?;
            if section.len() != len {
                return Err(SpzError::UnexpectedEof);
            }
        }
        Ok(unpack_gaussians(&packed))
    }

    /// Async counterpart of [`write_spz`]; produces the same bytes.
    pub async fn write_spz_async<W: AsyncWrite + Unpin>(
        cloud: &GaussianCloud,
        writer: W,
        version: SpzVersion,
    ) -> Result<(), SpzError> {
        let packed = pack_gaussians(cloud, version);
        let mut encoder = GzipEncoder::new(writer);

        encoder.write_all(packed.header().as_bytes()).await?;
        for section in packed.sections() {
            encoder.write_all(section).await?;
        }
        encoder.shutdown().await?;
        log::debug!(
            "Wrote SPZ {} with {} points, SH degree {}",
            version,
            cloud.num_points(),
            cloud.sh_degree()
        );
        Ok(())
    }
}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_1_SQRT_2;

    fn gzip(payload: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(payload).unwrap();
        encoder.finish().unwrap()
    }

    fn gunzip(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        GzDecoder::new(data).read_to_end(&mut out).unwrap();
        out
    }

    fn header_bytes(magic: u32, version: u32, num_points: u32, sh_degree: u8) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE);
        out.extend_from_slice(&magic.to_le_bytes());
        out.extend_from_slice(&version.to_le_bytes());
        out.extend_from_slice(&num_points.to_le_bytes());
        out.extend_from_slice(&[sh_degree, 12, 0, 0]);
        out
    }

    fn create_test_cloud() -> GaussianCloud {
        #[rustfmt::skip]
        let positions = [
            0.0f32, 0.1, 0.2,
            -1.5, 2.25, 100.0,
            -300.0, 0.001, 7.0,
        ];
        #[rustfmt::skip]
        let scales = [
            -4.0f32, -3.5, -3.0,
            0.0, 1.0, -9.0,
            -5.3, -5.2, -5.1,
        ];
        #[rustfmt::skip]
        let rotations = [
            0.0f32, 0.0, 0.0, 1.0,
            0.5, 0.5, 0.5, 0.5,
            0.1, -0.8, 0.2, -0.55,
        ];

        let mut cloud = GaussianCloud::with_antialiasing(3, 2, true);
        cloud.positions_mut().copy_from_slice(&positions);
        cloud.scales_mut().copy_from_slice(&scales);
        cloud.rotations_mut().copy_from_slice(&rotations);
        cloud.alphas_mut().copy_from_slice(&[0.5, -2.0, 4.0]);
        cloud.colors_mut().copy_from_slice(&[0.2, 0.3, 0.4, -1.0, 0.0, 1.0, 2.5, -2.5, 0.7]);
        // Multiples of 1/8 sit on every SH bucket grid.
        for (i, s) in cloud.sh_mut().iter_mut().enumerate() {
            *s = ((i % 9) as f32 - 4.0) / 8.0;
        }
        cloud
    }

    fn round_trip(cloud: &GaussianCloud, version: SpzVersion) -> GaussianCloud {
        let mut spz_data = Vec::new();
        write_spz(cloud, &mut spz_data, version).expect("write_spz(...) failed");
        read_spz(spz_data.as_slice()).expect("read_spz(...) failed")
    }

    #[test]
    fn test_empty_cloud_round_trip() {
        let cloud = create_cloud(0, 0);
        let mut spz_data = Vec::new();
        write_spz_v2(&cloud, &mut spz_data).unwrap();

        let decoded = read_spz(spz_data.as_slice()).unwrap();
        assert_eq!(decoded.num_points(), 0);
        assert_eq!(decoded.sh_degree(), 0);
        assert!(!decoded.is_antialiased());
        assert!(decoded.positions().is_empty());
        assert!(decoded.scales().is_empty());
        assert!(decoded.rotations().is_empty());
        assert!(decoded.alphas().is_empty());
        assert!(decoded.colors().is_empty());
        assert!(decoded.sh().is_empty());
    }

    #[test]
    fn test_unit_quaternion_v2() {
        let mut cloud = create_cloud(1, 0);
        cloud.rotations_mut().copy_from_slice(&[0.0, 0.0, 0.0, 1.0]);
        let decoded = round_trip(&cloud, SpzVersion::V2);
        let r = decoded.rotations();
        for c in &r[..3] {
            assert!(c.abs() <= 1.0 / 127.5, "{:?}", r);
        }
        assert!((r[3] - 1.0).abs() <= 1.0 / 127.5, "{:?}", r);
    }

    #[test]
    fn test_v3_round_trip() {
        let mut cloud = create_cloud(1, 1);
        cloud.rotations_mut().copy_from_slice(&[0.5, 0.5, 0.5, 0.5]);
        let decoded = round_trip(&cloud, SpzVersion::V3);
        assert_eq!(decoded.sh_degree(), 1);
        assert_eq!(decoded.sh().len(), 9);
        for c in decoded.rotations() {
            assert!((c - 0.5).abs() <= 2.0 * FRAC_1_SQRT_2 / 511.0, "{:?}", decoded.rotations());
        }
    }

    #[test]
    fn test_both_versions_preserve_cloud() {
        let cloud = create_test_cloud();
        for version in [SpzVersion::V2, SpzVersion::V3] {
            let decoded = round_trip(&cloud, version);
            assert_eq!(decoded.num_points(), 3);
            assert_eq!(decoded.sh_degree(), 2);
            assert!(decoded.is_antialiased());
            assert!(
                compare::clouds_equal_epsilon(&cloud, &decoded, 0.05),
                "version {} lost too much precision",
                version
            );
        }
    }

    #[test]
    fn test_second_round_trip_is_byte_identical() {
        let cloud = create_test_cloud();
        for version in [SpzVersion::V2, SpzVersion::V3] {
            let once = round_trip(&cloud, version);
            let twice = round_trip(&once, version);

            let mut a = Vec::new();
            let mut b = Vec::new();
            write_spz(&once, &mut a, version).unwrap();
            write_spz(&twice, &mut b, version).unwrap();
            assert_eq!(gunzip(&a), gunzip(&b), "version {}", version);
        }
    }

    #[test]
    fn test_stream_layout() {
        let cloud = create_test_cloud();
        let mut spz_data = Vec::new();
        write_spz_v3(&cloud, &mut spz_data).unwrap();
        let raw = gunzip(&spz_data);

        let n = 3;
        let sh_len = n * sh_dimensions_for_degree(2) * 3;
        assert_eq!(raw.len(), HEADER_SIZE + n * 9 + n + n * 3 + n * 3 + n * 4 + sh_len);
        assert_eq!(&raw[0..4], &MAGIC.to_le_bytes());
        assert_eq!(&raw[4..8], &3u32.to_le_bytes());
        assert_eq!(&raw[8..12], &3u32.to_le_bytes());
        assert_eq!(raw[12], 2);
        assert_eq!(raw[13], 12);
        assert_eq!(raw[14], FLAG_ANTIALIASED);

        // Positions come first: x of point 0 is zero, y is round(0.1 * 4096) = 410.
        assert_eq!(&raw[16..22], &[0, 0, 0, 0x9A, 0x01, 0x00]);
        // Then alphas: sigmoid(0.5) * 255 = 158.9
        assert_eq!(raw[16 + n * 9], 159);
    }

    #[test]
    fn test_invalid_magic() {
        let mut payload = header_bytes(0x1234_5678, 2, 0, 0);
        payload.extend_from_slice(&[0; 32]);
        match read_spz(gzip(&payload).as_slice()) {
            Err(SpzError::InvalidMagic(m)) => assert_eq!(m, 0x1234_5678),
            other => panic!("expected InvalidMagic, got {:?}", other),
        }
    }

    #[test]
    fn test_unsupported_version() {
        for version in [0u32, 1, 4, 0xFFFF_FFFF] {
            let payload = header_bytes(MAGIC, version, 0, 0);
            match read_spz(gzip(&payload).as_slice()) {
                Err(SpzError::UnsupportedVersion(v)) => assert_eq!(v, version),
                other => panic!("expected UnsupportedVersion, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_truncated_sh_section() {
        let cloud = create_test_cloud();
        let mut spz_data = Vec::new();
        write_spz_v2(&cloud, &mut spz_data).unwrap();
        let raw = gunzip(&spz_data);

        let truncated = gzip(&raw[..raw.len() - 5]);
        assert!(matches!(
            read_spz(truncated.as_slice()),
            Err(SpzError::UnexpectedEof)
        ));
    }

    #[test]
    fn test_truncated_header() {
        let payload = header_bytes(MAGIC, 2, 0, 0);
        assert!(matches!(
            read_spz(gzip(&payload[..10]).as_slice()),
            Err(SpzError::UnexpectedEof)
        ));
    }

    #[test]
    fn test_huge_point_count_on_short_stream() {
        for version in [2u32, 3] {
            for sh_degree in [0u8, 3, 255] {
                let mut payload = header_bytes(MAGIC, version, u32::MAX, sh_degree);
                payload.extend_from_slice(&[0u8; 64]);
                assert!(
                    matches!(read_spz(gzip(&payload).as_slice()), Err(SpzError::UnexpectedEof)),
                    "version {} degree {}",
                    version,
                    sh_degree
                );
            }
        }
    }

    #[test]
    fn test_sh_degree_above_three_is_read() {
        // One point at degree 4: 24 coefficients per channel.
        let mut payload = header_bytes(MAGIC, 2, 1, 4);
        payload.extend_from_slice(&[0u8; 9]);
        payload.push(255);
        payload.extend_from_slice(&[128u8; 3]);
        payload.extend_from_slice(&[160u8; 3]);
        payload.extend_from_slice(&[128u8; 3]);
        let mut sh = vec![128u8; 24 * 3];
        sh[71] = 192;
        payload.extend_from_slice(&sh);

        let cloud = read_spz(gzip(&payload).as_slice()).expect("degree 4 stream should read");
        assert_eq!(cloud.sh_degree(), 4);
        assert_eq!(cloud.sh().len(), 72);
        assert_eq!(cloud.sh()[71], 0.5);
        assert_eq!(cloud.sh()[0], 0.0);
        assert_eq!(cloud.scales(), &[0.0, 0.0, 0.0]);

        payload.pop();
        assert!(matches!(
            read_spz(gzip(&payload).as_slice()),
            Err(SpzError::UnexpectedEof)
        ));
    }

    #[test]
    fn test_huge_sh_values_are_clamped() {
        let mut cloud = create_cloud(1, 1);
        cloud.sh_mut()[0] = 1.0e10;
        cloud.sh_mut()[1] = -1.0e10;
        cloud.sh_mut()[8] = f32::MAX;

        let mut spz_data = Vec::new();
        write_spz_v2(&cloud, &mut spz_data).expect("write_spz_v2 failed");
        let decoded = read_spz(spz_data.as_slice()).unwrap();
        assert_eq!(decoded.sh()[0], 127.0 / 128.0);
        assert_eq!(decoded.sh()[1], -1.0);
        assert_eq!(decoded.sh()[8], 127.0 / 128.0);
    }

    #[test]
    fn test_zero_cloud_rotation_bytes() {
        let cloud = create_cloud(1, 0);
        let rotation_start = HEADER_SIZE + 9 + 1 + 3 + 3;

        let mut v2 = Vec::new();
        write_spz_v2(&cloud, &mut v2).unwrap();
        let raw = gunzip(&v2);
        assert_eq!(&raw[rotation_start..], &[0, 0, 0]);
        let decoded = read_spz(v2.as_slice()).unwrap();
        assert_eq!(decoded.rotations(), &[-1.0, -1.0, -1.0, 0.0]);

        let mut v3 = Vec::new();
        write_spz_v3(&cloud, &mut v3).unwrap();
        let raw = gunzip(&v3);
        assert_eq!(&raw[rotation_start..], &[0, 0, 0, 0]);
        let decoded = read_spz(v3.as_slice()).unwrap();
        assert_eq!(decoded.rotations(), &[1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_not_gzip_is_io_error() {
        let data = b"definitely not a gzip stream";
        assert!(matches!(read_spz(&data[..]), Err(SpzError::Io(_))));
    }

    #[test]
    fn test_trailing_bytes_are_ignored() {
        let cloud = create_test_cloud();
        let mut raw = Vec::new();
        let packed = pack_gaussians(&cloud, SpzVersion::V2);
        serialize_packed_gaussians(&packed, &mut raw).unwrap();
        raw.extend_from_slice(b"trailing garbage");

        let decoded = read_spz(gzip(&raw).as_slice()).unwrap();
        assert_eq!(decoded.num_points(), 3);
    }

    #[test]
    fn test_v2_header_with_each_degree() {
        for sh_degree in 0..=3u8 {
            let cloud = create_cloud(2, sh_degree);
            let decoded = round_trip(&cloud, SpzVersion::V2);
            assert_eq!(decoded.sh_degree(), sh_degree);
            assert_eq!(decoded.sh().len(), 2 * sh_dimensions_for_degree(sh_degree) * 3);
            assert!(!decoded.is_antialiased());
        }
    }

    #[test]
    fn test_convert_then_write() {
        let mut cloud = create_test_cloud();
        convert_coordinates(&mut cloud, CoordinateSystem::Rub, CoordinateSystem::Luf);
        let decoded = round_trip(&cloud, SpzVersion::V3);
        assert!((decoded.positions()[3] - 1.5).abs() < 1e-3);
        assert!((decoded.positions()[5] + 100.0).abs() < 1e-3);
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn test_async_matches_sync() {
        let cloud = create_test_cloud();
        for version in [SpzVersion::V2, SpzVersion::V3] {
            let mut async_data = Vec::new();
            write_spz_async(&cloud, &mut async_data, version)
                .await
                .expect("write_spz_async failed");

            let mut sync_data = Vec::new();
            write_spz(&cloud, &mut sync_data, version).unwrap();
            assert_eq!(gunzip(&async_data), gunzip(&sync_data));

            let from_async = read_spz_async(sync_data.as_slice())
                .await
                .expect("read_spz_async failed");
            let from_sync = read_spz(async_data.as_slice()).unwrap();
            assert_eq!(from_async, from_sync);
        }
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn test_async_rejects_bad_magic() {
        let payload = header_bytes(0, 2, 0, 0);
        let data = gzip(&payload);
        assert!(matches!(
            read_spz_async(data.as_slice()).await,
            Err(SpzError::InvalidMagic(0))
        ));
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn test_async_huge_point_count_on_short_stream() {
        let mut payload = header_bytes(MAGIC, 3, u32::MAX, 255);
        payload.extend_from_slice(&[0u8; 64]);
        let data = gzip(&payload);
        assert!(matches!(
            read_spz_async(data.as_slice()).await,
            Err(SpzError::UnexpectedEof)
        ));
    }
}
