//! 16-bit RGB PNG emission with HDR signalling chunks.
//!
//! Chunk order after the signature:
//!
//! ```text
//! IHDR  cICP  cLLi  iCCP  sBIT  IDAT...  IEND
//! ```
//!
//! `cICP` carries BT.2020 primaries, the PQ transfer and identity matrix
//! coefficients (samples are RGB). `cLLi` carries MaxCLL and MaxFALL as
//! big-endian `u32` in units of 0.0001 cd/m2. `sBIT` declares the target
//! bit depth, not the container depth.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use anyhow::{Context, anyhow, bail, ensure};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use png::chunk::ChunkType;
use tracing::{debug, info};

use crate::config::CONTAINER_BITS;
use crate::error::{ConvertError, ConvertResult};
use crate::frame::OutputPlane;
use crate::icc::IccProfile;
use crate::stats::ImageMetadata;

pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

const CICP: ChunkType = ChunkType(*b"cICP");
const CLLI: ChunkType = ChunkType(*b"cLLi");
const ICCP: ChunkType = ChunkType(*b"iCCP");
const SBIT: ChunkType = ChunkType(*b"sBIT");

/// ITU-T H.273 code points.
pub const CICP_PRIMARIES_BT2020: u8 = 9;
pub const CICP_TRANSFER_PQ: u8 = 16;
pub const CICP_MATRIX_IDENTITY: u8 = 0;

/// `cLLi` values are stored with four implied decimal digits.
pub const CLLI_SCALE: u32 = 10_000;

/// Coding-independent code points (`cICP` payload).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cicp {
    pub primaries: u8,
    pub transfer: u8,
    pub matrix: u8,
    pub full_range: bool,
}

impl Cicp {
    pub const BT2100_PQ: Self = Self {
        primaries: CICP_PRIMARIES_BT2020,
        transfer: CICP_TRANSFER_PQ,
        matrix: CICP_MATRIX_IDENTITY,
        full_range: true,
    };

    pub fn to_bytes(self) -> [u8; 4] {
        [
            self.primaries,
            self.transfer,
            self.matrix,
            u8::from(self.full_range),
        ]
    }

    pub fn from_bytes(data: &[u8]) -> anyhow::Result<Self> {
        ensure!(data.len() == 4, "cICP chunk must be 4 bytes, got {}", data.len());
        ensure!(data[3] <= 1, "cICP full-range flag must be 0 or 1, got {}", data[3]);
        Ok(Self {
            primaries: data[0],
            transfer: data[1],
            matrix: data[2],
            full_range: data[3] == 1,
        })
    }
}

/// Content light level (`cLLi` payload) in units of 0.0001 cd/m2.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContentLightLevel {
    pub max_cll: u32,
    pub max_fall: u32,
}

impl ContentLightLevel {
    pub fn from_metadata(metadata: ImageMetadata) -> Self {
        Self {
            max_cll: u32::from(metadata.max_cll) * CLLI_SCALE,
            max_fall: u32::from(metadata.max_fall) * CLLI_SCALE,
        }
    }

    /// Whole-nit values. Fractional parts are truncated.
    pub fn to_metadata(self) -> ImageMetadata {
        ImageMetadata {
            max_cll: u16::try_from(self.max_cll / CLLI_SCALE).unwrap_or(u16::MAX),
            max_fall: u16::try_from(self.max_fall / CLLI_SCALE).unwrap_or(u16::MAX),
        }
    }

    pub fn to_bytes(self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[..4].copy_from_slice(&self.max_cll.to_be_bytes());
        out[4..].copy_from_slice(&self.max_fall.to_be_bytes());
        out
    }

    pub fn from_bytes(data: &[u8]) -> anyhow::Result<Self> {
        ensure!(data.len() == 8, "cLLi chunk must be 8 bytes, got {}", data.len());
        Ok(Self {
            max_cll: u32::from_be_bytes([data[0], data[1], data[2], data[3]]),
            max_fall: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
        })
    }
}

/// Writes an `OutputPlane` as an RGB PNG with the HDR chunk set.
#[derive(Clone, Debug)]
pub struct PngEmitter {
    icc: IccProfile,
    significant_bits: u8,
}

impl PngEmitter {
    /// `significant_bits` is the quantized signal depth declared in sBIT.
    pub fn new(icc: IccProfile, significant_bits: u8) -> Self {
        Self {
            icc,
            significant_bits,
        }
    }

    /// Encode into `out`. Samples are written big-endian.
    pub fn write<W: Write>(
        &self,
        out: W,
        plane: &OutputPlane,
        metadata: ImageMetadata,
    ) -> ConvertResult<()> {
        if self.significant_bits == 0 || self.significant_bits > CONTAINER_BITS {
            return Err(ConvertError::InvalidConfig(format!(
                "sBIT depth {} does not fit {CONTAINER_BITS}-bit samples",
                self.significant_bits
            )));
        }

        let mut encoder = png::Encoder::new(out, plane.width(), plane.height());
        encoder.set_color(png::ColorType::Rgb);
        encoder.set_depth(png::BitDepth::Sixteen);
        let mut writer = encoder.write_header()?;

        let clli = ContentLightLevel::from_metadata(metadata);
        writer.write_chunk(CICP, &Cicp::BT2100_PQ.to_bytes())?;
        writer.write_chunk(CLLI, &clli.to_bytes())?;
        writer.write_chunk(ICCP, &self.iccp_payload()?)?;
        writer.write_chunk(SBIT, &[self.significant_bits; 3])?;
        debug!(
            max_cll = clli.max_cll,
            max_fall = clli.max_fall,
            profile = self.icc.name(),
            "wrote HDR chunks"
        );

        writer.write_image_data(&sample_bytes(plane)?)?;
        writer.finish()?;
        Ok(())
    }

    /// Encode to a file and return the number of bytes written.
    pub fn write_file(
        &self,
        path: &Path,
        plane: &OutputPlane,
        metadata: ImageMetadata,
    ) -> ConvertResult<u64> {
        let file = File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))
            .map_err(ConvertError::ContainerWrite)?;
        let mut out = BufWriter::new(file);
        self.write(&mut out, plane, metadata)?;
        let file = out
            .into_inner()
            .map_err(|err| ConvertError::container_write(err.into_error()))?;
        let bytes = file
            .metadata()
            .with_context(|| format!("failed to stat {}", path.display()))
            .map_err(ConvertError::ContainerWrite)?
            .len();
        info!("Encode success: {bytes} total bytes");
        Ok(bytes)
    }

    /// Profile name, NUL, compression method 0, zlib stream.
    fn iccp_payload(&self) -> ConvertResult<Vec<u8>> {
        let mut payload = Vec::with_capacity(self.icc.name().len() + 2 + self.icc.data().len());
        payload.extend_from_slice(self.icc.name().as_bytes());
        payload.extend_from_slice(&[0, 0]);
        let mut zlib = ZlibEncoder::new(payload, Compression::default());
        zlib.write_all(self.icc.data())
            .map_err(ConvertError::container_write)?;
        zlib.finish().map_err(ConvertError::container_write)
    }
}

fn sample_bytes(plane: &OutputPlane) -> ConvertResult<Vec<u8>> {
    let samples = plane.samples();
    let mut bytes = Vec::new();
    crate::frame::try_reserve(&mut bytes, samples.len() * 2, "PNG sample buffer")?;
    for s in samples {
        bytes.extend_from_slice(&s.to_be_bytes());
    }
    Ok(bytes)
}

/// HDR signalling recovered from an encoded PNG.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HdrChunks {
    pub cicp: Option<Cicp>,
    pub content_light_level: Option<ContentLightLevel>,
    pub significant_bits: Option<Vec<u8>>,
    pub icc_name: Option<String>,
    pub icc_profile: Option<Vec<u8>>,
    /// Chunk types in file order, IHDR through IEND.
    pub chunk_order: Vec<[u8; 4]>,
}

impl HdrChunks {
    /// Walk the chunk list of a PNG stream. CRCs are not verified.
    pub fn parse(data: &[u8]) -> anyhow::Result<Self> {
        ensure!(data.starts_with(&PNG_SIGNATURE), "missing PNG signature");
        let mut chunks = Self::default();
        let mut pos = PNG_SIGNATURE.len();
        loop {
            let header = data
                .get(pos..pos + 8)
                .ok_or_else(|| anyhow!("truncated chunk header at offset {pos}"))?;
            let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
            let kind = [header[4], header[5], header[6], header[7]];
            let body = data
                .get(pos + 8..pos + 8 + len)
                .ok_or_else(|| anyhow!("truncated {} chunk", String::from_utf8_lossy(&kind)))?;
            chunks.chunk_order.push(kind);

            match &kind {
                b"cICP" => chunks.cicp = Some(Cicp::from_bytes(body)?),
                b"cLLi" => chunks.content_light_level = Some(ContentLightLevel::from_bytes(body)?),
                b"sBIT" => chunks.significant_bits = Some(body.to_vec()),
                b"iCCP" => {
                    let (name, profile) = parse_iccp(body)?;
                    chunks.icc_name = Some(name);
                    chunks.icc_profile = Some(profile);
                }
                b"IEND" => return Ok(chunks),
                _ => {}
            }
            pos += 12 + len;
        }
    }
}

fn parse_iccp(body: &[u8]) -> anyhow::Result<(String, Vec<u8>)> {
    let nul = body
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| anyhow!("iCCP profile name is not terminated"))?;
    let name = String::from_utf8_lossy(&body[..nul]).into_owned();
    match body.get(nul + 1) {
        Some(0) => {}
        Some(method) => bail!("unknown iCCP compression method {method}"),
        None => bail!("iCCP chunk has no compression method"),
    }
    let mut profile = Vec::new();
    ZlibDecoder::new(&body[nul + 2..])
        .read_to_end(&mut profile)
        .context("failed to inflate iCCP profile")?;
    Ok((name, profile))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cicp_layout_is_bit_exact() {
        assert_eq!(Cicp::BT2100_PQ.to_bytes(), [9, 16, 0, 1]);
        assert_eq!(Cicp::from_bytes(&[9, 16, 0, 1]).unwrap(), Cicp::BT2100_PQ);
        assert!(Cicp::from_bytes(&[9, 16, 0]).is_err());
        assert!(Cicp::from_bytes(&[9, 16, 0, 2]).is_err());
    }

    #[test]
    fn clli_is_big_endian_fixed_point() {
        let clli = ContentLightLevel::from_metadata(ImageMetadata {
            max_cll: 1_000,
            max_fall: 400,
        });
        assert_eq!(clli.max_cll, 10_000_000);
        assert_eq!(clli.max_fall, 4_000_000);
        assert_eq!(
            clli.to_bytes(),
            [0x00, 0x98, 0x96, 0x80, 0x00, 0x3D, 0x09, 0x00]
        );
        let parsed = ContentLightLevel::from_bytes(&clli.to_bytes()).unwrap();
        assert_eq!(parsed, clli);
        assert_eq!(parsed.to_metadata().max_cll, 1_000);
    }

    #[test]
    fn peak_metadata_fits_u32() {
        let clli = ContentLightLevel::from_metadata(ImageMetadata {
            max_cll: 10_000,
            max_fall: 10_000,
        });
        assert_eq!(clli.max_cll, 100_000_000);
    }

    #[test]
    fn chunks_follow_header_in_order() {
        let mut plane = OutputPlane::allocate(2, 1).unwrap();
        plane.samples_mut().copy_from_slice(&[0x0102, 0, 65_535, 7, 8, 9]);
        let emitter = PngEmitter::new(IccProfile::bundled(), 10);
        let mut encoded = Vec::new();
        emitter
            .write(
                &mut encoded,
                &plane,
                ImageMetadata {
                    max_cll: 203,
                    max_fall: 58,
                },
            )
            .unwrap();

        let chunks = HdrChunks::parse(&encoded).unwrap();
        assert_eq!(&chunks.chunk_order[..5], &[
            *b"IHDR", *b"cICP", *b"cLLi", *b"iCCP", *b"sBIT"
        ]);
        assert_eq!(chunks.chunk_order.last(), Some(b"IEND"));
        assert_eq!(chunks.cicp, Some(Cicp::BT2100_PQ));
        assert_eq!(
            chunks.content_light_level,
            Some(ContentLightLevel {
                max_cll: 2_030_000,
                max_fall: 580_000
            })
        );
        assert_eq!(chunks.significant_bits.as_deref(), Some(&[10u8, 10, 10][..]));
        assert_eq!(chunks.icc_name.as_deref(), Some(crate::icc::BUNDLED_PROFILE_NAME));
        assert_eq!(chunks.icc_profile.as_deref(), Some(IccProfile::bundled().data()));
    }

    #[test]
    fn rejects_sbit_wider_than_samples() {
        let plane = OutputPlane::allocate(1, 1).unwrap();
        for bits in [0, 17] {
            let emitter = PngEmitter::new(IccProfile::bundled(), bits);
            let err = emitter
                .write(Vec::new(), &plane, ImageMetadata::default())
                .unwrap_err();
            assert!(matches!(err, ConvertError::InvalidConfig(_)), "{bits}");
        }
    }
}
