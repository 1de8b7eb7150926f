//! Binary PGM/PPM decoding and encoding on top of the `image` crate.
//!
//! Decoded samples are normalised into `[0, 1]` by the header maxval, which
//! becomes the image depth. Export clamps to `[0, 1]` and quantises with
//! `ceil(x * depth)`, writing `depth` back as the maxval.
//!
//! The `image` crate rescales any maxval other than 255 and 65535, so binary
//! rasters with those maxvals are read and written here directly.

use convband_core::{Image, ImageError};
use image::codecs::pnm::{PnmEncoder, PnmSubtype, SampleEncoding};
use image::{DynamicImage, ImageBuffer, ImageReader, Luma, Rgb};
use std::fs::{self, File};
use std::io::{BufWriter, Cursor, Write};
use std::path::Path;

#[cfg(feature = "tracing")]
use tracing::instrument;

const MAX_8: u32 = u8::MAX as u32;
const MAX_16: u32 = u16::MAX as u32;

#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to encode {path}: {source}")]
    Encode {
        path: String,
        #[source]
        source: image::ImageError,
    },
    #[error(transparent)]
    Layout(#[from] ImageError),
    #[error("image extent {width}x{height} does not fit the PNM header")]
    Extent { width: usize, height: usize },
    #[error("malformed PNM file: {0}")]
    Header(String),
    #[error("depth {0} exceeds the PNM maxval limit of 65535")]
    Depth(u32),
}

/// Fields of a binary `P5`/`P6` header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct PnmHeader {
    channels: usize,
    width: usize,
    height: usize,
    maxval: u16,
}

impl PnmHeader {
    /// Parse the header of a binary PGM/PPM. Returns the header and the offset
    /// of the first raster byte, or `None` for any other format.
    fn parse(bytes: &[u8]) -> Result<Option<(Self, usize)>, CodecError> {
        let channels = match bytes.get(..2) {
            Some(b"P5") => 1,
            Some(b"P6") => 3,
            _ => return Ok(None),
        };
        let mut pos = 2;
        let width = next_field(bytes, &mut pos, "width")?;
        let height = next_field(bytes, &mut pos, "height")?;
        let maxval = next_field(bytes, &mut pos, "maxval")?;
        let maxval = match u16::try_from(maxval) {
            Ok(m) if m > 0 => m,
            _ => return Err(CodecError::Header(format!("maxval {maxval} is out of range"))),
        };
        // exactly one whitespace byte precedes the raster
        match bytes.get(pos) {
            Some(b) if b.is_ascii_whitespace() => pos += 1,
            _ => return Err(CodecError::Header("no separator before the raster".into())),
        }
        let header = Self {
            channels,
            width: width as usize,
            height: height as usize,
            maxval,
        };
        Ok(Some((header, pos)))
    }

    /// Maxvals the `image` crate decodes without rescaling.
    fn is_standard(&self) -> bool {
        matches!(u32::from(self.maxval), MAX_8 | MAX_16)
    }

    fn decode_raster(&self, raster: &[u8]) -> Result<Image, CodecError> {
        let extent = CodecError::Extent {
            width: self.width,
            height: self.height,
        };
        let wide = u32::from(self.maxval) > MAX_8;
        let needed = self
            .width
            .checked_mul(self.height)
            .and_then(|n| n.checked_mul(self.channels))
            .and_then(|n| n.checked_mul(if wide { 2 } else { 1 }))
            .ok_or(extent)?;
        let raster = raster.get(..needed).ok_or_else(|| {
            CodecError::Header(format!("raster holds {} bytes, expected {needed}", raster.len()))
        })?;
        let samples: Vec<u16> = if wide {
            raster
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect()
        } else {
            raster.iter().map(|&b| u16::from(b)).collect()
        };
        let clamped: Vec<u16> = samples.into_iter().map(|v| v.min(self.maxval)).collect();
        Ok(normalised(
            self.width,
            self.height,
            self.channels,
            u32::from(self.maxval),
            &clamped,
        )?)
    }
}

/// Skip whitespace and `#` comments, then read one decimal field.
fn next_field(bytes: &[u8], pos: &mut usize, name: &str) -> Result<u32, CodecError> {
    loop {
        match bytes.get(*pos) {
            Some(b'#') => {
                while let Some(&b) = bytes.get(*pos) {
                    *pos += 1;
                    if b == b'\n' {
                        break;
                    }
                }
            }
            Some(b) if b.is_ascii_whitespace() => *pos += 1,
            _ => break,
        }
    }
    let start = *pos;
    while bytes.get(*pos).is_some_and(u8::is_ascii_digit) {
        *pos += 1;
    }
    std::str::from_utf8(&bytes[start..*pos])
        .ok()
        .and_then(|digits| digits.parse().ok())
        .ok_or_else(|| CodecError::Header(format!("missing or invalid {name}")))
}

/// Decode a PGM (`P5`, one channel) or PPM (`P6`, three channels) file.
///
/// Other colour layouts are converted to the closest supported one.
#[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all, fields(path = %path.as_ref().display())))]
pub fn read_image(path: impl AsRef<Path>) -> Result<Image, CodecError> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;
    if let Some((header, offset)) = PnmHeader::parse(&bytes)? {
        if !header.is_standard() {
            return header.decode_raster(&bytes[offset..]);
        }
    }
    let decoded = ImageReader::new(Cursor::new(&bytes))
        .with_guessed_format()?
        .decode()
        .map_err(|source| CodecError::Decode {
            path: path.display().to_string(),
            source,
        })?;
    from_dynamic(decoded)
}

/// Normalise a decoded image into an [`Image`].
pub fn from_dynamic(decoded: DynamicImage) -> Result<Image, CodecError> {
    let (w, h) = (decoded.width() as usize, decoded.height() as usize);
    let image = match decoded {
        DynamicImage::ImageLuma8(buf) => normalised(w, h, 1, MAX_8, buf.as_raw()),
        DynamicImage::ImageLuma16(buf) => normalised(w, h, 1, MAX_16, buf.as_raw()),
        DynamicImage::ImageRgb8(buf) => normalised(w, h, 3, MAX_8, buf.as_raw()),
        DynamicImage::ImageRgb16(buf) => normalised(w, h, 3, MAX_16, buf.as_raw()),
        other if other.color().has_color() => {
            normalised(w, h, 3, MAX_8, other.to_rgb8().as_raw())
        }
        other => normalised(w, h, 1, MAX_8, other.to_luma8().as_raw()),
    }?;
    Ok(image)
}

fn normalised<T>(
    width: usize,
    height: usize,
    channels: usize,
    depth: u32,
    raw: &[T],
) -> Result<Image, ImageError>
where
    T: Copy + Into<f32>,
{
    let scale = depth as f32;
    let data = raw.iter().map(|&v| v.into() / scale).collect();
    Image::new(width, height, channels, depth, data)
}

/// Quantise one normalised sample to `[0, maxval]`.
pub fn quantize(value: f32, maxval: u32) -> u32 {
    let scaled = (value.clamp(0.0, 1.0) * maxval as f32).ceil();
    // NaN clamps to NaN and casts to 0
    (scaled as u32).min(maxval)
}

/// Encode `image` as binary PGM (one channel) or PPM (three channels).
///
/// The image depth is written as the maxval. Depths up to 255 use one byte
/// per sample, larger depths two big-endian bytes.
#[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all, fields(path = %path.as_ref().display())))]
pub fn write_image(path: impl AsRef<Path>, image: &Image) -> Result<(), CodecError> {
    let path = path.as_ref();
    match image.depth() {
        MAX_8 | MAX_16 => encode_standard(path, image),
        depth if depth < MAX_16 => write_raster(path, image),
        depth => Err(CodecError::Depth(depth)),
    }
}

fn encode_standard(path: &Path, image: &Image) -> Result<(), CodecError> {
    let dynamic = to_dynamic(image)?;
    let subtype = if image.channels() == 1 {
        PnmSubtype::Graymap(SampleEncoding::Binary)
    } else {
        PnmSubtype::Pixmap(SampleEncoding::Binary)
    };
    let writer = BufWriter::new(File::create(path)?);
    dynamic
        .write_with_encoder(PnmEncoder::new(writer).with_subtype(subtype))
        .map_err(|source| CodecError::Encode {
            path: path.display().to_string(),
            source,
        })
}

fn write_raster(path: &Path, image: &Image) -> Result<(), CodecError> {
    let depth = image.depth();
    let magic = if image.channels() == 1 { "P5" } else { "P6" };
    let raster: Vec<u8> = if depth > MAX_8 {
        image
            .data()
            .iter()
            .flat_map(|&v| (quantize(v, depth) as u16).to_be_bytes())
            .collect()
    } else {
        image.data().iter().map(|&v| quantize(v, depth) as u8).collect()
    };
    let mut out = BufWriter::new(File::create(path)?);
    write!(out, "{magic}\n{} {}\n{depth}\n", image.width(), image.height())?;
    out.write_all(&raster)?;
    out.flush()?;
    Ok(())
}

/// Quantise an [`Image`] into the matching `image` buffer type.
///
/// Only 8-bit and 16-bit buffers exist, so other depths are rescaled to 255
/// or 65535.
pub fn to_dynamic(image: &Image) -> Result<DynamicImage, CodecError> {
    let extent = CodecError::Extent {
        width: image.width(),
        height: image.height(),
    };
    let (Ok(w), Ok(h)) = (u32::try_from(image.width()), u32::try_from(image.height())) else {
        return Err(extent);
    };
    let wide = image.depth() > MAX_8;
    let dynamic = match (image.channels(), wide) {
        (1, false) => ImageBuffer::<Luma<u8>, _>::from_raw(w, h, quantized_u8(image))
            .map(DynamicImage::ImageLuma8),
        (1, true) => ImageBuffer::<Luma<u16>, _>::from_raw(w, h, quantized_u16(image))
            .map(DynamicImage::ImageLuma16),
        (_, false) => ImageBuffer::<Rgb<u8>, _>::from_raw(w, h, quantized_u8(image))
            .map(DynamicImage::ImageRgb8),
        (_, true) => ImageBuffer::<Rgb<u16>, _>::from_raw(w, h, quantized_u16(image))
            .map(DynamicImage::ImageRgb16),
    };
    dynamic.ok_or(extent)
}

fn quantized_u8(image: &Image) -> Vec<u8> {
    image
        .data()
        .iter()
        .map(|&v| quantize(v, MAX_8) as u8)
        .collect()
}

fn quantized_u16(image: &Image) -> Vec<u16> {
    image
        .data()
        .iter()
        .map(|&v| quantize(v, MAX_16) as u16)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn quantize_clamps_and_rounds_up() {
        assert_eq!(quantize(-0.5, 255), 0);
        assert_eq!(quantize(0.0, 255), 0);
        assert_eq!(quantize(0.5, 255), 128);
        assert_eq!(quantize(1.0, 255), 255);
        assert_eq!(quantize(3.0, 255), 255);
        assert_eq!(quantize(f32::NAN, 255), 0);
        assert_eq!(quantize(0.25, 65535), 16384);
    }

    #[test]
    fn gray8_normalises_by_255() {
        let buf = ImageBuffer::<Luma<u8>, _>::from_raw(2, 1, vec![0u8, 255]).expect("buf");
        let img = from_dynamic(DynamicImage::ImageLuma8(buf)).expect("image");
        assert_eq!(img.header(), [2, 1, 1, 255]);
        assert_abs_diff_eq!(img.data()[1], 1.0);
    }

    #[test]
    fn rgb16_keeps_wide_depth() {
        let buf = ImageBuffer::<Rgb<u16>, _>::from_raw(1, 1, vec![0u16, 32768, 65535]).expect("buf");
        let img = from_dynamic(DynamicImage::ImageRgb16(buf)).expect("image");
        assert_eq!(img.header(), [1, 1, 3, 65535]);
        assert_abs_diff_eq!(img.data()[1], 32768.0 / 65535.0, epsilon = 1e-6);
    }

    #[test]
    fn rgba_input_drops_alpha() {
        let buf = ImageBuffer::<image::Rgba<u8>, _>::from_raw(1, 1, vec![255u8, 0, 0, 10])
            .expect("buf");
        let img = from_dynamic(DynamicImage::ImageRgba8(buf)).expect("image");
        assert_eq!(img.channels(), 3);
        assert_eq!(img.data(), &[1.0f32, 0.0, 0.0][..]);
    }

    #[test]
    fn to_dynamic_picks_layout_from_channels_and_depth() {
        let grey = Image::new(2, 1, 1, 255, vec![0.0, 1.0]).expect("grey");
        assert!(matches!(to_dynamic(&grey), Ok(DynamicImage::ImageLuma8(_))));
        let rgb = Image::new(1, 1, 3, 65535, vec![0.0, 0.5, 1.0]).expect("rgb");
        assert!(matches!(to_dynamic(&rgb), Ok(DynamicImage::ImageRgb16(_))));
    }

    #[test]
    fn odd_maxval_becomes_the_depth() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("hundred.ppm");
        let mut bytes = b"P6\n2 1\n100\n".to_vec();
        bytes.extend_from_slice(&[0, 50, 100, 100, 50, 0]);
        fs::write(&path, &bytes).expect("write");

        let img = read_image(&path).expect("decode");
        assert_eq!(img.header(), [2, 1, 3, 100]);
        assert_eq!(img.data()[1], 0.5);
        assert_eq!(img.data()[2], 1.0);

        let out = dir.path().join("out.ppm");
        write_image(&out, &img).expect("encode");
        assert_eq!(fs::read(&out).expect("read"), bytes);
        assert_eq!(read_image(&out).expect("decode again"), img);
    }

    #[test]
    fn wide_odd_maxval_reads_big_endian_pairs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("wide.pgm");
        let mut bytes = b"P5\n# comment line\n3 1\n1000\n".to_vec();
        bytes.extend_from_slice(&[0x00, 0x00, 0x01, 0xf4, 0x03, 0xe8]);
        fs::write(&path, &bytes).expect("write");

        let img = read_image(&path).expect("decode");
        assert_eq!(img.header(), [3, 1, 1, 1000]);
        assert_eq!(img.data(), &[0.0f32, 0.5, 1.0][..]);

        let out = dir.path().join("out.pgm");
        write_image(&out, &img).expect("encode");
        let written = fs::read(&out).expect("read");
        assert!(written.starts_with(b"P5\n3 1\n1000\n"));
        assert_eq!(read_image(&out).expect("decode again"), img);
    }

    #[test]
    fn standard_depths_still_go_through_the_image_crate() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("grey.pgm");
        let img = Image::new(2, 2, 1, 255, vec![0.0, 0.25, 0.5, 1.0]).expect("image");
        write_image(&path, &img).expect("encode");
        let back = read_image(&path).expect("decode");
        assert_eq!(back.header(), [2, 2, 1, 255]);
        assert_abs_diff_eq!(back.data()[2], 128.0 / 255.0, epsilon = 1e-6);
    }

    #[test]
    fn malformed_headers_and_short_rasters_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bad_width = dir.path().join("bad.ppm");
        fs::write(&bad_width, b"P6\n2 x\n100\n\0\0\0").expect("write");
        assert!(matches!(read_image(&bad_width), Err(CodecError::Header(_))));

        let short = dir.path().join("short.pgm");
        fs::write(&short, b"P5\n4 1\n100\n\x01\x02").expect("write");
        assert!(matches!(read_image(&short), Err(CodecError::Header(_))));

        let zero = dir.path().join("zero.pgm");
        fs::write(&zero, b"P5\n1 1\n0\n\0").expect("write");
        assert!(matches!(read_image(&zero), Err(CodecError::Header(_))));
    }

    #[test]
    fn depth_beyond_sixteen_bits_cannot_be_written() {
        let dir = tempfile::tempdir().expect("tempdir");
        let img = Image::new(1, 1, 1, 70_000, vec![0.5]).expect("image");
        assert!(matches!(
            write_image(dir.path().join("deep.pgm"), &img),
            Err(CodecError::Depth(70_000))
        ));
    }
}
