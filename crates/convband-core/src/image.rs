use serde::{Deserialize, Serialize};

/// Errors raised when an image record would violate its buffer invariant.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("image extent must be non-zero (width={width}, height={height})")]
    EmptyExtent { width: usize, height: usize },
    #[error("unsupported channel count {0} (expected 1 or 3)")]
    Channels(usize),
    #[error("sample depth must be at least 1")]
    Depth,
    #[error("invalid sample buffer length (expected {expected}, got {got})")]
    BufferLength { expected: usize, got: usize },
}

/// Row-major, channel-interleaved raster with samples normalised to `[0,1]`.
///
/// `data.len() == width * height * channels` holds for every value of this
/// type; the only way to touch samples mutably is through a fixed-length slice.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawImage")]
pub struct Image {
    width: usize,
    height: usize,
    channels: usize,
    depth: u32,
    data: Vec<f32>,
}

impl Image {
    /// Wrap an existing sample buffer, validating its length.
    pub fn new(
        width: usize,
        height: usize,
        channels: usize,
        depth: u32,
        data: Vec<f32>,
    ) -> Result<Self, ImageError> {
        let expected = checked_len(width, height, channels, depth)?;
        if data.len() != expected {
            return Err(ImageError::BufferLength {
                expected,
                got: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            channels,
            depth,
            data,
        })
    }

    /// Allocate a zero-filled image of the given shape.
    pub fn blank(
        width: usize,
        height: usize,
        channels: usize,
        depth: u32,
    ) -> Result<Self, ImageError> {
        let len = checked_len(width, height, channels, depth)?;
        Ok(Self {
            width,
            height,
            channels,
            depth,
            data: vec![0.0; len],
        })
    }

    /// Same shape and depth as `self`, new samples.
    ///
    /// Used by executors to hand back the output of one chained step.
    pub fn with_data(&self, data: Vec<f32>) -> Result<Self, ImageError> {
        Self::new(self.width, self.height, self.channels, self.depth, data)
    }

    /// Infallible variant of [`Self::with_data`] for buffers sized by this crate.
    pub(crate) fn derive(&self, data: Vec<f32>) -> Self {
        debug_assert_eq!(data.len(), self.data.len());
        Self {
            width: self.width,
            height: self.height,
            channels: self.channels,
            depth: self.depth,
            data,
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    #[inline]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Mutable view over the samples. The length cannot change.
    #[inline]
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Number of samples in one row (`width * channels`).
    #[inline]
    pub fn row_len(&self) -> usize {
        self.width * self.channels
    }

    /// Flat index of sample `(row, col, channel)`.
    #[inline]
    pub fn index(&self, row: usize, col: usize, channel: usize) -> usize {
        (row * self.width + col) * self.channels + channel
    }

    #[inline]
    pub fn sample(&self, row: usize, col: usize, channel: usize) -> f32 {
        self.data[self.index(row, col, channel)]
    }

    /// `{width, height, channels, depth}` as exchanged by the distributed header broadcast.
    pub fn header(&self) -> [usize; 4] {
        [self.width, self.height, self.channels, self.depth as usize]
    }
}

/// Unvalidated wire form; deserialization goes through [`Image::new`].
#[derive(Deserialize)]
struct RawImage {
    width: usize,
    height: usize,
    channels: usize,
    depth: u32,
    data: Vec<f32>,
}

impl TryFrom<RawImage> for Image {
    type Error = ImageError;

    fn try_from(raw: RawImage) -> Result<Self, Self::Error> {
        Image::new(raw.width, raw.height, raw.channels, raw.depth, raw.data)
    }
}

fn checked_len(
    width: usize,
    height: usize,
    channels: usize,
    depth: u32,
) -> Result<usize, ImageError> {
    if width == 0 || height == 0 {
        return Err(ImageError::EmptyExtent { width, height });
    }
    if channels != 1 && channels != 3 {
        return Err(ImageError::Channels(channels));
    }
    if depth == 0 {
        return Err(ImageError::Depth);
    }
    width
        .checked_mul(height)
        .and_then(|n| n.checked_mul(channels))
        .ok_or(ImageError::EmptyExtent { width, height })
}
