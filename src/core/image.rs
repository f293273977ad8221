use image::{imageops::FilterType, ColorType, DynamicImage, GenericImageView, ImageReader};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Unsupported channel layout: {channels} channel(s)")]
    UnsupportedChannelLayout { channels: u8 },

    #[error("Degenerate dimensions: {width}x{height}")]
    DegenerateDimensions { width: u32, height: u32 },

    #[error("Pixel buffer holds {actual} bytes, expected {expected}")]
    BufferLength { expected: usize, actual: usize },
}

/// Decoded, interleaved 8-bit pixel buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: u8,
}

impl Image {
    /// Wrap a raw buffer. Only the buffer length is checked here; channel
    /// layout and dimensions are validated by the feature extractor.
    pub fn new(data: Vec<u8>, width: u32, height: u32, channels: u8) -> Result<Self, FeatureError> {
        let expected = width as usize * height as usize * channels as usize;
        if data.len() != expected {
            return Err(FeatureError::BufferLength {
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            data,
            width,
            height,
            channels,
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl From<DynamicImage> for Image {
    fn from(img: DynamicImage) -> Self {
        let (width, height) = img.dimensions();

        // Gray+alpha has no 2-channel counterpart here, so the alpha is dropped.
        let (data, channels) = match img.color() {
            ColorType::L8 | ColorType::L16 | ColorType::La8 | ColorType::La16 => {
                (img.into_luma8().into_raw(), 1)
            }
            ColorType::Rgb8 | ColorType::Rgb16 | ColorType::Rgb32F => {
                (img.into_rgb8().into_raw(), 3)
            }
            _ => (img.into_rgba8().into_raw(), 4),
        };

        Self {
            data,
            width,
            height,
            channels,
        }
    }
}

/// Decode/preprocess collaborator: turns a source identifier into an [`Image`].
pub trait ImageSource: Sync {
    fn load(&self, source_id: &str) -> Result<Image, FeatureError>;
}

/// Decodes image files from disk with the `image` crate, optionally
/// downsizing them so neither side exceeds `max_dimension`.
pub struct FileDecoder {
    max_dimension: Option<u32>,
}

impl FileDecoder {
    pub fn new(max_dimension: Option<u32>) -> Self {
        Self { max_dimension }
    }

    fn decode(&self, path: &Path) -> Result<DynamicImage, FeatureError> {
        let img = ImageReader::open(path)?.with_guessed_format()?.decode()?;
        Ok(img)
    }

    fn downsize(&self, img: DynamicImage) -> DynamicImage {
        let Some(max) = self.max_dimension else {
            return img;
        };

        let (width, height) = img.dimensions();
        if width <= max && height <= max {
            return img;
        }

        // `resize` keeps the aspect ratio and fits inside max x max.
        img.resize(max, max, FilterType::Triangle)
    }
}

impl Default for FileDecoder {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ImageSource for FileDecoder {
    fn load(&self, source_id: &str) -> Result<Image, FeatureError> {
        let img = self.decode(Path::new(source_id))?;
        Ok(Image::from(self.downsize(img)))
    }
}
