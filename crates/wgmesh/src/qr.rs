//! QR code rendering of client documents.

use std::path::{Path, PathBuf};

use image::Luma;
use qrcode::QrCode;
use thiserror::Error;

/// Errors from QR rendering.
#[derive(Debug, Error)]
pub enum QrError {
    /// The text does not fit in a QR code.
    #[error("failed to encode QR code: {0}")]
    Encode(String),
    /// The image could not be written.
    #[error("failed to save QR code image {path}")]
    Save {
        /// The image path.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: image::ImageError,
    },
}

/// Renders text as a scannable image file.
pub trait QrRenderer {
    /// Encodes `text` and writes the image to `path`.
    ///
    /// # Errors
    ///
    /// Fails if the text cannot be encoded or the image cannot be written.
    fn render(&self, text: &str, path: &Path) -> Result<(), QrError>;
}

/// Writes grayscale PNG images.
#[derive(Debug, Clone, Copy)]
pub struct PngQrRenderer {
    module_size: u32,
}

impl PngQrRenderer {
    /// Pixel width of one QR module unless configured otherwise.
    pub const DEFAULT_MODULE_SIZE: u32 = 8;

    /// Creates a renderer with the default module size.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            module_size: Self::DEFAULT_MODULE_SIZE,
        }
    }

    /// Sets the pixel width of one module.
    #[must_use]
    pub const fn with_module_size(mut self, module_size: u32) -> Self {
        self.module_size = module_size;
        self
    }
}

impl Default for PngQrRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl QrRenderer for PngQrRenderer {
    fn render(&self, text: &str, path: &Path) -> Result<(), QrError> {
        let code = QrCode::new(text.as_bytes()).map_err(|e| QrError::Encode(e.to_string()))?;
        let image = code
            .render::<Luma<u8>>()
            .module_dimensions(self.module_size, self.module_size)
            .build();
        image.save(path).map_err(|source| QrError::Save {
            path: path.to_path_buf(),
            source,
        })
    }
}
