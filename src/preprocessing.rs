//! # Image Preprocessing Module
//!
//! This module provides image preprocessing functionality for OCR accuracy improvement
//! on photographed receipts. It includes scaling and adaptive binarization to clean up
//! low-contrast thermal paper before text recognition with Tesseract.

use anyhow::Context;
use image::{DynamicImage, GenericImageView};
use tempfile::NamedTempFile;
use tracing::debug;

/// Block radius for adaptive thresholding. Receipt photos are unevenly lit, so
/// the threshold is computed per neighborhood rather than globally.
const ADAPTIVE_BLOCK_RADIUS: u32 = 25;

/// Errors that can occur during image preprocessing operations.
#[derive(Debug, Clone)]
pub enum PreprocessingError {
    /// Invalid target height specified
    InvalidTargetHeight { height: u32 },
    /// Image processing operation failed
    ProcessingFailed { message: String },
    /// Failed to load or decode image
    ImageLoad { message: String },
}

impl std::fmt::Display for PreprocessingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PreprocessingError::InvalidTargetHeight { height } => {
                write!(
                    f,
                    "Invalid target height: {}. Must be between 20 and 35 pixels",
                    height
                )
            }
            PreprocessingError::ProcessingFailed { message } => {
                write!(f, "Image processing failed: {}", message)
            }
            PreprocessingError::ImageLoad { message } => {
                write!(f, "Failed to load image: {}", message)
            }
        }
    }
}

impl std::error::Error for PreprocessingError {}

/// Configuration for image scaling operations.
#[derive(Debug, Clone)]
pub struct ImageScaler {
    /// Target character height in pixels for optimal OCR recognition.
    /// Recommended range: 20-35 pixels.
    target_char_height: u32,
}

impl ImageScaler {
    /// Default target character height for OCR optimization.
    const DEFAULT_TARGET_HEIGHT: u32 = 28;

    /// Minimum allowed target height.
    const MIN_TARGET_HEIGHT: u32 = 20;

    /// Maximum allowed target height.
    const MAX_TARGET_HEIGHT: u32 = 35;

    /// Creates a new ImageScaler with the default target height (28 pixels).
    ///
    /// # Examples
    ///
    /// ```
    /// use receipt_ocr::preprocessing::ImageScaler;
    ///
    /// let scaler = ImageScaler::new();
    /// assert_eq!(scaler.target_char_height(), 28);
    /// ```
    pub fn new() -> Self {
        Self {
            target_char_height: Self::DEFAULT_TARGET_HEIGHT,
        }
    }

    /// Creates a new ImageScaler with a custom target height.
    ///
    /// # Arguments
    ///
    /// * `height` - Target character height in pixels (20-35).
    ///
    /// # Examples
    ///
    /// ```
    /// use receipt_ocr::preprocessing::ImageScaler;
    ///
    /// let scaler = ImageScaler::with_target_height(30).unwrap();
    /// assert_eq!(scaler.target_char_height(), 30);
    /// ```
    ///
    /// # Errors
    ///
    /// Returns `PreprocessingError::InvalidTargetHeight` if the height is outside the valid range.
    pub fn with_target_height(height: u32) -> Result<Self, PreprocessingError> {
        if !(Self::MIN_TARGET_HEIGHT..=Self::MAX_TARGET_HEIGHT).contains(&height) {
            return Err(PreprocessingError::InvalidTargetHeight { height });
        }

        Ok(Self {
            target_char_height: height,
        })
    }

    /// Returns the current target character height.
    pub fn target_char_height(&self) -> u32 {
        self.target_char_height
    }

    /// Scales a receipt image to optimize it for OCR processing.
    ///
    /// This method applies cubic interpolation scaling to achieve the target character
    /// height. The scaling factor is calculated from the estimated print height in the
    /// image, so a close-up photo is shrunk and a full-table shot is grown.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use receipt_ocr::preprocessing::ImageScaler;
    /// use image::open;
    ///
    /// # fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let scaler = ImageScaler::new();
    /// let img = open("receipt.jpg")?;
    /// let scaled = scaler.scale(&img)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn scale(&self, image: &DynamicImage) -> Result<DynamicImage, PreprocessingError> {
        let (width, height) = image.dimensions();

        // Estimate current print height (simplified heuristic)
        let estimated_text_height = self.estimate_text_height(image);

        // Calculate scale factor to reach target height
        let scale_factor = self.target_char_height as f32 / estimated_text_height as f32;

        // Apply minimum and maximum scale limits to prevent excessive scaling
        let scale_factor = scale_factor.clamp(0.5, 3.0);

        let new_width = (width as f32 * scale_factor) as u32;
        let new_height = (height as f32 * scale_factor) as u32;

        // Use cubic interpolation (Catmull-Rom) for high-quality scaling
        let scaled = image.resize(
            new_width,
            new_height,
            image::imageops::FilterType::CatmullRom,
        );

        Ok(scaled)
    }

    /// Estimates the print height in a receipt image using a simple heuristic.
    ///
    /// Receipt lines are densely stacked, so the per-line height is assumed to be
    /// a small fraction of the image height. More sophisticated implementations
    /// could use connected component analysis.
    fn estimate_text_height(&self, image: &DynamicImage) -> u32 {
        let (_, height) = image.dimensions();

        // A photographed receipt holds roughly 15 printed lines per frame
        let estimated_height = height / 15;

        // Clamp to reasonable bounds
        estimated_height.clamp(10, 150)
    }
}

impl Default for ImageScaler {
    fn default() -> Self {
        Self::new()
    }
}

/// Binarize a receipt image for OCR.
///
/// Converts to grayscale and applies adaptive thresholding, which handles the
/// uneven lighting typical of receipts photographed on a table. The result is
/// black print on a white background.
pub fn binarize_receipt_image(image: &DynamicImage) -> image::GrayImage {
    let start_time = std::time::Instant::now();

    let gray = image.to_luma8();
    let binary = imageproc::contrast::adaptive_threshold(&gray, ADAPTIVE_BLOCK_RADIUS);

    debug!(
        target: "ocr_preprocessing",
        "Adaptive thresholding completed in {}ms: dimensions={}x{}",
        start_time.elapsed().as_millis(),
        gray.width(),
        gray.height()
    );

    binary
}

/// Prepare a receipt image for Tesseract and write the result to a temporary file.
///
/// Pipeline: load, scale to the target character height, binarize. The returned
/// temporary file is deleted when dropped, so callers must keep it alive until
/// OCR has consumed it.
pub fn prepare_receipt_image(image_path: &str) -> anyhow::Result<NamedTempFile> {
    let img = image::open(image_path)
        .with_context(|| format!("Failed to load receipt image for preprocessing: {image_path}"))?;

    let scaler = ImageScaler::new();
    let scaled = scaler.scale(&img)?;
    let binary = binarize_receipt_image(&scaled);

    let output = tempfile::Builder::new()
        .prefix("receipt-pre-")
        .suffix(".png")
        .tempfile()
        .context("Failed to create temporary file for preprocessed receipt")?;
    binary
        .save_with_format(output.path(), image::ImageFormat::Png)
        .with_context(|| {
            format!(
                "Failed to write preprocessed receipt image to {}",
                output.path().display()
            )
        })?;

    debug!(
        "Preprocessed receipt image {} -> {}",
        image_path,
        output.path().display()
    );

    Ok(output)
}
