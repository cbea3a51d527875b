//! Upload validation and image-to-tensor conversion.

use dx_core::{PredictionRequest, TensorLayout, ValidationError, ValidationLimits};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use ndarray::Array4;
use std::io::Cursor;

pub const ALLOWED_CONTENT_TYPES: [&str; 3] = ["image/jpeg", "image/jpg", "image/png"];

/// Bicubic resampling.
const RESIZE_FILTER: FilterType = FilterType::CatmullRom;
/// Name of the resize filter as reported in model metadata.
pub const RESAMPLE: &str = "bicubic";

/// Lowercased media type without parameters (`image/png; q=1` -> `image/png`).
pub fn normalize_content_type(raw: &str) -> String {
    raw.split(';').next().unwrap_or_default().trim().to_ascii_lowercase()
}

fn is_generic(content_type: &str) -> bool {
    content_type.is_empty() || content_type == "application/octet-stream"
}

fn sniff_content_type(bytes: &[u8]) -> Result<String, ValidationError> {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Png) => Ok("image/png".to_string()),
        Ok(ImageFormat::Jpeg) => Ok("image/jpeg".to_string()),
        Ok(other) => Err(ValidationError::UnsupportedContentType(format!("{:?}", other).to_lowercase())),
        Err(_) => Err(ValidationError::UnsupportedContentType("unknown".to_string())),
    }
}

/// A decoded upload that passed every check.
#[derive(Debug, Clone)]
pub struct ValidatedImage {
    pub image: DynamicImage,
    pub content_type: String,
    pub width: u32,
    pub height: u32,
}

pub fn validate(
    request: &PredictionRequest,
    limits: &ValidationLimits,
) -> Result<ValidatedImage, ValidationError> {
    let declared = request
        .content_type
        .as_deref()
        .map(normalize_content_type)
        .filter(|ct| !is_generic(ct));
    if let Some(content_type) = &declared {
        if !ALLOWED_CONTENT_TYPES.contains(&content_type.as_str()) {
            return Err(ValidationError::UnsupportedContentType(content_type.clone()));
        }
    }

    let bytes = request.bytes.as_slice();
    if bytes.is_empty() {
        return Err(ValidationError::EmptyFile);
    }
    if bytes.len() > limits.max_upload_bytes {
        return Err(ValidationError::FileTooLarge {
            size: bytes.len(),
            max: limits.max_upload_bytes,
        });
    }

    let content_type = match declared {
        Some(content_type) => content_type,
        None => sniff_content_type(bytes)?,
    };

    let reader = || {
        ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| ValidationError::UndecodableImage(e.to_string()))
    };

    let (width, height) = reader()?
        .into_dimensions()
        .map_err(|e| ValidationError::UndecodableImage(e.to_string()))?;
    if width < limits.min_dimension || height < limits.min_dimension {
        return Err(ValidationError::ImageTooSmall {
            width,
            height,
            min: limits.min_dimension,
        });
    }
    if width > limits.max_dimension || height > limits.max_dimension {
        return Err(ValidationError::ImageTooLarge {
            width,
            height,
            max: limits.max_dimension,
        });
    }

    let image = reader()?
        .decode()
        .map_err(|e| ValidationError::UndecodableImage(e.to_string()))?;

    Ok(ValidatedImage {
        image,
        content_type,
        width,
        height,
    })
}

/// RGB, resized to `(height, width)`, scaled to [0, 1], batch of one.
pub fn to_tensor(image: &DynamicImage, size: (u32, u32), layout: TensorLayout) -> Array4<f32> {
    let (height, width) = size;
    let rgb = image.to_rgb8();
    let resized = image::imageops::resize(&rgb, width, height, RESIZE_FILTER);
    let value = |x: usize, y: usize, c: usize| resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0;

    match layout {
        TensorLayout::Nhwc => Array4::from_shape_fn(
            (1, height as usize, width as usize, 3),
            |(_, y, x, c)| value(x, y, c),
        ),
        TensorLayout::Nchw => Array4::from_shape_fn(
            (1, 3, height as usize, width as usize),
            |(_, c, y, x)| value(x, y, c),
        ),
    }
}
