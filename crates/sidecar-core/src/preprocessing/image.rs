//! Pixel channel conversion and batching for vision encoders.

use crate::error::{EncoderError, EncoderResult, SHAPE_MISMATCH};
use crate::types::ImageBatch;

const MAX_CHANNELS: u32 = 4;

fn expected_len(width: u32, height: u32, channels: u32) -> usize {
    width as usize * height as usize * channels as usize
}

fn validate(pixels: &[u8], width: u32, height: u32, channels: u32) -> EncoderResult<()> {
    if pixels.is_empty() {
        return Err(EncoderError::validation("image buffer is empty"));
    }
    if width == 0 || height == 0 {
        return Err(EncoderError::validation(format!(
            "image dimensions must be > 0, got {}x{}",
            width, height
        )));
    }
    if channels == 0 || channels > MAX_CHANNELS {
        return Err(EncoderError::validation(format!(
            "channel count must be in 1..={}, got {}",
            MAX_CHANNELS, channels
        )));
    }
    let expected = expected_len(width, height, channels);
    if pixels.len() != expected {
        return Err(EncoderError::validation(format!(
            "{}: {}x{}x{} expects {} bytes, got {}",
            SHAPE_MISMATCH,
            width,
            height,
            channels,
            expected,
            pixels.len()
        )));
    }
    Ok(())
}

/// Convert interleaved pixels with 1..=4 channels to interleaved RGB.
///
/// | channels | R | G | B |
/// |---|---|---|---|
/// | 1 | c0 | c0 | c0 |
/// | 2 | c0 | c1 | c1 |
/// | 3 | c0 | c1 | c2 |
/// | 4 | c0 | c1 | c2 (alpha dropped) |
pub fn convert_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    channels: u32,
) -> EncoderResult<Vec<u8>> {
    validate(pixels, width, height, channels)?;

    let rgb = match channels {
        3 => pixels.to_vec(),
        1 => pixels.iter().flat_map(|&v| [v, v, v]).collect(),
        2 => pixels
            .chunks_exact(2)
            .flat_map(|px| [px[0], px[1], px[1]])
            .collect(),
        n => pixels
            .chunks_exact(n as usize)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect(),
    };
    Ok(rgb)
}

/// The one channel count other than `claimed` that explains the buffer length.
fn inferred_channels(len: usize, width: u32, height: u32, claimed: u32) -> Option<u32> {
    let area = width as usize * height as usize;
    if area == 0 || len % area != 0 {
        return None;
    }
    let c = u32::try_from(len / area).ok()?;
    ((1..=MAX_CHANNELS).contains(&c) && c != claimed).then_some(c)
}

/// Convert to RGB and wrap the result in a batch of exactly one image.
///
/// A buffer whose length fits exactly one other channel count is retried once
/// with that count.
pub fn normalize_image(
    pixels: &[u8],
    width: u32,
    height: u32,
    channels: u32,
) -> EncoderResult<ImageBatch> {
    let rgb = match convert_to_rgb(pixels, width, height, channels) {
        Ok(rgb) => rgb,
        Err(e) if e.is_input_shape() => {
            let Some(actual) = inferred_channels(pixels.len(), width, height, channels) else {
                return Err(e);
            };
            log::warn!(
                target: "sidecar_core",
                "image claims {} channels but buffer fits {}; retrying",
                channels,
                actual
            );
            convert_to_rgb(pixels, width, height, actual)?
        }
        Err(e) => return Err(e),
    };

    log::debug!(
        target: "sidecar_core",
        "image normalized: {}x{}x{} -> {:?}",
        width,
        height,
        channels,
        [1, ImageBatch::CHANNELS, height as usize, width as usize]
    );
    Ok(ImageBatch::single(width, height, rgb))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grayscale_expands() {
        let rgb = convert_to_rgb(&[200; 4], 2, 2, 1).unwrap();
        assert_eq!(rgb.len(), 12);
        assert_eq!(&rgb[..3], &[200, 200, 200]);
    }

    #[test]
    fn test_two_channel_mapping() {
        let rgb = convert_to_rgb(&[10, 20, 30, 40], 2, 1, 2).unwrap();
        assert_eq!(rgb, vec![10, 20, 20, 30, 40, 40]);
    }

    #[test]
    fn test_rgba_drops_alpha() {
        let pixels: Vec<u8> = (0..16).collect();
        let rgb = convert_to_rgb(&pixels, 2, 2, 4).unwrap();
        assert_eq!(rgb, vec![0, 1, 2, 4, 5, 6, 8, 9, 10, 12, 13, 14]);
    }

    #[test]
    fn test_rgb_passthrough() {
        let pixels = vec![1, 2, 3, 4, 5, 6];
        assert_eq!(convert_to_rgb(&pixels, 1, 2, 3).unwrap(), pixels);
    }

    #[test]
    fn test_validation_errors() {
        assert!(matches!(
            convert_to_rgb(&[], 2, 2, 3),
            Err(EncoderError::Validation(_))
        ));
        assert!(convert_to_rgb(&[0; 4], 0, 2, 1).is_err());
        assert!(convert_to_rgb(&[0; 20], 2, 2, 5).is_err());
        assert!(convert_to_rgb(&[0; 5], 2, 2, 1)
            .unwrap_err()
            .is_input_shape());
    }

    #[test]
    fn test_normalize_batch_of_one() {
        let batch = normalize_image(&[200; 4], 2, 2, 1).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.shape(), [1, 3, 2, 2]);
        assert_eq!(batch.images[0], vec![200; 12]);
    }

    #[test]
    fn test_normalize_retries_with_inferred_channels() {
        // 2x2 RGBA buffer labelled as RGB
        let pixels: Vec<u8> = (0..16).collect();
        let batch = normalize_image(&pixels, 2, 2, 3).unwrap();
        assert_eq!(batch.images[0].len(), 12);
        assert_eq!(&batch.images[0][..3], &[0, 1, 2]);
    }

    #[test]
    fn test_normalize_gives_up_on_unexplained_length() {
        let err = normalize_image(&[0; 7], 2, 2, 3).unwrap_err();
        assert!(err.is_input_shape());
        // 20 bytes would need 5 channels
        assert!(normalize_image(&[0; 20], 2, 2, 3).is_err());
    }
}
