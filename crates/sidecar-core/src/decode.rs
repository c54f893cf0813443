//! Media decoding: encoded bytes plus MIME type to raw pixels or samples.
//!
//! Images go through the `image` crate. WAV is parsed here (PCM 8/16/24/32-bit
//! and 32-bit float). Compressed audio containers are rejected with
//! `UnsupportedFormat`.

use crate::error::{EncoderError, EncoderResult};
use crate::types::DecodedMedia;
use image::{DynamicImage, ImageFormat};

/// Turns encoded media into raw buffers.
pub trait MediaDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8], mime: &str) -> EncoderResult<DecodedMedia>;
}

/// Decoder used by controllers unless one is supplied.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultMediaDecoder;

impl MediaDecoder for DefaultMediaDecoder {
    fn decode(&self, bytes: &[u8], mime: &str) -> EncoderResult<DecodedMedia> {
        if bytes.is_empty() {
            return Err(EncoderError::validation("encoded media is empty"));
        }
        let mime = mime.to_ascii_lowercase();
        let decoded = match mime.as_str() {
            "image/jpeg" | "image/jpg" => decode_image(bytes, ImageFormat::Jpeg)?,
            "image/png" => decode_image(bytes, ImageFormat::Png)?,
            "image/webp" => decode_image(bytes, ImageFormat::WebP)?,
            "image/bmp" => decode_image(bytes, ImageFormat::Bmp)?,
            "audio/wav" | "audio/wave" | "audio/x-wav" => decode_wav(bytes)?,
            other => {
                return Err(EncoderError::unsupported(format!(
                    "no decoder for {}",
                    other
                )))
            }
        };
        log::debug!(target: "sidecar_core", "decoded {} ({} bytes)", mime, bytes.len());
        Ok(decoded)
    }
}

// ============================================================================
// Images
// ============================================================================

fn decode_image(bytes: &[u8], format: ImageFormat) -> EncoderResult<DecodedMedia> {
    let img = image::load_from_memory_with_format(bytes, format)?;
    let (width, height) = (img.width(), img.height());

    let (pixels, channels) = match img {
        DynamicImage::ImageLuma8(buf) => (buf.into_raw(), 1),
        DynamicImage::ImageLumaA8(buf) => (buf.into_raw(), 2),
        DynamicImage::ImageRgb8(buf) => (buf.into_raw(), 3),
        DynamicImage::ImageRgba8(buf) => (buf.into_raw(), 4),
        other => (other.to_rgba8().into_raw(), 4),
    };

    Ok(DecodedMedia::Image {
        pixels,
        width,
        height,
        channels,
    })
}

// ============================================================================
// WAV
// ============================================================================

const WAVE_FORMAT_PCM: u16 = 1;
const WAVE_FORMAT_IEEE_FLOAT: u16 = 3;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

struct WavFormat {
    format_tag: u16,
    channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
}

fn read_u16(b: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([b[at], b[at + 1]])
}

fn read_u32(b: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

/// Parse a RIFF/WAVE file into interleaved f32 samples in [-1, 1].
pub fn decode_wav(bytes: &[u8]) -> EncoderResult<DecodedMedia> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(EncoderError::validation("not a RIFF/WAVE file"));
    }

    let mut pos = 12;
    let mut format: Option<WavFormat> = None;

    while pos + 8 <= bytes.len() {
        let chunk_id = &bytes[pos..pos + 4];
        let chunk_size = read_u32(bytes, pos + 4) as usize;
        let body = pos + 8;

        if chunk_id == b"fmt " {
            if chunk_size < 16 || body + 16 > bytes.len() {
                return Err(EncoderError::validation("truncated WAV fmt chunk"));
            }
            let mut tag = read_u16(bytes, body);
            // Extensible headers carry the real tag in the sub-format GUID.
            if tag == WAVE_FORMAT_EXTENSIBLE && chunk_size >= 40 && body + 26 <= bytes.len() {
                tag = read_u16(bytes, body + 24);
            }
            format = Some(WavFormat {
                format_tag: tag,
                channels: read_u16(bytes, body + 2),
                sample_rate: read_u32(bytes, body + 4),
                bits_per_sample: read_u16(bytes, body + 14),
            });
        } else if chunk_id == b"data" {
            let fmt = format
                .as_ref()
                .ok_or_else(|| EncoderError::validation("WAV data before fmt chunk"))?;
            let end = (body + chunk_size).min(bytes.len());
            let samples = pcm_to_f32(&bytes[body..end], fmt)?;
            return Ok(DecodedMedia::Audio {
                samples,
                sample_rate: fmt.sample_rate,
                channels: fmt.channels as u32,
            });
        }

        pos = body + chunk_size + (chunk_size % 2);
    }

    Err(EncoderError::validation("no data chunk in WAV file"))
}

fn pcm_to_f32(data: &[u8], fmt: &WavFormat) -> EncoderResult<Vec<f32>> {
    if fmt.channels == 0 || fmt.sample_rate == 0 {
        return Err(EncoderError::validation(format!(
            "invalid WAV header: {} channels at {} Hz",
            fmt.channels, fmt.sample_rate
        )));
    }

    let samples = match (fmt.format_tag, fmt.bits_per_sample) {
        (WAVE_FORMAT_PCM, 8) => data.iter().map(|&b| (b as f32 - 128.0) / 128.0).collect(),
        (WAVE_FORMAT_PCM, 16) => data
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32 / 32768.0)
            .collect(),
        (WAVE_FORMAT_PCM, 24) => data
            .chunks_exact(3)
            .map(|c| {
                let v = i32::from_le_bytes([0, c[0], c[1], c[2]]) >> 8;
                v as f32 / 8_388_608.0
            })
            .collect(),
        (WAVE_FORMAT_PCM, 32) => data
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f32 / 2_147_483_648.0)
            .collect(),
        (WAVE_FORMAT_IEEE_FLOAT, 32) => data
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
        (tag, bits) => {
            return Err(EncoderError::unsupported(format!(
                "WAV format tag {} with {} bits per sample",
                tag, bits
            )))
        }
    };
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures::wav_bytes;

    #[test]
    fn test_decode_wav_pcm16() {
        let bytes = wav_bytes(&[0, 16384, -32768, 32767], 8000, 2);
        match decode_wav(&bytes).unwrap() {
            DecodedMedia::Audio {
                samples,
                sample_rate,
                channels,
            } => {
                assert_eq!(sample_rate, 8000);
                assert_eq!(channels, 2);
                assert_eq!(samples.len(), 4);
                assert_eq!(samples[1], 0.5);
                assert_eq!(samples[2], -1.0);
            }
            other => panic!("expected audio, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_wav_rejects_garbage() {
        assert!(decode_wav(b"not a wav file at all").is_err());

        let mut bytes = wav_bytes(&[0; 4], 16000, 1);
        bytes.truncate(20);
        assert!(decode_wav(&bytes).is_err());
    }

    #[test]
    fn test_decode_png() {
        let img = image::GrayImage::from_pixel(3, 2, image::Luma([77]));
        let mut bytes = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();

        let decoded = DefaultMediaDecoder.decode(&bytes, "image/png").unwrap();
        assert_eq!(
            decoded,
            DecodedMedia::Image {
                pixels: vec![77; 6],
                width: 3,
                height: 2,
                channels: 1,
            }
        );
    }

    #[test]
    fn test_compressed_audio_unsupported() {
        let err = DefaultMediaDecoder.decode(&[0xFF, 0xFB, 0x90], "audio/mp3").unwrap_err();
        assert!(matches!(err, EncoderError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_corrupt_image_is_validation_error() {
        let err = DefaultMediaDecoder.decode(&[1, 2, 3, 4], "image/png").unwrap_err();
        assert!(matches!(
            err,
            EncoderError::Validation(_) | EncoderError::UnsupportedFormat(_)
        ));
    }
}
