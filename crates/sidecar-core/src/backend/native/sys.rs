//! FFI bindings for the native encoder libraries.
//!
//! The libraries are linked by `build.rs` when the `native` feature is on. The
//! C side is a thin shim (`*_c` functions) over the clip (vision projector) and
//! whisper (audio) APIs that flattens their structs into plain pointers and
//! integers.
//!
//! # Safety
//!
//! Every FFI call is wrapped in a safe function that checks for null pointers
//! and negative return codes. Context handles are freed by consuming them, so
//! a handle cannot be freed twice.
//!
//! Without the feature every wrapper is a stub that fails with
//! `UnsupportedFormat`.

#[cfg(feature = "native")]
use std::ffi::{CStr, CString};
#[cfg(feature = "native")]
use std::os::raw::{c_char, c_float, c_int, c_void};

use crate::error::{EncoderError, EncoderResult};
use std::path::Path;

/// Transcript buffer size handed to the audio shim.
pub const MAX_TRANSCRIPT_BYTES: usize = 16 * 1024;

// =============================================================================
// Opaque Types
// =============================================================================

/// Handle to a loaded vision projector (`clip_ctx*`).
///
/// `Send` but not `Sync`: encoding mutates internal scratch buffers.
#[cfg(feature = "native")]
pub struct ClipContext {
    ptr: *mut c_void,
}

#[cfg(feature = "native")]
unsafe impl Send for ClipContext {}

/// Handle to a loaded audio encoder (`whisper_context*`).
#[cfg(feature = "native")]
pub struct WhisperContext {
    ptr: *mut c_void,
}

#[cfg(feature = "native")]
unsafe impl Send for WhisperContext {}

// =============================================================================
// FFI Declarations
// =============================================================================

#[cfg(feature = "native")]
extern "C" {
    // Process-wide backend state
    fn encoder_backend_init_c();
    fn encoder_backend_free_c();

    // Log verbosity control
    fn encoder_log_set_verbosity_c(level: c_int);

    // Vision projector
    fn clip_init_c(path: *const c_char, use_gpu: bool, n_threads: c_int) -> *mut c_void;
    fn clip_free_c(ctx: *mut c_void);
    fn clip_get_image_size_c(ctx: *const c_void) -> c_int;
    fn clip_n_mmproj_embd_c(ctx: *const c_void) -> c_int;
    fn clip_n_output_tokens_c(ctx: *const c_void, width: c_int, height: c_int) -> c_int;

    /// Preprocess and encode one RGB image. Returns the number of floats
    /// written, or a negative error code. `n_images` receives the size of the
    /// preprocessed batch.
    fn clip_encode_rgb_c(
        ctx: *mut c_void,
        rgb: *const u8,
        width: c_int,
        height: c_int,
        n_threads: c_int,
        n_images: *mut c_int,
        out: *mut c_float,
        out_len: c_int,
    ) -> c_int;

    // Audio encoder
    fn whisper_init_c(path: *const c_char, use_gpu: bool) -> *mut c_void;
    fn whisper_free_c(ctx: *mut c_void);
    fn whisper_n_audio_state_c(ctx: *const c_void) -> c_int;
    fn whisper_n_audio_ctx_c(ctx: *const c_void) -> c_int;
    fn whisper_is_multilingual_c(ctx: *const c_void) -> c_int;

    /// Encode mono 16 kHz PCM and transcribe it. Returns the number of
    /// embedding floats written, or a negative error code.
    fn whisper_encode_pcm_c(
        ctx: *mut c_void,
        samples: *const c_float,
        n_samples: c_int,
        language: *const c_char,
        n_threads: c_int,
        out: *mut c_float,
        out_len: c_int,
        text: *mut c_char,
        text_len: c_int,
        confidence: *mut c_float,
    ) -> c_int;
}

#[cfg(feature = "native")]
fn c_path(path: &Path) -> EncoderResult<CString> {
    let s = path
        .to_str()
        .ok_or_else(|| EncoderError::validation("model path is not valid UTF-8"))?;
    CString::new(s).map_err(|_| EncoderError::validation("model path contains a NUL byte"))
}

// =============================================================================
// Safe Wrapper Functions
// =============================================================================

/// Initialize process-wide backend state (call once at startup)
#[cfg(feature = "native")]
pub fn backend_init() {
    unsafe { encoder_backend_init_c() }
}

/// Free process-wide backend state (call once at shutdown)
#[cfg(feature = "native")]
pub fn backend_free() {
    unsafe { encoder_backend_free_c() }
}

/// Set native library verbosity.
///
/// # Levels
/// - 0: Silent - default
/// - 1: Errors only
/// - 2: Errors + Warnings
/// - 3: Errors + Warnings + Info
/// - 4: All logs including Debug
#[cfg(feature = "native")]
pub fn log_set_verbosity(level: i32) {
    unsafe { encoder_log_set_verbosity_c(level as c_int) }
}

/// Load a vision projector.
#[cfg(feature = "native")]
pub fn clip_init(path: &Path, use_gpu: bool, n_threads: u32) -> EncoderResult<ClipContext> {
    let c_path = c_path(path)?;
    let ptr = unsafe { clip_init_c(c_path.as_ptr(), use_gpu, n_threads as c_int) };
    if ptr.is_null() {
        return Err(EncoderError::backend_init(format!(
            "failed to load vision projector from {}",
            path.display()
        )));
    }
    Ok(ClipContext { ptr })
}

#[cfg(feature = "native")]
pub fn clip_free(ctx: ClipContext) {
    unsafe { clip_free_c(ctx.ptr) }
}

#[cfg(feature = "native")]
pub fn clip_image_size(ctx: &ClipContext) -> u32 {
    unsafe { clip_get_image_size_c(ctx.ptr).max(0) as u32 }
}

/// Embedding width of one output token.
#[cfg(feature = "native")]
pub fn clip_n_mmproj_embd(ctx: &ClipContext) -> usize {
    unsafe { clip_n_mmproj_embd_c(ctx.ptr).max(0) as usize }
}

#[cfg(feature = "native")]
pub fn clip_n_output_tokens(ctx: &ClipContext, width: u32, height: u32) -> usize {
    unsafe { clip_n_output_tokens_c(ctx.ptr, width as c_int, height as c_int).max(0) as usize }
}

/// Encode one RGB image; returns the flattened embedding.
#[cfg(feature = "native")]
pub fn clip_encode_rgb(
    ctx: &mut ClipContext,
    rgb: &[u8],
    width: u32,
    height: u32,
    n_threads: u32,
) -> EncoderResult<Vec<f32>> {
    let capacity = clip_n_mmproj_embd(ctx) * clip_n_output_tokens(ctx, width, height);
    if capacity == 0 {
        return Err(EncoderError::encode("vision projector reports zero embedding size"));
    }
    let mut out = vec![0.0f32; capacity];
    let mut n_images: c_int = 0;

    let written = unsafe {
        clip_encode_rgb_c(
            ctx.ptr,
            rgb.as_ptr(),
            width as c_int,
            height as c_int,
            n_threads as c_int,
            &mut n_images,
            out.as_mut_ptr(),
            capacity as c_int,
        )
    };

    if n_images < 1 {
        return Err(EncoderError::encode("vision preprocessor produced no images"));
    }
    if written < 0 {
        return Err(EncoderError::encode(format!(
            "vision encode failed with code {}",
            written
        )));
    }
    out.truncate(written as usize);
    Ok(out)
}

/// Load an audio encoder.
#[cfg(feature = "native")]
pub fn whisper_init(path: &Path, use_gpu: bool) -> EncoderResult<WhisperContext> {
    let c_path = c_path(path)?;
    let ptr = unsafe { whisper_init_c(c_path.as_ptr(), use_gpu) };
    if ptr.is_null() {
        return Err(EncoderError::backend_init(format!(
            "failed to load audio encoder from {}",
            path.display()
        )));
    }
    Ok(WhisperContext { ptr })
}

#[cfg(feature = "native")]
pub fn whisper_free(ctx: WhisperContext) {
    unsafe { whisper_free_c(ctx.ptr) }
}

#[cfg(feature = "native")]
pub fn whisper_n_audio_state(ctx: &WhisperContext) -> usize {
    unsafe { whisper_n_audio_state_c(ctx.ptr).max(0) as usize }
}

#[cfg(feature = "native")]
pub fn whisper_n_audio_ctx(ctx: &WhisperContext) -> usize {
    unsafe { whisper_n_audio_ctx_c(ctx.ptr).max(0) as usize }
}

#[cfg(feature = "native")]
pub fn whisper_is_multilingual(ctx: &WhisperContext) -> bool {
    unsafe { whisper_is_multilingual_c(ctx.ptr) != 0 }
}

/// Encode and transcribe mono PCM.
#[cfg(feature = "native")]
pub fn whisper_encode_pcm(
    ctx: &mut WhisperContext,
    samples: &[f32],
    language: &str,
    n_threads: u32,
) -> EncoderResult<(Vec<f32>, String, f32)> {
    let c_lang = CString::new(language)
        .map_err(|_| EncoderError::validation("language code contains a NUL byte"))?;
    let capacity = whisper_n_audio_state(ctx) * whisper_n_audio_ctx(ctx);
    if capacity == 0 {
        return Err(EncoderError::encode("audio encoder reports zero embedding size"));
    }
    let mut out = vec![0.0f32; capacity];
    let mut text = vec![0 as c_char; MAX_TRANSCRIPT_BYTES];
    let mut confidence: c_float = 0.0;

    let written = unsafe {
        whisper_encode_pcm_c(
            ctx.ptr,
            samples.as_ptr(),
            samples.len() as c_int,
            c_lang.as_ptr(),
            n_threads as c_int,
            out.as_mut_ptr(),
            capacity as c_int,
            text.as_mut_ptr(),
            text.len() as c_int,
            &mut confidence,
        )
    };
    if written < 0 {
        return Err(EncoderError::encode(format!(
            "audio encode failed with code {}",
            written
        )));
    }
    out.truncate(written as usize);

    text[MAX_TRANSCRIPT_BYTES - 1] = 0;
    let transcript = unsafe { CStr::from_ptr(text.as_ptr()) }
        .to_string_lossy()
        .trim()
        .to_string();
    Ok((out, transcript, confidence))
}

// =============================================================================
// Stubs for non-native builds
// =============================================================================

#[cfg(not(feature = "native"))]
pub struct ClipContext;

#[cfg(not(feature = "native"))]
pub struct WhisperContext;

#[cfg(not(feature = "native"))]
fn not_enabled() -> EncoderError {
    EncoderError::unsupported("native feature not enabled")
}

#[cfg(not(feature = "native"))]
pub fn backend_init() {}

#[cfg(not(feature = "native"))]
pub fn backend_free() {}

#[cfg(not(feature = "native"))]
pub fn log_set_verbosity(_level: i32) {}

#[cfg(not(feature = "native"))]
pub fn clip_init(_path: &Path, _use_gpu: bool, _n_threads: u32) -> EncoderResult<ClipContext> {
    Err(not_enabled())
}

#[cfg(not(feature = "native"))]
pub fn clip_free(_ctx: ClipContext) {}

#[cfg(not(feature = "native"))]
pub fn clip_image_size(_ctx: &ClipContext) -> u32 {
    0
}

#[cfg(not(feature = "native"))]
pub fn clip_n_mmproj_embd(_ctx: &ClipContext) -> usize {
    0
}

#[cfg(not(feature = "native"))]
pub fn clip_encode_rgb(
    _ctx: &mut ClipContext,
    _rgb: &[u8],
    _width: u32,
    _height: u32,
    _n_threads: u32,
) -> EncoderResult<Vec<f32>> {
    Err(not_enabled())
}

#[cfg(not(feature = "native"))]
pub fn whisper_init(_path: &Path, _use_gpu: bool) -> EncoderResult<WhisperContext> {
    Err(not_enabled())
}

#[cfg(not(feature = "native"))]
pub fn whisper_free(_ctx: WhisperContext) {}

#[cfg(not(feature = "native"))]
pub fn whisper_n_audio_state(_ctx: &WhisperContext) -> usize {
    0
}

#[cfg(not(feature = "native"))]
pub fn whisper_is_multilingual(_ctx: &WhisperContext) -> bool {
    false
}

#[cfg(not(feature = "native"))]
pub fn whisper_encode_pcm(
    _ctx: &mut WhisperContext,
    _samples: &[f32],
    _language: &str,
    _n_threads: u32,
) -> EncoderResult<(Vec<f32>, String, f32)> {
    Err(not_enabled())
}
