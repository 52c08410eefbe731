//! Codec registry: method name → compress/decompress pair.
//!
//! # Methods
//! The lowercase identifiers `none`, `zlib`, `oodle` and `lz4` are the only
//! names recognised; lookup is case-insensitive.  An unknown name resolves to
//! `None` from [`CodecRegistry::get`]; callers that need a codec use
//! [`CodecRegistry::require`], which turns absence into
//! [`CodecError::UnknownCodec`].  Nothing ever falls back to pass-through.
//!
//! # Size checks
//! `decompress` receives the expected output size.  How strictly it is
//! honoured depends on the method:
//!   - `none` ignores it and returns the input unchanged.
//!   - `zlib` fails with [`CodecError::DecompressionFailed`] on any mismatch.
//!   - `lz4` and `oodle` rely on the method itself to detect bad output.
//!
//! # Sharing
//! A registry is read-only once built and is `Send + Sync`; one instance can
//! serve any number of concurrent decode calls.

pub mod oodle;

use std::io::{self, Read, Write};
use std::sync::Arc;

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use thiserror::Error;

pub use oodle::{LibraryOodle, NativeOodle, OodleConfig, OodleProvider, OodleSource};

// ── CodecMethod ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecMethod {
    None,
    Zlib,
    Oodle,
    Lz4,
}

impl CodecMethod {
    pub const ALL: [CodecMethod; 4] = [
        CodecMethod::None,
        CodecMethod::Zlib,
        CodecMethod::Oodle,
        CodecMethod::Lz4,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CodecMethod::None  => "none",
            CodecMethod::Zlib  => "zlib",
            CodecMethod::Oodle => "oodle",
            CodecMethod::Lz4   => "lz4",
        }
    }

    /// Case-insensitive parse.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none"  => Some(CodecMethod::None),
            "zlib"  => Some(CodecMethod::Zlib),
            "oodle" => Some(CodecMethod::Oodle),
            "lz4"   => Some(CodecMethod::Lz4),
            _       => None,
        }
    }
}

impl std::fmt::Display for CodecMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("No codec found for method '{0}'")]
    UnknownCodec(String),
    #[error("Decompression failed: {0}")]
    DecompressionFailed(String),
    #[error("Compression failed: {0}")]
    CompressionFailed(String),
    /// A native dependency could not be located or obtained.
    #[error("Codec unavailable: {0}")]
    CodecUnavailable(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Codec trait ──────────────────────────────────────────────────────────────

pub trait Codec: Send + Sync {
    fn method(&self) -> CodecMethod;
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
    fn decompress(&self, data: &[u8], expected_size: usize) -> Result<Vec<u8>, CodecError>;
}

// ── Built-in codec implementations ──────────────────────────────────────────

pub struct NoneCodec;
impl Codec for NoneCodec {
    fn method(&self) -> CodecMethod { CodecMethod::None }
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> { Ok(data.to_vec()) }
    fn decompress(&self, data: &[u8], _: usize) -> Result<Vec<u8>, CodecError> { Ok(data.to_vec()) }
}

pub struct ZlibCodec;
impl Codec for ZlibCodec {
    fn method(&self) -> CodecMethod { CodecMethod::Zlib }
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).map_err(|e| CodecError::CompressionFailed(e.to_string()))?;
        // The adler32 trailer is only emitted by finish().
        enc.finish().map_err(|e| CodecError::CompressionFailed(e.to_string()))
    }
    fn decompress(&self, data: &[u8], expected_size: usize) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(expected_size);
        ZlibDecoder::new(data)
            .read_to_end(&mut out)
            .map_err(|e| CodecError::DecompressionFailed(e.to_string()))?;
        if out.len() != expected_size {
            return Err(CodecError::DecompressionFailed(format!(
                "zlib produced {} bytes, expected {expected_size}",
                out.len()
            )));
        }
        Ok(out)
    }
}

/// LZ4 frame format (magic `04 22 4D 18`), not the raw block format.
pub struct Lz4Codec;
impl Codec for Lz4Codec {
    fn method(&self) -> CodecMethod { CodecMethod::Lz4 }
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut enc = lz4_flex::frame::FrameEncoder::new(Vec::new());
        enc.write_all(data).map_err(|e| CodecError::CompressionFailed(e.to_string()))?;
        enc.finish().map_err(|e| CodecError::CompressionFailed(e.to_string()))
    }
    fn decompress(&self, data: &[u8], expected_size: usize) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(expected_size);
        lz4_flex::frame::FrameDecoder::new(data)
            .read_to_end(&mut out)
            .map_err(|e| CodecError::DecompressionFailed(e.to_string()))?;
        Ok(out)
    }
}

/// Kraken through an injected native provider. Without one every call is
/// [`CodecError::CodecUnavailable`].
pub struct OodleCodec {
    provider: Option<Arc<dyn OodleProvider>>,
}

impl OodleCodec {
    fn provider(&self) -> Result<&dyn OodleProvider, CodecError> {
        self.provider.as_deref().ok_or_else(|| {
            CodecError::CodecUnavailable(format!(
                "{} was not found (oodle codec)",
                oodle::OODLE_LIBRARY_NAME
            ))
        })
    }
}

impl Codec for OodleCodec {
    fn method(&self) -> CodecMethod { CodecMethod::Oodle }
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        self.provider()?.compress(data)
    }
    fn decompress(&self, data: &[u8], expected_size: usize) -> Result<Vec<u8>, CodecError> {
        self.provider()?.decompress(data, expected_size)
    }
}

// ── Registry ─────────────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct CodecRegistry {
    oodle: Option<Arc<dyn OodleProvider>>,
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("oodle", &self.oodle.is_some())
            .finish()
    }
}

impl CodecRegistry {
    /// Registry with no Oodle provider; `oodle` calls report `CodecUnavailable`.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_oodle(provider: Arc<dyn OodleProvider>) -> Self {
        Self { oodle: Some(provider) }
    }

    /// Resolve the Oodle provider once, at startup.  A resolution failure is
    /// logged and leaves the slot empty; the other methods stay usable.
    pub fn resolve(config: &OodleConfig, source: &dyn OodleSource) -> Self {
        match oodle::resolve_provider(config, source) {
            Ok(provider) => Self::with_oodle(provider),
            Err(e) => {
                log::warn!("oodle codec disabled: {e}");
                Self::new()
            }
        }
    }

    pub fn has_oodle(&self) -> bool {
        self.oodle.is_some()
    }

    pub fn codec(&self, method: CodecMethod) -> Box<dyn Codec> {
        match method {
            CodecMethod::None  => Box::new(NoneCodec),
            CodecMethod::Zlib  => Box::new(ZlibCodec),
            CodecMethod::Lz4   => Box::new(Lz4Codec),
            CodecMethod::Oodle => Box::new(OodleCodec { provider: self.oodle.clone() }),
        }
    }

    /// `None` when no codec is registered under `name`.
    pub fn get(&self, name: &str) -> Option<Box<dyn Codec>> {
        CodecMethod::from_name(name).map(|m| self.codec(m))
    }

    pub fn require(&self, name: &str) -> Result<Box<dyn Codec>, CodecError> {
        self.get(name)
            .ok_or_else(|| CodecError::UnknownCodec(name.to_owned()))
    }

    pub fn decompress(
        &self,
        name: &str,
        data: &[u8],
        expected_size: usize,
    ) -> Result<Vec<u8>, CodecError> {
        self.require(name)?.decompress(data, expected_size)
    }

    pub fn compress(&self, name: &str, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        self.require(name)?.compress(data)
    }
}
