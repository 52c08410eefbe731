//! Oodle (Kraken) support through an externally supplied native library.
//!
//! The codec itself never touches the filesystem or network.  The registry
//! is handed an [`OodleProvider`]; the usual provider is [`NativeOodle`],
//! built from the entry points of `oo2core_9_win64.dll` (or a compatible
//! build).  [`LibraryOodle`] is the stock [`OodleSource`]: it searches a list
//! of directories, loads with `libloading`, and can download the library
//! from a configured URL.
//!
//! # Resolution
//! [`resolve_provider`] looks for the library in this order:
//!   1. `OodleConfig::library_path`, if it exists on disk.
//!   2. [`OodleSource::locate`] (search paths known to the host).
//!   3. [`OodleSource::fetch`], only when `allow_fetch` is set.
//!
//! Whatever path wins is passed to [`OodleSource::load`].  If nothing turns
//! up the result is [`CodecError::CodecUnavailable`].
//!
//! # Compression settings
//! Compression always uses the Kraken compressor at level `Optimal3`.
//! Neither is configurable.
//!
//! # Thread safety
//! The Oodle LZ entry points are reentrant for distinct buffer pairs, so a
//! single [`NativeOodle`] may be shared across threads.

use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::Arc;
use std::time::Duration;

use libloading::Library;

use super::CodecError;

/// File name of the library the engine ships with.
pub const OODLE_LIBRARY_NAME: &str = "oo2core_9_win64.dll";

/// `OodleLZ_Compressor_Kraken`.
pub const COMPRESSOR_KRAKEN: i32 = 8;
/// `OodleLZ_CompressionLevel_Optimal3`.
pub const LEVEL_OPTIMAL3: i32 = 7;

const FUZZ_SAFE_YES: i32 = 1;
const CHECK_CRC_NO: i32 = 0;
const VERBOSITY_NONE: i32 = 0;
const THREAD_PHASE_ALL: i32 = 3;

const FETCH_TIMEOUT_SECS: u64 = 60;

/// Capability the `oodle` codec delegates to.
pub trait OodleProvider: Send + Sync {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
    /// Must return exactly `expected_size` bytes or fail.
    fn decompress(&self, data: &[u8], expected_size: usize) -> Result<Vec<u8>, CodecError>;
}

/// Host-side hooks for finding, downloading and loading the native library.
pub trait OodleSource {
    fn locate(&self) -> Option<PathBuf>;
    fn fetch(&self) -> Result<PathBuf, CodecError>;
    fn load(&self, path: &Path) -> Result<Arc<dyn OodleProvider>, CodecError>;
}

#[derive(Debug, Clone, Default)]
pub struct OodleConfig {
    pub library_path: Option<PathBuf>,
    /// Permit [`OodleSource::fetch`] when the library is not found locally.
    pub allow_fetch: bool,
}

pub fn resolve_provider(
    config: &OodleConfig,
    source: &dyn OodleSource,
) -> Result<Arc<dyn OodleProvider>, CodecError> {
    let configured = config.library_path.as_ref().filter(|p| p.is_file()).cloned();
    if let Some(path) = configured.or_else(|| source.locate()) {
        log::debug!("loading oodle library from {}", path.display());
        return source.load(&path);
    }
    if !config.allow_fetch {
        return Err(CodecError::CodecUnavailable(format!(
            "{OODLE_LIBRARY_NAME} was not found and fetching is disabled"
        )));
    }
    log::warn!("{OODLE_LIBRARY_NAME} not found locally, attempting fetch");
    let path = source.fetch().map_err(|e| {
        CodecError::CodecUnavailable(format!("{OODLE_LIBRARY_NAME} was not found ({e})"))
    })?;
    log::debug!("fetched oodle library to {}", path.display());
    source.load(&path)
}

// ── Native entry points ──────────────────────────────────────────────────────

/// `OodleLZ_Compress`.
pub type CompressFn = unsafe extern "C" fn(
    compressor: i32,
    raw_buf: *const u8,
    raw_len: isize,
    comp_buf: *mut u8,
    level: i32,
    options: *const c_void,
    dictionary_base: *const c_void,
    lrm: *const c_void,
    scratch_mem: *mut c_void,
    scratch_size: isize,
) -> isize;

/// `OodleLZ_Decompress`.
pub type DecompressFn = unsafe extern "C" fn(
    comp_buf: *const u8,
    comp_len: isize,
    raw_buf: *mut u8,
    raw_len: isize,
    fuzz_safe: i32,
    check_crc: i32,
    verbosity: i32,
    dec_buf_base: *mut c_void,
    dec_buf_size: isize,
    callback: *const c_void,
    callback_data: *mut c_void,
    decoder_memory: *mut c_void,
    decoder_memory_size: isize,
    thread_phase: i32,
) -> isize;

/// `OodleLZ_GetCompressedBufferSizeNeeded`.
pub type BufferSizeFn = unsafe extern "C" fn(compressor: i32, raw_len: isize) -> isize;

/// Entry points resolved from the native library by the host.
///
/// # Layout
/// `#[repr(C)]` so hosts that build the table on the C side can hand over a
/// pointer directly.  Field order is fixed.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct OodleFunctions {
    pub compress: Option<CompressFn>,
    pub decompress: Option<DecompressFn>,
    pub compressed_buffer_size: Option<BufferSizeFn>,
}

// Safety: the Oodle LZ entry points are reentrant and hold no per-call state.
unsafe impl Send for OodleFunctions {}
unsafe impl Sync for OodleFunctions {}

/// [`OodleProvider`] backed by real Oodle entry points.
pub struct NativeOodle {
    fns: OodleFunctions,
    /// Keeps the entry points in `fns` mapped when they came from [`open`](Self::open).
    _library: Option<Library>,
}

impl NativeOodle {
    /// Wrap entry points resolved by the host, which must keep them valid
    /// for as long as the returned value lives.
    ///
    /// Fails with `CodecUnavailable` when a required entry point is missing.
    pub fn new(fns: OodleFunctions) -> Result<Self, CodecError> {
        check_entry_points(&fns)?;
        Ok(Self { fns, _library: None })
    }

    /// Load the library at `path` and resolve its `OodleLZ_*` exports.
    pub fn open(path: &Path) -> Result<Self, CodecError> {
        // Safety: loading runs the library's initialisers; the caller chose
        // this file as an Oodle build.
        let library = unsafe { Library::new(path) }.map_err(|e| {
            CodecError::CodecUnavailable(format!("cannot load {}: {e}", path.display()))
        })?;
        // Safety: the symbol types match the OodleLZ prototypes above.
        let fns = unsafe {
            OodleFunctions {
                compress: symbol(&library, b"OodleLZ_Compress\0"),
                decompress: symbol(&library, b"OodleLZ_Decompress\0"),
                compressed_buffer_size: symbol(
                    &library,
                    b"OodleLZ_GetCompressedBufferSizeNeeded\0",
                ),
            }
        };
        check_entry_points(&fns)?;
        log::debug!("resolved oodle entry points from {}", path.display());
        Ok(Self { fns, _library: Some(library) })
    }
}

unsafe fn symbol<T: Copy>(library: &Library, name: &[u8]) -> Option<T> {
    library.get::<T>(name).ok().map(|sym| *sym)
}

fn check_entry_points(fns: &OodleFunctions) -> Result<(), CodecError> {
    let missing = [
        ("OodleLZ_Compress", fns.compress.is_none()),
        ("OodleLZ_Decompress", fns.decompress.is_none()),
        ("OodleLZ_GetCompressedBufferSizeNeeded", fns.compressed_buffer_size.is_none()),
    ];
    match missing.iter().find(|(_, absent)| *absent) {
        Some((name, _)) => Err(CodecError::CodecUnavailable(format!(
            "{OODLE_LIBRARY_NAME} does not export {name}"
        ))),
        None => Ok(()),
    }
}

impl OodleProvider for NativeOodle {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let (Some(compress), Some(bound)) = (self.fns.compress, self.fns.compressed_buffer_size)
        else {
            return Err(CodecError::CodecUnavailable("oodle compress entry point missing".into()));
        };
        let raw_len = isize::try_from(data.len())
            .map_err(|_| CodecError::CompressionFailed("input too large".into()))?;
        let cap = unsafe { bound(COMPRESSOR_KRAKEN, raw_len) };
        let cap = usize::try_from(cap)
            .map_err(|_| CodecError::CompressionFailed(format!("bad buffer size {cap}")))?;
        let mut out = vec![0u8; cap];
        let written = unsafe {
            compress(
                COMPRESSOR_KRAKEN,
                data.as_ptr(),
                raw_len,
                out.as_mut_ptr(),
                LEVEL_OPTIMAL3,
                ptr::null(),
                ptr::null(),
                ptr::null(),
                ptr::null_mut(),
                0,
            )
        };
        if written <= 0 || written as usize > cap {
            return Err(CodecError::CompressionFailed(format!(
                "OodleLZ_Compress returned {written}"
            )));
        }
        out.truncate(written as usize);
        Ok(out)
    }

    fn decompress(&self, data: &[u8], expected_size: usize) -> Result<Vec<u8>, CodecError> {
        let Some(decompress) = self.fns.decompress else {
            return Err(CodecError::CodecUnavailable("oodle decompress entry point missing".into()));
        };
        let comp_len = isize::try_from(data.len())
            .map_err(|_| CodecError::DecompressionFailed("input too large".into()))?;
        let raw_len = isize::try_from(expected_size)
            .map_err(|_| CodecError::DecompressionFailed("output too large".into()))?;
        let mut out = vec![0u8; expected_size];
        let written = unsafe {
            decompress(
                data.as_ptr(),
                comp_len,
                out.as_mut_ptr(),
                raw_len,
                FUZZ_SAFE_YES,
                CHECK_CRC_NO,
                VERBOSITY_NONE,
                ptr::null_mut(),
                0,
                ptr::null(),
                ptr::null_mut(),
                ptr::null_mut(),
                0,
                THREAD_PHASE_ALL,
            )
        };
        if written != raw_len {
            return Err(CodecError::DecompressionFailed(format!(
                "OodleLZ_Decompress produced {written} bytes, expected {expected_size}"
            )));
        }
        Ok(out)
    }
}

// ── Library source ───────────────────────────────────────────────────────────

/// [`OodleSource`] over the filesystem, `libloading` and an optional HTTP
/// download.
#[derive(Debug, Clone, Default)]
pub struct LibraryOodle {
    /// Directories searched for [`OODLE_LIBRARY_NAME`], in order.
    pub search_dirs: Vec<PathBuf>,
    /// Where [`fetch`](OodleSource::fetch) downloads from.  There is no
    /// built-in mirror; without a URL fetching fails.
    pub fetch_url: Option<String>,
    /// Where a downloaded library is written.  Empty means the working directory.
    pub download_dir: PathBuf,
}

impl LibraryOodle {
    /// Searches the working directory, then the executable's directory.
    pub fn standard() -> Self {
        let mut search_dirs = Vec::new();
        if let Ok(cwd) = std::env::current_dir() {
            search_dirs.push(cwd);
        }
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf));
        search_dirs.extend(exe_dir);
        Self { search_dirs, ..Default::default() }
    }
}

impl OodleSource for LibraryOodle {
    fn locate(&self) -> Option<PathBuf> {
        self.search_dirs
            .iter()
            .map(|dir| dir.join(OODLE_LIBRARY_NAME))
            .find(|path| path.is_file())
    }

    fn fetch(&self) -> Result<PathBuf, CodecError> {
        let url = self.fetch_url.as_deref().ok_or_else(|| {
            CodecError::CodecUnavailable("no download URL configured".into())
        })?;
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .build()
            .map_err(fetch_failed)?;
        let body = client
            .get(url)
            .send()
            .and_then(|resp| resp.error_for_status())
            .and_then(|resp| resp.bytes())
            .map_err(fetch_failed)?;
        std::fs::create_dir_all(&self.download_dir)?;
        let path = self.download_dir.join(OODLE_LIBRARY_NAME);
        std::fs::write(&path, &body)?;
        log::info!("downloaded {} B from {url} to {}", body.len(), path.display());
        Ok(path)
    }

    fn load(&self, path: &Path) -> Result<Arc<dyn OodleProvider>, CodecError> {
        Ok(Arc::new(NativeOodle::open(path)?))
    }
}

fn fetch_failed(e: reqwest::Error) -> CodecError {
    CodecError::CodecUnavailable(format!("download failed: {e}"))
}
