//! Per-origin padding bookkeeping.
//!
//! Opaque responses are stored with a random amount of padding added to their
//! size so that other origins can't infer the true size from quota numbers.
//! The running total for an origin is kept in a small file next to its record
//! store:
//!
//! - `.padding` holds the committed total as an 8-byte big-endian integer.
//! - `.padding-tmp` holds a total that was computed but not committed yet.
//!   Finding it on a later access means the write that produced it never
//!   finished, and the committed total can no longer be trusted.
//!
//! Nothing in here locks. Callers serialise access through the padding mutex
//! owned by [`CacheQuotaClient`](crate::CacheQuotaClient).

mod file;
mod resolve;

pub use self::file::{StagedPadding, delete, exists, finalize_write, get, init, update_temporary};
pub(crate) use self::file::write;
pub use self::resolve::{padding_size_from_records, restore};
use crate::error::{ErrorKind, Result};
use cachemeter_storage::StorageBackend;
use exn::ResultExt;
use std::path::{Path, PathBuf};

pub const PADDING_FILE_NAME: &str = ".padding";
pub const PADDING_TMP_FILE_NAME: &str = ".padding-tmp";

/// Padding is chosen so that `body + padding` lands on a multiple of this.
pub const PADDING_ROUND_UP: u64 = 20480;
/// Upper bound (exclusive) for the random component fed to
/// [`generate_padding`].
pub const MAX_RANDOM_PADDING: u32 = 100 * 1024;
/// Largest total a padding file can hold.
pub const MAX_PADDING: u64 = i64::MAX as u64;

/// Which of the two padding files an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaddingFile {
    Final,
    Temporary,
}

impl PaddingFile {
    pub const fn file_name(&self) -> &'static str {
        match self {
            Self::Final => PADDING_FILE_NAME,
            Self::Temporary => PADDING_TMP_FILE_NAME,
        }
    }

    pub fn path_in(&self, dir: &Path) -> PathBuf {
        dir.join(self.file_name())
    }
}

/// What the padding files of one origin directory currently say.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaddingState {
    /// No committed total.
    Absent,
    /// A committed, readable total.
    Present(u64),
    /// An uncommitted write was left behind; the total is unknown.
    TemporaryPresent,
}

impl PaddingState {
    /// Inspect the padding files of `dir`.
    ///
    /// A temporary file wins over a final one. A final file that fails to
    /// decode is reported as [`ErrorKind::Corrupt`].
    pub async fn inspect(backend: &dyn StorageBackend, dir: &Path) -> Result<Self> {
        if exists(backend, dir, PaddingFile::Temporary).await {
            return Ok(Self::TemporaryPresent);
        }
        match get(backend, dir).await {
            Ok(padding) => Ok(Self::Present(padding)),
            Err(e) if matches!(&*e, ErrorKind::NotFound(_)) => Ok(Self::Absent),
            Err(e) => Err(e),
        }
    }
}

/// Padding to add to a body of `body_size` bytes.
///
/// `random` is the per-response random component (below
/// [`MAX_RANDOM_PADDING`]). The result is chosen so that
/// `body_size + padding` is the next multiple of [`PADDING_ROUND_UP`] at or
/// above `body_size + random`, with an empty body still rounding up to one
/// full block.
///
/// ```
/// use cachemeter_quota::padding::generate_padding;
///
/// assert_eq!(generate_padding(0, 0), 20480);
/// assert_eq!(generate_padding(100, 0), 20380);
/// assert_eq!(generate_padding(20000, 1000), 20960);
/// ```
pub fn generate_padding(body_size: u64, random: u32) -> u64 {
    let padded = body_size.saturating_add(u64::from(random));
    round_up(padded, PADDING_ROUND_UP).saturating_sub(body_size)
}

fn round_up(value: u64, multiple: u64) -> u64 {
    // Zero rounds up to a full block rather than staying at zero.
    multiple.saturating_add((value.saturating_sub(1) / multiple).saturating_mul(multiple))
}

fn encode(padding: u64, path: &Path) -> Result<[u8; 8]> {
    let value = i64::try_from(padding).or_raise(|| ErrorKind::Corrupt(path.to_path_buf()))?;
    Ok(value.to_be_bytes())
}

fn decode(bytes: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = bytes.try_into().ok()?;
    u64::try_from(i64::from_be_bytes(bytes)).ok()
}
