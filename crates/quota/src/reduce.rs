use crate::UsageInfo;
use crate::error::{ErrorKind, Result};
use cachemeter_storage::StorageBackend;
use exn::ResultExt;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Fold the immediate children of `dir` into a [`UsageInfo`].
///
/// Children are visited in enumeration order and handed to `step`, whose
/// results are summed onto `seed`. `canceled` is checked before every child;
/// once it is set the fold stops with [`ErrorKind::Aborted`] and the partial
/// sum is dropped. The first error from `step` ends the fold as well.
///
/// Entries can disappear between being listed and being looked at. `step` is
/// expected to count those as zero rather than fail.
///
/// ```
/// use cachemeter_quota::{UsageInfo, reduce};
/// use cachemeter_storage::StorageBackend;
/// use std::path::Path;
/// use std::sync::atomic::AtomicBool;
///
/// async fn bucket_bytes(backend: &dyn StorageBackend, bucket: &Path) -> cachemeter_quota::error::Result<u64> {
///     let canceled = AtomicBool::new(false);
///     let usage = reduce(backend, bucket, &canceled, UsageInfo::default(), |file| async move {
///         let size = backend.size(&file).await.unwrap_or(0);
///         Ok(UsageInfo::from_file(size))
///     })
///     .await?;
///     Ok(usage.file_usage())
/// }
/// ```
pub async fn reduce<F, Fut>(
    backend: &dyn StorageBackend,
    dir: &Path,
    canceled: &AtomicBool,
    seed: UsageInfo,
    mut step: F,
) -> Result<UsageInfo>
where
    F: FnMut(PathBuf) -> Fut,
    Fut: Future<Output = Result<UsageInfo>>,
{
    let mut entries = backend.read_dir(dir);
    let mut usage = seed;
    while let Some(entry) = entries.next().await {
        if canceled.load(Ordering::Acquire) {
            exn::bail!(ErrorKind::Aborted);
        }
        let entry = entry.or_raise(|| ErrorKind::Storage)?;
        usage += step(entry).await?;
    }
    Ok(usage)
}
