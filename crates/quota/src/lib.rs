//! Usage accounting for per-origin cache directories.
//!
//! Answers "how much disk does this origin's cache use" for a quota
//! authority, and keeps the per-origin padding total (random extra bytes that
//! hide the real size of opaque responses) consistent with the record store,
//! even when a write was interrupted halfway.
//!
//! # Architecture
//! - [`padding`]: the `.padding`/`.padding-tmp` files and recovering their
//!   value from the record store.
//! - [`reduce`]: cancellable fold over a directory's entries, used to walk the
//!   cache directory and its `morgue` of body blobs.
//! - [`CacheQuotaClient`]: the quota client tying both together behind the
//!   padding mutex, plus the lifecycle hooks the [`QuotaAuthority`] calls.

mod authority;
mod client;
pub mod error;
mod manager;
mod origin;
pub mod padding;
mod reduce;
mod usage;
mod walk;

pub use crate::authority::{AuthorityHandle, LocalQuotaAuthority, QuotaAuthority};
pub use crate::client::{CacheQuotaClient, ClientHandle, ClientOptions, QuotaClient};
pub use crate::manager::{IdleOperationManager, OperationManager, OperationsHandle};
pub use crate::origin::{ClientType, ContentParentId, DirectoryLockId, OriginMetadata, PersistenceType};
pub use crate::reduce::reduce;
pub use crate::usage::UsageInfo;
pub use crate::walk::{MARKER_FILE_NAME, MORGUE_DIRECTORY_NAME};
