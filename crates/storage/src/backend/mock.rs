//! In-memory storage backend for testing.

use super::{EntryKind, PathStream};
use crate::error::{ErrorKind, Result};
use crate::path::validate as validate_path;
use async_stream::stream;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use crate::StorageBackend;

/// In-memory storage backend for testing.
///
/// Files live in a [`BTreeMap`] behind a [`RwLock`], so all trait methods can
/// operate on `&self` without external synchronisation. Directories are
/// tracked explicitly: writing a file creates its ancestors, and removing the
/// last file in a directory leaves the directory behind, same as a real disk.
///
/// Beyond plain files, the mock can reproduce the races a directory walk has
/// to survive:
///
/// - [`with_vanishing`](Self::with_vanishing) registers an entry that shows up
///   when its parent is listed but is gone by the time it is inspected.
/// - [`with_unreadable`](Self::with_unreadable) registers an entry whose
///   inspection fails with an I/O error.
///
/// # Examples
///
/// ```
/// use cachemeter_storage::backend::{MockBackend, StorageBackend};
/// use std::path::Path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MockBackend::with_files([
///     ("cache/caches.sqlite", vec![0u8; 4096]),
/// ]);
/// assert_eq!(backend.size(Path::new("cache/caches.sqlite")).await?, 4096);
///
/// backend.write(Path::new("cache/.padding"), &0u64.to_be_bytes()).await?;
/// assert!(backend.exists(Path::new("cache/.padding")).await?);
/// # Ok(())
/// # }
/// ```
pub struct MockBackend {
    name: String,
    state: RwLock<State>,
}

#[derive(Default)]
struct State {
    files: BTreeMap<PathBuf, Vec<u8>>,
    dirs: BTreeSet<PathBuf>,
    vanishing: BTreeSet<PathBuf>,
    unreadable: BTreeSet<PathBuf>,
}
impl State {
    fn add_ancestors(&mut self, path: &Path) {
        for ancestor in path.ancestors().skip(1) {
            if ancestor.as_os_str().is_empty() {
                break;
            }
            self.dirs.insert(ancestor.to_path_buf());
        }
    }

    fn children(&self, dir: &Path) -> Vec<PathBuf> {
        let known = self.files.keys().chain(self.dirs.iter()).chain(self.vanishing.iter()).chain(self.unreadable.iter());
        let mut children = BTreeSet::new();
        for path in known {
            let Ok(rest) = path.strip_prefix(dir) else {
                continue;
            };
            if let Some(first) = rest.components().next() {
                children.insert(dir.join(first));
            }
        }
        children.into_iter().collect()
    }
}

/// Validate a path handed to a test constructor.
///
/// The panic here is deliberate: the mock only exists for tests, and a test
/// with a broken setup should not pass.
fn validate_fixture(path: impl Into<PathBuf>, caller: &str) -> PathBuf {
    let path = path.into();
    let Ok(validated) = validate_path(&path) else {
        panic!("MockBackend::{caller}: invalid path {}", path.display());
    };
    validated
}

impl MockBackend {
    /// Create a mock backend pre-populated with files.
    ///
    /// Panics if any path fails validation (e.g. path traversal).
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Vec<u8>>)>) -> Self {
        let mut state = State::default();
        for (path, data) in files {
            let validated = validate_fixture(path, "with_files");
            state.add_ancestors(&validated);
            state.files.insert(validated, data.into());
        }
        Self {
            name: "mock".to_string(),
            state: RwLock::new(state),
        }
    }

    /// Change the name of the mock backend.
    ///
    /// # Example
    ///
    /// ```
    /// use cachemeter_storage::backend::MockBackend;
    ///
    /// let backend = MockBackend::default().with_name("test");
    /// ```
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Add an empty directory.
    pub fn with_dir(mut self, path: impl Into<PathBuf>) -> Self {
        let validated = validate_fixture(path, "with_dir");
        let state = self.state.get_mut();
        state.add_ancestors(&validated);
        state.dirs.insert(validated);
        self
    }

    /// Add an entry that is listed by its parent but missing when inspected.
    pub fn with_vanishing(mut self, path: impl Into<PathBuf>) -> Self {
        let validated = validate_fixture(path, "with_vanishing");
        let state = self.state.get_mut();
        state.add_ancestors(&validated);
        state.vanishing.insert(validated);
        self
    }

    /// Add an entry that is listed by its parent but fails to be inspected.
    pub fn with_unreadable(mut self, path: impl Into<PathBuf>) -> Self {
        let validated = validate_fixture(path, "with_unreadable");
        let state = self.state.get_mut();
        state.add_ancestors(&validated);
        state.unreadable.insert(validated);
        self
    }

    fn not_found(path: PathBuf) -> exn::Exn<ErrorKind> {
        exn::Exn::from(ErrorKind::NotFound(path))
    }
}
impl Default for MockBackend {
    fn default() -> Self {
        let files: [(&str, &[u8]); 0] = [];
        Self::with_files(files)
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn local_path(&self, _path: &Path) -> Result<PathBuf> {
        exn::bail!(ErrorKind::NotLocal(self.name.clone()))
    }

    fn read_dir<'a>(&'a self, dir: &'a Path) -> PathStream<'a> {
        let dir = match validate_path(dir) {
            Ok(dir) => dir,
            Err(e) => return Box::pin(futures::stream::once(async { Err(e) })),
        };
        Box::pin(stream! {
            // Snapshot under the read lock, then drop it before yielding.
            let children = self.state.read().await.children(&dir);
            for child in children {
                yield Ok(child);
            }
        })
    }

    async fn entry_kind(&self, path: &Path) -> Result<EntryKind> {
        let path = validate_path(path)?;
        let state = self.state.read().await;
        if state.unreadable.contains(&path) {
            let message = format!("simulated failure inspecting {}", path.display());
            exn::bail!(ErrorKind::Io(std::io::Error::other(message)));
        }
        if state.files.contains_key(&path) {
            Ok(EntryKind::File)
        } else if state.dirs.contains(&path) {
            Ok(EntryKind::Directory)
        } else {
            Ok(EntryKind::Missing)
        }
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let path = validate_path(path)?;
        let state = self.state.read().await;
        Ok(state.files.contains_key(&path) || state.dirs.contains(&path))
    }

    async fn size(&self, path: &Path) -> Result<u64> {
        let path = validate_path(path)?;
        let state = self.state.read().await;
        let data = state.files.get(&path).ok_or_else(|| Self::not_found(path.clone()))?;
        Ok(data.len() as u64)
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let path = validate_path(path)?;
        let state = self.state.read().await;
        state.files.get(&path).cloned().ok_or_else(|| Self::not_found(path))
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let path = validate_path(path)?;
        let mut state = self.state.write().await;
        if state.dirs.contains(&path) {
            exn::bail!(ErrorKind::AlreadyExists(path));
        }
        state.add_ancestors(&path);
        state.files.insert(path, data.to_vec());
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let from = validate_path(from)?;
        let to = validate_path(to)?;
        let mut state = self.state.write().await;
        let data = state.files.remove(&from).ok_or_else(|| Self::not_found(from))?;
        state.add_ancestors(&to);
        state.files.insert(to, data);
        Ok(())
    }

    async fn remove_file(&self, path: &Path) -> Result<()> {
        let path = validate_path(path)?;
        let mut state = self.state.write().await;
        state.vanishing.remove(&path);
        state.files.remove(&path).map(|_| ()).ok_or_else(|| Self::not_found(path))
    }

    async fn remove_dir_all(&self, path: &Path) -> Result<()> {
        let path = validate_path(path)?;
        let mut state = self.state.write().await;
        if !state.dirs.contains(&path) {
            exn::bail!(ErrorKind::NotFound(path));
        }
        state.files.retain(|file, _| !file.starts_with(&path));
        state.dirs.retain(|dir| !dir.starts_with(&path));
        state.vanishing.retain(|entry| !entry.starts_with(&path));
        state.unreadable.retain(|entry| !entry.starts_with(&path));
        Ok(())
    }
}
