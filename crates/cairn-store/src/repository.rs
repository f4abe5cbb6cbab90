//! One channel's append-only history.
//!
//! A [`ChannelRepository`] wraps a non-bare git repository whose work tree
//! holds one file per appended message. All mutating git work runs on
//! blocking threads while holding the repository's async mutex, so appends
//! and pulls on one channel never interleave.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use git2::{Commit, ErrorCode, Oid, Repository, RepositoryInitOptions, Status, StatusOptions};
use tokio::sync::Mutex;
use tokio::task;
use tracing::{debug, info, warn};

use cairn_shared::Message;

use crate::error::{Result, StoreError};
use crate::models::{CommitId, HistoryEntry};
use crate::record::{system_signature, CommitRecord};

/// Branch every channel history lives on.
pub(crate) const MAIN_BRANCH: &str = "main";
pub(crate) const MAIN_REF: &str = "refs/heads/main";

/// Handle to one channel's versioned history.
///
/// Cloning is cheap; clones share the underlying repository and its lock.
#[derive(Clone)]
pub struct ChannelRepository {
    basedir: PathBuf,
    name: String,
    repo: Arc<Mutex<Repository>>,
}

impl fmt::Debug for ChannelRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelRepository")
            .field("name", &self.name)
            .field("basedir", &self.basedir)
            .finish_non_exhaustive()
    }
}

impl ChannelRepository {
    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Open the existing history rooted at `basepath`.
    ///
    /// Never creates anything. Fails with [`StoreError::NotARepository`] if
    /// the directory holds no versioned store. Any entry left half-appended
    /// by a crash is discarded before the handle is returned.
    pub async fn open(basepath: impl Into<PathBuf>) -> Result<Self> {
        let basedir = absolute(basepath.into())?;
        let path = basedir.clone();

        let repo = task::spawn_blocking(move || -> Result<Repository> {
            let repo = match Repository::open(&path) {
                Ok(repo) => repo,
                Err(e) if e.code() == ErrorCode::NotFound => {
                    return Err(StoreError::NotARepository(path));
                }
                Err(e) => return Err(e.into()),
            };
            if repo.is_bare() {
                return Err(StoreError::NotARepository(path));
            }
            let discarded = discard_partial_appends(&repo, &path)?;
            if discarded > 0 {
                warn!(path = %path.display(), discarded, "Discarded orphaned entries");
            }
            Ok(repo)
        })
        .await??;

        debug!(path = %basedir.display(), "Opened channel history");
        Ok(Self::from_parts(basedir, repo))
    }

    /// Create a brand-new, empty history at `basepath`.
    ///
    /// Missing directories are created. Fails with
    /// [`StoreError::AlreadyInitialized`] if a store already exists there.
    pub async fn create(basepath: impl Into<PathBuf>) -> Result<Self> {
        let basedir = absolute(basepath.into())?;
        let path = basedir.clone();

        let repo = task::spawn_blocking(move || -> Result<Repository> {
            fs::create_dir_all(&path)?;

            let mut opts = RepositoryInitOptions::new();
            opts.no_reinit(true)
                .mkdir(false)
                .bare(false)
                .initial_head(MAIN_BRANCH);

            match Repository::init_opts(&path, &opts) {
                Ok(repo) => Ok(repo),
                Err(e) if e.code() == ErrorCode::Exists => Err(StoreError::AlreadyInitialized(path)),
                Err(e) => Err(e.into()),
            }
        })
        .await??;

        info!(path = %basedir.display(), "Created channel history");
        Ok(Self::from_parts(basedir, repo))
    }

    fn from_parts(basedir: PathBuf, repo: Repository) -> Self {
        let name = basedir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            basedir,
            name,
            repo: Arc::new(Mutex::new(repo)),
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Channel name: the last segment of the base directory.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn basedir(&self) -> &Path {
        &self.basedir
    }

    /// The newest commit known to this local copy.
    ///
    /// This is the local frontier only, not necessarily what other peers
    /// have. `None` for an empty history.
    pub async fn top_of_tree(&self) -> Result<Option<CommitId>> {
        self.with_repo(|repo| Ok(head_commit(repo).map(|c| CommitId::from(c.id()))))
            .await
    }

    // ------------------------------------------------------------------
    // Append
    // ------------------------------------------------------------------

    /// Append `message` as a new commit on top of the current top of tree.
    ///
    /// Writes the content to a file named after the message id, sets its
    /// mtime to the message timestamp, stages it and commits. Returns the new
    /// top of tree. If any step fails the written file and the staged index
    /// entry are rolled back.
    pub async fn append_message(&self, message: &Message) -> Result<CommitId> {
        message.validate().map_err(StoreError::InvalidMessageId)?;

        let message = message.clone();
        let basedir = self.basedir.clone();
        let commit = self
            .with_repo(move |repo| append_blocking(repo, &basedir, &message))
            .await?;

        debug!(channel = %self.name, commit = %commit, "Appended message");
        Ok(commit)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Lazily walk the history from a snapshot of the current top of tree.
    ///
    /// Newest first by default; `oldest_first` yields the root commit first.
    /// The iterator reads from disk as it advances, so async callers should
    /// drive it from a blocking task (see [`ChannelRepository::messages`]).
    pub fn enumerate_messages(&self, oldest_first: bool) -> Result<History> {
        let repo = Repository::open(&self.basedir)?;
        let top = head_commit(&repo).map(|c| c.id());
        History::new(repo, top, oldest_first)
    }

    /// Collect the whole history on a blocking thread.
    pub async fn messages(&self, oldest_first: bool) -> Result<Vec<HistoryEntry>> {
        let this = self.clone();
        task::spawn_blocking(move || -> Result<Vec<HistoryEntry>> {
            this.enumerate_messages(oldest_first)?.collect()
        })
        .await?
    }

    /// Content of message `id` as of the current top of tree.
    pub async fn read_message(&self, id: &str) -> Result<Vec<u8>> {
        let id = id.to_string();
        self.with_repo(move |repo| {
            let tree = match head_commit(repo) {
                Some(commit) => commit.tree()?,
                None => return Err(StoreError::MessageNotFound(id)),
            };
            let entry = tree
                .get_name(&id)
                .ok_or_else(|| StoreError::MessageNotFound(id.clone()))?;
            let blob = repo.find_blob(entry.id())?;
            Ok(blob.content().to_vec())
        })
        .await
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Run `f` against the repository on a blocking thread, holding the lock.
    pub(crate) async fn with_repo<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Repository) -> Result<T> + Send + 'static,
    {
        let guard = Arc::clone(&self.repo).lock_owned().await;
        task::spawn_blocking(move || f(&*guard)).await?
    }
}

// ---------------------------------------------------------------------------
// History iterator
// ---------------------------------------------------------------------------

/// Lazy walk over one snapshot of a channel history.
pub struct History {
    repo: Repository,
    cursor: Cursor,
}

enum Cursor {
    /// Next commit to yield, following parent links.
    Backward(Option<Oid>),
    /// Commit ids from top of tree down to the root; popped from the end.
    Forward(Vec<Oid>),
}

impl History {
    fn new(repo: Repository, top: Option<Oid>, oldest_first: bool) -> Result<Self> {
        let cursor = if oldest_first {
            let mut chain = Vec::new();
            let mut next = top;
            while let Some(oid) = next {
                chain.push(oid);
                next = repo.find_commit(oid)?.parent_ids().next();
            }
            Cursor::Forward(chain)
        } else {
            Cursor::Backward(top)
        };

        Ok(Self { repo, cursor })
    }
}

impl Iterator for History {
    type Item = Result<HistoryEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        let oid = match &mut self.cursor {
            Cursor::Backward(next) => next.take()?,
            Cursor::Forward(chain) => chain.pop()?,
        };

        let entry = decode_entry(&self.repo, oid);
        if let (Cursor::Backward(next), Ok(entry)) = (&mut self.cursor, &entry) {
            *next = entry.parent.map(Oid::from);
        }
        Some(entry)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match &self.cursor {
            Cursor::Backward(None) => (0, Some(0)),
            Cursor::Backward(Some(_)) => (1, None),
            Cursor::Forward(chain) => (chain.len(), Some(chain.len())),
        }
    }
}

// ---------------------------------------------------------------------------
// Blocking internals
// ---------------------------------------------------------------------------

/// Scoped append: unless [`AppendTxn::commit`] is reached, dropping the
/// guard removes the message file and resets the index to top of tree.
struct AppendTxn<'r> {
    repo: &'r Repository,
    path: PathBuf,
    committed: bool,
}

impl<'r> AppendTxn<'r> {
    fn begin(repo: &'r Repository, path: PathBuf) -> Self {
        Self {
            repo,
            path,
            committed: false,
        }
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for AppendTxn<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to remove uncommitted entry");
            }
        }
        if let Err(e) = reset_index(self.repo) {
            warn!(error = %e, "Failed to reset index after aborted append");
        }
    }
}

fn append_blocking(repo: &Repository, basedir: &Path, message: &Message) -> Result<CommitId> {
    let parent = head_commit(repo);
    if let Some(commit) = &parent {
        if commit.tree()?.get_name(&message.id).is_some() {
            return Err(StoreError::DuplicateMessage(message.id.clone()));
        }
    }

    let txn = AppendTxn::begin(repo, basedir.join(&message.id));
    write_message_file(&txn.path, &message.content, message.timestamp)?;

    let mut index = repo.index()?;
    index.add_path(Path::new(&message.id))?;
    index.write()?;
    let tree = repo.find_tree(index.write_tree()?)?;

    let record = CommitRecord::for_message(message, parent.as_ref().map(Commit::id));
    let signature = system_signature(message.timestamp)?;
    let parents: Vec<&Commit<'_>> = parent.iter().collect();
    let oid = repo.commit(
        Some("HEAD"),
        &signature,
        &signature,
        &record.encode(),
        &tree,
        &parents,
    )?;

    txn.commit();
    Ok(oid.into())
}

/// Write an entry file and stamp it with the author's timestamp.
pub(crate) fn write_message_file(path: &Path, content: &[u8], timestamp: DateTime<Utc>) -> Result<()> {
    fs::write(path, content)?;
    set_mtime(path, timestamp)
}

pub(crate) fn set_mtime(path: &Path, timestamp: DateTime<Utc>) -> Result<()> {
    let file = fs::OpenOptions::new().write(true).open(path)?;
    file.set_modified(SystemTime::from(timestamp))?;
    Ok(())
}

/// The top-of-tree commit, or `None` if HEAD is unborn or unresolvable.
pub(crate) fn head_commit(repo: &Repository) -> Option<Commit<'_>> {
    match repo.head().and_then(|head| head.peel_to_commit()) {
        Ok(commit) => Some(commit),
        Err(e) => {
            if e.code() != ErrorCode::UnbornBranch {
                debug!(error = %e, "HEAD not resolvable, treating history as empty");
            }
            None
        }
    }
}

/// Make the index match the top-of-tree tree (empty for an empty history).
pub(crate) fn reset_index(repo: &Repository) -> Result<()> {
    let mut index = repo.index()?;
    match head_commit(repo) {
        Some(commit) => index.read_tree(&commit.tree()?)?,
        None => index.clear()?,
    }
    index.write()?;
    Ok(())
}

/// Decode the commit `oid` into a [`HistoryEntry`], checking that it has the
/// shape of a channel history commit.
pub(crate) fn decode_entry(repo: &Repository, oid: Oid) -> Result<HistoryEntry> {
    let commit = repo.find_commit(oid)?;
    if commit.parent_count() > 1 {
        return Err(StoreError::malformed(oid, "merge commits are not part of a channel history"));
    }

    let raw = commit
        .message()
        .ok_or_else(|| StoreError::malformed(oid, "commit message is not UTF-8"))?;
    let record = CommitRecord::decode(raw).map_err(|reason| StoreError::malformed(oid, reason))?;

    let parent = commit.parent_ids().next();
    if record.previous_top != parent {
        return Err(StoreError::malformed(oid, "recorded previous top does not match parent"));
    }

    let tree = commit.tree()?;
    let parent_len = match parent {
        Some(p) => repo.find_commit(p)?.tree()?.len(),
        None => 0,
    };
    if tree.len() != parent_len + 1 {
        return Err(StoreError::malformed(oid, "commit must add exactly one entry"));
    }

    let blob_id = tree
        .get_name(&record.message_id)
        .map(|entry| entry.id())
        .ok_or_else(|| StoreError::malformed(oid, "message file missing from tree"))?;
    let blob = repo.find_blob(blob_id)?;

    Ok(HistoryEntry {
        commit: oid.into(),
        parent: parent.map(CommitId::from),
        message_id: record.message_id,
        timestamp: record.timestamp,
        signature: record.signature,
        content: blob.content().to_vec(),
    })
}

/// Remove what a crashed append left behind: staged entries that never made
/// it into a commit and untracked files in the work tree.
fn discard_partial_appends(repo: &Repository, basedir: &Path) -> Result<usize> {
    let mut opts = StatusOptions::new();
    opts.include_untracked(true)
        .include_ignored(false)
        .recurse_untracked_dirs(false);

    let mut orphans = Vec::new();
    let mut index_dirty = false;
    {
        let statuses = repo.statuses(Some(&mut opts))?;
        for entry in statuses.iter() {
            let status = entry.status();
            if status.intersects(
                Status::INDEX_NEW
                    | Status::INDEX_MODIFIED
                    | Status::INDEX_DELETED
                    | Status::INDEX_RENAMED
                    | Status::INDEX_TYPECHANGE,
            ) {
                index_dirty = true;
            }
            if status.intersects(Status::INDEX_NEW | Status::WT_NEW) {
                if let Some(path) = entry.path() {
                    orphans.push(basedir.join(path));
                }
            }
        }
    }

    if index_dirty {
        reset_index(repo)?;
    }

    let mut removed = 0;
    for path in orphans {
        if path.is_dir() {
            warn!(path = %path.display(), "Leaving untracked directory in channel history");
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(removed)
}

fn absolute(path: PathBuf) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
