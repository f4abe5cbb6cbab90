//! Pulling a peer's copy of a channel into the local history.
//!
//! The peer's `main` branch is fetched into [`INCOMING_REF`] and reconciled
//! with the local top of tree:
//! - remote behind or equal: nothing to do;
//! - otherwise every entry after the merge base, from both sides, is
//!   re-chained on top of the merge base ordered by `(timestamp, id)`.
//!
//! Re-chained commits are built exactly like appended ones. When the remote
//! chain is already in that order the rebuild reproduces it commit for
//! commit, which makes the pull a fast-forward. Both peers arrive at the same
//! commit ids once each has pulled from the other.

use std::collections::btree_map::{BTreeMap, Entry};
use std::path::Path;

use chrono::{DateTime, Utc};
use git2::build::CheckoutBuilder;
use git2::{Commit, ErrorCode, FetchOptions, FileMode, Oid, ProxyOptions, Repository};
use tracing::{debug, info};

use cairn_shared::ProxySettings;

use crate::error::{Result, StoreError};
use crate::models::HistoryEntry;
use crate::record::{system_signature, CommitRecord};
use crate::repository::{decode_entry, head_commit, reset_index, set_mtime, ChannelRepository, MAIN_REF};

/// Where the peer's branch lands while it is being reconciled.
const INCOMING_REF: &str = "refs/cairn/incoming";
const INCOMING_REFSPEC: &str = "+refs/heads/main:refs/cairn/incoming";

/// Peer URL schemes the versioned store can tunnel through a SOCKS proxy.
const PROXIED_SCHEMES: &[&str] = &["http", "https"];

impl ChannelRepository {
    /// Fetch `peer`'s copy of this channel and merge it into the local history.
    ///
    /// `peer` is a git URL or a filesystem path to the peer's channel
    /// directory. Network peers are reached through `proxy` when one is given.
    /// Remote entries older than `merge_time_from` are not integrated.
    ///
    /// Returns the number of remote entries that were new to this history.
    pub async fn pull_changes(
        &self,
        peer: &str,
        merge_time_from: Option<DateTime<Utc>>,
        proxy: Option<&ProxySettings>,
    ) -> Result<usize> {
        let peer_url = peer.to_string();
        let proxy = proxy.cloned();
        let basedir = self.basedir().to_path_buf();

        let integrated = self
            .with_repo(move |repo| {
                pull_blocking(repo, &basedir, &peer_url, merge_time_from, proxy.as_ref())
            })
            .await?;

        info!(channel = %self.name(), peer, integrated, "Pulled peer history");
        Ok(integrated)
    }
}

fn pull_blocking(
    repo: &Repository,
    basedir: &Path,
    peer: &str,
    merge_time_from: Option<DateTime<Utc>>,
    proxy: Option<&ProxySettings>,
) -> Result<usize> {
    let Some(remote_tip) = fetch_peer(repo, peer, proxy)? else {
        debug!(peer, "Peer history is empty");
        return Ok(0);
    };

    let local_tip = head_commit(repo).map(|c| c.id());
    if local_tip == Some(remote_tip) {
        return Ok(0);
    }

    let base = match local_tip {
        Some(local) => match repo.merge_base(local, remote_tip) {
            Ok(base) => Some(base),
            Err(e) if e.code() == ErrorCode::NotFound => None,
            Err(e) => return Err(e.into()),
        },
        None => None,
    };
    if local_tip.is_some() && base == Some(remote_tip) {
        debug!(peer, "Peer history is behind local history");
        return Ok(0);
    }

    let remote_only = entries_after(repo, remote_tip, base)?;
    let local_only = match local_tip {
        Some(local) => entries_after(repo, local, base)?,
        None => Vec::new(),
    };

    let base_tree = base
        .map(|oid| repo.find_commit(oid).and_then(|c| c.tree()))
        .transpose()?;

    let mut merged: BTreeMap<String, HistoryEntry> = local_only
        .into_iter()
        .map(|entry| (entry.message_id.clone(), entry))
        .collect();
    let mut integrated = 0;

    for entry in remote_only {
        if merge_time_from.is_some_and(|from| entry.timestamp < from) {
            debug!(message = %entry.message_id, "Skipping remote entry older than merge horizon");
            continue;
        }
        if base_tree
            .as_ref()
            .is_some_and(|tree| tree.get_name(&entry.message_id).is_some())
        {
            continue;
        }
        match merged.entry(entry.message_id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(entry);
                integrated += 1;
            }
            // Same id on both sides: keep whichever sorts first so that both
            // peers pick the same copy.
            Entry::Occupied(mut slot) => {
                if conflict_rank(&entry) < conflict_rank(slot.get()) {
                    slot.insert(entry);
                }
            }
        }
    }

    // The canonical chain depends only on the base and the merged entries,
    // never on the order either side appended them in.
    let mut ordered: Vec<HistoryEntry> = merged.into_values().collect();
    ordered.sort_by(|a, b| a.merge_key().cmp(&b.merge_key()));

    let Some(tip) = rechain(repo, base, &ordered)? else {
        return Ok(0);
    };
    if Some(tip) == local_tip {
        return Ok(integrated);
    }

    fast_forward(repo, tip)?;
    restore_mtimes(basedir, ordered.iter())?;
    if tip == remote_tip {
        debug!(peer, tip = %tip, "Fast-forwarded to peer history");
    } else {
        debug!(peer, tip = %tip, entries = ordered.len(), "Re-chained diverged history");
    }

    Ok(integrated)
}

/// Fetch the peer's `main` into [`INCOMING_REF`] and return its tip.
fn fetch_peer(repo: &Repository, peer: &str, proxy: Option<&ProxySettings>) -> Result<Option<Oid>> {
    match repo.find_reference(INCOMING_REF) {
        Ok(mut stale) => stale.delete()?,
        Err(e) if e.code() == ErrorCode::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let mut fetch = FetchOptions::new();
    if let Some(proxy) = proxy {
        match peer_scheme(peer) {
            None | Some("file") => {}
            Some(scheme) if PROXIED_SCHEMES.contains(&scheme) => {
                let mut opts = ProxyOptions::new();
                opts.url(&proxy.to_url());
                fetch.proxy_options(opts);
            }
            Some(scheme) => {
                return Err(StoreError::Unsupported(format!(
                    "{scheme}:// peers cannot be reached through the SOCKS proxy"
                )));
            }
        }
    }

    let mut remote = repo.remote_anonymous(peer)?;
    remote.fetch(&[INCOMING_REFSPEC], Some(&mut fetch), None)?;

    match repo.find_reference(INCOMING_REF) {
        Ok(reference) => Ok(reference.target()),
        Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn peer_scheme(peer: &str) -> Option<&str> {
    peer.split_once("://").map(|(scheme, _)| scheme)
}

/// Entries from `tip` back to (excluding) `stop`, oldest first.
fn entries_after(repo: &Repository, tip: Oid, stop: Option<Oid>) -> Result<Vec<HistoryEntry>> {
    let mut entries = Vec::new();
    let mut next = Some(tip);
    while let Some(oid) = next {
        if Some(oid) == stop {
            break;
        }
        let entry = decode_entry(repo, oid)?;
        next = entry.parent.map(Oid::from);
        entries.push(entry);
    }
    entries.reverse();
    Ok(entries)
}

fn conflict_rank(entry: &HistoryEntry) -> (DateTime<Utc>, &[u8], &[u8]) {
    (entry.timestamp, &entry.content, &entry.signature)
}

/// Commit `entries` one by one on top of `base` without touching HEAD and
/// return the resulting tip (`base` itself when `entries` is empty).
///
/// Commits that already exist, such as a peer's identical chain, are
/// reproduced with the same ids.
fn rechain(repo: &Repository, base: Option<Oid>, entries: &[HistoryEntry]) -> Result<Option<Oid>> {
    let mut parent: Option<Commit<'_>> = base.map(|oid| repo.find_commit(oid)).transpose()?;

    for entry in entries {
        let parent_tree = parent.as_ref().map(Commit::tree).transpose()?;
        let blob = repo.blob(&entry.content)?;

        let mut builder = repo.treebuilder(parent_tree.as_ref())?;
        builder.insert(&entry.message_id, blob, i32::from(FileMode::Blob))?;
        let tree = repo.find_tree(builder.write()?)?;

        let record = CommitRecord {
            message_id: entry.message_id.clone(),
            timestamp: entry.timestamp,
            previous_top: parent.as_ref().map(Commit::id),
            signature: entry.signature.clone(),
        };
        let signature = system_signature(entry.timestamp)?;
        let parents: Vec<&Commit<'_>> = parent.iter().collect();
        let oid = repo.commit(None, &signature, &signature, &record.encode(), &tree, &parents)?;

        parent = Some(repo.find_commit(oid)?);
    }

    Ok(parent.map(|commit| commit.id()))
}

/// Point `main` at `tip` and make the work tree and index match it.
fn fast_forward(repo: &Repository, tip: Oid) -> Result<()> {
    repo.reference(MAIN_REF, tip, true, "cairn: pull")?;

    let mut checkout = CheckoutBuilder::new();
    checkout.force();
    repo.checkout_head(Some(&mut checkout))?;
    reset_index(repo)
}

fn restore_mtimes<'a>(basedir: &Path, entries: impl Iterator<Item = &'a HistoryEntry>) -> Result<()> {
    for entry in entries {
        set_mtime(&basedir.join(&entry.message_id), entry.timestamp)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CommitId;
    use cairn_shared::Message;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn msg(id: &str, secs: i64) -> Message {
        Message::with_id(id, Utc.timestamp_opt(secs, 0).unwrap(), id.as_bytes().to_vec())
    }

    async fn peer(dir: &TempDir, node: &str) -> ChannelRepository {
        ChannelRepository::create(dir.path().join(node).join("general"))
            .await
            .unwrap()
    }

    fn url(repo: &ChannelRepository) -> String {
        repo.basedir().to_string_lossy().into_owned()
    }

    async fn ids(repo: &ChannelRepository) -> Vec<String> {
        repo.messages(true)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.message_id)
            .collect()
    }

    #[tokio::test]
    async fn test_pull_from_empty_peer() {
        let dir = TempDir::new().unwrap();
        let a = peer(&dir, "a").await;
        let b = peer(&dir, "b").await;
        a.append_message(&msg("m1", 10)).await.unwrap();

        assert_eq!(a.pull_changes(&url(&b), None, None).await.unwrap(), 0);
        assert_eq!(ids(&a).await, vec!["m1"]);
    }

    #[tokio::test]
    async fn test_fast_forward_into_empty() {
        let dir = TempDir::new().unwrap();
        let a = peer(&dir, "a").await;
        let b = peer(&dir, "b").await;
        a.append_message(&msg("m1", 10)).await.unwrap();
        a.append_message(&msg("m2", 20)).await.unwrap();

        assert_eq!(b.pull_changes(&url(&a), None, None).await.unwrap(), 2);
        assert_eq!(b.top_of_tree().await.unwrap(), a.top_of_tree().await.unwrap());
        assert_eq!(b.read_message("m2").await.unwrap(), b"m2");

        let on_disk = std::fs::read(b.basedir().join("m1")).unwrap();
        assert_eq!(on_disk, b"m1");
        let modified: DateTime<Utc> = std::fs::metadata(b.basedir().join("m1"))
            .unwrap()
            .modified()
            .unwrap()
            .into();
        assert_eq!(modified, Utc.timestamp_opt(10, 0).unwrap());

        // Pulling again is a no-op.
        assert_eq!(b.pull_changes(&url(&a), None, None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_fast_forward_extends_local() {
        let dir = TempDir::new().unwrap();
        let a = peer(&dir, "a").await;
        let b = peer(&dir, "b").await;
        a.append_message(&msg("m1", 10)).await.unwrap();
        b.pull_changes(&url(&a), None, None).await.unwrap();

        a.append_message(&msg("m2", 20)).await.unwrap();
        assert_eq!(b.pull_changes(&url(&a), None, None).await.unwrap(), 1);
        assert_eq!(b.top_of_tree().await.unwrap(), a.top_of_tree().await.unwrap());

        // `a` already has everything `b` has.
        assert_eq!(a.pull_changes(&url(&b), None, None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_diverged_histories_converge() {
        let dir = TempDir::new().unwrap();
        let a = peer(&dir, "a").await;
        let b = peer(&dir, "b").await;
        a.append_message(&msg("m1", 10)).await.unwrap();
        b.pull_changes(&url(&a), None, None).await.unwrap();

        a.append_message(&msg("m3", 30)).await.unwrap();
        b.append_message(&msg("m2", 20)).await.unwrap();
        b.append_message(&msg("m4", 40)).await.unwrap();

        assert_eq!(a.pull_changes(&url(&b), None, None).await.unwrap(), 2);
        assert_eq!(b.pull_changes(&url(&a), None, None).await.unwrap(), 1);

        let top_a = a.top_of_tree().await.unwrap();
        assert!(top_a.is_some());
        assert_eq!(top_a, b.top_of_tree().await.unwrap());
        assert_eq!(ids(&a).await, vec!["m1", "m2", "m3", "m4"]);
        assert_eq!(ids(&b).await, vec!["m1", "m2", "m3", "m4"]);

        // Work tree and index follow the merged history.
        for id in ["m1", "m2", "m3", "m4"] {
            assert!(a.basedir().join(id).exists());
            assert!(b.basedir().join(id).exists());
        }
        let next = a.append_message(&msg("m5", 50)).await.unwrap();
        let entries = a.messages(false).await.unwrap();
        assert_eq!(entries[0].commit, next);
        assert_eq!(entries.len(), 5);
    }

    #[tokio::test]
    async fn test_out_of_order_appends_converge() {
        let dir = TempDir::new().unwrap();
        let a = peer(&dir, "a").await;
        let b = peer(&dir, "b").await;
        a.append_message(&msg("base", 1)).await.unwrap();
        b.pull_changes(&url(&a), None, None).await.unwrap();

        // `a` appends newest first; `b` holds one of the same entries.
        a.append_message(&msg("y", 30)).await.unwrap();
        a.append_message(&msg("x", 20)).await.unwrap();
        b.append_message(&msg("x", 20)).await.unwrap();

        assert_eq!(b.pull_changes(&url(&a), None, None).await.unwrap(), 1);
        assert_eq!(ids(&b).await, vec!["base", "x", "y"]);

        // Nothing new for `a`, but its chain still moves to the shared order.
        assert_eq!(a.pull_changes(&url(&b), None, None).await.unwrap(), 0);
        assert_eq!(ids(&a).await, vec!["base", "x", "y"]);
        assert_eq!(a.top_of_tree().await.unwrap(), b.top_of_tree().await.unwrap());

        assert_eq!(b.pull_changes(&url(&a), None, None).await.unwrap(), 0);
        assert_eq!(a.top_of_tree().await.unwrap(), b.top_of_tree().await.unwrap());
    }

    #[tokio::test]
    async fn test_tops_stay_equal_over_repeated_rounds() {
        let dir = TempDir::new().unwrap();
        let a = peer(&dir, "a").await;
        let b = peer(&dir, "b").await;
        a.append_message(&msg("base", 1)).await.unwrap();
        b.pull_changes(&url(&a), None, None).await.unwrap();

        a.append_message(&msg("a3", 30)).await.unwrap();
        a.append_message(&msg("s2", 20)).await.unwrap();
        a.append_message(&msg("a1", 10)).await.unwrap();
        b.append_message(&msg("b4", 40)).await.unwrap();
        b.append_message(&msg("s2", 20)).await.unwrap();
        b.append_message(&msg("b2", 15)).await.unwrap();

        let expected = vec!["base", "a1", "b2", "s2", "a3", "b4"];
        for round in 0..2 {
            a.pull_changes(&url(&b), None, None).await.unwrap();
            b.pull_changes(&url(&a), None, None).await.unwrap();
            assert_eq!(
                a.top_of_tree().await.unwrap(),
                b.top_of_tree().await.unwrap(),
                "round {round}"
            );
            assert_eq!(ids(&a).await, expected);
            assert_eq!(ids(&b).await, expected);
        }

        // Converged peers have nothing left to exchange.
        assert_eq!(a.pull_changes(&url(&b), None, None).await.unwrap(), 0);
        assert_eq!(b.pull_changes(&url(&a), None, None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unrelated_histories_merge() {
        let dir = TempDir::new().unwrap();
        let a = peer(&dir, "a").await;
        let b = peer(&dir, "b").await;
        a.append_message(&msg("a1", 10)).await.unwrap();
        b.append_message(&msg("b1", 5)).await.unwrap();

        assert_eq!(a.pull_changes(&url(&b), None, None).await.unwrap(), 1);
        assert_eq!(b.pull_changes(&url(&a), None, None).await.unwrap(), 1);

        assert_eq!(ids(&a).await, vec!["b1", "a1"]);
        assert_eq!(a.top_of_tree().await.unwrap(), b.top_of_tree().await.unwrap());
    }

    #[tokio::test]
    async fn test_merge_time_from_skips_old_remote_entries() {
        let dir = TempDir::new().unwrap();
        let a = peer(&dir, "a").await;
        let b = peer(&dir, "b").await;
        b.append_message(&msg("old", 10)).await.unwrap();
        b.append_message(&msg("new", 100)).await.unwrap();

        let horizon = Utc.timestamp_opt(50, 0).unwrap();
        assert_eq!(a.pull_changes(&url(&b), Some(horizon), None).await.unwrap(), 1);
        assert_eq!(ids(&a).await, vec!["new"]);
        assert!(!a.basedir().join("old").exists());
    }

    #[tokio::test]
    async fn test_same_id_on_both_sides_resolves_identically() {
        let dir = TempDir::new().unwrap();
        let a = peer(&dir, "a").await;
        let b = peer(&dir, "b").await;
        a.append_message(&msg("base", 1)).await.unwrap();
        b.pull_changes(&url(&a), None, None).await.unwrap();

        let ts = Utc.timestamp_opt(20, 0).unwrap();
        a.append_message(&Message::with_id("dup", ts, b"from-a".to_vec()))
            .await
            .unwrap();
        b.append_message(&Message::with_id("dup", ts, b"from-b".to_vec()))
            .await
            .unwrap();

        assert_eq!(a.pull_changes(&url(&b), None, None).await.unwrap(), 0);
        b.pull_changes(&url(&a), None, None).await.unwrap();

        assert_eq!(a.read_message("dup").await.unwrap(), b"from-a");
        assert_eq!(b.read_message("dup").await.unwrap(), b"from-a");
        assert_eq!(a.top_of_tree().await.unwrap(), b.top_of_tree().await.unwrap());
    }

    #[tokio::test]
    async fn test_tampered_peer_rejected() {
        let dir = TempDir::new().unwrap();
        let a = peer(&dir, "a").await;
        let b = peer(&dir, "b").await;
        a.append_message(&msg("m1", 10)).await.unwrap();

        // A commit that does not follow the history format.
        a.with_repo(|repo| {
            let parent = head_commit(repo)
                .ok_or_else(|| StoreError::MessageNotFound("m1".to_string()))?;
            let sig = git2::Signature::now("mallory", "mallory@example.com")?;
            let tree = parent.tree()?;
            repo.commit(Some("HEAD"), &sig, &sig, "rewrite history", &tree, &[&parent])?;
            Ok(())
        })
        .await
        .unwrap();

        let err = b.pull_changes(&url(&a), None, None).await.unwrap_err();
        assert!(matches!(err, StoreError::MalformedCommit { .. }));
        assert_eq!(b.top_of_tree().await.unwrap(), None::<CommitId>);
    }

    #[tokio::test]
    async fn test_proxy_rejects_unroutable_scheme() {
        let dir = TempDir::new().unwrap();
        let a = peer(&dir, "a").await;
        let proxy = ProxySettings::default();

        let err = a
            .pull_changes("ssh://peer.onion/general", None, Some(&proxy))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unsupported(_)));
    }

    #[test]
    fn test_peer_scheme() {
        assert_eq!(peer_scheme("http://abc.onion/general"), Some("http"));
        assert_eq!(peer_scheme("/srv/cairn/general"), None);
        assert_eq!(peer_scheme("file:///srv/cairn/general"), Some("file"));
    }
}
