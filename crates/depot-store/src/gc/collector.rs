//! Repack and garbage collection engine.
//!
//! One [`GarbageCollector::pack`] run consolidates every reachable object
//! into up to three new packs (heads, non-head reachable, transactional
//! ref-tree), folds small unreachable packs into a fresh garbage pack, and
//! atomically swaps the new pack set for the old one. Unreachable packs are
//! retained under a time-to-live so that inserters racing with the
//! collection never lose objects they decided not to re-write.
//!
//! The engine runs on one logical task. Refs and the pack list are read
//! once at the start; packs committed concurrently by inserters are neither
//! read nor pruned and stay visible after the swap.

use std::sync::Arc;
use std::time::Instant;

use rustc_hash::FxHashSet;

use depot_core::{Clock, Oid, OidSet, ProgressMonitor, SystemClock};

use crate::cache::BlockCache;
use crate::desc::{
    PackDescription, PackExt, PackSource, PackStatistics, PACK_OVERHEAD, PACK_TRAILER_LEN,
};
use crate::error::{Result, StoreError};
use crate::gc::policy::{
    GarbagePolicy, DEFAULT_COALESCE_GARBAGE_LIMIT, DEFAULT_GARBAGE_TTL_MILLIS,
};
use crate::index::{PackIndex, ReverseIndex};
use crate::metrics;
use crate::odb::{CommitOutcome, ObjectDatabase, PackFile};
use crate::refs::{Ref, RefDatabase, R_REFS};
use crate::writer::{PackConfig, PackWriter};

/// Repack and garbage collect a pack store.
///
/// Construct one collector per run, adjust the tunables, then call
/// [`pack`](Self::pack). Two collections of the same store must not run
/// concurrently; that exclusion is the caller's responsibility.
pub struct GarbageCollector<D: ObjectDatabase, R: RefDatabase> {
    odb: Arc<D>,
    refdb: Arc<R>,
    cache: Arc<BlockCache>,
    clock: Arc<dyn Clock>,
    pack_config: PackConfig,

    // See GarbagePolicy for how these two interact.
    coalesce_garbage_limit: u64,
    garbage_ttl_millis: u64,

    start_time_ms: i64,
    packs_before: Vec<D::Pack>,
    expired_garbage_packs: Vec<D::Pack>,

    new_pack_desc: Vec<PackDescription>,
    new_pack_stats: Vec<PackStatistics>,
    new_pack_obj: Vec<Arc<OidSet>>,

    all_heads: FxHashSet<Oid>,
    non_heads: FxHashSet<Oid>,
    txn_heads: FxHashSet<Oid>,
    tag_targets: FxHashSet<Oid>,
}

impl<D: ObjectDatabase, R: RefDatabase> GarbageCollector<D, R> {
    /// Creates a collector over the given databases.
    #[must_use]
    pub fn new(odb: Arc<D>, refdb: Arc<R>) -> Self {
        Self {
            odb,
            refdb,
            cache: Arc::new(BlockCache::new()),
            clock: Arc::new(SystemClock),
            pack_config: PackConfig::default(),
            coalesce_garbage_limit: DEFAULT_COALESCE_GARBAGE_LIMIT,
            garbage_ttl_millis: DEFAULT_GARBAGE_TTL_MILLIS,
            start_time_ms: 0,
            packs_before: Vec::new(),
            expired_garbage_packs: Vec::new(),
            new_pack_desc: Vec::with_capacity(4),
            new_pack_stats: Vec::with_capacity(4),
            new_pack_obj: Vec::with_capacity(4),
            all_heads: FxHashSet::default(),
            non_heads: FxHashSet::default(),
            txn_heads: FxHashSet::default(),
            tag_targets: FxHashSet::default(),
        }
    }

    /// Configuration used to generate the new pack files.
    #[must_use]
    pub fn pack_config(&self) -> &PackConfig {
        &self.pack_config
    }

    /// Replaces the configuration used when creating the pack files.
    pub fn set_pack_config(&mut self, config: PackConfig) -> &mut Self {
        self.pack_config = config;
        self
    }

    /// Garbage packs smaller than this size will be repacked.
    #[must_use]
    pub fn coalesce_garbage_limit(&self) -> u64 {
        self.coalesce_garbage_limit
    }

    /// Sets the byte size limit for garbage packs to be repacked.
    ///
    /// Any `UNREACHABLE_GARBAGE` pack smaller than this limit is folded
    /// into the new garbage pack at the end of the run; larger packs are
    /// left alone, avoiding the read and copy. 0 disables coalescing
    /// entirely; `u64::MAX` coalesces everything.
    pub fn set_coalesce_garbage_limit(&mut self, limit: u64) -> &mut Self {
        self.coalesce_garbage_limit = limit;
        self
    }

    /// Garbage packs older than this limit are pruned, if the value is
    /// positive; 0 retains garbage packs forever.
    #[must_use]
    pub fn garbage_ttl_millis(&self) -> u64 {
        self.garbage_ttl_millis
    }

    /// Sets the time to live for unreachable garbage.
    ///
    /// An `UNREACHABLE_GARBAGE` pack older than this limit, and observed by
    /// a prior collection run, is pruned without being read. A ttl of zero
    /// disables purging.
    pub fn set_garbage_ttl(&mut self, ttl: std::time::Duration) -> &mut Self {
        self.garbage_ttl_millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Replaces the wall clock, for tests.
    pub fn set_clock(&mut self, clock: Arc<dyn Clock>) -> &mut Self {
        self.clock = clock;
        self
    }

    /// Shares a block cache with other store readers.
    pub fn set_block_cache(&mut self, cache: Arc<BlockCache>) -> &mut Self {
        self.cache = cache;
        self
    }

    /// New packs created by this collection.
    #[must_use]
    pub fn new_packs(&self) -> &[PackDescription] {
        &self.new_pack_desc
    }

    /// Statistics corresponding to [`new_packs`](Self::new_packs).
    #[must_use]
    pub fn new_pack_statistics(&self) -> &[PackStatistics] {
        &self.new_pack_stats
    }

    /// All of the source packs that fed into this collection.
    #[must_use]
    pub fn source_packs(&self) -> Vec<PackDescription> {
        self.to_prune()
    }

    /// Creates new packs containing all of the live objects and swaps them
    /// for the packs read at the start of the run.
    ///
    /// Returns `Ok(true)` on success. `Ok(false)` reports that a race with
    /// a concurrent committer was detected; the new packs were discarded
    /// and the collection should be rerun later.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidConfig` when the index version is not 2,
    /// `StoreError::Cancelled` when the progress monitor requested a stop,
    /// and collaborator errors otherwise. On any error the partially
    /// written packs are rolled back.
    pub async fn pack(&mut self, pm: &dyn ProgressMonitor) -> Result<bool> {
        if self.pack_config.index_version != PackIndex::VERSION {
            return Err(StoreError::InvalidConfig {
                message: format!(
                    "only pack index version {} is supported",
                    PackIndex::VERSION
                ),
            });
        }

        self.reset();
        self.start_time_ms = self.clock.now_millis();
        let started = Instant::now();

        tracing::info!(
            coalesce_garbage_limit = self.coalesce_garbage_limit,
            garbage_ttl_millis = self.garbage_ttl_millis,
            metric = "depot_repack_run_started",
            "starting repack"
        );

        self.refdb.refresh().await?;
        self.odb.clear_cache();

        let refs_before = self.all_refs().await?;
        self.read_packs_before().await?;

        if self.packs_before.is_empty() {
            if self.expired_garbage_packs.is_empty() {
                return Ok(true);
            }
            // Nothing to rewrite; drop the expired garbage and stop.
            let prune = self.to_prune();
            return match self.odb.commit_pack(&[], &prune).await? {
                CommitOutcome::Committed => {
                    self.log_completed(started, &prune);
                    Ok(true)
                }
                CommitOutcome::RaceDetected => {
                    metrics::record_race_detected();
                    Ok(false)
                }
            };
        }

        self.partition_refs(&refs_before);

        match self.run_phases_and_commit(pm).await {
            Ok(CommitOutcome::Committed) => {
                let prune = self.to_prune();
                self.log_completed(started, &prune);
                Ok(true)
            }
            Ok(CommitOutcome::RaceDetected) => {
                metrics::record_race_detected();
                tracing::warn!(
                    metric = "depot_repack_races_total",
                    "commit race detected, discarding new packs"
                );
                self.rollback_best_effort().await;
                Ok(false)
            }
            Err(e) => {
                self.rollback_best_effort().await;
                Err(e)
            }
        }
    }

    async fn run_phases_and_commit(&mut self, pm: &dyn ProgressMonitor) -> Result<CommitOutcome> {
        self.pack_heads(pm).await?;
        check_cancelled(pm)?;
        self.pack_rest(pm).await?;
        check_cancelled(pm)?;
        self.pack_ref_tree(pm).await?;
        check_cancelled(pm)?;
        self.pack_garbage(pm).await?;

        let prune = self.to_prune();
        self.odb.commit_pack(&self.new_pack_desc, &prune).await
    }

    /// Discards the new packs, logging instead of masking the original
    /// failure when the backend refuses.
    async fn rollback_best_effort(&self) {
        if let Err(e) = self.odb.rollback_pack(&self.new_pack_desc).await {
            tracing::warn!(error = %e, "rollback of new packs failed");
        }
        for desc in &self.new_pack_desc {
            self.cache.invalidate(desc.name());
        }
    }

    fn reset(&mut self) {
        self.packs_before.clear();
        self.expired_garbage_packs.clear();
        self.new_pack_desc.clear();
        self.new_pack_stats.clear();
        self.new_pack_obj.clear();
        self.all_heads.clear();
        self.non_heads.clear();
        self.txn_heads.clear();
        self.tag_targets.clear();
    }

    async fn all_refs(&self) -> Result<Vec<Ref>> {
        let mut refs = self.refdb.refs().await?;
        let additional = self.refdb.additional_refs().await?;
        // Additional refs only participate when named under refs/.
        refs.extend(
            additional
                .into_iter()
                .filter(|r| r.name.starts_with(R_REFS)),
        );
        Ok(refs)
    }

    async fn read_packs_before(&mut self) -> Result<()> {
        let packs = self.odb.packs().await?;
        let most_recent_gc = most_recent_gc::<D>(&packs);
        let now = self.clock.now_millis();
        let policy = GarbagePolicy::new(
            self.coalesce_garbage_limit,
            self.garbage_ttl_millis,
            self.clock.time_zone(),
        );

        for pack in packs {
            let desc = pack.description();
            if desc.source() != PackSource::UnreachableGarbage {
                self.packs_before.push(pack);
            } else if policy.is_expired(desc, most_recent_gc, now) {
                self.expired_garbage_packs.push(pack);
            } else if policy.is_coalesceable(desc, now) {
                self.packs_before.push(pack);
            }
        }
        Ok(())
    }

    fn partition_refs(&mut self, refs: &[Ref]) {
        for r in refs {
            if r.symbolic {
                continue;
            }
            let Some(target) = r.target else { continue };
            if target.is_zero() {
                continue;
            }
            if r.is_head() || r.is_tag() {
                self.all_heads.insert(target);
            } else if self.refdb.is_ref_tree(&r.name) {
                self.txn_heads.insert(target);
            } else {
                self.non_heads.insert(target);
            }
            if let Some(peeled) = r.peeled {
                self.tag_targets.insert(peeled);
            }
        }
        self.tag_targets.extend(self.all_heads.iter().copied());
    }

    fn to_prune(&self) -> Vec<PackDescription> {
        self.packs_before
            .iter()
            .chain(self.expired_garbage_packs.iter())
            .map(|p| p.description().clone())
            .collect()
    }

    async fn pack_heads(&mut self, pm: &dyn ProgressMonitor) -> Result<()> {
        if self.all_heads.is_empty() {
            return Ok(());
        }

        let mut pw = self.odb.new_writer(&self.writer_config());
        pw.set_tag_targets(self.tag_targets.clone());
        pw.prepare_pack(pm, &self.all_heads, &FxHashSet::default())
            .await?;
        if pw.object_count() > 0 {
            let estimate = self.estimate_gc_pack_size(&[
                PackSource::Insert,
                PackSource::Receive,
                PackSource::Compact,
                PackSource::Gc,
            ]);
            self.write_pack(PackSource::Gc, pw, pm, estimate).await?;
        }
        Ok(())
    }

    async fn pack_rest(&mut self, pm: &dyn ProgressMonitor) -> Result<()> {
        if self.non_heads.is_empty() {
            return Ok(());
        }

        let mut pw = self.odb.new_writer(&self.writer_config());
        for packed in &self.new_pack_obj {
            pw.exclude_objects(Arc::clone(packed));
        }
        pw.prepare_pack(pm, &self.non_heads, &self.all_heads).await?;
        if pw.object_count() > 0 {
            let estimate = self.estimate_gc_pack_size(&[
                PackSource::Insert,
                PackSource::Receive,
                PackSource::Compact,
                PackSource::GcRest,
            ]);
            self.write_pack(PackSource::GcRest, pw, pm, estimate).await?;
        }
        Ok(())
    }

    async fn pack_ref_tree(&mut self, pm: &dyn ProgressMonitor) -> Result<()> {
        if self.txn_heads.is_empty() {
            return Ok(());
        }

        let mut pw = self.odb.new_writer(&self.writer_config());
        for packed in &self.new_pack_obj {
            pw.exclude_objects(Arc::clone(packed));
        }
        pw.prepare_pack(pm, &self.txn_heads, &FxHashSet::default())
            .await?;
        if pw.object_count() > 0 {
            // Transaction graphs have no usable size estimate.
            self.write_pack(PackSource::GcTxn, pw, pm, 0).await?;
        }
        Ok(())
    }

    async fn pack_garbage(&mut self, pm: &dyn ProgressMonitor) -> Result<()> {
        let mut pw = self.odb.new_writer(&self.garbage_config());

        pm.begin_task("Finding garbage", self.objects_before());
        let mut seen: FxHashSet<Oid> = FxHashSet::default();
        let mut estimated_pack_size = PACK_OVERHEAD;
        for old_pack in &self.packs_before {
            let desc = old_pack.description();
            let index = old_pack.index().await?;
            let reverse = ReverseIndex::new(&index);
            let max_offset = desc.file_size(PackExt::Pack).saturating_sub(PACK_TRAILER_LEN);
            for entry in index.entries() {
                pm.update(1);
                if pm.is_cancelled() {
                    pm.end_task();
                    return Err(StoreError::Cancelled);
                }
                if seen.contains(&entry.oid) || self.any_pack_has(&entry.oid) {
                    continue;
                }
                seen.insert(entry.oid);
                pw.add_object(entry.oid, entry.kind)?;
                estimated_pack_size += reverse.next_offset(entry.offset, max_offset) - entry.offset;
            }
        }
        pm.end_task();

        if pw.object_count() > 0 {
            self.write_pack(PackSource::UnreachableGarbage, pw, pm, estimated_pack_size)
                .await?;
        }
        Ok(())
    }

    fn any_pack_has(&self, oid: &Oid) -> bool {
        self.new_pack_obj.iter().any(|set| set.contains(oid))
    }

    fn objects_before(&self) -> u64 {
        self.packs_before
            .iter()
            .map(|p| p.description().object_count())
            .sum()
    }

    fn writer_config(&self) -> PackConfig {
        PackConfig {
            delta_base_as_offset: true,
            reuse_delta_commits: false,
            ..self.pack_config.clone()
        }
    }

    fn garbage_config(&self) -> PackConfig {
        PackConfig {
            delta_base_as_offset: true,
            reuse_delta_commits: true,
            reuse_deltas: true,
            reuse_objects: true,
            delta_compress: false,
            build_bitmaps: false,
            ..self.pack_config.clone()
        }
    }

    fn estimate_gc_pack_size(&self, sources: &[PackSource]) -> u64 {
        // Count one shared header and trailer for the new pack, dropping
        // the per-source-pack copies.
        let mut size = PACK_OVERHEAD;
        for desc in self.to_prune() {
            if sources.contains(&desc.source()) {
                size += desc.file_size(PackExt::Pack).saturating_sub(PACK_OVERHEAD);
            }
        }
        size
    }

    async fn write_pack(
        &mut self,
        source: PackSource,
        mut pw: D::Writer,
        pm: &dyn ProgressMonitor,
        estimated_pack_size: u64,
    ) -> Result<()> {
        let mut pack = self.odb.new_pack(source, estimated_pack_size).await?;
        // Recorded before any byte is written so rollback covers partial
        // output.
        self.new_pack_desc.push(pack.clone());

        let data = pw.write_pack(pm).await?;
        pack.set_file_size(PackExt::Pack, data.len() as u64);
        let pack_bytes = data.len() as u64;
        self.odb.put_file(&pack, PackExt::Pack, data).await?;

        let index = pw.write_index().await?;
        pack.set_file_size(PackExt::Index, index.len() as u64);
        pack.set_index_version(pw.index_version());
        self.odb.put_file(&pack, PackExt::Index, index).await?;

        if pw.prepare_bitmap_index(pm).await? {
            let bitmap = pw.write_bitmap_index().await?;
            pack.set_file_size(PackExt::BitmapIndex, bitmap.len() as u64);
            self.odb.put_file(&pack, PackExt::BitmapIndex, bitmap).await?;
        }

        let stats = pw.statistics();
        pack.set_object_count(stats.object_count);
        pack.set_pack_stats(stats.clone());
        pack.set_last_modified_ms(self.start_time_ms);

        self.new_pack_stats.push(stats);
        self.new_pack_obj.push(Arc::new(pw.object_set()));
        if let Some(slot) = self.new_pack_desc.last_mut() {
            *slot = pack.clone();
        }

        // Pre-warm the shared cache so the first reader of the new pack
        // does not hit the backend cold.
        let odb = Arc::clone(&self.odb);
        let warm = pack.clone();
        self.cache
            .get_or_create(pack.name(), move || async move {
                odb.read_file(&warm, PackExt::Pack).await
            })
            .await?;

        metrics::record_pack_written(source.as_str(), pack_bytes);
        tracing::info!(
            pack = pack.name(),
            source = %source,
            objects = pack.object_count(),
            bytes = pack_bytes,
            metric = "depot_repack_pack_written",
            "wrote pack"
        );
        Ok(())
    }

    fn log_completed(&self, started: Instant, prune: &[PackDescription]) {
        let duration_secs = started.elapsed().as_secs_f64();
        let expired = self.expired_garbage_packs.len() as u64;
        metrics::record_run_completed(prune.len() as u64, expired, duration_secs);
        tracing::info!(
            new_packs = self.new_pack_desc.len(),
            pruned_packs = prune.len(),
            expired_packs = expired,
            duration_secs,
            metric = "depot_repack_run_completed",
            "repack completed"
        );
    }
}

fn most_recent_gc<D: ObjectDatabase>(packs: &[D::Pack]) -> i64 {
    let mut r = 0;
    for pack in packs {
        let desc = pack.description();
        if matches!(desc.source(), PackSource::Gc | PackSource::GcRest) {
            r = r.max(desc.last_modified_ms());
        }
    }
    r
}

fn check_cancelled(pm: &dyn ProgressMonitor) -> Result<()> {
    if pm.is_cancelled() {
        return Err(StoreError::Cancelled);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_core::{FixedClock, NullProgressMonitor};

    use crate::memory::{MemoryObjectDatabase, MemoryRefDatabase, ObjectSpec};

    #[tokio::test]
    async fn rejects_unsupported_index_version() {
        let odb = Arc::new(MemoryObjectDatabase::new());
        let refdb = Arc::new(MemoryRefDatabase::new());
        let mut gc = GarbageCollector::new(odb, refdb);
        gc.set_pack_config(PackConfig {
            index_version: 1,
            ..PackConfig::default()
        });

        let err = gc.pack(&NullProgressMonitor).await.expect_err("must fail");
        assert!(matches!(err, StoreError::InvalidConfig { .. }));
        assert!(gc.new_packs().is_empty());
    }

    #[tokio::test]
    async fn partitions_refs_disjointly() {
        let odb = Arc::new(MemoryObjectDatabase::new());
        let refdb = Arc::new(MemoryRefDatabase::new());
        refdb.set_ref_tree_prefixes(["refs/txn/"]);

        let head = Oid::hash(b"head");
        let tag = Oid::hash(b"tag");
        let peeled = Oid::hash(b"peeled");
        let note = Oid::hash(b"note");
        let txn = Oid::hash(b"txn");

        refdb.set_ref(crate::refs::Ref::direct("refs/heads/main", head));
        refdb.set_ref(crate::refs::Ref::direct("refs/tags/v1", tag).with_peeled(peeled));
        refdb.set_ref(crate::refs::Ref::direct("refs/notes/commits", note));
        refdb.set_ref(crate::refs::Ref::direct("refs/txn/committed", txn));
        refdb.set_ref(crate::refs::Ref::symbolic("HEAD", Some(head)));
        refdb.set_ref(crate::refs::Ref::direct("refs/heads/unborn", Oid::ZERO));

        let mut gc = GarbageCollector::new(odb, refdb);
        let refs = gc.all_refs().await.expect("refs");
        gc.partition_refs(&refs);

        assert_eq!(gc.all_heads.len(), 2);
        assert!(gc.all_heads.contains(&head) && gc.all_heads.contains(&tag));
        assert_eq!(gc.txn_heads.len(), 1);
        assert!(gc.txn_heads.contains(&txn));
        assert_eq!(gc.non_heads.len(), 1);
        assert!(gc.non_heads.contains(&note));

        // peeled plus both heads
        assert_eq!(gc.tag_targets.len(), 3);
        assert!(gc.tag_targets.contains(&peeled));

        // pairwise disjoint
        assert!(gc.all_heads.is_disjoint(&gc.non_heads));
        assert!(gc.all_heads.is_disjoint(&gc.txn_heads));
        assert!(gc.non_heads.is_disjoint(&gc.txn_heads));
    }

    #[tokio::test]
    async fn additional_refs_outside_refs_namespace_are_ignored() {
        let odb = Arc::new(MemoryObjectDatabase::new());
        let refdb = Arc::new(MemoryRefDatabase::new());
        refdb.add_additional_ref(crate::refs::Ref::direct(
            "refs/replace/abc",
            Oid::hash(b"r"),
        ));
        refdb.add_additional_ref(crate::refs::Ref::direct("FETCH_HEAD", Oid::hash(b"f")));

        let gc = GarbageCollector::new(odb, refdb);
        let refs = gc.all_refs().await.expect("refs");
        let names: Vec<&str> = refs.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["refs/replace/abc"]);
    }

    #[tokio::test]
    async fn most_recent_gc_ignores_other_sources() {
        let odb = Arc::new(MemoryObjectDatabase::new());
        odb.insert_pack(
            PackSource::Insert,
            9_000,
            &[ObjectSpec::blob(b"a")],
        )
        .await
        .expect("insert");
        odb.insert_pack(PackSource::Gc, 4_000, &[ObjectSpec::blob(b"b")])
            .await
            .expect("gc");
        odb.insert_pack(PackSource::GcRest, 6_000, &[ObjectSpec::blob(b"c")])
            .await
            .expect("gc-rest");

        let packs = odb.packs().await.expect("packs");
        assert_eq!(most_recent_gc::<MemoryObjectDatabase>(&packs), 6_000);
    }

    #[tokio::test]
    async fn run_state_resets_between_runs() {
        let odb = Arc::new(MemoryObjectDatabase::new());
        let refdb = Arc::new(MemoryRefDatabase::new());

        let c1 = ObjectSpec::commit(b"c1", &[]);
        refdb.set_ref(crate::refs::Ref::direct("refs/heads/main", c1.oid()));
        odb.insert_pack(PackSource::Insert, 1_000, std::slice::from_ref(&c1))
            .await
            .expect("insert");

        let clock = Arc::new(FixedClock::new(10_000));
        let mut gc = GarbageCollector::new(odb, refdb);
        gc.set_clock(clock.clone());

        assert!(gc.pack(&NullProgressMonitor).await.expect("first run"));
        assert_eq!(gc.new_packs().len(), 1);

        // Second run over the already-collected store: the sole pack is the
        // prior GC pack, whose single object is reachable, so an identical
        // replacement is written.
        clock.advance(1_000);
        assert!(gc.pack(&NullProgressMonitor).await.expect("second run"));
        assert_eq!(gc.new_packs().len(), 1);
        assert_eq!(gc.new_pack_statistics().len(), 1);
    }
}
