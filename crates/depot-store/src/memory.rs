//! In-memory object database, ref database, and pack writer.
//!
//! The reference implementation of the store contracts, used by tests and
//! embedders that want a store without a durable backend. Pack data lives
//! in a [`MemoryBackend`]; the committed pack set is a JSON manifest object
//! swapped with compare-and-swap writes, so commit races surface exactly as
//! they would against weakly-consistent object storage.
//!
//! The pack encoding is deliberately simple: a 12-byte header, one
//! self-describing record per object (kind, outgoing links, payload), and a
//! 20-byte trailer checksum. Offsets are real, so reverse-index size
//! arithmetic behaves as it would over a production encoding.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use rustc_hash::{FxHashMap, FxHashSet};
use ulid::Ulid;

use depot_core::{
    MemoryBackend, ObjectKind, Oid, OidSet, ProgressMonitor, StorageBackend, WritePrecondition,
    WriteResult, OID_LEN,
};

use crate::desc::{PackDescription, PackExt, PackSource, PackStatistics};
use crate::error::{Result, StoreError};
use crate::index::{IndexEntry, PackIndex};
use crate::odb::{CommitOutcome, ObjectDatabase, PackFile};
use crate::refs::{Ref, RefDatabase};
use crate::writer::{PackConfig, PackWriter};

const MANIFEST_PATH: &str = "packs/pack-list.json";
const CAS_ATTEMPTS: u32 = 8;

/// Specification of one object for seeding a memory store.
#[derive(Debug, Clone)]
pub struct ObjectSpec {
    oid: Oid,
    kind: ObjectKind,
    links: Vec<Oid>,
    payload: Bytes,
}

impl ObjectSpec {
    /// Creates an object of the given kind, linking to `links`.
    #[must_use]
    pub fn new(kind: ObjectKind, payload: impl AsRef<[u8]>, links: Vec<Oid>) -> Self {
        let payload = Bytes::copy_from_slice(payload.as_ref());
        let mut content = Vec::with_capacity(payload.len() + links.len() * OID_LEN + 8);
        content.extend_from_slice(kind.as_str().as_bytes());
        content.push(0);
        for link in &links {
            content.extend_from_slice(link.as_bytes());
        }
        content.extend_from_slice(&payload);
        Self {
            oid: Oid::hash(&content),
            kind,
            links,
            payload,
        }
    }

    /// A commit whose links are its parents and root tree.
    #[must_use]
    pub fn commit(payload: impl AsRef<[u8]>, links: &[Oid]) -> Self {
        Self::new(ObjectKind::Commit, payload, links.to_vec())
    }

    /// A tree whose links are its children.
    #[must_use]
    pub fn tree(payload: impl AsRef<[u8]>, children: &[Oid]) -> Self {
        Self::new(ObjectKind::Tree, payload, children.to_vec())
    }

    /// A leaf blob.
    #[must_use]
    pub fn blob(payload: impl AsRef<[u8]>) -> Self {
        Self::new(ObjectKind::Blob, payload, Vec::new())
    }

    /// An annotated tag naming `target`.
    #[must_use]
    pub fn tag(payload: impl AsRef<[u8]>, target: Oid) -> Self {
        Self::new(ObjectKind::Tag, payload, vec![target])
    }

    /// The content hash of this object.
    #[must_use]
    pub fn oid(&self) -> Oid {
        self.oid
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    kind: ObjectKind,
    links: Vec<Oid>,
    payload: Bytes,
}

// ---------------------------------------------------------------------------
// Pack encoding
// ---------------------------------------------------------------------------

fn kind_code(kind: ObjectKind) -> u8 {
    match kind {
        ObjectKind::Commit => 1,
        ObjectKind::Tree => 2,
        ObjectKind::Blob => 3,
        ObjectKind::Tag => 4,
    }
}

fn kind_from_code(code: u8) -> Result<ObjectKind> {
    match code {
        1 => Ok(ObjectKind::Commit),
        2 => Ok(ObjectKind::Tree),
        3 => Ok(ObjectKind::Blob),
        4 => Ok(ObjectKind::Tag),
        other => Err(StoreError::odb(format!("corrupt pack: kind code {other}"))),
    }
}

fn encode_pack(objects: &[(Oid, StoredObject)]) -> (Bytes, Vec<IndexEntry>) {
    let mut buf = Vec::new();
    buf.extend_from_slice(b"PACK");
    buf.extend_from_slice(&2u32.to_be_bytes());
    buf.extend_from_slice(&u32::try_from(objects.len()).unwrap_or(u32::MAX).to_be_bytes());

    let mut entries = Vec::with_capacity(objects.len());
    for (oid, obj) in objects {
        entries.push(IndexEntry {
            oid: *oid,
            offset: buf.len() as u64,
            kind: obj.kind,
        });
        buf.push(kind_code(obj.kind));
        buf.extend_from_slice(&u32::try_from(obj.links.len()).unwrap_or(u32::MAX).to_be_bytes());
        for link in &obj.links {
            buf.extend_from_slice(link.as_bytes());
        }
        buf.extend_from_slice(&u32::try_from(obj.payload.len()).unwrap_or(u32::MAX).to_be_bytes());
        buf.extend_from_slice(&obj.payload);
    }

    let trailer = Oid::hash(&buf);
    buf.extend_from_slice(trailer.as_bytes());
    (Bytes::from(buf), entries)
}

fn decode_object(data: &[u8], offset: u64) -> Result<StoredObject> {
    let corrupt = || StoreError::odb("corrupt pack: truncated object record");
    let mut pos = usize::try_from(offset).map_err(|_| corrupt())?;

    let kind = kind_from_code(*data.get(pos).ok_or_else(corrupt)?)?;
    pos += 1;

    let link_count = read_u32(data, pos).ok_or_else(corrupt)? as usize;
    pos += 4;
    let mut links = Vec::with_capacity(link_count);
    for _ in 0..link_count {
        let raw = data.get(pos..pos + OID_LEN).ok_or_else(corrupt)?;
        let mut bytes = [0u8; OID_LEN];
        bytes.copy_from_slice(raw);
        links.push(Oid::from_bytes(bytes));
        pos += OID_LEN;
    }

    let payload_len = read_u32(data, pos).ok_or_else(corrupt)? as usize;
    pos += 4;
    let payload = data.get(pos..pos + payload_len).ok_or_else(corrupt)?;

    Ok(StoredObject {
        kind,
        links,
        payload: Bytes::copy_from_slice(payload),
    })
}

fn read_u32(data: &[u8], pos: usize) -> Option<u32> {
    let raw = data.get(pos..pos + 4)?;
    Some(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

// ---------------------------------------------------------------------------
// Object database
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct OdbInner {
    backend: MemoryBackend,
    // Merged view of every committed pack's objects, rebuilt on demand.
    objects: RwLock<Option<Arc<FxHashMap<Oid, StoredObject>>>>,
}

impl OdbInner {
    /// Reads the committed pack list and the version token to CAS against.
    ///
    /// The version is taken before the content so a concurrent swap makes
    /// the subsequent CAS fail instead of publishing a merge of stale
    /// state.
    async fn manifest(&self) -> Result<(Vec<PackDescription>, Option<String>)> {
        let Some(meta) = self.backend.head(MANIFEST_PATH).await? else {
            return Ok((Vec::new(), None));
        };
        let data = self.backend.get(MANIFEST_PATH).await?;
        let list: Vec<PackDescription> =
            serde_json::from_slice(&data).map_err(|e| StoreError::Serialization {
                message: format!("failed to parse pack list: {e}"),
            })?;
        Ok((list, Some(meta.version)))
    }

    async fn load_objects(&self) -> Result<Arc<FxHashMap<Oid, StoredObject>>> {
        if let Ok(cache) = self.objects.read() {
            if let Some(map) = cache.as_ref() {
                return Ok(Arc::clone(map));
            }
        }

        let (descs, _) = self.manifest().await?;
        let mut map = FxHashMap::default();
        for desc in &descs {
            let index_bytes = self.backend.get(&desc.file_name(PackExt::Index)).await?;
            let index = PackIndex::from_bytes(&index_bytes)?;
            let pack_bytes = self.backend.get(&desc.file_name(PackExt::Pack)).await?;
            for entry in index.entries() {
                if map.contains_key(&entry.oid) {
                    continue;
                }
                let obj = decode_object(&pack_bytes, entry.offset)?;
                map.insert(entry.oid, obj);
            }
        }

        let map = Arc::new(map);
        if let Ok(mut cache) = self.objects.write() {
            *cache = Some(Arc::clone(&map));
        }
        Ok(map)
    }

    fn invalidate_objects(&self) {
        if let Ok(mut cache) = self.objects.write() {
            *cache = None;
        }
    }
}

/// In-memory [`ObjectDatabase`] over a CAS-swapped pack-list manifest.
#[derive(Debug, Clone)]
pub struct MemoryObjectDatabase {
    inner: Arc<OdbInner>,
}

impl Default for MemoryObjectDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryObjectDatabase {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(OdbInner {
                backend: MemoryBackend::new(),
                objects: RwLock::new(None),
            }),
        }
    }

    /// Writes and commits a pack holding `objects`, as an inserter would.
    ///
    /// The pack is stamped with `last_modified_ms` and appended to the
    /// committed pack list.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend rejects the write or the commit
    /// keeps losing the CAS race.
    pub async fn insert_pack(
        &self,
        source: PackSource,
        last_modified_ms: i64,
        objects: &[ObjectSpec],
    ) -> Result<PackDescription> {
        let items: Vec<(Oid, StoredObject)> = objects
            .iter()
            .map(|spec| {
                (
                    spec.oid,
                    StoredObject {
                        kind: spec.kind,
                        links: spec.links.clone(),
                        payload: spec.payload.clone(),
                    },
                )
            })
            .collect();
        let (pack_bytes, entries) = encode_pack(&items);
        let index_bytes = PackIndex::new(entries).to_bytes()?;

        let mut desc = self.new_pack(source, 0).await?;
        desc.set_last_modified_ms(last_modified_ms);
        desc.set_object_count(objects.len() as u64);
        desc.set_index_version(PackIndex::VERSION);
        desc.set_file_size(PackExt::Pack, pack_bytes.len() as u64);
        desc.set_file_size(PackExt::Index, index_bytes.len() as u64);

        self.put_file(&desc, PackExt::Pack, pack_bytes).await?;
        self.put_file(&desc, PackExt::Index, index_bytes).await?;

        for _ in 0..CAS_ATTEMPTS {
            let (mut current, version) = self.inner.manifest().await?;
            current.push(desc.clone());
            if self.swap_manifest(&current, version).await? {
                self.inner.invalidate_objects();
                return Ok(desc);
            }
        }
        Err(StoreError::odb("pack list contention while inserting pack"))
    }

    async fn swap_manifest(
        &self,
        list: &[PackDescription],
        version: Option<String>,
    ) -> Result<bool> {
        let data = serde_json::to_vec(list).map_err(|e| StoreError::Serialization {
            message: format!("failed to encode pack list: {e}"),
        })?;
        let precondition = match version {
            Some(v) => WritePrecondition::MatchesVersion(v),
            None => WritePrecondition::DoesNotExist,
        };
        let result = self
            .inner
            .backend
            .put(MANIFEST_PATH, Bytes::from(data), precondition)
            .await?;
        Ok(matches!(result, WriteResult::Success { .. }))
    }
}

#[async_trait]
impl ObjectDatabase for MemoryObjectDatabase {
    type Pack = MemoryPackFile;
    type Writer = MemoryPackWriter;

    async fn packs(&self) -> Result<Vec<MemoryPackFile>> {
        let (descs, _) = self.inner.manifest().await?;
        Ok(descs
            .into_iter()
            .map(|desc| MemoryPackFile {
                inner: Arc::clone(&self.inner),
                desc,
                index: RwLock::new(None),
            })
            .collect())
    }

    async fn new_pack(
        &self,
        source: PackSource,
        estimated_pack_size: u64,
    ) -> Result<PackDescription> {
        let name = format!("pack-{}", Ulid::new().to_string().to_lowercase());
        Ok(PackDescription::new(name, source, estimated_pack_size))
    }

    fn new_writer(&self, config: &PackConfig) -> MemoryPackWriter {
        MemoryPackWriter {
            inner: Arc::clone(&self.inner),
            config: config.clone(),
            tag_targets: FxHashSet::default(),
            exclusions: Vec::new(),
            selected: Vec::new(),
            selected_set: FxHashSet::default(),
            reused_objects: 0,
            prepared_with_haves: None,
            written: None,
            bitmap_ready: false,
            stats: PackStatistics::default(),
        }
    }

    async fn read_file(&self, desc: &PackDescription, ext: PackExt) -> Result<Bytes> {
        Ok(self.inner.backend.get(&desc.file_name(ext)).await?)
    }

    async fn put_file(&self, desc: &PackDescription, ext: PackExt, data: Bytes) -> Result<()> {
        let path = desc.file_name(ext);
        match self
            .inner
            .backend
            .put(&path, data, WritePrecondition::DoesNotExist)
            .await?
        {
            WriteResult::Success { .. } => Ok(()),
            WriteResult::PreconditionFailed { .. } => {
                Err(StoreError::odb(format!("pack file already exists: {path}")))
            }
        }
    }

    async fn commit_pack(
        &self,
        additions: &[PackDescription],
        removals: &[PackDescription],
    ) -> Result<CommitOutcome> {
        let (current, version) = self.inner.manifest().await?;

        // Every pack being pruned must still be committed; a missing one
        // means another maintainer already swapped it out.
        for removal in removals {
            if !current.iter().any(|d| d.name() == removal.name()) {
                return Ok(CommitOutcome::RaceDetected);
            }
        }

        let mut next: Vec<PackDescription> = current
            .into_iter()
            .filter(|d| !removals.iter().any(|r| r.name() == d.name()))
            .collect();
        next.extend(additions.iter().cloned());

        if !self.swap_manifest(&next, version).await? {
            return Ok(CommitOutcome::RaceDetected);
        }
        self.inner.invalidate_objects();

        // Withdraw the pruned packs' files; failures leave unreferenced
        // files behind, which is harmless.
        for removal in removals {
            for ext in [PackExt::Pack, PackExt::Index, PackExt::BitmapIndex] {
                let _ = self.inner.backend.delete(&removal.file_name(ext)).await;
            }
        }
        Ok(CommitOutcome::Committed)
    }

    async fn rollback_pack(&self, additions: &[PackDescription]) -> Result<()> {
        for desc in additions {
            for ext in [PackExt::Pack, PackExt::Index, PackExt::BitmapIndex] {
                self.inner.backend.delete(&desc.file_name(ext)).await?;
            }
        }
        Ok(())
    }

    fn clear_cache(&self) {
        self.inner.invalidate_objects();
    }
}

/// Committed pack handle of the memory store.
#[derive(Debug)]
pub struct MemoryPackFile {
    inner: Arc<OdbInner>,
    desc: PackDescription,
    index: RwLock<Option<Arc<PackIndex>>>,
}

#[async_trait]
impl PackFile for MemoryPackFile {
    fn description(&self) -> &PackDescription {
        &self.desc
    }

    async fn index(&self) -> Result<Arc<PackIndex>> {
        if let Ok(cache) = self.index.read() {
            if let Some(index) = cache.as_ref() {
                return Ok(Arc::clone(index));
            }
        }
        let data = self
            .inner
            .backend
            .get(&self.desc.file_name(PackExt::Index))
            .await?;
        let index = Arc::new(PackIndex::from_bytes(&data)?);
        if let Ok(mut cache) = self.index.write() {
            *cache = Some(Arc::clone(&index));
        }
        Ok(index)
    }
}

// ---------------------------------------------------------------------------
// Pack writer
// ---------------------------------------------------------------------------

/// Reference [`PackWriter`] over the memory store's object graph.
pub struct MemoryPackWriter {
    inner: Arc<OdbInner>,
    config: PackConfig,
    tag_targets: FxHashSet<Oid>,
    exclusions: Vec<Arc<OidSet>>,
    selected: Vec<(Oid, ObjectKind)>,
    selected_set: FxHashSet<Oid>,
    reused_objects: u64,
    prepared_with_haves: Option<bool>,
    written: Option<Vec<IndexEntry>>,
    bitmap_ready: bool,
    stats: PackStatistics,
}

impl MemoryPackWriter {
    fn is_excluded(&self, oid: &Oid) -> bool {
        self.exclusions.iter().any(|set| set.contains(oid))
    }
}

#[async_trait]
impl PackWriter for MemoryPackWriter {
    fn set_tag_targets(&mut self, targets: FxHashSet<Oid>) {
        self.tag_targets = targets;
    }

    fn exclude_objects(&mut self, objects: Arc<OidSet>) {
        self.exclusions.push(objects);
    }

    async fn prepare_pack(
        &mut self,
        _pm: &dyn ProgressMonitor,
        want: &FxHashSet<Oid>,
        have: &FxHashSet<Oid>,
    ) -> Result<()> {
        let objects = self.inner.load_objects().await?;

        // Closure of the uninteresting side. Absent haves are tolerated;
        // the caller only promises they were once valid tips.
        let mut uninteresting: FxHashSet<Oid> = FxHashSet::default();
        let mut queue: Vec<Oid> = have.iter().copied().collect();
        while let Some(oid) = queue.pop() {
            if !uninteresting.insert(oid) {
                continue;
            }
            if let Some(obj) = objects.get(&oid) {
                queue.extend(obj.links.iter().copied());
            }
        }

        let mut seen: FxHashSet<Oid> = FxHashSet::default();
        let mut queue: Vec<Oid> = want.iter().copied().collect();
        while let Some(oid) = queue.pop() {
            if uninteresting.contains(&oid) || !seen.insert(oid) {
                continue;
            }
            let obj = objects.get(&oid).ok_or_else(|| {
                StoreError::writer(format!("missing object during traversal: {oid}"))
            })?;
            queue.extend(obj.links.iter().copied());
            if self.is_excluded(&oid) || self.selected_set.contains(&oid) {
                continue;
            }
            self.selected_set.insert(oid);
            self.selected.push((oid, obj.kind));
        }

        // Deterministic pack layout regardless of traversal order.
        self.selected.sort_unstable_by_key(|(oid, _)| *oid);
        self.prepared_with_haves = Some(!have.is_empty());
        Ok(())
    }

    fn add_object(&mut self, oid: Oid, kind: ObjectKind) -> Result<()> {
        if self.is_excluded(&oid) || !self.selected_set.insert(oid) {
            return Ok(());
        }
        self.selected.push((oid, kind));
        self.reused_objects += 1;
        Ok(())
    }

    fn object_count(&self) -> u64 {
        self.selected.len() as u64
    }

    async fn write_pack(&mut self, _pm: &dyn ProgressMonitor) -> Result<Bytes> {
        let objects = self.inner.load_objects().await?;
        let mut items = Vec::with_capacity(self.selected.len());
        for (oid, _) in &self.selected {
            let obj = objects
                .get(oid)
                .ok_or_else(|| StoreError::writer(format!("missing object while packing: {oid}")))?;
            items.push((*oid, obj.clone()));
        }

        let (bytes, entries) = encode_pack(&items);
        self.stats = PackStatistics {
            object_count: self.selected.len() as u64,
            total_bytes: bytes.len() as u64,
            reused_objects: self.reused_objects,
        };
        self.written = Some(entries);
        Ok(bytes)
    }

    async fn write_index(&mut self) -> Result<Bytes> {
        let entries = self
            .written
            .as_ref()
            .ok_or_else(|| StoreError::writer("index requested before pack was written"))?;
        PackIndex::new(entries.clone()).to_bytes()
    }

    async fn prepare_bitmap_index(&mut self, _pm: &dyn ProgressMonitor) -> Result<bool> {
        self.bitmap_ready = self.config.build_bitmaps
            && self.prepared_with_haves == Some(false)
            && !self.selected.is_empty();
        Ok(self.bitmap_ready)
    }

    async fn write_bitmap_index(&mut self) -> Result<Bytes> {
        if !self.bitmap_ready {
            return Err(StoreError::writer("no bitmap index was prepared"));
        }
        // Tag targets get dedicated bitmaps so peeled-tag lookups stay
        // index-only for readers.
        let oids: Vec<Oid> = self.selected.iter().map(|(oid, _)| *oid).collect();
        let tag_targets: Vec<Oid> = self
            .selected
            .iter()
            .map(|(oid, _)| *oid)
            .filter(|oid| self.tag_targets.contains(oid))
            .collect();
        let payload = serde_json::json!({
            "oids": oids,
            "tagTargets": tag_targets,
        });
        let data = serde_json::to_vec(&payload).map_err(|e| StoreError::Serialization {
            message: format!("failed to encode bitmap index: {e}"),
        })?;
        Ok(Bytes::from(data))
    }

    fn statistics(&self) -> PackStatistics {
        self.stats.clone()
    }

    fn object_set(&self) -> OidSet {
        OidSet::from_iter(self.selected.iter().map(|(oid, _)| *oid))
    }

    fn index_version(&self) -> u32 {
        self.config.index_version
    }
}

// ---------------------------------------------------------------------------
// Ref database
// ---------------------------------------------------------------------------

/// In-memory [`RefDatabase`] with settable refs and ref-tree namespaces.
#[derive(Debug, Default)]
pub struct MemoryRefDatabase {
    refs: RwLock<Vec<Ref>>,
    additional: RwLock<Vec<Ref>>,
    ref_tree_prefixes: RwLock<Vec<String>>,
}

impl MemoryRefDatabase {
    /// Creates an empty ref database with the default `refs/txn/` ref-tree
    /// namespace.
    #[must_use]
    pub fn new() -> Self {
        Self {
            refs: RwLock::new(Vec::new()),
            additional: RwLock::new(Vec::new()),
            ref_tree_prefixes: RwLock::new(vec!["refs/txn/".to_string()]),
        }
    }

    /// Creates or replaces a ref.
    pub fn set_ref(&self, r: Ref) {
        if let Ok(mut refs) = self.refs.write() {
            if let Some(existing) = refs.iter_mut().find(|e| e.name == r.name) {
                *existing = r;
            } else {
                refs.push(r);
            }
        }
    }

    /// Deletes a ref by name.
    pub fn remove_ref(&self, name: &str) {
        if let Ok(mut refs) = self.refs.write() {
            refs.retain(|r| r.name != name);
        }
    }

    /// Adds a ref reported outside the regular listing.
    pub fn add_additional_ref(&self, r: Ref) {
        if let Ok(mut additional) = self.additional.write() {
            additional.push(r);
        }
    }

    /// Replaces the namespaces treated as transactional ref trees.
    pub fn set_ref_tree_prefixes<I, S>(&self, prefixes: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Ok(mut slot) = self.ref_tree_prefixes.write() {
            *slot = prefixes.into_iter().map(Into::into).collect();
        }
    }
}

#[async_trait]
impl RefDatabase for MemoryRefDatabase {
    async fn refresh(&self) -> Result<()> {
        Ok(())
    }

    async fn refs(&self) -> Result<Vec<Ref>> {
        self.refs
            .read()
            .map(|refs| refs.clone())
            .map_err(|_| StoreError::refdb("ref store lock poisoned"))
    }

    async fn additional_refs(&self) -> Result<Vec<Ref>> {
        self.additional
            .read()
            .map(|refs| refs.clone())
            .map_err(|_| StoreError::refdb("ref store lock poisoned"))
    }

    fn is_ref_tree(&self, name: &str) -> bool {
        self.ref_tree_prefixes
            .read()
            .map(|prefixes| prefixes.iter().any(|p| name.starts_with(p.as_str())))
            .unwrap_or(false)
    }
}
