use std::collections::HashMap;

use serde::Serialize;
use spanstore_alloc::{AllocStats, Span, SpaceAllocator, SpanState};
use spanstore_types::{Record, RecordId, TypeHash};
use tracing::{debug, info, warn};

use crate::config::{StoreConfig, SyncMode};
use crate::error::{StoreError, StoreResult};
use crate::index::RecordIndex;
use crate::layout::{self, Header, IndexEntry, Slot, HEADER_LEN, LEN_PREFIX, SELECTOR_OFFSET};
use crate::medium::Medium;

/// Chunk size for raw scans of the medium.
const SCAN_CHUNK: u64 = 64 * 1024;

/// Owner of a byte offset, as reported by [`ObjectStore::locate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Location {
    pub id: RecordId,
    pub type_hash: TypeHash,
    /// Start of the record's span (its length prefix).
    pub record_start: u64,
    /// Span length, including the 8-byte prefix.
    pub record_len: u64,
    pub state: SpanState,
}

/// Outcome of [`ObjectStore::commit_and_pack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PackReport {
    pub bytes_before: u64,
    pub bytes_after: u64,
    /// Records moved to a new location.
    pub relocated: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeCount {
    pub type_hash: TypeHash,
    pub count: usize,
}

/// Summary of a store, for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreReport {
    pub records: usize,
    pub max_id: Option<RecordId>,
    pub types: Vec<TypeCount>,
    pub medium_len: u64,
    pub active_slot: Slot,
    pub index_block: u64,
    pub dirty: bool,
    pub alloc: AllocStats,
}

/// A transactional, id-indexed record store over a [`Medium`].
///
/// Mutations are visible immediately through this handle but reach the
/// authoritative index block only on [`ObjectStore::commit`]. Reopening the
/// medium, or calling [`ObjectStore::rollback`], yields the last committed
/// state.
///
/// One handle per medium at a time: nothing guards against two writers.
pub struct ObjectStore<M> {
    medium: M,
    config: StoreConfig,
    header: Header,
    alloc: SpaceAllocator,
    current: RecordIndex,
    committed: RecordIndex,
    dirty: bool,
}

impl<M: Medium> ObjectStore<M> {
    /// Open a store with the default configuration.
    pub fn open(medium: M) -> StoreResult<Self> {
        Self::open_with_config(medium, StoreConfig::default())
    }

    /// Open the store on `medium`, initializing it if it is too short to
    /// hold one.
    pub fn open_with_config(mut medium: M, config: StoreConfig) -> StoreResult<Self> {
        let len = medium.len()?;
        if len < layout::MIN_STORE_LEN {
            if len > 0 {
                warn!(len, "medium too short to hold a store, re-initializing");
            }
            layout::write_initial(&mut medium)?;
            if config.sync_mode == SyncMode::EveryCommit {
                medium.sync()?;
            }
            info!("initialized empty store");
        }

        let mut header = Header::read(&medium)?;
        let (entries, alloc) = match read_generation(&medium, header.active_block()) {
            Ok(generation) => generation,
            Err(StoreError::Corrupt(reason)) if config.recover_from_shadow => {
                let shadow = header.active.other();
                warn!(
                    %reason,
                    slot = ?shadow,
                    block = header.pointer(shadow),
                    "authoritative index block unreadable, trying the other slot"
                );
                let generation = read_generation(&medium, header.pointer(shadow)).map_err(|e| {
                    StoreError::Corrupt(format!("{reason}; other slot also unusable: {e}"))
                })?;
                medium.write_all_at(SELECTOR_OFFSET, &[shadow.selector()])?;
                if config.sync_mode == SyncMode::EveryCommit {
                    medium.sync()?;
                }
                header.active = shadow;
                generation
            }
            Err(e) => return Err(e),
        };

        let index = RecordIndex::from_entries(entries);
        info!(
            records = index.len(),
            hwm = alloc.high_water_mark(),
            slot = ?header.active,
            "opened store"
        );
        Ok(Self {
            medium,
            config,
            header,
            alloc,
            committed: index.clone(),
            current: index,
            dirty: false,
        })
    }

    // -----------------------------------------------------------------------
    // Records
    // -----------------------------------------------------------------------

    /// Store `payload` under `id`, replacing any record already there.
    ///
    /// If the write fails the store is left exactly as it was.
    pub fn store(&mut self, id: RecordId, type_hash: TypeHash, payload: &[u8]) -> StoreResult<()> {
        let replaced = match self.current.get(id) {
            Some(old) => Some((old.loc, self.span_len(old.loc)?)),
            None => None,
        };
        let len = LEN_PREFIX + payload.len() as u64;
        let mut span = Vec::with_capacity(payload.len() + LEN_PREFIX as usize);
        span.extend_from_slice(&len.to_be_bytes());
        span.extend_from_slice(payload);
        let loc = self.write_new_span(&span)?;

        if let Some((old_loc, old_len)) = replaced {
            self.alloc.mark_free(old_loc, old_len);
        }
        self.current.insert(IndexEntry { id, loc, type_hash });
        self.dirty = true;
        debug!(id, loc, len, %type_hash, replaced = replaced.is_some(), "stored record");
        Ok(())
    }

    /// Remove `id`. Returns `false` if there was no such record.
    pub fn delete(&mut self, id: RecordId) -> StoreResult<bool> {
        let Some(entry) = self.current.get(id) else {
            return Ok(false);
        };
        let len = self.span_len(entry.loc)?;
        self.alloc.mark_free(entry.loc, len);
        self.current.remove(id);
        self.dirty = true;
        debug!(id, loc = entry.loc, len, "deleted record");
        Ok(true)
    }

    /// The payload stored under `id`, which must carry `expected` as its
    /// type hash.
    pub fn load(&self, id: RecordId, expected: TypeHash) -> StoreResult<Vec<u8>> {
        let entry = self.current.get(id).ok_or(StoreError::UnknownId(id))?;
        if entry.type_hash != expected {
            return Err(StoreError::TypeMismatch {
                id,
                expected,
                stored: entry.type_hash,
            });
        }
        let len = self.span_len(entry.loc)?;
        let payload_len = usize::try_from(len - LEN_PREFIX).map_err(|_| {
            StoreError::Corrupt(format!("record {id} of {len} bytes does not fit in memory"))
        })?;
        Ok(self.medium.read_vec_at(entry.loc + LEN_PREFIX, payload_len)?)
    }

    pub fn store_record<R: Record>(&mut self, record: &R) -> StoreResult<()> {
        self.store(record.id(), R::type_hash(), &record.encode())
    }

    pub fn load_record<R: Record>(&self, id: RecordId) -> StoreResult<R> {
        let payload = self.load(id, R::type_hash())?;
        let mut record = R::decode(&payload)?;
        record.set_id(id);
        Ok(record)
    }

    /// Ids of every record of type `R`, ascending.
    pub fn ids_of<R: Record>(&self) -> Vec<RecordId> {
        self.current.ids_of(R::type_hash())
    }

    pub fn ids_of_type(&self, type_hash: TypeHash) -> Vec<RecordId> {
        self.current.ids_of(type_hash)
    }

    /// Highest id in use.
    pub fn max_id(&self) -> Option<RecordId> {
        self.current.max_id()
    }

    /// One past [`ObjectStore::max_id`], or 0 for an empty store.
    ///
    /// The store never assigns ids; this is a convenience for callers
    /// minting their own.
    pub fn next_id(&self) -> RecordId {
        self.max_id().map_or(0, |id| id + 1)
    }

    pub fn type_of(&self, id: RecordId) -> Option<TypeHash> {
        self.current.get(id).map(|e| e.type_hash)
    }

    pub fn contains(&self, id: RecordId) -> bool {
        self.current.contains(id)
    }

    /// All ids, ascending.
    pub fn ids(&self) -> Vec<RecordId> {
        self.current.ids()
    }

    pub fn len(&self) -> usize {
        self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    /// Whether there are uncommitted changes.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn header(&self) -> Header {
        self.header
    }

    pub fn allocator(&self) -> &SpaceAllocator {
        &self.alloc
    }

    pub fn medium(&self) -> &M {
        &self.medium
    }

    pub fn into_medium(self) -> M {
        self.medium
    }

    // -----------------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------------

    /// Publish every change since the last commit.
    ///
    /// Writes a fresh index block, points the inactive slot at it and flips
    /// the selector. The medium is parseable as either the old or the new
    /// generation at every step.
    pub fn commit(&mut self) -> StoreResult<()> {
        if !self.dirty {
            return Ok(());
        }
        let entries = self.current.entries();
        let block = layout::encode_block(&entries);
        let block_len = block.len() as u64;
        let at = self.write_new_span(&block)?;

        let old_block = self.header.active_block();
        let old_len = layout::block_len(self.committed.len());
        if let Err(e) = self.publish(at) {
            self.alloc.mark_free(at, block_len);
            return Err(e);
        }

        self.alloc.mark_free(old_block, old_len);
        self.alloc.commit();
        self.committed = self.current.clone();
        self.dirty = false;
        debug!(
            records = entries.len(),
            block = at,
            slot = ?self.header.active,
            hwm = self.alloc.high_water_mark(),
            "committed"
        );
        self.sync_if_configured()
    }

    /// Point the inactive slot at `block` and make it authoritative.
    fn publish(&mut self, block: u64) -> StoreResult<()> {
        self.set_inactive_pointer(block)?;
        self.sync_if_configured()?;
        self.write_selector(self.header.active.other())
    }

    /// Discard every change since the last commit. Touches no bytes.
    pub fn rollback(&mut self) {
        if !self.dirty && !self.alloc.has_pending() {
            return;
        }
        self.current = self.committed.clone();
        self.alloc.rollback();
        self.dirty = false;
        debug!(records = self.current.len(), "rolled back");
    }

    /// Commit, then move every record and index block down over free space
    /// and shrink the medium.
    ///
    /// Both pointer slots name identical tables throughout. Each record move
    /// copies the bytes, updates the inactive table, flips authority and then
    /// updates the other table, so an interruption at any point leaves a
    /// parseable store with the same content.
    pub fn commit_and_pack(&mut self) -> StoreResult<PackReport> {
        self.commit()?;
        let bytes_before = self.medium.len()?;

        let entries = self.committed.entries();
        let ranks: HashMap<RecordId, usize> = entries
            .iter()
            .enumerate()
            .map(|(rank, entry)| (entry.id, rank))
            .collect();
        let block = layout::encode_block(&entries);
        let block_len = block.len() as u64;

        let twin = self.write_new_span(&block)?;
        if let Err(e) = self.set_inactive_pointer(twin) {
            self.alloc.mark_free(twin, block_len);
            return Err(e);
        }
        self.alloc.commit();

        let relocated = match self.compact(&ranks, block_len) {
            Ok(relocated) => relocated,
            Err(e) => {
                self.abandon_pack(block_len);
                return Err(e);
            }
        };

        // Release the twin and point both slots at the surviving block.
        let inactive = self.header.inactive_block();
        self.alloc.mark_free(inactive, block_len);
        self.alloc.commit();
        self.set_inactive_pointer(self.header.active_block())?;

        self.sync_if_configured()?;
        let hwm = self.alloc.high_water_mark();
        if self.config.truncate_on_pack && hwm < bytes_before {
            self.medium.set_len(hwm)?;
        }
        self.sync_if_configured()?;

        let report = PackReport {
            bytes_before,
            bytes_after: self.medium.len()?,
            relocated,
        };
        info!(
            before = report.bytes_before,
            after = report.bytes_after,
            relocated,
            "packed store"
        );
        Ok(report)
    }

    /// Move items down over free space until no gap is left below the
    /// high-water mark. Returns the number of records moved.
    ///
    /// On error the in-flight reservation has been released and both tables
    /// still name every record where the committed indices say it is.
    fn compact(&mut self, ranks: &HashMap<RecordId, usize>, block_len: u64) -> StoreResult<usize> {
        let mut relocated = 0;
        loop {
            let hwm = self.alloc.high_water_mark();
            let inactive = self.header.inactive_block();
            let Some(gap) = self.alloc.first_gap() else {
                if inactive + block_len == hwm {
                    return Ok(relocated);
                }
                // Park the twin at the end so releasing it leaves no hole.
                self.move_inactive_block(inactive, hwm, block_len)?;
                continue;
            };

            let item = gap.end();
            if item == self.header.active_block() {
                self.flip()?;
                continue;
            }
            if item == inactive {
                if item + block_len == hwm {
                    return Ok(relocated);
                }
                let dest = pack_destination(gap, block_len, hwm);
                self.move_inactive_block(item, dest, block_len)?;
                continue;
            }

            let id = self.committed.id_at(item).ok_or_else(|| {
                StoreError::Corrupt(format!("used span at {item} belongs to no record"))
            })?;
            let rank = ranks.get(&id).copied().ok_or_else(|| {
                StoreError::Corrupt(format!("record {id} missing from the packed table"))
            })?;
            let len = self.span_len(item)?;
            let dest = pack_destination(gap, len, hwm);
            self.alloc.mark_used(dest, len);
            if let Err(e) = self.relocate_record(item, dest, len, rank) {
                self.alloc.mark_free(dest, len);
                self.restore_entry(rank, item);
                return Err(e);
            }

            self.alloc.mark_free(item, len);
            self.alloc.commit();
            self.current.relocate(id, dest);
            self.committed.relocate(id, dest);
            relocated += 1;
            debug!(id, from = item, to = dest, len, "relocated record");
        }
    }

    /// Copy a record to `dest` and repoint entry `rank` in both tables,
    /// flipping authority in between.
    fn relocate_record(&mut self, item: u64, dest: u64, len: u64, rank: usize) -> StoreResult<()> {
        self.copy_span(item, dest, len)?;
        let inactive = self.header.inactive_block();
        self.medium
            .write_u64_at(layout::entry_loc_offset(inactive, rank), dest)?;
        self.flip()?;
        let inactive = self.header.inactive_block();
        self.medium
            .write_u64_at(layout::entry_loc_offset(inactive, rank), dest)?;
        Ok(())
    }

    /// Point entry `rank` of both tables back at `loc`.
    fn restore_entry(&mut self, rank: usize, loc: u64) {
        for block in [self.header.a, self.header.b] {
            if let Err(e) = self
                .medium
                .write_u64_at(layout::entry_loc_offset(block, rank), loc)
            {
                warn!(block, rank, loc, error = %e, "could not restore index entry after failed move");
            }
        }
    }

    /// Release the twin block after a failed pack.
    fn abandon_pack(&mut self, block_len: u64) {
        let twin = self.header.inactive_block();
        self.alloc.mark_free(twin, block_len);
        self.alloc.commit();
        let active = self.header.active_block();
        if let Err(e) = self.set_inactive_pointer(active) {
            warn!(error = %e, "could not reset the inactive slot after a failed pack");
        }
        warn!(twin, "pack abandoned");
    }

    // -----------------------------------------------------------------------
    // Diagnostics
    // -----------------------------------------------------------------------

    /// The record owning byte `offset`.
    ///
    /// Committed bytes are resolved against the committed indices and bytes
    /// written this transaction against the current ones. Offsets in free
    /// space, the header or an index block have no owner.
    pub fn locate(&self, offset: u64) -> StoreResult<Option<Location>> {
        let Some(span) = self.alloc.span_at(offset) else {
            return Ok(None);
        };
        let index = match span.state {
            SpanState::Free => return Ok(None),
            SpanState::Used | SpanState::PendingFree => &self.committed,
            SpanState::PendingUse => &self.current,
        };
        let Some(entry) = index.entry_at_or_before(offset) else {
            return Ok(None);
        };
        if entry.loc < span.start {
            return Ok(None);
        }
        let record_len = self.span_len(entry.loc)?;
        if offset >= entry.loc + record_len {
            return Ok(None);
        }
        Ok(Some(Location {
            id: entry.id,
            type_hash: entry.type_hash,
            record_start: entry.loc,
            record_len,
            state: span.state,
        }))
    }

    /// Every offset at which `pattern` occurs in the raw medium, including
    /// overlapping occurrences.
    pub fn find_bytes(&self, pattern: &[u8]) -> StoreResult<Vec<u64>> {
        let mut hits = Vec::new();
        if pattern.is_empty() {
            return Ok(hits);
        }
        let total = self.medium.len()?;
        let overlap = pattern.len() as u64 - 1;
        let mut pos = 0;
        while pos < total {
            let end = (pos + SCAN_CHUNK + overlap).min(total);
            let chunk = self.medium.read_vec_at(pos, (end - pos) as usize)?;
            for (i, window) in chunk.windows(pattern.len()).enumerate() {
                if i as u64 >= SCAN_CHUNK {
                    break;
                }
                if window == pattern {
                    hits.push(pos + i as u64);
                }
            }
            pos += SCAN_CHUNK;
        }
        Ok(hits)
    }

    pub fn report(&self) -> StoreResult<StoreReport> {
        Ok(StoreReport {
            records: self.current.len(),
            max_id: self.current.max_id(),
            types: self
                .current
                .type_histogram()
                .into_iter()
                .map(|(type_hash, count)| TypeCount { type_hash, count })
                .collect(),
            medium_len: self.medium.len()?,
            active_slot: self.header.active,
            index_block: self.header.active_block(),
            dirty: self.dirty,
            alloc: self.alloc.stats(),
        })
    }

    /// Re-read the committed state from the medium and compare it with the
    /// in-memory committed indices.
    pub fn verify(&self) -> StoreResult<()> {
        let header = Header::read(&self.medium)?;
        if header != self.header {
            return Err(StoreError::Corrupt(format!(
                "header on medium {header:?} differs from open store {:?}",
                self.header
            )));
        }
        let (entries, _) = read_generation(&self.medium, header.active_block())?;
        if entries != self.committed.entries() {
            return Err(StoreError::Corrupt(
                "index block on medium differs from committed indices".into(),
            ));
        }
        debug!(records = entries.len(), "verified committed state");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Span length recorded in the prefix at `loc`.
    fn span_len(&self, loc: u64) -> StoreResult<u64> {
        let len = self.medium.read_u64_at(loc)?;
        if len < LEN_PREFIX {
            return Err(StoreError::Corrupt(format!(
                "record at {loc} has invalid length {len}"
            )));
        }
        Ok(len)
    }

    fn copy_span(&mut self, from: u64, to: u64, len: u64) -> StoreResult<()> {
        let len = usize::try_from(len)
            .map_err(|_| StoreError::Corrupt(format!("span at {from} too large to copy")))?;
        let bytes = self.medium.read_vec_at(from, len)?;
        self.medium.write_all_at(to, &bytes)?;
        Ok(())
    }

    /// Reserve space for `bytes` and write them there. The reservation is
    /// released if the write fails.
    fn write_new_span(&mut self, bytes: &[u8]) -> StoreResult<u64> {
        let len = bytes.len() as u64;
        let loc = self.alloc.available(len);
        self.alloc.mark_used(loc, len);
        if let Err(e) = self.medium.write_all_at(loc, bytes) {
            self.alloc.mark_free(loc, len);
            return Err(e.into());
        }
        Ok(loc)
    }

    fn move_inactive_block(&mut self, from: u64, to: u64, len: u64) -> StoreResult<()> {
        self.alloc.mark_used(to, len);
        let moved = self
            .copy_span(from, to, len)
            .and_then(|()| self.set_inactive_pointer(to));
        if let Err(e) = moved {
            self.alloc.mark_free(to, len);
            return Err(e);
        }
        self.alloc.mark_free(from, len);
        self.alloc.commit();
        debug!(from, to, "moved inactive index block");
        Ok(())
    }

    fn set_inactive_pointer(&mut self, loc: u64) -> StoreResult<()> {
        let slot = self.header.active.other();
        self.medium.write_u64_at(slot.offset(), loc)?;
        self.header.set_pointer(slot, loc);
        Ok(())
    }

    fn write_selector(&mut self, slot: Slot) -> StoreResult<()> {
        self.medium.write_all_at(SELECTOR_OFFSET, &[slot.selector()])?;
        self.header.active = slot;
        Ok(())
    }

    /// Make the inactive slot authoritative.
    fn flip(&mut self) -> StoreResult<()> {
        self.sync_if_configured()?;
        self.write_selector(self.header.active.other())?;
        self.sync_if_configured()
    }

    fn sync_if_configured(&mut self) -> StoreResult<()> {
        if self.config.sync_mode == SyncMode::EveryCommit {
            self.medium.sync()?;
        }
        Ok(())
    }
}

impl<M> std::fmt::Debug for ObjectStore<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStore")
            .field("records", &self.current.len())
            .field("active_slot", &self.header.active)
            .field("dirty", &self.dirty)
            .finish()
    }
}

/// Where pack moves an item of `len` bytes found right after `gap`.
fn pack_destination(gap: Span, len: u64, hwm: u64) -> u64 {
    if len <= gap.len {
        gap.start
    } else {
        hwm
    }
}

/// Parse the index block at `block` and rebuild the allocator from it.
///
/// Every record's span is taken from its own length prefix. Entries must be
/// in strictly ascending id order, and spans must lie past the header,
/// inside the medium, and not overlap each other or the block.
fn read_generation<M: Medium>(
    medium: &M,
    block: u64,
) -> StoreResult<(Vec<IndexEntry>, SpaceAllocator)> {
    let entries = layout::read_block(medium, block)?;
    let medium_len = medium.len()?;

    let mut spans = Vec::with_capacity(entries.len() + 1);
    spans.push((block, layout::block_len(entries.len())));
    let mut last_id = None;
    for entry in &entries {
        if last_id.is_some_and(|last| entry.id <= last) {
            return Err(StoreError::Corrupt(format!(
                "index block at {block} lists id {} out of order",
                entry.id
            )));
        }
        last_id = Some(entry.id);

        if entry.loc < HEADER_LEN || entry.loc.saturating_add(LEN_PREFIX) > medium_len {
            return Err(StoreError::Corrupt(format!(
                "record {} at {} lies outside the medium",
                entry.id, entry.loc
            )));
        }
        let len = medium.read_u64_at(entry.loc)?;
        if len < LEN_PREFIX || entry.loc.saturating_add(len) > medium_len {
            return Err(StoreError::Corrupt(format!(
                "record {} at {} has invalid length {len}",
                entry.id, entry.loc
            )));
        }
        spans.push((entry.loc, len));
    }

    spans.sort_unstable();
    let mut end = HEADER_LEN;
    for &(start, len) in &spans {
        if start < end {
            return Err(StoreError::Corrupt(format!(
                "span at {start} overlaps the previous one ending at {end}"
            )));
        }
        end = start + len;
    }

    let mut alloc = SpaceAllocator::new();
    alloc.mark_used(0, HEADER_LEN);
    for (start, len) in spans {
        alloc.mark_used(start, len);
    }
    alloc.commit();
    Ok((entries, alloc))
}
