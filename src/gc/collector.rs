//! Foreground collection pass

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::GcReport;
use crate::arena::ArenaKind;
use crate::engine::{EngineInner, Snapshot, WriterState};
use crate::error::{ArborError, GcError, Result};
use crate::index::{IndexWriter, NodePtr, SLOT_SIZE};
use crate::vlog::read_entry;

/// Bytes a deleted slot costs the index until it is pruned
const DEAD_SLOT_FOOTPRINT: u64 = SLOT_SIZE as u64;

/// Clears the in-progress flag when the pass ends, however it ends
struct RunningGuard<'a>(&'a AtomicBool);

impl<'a> RunningGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| GcError::InProgress)?;
        Ok(Self(flag))
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Debug)]
struct Plan {
    /// Prune deleted slots and release deferred regions
    index_unit: bool,
    /// Segment offsets, oldest first
    segments: Vec<u64>,
    planned_bytes: u64,
}

/// Run one bounded collection pass
pub(crate) fn collect(inner: &EngineInner, min_reclaim_size: u64, max_reclaim_size: u64) -> Result<GcReport> {
    if min_reclaim_size > max_reclaim_size {
        return Err(ArborError::InvalidArgument(format!(
            "min_reclaim_size ({}) exceeds max_reclaim_size ({})",
            min_reclaim_size, max_reclaim_size
        )));
    }
    let _running = RunningGuard::acquire(&inner.gc_running)?;

    let plan = match plan(&*inner.lock_writer()?, min_reclaim_size, max_reclaim_size) {
        Ok(plan) => plan,
        Err(e) => {
            tracing::debug!(error = %e, "nothing to collect");
            return Err(e);
        }
    };

    let mut report = GcReport::default();
    for &offset in &plan.segments {
        compact_segment(inner, &mut *inner.lock_writer()?, offset, &mut report)?;
    }
    if plan.index_unit {
        prune(inner, &mut *inner.lock_writer()?, &mut report)?;
    }
    release(inner, &mut *inner.lock_writer()?, max_reclaim_size, &mut report)?;

    report.reclaimed_bytes = report.index_bytes_released + report.data_bytes_released;
    tracing::info!(
        planned = plan.planned_bytes,
        reclaimed = report.reclaimed_bytes,
        segments = report.segments_compacted,
        relocated = report.entries_relocated,
        pruned = report.entries_pruned,
        deferred = report.deferred_regions,
        "collection pass finished"
    );
    Ok(report)
}

/// Pick candidates oldest first while the running total stays within `max`.
///
/// A segment costs its whole region. The index unit takes whatever budget
/// the segments leave.
fn plan(state: &WriterState, min: u64, max: u64) -> Result<Plan> {
    let mut total = 0u64;
    let mut segments = Vec::new();
    for (offset, segment) in state.vlog.segments_by_age() {
        let cost = segment.region.len;
        if segment.dead_bytes == 0 || total.saturating_add(cost) > max {
            continue;
        }
        total += cost;
        segments.push(offset);
    }

    let index_bytes = state
        .pending
        .bytes_within(max - total)
        .saturating_add(state.header.dead_entries.saturating_mul(DEAD_SLOT_FOOTPRINT))
        .min(max - total);
    let index_unit = index_bytes > 0;
    total += index_bytes;

    if total == 0 || total < min {
        return Err(GcError::ThresholdUnreachable { available: total, min }.into());
    }
    Ok(Plan {
        index_unit,
        segments,
        planned_bytes: total,
    })
}

/// Move live entries out of one segment and retire it
fn compact_segment(inner: &EngineInner, state: &mut WriterState, offset: u64, report: &mut GcReport) -> Result<()> {
    if state.vlog.segment(offset).is_none() {
        return Ok(());
    }
    if state.vlog.active_segment() == Some(offset) {
        state.vlog.seal_active();
    }

    let entries = state.vlog.scan(offset)?;
    let segment_end = state.vlog.segment(offset).map_or(offset, |segment| segment.region.end());
    let mut root = NodePtr::from_raw(state.header.root);
    let mut relocated = 0u64;
    let mut purged = 0u64;

    let WriterState {
        index_arena,
        vlog,
        header,
        ..
    } = &mut *state;
    let mut writer = IndexWriter::new(index_arena);

    for entry in &entries {
        // Only entries the index still points at matter
        let slot = match inner.index.lookup_slot(root, &entry.key)? {
            Some(slot) if slot.vref.offset == entry.offset => slot,
            _ => continue,
        };

        if slot.live {
            let (_, key, value) = read_entry(vlog.file(), entry.offset, segment_end)?;
            let moved = vlog.append(&key, &value, slot.vref.version)?;
            if let Some(new_root) = writer.relocate(root, &key, slot.vref, moved)? {
                root = new_root;
            }
            relocated += 1;
        } else {
            if let Some(new_root) = writer.purge(root, &entry.key, slot.vref)? {
                root = new_root;
            }
            purged += 1;
        }
    }

    let retired = writer.into_retired();
    header.dead_entries = header.dead_entries.saturating_sub(purged);
    let segment = vlog.retire(offset);

    let epoch = inner.publish(state, root, retired, false)?;
    if let Some(segment) = segment {
        state.pending.record(epoch, ArenaKind::Data, [segment.region]);
        tracing::trace!(
            segment = offset,
            dead = segment.dead_bytes,
            relocated,
            purged,
            "compacted value log segment"
        );
    }

    report.segments_compacted += 1;
    report.entries_relocated += relocated;
    report.entries_pruned += purged;
    Ok(())
}

/// Drop every remaining deleted slot
fn prune(inner: &EngineInner, state: &mut WriterState, report: &mut GcReport) -> Result<()> {
    if state.header.dead_entries == 0 {
        return Ok(());
    }

    let root = NodePtr::from_raw(state.header.root);
    let mut writer = IndexWriter::new(&mut state.index_arena);
    let (new_root, removed) = writer.prune_dead(root)?;
    let retired = writer.into_retired();

    if let Some(new_root) = new_root {
        state.header.dead_entries = state.header.dead_entries.saturating_sub(removed);
        inner.publish(state, new_root, retired, false)?;
        report.entries_pruned += removed;
    }
    Ok(())
}

/// Free retired regions no in-process reader can still reach, up to `max`
/// bytes. The rest stays pending for the next pass.
fn release(inner: &EngineInner, state: &mut WriterState, max: u64, report: &mut GcReport) -> Result<()> {
    let freeable = state.pending.drain_within(inner.epochs.oldest_active(), max);

    if !freeable.is_empty() {
        // Readers in other processes detect the bump and retry
        state.header.reclaim_generation += 1;
        inner.commit(state, true)?;

        for retired in freeable {
            match retired.kind {
                ArenaKind::Index => {
                    state.index_arena.free(retired.region)?;
                    report.index_bytes_released += retired.region.len;
                }
                ArenaKind::Data => {
                    state.vlog.release(retired.region)?;
                    report.data_bytes_released += retired.region.len;
                }
            }
        }

        // Persist the lowered high-water marks
        inner.commit(state, false)?;
        inner.snapshot.store(Arc::new(Snapshot::from_header(&state.header)));
    }

    report.deferred_regions = state.pending.len();
    Ok(())
}
