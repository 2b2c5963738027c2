//! Line remapping: express a reference file's per-line coverage in the line
//! numbers of the current file, so both can be compared line by line.
//!
//! The reference mapping is spread into one slot per reference line. A slot
//! holds the line's own value (`None` when the line is not instrumented)
//! followed by markers for lines that were inserted after it. Edits clear
//! slots or append markers; flattening the slots then yields the current
//! file's lines in order.

use std::collections::BTreeMap;

use crate::edit::{EditKind, FileChanges};
use crate::error::Result;

type Slot<T> = Vec<Option<T>>;

/// Apply `changes` to a reference coverage-per-line mapping.
///
/// Lines without a reference counterpart (inserted or replaced lines) are
/// absent from the result. Edits are applied by kind in the fixed order
/// DELETE, INSERT, REPLACE. Edit ranges may reach past the last instrumented
/// reference line; that part of an edit cannot move any instrumented line
/// and is skipped. An invalid script is rejected before any line is moved.
pub fn remap_coverage_per_line<T: Clone>(
    reference: &BTreeMap<u32, T>,
    changes: &FileChanges,
) -> Result<BTreeMap<u32, T>> {
    changes.validate()?;
    if changes.is_empty() {
        return Ok(reference.clone());
    }

    let last_line = reference.keys().next_back().copied().unwrap_or(0);
    let mut slots = to_slots(reference, last_line);
    let within = |start: u32, end: u32| start..=end.min(last_line);

    for edit in changes.by_kind(EditKind::Delete) {
        for line in within(edit.old_start, edit.old_end) {
            slots[line as usize].clear();
        }
    }

    for edit in changes.by_kind(EditKind::Insert) {
        if let Some(slot) = slots.get_mut(edit.old_start as usize) {
            append_markers(slot, edit.inserted_lines());
        }
    }

    for edit in changes.by_kind(EditKind::Replace) {
        let Some(first) = slots.get_mut(edit.old_start as usize) else {
            continue;
        };
        // coverage of replaced code is irrelevant
        first.clear();
        append_markers(first, edit.inserted_lines());
        for line in within(edit.old_start.saturating_add(1), edit.old_end) {
            slots[line as usize].clear();
        }
    }

    Ok(flatten(slots))
}

/// Slot 0 is a placeholder so that slot indices equal reference lines and
/// insertions at the top of the file have somewhere to go.
fn to_slots<T: Clone>(reference: &BTreeMap<u32, T>, last_line: u32) -> Vec<Slot<T>> {
    (0..=last_line)
        .map(|line| vec![reference.get(&line).cloned()])
        .collect()
}

fn append_markers<T>(slot: &mut Slot<T>, count: u32) {
    slot.extend(std::iter::repeat_with(|| None).take(count as usize));
}

fn flatten<T>(slots: Vec<Slot<T>>) -> BTreeMap<u32, T> {
    slots
        .into_iter()
        .flatten()
        .enumerate()
        .skip(1)
        .filter_map(|(line, value)| value.map(|v| (line as u32, v)))
        .collect()
}
