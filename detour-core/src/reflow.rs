//! Forward re-timing of a day's tail. Shared by the analyzer (pure
//! propagation) and the strategy engine (propagation under adjustments).

use std::collections::{HashMap, HashSet};

use crate::config::DayWindow;
use crate::schedule::{DaySchedule, TimeSlot};
use crate::time::minute_of_day;

/// Breathing room kept around an activity moved onto another day.
pub(crate) const DEFER_BUFFER_MINUTES: i32 = 15;

/// Edits to apply while re-timing.
#[derive(Debug, Clone, Default)]
pub(crate) struct Adjustments {
    /// New on-site minutes per slot.
    pub durations: HashMap<String, i32>,
    /// New commute minutes per slot.
    pub commutes: HashMap<String, i32>,
    pub removed: HashSet<String>,
    /// Replacement visiting order for the tail; must name every tail slot.
    pub order: Option<Vec<String>>,
}

impl Adjustments {
    pub fn is_empty(&self) -> bool {
        self.durations.is_empty() && self.commutes.is_empty() && self.removed.is_empty() && self.order.is_none()
    }
}

/// One tail slot after re-timing. Minutes are relative to local midnight and
/// may run past the end of the day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Planned {
    pub slot_id: String,
    pub original_start: i32,
    pub original_end: i32,
    pub arrival: i32,
    pub start: i32,
    pub end: i32,
    pub removed: bool,
}

impl Planned {
    pub fn start_shift(&self) -> i32 {
        self.start - self.original_start
    }

    pub fn end_overrun(&self) -> i32 {
        self.end - self.original_end
    }

    pub fn duration_changed(&self) -> bool {
        self.end - self.start != self.original_end - self.original_start
    }

    pub fn moved(&self) -> bool {
        self.start != self.original_start || self.end != self.original_end
    }
}

/// Re-time `day.slots[from..]` for a traveller free to leave at `free_at`.
///
/// Slots never start before their planned time (or, when reordered, before
/// the planned time of the position they now occupy).
pub(crate) fn reflow(day: &DaySchedule, from: usize, free_at: i32, adj: &Adjustments) -> Vec<Planned> {
    let tail: Vec<&TimeSlot> = day.slots.iter().skip(from).collect();

    let floors: Vec<i32> = tail
        .iter()
        .filter(|s| !adj.removed.contains(&s.id))
        .map(|s| minute_of_day(s.start))
        .collect();

    let ordered: Vec<&TimeSlot> = match &adj.order {
        Some(ids) => ids
            .iter()
            .filter_map(|id| tail.iter().find(|s| &s.id == id).copied())
            .collect(),
        None => tail.clone(),
    };

    let mut out = Vec::with_capacity(ordered.len());
    let mut cursor = free_at;
    let mut position = 0usize;

    for slot in ordered {
        let original_start = minute_of_day(slot.start);
        let original_end = minute_of_day(slot.end);

        if adj.removed.contains(&slot.id) {
            out.push(Planned {
                slot_id: slot.id.clone(),
                original_start,
                original_end,
                arrival: cursor,
                start: original_start,
                end: original_end,
                removed: true,
            });
            continue;
        }

        let commute = adj
            .commutes
            .get(&slot.id)
            .copied()
            .unwrap_or_else(|| slot.commute_minutes());
        let arrival = cursor + commute;

        let floor = if adj.order.is_some() {
            floors.get(position).copied().unwrap_or(original_start)
        } else {
            original_start
        };
        let start = arrival.max(floor);
        let duration = adj
            .durations
            .get(&slot.id)
            .copied()
            .unwrap_or(original_end - original_start);
        let end = start + duration;

        cursor = end;
        position += 1;

        out.push(Planned {
            slot_id: slot.id.clone(),
            original_start,
            original_end,
            arrival,
            start,
            end,
            removed: false,
        });
    }

    out
}

/// Earliest start (minutes from midnight) inside `window` where `duration`
/// fits between the day's slots and anything already `placed` there.
pub(crate) fn find_gap(day: &DaySchedule, placed: &[(i32, i32)], duration: i32, window: &DayWindow) -> Option<i32> {
    let window_start = minute_of_day(window.start);
    let window_end = minute_of_day(window.end);

    let mut occupied: Vec<(i32, i32)> = day
        .slots
        .iter()
        .map(|s| (minute_of_day(s.start), minute_of_day(s.end)))
        .chain(placed.iter().copied())
        .collect();
    occupied.sort();

    let mut cursor = window_start;
    for (start, end) in occupied {
        if start - DEFER_BUFFER_MINUTES - cursor >= duration {
            return Some(cursor);
        }
        cursor = cursor.max(end + DEFER_BUFFER_MINUTES);
    }
    (window_end - cursor >= duration).then_some(cursor)
}
