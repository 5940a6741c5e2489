use serde::{Deserialize, Serialize};

use crate::limits::MAX_WINDOW_SLOTS;
use crate::model::*;

use super::overlap::CandidateSource;
use super::EngineError;

/// Utilization classification. Lower bounds are inclusive: 90% is `High`,
/// 70% is `Medium`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Full,
}

impl Severity {
    /// Integer comparisons keep the 70/90 boundaries exact.
    pub fn classify(used: u32, max: u32) -> Self {
        let used = u64::from(used);
        let max = u64::from(max);
        // max == 0 lands here too: nothing fits.
        if used >= max {
            Severity::Full
        } else if used * 100 >= 90 * max {
            Severity::High
        } else if used * 100 >= 70 * max {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacitySnapshot {
    pub span: Span,
    pub used: u32,
    pub max: u32,
    pub percentage: f64,
    pub severity: Severity,
    pub is_full: bool,
    pub is_high: bool,
    pub is_medium: bool,
    pub is_low: bool,
}

impl CapacitySnapshot {
    pub fn from_counts(span: Span, used: u32, max: u32) -> Self {
        let percentage = if max > 0 {
            f64::from(used) * 100.0 / f64::from(max)
        } else {
            0.0
        };
        let severity = Severity::classify(used, max);
        Self {
            span,
            used,
            max,
            percentage,
            severity,
            is_full: severity == Severity::Full,
            is_high: severity == Severity::High,
            is_medium: severity == Severity::Medium,
            is_low: severity == Severity::Low,
        }
    }

    /// One more booking would exceed the limit.
    pub fn would_overflow(&self) -> bool {
        u64::from(self.used) + 1 > u64::from(self.max)
    }
}

/// Number of active-occupying bookings on `resource` overlapping `probe`.
pub fn count_occupying<S>(resource: &Resource, bookings: &S, probe: &Span) -> u32
where
    S: CandidateSource + ?Sized,
{
    let n = bookings
        .candidates(*probe)
        .filter(|b| b.occupies(resource.id, probe))
        .count();
    u32::try_from(n).unwrap_or(u32::MAX)
}

pub fn capacity_at<S>(resource: &Resource, bookings: &S, probe: &Span) -> CapacitySnapshot
where
    S: CandidateSource + ?Sized,
{
    let used = count_occupying(resource, bookings, probe);
    CapacitySnapshot::from_counts(*probe, used, resource.max_concurrent_bookings)
}

/// One snapshot per fixed-size slot from `window_start`; the last slot is
/// cut at `window_end`.
///
/// Slots advance by plain millisecond offsets. Across a daylight-saving
/// transition the local wall-clock labels of later slots shift by the offset
/// change; this is accepted behavior.
pub fn capacity_over_window<S>(
    resource: &Resource,
    bookings: &S,
    window_start: Ms,
    window_end: Ms,
    slot_size: Ms,
) -> Result<Vec<CapacitySnapshot>, EngineError>
where
    S: CandidateSource + ?Sized,
{
    let window = Span::try_new(window_start, window_end)?;
    if slot_size <= 0 {
        return Err(EngineError::InvalidRange {
            start: window_start,
            end: window_start.saturating_add(slot_size),
        });
    }
    let slots = window.end.abs_diff(window.start).div_ceil(slot_size as u64);
    if slots > MAX_WINDOW_SLOTS as u64 {
        return Err(EngineError::LimitExceeded("too many slots in window"));
    }

    let mut snapshots = Vec::with_capacity(slots as usize);
    let mut cursor = window.start;
    while cursor < window.end {
        let slot_end = cursor.saturating_add(slot_size).min(window.end);
        snapshots.push(capacity_at(resource, bookings, &Span::new(cursor, slot_end)));
        cursor = slot_end;
    }
    Ok(snapshots)
}

/// Sub-spans of `window` where concurrent occupancy reaches the resource limit.
pub fn saturated_spans<S>(resource: &Resource, bookings: &S, window: &Span) -> Vec<Span>
where
    S: CandidateSource + ?Sized,
{
    if resource.max_concurrent_bookings == 0 {
        return vec![*window];
    }
    let mut allocs: Vec<Span> = bookings
        .candidates(*window)
        .filter(|b| b.occupies(resource.id, window))
        .map(|b| Span::new(b.span.start.max(window.start), b.span.end.min(window.end)))
        .collect();
    allocs.sort_by_key(|s| s.start);
    compute_saturated_spans(&allocs, resource.max_concurrent_bookings)
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// Sweep-line: time ranges where allocation count >= capacity.
/// Ends sort before starts at the same instant, so touching bookings never stack.
pub fn compute_saturated_spans(allocs: &[Span], capacity: u32) -> Vec<Span> {
    if allocs.is_empty() || capacity == 0 {
        return Vec::new();
    }
    if capacity == 1 {
        return merge_overlapping(allocs);
    }

    let mut events: Vec<(Ms, i32)> = Vec::with_capacity(allocs.len() * 2);
    for a in allocs {
        events.push((a.start, 1));
        events.push((a.end, -1));
    }
    events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut result: Vec<Span> = Vec::new();
    let mut count: u32 = 0;
    let mut saturated_start: Option<Ms> = None;

    for (time, delta) in &events {
        if *delta > 0 {
            count += 1;
        } else {
            count -= 1;
        }

        if count >= capacity && saturated_start.is_none() {
            saturated_start = Some(*time);
        } else if count < capacity
            && let Some(start) = saturated_start.take()
            && *time > start
        {
            result.push(Span::new(start, *time));
        }
    }

    merge_overlapping(&result)
}
