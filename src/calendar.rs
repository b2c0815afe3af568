use crate::model::*;

// ── Coverage Algorithm ────────────────────────────────────────────

/// Expand one window into the concrete spans it contributes inside
/// `range`, clamped to `range`. A recurring window contributes every
/// occurrence intersecting the range, honoring its `until` bound.
pub fn expand_into(window: &Window, range: &Span, out: &mut Vec<Span>) {
    let Some(rec) = window.recurrence else {
        if let Some(clamped) = window.span.clamp_to(range) {
            out.push(clamped);
        }
        return;
    };

    let period = rec.cadence.period_ms();
    // Smallest k >= 0 with end + k*period > range.start.
    let first = ((range.start - window.span.end).div_euclid(period) + 1).max(0);

    let mut k = first;
    loop {
        let offset = k * period;
        let occurrence = Span::new(window.span.start + offset, window.span.end + offset);
        if occurrence.start >= range.end {
            break;
        }
        if let Some(until) = rec.until
            && occurrence.start > until {
                break;
            }
        if let Some(clamped) = occurrence.clamp_to(range) {
            out.push(clamped);
        }
        k += 1;
    }
}

/// Merge sorted overlapping/adjacent spans into disjoint spans.
pub fn merge_spans(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

/// Subtract `holes` from each span in `base`. Both inputs must be sorted
/// by start; `holes` must be disjoint.
pub fn subtract_spans(base: &[Span], holes: &[Span]) -> Vec<Span> {
    let mut out = Vec::new();
    let mut hi = 0;

    for &b in base {
        let mut cursor = b.start;

        while hi < holes.len() && holes[hi].end <= cursor {
            hi += 1;
        }

        let mut j = hi;
        while j < holes.len() && holes[j].start < b.end {
            let hole = &holes[j];
            if hole.start > cursor {
                out.push(Span::new(cursor, hole.start));
            }
            cursor = cursor.max(hole.end);
            j += 1;
        }

        if cursor < b.end {
            out.push(Span::new(cursor, b.end));
        }
    }

    out
}

/// The disjoint union of everything the window set offers inside `range`.
pub fn covered_spans(windows: &[Window], range: &Span) -> Vec<Span> {
    let mut pieces: Vec<Span> = Vec::new();
    for window in windows {
        expand_into(window, range, &mut pieces);
    }
    pieces.sort_by_key(|s| s.start);
    merge_spans(&pieces)
}

/// The parts of `range` the window set does NOT cover, in start order.
pub fn uncovered_gaps(windows: &[Window], range: &Span) -> Vec<Span> {
    subtract_spans(&[*range], &covered_spans(windows, range))
}

/// True when the windows' union fully contains `range` with no gaps.
/// An empty window set is never covered.
pub fn is_covered(windows: &[Window], range: &Span) -> bool {
    uncovered_gaps(windows, range).is_empty()
}
