//! Overlap oracle: pure interval predicates, no state of their own.

use crate::model::*;

/// Half-open overlap: `[a.start, a.end)` and `[b.start, b.end)` share an instant.
/// Back-to-back intervals (`a.end == b.start`) do not overlap.
pub fn overlaps(a: &Span, b: &Span) -> bool {
    a.start < b.end && b.start < a.end
}

/// True iff a confirmed reservation in `reservations` overlaps `span`.
pub fn any_overlap<'a>(span: &Span, reservations: impl IntoIterator<Item = &'a Reservation>) -> bool {
    reservations
        .into_iter()
        .any(|r| r.is_confirmed() && overlaps(&r.span, span))
}

/// Highest number of spans covering a single instant.
///
/// Sweep line: +1 at each start, -1 at each end. Ends sort before starts at
/// the same instant, so back-to-back spans never count as concurrent.
pub fn peak_concurrency(spans: &[Span]) -> u32 {
    let mut events: Vec<(Ms, i32)> = Vec::with_capacity(spans.len() * 2);
    for s in spans {
        events.push((s.start, 1));
        events.push((s.end, -1));
    }
    events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut current: i32 = 0;
    let mut peak: i32 = 0;
    for (_, delta) in &events {
        current += delta;
        peak = peak.max(current);
    }
    peak as u32
}
