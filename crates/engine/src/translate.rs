//! Index-space translation between source and result.
//!
//! When a result is not index-aligned with its source (filtering drops
//! positions, flattening expands one position into many), structural events
//! must be re-expressed in the result's index space. The translator keeps
//! one "expansion width" per source position: 1 for plain projections, 0 or
//! 1 for filters, the current item count for flattens. A position's result
//! offset is the sum of the widths of all preceding positions.
//!
//! For moves, the new offset is computed over the width sequence with the
//! moved span already removed; removing then reinserting is what shifts
//! whichever of the two sides starts later, and it realizes the tie-break
//! rule that an old span is removed before the new span is inserted.

use vigil_core::ListEvent;

/// Per-position expansion widths for one maintained sequence.
#[derive(Clone, Debug, Default)]
pub struct DiffTranslator {
    widths: Vec<usize>,
}

impl DiffTranslator {
    /// Creates an empty translator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a translator with the given initial widths.
    pub fn with_widths(widths: Vec<usize>) -> Self {
        Self { widths }
    }

    /// Number of source positions tracked.
    #[inline]
    pub fn len(&self) -> usize {
        self.widths.len()
    }

    /// Returns true if no positions are tracked.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.widths.is_empty()
    }

    /// Current width of one source position.
    pub fn width_at(&self, position: usize) -> usize {
        self.widths[position]
    }

    /// Total result length.
    pub fn total_width(&self) -> usize {
        self.widths.iter().sum()
    }

    /// Result offset of a source position: the sum of all preceding widths.
    pub fn offset_of(&self, position: usize) -> usize {
        assert!(
            position <= self.widths.len(),
            "structural violation: offset of position {} with {} tracked widths",
            position,
            self.widths.len()
        );
        self.widths[..position].iter().sum()
    }

    /// Records an insertion at `position` and returns its result offset.
    pub fn insert(&mut self, position: usize, width: usize) -> usize {
        let offset = self.offset_of(position);
        self.widths.insert(position, width);
        offset
    }

    /// Records a removal at `position`; returns (result offset, old width).
    pub fn remove(&mut self, position: usize) -> (usize, usize) {
        let offset = self.offset_of(position);
        let width = self.widths.remove(position);
        (offset, width)
    }

    /// Records an in-place width change; returns (result offset, old width).
    pub fn replace(&mut self, position: usize, new_width: usize) -> (usize, usize) {
        let offset = self.offset_of(position);
        let old_width = std::mem::replace(&mut self.widths[position], new_width);
        (offset, old_width)
    }

    /// Records a move of one source position.
    ///
    /// Returns (old result offset, new result offset, width). The new
    /// offset is computed after the old span's removal, per the
    /// remove-before-insert tie-break.
    pub fn move_position(&mut self, from: usize, to: usize) -> (usize, usize, usize) {
        self.move_span(from, 1, to)
    }

    /// Records a move of `len` contiguous source positions.
    ///
    /// Same contract as `move_position`, with the width being the sum over
    /// the moved span.
    pub fn move_span(&mut self, from: usize, len: usize, to: usize) -> (usize, usize, usize) {
        assert!(
            from + len <= self.widths.len(),
            "structural violation: move of {} positions at {} with {} tracked widths",
            len,
            from,
            self.widths.len()
        );
        let old_offset = self.offset_of(from);
        let span: Vec<usize> = self.widths.drain(from..from + len).collect();
        let width: usize = span.iter().sum();
        let new_offset = self.offset_of(to);
        self.widths.splice(to..to, span);
        (old_offset, new_offset, width)
    }

    /// Drops all tracked widths; the caller re-derives the result.
    pub fn reset(&mut self) {
        self.widths.clear();
    }

    /// Replaces all widths from a fresh derivation.
    pub fn reset_with(&mut self, widths: Vec<usize>) {
        self.widths = widths;
    }

    /// Builds the result-space event for a move, or None when the moved
    /// span is empty in the result.
    pub fn translate_move(
        &mut self,
        from: usize,
        to: usize,
        items: Vec<vigil_core::Value>,
    ) -> Option<ListEvent> {
        let (old_offset, new_offset, width) = self.move_position(from, to);
        if width == 0 {
            return None;
        }
        debug_assert_eq!(items.len(), width);
        Some(ListEvent::Move {
            from: old_offset,
            to: new_offset,
            items,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::Value;

    fn ints(values: &[i64]) -> Vec<Value> {
        values.iter().map(|v| Value::Int64(*v)).collect()
    }

    #[test]
    fn test_offsets_sum_preceding_widths() {
        let translator = DiffTranslator::with_widths(vec![2, 0, 3, 1]);
        assert_eq!(translator.offset_of(0), 0);
        assert_eq!(translator.offset_of(1), 2);
        assert_eq!(translator.offset_of(2), 2);
        assert_eq!(translator.offset_of(3), 5);
        assert_eq!(translator.total_width(), 6);
    }

    #[test]
    fn test_insert_remove() {
        let mut translator = DiffTranslator::with_widths(vec![1, 1]);

        let offset = translator.insert(1, 3);
        assert_eq!(offset, 1);
        assert_eq!(translator.total_width(), 5);

        let (offset, width) = translator.remove(1);
        assert_eq!((offset, width), (1, 3));
        assert_eq!(translator.total_width(), 2);
    }

    #[test]
    fn test_replace_changes_width() {
        let mut translator = DiffTranslator::with_widths(vec![1, 1, 1]);
        let (offset, old) = translator.replace(1, 0);
        assert_eq!((offset, old), (1, 1));
        assert_eq!(translator.offset_of(2), 1);
    }

    #[test]
    fn test_move_forward_adjusts_for_removed_span() {
        // Source [[1,2],[3]]: widths [2,1]. Moving position 0 to 1 lands the
        // two-wide span after the one-wide span.
        let mut translator = DiffTranslator::with_widths(vec![2, 1]);
        let (old_offset, new_offset, width) = translator.move_position(0, 1);
        assert_eq!((old_offset, new_offset, width), (0, 1, 2));
    }

    #[test]
    fn test_move_backward() {
        // Source [[1,2],[3]]: moving position 1 to 0.
        let mut translator = DiffTranslator::with_widths(vec![2, 1]);
        let (old_offset, new_offset, width) = translator.move_position(1, 0);
        assert_eq!((old_offset, new_offset, width), (2, 0, 1));
    }

    #[test]
    fn test_translate_move_suppresses_empty_span() {
        let mut translator = DiffTranslator::with_widths(vec![0, 1]);
        assert!(translator.translate_move(0, 1, Vec::new()).is_none());
        // The width vector still reflects the reorder.
        assert_eq!(translator.width_at(1), 0);
    }

    #[test]
    fn test_translate_move_event() {
        let mut translator = DiffTranslator::with_widths(vec![2, 1]);
        let event = translator.translate_move(1, 0, ints(&[3])).unwrap();
        assert_eq!(
            event,
            ListEvent::Move {
                from: 2,
                to: 0,
                items: ints(&[3])
            }
        );
    }

    #[test]
    #[should_panic(expected = "structural violation")]
    fn test_offset_past_end_panics() {
        let translator = DiffTranslator::with_widths(vec![1]);
        translator.offset_of(3);
    }
}
