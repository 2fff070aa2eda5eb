//! Dirty-Region Tracking
//!
//! Every canvas accumulates the regions touched since the last render flush.
//! The set is kept coalesced and non-overlapping so the renderer never
//! diffs the same cell twice.
//!
//! # Usage
//!
//! ```ignore
//! let mut dirty = DirtyRegions::new(Size::new(80, 24));
//! dirty.mark(Rect::new(5, 3, 4, 2));
//!
//! for rect in dirty.regions() {
//!     // Only diff cells in this region
//! }
//!
//! dirty.clear();
//! ```

use super::cell::{Rect, Size};

/// Above this many disjoint regions the set collapses to its bounding box
pub const MAX_REGIONS: usize = 32;

/// Coalesced set of dirty rectangles for one canvas
#[derive(Clone, Debug, Default)]
pub struct DirtyRegions {
    /// Non-overlapping dirty rects
    regions: Vec<Rect>,
    /// Area the regions are clipped to
    bounds: Rect,
    /// Whether the whole area is dirty (optimization for full redraws)
    full: bool,
}

impl DirtyRegions {
    /// Create an empty set clipped to `size`
    #[must_use]
    pub fn new(size: Size) -> Self {
        Self {
            regions: Vec::new(),
            bounds: size.bounds(),
            full: false,
        }
    }

    /// Mark a region dirty
    ///
    /// The rect is clipped to the tracked area. Overlapping regions are merged
    /// into their bounding box until no two regions overlap.
    pub fn mark(&mut self, rect: Rect) {
        if self.full {
            return;
        }

        let mut pending = rect.intersection(&self.bounds);
        if pending.is_empty() {
            return;
        }

        if pending == self.bounds {
            self.mark_all();
            return;
        }

        // Merging can grow the pending rect into regions it did not touch
        // before, so repeat until nothing overlaps.
        loop {
            let before = self.regions.len();
            self.regions.retain(|existing| {
                if existing.intersects(&pending) {
                    pending = pending.union(existing);
                    false
                } else {
                    true
                }
            });
            if self.regions.len() == before {
                break;
            }
        }
        self.regions.push(pending);

        if self.regions.len() > MAX_REGIONS {
            let bounding = self
                .regions
                .iter()
                .fold(Rect::default(), |acc, r| acc.union(r));
            self.regions.clear();
            self.regions.push(bounding);
        }
    }

    /// Mark the entire area dirty
    pub fn mark_all(&mut self) {
        self.full = true;
        self.regions.clear();
    }

    /// Current dirty regions
    #[must_use]
    pub fn regions(&self) -> Vec<Rect> {
        if self.full {
            if self.bounds.is_empty() {
                return Vec::new();
            }
            return vec![self.bounds];
        }
        self.regions.clone()
    }

    /// Take the dirty regions, leaving the set clean
    pub fn take(&mut self) -> Vec<Rect> {
        let regions = self.regions();
        self.clear();
        regions
    }

    /// Clear all dirty tracking (call after rendering)
    pub fn clear(&mut self) {
        self.regions.clear();
        self.full = false;
    }

    /// Check if any region is dirty
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        (self.full && !self.bounds.is_empty()) || !self.regions.is_empty()
    }

    /// Check if the entire area is marked dirty
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.full
    }

    /// Resize the tracked area
    ///
    /// This marks the entire new area as dirty.
    pub fn resize(&mut self, size: Size) {
        self.bounds = size.bounds();
        self.mark_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overlapping(regions: &[Rect]) -> bool {
        regions
            .iter()
            .enumerate()
            .any(|(i, a)| regions[i + 1..].iter().any(|b| a.intersects(b)))
    }

    #[test]
    fn test_new_is_clean() {
        let dirty = DirtyRegions::new(Size::new(10, 10));
        assert!(!dirty.is_dirty());
        assert!(dirty.regions().is_empty());
    }

    #[test]
    fn test_mark_clips_to_bounds() {
        let mut dirty = DirtyRegions::new(Size::new(10, 10));
        dirty.mark(Rect::new(8, 8, 5, 5));
        assert_eq!(dirty.regions(), vec![Rect::new(8, 8, 2, 2)]);
    }

    #[test]
    fn test_mark_outside_is_ignored() {
        let mut dirty = DirtyRegions::new(Size::new(10, 10));
        dirty.mark(Rect::new(20, 20, 5, 5));
        assert!(!dirty.is_dirty());
    }

    #[test]
    fn test_overlapping_regions_merge() {
        let mut dirty = DirtyRegions::new(Size::new(40, 40));
        dirty.mark(Rect::new(0, 0, 5, 5));
        dirty.mark(Rect::new(3, 3, 5, 5));
        assert_eq!(dirty.regions(), vec![Rect::new(0, 0, 8, 8)]);
    }

    #[test]
    fn test_disjoint_regions_stay_separate() {
        let mut dirty = DirtyRegions::new(Size::new(40, 40));
        dirty.mark(Rect::new(0, 0, 2, 2));
        dirty.mark(Rect::new(10, 10, 2, 2));
        assert_eq!(dirty.regions().len(), 2);
    }

    #[test]
    fn test_merge_cascades_until_disjoint() {
        let mut dirty = DirtyRegions::new(Size::new(40, 40));
        dirty.mark(Rect::new(4, 0, 2, 2));
        dirty.mark(Rect::new(0, 3, 6, 1));
        // Only touches the second region, but the merged box reaches the first.
        dirty.mark(Rect::new(0, 1, 1, 3));
        let regions = dirty.regions();
        assert!(!overlapping(&regions));
        assert_eq!(regions, vec![Rect::new(0, 0, 6, 4)]);
    }

    #[test]
    fn test_collapses_past_max_regions() {
        let mut dirty = DirtyRegions::new(Size::new(200, 200));
        for i in 0..=MAX_REGIONS as u16 {
            dirty.mark(Rect::cell(i * 3, i * 3));
        }
        assert_eq!(dirty.regions().len(), 1);
    }

    #[test]
    fn test_full_area_short_circuits() {
        let mut dirty = DirtyRegions::new(Size::new(10, 5));
        dirty.mark(Rect::new(0, 0, 50, 50));
        assert!(dirty.is_full());
        assert_eq!(dirty.regions(), vec![Rect::new(0, 0, 10, 5)]);
    }

    #[test]
    fn test_take_clears() {
        let mut dirty = DirtyRegions::new(Size::new(10, 10));
        dirty.mark(Rect::cell(1, 1));
        assert_eq!(dirty.take().len(), 1);
        assert!(!dirty.is_dirty());
    }

    #[test]
    fn test_resize_marks_all() {
        let mut dirty = DirtyRegions::new(Size::new(10, 10));
        dirty.resize(Size::new(4, 4));
        assert_eq!(dirty.regions(), vec![Rect::new(0, 0, 4, 4)]);
    }
}
