use crate::page::mark::Mark;
use crate::types::identifiers::MarkIndex;

/// Collects the mark ranges that must stay in one piece: text objects,
/// pattern fills, form invocations and (in a second pass) runs of
/// transparency-affected marks.
///
/// Nesting is counted; only the outermost enter/exit pair produces a range.
#[derive(Debug, Default)]
pub struct AtomicRegionTracker {
    depth: u32,
    start: MarkIndex,
    regions: Vec<(MarkIndex, MarkIndex)>,
    unbalanced: u32,
}

impl AtomicRegionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Exits seen without a matching enter.
    pub fn unbalanced(&self) -> u32 {
        self.unbalanced
    }

    /// Open a region whose first mark is `first`.
    pub fn enter(&mut self, first: MarkIndex) {
        if self.depth == 0 {
            self.start = first;
        }
        self.depth += 1;
    }

    /// Close the innermost region; `next` is the index the next mark will get.
    /// Returns false for an exit with nothing open.
    pub fn exit(&mut self, next: MarkIndex) -> bool {
        match self.depth {
            0 => {
                self.unbalanced += 1;
                false
            }
            1 => {
                self.depth = 0;
                self.close(next);
                true
            }
            _ => {
                self.depth -= 1;
                true
            }
        }
    }

    fn close(&mut self, next: MarkIndex) {
        if next > self.start {
            self.regions.push((self.start, next - 1));
        }
    }

    /// Close whatever is still open at page end.
    pub fn finish(&mut self, next: MarkIndex) {
        if self.depth > 0 {
            self.depth = 0;
            self.close(next);
        }
    }

    /// Second pass: every run of consecutive composited marks is a region.
    pub fn add_composited_runs(&mut self, marks: &[Mark]) {
        let mut run: Option<MarkIndex> = None;
        for (index, mark) in marks.iter().enumerate() {
            let index = index as MarkIndex;
            match (mark.composited, run) {
                (true, None) => run = Some(index),
                (false, Some(start)) => {
                    self.regions.push((start, index - 1));
                    run = None;
                }
                _ => {}
            }
        }
        if let Some(start) = run {
            self.regions.push((start, marks.len() as MarkIndex - 1));
        }
    }

    /// Sorted, disjoint inclusive ranges; overlapping or nested ones are unioned.
    pub fn regions(&self) -> Vec<(MarkIndex, MarkIndex)> {
        let mut sorted = self.regions.clone();
        sorted.sort_unstable();
        let mut merged: Vec<(MarkIndex, MarkIndex)> = Vec::with_capacity(sorted.len());
        for (start, end) in sorted {
            match merged.last_mut() {
                Some(last) if start <= last.1 => last.1 = last.1.max(end),
                _ => merged.push((start, end)),
            }
        }
        merged
    }

    /// Flag region boundaries on the marks and return the ranges.
    pub fn apply(&self, marks: &mut [Mark]) -> Vec<(MarkIndex, MarkIndex)> {
        let regions = self.regions();
        for &(start, end) in &regions {
            if let Some(mark) = marks.get_mut(start as usize) {
                mark.region_start = true;
            }
            if let Some(mark) = marks.get_mut(end as usize) {
                mark.region_end = true;
            }
        }
        regions
    }
}
