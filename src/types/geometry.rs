use serde::{Deserialize, Serialize};

/// Axis-aligned device-space bounding box.
///
/// A box with no positive area is empty. Empty boxes never intersect anything,
/// so a mark that painted nothing never blocks a reorder.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BBox {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl BBox {
    pub const EMPTY: BBox = BBox {
        x0: 0.0,
        y0: 0.0,
        x1: 0.0,
        y1: 0.0,
    };

    /// Stands in for an extent nobody measured: intersects every non-empty box.
    pub const UNBOUNDED: BBox = BBox {
        x0: -f64::MAX,
        y0: -f64::MAX,
        x1: f64::MAX,
        y1: f64::MAX,
    };

    /// Build a box from two corners in any order.
    pub fn new(xa: f64, ya: f64, xb: f64, yb: f64) -> Self {
        BBox {
            x0: xa.min(xb),
            y0: ya.min(yb),
            x1: xa.max(xb),
            y1: ya.max(yb),
        }
    }

    pub fn is_empty(&self) -> bool {
        // NaN coordinates fail both comparisons and count as empty.
        !(self.x1 > self.x0 && self.y1 > self.y0)
    }

    pub fn area(&self) -> f64 {
        if self.is_empty() {
            0.0
        } else {
            (self.x1 - self.x0) * (self.y1 - self.y0)
        }
    }

    /// Conservative overlap test: boxes that merely touch count as
    /// intersecting, since anti-aliased edges can bleed across the seam.
    pub fn intersects(&self, other: &BBox) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        self.x0 <= other.x1 && other.x0 <= self.x1 && self.y0 <= other.y1 && other.y0 <= self.y1
    }

    pub fn union(&self, other: &BBox) -> BBox {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        BBox {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }
}
