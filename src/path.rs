// ============================================================================
// SELECTION PATHS — anchors with owned bezier handles, in canvas space
// ============================================================================

use crate::geometry::{HANDLE_HIT_RADIUS, Point};
use crate::mask::MaskBlend;

/// One anchor of a selection path.
///
/// `cp1` is the incoming control point (used by the segment arriving at
/// this anchor), `cp2` the outgoing one. Both are absolute canvas-space
/// positions owned by the anchor — dragging the anchor moves them with it,
/// and no two anchors ever share a point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Anchor {
    pub pos: Point,
    pub cp1: Option<Point>,
    pub cp2: Option<Point>,
}

impl Anchor {
    /// A plain corner anchor (straight segments on both sides).
    pub fn new(pos: Point) -> Self {
        Self {
            pos,
            cp1: None,
            cp2: None,
        }
    }

    /// A smooth anchor whose handles mirror each other about `pos`,
    /// with the outgoing handle pointing at `toward`.
    pub fn with_symmetric_handles(pos: Point, toward: Point) -> Self {
        let mut anchor = Self::new(pos);
        anchor.set_symmetric_handles(toward);
        anchor
    }

    /// Re-aim both handles symmetrically at `toward` (drag-creation and
    /// the "reset handles" edit action).
    pub fn set_symmetric_handles(&mut self, toward: Point) {
        let dx = toward.x - self.pos.x;
        let dy = toward.y - self.pos.y;
        self.cp1 = Some(Point::new(self.pos.x - dx, self.pos.y - dy));
        self.cp2 = Some(Point::new(self.pos.x + dx, self.pos.y + dy));
    }

    /// Move the anchor, dragging its handles by the same delta.
    pub fn translate(&mut self, dx: f32, dy: f32) {
        self.pos = self.pos.offset(dx, dy);
        if let Some(cp) = self.cp1.as_mut() {
            *cp = cp.offset(dx, dy);
        }
        if let Some(cp) = self.cp2.as_mut() {
            *cp = cp.offset(dx, dy);
        }
    }

    pub fn is_smooth(&self) -> bool {
        self.cp1.is_some() || self.cp2.is_some()
    }
}

/// Which end of an open path a hit test landed on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathEnd {
    Start,
    End,
}

/// Which of an anchor's two handles a hit test landed on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlSide {
    In,
    Out,
}

/// A selection region under construction or awaiting rasterization.
///
/// Paths are treated as closed (filled) at rasterization time regardless
/// of `closed`; the flag only tracks whether the author explicitly closed
/// the outline while drawing.
#[derive(Clone, Debug, PartialEq)]
pub struct SelectionPath {
    pub anchors: Vec<Anchor>,
    pub blend: MaskBlend,
    pub closed: bool,
}

impl SelectionPath {
    pub fn new(blend: MaskBlend) -> Self {
        Self {
            anchors: Vec::new(),
            blend,
            closed: false,
        }
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    pub fn push(&mut self, anchor: Anchor) {
        self.anchors.push(anchor);
    }

    pub fn first(&self) -> Option<&Anchor> {
        self.anchors.first()
    }

    pub fn last(&self) -> Option<&Anchor> {
        self.anchors.last()
    }

    /// Hit test against the two endpoints (open-path resume points).
    pub fn endpoint_at(&self, p: Point) -> Option<PathEnd> {
        let first = self.first()?;
        if p.distance(first.pos) <= HANDLE_HIT_RADIUS {
            return Some(PathEnd::Start);
        }
        let last = self.last()?;
        if self.anchors.len() > 1 && p.distance(last.pos) <= HANDLE_HIT_RADIUS {
            return Some(PathEnd::End);
        }
        None
    }

    /// Index of the first anchor within pick radius of `p`.
    pub fn anchor_at(&self, p: Point) -> Option<usize> {
        self.anchors
            .iter()
            .position(|a| p.distance(a.pos) <= HANDLE_HIT_RADIUS)
    }

    /// First control point within pick radius of `p`.
    pub fn control_at(&self, p: Point) -> Option<(usize, ControlSide)> {
        for (i, anchor) in self.anchors.iter().enumerate() {
            if let Some(cp) = anchor.cp1 {
                if p.distance(cp) <= HANDLE_HIT_RADIUS {
                    return Some((i, ControlSide::In));
                }
            }
            if let Some(cp) = anchor.cp2 {
                if p.distance(cp) <= HANDLE_HIT_RADIUS {
                    return Some((i, ControlSide::Out));
                }
            }
        }
        None
    }
}
