// ============================================================================
// GEOMETRY — canvas ↔ layer-local mapping, handle resize, rotation, scaling
// ============================================================================

/// Layers may never be resized below this edge length (canvas units).
pub const MIN_LAYER_SIZE: f32 = 20.0;

/// Pick radius for transform handles and path endpoints (canvas units).
pub const HANDLE_HIT_RADIUS: f32 = 8.0;

/// Distance of the rotation handle above the layer's top edge.
pub const ROTATE_HANDLE_OFFSET: f32 = 30.0;

/// A point in canvas or layer-local coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Point) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn offset(self, dx: f32, dy: f32) -> Point {
        Point::new(self.x + dx, self.y + dy)
    }
}

/// Transform handle identifiers, matching their compass positions on the
/// selection frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Handle {
    Nw,
    Ne,
    Se,
    Sw,
    N,
    S,
    E,
    W,
    Center,
    Rotate,
}

impl Handle {
    pub fn is_corner(self) -> bool {
        matches!(self, Handle::Nw | Handle::Ne | Handle::Se | Handle::Sw)
    }

    pub fn is_edge(self) -> bool {
        matches!(self, Handle::N | Handle::S | Handle::E | Handle::W)
    }
}

/// Position, size and rotation of a layer within the canvas.
///
/// `x, y` is the top-left of the *unrotated* bounding box; `rotation` is in
/// degrees and is applied about the box center. All transform math in the
/// engine — hit testing, rasterization, rendering — goes through the same
/// `center()` so the spaces can never drift apart.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Placement {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub rotation: f32,
}

impl Placement {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            rotation: 0.0,
        }
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Map a canvas-space point into this layer's local space.
    ///
    /// Local space is center-relative: `(0, 0)` is the layer center and the
    /// unrotated box spans `±width/2 × ±height/2`. Exact inverse of
    /// [`to_canvas`](Self::to_canvas).
    pub fn to_local(&self, p: Point) -> Point {
        let c = self.center();
        let dx = p.x - c.x;
        let dy = p.y - c.y;
        let rad = -self.rotation.to_radians();
        let (sin, cos) = rad.sin_cos();
        Point::new(dx * cos - dy * sin, dx * sin + dy * cos)
    }

    /// Map a local (center-relative) point back into canvas space.
    pub fn to_canvas(&self, l: Point) -> Point {
        let c = self.center();
        let rad = self.rotation.to_radians();
        let (sin, cos) = rad.sin_cos();
        Point::new(l.x * cos - l.y * sin + c.x, l.x * sin + l.y * cos + c.y)
    }

    /// Whether a local point lies inside the unrotated box.
    pub fn contains_local(&self, l: Point) -> bool {
        l.x >= -self.width / 2.0
            && l.x <= self.width / 2.0
            && l.y >= -self.height / 2.0
            && l.y <= self.height / 2.0
    }

    /// All transform handles in local coordinates.
    pub fn handle_positions(&self) -> [(Handle, Point); 10] {
        let hw = self.width / 2.0;
        let hh = self.height / 2.0;
        [
            (Handle::Nw, Point::new(-hw, -hh)),
            (Handle::Ne, Point::new(hw, -hh)),
            (Handle::Sw, Point::new(-hw, hh)),
            (Handle::Se, Point::new(hw, hh)),
            (Handle::N, Point::new(0.0, -hh)),
            (Handle::S, Point::new(0.0, hh)),
            (Handle::W, Point::new(-hw, 0.0)),
            (Handle::E, Point::new(hw, 0.0)),
            (Handle::Center, Point::new(0.0, 0.0)),
            (Handle::Rotate, Point::new(0.0, -hh - ROTATE_HANDLE_OFFSET)),
        ]
    }

    /// Which handle, if any, a canvas-space point grabs.
    pub fn handle_at(&self, p: Point) -> Option<Handle> {
        let local = self.to_local(p);
        for (handle, pos) in self.handle_positions() {
            if local.distance(pos) <= HANDLE_HIT_RADIUS {
                return Some(handle);
            }
        }
        None
    }

    /// Resize by dragging a corner or edge handle.
    ///
    /// `dx, dy` is the total pointer delta since the drag started and
    /// `original` is the placement captured at drag start — recomputing from
    /// the original keeps the opposite corner/edge pinned and makes the
    /// operation stable across a multi-selection (each layer resizes from
    /// its own anchor). Width and height floor at [`MIN_LAYER_SIZE`].
    pub fn resize_from_handle(&mut self, handle: Handle, dx: f32, dy: f32, original: &Placement) {
        match handle {
            Handle::Nw => {
                self.width = (original.width - dx).max(MIN_LAYER_SIZE);
                self.height = (original.height - dy).max(MIN_LAYER_SIZE);
                self.x = original.x + (original.width - self.width);
                self.y = original.y + (original.height - self.height);
            }
            Handle::Ne => {
                self.width = (original.width + dx).max(MIN_LAYER_SIZE);
                self.height = (original.height - dy).max(MIN_LAYER_SIZE);
                self.y = original.y + (original.height - self.height);
            }
            Handle::Sw => {
                self.width = (original.width - dx).max(MIN_LAYER_SIZE);
                self.height = (original.height + dy).max(MIN_LAYER_SIZE);
                self.x = original.x + (original.width - self.width);
            }
            Handle::Se => {
                self.width = (original.width + dx).max(MIN_LAYER_SIZE);
                self.height = (original.height + dy).max(MIN_LAYER_SIZE);
            }
            Handle::N => {
                self.height = (original.height - dy).max(MIN_LAYER_SIZE);
                self.y = original.y + (original.height - self.height);
            }
            Handle::S => {
                self.height = (original.height + dy).max(MIN_LAYER_SIZE);
            }
            Handle::W => {
                self.width = (original.width - dx).max(MIN_LAYER_SIZE);
                self.x = original.x + (original.width - self.width);
            }
            Handle::E => {
                self.width = (original.width + dx).max(MIN_LAYER_SIZE);
            }
            Handle::Center | Handle::Rotate => {}
        }
    }

    /// Rotation (degrees) implied by dragging the rotation handle to
    /// `cursor`. The +90° offset puts 0° when the handle sits straight
    /// above the layer; `snap` rounds to 15° increments.
    pub fn rotation_from_cursor(&self, cursor: Point, snap: bool) -> f32 {
        let c = self.center();
        let angle = (cursor.y - c.y).atan2(cursor.x - c.x);
        let mut rotation = (angle.to_degrees() + 90.0) % 360.0;
        if snap {
            rotation = (rotation / 15.0).round() * 15.0;
        }
        rotation
    }

    /// Scale width/height by `factor`, repositioning `x, y` so that
    /// `pivot`'s canvas-space position is unchanged. Passing the layer
    /// center reproduces a plain centered zoom.
    pub fn scale_around_pivot(&mut self, factor: f32, pivot: Point) {
        let old_w = self.width;
        let old_h = self.height;
        self.width = (old_w * factor).max(MIN_LAYER_SIZE);
        self.height = (old_h * factor).max(MIN_LAYER_SIZE);
        // Fractional position of the pivot inside the old box.
        let u = if old_w != 0.0 { (pivot.x - self.x) / old_w } else { 0.5 };
        let v = if old_h != 0.0 { (pivot.y - self.y) / old_h } else { 0.5 };
        self.x = pivot.x - u * self.width;
        self.y = pivot.y - v * self.height;
    }

    pub fn translate(&mut self, dx: f32, dy: f32) {
        self.x += dx;
        self.y += dy;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn placement(rotation: f32) -> Placement {
        Placement {
            x: 40.0,
            y: 60.0,
            width: 200.0,
            height: 120.0,
            rotation,
        }
    }

    #[test]
    fn local_canvas_roundtrip_across_rotations() {
        for rotation in [0.0, 17.5, 45.0, 90.0, 133.0, 180.0, 270.0, 359.0] {
            let pl = placement(rotation);
            for p in [
                Point::new(0.0, 0.0),
                Point::new(40.0, 60.0),
                Point::new(140.0, 120.0),
                Point::new(-33.0, 512.7),
            ] {
                let back = pl.to_canvas(pl.to_local(p));
                assert!(
                    (back.x - p.x).abs() < 1e-3 && (back.y - p.y).abs() < 1e-3,
                    "roundtrip drifted at rotation {rotation}: {p:?} -> {back:?}"
                );
            }
        }
    }

    #[test]
    fn center_maps_to_local_origin() {
        let pl = placement(73.0);
        let l = pl.to_local(pl.center());
        assert!(l.x.abs() < 1e-4 && l.y.abs() < 1e-4);
    }

    #[test]
    fn se_handle_grows_without_moving_origin() {
        let original = placement(0.0);
        let mut pl = original;
        pl.resize_from_handle(Handle::Se, 10.0, 10.0, &original);
        assert_eq!(pl.width, 210.0);
        assert_eq!(pl.height, 130.0);
        assert_eq!(pl.x, original.x);
        assert_eq!(pl.y, original.y);
    }

    #[test]
    fn nw_handle_shrinks_and_shifts_origin() {
        let original = placement(0.0);
        let mut pl = original;
        pl.resize_from_handle(Handle::Nw, 10.0, 10.0, &original);
        assert_eq!(pl.width, 190.0);
        assert_eq!(pl.height, 110.0);
        assert_eq!(pl.x, original.x + 10.0);
        assert_eq!(pl.y, original.y + 10.0);
    }

    #[test]
    fn resize_floors_at_minimum_size() {
        let original = placement(0.0);
        let mut pl = original;
        pl.resize_from_handle(Handle::Se, -1000.0, -1000.0, &original);
        assert_eq!(pl.width, MIN_LAYER_SIZE);
        assert_eq!(pl.height, MIN_LAYER_SIZE);
        // Opposite corner is still pinned.
        assert_eq!(pl.x, original.x);
        assert_eq!(pl.y, original.y);
    }

    #[test]
    fn edge_handles_resize_one_axis() {
        let original = placement(0.0);
        let mut pl = original;
        pl.resize_from_handle(Handle::E, 25.0, 99.0, &original);
        assert_eq!(pl.width, 225.0);
        assert_eq!(pl.height, original.height);

        let mut pl = original;
        pl.resize_from_handle(Handle::N, 99.0, 20.0, &original);
        assert_eq!(pl.height, 100.0);
        assert_eq!(pl.y, original.y + 20.0);
    }

    #[test]
    fn scale_keeps_pivot_fixed() {
        let mut pl = placement(0.0);
        let pivot = Point::new(100.0, 100.0);
        let local_before = ((pivot.x - pl.x) / pl.width, (pivot.y - pl.y) / pl.height);
        pl.scale_around_pivot(1.25, pivot);
        let local_after = ((pivot.x - pl.x) / pl.width, (pivot.y - pl.y) / pl.height);
        assert!((local_before.0 - local_after.0).abs() < 1e-4);
        assert!((local_before.1 - local_after.1).abs() < 1e-4);
    }

    #[test]
    fn rotation_handle_angle_snaps() {
        let pl = placement(0.0);
        let c = pl.center();
        // Straight above the center → 0°.
        let straight_up = Point::new(c.x, c.y - 100.0);
        assert!(pl.rotation_from_cursor(straight_up, false).abs() < 1e-3);
        // A couple of degrees off snaps back to 0 with snapping on.
        let slightly_off = Point::new(c.x + 4.0, c.y - 100.0);
        assert_eq!(pl.rotation_from_cursor(slightly_off, true), 0.0);
    }

    #[test]
    fn handle_hit_test_respects_rotation() {
        let pl = placement(90.0);
        // The NW corner in local space, pushed through the forward transform,
        // must be grabbable at its rotated canvas position.
        let nw_canvas = pl.to_canvas(Point::new(-pl.width / 2.0, -pl.height / 2.0));
        assert_eq!(pl.handle_at(nw_canvas), Some(Handle::Nw));
    }
}
