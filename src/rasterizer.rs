// ============================================================================
// RASTERIZER — closed vector regions → layer-local alpha masks
// ============================================================================
//
// Two stages, mirroring the draw pipeline run backwards:
//   1. fill the region into a canvas-sized alpha plane (255 inside, 0 out)
//      with a nonzero-winding scanline fill;
//   2. gather-resample that plane into the target layer's local pixel grid
//      by pushing each local pixel through the layer's forward transform
//      and bilinear-sampling the plane at the landing point.

use rayon::prelude::*;

use crate::geometry::{Placement, Point};
use crate::mask::RasterMask;
use crate::path::SelectionPath;

/// Line segments per cubic bezier span when flattening.
const BEZIER_STEPS: usize = 24;

/// Flatten one path into a closed polygon outline.
///
/// A span between consecutive anchors becomes a cubic bezier only when the
/// departing anchor supplies an outgoing handle *and* the arriving anchor an
/// incoming one; otherwise it is a straight edge. The outline is implicitly
/// closed from the last anchor back to the first.
fn flatten(path: &SelectionPath) -> Vec<Point> {
    let mut poly: Vec<Point> = Vec::new();
    let anchors = &path.anchors;
    if anchors.is_empty() {
        return poly;
    }

    poly.push(anchors[0].pos);
    for i in 1..anchors.len() {
        let prev = &anchors[i - 1];
        let cur = &anchors[i];
        match (prev.cp2, cur.cp1) {
            (Some(c1), Some(c2)) => flatten_cubic(prev.pos, c1, c2, cur.pos, &mut poly),
            _ => poly.push(cur.pos),
        }
    }
    poly
}

/// Append samples of a cubic bezier (excluding its start point, which the
/// caller already emitted).
fn flatten_cubic(p0: Point, c1: Point, c2: Point, p1: Point, out: &mut Vec<Point>) {
    for step in 1..=BEZIER_STEPS {
        let t = step as f32 / BEZIER_STEPS as f32;
        let u = 1.0 - t;
        let w0 = u * u * u;
        let w1 = 3.0 * u * u * t;
        let w2 = 3.0 * u * t * t;
        let w3 = t * t * t;
        out.push(Point::new(
            w0 * p0.x + w1 * c1.x + w2 * c2.x + w3 * p1.x,
            w0 * p0.y + w1 * c1.y + w2 * c2.y + w3 * p1.y,
        ));
    }
}

/// A directed polygon edge prepared for scanline intersection.
struct Edge {
    y_min: f32,
    y_max: f32,
    // x at y_min, plus slope dx/dy
    x_at_min: f32,
    inv_slope: f32,
    /// +1 for a downward edge, -1 for upward (nonzero winding).
    winding: i32,
}

fn collect_edges(polygons: &[Vec<Point>]) -> Vec<Edge> {
    let mut edges = Vec::new();
    for poly in polygons {
        if poly.len() < 2 {
            continue;
        }
        for i in 0..poly.len() {
            let a = poly[i];
            let b = poly[(i + 1) % poly.len()]; // implicit closing edge
            if a.y == b.y {
                continue; // horizontal edges never cross a scanline
            }
            let (top, bottom, winding) = if a.y < b.y { (a, b, 1) } else { (b, a, -1) };
            edges.push(Edge {
                y_min: top.y,
                y_max: bottom.y,
                x_at_min: top.x,
                inv_slope: (bottom.x - top.x) / (bottom.y - top.y),
                winding,
            });
        }
    }
    edges
}

/// Fill one or more closed regions into a canvas-sized alpha plane.
///
/// Samples at pixel centers with the nonzero winding rule (the rule the
/// original capture surface used), so overlapping sub-paths of one group
/// union rather than cancel. Returns a row-major `width * height` buffer
/// with 255 inside and 0 outside.
pub fn fill_paths(paths: &[&SelectionPath], width: u32, height: u32) -> Vec<u8> {
    let mut plane = vec![0u8; (width as usize) * (height as usize)];
    let polygons: Vec<Vec<Point>> = paths.iter().map(|&p| flatten(p)).collect();
    let edges = collect_edges(&polygons);
    if edges.is_empty() {
        return plane;
    }

    let w = width as usize;
    plane
        .par_chunks_mut(w)
        .enumerate()
        .for_each(|(y, row)| {
            let sy = y as f32 + 0.5;
            // (x crossing, winding delta) for every edge this scanline cuts
            let mut crossings: Vec<(f32, i32)> = edges
                .iter()
                .filter(|e| sy >= e.y_min && sy < e.y_max)
                .map(|e| (e.x_at_min + (sy - e.y_min) * e.inv_slope, e.winding))
                .collect();
            if crossings.is_empty() {
                return;
            }
            crossings.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut winding = 0;
            for pair in crossings.windows(2) {
                winding += pair[0].1;
                if winding != 0 {
                    // Span between these two crossings is inside.
                    let x0 = pair[0].0;
                    let x1 = pair[1].0;
                    let start = (x0 - 0.5).ceil().max(0.0) as usize;
                    let end = ((x1 - 0.5).floor() as i64 + 1).clamp(0, w as i64) as usize;
                    if start < end {
                        row[start..end].fill(255);
                    }
                }
            }
        });
    plane
}

/// Rasterize a group of canvas-space selection paths into a mask expressed
/// in `placement`'s local pixel grid.
///
/// The mask is sized to the rounded displayed dimensions. A region entirely
/// outside the layer's footprint yields an all-zero mask of those
/// dimensions — a valid result, not an error. Degenerate paths are expected
/// to have been rejected by the capture tools before reaching this point.
pub fn rasterize_paths(
    paths: &[&SelectionPath],
    canvas_width: u32,
    canvas_height: u32,
    placement: &Placement,
) -> RasterMask {
    let mask_w = (placement.width.round().max(1.0)) as u32;
    let mask_h = (placement.height.round().max(1.0)) as u32;
    let plane = fill_paths(paths, canvas_width, canvas_height);
    resample_plane_to_local(&plane, canvas_width, canvas_height, placement, mask_w, mask_h)
}

/// Convenience wrapper for a single path.
pub fn rasterize_path(
    path: &SelectionPath,
    canvas_width: u32,
    canvas_height: u32,
    placement: &Placement,
) -> RasterMask {
    rasterize_paths(&[path], canvas_width, canvas_height, placement)
}

/// Stage 2: undo the layer's draw transform by gathering. Each local mask
/// pixel maps through rotate(rotation) + translate(center) into canvas
/// space, where the filled plane is bilinear-sampled (0 outside).
fn resample_plane_to_local(
    plane: &[u8],
    canvas_width: u32,
    canvas_height: u32,
    placement: &Placement,
    mask_w: u32,
    mask_h: u32,
) -> RasterMask {
    let mut data = vec![0.0f32; (mask_w as usize) * (mask_h as usize)];
    let half_w = mask_w as f32 / 2.0;
    let half_h = mask_h as f32 / 2.0;

    data.par_chunks_mut(mask_w as usize)
        .enumerate()
        .for_each(|(ly, row)| {
            for (lx, value) in row.iter_mut().enumerate() {
                // Pixel center, relative to the layer center.
                let local = Point::new(lx as f32 + 0.5 - half_w, ly as f32 + 0.5 - half_h);
                let canvas = placement.to_canvas(local);
                *value = sample_plane(plane, canvas_width, canvas_height, canvas.x, canvas.y);
            }
        });

    RasterMask::from_vec(mask_w, mask_h, data).expect("buffer sized to mask dimensions")
}

/// Bilinear sample of the alpha plane at fractional canvas coordinates,
/// normalized to [0, 1]; outside the canvas → 0.
fn sample_plane(plane: &[u8], width: u32, height: u32, x: f32, y: f32) -> f32 {
    let fx = x - 0.5;
    let fy = y - 0.5;
    let x0 = fx.floor();
    let y0 = fy.floor();
    let wx = fx - x0;
    let wy = fy - y0;

    let tap = |ix: i64, iy: i64| -> f32 {
        if ix < 0 || iy < 0 || ix >= width as i64 || iy >= height as i64 {
            0.0
        } else {
            plane[(iy as usize) * (width as usize) + ix as usize] as f32 / 255.0
        }
    };

    let x0 = x0 as i64;
    let y0 = y0 as i64;
    let top = tap(x0, y0) * (1.0 - wx) + tap(x0 + 1, y0) * wx;
    let bottom = tap(x0, y0 + 1) * (1.0 - wx) + tap(x0 + 1, y0 + 1) * wx;
    top * (1.0 - wy) + bottom * wy
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::MaskBlend;
    use crate::path::Anchor;

    fn polygon(points: &[(f32, f32)]) -> SelectionPath {
        let mut path = SelectionPath::new(MaskBlend::New);
        for &(x, y) in points {
            path.push(Anchor::new(Point::new(x, y)));
        }
        path
    }

    #[test]
    fn rectangle_fills_its_interior_only() {
        let path = polygon(&[(2.0, 2.0), (8.0, 2.0), (8.0, 6.0), (2.0, 6.0)]);
        let plane = fill_paths(&[&path], 10, 10);
        assert_eq!(plane[4 * 10 + 5], 255); // inside
        assert_eq!(plane[4 * 10 + 1], 0); // left of region
        assert_eq!(plane[0], 0); // corner
        assert_eq!(plane[8 * 10 + 5], 0); // below region
    }

    #[test]
    fn unclosed_outline_fills_as_if_closed() {
        // Only three edges supplied; the implicit close completes the square.
        let path = polygon(&[(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)]);
        let plane = fill_paths(&[&path], 10, 10);
        assert!(plane.iter().all(|&v| v == 255));
    }

    #[test]
    fn region_outside_layer_footprint_is_all_zero() {
        let path = polygon(&[(200.0, 200.0), (240.0, 200.0), (240.0, 240.0), (200.0, 240.0)]);
        let placement = Placement::new(0.0, 0.0, 64.0, 48.0);
        let mask = rasterize_path(&path, 256, 256, &placement);
        assert_eq!(mask.dimensions(), (64, 48));
        assert!(mask.is_all_zero());
    }

    #[test]
    fn left_half_selection_covers_left_half_of_layer() {
        // 100×100 layer at the origin, region tracing the left half of
        // the canvas.
        let path = polygon(&[(0.0, 0.0), (50.0, 0.0), (50.0, 100.0), (0.0, 100.0)]);
        let placement = Placement::new(0.0, 0.0, 100.0, 100.0);
        let mask = rasterize_path(&path, 100, 100, &placement);
        for y in (5..95).step_by(10) {
            for x in (0..100).step_by(5) {
                let v = mask.get(x, y);
                if x < 48 {
                    assert!(v > 0.9, "expected coverage at ({x}, {y}), got {v}");
                } else if x > 52 {
                    assert!(v < 0.1, "expected none at ({x}, {y}), got {v}");
                }
            }
        }
    }

    #[test]
    fn rotated_layer_sees_selection_in_its_own_frame() {
        // A canvas-axis-aligned band over the middle of a 90°-rotated
        // square layer must land axis-aligned in local space too (a 90°
        // rotation maps the canvas band onto a local band).
        let path = polygon(&[(40.0, 0.0), (60.0, 0.0), (60.0, 100.0), (40.0, 100.0)]);
        let mut placement = Placement::new(0.0, 0.0, 100.0, 100.0);
        placement.rotation = 90.0;
        let mask = rasterize_path(&path, 100, 100, &placement);
        // The vertical canvas band crosses the rotated layer as a band in
        // local y (canvas x maps to local y under the inverse rotation).
        assert!(mask.get(10, 50) > 0.9);
        assert!(mask.get(90, 50) > 0.9);
        assert!(mask.get(50, 10) < 0.1);
        assert!(mask.get(50, 90) < 0.1);
    }

    #[test]
    fn bezier_segment_bulges_beyond_the_chord() {
        // Straight triangle vs the same with a bulging bezier top edge:
        // the curve must add coverage above the chord midpoint.
        let mut curved = SelectionPath::new(MaskBlend::New);
        let mut start = Anchor::new(Point::new(10.0, 50.0));
        start.cp2 = Some(Point::new(30.0, 0.0));
        let mut end = Anchor::new(Point::new(90.0, 50.0));
        end.cp1 = Some(Point::new(70.0, 0.0));
        curved.push(start);
        curved.push(end);
        curved.push(Anchor::new(Point::new(50.0, 90.0)));

        let placement = Placement::new(0.0, 0.0, 100.0, 100.0);
        let mask = rasterize_path(&curved, 100, 100, &placement);
        // Well above the chord y=50, under the bezier bulge.
        assert!(mask.get(50, 30) > 0.9);
        // The flat version would not reach up there.
        let flat = polygon(&[(10.0, 50.0), (90.0, 50.0), (50.0, 90.0)]);
        let flat_mask = rasterize_path(&flat, 100, 100, &placement);
        assert!(flat_mask.get(50, 30) < 0.1);
    }

    #[test]
    fn two_disjoint_subpaths_union_under_nonzero_winding() {
        let a = polygon(&[(0.0, 0.0), (20.0, 0.0), (20.0, 20.0), (0.0, 20.0)]);
        let b = polygon(&[(40.0, 40.0), (60.0, 40.0), (60.0, 60.0), (40.0, 60.0)]);
        let plane = fill_paths(&[&a, &b], 64, 64);
        assert_eq!(plane[10 * 64 + 10], 255);
        assert_eq!(plane[50 * 64 + 50], 255);
        assert_eq!(plane[30 * 64 + 30], 0);
    }
}
