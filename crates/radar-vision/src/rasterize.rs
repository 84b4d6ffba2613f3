use geo::{Area, MultiPolygon, Polygon};
use tracing::debug;

use crate::error::GeometryError;
use crate::geo_raster::AffineMap;

/// Pixel coordinates closer than this to a grid line are snapped onto it, so
/// float noise from the affine round-trip can't push an edge into a neighbour cell.
const SNAP_EPSILON: f64 = 1e-6;

/// Boolean inclusion grid, row-major, same dimensions as the base image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelMask {
    width: u32,
    height: u32,
    cells: Vec<bool>,
}

impl PixelMask {
    /// All-false mask.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            cells: vec![false; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn get(&self, x: u32, y: u32) -> bool {
        self.cells[self.index(x, y)]
    }

    pub fn set(&mut self, x: u32, y: u32) {
        let i = self.index(x, y);
        self.cells[i] = true;
    }

    /// Row-major view, aligned with `RgbaImage::pixels()`.
    pub fn cells(&self) -> &[bool] {
        &self.cells
    }

    pub fn count(&self) -> usize {
        self.cells.iter().filter(|&&c| c).count()
    }

    pub fn is_full(&self) -> bool {
        self.cells.iter().all(|&c| c)
    }

    pub fn is_empty(&self) -> bool {
        !self.cells.iter().any(|&c| c)
    }

    fn index(&self, x: u32, y: u32) -> usize {
        debug_assert!(x < self.width && y < self.height);
        y as usize * self.width as usize + x as usize
    }
}

/// Rasterize a (multi-part) district geometry onto the map's pixel grid.
///
/// All parts are treated as one merged geometry. A pixel is set when the
/// geometry touches the open interior of its cell: either the cell center
/// lies inside a part, or a polygon edge crosses the cell. Contact only
/// along a grid line does not mark the neighbouring cell.
///
/// An empty polygon set yields an all-false mask.
pub fn rasterize(polygons: &MultiPolygon<f64>, map: &AffineMap) -> Result<PixelMask, GeometryError> {
    let mut mask = PixelMask::new(map.width(), map.height());
    if polygons.0.is_empty() {
        return Ok(mask);
    }
    validate(polygons)?;

    for polygon in &polygons.0 {
        let rings = project_rings(polygon, map);
        fill_interior(&mut mask, &rings);
        for ring in &rings {
            for edge in ring.windows(2) {
                mark_edge(&mut mask, edge[0], edge[1]);
            }
        }
    }

    debug!(
        "Rasterized {} part(s): {} of {} pixels set",
        polygons.0.len(),
        mask.count(),
        mask.cells.len()
    );
    Ok(mask)
}

fn validate(polygons: &MultiPolygon<f64>) -> Result<(), GeometryError> {
    let all_finite = polygons.0.iter().all(|p| {
        std::iter::once(p.exterior())
            .chain(p.interiors())
            .flat_map(|ring| ring.coords())
            .all(|c| c.x.is_finite() && c.y.is_finite())
    });
    if !all_finite {
        return Err(GeometryError::Degenerate("non-finite coordinate".into()));
    }
    if polygons.unsigned_area() <= 0.0 {
        return Err(GeometryError::Degenerate("zero area".into()));
    }
    Ok(())
}

/// Exterior and interior rings of one part, in snapped pixel coordinates.
fn project_rings(polygon: &Polygon<f64>, map: &AffineMap) -> Vec<Vec<(f64, f64)>> {
    std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .map(|ring| {
            ring.coords()
                .map(|c| {
                    let (x, y) = map.geo_to_pixel(c.x, c.y);
                    (snap(x), snap(y))
                })
                .collect()
        })
        .collect()
}

fn snap(v: f64) -> f64 {
    let r = v.round();
    if (v - r).abs() < SNAP_EPSILON {
        r
    } else {
        v
    }
}

fn on_grid_line(v: f64) -> bool {
    (v - v.round()).abs() < 1e-9
}

/// Even-odd scanline fill sampled at pixel centers. Holes fall out of the
/// even-odd rule since interior rings contribute their own crossings.
fn fill_interior(mask: &mut PixelMask, rings: &[Vec<(f64, f64)>]) {
    let (w, h) = (mask.width as i64, mask.height as i64);

    let (min_y, max_y) = rings
        .iter()
        .flatten()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &(_, y)| {
            (lo.min(y), hi.max(y))
        });
    let first_row = ((min_y - 0.5).ceil() as i64).max(0);
    let last_row = ((max_y - 0.5).floor() as i64).min(h - 1);

    let mut crossings = Vec::new();
    for row in first_row..=last_row {
        let yc = row as f64 + 0.5;
        crossings.clear();
        for ring in rings {
            for edge in ring.windows(2) {
                let ((x0, y0), (x1, y1)) = (edge[0], edge[1]);
                if (y0 <= yc) != (y1 <= yc) {
                    crossings.push(x0 + (yc - y0) * (x1 - x0) / (y1 - y0));
                }
            }
        }
        crossings.sort_by(f64::total_cmp);

        for span in crossings.chunks_exact(2) {
            // Columns whose center c + 0.5 lies in [span[0], span[1])
            let start = ((span[0] - 0.5).ceil() as i64).max(0);
            let end = ((span[1] - 0.5).ceil() as i64).min(w);
            for col in start..end {
                mask.set(col as u32, row as u32);
            }
        }
    }
}

/// Mark every cell whose open interior the segment `a -> b` passes through.
fn mark_edge(mask: &mut PixelMask, a: (f64, f64), b: (f64, f64)) {
    let (w, h) = (mask.width as f64, mask.height as f64);
    let Some((t_start, t_end)) = clip_segment(a, b, w, h) else {
        return;
    };

    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let at = |t: f64| (a.0 + t * dx, a.1 + t * dy);

    // Parameters where the segment crosses a grid line split it into pieces
    // that each sit inside exactly one cell (or run along a grid line).
    let mut breaks = vec![t_start, t_end];
    for (origin, delta) in [(a.0, dx), (a.1, dy)] {
        if delta == 0.0 {
            continue;
        }
        let (p, q) = (origin + t_start * delta, origin + t_end * delta);
        let (lo, hi) = if p < q { (p, q) } else { (q, p) };
        for line in (lo.floor() as i64 + 1)..=(hi.ceil() as i64 - 1) {
            breaks.push((line as f64 - origin) / delta);
        }
    }
    breaks.sort_by(f64::total_cmp);

    for piece in breaks.windows(2) {
        if piece[1] - piece[0] <= f64::EPSILON {
            continue;
        }
        let (mx, my) = at((piece[0] + piece[1]) / 2.0);
        if on_grid_line(mx) || on_grid_line(my) {
            continue;
        }
        let (col, row) = (mx.floor(), my.floor());
        if col >= 0.0 && row >= 0.0 && col < w && row < h {
            mask.set(col as u32, row as u32);
        }
    }
}

/// Liang–Barsky clip of `a -> b` against `[0, w] x [0, h]`, as a parameter range.
fn clip_segment(a: (f64, f64), b: (f64, f64), w: f64, h: f64) -> Option<(f64, f64)> {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let mut t0 = 0.0f64;
    let mut t1 = 1.0f64;

    for (p, q) in [(-dx, a.0), (dx, w - a.0), (-dy, a.1), (dy, h - a.1)] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let t = q / p;
        if p < 0.0 {
            if t > t1 {
                return None;
            }
            t0 = t0.max(t);
        } else {
            if t < t0 {
                return None;
            }
            t1 = t1.min(t);
        }
    }
    Some((t0, t1))
}
