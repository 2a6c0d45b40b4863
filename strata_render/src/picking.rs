//! Selection-buffer picking on the CPU.
//!
//! While a pick is active, draws are not submitted. Each primitive is transformed by
//! pick * projection * model-view, clipped against the pick volume in homogeneous space, and the
//! window depth range of whatever survives is merged into the hit record of the current name
//! stack state. A new record starts whenever the name stack changes, as selection mode does on
//! a fixed-function pipeline.

use crate::backend::ViewportRect;
use crate::error::{Result, StateStackUnderflowErr};
use crate::math::{Mat4, Vec3, Vec4};
use crate::primitive::{Primitive, PrimitiveMode};
use crate::static_buffer::StaticGeometry;
use snafu::OptionExt;
use tracing::warn;

pub type PickName = i32;

/// Name of things that must never win a pick.
pub const NO_NAME: PickName = -1;

/// Builds the name interaction code uses for entity `index` of a category.
pub fn encode_pick_name(category_base: PickName, offset: PickName, index: usize) -> PickName {
    category_base + offset + index as PickName
}

/// Inverse of [`encode_pick_name`]. `None` for names below the category range.
pub fn decode_pick_name(name: PickName, category_base: PickName, offset: PickName) -> Option<usize> {
    if name == NO_NAME {
        return None;
    }
    let index = name.checked_sub(category_base)?.checked_sub(offset)?;
    usize::try_from(index).ok()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameStack {
    names: Vec<PickName>,
}

impl NameStack {
    /// Resets to a single unnamed entry.
    pub fn init(&mut self) {
        self.names.clear();
        self.names.push(NO_NAME);
    }

    /// Replaces the top of the stack.
    pub fn load(&mut self, name: PickName) {
        match self.names.last_mut() {
            Some(top) => *top = name,
            None => self.names.push(name),
        }
    }

    pub fn push(&mut self, name: PickName) {
        self.names.push(name);
    }

    pub fn pop(&mut self) -> Result<PickName> {
        self.names
            .pop()
            .context(StateStackUnderflowErr { stack: "name" })
    }

    /// Marks whatever is drawn next as unpickable.
    pub fn end(&mut self) {
        self.load(NO_NAME);
    }

    pub fn top(&self) -> PickName {
        self.names.last().copied().unwrap_or(NO_NAME)
    }

    pub fn depth(&self) -> usize {
        self.names.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitRecord {
    pub stack_depth: u32,
    /// Window depth in `[0, 1]`.
    pub min_depth: f32,
    pub max_depth: f32,
    pub name: PickName,
}

/// Nearest named record. Unnamed records never win, even when they are in front.
pub fn resolve_pick(records: &[HitRecord]) -> PickName {
    let mut best: Option<&HitRecord> = None;
    for record in records.iter().filter(|r| r.name != NO_NAME) {
        if best.is_none_or(|b| record.min_depth < b.min_depth) {
            best = Some(record);
        }
    }
    best.map_or(NO_NAME, |r| r.name)
}

/// Caller-owned hit buffer and pick volume of one picking pass.
#[derive(Debug, Clone)]
pub struct PickingContext {
    records: Vec<HitRecord>,
    capacity: usize,
    pending: Option<HitRecord>,
    pick_matrix: Mat4,
    overflowed: bool,
}

impl Default for PickingContext {
    fn default() -> Self {
        Self::with_capacity(64)
    }
}

impl PickingContext {
    /// `expected_hits` is the largest overlap count the caller expects. More hits are kept,
    /// but logged.
    pub fn with_capacity(expected_hits: usize) -> Self {
        PickingContext {
            records: Vec::with_capacity(expected_hits),
            capacity: expected_hits,
            pending: None,
            pick_matrix: Mat4::identity(),
            overflowed: false,
        }
    }

    pub(crate) fn begin(&mut self, viewport: ViewportRect, x: f32, y: f32, region: f32) {
        self.reset();
        // window coordinates grow downwards, GL viewports upwards
        let y = viewport.height as f32 - y;
        self.pick_matrix = pick_matrix(x, y, region, region, viewport);
    }

    pub fn reset(&mut self) {
        self.records.clear();
        self.pending = None;
        self.overflowed = false;
        self.pick_matrix = Mat4::identity();
    }

    pub fn pick_matrix(&self) -> &Mat4 {
        &self.pick_matrix
    }

    pub fn records(&self) -> &[HitRecord] {
        &self.records
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Nearest named object, [`NO_NAME`] if nothing was hit.
    pub fn picked_object(&self) -> PickName {
        resolve_pick(&self.records)
    }

    /// Closes the record of the current name stack state.
    pub(crate) fn flush(&mut self) {
        let Some(record) = self.pending.take() else {
            return;
        };
        if self.records.len() == self.capacity && !self.overflowed {
            warn!(
                capacity = self.capacity,
                "Pick hit buffer exceeded its expected capacity"
            );
            self.overflowed = true;
        }
        self.records.push(record);
    }

    fn hit(&mut self, names: &NameStack, min_depth: f32, max_depth: f32) {
        match &mut self.pending {
            Some(record) => {
                record.min_depth = record.min_depth.min(min_depth);
                record.max_depth = record.max_depth.max(max_depth);
            }
            None => {
                self.pending = Some(HitRecord {
                    stack_depth: names.depth() as u32,
                    min_depth,
                    max_depth,
                    name: names.top(),
                })
            }
        }
    }

    /// Records the primitives of `geometry` that reach the pick volume.
    ///
    /// `mvp` must already include the pick matrix.
    pub(crate) fn record_geometry(
        &mut self,
        geometry: &StaticGeometry,
        mvp: &Mat4,
        mode: PrimitiveMode,
        names: &NameStack,
    ) -> usize {
        let clip: Vec<Vec4> = (0..geometry.vertex_count())
            .map(|v| mvp * geometry.position(v).push(1.0))
            .collect();
        let vertex = |element: u32| clip[geometry.element(element) as usize];

        let mut hits = 0;
        for primitive in mode.assemble(geometry.element_count()) {
            let polygon = match primitive {
                Primitive::Point(a) => vec![vertex(a)],
                Primitive::Line(a, b) => vec![vertex(a), vertex(b)],
                Primitive::Triangle(a, b, c) => vec![vertex(a), vertex(b), vertex(c)],
            };
            if let Some((lo, hi)) = depth_range(&clip_to_volume(polygon)) {
                self.hit(names, lo, hi);
                hits += 1;
            }
        }
        hits
    }
}

/// `gluPickMatrix`: maps a `width` x `height` region centred on window point (x, y) to the
/// whole clip volume.
pub fn pick_matrix(x: f32, y: f32, width: f32, height: f32, viewport: ViewportRect) -> Mat4 {
    if width <= 0.0 || height <= 0.0 {
        return Mat4::identity();
    }
    let vw = viewport.width as f32;
    let vh = viewport.height as f32;
    let translate = Vec3::new(
        (vw - 2.0 * (x - viewport.x as f32)) / width,
        (vh - 2.0 * (y - viewport.y as f32)) / height,
        0.0,
    );
    Mat4::new_translation(&translate) * Mat4::new_nonuniform_scaling(&Vec3::new(vw / width, vh / height, 1.0))
}

/// Signed distances to the six clip planes `-w <= x, y, z <= w`.
const CLIP_PLANES: [fn(&Vec4) -> f32; 6] = [
    |v| v.w + v.x,
    |v| v.w - v.x,
    |v| v.w + v.y,
    |v| v.w - v.y,
    |v| v.w + v.z,
    |v| v.w - v.z,
];

/// Sutherland-Hodgman in homogeneous coordinates. Works for points, segments and polygons.
fn clip_to_volume(mut polygon: Vec<Vec4>) -> Vec<Vec4> {
    for plane in CLIP_PLANES {
        if polygon.is_empty() {
            break;
        }
        if polygon.len() == 1 {
            if plane(&polygon[0]) < 0.0 {
                polygon.clear();
            }
            continue;
        }

        let closed = polygon.len() > 2;
        let edges = if closed { polygon.len() } else { 1 };
        let mut output = Vec::with_capacity(polygon.len() + 2);

        for i in 0..edges {
            let a = polygon[i];
            let b = polygon[(i + 1) % polygon.len()];
            let (da, db) = (plane(&a), plane(&b));

            if !closed && da >= 0.0 {
                output.push(a);
            }
            if (da >= 0.0) != (db >= 0.0) {
                let t = da / (da - db);
                output.push(a + (b - a) * t);
            }
            if db >= 0.0 {
                output.push(b);
            }
        }
        polygon = output;
    }
    polygon
}

/// Window depth range of clipped vertices, `None` if nothing survived.
fn depth_range(vertices: &[Vec4]) -> Option<(f32, f32)> {
    vertices
        .iter()
        .filter(|v| v.w > f32::EPSILON)
        .map(|v| ((v.z / v.w + 1.0) * 0.5).clamp(0.0, 1.0))
        .fold(None, |acc, z| match acc {
            None => Some((z, z)),
            Some((lo, hi)) => Some((f32::min(lo, z), f32::max(hi, z))),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::static_buffer::StaticBufferDesc;
    use crate::vertex_layout::VertexLayout;

    fn record(name: PickName, min_depth: f32) -> HitRecord {
        HitRecord {
            stack_depth: 1,
            min_depth,
            max_depth: min_depth,
            name,
        }
    }

    #[test]
    fn no_records_picks_nothing() {
        assert_eq!(resolve_pick(&[]), NO_NAME);
    }

    #[test]
    fn nearest_named_record_wins() {
        let records = [record(9, 0.8), record(5, 0.2), record(7, 0.5)];
        assert_eq!(resolve_pick(&records), 5);
    }

    #[test]
    fn unnamed_record_never_wins() {
        let records = [record(NO_NAME, 0.1), record(4, 0.6)];
        assert_eq!(resolve_pick(&records), 4);
        assert_eq!(resolve_pick(&[record(NO_NAME, 0.1)]), NO_NAME);
    }

    #[test]
    fn ties_keep_first_record() {
        let records = [record(3, 0.4), record(8, 0.4), record(1, 0.4)];
        assert_eq!(resolve_pick(&records), 3);
    }

    #[test]
    fn name_stack_protocol() {
        let mut names = NameStack::default();
        assert_eq!(names.top(), NO_NAME);

        names.init();
        names.load(12);
        assert_eq!(names.top(), 12);
        names.push(3);
        assert_eq!((names.top(), names.depth()), (3, 2));
        assert_eq!(names.pop().unwrap(), 3);
        names.end();
        assert_eq!(names.top(), NO_NAME);

        names.pop().unwrap();
        assert!(names.pop().is_err());
    }

    #[test]
    fn pick_names_round_trip() {
        let name = encode_pick_name(1000, 20, 7);
        assert_eq!(name, 1027);
        assert_eq!(decode_pick_name(name, 1000, 20), Some(7));
        assert_eq!(decode_pick_name(1010, 1000, 20), None);
        assert_eq!(decode_pick_name(NO_NAME, -5, 0), None);
    }

    #[test]
    fn pick_matrix_centres_region() {
        let viewport = ViewportRect {
            x: 0,
            y: 0,
            width: 800,
            height: 600,
        };
        let m = pick_matrix(400.0, 300.0, 2.0, 2.0, viewport);

        let centre = m * Vec4::new(0.0, 0.0, 0.5, 1.0);
        assert!(centre.x.abs() < 1e-5 && centre.y.abs() < 1e-5);
        assert_eq!(centre.z, 0.5);

        // one pixel to the right of the centre is the edge of a 2px region
        let edge = m * Vec4::new(2.0 / 800.0, 0.0, 0.0, 1.0);
        assert!((edge.x - 1.0).abs() < 1e-4);
    }

    #[test]
    fn clipping_keeps_only_the_pick_volume() {
        let inside = clip_to_volume(vec![Vec4::new(0.0, 0.0, 0.0, 1.0)]);
        assert_eq!(inside.len(), 1);
        assert!(clip_to_volume(vec![Vec4::new(2.0, 0.0, 0.0, 1.0)]).is_empty());

        let triangle = vec![
            Vec4::new(-3.0, -1.0, 0.0, 1.0),
            Vec4::new(3.0, -1.0, 0.0, 1.0),
            Vec4::new(0.0, 5.0, 0.0, 1.0),
        ];
        let clipped = clip_to_volume(triangle);
        assert!(clipped.len() >= 3);
        assert!(clipped.iter().all(|v| v.x.abs() <= 1.0 + 1e-5 && v.y.abs() <= 1.0 + 1e-5));

        let segment = clip_to_volume(vec![Vec4::new(-4.0, 0.0, 0.0, 1.0), Vec4::new(4.0, 0.0, 0.0, 1.0)]);
        assert_eq!(segment.len(), 2);
        assert!((segment[0].x + 1.0).abs() < 1e-5);
        assert!((segment[1].x - 1.0).abs() < 1e-5);
    }

    #[test]
    fn depth_range_spans_clipped_polygon() {
        let sloped = clip_to_volume(vec![
            Vec4::new(-1.0, -1.0, -1.0, 1.0),
            Vec4::new(1.0, -1.0, 1.0, 1.0),
            Vec4::new(0.0, 1.0, 0.0, 1.0),
        ]);
        let (lo, hi) = depth_range(&sloped).unwrap();
        assert!(lo.abs() < 1e-5);
        assert!((hi - 1.0).abs() < 1e-5);
    }

    #[test]
    fn one_record_per_name_state() {
        let quad = [
            -1.0, -1.0, 0.0, 1.0, -1.0, 0.0, 1.0, 1.0, 0.0, -1.0, 1.0, 0.0,
        ];
        let geometry =
            StaticGeometry::from_desc(&StaticBufferDesc::new(VertexLayout::Position, &quad).with_indices(&[0, 1, 2, 0, 2, 3]))
                .unwrap();

        let mut names = NameStack::default();
        names.init();
        let mut ctx = PickingContext::with_capacity(1);

        names.load(5);
        let hits = ctx.record_geometry(&geometry, &Mat4::identity(), PrimitiveMode::Triangles, &names);
        assert_eq!(hits, 2);
        ctx.record_geometry(&geometry, &Mat4::identity(), PrimitiveMode::Triangles, &names);
        ctx.flush();

        names.load(6);
        let far = Mat4::new_translation(&Vec3::new(0.0, 0.0, 0.5));
        ctx.record_geometry(&geometry, &far, PrimitiveMode::Triangles, &names);
        ctx.flush();

        assert_eq!(ctx.records().len(), 2);
        assert_eq!(ctx.records()[0].name, 5);
        assert!((ctx.records()[0].min_depth - 0.5).abs() < 1e-5);
        assert!((ctx.records()[1].min_depth - 0.75).abs() < 1e-5);
        assert_eq!(ctx.picked_object(), 5);
    }
}
