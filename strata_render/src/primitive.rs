use itertools::Itertools;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveMode {
    Points,
    Lines,
    LineStrip,
    LineLoop,
    #[default]
    Triangles,
    TriangleStrip,
    TriangleFan,
    Quads,
}

/// One assembled primitive, as indices into the element list of a draw.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Primitive {
    Point(u32),
    Line(u32, u32),
    Triangle(u32, u32, u32),
}

impl PrimitiveMode {
    /// Faces counted for `elements` submitted vertices or indices.
    pub fn face_count(self, elements: u32) -> u32 {
        match self {
            PrimitiveMode::Triangles => elements / 3,
            PrimitiveMode::TriangleStrip | PrimitiveMode::TriangleFan => elements.saturating_sub(2),
            PrimitiveMode::Quads => elements / 4,
            PrimitiveMode::Points
            | PrimitiveMode::Lines
            | PrimitiveMode::LineStrip
            | PrimitiveMode::LineLoop => 0,
        }
    }

    pub fn is_line(self) -> bool {
        matches!(
            self,
            PrimitiveMode::Lines | PrimitiveMode::LineStrip | PrimitiveMode::LineLoop
        )
    }

    /// Splits `count` elements into points, lines and triangles.
    ///
    /// Strips keep a consistent winding, fans pivot on the first element and quads become two
    /// triangles. Trailing elements that don't complete a primitive are dropped.
    pub fn assemble(self, count: u32) -> Vec<Primitive> {
        match self {
            PrimitiveMode::Points => (0..count).map(Primitive::Point).collect(),
            PrimitiveMode::Lines => (0..count / 2 * 2)
                .tuples()
                .map(|(a, b)| Primitive::Line(a, b))
                .collect(),
            PrimitiveMode::LineStrip => (0..count)
                .tuple_windows()
                .map(|(a, b)| Primitive::Line(a, b))
                .collect(),
            PrimitiveMode::LineLoop => {
                let mut lines: Vec<_> = (0..count)
                    .tuple_windows()
                    .map(|(a, b)| Primitive::Line(a, b))
                    .collect();
                if count > 2 {
                    lines.push(Primitive::Line(count - 1, 0));
                }
                lines
            }
            PrimitiveMode::Triangles => (0..count / 3 * 3)
                .tuples()
                .map(|(a, b, c)| Primitive::Triangle(a, b, c))
                .collect(),
            PrimitiveMode::TriangleStrip => (0..count.saturating_sub(2))
                .map(|i| {
                    if i % 2 == 0 {
                        Primitive::Triangle(i, i + 1, i + 2)
                    } else {
                        Primitive::Triangle(i + 1, i, i + 2)
                    }
                })
                .collect(),
            PrimitiveMode::TriangleFan => (1..count.saturating_sub(1))
                .map(|i| Primitive::Triangle(0, i, i + 1))
                .collect(),
            PrimitiveMode::Quads => (0..count / 4)
                .flat_map(|q| {
                    let b = q * 4;
                    [
                        Primitive::Triangle(b, b + 1, b + 2),
                        Primitive::Triangle(b, b + 2, b + 3),
                    ]
                })
                .collect(),
        }
    }
}
