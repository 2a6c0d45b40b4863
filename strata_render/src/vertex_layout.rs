use crate::backend::ClientStates;

/// Interleaved vertex formats of a static buffer. Texture coordinates always live in a separate
/// two-float stream, so they don't count towards [`VertexLayout::stride`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum VertexLayout {
    Position,
    /// Position followed by an RGB colour.
    PositionDiffuse,
    /// Position followed by an RGBA colour.
    PositionDiffuseAlpha,
    PositionNormal,
    PositionNormalColor,
    PositionNormalUv,
    PositionNormalUvColor,
}

pub const UV_COMPONENTS: usize = 2;

impl VertexLayout {
    pub const ALL: [VertexLayout; 7] = [
        VertexLayout::Position,
        VertexLayout::PositionDiffuse,
        VertexLayout::PositionDiffuseAlpha,
        VertexLayout::PositionNormal,
        VertexLayout::PositionNormalColor,
        VertexLayout::PositionNormalUv,
        VertexLayout::PositionNormalUvColor,
    ];

    /// Floats per vertex in the interleaved stream.
    pub const fn stride(self) -> usize {
        let normal = if self.has_normal() { 3 } else { 0 };
        3 + normal + self.color_components()
    }

    pub const fn has_normal(self) -> bool {
        matches!(
            self,
            VertexLayout::PositionNormal
                | VertexLayout::PositionNormalColor
                | VertexLayout::PositionNormalUv
                | VertexLayout::PositionNormalUvColor
        )
    }

    pub const fn has_uv(self) -> bool {
        matches!(
            self,
            VertexLayout::PositionNormalUv | VertexLayout::PositionNormalUvColor
        )
    }

    pub const fn has_color(self) -> bool {
        self.color_components() > 0
    }

    pub const fn color_components(self) -> usize {
        match self {
            VertexLayout::PositionDiffuse => 3,
            VertexLayout::PositionDiffuseAlpha
            | VertexLayout::PositionNormalColor
            | VertexLayout::PositionNormalUvColor => 4,
            VertexLayout::Position
            | VertexLayout::PositionNormal
            | VertexLayout::PositionNormalUv => 0,
        }
    }

    pub const fn normal_offset(self) -> Option<usize> {
        if self.has_normal() { Some(3) } else { None }
    }

    pub const fn color_offset(self) -> Option<usize> {
        if !self.has_color() {
            None
        } else if self.has_normal() {
            Some(6)
        } else {
            Some(3)
        }
    }

    /// Pure colour layouts are drawn unlit and skip material binding.
    pub const fn binds_material(self) -> bool {
        !matches!(
            self,
            VertexLayout::PositionDiffuse | VertexLayout::PositionDiffuseAlpha
        )
    }

    pub fn client_states(self) -> ClientStates {
        let mut states = ClientStates::VERTEX;
        states.set(ClientStates::NORMAL, self.has_normal());
        states.set(ClientStates::TEXCOORD, self.has_uv());
        states.set(ClientStates::COLOR, self.has_color());
        states
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strides_follow_components() {
        let strides: Vec<usize> = VertexLayout::ALL.iter().map(|l| l.stride()).collect();
        assert_eq!(strides, vec![3, 6, 7, 6, 10, 6, 10]);
    }

    #[test]
    fn client_states_match_layout() {
        assert_eq!(VertexLayout::Position.client_states(), ClientStates::VERTEX);
        assert_eq!(
            VertexLayout::PositionDiffuseAlpha.client_states(),
            ClientStates::VERTEX | ClientStates::COLOR
        );
        assert_eq!(
            VertexLayout::PositionNormalUv.client_states(),
            ClientStates::VERTEX | ClientStates::NORMAL | ClientStates::TEXCOORD
        );
        assert_eq!(
            VertexLayout::PositionNormalUvColor.client_states(),
            ClientStates::all()
        );
    }

    #[test]
    fn only_diffuse_layouts_skip_material() {
        let skipping: Vec<_> = VertexLayout::ALL
            .into_iter()
            .filter(|l| !l.binds_material())
            .collect();
        assert_eq!(
            skipping,
            vec![VertexLayout::PositionDiffuse, VertexLayout::PositionDiffuseAlpha]
        );
    }

    #[test]
    fn offsets_point_past_preceding_attributes() {
        assert_eq!(VertexLayout::PositionDiffuse.color_offset(), Some(3));
        assert_eq!(VertexLayout::PositionNormalColor.color_offset(), Some(6));
        assert_eq!(VertexLayout::PositionNormalUv.color_offset(), None);
        assert_eq!(VertexLayout::Position.normal_offset(), None);
    }
}
