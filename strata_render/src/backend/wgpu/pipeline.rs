use super::vertex::VERTEX_BUFFERS;
use crate::backend::GpuId;
use crate::primitive::PrimitiveMode;
use wgpu::{
    BlendState, ColorTargetState, ColorWrites, CompareFunction, DepthBiasState, DepthStencilState,
    Device, FragmentState, MultisampleState, PipelineCompilationOptions, PipelineLayout,
    PrimitiveState, PrimitiveTopology, RenderPipeline, RenderPipelineDescriptor, ShaderModule,
    StencilFaceState, StencilState, TextureFormat, VertexState,
};

pub(super) const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;

const DEPTH_STENCIL: DepthStencilState = DepthStencilState {
    format: DEPTH_FORMAT,
    depth_write_enabled: true,
    depth_compare: CompareFunction::LessEqual,
    stencil: StencilState {
        front: StencilFaceState::IGNORE,
        back: StencilFaceState::IGNORE,
        read_mask: 0,
        write_mask: 0,
    },
    bias: DepthBiasState {
        constant: 0,
        slope_scale: 0.0,
        clamp: 0.0,
    },
};

/// The list topology a primitive mode is drawn with once strips, fans, loops and quads have been
/// unrolled into explicit indices.
pub(super) fn list_topology(mode: PrimitiveMode) -> PrimitiveTopology {
    match mode {
        PrimitiveMode::Points => PrimitiveTopology::PointList,
        PrimitiveMode::Lines | PrimitiveMode::LineStrip | PrimitiveMode::LineLoop => {
            PrimitiveTopology::LineList
        }
        PrimitiveMode::Triangles
        | PrimitiveMode::TriangleStrip
        | PrimitiveMode::TriangleFan
        | PrimitiveMode::Quads => PrimitiveTopology::TriangleList,
    }
}

/// Everything a render pipeline depends on. Render passes in wgpu fix their attachment formats,
/// so the same program gets one pipeline per target shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(super) struct PipelineKey {
    pub program: Option<GpuId>,
    /// Colour formats in slot order, trailing gaps trimmed.
    pub colors: Vec<Option<TextureFormat>>,
    pub depth: bool,
    pub topology: PrimitiveTopology,
}

impl PipelineKey {
    pub fn build(&self, device: &Device, layout: &PipelineLayout, module: &ShaderModule) -> RenderPipeline {
        let targets: Vec<Option<ColorTargetState>> = self
            .colors
            .iter()
            .map(|format| {
                format.map(|format| ColorTargetState {
                    format,
                    blend: Some(BlendState::REPLACE),
                    write_mask: ColorWrites::all(),
                })
            })
            .collect();

        let fragment = (!targets.is_empty()).then(|| FragmentState {
            module,
            entry_point: None,
            compilation_options: PipelineCompilationOptions::default(),
            targets: &targets,
        });

        let label = format!("Strata Pipeline {:?} {:?}", self.program, self.topology);
        device.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some(&label),
            layout: Some(layout),
            vertex: VertexState {
                module,
                entry_point: None,
                compilation_options: PipelineCompilationOptions::default(),
                buffers: VERTEX_BUFFERS,
            },
            primitive: PrimitiveState {
                topology: self.topology,
                cull_mode: None,
                ..PrimitiveState::default()
            },
            depth_stencil: self.depth.then_some(DEPTH_STENCIL),
            multisample: MultisampleState::default(),
            fragment,
            multiview_mask: None,
            cache: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrolled_modes_draw_as_lists() {
        assert_eq!(
            list_topology(PrimitiveMode::LineLoop),
            PrimitiveTopology::LineList
        );
        assert_eq!(
            list_topology(PrimitiveMode::Quads),
            PrimitiveTopology::TriangleList
        );
        assert_eq!(
            list_topology(PrimitiveMode::Points),
            PrimitiveTopology::PointList
        );
    }
}
