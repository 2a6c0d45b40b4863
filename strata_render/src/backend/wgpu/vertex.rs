use crate::error::{InvalidGeometryErr, Result};
use crate::vertex_layout::VertexLayout;
use bytemuck::{Pod, Zeroable};
use snafu::ensure;
use static_assertions::const_assert_eq;
use wgpu::{VertexAttribute, VertexBufferLayout, VertexFormat, VertexStepMode};

const VEC2_SIZE: u64 = size_of::<[f32; 2]>() as u64;
const VEC3_SIZE: u64 = size_of::<[f32; 3]>() as u64;
const VEC4_SIZE: u64 = size_of::<[f32; 4]>() as u64;

/// Every interleaved layout is widened to this before upload, so one pipeline layout serves
/// them all. Missing normals face the viewer, missing colours are opaque white.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub(super) struct CanonicalVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub color: [f32; 4],
}

const_assert_eq!(size_of::<CanonicalVertex>() as u64, VEC3_SIZE * 2 + VEC4_SIZE);

pub(super) const UV_STRIDE: u64 = VEC2_SIZE;

pub(super) const VERTEX_BUFFERS: &[VertexBufferLayout] = &[
    VertexBufferLayout {
        array_stride: VEC3_SIZE * 2 + VEC4_SIZE,
        step_mode: VertexStepMode::Vertex,
        attributes: &[
            VertexAttribute {
                format: VertexFormat::Float32x3, // position
                offset: 0,
                shader_location: 0,
            },
            VertexAttribute {
                format: VertexFormat::Float32x3, // normal
                offset: VEC3_SIZE,
                shader_location: 1,
            },
            VertexAttribute {
                format: VertexFormat::Float32x4, // color
                offset: VEC3_SIZE * 2,
                shader_location: 2,
            },
        ],
    },
    VertexBufferLayout {
        array_stride: UV_STRIDE,
        step_mode: VertexStepMode::Vertex,
        attributes: &[VertexAttribute {
            format: VertexFormat::Float32x2, // uv
            offset: 0,
            shader_location: 3,
        }],
    },
];

/// Widens tightly packed `layout` floats into [`CanonicalVertex`]es.
pub(super) fn expand(layout: VertexLayout, floats: &[f32]) -> Result<Vec<CanonicalVertex>> {
    let stride = layout.stride();
    ensure!(
        floats.len().is_multiple_of(stride),
        InvalidGeometryErr {
            reason: format!(
                "{} floats is not a whole number of {layout:?} vertices",
                floats.len()
            )
        }
    );

    let vertices = floats
        .chunks_exact(stride)
        .map(|v| {
            let mut out = CanonicalVertex {
                position: [v[0], v[1], v[2]],
                normal: [0.0, 0.0, 1.0],
                color: [1.0; 4],
            };
            if let Some(n) = layout.normal_offset() {
                out.normal.copy_from_slice(&v[n..n + 3]);
            }
            if let Some(c) = layout.color_offset() {
                let components = layout.color_components();
                out.color[..components].copy_from_slice(&v[c..c + components]);
            }
            out
        })
        .collect();
    Ok(vertices)
}
