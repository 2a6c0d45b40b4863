use crate::backend::GpuId;
use crate::error::{Result, ShaderCompileErr};
use naga::ShaderStage;
use naga::valid::{Capabilities, ValidationFlags, Validator};
use snafu::ensure;

/// Built-in program used when no shader is bound. Custom shaders share its bindings and
/// vertex inputs.
pub const DEFAULT_SHADER: &str = include_str!("backend/wgpu/shader.wgsl");

/// A validated vertex/fragment WGSL pair.
#[derive(Debug, Clone)]
pub struct Shader {
    name: String,
    vertex: String,
    fragment: String,
    program: Option<GpuId>,
}

impl Shader {
    /// Parses and validates both stages.
    pub fn new(
        name: impl Into<String>,
        vertex: impl Into<String>,
        fragment: impl Into<String>,
    ) -> Result<Self> {
        let name = name.into();
        let vertex = vertex.into();
        let fragment = fragment.into();

        validate_stage(&name, &vertex, ShaderStage::Vertex)?;
        validate_stage(&name, &fragment, ShaderStage::Fragment)?;

        Ok(Shader {
            name,
            vertex,
            fragment,
            program: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vertex_source(&self) -> &str {
        &self.vertex
    }

    pub fn fragment_source(&self) -> &str {
        &self.fragment
    }

    pub fn program(&self) -> Option<GpuId> {
        self.program
    }

    pub(crate) fn set_program(&mut self, program: GpuId) {
        self.program = Some(program);
    }

    pub(crate) fn take_program(&mut self) -> Option<GpuId> {
        self.program.take()
    }
}

fn validate_stage(name: &str, source: &str, stage: ShaderStage) -> Result<()> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| {
        ShaderCompileErr {
            name,
            message: e.emit_to_string(source),
        }
        .build()
    })?;

    Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(&module)
        .map_err(|e| {
            ShaderCompileErr {
                name,
                message: e.emit_to_string(source),
            }
            .build()
        })?;

    ensure!(
        module.entry_points.iter().any(|ep| ep.stage == stage),
        ShaderCompileErr {
            name,
            message: format!("no {stage:?} entry point"),
        }
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RenderError;

    #[test]
    fn default_shader_validates() {
        Shader::new("default", DEFAULT_SHADER, DEFAULT_SHADER).unwrap();
    }

    #[test]
    fn syntax_errors_are_reported_by_name() {
        let err = Shader::new("broken", "fn vs_main( {", DEFAULT_SHADER).unwrap_err();
        match err {
            RenderError::ShaderCompile { name, message } => {
                assert_eq!(name, "broken");
                assert!(!message.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn stages_need_matching_entry_points() {
        let compute = "@compute @workgroup_size(1) fn main() {}";
        let err = Shader::new("compute", DEFAULT_SHADER, compute).unwrap_err();
        assert!(matches!(err, RenderError::ShaderCompile { .. }));
    }
}
