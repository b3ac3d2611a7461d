use std::sync::Arc;

use thiserror::Error;

/// Entry point of the shared full-screen triangle vertex stage.
pub const FULLSCREEN_TRIANGLE_VERTEX: &str = "fullscreenTriangleVertex";

/// WGSL source of the bundled library.
pub const BUNDLED_WGSL: &str = include_str!("../shaders/library.wgsl");

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

/// One named function in a shader library.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct EntryPoint {
    pub name: String,
    pub stage: ShaderStage,
    /// Declared workgroup size; `[0, 0, 0]` for non-compute stages.
    pub workgroup_size: [u32; 3],
}

#[derive(Debug, Clone, Error)]
pub enum LibraryError {
    #[error("shader library failed to parse:\n{0}")]
    Parse(String),
}

/// Reflected set of entry points a device can build pipelines from.
#[derive(Debug, Clone)]
pub struct ShaderLibrary {
    source: Arc<str>,
    entries: Vec<EntryPoint>,
}

impl ShaderLibrary {
    /// Parses the bundled WGSL library.
    pub fn bundled() -> Result<Self, LibraryError> {
        Self::from_wgsl(BUNDLED_WGSL)
    }

    /// Parses `source` with naga and reflects its entry points.
    pub fn from_wgsl(source: &str) -> Result<Self, LibraryError> {
        let module = naga::front::wgsl::parse_str(source)
            .map_err(|e| LibraryError::Parse(e.emit_to_string(source)))?;

        let entries = module
            .entry_points
            .iter()
            .filter_map(|ep| {
                let stage = match ep.stage {
                    naga::ShaderStage::Vertex => ShaderStage::Vertex,
                    naga::ShaderStage::Fragment => ShaderStage::Fragment,
                    naga::ShaderStage::Compute => ShaderStage::Compute,
                    // Mesh/task stages have no place in a full-screen pipeline.
                    _ => return None,
                };
                Some(EntryPoint {
                    name: ep.name.clone(),
                    stage,
                    workgroup_size: ep.workgroup_size,
                })
            })
            .collect::<Vec<_>>();

        log::debug!("shader library reflected {} entry points", entries.len());

        Ok(Self {
            source: Arc::from(source),
            entries,
        })
    }

    /// WGSL source the library was reflected from.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn entry_points(&self) -> &[EntryPoint] {
        &self.entries
    }

    /// Looks up `name` with the given stage.
    pub fn function(&self, name: &str, stage: ShaderStage) -> Option<&EntryPoint> {
        self.entries
            .iter()
            .find(|ep| ep.stage == stage && ep.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_library_exposes_expected_stages() {
        let lib = ShaderLibrary::bundled().unwrap();
        assert!(lib.function(FULLSCREEN_TRIANGLE_VERTEX, ShaderStage::Vertex).is_some());
        for frag in ["fillRed", "sampleSource", "gradientBase", "tintAccumulate", "vignetteResolve"] {
            assert!(lib.function(frag, ShaderStage::Fragment).is_some(), "{frag}");
        }
        for kernel in ["markBounds", "invertSource"] {
            let ep = lib.function(kernel, ShaderStage::Compute).unwrap();
            assert_eq!(ep.workgroup_size, [32, 32, 1]);
        }
    }

    #[test]
    fn lookup_respects_stage() {
        let lib = ShaderLibrary::bundled().unwrap();
        assert!(lib.function("fillRed", ShaderStage::Compute).is_none());
        assert!(lib.function("doesNotExist", ShaderStage::Fragment).is_none());
    }

    #[test]
    fn invalid_wgsl_reports_parse_error() {
        let err = ShaderLibrary::from_wgsl("fn broken( {").unwrap_err();
        assert!(matches!(err, LibraryError::Parse(_)));
    }
}
