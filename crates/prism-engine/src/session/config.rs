use crate::pipeline::PipelineResolution;
use crate::strategy::StrategyKind;

/// Session construction parameters.
///
/// Strategies whose shader list is empty are not compiled; submitting them
/// fails with `SubmitError::StrategyUnavailable`.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub queue_label: String,
    /// Label of the per-submission diagnostic capture region.
    pub capture_label: String,
    pub resolution: PipelineResolution,
    pub single_pass: Vec<String>,
    pub multi_pass: Vec<String>,
    pub compute: Vec<String>,
}

impl SessionConfig {
    pub fn shader_names(&self, kind: StrategyKind) -> &[String] {
        match kind {
            StrategyKind::SinglePassFragment => &self.single_pass,
            StrategyKind::MultiPassFragment => &self.multi_pass,
            StrategyKind::ComputeDispatch => &self.compute,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            queue_label: "prism queue".to_string(),
            capture_label: "prism submission".to_string(),
            resolution: PipelineResolution::Strict,
            single_pass: vec!["fillRed".to_string()],
            multi_pass: ["gradientBase", "tintAccumulate", "vignetteResolve"]
                .map(String::from)
                .to_vec(),
            compute: vec!["markBounds".to_string()],
        }
    }
}
