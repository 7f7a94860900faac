use std::path::{Path, PathBuf};

use brush_params::{ConfigurationError, GroupManifest, Invocation, ParamParser, extract};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// A typed parameter group of the training tool.
pub trait ParamGroup: DeserializeOwned {
    /// Help heading the group's flags are listed under.
    const NAME: &'static str;

    fn manifest() -> GroupManifest;

    fn register(
        parser: &mut ParamParser,
        suppress_defaults: bool,
    ) -> Result<(), ConfigurationError> {
        parser.add_group(Self::NAME, &Self::manifest(), suppress_defaults)
    }

    fn extract(invocation: &Invocation) -> anyhow::Result<Self> {
        Ok(extract_typed(invocation)?)
    }
}

/// Extract a group and fill anything left unset with its declared default.
pub fn extract_typed<T: ParamGroup>(
    invocation: &Invocation,
) -> Result<T, brush_params::InvalidInvocationError> {
    let manifest = T::manifest();
    extract(&manifest, invocation)?
        .or_defaults(&manifest)
        .deserialize_into()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    pub sh_degree: u32,
    pub source_path: PathBuf,
    pub model_path: PathBuf,
    pub images: String,
    pub resolution: i32,
    pub white_background: bool,
    pub data_device: String,
    pub eval: bool,
}

impl ParamGroup for ModelParams {
    const NAME: &'static str = "Loading Parameters";

    fn manifest() -> GroupManifest {
        GroupManifest::new()
            .field("sh_degree", 3)
            .field("_source_path", "")
            .field("_model_path", "")
            .field("_images", "images")
            .field("_resolution", -1)
            .field("_white_background", false)
            .field("data_device", "cuda")
            .field("eval", false)
    }

    fn extract(invocation: &Invocation) -> anyhow::Result<Self> {
        let mut params: Self = extract_typed(invocation)?;
        params.source_path = absolute(&params.source_path)?;
        Ok(params)
    }
}

// An empty path means the current directory.
fn absolute(path: &Path) -> std::io::Result<PathBuf> {
    if path.as_os_str().is_empty() {
        std::env::current_dir()
    } else {
        std::path::absolute(path)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineParams {
    #[serde(rename = "convert_SHs_python")]
    pub convert_shs_python: bool,
    #[serde(rename = "compute_cov3D_python")]
    pub compute_cov3d_python: bool,
    pub debug: bool,
}

impl ParamGroup for PipelineParams {
    const NAME: &'static str = "Pipeline Parameters";

    fn manifest() -> GroupManifest {
        GroupManifest::new()
            .field("convert_SHs_python", false)
            .field("compute_cov3D_python", false)
            .field("debug", false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationParams {
    pub iterations: u32,
    pub position_lr_init: f32,
    pub position_lr_final: f32,
    pub position_lr_delay_mult: f32,
    pub position_lr_max_steps: u32,
    pub feature_lr: f32,
    pub opacity_lr: f32,
    pub scaling_lr: f32,
    pub rotation_lr: f32,
    pub percent_dense: f32,
    pub lambda_dssim: f32,
    pub densification_interval: u32,
    /// Remove transparent splats every this many steps.
    pub opacity_reset_interval: u32,
    pub densify_from_iter: u32,
    pub densify_until_iter: u32,
    pub densify_grad_threshold: f32,
    pub random_background: bool,
}

impl ParamGroup for OptimizationParams {
    const NAME: &'static str = "Optimization Parameters";

    fn manifest() -> GroupManifest {
        GroupManifest::new()
            .field("iterations", 30_000)
            .field("position_lr_init", 0.00016)
            .field("position_lr_final", 0.0000016)
            .field("position_lr_delay_mult", 0.01)
            .field("position_lr_max_steps", 30_000)
            .field("feature_lr", 0.0025)
            .field("opacity_lr", 0.05)
            .field("scaling_lr", 0.005)
            .field("rotation_lr", 0.001)
            .field("percent_dense", 0.01)
            .field("lambda_dssim", 0.2)
            .field("densification_interval", 100)
            .field("opacity_reset_interval", 3000)
            .field("densify_from_iter", 500)
            .field("densify_until_iter", 15_000)
            .field("densify_grad_threshold", 0.0002)
            .field("random_background", false)
    }
}

/// Options of a render pass over a trained model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderParams {
    /// Checkpoint iteration to render, -1 for the latest.
    pub iteration: i32,
    pub skip_train: bool,
    pub skip_test: bool,
    pub quiet: bool,
}

impl ParamGroup for RenderParams {
    const NAME: &'static str = "Render Parameters";

    fn manifest() -> GroupManifest {
        GroupManifest::new()
            .field("iteration", -1)
            .field("skip_train", false)
            .field("skip_test", false)
            .field("quiet", false)
    }
}
