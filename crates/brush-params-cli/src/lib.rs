pub mod convert;
pub mod groups;

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::Context;
use brush_params::{
    CFG_ARGS_FILE, ConfigDeserializationError, ConfigurationError, FieldValue, Invocation,
    ParamParser, ParamsError, Setting, reconcile,
};
use clap::{ArgMatches, Args, Command, FromArgMatches};
use convert::ConvertArgs;
use groups::{ModelParams, OptimizationParams, ParamGroup, PipelineParams, RenderParams};

/// The parsers behind each subcommand. Built once, before any parsing.
pub struct Cli {
    train: ParamParser,
    render: ParamParser,
}

impl Cli {
    pub fn new() -> Result<Self, ConfigurationError> {
        let mut train = ParamParser::from_command(
            Command::new("train").about("Resolve a training run's parameters and save them"),
        );
        ModelParams::register(&mut train, false)?;
        OptimizationParams::register(&mut train, false)?;
        PipelineParams::register(&mut train, false)?;

        // Model params are suppressed so the saved training config can fill them in.
        let mut render = ParamParser::from_command(
            Command::new("render").about("Resolve a render pass against a trained model"),
        );
        ModelParams::register(&mut render, true)?;
        PipelineParams::register(&mut render, false)?;
        RenderParams::register(&mut render, false)?;

        Ok(Self { train, render })
    }

    pub fn command(&self) -> Command {
        let convert = ConvertArgs::augment_args(
            Command::new("convert").about("Run COLMAP and ImageMagick over a folder of images"),
        );
        Command::new("brush_params")
            .about("Brush - parameter groups for training runs")
            .version(env!("CARGO_PKG_VERSION"))
            .subcommand_required(true)
            .arg_required_else_help(true)
            .subcommand(self.train.command().clone())
            .subcommand(self.render.command().clone())
            .subcommand(convert)
    }

    pub fn run(&self, matches: &ArgMatches) -> anyhow::Result<()> {
        match matches.subcommand() {
            Some(("train", sub)) => {
                let run = prepare_training(self.train.resolve(sub))?;
                log::info!("Output folder: {}", run.model.model_path.display());
                println!("{}", serde_json::to_string_pretty(&run)?);
            }
            Some(("render", sub)) => {
                let invocation = combine_with_saved(&self.render.resolve(sub))?;
                let run = RenderRun {
                    model: ModelParams::extract(&invocation)?,
                    pipeline: PipelineParams::extract(&invocation)?,
                    render: RenderParams::extract(&invocation)?,
                };
                log::info!("Rendering {}", run.model.model_path.display());
                println!("{}", serde_json::to_string_pretty(&run)?);
            }
            Some(("convert", sub)) => {
                let args = ConvertArgs::from_arg_matches(sub)?;
                convert::run(&args)?;
            }
            _ => anyhow::bail!("Unknown subcommand"),
        }
        Ok(())
    }

    pub fn run_from<I, T>(&self, args: I) -> anyhow::Result<()>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = self.command().try_get_matches_from(args)?;
        self.run(&matches)
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TrainRun {
    pub model: ModelParams,
    pub optimization: OptimizationParams,
    pub pipeline: PipelineParams,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RenderRun {
    pub model: ModelParams,
    pub pipeline: PipelineParams,
    pub render: RenderParams,
}

/// Parse `args` with `parser`, then merge in the `cfg_args` saved under the
/// model path, if one was given.
pub fn combined_args<I, T>(parser: &ParamParser, args: I) -> Result<Invocation, ParamsError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let invocation = parser.try_parse_from(args)?;
    Ok(combine_with_saved(&invocation)?)
}

pub fn combine_with_saved(
    invocation: &Invocation,
) -> Result<Invocation, ConfigDeserializationError> {
    let model_path = invocation
        .value("model_path")
        .and_then(FieldValue::as_str)
        .filter(|p| !p.is_empty());

    match model_path {
        Some(model_path) => reconcile(&Path::new(model_path).join(CFG_ARGS_FILE), invocation),
        None => {
            log::info!("No model path given, not looking for a saved config");
            Ok(invocation.clone())
        }
    }
}

/// Resolve a training invocation, pick an output folder if none was given, and
/// save the resolved config there as `cfg_args`.
pub fn prepare_training(mut invocation: Invocation) -> anyhow::Result<TrainRun> {
    let model_path = invocation
        .value("model_path")
        .and_then(FieldValue::as_str)
        .filter(|p| !p.is_empty())
        .map(PathBuf::from);

    let model_path = match model_path {
        Some(path) => path,
        None => {
            let path = default_output_dir();
            invocation.insert(
                "model_path",
                Setting::Explicit(path.to_string_lossy().into_owned().into()),
            );
            path
        }
    };

    let run = TrainRun {
        model: ModelParams::extract(&invocation)?,
        optimization: OptimizationParams::extract(&invocation)?,
        pipeline: PipelineParams::extract(&invocation)?,
    };

    invocation
        .to_persisted()
        .save_to_dir(&model_path)
        .with_context(|| format!("Failed to save config to {}", model_path.display()))?;
    Ok(run)
}

fn default_output_dir() -> PathBuf {
    let stamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    PathBuf::from("output").join(format!("run_{stamp}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use brush_params::PersistedConfig;

    #[test]
    fn test_command_is_valid() {
        Cli::new().unwrap().command().debug_assert();
    }

    #[test]
    fn test_train_then_render() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = dir.path().join("garden");
        let model_path = model_path.to_str().unwrap();
        let cli = Cli::new().unwrap();

        let train = cli
            .train
            .try_parse_from(["train", "-m", model_path, "-s", "/data/garden", "--eval"])
            .unwrap();
        let run = prepare_training(train).unwrap();
        assert!(run.model.eval);

        let saved = PersistedConfig::load(&Path::new(model_path).join(CFG_ARGS_FILE))
            .unwrap()
            .unwrap();
        assert_eq!(saved.get("iterations"), Some(&FieldValue::Int(30_000)));

        let render = combined_args(
            &cli.render,
            ["render", "-m", model_path, "--iteration", "7000"],
        )
        .unwrap();
        let model = ModelParams::extract(&render).unwrap();
        assert!(model.eval);
        assert_eq!(model.source_path, PathBuf::from("/data/garden"));
        assert_eq!(RenderParams::extract(&render).unwrap().iteration, 7000);
    }

    #[test]
    fn test_render_without_model_path() {
        let cli = Cli::new().unwrap();
        let render = combined_args(&cli.render, ["render"]).unwrap();
        assert_eq!(render.get("model_path"), Some(&Setting::Unset));
    }

    #[test]
    fn test_render_with_broken_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CFG_ARGS_FILE), "Namespace(eval=Tru)").unwrap();

        let cli = Cli::new().unwrap();
        let result = combined_args(
            &cli.render,
            ["render", "-m", dir.path().to_str().unwrap()],
        );
        assert!(matches!(result, Err(ParamsError::Deserialization(_))));
    }

    #[test]
    fn test_run_render_subcommand() {
        let cli = Cli::new().unwrap();
        cli.run_from(["brush_params", "render", "--skip_test"]).unwrap();
        assert!(cli.run_from(["brush_params", "render", "--iteration", "x"]).is_err());
    }
}
