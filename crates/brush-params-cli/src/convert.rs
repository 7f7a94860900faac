use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use clap::Args;
use thiserror::Error;
use tracing::trace_span;

/// Undistorted images are resized into these folders, with these scales.
const RESIZE_LEVELS: [(&str, &str); 3] = [
    ("images_2", "50%"),
    ("images_4", "25%"),
    ("images_8", "12.5%"),
];

#[derive(Clone, Debug, Args)]
pub struct ConvertArgs {
    /// Dataset folder. Source images are expected in an `input` folder inside it.
    #[arg(long = "source_path", short = 's', help_heading = "Convert options")]
    pub source_path: PathBuf,
    /// Run SIFT extraction and matching on the CPU.
    #[arg(long = "no_gpu", help_heading = "Convert options")]
    pub no_gpu: bool,
    /// Skip feature extraction, matching and the mapper.
    #[arg(long = "skip_matching", help_heading = "Convert options")]
    pub skip_matching: bool,
    #[arg(long = "skip_undistortion", help_heading = "Convert options")]
    pub skip_undistortion: bool,
    #[arg(long = "skip_resize", help_heading = "Convert options")]
    pub skip_resize: bool,
    /// COLMAP camera model used for all images.
    #[arg(long, help_heading = "Convert options", default_value = "OPENCV")]
    pub camera: String,
    /// Path to the colmap binary, defaults to `colmap` on the PATH.
    #[arg(long = "colmap_executable", help_heading = "Convert options", default_value = "")]
    pub colmap_executable: String,
    /// Path to the ImageMagick binary, defaults to `magick` on the PATH.
    #[arg(long = "magick_executable", help_heading = "Convert options", default_value = "")]
    pub magick_executable: String,
}

impl ConvertArgs {
    fn colmap(&self) -> &str {
        non_empty_or(&self.colmap_executable, "colmap")
    }

    fn magick(&self) -> &str {
        non_empty_or(&self.magick_executable, "magick")
    }

    fn use_gpu(&self) -> &'static str {
        if self.no_gpu { "0" } else { "1" }
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.source_path.join(rel)
    }
}

fn non_empty_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.is_empty() { fallback } else { value }
}

/// An external command exited unsuccessfully.
#[derive(Debug, Error)]
pub struct ExternalToolFailure {
    pub stage: String,
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
}

impl fmt::Display for ExternalToolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed with {}", self.stage, describe_code(self.code))
    }
}

fn describe_code(code: Option<i32>) -> String {
    code.map_or_else(|| "no exit code".to_owned(), |c| format!("code {c}"))
}

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error(transparent)]
    Tool(#[from] ExternalToolFailure),

    #[error("Failed to launch '{program}' for {stage}")]
    Spawn {
        stage: String,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("File operation failed during {stage}")]
    Io {
        stage: String,
        #[source]
        source: std::io::Error,
    },
}

fn io_err(stage: &str) -> impl FnOnce(std::io::Error) -> ConvertError + '_ {
    move |source| ConvertError::Io {
        stage: stage.to_owned(),
        source,
    }
}

/// One invocation of an external tool.
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    pub name: String,
    pub program: String,
    pub args: Vec<OsString>,
}

impl Stage {
    fn new(name: impl Into<String>, program: &str) -> Self {
        Self {
            name: name.into(),
            program: program.to_owned(),
            args: Vec::new(),
        }
    }

    fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn flag(self, name: &str, value: impl Into<OsString>) -> Self {
        self.arg(name).arg(value)
    }

    /// Run to completion, failing on a non-zero exit.
    pub fn run(&self) -> Result<(), ConvertError> {
        let _span = trace_span!("Convert stage", stage = %self.name).entered();
        log::info!("{}: {} {:?}", self.name, self.program, self.args);

        let status = Command::new(&self.program)
            .args(&self.args)
            .status()
            .map_err(|source| ConvertError::Spawn {
                stage: self.name.clone(),
                program: self.program.clone(),
                source,
            })?;

        if status.success() {
            Ok(())
        } else {
            log::error!(
                "{} failed with {}. Exiting.",
                self.name,
                describe_code(status.code())
            );
            Err(ExternalToolFailure {
                stage: self.name.clone(),
                code: status.code(),
            }
            .into())
        }
    }
}

/// Feature extraction, matching and bundle adjustment.
pub fn matching_stages(args: &ConvertArgs) -> Vec<Stage> {
    let colmap = args.colmap();
    let database = args.path("distorted/database.db");
    let input = args.path("input");

    vec![
        Stage::new("Feature extraction", colmap)
            .arg("feature_extractor")
            .flag("--database_path", &database)
            .flag("--image_path", &input)
            .flag("--ImageReader.single_camera", "1")
            .flag("--ImageReader.camera_model", &args.camera)
            .flag("--SiftExtraction.use_gpu", args.use_gpu()),
        Stage::new("Feature matching", colmap)
            .arg("exhaustive_matcher")
            .flag("--database_path", &database)
            .flag("--SiftMatching.use_gpu", args.use_gpu()),
        // The default mapper tolerance is larger than needed, lowering it speeds up
        // bundle adjustment.
        Stage::new("Mapper", colmap)
            .arg("mapper")
            .flag("--database_path", &database)
            .flag("--image_path", &input)
            .flag("--output_path", args.path("distorted/sparse"))
            .arg("--Mapper.ba_global_function_tolerance=0.000001"),
    ]
}

/// Undistort images into ideal pinhole intrinsics.
pub fn undistortion_stage(args: &ConvertArgs) -> Stage {
    Stage::new("Image undistortion", args.colmap())
        .arg("image_undistorter")
        .flag("--image_path", args.path("input"))
        .flag("--input_path", args.path("distorted/sparse/0"))
        .flag("--output_path", &args.source_path)
        .flag("--output_type", "COLMAP")
}

pub fn resize_stage(args: &ConvertArgs, scale: &str, image: &Path) -> Stage {
    Stage::new(format!("{scale} resize"), args.magick())
        .arg("mogrify")
        .flag("-resize", scale)
        .arg(image)
}

/// Run the full conversion, stopping at the first failing stage.
pub fn run(args: &ConvertArgs) -> Result<(), ConvertError> {
    if args.skip_matching {
        log::info!("Skipping feature extraction, matching and bundle adjustment.");
    } else {
        std::fs::create_dir_all(args.path("distorted/sparse"))
            .map_err(io_err("Feature extraction"))?;
        for stage in matching_stages(args) {
            stage.run()?;
        }
    }

    if args.skip_undistortion {
        log::info!("Skipping image undistortion.");
    } else {
        undistortion_stage(args).run()?;
        move_sparse_model(&args.path("sparse")).map_err(io_err("Image undistortion"))?;
    }

    if args.skip_resize {
        log::info!("Skipping resizing.");
    } else {
        resize_images(args)?;
    }

    log::info!("Done converting {}", args.source_path.display());
    Ok(())
}

// The undistorter writes the model straight into `sparse`, training expects it in `sparse/0`.
fn move_sparse_model(sparse: &Path) -> std::io::Result<()> {
    let target = sparse.join("0");
    std::fs::create_dir_all(&target)?;
    for entry in std::fs::read_dir(sparse)? {
        let entry = entry?;
        if entry.file_name() == "0" {
            continue;
        }
        std::fs::rename(entry.path(), target.join(entry.file_name()))?;
    }
    Ok(())
}

fn resize_images(args: &ConvertArgs) -> Result<(), ConvertError> {
    let stage = "Resize";
    log::info!("Copying and resizing...");

    for (dir, _) in RESIZE_LEVELS {
        std::fs::create_dir_all(args.path(dir)).map_err(io_err(stage))?;
    }

    let mut images = std::fs::read_dir(args.path("images"))
        .and_then(|entries| {
            entries
                .map(|e| e.map(|e| e.file_name()))
                .collect::<Result<Vec<_>, _>>()
        })
        .map_err(io_err(stage))?;
    images.sort();

    for name in images {
        let source = args.path("images").join(&name);
        for (dir, scale) in RESIZE_LEVELS {
            let destination = args.path(dir).join(&name);
            std::fs::copy(&source, &destination).map_err(io_err(stage))?;
            resize_stage(args, scale, &destination).run()?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[clap(flatten)]
        convert: ConvertArgs,
    }

    fn args(source: &Path, extra: &[&str]) -> ConvertArgs {
        let mut argv = vec!["convert".to_owned(), "-s".to_owned(), source.display().to_string()];
        argv.extend(extra.iter().map(|s| (*s).to_owned()));
        TestCli::parse_from(argv).convert
    }

    #[test]
    fn test_defaults() {
        let args = args(Path::new("/data/garden"), &[]);
        assert_eq!(args.camera, "OPENCV");
        assert_eq!(args.colmap(), "colmap");
        assert_eq!(args.magick(), "magick");
        assert!(!args.no_gpu);
    }

    #[cfg(unix)]
    #[test]
    fn test_matching_stages() {
        let args = args(
            Path::new("/data/garden"),
            &["--no_gpu", "--colmap_executable", "/opt/colmap/bin/colmap"],
        );
        let stages = matching_stages(&args);
        let names: Vec<_> = stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["Feature extraction", "Feature matching", "Mapper"]);

        let extract = &stages[0];
        assert_eq!(extract.program, "/opt/colmap/bin/colmap");
        assert_eq!(extract.args[0], "feature_extractor");
        assert!(extract.args.contains(&OsString::from("/data/garden/distorted/database.db")));
        assert_eq!(extract.args.last(), Some(&OsString::from("0")));

        let undistort = undistortion_stage(&args);
        assert!(undistort.args.contains(&OsString::from("/data/garden/distorted/sparse/0")));
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_stage_reports_code() {
        let stage = Stage::new("Exit check", "sh").arg("-c").arg("exit 3");
        match stage.run() {
            Err(ConvertError::Tool(failure)) => {
                assert_eq!(failure.stage, "Exit check");
                assert_eq!(failure.code, Some(3));
                assert_eq!(failure.to_string(), "Exit check failed with code 3");
            }
            other => panic!("Unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_missing_program() {
        let stage = Stage::new("Missing", "brush-definitely-not-a-binary");
        assert!(matches!(stage.run(), Err(ConvertError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_pipeline_stops_at_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let args = args(dir.path(), &["--colmap_executable", "false"]);

        match run(&args) {
            Err(ConvertError::Tool(failure)) => {
                assert_eq!(failure.stage, "Feature extraction");
                assert_eq!(failure.code, Some(1));
            }
            other => panic!("Unexpected result {other:?}"),
        }
        assert!(dir.path().join("distorted/sparse").is_dir());
        assert!(!dir.path().join("images_2").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_resize_copies() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("images")).unwrap();
        std::fs::write(dir.path().join("images/0001.png"), b"png").unwrap();

        let args = args(
            dir.path(),
            &["--skip_matching", "--skip_undistortion", "--magick_executable", "true"],
        );
        run(&args).unwrap();

        for (level, _) in RESIZE_LEVELS {
            assert!(dir.path().join(level).join("0001.png").is_file());
        }
    }

    #[test]
    fn test_move_sparse_model() {
        let dir = tempfile::tempdir().unwrap();
        let sparse = dir.path().join("sparse");
        std::fs::create_dir_all(&sparse).unwrap();
        for file in ["cameras.bin", "images.bin", "points3D.bin"] {
            std::fs::write(sparse.join(file), b"").unwrap();
        }

        move_sparse_model(&sparse).unwrap();
        for file in ["cameras.bin", "images.bin", "points3D.bin"] {
            assert!(sparse.join("0").join(file).is_file());
            assert!(!sparse.join(file).exists());
        }
    }
}
