use std::collections::HashMap;
use std::ffi::OsString;

use clap::{Arg, ArgAction, ArgMatches, Command, parser::ValueSource, value_parser};
use tracing::trace_span;

use crate::{
    error::{ConfigurationError, ParamsError},
    invocation::{Invocation, Setting},
    manifest::{FieldSpec, GroupManifest},
    value::{FieldKind, FieldValue},
};

const HELP_LONG: &str = "help";
const HELP_SHORT: char = 'h';

#[derive(Debug, Clone)]
struct RegisteredFlag {
    name: String,
    group: String,
    kind: FieldKind,
    // None when the default was suppressed.
    default: Option<FieldValue>,
}

/// A command line parser that parameter groups register their flags on.
///
/// Registration happens up front; once parsing starts the parser is only read.
#[derive(Debug, Clone)]
pub struct ParamParser {
    command: Command,
    flags: Vec<RegisteredFlag>,
    longs: HashMap<String, usize>,
    shorts: HashMap<char, usize>,
}

impl ParamParser {
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_command(Command::new(name.into()))
    }

    /// Start from an existing command, eg. to set an about text.
    ///
    /// Nb: Arguments already on the command aren't checked for collisions.
    pub fn from_command(command: Command) -> Self {
        Self {
            command,
            flags: Vec::new(),
            longs: HashMap::new(),
            shorts: HashMap::new(),
        }
    }

    /// Register one flag per field of `manifest`, under the `group_name` help heading.
    ///
    /// With `suppress_defaults` every flag resolves to [`Setting::Unset`] when not
    /// passed, so a later merge can tell "not given" apart from "given the default".
    ///
    /// Long names and shorthands must be unique over all registered groups. On
    /// error nothing from this group is registered.
    pub fn add_group(
        &mut self,
        group_name: &str,
        manifest: &GroupManifest,
        suppress_defaults: bool,
    ) -> Result<(), ConfigurationError> {
        self.check_group(group_name, manifest)?;

        for field in manifest.fields() {
            let default = (!suppress_defaults).then(|| field.default_value().clone());
            let arg = build_arg(field, group_name, default.as_ref());

            let index = self.flags.len();
            self.flags.push(RegisteredFlag {
                name: field.visible_name().to_owned(),
                group: group_name.to_owned(),
                kind: field.kind(),
                default,
            });
            self.longs.insert(field.visible_name().to_owned(), index);
            if let Some(short) = field.shorthand() {
                self.shorts.insert(short, index);
            }
            self.command = std::mem::take(&mut self.command).arg(arg);
        }

        log::debug!(
            "Registered {} flags for '{group_name}' (defaults suppressed: {suppress_defaults})",
            manifest.len()
        );
        Ok(())
    }

    fn check_group(
        &self,
        group_name: &str,
        manifest: &GroupManifest,
    ) -> Result<(), ConfigurationError> {
        // Names claimed by earlier fields of this same group.
        let mut pending_longs: HashMap<&str, &str> = HashMap::new();
        let mut pending_shorts: HashMap<char, &str> = HashMap::new();

        for field in manifest.fields() {
            let name = field.visible_name();
            if name.is_empty() {
                return Err(ConfigurationError::EmptyFieldName {
                    group: group_name.to_owned(),
                });
            }
            if name == HELP_LONG || field.shorthand() == Some(HELP_SHORT) {
                return Err(ConfigurationError::ReservedFlag {
                    flag: name.to_owned(),
                    group: group_name.to_owned(),
                });
            }

            let first_group = self
                .longs
                .get(name)
                .map(|&i| self.flags[i].group.as_str())
                .or_else(|| pending_longs.get(name).copied());
            if let Some(first_group) = first_group {
                return Err(ConfigurationError::FlagCollision {
                    flag: name.to_owned(),
                    first_group: first_group.to_owned(),
                    second_group: group_name.to_owned(),
                });
            }
            pending_longs.insert(name, group_name);

            if let Some(short) = field.shorthand() {
                let existing = self
                    .shorts
                    .get(&short)
                    .map(|&i| self.flags[i].name.as_str())
                    .or_else(|| pending_shorts.get(&short).copied());
                if let Some(existing) = existing {
                    return Err(ConfigurationError::ShorthandCollision {
                        short,
                        flag: name.to_owned(),
                        existing: existing.to_owned(),
                    });
                }
                pending_shorts.insert(short, name);
            }
        }
        Ok(())
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    /// The underlying command, eg. to mount it as a subcommand.
    pub fn into_command(self) -> Command {
        self.command
    }

    pub fn flag_names(&self) -> impl Iterator<Item = &str> {
        self.flags.iter().map(|f| f.name.as_str())
    }

    /// Parse the process arguments. Exits with a usage message on bad input,
    /// like `clap::Parser::parse`.
    pub fn parse(&self) -> Invocation {
        let matches = self.command.clone().get_matches();
        self.resolve(&matches)
    }

    pub fn try_parse_from<I, T>(&self, args: I) -> Result<Invocation, ParamsError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let _span = trace_span!("Parse invocation").entered();
        let matches = self.command.clone().try_get_matches_from(args)?;
        Ok(self.resolve(&matches))
    }

    /// Turn matches of this parser's command (or of a subcommand built from it)
    /// into an [`Invocation`] holding every registered flag.
    pub fn resolve(&self, matches: &ArgMatches) -> Invocation {
        self.flags
            .iter()
            .map(|flag| (flag.name.clone(), resolve_flag(flag, matches)))
            .collect()
    }
}

fn build_arg(field: &FieldSpec, group_name: &str, default: Option<&FieldValue>) -> Arg {
    let name = field.visible_name().to_owned();
    let mut arg = Arg::new(name.clone())
        .long(name)
        .help_heading(group_name.to_owned());

    if let Some(short) = field.shorthand() {
        arg = arg.short(short);
    }

    match field.kind() {
        FieldKind::Bool => {
            arg = arg.action(ArgAction::SetTrue);
            // SetTrue already rests at false.
            if let Some(FieldValue::Bool(true)) = default {
                arg = arg.default_value("true");
            }
        }
        kind => {
            arg = arg.action(ArgAction::Set).num_args(1);
            arg = match kind {
                FieldKind::Int => arg
                    .value_parser(value_parser!(i64))
                    .allow_negative_numbers(true),
                FieldKind::Float => arg
                    .value_parser(parse_finite_f64)
                    .allow_negative_numbers(true),
                _ => arg.value_parser(value_parser!(String)),
            };
            if let Some(default) = default {
                arg = arg.default_value(default.to_string());
            }
        }
    }
    arg
}

/// Floats must survive a trip through `cfg_args`, and JSON has no `inf` or `nan`.
fn parse_finite_f64(raw: &str) -> Result<f64, String> {
    let value: f64 = raw.parse().map_err(|e| format!("{e}"))?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(format!("expected a finite number, got `{raw}`"))
    }
}

fn resolve_flag(flag: &RegisteredFlag, matches: &ArgMatches) -> Setting {
    let name = flag.name.as_str();
    if matches.value_source(name) != Some(ValueSource::CommandLine) {
        return match &flag.default {
            Some(default) => Setting::Default(default.clone()),
            None => Setting::Unset,
        };
    }

    let value = match flag.kind {
        FieldKind::Bool => Some(FieldValue::Bool(true)),
        FieldKind::Int => matches.get_one::<i64>(name).copied().map(FieldValue::Int),
        FieldKind::Float => matches.get_one::<f64>(name).copied().map(FieldValue::Float),
        FieldKind::Str => matches.get_one::<String>(name).cloned().map(FieldValue::Str),
    };
    value.map_or(Setting::Unset, Setting::Explicit)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> GroupManifest {
        GroupManifest::new()
            .field("sh_degree", 3)
            .field("_source_path", "")
            .field("_resolution", -1)
            .field("_white_background", false)
            .field("eval", false)
    }

    fn optimization() -> GroupManifest {
        GroupManifest::new()
            .field("iterations", 30_000)
            .field("position_lr_init", 0.00016)
            .field("random_background", false)
    }

    fn parser(suppress_defaults: bool) -> ParamParser {
        let mut parser = ParamParser::new("train");
        parser
            .add_group("Loading Parameters", &model(), suppress_defaults)
            .unwrap();
        parser
            .add_group("Optimization Parameters", &optimization(), suppress_defaults)
            .unwrap();
        parser
    }

    #[test]
    fn test_defaults_without_flags() {
        let invocation = parser(false).try_parse_from(["train"]).unwrap();
        assert_eq!(invocation.len(), 8);
        assert_eq!(
            invocation.get("sh_degree"),
            Some(&Setting::Default(FieldValue::Int(3)))
        );
        assert_eq!(
            invocation.get("position_lr_init"),
            Some(&Setting::Default(FieldValue::Float(0.00016)))
        );
        assert_eq!(
            invocation.get("eval"),
            Some(&Setting::Default(FieldValue::Bool(false)))
        );
    }

    #[test]
    fn test_suppressed_defaults_are_unset() {
        let invocation = parser(true)
            .try_parse_from(["train", "--iterations", "7000"])
            .unwrap();
        assert_eq!(invocation.get("sh_degree"), Some(&Setting::Unset));
        assert_eq!(invocation.get("eval"), Some(&Setting::Unset));
        assert_eq!(
            invocation.get("iterations"),
            Some(&Setting::Explicit(FieldValue::Int(7000)))
        );
    }

    #[test]
    fn test_typed_values() {
        let invocation = parser(false)
            .try_parse_from([
                "train",
                "--position_lr_init",
                "0.5",
                "-r",
                "-1",
                "-s",
                "data/garden",
                "--eval",
            ])
            .unwrap();
        assert_eq!(invocation.value("position_lr_init"), Some(&FieldValue::Float(0.5)));
        assert_eq!(invocation.value("resolution"), Some(&FieldValue::Int(-1)));
        assert_eq!(
            invocation.value("source_path"),
            Some(&FieldValue::from("data/garden"))
        );
        assert!(invocation.get("eval").is_some_and(Setting::is_explicit));
    }

    #[test]
    fn test_bad_value_is_parse_error() {
        let result = parser(false).try_parse_from(["train", "--iterations", "many"]);
        assert!(matches!(result, Err(ParamsError::Parse(_))));
    }

    #[test]
    fn test_bool_default_true_rests_true() {
        let mut parser = ParamParser::new("train");
        parser
            .add_group("Group", &GroupManifest::new().field("cache", true), false)
            .unwrap();
        let invocation = parser.try_parse_from(["train"]).unwrap();
        assert_eq!(
            invocation.get("cache"),
            Some(&Setting::Default(FieldValue::Bool(true)))
        );
    }

    #[test]
    fn test_flag_collision() {
        let mut parser = parser(false);
        let pipeline = GroupManifest::new().field("debug", false).field("eval", false);
        let err = parser
            .add_group("Pipeline Parameters", &pipeline, false)
            .unwrap_err();
        match err {
            ConfigurationError::FlagCollision {
                flag,
                first_group,
                second_group,
            } => {
                assert_eq!(flag, "eval");
                assert_eq!(first_group, "Loading Parameters");
                assert_eq!(second_group, "Pipeline Parameters");
            }
            other => panic!("Unexpected error {other}"),
        }
        // The failed group left nothing behind.
        assert!(!parser.flag_names().any(|n| n == "debug"));
    }

    #[test]
    fn test_collision_within_group() {
        let mut parser = ParamParser::new("train");
        let manifest = GroupManifest::new().field("_images", "images").field("images", "");
        let err = parser.add_group("Loading", &manifest, false).unwrap_err();
        assert!(matches!(err, ConfigurationError::FlagCollision { .. }));
    }

    #[test]
    fn test_shorthand_collision() {
        let mut parser = ParamParser::new("train");
        let manifest = GroupManifest::new()
            .field("_model_path", "")
            .field("_max_frames", 10);
        let err = parser.add_group("Loading", &manifest, false).unwrap_err();
        match err {
            ConfigurationError::ShorthandCollision {
                short,
                flag,
                existing,
            } => {
                assert_eq!(short, 'm');
                assert_eq!(flag, "max_frames");
                assert_eq!(existing, "model_path");
            }
            other => panic!("Unexpected error {other}"),
        }
    }

    #[test]
    fn test_shorthand_collision_across_groups() {
        let mut parser = ParamParser::new("train");
        parser
            .add_group("Loading", &GroupManifest::new().field("_model_path", ""), false)
            .unwrap();
        let err = parser
            .add_group("Render", &GroupManifest::new().field("_max_frames", 10), false)
            .unwrap_err();
        match err {
            ConfigurationError::ShorthandCollision {
                short,
                flag,
                existing,
            } => {
                assert_eq!(short, 'm');
                assert_eq!(flag, "max_frames");
                assert_eq!(existing, "model_path");
            }
            other => panic!("Unexpected error {other}"),
        }
        assert!(!parser.flag_names().any(|n| n == "max_frames"));
        // The first group still parses.
        let invocation = parser.try_parse_from(["train", "-m", "out"]).unwrap();
        assert_eq!(invocation.value("model_path"), Some(&FieldValue::from("out")));
    }

    #[test]
    fn test_non_finite_float_rejected() {
        for raw in ["inf", "-inf", "nan", "NaN", "infinity"] {
            let result = parser(false).try_parse_from(["train", "--position_lr_init", raw]);
            assert!(
                matches!(result, Err(ParamsError::Parse(_))),
                "{raw} should be rejected"
            );
        }
        let invocation = parser(false)
            .try_parse_from(["train", "--position_lr_init", "-1e-3"])
            .unwrap();
        assert_eq!(
            invocation.get("position_lr_init"),
            Some(&Setting::Explicit(FieldValue::Float(-1e-3)))
        );
    }

    #[test]
    fn test_reserved_help() {
        let mut parser = ParamParser::new("train");
        let manifest = GroupManifest::new().field("_height", 10);
        assert!(matches!(
            parser.add_group("Render", &manifest, false),
            Err(ConfigurationError::ReservedFlag { .. })
        ));
    }

    #[test]
    fn test_help_lists_group_heading() {
        let mut command = parser(false).into_command();
        let help = command.render_help().to_string();
        assert!(help.contains("Loading Parameters"));
        assert!(help.contains("--source_path"));
        assert!(help.contains("-s"));
    }
}
