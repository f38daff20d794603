// Copyright (c) The romtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for romtest.
//!
//! Configuration is layered: the embedded [default config](RomtestConfig::DEFAULT_CONFIG) comes
//! first, and the repository's `.config/romtest.toml` (or a file passed in explicitly) is merged on
//! top of it. The result is turned into a [`HarnessSettings`] for a particular profile and build
//! profile.

use crate::{
    build::BuildCommand,
    classifier::ResultClassifier,
    corpus::{CorpusEntry, CuratedCorpus, DirectoryCorpus},
    errors::{ConfigParseError, ConfigParseErrorKind, ProfileNotFound},
    process::EmulatorCommand,
    supervisor::SupervisorOpts,
};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigBuilder, ConfigError, File, FileFormat, builder::DefaultState};
use itertools::Itertools;
use serde::Deserialize;
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    time::Duration,
};
use tracing::warn;

/// Whether the emulator is built and run in debug or release mode.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum BuildProfile {
    /// The default, unoptimized build.
    #[default]
    Debug,

    /// The optimized build, selected with `--release`.
    Release,
}

impl BuildProfile {
    /// Returns the name of the directory under the target directory that holds binaries for this
    /// profile.
    pub fn dir_name(self) -> &'static str {
        match self {
            BuildProfile::Debug => "debug",
            BuildProfile::Release => "release",
        }
    }
}

impl fmt::Display for BuildProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Everything the orchestrator needs to run a corpus.
///
/// Produced by [`RomtestConfig::settings`].
#[derive(Clone, Debug)]
pub struct HarnessSettings {
    /// The harness root. The build and every emulator run use it as their working directory.
    pub root: Utf8PathBuf,

    /// The build command.
    pub build: BuildCommand,

    /// How to invoke the emulator.
    pub emulator: EmulatorCommand,

    /// The pass and fail markers.
    pub classifier: ResultClassifier,

    /// Timing parameters for each run.
    pub supervisor: SupervisorOpts,
}

/// Overall configuration for romtest.
#[derive(Clone, Debug)]
pub struct RomtestConfig {
    root: Utf8PathBuf,
    inner: RomtestConfigImpl,
}

impl RomtestConfig {
    /// The default location of the config within the root: `.config/romtest.toml`.
    pub const CONFIG_PATH: &'static str = ".config/romtest.toml";

    /// Contains the default config as a TOML file.
    ///
    /// Repository-specific configuration is layered on top of the default config.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../default-config.toml");

    /// The name of the default profile.
    pub const DEFAULT_PROFILE: &'static str = "default";

    /// Reads the romtest config from the given file, or if not specified from
    /// `.config/romtest.toml` in the root.
    ///
    /// If no config file is specified and the root doesn't have `.config/romtest.toml`, uses the
    /// default config options. Unknown keys are reported as warnings.
    pub fn from_sources(
        root: impl Into<Utf8PathBuf>,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigParseError> {
        Self::from_sources_impl(root, config_file, |config_file, unknown| {
            warn!(
                "ignoring unknown configuration keys in config file {config_file}: {}",
                unknown.iter().join(", ")
            )
        })
    }

    // A custom unknown_callback can be passed in while testing.
    fn from_sources_impl(
        root: impl Into<Utf8PathBuf>,
        config_file: Option<&Utf8Path>,
        mut unknown_callback: impl FnMut(&Utf8Path, &BTreeSet<String>),
    ) -> Result<Self, ConfigParseError> {
        let root = root.into();

        let (config_file, source) = match config_file {
            Some(file) => (file.to_owned(), File::new(file.as_str(), FileFormat::Toml)),
            None => {
                let config_file = root.join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };

        let builder = Self::make_default_config().add_source(source);
        let (config, unknown) = Self::build_and_deserialize_config(builder)
            .map_err(|kind| ConfigParseError::new(&config_file, kind))?;

        if !unknown.is_empty() {
            unknown_callback(&config_file, &unknown);
        }

        let inner = config
            .into_config_impl()
            .map_err(|kind| ConfigParseError::new(&config_file, kind))?;
        Ok(Self { root, inner })
    }

    /// Returns the harness root.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Returns the supervisor options for the given profile, or an error if the profile isn't
    /// known.
    ///
    /// Keys not set by the profile are taken from the default profile.
    pub fn supervisor_opts(&self, profile: &str) -> Result<SupervisorOpts, ProfileNotFound> {
        let custom = self.inner.profiles.get(profile).ok_or_else(|| {
            ProfileNotFound::new(profile, self.inner.profiles.keys().map(String::as_str))
        })?;
        let default = self.inner.profiles.get(Self::DEFAULT_PROFILE);
        let fallback = SupervisorOpts::default();

        let resolve = |get: fn(&ProfileConfig) -> Option<Duration>, fallback: Duration| {
            get(custom)
                .or_else(|| default.and_then(get))
                .unwrap_or(fallback)
        };

        Ok(SupervisorOpts {
            timeout: resolve(|p| p.timeout, fallback.timeout),
            poll_interval: resolve(|p| p.poll_interval, fallback.poll_interval),
            grace_period: resolve(|p| p.grace_period, fallback.grace_period),
        })
    }

    /// Resolves the settings for a run with the given profile and build profile.
    pub fn settings(
        &self,
        profile: &str,
        build_profile: BuildProfile,
    ) -> Result<HarnessSettings, ProfileNotFound> {
        let supervisor = self.supervisor_opts(profile)?;

        let build = &self.inner.build;
        let mut build_args = build.args.clone();
        if build_profile == BuildProfile::Release {
            build_args.extend(build.release_args.iter().cloned());
        }
        let build = BuildCommand::new(build.program.clone(), build_args, &self.root);

        let emulator = &self.inner.emulator;
        let program = self
            .root
            .join(&emulator.target_dir)
            .join(build_profile.dir_name())
            .join(&emulator.binary);
        let emulator =
            EmulatorCommand::new(program, &self.root).with_runner(emulator.runner.iter().cloned());

        let markers = &self.inner.markers;
        let classifier = ResultClassifier::new(&markers.pass, &markers.fail);

        Ok(HarnessSettings {
            root: self.root.clone(),
            build,
            emulator,
            classifier,
            supervisor,
        })
    }

    /// Returns the curated corpus configured in `[corpus]`.
    pub fn curated_corpus(&self) -> CuratedCorpus {
        let corpus = &self.inner.corpus;
        CuratedCorpus::new(
            self.root.join(&corpus.base_dir),
            &corpus.pattern,
            corpus.entries.iter().cloned(),
        )
    }

    /// Returns a corpus of every file in `dir` matching the configured pattern.
    ///
    /// A relative `dir` is interpreted relative to the root.
    pub fn directory_corpus(&self, dir: &Utf8Path) -> DirectoryCorpus {
        DirectoryCorpus::new(self.root.join(dir), &self.inner.corpus.pattern)
    }

    // ---
    // Helper methods
    // ---

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    /// This returns a tuple of (config, ignored paths).
    fn build_and_deserialize_config(
        builder: ConfigBuilder<DefaultState>,
    ) -> Result<(RomtestConfigDeserialize, BTreeSet<String>), ConfigParseErrorKind> {
        let config = builder
            .build()
            .map_err(|error| ConfigParseErrorKind::BuildError(Box::new(error)))?;

        let mut ignored = BTreeSet::new();
        let mut cb = |path: serde_ignored::Path| {
            ignored.insert(path.to_string());
        };
        let ignored_de = serde_ignored::Deserializer::new(config, &mut cb);
        let config: RomtestConfigDeserialize = serde_path_to_error::deserialize(ignored_de)
            .map_err(|error| {
                // serde_path_to_error already reports the key, so drop it from the config error.
                let path = error.path().clone();
                let error = match error.into_inner() {
                    ConfigError::At { error, .. } => *error,
                    other => other,
                };
                ConfigParseErrorKind::DeserializeError(Box::new(serde_path_to_error::Error::new(
                    path, error,
                )))
            })?;

        Ok((config, ignored))
    }
}

#[derive(Clone, Debug)]
struct RomtestConfigImpl {
    build: BuildConfigImpl,
    emulator: EmulatorConfig,
    markers: MarkersConfig,
    corpus: CorpusConfig,
    profiles: BTreeMap<String, ProfileConfig>,
}

#[derive(Clone, Debug)]
struct BuildConfigImpl {
    program: String,
    args: Vec<String>,
    release_args: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RomtestConfigDeserialize {
    build: BuildConfig,
    emulator: EmulatorConfig,
    markers: MarkersConfig,
    corpus: CorpusConfig,
    #[serde(rename = "profile")]
    profiles: BTreeMap<String, ProfileConfig>,
}

impl RomtestConfigDeserialize {
    fn into_config_impl(self) -> Result<RomtestConfigImpl, ConfigParseErrorKind> {
        let mut command = self.build.command.into_iter();
        let program = command
            .next()
            .ok_or(ConfigParseErrorKind::EmptyBuildCommand)?;

        Ok(RomtestConfigImpl {
            build: BuildConfigImpl {
                program,
                args: command.collect(),
                release_args: self.build.release_args,
            },
            emulator: self.emulator,
            markers: self.markers,
            corpus: self.corpus,
            profiles: self.profiles,
        })
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct BuildConfig {
    command: Vec<String>,
    release_args: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct EmulatorConfig {
    binary: String,
    target_dir: Utf8PathBuf,
    runner: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
struct MarkersConfig {
    pass: String,
    fail: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct CorpusConfig {
    base_dir: Utf8PathBuf,
    pattern: String,
    entries: Vec<CorpusEntry>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ProfileConfig {
    #[serde(default, with = "humantime_serde::option")]
    timeout: Option<Duration>,
    #[serde(default, with = "humantime_serde::option")]
    poll_interval: Option<Duration>,
    #[serde(default, with = "humantime_serde::option")]
    grace_period: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use std::fs;
    use test_case::test_case;

    fn temp_root(config: Option<&str>) -> Utf8TempDir {
        let dir = camino_tempfile::tempdir().unwrap();
        if let Some(config) = config {
            fs::create_dir_all(dir.path().join(".config")).unwrap();
            fs::write(dir.path().join(RomtestConfig::CONFIG_PATH), config).unwrap();
        }
        dir
    }

    fn parse(root: &Utf8Path) -> (RomtestConfig, BTreeSet<String>) {
        let mut unknown = BTreeSet::new();
        let config = RomtestConfig::from_sources_impl(root, None, |_, keys| {
            unknown.extend(keys.iter().cloned())
        })
        .unwrap();
        (config, unknown)
    }

    #[test]
    fn default_config_is_valid() {
        let root = temp_root(None);
        let (config, unknown) = parse(root.path());
        assert!(
            unknown.is_empty(),
            "found unknown keys in default config: {unknown:?}"
        );

        let settings = config.settings("default", BuildProfile::Debug).unwrap();
        assert_eq!(settings.root, root.path());
        assert_eq!(settings.build.to_string(), "cargo build");
        assert_eq!(
            settings.emulator.program(),
            root.path().join("target/debug/gameboy-rs")
        );
        assert_eq!(settings.emulator.cwd(), root.path());
        assert_eq!(settings.classifier, ResultClassifier::default());
        assert_eq!(settings.supervisor, SupervisorOpts::default());
    }

    #[test]
    fn release_settings() {
        let root = temp_root(None);
        let (config, _) = parse(root.path());
        let settings = config.settings("default", BuildProfile::Release).unwrap();
        assert_eq!(settings.build.to_string(), "cargo build --release");
        assert_eq!(
            settings.emulator.program(),
            root.path().join("target/release/gameboy-rs")
        );
    }

    #[test]
    fn repo_config_overrides_defaults() {
        let root = temp_root(Some(indoc! {r#"
            [build]
            command = ["make", "emulator"]
            release-args = ["PROFILE=release"]

            [emulator]
            binary = "dmg"
            target-dir = "out"
            runner = ["valgrind", "-q"]

            [markers]
            pass = "TEST OK"

            [profile.default]
            timeout = "2m"

            [profile.ci]
            poll-interval = "50ms"
        "#}));
        let (config, unknown) = parse(root.path());
        assert!(unknown.is_empty(), "unexpected unknown keys: {unknown:?}");

        let settings = config.settings("ci", BuildProfile::Release).unwrap();
        assert_eq!(settings.build.argv(), ["make", "emulator", "PROFILE=release"]);
        let program = root.path().join("out/release/dmg");
        assert_eq!(settings.emulator.program(), program);
        assert_eq!(
            settings.emulator.argv(Utf8Path::new("a.gb")),
            vec![
                "valgrind",
                "-q",
                program.as_str(),
                "--rom",
                "a.gb",
                "--headless",
                "--trace-mode",
                "serial",
            ]
        );
        assert_eq!(settings.classifier, ResultClassifier::new("TEST OK", "Failed"));
        assert_eq!(
            settings.supervisor,
            SupervisorOpts {
                // Inherited from the overridden default profile.
                timeout: Duration::from_secs(120),
                poll_interval: Duration::from_millis(50),
                grace_period: Duration::from_secs(1),
            }
        );
    }

    #[test]
    fn unknown_keys_are_reported() {
        let root = temp_root(Some(indoc! {r#"
            [emulator]
            binaryy = "dmg"

            [profile.default]
            retries = 3
        "#}));
        let (_, unknown) = parse(root.path());
        assert_eq!(
            unknown,
            ["emulator.binaryy", "profile.default.retries"]
                .into_iter()
                .map(String::from)
                .collect::<BTreeSet<_>>()
        );
    }

    #[test]
    fn unknown_profile() {
        let root = temp_root(Some(indoc! {r#"
            [profile.ci]
            timeout = "10s"
        "#}));
        let (config, _) = parse(root.path());
        let err = config.settings("nightly", BuildProfile::Debug).unwrap_err();
        assert_eq!(
            err.to_string(),
            "profile `nightly` not found (known profiles: ci, default)"
        );
    }

    #[test]
    fn invalid_duration() {
        let root = temp_root(Some(indoc! {r#"
            [profile.default]
            timeout = "fifty seconds"
        "#}));
        let err = RomtestConfig::from_sources(root.path(), None).unwrap_err();
        assert_eq!(err.config_file(), root.path().join(RomtestConfig::CONFIG_PATH));
        match err.kind() {
            ConfigParseErrorKind::DeserializeError(err) => {
                assert_eq!(err.path().to_string(), "profile.default.timeout");
            }
            other => panic!("expected deserialize error, found {other:?}"),
        }
    }

    #[test]
    fn empty_build_command() {
        let root = temp_root(Some(indoc! {r#"
            [build]
            command = []
        "#}));
        let err = RomtestConfig::from_sources(root.path(), None).unwrap_err();
        assert!(
            matches!(err.kind(), ConfigParseErrorKind::EmptyBuildCommand),
            "unexpected error: {err:?}"
        );
    }

    #[test]
    fn explicit_config_file_must_exist() {
        let root = temp_root(None);
        let missing = root.path().join("missing.toml");
        let err = RomtestConfig::from_sources(root.path(), Some(&missing)).unwrap_err();
        assert_eq!(err.config_file(), missing);
        assert!(
            matches!(err.kind(), ConfigParseErrorKind::BuildError(_)),
            "unexpected error: {err:?}"
        );
    }

    #[test]
    fn corpus_entries() {
        let root = temp_root(Some(indoc! {r#"
            [corpus]
            base-dir = "roms"
            pattern = "*.gbc"
            entries = [
                { path = "acid/cgb-acid2.gbc" },
                { dir = "blargg", pattern = "*.gb" },
                { dir = "mooneye" },
            ]
        "#}));
        let (config, unknown) = parse(root.path());
        assert!(unknown.is_empty(), "unexpected unknown keys: {unknown:?}");

        let corpus = config.curated_corpus();
        assert_eq!(corpus.base_dir(), root.path().join("roms"));
        assert_eq!(
            corpus.entries(),
            [
                CorpusEntry::Rom {
                    path: "acid/cgb-acid2.gbc".into()
                },
                CorpusEntry::Dir {
                    dir: "blargg".into(),
                    pattern: Some("*.gb".to_owned()),
                },
                CorpusEntry::Dir {
                    dir: "mooneye".into(),
                    pattern: None,
                },
            ]
        );

        let dir_corpus = config.directory_corpus(Utf8Path::new("extra"));
        assert_eq!(dir_corpus.dir(), root.path().join("extra"));
        assert_eq!(dir_corpus.pattern(), "*.gbc");
    }

    #[test]
    fn corpus_entry_unknown_keys_are_reported() {
        let root = temp_root(Some(indoc! {r#"
            [corpus]
            entries = [
                { dir = "blargg", patern = "*.gbc" },
                { path = "acid/dmg-acid2.gb", skip = true },
            ]
        "#}));
        let (config, unknown) = parse(root.path());
        assert_eq!(
            unknown,
            ["corpus.entries.0.patern", "corpus.entries.1.skip"]
                .into_iter()
                .map(String::from)
                .collect::<BTreeSet<_>>()
        );
        assert_eq!(
            config.curated_corpus().entries(),
            [
                CorpusEntry::Dir {
                    dir: "blargg".into(),
                    pattern: None,
                },
                CorpusEntry::Rom {
                    path: "acid/dmg-acid2.gb".into()
                },
            ]
        );
    }

    #[test_case(r#"{ path = "a.gb", dir = "blargg" }"#, "both `path` and `dir`" ; "path and dir")]
    #[test_case(r#"{ path = "a.gb", pattern = "*.gb" }"#, "`pattern` only applies" ; "pattern with path")]
    #[test_case(r#"{ pattern = "*.gb" }"#, "neither `path` nor `dir`" ; "no path or dir")]
    fn invalid_corpus_entry(entry: &str, message: &str) {
        let config = format!("[corpus]\nentries = [{{ dir = \"ok\" }}, {entry}]\n");
        let root = temp_root(Some(&config));
        let err = RomtestConfig::from_sources(root.path(), None).unwrap_err();
        match err.kind() {
            ConfigParseErrorKind::DeserializeError(err) => {
                assert_eq!(err.path().to_string(), "corpus.entries[1]");
                let inner = err.inner().to_string();
                assert!(inner.contains(message), "unexpected message: {inner}");
            }
            other => panic!("expected deserialize error, found {other:?}"),
        }
    }
}
