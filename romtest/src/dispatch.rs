// Copyright (c) The romtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    ExpectedError, RomtestExitCode,
    output::{OutputContext, OutputOpts, clap_styles},
};
use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use romtest_runner::{
    config::{BuildProfile, RomtestConfig},
    corpus::CorpusSource,
    errors::WriteEventError,
    orchestrator::Orchestrator,
    reporter::TestReporter,
    signal::SignalHandler,
};
use tracing::debug;

/// Build an emulator and run it against a corpus of test ROMs.
///
/// Each ROM is run in the emulator with serial tracing enabled. A ROM passes once the emulator
/// prints the pass marker, fails on the fail marker, and otherwise times out or crashes.
#[derive(Debug, Parser)]
#[command(version, styles = clap_styles::style())]
pub struct RomtestApp {
    /// Harness root: the build and the emulator run here [default: current directory]
    #[arg(long, global = true, value_name = "PATH", env = "ROMTEST_ROOT")]
    root: Option<Utf8PathBuf>,

    /// Config file [default: <root>/.config/romtest.toml]
    #[arg(long, global = true, value_name = "PATH")]
    config_file: Option<Utf8PathBuf>,

    #[command(flatten)]
    output: OutputOpts,

    #[command(subcommand)]
    command: Command,
}

impl RomtestApp {
    /// Initializes logging and color support. Call once, before [`exec`](Self::exec).
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the app, returning the exit code on success.
    pub fn exec(self, output: OutputContext) -> Result<i32, ExpectedError> {
        let cwd = current_dir()?;
        let root = match &self.root {
            Some(root) => cwd.join(root),
            None => cwd.clone(),
        };
        let config_file = self.config_file.as_deref().map(|file| cwd.join(file));
        let config = RomtestConfig::from_sources(&root, config_file.as_deref())?;

        match self.command {
            Command::Run { run_opts } => {
                let corpus = config.curated_corpus();
                run_opts.exec(&config, &corpus, output)
            }
            Command::RunDir {
                corpus_dir,
                run_opts,
            } => {
                // Relative to where the user is, not the root.
                let corpus = config.directory_corpus(&cwd.join(corpus_dir));
                run_opts.exec(&config, &corpus, output)
            }
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the curated corpus configured in `[corpus]`
    Run {
        #[command(flatten)]
        run_opts: RunOpts,
    },

    /// Run every ROM in a directory that matches `corpus.pattern`
    RunDir {
        /// Directory to look for ROMs in (not recursive)
        #[arg(value_name = "CORPUS_DIR")]
        corpus_dir: Utf8PathBuf,

        #[command(flatten)]
        run_opts: RunOpts,
    },
}

#[derive(Debug, Args)]
struct RunOpts {
    /// Build and run the emulator with the release profile
    #[arg(long)]
    release: bool,

    /// Configuration profile to use
    #[arg(
        long,
        short = 'P',
        env = "ROMTEST_PROFILE",
        value_name = "PROFILE",
        default_value = RomtestConfig::DEFAULT_PROFILE,
    )]
    profile: String,
}

impl RunOpts {
    fn exec(
        self,
        config: &RomtestConfig,
        corpus: &dyn CorpusSource,
        output: OutputContext,
    ) -> Result<i32, ExpectedError> {
        let build_profile = if self.release {
            BuildProfile::Release
        } else {
            BuildProfile::Debug
        };
        let settings = config.settings(&self.profile, build_profile)?;
        debug!(
            "running with profile `{}` ({build_profile} build), root {}",
            self.profile, settings.root,
        );

        let signals = SignalHandler::new()?;

        let mut reporter = TestReporter::new(&settings.root);
        if output.colorize_stderr() {
            reporter.colorize();
        }

        let stderr = std::io::stderr();
        let orchestrator = Orchestrator::new(&settings, &signals);
        let summary = orchestrator.execute(corpus, |event| {
            reporter
                .report_event(event, stderr.lock())
                .map_err(WriteEventError::from)
        })?;

        if summary.stats.is_success() {
            Ok(RomtestExitCode::OK)
        } else {
            Err(ExpectedError::TestRunFailed)
        }
    }
}

fn current_dir() -> Result<Utf8PathBuf, ExpectedError> {
    let cwd = std::env::current_dir().map_err(|err| ExpectedError::CurrentDirFailed { err })?;
    Utf8PathBuf::from_path_buf(cwd).map_err(|path| ExpectedError::NonUtf8Path { path })
}
