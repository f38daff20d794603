// Copyright (c) The romtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Resolving the list of ROMs to run.
//!
//! Two strategies are provided: a [`CuratedCorpus`] is a fixed list of ROMs and directories under a
//! base directory, and a [`DirectoryCorpus`] is every matching file in a single directory. Both
//! implement [`CorpusSource`], which is what the orchestrator accepts.

use crate::errors::CorpusError;
use camino::{Utf8Path, Utf8PathBuf};
use globset::Glob;
use serde::Deserialize;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// A strategy for resolving a [`Corpus`].
pub trait CorpusSource {
    /// Resolves the corpus.
    fn resolve(&self) -> Result<Corpus, CorpusError>;

    /// Returns a human-readable description of where ROMs are looked for, used in messages.
    fn description(&self) -> String;
}

/// An ordered list of ROMs. ROMs are run in this order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Corpus {
    roms: Vec<Utf8PathBuf>,
}

impl Corpus {
    /// Creates a new corpus from a list of ROMs.
    pub fn new(roms: impl IntoIterator<Item = Utf8PathBuf>) -> Self {
        Self {
            roms: roms.into_iter().collect(),
        }
    }

    /// Returns the ROMs in this corpus.
    pub fn roms(&self) -> &[Utf8PathBuf] {
        &self.roms
    }

    /// Returns the number of ROMs.
    pub fn len(&self) -> usize {
        self.roms.len()
    }

    /// Returns true if there are no ROMs.
    pub fn is_empty(&self) -> bool {
        self.roms.is_empty()
    }
}

/// An entry in a curated corpus.
///
/// In config files, an entry is a table with either a `path` key, or a `dir` key and an optional
/// `pattern` key.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(try_from = "CorpusEntryDeserialize")]
pub enum CorpusEntry {
    /// A single ROM.
    Rom {
        /// The path to the ROM, relative to the corpus base directory.
        path: Utf8PathBuf,
    },

    /// Every matching file directly inside a directory.
    Dir {
        /// The directory, relative to the corpus base directory.
        dir: Utf8PathBuf,

        /// The glob pattern file names must match. Defaults to the corpus pattern.
        #[serde(default)]
        pattern: Option<String>,
    },
}

// Deserialized as a plain struct rather than an untagged enum, so that misspelled keys are
// reported as unknown.
#[derive(Deserialize)]
struct CorpusEntryDeserialize {
    path: Option<Utf8PathBuf>,
    dir: Option<Utf8PathBuf>,
    pattern: Option<String>,
}

impl TryFrom<CorpusEntryDeserialize> for CorpusEntry {
    type Error = &'static str;

    fn try_from(entry: CorpusEntryDeserialize) -> Result<Self, Self::Error> {
        match entry {
            CorpusEntryDeserialize {
                path: Some(path),
                dir: None,
                pattern: None,
            } => Ok(CorpusEntry::Rom { path }),
            CorpusEntryDeserialize {
                path: None,
                dir: Some(dir),
                pattern,
            } => Ok(CorpusEntry::Dir { dir, pattern }),
            CorpusEntryDeserialize {
                path: Some(_),
                dir: Some(_),
                ..
            } => Err("corpus entry has both `path` and `dir`, expected exactly one"),
            CorpusEntryDeserialize {
                path: Some(_),
                pattern: Some(_),
                ..
            } => Err("`pattern` only applies to `dir` corpus entries"),
            CorpusEntryDeserialize {
                path: None,
                dir: None,
                ..
            } => Err("corpus entry has neither `path` nor `dir`, expected exactly one"),
        }
    }
}

/// A fixed list of ROMs and directories, all relative to a base directory.
#[derive(Clone, Debug)]
pub struct CuratedCorpus {
    base_dir: Utf8PathBuf,
    default_pattern: String,
    entries: Vec<CorpusEntry>,
}

impl CuratedCorpus {
    /// Creates a new curated corpus.
    pub fn new(
        base_dir: impl Into<Utf8PathBuf>,
        default_pattern: impl Into<String>,
        entries: impl IntoIterator<Item = CorpusEntry>,
    ) -> Self {
        Self {
            base_dir: base_dir.into(),
            default_pattern: default_pattern.into(),
            entries: entries.into_iter().collect(),
        }
    }

    /// Returns the base directory.
    pub fn base_dir(&self) -> &Utf8Path {
        &self.base_dir
    }

    /// Returns the entries, in order.
    pub fn entries(&self) -> &[CorpusEntry] {
        &self.entries
    }
}

impl CorpusSource for CuratedCorpus {
    /// Resolves entries in order.
    ///
    /// A single ROM that doesn't exist is skipped with a warning. A directory that doesn't exist
    /// contributes nothing.
    fn resolve(&self) -> Result<Corpus, CorpusError> {
        let mut roms = Vec::new();
        for entry in &self.entries {
            match entry {
                CorpusEntry::Rom { path } => {
                    let path = self.base_dir.join(path);
                    if path.is_file() {
                        roms.push(path);
                    } else {
                        warn!("skipping ROM {path}: file not found");
                    }
                }
                CorpusEntry::Dir { dir, pattern } => {
                    let pattern = pattern.as_deref().unwrap_or(&self.default_pattern);
                    roms.extend(glob_dir(&self.base_dir.join(dir), pattern)?);
                }
            }
        }
        Ok(Corpus::new(roms))
    }

    fn description(&self) -> String {
        format!("curated corpus under `{}`", self.base_dir)
    }
}

/// Every file directly inside a directory whose name matches a pattern.
#[derive(Clone, Debug)]
pub struct DirectoryCorpus {
    dir: Utf8PathBuf,
    pattern: String,
}

impl DirectoryCorpus {
    /// Creates a new directory corpus.
    pub fn new(dir: impl Into<Utf8PathBuf>, pattern: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            pattern: pattern.into(),
        }
    }

    /// Returns the directory.
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    /// Returns the pattern.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

impl CorpusSource for DirectoryCorpus {
    fn resolve(&self) -> Result<Corpus, CorpusError> {
        glob_dir(&self.dir, &self.pattern).map(Corpus::new)
    }

    fn description(&self) -> String {
        format!("directory `{}` (pattern `{}`)", self.dir, self.pattern)
    }
}

/// Lists files directly inside `dir` whose names match `pattern`, sorted by file name.
fn glob_dir(dir: &Utf8Path, pattern: &str) -> Result<Vec<Utf8PathBuf>, CorpusError> {
    let matcher = Glob::new(pattern)
        .map_err(|err| CorpusError::InvalidPattern {
            pattern: pattern.to_owned(),
            err,
        })?
        .compile_matcher();

    if !dir.is_dir() {
        debug!("ROM directory {dir} does not exist");
        return Ok(Vec::new());
    }

    let mut roms = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|err| CorpusError::ReadDir {
            dir: dir.to_owned(),
            err,
        })?;
        // Follows symlinks, unlike the entry's own file type.
        if !entry.path().is_file() {
            continue;
        }
        let path = Utf8PathBuf::from_path_buf(entry.into_path())
            .map_err(|path| CorpusError::NonUtf8Path { path })?;
        if path.file_name().is_some_and(|name| matcher.is_match(name)) {
            roms.push(path);
        }
    }

    Ok(roms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn touch(path: &Utf8Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn directory_corpus_sorted_and_filtered() {
        let root = camino_tempfile::tempdir().unwrap();
        let dir = root.path().join("roms");
        for name in ["02-interrupts.gb", "01-special.gb", "readme.txt", "10-bit ops.gb"] {
            touch(&dir.join(name));
        }
        fs::create_dir_all(dir.join("nested.gb")).unwrap();
        touch(&dir.join("nested.gb/03-op sp,hl.gb"));

        let corpus = DirectoryCorpus::new(&dir, "*.gb").resolve().unwrap();
        assert_eq!(
            corpus.roms(),
            [
                dir.join("01-special.gb"),
                dir.join("02-interrupts.gb"),
                dir.join("10-bit ops.gb"),
            ]
        );
    }

    #[test]
    fn missing_directory_is_empty() {
        let root = camino_tempfile::tempdir().unwrap();
        let corpus = DirectoryCorpus::new(root.path().join("missing"), "*.gb")
            .resolve()
            .unwrap();
        assert!(corpus.is_empty());
    }

    #[test]
    fn invalid_pattern() {
        let root = camino_tempfile::tempdir().unwrap();
        let err = DirectoryCorpus::new(root.path(), "[").resolve().unwrap_err();
        match err {
            CorpusError::InvalidPattern { pattern, .. } => assert_eq!(pattern, "["),
            other => panic!("expected invalid pattern, found {other:?}"),
        }
    }

    #[test]
    fn curated_corpus_preserves_entry_order() {
        let root = camino_tempfile::tempdir().unwrap();
        let base = root.path().join("lib/gb-test-roms");
        for path in [
            "cpu_instrs/cpu_instrs.gb",
            "cpu_instrs/individual/02-interrupts.gb",
            "cpu_instrs/individual/01-special.gb",
            "instr_timing/instr_timing.gb",
            "mem_timing/individual/01-read_timing.gb",
            "mem_timing/individual/01-read_timing.gbc",
        ] {
            touch(&base.join(path));
        }

        let corpus = CuratedCorpus::new(
            &base,
            "*.gb",
            [
                CorpusEntry::Rom {
                    path: "cpu_instrs/cpu_instrs.gb".into(),
                },
                CorpusEntry::Dir {
                    dir: "cpu_instrs/individual".into(),
                    pattern: None,
                },
                CorpusEntry::Rom {
                    path: "instr_timing/instr_timing.gb".into(),
                },
                // Doesn't exist: skipped.
                CorpusEntry::Rom {
                    path: "mem_timing/mem_timing.gb".into(),
                },
                CorpusEntry::Dir {
                    dir: "mem_timing/individual".into(),
                    pattern: Some("*.gbc".to_owned()),
                },
                // Doesn't exist: contributes nothing.
                CorpusEntry::Dir {
                    dir: "dmg_sound".into(),
                    pattern: None,
                },
            ],
        );

        let corpus = corpus.resolve().unwrap();
        assert_eq!(
            corpus.roms(),
            [
                base.join("cpu_instrs/cpu_instrs.gb"),
                base.join("cpu_instrs/individual/01-special.gb"),
                base.join("cpu_instrs/individual/02-interrupts.gb"),
                base.join("instr_timing/instr_timing.gb"),
                base.join("mem_timing/individual/01-read_timing.gbc"),
            ]
        );
    }

    #[test]
    fn descriptions() {
        assert_eq!(
            DirectoryCorpus::new("roms", "*.gb").description(),
            "directory `roms` (pattern `*.gb`)"
        );
        assert_eq!(
            CuratedCorpus::new("lib/gb-test-roms", "*.gb", Vec::new()).description(),
            "curated corpus under `lib/gb-test-roms`"
        );
    }
}
