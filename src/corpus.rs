//! Corpus data model and on-disk loading.
//!
//! A corpus is the set of log-emitting call sites extracted from one or more
//! projects. Each project is stored as one JSON file named
//! `corpus_project_<name>.json` inside the corpus directory; loading is
//! read-only here, extraction is a separate concern.

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// File name prefix shared by all per-project corpus files.
pub const CORPUS_FILE_PREFIX: &str = "corpus_project_";

/// The only call syntax the match engine understands.
pub const SYNTAX_PRINTFLIKE: &str = "printflike";

/// How a family of log calls is declared: an id, the format-string syntax,
/// and a hyperlink template with `{file}` and `{line}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogCallDefinition {
    pub id: String,
    #[serde(default)]
    pub syntax: String,
    #[serde(default)]
    pub link_template: String,
}

/// One log-emitting call site: location, format string, and the textual form
/// of each argument expression at the call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogCall {
    pub file: String,
    pub line: u32,
    pub definition_id: String,
    pub format_string: String,
    #[serde(default)]
    pub argument_exprs: Vec<String>,
}

/// The corpus contents of a single project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusFile {
    pub project: String,
    #[serde(default)]
    pub definitions: Vec<LogCallDefinition>,
    #[serde(default)]
    pub calls: Vec<LogCall>,
}

/// Project name to corpus-file mapping.
///
/// Ordered so that engine construction (and with it prefilter pattern ids and
/// the cache key) is deterministic across runs.
pub type Corpus = BTreeMap<String, CorpusFile>;

/// Reads every `corpus_project_*.json` file under `dir` into a [`Corpus`].
///
/// Files without the prefix are ignored. Unreadable files and malformed JSON
/// are fatal.
pub fn read_corpus(dir: &Path) -> Result<Corpus, CorpusError> {
    let entries = std::fs::read_dir(dir).map_err(|source| CorpusError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut corpus = Corpus::new();
    for entry in entries {
        let entry = entry.map_err(|source| CorpusError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(CORPUS_FILE_PREFIX) {
            continue;
        }
        let path = entry.path();
        let data = std::fs::read(&path).map_err(|source| CorpusError::Io {
            path: path.clone(),
            source,
        })?;
        let file: CorpusFile =
            serde_json::from_slice(&data).map_err(|source| CorpusError::Parse {
                path: path.clone(),
                source,
            })?;
        corpus.insert(file.project.clone(), file);
    }
    Ok(corpus)
}

/// Errors reading the corpus directory.
#[derive(Debug)]
#[non_exhaustive]
pub enum CorpusError {
    /// I/O error reading the directory or a corpus file.
    Io { path: PathBuf, source: io::Error },
    /// A corpus file is not valid corpus JSON.
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl fmt::Display for CorpusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "error reading corpus at {}: {source}", path.display())
            }
            Self::Parse { path, source } => {
                write!(
                    f,
                    "error parsing corpus file {}: {source}",
                    path.display()
                )
            }
        }
    }
}

impl Error for CorpusError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
        }
    }
}
