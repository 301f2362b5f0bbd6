//! The match engine: corpus compilation and per-line annotation.
//!
//! # High-level flow (single line)
//!
//! 1) Strip the configured prefix (fixed column or n-th character).
//! 2) Prefilter scan over the body yields `(id, from, to)` candidates.
//! 3) Each surviving candidate is confirmed with its call site's PCRE2
//!    regex; confirmed matches are scored by literal coverage.
//! 4) The best-scoring match is thresholded and rendered: reference column,
//!    then the body with argument-expression annotations interleaved.
//!
//! # Construction
//!
//! Engine construction walks the corpus in project order, translates every
//! format string, JIT-compiles the confirm regexes, and enrolls prefilter
//! patterns under dense ids (starting at 1). Patterns whose minimum match
//! width is zero would match everywhere, so they are left out of the
//! prefilter database; their confirm regex is kept as a dead entry.
//!
//! # Concurrency
//!
//! The engine is immutable after construction and shared by reference across
//! workers. Each worker owns a [`Scratch`]; confirm regexes allocate their
//! match state per call. All native resources are released on drop.

mod confirm;
mod db_cache;
mod prefilter;
mod render;

#[cfg(test)]
mod tests;

use std::error::Error;
use std::fmt;
use std::path::Path;

use ahash::AHashMap;
use tracing::{info, trace, warn};

use crate::config::{ConfigError, ViewConfig};
use crate::corpus::{Corpus, LogCall, SYNTAX_PRINTFLIKE};
use crate::format::translate;
use crate::pipeline::LineProcessor;

use self::confirm::{ConfirmOutcome, ConfirmRegex};
use self::db_cache::DbCache;
use self::prefilter::{PrefilterDb, ScanReport};

pub use self::db_cache::CacheError;
pub use self::prefilter::Scratch;

/// Stable handle for one call site: indices into the engine's dense
/// per-project arrays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CallRef {
    project: u32,
    call: u32,
}

/// Per-project call-site data owned by the engine.
struct ProjectEntry {
    name: String,
    calls: Vec<LogCall>,
    /// Resolved hyperlink per call, from its definition's link template.
    links: Vec<String>,
}

/// Capture-group salt for one call site. Doubles as the outer group name.
fn group_name(project: &str, index: usize) -> String {
    format!("{project}__{index}__")
}

/// Compiled match engine over one corpus.
pub struct Engine {
    config: ViewConfig,
    start_char: Option<(u8, usize)>,
    projects: Vec<ProjectEntry>,
    confirm: AHashMap<CallRef, ConfirmRegex>,
    /// Dense prefilter pattern ids: id `i + 1` lives at index `i`.
    id_to_call: Vec<CallRef>,
    db: PrefilterDb,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}

impl Engine {
    /// Compiles `corpus` under `config`, building or loading the prefilter
    /// database via the cache in `cache_dir`.
    pub fn new(config: ViewConfig, corpus: &Corpus, cache_dir: &Path) -> Result<Self, BuildError> {
        config.validate().map_err(BuildError::Config)?;
        let start_char = config.start_char_pos();

        let mut projects: Vec<ProjectEntry> = Vec::new();
        let mut confirm: AHashMap<CallRef, ConfirmRegex> = AHashMap::new();
        let mut id_to_call: Vec<CallRef> = Vec::new();
        let mut patterns: Vec<std::ffi::CString> = Vec::new();
        let mut ids: Vec<u32> = Vec::new();

        for (name, file) in corpus {
            if !config.project_filter.is_empty() && !config.project_filter.contains(name) {
                continue;
            }

            let mut definitions = AHashMap::with_capacity(file.definitions.len());
            for def in &file.definitions {
                if definitions.insert(def.id.as_str(), def).is_some() {
                    return Err(BuildError::DuplicateDefinition {
                        project: name.clone(),
                        id: def.id.clone(),
                    });
                }
            }

            let project_idx = projects.len() as u32;
            let mut links = Vec::with_capacity(file.calls.len());

            for (call_idx, call) in file.calls.iter().enumerate() {
                let def = definitions.get(call.definition_id.as_str()).ok_or_else(|| {
                    BuildError::UnknownDefinition {
                        project: name.clone(),
                        index: call_idx,
                        id: call.definition_id.clone(),
                    }
                })?;
                if def.syntax != SYNTAX_PRINTFLIKE {
                    return Err(BuildError::UnsupportedSyntax {
                        id: def.id.clone(),
                        syntax: def.syntax.clone(),
                    });
                }

                let salt = group_name(name, call_idx);
                let parsed = translate(&call.format_string, &salt);
                if parsed.arg_cnt != call.argument_exprs.len() {
                    return Err(BuildError::ArgumentCountMismatch {
                        project: name.clone(),
                        index: call_idx,
                        expected: parsed.arg_cnt,
                        actual: call.argument_exprs.len(),
                    });
                }

                let call_ref = CallRef {
                    project: project_idx,
                    call: call_idx as u32,
                };

                let regex = ConfirmRegex::compile(&parsed.confirm, &salt, parsed.arg_cnt)
                    .map_err(|source| BuildError::ConfirmCompile {
                        project: name.clone(),
                        index: call_idx,
                        source,
                    })?;
                confirm.insert(call_ref, regex);

                links.push(render::resolve_link(
                    &def.link_template,
                    &call.file,
                    call.line,
                ));

                let prefilter_expr = format!("{}$", parsed.prefilter);
                let (min_width, c_pat) = prefilter::expression_min_width(&prefilter_expr)
                    .map_err(|detail| BuildError::PrefilterPattern {
                        project: name.clone(),
                        index: call_idx,
                        detail,
                    })?;
                if min_width == 0 {
                    info!(
                        "ignoring zero-width prefilter pattern {prefilter_expr:?} from {}:{}",
                        call.file, call.line
                    );
                    continue;
                }

                id_to_call.push(call_ref);
                patterns.push(c_pat);
                ids.push(id_to_call.len() as u32);
            }

            projects.push(ProjectEntry {
                name: name.clone(),
                calls: file.calls.clone(),
                links,
            });
        }

        let db = DbCache::new(cache_dir)
            .build_or_load(&patterns, &ids)
            .map_err(BuildError::Cache)?;

        Ok(Self {
            config,
            start_char,
            projects,
            confirm,
            id_to_call,
            db,
        })
    }

    /// Allocates a prefilter scratch for one worker.
    pub fn alloc_scratch(&self) -> Result<Scratch, String> {
        self.db.alloc_scratch()
    }

    fn call(&self, call_ref: CallRef) -> &LogCall {
        &self.projects[call_ref.project as usize].calls[call_ref.call as usize]
    }

    /// Byte offset at which matching starts for `line`.
    ///
    /// When the configured character occurs fewer times than requested, the
    /// offset lands on the last byte of the line.
    fn match_start_offset(&self, line: &[u8]) -> usize {
        if self.config.start_pos > 1 {
            return self.config.start_pos - 1;
        }
        if let Some((ch, mut remaining)) = self.start_char {
            let mut start = 0usize;
            while remaining > 0 {
                match memchr::memchr(ch, &line[start..]) {
                    Some(pos) => start += pos + 1,
                    None => return line.len().saturating_sub(1),
                }
                remaining -= 1;
            }
            return start;
        }
        0
    }

    /// Collects prefilter candidates for `body`, keyed by `(id, from)`.
    ///
    /// The scanner may report several spans per key; the shortest `to` (the
    /// first reported) is retained. Reports failing the absolute-length or
    /// ratio floor are dropped here, before confirmation.
    fn collect_candidates(
        &self,
        body: &[u8],
        scratch: &mut Scratch,
    ) -> AHashMap<(u32, u64), u64> {
        let mut reports: Vec<ScanReport> = Vec::new();
        if let Err(err) = self.db.scan(body, scratch, &mut reports) {
            warn!("prefilter scan failed: {err}");
            return AHashMap::new();
        }

        let ratio_floor = self.config.min_matched_ratio * body.len() as f64;
        let mut candidates: AHashMap<(u32, u64), u64> = AHashMap::new();
        for report in reports {
            trace!(
                "prefilter report id={} span={}-{}",
                report.id,
                report.from,
                report.to
            );
            let span = report.to - report.from;
            if (span as usize) < self.config.min_match_chars || (span as f64) < ratio_floor {
                continue;
            }
            candidates
                .entry((report.id, report.from))
                .and_modify(|to| {
                    if report.to < *to {
                        *to = report.to;
                    }
                })
                .or_insert(report.to);
        }
        candidates
    }

    /// Processes one line: returns the annotated output (without newline).
    pub fn process_line(
        &self,
        line: &[u8],
        scratch: &mut Scratch,
    ) -> Result<Vec<u8>, ProcessError> {
        let split = self.match_start_offset(line).min(line.len());
        let (prefix, body) = line.split_at(split);

        let candidates = self.collect_candidates(body, scratch);

        let mut keys: Vec<(u32, u64)> = candidates.keys().copied().collect();
        keys.sort_unstable();

        let mut best: Option<(CallRef, ConfirmOutcome)> = None;
        let mut best_scores = (0i64, 0i64, 0usize);
        for (id, _from) in keys {
            let Some(&call_ref) = self.id_to_call.get((id as usize).wrapping_sub(1)) else {
                warn!("prefilter reported unknown pattern id {id}");
                continue;
            };
            let Some(regex) = self.confirm.get(&call_ref) else {
                continue;
            };

            let outcome = match regex.evaluate(body) {
                Ok(Some(outcome)) => outcome,
                Ok(None) => {
                    let call = self.call(call_ref);
                    info!(
                        "prefilter reported {}:{} ({:?}) but the confirm regex does not match",
                        self.projects[call_ref.project as usize].name,
                        call_ref.call,
                        call.format_string
                    );
                    continue;
                }
                Err(source) => return Err(ProcessError::Confirm(source)),
            };

            let scores = (outcome.word_literals, outcome.literals, outcome.total);
            if scores > best_scores {
                best_scores = scores;
                best = Some((call_ref, outcome));
            }
        }

        if best.is_none() && !candidates.is_empty() {
            warn!(
                "no confirm match for line despite {} prefilter candidate(s)",
                candidates.len()
            );
        }

        let width = self.config.source_column_width;
        let mut ref_column = render::blank_ref_column(width);
        let mut processed: Vec<u8> = body.to_vec();

        if let Some((call_ref, outcome)) = best {
            let qualifies = outcome.literals >= self.config.min_match_chars as i64
                && outcome.word_literals >= self.config.min_match_word_chars as i64
                && outcome.total as f64 >= self.config.min_matched_ratio * body.len() as f64;
            if qualifies {
                let project = &self.projects[call_ref.project as usize];
                let call = &project.calls[call_ref.call as usize];
                let link = &project.links[call_ref.call as usize];
                ref_column = render::ref_column(&call.file, call.line, link, width);
                if !self.config.skip_print_argument_expr {
                    processed = render::decorate_body(
                        body,
                        outcome.span.0,
                        &outcome.args,
                        &call.argument_exprs,
                    );
                }
            }
        }

        let mut out = Vec::with_capacity(ref_column.len() + prefix.len() + processed.len());
        out.extend_from_slice(ref_column.as_bytes());
        out.extend_from_slice(prefix);
        out.extend_from_slice(&processed);
        Ok(out)
    }
}

impl LineProcessor for Engine {
    type Scratch = Scratch;

    fn alloc_scratch(&self) -> Result<Scratch, String> {
        Engine::alloc_scratch(self)
    }

    fn process_line(&self, line: &[u8], scratch: &mut Scratch) -> Result<Vec<u8>, String> {
        Engine::process_line(self, line, scratch).map_err(|err| err.to_string())
    }
}

/// Fatal errors during engine construction.
#[derive(Debug)]
#[non_exhaustive]
pub enum BuildError {
    /// The view configuration failed validation.
    Config(ConfigError),
    /// A project declares the same definition id twice.
    DuplicateDefinition { project: String, id: String },
    /// A call references a definition id its project does not declare.
    UnknownDefinition {
        project: String,
        index: usize,
        id: String,
    },
    /// A definition uses a syntax other than `printflike`.
    UnsupportedSyntax { id: String, syntax: String },
    /// A format string's argument count disagrees with the extracted
    /// argument expressions.
    ArgumentCountMismatch {
        project: String,
        index: usize,
        expected: usize,
        actual: usize,
    },
    /// A confirm pattern failed to JIT-compile.
    ConfirmCompile {
        project: String,
        index: usize,
        source: pcre2::Error,
    },
    /// A prefilter pattern was rejected by Vectorscan.
    PrefilterPattern {
        project: String,
        index: usize,
        detail: String,
    },
    /// The prefilter database cache failed.
    Cache(CacheError),
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(err) => write!(f, "invalid view config: {err}"),
            Self::DuplicateDefinition { project, id } => {
                write!(f, "duplicate definition ID {id:?} in project {project:?}")
            }
            Self::UnknownDefinition { project, index, id } => write!(
                f,
                "unknown definition ID {id:?} for call {project}.{index}"
            ),
            Self::UnsupportedSyntax { id, syntax } => {
                write!(f, "unsupported log call syntax {syntax:?} in definition {id:?}")
            }
            Self::ArgumentCountMismatch {
                project,
                index,
                expected,
                actual,
            } => write!(
                f,
                "argument count mismatch in call {project}.{index}: format string takes {expected}, call provides {actual}"
            ),
            Self::ConfirmCompile {
                project,
                index,
                source,
            } => write!(
                f,
                "failed to compile confirm regex for {project}.{index}: {source}"
            ),
            Self::PrefilterPattern {
                project,
                index,
                detail,
            } => write!(
                f,
                "invalid prefilter pattern for {project}.{index}: {detail}"
            ),
            Self::Cache(err) => err.fmt(f),
        }
    }
}

impl Error for BuildError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::ConfirmCompile { source, .. } => Some(source),
            Self::Cache(err) => Some(err),
            _ => None,
        }
    }
}

/// Recoverable per-line processing failures.
///
/// These surface into the affected line's output slot; they never halt the
/// pipeline. Invariant violations (bad argument ranges) panic instead.
#[derive(Debug)]
#[non_exhaustive]
pub enum ProcessError {
    /// The confirm matcher itself errored (not a mere non-match).
    Confirm(pcre2::Error),
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Confirm(err) => write!(f, "confirm match failed: {err}"),
        }
    }
}

impl Error for ProcessError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Confirm(err) => Some(err),
        }
    }
}
