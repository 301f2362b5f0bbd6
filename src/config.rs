//! View configuration: thresholds, prefix stripping, and output shaping.
//!
//! A `ViewConfig` is constructed once (normally by the CLI), validated, and
//! then treated as read-only by the engine and pipeline. Validation errors
//! are fatal to the caller.

use std::error::Error;
use std::fmt;

/// Configuration for log-line viewing and matching.
///
/// `start_pos` and `start_char_pos` are mutually exclusive prefix-strip
/// modes: either matching starts at a fixed 1-based column, or after the
/// n-th occurrence of a specific byte.
#[derive(Debug, Clone)]
pub struct ViewConfig {
    /// Minimum literal (non-argument) characters a match must cover.
    pub min_match_chars: usize,
    /// Minimum literal word characters (`[A-Za-z0-9_]`) a match must cover.
    pub min_match_word_chars: usize,
    /// Minimum ratio of matched characters to the post-strip line length.
    pub min_matched_ratio: f64,
    /// 1-based column at which matching starts.
    pub start_pos: usize,
    /// A single byte followed by a 1-based decimal occurrence index, e.g.
    /// `" 2"` to start matching after the second space. Empty disables it.
    pub start_char_pos: String,
    /// Width of the reference column; 0 disables the column.
    pub source_column_width: usize,
    /// Pass matched bodies through without argument-expression annotations.
    pub skip_print_argument_expr: bool,
    /// Project names to match against; empty means all projects.
    pub project_filter: Vec<String>,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            min_match_chars: 4,
            min_match_word_chars: 3,
            min_matched_ratio: 0.3,
            start_pos: 1,
            start_char_pos: String::new(),
            source_column_width: 40,
            skip_print_argument_expr: false,
            project_filter: Vec::new(),
        }
    }
}

impl ViewConfig {
    /// Checks the cross-field invariants. Must pass before the config is
    /// handed to the engine.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_matched_ratio.is_nan() || self.min_matched_ratio < 0.0 {
            return Err(ConfigError::NegativeRatio {
                ratio: self.min_matched_ratio,
            });
        }
        if !self.start_char_pos.is_empty() && self.start_pos > 1 {
            return Err(ConfigError::BothStartModes);
        }
        if !self.start_char_pos.is_empty() {
            if self.start_char_pos.len() < 2 {
                return Err(ConfigError::StartCharPosTooShort {
                    raw: self.start_char_pos.clone(),
                });
            }
            // Byte-based slice: a multi-byte first character is not a valid
            // single-byte start character, so reject it as a bad index.
            let Some(idx_str) = self.start_char_pos.get(1..) else {
                return Err(ConfigError::StartCharPosBadIndex {
                    raw: self.start_char_pos.clone(),
                });
            };
            match idx_str.parse::<usize>() {
                Ok(0) => {
                    return Err(ConfigError::StartCharPosIndexNotPositive {
                        raw: self.start_char_pos.clone(),
                    })
                }
                Ok(_) => {}
                Err(_) => {
                    return Err(ConfigError::StartCharPosBadIndex {
                        raw: self.start_char_pos.clone(),
                    })
                }
            }
        }
        Ok(())
    }

    /// Returns the parsed `(byte, occurrence index)` pair, or `None` when
    /// `start_char_pos` is unset. Assumes `validate` has passed.
    pub fn start_char_pos(&self) -> Option<(u8, usize)> {
        if self.start_char_pos.is_empty() {
            return None;
        }
        let ch = self.start_char_pos.as_bytes()[0];
        let idx = self
            .start_char_pos
            .get(1..)
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(0);
        Some((ch, idx))
    }
}

/// Invalid `ViewConfig` field combinations.
#[derive(Debug)]
#[non_exhaustive]
pub enum ConfigError {
    /// `min_matched_ratio` is negative (or NaN).
    NegativeRatio { ratio: f64 },
    /// Both `start_pos` and `start_char_pos` were set.
    BothStartModes,
    /// `start_char_pos` is shorter than `<char><index>`.
    StartCharPosTooShort { raw: String },
    /// The index part of `start_char_pos` is not a decimal integer.
    StartCharPosBadIndex { raw: String },
    /// The index part of `start_char_pos` is zero.
    StartCharPosIndexNotPositive { raw: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NegativeRatio { ratio } => {
                write!(f, "min_matched_ratio must be non-negative, got {ratio}")
            }
            Self::BothStartModes => {
                write!(f, "cannot use both start_pos and start_char_pos together")
            }
            Self::StartCharPosTooShort { raw } => write!(
                f,
                "start_char_pos must be at least a two-character string like {{character}}{{posIdx}}, got {raw:?}"
            ),
            Self::StartCharPosBadIndex { raw } => {
                write!(f, "start_char_pos: invalid posIdx in {raw:?}")
            }
            Self::StartCharPosIndexNotPositive { raw } => {
                write!(f, "start_char_pos: posIdx must be a positive integer in {raw:?}")
            }
        }
    }
}

impl Error for ConfigError {}
