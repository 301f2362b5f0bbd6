//! Command-line parser for the `view` subcommand.
//!
//! Hand-rolled (no clap dependency) to keep binary size small and boot fast.
//!
//! # Grammar
//!
//! ```text
//! logalign view [FILE] [VIEW_FLAGS]
//! logalign --help | -h
//! ```
//!
//! Reads stdin when no FILE is given. Directory defaults resolve through
//! `LOGALIGN_CORPUS_DIR` / `LOGALIGN_CACHE_DIR`, then the usual home
//! locations, then the temp directory.

use std::env;
use std::ffi::OsString;
use std::path::PathBuf;

use crate::config::ViewConfig;

/// Everything the `view` subcommand needs to run.
pub struct ViewArgs {
    pub config: ViewConfig,
    pub corpus_dir: PathBuf,
    pub cache_dir: PathBuf,
    /// Input file; `None` reads stdin.
    pub input: Option<PathBuf>,
}

/// Parse `std::env::args_os()` into a [`ViewArgs`].
///
/// Exits the process with code 2 on invalid arguments, printing a
/// diagnostic and usage summary to stderr.
pub fn parse_args() -> ViewArgs {
    let mut args = env::args_os();
    let exe = args.next().unwrap_or_else(|| "logalign".into());

    let first = match args.next() {
        Some(arg) => arg,
        None => {
            print_top_usage(&exe);
            std::process::exit(2);
        }
    };

    let first_str = first.to_string_lossy();
    match first_str.as_ref() {
        "--help" | "-h" => {
            print_top_usage(&exe);
            std::process::exit(0);
        }
        "view" => parse_view_args(args),
        _ => {
            eprintln!("error: expected 'view' subcommand, got '{first_str}'");
            eprintln!();
            print_top_usage(&exe);
            std::process::exit(2);
        }
    }
}

/// Parses the flags following `view`. Public for tests; real callers go
/// through [`parse_args`].
pub fn parse_view_args(args: impl Iterator<Item = OsString>) -> ViewArgs {
    let mut args = args;
    let mut config = ViewConfig::default();
    let mut corpus_dir: Option<PathBuf> = None;
    let mut cache_dir: Option<PathBuf> = None;
    let mut input: Option<PathBuf> = None;

    while let Some(arg) = args.next() {
        let arg_str = arg.to_string_lossy().into_owned();
        match arg_str.as_str() {
            "--help" | "-h" => {
                print_view_usage();
                std::process::exit(0);
            }
            "--min-match-chars" => {
                config.min_match_chars = parse_number(&take_value(&mut args, &arg_str), &arg_str);
            }
            "--min-match-word-chars" => {
                config.min_match_word_chars =
                    parse_number(&take_value(&mut args, &arg_str), &arg_str);
            }
            "--min-matched-ratio" => {
                config.min_matched_ratio = parse_ratio(&take_value(&mut args, &arg_str), &arg_str);
            }
            "--start-pos" => {
                config.start_pos = parse_number(&take_value(&mut args, &arg_str), &arg_str);
            }
            "--start-char-pos" => {
                config.start_char_pos = take_value(&mut args, &arg_str)
                    .to_string_lossy()
                    .into_owned();
            }
            "--source-column-width" => {
                config.source_column_width =
                    parse_number(&take_value(&mut args, &arg_str), &arg_str);
            }
            "--skip-print-argument-expr" => {
                config.skip_print_argument_expr = true;
            }
            "--project" => {
                config
                    .project_filter
                    .push(take_value(&mut args, &arg_str).to_string_lossy().into_owned());
            }
            "--corpus-dir" => {
                corpus_dir = Some(PathBuf::from(take_value(&mut args, &arg_str)));
            }
            "--cache-dir" => {
                cache_dir = Some(PathBuf::from(take_value(&mut args, &arg_str)));
            }
            _ if arg_str.starts_with('-') => {
                eprintln!("error: unknown flag '{arg_str}'");
                eprintln!();
                print_view_usage();
                std::process::exit(2);
            }
            _ => {
                if input.is_some() {
                    eprintln!("error: more than one input file given");
                    eprintln!();
                    print_view_usage();
                    std::process::exit(2);
                }
                input = Some(PathBuf::from(arg));
            }
        }
    }

    if let Err(err) = config.validate() {
        eprintln!("error: {err}");
        eprintln!();
        print_view_usage();
        std::process::exit(2);
    }

    ViewArgs {
        config,
        corpus_dir: corpus_dir.unwrap_or_else(default_corpus_dir),
        cache_dir: cache_dir.unwrap_or_else(default_cache_dir),
        input,
    }
}

fn take_value(args: &mut impl Iterator<Item = OsString>, flag: &str) -> OsString {
    match args.next() {
        Some(value) => value,
        None => {
            eprintln!("error: {flag} requires a value");
            eprintln!();
            print_view_usage();
            std::process::exit(2);
        }
    }
}

fn parse_number(value: &OsString, flag: &str) -> usize {
    match value.to_string_lossy().parse() {
        Ok(n) => n,
        Err(_) => {
            eprintln!(
                "error: {flag} expects a non-negative integer, got '{}'",
                value.to_string_lossy()
            );
            std::process::exit(2);
        }
    }
}

fn parse_ratio(value: &OsString, flag: &str) -> f64 {
    match value.to_string_lossy().parse() {
        Ok(r) => r,
        Err(_) => {
            eprintln!(
                "error: {flag} expects a number, got '{}'",
                value.to_string_lossy()
            );
            std::process::exit(2);
        }
    }
}

/// Resolves the cache directory with a 3-tier fallback:
/// 1. `LOGALIGN_CACHE_DIR` env var (explicit override)
/// 2. `$HOME/.cache/logalign`
/// 3. `$TMPDIR/logalign` (last resort)
fn default_cache_dir() -> PathBuf {
    if let Some(dir) = env::var_os("LOGALIGN_CACHE_DIR") {
        return PathBuf::from(dir);
    }
    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".cache").join("logalign");
    }
    env::temp_dir().join("logalign")
}

/// Resolves the corpus directory: `LOGALIGN_CORPUS_DIR`, then
/// `$HOME/.local/state/logalign`, then the temp directory.
fn default_corpus_dir() -> PathBuf {
    if let Some(dir) = env::var_os("LOGALIGN_CORPUS_DIR") {
        return PathBuf::from(dir);
    }
    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home)
            .join(".local")
            .join("state")
            .join("logalign");
    }
    env::temp_dir().join("logalign-corpus")
}

fn print_top_usage(exe: &std::ffi::OsStr) {
    eprintln!(
        "Annotate log lines with links to the call sites that produced them.

Usage:
  {exe} view [FILE] [FLAGS]

Run '{exe} view --help' for the view flags.",
        exe = exe.to_string_lossy()
    );
}

fn print_view_usage() {
    eprintln!(
        "Usage: logalign view [FILE] [FLAGS]

Reads log lines from FILE (or stdin) and writes annotated lines to stdout.

Flags:
  --min-match-chars N         Minimum literal characters for a match (default 4)
  --min-match-word-chars N    Minimum literal word characters (default 3)
  --min-matched-ratio R       Minimum matched/total ratio (default 0.3)
  --start-pos N               1-based column where matching starts (default 1)
  --start-char-pos CP         Start after the n-th occurrence of a character,
                              e.g. ' 2' for the second space
  --source-column-width N     Reference column width; 0 disables it (default 40)
  --skip-print-argument-expr  Do not annotate argument expressions
  --project NAME              Only match this project (repeatable)
  --corpus-dir DIR            Corpus directory
  --cache-dir DIR             Prefilter database cache directory"
    );
}
