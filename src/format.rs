//! Printf format string translation into paired regex forms.
//!
//! Each printf-like format string is translated into two coordinated regular
//! expressions over the same literal skeleton:
//!
//! - A *confirm* pattern: named captures for every argument plus an outer
//!   named group spanning the whole formatted extent. Width constraints are
//!   approximated with `(?=.{W,})` look-aheads and padding runs. This form is
//!   compiled with PCRE2 and recovers per-argument byte ranges.
//! - A *prefilter* pattern: no capturing groups, no zero-width assertions,
//!   numeric cores simplified to non-greedy unbounded runs. This form is safe
//!   to enroll into a Vectorscan multi-pattern database.
//!
//! Neither output carries an anchor; callers append `$` at compile time. The
//! `$` anchor is load-bearing: `{m,}` quantifiers are not truly non-greedy,
//! and only the right anchor keeps them from overshooting.
//!
//! # Specifier grammar
//!
//! `%<flags><width>?(.<precision>)?<length>*<conv>` with flags in `#+0- `,
//! length modifiers in `hlLjzt` (consumed, ignored), and conv in
//! `diuoxXfFeEgGaAcsp`. A `%` not followed by a recognized specifier is
//! treated as a literal. Width/precision handling is an approximation of
//! printf, not a reproduction.

use std::fmt::Write as _;
use std::sync::OnceLock;

use regex::Regex;

/// Result of translating one printf format string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFormat {
    /// Number of argument-consuming specifiers.
    pub arg_cnt: usize,
    /// Named-capture confirm pattern (unanchored).
    pub confirm: String,
    /// Capture-free, assertion-free prefilter pattern (unanchored).
    pub prefilter: String,
}

/// Capture group name for argument `k` under `salt`.
///
/// The salt is unique per call site, so group names never collide inside a
/// single compiled pattern nor across diagnostics.
pub fn arg_group_name(salt: &str, k: usize) -> String {
    format!("arg{salt}{k}")
}

fn specifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"%([#+0\- ]*)(\d*)(?:\.(\d+))?[hlLjzt]*([diuoxXfFeEgGaAcsp])")
            .expect("specifier regex is valid")
    })
}

/// Wraps an already-group-wrapped argument core with width padding.
///
/// Left alignment allows trailing spaces, right alignment leading spaces, and
/// zero padding (numeric conversions only) leading zeros. The `(?=.{W,})`
/// look-ahead enforces the minimum field width; it is valid in the confirm
/// form only, which is why the prefilter form drops widths entirely.
fn wrap_width(grp: &str, width: usize, left_align: bool, zero_pad: bool, numeric: bool) -> String {
    if width == 0 {
        return grp.to_string();
    }
    if left_align {
        format!("(?=.{{{width},}}){grp} *")
    } else if zero_pad && numeric {
        format!("(?=.{{{width},}})0*{grp}")
    } else {
        format!("(?=.{{{width},}}) *{grp}")
    }
}

/// Translates `format` into its confirm/prefilter pattern pair.
///
/// `salt` names the outer capture group; argument groups are
/// `arg<salt><k>` with 0-based `k`. Translation itself cannot fail; an
/// untranslatable format string surfaces later as a pattern compile error.
pub fn translate(format: &str, salt: &str) -> ParsedFormat {
    let mut confirm = String::with_capacity(format.len() * 2 + salt.len() + 8);
    let mut prefilter = String::with_capacity(format.len() * 2);

    confirm.push_str("(?<");
    confirm.push_str(salt);
    confirm.push('>');

    let mut arg_cnt = 0usize;
    let mut last_end = 0usize;

    for caps in specifier_re().captures_iter(format) {
        let whole = caps.get(0).expect("capture 0 always present");

        let literal = &format[last_end..whole.start()];
        confirm.push_str(&regex::escape(literal));
        prefilter.push_str(&regex::escape(literal));
        last_end = whole.end();

        let flags = caps.get(1).map_or("", |m| m.as_str());
        let width: usize = caps
            .get(2)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0);
        let precision: Option<usize> = caps.get(3).and_then(|m| m.as_str().parse().ok());
        let conv = caps.get(4).map_or("", |m| m.as_str());

        let left_align = flags.contains('-');
        let zero_pad = !left_align && flags.contains('0');
        let alt_form = flags.contains('#');

        let arg_name = arg_group_name(salt, arg_cnt);
        let (core, pre, numeric) = conversion_cores(conv, precision, alt_form);

        let named = format!("(?<{arg_name}>{core})");
        confirm.push_str(&wrap_width(&named, width, left_align, zero_pad, numeric));
        prefilter.push_str(&pre);

        arg_cnt += 1;
    }

    if last_end < format.len() {
        let literal = &format[last_end..];
        confirm.push_str(&regex::escape(literal));
        prefilter.push_str(&regex::escape(literal));
    }

    confirm.push(')');

    ParsedFormat {
        arg_cnt,
        confirm,
        prefilter,
    }
}

/// Returns `(confirm core, prefilter core, numeric)` for one conversion.
///
/// The confirm core excludes the capture group wrapper; the prefilter core is
/// the full per-argument prefilter text. `numeric` selects zero-padding in
/// width wrapping.
fn conversion_cores(conv: &str, precision: Option<usize>, alt_form: bool) -> (String, String, bool) {
    const INF_NAN: &str = "inf|nan";

    match conv {
        "d" | "i" => {
            let p = precision.unwrap_or(0);
            (
                format!("[-+]?\\d{{{p},}}"),
                "[-+]?\\d+?".to_string(),
                true,
            )
        }
        "u" => {
            let p = precision.unwrap_or(0);
            (format!("\\d{{{p},}}"), "\\d+?".to_string(), true)
        }
        "o" => {
            let p = precision.unwrap_or(0);
            let prefix = if alt_form { "0?" } else { "" };
            (
                format!("{prefix}[0-7]{{{p},}}"),
                "[0-7]+?".to_string(),
                true,
            )
        }
        "x" | "X" => {
            let p = precision.unwrap_or(0);
            let prefix = if alt_form { "(?:0[xX])?" } else { "" };
            (
                format!("{prefix}[0-9A-Fa-f]{{{p},}}"),
                "[0-9A-Fa-f]+?".to_string(),
                true,
            )
        }
        "f" | "F" => {
            let p = precision.unwrap_or(6);
            let core = if p == 0 && alt_form {
                format!("[-+]?(?:{INF_NAN}|\\d+\\.)")
            } else if p == 0 {
                format!("[-+]?(?:{INF_NAN}|\\d+)")
            } else {
                format!("[-+]?(?:{INF_NAN}|\\d+(?:\\.\\d{{{p}}})?)")
            };
            (
                core,
                "[-+]?(?:\\d+?(?:\\.\\d+?)?|inf|nan)".to_string(),
                true,
            )
        }
        "e" | "E" => {
            let p = precision.unwrap_or(6);
            let mut fraction = String::new();
            if p > 0 {
                let _ = write!(fraction, "\\.\\d{{{p}}}");
            } else if alt_form {
                fraction.push_str("\\.");
            }
            (
                format!("[-+]?(?:{INF_NAN}|\\d{fraction}[eE][+-]?\\d+)"),
                "[-+]?(?:\\d+?(?:\\.\\d+?)?[eE][+-]?\\d+?|inf|nan)".to_string(),
                true,
            )
        }
        "g" | "G" => (
            // Approximate union of the f and e forms; borderline values may
            // be misclassified and that is accepted.
            format!("[-+]?(?:{INF_NAN}|\\d+(?:\\.\\d+)?(?:[eE][+-]?\\d+)?)"),
            "[-+]?(?:\\d+?(?:\\.\\d+?)?(?:[eE][+-]?\\d+?)?|inf|nan)".to_string(),
            true,
        ),
        "a" | "A" => {
            let p = precision.unwrap_or(6);
            let mut fraction = String::new();
            if p > 0 {
                let _ = write!(fraction, "\\.[0-9A-Fa-f]{{{p}}}");
            } else if alt_form {
                fraction.push_str("\\.");
            }
            (
                format!("[-+]?(?:{INF_NAN}|0[xX][0-9A-Fa-f]+{fraction}[pP][+-]?\\d+)"),
                "[-+]?(?:0[xX][0-9A-Fa-f]+?(?:\\.[0-9A-Fa-f]+?)?[pP][+-]?\\d+?|inf|nan)".to_string(),
                false,
            )
        }
        "c" => (".".to_string(), ".".to_string(), false),
        "s" => {
            let core = match precision {
                Some(p) => format!(".{{0,{p}}}"),
                None => ".+?".to_string(),
            };
            (core, ".+?".to_string(), false)
        }
        "p" => (
            "0x[0-9A-Fa-f]+?".to_string(),
            "0x[0-9A-Fa-f]+?".to_string(),
            false,
        ),
        _ => (".+?".to_string(), ".+?".to_string(), false),
    }
}
