//! Terminal rendering: reference column, hyperlinks, and argument
//! annotations.
//!
//! The reference column is a fixed-width gutter holding the originating
//! `file:line`, wrapped in an OSC-8 hyperlink so terminals make it
//! clickable. Argument annotations interleave the originating source
//! expression (`|expr|`) with the matched substring inside the line body.
//! Colors follow the `colored` crate's tty/env detection, so piping output
//! through other tools degrades to plain text.

use colored::Colorize;

/// Separator terminating the reference column.
pub(crate) const REF_COLUMN_SEPARATOR: &str = " | ";

/// Resolves a link template by substituting `{file}` and `{line}`.
pub(crate) fn resolve_link(template: &str, file: &str, line: u32) -> String {
    template
        .replace("{file}", file)
        .replace("{line}", &line.to_string())
}

/// Wraps `text` in an OSC-8 hyperlink pointing at `link`.
fn hyperlink(link: &str, text: &str) -> String {
    format!("\x1b]8;;{link}\x1b\\{text}\x1b]8;;\x1b\\")
}

/// Builds the empty reference column used for unmatched lines.
///
/// Returns the empty string when the column is disabled (`width == 0`);
/// otherwise the result is exactly `width` visible characters wide.
pub(crate) fn blank_ref_column(width: usize) -> String {
    if width == 0 {
        return String::new();
    }
    let mut out = String::with_capacity(width);
    for _ in 0..width.saturating_sub(REF_COLUMN_SEPARATOR.len()) {
        out.push(' ');
    }
    out.push_str(REF_COLUMN_SEPARATOR);
    out
}

/// Builds the reference column for a matched line.
///
/// The `file:line` text is styled, right-padded to `width` (ellipsised when
/// it exceeds the budget), terminated by [`REF_COLUMN_SEPARATOR`], and the
/// whole column is wrapped in a hyperlink to `link`.
pub(crate) fn ref_column(file: &str, line: u32, link: &str, width: usize) -> String {
    if width == 0 {
        return String::new();
    }

    let text = format!("{file}:{line}");
    let budget = width.saturating_sub(REF_COLUMN_SEPARATOR.len());

    let mut column = String::with_capacity(width + 16);
    if text.len() > budget {
        let keep = budget.saturating_sub(3);
        let truncated = String::from_utf8_lossy(&text.as_bytes()[..keep]).into_owned();
        let shown = format!("{truncated}...");
        column.push_str(&shown.as_str().truecolor(0xdd, 0xdd, 0xdd).to_string());
    } else {
        column.push_str(&text.as_str().truecolor(0xdd, 0xdd, 0xdd).to_string());
        for _ in 0..budget - text.len() {
            column.push(' ');
        }
    }
    column.push_str(REF_COLUMN_SEPARATOR);

    hyperlink(link, &column)
}

/// Styles one argument-expression annotation as `|expr|`.
///
/// Newlines inside the expression are written as `\n` so the output stays a
/// single line.
fn style_arg_expr(expr: &str) -> String {
    let escaped = expr.replace('\n', "\\n");
    let annotation = format!("|{escaped}|");
    annotation
        .as_str()
        .truecolor(0x00, 0x66, 0x33)
        .on_truecolor(0x20, 0x20, 0x20)
        .to_string()
}

/// Interleaves argument annotations with the matched body.
///
/// For each argument capture in order, the annotation is inserted directly
/// before the matched substring. Text outside the outer match span passes
/// through untouched.
///
/// # Panics
///
/// Panics when a recovered argument span lies outside the match span or
/// overlaps the previous argument. That indicates a broken capture-recovery
/// invariant, not a bad input line.
pub(crate) fn decorate_body(
    body: &[u8],
    match_start: usize,
    args: &[(usize, usize)],
    exprs: &[String],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + args.len() * 16);
    let mut prev_end = match_start;
    out.extend_from_slice(&body[..prev_end]);

    for (k, &(start, end)) in args.iter().enumerate() {
        if start < prev_end || end < start || end > body.len() {
            panic!(
                "invalid argument match range {start}..{end} for argument {k} \
                 (previous end {prev_end}, body length {})",
                body.len()
            );
        }
        out.extend_from_slice(&body[prev_end..start]);
        out.extend_from_slice(style_arg_expr(&exprs[k]).as_bytes());
        out.extend_from_slice(&body[start..end]);
        prev_end = end;
    }

    out.extend_from_slice(&body[prev_end..]);
    out
}
