//! Per-call-site confirm regexes and match scoring.
//!
//! A confirm regex validates a prefilter candidate against the full line
//! body and recovers the byte range of every argument capture. PCRE2 is used
//! because the confirm form needs look-aheads (width approximation) and named
//! captures, neither of which the prefilter automaton supports; JIT keeps the
//! per-candidate cost acceptable.

use pcre2::bytes::{Regex, RegexBuilder};

use crate::format::arg_group_name;

/// Returns whether `b` counts as a word character for scoring.
#[inline]
pub(crate) fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn count_word_bytes(bytes: &[u8]) -> i64 {
    bytes.iter().filter(|&&b| is_word_byte(b)).count() as i64
}

/// A successful confirm match with its scoring scalars.
///
/// `span` is the outer-capture byte range; `args` are the argument capture
/// ranges in argument order. `literals` and `word_literals` subtract the
/// argument spans from the total, leaving only the format string's literal
/// contribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ConfirmOutcome {
    pub(crate) span: (usize, usize),
    pub(crate) total: usize,
    pub(crate) literals: i64,
    pub(crate) word_literals: i64,
    pub(crate) args: Vec<(usize, usize)>,
}

/// JIT-compiled confirm matcher for one call site.
pub(crate) struct ConfirmRegex {
    re: Regex,
    salt: String,
    arg_cnt: usize,
}

impl ConfirmRegex {
    /// Compiles `pattern` (unanchored confirm form) with a trailing `$`.
    ///
    /// The anchor is mandatory: `{m,}` quantifiers in the confirm form are
    /// not truly non-greedy and rely on it to avoid overshoot.
    pub(crate) fn compile(pattern: &str, salt: &str, arg_cnt: usize) -> Result<Self, pcre2::Error> {
        let re = RegexBuilder::new()
            .jit(true)
            .build(&format!("{pattern}$"))?;
        Ok(Self {
            re,
            salt: salt.to_string(),
            arg_cnt,
        })
    }

    /// Runs the regex against `body` and scores the match.
    ///
    /// Returns `Ok(None)` when the regex does not corroborate the candidate.
    pub(crate) fn evaluate(&self, body: &[u8]) -> Result<Option<ConfirmOutcome>, pcre2::Error> {
        let caps = match self.re.captures(body)? {
            Some(caps) => caps,
            None => return Ok(None),
        };
        let Some(outer) = caps.get(0) else {
            return Ok(None);
        };

        let (lo, hi) = (outer.start(), outer.end());
        let total = hi - lo;
        let mut literals = total as i64;
        let mut word_literals = count_word_bytes(&body[lo..hi]);

        let mut args = Vec::with_capacity(self.arg_cnt);
        for k in 0..self.arg_cnt {
            let name = arg_group_name(&self.salt, k);
            match caps.name(&name) {
                Some(m) => {
                    literals -= (m.end() - m.start()) as i64;
                    word_literals -= count_word_bytes(m.as_bytes());
                    args.push((m.start(), m.end()));
                }
                None => break,
            }
        }

        Ok(Some(ConfirmOutcome {
            span: (lo, hi),
            total,
            literals,
            word_literals,
            args,
        }))
    }
}
