//! Static simplicity metrics for submissions that compiled.
//!
//! Raw size counts, cyclomatic complexity of the first top-level construct,
//! aggregate Halstead figures from an operator/operand token scan, and a
//! maintainability index derived from the three. Everything here is a pure
//! function of the source text: no execution, no filesystem.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::core_types::Metrics;

const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global",
    "if", "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return",
    "try", "while", "with", "yield",
];

/// Keyword operators counted alongside the symbolic ones in the Halstead
/// scan.
const KEYWORD_OPERATORS: &[&str] = &["and", "or", "not", "in", "is"];

/// Tokens that open a new branch in the control-flow graph.
const DECISION_TOKENS: &[&str] = &["if", "elif", "for", "while", "except", "and", "or", "assert"];

const STRING_PLACEHOLDER: &str = "__string_literal__";

fn token_re() -> &'static Regex {
    static TOKEN_RE: OnceLock<Regex> = OnceLock::new();
    TOKEN_RE.get_or_init(|| {
        Regex::new(
            r"(?x)
              [A-Za-z_][A-Za-z0-9_]*                  # identifier or keyword
            | \d+(?:\.\d+)?(?:[eE][-+]?\d+)?          # numeric literal
            | \*\*=? | //=? | <<=? | >>=? | :=        # multi-char operators
            | [<>!=]= | -> | [-+*/%&|^@]=?
            | [<>=~]
            ",
        )
        .expect("hard-coded token pattern")
    })
}

/// Compute the full metric set for one submission.
pub fn analyze_simplicity(code: &str) -> Metrics {
    let raw = raw_counts(code);
    let stripped = strip_strings_and_comments(code);
    let halstead = halstead_scan(&stripped);
    let cyclomatic = cyclomatic_complexity(code, &stripped);
    let maintainability = maintainability_index(halstead.volume, cyclomatic, raw.sloc);

    Metrics {
        loc: raw.loc,
        lloc: raw.lloc,
        sloc: raw.sloc,
        comments: raw.comments,
        blank: raw.blank,
        cyclomatic_complexity: cyclomatic,
        halstead_vocabulary: halstead.vocabulary,
        halstead_length: halstead.length,
        halstead_volume: halstead.volume,
        halstead_difficulty: halstead.difficulty,
        halstead_effort: halstead.effort,
        maintainability_index: maintainability,
    }
}

struct RawCounts {
    loc: usize,
    lloc: usize,
    sloc: usize,
    comments: usize,
    blank: usize,
}

fn raw_counts(code: &str) -> RawCounts {
    let mut counts = RawCounts {
        loc: 0,
        lloc: 0,
        sloc: 0,
        comments: 0,
        blank: 0,
    };
    for line in code.lines() {
        counts.loc += 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            counts.blank += 1;
        } else if trimmed.starts_with('#') {
            counts.comments += 1;
        } else {
            counts.sloc += 1;
            // Semicolon-joined statements each count as a logical line.
            counts.lloc += trimmed
                .split(';')
                .filter(|part| !part.trim().is_empty())
                .count()
                .max(1);
        }
    }
    counts
}

/// Replace string literals with a placeholder operand and drop comments, so
/// the token scan never mistakes quoted text for code.
fn strip_strings_and_comments(code: &str) -> String {
    let mut out = String::with_capacity(code.len());
    let bytes: Vec<char> = code.chars().collect();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        if c == '#' {
            while i < bytes.len() && bytes[i] != '\n' {
                i += 1;
            }
        } else if c == '\'' || c == '"' {
            let quote = c;
            let triple = i + 2 < bytes.len() && bytes[i + 1] == quote && bytes[i + 2] == quote;
            i += if triple { 3 } else { 1 };
            loop {
                if i >= bytes.len() {
                    break;
                }
                if bytes[i] == '\\' {
                    i += 2;
                    continue;
                }
                if triple {
                    if bytes[i] == quote
                        && i + 2 < bytes.len()
                        && bytes[i + 1] == quote
                        && bytes[i + 2] == quote
                    {
                        i += 3;
                        break;
                    }
                } else if bytes[i] == quote || bytes[i] == '\n' {
                    i += 1;
                    break;
                }
                i += 1;
            }
            out.push_str(STRING_PLACEHOLDER);
            continue;
        } else {
            out.push(c);
            i += 1;
        }
    }
    out
}

struct Halstead {
    vocabulary: usize,
    length: usize,
    volume: f64,
    difficulty: f64,
    effort: f64,
}

fn halstead_scan(stripped: &str) -> Halstead {
    let mut distinct_operators: HashSet<&str> = HashSet::new();
    let mut distinct_operands: HashSet<&str> = HashSet::new();
    let mut total_operators = 0usize;
    let mut total_operands = 0usize;

    for token in token_re().find_iter(stripped) {
        let text = token.as_str();
        let is_word = text
            .chars()
            .next()
            .map(|c| c.is_alphabetic() || c == '_')
            .unwrap_or(false);
        if is_word {
            if KEYWORD_OPERATORS.contains(&text) {
                distinct_operators.insert(text);
                total_operators += 1;
            } else if !KEYWORDS.contains(&text) {
                distinct_operands.insert(text);
                total_operands += 1;
            }
        } else {
            distinct_operators.insert(text);
            total_operators += 1;
        }
    }

    let n1 = distinct_operators.len();
    let n2 = distinct_operands.len();
    let vocabulary = n1 + n2;
    let length = total_operators + total_operands;
    let volume = if vocabulary > 0 {
        length as f64 * (vocabulary as f64).log2()
    } else {
        0.0
    };
    let difficulty = if n2 > 0 {
        (n1 as f64 / 2.0) * (total_operands as f64 / n2 as f64)
    } else {
        0.0
    };

    Halstead {
        vocabulary,
        length,
        volume,
        difficulty,
        effort: difficulty * volume,
    }
}

/// Complexity of the first top-level `def`/`class` block, or of the whole
/// source when there is none: 1 plus the number of branch points.
fn cyclomatic_complexity(code: &str, stripped: &str) -> u32 {
    let scope = first_top_level_block(code)
        .map(|block| strip_strings_and_comments(&block))
        .unwrap_or_else(|| stripped.to_string());
    let decisions = token_re()
        .find_iter(&scope)
        .filter(|token| DECISION_TOKENS.contains(&token.as_str()))
        .count();
    1 + decisions as u32
}

fn first_top_level_block(code: &str) -> Option<String> {
    let lines: Vec<&str> = code.lines().collect();
    let start = lines.iter().position(|line| {
        let trimmed = line.trim_start();
        trimmed.len() == line.len()
            && (trimmed.starts_with("def ")
                || trimmed.starts_with("async def ")
                || trimmed.starts_with("class "))
    })?;

    let mut block = vec![lines[start]];
    for line in &lines[start + 1..] {
        if line.trim().is_empty() || line.starts_with(' ') || line.starts_with('\t') {
            block.push(line);
        } else {
            break;
        }
    }
    Some(block.join("\n"))
}

/// Standard maintainability index, rescaled to 0..100. Volume and SLOC are
/// clamped to 1 so trivial inputs stay in range instead of producing NaN.
fn maintainability_index(volume: f64, cyclomatic: u32, sloc: usize) -> f64 {
    let volume = volume.max(1.0);
    let sloc = (sloc as f64).max(1.0);
    let raw = 171.0 - 5.2 * volume.ln() - 0.23 * f64::from(cyclomatic) - 16.2 * sloc.ln();
    (raw * 100.0 / 171.0).clamp(0.0, 100.0)
}
