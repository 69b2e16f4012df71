//! Safety grammar for generator-authored formula strings.
//!
//! The generator of origin is unreliable: it produces near-miss malformed
//! text far more often than adversarial text. A full parser would be fragile
//! against that input, so the grammar is a conjunction of regex/scanner
//! predicates tuned to the small set of call shapes actually used downstream.
//! Callers that need structural guarantees use the checkers in [`crate::refs`]
//! on top of these predicates.

use once_cell::sync::Lazy;
use regex::Regex;

/// Upper bound on a single formula string. Anything longer is noise.
const MAX_EXPR_LEN: usize = 2000;

/// Reserved words that must never appear outside a string literal: module
/// system keywords, global-object names, reflection escape hatches, loop and
/// exception keywords, and `this`.
const DENY_WORDS: &[&str] = &[
    "import",
    "export",
    "require",
    "module",
    "globalThis",
    "window",
    "process",
    "eval",
    "Function",
    "constructor",
    "prototype",
    "__proto__",
    "while",
    "for",
    "do",
    "throw",
    "try",
    "catch",
    "finally",
    "new",
    "class",
    "this",
    "await",
    "yield",
    "return",
    "var",
    "let",
    "const",
    "delete",
    "in",
    "of",
    "with",
];

static DENY_RE: Lazy<Regex> = Lazy::new(|| {
    let alternation = DENY_WORDS.join("|");
    Regex::new(&format!(r"\b(?:{})\b", alternation)).unwrap()
});

/// Replaces the contents of every string literal with spaces so the
/// surrounding predicates cannot be fooled by quoted text. Returns `None` for
/// an unterminated or multi-line string literal.
pub(crate) fn mask_strings(s: &str) -> Option<String> {
    let mut out = String::with_capacity(s.len());
    let mut quote: Option<char> = None;
    for c in s.chars() {
        match quote {
            Some(q) => {
                if c == '\n' {
                    return None;
                }
                if c == q {
                    quote = None;
                    out.push(c);
                } else {
                    out.push(' ');
                }
            }
            None => {
                if c == '"' || c == '\'' {
                    quote = Some(c);
                }
                out.push(c);
            }
        }
    }
    if quote.is_some() {
        None
    } else {
        Some(out)
    }
}

fn allowed_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || " \t_.,\"'()[]{}+-*/%<>=!&|?:".contains(c)
}

fn brackets_balanced(masked: &str) -> bool {
    let mut stack = Vec::new();
    for c in masked.chars() {
        match c {
            '(' | '[' | '{' => stack.push(c),
            ')' => {
                if stack.pop() != Some('(') {
                    return false;
                }
            }
            ']' => {
                if stack.pop() != Some('[') {
                    return false;
                }
            }
            '}' => {
                if stack.pop() != Some('{') {
                    return false;
                }
            }
            _ => {}
        }
    }
    stack.is_empty()
}

/// Classifies a formula string as a legal expression: no statement
/// separators, no comments, no lambda/function syntax, no reserved
/// escape-hatch identifiers, balanced brackets, single line.
pub fn is_safe_expression(s: &str) -> bool {
    let t = s.trim();
    if t.is_empty() || t.len() > MAX_EXPR_LEN {
        return false;
    }
    // Backticks and backslashes have no legal use in the sub-language.
    if t.contains('`') || t.contains('\\') {
        return false;
    }
    let masked = match mask_strings(t) {
        Some(m) => m,
        None => return false,
    };
    if masked.contains(';') || masked.contains("//") || masked.contains("/*") {
        return false;
    }
    if masked.contains("=>") || masked.contains("function") {
        return false;
    }
    if !masked.chars().all(allowed_char) {
        return false;
    }
    if DENY_RE.is_match(&masked) {
        return false;
    }
    brackets_balanced(&masked)
}

/// Like [`is_safe_expression`] but additionally forbids assignment operators
/// while still allowing comparisons (`==`, `!=`, `<=`, `>=`).
pub fn is_safe_value_expression(s: &str) -> bool {
    if !is_safe_expression(s) {
        return false;
    }
    let masked = match mask_strings(s.trim()) {
        Some(m) => m,
        None => return false,
    };
    let bytes = masked.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b != b'=' {
            continue;
        }
        let prev = if i > 0 { bytes[i - 1] } else { 0 };
        let next = if i + 1 < bytes.len() { bytes[i + 1] } else { 0 };
        let part_of_comparison =
            prev == b'=' || prev == b'!' || prev == b'<' || prev == b'>' || next == b'=';
        if !part_of_comparison {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn accepts_plain_arithmetic_and_comparison() {
        assert!(is_safe_expression("pct(tables.skill[\"Skill Damage\"]) * total(stat.atk)"));
        assert!(is_safe_expression("flags.stacks >= 2 && tier >= 4"));
        assert!(is_safe_value_expression("1 + 2 * (3 - 4) / 5 % 6"));
        assert!(is_safe_value_expression("flags.ready == true ? 10 : 20"));
    }

    #[test]
    fn rejects_statement_separators_and_comments() {
        assert!(!is_safe_expression("1; 2"));
        assert!(!is_safe_expression("1 // comment"));
        assert!(!is_safe_expression("1 /* comment */"));
    }

    #[test]
    fn rejects_lambda_and_function_syntax() {
        assert!(!is_safe_expression("(x) => x"));
        assert!(!is_safe_expression("function f() {}"));
    }

    #[test]
    fn rejects_escape_hatch_identifiers() {
        for word in ["eval", "globalThis", "process", "constructor", "this", "while"] {
            let expr = format!("{} + 1", word);
            assert!(!is_safe_expression(&expr), "should reject {word}");
        }
    }

    #[test]
    fn deny_list_is_string_literal_aware() {
        assert!(is_safe_expression("dmg(1, \"this\")"));
        assert!(is_safe_expression("flags.evaluation"));
    }

    #[test]
    fn rejects_unterminated_and_multiline_strings() {
        assert!(!is_safe_expression("dmg(1, \"pyro"));
        assert!(!is_safe_expression("dmg(1, \"py\nro\")"));
    }

    #[test]
    fn value_expression_forbids_assignment_but_allows_comparison() {
        assert!(!is_safe_value_expression("flags.x = 1"));
        assert_eq!(is_safe_value_expression("flags.x == 1"), true);
        assert_eq!(is_safe_value_expression("flags.x <= 1"), true);
        assert_eq!(is_safe_value_expression("flags.x != 1"), true);
    }

    #[test]
    fn rejects_unbalanced_brackets() {
        assert!(!is_safe_expression("dmg(1, \"pyro\""));
        assert!(!is_safe_expression("tables.skill[\"A\"]]"));
    }
}
