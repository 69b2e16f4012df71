//! Reference-form checkers layered on top of the safety grammar.
//!
//! These enforce the only permitted shapes for reaching outside an
//! expression: literal-keyed table lookups, `total(stat.<field>)` aggregation
//! calls, the two damage call forms, and `flags.<ident>` free variables. They
//! are scanners over a single-line expression that has already passed
//! [`crate::grammar::is_safe_expression`].

use once_cell::sync::Lazy;
use regex::Regex;

use crate::idents::TOTAL_FIELDS;

/// One `tables.<slot>["Name"]` occurrence found in an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub slot: String,
    pub table: String,
    /// Explicit numeric index suffix, e.g. the `0` in `tables.skill["T"][0]`.
    pub index: Option<usize>,
}

static TABLE_FORM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\.([A-Za-z_][A-Za-z0-9_]*)\["([^"]+)"\](\[(\d+)\])?"#).unwrap()
});

static FREE_VAR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\.([A-Za-z_][A-Za-z0-9_]*)").unwrap()
});

fn word_positions(s: &str, word: &str) -> Vec<usize> {
    let mut out = Vec::new();
    let bytes = s.as_bytes();
    let mut from = 0;
    while let Some(rel) = s[from..].find(word) {
        let start = from + rel;
        let end = start + word.len();
        let left_ok = start == 0 || !is_ident_byte(bytes[start - 1]);
        let right_ok = end == bytes.len() || !is_ident_byte(bytes[end]);
        if left_ok && right_ok {
            out.push(start);
        }
        from = end;
    }
    out
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Finds the index just past the bracket that closes the one at `open`,
/// honoring string literals. Returns `None` when unclosed.
fn balanced_end(s: &str, open: usize) -> Option<usize> {
    let bytes = s.as_bytes();
    let open_b = bytes[open];
    let close_b = match open_b {
        b'(' => b')',
        b'[' => b']',
        b'{' => b'}',
        _ => return None,
    };
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if let Some(q) = quote {
            if b == q {
                quote = None;
            }
            continue;
        }
        match b {
            b'"' | b'\'' => quote = Some(b),
            _ if b == open_b => depth += 1,
            _ if b == close_b => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Splits `s` on top-level occurrences of `sep`, honoring brackets and string
/// literals. Used for call-argument lists and for guard-clause surgery.
pub fn split_top_level<'a>(s: &'a str, sep: &str) -> Vec<&'a str> {
    let bytes = s.as_bytes();
    let sep_bytes = sep.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut start = 0usize;
    let mut i = 0usize;
    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match b {
            b'"' | b'\'' => quote = Some(b),
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth = depth.saturating_sub(1),
            _ => {
                if depth == 0 && bytes[i..].starts_with(sep_bytes) {
                    parts.push(&s[start..i]);
                    i += sep_bytes.len();
                    start = i;
                    continue;
                }
            }
        }
        i += 1;
    }
    parts.push(&s[start..]);
    parts
}

/// Collects every table reference in `s`, rejecting dotted property access
/// after the slot and dynamic (non-literal) keys.
pub fn table_refs(s: &str) -> Result<Vec<TableRef>, String> {
    let mut refs = Vec::new();
    for pos in word_positions(s, "tables") {
        let after = &s[pos + "tables".len()..];
        let caps = TABLE_FORM_RE.captures(after).ok_or_else(|| {
            format!(
                "illegal table reference near `{}`: only tables.<slot>[\"Name\"] is allowed",
                snippet(s, pos)
            )
        })?;
        let matched_len = caps.get(0).unwrap().end();
        let tail = &after[matched_len..];
        if tail.starts_with('.') || tail.starts_with('[') {
            return Err(format!(
                "illegal chained access on table reference near `{}`",
                snippet(s, pos)
            ));
        }
        refs.push(TableRef {
            slot: caps[1].to_string(),
            table: caps[2].to_string(),
            index: caps.get(4).and_then(|m| m.as_str().parse().ok()),
        });
    }
    Ok(refs)
}

/// Checks every `total(...)` call: the single argument must be exactly
/// `stat.<field>` with `<field>` drawn from the closed field list.
pub fn check_total_calls(s: &str) -> Result<(), String> {
    // Scan with string contents masked out, so a table name containing the
    // word is not mistaken for a call.
    let masked = crate::grammar::mask_strings(s)
        .ok_or_else(|| "unterminated string literal".to_string())?;
    let s = masked.as_str();
    for pos in word_positions(s, "total") {
        let after = pos + "total".len();
        if !s[after..].starts_with('(') {
            return Err("`total` may only be used as a call".to_string());
        }
        let end = balanced_end(s, after)
            .ok_or_else(|| "unclosed `total(` call".to_string())?;
        let inner = s[after + 1..end - 1].trim();
        let field = inner
            .strip_prefix("stat.")
            .ok_or_else(|| format!("`total` argument must be stat.<field>, got `{inner}`"))?;
        if !TOTAL_FIELDS.contains(&field) {
            return Err(format!("unknown stat field `{field}` in total()"));
        }
    }
    Ok(())
}

/// Checks every `dmg(...)`/`rawdmg(...)` call: 2-3 positional arguments, and
/// the optional third argument must be a string literal (never an object or
/// array literal). Verified by the balanced-bracket scanner, not a parser.
pub fn check_dmg_calls(s: &str) -> Result<(), String> {
    let masked = crate::grammar::mask_strings(s)
        .ok_or_else(|| "unterminated string literal".to_string())?;
    let s = masked.as_str();
    for name in ["dmg", "rawdmg"] {
        for pos in word_positions(s, name) {
            let after = pos + name.len();
            if !s[after..].starts_with('(') {
                return Err(format!("`{name}` may only be used as a call"));
            }
            let end = balanced_end(s, after)
                .ok_or_else(|| format!("unclosed `{name}(` call"))?;
            let inner = &s[after + 1..end - 1];
            let args: Vec<&str> = split_top_level(inner, ",")
                .into_iter()
                .map(str::trim)
                .collect();
            if args.len() < 2 || args.len() > 3 {
                return Err(format!(
                    "`{name}` takes 2 or 3 arguments, got {}",
                    args.len()
                ));
            }
            if args.len() == 3 && !is_string_literal(args[2]) {
                return Err(format!(
                    "third argument of `{name}` must be a string literal or omitted, got `{}`",
                    args[2]
                ));
            }
        }
    }
    Ok(())
}

fn is_string_literal(s: &str) -> bool {
    (s.len() >= 2 && s.starts_with('"') && s.ends_with('"') && !s[1..s.len() - 1].contains('"'))
        || (s.len() >= 2 && s.starts_with('\'') && s.ends_with('\'') && !s[1..s.len() - 1].contains('\''))
}

/// Collects every `flags.<ident>` free-variable reference, rejecting dynamic
/// access and non-ASCII identifiers.
pub fn free_vars(s: &str) -> Result<Vec<String>, String> {
    let masked = crate::grammar::mask_strings(s)
        .ok_or_else(|| "unterminated string literal".to_string())?;
    let s = masked.as_str();
    let mut vars = Vec::new();
    for pos in word_positions(s, "flags") {
        let after = &s[pos + "flags".len()..];
        if after.starts_with('[') {
            return Err("dynamic flag access is not allowed, use flags.<name>".to_string());
        }
        let caps = FREE_VAR_RE
            .captures(after)
            .ok_or_else(|| format!("illegal flag reference near `{}`", snippet(s, pos)))?;
        let name = caps[1].to_string();
        if !name.is_ascii() {
            return Err(format!("non-ASCII flag name `{name}`"));
        }
        if !vars.contains(&name) {
            vars.push(name);
        }
    }
    Ok(vars)
}

fn snippet(s: &str, pos: usize) -> &str {
    let end = (pos + 24).min(s.len());
    &s[pos..end]
}
