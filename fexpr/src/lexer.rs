//! Tokenizer for the rendered artifact notation.

use crate::error::ExprError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokKind {
    Num(f64),
    Str(String),
    Ident(String),
    /// Punctuation and operators, longest-match first.
    Punct(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokKind,
    pub line: u32,
    pub col: u32,
}

const PUNCTS: &[&str] = &[
    "=>", "==", "!=", "<=", ">=", "&&", "||", "(", ")", "[", "]", "{", "}", ",", ":", ";", ".",
    "?", "+", "-", "*", "/", "%", "<", ">", "!", "=",
];

pub fn tokenize(src: &str) -> Result<Vec<Token>, ExprError> {
    let bytes = src.as_bytes();
    let mut toks = Vec::new();
    let mut i = 0usize;
    let mut line = 1u32;
    let mut col = 1u32;

    let advance = |i: &mut usize, line: &mut u32, col: &mut u32, n: usize, src: &str| {
        for c in src[*i..*i + n].chars() {
            if c == '\n' {
                *line += 1;
                *col = 1;
            } else {
                *col += 1;
            }
        }
        *i += n;
    };

    'outer: while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_ascii_whitespace() {
            advance(&mut i, &mut line, &mut col, 1, src);
            continue;
        }
        let (tline, tcol) = (line, col);
        if c == '"' || c == '\'' {
            let quote = c;
            let mut j = i + 1;
            while j < bytes.len() {
                let cj = bytes[j] as char;
                if cj == '\n' {
                    return Err(ExprError::parse(tline, tcol, "unterminated string literal"));
                }
                if cj == quote {
                    let text = src[i + 1..j].to_string();
                    toks.push(Token {
                        kind: TokKind::Str(text),
                        line: tline,
                        col: tcol,
                    });
                    let n = j + 1 - i;
                    advance(&mut i, &mut line, &mut col, n, src);
                    continue 'outer;
                }
                j += 1;
            }
            return Err(ExprError::parse(tline, tcol, "unterminated string literal"));
        }
        if c.is_ascii_digit() {
            let mut j = i;
            let mut seen_dot = false;
            while j < bytes.len() {
                let cj = bytes[j] as char;
                if cj.is_ascii_digit() {
                    j += 1;
                } else if cj == '.' && !seen_dot && j + 1 < bytes.len() && bytes[j + 1].is_ascii_digit() {
                    seen_dot = true;
                    j += 1;
                } else {
                    break;
                }
            }
            let text = &src[i..j];
            let value: f64 = text
                .parse()
                .map_err(|_| ExprError::parse(tline, tcol, format!("bad number `{text}`")))?;
            toks.push(Token {
                kind: TokKind::Num(value),
                line: tline,
                col: tcol,
            });
            let n = j - i;
            advance(&mut i, &mut line, &mut col, n, src);
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' {
            let mut j = i;
            while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_') {
                j += 1;
            }
            let text = src[i..j].to_string();
            toks.push(Token {
                kind: TokKind::Ident(text),
                line: tline,
                col: tcol,
            });
            let n = j - i;
            advance(&mut i, &mut line, &mut col, n, src);
            continue;
        }
        for p in PUNCTS {
            if src[i..].starts_with(p) {
                toks.push(Token {
                    kind: TokKind::Punct(p),
                    line: tline,
                    col: tcol,
                });
                advance(&mut i, &mut line, &mut col, p.len(), src);
                continue 'outer;
            }
        }
        return Err(ExprError::parse(
            tline,
            tcol,
            format!("unexpected character `{c}`"),
        ));
    }
    Ok(toks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_bindings_and_operators() {
        let toks = tokenize("x = 1.5 + foo(\"a b\") >= 2").unwrap();
        let kinds: Vec<&TokKind> = toks.iter().map(|t| &t.kind).collect();
        assert!(matches!(kinds[0], TokKind::Ident(s) if s == "x"));
        assert!(matches!(kinds[1], TokKind::Punct("=")));
        assert!(matches!(kinds[2], TokKind::Num(n) if *n == 1.5));
        assert!(matches!(kinds[5], TokKind::Punct("(")));
        assert!(matches!(kinds[6], TokKind::Str(s) if s == "a b"));
        assert!(matches!(kinds[8], TokKind::Punct(">=")));
    }

    #[test]
    fn tracks_line_numbers() {
        let toks = tokenize("a = 1\nb = 2").unwrap();
        assert_eq!(toks[3].line, 2);
    }

    #[test]
    fn tracks_columns_across_mixed_tokens() {
        let toks = tokenize("ab \"cd\" 12").unwrap();
        assert_eq!(toks[0].col, 1);
        assert_eq!(toks[1].col, 4);
        assert_eq!(toks[2].col, 9);
    }

    #[test]
    fn rejects_unterminated_strings() {
        assert!(tokenize("x = \"abc").is_err());
    }
}
