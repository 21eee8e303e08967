//! Tokenizer for kite source.

use super::error::{KiteError, KiteResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sym {
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Dot,
    Semi,
    Assign,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    SlashSlash,
    Percent,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Int(i64),
    Float(f64),
    Str(String),
    Name(String),
    Sym(Sym),
    Newline,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
}

/// Words that can never be used as variable names.
pub const KEYWORDS: &[&str] = &[
    "set", "let", "print", "eprint", "fn", "import", "del", "if", "else", "while", "return", "and",
    "or", "not", "true", "false", "nil",
];

const MAX_NESTING: usize = 100;

pub fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains(&word)
}

pub fn tokenize(source: &str) -> KiteResult<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;
    let mut line = 1;
    // Newlines inside (), [] are not statement separators.
    let mut nesting = 0usize;
    let mut depth = 0usize;

    while pos < chars.len() {
        let c = chars[pos];
        match c {
            '\n' => {
                if nesting == 0 {
                    tokens.push(Token { tok: Tok::Newline, line });
                }
                line += 1;
                pos += 1;
            }
            ' ' | '\t' | '\r' => pos += 1,
            '#' => {
                while pos < chars.len() && chars[pos] != '\n' {
                    pos += 1;
                }
            }
            '"' | '\'' => {
                let start_line = line;
                let quote = c;
                let mut text = String::new();
                pos += 1;
                loop {
                    let Some(&ch) = chars.get(pos) else {
                        return Err(KiteError::syntax(start_line, "unterminated string literal"));
                    };
                    pos += 1;
                    match ch {
                        '\n' => return Err(KiteError::syntax(start_line, "unterminated string literal")),
                        '\\' => {
                            let Some(&escaped) = chars.get(pos) else {
                                return Err(KiteError::syntax(start_line, "unterminated string literal"));
                            };
                            pos += 1;
                            text.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                'r' => '\r',
                                '0' => '\0',
                                other => other,
                            });
                        }
                        ch if ch == quote => break,
                        ch => text.push(ch),
                    }
                }
                tokens.push(Token { tok: Tok::Str(text), line: start_line });
            }
            c if c.is_ascii_digit() => {
                let start = pos;
                while pos < chars.len() && (chars[pos].is_ascii_digit() || chars[pos] == '_') {
                    pos += 1;
                }
                let is_float = pos + 1 < chars.len() && chars[pos] == '.' && chars[pos + 1].is_ascii_digit();
                if is_float {
                    pos += 1;
                    while pos < chars.len() && chars[pos].is_ascii_digit() {
                        pos += 1;
                    }
                }
                let text: String = chars[start..pos].iter().filter(|ch| **ch != '_').collect();
                let tok = if is_float {
                    Tok::Float(text.parse().map_err(|_| KiteError::syntax(line, "invalid number"))?)
                } else {
                    Tok::Int(text.parse().map_err(|_| {
                        KiteError::syntax(line, format!("integer literal too large: {}", text))
                    })?)
                };
                tokens.push(Token { tok, line });
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = pos;
                while pos < chars.len() && (chars[pos].is_alphanumeric() || chars[pos] == '_') {
                    pos += 1;
                }
                tokens.push(Token {
                    tok: Tok::Name(chars[start..pos].iter().collect()),
                    line,
                });
            }
            _ => {
                let next = chars.get(pos + 1).copied();
                let (sym, width) = match (c, next) {
                    ('=', Some('=')) => (Sym::Eq, 2),
                    ('!', Some('=')) => (Sym::Ne, 2),
                    ('<', Some('=')) => (Sym::Le, 2),
                    ('>', Some('=')) => (Sym::Ge, 2),
                    ('/', Some('/')) => (Sym::SlashSlash, 2),
                    ('(', _) => (Sym::LParen, 1),
                    (')', _) => (Sym::RParen, 1),
                    ('[', _) => (Sym::LBracket, 1),
                    (']', _) => (Sym::RBracket, 1),
                    ('{', _) => (Sym::LBrace, 1),
                    ('}', _) => (Sym::RBrace, 1),
                    (',', _) => (Sym::Comma, 1),
                    ('.', _) => (Sym::Dot, 1),
                    (';', _) => (Sym::Semi, 1),
                    ('=', _) => (Sym::Assign, 1),
                    ('<', _) => (Sym::Lt, 1),
                    ('>', _) => (Sym::Gt, 1),
                    ('+', _) => (Sym::Plus, 1),
                    ('-', _) => (Sym::Minus, 1),
                    ('*', _) => (Sym::Star, 1),
                    ('/', _) => (Sym::Slash, 1),
                    ('%', _) => (Sym::Percent, 1),
                    (other, _) => {
                        return Err(KiteError::syntax(line, format!("invalid character '{}'", other)))
                    }
                };
                match sym {
                    Sym::LParen | Sym::LBracket => nesting += 1,
                    Sym::RParen | Sym::RBracket => nesting = nesting.saturating_sub(1),
                    _ => {}
                }
                match sym {
                    Sym::LParen | Sym::LBracket | Sym::LBrace => {
                        depth += 1;
                        if depth > MAX_NESTING {
                            return Err(KiteError::syntax(line, "too many nested brackets"));
                        }
                    }
                    Sym::RParen | Sym::RBracket | Sym::RBrace => depth = depth.saturating_sub(1),
                    _ => {}
                }
                tokens.push(Token { tok: Tok::Sym(sym), line });
                pos += width;
            }
        }
    }

    tokens.push(Token { tok: Tok::Eof, line });
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(source: &str) -> Vec<Tok> {
        tokenize(source).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn test_tokenize_statement() {
        assert_eq!(
            toks("set v = 42 # answer\nprint v"),
            vec![
                Tok::Name("set".into()),
                Tok::Name("v".into()),
                Tok::Sym(Sym::Assign),
                Tok::Int(42),
                Tok::Newline,
                Tok::Name("print".into()),
                Tok::Name("v".into()),
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn test_tokenize_numbers_strings_and_operators() {
        assert_eq!(
            toks("1.5 // 'a\\n' != x.y"),
            vec![
                Tok::Float(1.5),
                Tok::Sym(Sym::SlashSlash),
                Tok::Str("a\n".into()),
                Tok::Sym(Sym::Ne),
                Tok::Name("x".into()),
                Tok::Sym(Sym::Dot),
                Tok::Name("y".into()),
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn test_newlines_inside_brackets_are_ignored() {
        assert_eq!(
            toks("[1,\n2]"),
            vec![
                Tok::Sym(Sym::LBracket),
                Tok::Int(1),
                Tok::Sym(Sym::Comma),
                Tok::Int(2),
                Tok::Sym(Sym::RBracket),
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("print 'oops").unwrap_err();
        assert_eq!(err.kind, super::super::error::ErrorKind::SyntaxError);
    }
}
