use serde_json::Value;

use super::PredicateError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Identifier(String),
    QuotedIdentifier(String),
    Number(i64),
    /// `` `json` `` and `'raw string'` literals.
    Literal(Value),
    Dot,
    Star,
    Flatten,
    Filter,
    Lbracket,
    Rbracket,
    Lbrace,
    Rbrace,
    Lparen,
    Rparen,
    Comma,
    Colon,
    At,
    Ampersand,
    Pipe,
    Or,
    And,
    Not,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Eof,
}

impl Token {
    /// Left binding power for the Pratt parser.
    pub fn lbp(&self) -> u8 {
        match self {
            Token::Pipe => 1,
            Token::Or => 2,
            Token::And => 3,
            Token::Eq | Token::Ne | Token::Lt | Token::Le | Token::Gt | Token::Ge => 5,
            Token::Flatten => 9,
            Token::Star => 20,
            Token::Filter => 21,
            Token::Dot => 40,
            Token::Not => 45,
            Token::Lbrace => 50,
            Token::Lbracket => 55,
            Token::Lparen => 60,
            _ => 0,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Token::Identifier(s) => format!("identifier {s:?}"),
            Token::QuotedIdentifier(s) => format!("quoted identifier {s:?}"),
            Token::Number(n) => format!("number {n}"),
            Token::Literal(v) => format!("literal {v}"),
            Token::Eof => "end of expression".to_string(),
            other => format!("{other:?}"),
        }
    }
}

pub fn tokenize(src: &str) -> Result<Vec<(usize, Token)>, PredicateError> {
    let mut out = Vec::new();
    let mut chars = src.char_indices().peekable();
    while let Some(&(pos, ch)) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
            continue;
        }
        let tok = match ch {
            'a'..='z' | 'A'..='Z' | '_' => {
                let mut ident = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push((pos, Token::Identifier(ident)));
                continue;
            }
            '0'..='9' | '-' => {
                let mut digits = String::new();
                digits.push(ch);
                chars.next();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_ascii_digit() {
                        digits.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let n = digits
                    .parse::<i64>()
                    .map_err(|_| PredicateError::syntax(pos, format!("invalid number {digits:?}")))?;
                out.push((pos, Token::Number(n)));
                continue;
            }
            '"' => {
                let body = delimited(&mut chars, src, pos, '"')?;
                let name: String = serde_json::from_str(&format!("\"{body}\""))
                    .map_err(|e| PredicateError::syntax(pos, format!("invalid quoted identifier: {e}")))?;
                out.push((pos, Token::QuotedIdentifier(name)));
                continue;
            }
            '\'' => {
                let body = delimited(&mut chars, src, pos, '\'')?;
                out.push((pos, Token::Literal(Value::String(body.replace("\\'", "'")))));
                continue;
            }
            '`' => {
                let body = delimited(&mut chars, src, pos, '`')?;
                let json = body.replace("\\`", "`");
                let value: Value = serde_json::from_str(json.trim())
                    .map_err(|e| PredicateError::syntax(pos, format!("invalid JSON literal: {e}")))?;
                out.push((pos, Token::Literal(value)));
                continue;
            }
            '.' => Token::Dot,
            '*' => Token::Star,
            ']' => Token::Rbracket,
            '{' => Token::Lbrace,
            '}' => Token::Rbrace,
            '(' => Token::Lparen,
            ')' => Token::Rparen,
            ',' => Token::Comma,
            ':' => Token::Colon,
            '@' => Token::At,
            '[' => {
                chars.next();
                let tok = match chars.peek().map(|&(_, c)| c) {
                    Some(']') => {
                        chars.next();
                        Token::Flatten
                    }
                    Some('?') => {
                        chars.next();
                        Token::Filter
                    }
                    _ => Token::Lbracket,
                };
                out.push((pos, tok));
                continue;
            }
            '|' => {
                chars.next();
                let tok = if next_is(&mut chars, '|') { Token::Or } else { Token::Pipe };
                out.push((pos, tok));
                continue;
            }
            '&' => {
                chars.next();
                let tok = if next_is(&mut chars, '&') { Token::And } else { Token::Ampersand };
                out.push((pos, tok));
                continue;
            }
            '!' => {
                chars.next();
                let tok = if next_is(&mut chars, '=') { Token::Ne } else { Token::Not };
                out.push((pos, tok));
                continue;
            }
            '<' => {
                chars.next();
                let tok = if next_is(&mut chars, '=') { Token::Le } else { Token::Lt };
                out.push((pos, tok));
                continue;
            }
            '>' => {
                chars.next();
                let tok = if next_is(&mut chars, '=') { Token::Ge } else { Token::Gt };
                out.push((pos, tok));
                continue;
            }
            '=' => {
                chars.next();
                if !next_is(&mut chars, '=') {
                    return Err(PredicateError::syntax(pos, "expected '==' but found a single '='"));
                }
                out.push((pos, Token::Eq));
                continue;
            }
            other => return Err(PredicateError::syntax(pos, format!("unexpected character {other:?}"))),
        };
        chars.next();
        out.push((pos, tok));
    }
    out.push((src.len(), Token::Eof));
    Ok(out)
}

type Chars<'a> = std::iter::Peekable<std::str::CharIndices<'a>>;

fn next_is(chars: &mut Chars<'_>, want: char) -> bool {
    if chars.peek().map(|&(_, c)| c) == Some(want) {
        chars.next();
        true
    } else {
        false
    }
}

/// Consume a `quote`-delimited run starting at `start`, returning the raw body
/// (escapes untouched). A backslash always skips the following character.
fn delimited<'a>(chars: &mut Chars<'_>, src: &'a str, start: usize, quote: char) -> Result<&'a str, PredicateError> {
    chars.next();
    let body_start = start + quote.len_utf8();
    while let Some((pos, c)) = chars.next() {
        if c == '\\' {
            chars.next();
        } else if c == quote {
            return Ok(&src[body_start..pos]);
        }
    }
    Err(PredicateError::syntax(start, format!("unterminated {quote} delimited token")))
}
