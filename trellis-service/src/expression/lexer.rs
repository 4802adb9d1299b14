// Condition Lexer
// Splits a step condition into words, literals and symbols with their columns

use thiserror::Error;

/// Punctuation and operators of the condition language
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sym {
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    EqEq,
    NotEq,
    AndAnd,
    OrOr,
    Bang,
}

/// Two-character symbols come first so `!=` wins over `!`
const SYMBOLS: &[(&str, Sym)] = &[
    ("==", Sym::EqEq),
    ("!=", Sym::NotEq),
    ("&&", Sym::AndAnd),
    ("||", Sym::OrOr),
    ("!", Sym::Bang),
    ("(", Sym::LParen),
    (")", Sym::RParen),
    ("[", Sym::LBracket),
    ("]", Sym::RBracket),
    (",", Sym::Comma),
    (".", Sym::Dot),
];

/// Operators people write out of habit, with what trellis expects instead
const MISTAKES: &[(&str, &str)] = &[
    ("=", "use '==' to compare"),
    ("&", "use '&&' for a logical and"),
    ("|", "use '||' for a logical or"),
    ("<", "conditions only compare for equality"),
    (">", "conditions only compare for equality"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tok {
    /// Identifier, keyword or function name
    Word(String),
    /// Quoted string with `''` or `""` unescaped
    Quoted(String),
    /// Version-like number, kept as written (`1.70` is not `1.7`)
    Number(String),
    Sym(Sym),
}

/// A token and the byte offset where it starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spanned {
    pub tok: Tok,
    pub at: usize,
}

/// Malformed condition text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (column {column})")]
pub struct SyntaxError {
    pub message: String,
    /// 1-indexed character column
    pub column: usize,
}

impl SyntaxError {
    pub(crate) fn at(source: &str, offset: usize, message: impl Into<String>) -> Self {
        let column = source
            .get(..offset)
            .map(|prefix| prefix.chars().count())
            .unwrap_or(0)
            + 1;
        Self {
            message: message.into(),
            column,
        }
    }
}

/// Tokenize a whole condition
pub fn tokenize(source: &str) -> Result<Vec<Spanned>, SyntaxError> {
    let mut tokens = Vec::new();
    let mut offset = 0;

    while offset < source.len() {
        let rest = &source[offset..];
        let Some(ch) = rest.chars().next() else { break };

        if ch.is_whitespace() {
            offset += ch.len_utf8();
            continue;
        }

        let (tok, len) = if ch == '\'' || ch == '"' {
            quoted(source, offset, ch)?
        } else if ch.is_ascii_digit() {
            let len = run_length(rest, |c| c.is_ascii_digit() || c == '.');
            (Tok::Number(rest[..len].to_string()), len)
        } else if ch.is_alphabetic() || ch == '_' {
            let len = run_length(rest, |c| c.is_alphanumeric() || c == '_');
            (Tok::Word(rest[..len].to_string()), len)
        } else if let Some((text, sym)) = SYMBOLS.iter().find(|(text, _)| rest.starts_with(text)) {
            (Tok::Sym(*sym), text.len())
        } else {
            let hint = MISTAKES
                .iter()
                .find(|(text, _)| rest.starts_with(text))
                .map(|(_, hint)| format!("; {}", hint))
                .unwrap_or_default();
            return Err(SyntaxError::at(
                source,
                offset,
                format!("unexpected '{}'{}", ch, hint),
            ));
        };

        tokens.push(Spanned { tok, at: offset });
        offset += len;
    }

    Ok(tokens)
}

fn run_length(text: &str, keep: impl Fn(char) -> bool) -> usize {
    text.char_indices()
        .find(|(_, c)| !keep(*c))
        .map(|(i, _)| i)
        .unwrap_or(text.len())
}

/// Read a literal opened at `start`; a doubled quote stands for itself
fn quoted(source: &str, start: usize, quote: char) -> Result<(Tok, usize), SyntaxError> {
    let body = &source[start + 1..];
    let mut value = String::new();
    let mut chars = body.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if c != quote {
            value.push(c);
            continue;
        }
        if chars.peek().map(|(_, next)| *next) == Some(quote) {
            value.push(quote);
            chars.next();
            continue;
        }
        return Ok((Tok::Quoted(value), 1 + i + c.len_utf8()));
    }

    Err(SyntaxError::at(source, start, "string is never closed"))
}
