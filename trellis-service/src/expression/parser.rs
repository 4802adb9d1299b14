// Condition Parser
// Precedence-climbing parser from condition tokens to an expression tree

use crate::expression::lexer::{tokenize, Spanned, Sym, SyntaxError, Tok};

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Bool(bool),

    /// String literal; number literals are kept as their source text
    String(String),

    /// Job variable: `platform`, `variables.platform` or `variables['platform']`
    Reference(String),

    /// Built-in call with a lowercased name
    FunctionCall { name: String, args: Vec<Expr> },

    Not(Box<Expr>),

    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

impl Expr {
    /// Collect every variable name this expression reads, in source order
    pub fn collect_references<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Bool(_) | Expr::String(_) => {}
            Expr::Reference(name) => out.push(name),
            Expr::FunctionCall { args, .. } => {
                for arg in args {
                    arg.collect_references(out);
                }
            }
            Expr::Not(expr) => expr.collect_references(out),
            Expr::Binary { left, right, .. } => {
                left.collect_references(out);
                right.collect_references(out);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    And,
    Or,
}

impl BinaryOp {
    /// Operator for a symbol and how tightly it binds
    fn from_sym(sym: Sym) -> Option<(BinaryOp, u8)> {
        match sym {
            Sym::OrOr => Some((BinaryOp::Or, 1)),
            Sym::AndAnd => Some((BinaryOp::And, 2)),
            Sym::EqEq => Some((BinaryOp::Eq, 3)),
            Sym::NotEq => Some((BinaryOp::Ne, 3)),
            _ => None,
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        })
    }
}

/// Built-in functions: name, minimum and maximum argument count
const FUNCTIONS: &[(&str, usize, Option<usize>)] = &[
    ("eq", 2, Some(2)),
    ("ne", 2, Some(2)),
    ("not", 1, Some(1)),
    ("and", 2, None),
    ("or", 2, None),
    ("in", 2, None),
    ("contains", 2, Some(2)),
    ("startswith", 2, Some(2)),
    ("endswith", 2, Some(2)),
];

/// Parse a complete condition
pub fn parse(source: &str) -> Result<Expr, SyntaxError> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(SyntaxError::at(source, 0, "condition is empty"));
    }

    let mut parser = Parser {
        source,
        tokens,
        pos: 0,
    };
    let expr = parser.expr(0)?;

    match parser.tokens.get(parser.pos) {
        None => Ok(expr),
        Some(extra) => Err(parser.error_at(extra.at, format!("unexpected {}", describe(&extra.tok)))),
    }
}

struct Parser<'s> {
    source: &'s str,
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser<'_> {
    /// Operand followed by binary operators binding tighter than `min`
    fn expr(&mut self, min: u8) -> Result<Expr, SyntaxError> {
        let mut left = self.unary()?;

        while let Some(Tok::Sym(sym)) = self.peek() {
            let Some((op, power)) = BinaryOp::from_sym(*sym) else {
                break;
            };
            if power <= min {
                break;
            }
            self.pos += 1;
            let right = self.expr(power)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, SyntaxError> {
        if self.eat(Sym::Bang) {
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        self.operand()
    }

    fn operand(&mut self) -> Result<Expr, SyntaxError> {
        let at = self.offset();
        let Some(Spanned { tok, .. }) = self.tokens.get(self.pos).cloned() else {
            return Err(self.error_at(at, "condition ends where a value was expected"));
        };
        self.pos += 1;

        match tok {
            Tok::Quoted(text) | Tok::Number(text) => Ok(Expr::String(text)),
            Tok::Word(word) if word.eq_ignore_ascii_case("true") => Ok(Expr::Bool(true)),
            Tok::Word(word) if word.eq_ignore_ascii_case("false") => Ok(Expr::Bool(false)),
            Tok::Word(word) if self.eat(Sym::LParen) => self.call(word, at),
            Tok::Word(word) => self.reference(word, at),
            Tok::Sym(Sym::LParen) => {
                let inner = self.expr(0)?;
                self.require(Sym::RParen, "')'")?;
                Ok(inner)
            }
            other => Err(self.error_at(at, format!("unexpected {}", describe(&other)))),
        }
    }

    /// `name(args..)`, with `(` already consumed
    fn call(&mut self, name: String, at: usize) -> Result<Expr, SyntaxError> {
        let mut args = Vec::new();
        while !self.eat(Sym::RParen) {
            if !args.is_empty() {
                self.require(Sym::Comma, "',' or ')'")?;
                // trailing comma
                if self.eat(Sym::RParen) {
                    break;
                }
            }
            args.push(self.expr(0)?);
        }

        let lower = name.to_ascii_lowercase();
        let Some(&(_, min, max)) = FUNCTIONS.iter().find(|(known, _, _)| *known == lower) else {
            let known: Vec<&str> = FUNCTIONS.iter().map(|(f, _, _)| *f).collect();
            return Err(self.error_at(
                at,
                format!("unknown function '{}' (available: {})", name, known.join(", ")),
            ));
        };

        if args.len() < min || max.is_some_and(|max| args.len() > max) {
            let expected = match max {
                Some(max) if max == min => min.to_string(),
                Some(max) => format!("{} to {}", min, max),
                None => format!("at least {}", min),
            };
            return Err(self.error_at(
                at,
                format!("{}() takes {} arguments, got {}", lower, expected, args.len()),
            ));
        }

        Ok(Expr::FunctionCall { name: lower, args })
    }

    /// Bare name, or `variables` followed by `.name` / `['name']`
    fn reference(&mut self, word: String, at: usize) -> Result<Expr, SyntaxError> {
        let dotted = self.eat(Sym::Dot);
        let indexed = !dotted && self.eat(Sym::LBracket);
        if !dotted && !indexed {
            return Ok(Expr::Reference(word));
        }

        if word != "variables" {
            return Err(self.error_at(
                at,
                format!("'{}' has no members; job variables are read as variables.<name>", word),
            ));
        }

        let name_at = self.offset();
        let name = match (self.tokens.get(self.pos).map(|s| &s.tok), dotted) {
            (Some(Tok::Word(name)), true) => name.clone(),
            (Some(Tok::Quoted(name)), false) => name.clone(),
            (_, true) => return Err(self.error_at(name_at, "expected a variable name after '.'")),
            (_, false) => {
                return Err(self.error_at(name_at, "expected a quoted variable name inside '[ ]'"))
            }
        };
        self.pos += 1;

        if indexed {
            self.require(Sym::RBracket, "']'")?;
        }
        Ok(Expr::Reference(name))
    }

    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|s| &s.tok)
    }

    fn eat(&mut self, sym: Sym) -> bool {
        if self.peek() == Some(&Tok::Sym(sym)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn require(&mut self, sym: Sym, what: &str) -> Result<(), SyntaxError> {
        if self.eat(sym) {
            return Ok(());
        }
        let found = self
            .peek()
            .map(describe)
            .unwrap_or_else(|| "end of condition".to_string());
        Err(self.error_at(self.offset(), format!("expected {}, found {}", what, found)))
    }

    /// Offset of the next token, or the end of the source
    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|s| s.at)
            .unwrap_or(self.source.len())
    }

    fn error_at(&self, offset: usize, message: impl Into<String>) -> SyntaxError {
        SyntaxError::at(self.source, offset, message)
    }
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Word(word) => format!("'{}'", word),
        Tok::Quoted(text) => format!("string '{}'", text),
        Tok::Number(text) => format!("number {}", text),
        Tok::Sym(sym) => {
            let text = match sym {
                Sym::LParen => "(",
                Sym::RParen => ")",
                Sym::LBracket => "[",
                Sym::RBracket => "]",
                Sym::Comma => ",",
                Sym::Dot => ".",
                Sym::EqEq => "==",
                Sym::NotEq => "!=",
                Sym::AndAnd => "&&",
                Sym::OrOr => "||",
                Sym::Bang => "!",
            };
            format!("'{}'", text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(name: &str) -> Expr {
        Expr::Reference(name.to_string())
    }

    fn string(text: &str) -> Expr {
        Expr::String(text.to_string())
    }

    fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    #[test]
    fn test_literals() {
        assert_eq!(parse("TRUE").unwrap(), Expr::Bool(true));
        assert_eq!(parse("false").unwrap(), Expr::Bool(false));
        assert_eq!(parse("1.70").unwrap(), string("1.70"));
        assert_eq!(parse("'hello'").unwrap(), string("hello"));
    }

    #[test]
    fn test_reference_forms() {
        for source in ["platform", "variables.platform", "variables['platform']"] {
            assert_eq!(parse(source).unwrap(), reference("platform"), "{}", source);
        }
        // `variables` alone is an ordinary name
        assert_eq!(parse("variables").unwrap(), reference("variables"));
    }

    #[test]
    fn test_members_only_on_variables() {
        let err = parse("job.name").unwrap_err();
        assert!(err.message.contains("has no members"));
        assert_eq!(err.column, 1);
    }

    #[test]
    fn test_precedence() {
        assert_eq!(
            parse("a || b && c == 'x'").unwrap(),
            binary(
                BinaryOp::Or,
                reference("a"),
                binary(
                    BinaryOp::And,
                    reference("b"),
                    binary(BinaryOp::Eq, reference("c"), string("x"))
                )
            )
        );
        assert_eq!(
            parse("(a || b) && c").unwrap(),
            binary(
                BinaryOp::And,
                binary(BinaryOp::Or, reference("a"), reference("b")),
                reference("c")
            )
        );
    }

    #[test]
    fn test_operators_are_left_associative() {
        assert_eq!(
            parse("a && b && c").unwrap(),
            binary(
                BinaryOp::And,
                binary(BinaryOp::And, reference("a"), reference("b")),
                reference("c")
            )
        );
    }

    #[test]
    fn test_not() {
        assert_eq!(
            parse("!!flag").unwrap(),
            Expr::Not(Box::new(Expr::Not(Box::new(reference("flag")))))
        );
        assert!(matches!(parse("!(platform == 'windows')").unwrap(), Expr::Not(_)));
    }

    #[test]
    fn test_function_calls() {
        assert_eq!(
            parse("EQ(platform, 'linux',)").unwrap(),
            Expr::FunctionCall {
                name: "eq".to_string(),
                args: vec![reference("platform"), string("linux")],
            }
        );
        assert!(parse("in(a, 'x', 'y', 'z')").is_ok());
        assert!(parse("startsWith(imageName, 'ubuntu')").is_ok());
    }

    #[test]
    fn test_function_validation() {
        let err = parse("succeeded()").unwrap_err();
        assert!(err.message.starts_with("unknown function 'succeeded'"));

        let err = parse("eq(a)").unwrap_err();
        assert_eq!(err.message, "eq() takes 2 arguments, got 1");

        let err = parse("eq(a b)").unwrap_err();
        assert_eq!(err.message, "expected ',' or ')', found 'b'");
        assert_eq!(err.column, 6);
    }

    #[test]
    fn test_collect_references() {
        let expr = parse("platform == 'linux' && in(variables['channel'], 'beta', msrv)").unwrap();
        let mut refs = Vec::new();
        expr.collect_references(&mut refs);
        assert_eq!(refs, vec!["platform", "channel", "msrv"]);
    }

    #[test]
    fn test_errors() {
        assert_eq!(parse("").unwrap_err().message, "condition is empty");
        assert_eq!(
            parse("a ==").unwrap_err().message,
            "condition ends where a value was expected"
        );
        assert_eq!(
            parse("(a == b").unwrap_err().message,
            "expected ')', found end of condition"
        );
        assert_eq!(parse("a b").unwrap_err().message, "unexpected 'b'");
        assert!(parse("variables[platform]").is_err());
        assert!(parse("variables.'x'").is_err());
    }
}
