//! Pratt parser producing [`Ast`] from the token stream.

use super::ast::{Ast, Comparator};
use super::functions::Function;
use super::lexer::{tokenize, Token};
use super::PredicateError;

// Tokens binding weaker than this end a projection's right-hand side.
const PROJECTION_STOP: u8 = 10;

type ParseResult = Result<Ast, PredicateError>;

pub fn parse(src: &str) -> ParseResult {
    let tokens = tokenize(src)?;
    let mut parser = Parser { tokens, pos: 0 };
    let ast = parser.expr(0)?;
    match parser.peek() {
        Token::Eof => Ok(ast),
        other => Err(PredicateError::syntax(parser.offset(), format!("unexpected {}", other.describe()))),
    }
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, ahead: usize) -> &Token {
        let idx = (self.pos + ahead).min(self.tokens.len() - 1);
        &self.tokens[idx].1
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].0
    }

    fn advance(&mut self) -> (usize, Token) {
        let idx = self.pos.min(self.tokens.len() - 1);
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        self.tokens[idx].clone()
    }

    fn expect(&mut self, want: Token) -> Result<(), PredicateError> {
        let (offset, tok) = self.advance();
        if tok == want {
            Ok(())
        } else {
            Err(PredicateError::syntax(
                offset,
                format!("expected {}, found {}", want.describe(), tok.describe()),
            ))
        }
    }

    fn expr(&mut self, rbp: u8) -> ParseResult {
        let mut left = self.nud()?;
        while rbp < self.peek().lbp() {
            left = self.led(left)?;
        }
        Ok(left)
    }

    fn nud(&mut self) -> ParseResult {
        let (offset, tok) = self.advance();
        match tok {
            Token::At => Ok(Ast::Identity),
            Token::Identifier(name) => Ok(Ast::Field(name)),
            Token::QuotedIdentifier(name) => {
                if *self.peek() == Token::Lparen {
                    return Err(PredicateError::syntax(offset, "quoted identifiers cannot name a function"));
                }
                Ok(Ast::Field(name))
            }
            Token::Literal(v) => Ok(Ast::Literal(v)),
            Token::Star => self.wildcard_values(Ast::Identity),
            Token::Lbracket => match self.peek() {
                Token::Number(_) | Token::Colon => self.index(),
                Token::Star if *self.peek_at(1) == Token::Rbracket => {
                    self.advance();
                    self.advance();
                    self.wildcard_index(Ast::Identity)
                }
                _ => self.multi_list(),
            },
            Token::Flatten => self.flatten(Ast::Identity),
            Token::Filter => self.filter(Ast::Identity),
            Token::Lbrace => self.multi_hash(),
            Token::Not => {
                let operand = self.expr(Token::Not.lbp())?;
                Ok(Ast::Not(Box::new(operand)))
            }
            Token::Lparen => {
                let inner = self.expr(0)?;
                self.expect(Token::Rparen)?;
                Ok(inner)
            }
            Token::Ampersand => {
                let inner = self.expr(0)?;
                Ok(Ast::ExprRef(Box::new(inner)))
            }
            other => Err(PredicateError::syntax(offset, format!("unexpected {}", other.describe()))),
        }
    }

    fn led(&mut self, left: Ast) -> ParseResult {
        let (offset, tok) = self.advance();
        match tok {
            Token::Dot => {
                if *self.peek() == Token::Star {
                    self.advance();
                    return self.wildcard_values(left);
                }
                let rhs = self.dot_rhs(Token::Dot.lbp())?;
                Ok(Ast::Subexpr(Box::new(left), Box::new(rhs)))
            }
            Token::Lbracket => match self.peek() {
                Token::Number(_) | Token::Colon => {
                    let rhs = self.index()?;
                    Ok(Ast::Subexpr(Box::new(left), Box::new(rhs)))
                }
                Token::Star => {
                    self.advance();
                    self.expect(Token::Rbracket)?;
                    self.wildcard_index(left)
                }
                other => Err(PredicateError::syntax(
                    offset,
                    format!("expected number, ':' or '*' after '[', found {}", other.describe()),
                )),
            },
            Token::Flatten => self.flatten(left),
            Token::Filter => self.filter(left),
            Token::Pipe => {
                let rhs = self.expr(Token::Pipe.lbp())?;
                Ok(Ast::Subexpr(Box::new(left), Box::new(rhs)))
            }
            Token::Or => {
                let rhs = self.expr(Token::Or.lbp())?;
                Ok(Ast::Or(Box::new(left), Box::new(rhs)))
            }
            Token::And => {
                let rhs = self.expr(Token::And.lbp())?;
                Ok(Ast::And(Box::new(left), Box::new(rhs)))
            }
            Token::Lparen => match left {
                Ast::Field(name) => self.call(name, offset),
                _ => Err(PredicateError::syntax(offset, "only plain identifiers can be called")),
            },
            Token::Eq => self.compare(Comparator::Eq, left),
            Token::Ne => self.compare(Comparator::Ne, left),
            Token::Lt => self.compare(Comparator::Lt, left),
            Token::Le => self.compare(Comparator::Le, left),
            Token::Gt => self.compare(Comparator::Gt, left),
            Token::Ge => self.compare(Comparator::Ge, left),
            other => Err(PredicateError::syntax(offset, format!("unexpected {}", other.describe()))),
        }
    }

    fn compare(&mut self, cmp: Comparator, left: Ast) -> ParseResult {
        let rhs = self.expr(Token::Eq.lbp())?;
        Ok(Ast::Compare(cmp, Box::new(left), Box::new(rhs)))
    }

    fn dot_rhs(&mut self, lbp: u8) -> ParseResult {
        match self.peek() {
            Token::Lbracket => {
                self.advance();
                self.multi_list()
            }
            Token::Identifier(_) | Token::QuotedIdentifier(_) | Token::Star | Token::Lbrace => self.expr(lbp),
            other => Err(PredicateError::syntax(
                self.offset(),
                format!("expected identifier after '.', found {}", other.describe()),
            )),
        }
    }

    fn projection_rhs(&mut self, lbp: u8) -> ParseResult {
        match self.peek() {
            Token::Dot => {
                self.advance();
                self.dot_rhs(lbp)
            }
            Token::Lbracket | Token::Filter => self.expr(lbp),
            t if t.lbp() < PROJECTION_STOP => Ok(Ast::Identity),
            other => Err(PredicateError::syntax(
                self.offset(),
                format!("unexpected {} after projection", other.describe()),
            )),
        }
    }

    fn wildcard_index(&mut self, lhs: Ast) -> ParseResult {
        let rhs = self.projection_rhs(Token::Star.lbp())?;
        Ok(Ast::Projection(Box::new(lhs), Box::new(rhs)))
    }

    fn wildcard_values(&mut self, lhs: Ast) -> ParseResult {
        let rhs = self.projection_rhs(Token::Star.lbp())?;
        Ok(Ast::Projection(Box::new(Ast::ObjectValues(Box::new(lhs))), Box::new(rhs)))
    }

    fn flatten(&mut self, lhs: Ast) -> ParseResult {
        let rhs = self.projection_rhs(Token::Flatten.lbp())?;
        Ok(Ast::Projection(Box::new(Ast::Flatten(Box::new(lhs))), Box::new(rhs)))
    }

    fn filter(&mut self, lhs: Ast) -> ParseResult {
        let cond = self.expr(0)?;
        self.expect(Token::Rbracket)?;
        let rhs = self.projection_rhs(Token::Filter.lbp())?;
        Ok(Ast::Projection(
            Box::new(lhs),
            Box::new(Ast::Condition(Box::new(cond), Box::new(rhs))),
        ))
    }

    /// `[n]` or a slice `[start:stop:step]`; the opening bracket is already consumed.
    fn index(&mut self) -> ParseResult {
        let start_offset = self.offset();
        let mut parts: [Option<i64>; 3] = [None; 3];
        let mut slot = 0usize;
        loop {
            let (offset, tok) = self.advance();
            match tok {
                Token::Number(n) => {
                    parts[slot] = Some(n);
                    if !matches!(self.peek(), Token::Colon | Token::Rbracket) {
                        return Err(PredicateError::syntax(self.offset(), "expected ':' or ']' after index"));
                    }
                }
                Token::Colon => {
                    slot += 1;
                    if slot > 2 {
                        return Err(PredicateError::syntax(offset, "too many colons in slice"));
                    }
                }
                Token::Rbracket => break,
                other => {
                    return Err(PredicateError::syntax(
                        offset,
                        format!("unexpected {} in index", other.describe()),
                    ))
                }
            }
        }
        if slot == 0 {
            return parts[0]
                .map(Ast::Index)
                .ok_or_else(|| PredicateError::syntax(start_offset, "empty index"));
        }
        if parts[2] == Some(0) {
            return Err(PredicateError::syntax(start_offset, "slice step cannot be 0"));
        }
        let slice = Ast::Slice { start: parts[0], stop: parts[1], step: parts[2] };
        let rhs = self.projection_rhs(Token::Star.lbp())?;
        Ok(Ast::Projection(Box::new(slice), Box::new(rhs)))
    }

    /// `[a, b, ...]`; the opening bracket is already consumed.
    fn multi_list(&mut self) -> ParseResult {
        let mut items = Vec::new();
        loop {
            items.push(self.expr(0)?);
            let (offset, tok) = self.advance();
            match tok {
                Token::Comma => continue,
                Token::Rbracket => break,
                other => {
                    return Err(PredicateError::syntax(
                        offset,
                        format!("expected ',' or ']', found {}", other.describe()),
                    ))
                }
            }
        }
        Ok(Ast::MultiList(items))
    }

    /// `{key: expr, ...}`; the opening brace is already consumed.
    fn multi_hash(&mut self) -> ParseResult {
        let mut pairs = Vec::new();
        loop {
            let (offset, tok) = self.advance();
            let key = match tok {
                Token::Identifier(k) | Token::QuotedIdentifier(k) => k,
                other => {
                    return Err(PredicateError::syntax(
                        offset,
                        format!("expected key in multi-select hash, found {}", other.describe()),
                    ))
                }
            };
            self.expect(Token::Colon)?;
            pairs.push((key, self.expr(0)?));
            let (offset, tok) = self.advance();
            match tok {
                Token::Comma => continue,
                Token::Rbrace => break,
                other => {
                    return Err(PredicateError::syntax(
                        offset,
                        format!("expected ',' or '}}', found {}", other.describe()),
                    ))
                }
            }
        }
        Ok(Ast::MultiHash(pairs))
    }

    fn call(&mut self, name: String, offset: usize) -> ParseResult {
        let mut args = Vec::new();
        if *self.peek() == Token::Rparen {
            self.advance();
        } else {
            loop {
                args.push(self.expr(0)?);
                let (at, tok) = self.advance();
                match tok {
                    Token::Comma => continue,
                    Token::Rparen => break,
                    other => {
                        return Err(PredicateError::syntax(
                            at,
                            format!("expected ',' or ')', found {}", other.describe()),
                        ))
                    }
                }
            }
        }
        let function = Function::lookup(&name)
            .ok_or_else(|| PredicateError::syntax(offset, format!("unknown function {name}()")))?;
        function
            .check_arity(args.len())
            .map_err(|msg| PredicateError::syntax(offset, msg))?;
        for (at, arg) in args.iter().enumerate() {
            let is_ref = matches!(arg, Ast::ExprRef(_));
            if is_ref != (function.expref_position() == Some(at)) {
                let msg = if is_ref {
                    format!("{}() does not take an expression reference as argument {}", name, at + 1)
                } else {
                    format!("{}() expects an expression reference as argument {}", name, at + 1)
                };
                return Err(PredicateError::syntax(offset, msg));
            }
        }
        Ok(Ast::Call(function, args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field(name: &str) -> Box<Ast> {
        Box::new(Ast::Field(name.into()))
    }

    #[test]
    fn dotted_path_is_left_nested() {
        assert_eq!(
            parse("metadata.labels.app").unwrap(),
            Ast::Subexpr(Box::new(Ast::Subexpr(field("metadata"), field("labels"))), field("app"))
        );
    }

    #[test]
    fn comparison_binds_tighter_than_and() {
        let ast = parse("a == 'x' && b").unwrap();
        assert_eq!(
            ast,
            Ast::And(
                Box::new(Ast::Compare(Comparator::Eq, field("a"), Box::new(Ast::Literal(json!("x"))))),
                field("b"),
            )
        );
    }

    #[test]
    fn filter_projects_rhs() {
        let ast = parse("items[?ready].name").unwrap();
        assert_eq!(
            ast,
            Ast::Projection(
                field("items"),
                Box::new(Ast::Condition(field("ready"), field("name"))),
            )
        );
    }

    #[test]
    fn pipe_stops_projection() {
        let ast = parse("a[*].b | [0]").unwrap();
        assert_eq!(
            ast,
            Ast::Subexpr(
                Box::new(Ast::Projection(field("a"), field("b"))),
                Box::new(Ast::Index(0)),
            )
        );
    }

    #[test]
    fn expression_reference_argument() {
        assert_eq!(
            parse("sort_by(items, &spec.age)").unwrap(),
            Ast::Call(
                Function::SortBy,
                vec![
                    Ast::Field("items".into()),
                    Ast::ExprRef(Box::new(Ast::Subexpr(field("spec"), field("age")))),
                ],
            )
        );
    }

    #[test]
    fn syntax_errors() {
        for bad in [
            "[invalid",
            "",
            "a.",
            "a ==",
            "a[1 2]",
            "a[::0]",
            "a.&b",
            "length(&a)",
            "sort_by(&a, items)",
            "map(items, &a)",
            "foo(",
            "nope(a)",
            "length(a, b)",
            "\"length\"(a)",
            "{a b}",
            "a b",
            "(a",
        ] {
            assert!(parse(bad).is_err(), "{bad:?} should not compile");
        }
    }
}
