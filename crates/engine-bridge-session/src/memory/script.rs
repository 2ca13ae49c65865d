//! Tokenizer and parser for the memory engine's expression language.
//!
//! The language is deliberately small: literals, names, field access, calls
//! and assignments, separated by `;`, `,` or newlines.

use engine_bridge_core::Primitive;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Literal(Primitive),
    Name(String),
    Field(Box<Expr>, String),
    Call(Box<Expr>, Vec<Expr>),
    Neg(Box<Expr>),
}

impl Expr {
    /// `a.b.c` as segments, if the expression is a plain dotted name.
    pub(crate) fn dotted_path(&self) -> Option<Vec<String>> {
        match self {
            Self::Name(n) => Some(vec![n.clone()]),
            Self::Field(base, field) => {
                let mut path = base.dotted_path()?;
                path.push(field.clone());
                Some(path)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Statement {
    /// `target = value`, where `target` is a variable optionally followed by fields.
    Assign { target: Vec<String>, value: Expr },
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Literal(Primitive),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Minus,
    Assign,
    Separator,
}

/// Parse failure, reported by the engine as a remote error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ParseError(pub(crate) String);

pub(crate) fn parse(source: &str) -> Result<Vec<Statement>, ParseError> {
    let tokens = tokenize(source)?;
    Parser { tokens, pos: 0 }.program()
}

fn tokenize(source: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\r' => {
                chars.next();
            }
            '\n' | ';' => {
                chars.next();
                tokens.push(Token::Separator);
            }
            '%' => {
                // Comment to end of line.
                while chars.peek().is_some_and(|&c| c != '\n') {
                    chars.next();
                }
            }
            '(' | ')' | '[' | ']' | ',' | '.' | '-' | '=' => {
                chars.next();
                tokens.push(match c {
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    '[' => Token::LBracket,
                    ']' => Token::RBracket,
                    ',' => Token::Comma,
                    '.' => Token::Dot,
                    '-' => Token::Minus,
                    _ => Token::Assign,
                });
            }
            '\'' | '"' => {
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        // A doubled quote is an escaped quote.
                        Some(q) if q == c => {
                            if chars.peek() == Some(&c) {
                                chars.next();
                                text.push(c);
                            } else {
                                break;
                            }
                        }
                        Some(other) => text.push(other),
                        None => {
                            return Err(ParseError(
                                "String is not terminated properly.".to_string(),
                            ));
                        }
                    }
                }
                tokens.push(Token::Literal(Primitive::Text(text)));
            }
            c if c.is_ascii_digit() => {
                let mut number = String::new();
                let mut is_float = false;
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() {
                        number.push(d);
                    } else if d == '.' && !is_float {
                        is_float = true;
                        number.push(d);
                    } else if d == 'e' || d == 'E' {
                        is_float = true;
                        number.push(d);
                        chars.next();
                        if let Some(&sign) = chars.peek().filter(|s| **s == '+' || **s == '-') {
                            number.push(sign);
                            chars.next();
                        }
                        continue;
                    } else {
                        break;
                    }
                    chars.next();
                }
                tokens.push(Token::Literal(number_literal(&number, is_float)?));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&d) = chars.peek().filter(|d| d.is_alphanumeric() || **d == '_') {
                    ident.push(d);
                    chars.next();
                }
                tokens.push(match ident.as_str() {
                    "true" => Token::Literal(Primitive::Bool(true)),
                    "false" => Token::Literal(Primitive::Bool(false)),
                    _ => Token::Ident(ident),
                });
            }
            other => {
                return Err(ParseError(format!(
                    "Invalid text character '{other}' in expression."
                )));
            }
        }
    }
    Ok(tokens)
}

fn number_literal(text: &str, is_float: bool) -> Result<Primitive, ParseError> {
    let invalid = || ParseError(format!("Invalid number '{text}'."));
    if is_float {
        text.parse().map(Primitive::Number).map_err(|_| invalid())
    } else {
        text.parse().map(Primitive::Integer).map_err(|_| invalid())
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<(), ParseError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.unexpected(what))
        }
    }

    fn unexpected(&self, what: &str) -> ParseError {
        match self.peek() {
            Some(token) => ParseError(format!("Invalid expression: expected {what}, found {token:?}.")),
            None => ParseError(format!(
                "Invalid expression: expected {what} before end of input."
            )),
        }
    }

    fn program(mut self) -> Result<Vec<Statement>, ParseError> {
        let mut statements = Vec::new();
        loop {
            while self.eat(&Token::Separator) || self.eat(&Token::Comma) {}
            if self.peek().is_none() {
                break;
            }
            statements.push(self.statement()?);
            match self.peek() {
                None | Some(Token::Separator | Token::Comma) => {}
                Some(_) => return Err(self.unexpected("end of statement")),
            }
        }
        Ok(statements)
    }

    fn statement(&mut self) -> Result<Statement, ParseError> {
        let expr = self.expr()?;
        if !self.eat(&Token::Assign) {
            return Ok(Statement::Expr(expr));
        }
        let target = expr.dotted_path().ok_or_else(|| {
            ParseError("Invalid assignment target: expected a variable or field.".to_string())
        })?;
        let value = self.expr()?;
        Ok(Statement::Assign { target, value })
    }

    fn expr(&mut self) -> Result<Expr, ParseError> {
        if self.eat(&Token::Minus) {
            return Ok(Expr::Neg(Box::new(self.expr()?)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(&Token::Dot) {
                match self.next() {
                    Some(Token::Ident(field)) => expr = Expr::Field(Box::new(expr), field),
                    _ => {
                        self.pos -= 1;
                        return Err(self.unexpected("a field name"));
                    }
                }
            } else if self.eat(&Token::LParen) {
                let mut args = Vec::new();
                if !self.eat(&Token::RParen) {
                    loop {
                        args.push(self.expr()?);
                        if self.eat(&Token::RParen) {
                            break;
                        }
                        self.expect(&Token::Comma, "',' or ')'")?;
                    }
                }
                expr = Expr::Call(Box::new(expr), args);
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        match self.next() {
            Some(Token::Literal(p)) => Ok(Expr::Literal(p)),
            Some(Token::Ident(name)) => Ok(Expr::Name(name)),
            Some(Token::LBracket) => {
                self.expect(&Token::RBracket, "']'")?;
                Ok(Expr::Literal(Primitive::Empty))
            }
            Some(Token::LParen) => {
                let inner = self.expr()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            _ => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.unexpected("a value"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(n: &str) -> Expr {
        Expr::Name(n.to_string())
    }

    #[test]
    fn test_dotted_call() {
        let stmts = parse(r#"Netabolics.Biology.Model("datasets/Cell.mat")"#).unwrap();
        let [Statement::Expr(Expr::Call(callee, args))] = stmts.as_slice() else {
            panic!("unexpected parse: {stmts:?}");
        };
        assert_eq!(
            callee.dotted_path().unwrap(),
            vec!["Netabolics", "Biology", "Model"]
        );
        assert_eq!(
            args,
            &vec![Expr::Literal(Primitive::Text("datasets/Cell.mat".into()))]
        );
    }

    #[test]
    fn test_statements_and_assignment() {
        let stmts = parse("x = 42; Cell.SBML.name = 'it''s'\ndisp(x)").unwrap();
        assert_eq!(stmts.len(), 3);
        assert_eq!(
            stmts[0],
            Statement::Assign {
                target: vec!["x".into()],
                value: Expr::Literal(Primitive::Integer(42)),
            }
        );
        assert_eq!(
            stmts[1],
            Statement::Assign {
                target: vec!["Cell".into(), "SBML".into(), "name".into()],
                value: Expr::Literal(Primitive::Text("it's".into())),
            }
        );
        assert_eq!(
            stmts[2],
            Statement::Expr(Expr::Call(Box::new(name("disp")), vec![name("x")]))
        );
    }

    #[test]
    fn test_literals() {
        let stmts = parse("f(1.5, -2, 3e2, true, [], \"a\")").unwrap();
        let [Statement::Expr(Expr::Call(_, args))] = stmts.as_slice() else {
            panic!("unexpected parse: {stmts:?}");
        };
        assert_eq!(args[0], Expr::Literal(Primitive::Number(1.5)));
        assert_eq!(args[1], Expr::Neg(Box::new(Expr::Literal(Primitive::Integer(2)))));
        assert_eq!(args[2], Expr::Literal(Primitive::Number(300.0)));
        assert_eq!(args[3], Expr::Literal(Primitive::Bool(true)));
        assert_eq!(args[4], Expr::Literal(Primitive::Empty));
        assert_eq!(args[5], Expr::Literal(Primitive::Text("a".into())));
    }

    #[test]
    fn test_malformed() {
        assert!(parse("bad_expr(").is_err());
        assert!(parse("'open").is_err());
        assert!(parse("f(1) = 2").is_err());
        assert!(parse("x y").is_err());
        assert!(parse("a.").is_err());
        assert!(parse("1 # 2").is_err());
    }

    #[test]
    fn test_empty_and_comments() {
        assert!(parse("").unwrap().is_empty());
        assert!(parse(";; % nothing here").unwrap().is_empty());
    }
}
