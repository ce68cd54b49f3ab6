//! `${{ }}` expressions: lexer, parser and evaluator
//!
//! Covers the subset workflows use in practice: context paths
//! (`matrix.python-version`, `secrets.X`, `steps.id.outputs.y`), literals,
//! `! == != < <= > >= && ||`, parentheses, and the status and string
//! functions. String comparison ignores case.

use crate::core::{context::ExpressionContext, state::JobStatus};
use thiserror::Error;

/// Errors from parsing or evaluating an expression
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExpressionError {
    #[error("Unexpected character '{0}' at position {1}")]
    UnexpectedChar(char, usize),

    #[error("Unterminated string literal")]
    UnterminatedString,

    #[error("Unexpected token '{0}'")]
    UnexpectedToken(String),

    #[error("Unexpected end of expression")]
    UnexpectedEnd,

    #[error("Unknown function '{0}'")]
    UnknownFunction(String),

    #[error("Function '{name}' expects {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: String,
        got: usize,
    },

    #[error("Unterminated '${{{{' in template")]
    UnterminatedTemplate,
}

/// Runtime value of an expression
#[derive(Debug, Clone, PartialEq)]
pub enum ExprValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

impl ExprValue {
    pub fn is_truthy(&self) -> bool {
        match self {
            ExprValue::Null => false,
            ExprValue::Bool(b) => *b,
            ExprValue::Number(n) => *n != 0.0 && !n.is_nan(),
            ExprValue::String(s) => !s.is_empty(),
        }
    }

    fn to_number(&self) -> f64 {
        match self {
            ExprValue::Null => 0.0,
            ExprValue::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            ExprValue::Number(n) => *n,
            ExprValue::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse().unwrap_or(f64::NAN)
                }
            }
        }
    }

    /// Text used when the value is substituted into a template
    pub fn render(&self) -> String {
        match self {
            ExprValue::Null => String::new(),
            ExprValue::Bool(b) => b.to_string(),
            ExprValue::Number(n) => {
                if n.fract() == 0.0 && n.is_finite() {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            ExprValue::String(s) => s.clone(),
        }
    }

    fn loose_eq(&self, other: &ExprValue) -> bool {
        match (self, other) {
            (ExprValue::String(a), ExprValue::String(b)) => a.eq_ignore_ascii_case(b),
            (ExprValue::Null, ExprValue::Null) => true,
            (ExprValue::Bool(a), ExprValue::Bool(b)) => a == b,
            _ => {
                let (a, b) = (self.to_number(), other.to_number());
                !a.is_nan() && !b.is_nan() && a == b
            }
        }
    }

    fn compare(&self, other: &ExprValue) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (ExprValue::String(a), ExprValue::String(b)) => {
                Some(a.to_lowercase().cmp(&b.to_lowercase()))
            }
            _ => self.to_number().partial_cmp(&other.to_number()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// Parsed expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(ExprValue),
    Path(Vec<String>),
    Not(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
}

const STATUS_FUNCTIONS: [&str; 4] = ["success", "failure", "always", "cancelled"];

impl Expr {
    /// Parse expression source (without the `${{ }}` wrapper)
    pub fn parse(source: &str) -> Result<Expr, ExpressionError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        match parser.peek() {
            None => Ok(expr),
            Some(tok) => Err(ExpressionError::UnexpectedToken(tok.describe())),
        }
    }

    /// Whether any status function is called somewhere in the tree
    pub fn uses_status_function(&self) -> bool {
        match self {
            Expr::Literal(_) | Expr::Path(_) => false,
            Expr::Not(inner) => inner.uses_status_function(),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.uses_status_function() || rhs.uses_status_function()
            }
            Expr::Call { name, args } => {
                STATUS_FUNCTIONS.contains(&name.to_ascii_lowercase().as_str())
                    || args.iter().any(Expr::uses_status_function)
            }
        }
    }

    pub fn evaluate(&self, ctx: &ExpressionContext) -> Result<ExprValue, ExpressionError> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Path(path) => Ok(ctx
                .lookup(path)
                .map(ExprValue::String)
                .unwrap_or(ExprValue::Null)),
            Expr::Not(inner) => Ok(ExprValue::Bool(!inner.evaluate(ctx)?.is_truthy())),
            Expr::Binary { op, lhs, rhs } => {
                let left = lhs.evaluate(ctx)?;
                match op {
                    // Short-circuit: return the deciding operand itself
                    BinaryOp::And => {
                        if !left.is_truthy() {
                            return Ok(left);
                        }
                        rhs.evaluate(ctx)
                    }
                    BinaryOp::Or => {
                        if left.is_truthy() {
                            return Ok(left);
                        }
                        rhs.evaluate(ctx)
                    }
                    _ => {
                        let right = rhs.evaluate(ctx)?;
                        let result = match op {
                            BinaryOp::Eq => left.loose_eq(&right),
                            BinaryOp::NotEq => !left.loose_eq(&right),
                            BinaryOp::Lt => left.compare(&right) == Some(std::cmp::Ordering::Less),
                            BinaryOp::Le => matches!(
                                left.compare(&right),
                                Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
                            ),
                            BinaryOp::Gt => {
                                left.compare(&right) == Some(std::cmp::Ordering::Greater)
                            }
                            BinaryOp::Ge => matches!(
                                left.compare(&right),
                                Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)
                            ),
                            BinaryOp::And | BinaryOp::Or => unreachable!(),
                        };
                        Ok(ExprValue::Bool(result))
                    }
                }
            }
            Expr::Call { name, args } => call_function(name, args, ctx),
        }
    }
}

fn expect_args(name: &str, args: &[Expr], expected: usize) -> Result<(), ExpressionError> {
    if args.len() != expected {
        return Err(ExpressionError::Arity {
            name: name.to_string(),
            expected: expected.to_string(),
            got: args.len(),
        });
    }
    Ok(())
}

fn call_function(
    name: &str,
    args: &[Expr],
    ctx: &ExpressionContext,
) -> Result<ExprValue, ExpressionError> {
    let lowered = name.to_ascii_lowercase();
    match lowered.as_str() {
        "success" => {
            expect_args(name, args, 0)?;
            Ok(ExprValue::Bool(ctx.job_status == JobStatus::Success))
        }
        "failure" => {
            expect_args(name, args, 0)?;
            Ok(ExprValue::Bool(ctx.job_status == JobStatus::Failure))
        }
        "cancelled" => {
            expect_args(name, args, 0)?;
            Ok(ExprValue::Bool(ctx.job_status == JobStatus::Cancelled))
        }
        "always" => {
            expect_args(name, args, 0)?;
            Ok(ExprValue::Bool(true))
        }
        "contains" | "startswith" | "endswith" => {
            expect_args(name, args, 2)?;
            let haystack = args[0].evaluate(ctx)?.render().to_lowercase();
            let needle = args[1].evaluate(ctx)?.render().to_lowercase();
            let result = match lowered.as_str() {
                "contains" => haystack.contains(&needle),
                "startswith" => haystack.starts_with(&needle),
                _ => haystack.ends_with(&needle),
            };
            Ok(ExprValue::Bool(result))
        }
        "format" => {
            if args.is_empty() {
                return Err(ExpressionError::Arity {
                    name: name.to_string(),
                    expected: "at least 1".to_string(),
                    got: 0,
                });
            }
            let template = args[0].evaluate(ctx)?.render();
            let values = args[1..]
                .iter()
                .map(|a| a.evaluate(ctx).map(|v| v.render()))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ExprValue::String(apply_format(&template, &values)))
        }
        _ => Err(ExpressionError::UnknownFunction(name.to_string())),
    }
}

/// `format('{0} on {1}', a, b)`; `{{` and `}}` are literal braces
fn apply_format(template: &str, values: &[String]) -> String {
    let mut out = String::with_capacity(template.len());
    let chars: Vec<char> = template.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '{' if chars.get(i + 1) == Some(&'{') => {
                out.push('{');
                i += 2;
            }
            '}' if chars.get(i + 1) == Some(&'}') => {
                out.push('}');
                i += 2;
            }
            '{' => {
                let rest: String = chars[i + 1..].iter().collect();
                match rest.find('}') {
                    Some(end) => {
                        let index = &rest[..end];
                        match index.parse::<usize>().ok().and_then(|n| values.get(n)) {
                            Some(value) => out.push_str(value),
                            None => {
                                out.push('{');
                                out.push_str(index);
                                out.push('}');
                            }
                        }
                        i += index.chars().count() + 2;
                    }
                    None => {
                        out.push('{');
                        i += 1;
                    }
                }
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

/// Substitute every `${{ expr }}` in `template`
pub fn render_template(template: &str, ctx: &ExpressionContext) -> Result<String, ExpressionError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("${{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 3..];
        let end = find_close(after).ok_or(ExpressionError::UnterminatedTemplate)?;
        let expr = Expr::parse(after[..end].trim())?;
        out.push_str(&expr.evaluate(ctx)?.render());
        rest = &after[end + 2..];
    }
    out.push_str(rest);

    Ok(out)
}

/// Position of the `}}` closing a template, ignoring braces inside `'...'`
fn find_close(source: &str) -> Option<usize> {
    let bytes = source.as_bytes();
    let mut quoted = false;
    for (i, byte) in bytes.iter().enumerate() {
        match byte {
            // An escaped '' toggles twice
            b'\'' => quoted = !quoted,
            b'}' if !quoted && bytes.get(i + 1) == Some(&b'}') => return Some(i),
            _ => {}
        }
    }
    None
}

/// Strip an optional `${{ }}` wrapper around a whole expression
pub fn strip_wrapper(source: &str) -> &str {
    let trimmed = source.trim();
    trimmed
        .strip_prefix("${{")
        .and_then(|s| s.strip_suffix("}}"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Number(f64),
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Bang,
    Op(BinaryOp),
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Ident(s) => s.clone(),
            Token::Str(s) => format!("'{}'", s),
            Token::Number(n) => n.to_string(),
            Token::Dot => ".".to_string(),
            Token::Comma => ",".to_string(),
            Token::LParen => "(".to_string(),
            Token::RParen => ")".to_string(),
            Token::LBracket => "[".to_string(),
            Token::RBracket => "]".to_string(),
            Token::Bang => "!".to_string(),
            Token::Op(op) => format!("{:?}", op),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, ExpressionError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op(BinaryOp::NotEq));
                i += 2;
            }
            '!' => {
                tokens.push(Token::Bang);
                i += 1;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op(BinaryOp::Eq));
                i += 2;
            }
            '<' | '>' => {
                let with_eq = chars.get(i + 1) == Some(&'=');
                let op = match (c, with_eq) {
                    ('<', true) => BinaryOp::Le,
                    ('<', false) => BinaryOp::Lt,
                    ('>', true) => BinaryOp::Ge,
                    _ => BinaryOp::Gt,
                };
                tokens.push(Token::Op(op));
                i += if with_eq { 2 } else { 1 };
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                tokens.push(Token::Op(BinaryOp::And));
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                tokens.push(Token::Op(BinaryOp::Or));
                i += 2;
            }
            '\'' => {
                // '' inside a string is an escaped quote
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(ExpressionError::UnterminatedString),
                        Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                            value.push('\'');
                            i += 2;
                        }
                        Some('\'') => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            value.push(*ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(value));
            }
            c if c.is_ascii_digit()
                || (c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) =>
            {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let number = text
                    .parse::<f64>()
                    .map_err(|_| ExpressionError::UnexpectedToken(text.clone()))?;
                tokens.push(Token::Number(number));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '-')
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(ExpressionError::UnexpectedChar(other, i)),
        }
    }

    Ok(tokens)
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
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn expect(&mut self, expected: Token) -> Result<(), ExpressionError> {
        match self.next() {
            Some(tok) if tok == expected => Ok(()),
            Some(tok) => Err(ExpressionError::UnexpectedToken(tok.describe())),
            None => Err(ExpressionError::UnexpectedEnd),
        }
    }

    fn binary_level(
        &mut self,
        ops: &[BinaryOp],
        next: fn(&mut Self) -> Result<Expr, ExpressionError>,
    ) -> Result<Expr, ExpressionError> {
        let mut lhs = next(self)?;
        while let Some(Token::Op(op)) = self.peek() {
            let op = *op;
            if !ops.contains(&op) {
                break;
            }
            self.pos += 1;
            let rhs = next(self)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_or(&mut self) -> Result<Expr, ExpressionError> {
        self.binary_level(&[BinaryOp::Or], Self::parse_and)
    }

    fn parse_and(&mut self) -> Result<Expr, ExpressionError> {
        self.binary_level(&[BinaryOp::And], Self::parse_equality)
    }

    fn parse_equality(&mut self) -> Result<Expr, ExpressionError> {
        self.binary_level(&[BinaryOp::Eq, BinaryOp::NotEq], Self::parse_comparison)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ExpressionError> {
        self.binary_level(
            &[BinaryOp::Lt, BinaryOp::Le, BinaryOp::Gt, BinaryOp::Ge],
            Self::parse_unary,
        )
    }

    fn parse_unary(&mut self) -> Result<Expr, ExpressionError> {
        if self.peek() == Some(&Token::Bang) {
            self.pos += 1;
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ExpressionError> {
        match self.next() {
            None => Err(ExpressionError::UnexpectedEnd),
            Some(Token::Str(s)) => Ok(Expr::Literal(ExprValue::String(s))),
            Some(Token::Number(n)) => Ok(Expr::Literal(ExprValue::Number(n))),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                match name.as_str() {
                    "true" => return Ok(Expr::Literal(ExprValue::Bool(true))),
                    "false" => return Ok(Expr::Literal(ExprValue::Bool(false))),
                    "null" => return Ok(Expr::Literal(ExprValue::Null)),
                    _ => {}
                }
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    let args = self.parse_args()?;
                    return Ok(Expr::Call { name, args });
                }
                self.parse_path(name)
            }
            Some(tok) => Err(ExpressionError::UnexpectedToken(tok.describe())),
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, ExpressionError> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.parse_or()?);
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(args),
                Some(tok) => return Err(ExpressionError::UnexpectedToken(tok.describe())),
                None => return Err(ExpressionError::UnexpectedEnd),
            }
        }
    }

    fn parse_path(&mut self, root: String) -> Result<Expr, ExpressionError> {
        let mut path = vec![root];
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    match self.next() {
                        Some(Token::Ident(seg)) => path.push(seg),
                        Some(Token::Number(n)) => path.push(n.to_string()),
                        Some(tok) => return Err(ExpressionError::UnexpectedToken(tok.describe())),
                        None => return Err(ExpressionError::UnexpectedEnd),
                    }
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    match self.next() {
                        Some(Token::Str(seg)) => path.push(seg),
                        Some(tok) => return Err(ExpressionError::UnexpectedToken(tok.describe())),
                        None => return Err(ExpressionError::UnexpectedEnd),
                    }
                    self.expect(Token::RBracket)?;
                }
                _ => return Ok(Expr::Path(path)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::SecretStore;
    use crate::core::matrix::MatrixCell;
    use std::sync::Arc;

    fn ctx() -> ExpressionContext {
        let mut secrets = SecretStore::new();
        secrets.insert("SLACK_WEBHOOK_URL", "https://hooks.example/abc");
        let mut ctx = ExpressionContext::new(Arc::new(secrets));
        ctx.matrix = MatrixCell {
            values: vec![
                ("os".to_string(), "ubuntu-latest".to_string()),
                ("python-version".to_string(), "pypy-3.8".to_string()),
            ],
        };
        ctx.github.insert("event_name".to_string(), "push".to_string());
        ctx.github.insert("ref".to_string(), "refs/heads/main".to_string());
        ctx
    }

    fn eval(source: &str, ctx: &ExpressionContext) -> ExprValue {
        Expr::parse(source).unwrap().evaluate(ctx).unwrap()
    }

    #[test]
    fn test_render_matrix_template() {
        let rendered =
            render_template("Set up Python ${{ matrix.python-version }}", &ctx()).unwrap();
        assert_eq!(rendered, "Set up Python pypy-3.8");
    }

    #[test]
    fn test_render_index_syntax_and_missing() {
        let c = ctx();
        assert_eq!(render_template("${{ matrix['os'] }}", &c).unwrap(), "ubuntu-latest");
        assert_eq!(render_template("[${{ env.NOPE }}]", &c).unwrap(), "[]");
        assert_eq!(
            render_template("${{ secrets.SLACK_WEBHOOK_URL }}", &c).unwrap(),
            "https://hooks.example/abc"
        );
    }

    #[test]
    fn test_status_functions() {
        let mut c = ctx();
        assert_eq!(eval("success()", &c), ExprValue::Bool(true));
        assert_eq!(eval("failure()", &c), ExprValue::Bool(false));
        c.job_status = JobStatus::Failure;
        assert_eq!(eval("failure()", &c), ExprValue::Bool(true));
        assert_eq!(eval("always()", &c), ExprValue::Bool(true));
        assert_eq!(eval("!cancelled()", &c), ExprValue::Bool(true));
    }

    #[test]
    fn test_comparisons_ignore_case() {
        let c = ctx();
        assert!(eval("github.event_name == 'PUSH'", &c).is_truthy());
        let source = "matrix.os != 'windows-latest' && github.ref == 'refs/heads/main'";
        assert!(eval(source, &c).is_truthy());
        assert!(!eval("startsWith(matrix.python-version, '3.')", &c).is_truthy());
        assert!(eval("startsWith(matrix.python-version, 'pypy')", &c).is_truthy());
        assert!(eval("contains('abc', 'B')", &c).is_truthy());
        assert!(eval("endsWith(github.ref, '/main')", &c).is_truthy());
    }

    #[test]
    fn test_numbers_and_coercion() {
        let c = ctx();
        assert!(eval("1 == '1'", &c).is_truthy());
        // Numbers compare numerically: 3.10 is 3.1
        assert!(!eval("3.9 < 3.10", &c).is_truthy());
        assert!(eval("2 > 1.5", &c).is_truthy());
        assert!(!eval("'abc' == 0", &c).is_truthy());
        assert!(eval("null == 0", &c).is_truthy());
    }

    #[test]
    fn test_or_returns_operand() {
        let c = ctx();
        assert_eq!(
            eval("env.MISSING || 'fallback'", &c),
            ExprValue::String("fallback".to_string())
        );
    }

    #[test]
    fn test_format() {
        let c = ctx();
        assert_eq!(
            eval("format('{0} on {1} {{x}}', matrix.python-version, matrix.os)", &c),
            ExprValue::String("pypy-3.8 on ubuntu-latest {x}".to_string())
        );
    }

    #[test]
    fn test_string_escape() {
        let c = ctx();
        assert_eq!(eval("'it''s'", &c), ExprValue::String("it's".to_string()));
    }

    #[test]
    fn test_uses_status_function() {
        assert!(Expr::parse("failure()").unwrap().uses_status_function());
        assert!(Expr::parse("always() && matrix.os == 'x'").unwrap().uses_status_function());
        assert!(!Expr::parse("matrix.os == 'x'").unwrap().uses_status_function());
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Expr::parse("'open"), Err(ExpressionError::UnterminatedString));
        assert_eq!(Expr::parse("a =="), Err(ExpressionError::UnexpectedEnd));
        assert!(matches!(Expr::parse("a # b"), Err(ExpressionError::UnexpectedChar('#', 2))));
        assert!(matches!(
            Expr::parse("nope()").unwrap().evaluate(&ctx()),
            Err(ExpressionError::UnknownFunction(_))
        ));
        assert!(matches!(
            Expr::parse("failure(1)").unwrap().evaluate(&ctx()),
            Err(ExpressionError::Arity { .. })
        ));
        assert_eq!(
            render_template("${{ matrix.os", &ctx()),
            Err(ExpressionError::UnterminatedTemplate)
        );
    }

    #[test]
    fn test_render_braces_inside_string_literal() {
        let c = ctx();
        assert_eq!(
            render_template("v${{ format('{0}}}', matrix.python-version) }}!", &c).unwrap(),
            "vpypy-3.8}!"
        );
        assert_eq!(render_template("${{ 'it''s }}' }}", &c).unwrap(), "it's }}");
    }

    #[test]
    fn test_strip_wrapper() {
        assert_eq!(strip_wrapper("${{ failure() }}"), "failure()");
        assert_eq!(strip_wrapper("  failure()  "), "failure()");
    }
}
