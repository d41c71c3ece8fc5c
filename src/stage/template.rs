//! Template rendering for stage manifests.
//!
//! Supports a small Jinja-flavoured syntax:
//!
//! - `{{ expr }}` writes the value of an expression
//! - `{% if expr %}`, `{% elif expr %}`, `{% else %}`, `{% endif %}`
//! - `{% for name in expr %}` ... `{% endfor %}` over a list
//! - `{% set name = expr %}`
//! - `{# comment #}`
//!
//! Expressions are string literals, `true`/`false`, variables, helper calls
//! `name(arg, ...)`, `~` concatenation, `==`/`!=`, `not`, `and`, `or` and
//! parentheses. Unknown variables and functions are errors unless the context
//! is built with [`RenderContext::allow_missing`].
//!
//! A block tag or comment that sits alone on a line removes the whole line,
//! so YAML indentation around `{% if %}`/`{% for %}` survives rendering.

use std::collections::BTreeMap;
use std::fmt;
use std::iter::Peekable;
use std::sync::Arc;
use std::vec::IntoIter;

use crate::error::RenderError;

/// A value flowing through template expressions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Plain text
    Str(String),
    /// Boolean
    Bool(bool),
    /// Ordered list of strings, e.g. the result of `glob()`
    List(Vec<String>),
}

impl Value {
    fn is_truthy(&self) -> bool {
        match self {
            Self::Str(s) => !s.is_empty(),
            Self::Bool(b) => *b,
            Self::List(items) => !items.is_empty(),
        }
    }

    const fn kind(&self) -> &'static str {
        match self {
            Self::Str(_) => "string",
            Self::Bool(_) => "boolean",
            Self::List(_) => "list",
        }
    }

    /// Borrow the text of a string value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// Output form: strings verbatim, booleans lowercase, lists as YAML flow
/// sequences with single-quoted items.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Bool(b) => write!(f, "{b}"),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "'{}'", item.replace('\'', "''"))?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Vec<String>> for Value {
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}

/// A host function callable from a template.
pub type HelperFn = Arc<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;

/// Everything a template can see: data fields plus named helper functions.
///
/// Built once with the `with_*` methods and then only read.
#[derive(Clone, Default)]
pub struct RenderContext {
    vars: BTreeMap<String, Value>,
    helpers: BTreeMap<String, HelperFn>,
    allow_missing: bool,
}

impl RenderContext {
    /// An empty, strict context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a variable.
    #[must_use]
    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    /// Register a helper function under `name`.
    #[must_use]
    pub fn with_helper<F>(mut self, name: impl Into<String>, helper: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.helpers.insert(name.into(), Arc::new(helper));
        self
    }

    /// Render undefined variables as empty strings instead of failing.
    #[must_use]
    pub const fn allow_missing(mut self, allow: bool) -> Self {
        self.allow_missing = allow;
        self
    }

    /// Look up a variable.
    #[must_use]
    pub fn var(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// Whether a helper is registered under `name`.
    #[must_use]
    pub fn has_helper(&self, name: &str) -> bool {
        self.helpers.contains_key(name)
    }
}

impl fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderContext")
            .field("vars", &self.vars)
            .field("helpers", &self.helpers.keys().collect::<Vec<_>>())
            .field("allow_missing", &self.allow_missing)
            .finish()
    }
}

/// A parsed template, ready to render against any number of contexts.
#[derive(Debug, Clone)]
pub struct Template {
    nodes: Vec<Node>,
}

impl Template {
    /// Parse template source.
    pub fn parse(source: &str) -> Result<Self, RenderError> {
        let mut segments = lex(source)?.into_iter().peekable();
        let (nodes, terminator) = parse_nodes(&mut segments, &[])?;
        debug_assert!(terminator.is_none());
        Ok(Self { nodes })
    }

    /// Render against `ctx`. Fails on the first undefined name or bad value.
    pub fn render(&self, ctx: &RenderContext) -> Result<String, RenderError> {
        let mut scope = Scope {
            ctx,
            frames: vec![BTreeMap::new()],
        };
        let mut out = String::new();
        scope.render_nodes(&self.nodes, &mut out)?;
        Ok(out)
    }
}

/// Parse and render in one step.
pub fn render_str(source: &str, ctx: &RenderContext) -> Result<String, RenderError> {
    Template::parse(source)?.render(ctx)
}

// --- lexing ---

#[derive(Debug)]
enum Segment {
    Text(String),
    Output { expr: String, line: usize },
    Tag { body: String, line: usize },
}

fn next_delimiter(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    (0..bytes.len().saturating_sub(1))
        .find(|&i| bytes[i] == b'{' && matches!(bytes[i + 1], b'{' | b'%' | b'#'))
}

fn count_newlines(s: &str) -> usize {
    s.bytes().filter(|&b| b == b'\n').count()
}

fn is_blank(s: &str) -> bool {
    s.chars().all(|c| c == ' ' || c == '\t')
}

fn lex(source: &str) -> Result<Vec<Segment>, RenderError> {
    let mut segments = Vec::new();
    let mut rest = source;
    let mut line = 1;
    // whether `rest` starts at the beginning of a line
    let mut at_line_start = true;

    while !rest.is_empty() {
        let Some(open) = next_delimiter(rest) else {
            segments.push(Segment::Text(rest.to_string()));
            break;
        };

        let delimiter = &rest[open..open + 2];
        let closer = match delimiter {
            "{{" => "}}",
            "{%" => "%}",
            _ => "#}",
        };
        let body_start = open + 2;
        let tag_line = line + count_newlines(&rest[..open]);
        let Some(close) = rest[body_start..].find(closer) else {
            return Err(RenderError::Syntax {
                line: tag_line,
                message: format!("unclosed '{delimiter}'"),
            });
        };
        let mut body = &rest[body_start..body_start + close];
        let mut consumed = body_start + close + 2;
        let mut text = &rest[..open];

        // `{%-` and `-%}` strip the whitespace on that side of the tag
        let trim_before = body.starts_with('-');
        if trim_before {
            body = &body[1..];
        }
        let trim_after = body.ends_with('-');
        if trim_after {
            body = &body[..body.len() - 1];
        }

        if trim_before {
            text = text.trim_end();
        }
        if trim_after {
            let after = &rest[consumed..];
            consumed += after.len() - after.trim_start().len();
        }

        let is_block = delimiter != "{{";
        if is_block && !trim_before {
            let lead = text.rfind('\n').map_or_else(
                || if at_line_start && is_blank(text) { Some(0) } else { None },
                |i| is_blank(&text[i + 1..]).then_some(i + 1),
            );
            if let Some(cut) = lead {
                text = &text[..cut];
            }
        }
        if is_block && !trim_after {
            let after = &rest[consumed..];
            if after.starts_with("\r\n") {
                consumed += 2;
            } else if after.starts_with('\n') {
                consumed += 1;
            }
        }

        if !text.is_empty() {
            segments.push(Segment::Text(text.to_string()));
        }
        match delimiter {
            "{{" => segments.push(Segment::Output {
                expr: body.to_string(),
                line: tag_line,
            }),
            "{%" => segments.push(Segment::Tag {
                body: body.to_string(),
                line: tag_line,
            }),
            _ => {}
        }

        let taken = &rest[..consumed];
        line += count_newlines(taken);
        at_line_start = taken.ends_with('\n');
        rest = &rest[consumed..];
    }

    Ok(segments)
}

// --- expressions ---

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Str(String),
    LParen,
    RParen,
    Comma,
    Tilde,
    EqEq,
    NotEq,
    Assign,
}

fn tokenize(src: &str, line: usize) -> Result<Vec<Token>, RenderError> {
    let syntax = |message: String| RenderError::Syntax { line, message };
    let mut tokens = Vec::new();
    let mut chars = src.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            c if c.is_ascii_digit() => {
                // numbers only ever end up in paths, keep them as text
                let mut digits = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() {
                        digits.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Str(digits));
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some('\\') => match chars.next() {
                            Some('n') => text.push('\n'),
                            Some('t') => text.push('\t'),
                            Some(other) => text.push(other),
                            None => return Err(syntax("unterminated string literal".into())),
                        },
                        Some(c) if c == quote => break,
                        Some(c) => text.push(c),
                        None => return Err(syntax("unterminated string literal".into())),
                    }
                }
                tokens.push(Token::Str(text));
            }
            '(' | ')' | ',' | '~' => {
                chars.next();
                tokens.push(match c {
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    ',' => Token::Comma,
                    _ => Token::Tilde,
                });
            }
            '=' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::EqEq);
                } else {
                    tokens.push(Token::Assign);
                }
            }
            '!' => {
                chars.next();
                if chars.next() != Some('=') {
                    return Err(syntax("expected '=' after '!'".into()));
                }
                tokens.push(Token::NotEq);
            }
            other => return Err(syntax(format!("unexpected character '{other}'"))),
        }
    }

    Ok(tokens)
}

#[derive(Debug, Clone)]
enum Expr {
    Literal(Value),
    Var(String),
    Call { name: String, args: Vec<Expr> },
    Concat(Vec<Expr>),
    Compare {
        left: Box<Expr>,
        right: Box<Expr>,
        equal: bool,
    },
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

struct ExprParser {
    tokens: Vec<Token>,
    pos: usize,
    line: usize,
}

impl ExprParser {
    const fn new(tokens: Vec<Token>, line: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            line,
        }
    }

    fn syntax(&self, message: impl Into<String>) -> RenderError {
        RenderError::Syntax {
            line: self.line,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(ident)) if ident == keyword)
    }

    fn expect(&mut self, token: &Token) -> Result<(), RenderError> {
        match self.next() {
            Some(ref t) if t == token => Ok(()),
            Some(t) => Err(self.syntax(format!("expected {token:?}, found {t:?}"))),
            None => Err(self.syntax(format!("expected {token:?}, found end of expression"))),
        }
    }

    /// Parse a full expression and require that nothing is left over.
    fn parse_complete(mut self) -> Result<Expr, RenderError> {
        if self.tokens.is_empty() {
            return Err(self.syntax("empty expression"));
        }
        let expr = self.parse_or()?;
        if let Some(extra) = self.peek() {
            return Err(self.syntax(format!("unexpected {extra:?} after expression")));
        }
        Ok(expr)
    }

    fn parse_or(&mut self) -> Result<Expr, RenderError> {
        let mut left = self.parse_and()?;
        while self.peek_keyword("or") {
            self.next();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, RenderError> {
        let mut left = self.parse_not()?;
        while self.peek_keyword("and") {
            self.next();
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, RenderError> {
        if self.peek_keyword("not") {
            self.next();
            return Ok(Expr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> Result<Expr, RenderError> {
        let left = self.parse_concat()?;
        let equal = match self.peek() {
            Some(Token::EqEq) => true,
            Some(Token::NotEq) => false,
            _ => return Ok(left),
        };
        self.next();
        let right = self.parse_concat()?;
        Ok(Expr::Compare {
            left: Box::new(left),
            right: Box::new(right),
            equal,
        })
    }

    fn parse_concat(&mut self) -> Result<Expr, RenderError> {
        let first = self.parse_primary()?;
        if self.peek() != Some(&Token::Tilde) {
            return Ok(first);
        }
        let mut parts = vec![first];
        while self.peek() == Some(&Token::Tilde) {
            self.next();
            parts.push(self.parse_primary()?);
        }
        Ok(Expr::Concat(parts))
    }

    fn parse_primary(&mut self) -> Result<Expr, RenderError> {
        match self.next() {
            Some(Token::Str(text)) => Ok(Expr::Literal(Value::Str(text))),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(ident)) => {
                match ident.as_str() {
                    "true" | "True" => return Ok(Expr::Literal(Value::Bool(true))),
                    "false" | "False" => return Ok(Expr::Literal(Value::Bool(false))),
                    "and" | "or" | "not" => {
                        return Err(self.syntax(format!("unexpected keyword '{ident}'")))
                    }
                    _ => {}
                }
                if self.peek() == Some(&Token::LParen) {
                    self.next();
                    let args = self.parse_args()?;
                    Ok(Expr::Call { name: ident, args })
                } else {
                    Ok(Expr::Var(ident))
                }
            }
            Some(other) => Err(self.syntax(format!("unexpected {other:?}"))),
            None => Err(self.syntax("unexpected end of expression")),
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, RenderError> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.next();
            return Ok(args);
        }
        loop {
            args.push(self.parse_or()?);
            match self.next() {
                Some(Token::Comma) => {}
                Some(Token::RParen) => return Ok(args),
                _ => return Err(self.syntax("expected ',' or ')' in argument list")),
            }
        }
    }
}

fn parse_expr(src: &str, line: usize) -> Result<Expr, RenderError> {
    ExprParser::new(tokenize(src, line)?, line).parse_complete()
}

// --- block structure ---

#[derive(Debug, Clone)]
enum Node {
    Text(String),
    Output {
        expr: Expr,
        line: usize,
    },
    If {
        branches: Vec<(Expr, Vec<Node>)>,
        otherwise: Vec<Node>,
        line: usize,
    },
    For {
        var: String,
        iterable: Expr,
        body: Vec<Node>,
        line: usize,
    },
    Set {
        name: String,
        value: Expr,
        line: usize,
    },
}

/// A block-closing tag: keyword, remaining tag text, line.
type Terminator = (String, String, usize);

fn split_tag(body: &str) -> (&str, &str) {
    let body = body.trim();
    body.split_once(char::is_whitespace)
        .map_or((body, ""), |(keyword, rest)| (keyword, rest.trim()))
}

fn parse_nodes(
    segments: &mut Peekable<IntoIter<Segment>>,
    terminators: &[&str],
) -> Result<(Vec<Node>, Option<Terminator>), RenderError> {
    let mut nodes = Vec::new();

    while let Some(segment) = segments.next() {
        match segment {
            Segment::Text(text) => nodes.push(Node::Text(text)),
            Segment::Output { expr, line } => nodes.push(Node::Output {
                expr: parse_expr(&expr, line)?,
                line,
            }),
            Segment::Tag { body, line } => {
                let (keyword, rest) = split_tag(&body);
                if terminators.contains(&keyword) {
                    return Ok((nodes, Some((keyword.to_string(), rest.to_string(), line))));
                }
                nodes.push(match keyword {
                    "if" => parse_if(segments, rest, line)?,
                    "for" => parse_for(segments, rest, line)?,
                    "set" => parse_set(rest, line)?,
                    "elif" | "else" | "endif" | "endfor" => {
                        return Err(RenderError::Syntax {
                            line,
                            message: format!("unexpected '{keyword}'"),
                        })
                    }
                    "" => {
                        return Err(RenderError::Syntax {
                            line,
                            message: "empty tag".to_string(),
                        })
                    }
                    other => {
                        return Err(RenderError::Syntax {
                            line,
                            message: format!("unknown tag '{other}'"),
                        })
                    }
                });
            }
        }
    }

    Ok((nodes, None))
}

fn require_bare(keyword: &str, rest: &str, line: usize) -> Result<(), RenderError> {
    if rest.is_empty() {
        Ok(())
    } else {
        Err(RenderError::Syntax {
            line,
            message: format!("unexpected '{rest}' after '{keyword}'"),
        })
    }
}

fn parse_if(
    segments: &mut Peekable<IntoIter<Segment>>,
    condition: &str,
    line: usize,
) -> Result<Node, RenderError> {
    let mut branches = Vec::new();
    let mut condition = parse_expr(condition, line)?;

    loop {
        let (body, terminator) = parse_nodes(segments, &["elif", "else", "endif"])?;
        branches.push((condition, body));
        match terminator {
            Some((keyword, rest, at)) if keyword == "elif" => {
                condition = parse_expr(&rest, at)?;
            }
            Some((keyword, rest, at)) if keyword == "else" => {
                require_bare("else", &rest, at)?;
                let (otherwise, end) = parse_nodes(segments, &["endif"])?;
                let Some((_, rest, at)) = end else {
                    return Err(unclosed("if", line));
                };
                require_bare("endif", &rest, at)?;
                return Ok(Node::If {
                    branches,
                    otherwise,
                    line,
                });
            }
            Some((_, rest, at)) => {
                require_bare("endif", &rest, at)?;
                return Ok(Node::If {
                    branches,
                    otherwise: Vec::new(),
                    line,
                });
            }
            None => return Err(unclosed("if", line)),
        }
    }
}

fn parse_for(
    segments: &mut Peekable<IntoIter<Segment>>,
    header: &str,
    line: usize,
) -> Result<Node, RenderError> {
    let mut tokens = tokenize(header, line)?.into_iter();
    let var = match (tokens.next(), tokens.next()) {
        (Some(Token::Ident(var)), Some(Token::Ident(kw))) if kw == "in" => var,
        _ => {
            return Err(RenderError::Syntax {
                line,
                message: "expected 'for <name> in <expression>'".to_string(),
            })
        }
    };
    let iterable = ExprParser::new(tokens.collect(), line).parse_complete()?;

    let (body, terminator) = parse_nodes(segments, &["endfor"])?;
    let Some((_, rest, at)) = terminator else {
        return Err(unclosed("for", line));
    };
    require_bare("endfor", &rest, at)?;

    Ok(Node::For {
        var,
        iterable,
        body,
        line,
    })
}

fn parse_set(assignment: &str, line: usize) -> Result<Node, RenderError> {
    let mut tokens = tokenize(assignment, line)?.into_iter();
    let name = match (tokens.next(), tokens.next()) {
        (Some(Token::Ident(name)), Some(Token::Assign)) => name,
        _ => {
            return Err(RenderError::Syntax {
                line,
                message: "expected 'set <name> = <expression>'".to_string(),
            })
        }
    };
    let value = ExprParser::new(tokens.collect(), line).parse_complete()?;
    Ok(Node::Set { name, value, line })
}

fn unclosed(keyword: &str, line: usize) -> RenderError {
    RenderError::Syntax {
        line,
        message: format!("'{keyword}' block is never closed"),
    }
}

// --- evaluation ---

struct Scope<'c> {
    ctx: &'c RenderContext,
    frames: Vec<BTreeMap<String, Value>>,
}

impl Scope<'_> {
    fn lookup(&self, name: &str, line: usize) -> Result<Value, RenderError> {
        if let Some(value) = self.frames.iter().rev().find_map(|frame| frame.get(name)) {
            return Ok(value.clone());
        }
        if let Some(value) = self.ctx.vars.get(name) {
            return Ok(value.clone());
        }
        if self.ctx.allow_missing {
            return Ok(Value::Str(String::new()));
        }
        Err(RenderError::UndefinedVariable {
            name: name.to_string(),
            line,
        })
    }

    fn eval(&self, expr: &Expr, line: usize) -> Result<Value, RenderError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Var(name) => self.lookup(name, line),
            Expr::Call { name, args } => {
                let helper = self
                    .ctx
                    .helpers
                    .get(name)
                    .ok_or_else(|| RenderError::UnknownFunction {
                        name: name.clone(),
                        line,
                    })?;
                let values = args
                    .iter()
                    .map(|arg| self.eval(arg, line))
                    .collect::<Result<Vec<_>, _>>()?;
                helper(&values).map_err(|message| RenderError::Helper {
                    name: name.clone(),
                    line,
                    message,
                })
            }
            Expr::Concat(parts) => {
                let mut joined = String::new();
                for part in parts {
                    match self.eval(part, line)? {
                        Value::List(_) => {
                            return Err(RenderError::Type {
                                line,
                                message: "cannot concatenate a list with '~'".to_string(),
                            })
                        }
                        value => joined.push_str(&value.to_string()),
                    }
                }
                Ok(Value::Str(joined))
            }
            Expr::Compare { left, right, equal } => {
                let same = self.eval(left, line)? == self.eval(right, line)?;
                Ok(Value::Bool(same == *equal))
            }
            Expr::Not(inner) => Ok(Value::Bool(!self.eval(inner, line)?.is_truthy())),
            Expr::And(left, right) => Ok(Value::Bool(
                self.eval(left, line)?.is_truthy() && self.eval(right, line)?.is_truthy(),
            )),
            Expr::Or(left, right) => Ok(Value::Bool(
                self.eval(left, line)?.is_truthy() || self.eval(right, line)?.is_truthy(),
            )),
        }
    }

    fn render_nodes(&mut self, nodes: &[Node], out: &mut String) -> Result<(), RenderError> {
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Output { expr, line } => {
                    out.push_str(&self.eval(expr, *line)?.to_string());
                }
                Node::If {
                    branches,
                    otherwise,
                    line,
                } => {
                    let mut taken = None;
                    for (condition, body) in branches {
                        if self.eval(condition, *line)?.is_truthy() {
                            taken = Some(body);
                            break;
                        }
                    }
                    self.render_nodes(taken.unwrap_or(otherwise), out)?;
                }
                Node::For {
                    var,
                    iterable,
                    body,
                    line,
                } => {
                    let items = match self.eval(iterable, *line)? {
                        Value::List(items) => items,
                        other => {
                            return Err(RenderError::Type {
                                line: *line,
                                message: format!("cannot iterate over a {}", other.kind()),
                            })
                        }
                    };
                    for item in items {
                        self.frames
                            .push(BTreeMap::from([(var.clone(), Value::Str(item))]));
                        let rendered = self.render_nodes(body, out);
                        self.frames.pop();
                        rendered?;
                    }
                }
                Node::Set { name, value, line } => {
                    let value = self.eval(value, *line)?;
                    if let Some(frame) = self.frames.last_mut() {
                        frame.insert(name.clone(), value);
                    }
                }
            }
        }
        Ok(())
    }
}
