//! Parser for `$name`, `$name.path` and `${expr}` templates.
//!
//! A template is a sequence of literal text and expressions. Inside `${...}`
//! the grammar is
//!
//! ```text
//! expr  := term ('+' term)*
//! term  := number | string | true | false | null
//!        | '$' path | '${' expr '}' | '$.' jsonpath
//!        | ident '(' args ')' | path
//! args  := (expr | ident '=' expr) (',' ...)*
//! ```
//!
//! Quoted strings are templates themselves, so `"id=${user_id}"` works as an
//! argument.

use crate::app::error::{Error, Result};
use serde_json::{Number, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(String),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Text(Template),
    Variable(VarPath),
    JsonPath(String),
    Call { name: String, args: Vec<Argument> },
    Add(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarPath {
    pub root: String,
    pub segments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    pub name: Option<String>,
    pub value: Expr,
}

impl Template {
    pub fn parse(input: &str) -> Result<Self> {
        let mut parser = Parser::new(input);
        let template = parser.template(None)?;
        if parser.peek().is_some() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(template)
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    /// The expression when the template is nothing but one expression.
    pub fn single(&self) -> Option<&Expr> {
        match self.parts.as_slice() {
            [Part::Expr(expr)] => Some(expr),
            _ => None,
        }
    }

    pub fn is_plain(&self) -> bool {
        self.parts.iter().all(|part| matches!(part, Part::Text(_)))
    }
}

impl VarPath {
    pub fn is_bare(&self, name: &str) -> bool {
        self.segments.is_empty() && self.root == name
    }

    pub fn display(&self) -> String {
        let mut out = self.root.clone();
        for segment in &self.segments {
            out.push('.');
            out.push_str(segment);
        }
        out
    }
}

struct Parser<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn error(&self, reason: &str) -> Error {
        Error::syntax(self.source, format!("{} at position {}", reason, self.pos))
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, expected: char) -> Result<()> {
        self.skip_whitespace();
        if self.peek() == Some(expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", expected)))
        }
    }

    /// Literal text with embedded expressions, up to `quote` (if any).
    fn template(&mut self, quote: Option<char>) -> Result<Template> {
        let mut parts = Vec::new();
        let mut text = String::new();
        loop {
            let c = match self.peek() {
                Some(c) => c,
                None if quote.is_some() => return Err(self.error("unterminated string")),
                None => break,
            };
            if Some(c) == quote {
                break;
            }
            if c == '\\' && quote.is_some() {
                match self.peek_at(1) {
                    Some(escaped) => {
                        text.push(escaped);
                        self.pos += 2;
                        continue;
                    }
                    None => return Err(self.error("dangling escape")),
                }
            }
            if c != '$' {
                text.push(c);
                self.pos += 1;
                continue;
            }
            match self.peek_at(1) {
                Some('$') => {
                    text.push('$');
                    self.pos += 2;
                }
                Some('{') => {
                    self.pos += 2;
                    let expr = self.expr()?;
                    self.expect('}')?;
                    flush(&mut parts, &mut text);
                    parts.push(Part::Expr(expr));
                }
                Some('.') => {
                    self.pos += 1;
                    let path = self.json_path(quote);
                    flush(&mut parts, &mut text);
                    parts.push(Part::Expr(Expr::JsonPath(path)));
                }
                Some(next) if is_ident_start(next) => {
                    self.pos += 1;
                    let path = self.var_path();
                    flush(&mut parts, &mut text);
                    parts.push(Part::Expr(Expr::Variable(path)));
                }
                _ => {
                    text.push('$');
                    self.pos += 1;
                }
            }
        }
        flush(&mut parts, &mut text);
        Ok(Template { parts })
    }

    fn expr(&mut self) -> Result<Expr> {
        let mut left = self.term()?;
        loop {
            self.skip_whitespace();
            if self.peek() == Some('+') {
                self.pos += 1;
                let right = self.term()?;
                left = Expr::Add(Box::new(left), Box::new(right));
            } else {
                return Ok(left);
            }
        }
    }

    fn term(&mut self) -> Result<Expr> {
        self.skip_whitespace();
        let c = self.peek().ok_or_else(|| self.error("unexpected end of expression"))?;
        match c {
            '$' => match self.peek_at(1) {
                Some('{') => {
                    self.pos += 2;
                    let inner = self.expr()?;
                    self.expect('}')?;
                    Ok(inner)
                }
                Some('.') => {
                    self.pos += 1;
                    Ok(Expr::JsonPath(self.json_path(None)))
                }
                Some(next) if is_ident_start(next) => {
                    self.pos += 1;
                    Ok(Expr::Variable(self.var_path()))
                }
                _ => Err(self.error("expected variable name after '$'")),
            },
            '"' | '\'' => {
                self.pos += 1;
                let template = self.template(Some(c))?;
                self.pos += 1;
                Ok(match template.parts.as_slice() {
                    [] => Expr::Literal(Value::String(String::new())),
                    [Part::Text(text)] => Expr::Literal(Value::String(text.clone())),
                    _ => Expr::Text(template),
                })
            }
            c if c.is_ascii_digit() => self.number(),
            '-' if matches!(self.peek_at(1), Some(d) if d.is_ascii_digit()) => self.number(),
            c if is_ident_start(c) => {
                let start = self.pos;
                let path = self.var_path();
                self.skip_whitespace();
                if self.peek() == Some('(') {
                    if !path.segments.is_empty() {
                        self.pos = start;
                        return Err(self.error("function names cannot contain '.'"));
                    }
                    self.pos += 1;
                    let args = self.arguments()?;
                    return Ok(Expr::Call {
                        name: path.root,
                        args,
                    });
                }
                if path.segments.is_empty() {
                    match path.root.as_str() {
                        "true" | "True" => return Ok(Expr::Literal(Value::Bool(true))),
                        "false" | "False" => return Ok(Expr::Literal(Value::Bool(false))),
                        "null" | "None" => return Ok(Expr::Literal(Value::Null)),
                        _ => {}
                    }
                }
                Ok(Expr::Variable(path))
            }
            _ => Err(self.error(&format!("unexpected character '{}'", c))),
        }
    }

    fn arguments(&mut self) -> Result<Vec<Argument>> {
        let mut args: Vec<Argument> = Vec::new();
        self.skip_whitespace();
        if self.peek() == Some(')') {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            self.skip_whitespace();
            let name = self.keyword();
            if name.is_none() && args.iter().any(|arg| arg.name.is_some()) {
                return Err(self.error("positional argument follows keyword argument"));
            }
            let value = self.expr()?;
            args.push(Argument { name, value });
            self.skip_whitespace();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some(')') => {
                    self.pos += 1;
                    return Ok(args);
                }
                _ => return Err(self.error("expected ',' or ')'")),
            }
        }
    }

    /// Consumes `name =` when the upcoming argument is a keyword argument.
    fn keyword(&mut self) -> Option<String> {
        let start = self.pos;
        if !matches!(self.peek(), Some(c) if is_ident_start(c)) {
            return None;
        }
        while matches!(self.peek(), Some(c) if is_ident_char(c)) {
            self.pos += 1;
        }
        let name: String = self.chars[start..self.pos].iter().collect();
        self.skip_whitespace();
        if self.peek() == Some('=') && self.peek_at(1) != Some('=') {
            self.pos += 1;
            Some(name)
        } else {
            self.pos = start;
            None
        }
    }

    fn var_path(&mut self) -> VarPath {
        let root = self.ident();
        let mut segments = Vec::new();
        while self.peek() == Some('.')
            && matches!(self.peek_at(1), Some(c) if is_ident_char(c))
        {
            self.pos += 1;
            segments.push(self.ident());
        }
        VarPath { root, segments }
    }

    fn ident(&mut self) -> String {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if is_ident_char(c)) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    /// `$` followed by a JSONPath, the cursor sits on the leading '$'.
    fn json_path(&mut self, quote: Option<char>) -> String {
        let start = self.pos - 1;
        let mut depth = 0usize;
        while let Some(c) = self.peek() {
            if Some(c) == quote || c.is_whitespace() {
                break;
            }
            match c {
                '[' => depth += 1,
                ']' => depth = depth.saturating_sub(1),
                ',' | ')' | '}' if depth == 0 => break,
                _ => {}
            }
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn number(&mut self) -> Result<Expr> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.pos += 1;
        }
        let mut float = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.pos += 1;
            } else if c == '.' && !float && matches!(self.peek_at(1), Some(d) if d.is_ascii_digit()) {
                float = true;
                self.pos += 1;
            } else {
                break;
            }
        }
        let raw: String = self.chars[start..self.pos].iter().collect();
        let as_float = || {
            raw.parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
        };
        let value = if float {
            as_float()
        } else {
            raw.parse::<i64>()
                .map(Value::from)
                .or_else(|_| raw.parse::<u64>().map(Value::from))
                .ok()
                .or_else(as_float)
        };
        value
            .map(Expr::Literal)
            .ok_or_else(|| self.error(&format!("invalid number '{}'", raw)))
    }
}

fn flush(parts: &mut Vec<Part>, text: &mut String) {
    if !text.is_empty() {
        parts.push(Part::Text(std::mem::take(text)));
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn var(root: &str, segments: &[&str]) -> Expr {
        Expr::Variable(VarPath {
            root: root.to_owned(),
            segments: segments.iter().map(|s| s.to_string()).collect(),
        })
    }

    #[test]
    fn test_plain_text() {
        let template = Template::parse("just text").unwrap();
        assert!(template.is_plain());
        assert_eq!(template.parts(), &[Part::Text("just text".to_owned())]);
    }

    #[test]
    fn test_dollar_variable_with_path() {
        let template = Template::parse("$variables.user_id").unwrap();
        assert_eq!(template.single(), Some(&var("variables", &["user_id"])));
    }

    #[test]
    fn test_mixed_text_and_expressions() {
        let template = Template::parse("user_${short_uid(8)}@example.com").unwrap();
        assert_eq!(
            template.parts(),
            &[
                Part::Text("user_".to_owned()),
                Part::Expr(Expr::Call {
                    name: "short_uid".to_owned(),
                    args: vec![Argument {
                        name: None,
                        value: Expr::Literal(json!(8))
                    }],
                }),
                Part::Text("@example.com".to_owned()),
            ]
        );
    }

    #[test]
    fn test_variable_stops_before_trailing_dot() {
        let template = Template::parse("$host.").unwrap();
        assert_eq!(
            template.parts(),
            &[Part::Expr(var("host", &[])), Part::Text(".".to_owned())]
        );
    }

    #[test]
    fn test_escaped_dollar() {
        let template = Template::parse("cost: $$5").unwrap();
        assert!(template.is_plain());
        assert_eq!(template.parts(), &[Part::Text("cost: $5".to_owned())]);
    }

    #[test]
    fn test_nested_calls_and_keywords() {
        let template = Template::parse(
            r#"${expected_sql_value($order_id, query="SELECT total FROM orders WHERE id=${order_id}", column='total')}"#,
        )
        .unwrap();
        let expr = template.single().unwrap();
        match expr {
            Expr::Call { name, args } => {
                assert_eq!(name, "expected_sql_value");
                assert_eq!(args.len(), 3);
                assert_eq!(args[0].value, var("order_id", &[]));
                assert_eq!(args[1].name.as_deref(), Some("query"));
                assert!(matches!(args[1].value, Expr::Text(_)));
                assert_eq!(args[2].value, Expr::Literal(json!("total")));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_concatenation() {
        let template = Template::parse("${md5($timestamp + $secret)}").unwrap();
        match template.single().unwrap() {
            Expr::Call { args, .. } => assert_eq!(
                args[0].value,
                Expr::Add(Box::new(var("timestamp", &[])), Box::new(var("secret", &[])))
            ),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_literals() {
        let template = Template::parse("${f(1, -2.5, 'a', True, None, x)}").unwrap();
        match template.single().unwrap() {
            Expr::Call { args, .. } => {
                let values: Vec<&Expr> = args.iter().map(|a| &a.value).collect();
                assert_eq!(values[0], &Expr::Literal(json!(1)));
                assert_eq!(values[1], &Expr::Literal(json!(-2.5)));
                assert_eq!(values[2], &Expr::Literal(json!("a")));
                assert_eq!(values[3], &Expr::Literal(json!(true)));
                assert_eq!(values[4], &Expr::Literal(Value::Null));
                assert_eq!(values[5], &var("x", &[]));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_integers_beyond_i64() {
        let template =
            Template::parse("${f(18446744073709551615, 9223372036854775808, 100000000000000000000000)}")
                .unwrap();
        match template.single().unwrap() {
            Expr::Call { args, .. } => {
                assert_eq!(args[0].value, Expr::Literal(json!(u64::MAX)));
                assert_eq!(args[1].value, Expr::Literal(json!(9223372036854775808u64)));
                assert_eq!(args[2].value, Expr::Literal(json!(1e23)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_json_path() {
        let template = Template::parse("$.data.items[0].id").unwrap();
        assert_eq!(
            template.single(),
            Some(&Expr::JsonPath("$.data.items[0].id".to_owned()))
        );
    }

    #[test]
    fn test_syntax_errors() {
        assert!(Template::parse("${f(1,}").is_err());
        assert!(Template::parse("${unclosed").is_err());
        assert!(Template::parse("${f(a=1, 2)}").is_err());
        assert!(Template::parse("${'open}").is_err());
        assert!(Template::parse("${a.b()}").is_err());
    }
}
