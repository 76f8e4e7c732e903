//! Block-level reader for the Terraform native syntax.
//!
//! Reads enough of HCL to find blocks, their labels, literal attribute
//! values and the exact byte span of every block. Expressions are never
//! evaluated; anything that is not a plain quoted string is kept as source
//! text.

use std::ops::Range;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl ParseError {
    fn new<S: Into<String>>(line: usize, message: S) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// A quoted string without interpolation, escapes resolved
    String(String),
    /// Any other expression, verbatim
    Expression(String),
}

impl Value {
    pub fn as_literal(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            Value::Expression(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: Value,
    pub line: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Body {
    pub attributes: Vec<Attribute>,
    pub blocks: Vec<Block>,
}

impl Body {
    pub fn blocks_of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Block> + 'a {
        self.blocks.iter().filter(move |b| b.kind == kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub kind: String,
    pub labels: Vec<String>,
    pub body: Body,
    /// Byte range from the block keyword through the closing brace.
    pub span: Range<usize>,
    /// 1-based line of the block keyword.
    pub line: usize,
}

impl Block {
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.body
            .attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| &a.value)
    }

    /// Value of `name` if it is a plain string literal.
    pub fn literal(&self, name: &str) -> Option<&str> {
        self.attribute(name).and_then(Value::as_literal)
    }

    /// Source text of the block within the file it was parsed from.
    pub fn raw<'s>(&self, src: &'s str) -> &'s str {
        src.get(self.span.clone()).unwrap_or_default()
    }
}

/// Parses a whole file.
pub fn parse(src: &str) -> Result<Body, ParseError> {
    let tokens = Lexer::new(src).tokenize()?;
    Parser {
        src,
        tokens,
        pos: 0,
    }
    .parse_body(false)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenKind {
    Ident(String),
    /// Quoted template; `None` when it contains interpolation
    Str(Option<String>),
    Heredoc,
    Number,
    Newline,
    Punct(char),
    Eof,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    span: Range<usize>,
    line: usize,
}

struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
            line: 1,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn tokenize(mut self) -> Result<Vec<Token>, ParseError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, ParseError> {
        loop {
            while matches!(self.peek(), Some(b' ' | b'\t' | b'\r')) {
                self.pos += 1;
            }

            let start = self.pos;
            let line = self.line;
            let Some(c) = self.peek() else {
                return Ok(self.token(TokenKind::Eof, start, line));
            };

            match c {
                b'#' => self.skip_line_comment(),
                b'/' if self.peek_at(1) == Some(b'/') => self.skip_line_comment(),
                b'/' if self.peek_at(1) == Some(b'*') => self.skip_block_comment()?,
                b'\n' => {
                    self.pos += 1;
                    self.line += 1;
                    return Ok(self.token(TokenKind::Newline, start, line));
                }
                b'"' => {
                    let literal = self.string()?;
                    return Ok(self.token(TokenKind::Str(literal), start, line));
                }
                b'<' if self.peek_at(1) == Some(b'<') && self.heredoc_follows() => {
                    self.heredoc()?;
                    return Ok(self.token(TokenKind::Heredoc, start, line));
                }
                c if c.is_ascii_alphabetic() || c == b'_' => {
                    while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == b'_' || c == b'-')
                    {
                        self.pos += 1;
                    }
                    let ident = self.src[start..self.pos].to_string();
                    return Ok(self.token(TokenKind::Ident(ident), start, line));
                }
                c if c.is_ascii_digit() => {
                    while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == b'.') {
                        self.pos += 1;
                    }
                    return Ok(self.token(TokenKind::Number, start, line));
                }
                c if c.is_ascii_punctuation() => {
                    self.pos += 1;
                    return Ok(self.token(TokenKind::Punct(c as char), start, line));
                }
                _ => {
                    let ch = self.src[start..].chars().next().unwrap_or('?');
                    return Err(ParseError::new(line, format!("unexpected character {:?}", ch)));
                }
            }
        }
    }

    fn token(&self, kind: TokenKind, start: usize, line: usize) -> Token {
        Token {
            kind,
            span: start..self.pos,
            line,
        }
    }

    fn skip_line_comment(&mut self) {
        while !matches!(self.peek(), None | Some(b'\n')) {
            self.pos += 1;
        }
    }

    fn skip_block_comment(&mut self) -> Result<(), ParseError> {
        let line = self.line;
        self.pos += 2;
        loop {
            match self.peek() {
                None => return Err(ParseError::new(line, "unterminated block comment")),
                Some(b'*') if self.peek_at(1) == Some(b'/') => {
                    self.pos += 2;
                    return Ok(());
                }
                Some(b'\n') => {
                    self.line += 1;
                    self.pos += 1;
                }
                Some(_) => self.pos += 1,
            }
        }
    }

    /// Scans a quoted template starting at the opening quote. Returns the
    /// literal value, or `None` if the template interpolates.
    fn string(&mut self) -> Result<Option<String>, ParseError> {
        let line = self.line;
        self.pos += 1;
        let mut value: Vec<u8> = Vec::new();
        let mut interpolated = false;

        loop {
            let Some(c) = self.peek() else {
                return Err(ParseError::new(line, "unterminated string"));
            };
            match c {
                b'\n' => return Err(ParseError::new(line, "unterminated string")),
                b'"' => {
                    self.pos += 1;
                    break;
                }
                b'\\' => {
                    self.pos += 1;
                    self.escape(&mut value, line)?;
                }
                // `$${` and `%%{` are literal
                b'$' | b'%' if self.peek_at(1) == Some(c) && self.peek_at(2) == Some(b'{') => {
                    value.extend_from_slice(&[c, b'{']);
                    self.pos += 3;
                }
                b'$' | b'%' if self.peek_at(1) == Some(b'{') => {
                    interpolated = true;
                    self.pos += 2;
                    self.skip_interpolation(line)?;
                }
                _ => {
                    value.push(c);
                    self.pos += 1;
                }
            }
        }

        if interpolated {
            Ok(None)
        } else {
            Ok(Some(String::from_utf8_lossy(&value).into_owned()))
        }
    }

    fn escape(&mut self, value: &mut Vec<u8>, line: usize) -> Result<(), ParseError> {
        let Some(c) = self.peek() else {
            return Err(ParseError::new(line, "unterminated escape in string"));
        };
        self.pos += 1;
        match c {
            b'n' => value.push(b'\n'),
            b't' => value.push(b'\t'),
            b'r' => value.push(b'\r'),
            b'"' => value.push(b'"'),
            b'\\' => value.push(b'\\'),
            b'u' | b'U' => {
                let width = if c == b'u' { 4 } else { 8 };
                let hex = self.src.get(self.pos..self.pos + width).unwrap_or_default();
                let decoded = if hex.len() == width && hex.bytes().all(|b| b.is_ascii_hexdigit()) {
                    u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
                } else {
                    None
                };
                match decoded {
                    Some(ch) => {
                        let mut buf = [0u8; 4];
                        value.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
                        self.pos += width;
                    }
                    None => return Err(ParseError::new(line, "invalid unicode escape")),
                }
            }
            other => value.extend_from_slice(&[b'\\', other]),
        }
        Ok(())
    }

    // Runs from just after `${` to just after the matching `}`.
    fn skip_interpolation(&mut self, line: usize) -> Result<(), ParseError> {
        let mut depth = 1usize;
        loop {
            match self.peek() {
                None => return Err(ParseError::new(line, "unterminated interpolation")),
                Some(b'{') => {
                    depth += 1;
                    self.pos += 1;
                }
                Some(b'}') => {
                    depth -= 1;
                    self.pos += 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                Some(b'"') => {
                    self.string()?;
                }
                Some(b'\n') => {
                    self.line += 1;
                    self.pos += 1;
                }
                Some(_) => self.pos += 1,
            }
        }
    }

    fn heredoc_follows(&self) -> bool {
        let mut offset = 2;
        if self.peek_at(offset) == Some(b'-') {
            offset += 1;
        }
        matches!(self.peek_at(offset), Some(c) if c.is_ascii_alphabetic() || c == b'_')
    }

    fn heredoc(&mut self) -> Result<(), ParseError> {
        let line = self.line;
        self.pos += 2;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        let marker_start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == b'_') {
            self.pos += 1;
        }
        let marker = &self.src[marker_start..self.pos];

        while matches!(self.peek(), Some(b' ' | b'\t' | b'\r')) {
            self.pos += 1;
        }
        if self.peek() != Some(b'\n') {
            return Err(ParseError::new(line, "heredoc marker must end the line"));
        }
        self.pos += 1;
        self.line += 1;

        loop {
            let line_start = self.pos;
            let line_end = self.src[line_start..]
                .find('\n')
                .map(|i| line_start + i)
                .unwrap_or(self.src.len());

            if self.src[line_start..line_end].trim() == marker {
                self.pos = line_end;
                return Ok(());
            }
            if line_end >= self.src.len() {
                return Err(ParseError::new(line, format!("unterminated heredoc {}", marker)));
            }
            self.pos = line_end + 1;
            self.line += 1;
        }
    }
}

struct Parser<'a> {
    src: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn parse_body(&mut self, nested: bool) -> Result<Body, ParseError> {
        let mut body = Body::default();
        loop {
            let token = &self.tokens[self.pos];
            match &token.kind {
                TokenKind::Newline => self.pos += 1,
                TokenKind::Eof if nested => {
                    return Err(ParseError::new(token.line, "unexpected end of file inside block"))
                }
                TokenKind::Eof => return Ok(body),
                TokenKind::Punct('}') if nested => return Ok(body),
                TokenKind::Ident(_) => {
                    let token = self.advance();
                    self.parse_item(token, &mut body)?;
                }
                other => {
                    return Err(ParseError::new(
                        token.line,
                        format!("expected attribute or block, found {}", describe(other)),
                    ))
                }
            }
        }
    }

    fn parse_item(&mut self, head: Token, body: &mut Body) -> Result<(), ParseError> {
        let TokenKind::Ident(name) = head.kind else {
            return Err(ParseError::new(head.line, "expected identifier"));
        };
        let mut labels = Vec::new();

        loop {
            let token = self.advance();
            match token.kind {
                TokenKind::Punct('=') if labels.is_empty() => {
                    let value = self.parse_expression(head.line)?;
                    body.attributes.push(Attribute {
                        name,
                        value,
                        line: head.line,
                    });
                    return Ok(());
                }
                TokenKind::Str(Some(label)) | TokenKind::Ident(label) => labels.push(label),
                TokenKind::Str(None) => {
                    return Err(ParseError::new(token.line, "block labels cannot interpolate"))
                }
                TokenKind::Punct('{') => {
                    let inner = self.parse_body(true)?;
                    let close = self.advance();
                    body.blocks.push(Block {
                        kind: name,
                        labels,
                        body: inner,
                        span: head.span.start..close.span.end,
                        line: head.line,
                    });
                    return Ok(());
                }
                other => {
                    return Err(ParseError::new(
                        token.line,
                        format!("expected '=' or '{{' after {}, found {}", name, describe(&other)),
                    ))
                }
            }
        }
    }

    // Consumes tokens up to the end of the attribute: a newline or the
    // enclosing block's closing brace, outside any brackets.
    fn parse_expression(&mut self, line: usize) -> Result<Value, ParseError> {
        let first = self.pos;
        let mut depth = 0usize;

        loop {
            let token = &self.tokens[self.pos];
            match token.kind {
                TokenKind::Eof if depth > 0 => {
                    return Err(ParseError::new(line, "unclosed bracket in expression"))
                }
                TokenKind::Eof => break,
                TokenKind::Newline | TokenKind::Punct('}') if depth == 0 => break,
                TokenKind::Punct('{' | '[' | '(') => depth += 1,
                TokenKind::Punct('}' | ']' | ')') => {
                    if depth == 0 {
                        return Err(ParseError::new(token.line, "unbalanced bracket in expression"));
                    }
                    depth -= 1;
                }
                _ => {}
            }
            self.pos += 1;
        }

        let tokens: Vec<&Token> = self.tokens[first..self.pos]
            .iter()
            .filter(|t| t.kind != TokenKind::Newline)
            .collect();

        match tokens.as_slice() {
            [] => Err(ParseError::new(line, "missing attribute value")),
            [Token {
                kind: TokenKind::Str(Some(literal)),
                ..
            }] => Ok(Value::String(literal.clone())),
            [head, .., tail] => Ok(Value::Expression(
                self.src[head.span.start..tail.span.end].to_string(),
            )),
            [only] => Ok(Value::Expression(self.src[only.span.clone()].to_string())),
        }
    }
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Ident(name) => format!("identifier {}", name),
        TokenKind::Str(_) => "string".to_string(),
        TokenKind::Heredoc => "heredoc".to_string(),
        TokenKind::Number => "number".to_string(),
        TokenKind::Newline => "newline".to_string(),
        TokenKind::Punct(c) => format!("'{}'", c),
        TokenKind::Eof => "end of file".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUCKET: &str = r#"# logging bucket
resource "aws_s3_bucket" "logs" {
  bucket = "acme-logs"
  acl    = var.acl

  tags = {
    Name = "logs"
    Env  = "${var.env}"
  }

  versioning {
    enabled = true
  }
}
"#;

    #[test]
    fn test_resource_block() {
        let body = parse(BUCKET).unwrap();
        assert_eq!(body.blocks.len(), 1);

        let block = &body.blocks[0];
        assert_eq!(block.kind, "resource");
        assert_eq!(block.labels, vec!["aws_s3_bucket", "logs"]);
        assert_eq!(block.line, 2);
        assert_eq!(block.literal("bucket"), Some("acme-logs"));
        assert_eq!(
            block.attribute("acl"),
            Some(&Value::Expression("var.acl".to_string()))
        );
        assert!(block.literal("tags").is_none());
        assert_eq!(block.body.blocks[0].kind, "versioning");
        assert_eq!(block.body.blocks[0].literal("enabled"), None);

        let raw = block.raw(BUCKET);
        assert!(raw.starts_with("resource \"aws_s3_bucket\" \"logs\" {"));
        assert!(raw.ends_with('}'));
        assert!(raw.contains("versioning"));
    }

    #[test]
    fn test_interpolation_is_expression() {
        let src = "locals {\n  name = \"${var.env}-logs\"\n  literal = \"$${not_interp}\"\n}\n";
        let body = parse(src).unwrap();
        let block = &body.blocks[0];
        assert_eq!(
            block.attribute("name"),
            Some(&Value::Expression("\"${var.env}-logs\"".to_string()))
        );
        assert_eq!(block.literal("literal"), Some("${not_interp}"));
    }

    #[test]
    fn test_nested_quotes_in_interpolation() {
        let src = r#"output "x" { value = "${lookup(var.m, "key", "}")}" }"#;
        let body = parse(src).unwrap();
        assert_eq!(body.blocks[0].labels, vec!["x"]);
        assert!(body.blocks[0].attribute("value").is_some());
    }

    #[test]
    fn test_comments_and_heredoc() {
        let src = r#"
// line comment
/* block
   comment */
resource "aws_iam_policy" "p" {
  name   = "reader" # trailing
  policy = <<-EOF
    {
      "Version": "2012-10-17"
    }
  EOF
}

resource "aws_sqs_queue" "q" { name = "jobs" }
"#;
        let body = parse(src).unwrap();
        assert_eq!(body.blocks.len(), 2);
        assert_eq!(body.blocks[0].line, 5);
        assert_eq!(body.blocks[0].literal("name"), Some("reader"));
        assert!(matches!(
            body.blocks[0].attribute("policy"),
            Some(Value::Expression(text)) if text.starts_with("<<-EOF")
        ));
        assert_eq!(body.blocks[1].line, 14);
        assert_eq!(body.blocks[1].literal("name"), Some("jobs"));
    }

    #[test]
    fn test_escapes() {
        let body = parse("x { a = \"say \\\"hi\\\"\\n\" \n b = \"\\u00e9\" }").unwrap();
        assert_eq!(body.blocks[0].literal("a"), Some("say \"hi\"\n"));
        assert_eq!(body.blocks[0].literal("b"), Some("é"));
    }

    #[test]
    fn test_long_unicode_escape() {
        let body = parse("x { name = \"bucket-\\U0001F600\" }").unwrap();
        assert_eq!(body.blocks[0].literal("name"), Some("bucket-\u{1F600}"));

        let err = parse("x { name = \"\\U00zz\" }").unwrap_err();
        assert!(err.message.contains("unicode escape"));
    }

    #[test]
    fn test_multiline_list_expression() {
        let src = "resource \"aws_security_group\" \"sg\" {\n  cidrs = [\n    \"10.0.0.0/8\",\n  ]\n  name = \"web\"\n}\n";
        let body = parse(src).unwrap();
        let block = &body.blocks[0];
        assert_eq!(block.body.attributes.len(), 2);
        assert_eq!(block.literal("name"), Some("web"));
    }

    #[test]
    fn test_unclosed_block_errors() {
        let err = parse("resource \"a\" \"b\" {\n  name = \"x\"\n").unwrap_err();
        assert!(err.message.contains("end of file"));
    }

    #[test]
    fn test_unterminated_string_reports_line() {
        let err = parse("\n\nresource \"a\" \"b\" {\n  name = \"x\n}\n").unwrap_err();
        assert_eq!(err.line, 4);
        assert!(err.message.contains("unterminated string"));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(parse("this is { not valid").is_err());
        assert!(parse("= 3").is_err());
    }
}
