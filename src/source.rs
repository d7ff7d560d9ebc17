//! Minimal `.proto` text compiler.
//!
//! Turns schema source into the same encoded `FileDescriptorProto` bytes a
//! real compiler front-end would emit before linking: type references are
//! kept as written and never resolved. Used by the text entry points, which
//! exist for tests; production inputs are always binary.
//!
//! Supported: `syntax`, `edition`, `package`, `import`, `option`, `message`
//! (fields, `map<K, V>`, `oneof`, nested messages and enums, `reserved`,
//! `extensions`), `enum`. `service` and `extend` blocks are skipped.

use crate::error::IndexError;
use crate::scanner::MAX_NESTING_DEPTH;
use crate::wire::{
    WIRE_VARINT, encode_varint, write_bytes_field, write_message_field, write_str_field, write_tag,
    write_varint_field,
};

// ─── Descriptor Field Numbers ───────────────────────────────────────────────

const FILE_NAME: u32 = 1;
const FILE_PACKAGE: u32 = 2;
const FILE_DEPENDENCY: u32 = 3;
const FILE_MESSAGE_TYPE: u32 = 4;
const FILE_ENUM_TYPE: u32 = 5;
const FILE_SYNTAX: u32 = 12;

const MESSAGE_NAME: u32 = 1;
const MESSAGE_FIELD: u32 = 2;
const MESSAGE_NESTED_TYPE: u32 = 3;
const MESSAGE_ENUM_TYPE: u32 = 4;
const MESSAGE_OPTIONS: u32 = 7;
const MESSAGE_ONEOF_DECL: u32 = 8;
const MESSAGE_OPTIONS_MAP_ENTRY: u32 = 7;

const FIELD_NAME: u32 = 1;
const FIELD_NUMBER: u32 = 3;
const FIELD_LABEL: u32 = 4;
const FIELD_TYPE: u32 = 5;
const FIELD_TYPE_NAME: u32 = 6;
const FIELD_ONEOF_INDEX: u32 = 9;

const ENUM_NAME: u32 = 1;
const ENUM_VALUE: u32 = 2;
const ENUM_VALUE_NAME: u32 = 1;
const ENUM_VALUE_NUMBER: u32 = 2;

const LABEL_OPTIONAL: u64 = 1;
const LABEL_REQUIRED: u64 = 2;
const LABEL_REPEATED: u64 = 3;

fn scalar_type(name: &str) -> Option<u64> {
    Some(match name {
        "double" => 1,
        "float" => 2,
        "int64" => 3,
        "uint64" => 4,
        "int32" => 5,
        "fixed64" => 6,
        "fixed32" => 7,
        "bool" => 8,
        "string" => 9,
        "bytes" => 12,
        "uint32" => 13,
        "sfixed32" => 15,
        "sfixed64" => 16,
        "sint32" => 17,
        "sint64" => 18,
        _ => return None,
    })
}

/// Compile `.proto` source text into an encoded schema definition.
pub fn compile(file_name: &str, source: &str) -> Result<Vec<u8>, IndexError> {
    let tokens = tokenize(file_name, source)?;
    let mut parser = Parser {
        file_name,
        tokens,
        pos: 0,
    };
    parser.parse_file()
}

// ─── Lexer ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Number(String),
    Str(String),
    Sym(char),
}

fn tokenize(file_name: &str, source: &str) -> Result<Vec<(Token, usize)>, IndexError> {
    let chars: Vec<char> = source.chars().collect();
    let len = chars.len();
    let mut out = Vec::new();
    let mut line = 1usize;
    let mut i = 0usize;

    let is_ident_char = |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '.';

    while i < len {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            '\n' => {
                line += 1;
                i += 1;
            }
            c if c.is_whitespace() => i += 1,
            '/' if next == Some('/') => {
                while i < len && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if next == Some('*') => {
                let start_line = line;
                i += 2;
                loop {
                    if i + 1 >= len {
                        return Err(IndexError::parse(format!(
                            "{file_name}:{start_line}: unterminated comment"
                        )));
                    }
                    if chars[i] == '*' && chars[i + 1] == '/' {
                        i += 2;
                        break;
                    }
                    if chars[i] == '\n' {
                        line += 1;
                    }
                    i += 1;
                }
            }
            '"' | '\'' => {
                let quote = c;
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None | Some('\n') => {
                            return Err(IndexError::parse(format!(
                                "{file_name}:{line}: unterminated string"
                            )));
                        }
                        Some(&q) if q == quote => {
                            i += 1;
                            break;
                        }
                        Some('\\') => {
                            let escaped = chars.get(i + 1).copied().unwrap_or('\\');
                            value.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                'r' => '\r',
                                '0' => '\0',
                                other => other,
                            });
                            i += 2;
                        }
                        Some(&ch) => {
                            value.push(ch);
                            i += 1;
                        }
                    }
                }
                out.push((Token::Str(value), line));
            }
            c if c.is_ascii_digit()
                || ((c == '-' || c == '.') && next.is_some_and(|n| n.is_ascii_digit())) =>
            {
                let start = i;
                i += 1;
                while i < len && (chars[i].is_ascii_alphanumeric() || chars[i] == '.') {
                    i += 1;
                }
                out.push((Token::Number(chars[start..i].iter().collect()), line));
            }
            c if c.is_ascii_alphabetic()
                || c == '_'
                || (c == '.' && next.is_some_and(|n| n.is_ascii_alphabetic() || n == '_')) =>
            {
                let start = i;
                i += 1;
                while i < len && is_ident_char(chars[i]) {
                    i += 1;
                }
                out.push((Token::Ident(chars[start..i].iter().collect()), line));
            }
            c => {
                out.push((Token::Sym(c), line));
                i += 1;
            }
        }
    }
    Ok(out)
}

// ─── Parser ─────────────────────────────────────────────────────────────────

struct Parser<'a> {
    file_name: &'a str,
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, msg: impl std::fmt::Display) -> IndexError {
        let line = self
            .tokens
            .get(self.pos.min(self.tokens.len().saturating_sub(1)))
            .map(|(_, line)| *line)
            .unwrap_or(1);
        IndexError::parse(format!("{}:{}: {}", self.file_name, line, msg))
    }

    #[inline]
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn next(&mut self) -> Result<Token, IndexError> {
        let token = self
            .tokens
            .get(self.pos)
            .map(|(t, _)| t.clone())
            .ok_or_else(|| self.error("unexpected end of input"))?;
        self.pos += 1;
        Ok(token)
    }

    fn peek_is_ident(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(s)) if s == word)
    }

    fn peek_is_sym(&self, c: char) -> bool {
        matches!(self.peek(), Some(Token::Sym(s)) if *s == c)
    }

    fn eat_sym(&mut self, c: char) -> bool {
        if self.peek_is_sym(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_sym(&mut self, c: char) -> Result<(), IndexError> {
        match self.next()? {
            Token::Sym(s) if s == c => Ok(()),
            other => {
                self.pos -= 1;
                Err(self.error(format!("expected '{c}', found {other:?}")))
            }
        }
    }

    fn expect_ident(&mut self) -> Result<String, IndexError> {
        match self.next()? {
            Token::Ident(s) => Ok(s),
            other => {
                self.pos -= 1;
                Err(self.error(format!("expected identifier, found {other:?}")))
            }
        }
    }

    fn expect_str(&mut self) -> Result<String, IndexError> {
        match self.next()? {
            Token::Str(s) => Ok(s),
            other => {
                self.pos -= 1;
                Err(self.error(format!("expected string, found {other:?}")))
            }
        }
    }

    fn expect_int(&mut self) -> Result<i64, IndexError> {
        let raw = match self.next()? {
            Token::Number(s) => s,
            other => {
                self.pos -= 1;
                return Err(self.error(format!("expected integer, found {other:?}")));
            }
        };
        let (negative, digits) = match raw.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, raw.as_str()),
        };
        let parsed = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
            Some(hex) => i64::from_str_radix(hex, 16),
            None => digits.parse::<i64>(),
        };
        match parsed {
            Ok(v) if negative => Ok(-v),
            Ok(v) => Ok(v),
            Err(_) => Err(self.error(format!("invalid integer {raw:?}"))),
        }
    }

    /// Skip to the end of the current statement, honoring nested brackets.
    fn skip_statement(&mut self) -> Result<(), IndexError> {
        let mut depth = 0usize;
        loop {
            match self.next()? {
                Token::Sym('{' | '[' | '(' | '<') => depth += 1,
                Token::Sym('}' | ']' | ')' | '>') => depth = depth.saturating_sub(1),
                Token::Sym(';') if depth == 0 => return Ok(()),
                _ => {}
            }
        }
    }

    /// Skip a header and its `{ ... }` body.
    fn skip_block(&mut self) -> Result<(), IndexError> {
        while !self.eat_sym('{') {
            self.next()?;
        }
        let mut depth = 1usize;
        while depth > 0 {
            match self.next()? {
                Token::Sym('{') => depth += 1,
                Token::Sym('}') => depth -= 1,
                _ => {}
            }
        }
        Ok(())
    }

    /// Skip an optional `[ ... ]` option list.
    fn skip_field_options(&mut self) -> Result<(), IndexError> {
        if !self.eat_sym('[') {
            return Ok(());
        }
        let mut depth = 1usize;
        while depth > 0 {
            match self.next()? {
                Token::Sym('[') => depth += 1,
                Token::Sym(']') => depth -= 1,
                _ => {}
            }
        }
        Ok(())
    }

    // ════════════════════════════════════════════════════════════════════════
    // Grammar
    // ════════════════════════════════════════════════════════════════════════

    fn parse_file(&mut self) -> Result<Vec<u8>, IndexError> {
        let mut package: Option<String> = None;
        let mut syntax: Option<String> = None;
        let mut dependencies = Vec::new();
        let mut messages = Vec::new();
        let mut enums = Vec::new();

        while let Some(token) = self.peek().cloned() {
            match token {
                Token::Sym(';') => self.pos += 1,
                Token::Ident(word) => {
                    self.pos += 1;
                    match word.as_str() {
                        "syntax" => {
                            self.expect_sym('=')?;
                            syntax = Some(self.expect_str()?);
                            self.expect_sym(';')?;
                        }
                        "edition" => self.skip_statement()?,
                        "package" => {
                            if package.is_some() {
                                return Err(self.error("multiple package declarations"));
                            }
                            package = Some(self.expect_ident()?);
                            self.expect_sym(';')?;
                        }
                        "import" => {
                            if self.peek_is_ident("public") || self.peek_is_ident("weak") {
                                self.pos += 1;
                            }
                            dependencies.push(self.expect_str()?);
                            self.expect_sym(';')?;
                        }
                        "option" => self.skip_statement()?,
                        "message" => messages.push(self.parse_message(1)?),
                        "enum" => enums.push(self.parse_enum()?),
                        "service" | "extend" => self.skip_block()?,
                        other => {
                            self.pos -= 1;
                            return Err(self.error(format!("unexpected {other:?} at top level")));
                        }
                    }
                }
                other => return Err(self.error(format!("unexpected {other:?} at top level"))),
            }
        }

        let mut out = Vec::new();
        write_str_field(&mut out, FILE_NAME, self.file_name);
        if let Some(package) = &package {
            write_str_field(&mut out, FILE_PACKAGE, package);
        }
        for dep in &dependencies {
            write_str_field(&mut out, FILE_DEPENDENCY, dep);
        }
        for m in &messages {
            write_bytes_field(&mut out, FILE_MESSAGE_TYPE, m);
        }
        for e in &enums {
            write_bytes_field(&mut out, FILE_ENUM_TYPE, e);
        }
        if let Some(syntax) = &syntax {
            write_str_field(&mut out, FILE_SYNTAX, syntax);
        }
        Ok(out)
    }

    /// `depth` counts the enclosing messages, this one included.
    fn parse_message(&mut self, depth: usize) -> Result<Vec<u8>, IndexError> {
        if depth > MAX_NESTING_DEPTH {
            return Err(self.error(format!("messages nested deeper than {MAX_NESTING_DEPTH} levels")));
        }
        let name = self.expect_ident()?;
        self.expect_sym('{')?;

        let mut fields: Vec<Vec<u8>> = Vec::new();
        let mut nested: Vec<Vec<u8>> = Vec::new();
        let mut enums: Vec<Vec<u8>> = Vec::new();
        let mut oneofs: Vec<String> = Vec::new();

        while !self.eat_sym('}') {
            match self.peek().cloned() {
                Some(Token::Sym(';')) => self.pos += 1,
                Some(Token::Ident(word)) => match word.as_str() {
                    "message" => {
                        self.pos += 1;
                        nested.push(self.parse_message(depth + 1)?);
                    }
                    "enum" => {
                        self.pos += 1;
                        enums.push(self.parse_enum()?);
                    }
                    "option" | "reserved" | "extensions" => self.skip_statement()?,
                    "extend" => self.skip_block()?,
                    "oneof" => {
                        self.pos += 1;
                        let oneof_name = self.expect_ident()?;
                        let oneof_index = oneofs.len() as u64;
                        oneofs.push(oneof_name);
                        self.expect_sym('{')?;
                        while !self.eat_sym('}') {
                            if self.peek_is_ident("option") {
                                self.skip_statement()?;
                            } else if self.eat_sym(';') {
                                continue;
                            } else {
                                fields.push(self.parse_field(Some(oneof_index))?);
                            }
                        }
                    }
                    "map" if matches!(self.tokens.get(self.pos + 1), Some((Token::Sym('<'), _))) => {
                        self.pos += 1;
                        let (field, entry) = self.parse_map_field()?;
                        fields.push(field);
                        nested.push(entry);
                    }
                    _ => fields.push(self.parse_field(None)?),
                },
                Some(other) => return Err(self.error(format!("unexpected {other:?} in message {name}"))),
                None => return Err(self.error(format!("unterminated message {name}"))),
            }
        }

        let mut out = Vec::new();
        write_str_field(&mut out, MESSAGE_NAME, &name);
        for f in &fields {
            write_bytes_field(&mut out, MESSAGE_FIELD, f);
        }
        for n in &nested {
            write_bytes_field(&mut out, MESSAGE_NESTED_TYPE, n);
        }
        for e in &enums {
            write_bytes_field(&mut out, MESSAGE_ENUM_TYPE, e);
        }
        for o in &oneofs {
            write_message_field(&mut out, MESSAGE_ONEOF_DECL, |buf| write_str_field(buf, 1, o));
        }
        Ok(out)
    }

    fn parse_field(&mut self, oneof_index: Option<u64>) -> Result<Vec<u8>, IndexError> {
        let label = if self.peek_is_ident("repeated") {
            self.pos += 1;
            LABEL_REPEATED
        } else if self.peek_is_ident("required") {
            self.pos += 1;
            LABEL_REQUIRED
        } else {
            if self.peek_is_ident("optional") {
                self.pos += 1;
            }
            LABEL_OPTIONAL
        };
        let type_name = self.expect_ident()?;
        if type_name == "group" {
            return Err(self.error("groups are not supported"));
        }
        let name = self.expect_ident()?;
        self.expect_sym('=')?;
        let number = self.expect_int()?;
        if number <= 0 {
            return Err(self.error(format!("field {name} has invalid number {number}")));
        }
        self.skip_field_options()?;
        self.expect_sym(';')?;

        Ok(encode_field(&name, number as u64, label, &type_name, oneof_index))
    }

    /// `map<K, V> name = N;` becomes a repeated field of a synthesized
    /// `NameEntry` nested message, like every protobuf front-end does.
    fn parse_map_field(&mut self) -> Result<(Vec<u8>, Vec<u8>), IndexError> {
        self.expect_sym('<')?;
        let key_type = self.expect_ident()?;
        self.expect_sym(',')?;
        let value_type = self.expect_ident()?;
        self.expect_sym('>')?;
        let name = self.expect_ident()?;
        self.expect_sym('=')?;
        let number = self.expect_int()?;
        if number <= 0 {
            return Err(self.error(format!("field {name} has invalid number {number}")));
        }
        self.skip_field_options()?;
        self.expect_sym(';')?;

        let entry_name = map_entry_name(&name);
        let mut entry = Vec::new();
        write_str_field(&mut entry, MESSAGE_NAME, &entry_name);
        write_bytes_field(
            &mut entry,
            MESSAGE_FIELD,
            &encode_field("key", 1, LABEL_OPTIONAL, &key_type, None),
        );
        write_bytes_field(
            &mut entry,
            MESSAGE_FIELD,
            &encode_field("value", 2, LABEL_OPTIONAL, &value_type, None),
        );
        write_message_field(&mut entry, MESSAGE_OPTIONS, |opts| {
            write_varint_field(opts, MESSAGE_OPTIONS_MAP_ENTRY, 1)
        });

        let field = encode_field(&name, number as u64, LABEL_REPEATED, &entry_name, None);
        Ok((field, entry))
    }

    fn parse_enum(&mut self) -> Result<Vec<u8>, IndexError> {
        let name = self.expect_ident()?;
        self.expect_sym('{')?;

        let mut out = Vec::new();
        write_str_field(&mut out, ENUM_NAME, &name);

        while !self.eat_sym('}') {
            if self.peek_is_ident("option") || self.peek_is_ident("reserved") {
                self.skip_statement()?;
                continue;
            }
            if self.eat_sym(';') {
                continue;
            }
            let value_name = self.expect_ident()?;
            self.expect_sym('=')?;
            let number = self.expect_int()?;
            self.skip_field_options()?;
            self.expect_sym(';')?;

            write_message_field(&mut out, ENUM_VALUE, |buf| {
                write_str_field(buf, ENUM_VALUE_NAME, &value_name);
                // int32: negative values are sign-extended to 10 bytes
                write_tag(buf, ENUM_VALUE_NUMBER, WIRE_VARINT);
                encode_varint(number as u64, buf);
            });
        }
        Ok(out)
    }
}

fn encode_field(name: &str, number: u64, label: u64, type_name: &str, oneof_index: Option<u64>) -> Vec<u8> {
    let mut out = Vec::new();
    write_str_field(&mut out, FIELD_NAME, name);
    write_varint_field(&mut out, FIELD_NUMBER, number);
    write_varint_field(&mut out, FIELD_LABEL, label);
    match scalar_type(type_name) {
        Some(t) => write_varint_field(&mut out, FIELD_TYPE, t),
        // left unresolved, linking is the reflective pool's job
        None => write_str_field(&mut out, FIELD_TYPE_NAME, type_name),
    }
    if let Some(index) = oneof_index {
        write_varint_field(&mut out, FIELD_ONEOF_INDEX, index);
    }
    out
}

/// `foo_bar` → `FooBarEntry`.
fn map_entry_name(field_name: &str) -> String {
    let mut out = String::with_capacity(field_name.len() + 5);
    let mut upper = true;
    for c in field_name.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out.push_str("Entry");
    out
}
