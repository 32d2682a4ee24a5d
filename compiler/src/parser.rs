use crate::{
    tokenizer::Token,
    types::{
        Constant, Enum, EnumValue, Field, FieldType, Import, ImportKind, Label, Message, Method,
        NumberRange, Oneof, OptionDecl, ProtoFile, Service, SyntaxVersion,
    },
    utils::{error, quote},
    error::SchemaError,
};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref IDENTIFIER:       Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
    static ref FULL_IDENTIFIER:  Regex = Regex::new(r"^\.?[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").unwrap();
    static ref OPTION_SUFFIX:    Regex = Regex::new(r"^\.[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").unwrap();
    static ref INTEGER:          Regex = Regex::new(r"^(0[xX][0-9A-Fa-f]+|\d+)$").unwrap();
    static ref FLOAT:            Regex = Regex::new(r"^(\d+\.\d*|\.\d+|\d+)([eE][+-]?\d+)?$").unwrap();
    static ref STRING:           Regex = Regex::new(r#"^("|')"#).unwrap();
    static ref EQUALS:           Regex = Regex::new(r"^=$").unwrap();
    static ref SEMICOLON:        Regex = Regex::new(r"^;$").unwrap();
    static ref COMMA:            Regex = Regex::new(r"^,$").unwrap();
    static ref MINUS:            Regex = Regex::new(r"^-$").unwrap();
    static ref PLUS:             Regex = Regex::new(r"^\+$").unwrap();
    static ref LEFT_BRACE:       Regex = Regex::new(r"^\{$").unwrap();
    static ref RIGHT_BRACE:      Regex = Regex::new(r"^\}$").unwrap();
    static ref LEFT_BRACKET:     Regex = Regex::new(r"^\[$").unwrap();
    static ref RIGHT_BRACKET:    Regex = Regex::new(r"^\]$").unwrap();
    static ref LEFT_PAREN:       Regex = Regex::new(r"^\($").unwrap();
    static ref RIGHT_PAREN:      Regex = Regex::new(r"^\)$").unwrap();
    static ref LEFT_ANGLE:       Regex = Regex::new(r"^<$").unwrap();
    static ref RIGHT_ANGLE:      Regex = Regex::new(r"^>$").unwrap();
    static ref SYNTAX_KEYWORD:   Regex = Regex::new(r"^syntax$").unwrap();
    static ref EDITION_KEYWORD:  Regex = Regex::new(r"^edition$").unwrap();
    static ref PACKAGE_KEYWORD:  Regex = Regex::new(r"^package$").unwrap();
    static ref IMPORT_KEYWORD:   Regex = Regex::new(r"^import$").unwrap();
    static ref PUBLIC_KEYWORD:   Regex = Regex::new(r"^public$").unwrap();
    static ref WEAK_KEYWORD:     Regex = Regex::new(r"^weak$").unwrap();
    static ref OPTION_KEYWORD:   Regex = Regex::new(r"^option$").unwrap();
    static ref MESSAGE_KEYWORD:  Regex = Regex::new(r"^message$").unwrap();
    static ref ENUM_KEYWORD:     Regex = Regex::new(r"^enum$").unwrap();
    static ref SERVICE_KEYWORD:  Regex = Regex::new(r"^service$").unwrap();
    static ref EXTEND_KEYWORD:   Regex = Regex::new(r"^extend$").unwrap();
    static ref ONEOF_KEYWORD:    Regex = Regex::new(r"^oneof$").unwrap();
    static ref MAP_KEYWORD:      Regex = Regex::new(r"^map$").unwrap();
    static ref RESERVED_KEYWORD: Regex = Regex::new(r"^reserved$").unwrap();
    static ref EXTENSIONS_KEYWORD: Regex = Regex::new(r"^extensions$").unwrap();
    static ref GROUP_KEYWORD:    Regex = Regex::new(r"^group$").unwrap();
    static ref RPC_KEYWORD:      Regex = Regex::new(r"^rpc$").unwrap();
    static ref RETURNS_KEYWORD:  Regex = Regex::new(r"^returns$").unwrap();
    static ref STREAM_KEYWORD:   Regex = Regex::new(r"^stream$").unwrap();
    static ref TO_KEYWORD:       Regex = Regex::new(r"^to$").unwrap();
    static ref MAX_KEYWORD:      Regex = Regex::new(r"^max$").unwrap();
    static ref LABEL:            Regex = Regex::new(r"^(optional|required|repeated)$").unwrap();
    static ref EOF:              Regex = Regex::new(r"^$").unwrap();
}

/// Largest field number the wire format can carry (2^29 - 1).
pub const MAX_FIELD_NUMBER: i64 = 536_870_911;

/// Parses the tokens of one file into a [`ProtoFile`]. `file` is only used
/// to label errors.
pub fn parse_schema(file: &str, tokens: &[Token]) -> Result<ProtoFile, SchemaError> {
    Parser { file, tokens, index: 0 }.parse_file()
}

struct Parser<'a> {
    file:   &'a str,
    tokens: &'a [Token],
    index:  usize,
}

impl<'a> Parser<'a> {
    fn current(&self) -> &'a Token {
        // The tokenizer always appends an EOF token, and nothing advances past it.
        &self.tokens[self.index.min(self.tokens.len() - 1)]
    }

    fn peek(&self, offset: usize) -> &'a Token {
        &self.tokens[(self.index + offset).min(self.tokens.len() - 1)]
    }

    fn at_eof(&self) -> bool {
        EOF.is_match(&self.current().text)
    }

    fn eat(&mut self, test: &Regex) -> bool {
        if !self.at_eof() && test.is_match(&self.current().text) {
            self.index += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, test: &Regex, expected: &str) -> Result<&'a Token, SchemaError> {
        let tok = self.current();
        if !self.eat(test) {
            return Err(self.error_at(
                tok,
                &format!("Expected {} but found {}", expected, describe(tok)),
            ));
        }
        Ok(tok)
    }

    fn error_at(&self, tok: &Token, msg: &str) -> SchemaError {
        error(self.file, msg, tok.line, tok.column)
    }

    fn unexpected_token(&self) -> SchemaError {
        let tok = self.current();
        self.error_at(tok, &format!("Unexpected token {}", describe(tok)))
    }

    fn parse_file(mut self) -> Result<ProtoFile, SchemaError> {
        let mut proto = ProtoFile {
            name:     self.file.to_string(),
            syntax:   SyntaxVersion::Proto2,
            package:  None,
            imports:  Vec::new(),
            options:  Vec::new(),
            messages: Vec::new(),
            enums:    Vec::new(),
            services: Vec::new(),
        };

        // Handle syntax declaration
        if self.eat(&SYNTAX_KEYWORD) {
            self.expect(&EQUALS, "\"=\"")?;
            let tok = self.current();
            let version = self.parse_string()?;
            proto.syntax = match version.as_str() {
                "proto2" => SyntaxVersion::Proto2,
                "proto3" => SyntaxVersion::Proto3,
                other => {
                    return Err(self.error_at(tok, &format!("Unsupported syntax {}", quote(other))))
                }
            };
            self.expect(&SEMICOLON, "\";\"")?;
        } else if EDITION_KEYWORD.is_match(&self.current().text) {
            return Err(self.error_at(self.current(), "Editions are not supported"));
        }

        while !self.at_eof() {
            if self.eat(&SEMICOLON) {
                continue;
            }
            if self.eat(&PACKAGE_KEYWORD) {
                let tok = self.current();
                if proto.package.is_some() {
                    return Err(self.error_at(tok, "Multiple package declarations"));
                }
                let name = self.expect(&FULL_IDENTIFIER, "package name")?;
                proto.package = Some(name.text.clone());
                self.expect(&SEMICOLON, "\";\"")?;
            } else if IMPORT_KEYWORD.is_match(&self.current().text) {
                proto.imports.push(self.parse_import()?);
            } else if self.eat(&OPTION_KEYWORD) {
                proto.options.push(self.parse_option_body()?);
                self.expect(&SEMICOLON, "\";\"")?;
            } else if self.eat(&MESSAGE_KEYWORD) {
                proto.messages.push(self.parse_message()?);
            } else if self.eat(&ENUM_KEYWORD) {
                proto.enums.push(self.parse_enum()?);
            } else if self.eat(&SERVICE_KEYWORD) {
                proto.services.push(self.parse_service()?);
            } else if self.eat(&EXTEND_KEYWORD) {
                self.skip_extend()?;
            } else {
                return Err(self.unexpected_token());
            }
        }

        Ok(proto)
    }

    fn parse_import(&mut self) -> Result<Import, SchemaError> {
        let tok = self.expect(&IMPORT_KEYWORD, "\"import\"")?;
        let kind = if self.eat(&PUBLIC_KEYWORD) {
            ImportKind::Public
        } else if self.eat(&WEAK_KEYWORD) {
            ImportKind::Weak
        } else {
            ImportKind::Default
        };
        let path = self.parse_string()?;
        self.expect(&SEMICOLON, "\";\"")?;
        Ok(Import {
            path,
            kind,
            line:   tok.line,
            column: tok.column,
        })
    }

    /// `name = constant`, after the `option` keyword.
    fn parse_option_body(&mut self) -> Result<OptionDecl, SchemaError> {
        let name = self.parse_option_name()?;
        self.expect(&EQUALS, "\"=\"")?;
        let value = self.parse_constant()?;
        Ok(OptionDecl { name, value })
    }

    /// `foo`, `foo.bar`, `(custom.ext)`, `(custom.ext).field`.
    fn parse_option_name(&mut self) -> Result<String, SchemaError> {
        let mut name = String::new();
        if self.eat(&LEFT_PAREN) {
            let ext = self.expect(&FULL_IDENTIFIER, "extension name")?;
            self.expect(&RIGHT_PAREN, "\")\"")?;
            name.push('(');
            name.push_str(&ext.text);
            name.push(')');
        } else {
            let tok = self.expect(&FULL_IDENTIFIER, "option name")?;
            name.push_str(&tok.text);
        }
        while OPTION_SUFFIX.is_match(&self.current().text) {
            name.push_str(&self.current().text);
            self.index += 1;
        }
        Ok(name)
    }

    fn parse_constant(&mut self) -> Result<Constant, SchemaError> {
        let tok = self.current();

        if STRING.is_match(&tok.text) {
            return Ok(Constant::String(self.parse_string()?));
        }

        if self.eat(&LEFT_BRACE) {
            let start = self.index;
            self.skip_balanced_braces()?;
            let body = self.tokens[start..self.index - 1]
                .iter()
                .map(|t| t.text.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            return Ok(Constant::Aggregate(body));
        }

        let negative = if self.eat(&MINUS) {
            true
        } else {
            self.eat(&PLUS);
            false
        };
        let tok = self.current();

        if INTEGER.is_match(&tok.text) {
            self.index += 1;
            let magnitude = parse_integer(&tok.text)
                .ok_or_else(|| self.error_at(tok, &format!("Invalid integer {}", quote(&tok.text))))?;
            return Ok(match i64::try_from(magnitude) {
                Ok(v) if negative => Constant::Integer(-v),
                Ok(v) => Constant::Integer(v),
                Err(_) if negative && magnitude == i64::MIN.unsigned_abs() => {
                    Constant::Integer(i64::MIN)
                }
                Err(_) => Constant::Float(if negative { -(magnitude as f64) } else { magnitude as f64 }),
            });
        }

        if FLOAT.is_match(&tok.text) {
            self.index += 1;
            let value: f64 = tok
                .text
                .parse()
                .map_err(|_| self.error_at(tok, &format!("Invalid number {}", quote(&tok.text))))?;
            return Ok(Constant::Float(if negative { -value } else { value }));
        }

        if FULL_IDENTIFIER.is_match(&tok.text) && !self.at_eof() {
            self.index += 1;
            return Ok(match (negative, tok.text.as_str()) {
                (true, "inf") => Constant::Float(f64::NEG_INFINITY),
                (false, "inf") => Constant::Float(f64::INFINITY),
                (_, "nan") => Constant::Float(f64::NAN),
                (true, _) => {
                    return Err(self.error_at(tok, &format!("Expected number but found {}", describe(tok))))
                }
                (false, text) => Constant::Identifier(text.to_string()),
            });
        }

        Err(self.error_at(tok, &format!("Expected constant but found {}", describe(tok))))
    }

    /// One or more adjacent string literals, concatenated and unescaped.
    fn parse_string(&mut self) -> Result<String, SchemaError> {
        let tok = self.current();
        if !STRING.is_match(&tok.text) {
            return Err(self.error_at(tok, &format!("Expected string but found {}", describe(tok))));
        }
        let mut out = String::new();
        while STRING.is_match(&self.current().text) {
            let tok = self.current();
            let inner = &tok.text[1..tok.text.len() - 1];
            out.push_str(
                &unescape(inner).ok_or_else(|| self.error_at(tok, "Invalid escape sequence in string"))?,
            );
            self.index += 1;
        }
        Ok(out)
    }

    fn parse_integer_token(&mut self, allow_negative: bool) -> Result<i64, SchemaError> {
        let negative = allow_negative && self.eat(&MINUS);
        let tok = self.expect(&INTEGER, "integer")?;
        let magnitude = parse_integer(&tok.text)
            .and_then(|v| i64::try_from(v).ok())
            .ok_or_else(|| self.error_at(tok, &format!("Invalid integer {}", quote(&tok.text))))?;
        Ok(if negative { -magnitude } else { magnitude })
    }

    fn parse_options_list(&mut self) -> Result<Vec<OptionDecl>, SchemaError> {
        let mut options = Vec::new();
        if self.eat(&LEFT_BRACKET) {
            loop {
                options.push(self.parse_option_body()?);
                if !self.eat(&COMMA) {
                    break;
                }
            }
            self.expect(&RIGHT_BRACKET, "\"]\"")?;
        }
        Ok(options)
    }

    fn parse_message(&mut self) -> Result<Message, SchemaError> {
        let name_tok = self.expect(&IDENTIFIER, "identifier")?;
        self.expect(&LEFT_BRACE, "\"{\"")?;

        let mut message = Message {
            name:           name_tok.text.clone(),
            line:           name_tok.line,
            column:         name_tok.column,
            fields:         Vec::new(),
            oneofs:         Vec::new(),
            messages:       Vec::new(),
            enums:          Vec::new(),
            reserved:       Vec::new(),
            reserved_names: Vec::new(),
            options:        Vec::new(),
        };

        while !self.eat(&RIGHT_BRACE) {
            if self.at_eof() {
                return Err(self.error_at(self.current(), "Expected \"}\" but found end of file"));
            }
            if self.eat(&SEMICOLON) {
                continue;
            }

            let next_is_name = IDENTIFIER.is_match(&self.peek(1).text);
            if self.eat(&OPTION_KEYWORD) {
                message.options.push(self.parse_option_body()?);
                self.expect(&SEMICOLON, "\";\"")?;
            } else if next_is_name && self.eat(&MESSAGE_KEYWORD) {
                message.messages.push(self.parse_message()?);
            } else if next_is_name && self.eat(&ENUM_KEYWORD) {
                message.enums.push(self.parse_enum()?);
            } else if next_is_name && self.eat(&ONEOF_KEYWORD) {
                self.parse_oneof(&mut message)?;
            } else if self.eat(&RESERVED_KEYWORD) {
                self.parse_reserved(&mut message.reserved, &mut message.reserved_names)?;
            } else if self.eat(&EXTENSIONS_KEYWORD) {
                let mut ranges = Vec::new();
                self.parse_ranges(&mut ranges)?;
                self.parse_options_list()?;
                self.expect(&SEMICOLON, "\";\"")?;
            } else if self.eat(&EXTEND_KEYWORD) {
                self.skip_extend()?;
            } else {
                let field = self.parse_field(None)?;
                message.fields.push(field);
            }
        }

        Ok(message)
    }

    fn parse_oneof(&mut self, message: &mut Message) -> Result<(), SchemaError> {
        let name_tok = self.expect(&IDENTIFIER, "identifier")?;
        self.expect(&LEFT_BRACE, "\"{\"")?;
        let index = message.oneofs.len();
        let mut oneof = Oneof {
            name:    name_tok.text.clone(),
            line:    name_tok.line,
            column:  name_tok.column,
            options: Vec::new(),
        };

        while !self.eat(&RIGHT_BRACE) {
            if self.at_eof() {
                return Err(self.error_at(self.current(), "Expected \"}\" but found end of file"));
            }
            if self.eat(&SEMICOLON) {
                continue;
            }
            if self.eat(&OPTION_KEYWORD) {
                oneof.options.push(self.parse_option_body()?);
                self.expect(&SEMICOLON, "\";\"")?;
                continue;
            }
            if LABEL.is_match(&self.current().text) {
                return Err(self.error_at(self.current(), "Fields in oneofs must not have labels"));
            }
            let field = self.parse_field(Some(index))?;
            message.fields.push(field);
        }

        message.oneofs.push(oneof);
        Ok(())
    }

    fn parse_field(&mut self, oneof: Option<usize>) -> Result<Field, SchemaError> {
        let label = if self.eat(&LABEL) {
            Some(match self.tokens[self.index - 1].text.as_str() {
                "optional" => Label::Optional,
                "required" => Label::Required,
                _ => Label::Repeated,
            })
        } else {
            None
        };

        let field_type = if MAP_KEYWORD.is_match(&self.current().text)
            && LEFT_ANGLE.is_match(&self.peek(1).text)
        {
            self.index += 2;
            let key = self.expect(&FULL_IDENTIFIER, "map key type")?;
            self.expect(&COMMA, "\",\"")?;
            let value = self.expect(&FULL_IDENTIFIER, "map value type")?;
            self.expect(&RIGHT_ANGLE, "\">\"")?;
            if label.is_some() {
                return Err(self.error_at(key, "Map fields must not have labels"));
            }
            FieldType::Map {
                key:   key.text.clone(),
                value: value.text.clone(),
            }
        } else {
            if GROUP_KEYWORD.is_match(&self.current().text) && IDENTIFIER.is_match(&self.peek(1).text) {
                return Err(self.error_at(self.current(), "Groups are not supported"));
            }
            let type_tok = self.expect(&FULL_IDENTIFIER, "type name")?;
            FieldType::Named(type_tok.text.clone())
        };

        let name_tok = self.expect(&IDENTIFIER, "field name")?;
        self.expect(&EQUALS, "\"=\"")?;
        let number = self.parse_integer_token(true)?;
        let options = self.parse_options_list()?;
        self.expect(&SEMICOLON, "\";\"")?;

        Ok(Field {
            name: name_tok.text.clone(),
            line: name_tok.line,
            column: name_tok.column,
            label,
            field_type,
            number,
            oneof,
            options,
        })
    }

    /// `reserved 2, 15, 9 to 11, 40 to max;` or `reserved "foo", "bar";`
    fn parse_reserved(
        &mut self,
        ranges: &mut Vec<NumberRange>,
        names: &mut Vec<String>,
    ) -> Result<(), SchemaError> {
        if STRING.is_match(&self.current().text) {
            loop {
                names.push(self.parse_string()?);
                if !self.eat(&COMMA) {
                    break;
                }
            }
        } else if IDENTIFIER.is_match(&self.current().text) && !MAX_KEYWORD.is_match(&self.current().text) {
            // edition-style bare identifiers
            loop {
                names.push(self.expect(&IDENTIFIER, "identifier")?.text.clone());
                if !self.eat(&COMMA) {
                    break;
                }
            }
        } else {
            self.parse_ranges(ranges)?;
        }
        self.expect(&SEMICOLON, "\";\"")?;
        Ok(())
    }

    fn parse_ranges(&mut self, ranges: &mut Vec<NumberRange>) -> Result<(), SchemaError> {
        loop {
            let start = self.parse_integer_token(true)?;
            let end = if self.eat(&TO_KEYWORD) {
                if self.eat(&MAX_KEYWORD) {
                    i64::MAX
                } else {
                    self.parse_integer_token(true)?
                }
            } else {
                start
            };
            ranges.push(NumberRange { start, end });
            if !self.eat(&COMMA) {
                break;
            }
        }
        Ok(())
    }

    fn parse_enum(&mut self) -> Result<Enum, SchemaError> {
        let name_tok = self.expect(&IDENTIFIER, "identifier")?;
        self.expect(&LEFT_BRACE, "\"{\"")?;

        let mut e = Enum {
            name:           name_tok.text.clone(),
            line:           name_tok.line,
            column:         name_tok.column,
            values:         Vec::new(),
            reserved:       Vec::new(),
            reserved_names: Vec::new(),
            options:        Vec::new(),
        };

        while !self.eat(&RIGHT_BRACE) {
            if self.at_eof() {
                return Err(self.error_at(self.current(), "Expected \"}\" but found end of file"));
            }
            if self.eat(&SEMICOLON) {
                continue;
            }
            if self.eat(&OPTION_KEYWORD) {
                e.options.push(self.parse_option_body()?);
                self.expect(&SEMICOLON, "\";\"")?;
            } else if !EQUALS.is_match(&self.peek(1).text) && self.eat(&RESERVED_KEYWORD) {
                self.parse_reserved(&mut e.reserved, &mut e.reserved_names)?;
            } else {
                let value_tok = self.expect(&IDENTIFIER, "identifier")?;
                self.expect(&EQUALS, "\"=\"")?;
                let number = self.parse_integer_token(true)?;
                let options = self.parse_options_list()?;
                self.expect(&SEMICOLON, "\";\"")?;
                e.values.push(EnumValue {
                    name: value_tok.text.clone(),
                    line: value_tok.line,
                    column: value_tok.column,
                    number,
                    options,
                });
            }
        }

        Ok(e)
    }

    fn parse_service(&mut self) -> Result<Service, SchemaError> {
        let name_tok = self.expect(&IDENTIFIER, "identifier")?;
        self.expect(&LEFT_BRACE, "\"{\"")?;

        let mut service = Service {
            name:    name_tok.text.clone(),
            line:    name_tok.line,
            column:  name_tok.column,
            methods: Vec::new(),
            options: Vec::new(),
        };

        while !self.eat(&RIGHT_BRACE) {
            if self.at_eof() {
                return Err(self.error_at(self.current(), "Expected \"}\" but found end of file"));
            }
            if self.eat(&SEMICOLON) {
                continue;
            }
            if self.eat(&OPTION_KEYWORD) {
                service.options.push(self.parse_option_body()?);
                self.expect(&SEMICOLON, "\";\"")?;
                continue;
            }

            self.expect(&RPC_KEYWORD, "\"rpc\"")?;
            let method_tok = self.expect(&IDENTIFIER, "method name")?;
            let (client_streaming, input_type) = self.parse_rpc_type()?;
            self.expect(&RETURNS_KEYWORD, "\"returns\"")?;
            let (server_streaming, output_type) = self.parse_rpc_type()?;

            let mut options = Vec::new();
            if self.eat(&LEFT_BRACE) {
                while !self.eat(&RIGHT_BRACE) {
                    if self.at_eof() {
                        return Err(self.error_at(self.current(), "Expected \"}\" but found end of file"));
                    }
                    if self.eat(&SEMICOLON) {
                        continue;
                    }
                    self.expect(&OPTION_KEYWORD, "\"option\"")?;
                    options.push(self.parse_option_body()?);
                    self.expect(&SEMICOLON, "\";\"")?;
                }
            } else {
                self.expect(&SEMICOLON, "\";\"")?;
            }

            service.methods.push(Method {
                name: method_tok.text.clone(),
                line: method_tok.line,
                column: method_tok.column,
                input_type,
                output_type,
                client_streaming,
                server_streaming,
                options,
            });
        }

        Ok(service)
    }

    /// `( [stream] Type )`
    fn parse_rpc_type(&mut self) -> Result<(bool, String), SchemaError> {
        self.expect(&LEFT_PAREN, "\"(\"")?;
        // `stream` is also a legal message name: `(stream)`.
        let streaming = !RIGHT_PAREN.is_match(&self.peek(1).text) && self.eat(&STREAM_KEYWORD);
        let type_tok = self.expect(&FULL_IDENTIFIER, "type name")?;
        self.expect(&RIGHT_PAREN, "\")\"")?;
        Ok((streaming, type_tok.text.clone()))
    }

    /// Extensions are not part of the descriptor graph; their blocks are skipped.
    fn skip_extend(&mut self) -> Result<(), SchemaError> {
        self.expect(&FULL_IDENTIFIER, "extendee name")?;
        self.expect(&LEFT_BRACE, "\"{\"")?;
        self.skip_balanced_braces()
    }

    /// Advances past the `}` matching an already consumed `{`.
    fn skip_balanced_braces(&mut self) -> Result<(), SchemaError> {
        let mut depth = 1;
        while depth > 0 {
            if self.at_eof() {
                return Err(self.error_at(self.current(), "Expected \"}\" but found end of file"));
            }
            if LEFT_BRACE.is_match(&self.current().text) {
                depth += 1;
            } else if RIGHT_BRACE.is_match(&self.current().text) {
                depth -= 1;
            }
            self.index += 1;
        }
        Ok(())
    }
}

fn describe(tok: &Token) -> String {
    if tok.text.is_empty() {
        "end of file".to_string()
    } else {
        quote(&tok.text)
    }
}

/// Decimal, hexadecimal (`0x`) or octal (leading `0`) literal.
fn parse_integer(text: &str) -> Option<u64> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else if text.len() > 1 && text.starts_with('0') {
        u64::from_str_radix(&text[1..], 8).ok()
    } else {
        text.parse().ok()
    }
}

/// Resolves C-style escapes inside a string literal.
fn unescape(text: &str) -> Option<String> {
    let mut bytes = Vec::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            let mut buf = [0u8; 4];
            bytes.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        match chars.next()? {
            'n' => bytes.push(b'\n'),
            'r' => bytes.push(b'\r'),
            't' => bytes.push(b'\t'),
            'a' => bytes.push(0x07),
            'b' => bytes.push(0x08),
            'f' => bytes.push(0x0c),
            'v' => bytes.push(0x0b),
            '?' => bytes.push(b'?'),
            '\\' => bytes.push(b'\\'),
            '\'' => bytes.push(b'\''),
            '"' => bytes.push(b'"'),
            'x' | 'X' => {
                let mut value = 0u32;
                let mut digits = 0;
                while digits < 2 {
                    match chars.peek().and_then(|c| c.to_digit(16)) {
                        Some(d) => {
                            value = value * 16 + d;
                            chars.next();
                            digits += 1;
                        }
                        None => break,
                    }
                }
                if digits == 0 {
                    return None;
                }
                bytes.push(value as u8);
            }
            d @ '0'..='7' => {
                let mut value = d.to_digit(8)?;
                for _ in 0..2 {
                    match chars.peek().and_then(|c| c.to_digit(8)) {
                        Some(d) => {
                            value = value * 8 + d;
                            chars.next();
                        }
                        None => break,
                    }
                }
                bytes.push(value as u8);
            }
            _ => return None,
        }
    }

    String::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::tokenize_schema;

    fn parse(text: &str) -> Result<ProtoFile, SchemaError> {
        let tokens = tokenize_schema("test.proto", text)?;
        parse_schema("test.proto", &tokens)
    }

    #[test]
    fn header_declarations() {
        let file = parse(
            r#"
            syntax = "proto3";
            package acme.users.v1;
            import "common/types.proto";
            import public "common/ids.proto";
            option go_package = "github.com/acme/users";
            option (custom.opt).nested = 5;
            "#,
        )
        .unwrap();
        assert_eq!(file.syntax, SyntaxVersion::Proto3);
        assert_eq!(file.package.as_deref(), Some("acme.users.v1"));
        assert_eq!(file.imports.len(), 2);
        assert_eq!(file.imports[1].kind, ImportKind::Public);
        assert_eq!(file.imports[1].path, "common/ids.proto");
        assert_eq!(file.options[0].value, Constant::String("github.com/acme/users".into()));
        assert_eq!(file.options[1].name, "(custom.opt).nested");
        assert_eq!(file.options[1].value, Constant::Integer(5));
    }

    #[test]
    fn default_syntax_is_proto2() {
        let file = parse("message A { required int32 id = 1; }").unwrap();
        assert_eq!(file.syntax, SyntaxVersion::Proto2);
        assert_eq!(file.messages[0].fields[0].label, Some(Label::Required));
    }

    #[test]
    fn message_body() {
        let file = parse(
            r#"
            syntax = "proto3";
            message User {
              int64 id = 1;
              repeated string tags = 2 [packed = false];
              map<string, int32> counts = 3;
              oneof contact {
                string email = 4;
                string phone = 5 [json_name = "tel"];
              }
              optional bool active = 6;
              reserved 8, 10 to 12, 100 to max;
              reserved "old_name";
              message Address { string city = 1; }
              enum Role { ROLE_UNSPECIFIED = 0; ADMIN = 1; }
              Address home = 7;
            }
            "#,
        )
        .unwrap();

        let user = &file.messages[0];
        assert_eq!(user.name, "User");
        let names: Vec<_> = user.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["id", "tags", "counts", "email", "phone", "active", "home"]);
        assert_eq!(user.fields[1].label, Some(Label::Repeated));
        assert_eq!(user.fields[1].options[0].value.as_bool(), Some(false));
        assert_eq!(
            user.fields[2].field_type,
            FieldType::Map { key: "string".into(), value: "int32".into() }
        );
        assert_eq!(user.fields[3].oneof, Some(0));
        assert_eq!(user.fields[4].options[0].value.as_str(), Some("tel"));
        assert_eq!(user.fields[5].label, Some(Label::Optional));
        assert_eq!(user.oneofs[0].name, "contact");
        assert_eq!(
            user.reserved,
            vec![
                NumberRange { start: 8, end: 8 },
                NumberRange { start: 10, end: 12 },
                NumberRange { start: 100, end: i64::MAX },
            ]
        );
        assert_eq!(user.reserved_names, vec!["old_name".to_string()]);
        assert_eq!(user.messages[0].name, "Address");
        assert_eq!(user.enums[0].values[1].name, "ADMIN");
        assert_eq!(user.fields[6].field_type, FieldType::Named("Address".into()));
    }

    #[test]
    fn enums_and_services() {
        let file = parse(
            r#"
            syntax = "proto3";
            enum Status {
              option allow_alias = true;
              UNKNOWN = 0;
              STARTED = 1;
              RUNNING = 1 [deprecated = true];
              NEGATIVE = -2;
            }
            service Users {
              rpc Get (GetRequest) returns (User);
              rpc Watch (stream GetRequest) returns (stream User) {
                option deprecated = true;
              }
            }
            extend google.protobuf.FieldOptions { string tag = 5000; }
            "#,
        )
        .unwrap();

        let status = &file.enums[0];
        assert_eq!(status.values.len(), 4);
        assert_eq!(status.values[3].number, -2);
        let service = &file.services[0];
        assert_eq!(service.methods.len(), 2);
        assert!(!service.methods[0].client_streaming);
        assert!(service.methods[1].client_streaming);
        assert!(service.methods[1].server_streaming);
        assert_eq!(service.methods[1].output_type, "User");
    }

    #[test]
    fn constants() {
        let file = parse(
            r#"
            option a = -inf;
            option b = 0x10;
            option c = 1.5e3;
            option d = "x" 'y';
            option e = { foo: 1 bar { baz: "q" } };
            option f = -9223372036854775808;
            "#,
        )
        .unwrap();
        let values: Vec<_> = file.options.iter().map(|o| o.value.clone()).collect();
        assert_eq!(values[0], Constant::Float(f64::NEG_INFINITY));
        assert_eq!(values[1], Constant::Integer(16));
        assert_eq!(values[2], Constant::Float(1500.0));
        assert_eq!(values[3], Constant::String("xy".into()));
        assert!(matches!(values[4], Constant::Aggregate(_)));
        assert_eq!(values[5], Constant::Integer(i64::MIN));
    }

    #[test]
    fn string_escapes() {
        assert_eq!(unescape(r"a\nb").as_deref(), Some("a\nb"));
        assert_eq!(unescape(r"\x41\101\'").as_deref(), Some("AA'"));
        assert_eq!(unescape(r"\q"), None);
    }

    #[test]
    fn syntax_errors_carry_locations() {
        let err = parse("syntax = \"proto3\";\nmessage A {\n  int32 = 1;\n}").unwrap_err();
        match err {
            SchemaError::Parse { line, column, msg, .. } => {
                assert_eq!((line, column), (3, 9));
                assert!(msg.contains("field name"), "{msg}");
            }
            other => panic!("unexpected error {other:?}"),
        }

        assert!(parse("message A { int32 a = 1; ").is_err());
        assert!(parse("message A { optional group G = 1 { } }").is_err());
        assert!(parse("syntax = \"proto4\";").is_err());
        assert!(parse("package a; package b;").is_err());
    }

    #[test]
    fn keywords_as_field_names() {
        let file = parse("message A { string message = 1; int32 option = 2; Foo map = 3; }").unwrap();
        let names: Vec<_> = file.messages[0].fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["message", "option", "map"]);
    }
}
