//! Hand-written tokenizer and recursive-descent parser for the small SQL
//! dialect minidb understands.

use crate::{Error, Result};
use minidb_core::{ColumnDefinition, DataType, Value};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    All,
    Columns(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Create {
        table: String,
        columns: Vec<ColumnDefinition>,
    },
    Insert {
        table: String,
        values: Vec<Value>,
    },
    Select {
        table: String,
        projection: Projection,
        rowid: Option<i64>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Integer(i64),
    Str(Vec<u8>),
    LeftParen,
    RightParen,
    Comma,
    Semicolon,
    Star,
    Eq,
    Eof,
}

struct Tokenizer<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input: input.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.input.get(self.pos + offset).copied()
    }

    fn next_token(&mut self) -> Result<Token> {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }

        let Some(b) = self.peek() else {
            return Ok(Token::Eof);
        };

        let single = match b {
            b'(' => Some(Token::LeftParen),
            b')' => Some(Token::RightParen),
            b',' => Some(Token::Comma),
            b';' => Some(Token::Semicolon),
            b'*' => Some(Token::Star),
            b'=' => Some(Token::Eq),
            _ => None,
        };
        if let Some(token) = single {
            self.pos += 1;
            return Ok(token);
        }

        match b {
            b'\'' => self.read_string(),
            b'0'..=b'9' => self.read_integer(),
            b'-' | b'+' if self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) => {
                self.read_integer()
            }
            b if b.is_ascii_alphabetic() || b == b'_' => Ok(self.read_ident()),
            other => Err(Error::Parse(format!(
                "unexpected character '{}' at offset {}",
                other.escape_ascii(),
                self.pos
            ))),
        }
    }

    fn read_string(&mut self) -> Result<Token> {
        let start = self.pos;
        self.pos += 1;
        let mut value = Vec::new();
        loop {
            match self.peek() {
                None => {
                    return Err(Error::Parse(format!(
                        "unterminated string literal at offset {}",
                        start
                    )))
                }
                Some(b'\'') if self.peek_at(1) == Some(b'\'') => {
                    value.push(b'\'');
                    self.pos += 2;
                }
                Some(b'\'') => {
                    self.pos += 1;
                    return Ok(Token::Str(value));
                }
                Some(b) => {
                    value.push(b);
                    self.pos += 1;
                }
            }
        }
    }

    fn read_integer(&mut self) -> Result<Token> {
        let start = self.pos;
        if matches!(self.peek(), Some(b'-' | b'+')) {
            self.pos += 1;
        }
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.peek().is_some_and(|b| b.is_ascii_alphabetic() || b == b'_') {
            return Err(Error::Parse(format!(
                "malformed number at offset {}",
                start
            )));
        }

        let text = String::from_utf8_lossy(&self.input[start..self.pos]);
        text.parse::<i64>()
            .map(Token::Integer)
            .map_err(|_| Error::Parse(format!("integer literal out of range: {}", text)))
    }

    fn read_ident(&mut self) -> Token {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_')
        {
            self.pos += 1;
        }
        Token::Ident(String::from_utf8_lossy(&self.input[start..self.pos]).into_owned())
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokenizer = Tokenizer::new(input);
    let mut tokens = Vec::new();
    loop {
        let token = tokenizer.next_token()?;
        if token == Token::Eof {
            break;
        }
        tokens.push(token);
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        self.pos += 1;
        token
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Token::Ident(word) if word.eq_ignore_ascii_case(keyword))
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        if self.is_keyword(keyword) {
            self.pos += 1;
            Ok(())
        } else {
            Err(Error::Parse(format!(
                "expected {}, got {}",
                keyword,
                describe(self.peek())
            )))
        }
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        if *self.peek() == expected {
            self.pos += 1;
            Ok(())
        } else {
            Err(Error::Parse(format!(
                "expected {}, got {}",
                describe(&expected),
                describe(self.peek())
            )))
        }
    }

    fn identifier(&mut self) -> Result<String> {
        match self.advance() {
            Token::Ident(name) => Ok(name),
            other => Err(Error::Parse(format!(
                "expected identifier, got {}",
                describe(&other)
            ))),
        }
    }

    /// Parses `item (, item)*`.
    fn comma_list<T>(&mut self, mut item: impl FnMut(&mut Self) -> Result<T>) -> Result<Vec<T>> {
        let mut items = vec![item(self)?];
        while *self.peek() == Token::Comma {
            self.pos += 1;
            items.push(item(self)?);
        }
        Ok(items)
    }

    fn statement(&mut self) -> Result<Statement> {
        let stmt = if self.is_keyword("CREATE") {
            self.create()?
        } else if self.is_keyword("INSERT") {
            self.insert()?
        } else if self.is_keyword("SELECT") {
            self.select()?
        } else {
            return Err(Error::Parse(format!(
                "unexpected {} at start of statement",
                describe(self.peek())
            )));
        };

        if *self.peek() == Token::Semicolon {
            self.pos += 1;
        }
        if *self.peek() != Token::Eof {
            return Err(Error::Parse(format!(
                "unexpected {} after end of statement",
                describe(self.peek())
            )));
        }
        Ok(stmt)
    }

    fn create(&mut self) -> Result<Statement> {
        self.expect_keyword("CREATE")?;
        self.expect_keyword("TABLE")?;
        let table = self.identifier()?;
        self.expect(Token::LeftParen)?;
        let columns = self.comma_list(|p| {
            let name = p.identifier()?;
            let type_name = p.identifier()?;
            let data_type = type_name
                .parse::<DataType>()
                .map_err(|_| Error::Parse(format!("unknown column type: {}", type_name)))?;
            Ok(ColumnDefinition::new(name, data_type))
        })?;
        self.expect(Token::RightParen)?;

        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.name.to_ascii_lowercase()) {
                return Err(Error::Parse(format!(
                    "duplicate column name: {}",
                    column.name
                )));
            }
        }

        Ok(Statement::Create { table, columns })
    }

    fn insert(&mut self) -> Result<Statement> {
        self.expect_keyword("INSERT")?;
        self.expect_keyword("INTO")?;
        let table = self.identifier()?;
        self.expect_keyword("VALUES")?;
        self.expect(Token::LeftParen)?;
        let values = self.comma_list(|p| match p.advance() {
            Token::Integer(n) => Ok(Value::Int(n)),
            Token::Str(bytes) => Ok(Value::Text(bytes)),
            other => Err(Error::Parse(format!(
                "expected literal value, got {}",
                describe(&other)
            ))),
        })?;
        self.expect(Token::RightParen)?;
        Ok(Statement::Insert { table, values })
    }

    fn select(&mut self) -> Result<Statement> {
        self.expect_keyword("SELECT")?;
        let projection = if *self.peek() == Token::Star {
            self.pos += 1;
            Projection::All
        } else {
            Projection::Columns(self.comma_list(Self::identifier)?)
        };
        self.expect_keyword("FROM")?;
        let table = self.identifier()?;

        let rowid = if self.is_keyword("WHERE") {
            self.pos += 1;
            self.expect_keyword("ROWID")?;
            self.expect(Token::Eq)?;
            match self.advance() {
                Token::Integer(n) => Some(n),
                other => {
                    return Err(Error::Parse(format!(
                        "expected integer row id, got {}",
                        describe(&other)
                    )))
                }
            }
        } else {
            None
        };

        Ok(Statement::Select {
            table,
            projection,
            rowid,
        })
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Ident(name) => format!("'{}'", name),
        Token::Integer(n) => n.to_string(),
        Token::Str(_) => "string literal".to_string(),
        Token::LeftParen => "'('".to_string(),
        Token::RightParen => "')'".to_string(),
        Token::Comma => "','".to_string(),
        Token::Semicolon => "';'".to_string(),
        Token::Star => "'*'".to_string(),
        Token::Eq => "'='".to_string(),
        Token::Eof => "end of input".to_string(),
    }
}

/// Parses one statement, with an optional trailing `;`.
pub fn parse(sql: &str) -> Result<Statement> {
    let tokens = tokenize(sql)?;
    Parser { tokens, pos: 0 }.statement()
}
