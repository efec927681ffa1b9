use approxsql_common::{Error, Result, SampleKind, TableName};
use sqlparser::ast;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer};

/// One classified input statement.
#[derive(Debug, Clone, PartialEq)]
pub enum AqpStatement {
    Select(Box<ast::Query>),
    CreateSample(CreateSample),
    DropSample(DropSample),
    ShowSamples { table: Option<TableName> },
    /// Current session settings as key/value rows.
    ShowConfig,
    Set { key: String, value: String },
    /// Reload the sample catalog from the engine.
    Refresh,
    /// Any other statement, executed verbatim.
    Passthrough(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateSample {
    pub table: TableName,
    pub kind: SampleKind,
    /// `None` means the configured default ratio.
    pub ratio: Option<f64>,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DropSample {
    pub table: TableName,
    /// `None` drops every sample of the table.
    pub kind: Option<SampleKind>,
}

pub fn parse_statement(sql: &str) -> Result<AqpStatement> {
    let dialect = GenericDialect {};
    let tokens = Tokenizer::new(&dialect, sql)
        .tokenize()
        .map_err(|e| Error::parse_error(e.to_string()))?;
    let mut cursor = TokenCursor::new(tokens);

    let first = cursor.peek_keyword();
    let statement = match first.as_deref() {
        Some("CREATE") => cursor.create_sample()?.map(AqpStatement::CreateSample),
        Some("DROP") => cursor.drop_sample()?.map(AqpStatement::DropSample),
        Some("SHOW") => cursor.show()?,
        Some("SET") => Some(cursor.set()?),
        Some("REFRESH") => cursor.refresh()?,
        _ => None,
    };
    if let Some(statement) = statement {
        return Ok(statement);
    }

    let looks_like_query =
        matches!(first.as_deref(), Some("SELECT") | Some("WITH")) || cursor.starts_with(&Token::LParen);
    match Parser::parse_sql(&dialect, sql) {
        Ok(mut statements) => match statements.len() {
            0 => Err(Error::parse_error("empty statement")),
            1 => match statements.remove(0) {
                ast::Statement::Query(query) => Ok(AqpStatement::Select(query)),
                _ => Ok(AqpStatement::Passthrough(sql.trim().to_string())),
            },
            n => Err(Error::parse_error(format!(
                "expected a single statement, found {}",
                n
            ))),
        },
        Err(e) if looks_like_query => Err(Error::parse_error(e.to_string())),
        Err(e) => {
            log::debug!("passing through statement sqlparser rejected: {}", e);
            Ok(AqpStatement::Passthrough(sql.trim().to_string()))
        }
    }
}

struct TokenCursor {
    tokens: Vec<Token>,
    pos: usize,
}

impl TokenCursor {
    fn new(tokens: Vec<Token>) -> Self {
        let tokens = tokens
            .into_iter()
            .filter(|t| !matches!(t, Token::Whitespace(_)))
            .collect();
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn starts_with(&self, token: &Token) -> bool {
        self.tokens.first() == Some(token)
    }

    /// Upper-cased unquoted word at the cursor.
    fn peek_keyword(&self) -> Option<String> {
        match self.peek() {
            Some(Token::Word(w)) if w.quote_style.is_none() => Some(w.value.to_uppercase()),
            _ => None,
        }
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword().as_deref() == Some(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_sample_keyword(&mut self) -> bool {
        self.eat_keyword("SAMPLE") || self.eat_keyword("SAMPLES")
    }

    fn identifier(&mut self) -> Result<String> {
        match self.peek() {
            Some(Token::Word(w)) => {
                let value = if w.quote_style.is_some() {
                    w.value.clone()
                } else {
                    w.value.to_lowercase()
                };
                self.advance();
                Ok(value)
            }
            other => Err(Error::parse_error(format!(
                "expected an identifier, found {}",
                describe(other)
            ))),
        }
    }

    fn table_name(&mut self) -> Result<TableName> {
        let mut parts = vec![self.identifier()?];
        while self.eat(&Token::Period) {
            parts.push(self.identifier()?);
        }
        match parts.as_slice() {
            [table] => Ok(TableName::bare(table)),
            [.., schema, table] => Ok(TableName::new(Some(schema.as_str()), table)),
            [] => Err(Error::parse_error("expected a table name")),
        }
    }

    fn column_list(&mut self) -> Result<Vec<String>> {
        let parenthesized = self.eat(&Token::LParen);
        let mut columns = vec![self.identifier()?];
        while self.eat(&Token::Comma) {
            columns.push(self.identifier()?);
        }
        if parenthesized && !self.eat(&Token::RParen) {
            return Err(Error::parse_error(format!(
                "expected ')' after column list, found {}",
                describe(self.peek())
            )));
        }
        Ok(columns)
    }

    /// `<n>%` as a percentage, or a bare fraction.
    fn ratio(&mut self) -> Result<Option<f64>> {
        let Some(Token::Number(text, _)) = self.peek() else {
            return Ok(None);
        };
        let value: f64 = text
            .parse()
            .map_err(|_| Error::parse_error(format!("invalid sample ratio {}", text)))?;
        self.advance();
        let ratio = if self.eat(&Token::Mod) { value / 100.0 } else { value };
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(Error::parse_error(format!(
                "sample ratio must be in (0, 1], got {}",
                ratio
            )));
        }
        Ok(Some(ratio))
    }

    fn sample_kind(&mut self) -> Option<SampleKind> {
        let kind = self.peek_keyword()?.parse::<SampleKind>().ok()?;
        self.advance();
        Some(kind)
    }

    fn finish(&mut self) -> Result<()> {
        while self.eat(&Token::SemiColon) {}
        match self.peek() {
            None | Some(Token::EOF) => Ok(()),
            other => Err(Error::parse_error(format!(
                "unexpected {} at end of statement",
                describe(other)
            ))),
        }
    }

    fn create_sample(&mut self) -> Result<Option<CreateSample>> {
        self.advance();
        let ratio = self.ratio()?;
        let kind = self.sample_kind();
        if !self.eat_sample_keyword() {
            return Ok(None);
        }
        self.eat_keyword("OF");
        let table = self.table_name()?;
        let columns = if self.eat_keyword("ON") {
            self.column_list()?
        } else {
            Vec::new()
        };
        self.finish()?;

        let kind = kind.unwrap_or(SampleKind::Uniform);
        match kind {
            SampleKind::Uniform if !columns.is_empty() => {
                return Err(Error::parse_error("uniform samples take no ON columns"));
            }
            SampleKind::Universe if columns.len() != 1 => {
                return Err(Error::parse_error(
                    "universe samples require exactly one ON column",
                ));
            }
            SampleKind::Stratified if columns.is_empty() => {
                return Err(Error::parse_error(
                    "stratified samples require at least one ON column",
                ));
            }
            _ => {}
        }
        Ok(Some(CreateSample {
            table,
            kind,
            ratio,
            columns,
        }))
    }

    fn drop_sample(&mut self) -> Result<Option<DropSample>> {
        self.advance();
        let kind = self.sample_kind();
        if !self.eat_sample_keyword() {
            return Ok(None);
        }
        self.eat_keyword("OF");
        let table = self.table_name()?;
        self.finish()?;
        Ok(Some(DropSample { table, kind }))
    }

    fn show(&mut self) -> Result<Option<AqpStatement>> {
        self.advance();
        if self.eat_keyword("CONFIG") {
            self.finish()?;
            return Ok(Some(AqpStatement::ShowConfig));
        }
        if !self.eat_keyword("SAMPLES") {
            return Ok(None);
        }
        let table = if self.eat_keyword("OF") {
            Some(self.table_name()?)
        } else {
            None
        };
        self.finish()?;
        Ok(Some(AqpStatement::ShowSamples { table }))
    }

    /// `REFRESH [SAMPLES]`. Anything longer is left to the engine.
    fn refresh(&mut self) -> Result<Option<AqpStatement>> {
        self.advance();
        self.eat_sample_keyword();
        if !matches!(self.peek(), None | Some(Token::EOF) | Some(Token::SemiColon)) {
            return Ok(None);
        }
        self.finish()?;
        Ok(Some(AqpStatement::Refresh))
    }

    fn set(&mut self) -> Result<AqpStatement> {
        self.advance();
        let mut key = self.identifier()?;
        while self.eat(&Token::Period) {
            key.push('.');
            key.push_str(&self.identifier()?);
        }
        if !self.eat(&Token::Eq) && !self.eat_keyword("TO") {
            return Err(Error::parse_error(format!(
                "expected '=' after SET {}, found {}",
                key,
                describe(self.peek())
            )));
        }
        let value = match self.peek() {
            Some(Token::Word(w)) => w.value.clone(),
            Some(Token::Number(n, _)) => n.clone(),
            Some(Token::SingleQuotedString(s)) | Some(Token::DoubleQuotedString(s)) => s.clone(),
            other => {
                return Err(Error::parse_error(format!(
                    "expected a value for SET {}, found {}",
                    key,
                    describe(other)
                )));
            }
        };
        self.advance();
        self.finish()?;
        Ok(AqpStatement::Set { key, value })
    }
}

fn describe(token: Option<&Token>) -> String {
    match token {
        None | Some(Token::EOF) => "end of input".to_string(),
        Some(token) => format!("'{}'", token),
    }
}
