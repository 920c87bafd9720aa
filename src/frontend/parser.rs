use crate::error::{Error, Reason, Result, WithErrorInfo};
use crate::ir::Value;
use crate::span::Span;

use super::ast::*;
use super::lexer::{Lexer, Spanned, Token};

pub fn parse(source: &str) -> Result<Block> {
    let tokens = Lexer::new(source).tokenize()?;
    Parser { tokens, pos: 0 }.parse_block()
}

struct Parser {
    tokens: Vec<Spanned<Token>>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos].value
    }

    fn span(&self) -> Span {
        self.tokens[self.pos].span
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].value.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), Token::Eof)
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.advance() {
            Token::Ident(s) => Ok(s),
            other => Err(self.unexpected(&other, "an identifier")),
        }
    }

    /// Matches a case-insensitive keyword without consuming on mismatch.
    fn eat_keyword(&mut self, kw: &str) -> bool {
        if let Token::Ident(s) = self.peek() {
            if s.eq_ignore_ascii_case(kw) {
                self.advance();
                return true;
            }
        }
        false
    }

    fn peek_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Token::Ident(s) if s.eq_ignore_ascii_case(kw))
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<()> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            let tok = self.peek().clone();
            Err(self.unexpected(&tok, kw))
        }
    }

    fn expect(&mut self, token: Token) -> Result<()> {
        if *self.peek() == token {
            self.advance();
            Ok(())
        } else {
            let tok = self.peek().clone();
            Err(self.unexpected(&tok, &format!("{token:?}")))
        }
    }

    fn unexpected(&self, found: &Token, expected: &str) -> Error {
        Error::new(Reason::ParseError {
            message: format!("expected {expected}, found {found:?}"),
        })
        .with_span(Some(self.span()))
    }

    fn parse_block(&mut self) -> Result<Block> {
        let mut statements = Vec::new();
        while !self.at_eof() {
            statements.push(self.parse_statement()?);
            while matches!(self.peek(), Token::Semicolon) {
                self.advance();
            }
        }
        Ok(Block { statements })
    }

    fn parse_statement(&mut self) -> Result<Statement> {
        let start = self.span();
        if self.eat_keyword("DISP") {
            let variable = self.expect_ident()?;
            return Ok(Statement {
                kind: StatementKind::Disp { variable },
                span: self.span_from(start),
            });
        }
        if self.eat_keyword("EXPLAIN") {
            let variable = self.expect_ident()?;
            return Ok(Statement {
                kind: StatementKind::Explain { variable },
                span: self.span_from(start),
            });
        }

        let target = self.expect_ident()?;
        self.expect(Token::Assign)?;
        let source = self.parse_source()?;
        Ok(Statement {
            kind: StatementKind::Assign { target, source },
            span: self.span_from(start),
        })
    }

    fn span_from(&self, start: Span) -> Span {
        Span::new(start.start, self.tokens[self.pos.saturating_sub(1)].span.end)
    }

    fn parse_source(&mut self) -> Result<Source> {
        if self.eat_keyword("NEW") {
            return self.parse_new();
        }
        if self.eat_keyword("GET") {
            return self.parse_get();
        }
        if self.eat_keyword("FIND") {
            return self.parse_find();
        }
        if self.eat_keyword("APPLY") {
            return self.parse_apply();
        }
        // Otherwise: a variable transform, `base [ATTR ...] clauses`.
        let base_variable = self.expect_ident()?;
        let attrs = if self.eat_keyword("ATTR") {
            Some(self.parse_ident_list()?)
        } else {
            None
        };
        let clauses = self.parse_clauses()?;
        Ok(Source::Transform {
            base_variable,
            attrs,
            clauses,
        })
    }

    fn parse_new(&mut self) -> Result<Source> {
        let entity_type = if matches!(self.peek(), Token::Ident(_)) {
            Some(self.expect_ident()?)
        } else {
            None
        };
        self.expect(Token::LBracket)?;
        let mut rows = Vec::new();
        if !matches!(self.peek(), Token::RBracket) {
            rows.push(self.parse_json_obj()?);
            while matches!(self.peek(), Token::Comma) {
                self.advance();
                rows.push(self.parse_json_obj()?);
            }
        }
        self.expect(Token::RBracket)?;
        Ok(Source::New { entity_type, rows })
    }

    fn parse_json_obj(&mut self) -> Result<Vec<(String, Value)>> {
        self.expect(Token::LBrace)?;
        let mut pairs = Vec::new();
        if !matches!(self.peek(), Token::RBrace) {
            pairs.push(self.parse_json_pair()?);
            while matches!(self.peek(), Token::Comma) {
                self.advance();
                pairs.push(self.parse_json_pair()?);
            }
        }
        self.expect(Token::RBrace)?;
        Ok(pairs)
    }

    fn parse_json_pair(&mut self) -> Result<(String, Value)> {
        let key = match self.advance() {
            Token::Ident(s) => s,
            Token::Str(s) => s,
            other => return Err(self.unexpected(&other, "a field name")),
        };
        self.expect(Token::Colon)?;
        let value = self.parse_value()?;
        Ok((key, value))
    }

    fn parse_value(&mut self) -> Result<Value> {
        match self.advance() {
            Token::Str(s) => Ok(Value::Str(s)),
            Token::Int(i) => Ok(Value::Int(i)),
            Token::Float(f) => Ok(Value::Float(f)),
            Token::Ident(s) if s.eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
            Token::Ident(s) if s.eq_ignore_ascii_case("false") => Ok(Value::Bool(false)),
            Token::Ident(s) if s.eq_ignore_ascii_case("null") => Ok(Value::Null),
            other => Err(self.unexpected(&other, "a value")),
        }
    }

    fn parse_ident_list(&mut self) -> Result<Vec<String>> {
        let mut out = vec![self.expect_ident()?];
        while matches!(self.peek(), Token::Comma) {
            self.advance();
            out.push(self.expect_ident()?);
        }
        Ok(out)
    }

    fn parse_get(&mut self) -> Result<Source> {
        let entity_type = self.expect_ident()?;
        self.expect_keyword("FROM")?;
        let datasource = self.expect_ident()?;
        let clauses = self.parse_clauses()?;
        Ok(Source::Get {
            entity_type,
            datasource,
            clauses,
        })
    }

    fn parse_find(&mut self) -> Result<Source> {
        let relation = self.expect_ident()?;
        let entity_type = self.expect_ident()?;
        self.expect_keyword("BY")?;
        let base_variable = self.expect_ident()?;
        let clauses = self.parse_clauses()?;
        Ok(Source::Find {
            relation,
            entity_type,
            base_variable,
            clauses,
        })
    }

    fn parse_apply(&mut self) -> Result<Source> {
        let analytic = self.expect_ident()?;
        self.expect_keyword("ON")?;
        let on_variable = self.expect_ident()?;
        let mut args = Vec::new();
        if self.eat_keyword("WITH") {
            args.push(self.parse_kv_pair()?);
            while matches!(self.peek(), Token::Comma) {
                self.advance();
                args.push(self.parse_kv_pair()?);
            }
        }
        Ok(Source::Apply {
            analytic,
            on_variable,
            args,
        })
    }

    fn parse_kv_pair(&mut self) -> Result<(String, Value)> {
        let key = self.expect_ident()?;
        self.expect(Token::Assign)?;
        let value = self.parse_value()?;
        Ok((key, value))
    }

    fn parse_clauses(&mut self) -> Result<Clauses> {
        let mut clauses = Clauses::default();
        if self.eat_keyword("WHERE") {
            clauses.filter = Some(self.parse_bool_expr()?);
        }
        if self.eat_keyword("START") {
            let start = self.expect_string_or_ident()?;
            self.expect_keyword("STOP")?;
            let stop = self.expect_string_or_ident()?;
            clauses.timespan = Some(TimespanAst::Absolute { start, stop });
        } else if self.eat_keyword("LAST") {
            let amount = self.expect_int()?;
            let unit = self.expect_ident()?;
            clauses.timespan = Some(TimespanAst::Relative { amount, unit });
        }
        if self.eat_keyword("SORT") {
            self.expect_keyword("BY")?;
            let field = self.expect_ident()?;
            let ascending = if self.eat_keyword("DESC") {
                false
            } else {
                self.eat_keyword("ASC");
                true
            };
            clauses.sort = Some((field, ascending));
        }
        if self.eat_keyword("LIMIT") {
            clauses.limit = Some(self.expect_int()? as u64);
        }
        if self.eat_keyword("OFFSET") {
            clauses.offset = Some(self.expect_int()? as u64);
        }
        Ok(clauses)
    }

    fn expect_int(&mut self) -> Result<i64> {
        match self.advance() {
            Token::Int(i) => Ok(i),
            other => Err(self.unexpected(&other, "an integer")),
        }
    }

    fn expect_string_or_ident(&mut self) -> Result<String> {
        match self.advance() {
            Token::Str(s) => Ok(s),
            Token::Ident(s) => Ok(s),
            other => Err(self.unexpected(&other, "a timestamp")),
        }
    }

    fn parse_bool_expr(&mut self) -> Result<BoolExprAst> {
        let mut lhs = self.parse_bool_term()?;
        while self.peek_keyword("OR") {
            self.advance();
            let rhs = self.parse_bool_term()?;
            lhs = BoolExprAst::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_bool_term(&mut self) -> Result<BoolExprAst> {
        let mut lhs = self.parse_bool_factor()?;
        while self.peek_keyword("AND") {
            self.advance();
            let rhs = self.parse_bool_factor()?;
            lhs = BoolExprAst::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_bool_factor(&mut self) -> Result<BoolExprAst> {
        if matches!(self.peek(), Token::LParen) {
            self.advance();
            let inner = self.parse_bool_expr()?;
            self.expect(Token::RParen)?;
            return Ok(inner);
        }
        Ok(BoolExprAst::Comparison(self.parse_comparison()?))
    }

    fn parse_comparison(&mut self) -> Result<ComparisonAst> {
        let start = self.span();
        let field = self.parse_field_path()?;
        let op = self.parse_operator()?;
        let rhs = self.parse_comparison_rhs()?;
        Ok(ComparisonAst {
            field,
            op,
            rhs,
            span: self.span_from(start),
        })
    }

    fn parse_field_path(&mut self) -> Result<String> {
        let mut path = self.expect_ident()?;
        while matches!(self.peek(), Token::Dot) {
            self.advance();
            path.push('.');
            path.push_str(&self.expect_ident()?);
        }
        Ok(path)
    }

    fn parse_operator(&mut self) -> Result<String> {
        match self.peek().clone() {
            Token::Eq => {
                self.advance();
                Ok("=".to_string())
            }
            Token::Ne => {
                self.advance();
                Ok("!=".to_string())
            }
            Token::Lt => {
                self.advance();
                Ok("<".to_string())
            }
            Token::Le => {
                self.advance();
                Ok("<=".to_string())
            }
            Token::Gt => {
                self.advance();
                Ok(">".to_string())
            }
            Token::Ge => {
                self.advance();
                Ok(">=".to_string())
            }
            Token::Ident(ref s) if s.eq_ignore_ascii_case("NOT") => {
                self.advance();
                let next = self.expect_ident()?;
                Ok(format!("NOT {}", next.to_ascii_uppercase()))
            }
            Token::Ident(s) => {
                self.advance();
                Ok(s.to_ascii_uppercase())
            }
            other => Err(self.unexpected(&other, "a comparison operator")),
        }
    }

    fn parse_comparison_rhs(&mut self) -> Result<ComparisonRhs> {
        if matches!(self.peek(), Token::LBracket) {
            self.advance();
            let mut values = vec![self.parse_value()?];
            while matches!(self.peek(), Token::Comma) {
                self.advance();
                values.push(self.parse_value()?);
            }
            self.expect(Token::RBracket)?;
            return Ok(ComparisonRhs::ValueList(values));
        }
        if let Token::Ident(_) = self.peek() {
            // Could be `variable.field` (a reference) or a bare value like
            // `true`/`null`; look ahead for the dot to disambiguate.
            if matches!(self.tokens.get(self.pos + 1).map(|t| &t.value), Some(Token::Dot)) {
                let variable = self.expect_ident()?;
                self.expect(Token::Dot)?;
                let field = self.expect_ident()?;
                return Ok(ComparisonRhs::Reference { variable, field });
            }
        }
        Ok(ComparisonRhs::Value(self.parse_value()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_get_with_filter_and_limit() {
        let block = parse("procs = GET process FROM ds WHERE pid = 4 LIMIT 10").unwrap();
        assert_eq!(block.statements.len(), 1);
        match &block.statements[0].kind {
            StatementKind::Assign { target, source } => {
                assert_eq!(target, "procs");
                match source {
                    Source::Get { entity_type, datasource, clauses } => {
                        assert_eq!(entity_type, "process");
                        assert_eq!(datasource, "ds");
                        assert!(clauses.filter.is_some());
                        assert_eq!(clauses.limit, Some(10));
                    }
                    _ => panic!("expected Get"),
                }
            }
            _ => panic!("expected assignment"),
        }
    }

    #[test]
    fn parses_reference_comparison() {
        let block = parse("x = procs WHERE pid IN newvar.pid").unwrap();
        match &block.statements[0].kind {
            StatementKind::Assign { source: Source::Transform { clauses, .. }, .. } => {
                let filter = clauses.filter.as_ref().unwrap();
                match filter {
                    BoolExprAst::Comparison(c) => {
                        assert_eq!(c.op, "IN");
                        assert!(matches!(&c.rhs, ComparisonRhs::Reference { variable, field } if variable == "newvar" && field == "pid"));
                    }
                    _ => panic!("expected comparison"),
                }
            }
            _ => panic!("expected transform"),
        }
    }

    #[test]
    fn parses_new_construct() {
        let block = parse(r#"x = NEW process [{pid: 4, name: "bash"}]"#).unwrap();
        match &block.statements[0].kind {
            StatementKind::Assign { source: Source::New { entity_type, rows }, .. } => {
                assert_eq!(entity_type.as_deref(), Some("process"));
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0].len(), 2);
            }
            _ => panic!("expected New"),
        }
    }

    #[test]
    fn parses_disp() {
        let block = parse("DISP x").unwrap();
        assert!(matches!(block.statements[0].kind, StatementKind::Disp { .. }));
    }
}
