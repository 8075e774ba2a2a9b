//! Scannerless recursive-descent parser for the query language.

use super::{ArithOp, CmpOp, Query, Term};
use crate::types::{GbdError, Result};

/// Parse `text` into a query; blank input yields `None`.
pub fn parse(text: &str) -> Result<Option<Query>> {
    let mut parser = Parser::new(text);
    parser.skip_whitespace();
    if parser.at_end() {
        return Ok(None);
    }
    let query = parser.disjunction()?;
    parser.skip_whitespace();
    if !parser.at_end() {
        return Err(parser.error("expected 'and', 'or' or end of query"));
    }
    Ok(Some(query))
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic()
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Characters allowed in unquoted values and like patterns.
fn is_value_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-' | b'/' | b',' | b':')
}

fn is_number(token: &str) -> bool {
    let digits = token.strip_prefix('-').unwrap_or(token);
    let (int, frac) = match digits.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (digits, None),
    };
    !int.is_empty()
        && int.bytes().all(|b| b.is_ascii_digit())
        && frac.is_none_or(|f| f.bytes().all(|b| b.is_ascii_digit()))
}

struct Parser<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
        }
    }

    fn error(&self, message: impl Into<String>) -> GbdError {
        GbdError::Parser {
            query: self.source.to_string(),
            position: self.pos,
            message: message.into(),
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, token: &str) -> bool {
        self.skip_whitespace();
        if self.bytes[self.pos..].starts_with(token.as_bytes()) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &str) -> Result<()> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{token}'")))
        }
    }

    /// Case-insensitive keyword followed by a non-identifier byte.
    fn eat_keyword(&mut self, keyword: &str) -> bool {
        self.skip_whitespace();
        let end = self.pos + keyword.len();
        let matches = self
            .bytes
            .get(self.pos..end)
            .is_some_and(|s| s.eq_ignore_ascii_case(keyword.as_bytes()))
            && !self.bytes.get(end).copied().is_some_and(is_ident_char);
        if matches {
            self.pos = end;
        }
        matches
    }

    fn take_while(&mut self, pred: impl Fn(u8) -> bool) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(&pred) {
            self.pos += 1;
        }
        &self.source[start..self.pos]
    }

    // =========================================================================
    // BOOLEAN STRUCTURE
    // =========================================================================

    fn disjunction(&mut self) -> Result<Query> {
        let mut left = self.conjunction()?;
        while self.eat_keyword("or") {
            let right = self.conjunction()?;
            left = Query::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn conjunction(&mut self) -> Result<Query> {
        let mut left = self.primary()?;
        while self.eat_keyword("and") {
            let right = self.primary()?;
            left = Query::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn primary(&mut self) -> Result<Query> {
        self.skip_whitespace();
        if self.peek() != Some(b'(') {
            return self.constraint();
        }
        // `(` opens either a sub-query or a parenthesized arithmetic term
        let start = self.pos;
        let group = self.group();
        match group {
            Ok(query) => Ok(query),
            Err(group_err) => {
                let group_pos = self.pos;
                self.pos = start;
                self.constraint().map_err(|err| {
                    if group_pos > self.pos { group_err } else { err }
                })
            }
        }
    }

    fn group(&mut self) -> Result<Query> {
        self.expect("(")?;
        let inner = self.disjunction()?;
        self.expect(")")?;
        Ok(Query::Group(Box::new(inner)))
    }

    // =========================================================================
    // CONSTRAINTS
    // =========================================================================

    fn constraint(&mut self) -> Result<Query> {
        self.skip_whitespace();
        let start = self.pos;
        if self.peek().is_some_and(is_ident_start) {
            let feature = self.identifier()?;
            if self.eat_keyword("like") {
                return self.like(feature, false);
            }
            if self.eat_keyword("unlike") {
                return self.like(feature, true);
            }
            if self.eat("!=") {
                return self.string_or_compare(feature, true);
            }
            if self.eat("=") {
                return self.string_or_compare(feature, false);
            }
            self.pos = start;
        }
        self.compare()
    }

    /// Right-hand side of `feature =` / `feature !=`.
    fn string_or_compare(&mut self, feature: String, negated: bool) -> Result<Query> {
        self.skip_whitespace();
        let op = if negated { CmpOp::Ne } else { CmpOp::Eq };
        match self.peek() {
            Some(b'\'') => {
                let value = self.quoted()?;
                Ok(Query::Str {
                    feature,
                    negated,
                    value,
                })
            }
            Some(b'(') => Ok(Query::Compare {
                left: Term::Feature(feature),
                op,
                right: self.sum()?,
            }),
            _ => {
                let start = self.pos;
                let token = self.take_while(is_value_char);
                if token.is_empty() {
                    return Err(self.error("expected value"));
                }
                if is_number(token) {
                    self.pos = start;
                    return Ok(Query::Compare {
                        left: Term::Feature(feature),
                        op,
                        right: self.sum()?,
                    });
                }
                Ok(Query::Str {
                    feature,
                    negated,
                    value: token.to_string(),
                })
            }
        }
    }

    fn like(&mut self, feature: String, negated: bool) -> Result<Query> {
        self.skip_whitespace();
        let mut pattern = String::new();
        if self.eat("%") {
            pattern.push('%');
        }
        let body = self.take_while(is_value_char);
        if body.is_empty() {
            return Err(self.error("expected like pattern"));
        }
        pattern.push_str(body);
        if self.peek() == Some(b'%') {
            self.pos += 1;
            pattern.push('%');
        }
        Ok(Query::Like {
            feature,
            negated,
            pattern,
        })
    }

    fn quoted(&mut self) -> Result<String> {
        self.expect("'")?;
        let mut value = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated string")),
                Some(b'\'') if self.bytes.get(self.pos + 1) == Some(&b'\'') => {
                    value.push('\'');
                    self.pos += 2;
                }
                Some(b'\'') => {
                    self.pos += 1;
                    return Ok(value);
                }
                Some(_) => {
                    let rest = &self.source[self.pos..];
                    let end = rest.find('\'').unwrap_or(rest.len());
                    value.push_str(&rest[..end]);
                    self.pos += end;
                }
            }
        }
    }

    fn compare(&mut self) -> Result<Query> {
        let left = self.sum()?;
        let op = self.comparison_operator()?;
        let right = self.sum()?;
        Ok(Query::Compare { left, op, right })
    }

    fn comparison_operator(&mut self) -> Result<CmpOp> {
        for (token, op) in [
            ("!=", CmpOp::Ne),
            ("<=", CmpOp::Le),
            (">=", CmpOp::Ge),
            ("=", CmpOp::Eq),
            ("<", CmpOp::Lt),
            (">", CmpOp::Gt),
        ] {
            if self.eat(token) {
                return Ok(op);
            }
        }
        Err(self.error("expected comparison operator"))
    }

    // =========================================================================
    // ARITHMETIC
    // =========================================================================

    fn sum(&mut self) -> Result<Term> {
        let mut left = self.product()?;
        loop {
            let op = if self.eat("+") {
                ArithOp::Add
            } else if self.eat("-") {
                ArithOp::Sub
            } else {
                return Ok(left);
            };
            let right = self.product()?;
            left = Term::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
    }

    fn product(&mut self) -> Result<Term> {
        let mut left = self.atom()?;
        loop {
            let op = if self.eat("*") {
                ArithOp::Mul
            } else if self.eat("/") {
                ArithOp::Div
            } else {
                return Ok(left);
            };
            let right = self.atom()?;
            left = Term::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
    }

    fn atom(&mut self) -> Result<Term> {
        self.skip_whitespace();
        match self.peek() {
            Some(b'(') => {
                self.pos += 1;
                let inner = self.sum()?;
                self.expect(")")?;
                Ok(inner)
            }
            Some(b) if b.is_ascii_digit() || b == b'-' || b == b'.' => self.number(),
            Some(b) if is_ident_start(b) => Ok(Term::Feature(self.identifier()?)),
            _ => Err(self.error("expected number, feature or '('")),
        }
    }

    fn number(&mut self) -> Result<Term> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        self.take_while(|b| b.is_ascii_digit());
        if self.peek() == Some(b'.') {
            self.pos += 1;
            self.take_while(|b| b.is_ascii_digit());
        }
        let token = &self.source[start..self.pos];
        if !is_number(token) {
            self.pos = start;
            return Err(self.error("malformed number"));
        }
        Ok(Term::Number(token.to_string()))
    }

    /// `name` or `qualifier:name`.
    fn identifier(&mut self) -> Result<String> {
        self.skip_whitespace();
        if !self.peek().is_some_and(is_ident_start) {
            return Err(self.error("expected feature name"));
        }
        let first = self.take_while(is_ident_char);
        if self.peek() == Some(b':') && self.bytes.get(self.pos + 1).copied().is_some_and(is_ident_start) {
            self.pos += 1;
            let second = self.take_while(is_ident_char);
            return Ok(format!("{first}:{second}"));
        }
        Ok(first.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn features(text: &str) -> BTreeSet<String> {
        parse(text)
            .expect("parse")
            .expect("non-empty")
            .features()
    }

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn blank_query_is_none() {
        assert_eq!(parse("").expect("empty"), None);
        assert_eq!(parse("   ").expect("blank"), None);
    }

    #[test]
    fn nesting() {
        assert_eq!(features("a = 1"), set(&["a"]));
        assert_eq!(features("a = 1 and b = 2"), set(&["a", "b"]));
        assert_eq!(features("a = 1 and (b = 2 or c = 3)"), set(&["a", "b", "c"]));
        assert_eq!(features("(b = 2 or c = 3) and a = 1"), set(&["a", "b", "c"]));
    }

    #[test]
    fn string_constraints() {
        assert_eq!(features("a = val1"), set(&["a"]));
        assert_eq!(features("a = val1 and b != val2"), set(&["a", "b"]));
        assert_eq!(features("a like val1"), set(&["a"]));
        assert_eq!(features("a like val%"), set(&["a"]));
        assert_eq!(features("a like %val"), set(&["a"]));
        assert_eq!(features("a like %val%"), set(&["a"]));
        assert_eq!(features("a like val% and b unlike val%"), set(&["a", "b"]));
        assert_eq!(features("a = 'with space'"), set(&["a"]));
    }

    #[test]
    fn percent_is_not_a_value() {
        let err = parse("a = %val%").expect_err("percent");
        assert!(matches!(
            err,
            GbdError::Parser { ref query, position: 4, .. } if query == "a = %val%"
        ));
    }

    #[test]
    fn arithmetic_constraints() {
        assert_eq!(features("a = (1 + 2)"), set(&["a"]));
        assert_eq!(features("a = (1 - 2)"), set(&["a"]));
        assert_eq!(features("a = ((1 + 2) / b)"), set(&["a", "b"]));
        assert_eq!(features("a = (b)"), set(&["a", "b"]));
        // bare identifier on the right of `=` is a string value
        assert_eq!(features("a = b"), set(&["a"]));
        assert_eq!(features("a < b"), set(&["a", "b"]));
        assert_eq!(features("(clauses_horn / clauses) > 0.9"), set(&["clauses", "clauses_horn"]));
    }

    #[test]
    fn explicit_context() {
        assert_eq!(features("c:a = 1"), set(&["c:a"]));
        assert_eq!(features("c:a = 1 and d:b = 2"), set(&["c:a", "d:b"]));
    }

    #[test]
    fn keywords_are_case_insensitive() {
        let q = parse("a = 1 AND b LIKE x% Or c = y").expect("parse").expect("query");
        assert!(q.is_disjunction());
        assert_eq!(q.features(), set(&["a", "b", "c"]));
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let q = parse("a = x or b = y and c = z").expect("parse").expect("query");
        let Query::Or(left, right) = q else {
            unreachable!("top level must be a disjunction");
        };
        assert!(matches!(*left, Query::Str { .. }));
        assert!(matches!(*right, Query::And(..)));
    }

    #[test]
    fn keyword_prefix_is_an_identifier() {
        assert_eq!(features("android = x and order_by = y"), set(&["android", "order_by"]));
    }

    #[test]
    fn malformed_queries_fail() {
        for text in ["a =", "a = 1 and", "(a = 1", "a like", "a ~ 1", "= 1", "a = 1 b = 2"] {
            let err = parse(text).expect_err(text);
            assert_eq!(err.kind(), "ParserError", "{text}");
        }
    }

    #[test]
    fn quoted_values_unescape_quotes() {
        let q = parse("a = 'it''s'").expect("parse").expect("query");
        assert_eq!(
            q,
            Query::Str {
                feature: "a".to_string(),
                negated: false,
                value: "it's".to_string()
            }
        );
    }

    #[test]
    fn numbers_stay_verbatim() {
        let q = parse("a >= -1.50").expect("parse").expect("query");
        assert_eq!(
            q,
            Query::Compare {
                left: Term::Feature("a".to_string()),
                op: CmpOp::Ge,
                right: Term::Number("-1.50".to_string())
            }
        );
    }
}
