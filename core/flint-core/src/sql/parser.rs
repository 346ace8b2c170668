use crate::error::{FlintError, FlintResult};
use sqlparser::ast::Statement;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::{Parser, ParserError};

/// SQL 파서: sqlparser-rs, one statement per call
pub struct SqlParser {
    dialect: GenericDialect,
    recursion_limit: usize,
}

impl SqlParser {
    pub fn new(recursion_limit: usize) -> Self {
        Self {
            dialect: GenericDialect {},
            recursion_limit,
        }
    }

    /// Parse exactly one statement; empty input and statement lists are rejected.
    pub fn parse(&self, sql: &str) -> FlintResult<Statement> {
        let mut statements = Parser::new(&self.dialect)
            .with_recursion_limit(self.recursion_limit)
            .try_with_sql(sql)
            .and_then(|mut parser| parser.parse_statements())
            .map_err(parse_error)?;
        match statements.len() {
            1 => Ok(statements.remove(0)),
            0 => Err(FlintError::SqlParse {
                message: "empty query".to_string(),
                line: 0,
                column: 0,
            }),
            n => Err(FlintError::SqlParse {
                message: format!("expected a single statement, found {n}"),
                line: 0,
                column: 0,
            }),
        }
    }
}

impl Default for SqlParser {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_PARSER_RECURSION_LIMIT)
    }
}

/// sqlparser reports positions only inside the message text
/// ("... at Line: 1, Column: 8").
fn parse_error(err: ParserError) -> FlintError {
    let message = match err {
        ParserError::TokenizerError(msg) | ParserError::ParserError(msg) => msg,
        ParserError::RecursionLimitExceeded => "query nested too deeply".to_string(),
    };
    let (line, column) = location(&message).unwrap_or((0, 0));
    FlintError::SqlParse {
        message,
        line,
        column,
    }
}

fn location(message: &str) -> Option<(u64, u64)> {
    let start = message.rfind("Line: ")?;
    let rest = &message[start + "Line: ".len()..];
    let (line, rest) = rest.split_once(", Column: ")?;
    let column: String = rest.chars().take_while(char::is_ascii_digit).collect();
    Some((line.trim().parse().ok()?, column.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlparser::ast::{SelectItem, SetExpr};

    #[test]
    fn test_parse_simple_select() {
        let statement = SqlParser::default().parse("SELECT * FROM users").unwrap();
        match statement {
            Statement::Query(query) => {
                let SetExpr::Select(select) = query.body.as_ref() else {
                    panic!("expected SELECT body");
                };
                assert_eq!(select.projection.len(), 1);
                assert!(matches!(select.projection[0], SelectItem::Wildcard(_)));
            }
            other => panic!("expected Query, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_error_has_location() {
        let err = SqlParser::default()
            .parse("SELECT a FROM t WHERE ) 1")
            .unwrap_err();
        match err {
            FlintError::SqlParse { line, column, .. } => {
                assert_eq!(line, 1);
                assert!(column > 0);
            }
            other => panic!("expected SqlParse, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_garbage_is_syntax_error() {
        let err = SqlParser::default().parse("SELEC a FRM t").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Syntax);
    }

    #[test]
    fn test_parse_rejects_empty_and_multiple() {
        let parser = SqlParser::default();
        assert!(matches!(parser.parse(""), Err(FlintError::SqlParse { .. })));
        assert!(matches!(
            parser.parse("SELECT 1; SELECT 2"),
            Err(FlintError::SqlParse { .. })
        ));
    }

    #[test]
    fn test_recursion_limit() {
        let nested = format!("SELECT {}1{}", "(".repeat(200), ")".repeat(200));
        assert!(matches!(
            SqlParser::new(32).parse(&nested),
            Err(FlintError::SqlParse { .. })
        ));
    }

    #[test]
    fn test_location_parsing() {
        assert_eq!(
            location("Expected: identifier, found: EOF at Line: 3, Column: 12"),
            Some((3, 12))
        );
        assert_eq!(location("no position"), None);
    }
}
