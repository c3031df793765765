use crate::error::{DbError, DbResult};
use crate::sql::ast::Statement;
use crate::storage::row::Row;

/// Parse one statement line. Tokens are whitespace-separated, the verb is
/// case-insensitive, and column values are validated against their
/// fixed-width buffers before anything touches the table.
pub fn parse_statement(input: &str) -> DbResult<Statement> {
    let tokens: Vec<&str> = input.split_whitespace().collect();
    let Some(verb) = tokens.first() else {
        return Err(DbError::InvalidStatement);
    };
    match verb.to_uppercase().as_str() {
        "INSERT" => {
            // insert 1 john john@example.com
            if tokens.len() < 4 {
                return Err(DbError::InvalidStatement);
            }
            let id: i32 = tokens[1].parse().map_err(|_| DbError::InvalidStatement)?;
            let row = Row::new(id, tokens[2], tokens[3])?;
            Ok(Statement::Insert { row })
        }
        "SELECT" => Ok(Statement::Select),
        _ => Err(DbError::InvalidStatement),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_insert() {
        let stmt = parse_statement("insert 1 john john@example.com").unwrap();
        let Statement::Insert { row } = stmt else {
            panic!("expected insert");
        };
        assert_eq!(row.id, 1);
        assert_eq!(row.name_str(), "john");
        assert_eq!(row.email_str(), "john@example.com");
    }

    #[test]
    fn parses_select_case_insensitively() {
        assert_eq!(parse_statement("SELECT").unwrap(), Statement::Select);
        assert_eq!(parse_statement("select").unwrap(), Statement::Select);
    }

    #[test]
    fn rejects_unknown_verbs_and_short_inserts() {
        assert!(matches!(
            parse_statement("UPDATE foo"),
            Err(DbError::InvalidStatement)
        ));
        assert!(matches!(
            parse_statement("insert 1"),
            Err(DbError::InvalidStatement)
        ));
        assert!(matches!(
            parse_statement("insert x john j@e.com"),
            Err(DbError::InvalidStatement)
        ));
        assert!(matches!(parse_statement("  "), Err(DbError::InvalidStatement)));
    }
}
