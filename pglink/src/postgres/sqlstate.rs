//! SQLSTATE error codes.
//!
//! <https://www.postgresql.org/docs/current/errcodes-appendix.html>
use std::fmt;

/// A 5 character SQLSTATE code.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SqlState([u8; 5]);

impl SqlState {
    /// Create sqlstate from raw code, returns `None` if `code` is not 5 ascii alphanumeric.
    pub fn from_code(code: &str) -> Option<SqlState> {
        let code: [u8; 5] = code.as_bytes().try_into().ok()?;
        code.iter()
            .all(u8::is_ascii_alphanumeric)
            .then_some(SqlState(code))
    }

    /// Return the code as string.
    pub fn code(&self) -> &str {
        // only constructed from ascii
        std::str::from_utf8(&self.0).unwrap_or_default()
    }

    /// The two character class of this code, e.g. `23` for integrity constraint violation.
    pub fn class(&self) -> &str {
        &self.code()[..2]
    }
}

macro_rules! sqlstate {
    ($($name:ident = $code:literal, $doc:literal;)*) => {
        impl SqlState {
            $(
                #[doc = $doc]
                pub const $name: SqlState = SqlState(*$code);
            )*
        }
    };
}

sqlstate! {
    SUCCESSFUL_COMPLETION = b"00000", "`successful_completion`";
    WARNING = b"01000", "`warning`";
    CONNECTION_EXCEPTION = b"08000", "`connection_exception`";
    CONNECTION_FAILURE = b"08006", "`connection_failure`";
    PROTOCOL_VIOLATION = b"08P01", "`protocol_violation`";
    FEATURE_NOT_SUPPORTED = b"0A000", "`feature_not_supported`";
    CARDINALITY_VIOLATION = b"21000", "`cardinality_violation`";
    DATA_EXCEPTION = b"22000", "`data_exception`";
    NUMERIC_VALUE_OUT_OF_RANGE = b"22003", "`numeric_value_out_of_range`";
    DIVISION_BY_ZERO = b"22012", "`division_by_zero`";
    INVALID_TEXT_REPRESENTATION = b"22P02", "`invalid_text_representation`";
    INTEGRITY_CONSTRAINT_VIOLATION = b"23000", "`integrity_constraint_violation`";
    NOT_NULL_VIOLATION = b"23502", "`not_null_violation`";
    FOREIGN_KEY_VIOLATION = b"23503", "`foreign_key_violation`";
    UNIQUE_VIOLATION = b"23505", "`unique_violation`";
    CHECK_VIOLATION = b"23514", "`check_violation`";
    INVALID_TRANSACTION_STATE = b"25000", "`invalid_transaction_state`";
    ACTIVE_SQL_TRANSACTION = b"25001", "`active_sql_transaction`";
    NO_ACTIVE_SQL_TRANSACTION = b"25P01", "`no_active_sql_transaction`";
    IN_FAILED_SQL_TRANSACTION = b"25P02", "`in_failed_sql_transaction`";
    INVALID_SQL_STATEMENT_NAME = b"26000", "`invalid_sql_statement_name`";
    INVALID_AUTHORIZATION_SPECIFICATION = b"28000", "`invalid_authorization_specification`";
    INVALID_PASSWORD = b"28P01", "`invalid_password`";
    INVALID_CURSOR_NAME = b"34000", "`invalid_cursor_name`";
    SERIALIZATION_FAILURE = b"40001", "`serialization_failure`";
    DEADLOCK_DETECTED = b"40P01", "`deadlock_detected`";
    SYNTAX_ERROR = b"42601", "`syntax_error`";
    INSUFFICIENT_PRIVILEGE = b"42501", "`insufficient_privilege`";
    UNDEFINED_COLUMN = b"42703", "`undefined_column`";
    UNDEFINED_FUNCTION = b"42883", "`undefined_function`";
    UNDEFINED_TABLE = b"42P01", "`undefined_table`";
    UNDEFINED_PARAMETER = b"42P02", "`undefined_parameter`";
    DUPLICATE_TABLE = b"42P07", "`duplicate_table`";
    DUPLICATE_PREPARED_STATEMENT = b"42P05", "`duplicate_prepared_statement`";
    INVALID_PARAMETER_VALUE = b"22023", "`invalid_parameter_value`";
    QUERY_CANCELED = b"57014", "`query_canceled`";
    ADMIN_SHUTDOWN = b"57P01", "`admin_shutdown`";
    CANNOT_CONNECT_NOW = b"57P03", "`cannot_connect_now`";
    TOO_MANY_CONNECTIONS = b"53300", "`too_many_connections`";
    INTERNAL_ERROR = b"XX000", "`internal_error`";
}

impl fmt::Display for SqlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl fmt::Debug for SqlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SqlState({})", self.code())
    }
}

impl PartialEq<str> for SqlState {
    fn eq(&self, other: &str) -> bool {
        self.code() == other
    }
}

impl PartialEq<&str> for SqlState {
    fn eq(&self, other: &&str) -> bool {
        self.code() == *other
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_code() {
        let code = SqlState::from_code("23505").unwrap();
        assert_eq!(code, SqlState::UNIQUE_VIOLATION);
        assert_eq!(code.class(), "23");
        assert_eq!(code, "23505");
        assert!(SqlState::from_code("2350").is_none());
        assert!(SqlState::from_code("23-05").is_none());
    }
}
