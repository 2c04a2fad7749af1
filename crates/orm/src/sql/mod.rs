//! SQL Generation
//!
//! Compiles frozen query state into parameterised PostgreSQL. Identifiers
//! are always quoted and literal values always travel as parameters.

pub mod generation;

pub use generation::{compile_count, compile_select, SqlStatement};

/// PostgreSQL parameter placeholder for a 1-based index
pub fn parameter_placeholder(index: usize) -> String {
    format!("${}", index)
}

/// Escape SQL identifier for safe use in queries
pub fn escape_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_quoting() {
        assert_eq!(escape_identifier("member"), "\"member\"");
        assert_eq!(escape_identifier("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(parameter_placeholder(3), "$3");
    }
}
