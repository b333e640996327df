use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

/// A `sqlite_master` statement no record layout could be derived from.
#[derive(Error, Debug, Diagnostic)]
#[error("cannot derive a record layout: {message}")]
#[diagnostic(
  code(sqlite_carve::schema_sql),
  help("only CREATE TABLE and CREATE INDEX statements describe stored records")
)]
pub struct SchemaSqlError {
  pub message: String,
  #[source_code]
  pub sql: String,
  #[label("parsing stopped here")]
  pub span: SourceSpan,
}
