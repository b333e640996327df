use miette::{Result, SourceSpan};
use nom::{
  branch::alt,
  bytes::complete::{tag, tag_no_case, take_while, take_while1},
  character::complete::{char, multispace0, multispace1},
  combinator::{map, opt},
  error::ErrorKind,
  sequence::{delimited, preceded},
  IResult, Parser,
};

use super::error::SchemaSqlError;

/// A schema object whose record layout can be derived from its SQL.
#[derive(Debug, PartialEq)]
pub enum SchemaStatement {
  Table(CreateTable),
  Index(CreateIndex),
}

#[derive(Debug, PartialEq)]
pub struct CreateTable {
  pub table_name: String,
  pub columns: Vec<ColumnDef>,
  /// Primary key columns in key order, from either a column or a table constraint.
  pub primary_key: Vec<String>,
  pub without_rowid: bool,
}

#[derive(Debug, PartialEq)]
pub struct ColumnDef {
  pub name: String,
  /// Type words as written, e.g. `VARCHAR(20)`; empty when the column has no type.
  pub declared_type: String,
  pub is_rowid: bool,
  /// False for `GENERATED ALWAYS AS (...) VIRTUAL` columns, which occupy no record slot.
  pub is_stored: bool,
}

#[derive(Debug, PartialEq)]
pub struct CreateIndex {
  pub index_name: String,
  pub table_name: String,
  /// Indexed column names; expressions are kept as written.
  pub columns: Vec<String>,
  pub unique: bool,
}

const CONSTRAINT_KEYWORDS: &[&str] = &[
  "CONSTRAINT",
  "PRIMARY",
  "NOT",
  "NULL",
  "UNIQUE",
  "CHECK",
  "DEFAULT",
  "COLLATE",
  "REFERENCES",
  "GENERATED",
  "AS",
];

const TABLE_CONSTRAINTS: &[&str] = &["CONSTRAINT", "PRIMARY", "UNIQUE", "CHECK", "FOREIGN"];

fn ws(input: &str) -> IResult<&str, &str> {
  multispace0(input)
}

fn bare_word(input: &str) -> IResult<&str, &str> {
  take_while1(|c: char| c.is_alphanumeric() || c == '_' || c == '$').parse(input)
}

fn identifier(input: &str) -> IResult<&str, String> {
  let double = delimited(tag("\""), take_while(|c: char| c != '"'), tag("\""));
  let bracket = delimited(tag("["), take_while(|c: char| c != ']'), tag("]"));
  let backtick = delimited(tag("`"), take_while(|c: char| c != '`'), tag("`"));
  let single = delimited(tag("'"), take_while(|c: char| c != '\''), tag("'"));
  map(alt((double, bracket, backtick, single, bare_word)), String::from).parse(input)
}

/// `[schema.]name`, keeping only the name.
fn qualified_name(input: &str) -> IResult<&str, String> {
  map(
    (identifier, opt(preceded((ws, tag("."), ws), identifier))),
    |(first, second)| second.unwrap_or(first),
  )
  .parse(input)
}

/// The text between a `(` and its matching `)`, skipping quoted sections.
fn balanced(input: &str) -> IResult<&str, &str> {
  let (rest, _) = char('(').parse(input)?;
  let mut depth = 1usize;
  let mut quote = None;
  for (i, c) in rest.char_indices() {
    match quote {
      Some(close) => {
        if c == close {
          quote = None;
        }
      }
      None => match c {
        '\'' | '"' | '`' => quote = Some(c),
        '[' => quote = Some(']'),
        '(' => depth += 1,
        ')' => {
          depth -= 1;
          if depth == 0 {
            return Ok((&rest[i + 1..], &rest[..i]));
          }
        }
        _ => {}
      },
    }
  }
  Err(nom::Err::Error(nom::error::Error::new(input, ErrorKind::Char)))
}

/// Splits on commas that are not nested in parentheses or quotes.
fn split_top_level(body: &str) -> Vec<&str> {
  let mut items = Vec::new();
  let mut depth = 0usize;
  let mut quote = None;
  let mut start = 0;
  for (i, c) in body.char_indices() {
    match quote {
      Some(close) => {
        if c == close {
          quote = None;
        }
      }
      None => match c {
        '\'' | '"' | '`' => quote = Some(c),
        '[' => quote = Some(']'),
        '(' => depth += 1,
        ')' => depth = depth.saturating_sub(1),
        ',' if depth == 0 => {
          items.push(body[start..i].trim());
          start = i + 1;
        }
        _ => {}
      },
    }
  }
  items.push(body[start..].trim());
  items.retain(|item| !item.is_empty());
  items
}

/// Blanks out quoted sections so keywords inside literals are not mistaken for constraints.
fn unquoted(text: &str) -> String {
  let mut out = String::with_capacity(text.len());
  let mut quote = None;
  for c in text.chars() {
    match quote {
      Some(close) => {
        if c == close {
          quote = None;
        }
        out.push(' ');
      }
      None => {
        match c {
          '\'' | '"' | '`' => quote = Some(c),
          '[' => quote = Some(']'),
          _ => {}
        }
        out.push(if quote.is_some() { ' ' } else { c });
      }
    }
  }
  out
}

fn words(text: &str) -> Vec<String> {
  text
    .split(|c: char| !(c.is_alphanumeric() || c == '_'))
    .filter(|word| !word.is_empty())
    .map(str::to_uppercase)
    .collect()
}

fn contains_sequence(words: &[String], sequence: &[&str]) -> bool {
  words
    .windows(sequence.len())
    .any(|window| window.iter().zip(sequence).all(|(a, b)| a == b))
}

fn is_constraint_keyword(word: &str) -> bool {
  CONSTRAINT_KEYWORDS
    .iter()
    .any(|keyword| keyword.eq_ignore_ascii_case(word))
}

/// Type words up to the first column constraint, with any `(n, m)` arguments.
fn type_name(input: &str) -> IResult<&str, String> {
  let mut declared = String::new();
  let mut rest = input;
  loop {
    let (after_ws, _) = ws(rest)?;
    if after_ws.starts_with('(') {
      let (after, arguments) = balanced(after_ws)?;
      declared.push('(');
      declared.push_str(arguments.trim());
      declared.push(')');
      rest = after;
      continue;
    }
    match bare_word(after_ws) {
      Ok((after, word)) if !is_constraint_keyword(word) => {
        if !declared.is_empty() {
          declared.push(' ');
        }
        declared.push_str(word);
        rest = after;
      }
      _ => return Ok((after_ws, declared)),
    }
  }
}

fn column_def(input: &str) -> IResult<&str, (ColumnDef, bool)> {
  let (input, name) = preceded(ws, identifier).parse(input)?;
  let (constraints, declared_type) = type_name(input)?;
  let constraint_words = words(&unquoted(constraints));

  let primary_key = contains_sequence(&constraint_words, &["PRIMARY", "KEY"]);
  let is_rowid = primary_key
    && declared_type.eq_ignore_ascii_case("INTEGER")
    && !constraint_words.iter().any(|w| w == "DESC");
  let generated = constraint_words.iter().any(|w| w == "AS");
  let is_stored = !generated || constraint_words.iter().any(|w| w == "STORED");

  Ok((
    "",
    (
      ColumnDef {
        name,
        declared_type,
        is_rowid,
        is_stored,
      },
      primary_key,
    ),
  ))
}

/// Names listed in `PRIMARY KEY (a, b DESC)`.
fn primary_key_columns(item: &str) -> Vec<String> {
  let upper = item.to_ascii_uppercase();
  let Some(at) = upper
    .find("PRIMARY")
    .and_then(|primary| upper[primary..].find("KEY").map(|key| primary + key))
  else {
    return Vec::new();
  };
  let rest = item[at + 3..].trim_start();
  match balanced(rest) {
    Ok((_, list)) => split_top_level(list)
      .into_iter()
      .filter_map(|column| identifier(column).ok().map(|(_, name)| name))
      .collect(),
    Err(_) => Vec::new(),
  }
}

fn create_table(input: &str) -> IResult<&str, CreateTable> {
  let (input, _) = (ws, tag_no_case("CREATE"), multispace1).parse(input)?;
  let (input, _) = opt((
    alt((tag_no_case("TEMPORARY"), tag_no_case("TEMP"))),
    multispace1,
  ))
  .parse(input)?;
  let (input, _) = (tag_no_case("TABLE"), multispace1).parse(input)?;
  let (input, _) = opt((
    tag_no_case("IF"),
    multispace1,
    tag_no_case("NOT"),
    multispace1,
    tag_no_case("EXISTS"),
    multispace1,
  ))
  .parse(input)?;
  let (input, table_name) = qualified_name(input)?;
  let (input, _) = ws(input)?;
  let (options, body) = balanced(input)?;

  let mut columns = Vec::new();
  let mut primary_key = Vec::new();
  let mut key_from_table_constraint = false;
  for item in split_top_level(body) {
    let first = words(item).into_iter().next().unwrap_or_default();
    if TABLE_CONSTRAINTS.contains(&first.as_str()) && !item.starts_with(['"', '[', '`']) {
      let item_words = words(item);
      if contains_sequence(&item_words, &["PRIMARY", "KEY"]) {
        primary_key = primary_key_columns(item);
        key_from_table_constraint = true;
      }
      continue;
    }
    let (_, (column, is_primary_key)) = column_def(item)?;
    if is_primary_key {
      primary_key = vec![column.name.clone()];
    }
    columns.push(column);
  }

  let without_rowid = contains_sequence(&words(options), &["WITHOUT", "ROWID"]);
  if without_rowid {
    columns.iter_mut().for_each(|column| column.is_rowid = false);
  } else if let (true, [key]) = (key_from_table_constraint, primary_key.as_slice()) {
    // PRIMARY KEY(col) on an INTEGER column also makes it the rowid
    if let Some(column) = columns
      .iter_mut()
      .find(|column| column.name.eq_ignore_ascii_case(key))
    {
      if column.declared_type.eq_ignore_ascii_case("INTEGER") {
        column.is_rowid = true;
      }
    }
  }

  Ok((
    "",
    CreateTable {
      table_name,
      columns,
      primary_key,
      without_rowid,
    },
  ))
}

fn create_index(input: &str) -> IResult<&str, CreateIndex> {
  let (input, _) = (ws, tag_no_case("CREATE"), multispace1).parse(input)?;
  let (input, unique) = opt((tag_no_case("UNIQUE"), multispace1)).parse(input)?;
  let (input, _) = (tag_no_case("INDEX"), multispace1).parse(input)?;
  let (input, _) = opt((
    tag_no_case("IF"),
    multispace1,
    tag_no_case("NOT"),
    multispace1,
    tag_no_case("EXISTS"),
    multispace1,
  ))
  .parse(input)?;
  let (input, index_name) = qualified_name(input)?;
  let (input, _) = (multispace1, tag_no_case("ON"), multispace1).parse(input)?;
  let (input, table_name) = qualified_name(input)?;
  let (input, _) = ws(input)?;
  let (rest, body) = balanced(input)?;

  let columns = split_top_level(body)
    .into_iter()
    .map(|item| match identifier(item) {
      Ok((after, name)) if !after.trim_start().starts_with('(') => name,
      _ => item.to_string(),
    })
    .collect();

  Ok((
    rest,
    CreateIndex {
      index_name,
      table_name,
      columns,
      unique: unique.is_some(),
    },
  ))
}

pub fn parse(sql: &str) -> Result<SchemaStatement> {
  let statement = alt((
    map(create_table, SchemaStatement::Table),
    map(create_index, SchemaStatement::Index),
  ))
  .parse(sql);
  match statement {
    Ok((_, result)) => Ok(result),
    Err(nom::Err::Error(e) | nom::Err::Failure(e)) => {
      let offset = sql.len() - e.input.len();
      Err(miette::Report::new(SchemaSqlError {
        message: "unsupported schema statement".to_string(),
        sql: sql.to_string(),
        span: SourceSpan::new(offset.into(), 1),
      }))
    }
    Err(nom::Err::Incomplete(_)) => Err(miette::miette!("incomplete schema statement")),
  }
}

impl CreateTable {
  /// Columns that occupy a slot in the stored record.
  pub fn stored_columns(&self) -> impl Iterator<Item = &ColumnDef> {
    self.columns.iter().filter(|column| column.is_stored)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn table(sql: &str) -> CreateTable {
    match parse(sql) {
      Ok(SchemaStatement::Table(table)) => table,
      other => panic!("expected a table, got {other:?}"),
    }
  }

  #[test]
  fn parses_plain_table() {
    let t = table("CREATE TABLE t (a INTEGER, b TEXT)");
    assert_eq!(t.table_name, "t");
    assert_eq!(t.columns.len(), 2);
    assert_eq!(t.columns[0].declared_type, "INTEGER");
    assert!(!t.columns[0].is_rowid);
    assert_eq!(t.columns[1].name, "b");
  }

  #[test]
  fn detects_rowid_alias_forms() {
    let t = table(
      "create table if not exists main.\"my table\" (id integer primary key autoincrement, v)",
    );
    assert_eq!(t.table_name, "my table");
    assert!(t.columns[0].is_rowid);
    assert_eq!(t.columns[1].declared_type, "");

    let t = table("CREATE TABLE t(id INTEGER, name VARCHAR(20) NOT NULL, PRIMARY KEY(id))");
    assert!(t.columns[0].is_rowid);
    assert_eq!(t.columns[1].declared_type, "VARCHAR(20)");
    assert_eq!(t.columns.len(), 2);

    let t = table("CREATE TABLE t(id INTEGER PRIMARY KEY DESC, x)");
    assert!(!t.columns[0].is_rowid);

    let t = table("CREATE TABLE t(id INT PRIMARY KEY, x)");
    assert!(!t.columns[0].is_rowid);
  }

  #[test]
  fn without_rowid_and_generated_columns() {
    let t = table(
      "CREATE TABLE kv ([key] TEXT, value BLOB, \
       n INTEGER GENERATED ALWAYS AS (length(value)) VIRTUAL, \
       CONSTRAINT pk PRIMARY KEY ([key])) WITHOUT ROWID",
    );
    assert!(t.without_rowid);
    assert_eq!(t.primary_key, vec!["key".to_string()]);
    assert!(!t.columns[2].is_stored);
    assert_eq!(t.stored_columns().count(), 2);
  }

  #[test]
  fn commas_inside_defaults_and_checks_do_not_split() {
    let t =
      table("CREATE TABLE t(a TEXT DEFAULT 'x,y', b REAL CHECK (b IN (1, 2)), c DECIMAL(10, 5))");
    assert_eq!(t.columns.len(), 3);
    assert_eq!(t.columns[2].declared_type, "DECIMAL(10, 5)");
  }

  #[test]
  fn parses_index() {
    match parse("CREATE UNIQUE INDEX IF NOT EXISTS ix ON t (b, lower(c)) WHERE b > 0") {
      Ok(SchemaStatement::Index(index)) => {
        assert_eq!(index.index_name, "ix");
        assert_eq!(index.table_name, "t");
        assert_eq!(index.columns, vec!["b".to_string(), "lower(c)".to_string()]);
        assert!(index.unique);
      }
      other => panic!("expected an index, got {other:?}"),
    }
  }

  #[test]
  fn rejects_other_statements() {
    assert!(parse("CREATE VIEW v AS SELECT 1").is_err());
    assert!(parse("CREATE VIRTUAL TABLE f USING fts5(x)").is_err());
    assert!(parse("CREATE TABLE t AS SELECT 1").is_err());
  }
}
