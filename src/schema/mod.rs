pub mod discovery;
pub mod signature;

use std::collections::HashSet;

use tracing::{debug, info};

use crate::btree_page::schema_layer::{Record, Value};
use crate::btree_page::walker::{PageRole, SignatureId};
use crate::btree_page::PageType;
use crate::parser::schema::{parse, SchemaStatement};
use signature::{SchemaKind, TableSignature, SCHEMA_TABLE_ID};

/// Where a schema row was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaOrigin {
  /// A cell of the live `sqlite_master` b-tree.
  Live,
  /// Matched by byte pattern anywhere in the database file.
  Carved,
  /// Matched by byte pattern inside a WAL frame.
  Wal,
}

/// One row of `sqlite_master`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaRow {
  pub object_type: String,
  pub name: String,
  pub table_name: String,
  pub root_page: u32,
  pub sql: Option<String>,
  pub origin: SchemaOrigin,
}

impl SchemaRow {
  pub fn from_record(record: &Record, origin: SchemaOrigin) -> Option<Self> {
    let [object_type, name, table_name, root_page, sql] = record.values.as_slice() else {
      return None;
    };
    let root_page = match root_page {
      Value::Integer(root) => u32::try_from(*root).ok()?,
      Value::Null => 0,
      _ => return None,
    };
    let sql = match sql {
      Value::Text(sql) => Some(sql.clone()),
      Value::Null => None,
      _ => return None,
    };
    Some(Self {
      object_type: object_type.as_text()?.to_string(),
      name: name.as_text()?.to_string(),
      table_name: table_name.as_text()?.to_string(),
      root_page,
      sql,
      origin,
    })
  }
}

/// Every table and index whose record layout is known.
///
/// Slot 0 always holds `sqlite_master`.
#[derive(Debug, Clone)]
pub struct Schema {
  signatures: Vec<TableSignature>,
}

impl Default for Schema {
  fn default() -> Self {
    Self {
      signatures: vec![TableSignature::schema_table()],
    }
  }
}

impl Schema {
  /// Builds signatures from schema rows, keeping the first row seen for each
  /// `(type, name)`. Rows should be ordered live first.
  pub fn build(rows: &[SchemaRow]) -> Self {
    let mut schema = Schema::default();
    let mut seen = HashSet::new();
    let unique: Vec<&SchemaRow> = rows
      .iter()
      .filter(|row| seen.insert((row.object_type.to_ascii_lowercase(), row.name.clone())))
      .collect();

    for row in unique.iter().filter(|row| row.object_type.eq_ignore_ascii_case("table")) {
      let Some(sql) = &row.sql else { continue };
      match parse(sql) {
        Ok(SchemaStatement::Table(table)) => {
          schema.signatures.push(TableSignature::from_table(row, &table));
        }
        Ok(SchemaStatement::Index(_)) => debug!(name = %row.name, "table row holds index SQL"),
        Err(e) => debug!(name = %row.name, error = %e, "cannot derive record layout"),
      }
    }
    for row in unique.iter().filter(|row| row.object_type.eq_ignore_ascii_case("index")) {
      // automatic indexes have no SQL to derive a layout from
      let Some(sql) = &row.sql else { continue };
      match parse(sql) {
        Ok(SchemaStatement::Index(index)) => {
          let table = schema.find_table(&index.table_name);
          let signature = TableSignature::from_index(row, &index, table);
          schema.signatures.push(signature);
        }
        Ok(SchemaStatement::Table(_)) => debug!(name = %row.name, "index row holds table SQL"),
        Err(e) => debug!(name = %row.name, error = %e, "cannot derive record layout"),
      }
    }

    info!(
      tables = schema.tables().count(),
      indexes = schema.signatures.len() - schema.tables().count() - 1,
      "schema ready"
    );
    schema
  }

  pub fn signatures(&self) -> &[TableSignature] {
    &self.signatures
  }

  pub fn get(&self, id: SignatureId) -> Option<&TableSignature> {
    self.signatures.get(id)
  }

  pub fn len(&self) -> usize {
    self.signatures.len()
  }

  pub fn is_empty(&self) -> bool {
    self.signatures.is_empty()
  }

  /// True when nothing beyond the built-in `sqlite_master` signature is known.
  pub fn has_user_objects(&self) -> bool {
    self.signatures.len() > 1
  }

  pub fn find_table(&self, name: &str) -> Option<&TableSignature> {
    self
      .signatures
      .iter()
      .find(|signature| signature.is_table() && signature.name.eq_ignore_ascii_case(name))
  }

  /// User tables, excluding `sqlite_master`.
  pub fn tables(&self) -> impl Iterator<Item = (SignatureId, &TableSignature)> {
    self
      .signatures
      .iter()
      .enumerate()
      .skip(1)
      .filter(|(_, signature)| signature.is_table())
  }

  pub fn indexes(&self) -> impl Iterator<Item = (SignatureId, &TableSignature)> {
    self
      .signatures
      .iter()
      .enumerate()
      .filter(|(_, signature)| signature.kind == SchemaKind::Index)
  }

  /// Carving candidates for a page with no known owner: user tables, then `sqlite_master`.
  pub fn table_candidates(&self) -> Vec<SignatureId> {
    self
      .tables()
      .map(|(id, _)| id)
      .chain(std::iter::once(SCHEMA_TABLE_ID))
      .collect()
  }

  pub fn role_for(&self, id: SignatureId) -> PageRole {
    match self.signatures.get(id).map(|signature| signature.kind) {
      Some(SchemaKind::Table) => PageRole::Table(id),
      Some(SchemaKind::Index) => PageRole::Index(id),
      None => PageRole::Unknown,
    }
  }

  /// The first signature whose header pattern accepts `codes`, looking at tables for table
  /// pages and at indexes for index pages.
  pub fn match_record(&self, codes: &[u64], page_type: PageType) -> Option<SignatureId> {
    if page_type.is_table() {
      self
        .table_candidates()
        .into_iter()
        .find(|&id| self.signatures[id].pattern.accepts(codes))
    } else {
      self
        .indexes()
        .find(|(_, signature)| signature.pattern.accepts(codes))
        .map(|(id, _)| id)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn row(object_type: &str, name: &str, table_name: &str, root_page: u32, sql: &str) -> SchemaRow {
    SchemaRow {
      object_type: object_type.to_string(),
      name: name.to_string(),
      table_name: table_name.to_string(),
      root_page,
      sql: Some(sql.to_string()),
      origin: SchemaOrigin::Live,
    }
  }

  #[test]
  fn builds_tables_then_indexes_and_merges_duplicates() {
    let rows = vec![
      row("index", "ix", "t", 3, "CREATE INDEX ix ON t(b)"),
      row("table", "t", "t", 2, "CREATE TABLE t(a INTEGER, b TEXT)"),
      SchemaRow {
        origin: SchemaOrigin::Carved,
        root_page: 9,
        ..row("table", "t", "t", 2, "CREATE TABLE t(a INTEGER, b TEXT)")
      },
      row("view", "v", "v", 0, "CREATE VIEW v AS SELECT 1"),
    ];
    let schema = Schema::build(&rows);

    assert_eq!(schema.len(), 3);
    assert_eq!(schema.get(1).map(|s| s.root_page), Some(2));
    assert_eq!(schema.role_for(1), PageRole::Table(1));
    assert_eq!(schema.role_for(2), PageRole::Index(2));
    assert_eq!(schema.table_candidates(), vec![1, 0]);
    assert!(schema.has_user_objects());
  }

  #[test]
  fn matches_records_by_page_kind() {
    let rows = vec![
      row("table", "t", "t", 2, "CREATE TABLE t(a INTEGER, b TEXT)"),
      row("index", "ix", "t", 3, "CREATE INDEX ix ON t(b)"),
    ];
    let schema = Schema::build(&rows);
    assert_eq!(schema.match_record(&[1, 15], PageType::TableLeaf), Some(1));
    assert_eq!(schema.match_record(&[15, 1], PageType::IndexLeaf), Some(2));
    assert_eq!(
      schema.match_record(&[23, 15, 15, 1, 99], PageType::TableLeaf),
      Some(0)
    );
    assert_eq!(schema.match_record(&[12, 12], PageType::TableLeaf), None);
  }

  #[test]
  fn schema_row_from_record() {
    let record = Record {
      header_len: 6,
      serial_types: Vec::new(),
      values: vec![
        Value::Text("table".into()),
        Value::Text("t".into()),
        Value::Text("t".into()),
        Value::Integer(2),
        Value::Null,
      ],
      len: 0,
    };
    let row = SchemaRow::from_record(&record, SchemaOrigin::Wal).expect("valid row");
    assert_eq!(row.root_page, 2);
    assert_eq!(row.sql, None);

    let mut bad = record.clone();
    bad.values[3] = Value::Integer(-1);
    assert!(SchemaRow::from_record(&bad, SchemaOrigin::Wal).is_none());
  }
}
