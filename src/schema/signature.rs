use crate::btree_page::walker::SignatureId;
use crate::parser::schema::{CreateIndex, CreateTable};

use super::SchemaRow;

/// Storage class of a column, derived from its declared type with SQLite's affinity rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnClass {
  Integer,
  Real,
  Numeric,
  Text,
  Any,
  /// `INTEGER PRIMARY KEY`: the value lives in the cell's rowid and the record holds NULL.
  RowidAlias,
}

impl ColumnClass {
  pub fn from_declared_type(declared: &str) -> Self {
    let upper = declared.to_ascii_uppercase();
    if upper.contains("INT") {
      ColumnClass::Integer
    } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
      ColumnClass::Text
    } else if upper.is_empty() || upper.contains("BLOB") {
      ColumnClass::Any
    } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
      ColumnClass::Real
    } else {
      ColumnClass::Numeric
    }
  }

  /// Serial type codes a column of this class may carry. Every class but the rowid alias
  /// also accepts NULL.
  pub fn constraints(&self) -> &'static [Constraint] {
    use Constraint::*;
    match self {
      ColumnClass::Integer => &[Range { min: 0, max: 6 }, Range { min: 8, max: 9 }],
      ColumnClass::Real | ColumnClass::Numeric => &[Range { min: 0, max: 9 }],
      ColumnClass::Text => &[ExactZero, Odd { min: 13 }],
      ColumnClass::Any => &[AnyByte],
      ColumnClass::RowidAlias => &[ExactZero],
    }
  }
}

/// A predicate on one serial type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
  Range { min: u64, max: u64 },
  Odd { min: u64 },
  Even { min: u64 },
  ExactZero,
  AnyByte,
}

impl Constraint {
  pub fn matches(&self, code: u64) -> bool {
    match *self {
      Constraint::Range { min, max } => (min..=max).contains(&code),
      Constraint::Odd { min } => code >= min && code % 2 == 1,
      Constraint::Even { min } => code >= min && code % 2 == 0,
      Constraint::ExactZero => code == 0,
      Constraint::AnyByte => true,
    }
  }
}

/// Alternatives for one header position; a code matches if any alternative does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternSlot {
  pub accepts: &'static [Constraint],
}

impl PatternSlot {
  pub fn matches(&self, code: u64) -> bool {
    self.accepts.iter().any(|constraint| constraint.matches(code))
  }
}

/// What a record header of a given table must look like: the header-length varint, then
/// one serial type per stored column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderPattern {
  pub header_len: Constraint,
  pub columns: Vec<PatternSlot>,
}

impl HeaderPattern {
  pub fn new(classes: impl IntoIterator<Item = ColumnClass>) -> Self {
    let columns: Vec<PatternSlot> = classes
      .into_iter()
      .map(|class| PatternSlot {
        accepts: class.constraints(),
      })
      .collect();
    let n = columns.len() as u64;
    Self {
      header_len: Constraint::Range {
        min: n + 1,
        max: 9 * n + 2,
      },
      columns,
    }
  }

  /// Whether `codes` fit the leading columns. Fewer codes than columns is accepted: rows
  /// written before an `ALTER TABLE ... ADD COLUMN` stop early.
  pub fn accepts(&self, codes: &[u64]) -> bool {
    !codes.is_empty()
      && codes.len() <= self.columns.len()
      && codes
        .iter()
        .zip(&self.columns)
        .all(|(&code, slot)| slot.matches(code))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaKind {
  Table,
  Index,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
  pub name: String,
  pub declared_type: String,
  pub class: ColumnClass,
}

/// The record layout of one table or index, in stored column order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSignature {
  pub kind: SchemaKind,
  pub name: String,
  pub table_name: String,
  pub root_page: u32,
  pub sql: String,
  pub columns: Vec<ColumnInfo>,
  pub without_rowid: bool,
  /// Leading primary key columns of a WITHOUT ROWID table.
  pub key_columns: usize,
  pub pattern: HeaderPattern,
}

pub const SCHEMA_TABLE: &str = "sqlite_master";

/// The built-in signature always takes the first slot.
pub const SCHEMA_TABLE_ID: SignatureId = 0;

impl TableSignature {
  #[allow(clippy::too_many_arguments)]
  fn new(
    kind: SchemaKind,
    name: String,
    table_name: String,
    root_page: u32,
    sql: String,
    columns: Vec<ColumnInfo>,
    without_rowid: bool,
    key_columns: usize,
  ) -> Self {
    let pattern = HeaderPattern::new(columns.iter().map(|column| column.class));
    Self {
      kind,
      name,
      table_name,
      root_page,
      sql,
      columns,
      without_rowid,
      key_columns,
      pattern,
    }
  }

  /// `sqlite_master(type TEXT, name TEXT, tbl_name TEXT, rootpage INTEGER, sql TEXT)`.
  pub fn schema_table() -> Self {
    let columns = [
      ("type", "TEXT"),
      ("name", "TEXT"),
      ("tbl_name", "TEXT"),
      ("rootpage", "INTEGER"),
      ("sql", "TEXT"),
    ]
    .into_iter()
    .map(|(name, declared_type)| ColumnInfo {
      name: name.to_string(),
      declared_type: declared_type.to_string(),
      class: ColumnClass::from_declared_type(declared_type),
    })
    .collect();
    Self::new(
      SchemaKind::Table,
      SCHEMA_TABLE.to_string(),
      SCHEMA_TABLE.to_string(),
      1,
      String::new(),
      columns,
      false,
      0,
    )
  }

  pub fn from_table(row: &SchemaRow, table: &CreateTable) -> Self {
    let mut columns: Vec<ColumnInfo> = table
      .stored_columns()
      .map(|column| ColumnInfo {
        name: column.name.clone(),
        declared_type: column.declared_type.clone(),
        class: if column.is_rowid {
          ColumnClass::RowidAlias
        } else {
          ColumnClass::from_declared_type(&column.declared_type)
        },
      })
      .collect();

    let mut key_columns = 0;
    if table.without_rowid {
      // the primary key leads the record, in key order
      let mut ordered = Vec::with_capacity(columns.len());
      for key in &table.primary_key {
        if let Some(at) = columns
          .iter()
          .position(|column| column.name.eq_ignore_ascii_case(key))
        {
          ordered.push(columns.remove(at));
        }
      }
      key_columns = ordered.len();
      ordered.append(&mut columns);
      columns = ordered;
    }

    Self::new(
      SchemaKind::Table,
      row.name.clone(),
      row.table_name.clone(),
      row.root_page,
      row.sql.clone().unwrap_or_default(),
      columns,
      table.without_rowid,
      key_columns,
    )
  }

  /// Index records hold the indexed columns followed by the row's key: the rowid, or the
  /// primary key columns of a WITHOUT ROWID table.
  pub fn from_index(row: &SchemaRow, index: &CreateIndex, table: Option<&TableSignature>) -> Self {
    let lookup = |name: &str| {
      table.and_then(|table| {
        table
          .columns
          .iter()
          .find(|column| column.name.eq_ignore_ascii_case(name))
      })
    };
    let as_key = |column: &ColumnInfo| ColumnInfo {
      class: match column.class {
        ColumnClass::RowidAlias => ColumnClass::Integer,
        class => class,
      },
      ..column.clone()
    };

    let mut columns: Vec<ColumnInfo> = index
      .columns
      .iter()
      .map(|name| match lookup(name) {
        Some(column) => as_key(column),
        None => ColumnInfo {
          name: name.clone(),
          declared_type: String::new(),
          class: ColumnClass::Any,
        },
      })
      .collect();

    match table {
      Some(table) if table.without_rowid => {
        for column in table.columns.iter().take(table.key_columns) {
          if !columns.iter().any(|c| c.name.eq_ignore_ascii_case(&column.name)) {
            columns.push(as_key(column));
          }
        }
      }
      _ => columns.push(ColumnInfo {
        name: "rowid".to_string(),
        declared_type: "INTEGER".to_string(),
        class: ColumnClass::Integer,
      }),
    }

    Self::new(
      SchemaKind::Index,
      row.name.clone(),
      row.table_name.clone(),
      row.root_page,
      row.sql.clone().unwrap_or_default(),
      columns,
      false,
      0,
    )
  }

  pub fn is_table(&self) -> bool {
    self.kind == SchemaKind::Table
  }

  /// Rowid tables store their rows in table b-trees, whose cells can spill into overflow.
  pub fn has_rowid(&self) -> bool {
    self.kind == SchemaKind::Table && !self.without_rowid
  }

  pub fn rowid_alias(&self) -> Option<usize> {
    self
      .columns
      .iter()
      .position(|column| column.class == ColumnClass::RowidAlias)
  }
}
