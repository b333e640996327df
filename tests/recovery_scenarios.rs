mod common;

use common::{leaf_page, record, schema_cell, set_content_start, table_cell, DbBuilder};
use sqlite_carve::btree_page::cell::local_payload_size;
use sqlite_carve::btree_page::schema_layer::Value;
use sqlite_carve::btree_page::PageType;
use sqlite_carve::carve::CarveMode;
use sqlite_carve::{Error, RecoveryConfig, RowStatus};
use tempfile::TempDir;

const T_SQL: &str = "CREATE TABLE t(a INTEGER, b TEXT)";
const GONE_SQL: &str = "CREATE TABLE gone(x TEXT, y INTEGER)";

fn config() -> RecoveryConfig {
  RecoveryConfig::default().with_threads(2)
}

/// Page 2 of a 4096-byte database: one table leaf cell `(rowid 1, int32 'ABCD', '')` at 0x0FF6.
fn single_cell_db() -> DbBuilder {
  let mut db = DbBuilder::new(4096, 2);
  db.put(1, leaf_page(4096, 1, &[schema_cell(1, "t", 2, T_SQL)]));
  let page = db.page_mut(2);
  page[..8].copy_from_slice(&[0x0D, 0x00, 0x00, 0x00, 0x01, 0x0F, 0xF6, 0x00]);
  page[8..10].copy_from_slice(&[0x0F, 0xF6]);
  page[0x0FF6..0x0FF6 + 9].copy_from_slice(&[0x07, 0x01, 0x03, 0x04, 0x0D, b'A', b'B', b'C', b'D']);
  db
}

#[test]
fn live_cell_decodes_without_carving() {
  let dir = TempDir::new().unwrap();
  let path = single_cell_db().write(dir.path(), "live.db");

  let report = sqlite_carve::start(&path, config()).unwrap();
  let rows = report.rows("t");
  assert_eq!(rows.len(), 1);
  assert_eq!(rows[0].status, RowStatus::Regular);
  assert_eq!(rows[0].row_id, Some(1));
  assert_eq!(
    rows[0].values,
    vec![Value::Integer(0x41424344), Value::Text(String::new())]
  );
  assert_eq!(
    rows[0].to_strings(),
    vec!["8182", "regular", "7", "3", "1094861636", ""]
  );
  assert_eq!(report.count_by_status(RowStatus::DeletedInPage), 0);
  assert_eq!(report.page_owner(1), Some("sqlite_master"));
  assert_eq!(report.page_owner(2), Some("t"));
  assert_eq!(report.stats.failed_tasks, 0);
}

#[test]
fn deleted_cell_is_carved_from_its_columns() {
  let mut db = single_cell_db();
  let page = db.page_mut(2);
  // unlinked from the pointer array, rowid and header length overwritten
  page[3..5].copy_from_slice(&[0, 0]);
  page[8..10].copy_from_slice(&[0, 0]);
  page[0x0FF7] = 0;
  page[0x0FF8] = 0;
  let dir = TempDir::new().unwrap();
  let path = db.write(dir.path(), "deleted.db");

  let report = sqlite_carve::start(&path, config()).unwrap();
  let rows = report.rows("t");
  assert_eq!(rows.len(), 1);
  assert_eq!(rows[0].status, RowStatus::DeletedInPage);
  assert_eq!(rows[0].carve_mode, Some(CarveMode::ColumnsOnly));
  assert!(rows[0].synthesized_columns.is_empty());
  assert_eq!(
    rows[0].to_strings(),
    vec!["8184", "deleted-in-page", "7", "3", "1094861636", ""]
  );

  let report = sqlite_carve::start(&path, config().with_carving(false)).unwrap();
  assert!(report.rows("t").is_empty());
}

#[test]
fn free_list_cycle_is_scanned_once() {
  let mut db = DbBuilder::new(1024, 5);
  db.put(1, leaf_page(1024, 1, &[schema_cell(1, "t", 2, T_SQL)]));
  db.put(2, leaf_page(1024, 2, &[]));
  let trunk = db.page_mut(3);
  trunk[..12].copy_from_slice(&[0, 0, 0, 4, 0, 0, 0, 1, 0, 0, 0, 5]);
  let trunk = db.page_mut(4);
  trunk[..4].copy_from_slice(&[0, 0, 0, 3]);
  let old = record(&[Value::Integer(7), Value::Text("old".into())]);
  db.put(5, leaf_page(1024, 5, &[table_cell(9, &old)]));
  db.freelist(3, 3);
  let dir = TempDir::new().unwrap();
  let path = db.write(dir.path(), "freelist.db");

  let report = sqlite_carve::start(&path, config()).unwrap();
  let mut pages = report.freelist_pages.clone();
  pages.sort_unstable();
  assert_eq!(pages, vec![3, 4, 5]);

  let rows = report.rows("t");
  assert_eq!(rows.len(), 1);
  assert_eq!(rows[0].status, RowStatus::FreelistEntry);
  assert_eq!(rows[0].page_number, 5);
  assert_eq!(rows[0].row_id, Some(9));
  assert_eq!(rows[0].values, vec![Value::Integer(7), Value::Text("old".into())]);
  assert_eq!(report.stats.pages_scanned, 5);
}

#[test]
fn live_cells_round_trip_without_carve_matches() {
  let same = record(&[Value::Integer(5), Value::Text("same".into())]);
  let other = record(&[Value::Integer(-300), Value::Text(String::new())]);
  let cells = [table_cell(1, &same), table_cell(2, &same), table_cell(3, &other)];
  let mut db = DbBuilder::new(1024, 2);
  db.put(1, leaf_page(1024, 1, &[schema_cell(1, "t", 2, T_SQL)]));
  db.put(2, leaf_page(1024, 2, &cells));
  let dir = TempDir::new().unwrap();
  let path = db.write(dir.path(), "live.db");

  let report = sqlite_carve::start(&path, config()).unwrap();
  let rows = report.rows("t");
  assert_eq!(rows.len(), cells.len());
  assert!(rows.iter().all(|row| row.status == RowStatus::Regular));
  let mut row_ids: Vec<_> = rows.iter().filter_map(|row| row.row_id).collect();
  row_ids.sort_unstable();
  assert_eq!(row_ids, vec![1, 2, 3]);
  let same_values = vec![Value::Integer(5), Value::Text("same".into())];
  assert_eq!(rows.iter().filter(|row| row.values == same_values).count(), 2);
  for status in [
    RowStatus::DeletedInPage,
    RowStatus::UnallocatedSpace,
    RowStatus::FreelistEntry,
  ] {
    assert_eq!(report.count_by_status(status), 0, "{status}");
  }
}

#[test]
fn deleted_record_with_broken_overflow_chain_is_kept() {
  let deleted = record(&[Value::Integer(42), Value::Text("z".repeat(1200))]);
  let local = local_payload_size(PageType::TableLeaf, deleted.len() as u64, 1024);
  let live = table_cell(1, &record(&[Value::Integer(5), Value::Text("live".into())]));
  let mut page = leaf_page(1024, 2, &[live]);
  set_content_start(&mut page, 2, 800);
  page[800..800 + local].copy_from_slice(&deleted[..local]);
  // the overflow pointer names a page the file does not have
  page[800 + local..800 + local + 4].copy_from_slice(&99u32.to_be_bytes());
  let mut db = DbBuilder::new(1024, 2);
  db.put(1, leaf_page(1024, 1, &[schema_cell(1, "t", 2, T_SQL)]));
  db.put(2, page);
  let dir = TempDir::new().unwrap();
  let path = db.write(dir.path(), "overflow.db");

  let report = sqlite_carve::start(&path, config()).unwrap();
  let rows = report.rows("t");
  assert_eq!(rows.len(), 2);
  assert_eq!(report.count_by_status(RowStatus::DeletedInPage), 1);
  let carved = &rows[0];
  assert_eq!(carved.status, RowStatus::DeletedInPage);
  assert_eq!(carved.carve_mode, Some(CarveMode::Normal));
  assert_eq!(carved.offset, 1024 + 800);
  assert_eq!(carved.payload_len, deleted.len() as u64);
  assert_eq!(carved.truncated_columns, vec![1]);
  assert_eq!(
    carved.values,
    vec![Value::Integer(42), Value::Text("z".repeat(local - 5))]
  );
  assert_eq!(rows[1].status, RowStatus::Regular);
  assert_eq!(rows[1].values[1], Value::Text("live".into()));
}

/// `gone` was dropped: its schema row survives unlinked on page 1, its root page 3 is
/// zeroed, and page 4 still holds one of its rows under a freeblock header.
fn dropped_table_db() -> DbBuilder {
  let mut db = DbBuilder::new(1024, 4);
  let mut schema = leaf_page(1024, 1, &[schema_cell(1, "t", 2, T_SQL)]);
  let dropped = schema_cell(2, "gone", 3, GONE_SQL);
  let content = u16::from_be_bytes([schema[105], schema[106]]) as usize - dropped.len();
  schema[content..content + dropped.len()].copy_from_slice(&dropped);
  set_content_start(&mut schema, 1, content);
  db.put(1, schema);
  db.put(2, leaf_page(1024, 2, &[]));

  let mut page = leaf_page(1024, 4, &[]);
  let deleted = [0x00, 0x00, 0x00, 0x0B, 0x01, b'h', b'e', b'l', b'l', b'o', 0x2A];
  let at = 1024 - deleted.len();
  page[at..].copy_from_slice(&deleted);
  page[1..3].copy_from_slice(&(at as u16).to_be_bytes());
  set_content_start(&mut page, 4, at);
  db.put(4, page);
  db
}

#[test]
fn dropped_table_is_still_carved() {
  let dir = TempDir::new().unwrap();
  let path = dropped_table_db().write(dir.path(), "dropped.db");

  let report = sqlite_carve::start(&path, config()).unwrap();
  assert!(report.signatures.iter().any(|name| name == "gone"));
  assert_eq!(report.page_owner(3), None);

  let rows = report.rows("gone");
  assert_eq!(rows.len(), 1);
  assert_eq!(rows[0].status, RowStatus::DeletedInPage);
  assert_eq!(rows[0].carve_mode, Some(CarveMode::FirstColumnMissing));
  assert_eq!(rows[0].synthesized_columns, vec![0]);
  assert_eq!(rows[0].values, vec![Value::Text("hello".into()), Value::Integer(42)]);
  assert!(report.rows("t").is_empty());
  assert!(report
    .rows("sqlite_master")
    .iter()
    .any(|row| row.status == RowStatus::DeletedInPage));
}

#[test]
fn results_do_not_depend_on_thread_count() {
  let dir = TempDir::new().unwrap();
  let path = dropped_table_db().write(dir.path(), "threads.db");

  let one = sqlite_carve::start(&path, RecoveryConfig::default().with_threads(1)).unwrap();
  let many = sqlite_carve::start(&path, RecoveryConfig::default().with_threads(4)).unwrap();
  assert_eq!(one.tables, many.tables);
  assert_eq!(one.page_roles, many.page_roles);
  assert_eq!(one.stats, many.stats);
}

#[test]
fn non_database_input_is_fatal() {
  let dir = TempDir::new().unwrap();
  let path = dir.path().join("notes.txt");
  std::fs::write(&path, vec![b'x'; 4096]).unwrap();
  assert!(matches!(
    sqlite_carve::start(&path, config()),
    Err(Error::NotSqlite)
  ));
  assert!(matches!(
    sqlite_carve::start(dir.path().join("missing.db"), config()),
    Err(Error::Io { .. })
  ));
}
