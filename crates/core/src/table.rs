//! Reading tables out of stored database files.
//!
//! Blobs are opaque bytes to the blob store. To look inside one it is written
//! to a scratch file and opened with a read-only SQLite connection; the
//! scratch file is removed when the [`SqliteFile`] is dropped.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{ConnectOptions, Connection, Row, TypeInfo, ValueRef};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use tempfile::NamedTempFile;

/// Every SQLite database file starts with these 16 bytes.
pub const SQLITE_HEADER: &[u8; 16] = b"SQLite format 3\0";

const LIST_TABLES: &str =
    "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\' ORDER BY name";
const LIST_COLUMNS: &str = "SELECT name FROM pragma_table_info(?1) ORDER BY cid";

/// One cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}
impl SortDirection {
    /// Parse a requested direction. Empty means "not given".
    pub fn parse(value: &str) -> Result<Option<Self>> {
        match value {
            "" => Ok(None),
            other => other.parse().map(Some),
        }
    }
}
impl FromStr for SortDirection {
    type Err = crate::error::Error;
    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("asc") {
            Ok(Self::Asc)
        } else if s.eq_ignore_ascii_case("desc") {
            Ok(Self::Desc)
        } else {
            exn::bail!(ErrorKind::InvalidInput(format!("sort direction must be ASC or DESC, got {s:?}")))
        }
    }
}
impl Display for SortDirection {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        })
    }
}

/// Which slice of a table to read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    /// Column to order by. Unknown columns leave the rows unsorted.
    pub sort_column: Option<String>,
    pub sort_direction: Option<SortDirection>,
    pub offset: u64,
    pub limit: u32,
}

/// A page of rows from one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSet {
    pub table: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// Rows in the whole table, not just this page.
    pub total_rows: u64,
    pub offset: u64,
    /// Sort actually applied, `None` when the rows came back unsorted.
    pub sorted_by: Option<(String, SortDirection)>,
}

/// Quote an identifier for interpolation into SQL.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// A database file opened read-only from a scratch copy.
pub struct SqliteFile {
    conn: SqliteConnection,
    // Dropped after the connection; removes the scratch file.
    _file: NamedTempFile,
}

impl SqliteFile {
    /// Write `data` to a scratch file and open it.
    ///
    /// Only the header is checked here. Use [`check`](Self::check) to make
    /// sure the whole file is usable.
    pub async fn open(data: &[u8]) -> Result<Self> {
        if data.len() < SQLITE_HEADER.len() || !data.starts_with(SQLITE_HEADER) {
            exn::bail!(ErrorKind::InvalidDatabase("not an SQLite database".into()));
        }
        let file = tempfile::Builder::new()
            .prefix("sqlhub-")
            .suffix(".db")
            .tempfile()
            .or_raise(|| ErrorKind::UpstreamUnavailable("scratch space"))?;
        tokio::fs::write(file.path(), data)
            .await
            .or_raise(|| ErrorKind::UpstreamUnavailable("scratch space"))?;
        let conn = SqliteConnectOptions::new()
            .filename(file.path())
            .read_only(true)
            // Private scratch copy: nothing else writes to it, and WAL-mode
            // files open without -wal/-shm siblings.
            .immutable(true)
            .create_if_missing(false)
            .disable_statement_logging()
            .connect()
            .await
            .or_raise(|| ErrorKind::InvalidDatabase("could not open database".into()))?;
        Ok(Self { conn, _file: file })
    }

    /// Run SQLite's own integrity check and make sure there is something to
    /// show: at least one table.
    pub async fn check(&mut self) -> Result<()> {
        let status: String = sqlx::query_scalar("PRAGMA quick_check")
            .fetch_one(&mut self.conn)
            .await
            .or_raise(|| ErrorKind::InvalidDatabase("integrity check failed".into()))?;
        if status != "ok" {
            exn::bail!(ErrorKind::InvalidDatabase(format!("integrity check failed: {status}")));
        }
        if self.tables().await?.is_empty() {
            exn::bail!(ErrorKind::InvalidDatabase("database has no tables".into()));
        }
        Ok(())
    }

    /// User tables, by name. SQLite's internal tables are left out.
    pub async fn tables(&mut self) -> Result<Vec<String>> {
        sqlx::query_scalar(LIST_TABLES)
            .fetch_all(&mut self.conn)
            .await
            .or_raise(|| ErrorKind::InvalidDatabase("could not list tables".into()))
    }

    pub async fn columns(&mut self, table: &str) -> Result<Vec<String>> {
        sqlx::query_scalar(LIST_COLUMNS)
            .bind(table)
            .fetch_all(&mut self.conn)
            .await
            .or_raise(|| ErrorKind::InvalidDatabase(format!("could not read columns of {table}")))
    }

    pub async fn row_count(&mut self, table: &str) -> Result<u64> {
        let sql = format!("SELECT count(*) FROM {}", quote_identifier(table));
        let count: i64 = sqlx::query_scalar(&sql)
            .fetch_one(&mut self.conn)
            .await
            .or_raise(|| ErrorKind::InvalidDatabase(format!("could not count rows of {table}")))?;
        Ok(count.max(0) as u64)
    }

    /// Read one page of a table.
    ///
    /// The table must exist (see [`tables`](Self::tables)); anything else
    /// about the request is taken at face value.
    pub async fn page(&mut self, table: &str, page: &Page) -> Result<RecordSet> {
        let columns = self.columns(table).await?;
        let sorted_by = page
            .sort_column
            .as_ref()
            .filter(|column| columns.contains(column))
            .map(|column| (column.clone(), page.sort_direction.unwrap_or_default()));
        let order = match &sorted_by {
            Some((column, direction)) => format!(" ORDER BY {} {direction}", quote_identifier(column)),
            None => String::new(),
        };
        let sql = format!("SELECT * FROM {}{order} LIMIT ?1 OFFSET ?2", quote_identifier(table));
        let offset = i64::try_from(page.offset).unwrap_or(i64::MAX);
        let rows: Vec<SqliteRow> = sqlx::query(&sql)
            .bind(i64::from(page.limit))
            .bind(offset)
            .fetch_all(&mut self.conn)
            .await
            .or_raise(|| ErrorKind::InvalidDatabase(format!("could not read rows of {table}")))?;
        let rows = rows
            .iter()
            .map(|row| (0..row.len()).map(|i| decode(row, i)).collect::<std::result::Result<Vec<_>, _>>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .or_raise(|| ErrorKind::InvalidDatabase(format!("could not decode rows of {table}")))?;
        Ok(RecordSet {
            table: table.to_string(),
            columns,
            rows,
            total_rows: self.row_count(table).await?,
            offset: page.offset,
            sorted_by,
        })
    }

    pub async fn close(self) {
        if let Err(e) = self.conn.close().await {
            tracing::debug!(error = %e, "closing scratch database failed");
        }
    }
}

/// Decode a cell by its storage class, not its declared column type.
fn decode(row: &SqliteRow, index: usize) -> std::result::Result<Value, sqlx::Error> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let storage_class = raw.type_info().name().to_ascii_uppercase();
    Ok(match storage_class.as_str() {
        "INTEGER" | "INT" | "BIGINT" | "BOOLEAN" => Value::Integer(row.try_get_unchecked(index)?),
        "REAL" | "FLOAT" | "DOUBLE" => Value::Real(row.try_get_unchecked(index)?),
        "BLOB" => Value::Blob(row.try_get_unchecked(index)?),
        _ => Value::Text(row.try_get_unchecked(index)?),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rstest::rstest;
    use sqlx::sqlite::SqliteConnectOptions;

    /// Build a small database file and return its bytes.
    pub(crate) async fn sample_database(statements: &[&str]) -> Vec<u8> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.db");
        let mut conn = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .connect()
            .await
            .unwrap();
        for statement in statements {
            sqlx::query(statement).execute(&mut conn).await.unwrap();
        }
        conn.close().await.unwrap();
        std::fs::read(&path).unwrap()
    }

    pub(crate) async fn people() -> Vec<u8> {
        sample_database(&[
            "CREATE TABLE people (id INTEGER PRIMARY KEY, name TEXT, score REAL, photo BLOB)",
            "INSERT INTO people VALUES (1, 'carol', 2.5, NULL), (2, 'alice', 9.0, x'00ff'), (3, 'bob', NULL, NULL)",
            "CREATE TABLE \"odd \"\"name\"\"\" (x)",
        ])
        .await
    }

    #[tokio::test]
    async fn test_open_rejects_non_sqlite() {
        let err = SqliteFile::open(b"definitely not a database").await.err().unwrap();
        assert!(matches!(&*err, ErrorKind::InvalidDatabase(_)));
        let err = SqliteFile::open(b"").await.err().unwrap();
        assert!(matches!(&*err, ErrorKind::InvalidDatabase(_)));
    }

    #[tokio::test]
    async fn test_check_requires_a_table() {
        let empty = sample_database(&["PRAGMA user_version = 1"]).await;
        let mut file = SqliteFile::open(&empty).await.unwrap();
        let err = file.check().await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidDatabase(m) if m.contains("no tables")));
    }

    #[tokio::test]
    async fn test_check_rejects_truncated_file() {
        let mut data = people().await;
        data.truncate(SQLITE_HEADER.len() + 10);
        let result = match SqliteFile::open(&data).await {
            Ok(mut file) => file.check().await,
            Err(e) => Err(e),
        };
        assert!(matches!(&*result.unwrap_err(), ErrorKind::InvalidDatabase(_)));
    }

    #[tokio::test]
    async fn test_tables_and_columns() {
        let mut file = SqliteFile::open(&people().await).await.unwrap();
        file.check().await.unwrap();
        assert_eq!(file.tables().await.unwrap(), ["odd \"name\"", "people"]);
        assert_eq!(file.columns("people").await.unwrap(), ["id", "name", "score", "photo"]);
        assert_eq!(file.row_count("odd \"name\"").await.unwrap(), 0);
        file.close().await;
    }

    #[tokio::test]
    async fn test_page_decodes_storage_classes() {
        let mut file = SqliteFile::open(&people().await).await.unwrap();
        let page = Page {
            limit: 10,
            ..Page::default()
        };
        let records = file.page("people", &page).await.unwrap();
        assert_eq!(records.total_rows, 3);
        assert_eq!(records.sorted_by, None);
        assert_eq!(
            records.rows[1],
            [
                Value::Integer(2),
                Value::Text("alice".into()),
                Value::Real(9.0),
                Value::Blob(vec![0x00, 0xff])
            ]
        );
        assert_eq!(records.rows[2][2], Value::Null);
    }

    #[rstest]
    #[case::asc(Some(SortDirection::Asc), ["alice", "bob"])]
    #[case::default_direction(None, ["alice", "bob"])]
    #[case::desc(Some(SortDirection::Desc), ["carol", "bob"])]
    #[tokio::test]
    async fn test_page_sorts_and_limits(#[case] direction: Option<SortDirection>, #[case] expected: [&str; 2]) {
        let mut file = SqliteFile::open(&people().await).await.unwrap();
        let page = Page {
            sort_column: Some("name".into()),
            sort_direction: direction,
            offset: 0,
            limit: 2,
        };
        let records = file.page("people", &page).await.unwrap();
        let names: Vec<_> = records.rows.iter().map(|r| r[1].clone()).collect();
        assert_eq!(names, expected.map(|n| Value::Text(n.into())));
        assert_eq!(records.total_rows, 3);
        assert_eq!(records.sorted_by, Some(("name".into(), direction.unwrap_or_default())));
    }

    #[tokio::test]
    async fn test_unknown_sort_column_is_unsorted() {
        let mut file = SqliteFile::open(&people().await).await.unwrap();
        let page = Page {
            sort_column: Some("name; DROP TABLE people".into()),
            sort_direction: Some(SortDirection::Desc),
            offset: 1,
            limit: 10,
        };
        let records = file.page("people", &page).await.unwrap();
        assert_eq!(records.sorted_by, None);
        assert_eq!(records.rows.len(), 2);
        assert_eq!(records.rows[0][0], Value::Integer(2));
    }

    #[rstest]
    #[case("", None)]
    #[case("asc", Some(SortDirection::Asc))]
    #[case("ASC", Some(SortDirection::Asc))]
    #[case("Desc", Some(SortDirection::Desc))]
    fn test_sort_direction(#[case] input: &str, #[case] expected: Option<SortDirection>) {
        assert_eq!(SortDirection::parse(input).unwrap(), expected);
    }

    #[test]
    fn test_sort_direction_invalid() {
        let err = SortDirection::parse("sideways").unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidInput(_)));
    }

    #[rstest]
    #[case("people", "\"people\"")]
    #[case("odd \"name\"", "\"odd \"\"name\"\"\"")]
    fn test_quote_identifier(#[case] name: &str, #[case] expected: &str) {
        assert_eq!(quote_identifier(name), expected);
    }
}
