use std::collections::HashSet;
use std::path::PathBuf;

use rusqlite::types::ValueRef;
use rusqlite::{params, params_from_iter, Connection, OpenFlags};
use serde_json::Value;
use strata_core::types::Row;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{CacheError, Result};

/// Sort direction for cache reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    fn keyword(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Read-side options. The default reads the whole file in natural order.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    pub sort_column: Option<String>,
    pub sort_dir: SortDirection,
    pub filter_text: Option<String>,
    pub limit: Option<usize>,
    pub offset: usize,
}

/// Content-addressed store of result files under a sharded directory tree.
pub struct ResultCache {
    root: PathBuf,
}

impl ResultCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of the result file for `hash`: `<root>/<hh>/<hash>.db`.
    pub fn entry_path(&self, result_hash: &str) -> PathBuf {
        let shard = &result_hash[..result_hash.len().min(2)];
        self.root.join(shard).join(format!("{result_hash}.db"))
    }

    pub fn exists(&self, result_hash: &str) -> bool {
        self.entry_path(result_hash).exists()
    }

    /// Write query results under `hash`.
    ///
    /// If a file already exists for the hash this is a no-op — the inputs
    /// are canonically identical, so the output is assumed identical. New
    /// files are built at a temporary path and renamed into place, so
    /// readers never observe a partial file.
    pub fn write(
        &self,
        result_hash: &str,
        columns: &[String],
        types: &[String],
        rows: &[Row],
    ) -> Result<PathBuf> {
        let path = self.entry_path(result_hash);
        if path.exists() {
            debug!(hash = %result_hash, "cache entry already present, skipping write");
            return Ok(path);
        }

        let shard = path.parent().expect("entry path always has a shard parent");
        std::fs::create_dir_all(shard)?;
        let tmp = shard.join(format!(".{}.{}.tmp", result_hash, Uuid::new_v4().simple()));

        {
            let conn = Connection::open(&tmp)?;
            conn.execute_batch(
                "CREATE TABLE result_meta (
                    key   TEXT NOT NULL PRIMARY KEY,
                    value TEXT NOT NULL
                );",
            )?;
            conn.execute(
                "INSERT INTO result_meta (key, value) VALUES ('columns', ?1), ('types', ?2)",
                params![
                    serde_json::to_string(columns).expect("column list serializes"),
                    serde_json::to_string(types).expect("type list serializes"),
                ],
            )?;

            if !columns.is_empty() {
                let col_defs: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
                conn.execute_batch(&format!("CREATE TABLE results ({})", col_defs.join(", ")))?;

                let placeholders: Vec<&str> = columns.iter().map(|_| "?").collect();
                let mut stmt = conn.prepare(&format!(
                    "INSERT INTO results VALUES ({})",
                    placeholders.join(", ")
                ))?;
                for row in rows {
                    stmt.execute(params_from_iter(row.iter().map(cell_to_sql)))?;
                }
            }
        }

        std::fs::rename(&tmp, &path)?;
        info!(hash = %result_hash, rows = rows.len(), "cached result written");
        Ok(path)
    }

    /// Read cached results, optionally filtered, sorted and paged.
    ///
    /// Returns `(columns, rows, total_count)`. A missing hash yields an
    /// empty result, not an error — "no cache yet" is distinguished from
    /// "query failed" by the run record, never here. When a filter is set,
    /// `total_count` is the filtered count.
    pub fn read(
        &self,
        result_hash: &str,
        options: &ReadOptions,
    ) -> Result<(Vec<String>, Vec<Row>, usize)> {
        let path = self.entry_path(result_hash);
        if !path.exists() {
            return Ok((Vec::new(), Vec::new(), 0));
        }

        let conn = Connection::open_with_flags(&path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        let columns = stored_columns(&conn)?;
        if columns.is_empty() {
            return Ok((columns, Vec::new(), 0));
        }

        if let Some(sort_col) = &options.sort_column {
            if !columns.contains(sort_col) {
                return Err(CacheError::UnknownColumn(sort_col.clone()));
            }
        }

        // Case-insensitive substring match against the text form of every
        // column, OR'd across columns.
        let (where_clause, filter_params) = match &options.filter_text {
            Some(text) if !text.is_empty() => {
                let clauses: Vec<String> = columns
                    .iter()
                    .map(|c| format!("CAST({} AS TEXT) LIKE ?", quote_ident(c)))
                    .collect();
                let pattern = format!("%{text}%");
                (
                    format!(" WHERE {}", clauses.join(" OR ")),
                    vec![pattern; columns.len()],
                )
            }
            _ => (String::new(), Vec::new()),
        };

        let total_count: usize = conn.query_row(
            &format!("SELECT COUNT(*) FROM results{where_clause}"),
            params_from_iter(filter_params.iter()),
            |row| row.get::<_, i64>(0),
        )? as usize;

        let mut sql = format!("SELECT * FROM results{where_clause}");
        if let Some(sort_col) = &options.sort_column {
            sql.push_str(&format!(
                " ORDER BY {} {} NULLS LAST",
                quote_ident(sort_col),
                options.sort_dir.keyword()
            ));
        }
        if let Some(limit) = options.limit {
            sql.push_str(&format!(" LIMIT {limit} OFFSET {}", options.offset));
        }

        let mut stmt = conn.prepare(&sql)?;
        let col_count = columns.len();
        let mut out: Vec<Row> = Vec::new();
        let mut rows = stmt.query(params_from_iter(filter_params.iter()))?;
        while let Some(row) = rows.next()? {
            let mut cells: Row = Vec::with_capacity(col_count);
            for i in 0..col_count {
                cells.push(cell_from_sql(row.get_ref(i)?));
            }
            out.push(cells);
        }

        Ok((columns, out, total_count))
    }

    /// Delete the result file for `hash`. Returns whether a file was removed.
    pub fn delete(&self, result_hash: &str) -> Result<bool> {
        let path = self.entry_path(result_hash);
        if path.exists() {
            std::fs::remove_file(&path)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Delete every cache file whose hash is not in `valid_hashes`.
    ///
    /// The caller computes the referenced-hash set first (from run
    /// records); a referenced file is never deleted here regardless of
    /// age. An absent cache directory is not an error.
    pub fn purge(&self, valid_hashes: &HashSet<String>) -> Result<usize> {
        if !self.root.exists() {
            return Ok(0);
        }

        let mut deleted = 0;
        for shard in std::fs::read_dir(&self.root)? {
            let shard = shard?;
            if !shard.file_type()?.is_dir() {
                continue;
            }
            for entry in std::fs::read_dir(shard.path())? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("db") {
                    continue;
                }
                let Some(file_hash) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                if !valid_hashes.contains(file_hash) {
                    std::fs::remove_file(&path)?;
                    deleted += 1;
                }
            }
        }

        info!(deleted, "cache purge complete");
        Ok(deleted)
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn stored_columns(conn: &Connection) -> Result<Vec<String>> {
    let json: String = conn.query_row(
        "SELECT value FROM result_meta WHERE key = 'columns'",
        [],
        |row| row.get(0),
    )?;
    Ok(serde_json::from_str(&json).unwrap_or_default())
}

/// Map a JSON cell to its native storage class. Columns are declared with
/// no type so SQLite stores values exactly as bound.
fn cell_to_sql(cell: &Value) -> rusqlite::types::Value {
    match cell {
        Value::Null => rusqlite::types::Value::Null,
        Value::Bool(b) => rusqlite::types::Value::Integer(*b as i64),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                rusqlite::types::Value::Integer(i)
            } else {
                rusqlite::types::Value::Real(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => rusqlite::types::Value::Text(s.clone()),
        other => rusqlite::types::Value::Text(other.to_string()),
    }
}

fn cell_from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::from(v),
        ValueRef::Real(v) => serde_json::Number::from_f64(v)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(hex::encode(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_cache() -> (tempfile::TempDir, ResultCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::new(dir.path().join("cache"));
        (dir, cache)
    }

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn write_sample(cache: &ResultCache, hash: &str) {
        let rows = vec![
            vec![json!(1), json!("alpha"), json!(10.5)],
            vec![json!(2), json!("beta"), Value::Null],
            vec![json!(3), json!("Alphabet"), json!(2.0)],
        ];
        cache
            .write(hash, &cols(&["id", "name", "score"]), &cols(&["", "", ""]), &rows)
            .unwrap();
    }

    const HASH: &str = "ab12cd34ab12cd34ab12cd34ab12cd34ab12cd34ab12cd34ab12cd34ab12cd34";

    #[test]
    fn round_trip_preserves_columns_and_rows() {
        let (_dir, cache) = sample_cache();
        write_sample(&cache, HASH);

        let (columns, rows, total) = cache.read(HASH, &ReadOptions::default()).unwrap();
        assert_eq!(columns, cols(&["id", "name", "score"]));
        assert_eq!(total, 3);
        assert_eq!(rows[0], vec![json!(1), json!("alpha"), json!(10.5)]);
        assert_eq!(rows[1], vec![json!(2), json!("beta"), Value::Null]);
        assert_eq!(rows[2], vec![json!(3), json!("Alphabet"), json!(2.0)]);
    }

    #[test]
    fn write_is_idempotent() {
        let (_dir, cache) = sample_cache();
        write_sample(&cache, HASH);

        // Second write with different content is a no-op.
        cache
            .write(HASH, &cols(&["other"]), &cols(&[""]), &[vec![json!(99)]])
            .unwrap();
        let (columns, rows, _) = cache.read(HASH, &ReadOptions::default()).unwrap();
        assert_eq!(columns, cols(&["id", "name", "score"]));
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn missing_hash_reads_empty() {
        let (_dir, cache) = sample_cache();
        let (columns, rows, total) = cache.read(HASH, &ReadOptions::default()).unwrap();
        assert!(columns.is_empty());
        assert!(rows.is_empty());
        assert_eq!(total, 0);
    }

    #[test]
    fn filter_is_case_insensitive_and_counts_filtered() {
        let (_dir, cache) = sample_cache();
        write_sample(&cache, HASH);

        let options = ReadOptions {
            filter_text: Some("ALPHA".to_string()),
            ..Default::default()
        };
        let (_, rows, total) = cache.read(HASH, &options).unwrap();
        assert_eq!(total, 2); // "alpha" and "Alphabet"
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn filter_matches_any_column() {
        let (_dir, cache) = sample_cache();
        write_sample(&cache, HASH);

        let options = ReadOptions {
            filter_text: Some("10.5".to_string()),
            ..Default::default()
        };
        let (_, rows, total) = cache.read(HASH, &options).unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0][1], json!("alpha"));
    }

    #[test]
    fn sort_places_nulls_last_in_both_directions() {
        let (_dir, cache) = sample_cache();
        write_sample(&cache, HASH);

        for dir in [SortDirection::Asc, SortDirection::Desc] {
            let options = ReadOptions {
                sort_column: Some("score".to_string()),
                sort_dir: dir,
                ..Default::default()
            };
            let (_, rows, _) = cache.read(HASH, &options).unwrap();
            assert_eq!(rows.last().unwrap()[2], Value::Null, "direction {dir:?}");
        }

        let asc = ReadOptions {
            sort_column: Some("score".to_string()),
            ..Default::default()
        };
        let (_, rows, _) = cache.read(HASH, &asc).unwrap();
        assert_eq!(rows[0][2], json!(2.0));
        assert_eq!(rows[1][2], json!(10.5));
    }

    #[test]
    fn limit_and_offset_page_through() {
        let (_dir, cache) = sample_cache();
        write_sample(&cache, HASH);

        let options = ReadOptions {
            limit: Some(1),
            offset: 1,
            ..Default::default()
        };
        let (_, rows, total) = cache.read(HASH, &options).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0], json!(2));
        assert_eq!(total, 3); // total ignores paging
    }

    #[test]
    fn unknown_sort_column_is_an_error() {
        let (_dir, cache) = sample_cache();
        write_sample(&cache, HASH);

        let options = ReadOptions {
            sort_column: Some("nope".to_string()),
            ..Default::default()
        };
        let err = cache.read(HASH, &options).unwrap_err();
        assert!(matches!(err, CacheError::UnknownColumn(c) if c == "nope"));
    }

    #[test]
    fn purge_keeps_referenced_and_is_idempotent() {
        let (_dir, cache) = sample_cache();
        let keep = "aa11".to_string() + &"0".repeat(60);
        let drop = "bb22".to_string() + &"0".repeat(60);
        write_sample(&cache, &keep);
        write_sample(&cache, &drop);

        let valid: HashSet<String> = [keep.clone()].into_iter().collect();
        assert_eq!(cache.purge(&valid).unwrap(), 1);
        assert!(cache.exists(&keep));
        assert!(!cache.exists(&drop));

        // Second run removes nothing.
        assert_eq!(cache.purge(&valid).unwrap(), 0);
    }

    #[test]
    fn purge_tolerates_absent_root() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::new(dir.path().join("never-created"));
        assert_eq!(cache.purge(&HashSet::new()).unwrap(), 0);
    }

    #[test]
    fn delete_reports_whether_file_existed() {
        let (_dir, cache) = sample_cache();
        write_sample(&cache, HASH);
        assert!(cache.delete(HASH).unwrap());
        assert!(!cache.delete(HASH).unwrap());
    }
}
