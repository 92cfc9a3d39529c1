//! Built-in tables served by the catalog daemon.
//!
//! The reference workload is the TPC-H `nation` table (25 rows). Row values
//! are served as byte strings; SQL types are out of scope.

use crate::proto::TableInfo;

/// The 25 TPC-H nation names, in nation-key order.
pub const NATION_NAMES: [&str; 25] = [
    "ALGERIA",
    "ARGENTINA",
    "BRAZIL",
    "CANADA",
    "EGYPT",
    "ETHIOPIA",
    "FRANCE",
    "GERMANY",
    "INDIA",
    "INDONESIA",
    "IRAN",
    "IRAQ",
    "JAPAN",
    "JORDAN",
    "KENYA",
    "MOROCCO",
    "MOZAMBIQUE",
    "PERU",
    "CHINA",
    "ROMANIA",
    "SAUDI ARABIA",
    "VIETNAM",
    "RUSSIA",
    "UNITED KINGDOM",
    "UNITED STATES",
];

/// One built-in table.
pub struct Table {
    pub db: &'static str,
    pub name: &'static str,
    pub columns: &'static [&'static str],
    row_count: u64,
}

const TABLES: [Table; 2] = [
    Table {
        db: "tpch",
        name: "nation",
        columns: &["n_nationkey", "n_name"],
        row_count: NATION_NAMES.len() as u64,
    },
    // Zero rows, so plans against it produce an empty task list.
    Table {
        db: "test",
        name: "empty",
        columns: &["value"],
        row_count: 0,
    },
];

/// Look up a built-in table by qualified name.
pub fn lookup(db: &str, table: &str) -> Option<&'static Table> {
    TABLES.iter().find(|t| t.db == db && t.name == table)
}

impl Table {
    pub fn info(&self) -> TableInfo {
        TableInfo {
            columns: self.columns.iter().map(|c| c.to_string()).collect(),
            row_count: self.row_count,
        }
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.contains(&column)
    }

    /// Values for `column` over rows `[offset, offset + limit)`, clamped to
    /// the table's row count. `None` for an unknown column.
    pub fn column_slice(&self, column: &str, offset: u64, limit: u64) -> Option<Vec<Vec<u8>>> {
        if !self.has_column(column) {
            return None;
        }
        let start = offset.min(self.row_count) as usize;
        let end = offset.saturating_add(limit).min(self.row_count) as usize;
        let values = (start..end)
            .map(|row| match column {
                "n_nationkey" => row.to_string().into_bytes(),
                "n_name" => NATION_NAMES[row].as_bytes().to_vec(),
                _ => unreachable!("column checked above"),
            })
            .collect();
        Some(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nation_has_25_rows() {
        let table = lookup("tpch", "nation").unwrap();
        assert_eq!(table.info().row_count, 25);
        let names = table.column_slice("n_name", 0, 100).unwrap();
        assert_eq!(names.len(), 25);
        assert_eq!(names[0], b"ALGERIA");
        assert_eq!(names[24], b"UNITED STATES");
    }

    #[test]
    fn slices_clamp_to_row_count() {
        let table = lookup("tpch", "nation").unwrap();
        assert_eq!(table.column_slice("n_name", 20, 10).unwrap().len(), 5);
        assert!(table.column_slice("n_name", 25, 10).unwrap().is_empty());
        assert!(table.column_slice("no_such_column", 0, 1).is_none());
    }

    #[test]
    fn unknown_tables_are_absent() {
        assert!(lookup("tpch", "lineitem").is_none());
        assert!(lookup("default", "nation").is_none());
    }

    #[test]
    fn empty_table_serves_no_rows() {
        let table = lookup("test", "empty").unwrap();
        assert_eq!(table.info().row_count, 0);
        assert!(table.column_slice("value", 0, 10).unwrap().is_empty());
    }
}
