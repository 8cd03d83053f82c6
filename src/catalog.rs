//! Metadata collaborators consumed by the analyzer.
//!
//! The analyzer never owns schema or statistics. It asks a [`Catalog`] for databases, tables and
//! external procedures, and the join planner asks the same object, through its
//! [`StatsProvider`] supertrait, for index statistics while costing alternatives. All lookups are
//! synchronous, failures are reported as [`anyhow::Error`] and propagated verbatim.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::Bound;
use std::sync::Arc;

use anyhow::anyhow;
use strum_macros::Display;

use crate::plan::Literal;

#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub nullable: bool,
}

impl ColumnDef {
    pub fn new<S: Into<String>>(name: S, nullable: bool) -> Self {
        Self {
            name: name.into(),
            nullable,
        }
    }
}

/// Whether an index can return rows in key order.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Display)]
pub enum IndexOrder {
    /// Globally sorted, e.g. a btree.
    Ordered,
    /// Point lookups only, e.g. a hash index.
    Unordered,
}

/// Restriction on one index column.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub enum ColumnRange {
    Point(Literal),
    Range {
        lower: Bound<Literal>,
        upper: Bound<Literal>,
    },
    All,
}

impl ColumnRange {
    pub fn is_point(&self) -> bool {
        matches!(self, ColumnRange::Point(_))
    }
}

impl fmt::Display for ColumnRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnRange::Point(v) => write!(f, "[{v}, {v}]"),
            ColumnRange::Range { lower, upper } => {
                match lower {
                    Bound::Included(v) => write!(f, "[{v}, ")?,
                    Bound::Excluded(v) => write!(f, "({v}, ")?,
                    Bound::Unbounded => write!(f, "(-∞, ")?,
                }
                match upper {
                    Bound::Included(v) => write!(f, "{v}]"),
                    Bound::Excluded(v) => write!(f, "{v})"),
                    Bound::Unbounded => write!(f, "∞)"),
                }
            }
            ColumnRange::All => write!(f, "(-∞, ∞)"),
        }
    }
}

/// A physical index as the storage layer exposes it.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct IndexDef {
    pub id: String,
    pub columns: Vec<String>,
    pub unique: bool,
    pub order: IndexOrder,
}

impl IndexDef {
    pub fn new<S: Into<String>>(id: S, columns: &[&str], unique: bool, order: IndexOrder) -> Self {
        Self {
            id: id.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique,
            order,
        }
    }

    /// Tests whether the index can serve a lookup restricted by `ranges`, one entry per index
    /// column. Unordered indexes only support full-key point lookups.
    pub fn can_support(&self, ranges: &[ColumnRange]) -> bool {
        if ranges.len() != self.columns.len() {
            return false;
        }
        match self.order {
            IndexOrder::Ordered => true,
            IndexOrder::Unordered => ranges.iter().all(ColumnRange::is_point),
        }
    }
}

#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct Table {
    pub database: String,
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub indexes: Vec<IndexDef>,
}

impl Table {
    pub fn new<S: Into<String>>(database: S, name: S, columns: Vec<ColumnDef>) -> Self {
        Self {
            database: database.into(),
            name: name.into(),
            columns,
            indexes: vec![],
        }
    }

    pub fn with_index(mut self, index: IndexDef) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Clone, Debug, Default)]
pub struct Database {
    pub name: String,
    pub tables: BTreeMap<String, Arc<Table>>,
}

/// Stored procedure implemented outside SQL.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct ExternalProcedure {
    pub name: String,
    pub arity: usize,
}

/// Identifies the statistics of one index.
#[derive(Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct StatQualifier {
    pub database: String,
    pub schema: String,
    pub table: String,
    pub index: String,
}

impl StatQualifier {
    pub fn new(database: &str, schema: &str, table: &str, index: &str) -> Self {
        Self {
            database: database.to_lowercase(),
            schema: schema.to_lowercase(),
            table: table.to_lowercase(),
            index: index.to_lowercase(),
        }
    }
}

impl fmt::Display for StatQualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.database, self.table, self.index)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Statistic {
    pub qualifier: StatQualifier,
    pub columns: Vec<String>,
    pub row_count: u64,
    pub distinct_count: u64,
    pub null_count: u64,
}

impl Statistic {
    pub fn new(
        qualifier: StatQualifier,
        columns: &[&str],
        row_count: u64,
        distinct_count: u64,
    ) -> Self {
        Self {
            qualifier,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            row_count,
            distinct_count,
            null_count: 0,
        }
    }

    /// Expected rows matching one distinct key.
    pub fn rows_per_key(&self) -> f64 {
        if self.distinct_count == 0 {
            return self.row_count as f64;
        }
        self.row_count as f64 / self.distinct_count as f64
    }
}

pub trait StatsProvider: Send + Sync {
    fn get_stats(
        &self,
        qualifier: &StatQualifier,
        columns: &[String],
    ) -> anyhow::Result<Option<Statistic>>;

    fn row_count(&self, database: &str, table: &str) -> anyhow::Result<Option<u64>>;
}

pub trait Catalog: StatsProvider {
    fn database(&self, name: &str) -> anyhow::Result<Arc<Database>>;

    fn all_databases(&self) -> Vec<Arc<Database>>;

    fn table_schema(&self, database: &str, schema: &str, table: &str) -> anyhow::Result<Arc<Table>>;

    fn external_stored_procedure(
        &self,
        name: &str,
        arity: usize,
    ) -> anyhow::Result<Option<ExternalProcedure>>;
}

/// Catalog backed by hash maps, populated programmatically.
#[derive(Clone, Debug, Default)]
pub struct InMemoryCatalog {
    databases: BTreeMap<String, Database>,
    stats: HashMap<StatQualifier, Statistic>,
    row_counts: HashMap<(String, String), u64>,
    procedures: Vec<ExternalProcedure>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, table: Table) -> Arc<Table> {
        let table = Arc::new(table);
        let db = self
            .databases
            .entry(table.database.to_lowercase())
            .or_insert_with(|| Database {
                name: table.database.clone(),
                tables: BTreeMap::new(),
            });
        db.tables.insert(table.name.to_lowercase(), table.clone());
        table
    }

    pub fn add_stats(&mut self, stat: Statistic) {
        self.row_counts.insert(
            (stat.qualifier.database.clone(), stat.qualifier.table.clone()),
            stat.row_count,
        );
        self.stats.insert(stat.qualifier.clone(), stat);
    }

    pub fn set_row_count(&mut self, database: &str, table: &str, rows: u64) {
        self.row_counts
            .insert((database.to_lowercase(), table.to_lowercase()), rows);
    }

    pub fn add_external_procedure<S: Into<String>>(&mut self, name: S, arity: usize) {
        self.procedures.push(ExternalProcedure {
            name: name.into(),
            arity,
        });
    }
}

impl StatsProvider for InMemoryCatalog {
    fn get_stats(
        &self,
        qualifier: &StatQualifier,
        _columns: &[String],
    ) -> anyhow::Result<Option<Statistic>> {
        Ok(self.stats.get(qualifier).cloned())
    }

    fn row_count(&self, database: &str, table: &str) -> anyhow::Result<Option<u64>> {
        Ok(self
            .row_counts
            .get(&(database.to_lowercase(), table.to_lowercase()))
            .copied())
    }
}

impl Catalog for InMemoryCatalog {
    fn database(&self, name: &str) -> anyhow::Result<Arc<Database>> {
        self.databases
            .get(&name.to_lowercase())
            .map(|db| Arc::new(db.clone()))
            .ok_or_else(|| anyhow!("database not found: {}", name))
    }

    fn all_databases(&self) -> Vec<Arc<Database>> {
        self.databases
            .values()
            .map(|db| Arc::new(db.clone()))
            .collect()
    }

    fn table_schema(
        &self,
        database: &str,
        _schema: &str,
        table: &str,
    ) -> anyhow::Result<Arc<Table>> {
        self.database(database)?
            .tables
            .get(&table.to_lowercase())
            .cloned()
            .ok_or_else(|| anyhow!("table not found: {}.{}", database, table))
    }

    fn external_stored_procedure(
        &self,
        name: &str,
        arity: usize,
    ) -> anyhow::Result<Option<ExternalProcedure>> {
        Ok(self
            .procedures
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name) && p.arity == arity)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unordered_index_supports_points_only() {
        let idx = IndexDef::new("h", &["a", "b"], false, IndexOrder::Unordered);
        let points = vec![
            ColumnRange::Point(Literal::Int(1)),
            ColumnRange::Point(Literal::Int(2)),
        ];
        assert!(idx.can_support(&points));
        assert!(!idx.can_support(&[ColumnRange::Point(Literal::Int(1)), ColumnRange::All]));
        assert!(!idx.can_support(&points[..1]));

        let btree = IndexDef::new("b", &["a", "b"], false, IndexOrder::Ordered);
        assert!(btree.can_support(&[ColumnRange::Point(Literal::Int(1)), ColumnRange::All]));
    }

    #[test]
    fn test_in_memory_catalog_lookups() {
        let mut catalog = InMemoryCatalog::new();
        catalog.add_table(Table::new("db", "T", vec![ColumnDef::new("id", false)]));
        catalog.add_external_procedure("memory_inc", 1);

        assert!(catalog.table_schema("DB", "", "t").is_ok());
        assert!(catalog.table_schema("db", "", "missing").is_err());
        assert!(catalog.external_stored_procedure("memory_inc", 1).unwrap().is_some());
        assert!(catalog.external_stored_procedure("memory_inc", 2).unwrap().is_none());
        assert_eq!(catalog.all_databases().len(), 1);
    }
}
