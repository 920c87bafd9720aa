//! The backend contract the evaluator issues SQL against: execute a
//! statement and get rows back, or materialize a frame as a named table.
//! The core never ships a concrete implementation (SQLite, Postgres, …) of
//! this trait; a host wires one up against whatever driver it uses, the way
//! `kestrel_interface_sqlalchemy` does for the Python implementation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Reason, Result};
use crate::ir::Row;
use crate::sql::Dialect;

/// A connection capable of running the SQL the translator produces and of
/// loading a result frame back in as a queryable table (used when an
/// `Analytic` node needs its predecessor's rows pulled in-process and its
/// output spliced back into the chain).
pub trait Connection {
    fn execute_query(&mut self, sql: &str) -> Result<Vec<Row>>;

    fn write_table(&mut self, name: &str, rows: &[Row]) -> Result<()>;

    fn dialect(&self) -> Dialect;
}

/// One named data source a Kestrel query's `FROM`/`scheme://name` may refer
/// to: which backend table backs it, how to render SQL for it, and which
/// data-model mapping (if any) normalizes its native columns to OCSF.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasourceProfile {
    pub scheme: String,
    pub table: String,
    pub dialect: Dialect,
    #[serde(default)]
    pub timestamp_column: Option<String>,
    #[serde(default)]
    pub mapping: Option<String>,
}

/// Host-supplied configuration resolving `scheme://name` data source URIs to
/// concrete backend tables. The core never reads this from disk or the
/// environment itself; a thin host binary deserializes it with `serde` and
/// passes it in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub datasources: BTreeMap<String, DatasourceProfile>,
}

impl Config {
    pub fn resolve(&self, name: &str) -> Result<&DatasourceProfile> {
        self.datasources.get(name).ok_or_else(|| {
            Error::new(Reason::SourceNotFound {
                name: name.to_string(),
            })
        })
    }
}
