//! Named analytic functions an `APPLY` statement can invoke over a trunk
//! frame. Real analytics are host plugins (subprocess, container, remote
//! service); the registry here only covers the handful of pure in-process
//! transforms useful for tests and illustrates the extension point hosts are
//! expected to fill with their own `scheme://name` handlers.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use crate::error::{Error, Reason, Result};
use crate::ir::{Row, Value};

pub type AnalyticFn = Arc<dyn Fn(&[Row], &[String]) -> Result<Vec<Row>> + Send + Sync>;

/// Holds named analytic functions, mirroring [crate::mapping::MappingRegistry]'s
/// shape: a small illustrative default set, extensible at runtime.
#[derive(Clone)]
pub struct AnalyticsRegistry {
    functions: Arc<RwLock<std::collections::HashMap<String, AnalyticFn>>>,
}

impl Default for AnalyticsRegistry {
    fn default() -> Self {
        let registry = AnalyticsRegistry {
            functions: Arc::new(RwLock::new(std::collections::HashMap::new())),
        };
        registry.register("dedup", Arc::new(dedup));
        registry.register("count", Arc::new(count));
        registry.register("limit", Arc::new(limit));
        registry
    }
}

impl AnalyticsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, f: AnalyticFn) {
        self.functions
            .write()
            .expect("analytics registry lock poisoned")
            .insert(name.into(), f);
    }

    pub fn run(&self, name: &str, args: &[String], rows: &[Row]) -> Result<Vec<Row>> {
        let f = self
            .functions
            .read()
            .expect("analytics registry lock poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| {
                Error::new(Reason::BackendError {
                    message: format!("no analytic registered under the name `{name}`"),
                })
            })?;
        f(rows, args)
    }
}

fn dedup(rows: &[Row], _args: &[String]) -> Result<Vec<Row>> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for row in rows {
        let key: Vec<(String, String)> = row.iter().map(|(k, v)| (k.clone(), v.to_string())).collect();
        if seen.insert(key) {
            out.push(row.clone());
        }
    }
    Ok(out)
}

fn count(rows: &[Row], _args: &[String]) -> Result<Vec<Row>> {
    let mut row = Row::new();
    row.insert("count".to_string(), Value::Int(rows.len() as i64));
    Ok(vec![row])
}

fn limit(rows: &[Row], args: &[String]) -> Result<Vec<Row>> {
    let n = args
        .iter()
        .find_map(|a| a.strip_prefix("n=").and_then(|n| n.parse::<usize>().ok()))
        .unwrap_or(rows.len());
    Ok(rows.iter().take(n).cloned().collect())
}
