pub mod candidates;
pub mod loader;

use crate::core::{Operation, Result, RouterError, ServerDescriptor};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

pub use candidates::{Candidate, CandidatePlan, build_candidates};
pub use loader::{DatasetSpec, ServerSpec, TopologySpec};

/// Priority group number -> servers in that tier.
pub type GroupMap = BTreeMap<u32, Vec<Arc<ServerDescriptor>>>;

/// Servers of one logical dataset, split by operation.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub name: String,
    /// Dataset-wide lag threshold in seconds; per-server values take precedence.
    pub lag_threshold: Option<f64>,
    read: GroupMap,
    write: GroupMap,
}

impl Dataset {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn groups(&self, operation: Operation) -> &GroupMap {
        match operation {
            Operation::Read => &self.read,
            Operation::Write => &self.write,
        }
    }
}

/// Static table name -> dataset directory.
#[derive(Debug, Clone, Default)]
pub struct TableMap {
    tables: HashMap<String, String>,
}

impl TableMap {
    pub fn insert(&mut self, table: impl Into<String>, dataset: impl Into<String>) {
        self.tables.insert(table.into(), dataset.into());
    }

    pub fn get(&self, table: &str) -> Option<&str> {
        self.tables.get(table).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Registry of datasets, their priority groups and the table map.
///
/// Built at configuration time and treated as read-only while routing.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    datasets: HashMap<String, Dataset>,
    tables: TableMap,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a server into its dataset's read and/or write groups.
    ///
    /// `read == 0` keeps it out of the read groups, `write == 0` out of the
    /// write groups.
    pub fn add_server(&mut self, server: ServerDescriptor) -> Result<()> {
        if server.dataset.trim().is_empty() {
            return Err(RouterError::Config(format!(
                "server {} has an empty dataset name",
                server.host_and_port()
            )));
        }
        if server.host.trim().is_empty() {
            return Err(RouterError::Config(format!(
                "server in dataset '{}' has an empty host",
                server.dataset
            )));
        }

        let (read, write) = (server.read, server.write);
        let server = Arc::new(server);
        let dataset = self
            .datasets
            .entry(server.dataset.clone())
            .or_insert_with(|| Dataset::new(&server.dataset));

        if read > 0 {
            dataset.read.entry(read).or_default().push(Arc::clone(&server));
        }
        if write > 0 {
            dataset.write.entry(write).or_default().push(server);
        }
        Ok(())
    }

    /// Records which dataset holds `table`.
    pub fn add_table(&mut self, dataset: &str, table: &str) {
        self.tables.insert(table, dataset);
    }

    pub fn set_dataset_lag_threshold(&mut self, dataset: &str, seconds: Option<f64>) {
        self.datasets
            .entry(dataset.to_string())
            .or_insert_with(|| Dataset::new(dataset))
            .lag_threshold = seconds;
    }

    pub fn dataset(&self, name: &str) -> Option<&Dataset> {
        self.datasets.get(name)
    }

    pub fn tables(&self) -> &TableMap {
        &self.tables
    }

    /// True when no dataset has any server registered.
    pub fn is_empty(&self) -> bool {
        self.datasets
            .values()
            .all(|dataset| dataset.read.is_empty() && dataset.write.is_empty())
    }

    /// Returns the non-empty group map for `(dataset, operation)`.
    pub fn groups_for(&self, dataset: &str, operation: Operation) -> Result<&GroupMap> {
        self.datasets
            .get(dataset)
            .map(|entry| entry.groups(operation))
            .filter(|groups| groups.values().any(|servers| !servers.is_empty()))
            .ok_or_else(|| RouterError::NoServersForOperation {
                dataset: dataset.to_string(),
                operation,
            })
    }
}
