//! Table/statement -> dataset resolution.

use crate::callbacks::{CallbackChain, DatasetDecision, DatasetFound, DatasetQuery};
use crate::core::{Result, RouterError, RoutingOverride};
use crate::topology::TableMap;

/// Dataset chosen for a statement plus any structured override.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub dataset: String,
    pub routing: Option<RoutingOverride>,
}

/// Maps tables to datasets via the static table map, falling back to the
/// dataset callback chain and finally the default dataset.
#[derive(Clone)]
pub struct DatasetResolver {
    tables: TableMap,
    chain: CallbackChain<DatasetQuery, DatasetDecision>,
    found: CallbackChain<DatasetFound, ()>,
    default_dataset: String,
}

impl DatasetResolver {
    pub fn new(
        tables: TableMap,
        chain: CallbackChain<DatasetQuery, DatasetDecision>,
        found: CallbackChain<DatasetFound, ()>,
        default_dataset: impl Into<String>,
    ) -> Self {
        Self {
            tables,
            chain,
            found,
            default_dataset: default_dataset.into(),
        }
    }

    /// Resolves the dataset and notifies the dataset-found handlers.
    pub fn resolve(&self, table: &str, sql: &str) -> Result<Resolution> {
        let resolution = self.lookup(table, sql)?;
        self.found.run(&DatasetFound {
            dataset: resolution.dataset.clone(),
            table: table.to_string(),
        });
        Ok(resolution)
    }

    /// Same as [`resolve`](Self::resolve) without the dataset-found
    /// notification. Dataset callbacks still run.
    pub fn lookup(&self, table: &str, sql: &str) -> Result<Resolution> {
        let resolution = match self.tables.get(table) {
            Some(dataset) => Resolution {
                dataset: dataset.to_string(),
                routing: None,
            },
            None => self.resolve_with_callbacks(table, sql),
        };

        if resolution.dataset.trim().is_empty() {
            return Err(RouterError::DatasetUnresolved {
                table: table.to_string(),
            });
        }

        Ok(resolution)
    }

    fn resolve_with_callbacks(&self, table: &str, sql: &str) -> Resolution {
        let query = DatasetQuery {
            sql: sql.to_string(),
            table: table.to_string(),
        };

        match self.chain.run(&query) {
            Some(DatasetDecision::Dataset(dataset)) => Resolution {
                dataset,
                routing: None,
            },
            Some(DatasetDecision::Override(routing)) => Resolution {
                dataset: routing
                    .dataset
                    .clone()
                    .unwrap_or_else(|| self.default_dataset.clone()),
                routing: Some(routing),
            },
            None => Resolution {
                dataset: self.default_dataset.clone(),
                routing: None,
            },
        }
    }
}
