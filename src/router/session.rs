use super::diagnostics::ConnectionRecord;
use crate::classifier::{NO_TABLE, classify};
use crate::core::{ConnectionKey, Operation};
use std::collections::HashSet;
use uuid::Uuid;

/// Reads mentioning a sticky table within this many characters go to a primary.
const STICKY_SCAN_CHARS: usize = 1000;

/// Per-request routing state.
///
/// Holds what the router remembers between statements of one logical
/// request: tables written so far (sticky writes), the "writes only" switch
/// and the log of connection attempts.
#[derive(Debug, Clone)]
pub struct Session {
    id: Uuid,
    writes_only: bool,
    sticky_tables: HashSet<String>,
    last_table: Option<String>,
    last_dataset: Option<String>,
    last_key: Option<ConnectionKey>,
    connections: Vec<ConnectionRecord>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            writes_only: false,
            sticky_tables: HashSet::new(),
            last_table: None,
            last_dataset: None,
            last_key: None,
            connections: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Routes every subsequent statement of this session to primaries.
    pub fn send_writes_only(&mut self) {
        self.writes_only = true;
    }

    pub fn is_writes_only(&self) -> bool {
        self.writes_only
    }

    pub fn is_sticky(&self, table: &str) -> bool {
        self.sticky_tables.contains(table)
    }

    pub fn sticky_tables(&self) -> impl Iterator<Item = &str> {
        self.sticky_tables.iter().map(String::as_str)
    }

    /// Decides Read vs Write for `sql` against `table`.
    ///
    /// Writes win when the session is writes-only, the statement itself
    /// writes, the table was written earlier in this session, or the start of
    /// the statement mentions any written table (joins).
    pub fn operation_for(&self, sql: &str, table: &str) -> Operation {
        if self.writes_only || self.sticky_tables.contains(table) {
            return Operation::Write;
        }
        if classify(sql) == Operation::Write {
            return Operation::Write;
        }
        if self.mentions_sticky_table(sql) {
            return Operation::Write;
        }
        Operation::Read
    }

    fn mentions_sticky_table(&self, sql: &str) -> bool {
        if self.sticky_tables.is_empty() {
            return false;
        }
        let head: String = sql.chars().take(STICKY_SCAN_CHARS).collect();
        let head = head.to_lowercase();
        self.sticky_tables
            .iter()
            .any(|table| head.contains(&table.to_lowercase()))
    }

    /// Remembers a routing decision; written tables become sticky.
    pub(crate) fn note_route(&mut self, table: &str, dataset: &str, key: &ConnectionKey) {
        if key.operation == Operation::Write && table != NO_TABLE {
            self.sticky_tables.insert(table.to_string());
        }
        self.last_table = Some(table.to_string());
        self.last_dataset = Some(dataset.to_string());
        self.last_key = Some(key.clone());
    }

    pub(crate) fn record(&mut self, record: ConnectionRecord) {
        self.connections.push(record);
    }

    pub fn last_table(&self) -> Option<&str> {
        self.last_table.as_deref()
    }

    pub fn last_dataset(&self) -> Option<&str> {
        self.last_dataset.as_deref()
    }

    pub fn last_key(&self) -> Option<&ConnectionKey> {
        self.last_key.as_ref()
    }

    /// Every connection attempt made for this session, oldest first.
    pub fn connections(&self) -> &[ConnectionRecord] {
        &self.connections
    }

    pub fn last_connection(&self) -> Option<&ConnectionRecord> {
        self.connections.last()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
