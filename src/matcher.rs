//! Request matching and the built-in in-memory recordset store

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::exchange::{Exchange, RequestKey};
use crate::{Result, RetraceError};

/// Maximum recordset name length in bytes
pub const MAX_RECORDSET_NAME_LEN: usize = 255;

/// Finds recorded exchanges for incoming requests and stores new ones.
///
/// The engine uses exactly one implementation at a time: the built-in
/// [`RecordsetStore`] until an external matcher is registered, then the
/// external one for all four operations.
pub trait Matcher: Send + Sync {
    /// First exchange in `recordset` matching `key`.
    ///
    /// `key` carries the full request, headers and decoded body included.
    ///
    /// # Errors
    ///
    /// Returns error if the lookup itself fails
    fn find_request(&self, recordset: &str, key: &RequestKey) -> Result<Option<Arc<Exchange>>>;

    /// Append an exchange to `recordset`
    ///
    /// # Errors
    ///
    /// Returns error if the exchange cannot be stored
    fn add_request(&self, recordset: &str, exchange: Exchange) -> Result<()>;

    /// All exchanges of `recordset` in insertion order
    ///
    /// # Errors
    ///
    /// Returns error if the recordset cannot be read
    fn get_requests(&self, recordset: &str) -> Result<Vec<Arc<Exchange>>>;

    /// Replace the contents of `recordset`
    ///
    /// # Errors
    ///
    /// Returns error if the recordset cannot be written
    fn set_requests(&self, recordset: &str, exchanges: Vec<Exchange>) -> Result<()>;
}

#[derive(Default)]
struct Recordset {
    exchanges: Vec<Arc<Exchange>>,
    /// Fingerprint to position of its first exchange
    first_by_fingerprint: HashMap<[u8; 32], usize>,
}

impl Recordset {
    fn from_exchanges(exchanges: Vec<Exchange>) -> Self {
        let mut recordset = Self::default();
        for exchange in exchanges {
            recordset.push(exchange);
        }
        recordset
    }

    fn push(&mut self, exchange: Exchange) {
        let position = self.exchanges.len();
        self.first_by_fingerprint
            .entry(exchange.fingerprint())
            .or_insert(position);
        self.exchanges.push(Arc::new(exchange));
    }

    fn find(&self, key: &RequestKey, fingerprint: &[u8; 32]) -> Option<Arc<Exchange>> {
        let position = *self.first_by_fingerprint.get(fingerprint)?;

        if let Some(candidate) = self.exchanges.get(position) {
            if key.matches(candidate) {
                return Some(Arc::clone(candidate));
            }
        }

        // Fingerprint collision: fall back to an ordered scan.
        self.exchanges
            .iter()
            .find(|exchange| key.matches(exchange))
            .cloned()
    }
}

/// In-memory recordsets keyed by name.
///
/// Mutations of one recordset are serialized by the map's shard lock;
/// different recordsets proceed independently.
#[derive(Default)]
pub struct RecordsetStore {
    recordsets: DashMap<String, Recordset>,
}

impl RecordsetStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Exchanges of `name`, empty if unknown
    #[must_use]
    pub fn get(&self, name: &str) -> Vec<Arc<Exchange>> {
        self.recordsets
            .get(name)
            .map(|recordset| recordset.exchanges.clone())
            .unwrap_or_default()
    }

    /// Replace the whole recordset
    ///
    /// # Errors
    ///
    /// Returns error if `name` is not a valid recordset name
    pub fn set(&self, name: &str, exchanges: Vec<Exchange>) -> Result<()> {
        validate_recordset_name(name)?;
        debug!(
            "Setting recordset '{}' ({} exchanges)",
            name,
            exchanges.len()
        );
        self.recordsets
            .insert(name.to_string(), Recordset::from_exchanges(exchanges));
        Ok(())
    }

    /// Append to an initialized recordset
    ///
    /// # Errors
    ///
    /// Returns `UnknownRecordset` if `name` was never initialized with `set`
    pub fn append(&self, name: &str, exchange: Exchange) -> Result<()> {
        let mut recordset = self
            .recordsets
            .get_mut(name)
            .ok_or_else(|| RetraceError::UnknownRecordset(name.to_string()))?;
        recordset.push(exchange);
        debug!(
            "Appended to recordset '{}' (count: {})",
            name,
            recordset.exchanges.len()
        );
        Ok(())
    }

    /// First exchange in `name` matching `key`
    #[must_use]
    pub fn find(&self, name: &str, key: &RequestKey) -> Option<Arc<Exchange>> {
        let fingerprint = key.fingerprint();
        debug!(
            "Lookup {} {} (hash: {}) in recordset '{}'",
            key.method,
            key.url,
            hex::encode(&fingerprint[..8]),
            name
        );
        self.recordsets.get(name)?.find(key, &fingerprint)
    }

    /// Drop a recordset, returning whether it existed
    pub fn remove(&self, name: &str) -> bool {
        self.recordsets.remove(name).is_some()
    }

    /// Whether `name` has been initialized
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.recordsets.contains_key(name)
    }

    /// Number of exchanges in `name`
    #[must_use]
    pub fn len(&self, name: &str) -> usize {
        self.recordsets
            .get(name)
            .map_or(0, |recordset| recordset.exchanges.len())
    }

    /// Number of initialized recordsets
    #[must_use]
    pub fn recordset_count(&self) -> usize {
        self.recordsets.len()
    }

    /// Remove all recordsets
    pub fn clear(&self) {
        self.recordsets.clear();
    }
}

impl Matcher for RecordsetStore {
    fn find_request(&self, recordset: &str, key: &RequestKey) -> Result<Option<Arc<Exchange>>> {
        Ok(self.find(recordset, key))
    }

    fn add_request(&self, recordset: &str, exchange: Exchange) -> Result<()> {
        self.append(recordset, exchange)
    }

    fn get_requests(&self, recordset: &str) -> Result<Vec<Arc<Exchange>>> {
        Ok(self.get(recordset))
    }

    fn set_requests(&self, recordset: &str, exchanges: Vec<Exchange>) -> Result<()> {
        self.set(recordset, exchanges)
    }
}

/// Validate a recordset name
///
/// # Errors
///
/// Returns error if the name is empty, too long or contains NUL
fn validate_recordset_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(RetraceError::InvalidRecordsetName(
            "Recordset name cannot be empty".to_string(),
        ));
    }

    if name.len() > MAX_RECORDSET_NAME_LEN {
        return Err(RetraceError::InvalidRecordsetName(format!(
            "Recordset name too long: {} > {MAX_RECORDSET_NAME_LEN}",
            name.len()
        )));
    }

    if name.contains('\0') {
        return Err(RetraceError::InvalidRecordsetName(
            "Recordset name cannot contain null bytes".to_string(),
        ));
    }

    Ok(())
}
