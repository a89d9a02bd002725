//! Session repository trait.
//!
//! Defines the serialize/restore boundary for session persistence.

use super::model::SessionRecord;
use anyhow::Result;
use async_trait::async_trait;

/// An abstract repository for managing session persistence.
///
/// This trait defines the contract for persisting and retrieving session
/// records, decoupling the controller from the specific storage mechanism
/// (e.g., JSON files, database, remote API).
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Finds a session record by its session ID.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(SessionRecord))`: Record found
    /// - `Ok(None)`: No record stored under this ID
    /// - `Err(_)`: Error occurred during retrieval
    async fn find_by_id(&self, session_id: &str) -> Result<Option<SessionRecord>>;

    /// Saves a session record, replacing any previous version.
    async fn save(&self, record: &SessionRecord) -> Result<()>;

    /// Deletes a session record (succeeds if it didn't exist).
    async fn delete(&self, session_id: &str) -> Result<()>;

    /// Lists all stored records, most recently updated first.
    async fn list_all(&self) -> Result<Vec<SessionRecord>>;
}
