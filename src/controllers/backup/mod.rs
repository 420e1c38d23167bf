//! Backup of a running Pulp, performed from inside a backup-manager pod.

use async_trait::async_trait;

use crate::Result;

pub mod database;

pub use database::{backup_database, DatabaseBackup};

/// Runs a command in a container and returns what it printed on stdout.
///
/// Failures are reported with [`crate::Error::exec_failed`], which keeps arguments such as
/// connection strings out of the error.
#[async_trait]
pub trait ContainerExec: Send + Sync {
    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: &[String],
    ) -> Result<String>;
}
