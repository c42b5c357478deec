//! Warehouse boundary

use crate::error::Result;
use crate::schema::TableSchema;
use crate::stage::StagedUnit;
use async_trait::async_trait;

/// Connection to the warehouse that destination tables live in
///
/// Any failure is local to the destination it was issued for.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Create the destination table if it does not exist
    async fn create_table(&self, destination: &str, schema: &TableSchema) -> Result<()>;

    /// Load staged units into the destination table
    ///
    /// Only the columns of `schema` are loaded; other fields of the staged
    /// records are left out.
    async fn populate_table(
        &self,
        destination: &str,
        schema: &TableSchema,
        units: &[StagedUnit],
    ) -> Result<()>;

    /// Remove a staged unit from the stage
    async fn remove_staged_unit(&self, unit: &StagedUnit) -> Result<()>;
}
