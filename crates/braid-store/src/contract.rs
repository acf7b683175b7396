use serde_json::Value;

use braid_core::context::{ContextIdentifier, StoredContext};
use braid_core::execution::{Execution, ExecutionStatus};
use braid_core::ids::{ContextId, ExecutionId, ItemId};
use braid_core::items::Item;
use braid_core::messages::{self, ModelMessage};

use crate::error::StoreError;

/// The persistence boundary for threads.
///
/// The engine depends only on this trait, never on a concrete database, so
/// stores can be swapped per deployment. Implementations own their locking;
/// methods are synchronous because every shipped backend is a local,
/// short-held connection.
pub trait ThreadStore: Send + Sync {
    /// Look up a context by id or key. `Ok(None)` when nothing matches.
    fn get_context(&self, identifier: &ContextIdentifier) -> Result<Option<StoredContext>, StoreError>;

    /// Create a context. A `Key` identifier assigns the key (unique per
    /// store), an `Id` identifier provisions that exact id, `None` mints a
    /// fresh keyless context.
    fn create_context(
        &self,
        identifier: Option<&ContextIdentifier>,
        initial_content: Value,
    ) -> Result<StoredContext, StoreError>;

    /// Shallow-merge `patch` into the context's content blob. A non-object
    /// patch replaces the blob wholesale.
    fn patch_context_content(&self, id: &ContextId, patch: Value) -> Result<StoredContext, StoreError>;

    /// Append an item to a context's history.
    fn append_item(&self, context_id: &ContextId, item: &Item) -> Result<Item, StoreError>;

    /// Amend an item in place. Identity and ordering position are fixed:
    /// the stored `created_at` wins over the one on `item`.
    fn update_item(&self, item_id: &ItemId, item: &Item) -> Result<Item, StoreError>;

    fn get_item(&self, item_id: &ItemId) -> Result<Option<Item>, StoreError>;

    /// All items for a context, in creation order.
    fn get_items(&self, identifier: &ContextIdentifier) -> Result<Vec<Item>, StoreError>;

    fn create_execution(
        &self,
        context_id: &ContextId,
        trigger_item_id: &ItemId,
        reaction_item_id: &ItemId,
    ) -> Result<Execution, StoreError>;

    fn update_execution(
        &self,
        execution_id: &ExecutionId,
        status: ExecutionStatus,
        iteration: u32,
    ) -> Result<(), StoreError>;

    fn get_execution(&self, execution_id: &ExecutionId) -> Result<Option<Execution>, StoreError>;

    /// Converts items to model messages for the next reactor call.
    fn items_to_model_messages(&self, items: &[Item]) -> Vec<ModelMessage> {
        messages::items_to_model_messages(items)
    }
}
