use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The parties attached to a signable document.
///
/// Signature permission checks resolve against this record: the owner, the
/// counterparty, or an administrator may sign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub owner_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counterparty_id: Option<Uuid>,
    pub created_at: bson::DateTime,
}

impl DocumentRecord {
    pub fn is_party(&self, principal_id: Uuid) -> bool {
        self.owner_id == principal_id || self.counterparty_id == Some(principal_id)
    }
}
