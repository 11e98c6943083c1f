//! Owner-scoped portfolio container.

use crate::domain::{PortfolioId, TimeMs};
use serde::{Deserialize, Serialize};

/// A portfolio owns its transactions and positions; deleting it cascades to both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Portfolio {
    pub id: PortfolioId,
    /// Opaque reference to the owning user, supplied by the auth layer.
    pub owner: String,
    pub name: String,
    pub created_at: TimeMs,
}

impl Portfolio {
    pub fn new(owner: String, name: String) -> Self {
        Self {
            id: PortfolioId::new_v4(),
            owner,
            name,
            created_at: TimeMs::now(),
        }
    }
}
