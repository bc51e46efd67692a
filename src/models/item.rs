use serde::{Deserialize, Serialize};

use super::ItemId;

/// Display metadata for an item, as supplied by the ingestion side
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogItem {
    /// Identifier shared with the rating data
    pub item_id: ItemId,
    /// Human readable title
    pub title: String,
    #[serde(default)]
    pub genres: Vec<String>,
    /// External link, passed through untouched
    #[serde(default)]
    pub link: Option<String>,
}

/// A ranked item with its predicted score
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Recommendation {
    pub item_id: ItemId,
    pub score: f64,
}
