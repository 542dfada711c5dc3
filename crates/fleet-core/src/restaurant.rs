//! Restaurant identity and canonical id lookup
//!
//! Restaurants reach the system under several names: the backend id
//! (`rest_2`), a slug (`sweetdreams`) and the display name. All of them are
//! resolved once, at the boundary, through a [`RestaurantDirectory`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Canonical restaurant identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RestaurantId(pub String);

impl RestaurantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RestaurantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RestaurantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RestaurantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A restaurant known to the directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestaurantEntry {
    pub id: RestaurantId,
    pub display_name: String,
    /// Product ids starting with this prefix belong to the restaurant
    pub product_prefix: Option<String>,
}

/// Lookup table from every known alias to a canonical restaurant id
#[derive(Debug, Clone, Default)]
pub struct RestaurantDirectory {
    entries: Vec<RestaurantEntry>,
    aliases: HashMap<String, RestaurantId>,
}

impl RestaurantDirectory {
    /// Empty directory: every id passes through unchanged
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory seeded with the storefront's partner restaurants
    pub fn storefront() -> Self {
        Self::new()
            .with_restaurant("rest_2", "SweetDreams", Some("sd-"), &["sweetdreams"])
            .with_restaurant("restaurant_2", "Aloha Kitchen", Some("ak-"), &["aloha"])
    }

    /// Register a restaurant together with its aliases
    pub fn with_restaurant(
        mut self,
        id: &str,
        display_name: &str,
        product_prefix: Option<&str>,
        aliases: &[&str],
    ) -> Self {
        let canonical = RestaurantId::new(id);

        for alias in aliases.iter().copied().chain([id, display_name]) {
            self.aliases.insert(alias.to_lowercase(), canonical.clone());
        }

        self.entries.push(RestaurantEntry {
            id: canonical,
            display_name: display_name.to_string(),
            product_prefix: product_prefix.map(str::to_string),
        });
        self
    }

    /// Resolve any alias to its canonical id; unknown ids pass through verbatim
    pub fn canonical(&self, raw: &str) -> RestaurantId {
        let trimmed = raw.trim();
        self.aliases
            .get(&trimmed.to_lowercase())
            .cloned()
            .unwrap_or_else(|| RestaurantId::new(trimmed))
    }

    /// Resolve a restaurant from a product id prefix such as `sd-001`
    pub fn from_product_id(&self, product_id: &str) -> Option<RestaurantId> {
        self.entries
            .iter()
            .find(|entry| {
                entry
                    .product_prefix
                    .as_deref()
                    .is_some_and(|prefix| product_id.starts_with(prefix))
            })
            .map(|entry| entry.id.clone())
    }

    /// Display name for a canonical id, if known
    pub fn display_name(&self, id: &RestaurantId) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| &entry.id == id)
            .map(|entry| entry.display_name.as_str())
    }

    pub fn entries(&self) -> &[RestaurantEntry] {
        &self.entries
    }
}
