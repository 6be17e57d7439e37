//! Two-layer resolution.
//!
//! The overlay layer shadows the static layer: for any identity present in
//! both, the overlay instance is the one returned by reads and the only one
//! that may be mutated. Nothing is copied between layers on read.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::error::StoreResult;
use crate::layer::Layer;

/// Where an entity's data lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    OverlayOnly,
    StaticOnly,
    Both,
    Absent,
}

impl Presence {
    pub fn from_flags(in_overlay: bool, in_static: bool) -> Self {
        match (in_overlay, in_static) {
            (true, true) => Self::Both,
            (true, false) => Self::OverlayOnly,
            (false, true) => Self::StaticOnly,
            (false, false) => Self::Absent,
        }
    }

    pub fn is_present(self) -> bool {
        self != Self::Absent
    }

    /// Mutable iff the authoritative instance is in the overlay.
    pub fn is_mutable(self) -> bool {
        matches!(self, Self::OverlayOnly | Self::Both)
    }

    pub fn in_overlay(self) -> bool {
        self.is_mutable()
    }

    pub fn in_static(self) -> bool {
        matches!(self, Self::StaticOnly | Self::Both)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::OverlayOnly => "overlay",
            Self::StaticOnly => "static",
            Self::Both => "overlay+static",
            Self::Absent => "absent",
        }
    }
}

/// One merged listing entry: the winning item and where it was found.
#[derive(Debug, Clone, PartialEq)]
pub struct Merged<T> {
    pub item: T,
    pub presence: Presence,
}

/// Merge two keyed listings. On key collision the overlay item wins and the
/// static item is dropped; results are ordered by key.
pub fn merge_listings<K, T>(overlay: Vec<(K, T)>, static_items: Vec<(K, T)>) -> Vec<Merged<T>>
where
    K: Ord,
{
    let mut merged: BTreeMap<K, Merged<T>> = BTreeMap::new();

    for (key, item) in static_items {
        merged.insert(
            key,
            Merged {
                item,
                presence: Presence::StaticOnly,
            },
        );
    }

    for (key, item) in overlay {
        let presence = match merged.get(&key) {
            Some(_) => Presence::Both,
            None => Presence::OverlayOnly,
        };
        merged.insert(key, Merged { item, presence });
    }

    merged.into_values().collect()
}

/// Resolves paths and listings against the overlay and optional static layer.
#[derive(Debug, Clone)]
pub struct LayerResolver {
    overlay: Arc<dyn Layer>,
    static_layer: Option<Arc<dyn Layer>>,
}

impl LayerResolver {
    pub fn new(overlay: Arc<dyn Layer>, static_layer: Option<Arc<dyn Layer>>) -> Self {
        Self {
            overlay,
            static_layer,
        }
    }

    pub fn overlay(&self) -> &dyn Layer {
        self.overlay.as_ref()
    }

    pub fn static_layer(&self) -> Option<&dyn Layer> {
        self.static_layer.as_deref()
    }

    /// Presence of a single path.
    pub fn resolve(&self, path: &str) -> StoreResult<Presence> {
        let in_overlay = self.overlay.exists(path)?;
        let in_static = match &self.static_layer {
            Some(layer) => layer.exists(path)?,
            None => false,
        };
        Ok(Presence::from_flags(in_overlay, in_static))
    }

    /// The layer holding the authoritative instance for `presence`.
    pub fn authoritative(&self, presence: Presence) -> Option<&dyn Layer> {
        match presence {
            Presence::OverlayOnly | Presence::Both => Some(self.overlay()),
            Presence::StaticOnly => self.static_layer(),
            Presence::Absent => None,
        }
    }

    /// Child names of `prefix` across both layers.
    pub fn list_names(&self, prefix: &str) -> StoreResult<Vec<Merged<String>>> {
        let overlay = keyed(self.overlay.list(prefix)?);
        let static_items = match &self.static_layer {
            Some(layer) => keyed(layer.list(prefix)?),
            None => Vec::new(),
        };
        Ok(merge_listings(overlay, static_items))
    }

    /// Parse the children of `prefix` in each layer with `parse` and merge
    /// them by the parsed key.
    pub fn list_parsed<K, T, F>(&self, prefix: &str, parse: F) -> StoreResult<Vec<Merged<T>>>
    where
        K: Ord,
        F: Fn(&str) -> Option<(K, T)>,
    {
        // Two names in one layer may parse to the same key; the later one wins.
        let parse_layer = |layer: &dyn Layer| -> StoreResult<Vec<(K, T)>> {
            let items: BTreeMap<K, T> = layer
                .list(prefix)?
                .iter()
                .filter_map(|name| parse(name.as_str()))
                .collect();
            Ok(items.into_iter().collect())
        };
        let overlay = parse_layer(self.overlay())?;
        let static_items = match self.static_layer() {
            Some(layer) => parse_layer(layer)?,
            None => Vec::new(),
        };
        Ok(merge_listings(overlay, static_items))
    }
}

fn keyed(names: Vec<String>) -> Vec<(String, String)> {
    names.into_iter().map(|n| (n.clone(), n)).collect()
}
