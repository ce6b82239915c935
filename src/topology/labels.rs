//! Entity label storage for boundary and material tags.
//!
//! Labels map `EntityHandle` → integer tags, grouped by label name. The
//! adaptation mesh keeps one label per solver material array (see
//! [`Material`]), so a 1-D vertex can carry a node material and a boundary
//! material at once.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::topology::handle::EntityHandle;

/// Solver material array a tag was read from.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Material {
    Node,
    Element,
    Boundary,
}

impl Material {
    pub const ALL: [Material; 3] = [Material::Node, Material::Element, Material::Boundary];

    /// Label name the tag is stored under.
    pub const fn label(self) -> &'static str {
        match self {
            Material::Node => "node_material",
            Material::Element => "element_material",
            Material::Boundary => "boundary_material",
        }
    }
}

/// Named integer labels for mesh entities.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LabelSet {
    labels: HashMap<String, BTreeMap<EntityHandle, i32>>,
}

impl LabelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns `value` for `entity` under label `name`.
    ///
    /// Returns the previous value, if any.
    pub fn set_label(&mut self, entity: EntityHandle, name: &str, value: i32) -> Option<i32> {
        self.labels
            .entry(name.to_string())
            .or_default()
            .insert(entity, value)
    }

    pub fn get_label(&self, entity: EntityHandle, name: &str) -> Option<i32> {
        self.labels
            .get(name)
            .and_then(|map| map.get(&entity).copied())
    }

    /// Returns all entities with label `name == value`, ascending by handle.
    pub fn stratum_points(&self, name: &str, value: i32) -> Vec<EntityHandle> {
        self.labels.get(name).map_or_else(Vec::new, |map| {
            map.iter()
                .filter_map(|(&entity, &v)| (v == value).then_some(entity))
                .collect()
        })
    }

    /// Returns all distinct values stored for label `name`, sorted ascending.
    pub fn stratum_values(&self, name: &str) -> Vec<i32> {
        let mut values: Vec<i32> = self
            .labels
            .get(name)
            .map_or_else(Vec::new, |map| map.values().copied().collect());
        values.sort_unstable();
        values.dedup();
        values
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Remove all label entries for the provided entities.
    pub fn clear_points<I>(&mut self, entities: I)
    where
        I: IntoIterator<Item = EntityHandle>,
    {
        let targets: HashSet<EntityHandle> = entities.into_iter().collect();
        if targets.is_empty() {
            return;
        }
        self.labels.retain(|_, map| {
            map.retain(|entity, _| !targets.contains(entity));
            !map.is_empty()
        });
    }

    /// Iterate over all labels as `(name, entity, value)`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, EntityHandle, i32)> + '_ {
        self.labels.iter().flat_map(|(name, map)| {
            map.iter()
                .map(move |(&entity, &value)| (name.as_str(), entity, value))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::dimension::EntityDim;

    fn f(slot: u32) -> EntityHandle {
        EntityHandle::new(EntityDim::Face, slot).unwrap()
    }

    #[test]
    fn set_get_and_strata() {
        let mut labels = LabelSet::new();
        let name = Material::Boundary.label();
        assert_eq!(labels.set_label(f(1), name, 4), None);
        assert_eq!(labels.set_label(f(1), name, 5), Some(4));
        labels.set_label(f(3), name, 5);
        labels.set_label(f(2), name, 7);
        assert_eq!(labels.get_label(f(1), name), Some(5));
        assert_eq!(labels.stratum_points(name, 5), vec![f(1), f(3)]);
        assert_eq!(labels.stratum_values(name), vec![5, 7]);
    }

    #[test]
    fn materials_do_not_share_a_label() {
        let mut labels = LabelSet::new();
        labels.set_label(f(1), Material::Node.label(), 1);
        labels.set_label(f(1), Material::Boundary.label(), 2);
        assert_eq!(labels.get_label(f(1), Material::Node.label()), Some(1));
        assert_eq!(labels.get_label(f(1), Material::Boundary.label()), Some(2));
        assert_eq!(labels.iter().count(), 2);
    }

    #[test]
    fn clearing_drops_empty_labels() {
        let mut labels = LabelSet::new();
        labels.set_label(f(1), "boundary", 1);
        labels.clear_points([f(1)]);
        assert!(labels.is_empty());
    }
}
