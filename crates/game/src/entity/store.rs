//! The entity/component store.
//!
//! Structural mutation (create, destroy, insert, remove) is owned by the
//! simulation thread. Components are plain values in per-type sparse
//! columns keyed by entity id.
//!
//! Replicated component types are registered up front with a stable type
//! index and erased serialize/deserialize functions, so an entity's
//! attached components can be enumerated for an init message without
//! reflection. A subset of the replicated types can be marked observed:
//! replacing such a component records the entity in that type's observer,
//! which is drained once per tick by the sync systems. Mutation through
//! `get_mut` deliberately does not record; systems that need their change
//! replicated must go through `replace`.

use std::any::{Any, TypeId};
use std::collections::{BTreeSet, HashMap, HashSet};

use thiserror::Error;

use crate::net::messages::SerializedComponent;
use crate::net::wire::{Decode, Encode, WireError};

use super::{EntityId, EntityIdPool};

#[derive(Debug, Error, PartialEq)]
pub enum StoreError {
    #[error("entity {0} does not exist")]
    NoSuchEntity(EntityId),
    #[error("component type index {0} is not registered")]
    UnknownComponentType(u8),
    #[error("component {type_name} failed to deserialize: {source}")]
    BadComponentData {
        type_name: &'static str,
        source: WireError,
    },
}

/// The replicated component types currently attached to an entity, by type
/// index. Maintained automatically by the store's insert/remove paths.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplicatedComponentList {
    pub type_indices: Vec<u8>,
}

/// Erased handling for one registered replicated component type.
pub struct ReplicatedTypeInfo {
    pub type_index: u8,
    pub type_id: TypeId,
    pub name: &'static str,
    serialize: fn(&EntityStore, EntityId) -> Option<Vec<u8>>,
    deserialize_replace: fn(&mut EntityStore, EntityId, &mut &[u8]) -> Result<(), WireError>,
}

/// Builds the registry entry for a replicated component type.
pub fn replicated_type<T>(type_index: u8, name: &'static str) -> ReplicatedTypeInfo
where
    T: Encode + Decode + 'static,
{
    ReplicatedTypeInfo {
        type_index,
        type_id: TypeId::of::<T>(),
        name,
        serialize: |store, entity| {
            store.get::<T>(entity).map(|component| {
                let mut buf = Vec::new();
                component.encode(&mut buf);
                buf
            })
        },
        deserialize_replace: |store, entity, r| {
            let value = T::decode(r)?;
            let _ = store.replace(entity, value);
            Ok(())
        },
    }
}

/// The set of replicated component types, with stable indices, plus which
/// of them are observed.
pub struct ComponentRegistry {
    types: Vec<ReplicatedTypeInfo>,
    by_type_id: HashMap<TypeId, u8>,
    observed_indices: Vec<u8>,
}

impl ComponentRegistry {
    /// `types` must be ordered by type index, starting at 0. Every observed
    /// index must name a replicated type.
    pub fn new(types: Vec<ReplicatedTypeInfo>, observed_indices: Vec<u8>) -> Self {
        for (position, info) in types.iter().enumerate() {
            assert_eq!(position as u8, info.type_index, "type indices must be dense");
        }
        for &index in &observed_indices {
            assert!((index as usize) < types.len(), "observed index out of range");
        }
        let by_type_id = types
            .iter()
            .map(|info| (info.type_id, info.type_index))
            .collect();
        Self {
            types,
            by_type_id,
            observed_indices,
        }
    }

    pub fn get(&self, type_index: u8) -> Option<&ReplicatedTypeInfo> {
        self.types.get(type_index as usize)
    }

    pub fn index_of(&self, type_id: TypeId) -> Option<u8> {
        self.by_type_id.get(&type_id).copied()
    }

    pub fn observed_indices(&self) -> &[u8] {
        &self.observed_indices
    }
}

trait ErasedColumn: Any {
    fn remove_entity(&mut self, entity: EntityId) -> bool;
    fn contains(&self, entity: EntityId) -> bool;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

struct Column<T> {
    map: HashMap<EntityId, T>,
}

impl<T> Default for Column<T> {
    fn default() -> Self {
        Self {
            map: HashMap::new(),
        }
    }
}

impl<T: 'static> ErasedColumn for Column<T> {
    fn remove_entity(&mut self, entity: EntityId) -> bool {
        self.map.remove(&entity).is_some()
    }

    fn contains(&self, entity: EntityId) -> bool {
        self.map.contains_key(&entity)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub struct EntityStore {
    id_pool: EntityIdPool,
    alive: BTreeSet<EntityId>,
    columns: HashMap<TypeId, Box<dyn ErasedColumn>>,
    registry: ComponentRegistry,
    observers: HashMap<u8, HashSet<EntityId>>,
}

impl EntityStore {
    pub fn new(registry: ComponentRegistry) -> Self {
        let observers = registry
            .observed_indices()
            .iter()
            .map(|&index| (index, HashSet::new()))
            .collect();
        Self {
            id_pool: EntityIdPool::new(),
            alive: BTreeSet::new(),
            columns: HashMap::new(),
            registry,
            observers,
        }
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// Creates a new entity with a pool-allocated id (server side).
    pub fn create(&mut self) -> EntityId {
        let id = self.id_pool.reserve();
        self.alive.insert(id);
        id
    }

    /// Registers an entity under a remotely-assigned id (client side).
    pub fn create_with_id(&mut self, id: EntityId) -> Result<(), StoreError> {
        self.alive.insert(id);
        Ok(())
    }

    /// Destroys the entity and removes all of its components atomically.
    pub fn destroy(&mut self, id: EntityId) -> Result<(), StoreError> {
        if !self.alive.remove(&id) {
            return Err(StoreError::NoSuchEntity(id));
        }
        for column in self.columns.values_mut() {
            column.remove_entity(id);
        }
        for observed in self.observers.values_mut() {
            observed.remove(&id);
        }
        self.id_pool.release(id);
        Ok(())
    }

    pub fn is_alive(&self, id: EntityId) -> bool {
        self.alive.contains(&id)
    }

    pub fn entity_count(&self) -> usize {
        self.alive.len()
    }

    /// All live entities, in a stable ascending order.
    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.alive.iter().copied()
    }

    /// Inserts or replaces the component. The replace path is the logical
    /// update: it maintains the replicated-component list and records the
    /// entity in the type's observer (if observed).
    pub fn insert<T: 'static>(&mut self, id: EntityId, value: T) -> Result<(), StoreError> {
        if !self.alive.contains(&id) {
            return Err(StoreError::NoSuchEntity(id));
        }

        let newly_added = self
            .column_mut::<T>()
            .map
            .insert(id, value)
            .is_none();

        if let Some(type_index) = self.registry.index_of(TypeId::of::<T>()) {
            if newly_added {
                self.add_to_replicated_list(id, type_index);
            }
            if let Some(observed) = self.observers.get_mut(&type_index) {
                observed.insert(id);
            }
        }
        Ok(())
    }

    /// Alias for `insert` that reads better at call sites updating an
    /// existing component.
    pub fn replace<T: 'static>(&mut self, id: EntityId, value: T) -> Result<(), StoreError> {
        self.insert(id, value)
    }

    pub fn remove<T: 'static>(&mut self, id: EntityId) -> Option<T> {
        let value = self
            .columns
            .get_mut(&TypeId::of::<T>())?
            .as_any_mut()
            .downcast_mut::<Column<T>>()?
            .map
            .remove(&id)?;

        if let Some(type_index) = self.registry.index_of(TypeId::of::<T>()) {
            self.remove_from_replicated_list(id, type_index);
        }
        Some(value)
    }

    pub fn get<T: 'static>(&self, id: EntityId) -> Option<&T> {
        self.column::<T>()?.map.get(&id)
    }

    /// Mutable access. Changes made through this reference are NOT recorded
    /// by observers; use `replace` for changes that must replicate.
    pub fn get_mut<T: 'static>(&mut self, id: EntityId) -> Option<&mut T> {
        self.columns
            .get_mut(&TypeId::of::<T>())?
            .as_any_mut()
            .downcast_mut::<Column<T>>()?
            .map
            .get_mut(&id)
    }

    pub fn contains<T: 'static>(&self, id: EntityId) -> bool {
        self.column::<T>()
            .is_some_and(|column| column.map.contains_key(&id))
    }

    /// Live entities holding component T, sorted ascending. The sort keeps
    /// system iteration deterministic.
    pub fn entities_with<T: 'static>(&self) -> Vec<EntityId> {
        let Some(column) = self.column::<T>() else {
            return Vec::new();
        };
        let mut ids: Vec<EntityId> = column.map.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn iter<T: 'static>(&self) -> impl Iterator<Item = (EntityId, &T)> {
        self.column::<T>()
            .into_iter()
            .flat_map(|column| column.map.iter().map(|(id, value)| (*id, value)))
    }

    /// Whether the entity has every component type in `type_ids`.
    pub fn has_all(&self, id: EntityId, type_ids: &[TypeId]) -> bool {
        type_ids.iter().all(|type_id| {
            self.columns
                .get(type_id)
                .is_some_and(|column| column.contains(id))
        })
    }

    /// Type-erased join: live entities holding every listed component
    /// type, sorted ascending.
    pub fn entities_with_types(&self, type_ids: &[TypeId]) -> Vec<EntityId> {
        self.entities()
            .filter(|&id| self.has_all(id, type_ids))
            .collect()
    }

    /// Drains the observer for the given type index: entities whose
    /// component was replaced since the last drain, sorted ascending.
    pub fn drain_observed(&mut self, type_index: u8) -> Vec<EntityId> {
        let Some(observed) = self.observers.get_mut(&type_index) else {
            return Vec::new();
        };
        let mut ids: Vec<EntityId> = observed.drain().collect();
        ids.sort_unstable();
        ids
    }

    /// Serializes every replicated component attached to the entity, in
    /// the entity's replicated-list order.
    pub fn serialize_entity(&self, id: EntityId) -> Vec<SerializedComponent> {
        let Some(list) = self.get::<ReplicatedComponentList>(id) else {
            return Vec::new();
        };
        list.type_indices
            .iter()
            .filter_map(|&type_index| {
                let info = self.registry.get(type_index)?;
                let data = (info.serialize)(self, id)?;
                Some(SerializedComponent { type_index, data })
            })
            .collect()
    }

    /// Serializes one replicated component of the entity, if attached.
    pub fn serialize_component(
        &self,
        id: EntityId,
        type_index: u8,
    ) -> Option<SerializedComponent> {
        let info = self.registry.get(type_index)?;
        let data = (info.serialize)(self, id)?;
        Some(SerializedComponent { type_index, data })
    }

    /// Deserializes and replaces a single component from its wire form.
    pub fn apply_serialized_component(
        &mut self,
        id: EntityId,
        component: &SerializedComponent,
    ) -> Result<(), StoreError> {
        if !self.alive.contains(&id) {
            return Err(StoreError::NoSuchEntity(id));
        }
        let info = self
            .registry
            .get(component.type_index)
            .ok_or(StoreError::UnknownComponentType(component.type_index))?;
        let name = info.name;
        let deserialize_replace = info.deserialize_replace;

        let mut slice = component.data.as_slice();
        deserialize_replace(self, id, &mut slice).map_err(|source| {
            StoreError::BadComponentData { type_name: name, source }
        })
    }

    fn column<T: 'static>(&self) -> Option<&Column<T>> {
        self.columns
            .get(&TypeId::of::<T>())?
            .as_any()
            .downcast_ref::<Column<T>>()
    }

    fn column_mut<T: 'static>(&mut self) -> &mut Column<T> {
        self.columns
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(Column::<T>::default()))
            .as_any_mut()
            .downcast_mut::<Column<T>>()
            .unwrap_or_else(|| unreachable!("column type mismatch"))
    }

    fn add_to_replicated_list(&mut self, id: EntityId, type_index: u8) {
        let column = self.column_mut::<ReplicatedComponentList>();
        let list = column.map.entry(id).or_default();
        if !list.type_indices.contains(&type_index) {
            list.type_indices.push(type_index);
        }
    }

    fn remove_from_replicated_list(&mut self, id: EntityId, type_index: u8) {
        if let Some(list) = self.get_mut::<ReplicatedComponentList>(id) {
            list.type_indices.retain(|&index| index != type_index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Health(u32);

    impl Encode for Health {
        fn encode(&self, buf: &mut Vec<u8>) {
            self.0.encode(buf);
        }
    }

    impl Decode for Health {
        fn decode(r: &mut &[u8]) -> Result<Self, WireError> {
            Ok(Health(u32::decode(r)?))
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Tag(u8);

    impl Encode for Tag {
        fn encode(&self, buf: &mut Vec<u8>) {
            self.0.encode(buf);
        }
    }

    impl Decode for Tag {
        fn decode(r: &mut &[u8]) -> Result<Self, WireError> {
            Ok(Tag(u8::decode(r)?))
        }
    }

    fn test_store() -> EntityStore {
        let registry = ComponentRegistry::new(
            vec![
                replicated_type::<Health>(0, "health"),
                replicated_type::<Tag>(1, "tag"),
            ],
            vec![0],
        );
        EntityStore::new(registry)
    }

    #[test]
    fn replicated_list_tracks_inserts_and_removes() {
        let mut store = test_store();
        let entity = store.create();

        store.insert(entity, Health(10)).unwrap();
        store.insert(entity, Tag(1)).unwrap();
        let list = store.get::<ReplicatedComponentList>(entity).unwrap();
        assert_eq!(list.type_indices, vec![0, 1]);

        store.remove::<Health>(entity);
        let list = store.get::<ReplicatedComponentList>(entity).unwrap();
        assert_eq!(list.type_indices, vec![1]);
    }

    #[test]
    fn observers_record_replace_but_not_get_mut() {
        let mut store = test_store();
        let entity = store.create();

        store.insert(entity, Health(10)).unwrap();
        assert_eq!(store.drain_observed(0), vec![entity]);
        assert!(store.drain_observed(0).is_empty());

        store.get_mut::<Health>(entity).unwrap().0 = 20;
        assert!(store.drain_observed(0).is_empty());

        store.replace(entity, Health(30)).unwrap();
        assert_eq!(store.drain_observed(0), vec![entity]);
    }

    #[test]
    fn unobserved_types_never_record() {
        let mut store = test_store();
        let entity = store.create();
        store.insert(entity, Tag(2)).unwrap();
        assert!(store.drain_observed(1).is_empty());
    }

    #[test]
    fn destroy_removes_everything() {
        let mut store = test_store();
        let entity = store.create();
        store.insert(entity, Health(10)).unwrap();
        store.insert(entity, Tag(1)).unwrap();

        store.destroy(entity).unwrap();
        assert!(!store.is_alive(entity));
        assert!(store.get::<Health>(entity).is_none());
        assert_eq!(store.destroy(entity), Err(StoreError::NoSuchEntity(entity)));
    }

    #[test]
    fn serialize_entity_round_trips_through_apply() {
        let mut store = test_store();
        let entity = store.create();
        store.insert(entity, Health(42)).unwrap();
        store.insert(entity, Tag(7)).unwrap();

        let components = store.serialize_entity(entity);
        assert_eq!(components.len(), 2);

        let mut mirror = test_store();
        mirror.create_with_id(entity).unwrap();
        for component in &components {
            mirror.apply_serialized_component(entity, component).unwrap();
        }
        assert_eq!(mirror.get::<Health>(entity), Some(&Health(42)));
        assert_eq!(mirror.get::<Tag>(entity), Some(&Tag(7)));
    }

    #[test]
    fn entities_with_is_sorted() {
        let mut store = test_store();
        let a = store.create();
        let b = store.create();
        let c = store.create();
        store.insert(c, Health(1)).unwrap();
        store.insert(a, Health(2)).unwrap();
        store.insert(b, Health(3)).unwrap();
        assert_eq!(store.entities_with::<Health>(), vec![a, b, c]);
    }
}
