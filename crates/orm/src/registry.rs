//! The descriptor registry.
//!
//! One registry is built per persistence context, from the list of mapped types.  It owns every [EntityDescriptor] in
//! an arena; single-table hierarchies refer to each other by [DescriptorId] rather than by reference.
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use log::*;

use crate::descriptor::{DescriptorId, DescriptorKind, EntityDescriptor};
use crate::entity::{Entity, EntityType, MappedType, TypeResolver};
use crate::errors::{LookupError, MappingError};
use crate::metadata::LayerKind;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum RegistryState {
    Empty,
    /// Every descriptor has its own fields; hierarchies are not merged yet.
    Unmerged,
    Merged,
}

#[derive(Debug)]
pub struct DescriptorRegistry {
    descriptors: Vec<EntityDescriptor>,
    by_type: HashMap<TypeId, DescriptorId>,
    /// Non-entity types that type-reference fields may name.
    reference_types: Vec<EntityType>,
    state: RegistryState,
}

impl Default for DescriptorRegistry {
    fn default() -> Self {
        DescriptorRegistry::new()
    }
}

impl DescriptorRegistry {
    pub fn new() -> DescriptorRegistry {
        DescriptorRegistry {
            descriptors: vec![],
            by_type: Default::default(),
            reference_types: vec![],
            state: RegistryState::Empty,
        }
    }

    /// Build a registry and initialize it in one go.
    pub fn build(types: &[MappedType]) -> Result<Arc<DescriptorRegistry>, MappingError> {
        let mut registry = DescriptorRegistry::new();
        registry.initialize(types)?;
        Ok(Arc::new(registry))
    }

    /// Allow type-reference fields to name `entity_type` even though it is not mapped.
    pub fn register_reference_type(&mut self, entity_type: EntityType) {
        if !self.reference_types.contains(&entity_type) {
            self.reference_types.push(entity_type);
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.state == RegistryState::Merged
    }

    /// Build and merge descriptors for `types`.
    ///
    /// Calling this again after a successful initialization does nothing.  On failure the registry is left empty, so
    /// no entity is ever half-mapped.
    pub fn initialize(&mut self, types: &[MappedType]) -> Result<(), MappingError> {
        if self.state == RegistryState::Merged {
            debug!("Descriptor registry is already initialized");
            return Ok(());
        }

        if let Err(e) = self.build_descriptors(types).and_then(|_| self.merge()) {
            self.descriptors.clear();
            self.by_type.clear();
            self.state = RegistryState::Empty;
            return Err(e);
        }

        info!(
            "Descriptor registry initialized with {} entities",
            self.descriptors.len()
        );
        Ok(())
    }

    /// Phase one: classify every type, build its own fields and find its primary key.
    fn build_descriptors(&mut self, types: &[MappedType]) -> Result<(), MappingError> {
        let mut pending_subclasses: Vec<(DescriptorId, EntityType)> = vec![];

        for mapped in types {
            if self.by_type.contains_key(&mapped.entity_type().type_id()) {
                continue;
            }

            let metadata = mapped.metadata();
            if metadata.kind != LayerKind::Entity {
                return Err(MappingError::NotAnEntity {
                    entity: mapped.entity_type().name().to_string(),
                });
            }

            let id = DescriptorId(self.descriptors.len());
            let kind = if metadata.inheritance_single_table {
                DescriptorKind::SingleTableSuperclass { subclasses: vec![] }
            } else {
                if let Some(p) = metadata
                    .parent_metadata()
                    .filter(|p| p.inheritance_single_table)
                {
                    // Linked below, once every descriptor exists.
                    pending_subclasses.push((id, p.entity_type));
                }
                DescriptorKind::Plain
            };

            let descriptor = EntityDescriptor::build(&metadata, kind)?;
            debug!(
                "Built descriptor for {} on table {}",
                descriptor.entity_type(),
                descriptor.table_name()
            );
            self.by_type.insert(mapped.entity_type().type_id(), id);
            self.descriptors.push(descriptor);
        }

        for (id, superclass_type) in pending_subclasses {
            let superclass = match self.by_type.get(&superclass_type.type_id()) {
                Some(s) => *s,
                None => {
                    return Err(MappingError::SuperclassNotMapped {
                        entity: self.descriptors[id.0].entity_type().name().to_string(),
                        superclass: superclass_type.name().to_string(),
                    })
                }
            };

            let table_name = self.descriptors[superclass.0].table_name().to_string();
            self.descriptors[superclass.0].add_subclass(id);
            let subclass = &mut self.descriptors[id.0];
            subclass.set_kind(DescriptorKind::SingleTableSubclass { superclass });
            subclass.set_table_name(table_name);
        }

        for descriptor in self.descriptors.iter_mut() {
            descriptor.derive_primary_key()?;
        }

        self.state = RegistryState::Unmerged;
        Ok(())
    }

    /// Phase two: fold subclass columns into each single-table superclass and share the result.
    fn merge(&mut self) -> Result<(), MappingError> {
        debug_assert_eq!(self.state, RegistryState::Unmerged);

        let hierarchies = self
            .descriptors
            .iter()
            .enumerate()
            .filter_map(|(i, d)| match d.kind() {
                DescriptorKind::SingleTableSuperclass { subclasses } => {
                    Some((DescriptorId(i), subclasses.clone()))
                }
                _ => None,
            })
            .collect::<Vec<_>>();

        for (superclass, subclasses) in hierarchies.iter() {
            for sub in subclasses.iter() {
                let fields = self.descriptors[sub.0].fields().to_vec();
                self.descriptors[superclass.0].absorb_fields(&fields)?;
            }
        }

        for descriptor in self.descriptors.iter_mut() {
            descriptor.mark_merged();
        }

        for (superclass, subclasses) in hierarchies.iter() {
            let shared = match self.descriptors[superclass.0].create_table_fields() {
                Ok(fields) => fields.clone(),
                Err(_) => continue,
            };
            for sub in subclasses.iter() {
                self.descriptors[sub.0].share_create_table(shared.clone());
            }
            debug!(
                "Merged {} subclasses into {}",
                subclasses.len(),
                self.descriptors[superclass.0].entity_type()
            );
        }

        self.state = RegistryState::Merged;
        Ok(())
    }

    fn require_initialized(&self) -> Result<(), LookupError> {
        if self.state != RegistryState::Merged {
            return Err(LookupError::RegistryNotInitialized);
        }
        Ok(())
    }

    pub fn lookup(&self, entity_type: EntityType) -> Result<&EntityDescriptor, LookupError> {
        self.require_initialized()?;
        self.by_type
            .get(&entity_type.type_id())
            .map(|id| &self.descriptors[id.0])
            .ok_or_else(|| LookupError::EntityNotMapped(entity_type.name().to_string()))
    }

    pub fn lookup_type<T: Entity>(&self) -> Result<&EntityDescriptor, LookupError> {
        self.lookup(T::entity_type())
    }

    /// Look up by fully qualified or simple type name.
    pub fn lookup_name(&self, name: &str) -> Result<&EntityDescriptor, LookupError> {
        self.require_initialized()?;
        self.descriptors
            .iter()
            .find(|d| d.entity_type().name() == name)
            .or_else(|| self.descriptors.iter().find(|d| d.entity_type().is_named(name)))
            .ok_or_else(|| LookupError::EntityNotMapped(name.to_string()))
    }

    pub fn get(&self, id: DescriptorId) -> Option<&EntityDescriptor> {
        self.descriptors.get(id.0)
    }

    /// The superclass of a single-table subclass.
    pub fn superclass_of(&self, descriptor: &EntityDescriptor) -> Option<&EntityDescriptor> {
        match descriptor.kind() {
            DescriptorKind::SingleTableSubclass { superclass } => self.get(*superclass),
            _ => None,
        }
    }

    pub fn subclasses_of<'a>(
        &'a self,
        descriptor: &'a EntityDescriptor,
    ) -> impl Iterator<Item = &'a EntityDescriptor> + 'a {
        let ids: &[DescriptorId] = match descriptor.kind() {
            DescriptorKind::SingleTableSuperclass { subclasses } => subclasses,
            _ => &[],
        };
        ids.iter().filter_map(move |id| self.get(*id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityDescriptor> {
        self.descriptors.iter()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

impl TypeResolver for DescriptorRegistry {
    fn resolve_type(&self, name: &str) -> Option<EntityType> {
        self.descriptors
            .iter()
            .map(|d| d.entity_type())
            .chain(self.reference_types.iter().copied())
            .find(|t| t.name() == name)
    }
}
