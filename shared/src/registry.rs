//! Packet type registry
//!
//! Maps a [`PacketId`] to a factory producing an empty, decodable instance of
//! that packet type. A [`RegistryBuilder`] is filled during start-up and then
//! frozen into a [`Registry`], which has no mutating methods and can be shared
//! across workers behind an `Arc` without locking.

use std::collections::HashMap;

use thiserror::Error;

use crate::packet::{Packet, PacketId};

/// Zero-argument constructor for an empty packet
pub type PacketFactory = fn() -> Box<dyn Packet>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("packet id {id} is already registered ({existing})")]
    Duplicate { id: PacketId, existing: String },
}

fn make_default<T: Packet + Default>() -> Box<dyn Packet> {
    Box::new(T::default())
}

#[derive(Default)]
pub struct RegistryBuilder {
    factories: HashMap<PacketId, PacketFactory>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a packet type, deriving its id from a freshly built instance
    pub fn try_register(&mut self, factory: PacketFactory) -> Result<&mut Self, RegistryError> {
        let id = factory().id();
        if let Some(existing) = self.factories.get(&id) {
            return Err(RegistryError::Duplicate {
                id,
                existing: format!("{:?}", existing()),
            });
        }
        self.factories.insert(id, factory);
        Ok(self)
    }

    /// Registers a packet type
    ///
    /// # Panics
    ///
    /// Panics if another type already uses the same id. Duplicate ids are a
    /// programming error and must be caught before the server starts.
    pub fn register(&mut self, factory: PacketFactory) -> &mut Self {
        if let Err(err) = self.try_register(factory) {
            panic!("{}", err);
        }
        self
    }

    /// Registers `T` using its `Default` implementation as the factory
    pub fn register_default<T: Packet + Default>(&mut self) -> &mut Self {
        self.register(make_default::<T>)
    }

    pub fn build(self) -> Registry {
        Registry {
            factories: self.factories,
        }
    }
}

/// Frozen packet registry, safe to read from any number of workers
pub struct Registry {
    factories: HashMap<PacketId, PacketFactory>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Returns a fresh empty packet for `id`, or `None` if the id is unknown
    pub fn find(&self, id: PacketId) -> Option<Box<dyn Packet>> {
        self.factories.get(&id).map(|factory| factory())
    }

    pub fn contains(&self, id: PacketId) -> bool {
        self.factories.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Registered ids in ascending order
    pub fn ids(&self) -> Vec<PacketId> {
        let mut ids: Vec<PacketId> = self.factories.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").field("ids", &self.ids()).finish()
    }
}
