use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

/// Process-wide service registry.
///
/// Core subsystems are registered once at startup and resolved by type.
/// Shutdown hands the services back in reverse registration order so the
/// engine can tear them down the way they were built up.
#[derive(Default)]
pub struct ServiceRegistry {
    services: RwLock<ServiceMap>,
}

#[derive(Default)]
struct ServiceMap {
    by_type: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    registration_order: Vec<TypeId>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn register<T: Any + Send + Sync>(&self, service: Arc<T>) {
        let mut services = self.services.write();

        let type_id = TypeId::of::<T>();
        assert!(
            !services.by_type.contains_key(&type_id),
            "Service {} registered twice!", std::any::type_name::<T>()
        );

        services.by_type.insert(type_id, service);
        services.registration_order.push(type_id);
    }

    pub fn resolve<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.services.read()
            .by_type
            .get(&TypeId::of::<T>())
            .cloned()
            .map(|service| service.downcast::<T>().unwrap())
    }

    pub fn resolve_required<T: Any + Send + Sync>(&self) -> Arc<T> {
        self.resolve::<T>()
            .unwrap_or_else(|| panic!("Required service {} is not registered!", std::any::type_name::<T>()))
    }

    /// Remove all services, returning them in reverse registration order.
    pub fn drain_for_shutdown(&self) -> Vec<Arc<dyn Any + Send + Sync>> {
        let mut services = self.services.write();

        let order = std::mem::take(&mut services.registration_order);
        order.into_iter()
            .rev()
            .filter_map(|type_id| services.by_type.remove(&type_id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Audio(u32);
    struct Input(u32);

    #[test]
    fn register_and_resolve() {
        let registry = ServiceRegistry::new();

        registry.register(Arc::new(Audio(1)));
        registry.register(Arc::new(Input(2)));

        assert_eq!(registry.resolve::<Audio>().unwrap().0, 1);
        assert_eq!(registry.resolve_required::<Input>().0, 2);

        let drained = registry.drain_for_shutdown();
        assert_eq!(drained.len(), 2);
        assert!(registry.resolve::<Audio>().is_none());
    }

    #[test]
    #[should_panic]
    fn double_registration_asserts() {
        let registry = ServiceRegistry::new();

        registry.register(Arc::new(Audio(1)));
        registry.register(Arc::new(Audio(2)));
    }
}
