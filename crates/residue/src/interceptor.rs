use residue_types::{ObjectKey, TypeKey};
use std::sync::Arc;
use tracing::{trace, warn};

use crate::LeaksTracer;

/// What the tracer can learn about an object at construction time.
pub trait HostObject {
    /// Address-derived identity. Must stay stable until the object is destroyed.
    fn object_key(&self) -> ObjectKey;

    /// Optional human-readable description, cached in the registry.
    fn describe(&self) -> Option<String> {
        None
    }
}

/// Observer the host runtime invokes on every object construction and
/// finalization.
///
/// Implementations are called from arbitrary threads and must never fail
/// back into the host.
pub trait LifecycleHooks: Send + Sync {
    fn on_construct(&self, object: &dyn HostObject, ty: TypeKey);

    /// Called before the object's memory can be reused. The object itself is
    /// already gone as far as the observer is concerned.
    fn on_destroy(&self, object: ObjectKey);
}

impl LifecycleHooks for LeaksTracer {
    fn on_construct(&self, object: &dyn HostObject, ty: TypeKey) {
        if !self.filter.matches(ty, &*self.types) {
            return;
        }

        let key = object.object_key();
        let type_name = self
            .types
            .name_of(ty)
            .unwrap_or_else(|| Arc::from(ty.to_string()));
        let displaced = self.registry.add(key, ty, type_name, object.describe());

        if let Some(previous) = displaced {
            warn!(
                object = %key,
                previous_type = %previous.type_name,
                previous_generation = previous.generation,
                "object constructed again without a destroy notification; replacing entry"
            );
        }
    }

    fn on_destroy(&self, object: ObjectKey) {
        if self.registry.remove(object).is_none() {
            trace!(object = %object, "destroyed object was not tracked");
        }
    }
}
