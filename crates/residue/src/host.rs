//! Host object runtime contract, plus a small in-process implementation.
//!
//! The tracer needs two things from the runtime it observes: a way to
//! resolve and compare types ([`TypeSystem`]) and a hook point that calls
//! [`LifecycleHooks`] on every construction and finalization. [`TypeTable`]
//! and [`HostRuntime`] provide both so the tracer can be driven end to end
//! without an external object system.

use parking_lot::RwLock;
use residue_types::{InvariantError, ObjectKey, TypeKey};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::interceptor::{HostObject, LifecycleHooks};

/// Type identity queries the tracer makes against the host.
pub trait TypeSystem: Send + Sync {
    /// Resolve a type by name. `None` if no such type is registered (yet).
    fn lookup(&self, name: &str) -> Option<TypeKey>;

    fn name_of(&self, ty: TypeKey) -> Option<Arc<str>>;

    /// `true` if `ty` is `ancestor` or derives from it.
    fn is_a(&self, ty: TypeKey, ancestor: TypeKey) -> bool;
}

// ── Type table ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeError {
    DuplicateName(String),
    UnknownParent(TypeKey),
    Exhausted,
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateName(name) => write!(f, "type {name:?} is already registered"),
            Self::UnknownParent(parent) => write!(f, "parent {parent} is not registered"),
            Self::Exhausted => write!(f, "type table is full"),
        }
    }
}

impl Error for TypeError {}

struct TypeInfo {
    name: Arc<str>,
    parent: Option<TypeKey>,
}

#[derive(Default)]
struct TypeTableInner {
    types: Vec<TypeInfo>,
    by_name: HashMap<Arc<str>, TypeKey>,
}

/// Single-inheritance type registry.
///
/// Types can be registered at any time, including after a tracer has been
/// configured against this table.
#[derive(Default)]
pub struct TypeTable {
    inner: RwLock<TypeTableInner>,
}

impl TypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str, parent: Option<TypeKey>) -> Result<TypeKey, TypeError> {
        let mut inner = self.inner.write();
        if inner.by_name.contains_key(name) {
            return Err(TypeError::DuplicateName(name.to_string()));
        }
        if let Some(parent) = parent {
            if slot(parent) >= inner.types.len() {
                return Err(TypeError::UnknownParent(parent));
            }
        }
        let key = u32::try_from(inner.types.len() + 1)
            .ok()
            .and_then(|raw| TypeKey::new(raw).ok())
            .ok_or(TypeError::Exhausted)?;
        let name: Arc<str> = Arc::from(name);
        inner.types.push(TypeInfo {
            name: name.clone(),
            parent,
        });
        inner.by_name.insert(name, key);
        Ok(key)
    }

    pub fn len(&self) -> usize {
        self.inner.read().types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn slot(ty: TypeKey) -> usize {
    ty.get() as usize - 1
}

impl TypeSystem for TypeTable {
    fn lookup(&self, name: &str) -> Option<TypeKey> {
        self.inner.read().by_name.get(name).copied()
    }

    fn name_of(&self, ty: TypeKey) -> Option<Arc<str>> {
        self.inner
            .read()
            .types
            .get(slot(ty))
            .map(|info| info.name.clone())
    }

    fn is_a(&self, ty: TypeKey, ancestor: TypeKey) -> bool {
        let inner = self.inner.read();
        let mut current = Some(ty);
        while let Some(candidate) = current {
            if candidate == ancestor {
                return true;
            }
            current = inner.types.get(slot(candidate)).and_then(|info| info.parent);
        }
        false
    }
}

// ── Runtime and hook point ───────────────────────────────

/// Handle returned by [`HostRuntime::attach`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

/// Object runtime that notifies attached hooks about every instance it
/// creates and destroys.
pub struct HostRuntime {
    types: Arc<TypeTable>,
    hooks: RwLock<Vec<(HookId, Arc<dyn LifecycleHooks>)>>,
    next_hook: AtomicU64,
}

impl HostRuntime {
    pub fn new(types: Arc<TypeTable>) -> Self {
        Self {
            types,
            hooks: RwLock::new(Vec::new()),
            next_hook: AtomicU64::new(1),
        }
    }

    pub fn types(&self) -> &Arc<TypeTable> {
        &self.types
    }

    pub fn attach(&self, hooks: Arc<dyn LifecycleHooks>) -> HookId {
        let id = HookId(self.next_hook.fetch_add(1, Ordering::Relaxed));
        self.hooks.write().push((id, hooks));
        id
    }

    /// Returns `false` if `id` was not attached.
    pub fn detach(&self, id: HookId) -> bool {
        let mut hooks = self.hooks.write();
        let before = hooks.len();
        hooks.retain(|(hook_id, _)| *hook_id != id);
        hooks.len() != before
    }

    pub fn create(&self, ty: TypeKey, label: Option<&str>) -> Result<Instance<'_>, InvariantError> {
        let data = Box::new(InstanceData {
            ty,
            label: label.map(str::to_string),
        });
        let key = ObjectKey::from_ptr(&*data as *const InstanceData)?;
        let instance = Instance {
            runtime: self,
            key,
            data,
        };
        self.notify_construct(&instance, ty);
        Ok(instance)
    }

    // Hooks may create objects of their own, so dispatch must not deadlock
    // against a pending attach/detach.
    fn notify_construct(&self, object: &dyn HostObject, ty: TypeKey) {
        for (_, hooks) in self.hooks.read_recursive().iter() {
            hooks.on_construct(object, ty);
        }
    }

    fn notify_destroy(&self, key: ObjectKey) {
        for (_, hooks) in self.hooks.read_recursive().iter() {
            hooks.on_destroy(key);
        }
    }
}

struct InstanceData {
    ty: TypeKey,
    label: Option<String>,
}

/// A live object of the host runtime. Dropping it finalizes the object.
pub struct Instance<'rt> {
    runtime: &'rt HostRuntime,
    key: ObjectKey,
    data: Box<InstanceData>,
}

impl Instance<'_> {
    pub fn key(&self) -> ObjectKey {
        self.key
    }

    pub fn type_key(&self) -> TypeKey {
        self.data.ty
    }

    pub fn label(&self) -> Option<&str> {
        self.data.label.as_deref()
    }
}

impl HostObject for Instance<'_> {
    fn object_key(&self) -> ObjectKey {
        self.key
    }

    fn describe(&self) -> Option<String> {
        self.data.label.clone()
    }
}

impl Drop for Instance<'_> {
    fn drop(&mut self) {
        // Runs before `data` is freed, so the address cannot have been
        // handed out again yet.
        self.runtime.notify_destroy(self.key);
    }
}
