//! `TypeMappings` (spec §4.6): binds path patterns to constructor/serializer
//! callbacks, consulted at every set/get crossing to shape-shift between
//! plain values and domain types.
//!
//! Grounded on `pl3xus_sync::registry::SyncRegistry` (`Vec<Registration>`
//! deduplicated by identity, looked up by matching on a key derived from the
//! request) generalized from `TypeId`-keyed Bevy components to path-pattern
//! bindings of arbitrary Rust types, with creator/serializer as type-erased
//! closures downcast through `Any`.

use crate::error::{AceError, AceResult};
use crate::path::PathInfo;
use crate::value::Value;
use std::any::{Any, TypeId};
use std::sync::{Arc, Mutex};

type AnyBox = Box<dyn Any + Send + Sync>;
type Creator = Arc<dyn Fn(&Value) -> AceResult<AnyBox> + Send + Sync>;
type Serializer = Arc<dyn Fn(&(dyn Any + Send + Sync)) -> AceResult<Value> + Send + Sync>;

struct Binding {
    pattern: PathInfo,
    type_id: TypeId,
    type_name: &'static str,
    creator: Creator,
    serializer: Serializer,
}

/// A registered mapping handle, returned by lookup methods; carries enough
/// to call the bound creator/serializer without exposing the registry's
/// internal lock.
pub struct TypeMapping<'a> {
    binding: &'a Binding,
}

impl<'a> TypeMapping<'a> {
    pub fn pattern(&self) -> &PathInfo {
        &self.binding.pattern
    }

    pub fn type_name(&self) -> &'static str {
        self.binding.type_name
    }

    /// Deserializes a plain value into the bound type, boxed as `dyn Any`.
    /// Callers downcast with `.downcast::<T>()`.
    pub fn create(&self, value: &Value) -> AceResult<AnyBox> {
        (self.binding.creator)(value)
    }

    /// Serializes a bound-type instance back into a plain value.
    pub fn serialize(&self, instance: &(dyn Any + Send + Sync)) -> AceResult<Value> {
        (self.binding.serializer)(instance)
    }
}

/// Process-wide registry of path-pattern to constructor/serializer
/// bindings (spec §5: "process-wide state mutated only by `bind()`;
/// readers traverse immutable snapshots of the mapping list").
#[derive(Default)]
pub struct TypeMappings {
    bindings: Mutex<Vec<Binding>>,
}

impl TypeMappings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `pattern` to type `T`'s creator/serializer pair. `pattern`
    /// follows the same wildcard/variable syntax as `PathInfo`.
    pub fn bind<T: Send + Sync + 'static>(
        &self,
        pattern: &str,
        creator: impl Fn(&Value) -> AceResult<T> + Send + Sync + 'static,
        serializer: impl Fn(&T) -> AceResult<Value> + Send + Sync + 'static,
    ) -> AceResult<()> {
        let pattern = PathInfo::get(pattern)?;
        let binding = Binding {
            pattern,
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            creator: Arc::new(move |v| creator(v).map(|t| Box::new(t) as AnyBox)),
            serializer: Arc::new(move |any| {
                let t = any.downcast_ref::<T>().ok_or_else(|| AceError::InvalidMapping {
                    path: std::any::type_name::<T>().to_string(),
                    reason: "serializer called with a value of the wrong bound type".to_string(),
                })?;
                serializer(t)
            }),
        };
        self.bindings.lock().unwrap().push(binding);
        Ok(())
    }

    /// Returns the mapping whose pattern matches the parent path of `path`
    /// (a mapping binds the *container* of the typed objects), preferring
    /// the most recently bound match.
    pub fn map(&self, path: &PathInfo) -> Option<TypeMappingRef> {
        let Some(parent) = path.parent() else { return None };
        let bindings = self.bindings.lock().unwrap();
        bindings
            .iter()
            .enumerate()
            .rev()
            .find(|(_, b)| b.pattern.equals(&parent))
            .map(|(i, _)| TypeMappingRef { index: i })
    }

    /// Every mapping whose pattern is equal to or a descendant of
    /// `entry_path`'s parent, deepest first.
    pub fn map_deep(&self, entry_path: &PathInfo) -> Vec<TypeMappingRef> {
        let Some(parent) = entry_path.parent() else { return Vec::new() };
        let bindings = self.bindings.lock().unwrap();
        let mut matches: Vec<(usize, usize)> = bindings
            .iter()
            .enumerate()
            .filter(|(_, b)| b.pattern.equals(&parent) || b.pattern.is_descendant_of(&parent))
            .map(|(i, b)| (b.pattern.keys().len(), i))
            .collect();
        matches.sort_by(|a, b| b.0.cmp(&a.0)); // deepest (longest pattern) first
        matches.into_iter().map(|(_, i)| TypeMappingRef { index: i }).collect()
    }

    pub fn with<R>(&self, handle: &TypeMappingRef, f: impl FnOnce(TypeMapping) -> R) -> R {
        let bindings = self.bindings.lock().unwrap();
        f(TypeMapping { binding: &bindings[handle.index] })
    }

    pub fn len(&self) -> usize {
        self.bindings.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An index into the registry's binding list, resolved back to a
/// `TypeMapping` via `TypeMappings::with`. Kept separate from `TypeMapping`
/// itself since the latter borrows the lock guard.
pub struct TypeMappingRef {
    index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[derive(Debug, PartialEq, Clone)]
    struct User {
        name: String,
    }

    #[test]
    fn bind_map_round_trips_instance() {
        let mappings = TypeMappings::new();
        mappings
            .bind::<User>(
                "users",
                |v| match v {
                    Value::Object(obj) => Ok(User {
                        name: obj.get("name").and_then(|v| match v {
                            Value::Str(s) => Some(s.clone()),
                            _ => None,
                        }).unwrap_or_default(),
                    }),
                    _ => Err(AceError::InvalidMapping { path: "users".into(), reason: "expected object".into() }),
                },
                |user| {
                    let mut obj = BTreeMap::new();
                    obj.insert("name".to_string(), Value::Str(user.name.clone()));
                    Ok(Value::Object(obj))
                },
            )
            .unwrap();

        let path = PathInfo::get("users/ewout").unwrap();
        let handle = mappings.map(&path).expect("mapping should match parent `users`");
        let instance = mappings.with(&handle, |m| {
            let boxed = m.create(&Value::Object([("name".to_string(), Value::Str("Ewout".into()))].into_iter().collect())).unwrap();
            *boxed.downcast::<User>().unwrap()
        });
        assert_eq!(instance, User { name: "Ewout".into() });

        let serialized = mappings.with(&handle, |m| m.serialize(&instance).unwrap());
        assert_eq!(serialized, Value::Object([("name".to_string(), Value::Str("Ewout".into()))].into_iter().collect()));
    }

    #[test]
    fn map_deep_orders_deepest_first() {
        let mappings = TypeMappings::new();
        mappings.bind::<User>("users", |_| Err(AceError::InvalidMapping { path: "".into(), reason: "unused".into() }), |_| Ok(Value::Null)).unwrap();
        mappings.bind::<User>("users/$id/profile", |_| Err(AceError::InvalidMapping { path: "".into(), reason: "unused".into() }), |_| Ok(Value::Null)).unwrap();

        let entry = PathInfo::get("users/ewout/profile/bio").unwrap();
        let matches = mappings.map_deep(&entry);
        assert_eq!(matches.len(), 2);
        let names: Vec<_> = matches.iter().map(|h| mappings.with(h, |m| m.pattern().path())).collect();
        assert_eq!(names[0], "users/$id/profile");
        assert_eq!(names[1], "users");
    }
}
