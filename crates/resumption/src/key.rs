//! Opaque keys used for request identities, data sources and sequence groups

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A type-erased, hashable value.
///
/// Two keys are equal only if they wrap values of the same type that compare equal, so
/// `Key::new(42u32)` and `Key::new(42u64)` are distinct keys. Text converted with
/// `Key::from` is always stored as a `String`, whether it started out borrowed or owned.
#[derive(Clone)]
pub struct Key(Arc<dyn KeyValue>);

trait KeyValue: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn eq_key(&self, other: &dyn KeyValue) -> bool;
    fn hash_key(&self, state: &mut dyn Hasher);
    fn fmt_key(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;
}

impl<T> KeyValue for T
where
    T: Any + Eq + Hash + fmt::Debug + Send + Sync,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn eq_key(&self, other: &dyn KeyValue) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| self == other)
    }

    fn hash_key(&self, mut state: &mut dyn Hasher) {
        TypeId::of::<T>().hash(&mut state);
        self.hash(&mut state);
    }

    fn fmt_key(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Key {
    pub fn new<T>(value: T) -> Self
    where
        T: Any + Eq + Hash + fmt::Debug + Send + Sync,
    {
        Key(Arc::new(value))
    }

    /// A key standing for a type, typically the batching service behind a data source
    pub fn of_type<T: ?Sized + 'static>() -> Self {
        Key::new(TypeKey {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        })
    }

    /// Returns the wrapped value if it is of type `T`
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_key(other.0.as_ref())
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash_key(state);
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt_key(f)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::new(value.to_string())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::new(value)
    }
}

impl From<u64> for Key {
    fn from(value: u64) -> Self {
        Key::new(value)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type {}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    struct GeoBatch;
    struct WeatherBatch;

    #[test]
    fn test_equal_values_are_equal_keys() {
        assert_eq!(Key::new("ip:1.1.1.1"), Key::new("ip:1.1.1.1"));
        assert_ne!(Key::new("ip:1.1.1.1"), Key::new("ip:8.8.8.8"));
    }

    #[test]
    fn test_borrowed_and_owned_text_are_one_key() {
        let octet = 4;
        assert_eq!(Key::from("ip:1.2.3.4"), Key::from(format!("ip:1.2.3.{octet}")));
        assert_eq!(Key::from("geo"), Key::new(String::from("geo")));

        let mut keys = HashSet::new();
        keys.insert(Key::from("geo"));
        keys.insert(Key::from(String::from("geo")));
        assert_eq!(keys.len(), 1);
    }

    #[test]
    fn test_keys_of_different_types_differ() {
        assert_ne!(Key::new("42"), Key::new(String::from("42")));
        assert_ne!(Key::new(42u64), Key::new(42u32));
    }

    #[test]
    fn test_keys_hash_consistently() {
        let mut keys = HashSet::new();
        keys.insert(Key::new(("user", 7u64)));
        keys.insert(Key::new(("user", 7u64)));
        keys.insert(Key::new(("user", 8u64)));
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn test_type_keys() {
        assert_eq!(Key::of_type::<GeoBatch>(), Key::of_type::<GeoBatch>());
        assert_ne!(Key::of_type::<GeoBatch>(), Key::of_type::<WeatherBatch>());
        assert!(format!("{:?}", Key::of_type::<GeoBatch>()).contains("GeoBatch"));
    }

    #[test]
    fn test_downcast() {
        let key = Key::new(17u64);
        assert_eq!(key.downcast_ref::<u64>(), Some(&17));
        assert_eq!(key.downcast_ref::<u32>(), None);
        assert_eq!(format!("{key:?}"), "17");
    }
}
