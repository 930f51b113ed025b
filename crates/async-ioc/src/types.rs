use std::any::{type_name, Any, TypeId};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

pub type BoxAny = Box<dyn Any + Send + Sync>;

/// Type-erased component object. The concrete value is always the sized
/// component type registered in its [`TypeInfo`].
pub type Bean = Arc<dyn Any + Send + Sync>;

/// Runtime identity of a type, with its name kept for diagnostics.
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

impl PartialOrd for TypeKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TypeKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

type Caster = Arc<dyn Fn(Bean) -> Option<BoxAny> + Send + Sync>;

/// The concrete type of a component and every type it can be injected as.
///
/// Each entry carries a caster producing a boxed `Arc<Target>`, which is how
/// a sized component becomes an `Arc<dyn Trait>` without reflection.
#[derive(Clone)]
pub struct TypeInfo {
    key: TypeKey,
    casts: Vec<(TypeKey, Caster)>,
}

impl TypeInfo {
    pub fn of<T: Send + Sync + 'static>() -> Self {
        let cast: Caster = Arc::new(|bean: Bean| {
            bean.downcast::<T>().ok().map(|v| Box::new(v) as BoxAny)
        });
        Self {
            key: TypeKey::of::<T>(),
            casts: vec![(TypeKey::of::<T>(), cast)],
        }
    }

    /// Declares that components of type `T` are assignable to `A`.
    pub fn alias<T, A, F>(mut self, cast: F) -> Self
    where
        T: Send + Sync + 'static,
        A: ?Sized + Send + Sync + 'static,
        F: Fn(Arc<T>) -> Arc<A> + Send + Sync + 'static,
    {
        let caster: Caster = Arc::new(move |bean: Bean| {
            bean.downcast::<T>()
                .ok()
                .map(|v| Box::new(cast(v)) as BoxAny)
        });
        self.casts.retain(|(k, _)| *k != TypeKey::of::<A>());
        self.casts.push((TypeKey::of::<A>(), caster));
        self
    }

    pub fn key(&self) -> TypeKey {
        self.key
    }

    pub fn is_assignable_to(&self, target: &TypeKey) -> bool {
        self.casts.iter().any(|(k, _)| k == target)
    }

    pub fn cast<A: ?Sized + 'static>(&self, bean: &Bean) -> Option<Arc<A>> {
        let target = TypeKey::of::<A>();
        let (_, caster) = self.casts.iter().find(|(k, _)| *k == target)?;
        caster(bean.clone())?
            .downcast::<Arc<A>>()
            .ok()
            .map(|v| *v)
    }
}

impl fmt::Debug for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeInfo")
            .field("key", &self.key)
            .field(
                "assignable_to",
                &self.casts.iter().map(|(k, _)| k).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Declared type of a constructor parameter or property.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeclaredType {
    Component(TypeKey),
    Optional(Box<DeclaredType>),
    List(Box<DeclaredType>),
    Lazy(Box<DeclaredType>),
    Int,
    Str,
    Bool,
    /// Object-like: accepts any value, least specific for constructor choice.
    Any,
    /// A type variable bound by the containing class.
    Variable(&'static str),
}

impl DeclaredType {
    pub fn component<T: ?Sized + 'static>() -> Self {
        DeclaredType::Component(TypeKey::of::<T>())
    }

    pub fn optional(inner: DeclaredType) -> Self {
        DeclaredType::Optional(Box::new(inner))
    }

    pub fn list(inner: DeclaredType) -> Self {
        DeclaredType::List(Box::new(inner))
    }

    pub fn lazy(inner: DeclaredType) -> Self {
        DeclaredType::Lazy(Box::new(inner))
    }

    /// One level of generic unwrapping; non-wrappers return themselves.
    pub fn element(&self) -> &DeclaredType {
        match self {
            DeclaredType::Optional(inner)
            | DeclaredType::List(inner)
            | DeclaredType::Lazy(inner) => inner,
            other => other,
        }
    }

    pub fn is_object_like(&self) -> bool {
        matches!(self, DeclaredType::Any | DeclaredType::Variable(_))
    }

    pub fn is_simple(&self) -> bool {
        matches!(self, DeclaredType::Int | DeclaredType::Str | DeclaredType::Bool)
    }
}

impl fmt::Display for DeclaredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeclaredType::Component(key) => f.write_str(key.name()),
            DeclaredType::Optional(inner) => write!(f, "Option<{}>", inner),
            DeclaredType::List(inner) => write!(f, "Vec<{}>", inner),
            DeclaredType::Lazy(inner) => write!(f, "Deferred<{}>", inner),
            DeclaredType::Int => f.write_str("i64"),
            DeclaredType::Str => f.write_str("String"),
            DeclaredType::Bool => f.write_str("bool"),
            DeclaredType::Any => f.write_str("Any"),
            DeclaredType::Variable(name) => f.write_str(name),
        }
    }
}

/// A container-managed component: the shared object plus its type metadata.
#[derive(Clone)]
pub struct Instance {
    bean: Bean,
    type_info: Arc<TypeInfo>,
}

impl Instance {
    pub fn new<T: Send + Sync + 'static>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    pub fn from_arc<T: Send + Sync + 'static>(value: Arc<T>) -> Self {
        Self {
            bean: value,
            type_info: Arc::new(TypeInfo::of::<T>()),
        }
    }

    /// Wraps an object with explicit type metadata, e.g. to expose aliases.
    pub fn with_type_info(bean: Bean, type_info: TypeInfo) -> Self {
        Self {
            bean,
            type_info: Arc::new(type_info),
        }
    }

    pub(crate) fn from_parts(bean: Bean, type_info: Arc<TypeInfo>) -> Self {
        Self { bean, type_info }
    }

    pub fn bean(&self) -> &Bean {
        &self.bean
    }

    pub fn type_info(&self) -> &TypeInfo {
        &self.type_info
    }

    pub(crate) fn shared_type_info(&self) -> Arc<TypeInfo> {
        self.type_info.clone()
    }

    pub fn type_key(&self) -> TypeKey {
        self.type_info.key()
    }

    pub fn downcast<A: ?Sized + 'static>(&self) -> Option<Arc<A>> {
        self.type_info.cast::<A>(&self.bean)
    }

    /// Reference identity: both handles point at the same object.
    pub fn ptr_eq(&self, other: &Instance) -> bool {
        Arc::ptr_eq(&self.bean, &other.bean)
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("type", &self.type_info.key())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Speak: Send + Sync {
        fn speak(&self) -> &'static str;
    }

    struct Dog;

    impl Speak for Dog {
        fn speak(&self) -> &'static str {
            "woof"
        }
    }

    #[test]
    fn casts_to_concrete_and_alias() {
        let info = TypeInfo::of::<Dog>().alias::<Dog, dyn Speak, _>(|d| d as Arc<dyn Speak>);
        let instance = Instance::with_type_info(Arc::new(Dog), info);

        assert!(instance.type_info().is_assignable_to(&TypeKey::of::<dyn Speak>()));
        assert!(instance.downcast::<Dog>().is_some());
        assert_eq!(instance.downcast::<dyn Speak>().unwrap().speak(), "woof");
        assert!(instance.downcast::<String>().is_none());
    }

    #[test]
    fn element_unwraps_one_level() {
        let ty = DeclaredType::optional(DeclaredType::list(DeclaredType::Int));
        assert_eq!(ty.element(), &DeclaredType::list(DeclaredType::Int));
        assert_eq!(ty.element().element(), &DeclaredType::Int);
        assert_eq!(DeclaredType::Int.element(), &DeclaredType::Int);
    }
}
