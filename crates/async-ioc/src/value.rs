use std::sync::Arc;

use anyhow::{anyhow, bail};

use crate::descriptor::ComponentDescriptor;
use crate::resolution::Deferred;
use crate::types::{DeclaredType, Instance};

/// Declarative value of a constructor argument or property.
#[derive(Debug, Clone)]
pub enum ValueSpec {
    /// Explicit reference to another component by name.
    Ref(String),
    /// Text converted to the declared type of the target.
    Literal(String),
    Int(i64),
    Bool(bool),
    Null,
    /// Resolve by the declared type of the target.
    Autowire,
    /// An anonymous component created for this value only. It is never
    /// registered and shares the scope of the component it is injected into.
    Inner(Arc<ComponentDescriptor>),
    /// Components collected into a list, in order.
    List(Vec<ValueSpec>),
}

impl ValueSpec {
    pub fn inner(descriptor: ComponentDescriptor) -> Self {
        ValueSpec::Inner(Arc::new(descriptor))
    }

    pub fn list(items: impl IntoIterator<Item = ValueSpec>) -> Self {
        ValueSpec::List(items.into_iter().collect())
    }

    pub fn reference(name: impl Into<String>) -> Self {
        ValueSpec::Ref(name.into())
    }

    pub fn literal(text: impl Into<String>) -> Self {
        ValueSpec::Literal(text.into())
    }
}

impl PartialEq for ValueSpec {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ValueSpec::Ref(a), ValueSpec::Ref(b)) | (ValueSpec::Literal(a), ValueSpec::Literal(b)) => a == b,
            (ValueSpec::Int(a), ValueSpec::Int(b)) => a == b,
            (ValueSpec::Bool(a), ValueSpec::Bool(b)) => a == b,
            (ValueSpec::Null, ValueSpec::Null) | (ValueSpec::Autowire, ValueSpec::Autowire) => true,
            (ValueSpec::Inner(a), ValueSpec::Inner(b)) => Arc::ptr_eq(a, b),
            (ValueSpec::List(a), ValueSpec::List(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ValueSpec {}

/// A resolved value handed to constructors, factory methods and setters.
#[derive(Debug, Clone)]
pub enum Value {
    Instance(Instance),
    Int(i64),
    Str(String),
    Bool(bool),
    List(Vec<Instance>),
    Deferred(Deferred),
    Absent,
}

impl Value {
    pub fn str(text: impl Into<String>) -> Self {
        Value::Str(text.into())
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Absent)
    }

    /// Whether this value can be passed where `ty` is declared.
    pub(crate) fn fits(&self, ty: &DeclaredType) -> bool {
        match (self, ty) {
            (_, DeclaredType::Any) | (_, DeclaredType::Variable(_)) => true,
            (Value::Int(_), DeclaredType::Int)
            | (Value::Str(_), DeclaredType::Str)
            | (Value::Bool(_), DeclaredType::Bool) => true,
            (Value::Instance(i), DeclaredType::Component(key)) => {
                i.type_info().is_assignable_to(key)
            }
            (Value::Instance(_), DeclaredType::Optional(inner)) => self.fits(inner),
            (Value::Absent, DeclaredType::Optional(_)) => true,
            (Value::List(items), DeclaredType::List(inner)) => items
                .iter()
                .all(|i| Value::Instance(i.clone()).fits(inner)),
            (Value::Deferred(_), DeclaredType::Lazy(_)) => true,
            _ => false,
        }
    }

    /// Converts literal text to the declared simple type.
    pub(crate) fn from_literal(text: &str, ty: &DeclaredType) -> Result<Value, String> {
        match ty {
            DeclaredType::Int => text
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|e| format!("'{}' is not an integer: {}", text, e)),
            DeclaredType::Bool => match text.trim() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                other => Err(format!("'{}' is not a boolean", other)),
            },
            DeclaredType::Str | DeclaredType::Any | DeclaredType::Variable(_) => {
                Ok(Value::Str(text.to_string()))
            }
            DeclaredType::Optional(inner) => Value::from_literal(text, inner),
            other => Err(format!("a literal cannot be converted to '{}'", other)),
        }
    }
}

impl From<Instance> for Value {
    fn from(instance: Instance) -> Self {
        Value::Instance(instance)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

/// Resolved arguments of one constructor or factory method invocation.
#[derive(Debug, Clone, Default)]
pub struct Args {
    values: Vec<Value>,
}

impl Args {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn value(&self, index: usize) -> anyhow::Result<&Value> {
        self.values
            .get(index)
            .ok_or_else(|| anyhow!("no argument at index {}", index))
    }

    pub fn instance<T: ?Sized + 'static>(&self, index: usize) -> anyhow::Result<Arc<T>> {
        as_instance::<T>(self.value(index)?)
    }

    pub fn optional<T: ?Sized + 'static>(&self, index: usize) -> anyhow::Result<Option<Arc<T>>> {
        match self.value(index)? {
            Value::Absent => Ok(None),
            other => as_instance::<T>(other).map(Some),
        }
    }

    pub fn list<T: ?Sized + 'static>(&self, index: usize) -> anyhow::Result<Vec<Arc<T>>> {
        match self.value(index)? {
            Value::List(items) => items
                .iter()
                .map(|i| as_instance::<T>(&Value::Instance(i.clone())))
                .collect(),
            other => bail!("expected a list, got {:?}", other),
        }
    }

    pub fn deferred(&self, index: usize) -> anyhow::Result<Deferred> {
        match self.value(index)? {
            Value::Deferred(d) => Ok(d.clone()),
            other => bail!("expected a deferred dependency, got {:?}", other),
        }
    }

    pub fn int(&self, index: usize) -> anyhow::Result<i64> {
        as_int(self.value(index)?)
    }

    pub fn str(&self, index: usize) -> anyhow::Result<String> {
        as_str(self.value(index)?)
    }

    pub fn bool(&self, index: usize) -> anyhow::Result<bool> {
        match self.value(index)? {
            Value::Bool(v) => Ok(*v),
            other => bail!("expected a boolean, got {:?}", other),
        }
    }
}

pub fn as_instance<T: ?Sized + 'static>(value: &Value) -> anyhow::Result<Arc<T>> {
    match value {
        Value::Instance(i) => i.downcast::<T>().ok_or_else(|| {
            anyhow!(
                "component of type '{}' is not a '{}'",
                i.type_key().name(),
                std::any::type_name::<T>()
            )
        }),
        other => bail!("expected a component, got {:?}", other),
    }
}

pub fn as_int(value: &Value) -> anyhow::Result<i64> {
    match value {
        Value::Int(v) => Ok(*v),
        other => bail!("expected an integer, got {:?}", other),
    }
}

pub fn as_str(value: &Value) -> anyhow::Result<String> {
    match value {
        Value::Str(v) => Ok(v.clone()),
        other => bail!("expected a string, got {:?}", other),
    }
}
