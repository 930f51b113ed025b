use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::class::ComponentClass;
use crate::types::{DeclaredType, TypeKey};

/// The member a dependency is injected into.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InjectionPoint {
    Field {
        declaring: TypeKey,
        name: String,
        ty: DeclaredType,
    },
    Parameter {
        declaring: TypeKey,
        executable: String,
        index: usize,
        name: Option<String>,
        ty: DeclaredType,
    },
}

impl InjectionPoint {
    pub fn declaring(&self) -> TypeKey {
        match self {
            InjectionPoint::Field { declaring, .. } | InjectionPoint::Parameter { declaring, .. } => *declaring,
        }
    }

    pub fn declared_type(&self) -> &DeclaredType {
        match self {
            InjectionPoint::Field { ty, .. } | InjectionPoint::Parameter { ty, .. } => ty,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            InjectionPoint::Field { name, .. } => Some(name),
            InjectionPoint::Parameter { name, .. } => name.as_deref(),
        }
    }
}

#[derive(Debug, Clone)]
struct ContainingType {
    key: TypeKey,
    bindings: Arc<BTreeMap<&'static str, DeclaredType>>,
}

/// A request for one dependency of one injection point.
#[derive(Debug, Clone)]
pub struct DependencyDescriptor {
    point: InjectionPoint,
    required: bool,
    eager: bool,
    nesting_level: usize,
    containing: Option<ContainingType>,
    shortcut: Option<String>,
}

impl DependencyDescriptor {
    pub fn for_field(declaring: TypeKey, name: impl Into<String>, ty: DeclaredType) -> Self {
        Self::new(InjectionPoint::Field {
            declaring,
            name: name.into(),
            ty,
        })
    }

    pub fn for_parameter(
        declaring: TypeKey,
        executable: impl Into<String>,
        index: usize,
        name: Option<String>,
        ty: DeclaredType,
    ) -> Self {
        Self::new(InjectionPoint::Parameter {
            declaring,
            executable: executable.into(),
            index,
            name,
            ty,
        })
    }

    fn new(point: InjectionPoint) -> Self {
        Self {
            point,
            required: true,
            eager: true,
            nesting_level: 1,
            containing: None,
            shortcut: None,
        }
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn eager(mut self, eager: bool) -> Self {
        self.eager = eager;
        self
    }

    /// Pre-resolved reference: resolution goes straight to this name.
    pub fn with_shortcut(mut self, name: impl Into<String>) -> Self {
        self.shortcut = Some(name.into());
        self
    }

    pub fn point(&self) -> &InjectionPoint {
        &self.point
    }

    pub fn shortcut(&self) -> Option<&str> {
        self.shortcut.as_deref()
    }

    /// A dependency declared as optional is never required, whatever the
    /// flag says.
    pub fn is_required(&self) -> bool {
        self.required && !matches!(self.point.declared_type(), DeclaredType::Optional(_))
    }

    pub fn is_eager(&self) -> bool {
        self.eager
    }

    pub fn nesting_level(&self) -> usize {
        self.nesting_level
    }

    pub fn increase_nesting_level(&mut self) {
        self.nesting_level += 1;
    }

    /// A copy one generic level deeper, used to resolve the element of a
    /// wrapper type.
    pub fn nested(&self) -> Self {
        let mut nested = self.clone();
        nested.increase_nesting_level();
        nested.shortcut = None;
        nested
    }

    /// Resolves type variables against `class` instead of the declaring type.
    pub fn set_containing_class(&mut self, class: &ComponentClass) {
        self.containing = Some(ContainingType {
            key: class.type_key(),
            bindings: class.type_bindings().clone(),
        });
    }

    pub fn containing_type(&self) -> TypeKey {
        self.containing
            .as_ref()
            .map(|c| c.key)
            .unwrap_or_else(|| self.point.declaring())
    }

    pub fn dependency_name(&self) -> Option<&str> {
        self.point.name()
    }

    /// Declared type after unwrapping `nesting_level - 1` wrappers and
    /// substituting bound type variables.
    pub fn dependency_type(&self) -> DeclaredType {
        let mut ty = self.point.declared_type();
        for _ in 1..self.nesting_level {
            ty = ty.element();
        }
        self.substitute(ty)
    }

    fn substitute(&self, ty: &DeclaredType) -> DeclaredType {
        match ty {
            DeclaredType::Variable(var) => self
                .containing
                .as_ref()
                .and_then(|c| c.bindings.get(var))
                .cloned()
                .unwrap_or(DeclaredType::Any),
            DeclaredType::Optional(inner) => DeclaredType::optional(self.substitute(inner)),
            DeclaredType::List(inner) => DeclaredType::list(self.substitute(inner)),
            DeclaredType::Lazy(inner) => DeclaredType::lazy(self.substitute(inner)),
            other => other.clone(),
        }
    }

    pub fn describe(&self) -> String {
        match &self.point {
            InjectionPoint::Field { declaring, name, .. } => {
                format!("field '{}' of {}", name, declaring.name())
            }
            InjectionPoint::Parameter {
                declaring,
                executable,
                index,
                ..
            } => format!("parameter #{} of {}::{}", index, declaring.name(), executable),
        }
    }
}

impl PartialEq for DependencyDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.point == other.point
            && self.required == other.required
            && self.eager == other.eager
            && self.nesting_level == other.nesting_level
            && self.containing.as_ref().map(|c| c.key) == other.containing.as_ref().map(|c| c.key)
    }
}

impl Eq for DependencyDescriptor {}

impl Hash for DependencyDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.point.hash(state);
        self.containing.as_ref().map(|c| c.key).hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct Repository;
    struct Service;

    fn field(ty: DeclaredType) -> DependencyDescriptor {
        DependencyDescriptor::for_field(TypeKey::of::<Service>(), "repository", ty)
    }

    #[test]
    fn nesting_level_unwraps_wrappers() {
        let mut desc = field(DeclaredType::optional(DeclaredType::component::<Repository>()));
        assert_eq!(
            desc.dependency_type(),
            DeclaredType::optional(DeclaredType::component::<Repository>())
        );
        desc.increase_nesting_level();
        assert_eq!(desc.dependency_type(), DeclaredType::component::<Repository>());
        assert!(!desc.is_required());
    }

    #[test]
    fn type_variables_resolve_against_containing_class() {
        let class = ComponentClass::builder::<Service>()
            .bind_type_variable("R", DeclaredType::component::<Repository>())
            .build();
        let mut desc = field(DeclaredType::list(DeclaredType::Variable("R")));
        assert_eq!(desc.dependency_type(), DeclaredType::list(DeclaredType::Any));

        desc.set_containing_class(&class);
        assert_eq!(
            desc.dependency_type(),
            DeclaredType::list(DeclaredType::component::<Repository>())
        );
        assert_eq!(desc.containing_type(), TypeKey::of::<Service>());
    }

    #[test]
    fn equality_is_structural() {
        let a = field(DeclaredType::component::<Repository>());
        let b = field(DeclaredType::component::<Repository>()).with_shortcut("repo");
        let c = DependencyDescriptor::for_parameter(
            TypeKey::of::<Service>(),
            "new",
            0,
            Some("repository".to_string()),
            DeclaredType::component::<Repository>(),
        );

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, a.clone().required(false));

        let set: HashSet<_> = vec![a.clone(), b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
        assert_eq!(a.dependency_name(), Some("repository"));
    }
}
