use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum Error {
  #[error("container gone")]
  ContainerGone,
  #[error("registry worker gone")]
  WorkerGone,
  #[error("no component named '{0}' is defined")]
  DescriptorNotFound(String),
  #[error("invalid descriptor '{name}': {message}")]
  InvalidDescriptor { name: String, message: String },
  #[error("a component named '{0}' is already registered")]
  DuplicateName(String),
  #[error("component '{0}' is not a factory")]
  NotAFactory(String),
  #[error("no component of type '{type_name}' available{}", describe_request(.dependency, .requested_by))]
  RequiredDependencyMissing {
    type_name: String,
    dependency: Option<String>,
    requested_by: Option<String>,
  },
  #[error("expected a single component of type '{type_name}' but found {}: {}", .candidates.len(), .candidates.join(", "))]
  NotUniqueCandidate {
    type_name: String,
    candidates: Vec<String>,
  },
  #[error("component '{name}' is of type '{actual}', not '{expected}'")]
  TypeMismatch {
    name: String,
    expected: String,
    actual: &'static str,
  },
  #[error("error creating component '{name}': {failure}")]
  Construction {
    name: String,
    failure: ConstructionFailure,
  },
  #[error("component '{name}' is currently in creation: unresolvable circular reference ({})", .chain.join(" -> "))]
  CircularReference { name: String, chain: Vec<String> },
  #[error("component '{name}' was injected into other components in its raw version, but has been wrapped since")]
  RawReferenceInjected { name: String },
  #[error("initialization of component '{name}' failed: {cause}")]
  Initialization {
    name: String,
    cause: Arc<anyhow::Error>,
  },
  #[error("{} destroy callback(s) failed: {}", .0.len(), describe_failures(.0))]
  Destruction(Vec<DestructionFailure>),
  #[error("component '{name}' failed {attempts} time(s) and will not be created again; last error: {last}")]
  PermanentlyFailed {
    name: String,
    attempts: u32,
    last: Box<Error>,
  },
}

impl Error {
  /// Whether this error, or any constructor attempt recorded inside it, is
  /// caused by a circular reference.
  pub fn is_circular(&self) -> bool {
    match self {
      Error::CircularReference { .. } => true,
      Error::Construction {
        failure: ConstructionFailure::NoViableConstructor(attempts),
        ..
      } => attempts
        .iter()
        .flat_map(|a| a.errors.iter())
        .any(|e| e.error.is_circular()),
      Error::PermanentlyFailed { last, .. } => last.is_circular(),
      _ => false,
    }
  }

  /// Converts an error returned by user code, keeping container errors intact.
  pub(crate) fn from_user(err: anyhow::Error, wrap: impl FnOnce(Arc<anyhow::Error>) -> Error) -> Error {
    match err.downcast::<Error>() {
      Ok(err) => err,
      Err(err) => wrap(Arc::new(err)),
    }
  }
}

#[derive(Debug, Clone)]
pub enum ConstructionFailure {
  IsAbstract,
  NoClass,
  NoViableConstructor(Vec<ConstructorAttempt>),
  NoMatchingArguments(usize),
  UnknownProperty(String),
  PropertyConversion { property: String, message: String },
  PropertyFailed { property: String, cause: Arc<anyhow::Error> },
  Threw(Arc<anyhow::Error>),
}

impl fmt::Display for ConstructionFailure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ConstructionFailure::IsAbstract => write!(f, "descriptor is abstract"),
      ConstructionFailure::NoClass => write!(f, "descriptor declares no class"),
      ConstructionFailure::NoViableConstructor(attempts) => {
        write!(f, "no viable constructor or factory method")?;
        for attempt in attempts {
          write!(f, "; {}", attempt)?;
        }
        Ok(())
      }
      ConstructionFailure::NoMatchingArguments(count) => {
        write!(f, "no constructor or factory method accepts the {} explicit argument(s)", count)
      }
      ConstructionFailure::UnknownProperty(property) => {
        write!(f, "property '{}' is not writable", property)
      }
      ConstructionFailure::PropertyConversion { property, message } => {
        write!(f, "cannot convert value for property '{}': {}", property, message)
      }
      ConstructionFailure::PropertyFailed { property, cause } => {
        write!(f, "setting property '{}' failed: {}", property, cause)
      }
      ConstructionFailure::Threw(cause) => write!(f, "instantiation failed: {}", cause),
    }
  }
}

/// One rejected constructor or factory method.
#[derive(Debug, Clone)]
pub struct ConstructorAttempt {
  pub signature: String,
  pub errors: Vec<ParameterError>,
}

impl fmt::Display for ConstructorAttempt {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} rejected (", self.signature)?;
    for (i, e) in self.errors.iter().enumerate() {
      if i > 0 {
        write!(f, ", ")?;
      }
      write!(f, "{}", e)?;
    }
    write!(f, ")")
  }
}

#[derive(Debug, Clone)]
pub struct ParameterError {
  pub index: usize,
  pub name: String,
  pub error: Error,
}

impl fmt::Display for ParameterError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "parameter #{} '{}': {}", self.index, self.name, self.error)
  }
}

#[derive(Debug, Clone)]
pub struct DestructionFailure {
  pub name: String,
  pub cause: Arc<anyhow::Error>,
}

fn describe_request(dependency: &Option<String>, requested_by: &Option<String>) -> String {
  match (dependency, requested_by) {
    (Some(d), Some(r)) => format!(" for dependency '{}' of '{}'", d, r),
    (Some(d), None) => format!(" for dependency '{}'", d),
    (None, Some(r)) => format!(" for '{}'", r),
    (None, None) => String::new(),
  }
}

fn describe_failures(failures: &[DestructionFailure]) -> String {
  failures
    .iter()
    .map(|f| format!("'{}': {}", f.name, f.cause))
    .collect::<Vec<_>>()
    .join("; ")
}
