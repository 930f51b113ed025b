use std::sync::Arc;

use parking_lot::Mutex;

use crate::class::{ComponentClass, DISPOSABLE_METHOD};
use crate::error::{DestructionFailure, Error};
use crate::types::Instance;

/// Destroy hooks of one finished singleton.
pub(crate) struct Disposable {
    name: String,
    instance: Instance,
    class: Arc<ComponentClass>,
    destroy_method: Option<String>,
}

impl Disposable {
    /// `None` when the component has nothing to run at shutdown.
    pub fn new(
        name: &str,
        instance: Instance,
        class: Arc<ComponentClass>,
        destroy_method: Option<&str>,
    ) -> Option<Self> {
        if !class.is_disposable() && destroy_method.is_none() {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            instance,
            class,
            destroy_method: destroy_method.map(str::to_string),
        })
    }

    /// Runs the dispose callback, then the custom destroy method unless it
    /// names the dispose callback. Both run even if the first fails.
    fn destroy(&self) -> Vec<anyhow::Error> {
        let mut errors = Vec::new();
        if let Some(dispose) = self.class.disposable() {
            if let Err(err) = dispose(&self.instance) {
                errors.push(err);
            }
        }
        if let Some(method) = &self.destroy_method {
            if self.class.is_disposable() && method == DISPOSABLE_METHOD {
                return errors;
            }
            match self.class.method(method) {
                Some(callback) => {
                    if let Err(err) = callback(&self.instance) {
                        errors.push(err);
                    }
                }
                None => errors.push(anyhow::anyhow!(
                    "no destroy method named '{}' on '{}'",
                    method,
                    self.class.type_key().name()
                )),
            }
        }
        errors
    }
}

/// Keeps disposable singletons in creation order.
#[derive(Default)]
pub(crate) struct LifecycleCoordinator {
    disposables: Mutex<Vec<Disposable>>,
}

impl LifecycleCoordinator {
    pub fn register(&self, disposable: Disposable) {
        tracing::debug!("registered '{}' for destruction", disposable.name);
        self.disposables.lock().push(disposable);
    }

    /// Destroys everything registered so far, last created first. Failures
    /// are collected, never short-circuit.
    pub fn destroy_all(&self) -> Result<(), Error> {
        let disposables = std::mem::take(&mut *self.disposables.lock());
        run(disposables)
    }

    /// Destroys the component registered under `name`, if any, leaving the
    /// others in place.
    pub fn destroy(&self, name: &str) -> Result<(), Error> {
        let removed = {
            let mut disposables = self.disposables.lock();
            let (removed, kept): (Vec<Disposable>, Vec<Disposable>) = std::mem::take(&mut *disposables)
                .into_iter()
                .partition(|d| d.name == name);
            *disposables = kept;
            removed
        };
        run(removed)
    }
}

fn run(disposables: Vec<Disposable>) -> Result<(), Error> {
    let mut failures = Vec::new();
    for disposable in disposables.into_iter().rev() {
        tracing::trace!(component = %disposable.name, phase = "Destroyed");
        for err in disposable.destroy() {
            tracing::warn!("destroy of '{}' failed: {}", disposable.name, err);
            failures.push(DestructionFailure {
                name: disposable.name.clone(),
                cause: Arc::new(err),
            });
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(Error::Destruction(failures))
    }
}
