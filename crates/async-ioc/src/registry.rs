use std::collections::BTreeMap;

use futures::future::{abortable, AbortHandle};
use tokio::sync::{mpsc, oneshot};

use crate::error::Error;
use crate::types::Instance;

/// Identifies one top-level creation request and every nested creation it
/// triggers.
pub(crate) type ChainId = u64;

/// Answer to a request for a singleton name.
#[derive(Debug)]
pub(crate) enum Acquired {
    Ready(Instance),
    /// The requesting chain is creating this name itself (or waiting on it
    /// would deadlock); here is the raw instance.
    Early(Instance),
    /// The caller now owns creation and must report back with `finish`.
    Create,
    /// Another chain is creating this name.
    Wait(oneshot::Receiver<Result<Instance, Error>>),
    /// In creation with no early reference available.
    Circular,
    Failed(Error),
}

#[derive(Debug)]
enum RegistryMessage {
    Acquire {
        name: String,
        chain: ChainId,
        tx: oneshot::Sender<Acquired>,
    },
    ExposeEarly {
        name: String,
        instance: Instance,
    },
    TakenEarlyReference {
        name: String,
        tx: oneshot::Sender<Option<Instance>>,
    },
    Finish {
        name: String,
        result: Result<Instance, Error>,
        tx: oneshot::Sender<()>,
    },
    Register {
        name: String,
        instance: Instance,
        tx: oneshot::Sender<Result<(), Error>>,
    },
    Lookup {
        name: String,
        tx: oneshot::Sender<Option<Instance>>,
    },
    InCreation {
        name: String,
        tx: oneshot::Sender<bool>,
    },
    Evict {
        name: String,
        tx: oneshot::Sender<Option<Instance>>,
    },
    Product {
        name: String,
        tx: oneshot::Sender<Option<Instance>>,
    },
    CacheProduct {
        name: String,
        instance: Instance,
        tx: oneshot::Sender<Instance>,
    },
    Count {
        tx: oneshot::Sender<usize>,
    },
    Clear {
        tx: oneshot::Sender<()>,
    },
}

/// Handle to the worker task owning every singleton of a container.
#[derive(Debug)]
pub(crate) struct InstanceRegistry {
    worker_tx: mpsc::Sender<RegistryMessage>,
    abort: AbortHandle,
}

impl InstanceRegistry {
    pub fn spawn(capacity: usize, max_attempts: Option<u32>, initial: Vec<(String, Instance)>) -> Self {
        let (worker_tx, worker_rx) = mpsc::channel(capacity.max(1));
        let mut worker = Worker {
            singletons: BTreeMap::new(),
            products: BTreeMap::new(),
            in_creation: BTreeMap::new(),
            waiting: BTreeMap::new(),
            failures: BTreeMap::new(),
            max_attempts,
        };
        for (name, instance) in initial {
            worker.singletons.insert(name, instance);
        }
        let (task, abort) = abortable(worker.start(worker_rx));

        tokio::spawn(task);

        InstanceRegistry { worker_tx, abort }
    }

    async fn request<T>(
        &self,
        msg: impl FnOnce(oneshot::Sender<T>) -> RegistryMessage,
    ) -> Result<T, Error> {
        let (tx, rx) = oneshot::channel();
        self.worker_tx
            .send(msg(tx))
            .await
            .map_err(|_| Error::WorkerGone)?;
        rx.await.map_err(|_| Error::WorkerGone)
    }

    /// Looks the name up and, if nobody has started it, marks it in
    /// creation on behalf of `chain`.
    pub async fn acquire(&self, name: &str, chain: ChainId) -> Result<Acquired, Error> {
        self.request(|tx| RegistryMessage::Acquire {
            name: name.to_string(),
            chain,
            tx,
        })
        .await
    }

    pub async fn expose_early(&self, name: &str, instance: Instance) -> Result<(), Error> {
        self.worker_tx
            .send(RegistryMessage::ExposeEarly {
                name: name.to_string(),
                instance,
            })
            .await
            .map_err(|_| Error::WorkerGone)
    }

    /// The early reference of `name`, if one was handed out to a dependent.
    pub async fn taken_early_reference(&self, name: &str) -> Result<Option<Instance>, Error> {
        self.request(|tx| RegistryMessage::TakenEarlyReference {
            name: name.to_string(),
            tx,
        })
        .await
    }

    pub async fn finish(&self, name: &str, result: Result<Instance, Error>) -> Result<(), Error> {
        self.request(|tx| RegistryMessage::Finish {
            name: name.to_string(),
            result,
            tx,
        })
        .await
    }

    pub async fn register_singleton(&self, name: &str, instance: Instance) -> Result<(), Error> {
        self.request(|tx| RegistryMessage::Register {
            name: name.to_string(),
            instance,
            tx,
        })
        .await?
    }

    pub async fn get(&self, name: &str) -> Result<Option<Instance>, Error> {
        self.request(|tx| RegistryMessage::Lookup {
            name: name.to_string(),
            tx,
        })
        .await
    }

    pub async fn is_in_creation(&self, name: &str) -> Result<bool, Error> {
        self.request(|tx| RegistryMessage::InCreation {
            name: name.to_string(),
            tx,
        })
        .await
    }

    /// Forgets the singleton, its cached product and its failure record so
    /// the next lookup creates it afresh.
    pub async fn evict(&self, name: &str) -> Result<Option<Instance>, Error> {
        self.request(|tx| RegistryMessage::Evict {
            name: name.to_string(),
            tx,
        })
        .await
    }

    /// Cached product of the singleton factory `name`.
    pub async fn product(&self, name: &str) -> Result<Option<Instance>, Error> {
        self.request(|tx| RegistryMessage::Product {
            name: name.to_string(),
            tx,
        })
        .await
    }

    /// Caches a product unless one is cached already; returns the cached one.
    pub async fn cache_product(&self, name: &str, instance: Instance) -> Result<Instance, Error> {
        self.request(|tx| RegistryMessage::CacheProduct {
            name: name.to_string(),
            instance,
            tx,
        })
        .await
    }

    pub async fn count(&self) -> Result<usize, Error> {
        self.request(|tx| RegistryMessage::Count { tx }).await
    }

    pub async fn clear(&self) -> Result<(), Error> {
        self.request(|tx| RegistryMessage::Clear { tx }).await
    }
}

impl Drop for InstanceRegistry {
    fn drop(&mut self) {
        self.abort.abort()
    }
}

struct CreationSlot {
    owner: ChainId,
    early: Option<Instance>,
    early_taken: bool,
    waiters: Vec<(ChainId, oneshot::Sender<Result<Instance, Error>>)>,
}

struct FailureRecord {
    attempts: u32,
    last: Error,
}

struct Worker {
    singletons: BTreeMap<String, Instance>,
    /// Objects produced by singleton factory components.
    products: BTreeMap<String, Instance>,
    in_creation: BTreeMap<String, CreationSlot>,
    /// Chains currently blocked on a name owned by another chain.
    waiting: BTreeMap<ChainId, String>,
    failures: BTreeMap<String, FailureRecord>,
    max_attempts: Option<u32>,
}

impl Worker {
    async fn start(mut self, mut rx: mpsc::Receiver<RegistryMessage>) {
        while let Some(msg) = rx.recv().await {
            tracing::debug!("msg: {:?}", msg);

            match msg {
                RegistryMessage::Acquire { name, chain, tx } => {
                    let acquired = self.acquire(name, chain);
                    tx.send(acquired).ok();
                }
                RegistryMessage::ExposeEarly { name, instance } => {
                    if let Some(slot) = self.in_creation.get_mut(&name) {
                        slot.early = Some(instance);
                    }
                }
                RegistryMessage::TakenEarlyReference { name, tx } => {
                    let early = self
                        .in_creation
                        .get(&name)
                        .filter(|slot| slot.early_taken)
                        .and_then(|slot| slot.early.clone());
                    tx.send(early).ok();
                }
                RegistryMessage::Finish { name, result, tx } => {
                    self.finish(name, result);
                    tx.send(()).ok();
                }
                RegistryMessage::Register { name, instance, tx } => {
                    let result = if self.singletons.contains_key(&name)
                        || self.in_creation.contains_key(&name)
                    {
                        Err(Error::DuplicateName(name))
                    } else {
                        self.singletons.insert(name, instance);
                        Ok(())
                    };
                    tx.send(result).ok();
                }
                RegistryMessage::Lookup { name, tx } => {
                    tx.send(self.singletons.get(&name).cloned()).ok();
                }
                RegistryMessage::InCreation { name, tx } => {
                    tx.send(self.in_creation.contains_key(&name)).ok();
                }
                RegistryMessage::Evict { name, tx } => {
                    self.products.remove(&name);
                    self.failures.remove(&name);
                    tx.send(self.singletons.remove(&name)).ok();
                }
                RegistryMessage::Product { name, tx } => {
                    tx.send(self.products.get(&name).cloned()).ok();
                }
                RegistryMessage::CacheProduct { name, instance, tx } => {
                    let cached = self.products.entry(name).or_insert(instance);
                    tx.send(cached.clone()).ok();
                }
                RegistryMessage::Count { tx } => {
                    tx.send(self.singletons.len()).ok();
                }
                RegistryMessage::Clear { tx } => {
                    self.singletons.clear();
                    self.products.clear();
                    self.failures.clear();
                    tx.send(()).ok();
                }
            }
        }
    }

    fn acquire(&mut self, name: String, chain: ChainId) -> Acquired {
        if let Some(instance) = self.singletons.get(&name) {
            return Acquired::Ready(instance.clone());
        }

        if let Some(owner) = self.in_creation.get(&name).map(|slot| slot.owner) {
            if owner == chain || self.would_deadlock(chain, owner) {
                let slot = match self.in_creation.get_mut(&name) {
                    Some(slot) => slot,
                    None => return Acquired::Circular,
                };
                return match slot.early.clone() {
                    Some(early) => {
                        slot.early_taken = true;
                        Acquired::Early(early)
                    }
                    None => Acquired::Circular,
                };
            }
            let (tx, rx) = oneshot::channel();
            if let Some(slot) = self.in_creation.get_mut(&name) {
                slot.waiters.push((chain, tx));
            }
            self.waiting.insert(chain, name);
            return Acquired::Wait(rx);
        }

        if let (Some(max), Some(record)) = (self.max_attempts, self.failures.get(&name)) {
            if record.attempts >= max {
                return Acquired::Failed(Error::PermanentlyFailed {
                    name,
                    attempts: record.attempts,
                    last: Box::new(record.last.clone()),
                });
            }
        }

        self.in_creation.insert(
            name,
            CreationSlot {
                owner: chain,
                early: None,
                early_taken: false,
                waiters: Vec::new(),
            },
        );
        Acquired::Create
    }

    /// Whether `owner` is, through the chains it waits on, waiting for
    /// `requester`.
    fn would_deadlock(&self, requester: ChainId, owner: ChainId) -> bool {
        let mut current = owner;
        for _ in 0..=self.waiting.len() {
            if current == requester {
                return true;
            }
            match self
                .waiting
                .get(&current)
                .and_then(|name| self.in_creation.get(name))
            {
                Some(slot) => current = slot.owner,
                None => return false,
            }
        }
        false
    }

    fn finish(&mut self, name: String, result: Result<Instance, Error>) {
        let slot = match self.in_creation.remove(&name) {
            Some(slot) => slot,
            None => {
                tracing::warn!("finish for '{}' which is not in creation", name);
                return;
            }
        };
        for (chain, _) in &slot.waiters {
            self.waiting.remove(chain);
        }
        match result {
            Ok(instance) => {
                self.failures.remove(&name);
                self.singletons.insert(name, instance.clone());
                for (_, tx) in slot.waiters {
                    tx.send(Ok(instance.clone())).ok();
                }
            }
            Err(err) => {
                let record = self.failures.entry(name).or_insert(FailureRecord {
                    attempts: 0,
                    last: err.clone(),
                });
                record.attempts += 1;
                record.last = err.clone();
                for (_, tx) in slot.waiters {
                    tx.send(Err(err.clone())).ok();
                }
            }
        }
    }
}
