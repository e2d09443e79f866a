//! Process-wide singleton for the MCP manager
//!
//! Every request handler goes through `get_or_create`. The first caller
//! starts initialization; everyone arriving while it runs awaits the same
//! shared future, so at most one server process is ever being started.

use super::error::{McpError, McpResult};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Something with an async start and stop, owned by a coordinator.
#[async_trait]
pub trait Lifecycle: Send + Sync + 'static {
    async fn initialize(&self) -> McpResult<()>;
    async fn shutdown(&self);
}

type Factory<M> = Arc<dyn Fn() -> M + Send + Sync>;
type InitFuture<M> = Shared<BoxFuture<'static, McpResult<Arc<M>>>>;

enum Slot<M> {
    Empty,
    /// `attempt` tells a finished initialization whether it is still the one
    /// the slot is waiting for, or whether a reset happened meanwhile.
    Initializing { attempt: u64, future: InitFuture<M> },
    Ready(Arc<M>),
}

pub struct McpCoordinator<M> {
    slot: Mutex<Slot<M>>,
    attempts: AtomicU64,
    factory: Factory<M>,
}

impl<M: Lifecycle> McpCoordinator<M> {
    pub fn new(factory: impl Fn() -> M + Send + Sync + 'static) -> Self {
        Self {
            slot: Mutex::new(Slot::Empty),
            attempts: AtomicU64::new(0),
            factory: Arc::new(factory),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Slot<M>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The ready instance, if any. Never starts initialization.
    pub fn current(&self) -> Option<Arc<M>> {
        match &*self.slot() {
            Slot::Ready(instance) => Some(Arc::clone(instance)),
            _ => None,
        }
    }

    pub fn is_initializing(&self) -> bool {
        matches!(&*self.slot(), Slot::Initializing { .. })
    }

    pub async fn get_or_create(&self) -> McpResult<Arc<M>> {
        let factory = Arc::clone(&self.factory);
        self.get_or_create_with(move || factory()).await
    }

    /// Return the ready instance, join an initialization in progress, or
    /// start one with `factory`. A failed initialization leaves the slot
    /// empty so the next call retries from scratch.
    pub async fn get_or_create_with<F>(&self, factory: F) -> McpResult<Arc<M>>
    where
        F: FnOnce() -> M + Send + 'static,
    {
        let (attempt, future) = {
            let mut slot = self.slot();
            match &*slot {
                Slot::Ready(instance) => return Ok(Arc::clone(instance)),
                Slot::Initializing { attempt, future } => (*attempt, future.clone()),
                Slot::Empty => {
                    let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    let future = initialize(factory).boxed().shared();
                    *slot = Slot::Initializing {
                        attempt,
                        future: future.clone(),
                    };
                    (attempt, future)
                }
            }
        };

        let outcome = future.await;
        self.settle(attempt, outcome).await
    }

    /// Record the result of `attempt` if the slot still belongs to it.
    async fn settle(&self, attempt: u64, outcome: McpResult<Arc<M>>) -> McpResult<Arc<M>> {
        let orphan = {
            let mut slot = self.slot();
            let owns_slot = matches!(
                &*slot,
                Slot::Initializing { attempt: current, .. } if *current == attempt
            );
            if owns_slot {
                *slot = match &outcome {
                    Ok(instance) => Slot::Ready(Arc::clone(instance)),
                    Err(_) => Slot::Empty,
                };
                return outcome;
            }

            let instance = match outcome {
                Ok(instance) => instance,
                Err(e) => return Err(e),
            };
            match &*slot {
                // Another waiter on the same attempt already stored it
                Slot::Ready(current) if Arc::ptr_eq(current, &instance) => {
                    return Ok(instance);
                }
                _ => instance,
            }
        };

        crate::logging::info("MCP server finished starting after a reset; stopping it");
        orphan.shutdown().await;
        Err(McpError::Initialization(
            "MCP server was reset during initialization".to_string(),
        ))
    }

    /// Drop the current instance and stop it. The next `get_or_create`
    /// performs a full fresh initialization.
    pub async fn reset(&self) {
        let previous = std::mem::replace(&mut *self.slot(), Slot::Empty);
        match previous {
            Slot::Ready(instance) => {
                crate::logging::info("Resetting MCP server");
                instance.shutdown().await;
            }
            Slot::Initializing { attempt, .. } => {
                crate::logging::info(&format!(
                    "Resetting MCP server while start #{} is in progress",
                    attempt
                ));
            }
            Slot::Empty => {}
        }
    }
}

async fn initialize<M, F>(factory: F) -> McpResult<Arc<M>>
where
    M: Lifecycle,
    F: FnOnce() -> M,
{
    let instance = Arc::new(factory());
    match instance.initialize().await {
        Ok(()) => Ok(instance),
        Err(e) => {
            instance.shutdown().await;
            Err(e.into_initialization())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct Counters {
        built: AtomicUsize,
        initialized: AtomicUsize,
        shut_down: AtomicUsize,
    }

    struct FakeServer {
        id: usize,
        counters: Arc<Counters>,
        gate: Option<Arc<Notify>>,
        fail: bool,
    }

    #[async_trait]
    impl Lifecycle for FakeServer {
        async fn initialize(&self) -> McpResult<()> {
            self.counters.initialized.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail {
                return Err(McpError::Spawn {
                    command: "mongodb-mcp-server".to_string(),
                    message: "not found".to_string(),
                });
            }
            Ok(())
        }

        async fn shutdown(&self) {
            self.counters.shut_down.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn coordinator(
        counters: &Arc<Counters>,
        gate: Option<Arc<Notify>>,
        fail: bool,
    ) -> Arc<McpCoordinator<FakeServer>> {
        let counters = Arc::clone(counters);
        Arc::new(McpCoordinator::new(move || FakeServer {
            id: counters.built.fetch_add(1, Ordering::SeqCst) + 1,
            counters: Arc::clone(&counters),
            gate: gate.clone(),
            fail,
        }))
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_instance() {
        let counters = Arc::new(Counters::default());
        let gate = Arc::new(Notify::new());
        let coordinator = coordinator(&counters, Some(Arc::clone(&gate)), false);

        let mut callers = Vec::new();
        for _ in 0..10 {
            let coordinator = Arc::clone(&coordinator);
            callers.push(tokio::spawn(async move {
                coordinator.get_or_create().await
            }));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(coordinator.is_initializing());
        gate.notify_one();

        let mut instances = Vec::new();
        for caller in callers {
            instances.push(caller.await.unwrap().unwrap());
        }
        assert!(instances.iter().all(|i| Arc::ptr_eq(i, &instances[0])));
        assert_eq!(counters.built.load(Ordering::SeqCst), 1);
        assert_eq!(counters.initialized.load(Ordering::SeqCst), 1);

        // Later calls get the cached instance without starting anything
        let again = coordinator.get_or_create().await.unwrap();
        assert!(Arc::ptr_eq(&again, &instances[0]));
        assert_eq!(counters.built.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_reaches_every_waiter_and_allows_retry() {
        let counters = Arc::new(Counters::default());
        let gate = Arc::new(Notify::new());
        let coordinator = coordinator(&counters, Some(Arc::clone(&gate)), true);

        let first = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.get_or_create().await })
        };
        let second = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.get_or_create().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.notify_one();

        for caller in [first, second] {
            let err = caller.await.unwrap().err().unwrap();
            assert!(matches!(err, McpError::Initialization(_)));
        }
        assert_eq!(counters.built.load(Ordering::SeqCst), 1);
        // A failed start is cleaned up
        assert_eq!(counters.shut_down.load(Ordering::SeqCst), 1);
        assert!(coordinator.current().is_none());

        gate.notify_one();
        let retry = coordinator.get_or_create().await;
        assert!(retry.is_err());
        assert_eq!(counters.built.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_reset_shuts_down_and_rebuilds() {
        let counters = Arc::new(Counters::default());
        let coordinator = coordinator(&counters, None, false);

        let first = coordinator.get_or_create().await.unwrap();
        assert_eq!(first.id, 1);

        coordinator.reset().await;
        assert_eq!(counters.shut_down.load(Ordering::SeqCst), 1);
        assert!(coordinator.current().is_none());

        let second = coordinator.get_or_create().await.unwrap();
        assert_eq!(second.id, 2);
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_reset_before_first_use_is_noop() {
        let counters = Arc::new(Counters::default());
        let coordinator = coordinator(&counters, None, false);
        coordinator.reset().await;
        assert_eq!(counters.shut_down.load(Ordering::SeqCst), 0);
        assert_eq!(counters.built.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_reset_during_initialization_discards_result() {
        let counters = Arc::new(Counters::default());
        let gate = Arc::new(Notify::new());
        let coordinator = coordinator(&counters, Some(Arc::clone(&gate)), false);

        let caller = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.get_or_create().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        coordinator.reset().await;
        gate.notify_one();

        let err = caller.await.unwrap().err().unwrap();
        assert!(matches!(err, McpError::Initialization(_)));
        assert_eq!(counters.shut_down.load(Ordering::SeqCst), 1);
        assert!(coordinator.current().is_none());

        // The next caller gets a fresh instance
        gate.notify_one();
        let fresh = coordinator.get_or_create().await.unwrap();
        assert_eq!(fresh.id, 2);
    }
}
