//! Periodic background tasks driven by reactor timers.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::query::AggregateTable;
use crate::reactor::{Reactor, ResourceId, ResourceTable};
use crate::registry::InstanceRegistry;
use crate::storage::StorageEngine;

const TASKS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::tasks");

/// A named body run on a repeating reactor timer.
#[derive(Debug)]
pub struct PeriodicTask {
    name: &'static str,
    timer: Cell<Option<ResourceId>>,
    cancellations: Cell<usize>,
}

impl PeriodicTask {
    /// Creates an idle task.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            timer: Cell::new(None),
            cancellations: Cell::new(0),
        }
    }

    /// Task name used in log fields.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Schedules `body` every `period`. A running timer is left in place.
    pub fn start(&self, reactor: &Reactor, period: Duration, body: impl FnMut() + 'static) {
        if self.is_running() {
            debug!(target: TASKS_TARGET, task = self.name, "task already running");
            return;
        }
        let id = reactor.start_timer(period, body);
        self.timer.set(Some(id));
        debug!(
            target: TASKS_TARGET,
            task = self.name,
            period_secs = period.as_secs_f64(),
            "task scheduled"
        );
    }

    /// Stops the timer. Returns whether a running timer was stopped;
    /// further calls are no-ops.
    pub fn cancel(&self, resources: &ResourceTable) -> bool {
        let Some(id) = self.timer.take() else {
            return false;
        };
        resources.close(id);
        self.cancellations.set(self.cancellations.get() + 1);
        debug!(target: TASKS_TARGET, task = self.name, "task cancelled");
        true
    }

    /// Whether a timer is scheduled.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.timer.get().is_some()
    }

    /// Number of times a running timer was actually stopped.
    #[must_use]
    pub fn cancellations(&self) -> usize {
        self.cancellations.get()
    }
}

/// The optimize and heartbeat tasks.
#[derive(Debug)]
pub struct BackgroundTasks {
    /// Flushes write buffers and compacts shards.
    pub optimize: PeriodicTask,
    /// Logs instance and handle counts.
    pub heartbeat: PeriodicTask,
}

impl BackgroundTasks {
    /// Both tasks, idle.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            optimize: PeriodicTask::new("optimize"),
            heartbeat: PeriodicTask::new("heartbeat"),
        }
    }

    /// Cancels both tasks; returns how many were running.
    pub fn cancel_all(&self, resources: &ResourceTable) -> usize {
        usize::from(self.optimize.cancel(resources)) + usize::from(self.heartbeat.cancel(resources))
    }
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new()
    }
}

/// Body of the optimize task: runs maintenance on every registered instance
/// under a lease and logs shard statistics.
pub fn optimize_pass<E>(registry: &Rc<InstanceRegistry>, engine: &E, aggregates: &AggregateTable)
where
    E: StorageEngine + ?Sized,
{
    for handle in registry.handles() {
        let Some(lease) = registry.lease(handle) else {
            continue;
        };
        let outcome = registry.with_instance_mut(lease.handle(), |instance| {
            let sizes: Vec<u64> = instance.shards().iter().map(|shard| shard.size).collect();
            (
                instance.name().to_owned(),
                engine.optimize(instance),
                sizes,
            )
        });
        let Some((name, result, sizes)) = outcome else {
            continue;
        };
        if let Err(error) = result {
            warn!(
                target: TASKS_TARGET,
                instance = %name,
                error = %error,
                "optimize failed"
            );
            continue;
        }
        info!(
            target: TASKS_TARGET,
            instance = %name,
            shards = aggregates.apply("count", &sizes).unwrap_or_default(),
            total_bytes = aggregates.apply("sum", &sizes).unwrap_or_default(),
            mean_bytes = aggregates.apply("mean", &sizes).unwrap_or_default(),
            max_bytes = aggregates.apply("max", &sizes).unwrap_or_default(),
            "optimize finished"
        );
    }
}

/// Body of the heartbeat task.
pub fn heartbeat_pass(registry: &InstanceRegistry, resources: &ResourceTable) {
    info!(
        target: TASKS_TARGET,
        instances = registry.len(),
        live_handles = resources.live(),
        "heartbeat"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::{DatabaseMetadata, Instance};
    use crate::storage::{MockStorageEngine, StorageError};
    use std::path::PathBuf;

    fn registry_with(names: &[&str]) -> Rc<InstanceRegistry> {
        let registry = Rc::new(InstanceRegistry::new(|_| {}));
        for name in names {
            let path = PathBuf::from(format!("/srv/tidewater/{name}/"));
            registry.append(Instance::new(
                *name,
                path.clone(),
                path,
                DatabaseMetadata::new(*name),
            ));
        }
        registry
    }

    #[test]
    fn optimize_visits_every_instance_and_survives_failures() {
        let registry = registry_with(&["alpha", "beta"]);
        let mut engine = MockStorageEngine::new();
        engine
            .expect_optimize()
            .times(2)
            .returning(|instance| match instance.name() {
                "alpha" => Err(StorageError::new("disk full")),
                _ => Ok(()),
            });

        optimize_pass(&registry, &engine, &AggregateTable::new());

        for handle in registry.handles() {
            assert_eq!(registry.ref_count(handle), Some(1));
        }
    }

    #[test]
    fn cancel_is_idempotent() {
        let reactor = Reactor::new().expect("build reactor");
        let task = PeriodicTask::new("sample");
        task.start(&reactor, Duration::from_secs(60), || {});
        task.start(&reactor, Duration::from_secs(60), || {});
        assert_eq!(reactor.live_handles(), 1);

        assert!(task.cancel(reactor.resources()));
        assert!(!task.cancel(reactor.resources()));
        assert_eq!(task.cancellations(), 1);
        reactor.drain();
        assert_eq!(reactor.live_handles(), 0);
    }
}
