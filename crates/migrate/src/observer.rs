//! Lifecycle observers notified before each migration step executes

use crate::migrations::MigrationDirection;

/// A step about to execute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationEvent<'a> {
    /// Sequence of the migration being applied or reverted
    pub sequence: i32,
    pub name: &'a str,
    pub direction: MigrationDirection,
    /// Rendered SQL about to run
    pub sql: &'a str,
}

/// Observer invoked synchronously before each step.
///
/// Observers cannot influence the run.
pub trait MigrationObserver: Send + Sync {
    fn on_start(&self, event: &MigrationEvent<'_>);
}

impl<F> MigrationObserver for F
where
    F: Fn(&MigrationEvent<'_>) + Send + Sync,
{
    fn on_start(&self, event: &MigrationEvent<'_>) {
        self(event)
    }
}

/// Observers notified in registration order
#[derive(Default)]
pub struct ObserverRegistry {
    observers: Vec<Box<dyn MigrationObserver>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, observer: Box<dyn MigrationObserver>) {
        self.observers.push(observer);
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    pub fn notify_start(&self, event: &MigrationEvent<'_>) {
        for observer in &self.observers {
            observer.on_start(event);
        }
    }
}
