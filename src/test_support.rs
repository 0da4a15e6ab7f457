//! Shared helpers for unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::cache::Dispose;

/// Install a test-friendly subscriber once; `RUST_LOG` overrides the filter.
pub(crate) fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lazycache=trace"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

#[derive(Default)]
struct Counters {
    created: AtomicUsize,
    disposed: AtomicUsize,
}

/// Counts resources handed out and disposed.
#[derive(Clone, Default)]
pub(crate) struct Probe {
    counters: Arc<Counters>,
}

impl Probe {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn resource(&self) -> Resource {
        self.counters.created.fetch_add(1, Ordering::SeqCst);
        Resource {
            disposed: Arc::new(AtomicBool::new(false)),
            counters: Arc::clone(&self.counters),
        }
    }

    pub(crate) fn created(&self) -> usize {
        self.counters.created.load(Ordering::SeqCst)
    }

    pub(crate) fn disposed(&self) -> usize {
        self.counters.disposed.load(Ordering::SeqCst)
    }
}

/// A disposable value; clones refer to the same resource.
#[derive(Clone)]
pub(crate) struct Resource {
    disposed: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl Resource {
    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub(crate) fn same_as(&self, other: &Resource) -> bool {
        Arc::ptr_eq(&self.disposed, &other.disposed)
    }
}

impl Dispose for Resource {
    fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.counters.disposed.fetch_add(1, Ordering::SeqCst);
    }
}
