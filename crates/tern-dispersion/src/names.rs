//! Dispersion name generation: one name per partition.
//!
//! Each worker thread owns partitions `{w, w + W, w + 2W, …}` and, for each,
//! tries `prefix + partition + "-" + attempt` until the name hashes to that
//! partition. Workers share nothing but the output channel and the
//! cancellation token.

use std::num::NonZeroUsize;
use std::thread;

use tern_placement::RingView;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Account holding every dispersion container and object.
pub const ADMIN_ACCOUNT: &str = ".admin";

/// Prefix of generated dispersion container names.
pub const CONTAINER_PREFIX: &str = "disp-conts-";

/// Container holding the dispersion objects for `policy`.
pub fn object_container(policy: u32) -> String {
    format!("disp-objs-{policy}")
}

/// Parallel search for names that hash to each partition of a ring.
#[derive(Debug, Clone, Copy)]
pub struct NameGenerator {
    workers: usize,
}

impl Default for NameGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl NameGenerator {
    /// One worker per available CPU.
    pub fn new() -> Self {
        let workers = thread::available_parallelism().map_or(1, NonZeroUsize::get);
        Self { workers }
    }

    /// A fixed number of workers (at least one).
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Emit one name per partition of `ring` onto `names`.
    ///
    /// With an empty `container` the names are container names under
    /// [`ADMIN_ACCOUNT`]; otherwise they are object names inside `container`.
    /// Names arrive unordered. Blocks until every worker has finished or
    /// observed `cancel`; the channel closes when this returns. Returns the
    /// number of names sent.
    ///
    /// A panic in any worker is re-raised here once the others have stopped.
    pub fn generate(
        &self,
        container: &str,
        prefix: &str,
        ring: &dyn RingView,
        names: UnboundedSender<String>,
        cancel: &CancellationToken,
    ) -> u64 {
        let workers = self.workers as u64;
        let sent: u64 = thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|worker| {
                    let names = names.clone();
                    scope.spawn(move || {
                        search_partitions(worker, workers, container, prefix, ring, &names, cancel)
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
                .sum()
        });
        debug!(
            sent,
            partitions = ring.partition_count(),
            cancelled = cancel.is_cancelled(),
            "dispersion name generation finished"
        );
        sent
    }
}

/// Work loop of one worker. Returns how many names it sent.
fn search_partitions(
    first: u64,
    stride: u64,
    container: &str,
    prefix: &str,
    ring: &dyn RingView,
    names: &UnboundedSender<String>,
    cancel: &CancellationToken,
) -> u64 {
    let mut sent = 0;
    let mut partition = first;
    loop {
        if cancel.is_cancelled() || ring.get_nodes(partition).is_none() {
            return sent;
        }
        let mut attempt: u64 = 0;
        loop {
            if cancel.is_cancelled() {
                return sent;
            }
            let name = format!("{prefix}{partition}-{attempt}");
            let hashed = if container.is_empty() {
                ring.get_partition(ADMIN_ACCOUNT, &name, "")
            } else {
                ring.get_partition(ADMIN_ACCOUNT, container, &name)
            };
            if hashed == partition {
                if names.send(name).is_err() {
                    // Receiver gone: nobody wants more names.
                    return sent;
                }
                sent += 1;
                break;
            }
            attempt += 1;
        }
        partition += stride;
    }
}
