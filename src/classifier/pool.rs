//! Queue draining with optional worker threads.
//!
//! With `parallelism == 1` the queue is classified in place, one file at a
//! time. With more workers, fingerprints are computed on scoped threads fed
//! by a bounded channel while the calling thread applies results strictly in
//! dispatch order through a reorder buffer. Either way the caller observes
//! the same sequence of `apply` calls.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::thread;

use crossbeam_channel::{bounded, unbounded};

use super::{Classifier, FileOutcome, classify_path};
use crate::core::errors::{QcError, Result};

/// How a drain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainSummary {
    /// Files whose outcome was handed to `apply`.
    pub applied: usize,
    /// `should_stop` fired before the queue was empty.
    pub stopped: bool,
}

/// Classify every queued `(tag, path)` in FIFO order.
///
/// `should_stop` is polled before each file is dispatched. Files already in
/// flight when it fires are still applied; nothing after them is started.
pub fn drain_queue<T, S, A>(
    classifier: &dyn Classifier,
    queue: impl IntoIterator<Item = (T, PathBuf)>,
    parallelism: usize,
    mut should_stop: S,
    mut apply: A,
) -> Result<DrainSummary>
where
    S: FnMut() -> bool,
    A: FnMut(T, &Path, FileOutcome),
{
    if parallelism <= 1 {
        let mut summary = DrainSummary::default();
        for (tag, path) in queue {
            if should_stop() {
                summary.stopped = true;
                break;
            }
            let outcome = classify_path(classifier, &path);
            apply(tag, &path, outcome);
            summary.applied += 1;
        }
        return Ok(summary);
    }

    let window = parallelism * 2;
    let (job_tx, job_rx) = bounded::<(u64, PathBuf)>(window);
    let (result_tx, result_rx) = unbounded::<(u64, FileOutcome)>();

    thread::scope(|scope| {
        for _ in 0..parallelism {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(move || {
                for (seq, path) in &job_rx {
                    let outcome = classify_path(classifier, &path);
                    if result_tx.send((seq, outcome)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(job_rx);
        drop(result_tx);

        let mut queue = queue.into_iter();
        let mut summary = DrainSummary::default();
        let mut dispatched: VecDeque<(T, PathBuf)> = VecDeque::new();
        let mut ready: BTreeMap<u64, FileOutcome> = BTreeMap::new();
        let mut next_seq: u64 = 0;
        let mut next_apply: u64 = 0;
        let mut exhausted = false;

        loop {
            while !exhausted && dispatched.len() < window {
                if should_stop() {
                    summary.stopped = true;
                    exhausted = true;
                    break;
                }
                let Some((tag, path)) = queue.next() else {
                    exhausted = true;
                    break;
                };
                job_tx
                    .send((next_seq, path.clone()))
                    .map_err(|_| QcError::ChannelClosed {
                        component: "classifier_pool",
                    })?;
                dispatched.push_back((tag, path));
                next_seq += 1;
            }

            if dispatched.is_empty() {
                break;
            }

            let (seq, outcome) = result_rx.recv().map_err(|_| QcError::ChannelClosed {
                component: "classifier_pool",
            })?;
            ready.insert(seq, outcome);

            while let Some(outcome) = ready.remove(&next_apply) {
                let Some((tag, path)) = dispatched.pop_front() else {
                    break;
                };
                apply(tag, &path, outcome);
                summary.applied += 1;
                next_apply += 1;
            }
        }

        drop(job_tx);
        Ok(summary)
    })
}
