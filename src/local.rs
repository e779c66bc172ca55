//! In-process cluster: every worker is an OS thread with its own state,
//! connected to the others only through message channels and collectives.

use crate::bits::Word;
use crate::comm::{Communicator, Payload, SendRequest, Status, Tag};
use crate::error::{Error, Result};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// How often a blocked receive wakes up to check for an aborted run.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

struct Packet {
    source: usize,
    tag: Tag,
    payload: Payload,
}

#[derive(Default)]
struct BarrierState {
    count: usize,
    generation: u64,
    aborted: bool,
}

/// A reusable barrier that can be torn down, releasing every waiter with
/// `Error::Aborted`.
struct AbortableBarrier {
    n: usize,
    state: Mutex<BarrierState>,
    cvar: Condvar,
}

impl AbortableBarrier {
    fn new(n: usize) -> Self {
        Self {
            n,
            state: Mutex::new(BarrierState::default()),
            cvar: Condvar::new(),
        }
    }

    fn wait(&self) -> Result<()> {
        let mut st = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if st.aborted {
            return Err(Error::Aborted);
        }
        let generation = st.generation;
        st.count += 1;
        if st.count == self.n {
            st.count = 0;
            st.generation += 1;
            self.cvar.notify_all();
            return Ok(());
        }
        while st.generation == generation && !st.aborted {
            st = self.cvar.wait(st).unwrap_or_else(PoisonError::into_inner);
        }
        if st.generation != generation {
            Ok(())
        } else {
            Err(Error::Aborted)
        }
    }

    fn abort(&self) {
        let mut st = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        st.aborted = true;
        self.cvar.notify_all();
    }
}

struct Shared {
    barrier: AbortableBarrier,
    // one deposit slot per worker for all_gather
    slots: Mutex<Vec<Vec<u64>>>,
    aborted: AtomicBool,
}

impl Shared {
    fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        self.barrier.abort();
    }

    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}

/// One worker's endpoint in a [`LocalCluster`].
pub struct LocalComm {
    rank: usize,
    shared: Arc<Shared>,
    peers: Vec<Sender<Packet>>,
    inbox: Mutex<Receiver<Packet>>,
    // messages that arrived but have not been received yet, in arrival order
    pending: Mutex<VecDeque<Packet>>,
    recv_timeout: Option<Duration>,
}

impl LocalComm {
    /// Block until a pending message satisfies `pred`, then hand the queue
    /// and the message's index to `f`.
    fn wait_for<R>(
        &self,
        tag: Tag,
        pred: impl Fn(&Packet) -> bool,
        f: impl FnOnce(&mut VecDeque<Packet>, usize) -> R,
    ) -> Result<R> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(i) = pending.iter().position(&pred) {
            return Ok(f(&mut pending, i));
        }
        let inbox = self.inbox.lock().unwrap_or_else(PoisonError::into_inner);
        let deadline = self.recv_timeout.map(|d| Instant::now() + d);
        loop {
            if self.shared.is_aborted() {
                return Err(Error::Aborted);
            }
            match inbox.recv_timeout(POLL_INTERVAL) {
                Ok(packet) => {
                    let hit = pred(&packet);
                    pending.push_back(packet);
                    if hit {
                        let i = pending.len() - 1;
                        return Ok(f(&mut pending, i));
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        return Err(Error::Timeout {
                            level: tag.0 as usize,
                        });
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::Comm(format!(
                        "inbox of worker {} disconnected",
                        self.rank
                    )));
                }
            }
        }
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn num_workers(&self) -> usize {
        self.peers.len()
    }

    fn isend(&self, dest: usize, tag: Tag, payload: Vec<Word>) -> Result<SendRequest> {
        let payload: Payload = payload.into();
        let peer = self
            .peers
            .get(dest)
            .ok_or_else(|| Error::Comm(format!("no worker with rank {}", dest)))?;
        peer.send(Packet {
            source: self.rank,
            tag,
            payload: Arc::clone(&payload),
        })
        .map_err(|_| Error::Comm(format!("worker {} is no longer receiving", dest)))?;
        Ok(SendRequest::new(payload))
    }

    fn probe(&self, tag: Tag) -> Result<Status> {
        self.wait_for(
            tag,
            |p| p.tag == tag,
            |pending, i| Status {
                source: pending[i].source,
                len: pending[i].payload.len(),
            },
        )
    }

    fn recv(&self, source: usize, tag: Tag) -> Result<Payload> {
        self.wait_for(
            tag,
            |p| p.tag == tag && p.source == source,
            |pending, i| pending.remove(i).map(|p| p.payload),
        )?
        .ok_or_else(|| Error::Comm("pending message vanished".into()))
    }

    fn barrier(&self) -> Result<()> {
        self.shared.barrier.wait()
    }

    fn all_gather(&self, local: Vec<u64>) -> Result<Vec<Vec<u64>>> {
        self.shared
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)[self.rank] = local;
        self.barrier()?;
        let all = self
            .shared
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        // nobody may overwrite a slot before everyone has read it
        self.barrier()?;
        Ok(all)
    }
}

/// Runs `W` workers as threads of the current process.
///
/// If any worker fails, the cluster is aborted: every other worker's blocking
/// call returns `Error::Aborted` and [`LocalCluster::run`] reports the
/// original error.
#[derive(Clone, Debug)]
pub struct LocalCluster {
    num_workers: usize,
    recv_timeout: Option<Duration>,
}

impl LocalCluster {
    pub fn new(num_workers: usize) -> Self {
        assert!(num_workers > 0, "need at least one worker");
        Self {
            num_workers,
            recv_timeout: None,
        }
    }

    /// Fail a receive that has waited longer than `timeout`, instead of
    /// hanging forever on bits that will never be sent.
    pub fn recv_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.recv_timeout = timeout;
        self
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Run `f` on every worker and collect the results in rank order.
    pub fn run<T, F>(&self, f: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(&LocalComm) -> Result<T> + Sync,
    {
        let n = self.num_workers;
        let shared = Arc::new(Shared {
            barrier: AbortableBarrier::new(n),
            slots: Mutex::new(vec![Vec::new(); n]),
            aborted: AtomicBool::new(false),
        });

        let (peers, inboxes): (Vec<_>, Vec<_>) = (0..n).map(|_| mpsc::channel()).unzip();
        let comms: Vec<LocalComm> = inboxes
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| LocalComm {
                rank,
                shared: Arc::clone(&shared),
                peers: peers.clone(),
                inbox: Mutex::new(inbox),
                pending: Mutex::new(VecDeque::new()),
                recv_timeout: self.recv_timeout,
            })
            .collect();
        drop(peers);

        let results = thread::scope(|s| {
            let mut handles = Vec::with_capacity(n);
            for comm in comms {
                let f = &f;
                let spawned = thread::Builder::new()
                    .name(format!("worker-{}", comm.rank))
                    .spawn_scoped(s, move || {
                        let span = tracing::info_span!("worker", rank = comm.rank);
                        let _guard = span.enter();
                        match panic::catch_unwind(AssertUnwindSafe(|| f(&comm))) {
                            Ok(result) => {
                                if let Err(e) = &result {
                                    tracing::debug!(error = %e, "worker failed, aborting cluster");
                                    comm.shared.abort();
                                }
                                result
                            }
                            Err(p) => {
                                comm.shared.abort();
                                panic::resume_unwind(p)
                            }
                        }
                    });
                match spawned {
                    Ok(h) => handles.push(h),
                    Err(e) => {
                        shared.abort();
                        return Err(Error::Io(e));
                    }
                }
            }

            let mut results = Vec::with_capacity(n);
            let mut panicked = None;
            for h in handles {
                match h.join() {
                    Ok(r) => results.push(r),
                    Err(p) => panicked = Some(p),
                }
            }
            if let Some(p) = panicked {
                panic::resume_unwind(p);
            }
            Ok(results)
        })?;

        // Report the error that caused the abort rather than the fallout.
        let mut first_abort = None;
        let mut out = Vec::with_capacity(n);
        for r in results {
            match r {
                Ok(v) => out.push(v),
                Err(Error::Aborted) => first_abort = Some(Error::Aborted),
                Err(e) => return Err(e),
            }
        }
        match first_abort {
            Some(e) => Err(e),
            None => Ok(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panics;
    use testresult::TestResult;

    #[test]
    fn test_ring_exchange() -> TestResult {
        let results = LocalCluster::new(4).run(|comm| {
            let next = (comm.rank() + 1) % comm.num_workers();
            let _req = comm.isend(next, Tag(1), vec![comm.rank() as u64, 42])?;
            let status = comm.probe(Tag(1))?;
            let msg = comm.recv(status.source, Tag(1))?;
            comm.barrier()?;
            Ok((status, msg.to_vec()))
        })?;
        for (rank, (status, msg)) in results.into_iter().enumerate() {
            let prev = (rank + 3) % 4;
            assert_eq!(status, Status { source: prev, len: 2 });
            assert_eq!(msg, vec![prev as u64, 42]);
        }
        Ok(())
    }

    #[test]
    fn test_probe_skips_other_tags() -> TestResult {
        let results = LocalCluster::new(2).run(|comm| {
            if comm.rank() == 0 {
                // tag 2 is sent first but worker 1 asks for tag 1 first
                comm.isend(1, Tag(2), vec![2])?;
                comm.isend(1, Tag(1), vec![1])?;
                comm.isend(1, Tag(1), vec![11])?;
                comm.barrier()?;
                Ok(vec![])
            } else {
                let a = comm.recv(0, Tag(1))?[0];
                let b = comm.recv(0, Tag(1))?[0];
                let c = comm.recv(0, Tag(2))?[0];
                comm.barrier()?;
                Ok(vec![a, b, c])
            }
        })?;
        // FIFO per channel pair and tag
        assert_eq!(results[1], vec![1, 11, 2]);
        Ok(())
    }

    #[test]
    fn test_collectives() -> TestResult {
        let results = LocalCluster::new(3).run(|comm| {
            let r = comm.rank() as u64;
            let mut scan = vec![r + 1, 10 * (r + 1)];
            comm.ex_scan(&mut scan)?;
            let mut sum = vec![r, 1];
            comm.all_reduce_sum(&mut sum)?;
            Ok((scan, sum))
        })?;
        assert_eq!(results[0].0, vec![0, 0]);
        assert_eq!(results[1].0, vec![1, 10]);
        assert_eq!(results[2].0, vec![3, 30]);
        for (_, sum) in &results {
            assert_eq!(sum, &vec![3, 3]);
        }
        Ok(())
    }

    #[test]
    fn test_failure_aborts_waiting_workers() {
        let result = LocalCluster::new(3).run(|comm| {
            if comm.rank() == 1 {
                return Err(Error::Protocol("boom".into()));
            }
            // the other workers would wait forever without the abort
            comm.barrier()?;
            comm.probe(Tag(0))?;
            Ok(())
        });
        assert!(matches!(result, Err(Error::Protocol(m)) if m == "boom"));
    }

    #[test]
    fn test_receive_timeout() {
        let result = LocalCluster::new(2)
            .recv_timeout(Some(Duration::from_millis(50)))
            .run(|comm| {
                comm.probe(Tag(3))?;
                Ok(())
            });
        assert!(matches!(result, Err(Error::Timeout { level: 3 })));
    }

    #[test]
    fn test_panic_propagates() {
        assert!(panics(|| {
            let _ = LocalCluster::new(2).run(|comm| {
                if comm.rank() == 0 {
                    panic!("worker 0 fell over");
                }
                comm.barrier()
            });
        }));
    }
}
