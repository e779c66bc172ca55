//! The messaging context every worker talks through.
//!
//! Workers share no memory. They exchange word buffers point to point,
//! tagged by tree level, and meet at collectives (barrier, gather, scan,
//! reduce). Every collective must be entered by all workers in the same
//! order.

use crate::bits::Word;
use crate::error::Result;
use crate::memory::AllocTracker;
use std::sync::Arc;

/// Message tag. Merge traffic is tagged with the tree level it belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Tag(pub u32);

impl Tag {
    pub fn level(level: usize) -> Self {
        Tag(level as u32)
    }
}

/// Result of a successful probe: who sent the next matching message and how
/// many words it carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Status {
    pub source: usize,
    pub len: usize,
}

/// A message payload. Shared between the sender's pending request and the
/// receiver, so the sender can hold on to it until delivery is confirmed.
pub type Payload = Arc<[Word]>;

/// Handle for a non-blocking send. The payload stays alive for as long as
/// the request does.
#[derive(Debug)]
pub struct SendRequest {
    payload: Payload,
}

impl SendRequest {
    pub fn new(payload: Payload) -> Self {
        Self { payload }
    }

    pub fn size_in_bytes(&self) -> usize {
        std::mem::size_of_val(&*self.payload)
    }
}

pub trait Communicator {
    fn rank(&self) -> usize;

    fn num_workers(&self) -> usize;

    fn is_master(&self) -> bool {
        self.rank() == 0
    }

    /// Enqueue `payload` for delivery to `dest` and return immediately.
    fn isend(&self, dest: usize, tag: Tag, payload: Vec<Word>) -> Result<SendRequest>;

    /// Block until a message with `tag` is available from any source.
    /// The message is not consumed.
    fn probe(&self, tag: Tag) -> Result<Status>;

    /// Receive the oldest message with `tag` from `source`. Messages
    /// between one pair of workers arrive in the order they were sent.
    fn recv(&self, source: usize, tag: Tag) -> Result<Payload>;

    /// Block until every worker has reached the barrier.
    fn barrier(&self) -> Result<()>;

    /// Collect one vector from every worker, indexed by rank, on every worker.
    fn all_gather(&self, local: Vec<u64>) -> Result<Vec<Vec<u64>>>;

    /// Element-wise exclusive prefix sum across workers in rank order.
    /// Worker 0 ends up with all zeros.
    fn ex_scan(&self, values: &mut [u64]) -> Result<()> {
        let all = self.all_gather(values.to_vec())?;
        values.fill(0);
        for other in &all[..self.rank()] {
            for (v, o) in values.iter_mut().zip(other) {
                *v += o;
            }
        }
        Ok(())
    }

    /// Element-wise sum across all workers, available on every worker.
    fn all_reduce_sum(&self, values: &mut [u64]) -> Result<()> {
        let all = self.all_gather(values.to_vec())?;
        values.fill(0);
        for other in &all {
            for (v, o) in values.iter_mut().zip(other) {
                *v += o;
            }
        }
        Ok(())
    }
}

/// Outbound messages of one merge level.
///
/// Owns every send request until [`Outbox::complete`] crosses the barrier
/// that confirms all workers have received their data for the level. The
/// tracker is charged on send and credited on release.
pub struct Outbox<'a> {
    requests: Vec<SendRequest>,
    tracker: &'a AllocTracker,
    bytes_sent: usize,
}

impl<'a> Outbox<'a> {
    pub fn new(tracker: &'a AllocTracker) -> Self {
        Self {
            requests: Vec::new(),
            tracker,
            bytes_sent: 0,
        }
    }

    pub fn send<C: Communicator>(
        &mut self,
        comm: &C,
        dest: usize,
        tag: Tag,
        payload: Vec<Word>,
    ) -> Result<()> {
        let request = comm.isend(dest, tag, payload)?;
        let bytes = request.size_in_bytes();
        self.tracker.track_alloc(bytes);
        self.bytes_sent += bytes;
        self.requests.push(request);
        Ok(())
    }

    pub fn num_messages(&self) -> usize {
        self.requests.len()
    }

    /// Wait at the barrier, then release all send buffers.
    /// Returns the number of payload bytes sent through this outbox.
    pub fn complete<C: Communicator>(self, comm: &C) -> Result<usize> {
        comm.barrier()?;
        Ok(self.bytes_sent)
    }
}

impl Drop for Outbox<'_> {
    fn drop(&mut self) {
        for request in self.requests.drain(..) {
            self.tracker.track_free(request.size_in_bytes());
        }
    }
}
