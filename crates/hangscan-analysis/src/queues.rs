//! DRAM and host queues at the edges of the stream graph.
//!
//! A stream that writes to DRAM ends in a queue buffer; a stream that reads
//! from DRAM starts at one. The traversal does not walk through queues. It
//! only reads their read/write pointers to decide whether a queue is starved
//! or undrained.

use std::collections::BTreeSet;

use hangscan_core::id::StreamId;
use hangscan_core::plan::{queue_occupancy, BufferId, PlanBuffer, PlanQueue, QueueLocation, StreamLink};
use hangscan_core::traits::{DeviceAccess, ExecutionPlan};

use crate::context::TraversalContext;
use crate::error::AnalysisError;

/// Distinct queue names owning the given buffers, sorted.
pub fn queue_names(buffers: &[PlanBuffer]) -> Vec<String> {
    buffers
        .iter()
        .filter_map(|b| b.queue.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

impl<'a, P: ExecutionPlan, D: DeviceAccess> TraversalContext<'a, P, D> {
    fn plan_buffer(&mut self, stream: StreamId, id: BufferId) -> Result<PlanBuffer, AnalysisError> {
        let epoch = self.epoch_of(stream)?;
        self.plan
            .buffer(epoch, id)
            .ok_or_else(|| AnalysisError::PlanInconsistency {
                stream,
                reason: format!("buffer {} is not in epoch {epoch}", id.0),
            })
    }

    fn plan_queue(&mut self, stream: StreamId, name: &str) -> Result<PlanQueue, AnalysisError> {
        let epoch = self.epoch_of(stream)?;
        self.plan
            .queue(epoch, name)
            .ok_or_else(|| AnalysisError::PlanInconsistency {
                stream,
                reason: format!("queue {name} is not in epoch {epoch}"),
            })
    }

    /// The queue buffers a DRAM-writing stream feeds: the fan-out of its
    /// buffer, or the outputs of its pipe, keeping only DRAM I/O buffers.
    pub fn consumer_queue_buffers(&mut self, stream: StreamId) -> Result<Vec<PlanBuffer>, AnalysisError> {
        let epoch = self.epoch_of(stream)?;
        let consumers = match self.current_entry(stream)?.link {
            StreamLink::Buffer(id) => self.plan_buffer(stream, id)?.fanout,
            StreamLink::Pipe(id) => {
                self.plan
                    .pipe(epoch, id)
                    .ok_or_else(|| AnalysisError::PlanInconsistency {
                        stream,
                        reason: format!("pipe {} is not in epoch {epoch}", id.0),
                    })?
                    .output_buffers
            }
            StreamLink::Unconnected => {
                return Err(AnalysisError::PlanInconsistency {
                    stream,
                    reason: "stream is not connected to a buffer or pipe".to_string(),
                })
            }
        };

        let mut buffers = Vec::new();
        for id in consumers {
            let buffer = self.plan_buffer(stream, id)?;
            if buffer.dram_io {
                buffers.push(buffer);
            }
        }
        Ok(buffers)
    }

    /// The queues a DRAM-reading stream reads from. Through a pipe, each
    /// scattered input buffer counts once, by its base buffer.
    pub fn producer_queues(&mut self, stream: StreamId) -> Result<Vec<PlanQueue>, AnalysisError> {
        let epoch = self.epoch_of(stream)?;
        let buffer_ids: Vec<BufferId> = match self.current_entry(stream)?.link {
            StreamLink::Buffer(id) => vec![id],
            StreamLink::Pipe(id) => {
                let pipe = self
                    .plan
                    .pipe(epoch, id)
                    .ok_or_else(|| AnalysisError::PlanInconsistency {
                        stream,
                        reason: format!("pipe {} is not in epoch {epoch}", id.0),
                    })?;
                pipe.input_buffers
                    .iter()
                    .map(|b| b.base())
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect()
            }
            StreamLink::Unconnected => {
                return Err(AnalysisError::PlanInconsistency {
                    stream,
                    reason: "stream is not connected to a buffer or pipe".to_string(),
                })
            }
        };

        let mut queues = Vec::new();
        for id in buffer_ids {
            let buffer = self.plan_buffer(stream, id)?;
            if let Some(name) = buffer.queue {
                queues.push(self.plan_queue(stream, &name)?);
            }
        }
        Ok(queues)
    }

    pub fn queue_by_name(&mut self, stream: StreamId, name: &str) -> Result<PlanQueue, AnalysisError> {
        self.plan_queue(stream, name)
    }

    /// Read and write pointer of one queue buffer, or `None` for a queue
    /// outside DRAM and host memory.
    fn queue_pointers(&mut self, queue: &PlanQueue, channel: u32, address: u64) -> Result<Option<(u32, u32)>, AnalysisError> {
        let chip = queue.target_device;
        let (rd, wr) = match queue.location {
            QueueLocation::Dram => (
                self.device.read_dram_word(chip, channel, address)?,
                self.device.read_dram_word(chip, channel, address + 4)?,
            ),
            QueueLocation::Host => (
                self.device.read_host_word(chip, channel, address)?,
                self.device.read_host_word(chip, channel, address + 4)?,
            ),
            QueueLocation::Other(ref location) => {
                self.warn(None, format!("Unknown memory location: {location}"));
                return Ok(None);
            }
        };
        Ok(Some((rd, wr)))
    }

    /// False if any buffer of the queue is empty.
    pub fn queue_has_data(&mut self, queue: &PlanQueue) -> Result<bool, AnalysisError> {
        for &(channel, address) in &queue.mem_addrs {
            let Some((rd, wr)) = self.queue_pointers(queue, channel, address)? else {
                return Ok(true);
            };
            if queue_occupancy(queue.entries, wr, rd) == 0 {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// True if the queue's first buffer holds `entries` entries.
    pub fn queue_is_full(&mut self, queue: &PlanQueue) -> Result<bool, AnalysisError> {
        let Some(&(channel, address)) = queue.mem_addrs.first() else {
            return Ok(false);
        };
        match self.queue_pointers(queue, channel, address)? {
            Some((rd, wr)) => Ok(queue_occupancy(queue.entries, wr, rd) == u64::from(queue.entries)),
            None => Ok(true),
        }
    }
}
