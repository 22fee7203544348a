//! # Command Streams and the Per-Thread Command Pool
//!
//! A [`CommandStream`] is the append-only list of commands one thread records
//! before handing it to the queue. Recording is backend-agnostic: the stream
//! stores [`Command`] values referencing cached pipelines and pooled
//! descriptor sets, and [`Backend::submit`] encodes them natively.
//!
//! ## Lifecycle
//!
//! ```text
//! stream() ──record──▶ submit() ──▶ retained until purge()
//!    ▲                                    │
//!    └─────── fresh stream ◀──────────────┘
//! ```
//!
//! Submitted streams are kept by the pool until the next purge so everything
//! they reference (descriptor sets, buffers) outlives device execution.
//! Purging drops them together with any stream still being recorded.

use std::sync::Arc;

use crate::engine::backend::Backend;
use crate::engine::descriptor::DescriptorSet;
use crate::engine::error::GpuResult;
use crate::engine::pipeline::Pipeline;
use crate::engine::types::{Handle, WorkGroup};


/// One recorded command.
pub enum Command<B: Backend> {
    /// Makes `pipeline` current for subsequent dispatches.
    BindPipeline(Handle<Pipeline<B>>),
    /// Binds a descriptor set at set index 0.
    BindDescriptorSet(DescriptorSet<B>),
    /// Dispatches the given number of work groups.
    Dispatch(WorkGroup),
    /// Copies `size` bytes between buffers.
    CopyBuffer {
        /// Source buffer.
        source: Handle<B::Buffer>,
        /// Byte offset into `source`.
        source_offset: u64,
        /// Destination buffer.
        destination: Handle<B::Buffer>,
        /// Byte offset into `destination`.
        destination_offset: u64,
        /// Bytes to copy.
        size: u64,
    },
}

impl<B: Backend> std::fmt::Debug for Command<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::BindPipeline(pipeline) => f
                .debug_struct("BindPipeline")
                .field("pipeline", pipeline)
                .field("local_work_group", &pipeline.local_work_group())
                .finish(),
            Command::BindDescriptorSet(set) => f.debug_tuple("BindDescriptorSet").field(set).finish(),
            Command::Dispatch(groups) => f.debug_tuple("Dispatch").field(groups).finish(),
            Command::CopyBuffer { size, .. } => f.debug_struct("CopyBuffer").field("size", size).finish(),
        }
    }
}

/// Append-only list of commands recorded by one thread.

pub struct CommandStream<B: Backend> {
    commands: Vec<Command<B>>,
}

impl<B: Backend> CommandStream<B> {
    fn new() -> Self {
        Self { commands: Vec::new() }
    }

    /// Records a pipeline bind.
    pub fn bind_pipeline(&mut self, pipeline: &Handle<Pipeline<B>>) {
        self.commands.push(Command::BindPipeline(pipeline.clone()));
    }

    /// Records a descriptor-set bind. The set must be fully bound already.
    pub fn bind_descriptor_set(&mut self, set: DescriptorSet<B>) {
        self.commands.push(Command::BindDescriptorSet(set));
    }

    /// Records a dispatch of `groups` work groups.
    pub fn dispatch(&mut self, groups: WorkGroup) {
        self.commands.push(Command::Dispatch(groups));
    }

    /// Records a buffer-to-buffer copy.
    pub fn copy_buffer(
        &mut self,
        source: &Handle<B::Buffer>,
        source_offset: u64,
        destination: &Handle<B::Buffer>,
        destination_offset: u64,
        size: u64,
    ) {
        self.commands.push(Command::CopyBuffer {
            source: source.clone(),
            source_offset,
            destination: destination.clone(),
            destination_offset,
            size,
        });
    }

    /// Commands in recording order.
    #[inline]
    pub fn commands(&self) -> &[Command<B>] {
        &self.commands
    }

    /// Number of recorded commands.
    #[inline]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns `true` if nothing has been recorded.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Number of dispatch commands recorded.
    pub fn dispatch_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, Command::Dispatch(_)))
            .count()
    }
}

/// Thread-owned allocator of command streams.

pub struct CommandPool<B: Backend> {
    device: Arc<B>,
    open: Option<CommandStream<B>>,
    submitted: Vec<CommandStream<B>>,
    submissions: u64,
}

impl<B: Backend> CommandPool<B> {
    /// Creates an empty pool submitting through `device`.
    pub fn new(device: Arc<B>) -> Self {
        Self {
            device,
            open: None,
            submitted: Vec::new(),
            submissions: 0,
        }
    }

    /// The stream currently being recorded, opened on demand.
    pub fn stream(&mut self) -> &mut CommandStream<B> {
        self.open.get_or_insert_with(CommandStream::new)
    }

    /// Returns `true` if a stream is open and holds commands.
    pub fn is_recording(&self) -> bool {
        self.open.as_ref().is_some_and(|s| !s.is_empty())
    }

    /// Submits the open stream to `queue`.
    ///
    /// ## Semantics
    /// * Empty or absent streams are not submitted; returns `Ok(false)`.
    /// * On success the stream is retained until [`purge`](Self::purge) and
    ///   the next [`stream`](Self::stream) call opens a fresh one.
    ///
    /// ## Errors
    /// The backend's submission error. The failed stream is dropped.

    pub fn submit(&mut self, queue: &B::Queue) -> GpuResult<bool> {
        let Some(stream) = self.open.take() else {
            return Ok(false);
        };
        if stream.is_empty() {
            self.open = Some(stream);
            return Ok(false);
        }

        if let Err(e) = self.device.submit(queue, stream.commands()) {
            tracing::error!(commands = stream.len(), error = %e, "command stream submission failed");
            return Err(e);
        }

        tracing::debug!(
            commands = stream.len(),
            dispatches = stream.dispatch_count(),
            "submitted command stream"
        );
        self.submitted.push(stream);
        self.submissions += 1;
        Ok(true)
    }

    /// Submitted streams retained since the last purge.
    #[inline]
    pub fn in_flight(&self) -> usize {
        self.submitted.len()
    }

    /// Total successful submissions over the pool's lifetime.
    #[inline]
    pub fn submissions(&self) -> u64 {
        self.submissions
    }

    /// Returns `true` if the pool holds no streams.
    pub fn is_empty(&self) -> bool {
        self.open.is_none() && self.submitted.is_empty()
    }

    /// Drops every stream, open or submitted.
    ///
    /// Returns the number of recorded but never submitted commands that were
    /// discarded.
    pub fn purge(&mut self) -> usize {
        let discarded = self.open.take().map_or(0, |s| s.len());
        if discarded > 0 {
            tracing::warn!(commands = discarded, "purge discarded unsubmitted commands");
        }
        self.submitted.clear();
        discarded
    }
}
