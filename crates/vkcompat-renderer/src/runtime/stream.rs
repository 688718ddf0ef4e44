//! Per-frame streaming of sprite vertex and index bytes.
//!
//! Each frame slot owns a vertex ring and an index ring in persistently
//! mapped host memory. A draw that does not fit spills into buffers taken
//! from a size-bucketed pool; spilled buffers stay with their slot until
//! that slot comes round again, which is after its fence has signalled.

use ash::vk;
use log::warn;
use std::collections::HashMap;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostBufferUsage {
    Vertex,
    Index,
    Staging,
}

/// Host-visible buffer together with whatever keeps its memory alive.
#[derive(Debug)]
pub struct HostBuffer<M> {
    pub handle: vk::Buffer,
    pub capacity: u64,
    pub usage: HostBufferUsage,
    pub memory: M,
}

/// Source of mapped host buffers.
pub trait HostBufferAllocator {
    type Memory;

    fn allocate(&mut self, capacity: u64, usage: HostBufferUsage) -> Result<HostBuffer<Self::Memory>>;
    fn write(&mut self, buffer: &mut HostBuffer<Self::Memory>, offset: u64, bytes: &[u8]) -> Result<()>;
    /// The buffer must no longer be referenced by pending GPU work.
    fn release(&mut self, buffer: HostBuffer<Self::Memory>);
}

fn align_up(value: u64, align: u64) -> u64 {
    value.div_ceil(align) * align
}

/// Capacity a pooled buffer gets for a request of `size` bytes.
pub fn pooled_capacity(size: u64) -> u64 {
    align_up(size, 4).max(4).next_power_of_two()
}

// ============================================================================
// Buffer pool
// ============================================================================

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub hits: u64,
    pub misses: u64,
    pub recycles: u64,
    pub drops: u64,
}

/// Idle host buffers bucketed by usage and power-of-two capacity.
pub struct HostBufferPool<M> {
    buckets: HashMap<(HostBufferUsage, u64), Vec<HostBuffer<M>>>,
    max_per_bucket: usize,
    stats: PoolStats,
}

impl<M> HostBufferPool<M> {
    pub fn new(max_per_bucket: usize) -> Self {
        Self {
            buckets: HashMap::new(),
            max_per_bucket,
            stats: PoolStats::default(),
        }
    }

    /// A buffer of at least `size` bytes, reused when one is idle.
    pub fn acquire<A>(&mut self, allocator: &mut A, size: u64, usage: HostBufferUsage) -> Result<HostBuffer<M>>
    where
        A: HostBufferAllocator<Memory = M>,
    {
        let capacity = pooled_capacity(size);
        if let Some(buffer) = self.buckets.get_mut(&(usage, capacity)).and_then(Vec::pop) {
            self.stats.hits += 1;
            return Ok(buffer);
        }
        self.stats.misses += 1;
        allocator.allocate(capacity, usage)
    }

    /// Return a buffer whose GPU use has completed.
    pub fn recycle<A>(&mut self, allocator: &mut A, buffer: HostBuffer<M>)
    where
        A: HostBufferAllocator<Memory = M>,
    {
        let bucket = self.buckets.entry((buffer.usage, buffer.capacity)).or_default();
        if bucket.len() < self.max_per_bucket {
            bucket.push(buffer);
            self.stats.recycles += 1;
        } else {
            allocator.release(buffer);
            self.stats.drops += 1;
        }
    }

    pub fn idle_count(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.values().filter(|bucket| !bucket.is_empty()).count()
    }

    pub fn take_stats(&mut self) -> PoolStats {
        std::mem::take(&mut self.stats)
    }

    pub fn destroy<A>(&mut self, allocator: &mut A)
    where
        A: HostBufferAllocator<Memory = M>,
    {
        for (_, bucket) in self.buckets.drain() {
            for buffer in bucket {
                allocator.release(buffer);
            }
        }
    }
}

// ============================================================================
// Rings
// ============================================================================

/// Bump allocator over one mapped buffer, reset once per frame.
struct StreamRing<M> {
    buffer: HostBuffer<M>,
    head: u64,
}

impl<M> StreamRing<M> {
    fn placement(&self, len: u64, align: u64) -> Option<u64> {
        let offset = align_up(self.head, align);
        (offset + len <= self.buffer.capacity).then_some(offset)
    }

    fn write<A>(&mut self, allocator: &mut A, offset: u64, bytes: &[u8]) -> Result<()>
    where
        A: HostBufferAllocator<Memory = M>,
    {
        allocator.write(&mut self.buffer, offset, bytes)?;
        self.head = offset + bytes.len() as u64;
        Ok(())
    }
}

struct SlotStreams<M> {
    vertex: StreamRing<M>,
    index: StreamRing<M>,
    spilled: Vec<HostBuffer<M>>,
}

// ============================================================================
// Sprite stream
// ============================================================================

/// Where a draw's bytes ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamedDraw {
    pub vertex_buffer: vk::Buffer,
    pub vertex_offset: u64,
    pub index_buffer: vk::Buffer,
    pub index_offset: u64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StreamStats {
    pub spills: u64,
    pub spill_bytes: u64,
    pub drops: u64,
    pub drop_bytes: u64,
}

pub struct SpriteStream<M> {
    slots: Vec<SlotStreams<M>>,
    current: usize,
    pool: HostBufferPool<M>,
    stats: StreamStats,
}

impl<M> SpriteStream<M> {
    /// Allocate `slot_count` vertex and index rings.
    pub fn new<A>(
        allocator: &mut A,
        slot_count: usize,
        vertex_ring_bytes: u64,
        index_ring_bytes: u64,
        max_pooled_per_bucket: usize,
    ) -> Result<Self>
    where
        A: HostBufferAllocator<Memory = M>,
    {
        let mut stream = Self {
            slots: Vec::with_capacity(slot_count),
            current: 0,
            pool: HostBufferPool::new(max_pooled_per_bucket),
            stats: StreamStats::default(),
        };

        for _ in 0..slot_count {
            match Self::allocate_slot(allocator, vertex_ring_bytes, index_ring_bytes) {
                Ok(slot) => stream.slots.push(slot),
                Err(err) => {
                    stream.destroy(allocator);
                    return Err(err);
                }
            }
        }
        Ok(stream)
    }

    fn allocate_slot<A>(allocator: &mut A, vertex_bytes: u64, index_bytes: u64) -> Result<SlotStreams<M>>
    where
        A: HostBufferAllocator<Memory = M>,
    {
        let vertex = allocator.allocate(vertex_bytes.max(4), HostBufferUsage::Vertex)?;
        let index = match allocator.allocate(index_bytes.max(4), HostBufferUsage::Index) {
            Ok(index) => index,
            Err(err) => {
                allocator.release(vertex);
                return Err(err);
            }
        };
        Ok(SlotStreams {
            vertex: StreamRing { buffer: vertex, head: 0 },
            index: StreamRing { buffer: index, head: 0 },
            spilled: Vec::new(),
        })
    }

    /// Start writing into `slot`. The caller has already waited for the
    /// fence of that slot's previous frame.
    pub fn begin_slot<A>(&mut self, allocator: &mut A, slot: usize)
    where
        A: HostBufferAllocator<Memory = M>,
    {
        let Some(streams) = self.slots.get_mut(slot) else {
            return;
        };
        for buffer in streams.spilled.drain(..) {
            self.pool.recycle(allocator, buffer);
        }
        streams.vertex.head = 0;
        streams.index.head = 0;
        self.current = slot;
    }

    /// Copy one draw's vertex and index bytes into GPU-visible memory.
    /// `None` means the draw has to be dropped.
    pub fn push<A>(&mut self, allocator: &mut A, vertices: &[u8], indices: &[u8], index_align: u64) -> Option<StreamedDraw>
    where
        A: HostBufferAllocator<Memory = M>,
    {
        let streams = self.slots.get_mut(self.current)?;
        let vertex_len = vertices.len() as u64;
        let index_len = indices.len() as u64;

        if let (Some(vertex_offset), Some(index_offset)) = (
            streams.vertex.placement(vertex_len, 4),
            streams.index.placement(index_len, index_align.max(4)),
        ) {
            let written = streams
                .vertex
                .write(allocator, vertex_offset, vertices)
                .and_then(|()| streams.index.write(allocator, index_offset, indices));
            match written {
                Ok(()) => {
                    return Some(StreamedDraw {
                        vertex_buffer: streams.vertex.buffer.handle,
                        vertex_offset,
                        index_buffer: streams.index.buffer.handle,
                        index_offset,
                    })
                }
                Err(err) => warn!("stream ring write failed: {err}"),
            }
        }

        match self.spill(allocator, vertices, indices) {
            Ok(draw) => {
                self.stats.spills += 1;
                self.stats.spill_bytes += vertex_len + index_len;
                Some(draw)
            }
            Err(err) => {
                self.stats.drops += 1;
                self.stats.drop_bytes += vertex_len + index_len;
                warn!(
                    "dropping draw: no host buffer for {} vertex + {} index bytes: {err}",
                    vertex_len, index_len
                );
                None
            }
        }
    }

    fn spill<A>(&mut self, allocator: &mut A, vertices: &[u8], indices: &[u8]) -> Result<StreamedDraw>
    where
        A: HostBufferAllocator<Memory = M>,
    {
        let mut vertex = self
            .pool
            .acquire(allocator, vertices.len() as u64, HostBufferUsage::Vertex)?;
        let mut index = match self.pool.acquire(allocator, indices.len() as u64, HostBufferUsage::Index) {
            Ok(index) => index,
            Err(err) => {
                self.pool.recycle(allocator, vertex);
                return Err(err);
            }
        };

        let written = allocator
            .write(&mut vertex, 0, vertices)
            .and_then(|()| allocator.write(&mut index, 0, indices));
        if let Err(err) = written {
            self.pool.recycle(allocator, vertex);
            self.pool.recycle(allocator, index);
            return Err(err);
        }

        let draw = StreamedDraw {
            vertex_buffer: vertex.handle,
            vertex_offset: 0,
            index_buffer: index.handle,
            index_offset: 0,
        };
        let spilled = &mut self.slots[self.current].spilled;
        spilled.push(vertex);
        spilled.push(index);
        Ok(draw)
    }

    pub fn pool(&self) -> &HostBufferPool<M> {
        &self.pool
    }

    pub fn take_stats(&mut self) -> (StreamStats, PoolStats) {
        (std::mem::take(&mut self.stats), self.pool.take_stats())
    }

    /// Release every ring, spill and pooled buffer. The device must be idle.
    pub fn destroy<A>(&mut self, allocator: &mut A)
    where
        A: HostBufferAllocator<Memory = M>,
    {
        for slot in self.slots.drain(..) {
            allocator.release(slot.vertex.buffer);
            allocator.release(slot.index.buffer);
            for buffer in slot.spilled {
                allocator.release(buffer);
            }
        }
        self.pool.destroy(allocator);
    }
}
