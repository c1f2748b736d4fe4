use std::sync::Arc;

use ash::vk;

use ember_rhi::backend::{
    barrier, AccessType, CommandBuffer, Device, QueueKind, RhiError,
};
use ember_rhi::bindless::BindlessDescriptorManager;
use ember_rhi::transient_heap::TransientResourceHeap;

use crate::barrier_batcher::ResourceBarrierBatcher;
use crate::compile::{CompiledFrameGraph, PlannedBarrier};
use crate::context::{FrameGraphContext, PhysicalResource};
use crate::graph::{ImportedResource, ResourceKind};

/// The transient heaps the executor assigns physical resources from, split
/// by resource shape the way the hardware prefers.
pub struct TransientHeaps {
    pub images: TransientResourceHeap,
    pub render_targets: TransientResourceHeap,
    pub buffers: TransientResourceHeap,
}

pub struct ExecutionParams<'exec> {
    pub device: &'exec Arc<Device>,
    pub bindless: &'exec BindlessDescriptorManager,
}

impl CompiledFrameGraph {
    /// Record the whole frame into `cb`: realize transients, flush each
    /// pass's pre-barriers, invoke the pass functions and retire transients
    /// at their last use.
    pub fn record(
        mut self,
        cb: &CommandBuffer,
        params: ExecutionParams<'_>,
        heaps: &mut TransientHeaps,
    ) -> Result<(), RhiError> {
        let device = params.device;

        let patched_kinds = self.infer_resource_usage();

        // imported resources are physical from the start
        let mut registered: Vec<Option<PhysicalResource>> = self.graph.resources.iter()
            .map(|resource| {
                resource.imported.as_ref().map(|imported| match imported {
                    ImportedResource::Image(image) => PhysicalResource::Image(image.clone()),
                    ImportedResource::Buffer(buffer) => PhysicalResource::Buffer(buffer.clone()),
                })
            })
            .collect();

        for pass_index in 0..self.graph.passes.len() {
            if !self.survivors.pass_alive[pass_index] {
                continue;
            }

            self.realize_transients_starting_at(pass_index as u32, &patched_kinds, heaps, &mut registered)?;

            let mut batcher = ResourceBarrierBatcher::default();
            for planned in &self.pass_barriers[pass_index] {
                add_planned_barrier(&mut batcher, planned, &registered, device);
            }
            batcher.flush(device, cb.raw);

            let draw_fn = self.graph.passes[pass_index].draw_fn.take();
            if let Some(draw_fn) = draw_fn {
                let mut context = FrameGraphContext::new(
                    device,
                    params.bindless,
                    cb.raw,
                    self.graph.passes[pass_index].kind,
                    &self.graph,
                    &registered,
                );

                let result = draw_fn(&mut context);
                context.finish();
                result?;
            }

            self.release_transients_ending_at(pass_index as u32, heaps, &mut registered);
        }

        let mut batcher = ResourceBarrierBatcher::default();
        for planned in &self.final_barriers {
            add_planned_barrier(&mut batcher, planned, &registered, device);
        }
        batcher.flush(device, cb.raw);

        Ok(())
    }

    /// Created resources leave their usage flags to be derived from the
    /// recorded accesses, like a declaration-order union.
    fn infer_resource_usage(&self) -> Vec<ResourceKind> {
        let mut kinds: Vec<ResourceKind> = self.graph.resources.iter()
            .map(|resource| resource.kind.clone())
            .collect();

        for access in &self.graph.accesses {
            match &mut kinds[access.resource_index as usize] {
                ResourceKind::Image(desc) => {
                    desc.usage |= image_usage_from_access(access.access_type);
                }
                ResourceKind::Buffer(desc) => {
                    desc.usage |= buffer_usage_from_access(access.access_type);
                }
            }
        }

        kinds
    }

    fn realize_transients_starting_at(
        &self,
        pass_index: u32,
        patched_kinds: &[ResourceKind],
        heaps: &mut TransientHeaps,
        registered: &mut [Option<PhysicalResource>],
    ) -> Result<(), RhiError> {
        for (resource_index, lifetime) in self.lifetimes.iter().enumerate() {
            let Some((first_use, _)) = lifetime else { continue };
            if *first_use != pass_index || registered[resource_index].is_some() {
                continue;
            }

            let physical = match &patched_kinds[resource_index] {
                ResourceKind::Image(desc) => {
                    let heap = if desc.usage.intersects(
                        vk::ImageUsageFlags::COLOR_ATTACHMENT
                            | vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                    ) {
                        &mut heaps.render_targets
                    } else {
                        &mut heaps.images
                    };

                    heap.create_image(*desc, resource_index as u64)
                        .map(PhysicalResource::Image)
                }
                ResourceKind::Buffer(desc) => heaps
                    .buffers
                    .create_buffer(*desc, resource_index as u64)
                    .map(PhysicalResource::Buffer),
            };

            match physical {
                Some(physical) => registered[resource_index] = Some(physical),
                None => {
                    // out of transient memory, the frame is aborted
                    log::warn!(
                        "aborting frame: no transient memory for {:?}",
                        self.graph.resources[resource_index].name
                    );
                    return Err(RhiError::TransientHeapExhausted { requested: 0 });
                }
            }
        }

        Ok(())
    }

    fn release_transients_ending_at(
        &self,
        pass_index: u32,
        heaps: &mut TransientHeaps,
        registered: &mut [Option<PhysicalResource>],
    ) {
        for (resource_index, lifetime) in self.lifetimes.iter().enumerate() {
            let Some((_, last_use)) = lifetime else { continue };
            if *last_use != pass_index {
                continue;
            }

            match registered[resource_index].take() {
                Some(PhysicalResource::Image(image)) => {
                    drop(image);
                    let heap = if self.heap_is_render_target(resource_index) {
                        &mut heaps.render_targets
                    } else {
                        &mut heaps.images
                    };
                    heap.release_image(resource_index as u64);
                }
                Some(PhysicalResource::Buffer(buffer)) => {
                    drop(buffer);
                    heaps.buffers.release_buffer(resource_index as u64);
                }
                None => {}
            }
        }
    }

    fn heap_is_render_target(&self, resource_index: usize) -> bool {
        // recompute the same usage union used at realization
        let mut usage = match &self.graph.resources[resource_index].kind {
            ResourceKind::Image(desc) => desc.usage,
            ResourceKind::Buffer(_) => return false,
        };

        let mut cursor = self.graph.resources[resource_index].accesses_head;
        while let Some(access_index) = cursor {
            let access = &self.graph.accesses[access_index as usize];
            usage |= image_usage_from_access(access.access_type);
            cursor = access.next;
        }

        usage.intersects(
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        )
    }
}

fn add_planned_barrier(
    batcher: &mut ResourceBarrierBatcher,
    planned: &PlannedBarrier,
    registered: &[Option<PhysicalResource>],
    device: &Device,
) {
    let physical = registered[planned.resource_index as usize]
        .as_ref()
        .expect("Barrier planned for a resource without physical backing!");

    let queue_families = planned.queue_transfer.map(|(src, dst)| {
        let family_of = |kind: QueueKind| match kind {
            QueueKind::Graphics => device.graphics_queue.family.index,
            QueueKind::Transfer => device.transfer_queue.family.index,
        };
        (family_of(src), family_of(dst))
    });

    match physical {
        PhysicalResource::Image(image) => {
            let aspect_mask = barrier::image_aspect_mask_from_format(image.desc.format);

            let mut image_barrier = barrier::ImageBarrier::new(
                image.raw,
                planned.prev_access,
                planned.next_access,
                aspect_mask,
            );
            if planned.discard {
                image_barrier = image_barrier.discard_contents();
            }
            if let Some((src_family, dst_family)) = queue_families {
                if src_family != dst_family {
                    image_barrier = image_barrier.queue_transfer(src_family, dst_family);
                }
            }

            batcher.add_image(image_barrier);
        }
        PhysicalResource::Buffer(buffer) => {
            let mut buffer_barrier = barrier::BufferBarrier::new(
                buffer.raw,
                planned.prev_access,
                planned.next_access,
                buffer.desc.size,
            );
            if let Some((src_family, dst_family)) = queue_families {
                if src_family != dst_family {
                    buffer_barrier = buffer_barrier.queue_transfer(src_family, dst_family);
                }
            }

            batcher.add_buffer(buffer_barrier);
        }
    }
}

fn image_usage_from_access(access_type: AccessType) -> vk::ImageUsageFlags {
    use AccessType::*;

    match access_type {
        VertexShaderReadSampledImageOrUniformTexelBuffer
        | FragmentShaderReadSampledImageOrUniformTexelBuffer
        | ComputeShaderReadSampledImageOrUniformTexelBuffer
        | AnyShaderReadSampledImageOrUniformTexelBuffer => vk::ImageUsageFlags::SAMPLED,

        FragmentShaderReadOther | ComputeShaderReadOther | AnyShaderReadOther
        | VertexShaderWrite | FragmentShaderWrite | ComputeShaderWrite | AnyShaderWrite
        | General => vk::ImageUsageFlags::STORAGE,

        ColorAttachmentRead | ColorAttachmentWrite => vk::ImageUsageFlags::COLOR_ATTACHMENT,

        DepthStencilAttachmentRead
        | DepthStencilAttachmentWrite
        | DepthAttachmentWriteStencilReadOnly
        | StencilAttachmentWriteDepthReadOnly => vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,

        TransferRead => vk::ImageUsageFlags::TRANSFER_SRC,
        TransferWrite => vk::ImageUsageFlags::TRANSFER_DST,

        _ => vk::ImageUsageFlags::empty(),
    }
}

fn buffer_usage_from_access(access_type: AccessType) -> vk::BufferUsageFlags {
    use AccessType::*;

    match access_type {
        IndirectBuffer => vk::BufferUsageFlags::INDIRECT_BUFFER,
        IndexBuffer => vk::BufferUsageFlags::INDEX_BUFFER,
        VertexBuffer => vk::BufferUsageFlags::VERTEX_BUFFER,

        VertexShaderReadUniformBuffer
        | FragmentShaderReadUniformBuffer
        | ComputeShaderReadUniformBuffer
        | AnyShaderReadUniformBuffer
        | AnyShaderReadUniformBufferOrVertexBuffer => vk::BufferUsageFlags::UNIFORM_BUFFER,

        VertexShaderReadOther | FragmentShaderReadOther | ComputeShaderReadOther
        | AnyShaderReadOther | VertexShaderWrite | FragmentShaderWrite | ComputeShaderWrite
        | AnyShaderWrite | General => vk::BufferUsageFlags::STORAGE_BUFFER,

        TransferRead => vk::BufferUsageFlags::TRANSFER_SRC,
        TransferWrite => vk::BufferUsageFlags::TRANSFER_DST,

        _ => vk::BufferUsageFlags::empty(),
    }
}
