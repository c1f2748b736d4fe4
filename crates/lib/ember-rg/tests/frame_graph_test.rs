use std::sync::Arc;

use ash::vk;

use ember_container::FreeListAllocator;
use ember_rg::{FrameGraph, PassKind};
use ember_rhi::backend::{AccessType, Image, ImageDesc};

fn color_target_desc() -> ImageDesc {
    ImageDesc::new_2d([1920, 1080], vk::Format::R16G16B16A16_SFLOAT)
}

fn fake_imported_image() -> Arc<Image> {
    Arc::new(Image {
        raw: vk::Image::null(),
        allocation: None,
        desc: color_target_desc(),
        views: Default::default(),
        resource_id: 0,
    })
}

#[test]
fn dead_branch_is_culled() {
    let mut graph = FrameGraph::new();
    let backbuffer = graph.import_render_target(fake_imported_image(), AccessType::Nothing);

    // pass 0 feeds pass 1 which writes the imported target
    let lit = {
        let mut pass = graph.add_pass("lighting", PassKind::Compute);
        let lit = pass.create_image("lit", color_target_desc());
        pass.write(lit, AccessType::ComputeShaderWrite)
    };
    {
        let mut pass = graph.add_pass("tonemap", PassKind::Compute);
        pass.read(lit, AccessType::ComputeShaderReadSampledImageOrUniformTexelBuffer);
        pass.write(backbuffer, AccessType::ComputeShaderWrite);
    }
    // pass 2 writes a resource nobody consumes
    {
        let mut pass = graph.add_pass("debug overlay", PassKind::Compute);
        let scratch = pass.create_image("scratch", color_target_desc());
        pass.write(scratch, AccessType::ComputeShaderWrite);
    }

    let compiled = graph.compile();

    assert!(compiled.pass_survives(0));
    assert!(compiled.pass_survives(1));
    assert!(!compiled.pass_survives(2));

    // the dead pass's resource gets no physical backing
    assert!(compiled.resource_survives(1));
    assert!(!compiled.resource_survives(2));
    assert_eq!(compiled.transient_lifetime(2), None);
}

#[test]
fn cull_is_idempotent() {
    let build = || {
        let mut graph = FrameGraph::new();
        let backbuffer = graph.import_render_target(fake_imported_image(), AccessType::Nothing);

        let shadow = {
            let mut pass = graph.add_pass("shadow", PassKind::Compute);
            let shadow = pass.create_image("shadow map", color_target_desc());
            pass.write(shadow, AccessType::ComputeShaderWrite)
        };
        {
            let mut pass = graph.add_pass("orphan", PassKind::Compute);
            let orphan = pass.create_image("orphan", color_target_desc());
            pass.write(orphan, AccessType::ComputeShaderWrite);
        }
        {
            let mut pass = graph.add_pass("composite", PassKind::Compute);
            pass.read(shadow, AccessType::ComputeShaderReadSampledImageOrUniformTexelBuffer);
            pass.write(backbuffer, AccessType::ComputeShaderWrite);
        }

        graph
    };

    let graph = build();
    let first = graph.compute_survivors();
    let second = graph.compute_survivors();

    assert_eq!(first.pass_alive, second.pass_alive);
    assert_eq!(first.resource_alive, second.resource_alive);

    // and the same graph built twice agrees as well
    let rebuilt = build().compute_survivors();
    assert_eq!(first.pass_alive, rebuilt.pass_alive);
}

#[test]
fn imported_write_survives_and_transitions_to_present() {
    let mut graph = FrameGraph::new();
    let swapchain = graph.import_render_target(fake_imported_image(), AccessType::Nothing);

    let written = {
        let mut pass = graph.add_pass("blit", PassKind::Graphics);
        pass.write_render_target(swapchain)
    };
    graph.export_render_target(written, AccessType::Present);

    let compiled = graph.compile();

    // nobody reads the swapchain image, the pass survives anyway
    assert!(compiled.pass_survives(0));

    let final_barriers = compiled.planned_final_barriers();
    assert_eq!(final_barriers.len(), 1);
    assert_eq!(final_barriers[0].prev_access, AccessType::ColorAttachmentWrite);
    assert_eq!(final_barriers[0].next_access, AccessType::Present);
}

#[test]
fn disjoint_lifetimes_alias_the_same_offset() {
    let mut graph = FrameGraph::new();
    let backbuffer = graph.import_render_target(fake_imported_image(), AccessType::Nothing);

    let first = {
        let mut pass = graph.add_pass("pass a", PassKind::Compute);
        let image = pass.create_image("ping", color_target_desc());
        pass.write(image, AccessType::ComputeShaderWrite)
    };
    let backbuffer = {
        let mut pass = graph.add_pass("pass b", PassKind::Compute);
        pass.read(first, AccessType::ComputeShaderReadSampledImageOrUniformTexelBuffer);
        pass.write(backbuffer, AccessType::ComputeShaderWrite)
    };
    let second = {
        let mut pass = graph.add_pass("pass c", PassKind::Compute);
        let image = pass.create_image("pong", color_target_desc());
        pass.write(image, AccessType::ComputeShaderWrite)
    };
    {
        let mut pass = graph.add_pass("pass d", PassKind::Compute);
        pass.read(second, AccessType::ComputeShaderReadSampledImageOrUniformTexelBuffer);
        pass.write(backbuffer, AccessType::ComputeShaderWrite);
    }

    let compiled = graph.compile();

    let ping = compiled.transient_lifetime(1).unwrap();
    let pong = compiled.transient_lifetime(2).unwrap();
    assert_eq!(ping, (0, 1));
    assert_eq!(pong, (2, 3));

    // drive the heap allocator the way the executor does: allocate at
    // first_use, release after last_use, in pass order
    const IMAGE_SIZE: usize = 16 * 1024 * 1024;
    let mut allocator = FreeListAllocator::new(64 * 1024 * 1024);
    let mut offsets = [None; 3];

    for pass_index in 0..4_u32 {
        for resource_index in 1..3_usize {
            if let Some((first_use, _)) = compiled.transient_lifetime(resource_index) {
                if first_use == pass_index {
                    offsets[resource_index] = allocator.allocate(IMAGE_SIZE, 256);
                }
            }
        }
        for resource_index in 1..3_usize {
            if let Some((_, last_use)) = compiled.transient_lifetime(resource_index) {
                if last_use == pass_index {
                    allocator.deallocate(offsets[resource_index].unwrap(), IMAGE_SIZE);
                }
            }
        }
    }

    // both landed on the same bytes
    assert_eq!(offsets[1], offsets[2]);
    assert!(offsets[1].is_some());
}

#[test]
fn barrier_plan_skips_read_after_read() {
    let mut graph = FrameGraph::new();
    let backbuffer = graph.import_render_target(fake_imported_image(), AccessType::Nothing);

    let data = {
        let mut pass = graph.add_pass("produce", PassKind::Compute);
        let image = pass.create_image("data", color_target_desc());
        pass.write(image, AccessType::ComputeShaderWrite)
    };
    let backbuffer = {
        let mut pass = graph.add_pass("consume a", PassKind::Compute);
        pass.read(data, AccessType::ComputeShaderReadSampledImageOrUniformTexelBuffer);
        pass.write(backbuffer, AccessType::ComputeShaderWrite)
    };
    {
        let mut pass = graph.add_pass("consume b", PassKind::Compute);
        pass.read(data, AccessType::ComputeShaderReadSampledImageOrUniformTexelBuffer);
        pass.write(backbuffer, AccessType::ComputeShaderWrite);
    }

    let compiled = graph.compile();

    // first write of a fresh transient discards
    let produce = compiled.planned_pass_barriers(0);
    assert_eq!(produce.len(), 1);
    assert!(produce[0].discard);

    // consume a: write -> read transition for the transient plus nothing for
    // the undefined import's first write
    let consume_a = compiled.planned_pass_barriers(1);
    assert_eq!(consume_a.len(), 1);
    assert_eq!(consume_a[0].prev_access, AccessType::ComputeShaderWrite);

    // consume b reads the same state again: no barrier for the transient
    let consume_b = compiled.planned_pass_barriers(2);
    assert!(consume_b.iter().all(|barrier| barrier.resource_index != 1));
}

#[test]
#[should_panic]
fn reading_undefined_contents_asserts() {
    let mut graph = FrameGraph::new();

    let created = {
        let mut pass = graph.add_pass("creator", PassKind::Compute);
        pass.create_image("never written", color_target_desc())
    };
    {
        let mut pass = graph.add_pass("reader", PassKind::Compute);
        pass.read(created, AccessType::ComputeShaderReadSampledImageOrUniformTexelBuffer);
    }
}

#[test]
#[should_panic]
fn two_writers_at_the_same_version_assert() {
    let mut graph = FrameGraph::new();

    let created = {
        let mut pass = graph.add_pass("writer a", PassKind::Compute);
        let created = pass.create_image("contested", color_target_desc());
        pass.write(created, AccessType::ComputeShaderWrite);
        created
    };
    {
        // writing through the stale version-0 handle again
        let mut pass = graph.add_pass("writer b", PassKind::Compute);
        pass.write(created, AccessType::ComputeShaderWrite);
    }
}

#[test]
fn every_read_names_an_earlier_write() {
    let mut graph = FrameGraph::new();
    let backbuffer = graph.import_render_target(fake_imported_image(), AccessType::Nothing);

    let v1 = {
        let mut pass = graph.add_pass("produce", PassKind::Compute);
        let image = pass.create_image("chain", color_target_desc());
        pass.write(image, AccessType::ComputeShaderWrite)
    };
    let v2 = {
        let mut pass = graph.add_pass("refine", PassKind::Compute);
        pass.read(v1, AccessType::ComputeShaderReadSampledImageOrUniformTexelBuffer);
        pass.write(v1, AccessType::ComputeShaderWrite)
    };
    {
        let mut pass = graph.add_pass("consume", PassKind::Compute);
        pass.read(v2, AccessType::ComputeShaderReadSampledImageOrUniformTexelBuffer);
        pass.write(backbuffer, AccessType::ComputeShaderWrite);
    }

    // handles encode the version the producer bumped to
    assert_ne!(v1, v2);

    let compiled = graph.compile();
    for pass_index in 0..3 {
        assert!(compiled.pass_survives(pass_index));
    }
}
