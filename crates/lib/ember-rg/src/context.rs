use std::sync::Arc;

use arrayvec::ArrayVec;
use ash::vk;

use ember_rhi::backend::{
    barrier, Buffer, Device, DisposedResource, Image, ImageViewDesc, RhiError,
};
use ember_rhi::bindless::BindlessDescriptorManager;

use crate::graph::{FrameGraph, PassKind};
use crate::handle::{BufferHandle, RenderTargetHandle};

pub const MAX_COLOR_TARGETS: usize = 8;

const STATE_VIEWPORT: u8 = 1 << 0;
const STATE_SCISSOR: u8 = 1 << 1;
const STATE_RENDER_TARGETS: u8 = 1 << 2;
const STATE_PIPELINE: u8 = 1 << 3;
const STATE_PUSH_CONSTANTS: u8 = 1 << 4;

/// Set-once bookkeeping for the state categories a pass function feeds the
/// context before a draw.
pub(crate) struct PassStateTracker {
    kind: PassKind,
    set_mask: u8,
}

impl PassStateTracker {
    pub fn new(kind: PassKind) -> Self {
        Self { kind, set_mask: 0 }
    }

    /// Each category may be set at most once between draws.
    pub fn mark_set(&mut self, category: u8) {
        assert!(
            self.set_mask & category == 0,
            "Pass state category set twice without a draw in between!"
        );
        self.set_mask |= category;
    }

    pub fn is_set(&self, category: u8) -> bool {
        self.set_mask & category != 0
    }

    /// All required categories must be present before a command is recorded.
    pub fn validate_submit(&self) {
        let required = match self.kind {
            PassKind::Graphics => STATE_VIEWPORT | STATE_SCISSOR | STATE_RENDER_TARGETS | STATE_PIPELINE,
            PassKind::Compute => STATE_PIPELINE,
        };

        assert!(
            self.set_mask & required == required,
            "Draw submitted with incomplete pass state (set {:#b}, required {:#b})!",
            self.set_mask, required
        );
    }

    /// A recorded command consumes the state; everything may be set again.
    pub fn clear_after_submit(&mut self) {
        self.set_mask = 0;
    }
}

#[derive(Clone, Copy, Debug)]
pub enum LoadOp {
    Load,
    ClearColor([f32; 4]),
    ClearDepth(f32),
    DontCare,
}

#[derive(Clone, Copy)]
pub struct RenderTargetBinding {
    pub handle: RenderTargetHandle,
    pub load_op: LoadOp,
}

#[derive(Clone, Copy, Default)]
pub struct DrawCall {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
}

pub(crate) enum PhysicalResource {
    Image(Arc<Image>),
    Buffer(Arc<Buffer>),
}

/// Execution-time interface handed to each pass function.
///
/// Resolves graph handles to concrete resources and records draws and
/// dispatches once the required state categories are in place.
pub struct FrameGraphContext<'exec> {
    device: &'exec Arc<Device>,
    bindless: &'exec BindlessDescriptorManager,
    command_buffer: vk::CommandBuffer,

    graph: &'exec FrameGraph,
    registered: &'exec [Option<PhysicalResource>],

    state: PassStateTracker,
    pass_kind: PassKind,

    color_targets: ArrayVec<RenderTargetBinding, MAX_COLOR_TARGETS>,
    depth_target: Option<RenderTargetBinding>,
    pipeline: Option<(vk::Pipeline, vk::PipelineLayout, vk::PipelineBindPoint)>,
    push_constants: Vec<u8>,

    render_pass_begun: Option<(vk::RenderPass, vk::Framebuffer)>,
    bound_pipeline: Option<vk::Pipeline>,
}

impl<'exec> FrameGraphContext<'exec> {
    pub(crate) fn new(
        device: &'exec Arc<Device>,
        bindless: &'exec BindlessDescriptorManager,
        command_buffer: vk::CommandBuffer,
        pass_kind: PassKind,
        graph: &'exec FrameGraph,
        registered: &'exec [Option<PhysicalResource>],
    ) -> Self {
        Self {
            device,
            bindless,
            command_buffer,
            graph,
            registered,
            state: PassStateTracker::new(pass_kind),
            pass_kind,
            color_targets: ArrayVec::new(),
            depth_target: None,
            pipeline: None,
            push_constants: Vec::new(),
            render_pass_begun: None,
            bound_pipeline: None,
        }
    }

    pub fn device(&self) -> &Arc<Device> {
        self.device
    }

    pub fn bindless(&self) -> &BindlessDescriptorManager {
        self.bindless
    }

    /// Escape hatch for passes recording commands the context does not
    /// model. Barriers stay forbidden here, the compiled plan owns them.
    pub fn raw_command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    /// Resolve an image handle to its physical resource.
    pub fn get_image(&self, handle: RenderTargetHandle) -> &Arc<Image> {
        let record = &self.graph.resources[handle.resource_index() as usize];
        assert!(
            handle.version() <= record.last_version,
            "Handle names version {} of {:?} which does not exist!",
            handle.version(), record.name
        );

        match &self.registered[handle.resource_index() as usize] {
            Some(PhysicalResource::Image(image)) => image,
            Some(PhysicalResource::Buffer(_)) => {
                panic!("Handle for {:?} resolves to a buffer, not an image!", record.name)
            }
            None => panic!("Resource {:?} has no physical backing (culled?)", record.name),
        }
    }

    pub fn get_buffer(&self, handle: BufferHandle) -> &Arc<Buffer> {
        let record = &self.graph.resources[handle.resource_index() as usize];
        assert!(
            handle.version() <= record.last_version,
            "Handle names version {} of {:?} which does not exist!",
            handle.version(), record.name
        );

        match &self.registered[handle.resource_index() as usize] {
            Some(PhysicalResource::Buffer(buffer)) => buffer,
            Some(PhysicalResource::Image(_)) => {
                panic!("Handle for {:?} resolves to an image, not a buffer!", record.name)
            }
            None => panic!("Resource {:?} has no physical backing (culled?)", record.name),
        }
    }

    pub fn set_viewport(&mut self, viewport: vk::Viewport) {
        self.state.mark_set(STATE_VIEWPORT);
        unsafe {
            self.device.raw.cmd_set_viewport(self.command_buffer, 0, std::slice::from_ref(&viewport));
        }
    }

    pub fn set_scissor(&mut self, scissor: vk::Rect2D) {
        self.state.mark_set(STATE_SCISSOR);
        unsafe {
            self.device.raw.cmd_set_scissor(self.command_buffer, 0, std::slice::from_ref(&scissor));
        }
    }

    pub fn set_render_targets(
        &mut self,
        colors: &[RenderTargetBinding],
        depth: Option<RenderTargetBinding>,
    ) {
        assert!(self.pass_kind == PassKind::Graphics, "Render targets on a compute pass!");
        assert!(colors.len() <= MAX_COLOR_TARGETS);
        self.state.mark_set(STATE_RENDER_TARGETS);

        self.color_targets = colors.iter().copied().collect();
        self.depth_target = depth;
    }

    pub fn set_pipeline(
        &mut self,
        pipeline: vk::Pipeline,
        layout: vk::PipelineLayout,
        bind_point: vk::PipelineBindPoint,
    ) {
        self.state.mark_set(STATE_PIPELINE);
        self.pipeline = Some((pipeline, layout, bind_point));
    }

    pub fn set_push_constants(&mut self, data: &[u8]) {
        self.state.mark_set(STATE_PUSH_CONSTANTS);
        self.push_constants = data.to_vec();
    }

    pub fn draw(&mut self, draw: DrawCall) -> Result<(), RhiError> {
        assert!(self.pass_kind == PassKind::Graphics, "draw() on a compute pass!");
        self.state.validate_submit();

        self.begin_rendering_if_needed()?;
        self.bind_pending_state();

        unsafe {
            self.device.raw.cmd_draw(
                self.command_buffer,
                draw.vertex_count,
                draw.instance_count.max(1),
                draw.first_vertex,
                draw.first_instance,
            );
        }

        self.state.clear_after_submit();
        Ok(())
    }

    pub fn dispatch(&mut self, group_count: [u32; 3]) -> Result<(), RhiError> {
        assert!(self.render_pass_begun.is_none(), "dispatch() inside a render pass!");
        self.state.validate_submit();

        self.bind_pending_state();

        unsafe {
            self.device.raw.cmd_dispatch(
                self.command_buffer,
                group_count[0],
                group_count[1],
                group_count[2],
            );
        }

        self.state.clear_after_submit();
        Ok(())
    }

    /// Close any open render pass; called after the pass function returns.
    pub(crate) fn finish(&mut self) {
        if let Some((render_pass, framebuffer)) = self.render_pass_begun.take() {
            unsafe {
                self.device.raw.cmd_end_render_pass(self.command_buffer);
            }

            // frame-local objects, recycled through the dispose queue
            self.device.dispose(DisposedResource::RenderPass(render_pass));
            self.device.dispose(DisposedResource::Framebuffer(framebuffer));
        }
    }

    fn bind_pending_state(&mut self) {
        let (pipeline, layout, bind_point) = self.pipeline.expect("Pipeline state was validated!");

        if self.bound_pipeline != Some(pipeline) {
            unsafe {
                self.device.raw.cmd_bind_pipeline(self.command_buffer, bind_point, pipeline);
                self.device.raw.cmd_bind_descriptor_sets(
                    self.command_buffer,
                    bind_point,
                    layout,
                    0,
                    std::slice::from_ref(&self.bindless.set),
                    &[],
                );
            }
            self.bound_pipeline = Some(pipeline);
        }

        if !self.push_constants.is_empty() {
            unsafe {
                self.device.raw.cmd_push_constants(
                    self.command_buffer,
                    layout,
                    vk::ShaderStageFlags::ALL,
                    0,
                    &self.push_constants,
                );
            }
            self.push_constants.clear();
        }
    }

    fn begin_rendering_if_needed(&mut self) -> Result<(), RhiError> {
        if self.render_pass_begun.is_some() {
            return Ok(());
        }

        let mut attachments = Vec::new();
        let mut attachment_views = Vec::new();
        let mut clear_values = Vec::new();
        let mut color_refs = Vec::new();
        let mut extent = [0_u32; 2];

        for (index, target) in self.color_targets.clone().iter().enumerate() {
            let image = self.get_image(target.handle);
            extent = [image.desc.extent[0], image.desc.extent[1]];

            attachments.push(
                vk::AttachmentDescription::builder()
                    .format(image.desc.format)
                    .samples(image.desc.sample)
                    .load_op(load_op_to_vk(target.load_op))
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .initial_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .build(),
            );
            color_refs.push(vk::AttachmentReference {
                attachment: index as u32,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            });
            clear_values.push(load_op_clear_value(target.load_op));

            attachment_views.push(image.view(self.device, &ImageViewDesc::default())?);
        }

        let mut depth_ref = None;
        if let Some(depth) = self.depth_target {
            let image = self.get_image(depth.handle);
            let aspect_mask = barrier::image_aspect_mask_from_format(image.desc.format);

            attachments.push(
                vk::AttachmentDescription::builder()
                    .format(image.desc.format)
                    .samples(image.desc.sample)
                    .load_op(load_op_to_vk(depth.load_op))
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .initial_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                    .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                    .build(),
            );
            depth_ref = Some(vk::AttachmentReference {
                attachment: attachments.len() as u32 - 1,
                layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            });
            clear_values.push(load_op_clear_value(depth.load_op));

            let view_desc = ImageViewDesc::builder().aspect_mask(aspect_mask).build().unwrap();
            attachment_views.push(image.view(self.device, &view_desc)?);
        }

        let mut subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if let Some(depth_ref) = depth_ref.as_ref() {
            subpass = subpass.depth_stencil_attachment(depth_ref);
        }
        let subpass = subpass.build();

        let render_pass = unsafe {
            self.device.raw.create_render_pass(
                &vk::RenderPassCreateInfo::builder()
                    .attachments(&attachments)
                    .subpasses(std::slice::from_ref(&subpass))
                    .build(),
                None,
            )?
        };

        let framebuffer = unsafe {
            self.device.raw.create_framebuffer(
                &vk::FramebufferCreateInfo::builder()
                    .render_pass(render_pass)
                    .attachments(&attachment_views)
                    .width(extent[0])
                    .height(extent[1])
                    .layers(1)
                    .build(),
                None,
            )?
        };

        unsafe {
            self.device.raw.cmd_begin_render_pass(
                self.command_buffer,
                &vk::RenderPassBeginInfo::builder()
                    .render_pass(render_pass)
                    .framebuffer(framebuffer)
                    .render_area(vk::Rect2D {
                        offset: vk::Offset2D { x: 0, y: 0 },
                        extent: vk::Extent2D {
                            width: extent[0],
                            height: extent[1],
                        },
                    })
                    .clear_values(&clear_values)
                    .build(),
                vk::SubpassContents::INLINE,
            );
        }

        self.render_pass_begun = Some((render_pass, framebuffer));
        Ok(())
    }
}

fn load_op_to_vk(load_op: LoadOp) -> vk::AttachmentLoadOp {
    match load_op {
        LoadOp::Load => vk::AttachmentLoadOp::LOAD,
        LoadOp::ClearColor(_) | LoadOp::ClearDepth(_) => vk::AttachmentLoadOp::CLEAR,
        LoadOp::DontCare => vk::AttachmentLoadOp::DONT_CARE,
    }
}

fn load_op_clear_value(load_op: LoadOp) -> vk::ClearValue {
    match load_op {
        LoadOp::ClearColor(color) => vk::ClearValue {
            color: vk::ClearColorValue { float32: color },
        },
        LoadOp::ClearDepth(depth) => vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue { depth, stencil: 0 },
        },
        _ => vk::ClearValue::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graphics_draw_requires_full_state() {
        let mut tracker = PassStateTracker::new(PassKind::Graphics);

        tracker.mark_set(STATE_VIEWPORT);
        tracker.mark_set(STATE_SCISSOR);
        tracker.mark_set(STATE_RENDER_TARGETS);
        tracker.mark_set(STATE_PIPELINE);
        tracker.validate_submit();

        // after a draw everything may be set again
        tracker.clear_after_submit();
        assert!(!tracker.is_set(STATE_VIEWPORT));
        tracker.mark_set(STATE_VIEWPORT);
    }

    #[test]
    #[should_panic]
    fn setting_state_twice_asserts() {
        let mut tracker = PassStateTracker::new(PassKind::Graphics);

        tracker.mark_set(STATE_VIEWPORT);
        tracker.mark_set(STATE_VIEWPORT);
    }

    #[test]
    #[should_panic]
    fn draw_without_required_state_asserts() {
        let mut tracker = PassStateTracker::new(PassKind::Graphics);

        tracker.mark_set(STATE_VIEWPORT);
        tracker.validate_submit();
    }

    #[test]
    fn compute_only_needs_a_pipeline() {
        let mut tracker = PassStateTracker::new(PassKind::Compute);

        tracker.mark_set(STATE_PIPELINE);
        tracker.validate_submit();
    }
}
