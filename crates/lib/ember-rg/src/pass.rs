use ember_rhi::backend::{barrier, AccessType, BufferDesc, ImageDesc, RhiError};

use crate::context::FrameGraphContext;
use crate::graph::{FrameGraph, PassKind, ResourceKind};
use crate::handle::{BufferHandle, RenderTargetHandle};

/// Records one pass's resources, accesses and draw function.
pub struct PassBuilder<'rg> {
    pub(crate) graph: &'rg mut FrameGraph,
    pub(crate) pass_index: u32,
}

impl<'rg> PassBuilder<'rg> {
    /// Register a transient image owned by the graph. The handle starts at
    /// version zero and must be written before anything may read it.
    pub fn create_image(&mut self, name: &str, desc: ImageDesc) -> RenderTargetHandle {
        let resource_index = self.graph.new_resource_record(
            name,
            ResourceKind::Image(desc),
            None,
            AccessType::Nothing,
        );
        self.graph.resources[resource_index as usize].creator_pass = Some(self.pass_index);

        RenderTargetHandle::new(resource_index, 0, AccessType::Nothing)
    }

    pub fn create_buffer(&mut self, name: &str, desc: BufferDesc) -> BufferHandle {
        let resource_index = self.graph.new_resource_record(
            name,
            ResourceKind::Buffer(desc),
            None,
            AccessType::Nothing,
        );
        self.graph.resources[resource_index as usize].creator_pass = Some(self.pass_index);

        BufferHandle::new(resource_index, 0, AccessType::Nothing)
    }

    /// Read a particular version of an image. Reading version zero of a
    /// non-imported resource is reading undefined memory and asserts.
    pub fn read(&mut self, handle: RenderTargetHandle, access_type: AccessType) -> RenderTargetHandle {
        self.read_impl(handle.resource_index(), handle.version(), access_type);
        handle
    }

    pub fn read_buffer(&mut self, handle: BufferHandle, access_type: AccessType) -> BufferHandle {
        self.read_impl(handle.resource_index(), handle.version(), access_type);
        handle
    }

    /// Write an image, producing the next version. The handle passed in must
    /// name the latest version; two writers at the same version assert.
    pub fn write(&mut self, handle: RenderTargetHandle, access_type: AccessType) -> RenderTargetHandle {
        let resource_index = handle.resource_index();
        let new_version = self.write_impl(resource_index, handle.version(), access_type);

        RenderTargetHandle::new(resource_index, new_version, access_type)
    }

    pub fn write_buffer(&mut self, handle: BufferHandle, access_type: AccessType) -> BufferHandle {
        let resource_index = handle.resource_index();
        let new_version = self.write_impl(resource_index, handle.version(), access_type);

        BufferHandle::new(resource_index, new_version, access_type)
    }

    /// Write an image as a color attachment of this graphics pass.
    pub fn write_render_target(&mut self, handle: RenderTargetHandle) -> RenderTargetHandle {
        assert!(
            self.graph.passes[self.pass_index as usize].kind == PassKind::Graphics,
            "Render target writes require a graphics pass!"
        );

        self.write(handle, AccessType::ColorAttachmentWrite)
    }

    /// Store the function executed when this pass is reached; invoked with a
    /// [`FrameGraphContext`] bound to the frame's command list.
    pub fn set_function(
        &mut self,
        func: impl FnOnce(&mut FrameGraphContext) -> Result<(), RhiError> + 'static,
    ) {
        let pass = &mut self.graph.passes[self.pass_index as usize];

        let old = pass.draw_fn.replace(Box::new(func));
        assert!(old.is_none(), "Pass {:?} already has a function!", pass.name);
    }

    fn read_impl(&mut self, resource_index: u32, version: u32, access_type: AccessType) {
        let resource = &self.graph.resources[resource_index as usize];

        // version zero only exists for imported resources
        assert!(
            version > 0 || resource.is_imported(),
            "Pass reads undefined contents of {:?}!", resource.name
        );
        assert!(
            version <= resource.last_version,
            "Pass reads version {} of {:?} which was never written!",
            version, resource.name
        );

        self.graph.record_access(self.pass_index, resource_index, version, false, access_type);
    }

    fn write_impl(&mut self, resource_index: u32, version: u32, access_type: AccessType) -> u32 {
        assert!(barrier::is_write_access(&access_type), "Invalid write access type: {:?}", access_type);

        let new_version = self.graph.bump_version(resource_index, version);
        self.graph.record_access(self.pass_index, resource_index, new_version, true, access_type);

        new_version
    }
}
