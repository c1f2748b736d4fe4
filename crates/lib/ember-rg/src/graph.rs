use std::sync::Arc;

use ember_rhi::backend::{
    barrier, AccessType, Buffer, BufferDesc, Image, ImageDesc, RhiError,
};

use crate::context::FrameGraphContext;
use crate::handle::{BufferHandle, RenderTargetHandle, MAX_RESOURCE_INDEX, MAX_VERSION};
use crate::pass::PassBuilder;

pub type PassFn = dyn FnOnce(&mut FrameGraphContext) -> Result<(), RhiError> + 'static;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PassKind {
    Graphics,
    Compute,
}

/// One read or write of a resource by a pass. Access edges of the same
/// resource are chained through `next`, in registration order, inside the
/// graph's access arena.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ResourceAccess {
    pub pass_index: u32,
    pub resource_index: u32,
    /// Which producer's output this access names; bumped on every write.
    pub version: u32,
    pub is_write: bool,
    pub access_type: AccessType,
    pub next: Option<u32>,
}

#[derive(Clone)]
pub(crate) enum ResourceKind {
    Image(ImageDesc),
    Buffer(BufferDesc),
}

#[derive(Clone)]
pub(crate) enum ImportedResource {
    Image(Arc<Image>),
    Buffer(Arc<Buffer>),
}

pub(crate) struct ResourceRecord {
    pub name: String,
    pub kind: ResourceKind,
    pub imported: Option<ImportedResource>,
    /// State the imported resource is in when the frame starts.
    pub import_access: AccessType,
    pub creator_pass: Option<u32>,
    pub last_user_pass: Option<u32>,
    pub ref_count: u32,
    pub accesses_head: Option<u32>,
    pub accesses_tail: Option<u32>,
    pub last_version: u32,
}

impl ResourceRecord {
    pub fn is_imported(&self) -> bool {
        self.imported.is_some()
    }
}

pub(crate) struct PassRecord {
    pub name: String,
    pub kind: PassKind,
    pub ref_count: u32,
    /// Indices into the access arena, in registration order.
    pub accesses: Vec<u32>,
    pub draw_fn: Option<Box<PassFn>>,
}

/// Per-frame DAG of passes and the transient resources they read and write.
///
/// Built fresh every frame, compiled once, executed once.
pub struct FrameGraph {
    pub(crate) passes: Vec<PassRecord>,
    pub(crate) resources: Vec<ResourceRecord>,
    pub(crate) accesses: Vec<ResourceAccess>,
    /// Imported resources with a demanded end-of-frame state.
    pub(crate) exports: Vec<(u32, AccessType)>,
}

impl Default for FrameGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameGraph {
    pub fn new() -> Self {
        Self {
            passes: Vec::new(),
            resources: Vec::new(),
            accesses: Vec::new(),
            exports: Vec::new(),
        }
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// Register a new pass; record its resources and function through the
    /// returned builder.
    pub fn add_pass(&mut self, name: &str, kind: PassKind) -> PassBuilder<'_> {
        let pass_index = self.passes.len() as u32;

        self.passes.push(PassRecord {
            name: name.to_owned(),
            kind,
            ref_count: 0,
            accesses: Vec::new(),
            draw_fn: None,
        });

        PassBuilder {
            graph: self,
            pass_index,
        }
    }

    /// Wrap an externally owned image. `access` is the state the image is in
    /// at frame start; `Undefined` imports are assumed to already be in their
    /// first declared access.
    pub fn import_render_target(&mut self, image: Arc<Image>, access: AccessType) -> RenderTargetHandle {
        let desc = image.desc;
        let resource_index = self.new_resource_record(
            "imported image",
            ResourceKind::Image(desc),
            Some(ImportedResource::Image(image)),
            access,
        );

        RenderTargetHandle::new(resource_index, 0, access)
    }

    pub fn import_buffer(&mut self, buffer: Arc<Buffer>, access: AccessType) -> BufferHandle {
        let desc = buffer.desc;
        let resource_index = self.new_resource_record(
            "imported buffer",
            ResourceKind::Buffer(desc),
            Some(ImportedResource::Buffer(buffer)),
            access,
        );

        BufferHandle::new(resource_index, 0, access)
    }

    /// Demand that an imported resource ends the frame in `access` (e.g. a
    /// swapchain image in `Present`).
    pub fn export_render_target(&mut self, handle: RenderTargetHandle, access: AccessType) {
        let resource_index = handle.resource_index();
        assert!(
            self.resources[resource_index as usize].is_imported(),
            "Only imported resources can be exported!"
        );

        self.exports.push((resource_index, access));
    }

    pub(crate) fn new_resource_record(
        &mut self,
        name: &str,
        kind: ResourceKind,
        imported: Option<ImportedResource>,
        import_access: AccessType,
    ) -> u32 {
        let resource_index = self.resources.len() as u32;
        assert!(resource_index < MAX_RESOURCE_INDEX, "Frame graph resource overflow!");

        self.resources.push(ResourceRecord {
            name: name.to_owned(),
            kind,
            imported,
            import_access,
            creator_pass: None,
            last_user_pass: None,
            ref_count: 0,
            accesses_head: None,
            accesses_tail: None,
            last_version: 0,
        });

        resource_index
    }

    /// Append an access edge to a pass and to the resource's chain.
    pub(crate) fn record_access(
        &mut self,
        pass_index: u32,
        resource_index: u32,
        version: u32,
        is_write: bool,
        access_type: AccessType,
    ) {
        if is_write {
            assert!(
                barrier::is_write_access(&access_type),
                "Invalid write access type: {:?}", access_type
            );
        } else {
            assert!(
                barrier::is_read_only_access(&access_type),
                "Invalid read access type: {:?}", access_type
            );
        }

        let access_index = self.accesses.len() as u32;
        self.accesses.push(ResourceAccess {
            pass_index,
            resource_index,
            version,
            is_write,
            access_type,
            next: None,
        });

        match self.resources[resource_index as usize].accesses_tail {
            Some(tail) => {
                self.accesses[tail as usize].next = Some(access_index);
            }
            None => {
                self.resources[resource_index as usize].accesses_head = Some(access_index);
            }
        }

        let resource = &mut self.resources[resource_index as usize];
        resource.accesses_tail = Some(access_index);
        resource.last_user_pass = Some(match resource.last_user_pass {
            Some(last) => last.max(pass_index),
            None => pass_index,
        });

        self.passes[pass_index as usize].accesses.push(access_index);
    }

    pub(crate) fn bump_version(&mut self, resource_index: u32, written_version: u32) -> u32 {
        let resource = &mut self.resources[resource_index as usize];

        assert_eq!(
            written_version, resource.last_version,
            "Resource {:?} already has a writer at version {}!",
            resource.name, written_version
        );

        let new_version = resource.last_version + 1;
        assert!(new_version <= MAX_VERSION, "Resource version overflow!");

        resource.last_version = new_version;
        new_version
    }
}
