use ember_rhi::backend::AccessType;

pub(crate) const RESOURCE_INDEX_BITS: u32 = 16;
pub(crate) const VERSION_BITS: u32 = 10;
pub(crate) const ACCESS_BITS: u32 = 6;

pub(crate) const MAX_RESOURCE_INDEX: u32 = (1 << RESOURCE_INDEX_BITS) - 1;
pub(crate) const MAX_VERSION: u32 = (1 << VERSION_BITS) - 1;

const _: () = assert!(RESOURCE_INDEX_BITS + VERSION_BITS + ACCESS_BITS == 32);

#[inline]
fn pack(resource_index: u32, version: u32, access_type: AccessType) -> u32 {
    debug_assert!(resource_index < MAX_RESOURCE_INDEX);
    debug_assert!(version <= MAX_VERSION);

    let access_raw = access_type as u32;
    debug_assert!(access_raw < (1 << ACCESS_BITS));

    resource_index
        | (version << RESOURCE_INDEX_BITS)
        | (access_raw << (RESOURCE_INDEX_BITS + VERSION_BITS))
}

#[inline]
fn unpack_resource_index(raw: u32) -> u32 {
    raw & MAX_RESOURCE_INDEX
}

#[inline]
fn unpack_version(raw: u32) -> u32 {
    (raw >> RESOURCE_INDEX_BITS) & MAX_VERSION
}

macro_rules! define_graph_handle {
    ($name:ident) => {
        /// Packed frame-graph handle: resource index, version and the access
        /// that produced it. The all-ones value is the invalid sentinel.
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
        pub struct $name(u32);

        impl $name {
            pub const INVALID: $name = $name(u32::MAX);

            pub(crate) fn new(resource_index: u32, version: u32, access_type: AccessType) -> Self {
                Self(pack(resource_index, version, access_type))
            }

            #[inline]
            pub fn is_valid(self) -> bool {
                self != Self::INVALID
            }

            #[inline]
            pub(crate) fn resource_index(self) -> u32 {
                debug_assert!(self.is_valid());
                unpack_resource_index(self.0)
            }

            #[inline]
            pub(crate) fn version(self) -> u32 {
                debug_assert!(self.is_valid());
                unpack_version(self.0)
            }
        }
    };
}

define_graph_handle!(RenderTargetHandle);
define_graph_handle!(BufferHandle);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_round_trip() {
        let handle = RenderTargetHandle::new(513, 7, AccessType::ColorAttachmentWrite);

        assert!(handle.is_valid());
        assert_eq!(handle.resource_index(), 513);
        assert_eq!(handle.version(), 7);
    }

    #[test]
    fn invalid_is_all_ones() {
        assert_eq!(RenderTargetHandle::INVALID.0, u32::MAX);
        assert!(!BufferHandle::INVALID.is_valid());
    }
}
