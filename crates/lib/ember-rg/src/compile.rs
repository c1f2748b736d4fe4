use std::collections::HashSet;

use ember_rhi::backend::{AccessType, QueueKind};

use crate::graph::{FrameGraph, ResourceKind};

/// Pass and resource survival after reference-count culling.
pub struct GraphSurvivors {
    pub pass_alive: Vec<bool>,
    pub resource_alive: Vec<bool>,
}

/// One state transition scheduled before a pass (or after the last one).
#[derive(Clone, Debug)]
pub struct PlannedBarrier {
    pub resource_index: u32,
    pub prev_access: AccessType,
    pub next_access: AccessType,
    /// First touch of a transient image: the old contents are garbage.
    pub discard: bool,
    /// Set when the transition crosses queue kinds and needs an ownership
    /// transfer.
    pub queue_transfer: Option<(QueueKind, QueueKind)>,
}

pub struct CompiledFrameGraph {
    pub(crate) graph: FrameGraph,
    pub(crate) survivors: GraphSurvivors,
    /// `[first_use, last_use]` pass interval per surviving transient
    /// resource; `None` for culled and imported resources.
    pub(crate) lifetimes: Vec<Option<(u32, u32)>>,
    pub(crate) pass_barriers: Vec<Vec<PlannedBarrier>>,
    pub(crate) final_barriers: Vec<PlannedBarrier>,
}

impl FrameGraph {
    /// Cull passes and resources nobody observes.
    ///
    /// A resource starts with one reference per reader plus one when it is
    /// imported and written (the outside world observes it). A pass starts
    /// with one reference per distinct resource it writes. Dead resources
    /// release their writers; dead writers release everything they read,
    /// until the fixpoint.
    pub fn compute_survivors(&self) -> GraphSurvivors {
        let pass_count = self.passes.len();
        let resource_count = self.resources.len();

        let mut resource_refs = vec![0_u32; resource_count];
        let mut pass_refs = vec![0_u32; pass_count];

        // distinct (pass, resource) writer pairs
        let mut writer_pairs: HashSet<(u32, u32)> = HashSet::new();
        for access in &self.accesses {
            if access.is_write {
                writer_pairs.insert((access.pass_index, access.resource_index));
            } else {
                resource_refs[access.resource_index as usize] += 1;
            }
        }

        for &(pass_index, resource_index) in &writer_pairs {
            pass_refs[pass_index as usize] += 1;

            if self.resources[resource_index as usize].is_imported() {
                // imported writes are externally observed
                resource_refs[resource_index as usize] += 1;
            }
        }

        let mut worklist: Vec<u32> = (0..resource_count as u32)
            .filter(|&index| {
                resource_refs[index as usize] == 0 && !self.resources[index as usize].is_imported()
            })
            .collect();

        while let Some(dead_resource) = worklist.pop() {
            let writers: Vec<u32> = writer_pairs.iter()
                .filter(|&&(_, resource_index)| resource_index == dead_resource)
                .map(|&(pass_index, _)| pass_index)
                .collect();

            for writer in writers {
                debug_assert!(pass_refs[writer as usize] > 0);
                pass_refs[writer as usize] -= 1;

                if pass_refs[writer as usize] == 0 {
                    // the writer died, release everything it read
                    for &access_index in &self.passes[writer as usize].accesses {
                        let access = &self.accesses[access_index as usize];
                        if access.is_write {
                            continue;
                        }

                        let readee = access.resource_index as usize;
                        debug_assert!(resource_refs[readee] > 0);
                        resource_refs[readee] -= 1;

                        if resource_refs[readee] == 0 && !self.resources[readee].is_imported() {
                            worklist.push(readee as u32);
                        }
                    }
                }
            }
        }

        let pass_alive: Vec<bool> = pass_refs.iter().map(|&refs| refs > 0).collect();

        // a resource needs backing iff a surviving pass touches it
        let mut resource_alive = vec![false; resource_count];
        for access in &self.accesses {
            if pass_alive[access.pass_index as usize] {
                resource_alive[access.resource_index as usize] = true;
            }
        }

        GraphSurvivors {
            pass_alive,
            resource_alive,
        }
    }

    /// Resolve the graph into execution schedules: survivors, transient
    /// lifetime intervals and the per-pass barrier plan.
    pub fn compile(self) -> CompiledFrameGraph {
        let survivors = self.compute_survivors();

        let lifetimes = self.compute_lifetimes(&survivors);
        let (pass_barriers, final_barriers) = self.plan_barriers(&survivors);

        CompiledFrameGraph {
            graph: self,
            survivors,
            lifetimes,
            pass_barriers,
            final_barriers,
        }
    }

    fn compute_lifetimes(&self, survivors: &GraphSurvivors) -> Vec<Option<(u32, u32)>> {
        let mut lifetimes = vec![None; self.resources.len()];

        for (resource_index, resource) in self.resources.iter().enumerate() {
            if resource.is_imported() || !survivors.resource_alive[resource_index] {
                continue;
            }

            let mut first_use = u32::MAX;
            let mut last_use = 0_u32;

            let mut cursor = resource.accesses_head;
            while let Some(access_index) = cursor {
                let access = &self.accesses[access_index as usize];
                if survivors.pass_alive[access.pass_index as usize] {
                    first_use = first_use.min(access.pass_index);
                    last_use = last_use.max(access.pass_index);
                }
                cursor = access.next;
            }

            // the creator allocates even when its own access comes later
            if let Some(creator) = resource.creator_pass {
                if survivors.pass_alive[creator as usize] {
                    first_use = first_use.min(creator);
                }
            }

            if first_use != u32::MAX {
                lifetimes[resource_index] = Some((first_use, last_use));
            }
        }

        lifetimes
    }

    /// Walk passes in submission order, comparing each access against the
    /// resource's tracked state and scheduling a transition when they
    /// differ.
    fn plan_barriers(
        &self,
        survivors: &GraphSurvivors,
    ) -> (Vec<Vec<PlannedBarrier>>, Vec<PlannedBarrier>) {
        let mut states: Vec<AccessType> = self.resources.iter()
            .map(|resource| {
                if resource.is_imported() {
                    resource.import_access
                } else {
                    AccessType::Nothing
                }
            })
            .collect();

        let mut pass_barriers: Vec<Vec<PlannedBarrier>> = vec![Vec::new(); self.passes.len()];

        for (pass_index, pass) in self.passes.iter().enumerate() {
            if !survivors.pass_alive[pass_index] {
                continue;
            }

            for &access_index in &pass.accesses {
                let access = &self.accesses[access_index as usize];
                let resource = &self.resources[access.resource_index as usize];

                let required = access.access_type;
                let current = states[access.resource_index as usize];

                // read-after-read in the same state, or repeated writes by
                // the same pass, collapse into one state
                if current == required {
                    continue;
                }

                if current == AccessType::Nothing && resource.is_imported() {
                    // undefined imports are assumed to already be in their
                    // first declared access
                    states[access.resource_index as usize] = required;
                    continue;
                }

                let is_image = matches!(resource.kind, ResourceKind::Image(_));
                let first_touch = current == AccessType::Nothing;

                if !is_image && first_touch {
                    // buffers have no layout, nothing came before
                    states[access.resource_index as usize] = required;
                    continue;
                }

                pass_barriers[pass_index].push(PlannedBarrier {
                    resource_index: access.resource_index,
                    prev_access: current,
                    next_access: required,
                    discard: is_image && first_touch,
                    queue_transfer: queue_crossing(resource.is_imported(), current, required),
                });

                states[access.resource_index as usize] = required;
            }
        }

        let mut final_barriers = Vec::new();
        for &(resource_index, final_access) in &self.exports {
            if !survivors.resource_alive[resource_index as usize] {
                continue;
            }

            let current = states[resource_index as usize];
            if current == final_access || final_access == AccessType::Nothing {
                continue;
            }

            let resource = &self.resources[resource_index as usize];
            final_barriers.push(PlannedBarrier {
                resource_index,
                prev_access: current,
                next_access: final_access,
                discard: false,
                queue_transfer: queue_crossing(resource.is_imported(), current, final_access),
            });
        }

        (pass_barriers, final_barriers)
    }
}

impl CompiledFrameGraph {
    pub fn pass_survives(&self, pass_index: usize) -> bool {
        self.survivors.pass_alive[pass_index]
    }

    pub fn resource_survives(&self, resource_index: usize) -> bool {
        self.survivors.resource_alive[resource_index]
    }

    pub fn transient_lifetime(&self, resource_index: usize) -> Option<(u32, u32)> {
        self.lifetimes[resource_index]
    }

    pub fn planned_pass_barriers(&self, pass_index: usize) -> &[PlannedBarrier] {
        &self.pass_barriers[pass_index]
    }

    pub fn planned_final_barriers(&self) -> &[PlannedBarrier] {
        &self.final_barriers
    }
}

/// Graph passes execute on the graphics queue; a resource whose tracked
/// state came from the transfer queue crosses kinds on its first graphics
/// use.
fn queue_crossing(
    is_imported: bool,
    prev: AccessType,
    next: AccessType,
) -> Option<(QueueKind, QueueKind)> {
    let prev_is_transfer = matches!(prev, AccessType::TransferRead | AccessType::TransferWrite);
    let next_is_transfer = matches!(next, AccessType::TransferRead | AccessType::TransferWrite);

    if is_imported && prev_is_transfer && !next_is_transfer {
        Some((QueueKind::Transfer, QueueKind::Graphics))
    } else {
        None
    }
}
