//! Per-subresource access state of every image the pipeline creates.
//!
//! Passes declare the access they are about to perform with
//! [`ResourceStateTable::access`]; the table inserts the transition from whatever state
//! the subresources are currently in and records it. The recorded log can be checked
//! with [`ResourceStateTable::validate_log`].

use std::collections::HashMap;

use crate::error::{IblError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId(u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccessState {
    Undefined,
    TransferRead,
    TransferWrite,
    ColorAttachmentWrite,
    FragmentShaderRead,
}

impl AccessState {
    pub fn is_write(self) -> bool {
        matches!(
            self,
            AccessState::TransferWrite | AccessState::ColorAttachmentWrite
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubresourceRange {
    pub base_mip_level: u32,
    pub level_count: u32,
    pub base_array_layer: u32,
    pub layer_count: u32,
}

impl SubresourceRange {
    /// All `layer_count` layers of a single mip level.
    pub fn level(level: u32, layer_count: u32) -> Self {
        Self::levels(level, 1, layer_count)
    }

    pub fn levels(base_mip_level: u32, level_count: u32, layer_count: u32) -> Self {
        Self {
            base_mip_level,
            level_count,
            base_array_layer: 0,
            layer_count,
        }
    }

    pub fn mips(&self) -> std::ops::Range<u32> {
        self.base_mip_level..self.base_mip_level + self.level_count
    }

    pub fn layers(&self) -> std::ops::Range<u32> {
        self.base_array_layer..self.base_array_layer + self.layer_count
    }

    pub fn contains(&self, mip: u32, layer: u32) -> bool {
        self.mips().contains(&mip) && self.layers().contains(&layer)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageBarrier {
    pub image: ImageId,
    pub range: SubresourceRange,
    pub prev_access: AccessState,
    pub next_access: AccessState,
    /// Previous contents are undefined and may be dropped.
    pub discard: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordedOp {
    Barrier(ImageBarrier),
    Access {
        image: ImageId,
        range: SubresourceRange,
        access: AccessState,
    },
    /// End of a command sequence; the sequence was submitted and waited on.
    Submit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Hazard {
    pub op_index: usize,
    pub image: ImageId,
    pub mip: u32,
    pub layer: u32,
}

struct ImageStates {
    level_count: u32,
    layer_count: u32,
    states: Vec<AccessState>,
}

impl ImageStates {
    fn index(&self, mip: u32, layer: u32) -> usize {
        (mip * self.layer_count + layer) as usize
    }
}

#[derive(Default)]
pub struct ResourceStateTable {
    images: HashMap<ImageId, ImageStates>,
    next_id: u32,
    log: Vec<RecordedOp>,
}

impl ResourceStateTable {
    /// Starts tracking a new image; every subresource begins `Undefined`.
    pub fn register(&mut self, level_count: u32, layer_count: u32) -> ImageId {
        let id = ImageId(self.next_id);
        self.next_id += 1;
        self.images.insert(
            id,
            ImageStates {
                level_count,
                layer_count,
                states: vec![AccessState::Undefined; (level_count * layer_count) as usize],
            },
        );
        id
    }

    pub fn state(&self, image: ImageId, mip: u32, layer: u32) -> Option<AccessState> {
        let img = self.images.get(&image)?;
        if mip < img.level_count && layer < img.layer_count {
            Some(img.states[img.index(mip, layer)])
        } else {
            None
        }
    }

    fn image_mut(&mut self, image: ImageId, range: &SubresourceRange) -> Result<&mut ImageStates> {
        let img = self
            .images
            .get_mut(&image)
            .ok_or_else(|| IblError::device("resource state", format!("unknown image {image:?}")))?;
        if range.level_count == 0
            || range.layer_count == 0
            || range.mips().end > img.level_count
            || range.layers().end > img.layer_count
        {
            return Err(IblError::device(
                "resource state",
                format!(
                    "range {range:?} outside of image {image:?} ({} levels, {} layers)",
                    img.level_count, img.layer_count
                ),
            ));
        }
        Ok(img)
    }

    /// Moves `range` into `next`, recording one barrier per run of subresources that
    /// share a previous state. Returns the number of barriers recorded.
    pub fn transition(
        &mut self,
        image: ImageId,
        range: SubresourceRange,
        next: AccessState,
    ) -> Result<usize> {
        let img = self.image_mut(image, &range)?;
        let mut barriers: Vec<ImageBarrier> = Vec::new();

        for mip in range.mips() {
            let first = img.states[img.index(mip, range.base_array_layer)];
            let uniform = range
                .layers()
                .all(|layer| img.states[img.index(mip, layer)] == first);

            let pieces: Vec<(SubresourceRange, AccessState)> = if uniform {
                vec![(
                    SubresourceRange {
                        base_mip_level: mip,
                        level_count: 1,
                        ..range
                    },
                    first,
                )]
            } else {
                range
                    .layers()
                    .map(|layer| {
                        (
                            SubresourceRange {
                                base_mip_level: mip,
                                level_count: 1,
                                base_array_layer: layer,
                                layer_count: 1,
                            },
                            img.states[img.index(mip, layer)],
                        )
                    })
                    .collect()
            };

            for (piece, prev) in pieces {
                if prev == next && !prev.is_write() {
                    continue;
                }
                // Merge with the barrier of the previous mip when it covers the same layers.
                if let Some(last) = barriers.last_mut() {
                    if last.prev_access == prev
                        && last.range.base_array_layer == piece.base_array_layer
                        && last.range.layer_count == piece.layer_count
                        && last.range.mips().end == piece.base_mip_level
                    {
                        last.range.level_count += 1;
                        continue;
                    }
                }
                barriers.push(ImageBarrier {
                    image,
                    range: piece,
                    prev_access: prev,
                    next_access: next,
                    discard: prev == AccessState::Undefined,
                });
            }
        }

        for mip in range.mips() {
            for layer in range.layers() {
                let idx = img.index(mip, layer);
                img.states[idx] = next;
            }
        }

        let count = barriers.len();
        for barrier in barriers {
            log::trace!(
                "barrier {:?} mips {:?} layers {:?}: {:?} -> {:?}",
                barrier.image,
                barrier.range.mips(),
                barrier.range.layers(),
                barrier.prev_access,
                barrier.next_access
            );
            self.log.push(RecordedOp::Barrier(barrier));
        }
        Ok(count)
    }

    /// Declares that the next recorded command accesses `range` as `access`.
    pub fn access(
        &mut self,
        image: ImageId,
        range: SubresourceRange,
        access: AccessState,
    ) -> Result<()> {
        self.transition(image, range, access)?;
        self.log.push(RecordedOp::Access {
            image,
            range,
            access,
        });
        Ok(())
    }

    /// Fails unless every subresource of `range` is currently in `state`.
    pub fn expect(&self, image: ImageId, range: SubresourceRange, state: AccessState) -> Result<()> {
        for mip in range.mips() {
            for layer in range.layers() {
                match self.state(image, mip, layer) {
                    Some(s) if s == state => {}
                    other => {
                        return Err(IblError::device(
                            "resource state",
                            format!(
                                "{image:?} mip {mip} layer {layer} is {other:?}, expected {state:?}"
                            ),
                        ))
                    }
                }
            }
        }
        Ok(())
    }

    pub fn end_sequence(&mut self) {
        self.log.push(RecordedOp::Submit);
    }

    pub fn log(&self) -> &[RecordedOp] {
        &self.log
    }

    pub fn barrier_count(&self) -> usize {
        self.log
            .iter()
            .filter(|op| matches!(op, RecordedOp::Barrier(_)))
            .count()
    }

    /// Checks that no access touches a subresource written earlier in the same
    /// sequence without a barrier recorded in between.
    pub fn validate_log(&self) -> std::result::Result<(), Hazard> {
        validate_ops(&self.log)
    }
}

pub fn validate_ops(ops: &[RecordedOp]) -> std::result::Result<(), Hazard> {
    let mut pending: HashMap<(ImageId, u32, u32), bool> = HashMap::new();

    for (op_index, op) in ops.iter().enumerate() {
        match op {
            RecordedOp::Barrier(barrier) => {
                for mip in barrier.range.mips() {
                    for layer in barrier.range.layers() {
                        pending.remove(&(barrier.image, mip, layer));
                    }
                }
            }
            RecordedOp::Access {
                image,
                range,
                access,
            } => {
                for mip in range.mips() {
                    for layer in range.layers() {
                        if pending.contains_key(&(*image, mip, layer)) {
                            return Err(Hazard {
                                op_index,
                                image: *image,
                                mip,
                                layer,
                            });
                        }
                        if access.is_write() {
                            pending.insert((*image, mip, layer), true);
                        }
                    }
                }
            }
            RecordedOp::Submit => pending.clear(),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_images_start_undefined() {
        let mut table = ResourceStateTable::default();
        let image = table.register(3, 6);
        assert_eq!(table.state(image, 2, 5), Some(AccessState::Undefined));
        assert_eq!(table.state(image, 3, 0), None);
    }

    #[test]
    fn transition_records_previous_state() {
        let mut table = ResourceStateTable::default();
        let image = table.register(1, 6);
        table
            .access(image, SubresourceRange::level(0, 6), AccessState::ColorAttachmentWrite)
            .unwrap();
        table
            .transition(image, SubresourceRange::level(0, 6), AccessState::TransferRead)
            .unwrap();

        let barriers: Vec<ImageBarrier> = table
            .log()
            .iter()
            .filter_map(|op| match op {
                RecordedOp::Barrier(b) => Some(*b),
                _ => None,
            })
            .collect();
        assert_eq!(barriers.len(), 2);
        assert_eq!(barriers[0].prev_access, AccessState::Undefined);
        assert!(barriers[0].discard);
        assert_eq!(barriers[1].prev_access, AccessState::ColorAttachmentWrite);
        assert_eq!(barriers[1].next_access, AccessState::TransferRead);
        assert!(!barriers[1].discard);
    }

    #[test]
    fn repeated_reads_need_no_barrier() {
        let mut table = ResourceStateTable::default();
        let image = table.register(4, 6);
        let all = SubresourceRange::levels(0, 4, 6);
        table.transition(image, all, AccessState::FragmentShaderRead).unwrap();
        let before = table.barrier_count();
        table.access(image, all, AccessState::FragmentShaderRead).unwrap();
        table.access(image, all, AccessState::FragmentShaderRead).unwrap();
        assert_eq!(table.barrier_count(), before);
    }

    #[test]
    fn consecutive_mips_with_same_state_share_a_barrier() {
        let mut table = ResourceStateTable::default();
        let image = table.register(5, 6);
        let n = table
            .transition(image, SubresourceRange::levels(0, 5, 6), AccessState::TransferWrite)
            .unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn mixed_layers_split_into_per_layer_barriers() {
        let mut table = ResourceStateTable::default();
        let image = table.register(1, 6);
        let one_layer = SubresourceRange {
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 2,
            layer_count: 1,
        };
        table.transition(image, one_layer, AccessState::TransferRead).unwrap();
        let n = table
            .transition(image, SubresourceRange::level(0, 6), AccessState::TransferRead)
            .unwrap();
        // Layer 2 is already readable, the other five come from Undefined.
        assert_eq!(n, 5);
        for layer in 0..6 {
            assert_eq!(table.state(image, 0, layer), Some(AccessState::TransferRead));
        }
    }

    #[test]
    fn out_of_range_access_is_an_error() {
        let mut table = ResourceStateTable::default();
        let image = table.register(2, 6);
        assert!(table
            .access(image, SubresourceRange::level(2, 6), AccessState::TransferRead)
            .is_err());
        assert!(table
            .access(image, SubresourceRange::level(0, 7), AccessState::TransferRead)
            .is_err());
    }

    #[test]
    fn expect_reports_mismatched_state() {
        let mut table = ResourceStateTable::default();
        let image = table.register(1, 6);
        let range = SubresourceRange::level(0, 6);
        assert!(table.expect(image, range, AccessState::FragmentShaderRead).is_err());
        table.transition(image, range, AccessState::FragmentShaderRead).unwrap();
        assert!(table.expect(image, range, AccessState::FragmentShaderRead).is_ok());
    }

    #[test]
    fn validator_rejects_unbarriered_read_after_write() {
        let image = ImageId(0);
        let range = SubresourceRange::level(0, 6);
        let ops = [
            RecordedOp::Access {
                image,
                range,
                access: AccessState::TransferWrite,
            },
            RecordedOp::Access {
                image,
                range,
                access: AccessState::TransferRead,
            },
        ];
        let hazard = validate_ops(&ops).unwrap_err();
        assert_eq!(hazard.op_index, 1);
        assert_eq!(hazard.mip, 0);
    }

    #[test]
    fn submit_orders_writes_across_sequences() {
        let image = ImageId(0);
        let range = SubresourceRange::level(0, 6);
        let ops = [
            RecordedOp::Access {
                image,
                range,
                access: AccessState::ColorAttachmentWrite,
            },
            RecordedOp::Submit,
            RecordedOp::Access {
                image,
                range,
                access: AccessState::FragmentShaderRead,
            },
        ];
        assert!(validate_ops(&ops).is_ok());
    }

    #[test]
    fn declared_accesses_always_validate() {
        // Every interleaving of declared accesses over a small image must produce a
        // hazard-free log, since the table barriers before each state change.
        let states = [
            AccessState::TransferRead,
            AccessState::TransferWrite,
            AccessState::ColorAttachmentWrite,
            AccessState::FragmentShaderRead,
        ];
        let ranges = [
            SubresourceRange::level(0, 6),
            SubresourceRange::level(1, 6),
            SubresourceRange::levels(0, 2, 6),
            SubresourceRange {
                base_mip_level: 1,
                level_count: 1,
                base_array_layer: 3,
                layer_count: 2,
            },
        ];
        for a in 0..states.len() * ranges.len() {
            for b in 0..states.len() * ranges.len() {
                for c in 0..states.len() * ranges.len() {
                    let mut table = ResourceStateTable::default();
                    let image = table.register(2, 6);
                    for step in [a, b, c] {
                        table
                            .access(image, ranges[step % ranges.len()], states[step / ranges.len()])
                            .unwrap();
                    }
                    assert_eq!(table.validate_log(), Ok(()));
                }
            }
        }
    }
}
