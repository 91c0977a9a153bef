// The frame ring
//
// A fixed ring of per-frame state. The CPU prepares slot i+1 while
// the GPU chews on slot i; the in-flight fence is the only thing
// gating reuse. Each slot also carries the per-frame descriptor
// allocator and the deletion queue scoped to that frame.

use ash::vk;

use crate::deletion::DeletionQueue;
use crate::descriptor::{DescAllocator, PoolSizeRatio};
use crate::device::Device;
use crate::resource::{Allocator, HostBufferUse};
use crate::{Result, SquallError};

use std::sync::Arc;

/// Bound on the per-frame fence wait, in nanoseconds. Expiry is
/// treated as a lost device.
const FENCE_TIMEOUT: u64 = 1_000_000_000;

/// Lifecycle of one slot.
///
/// Idle: fence signaled, resources reclaimable.
/// Recording: the command buffer is open.
/// Submitted: the fence is pending on the queue.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Recording,
    Submitted,
}

impl SlotState {
    /// The only legal successor of each state.
    pub fn next(self) -> SlotState {
        match self {
            SlotState::Idle => SlotState::Recording,
            SlotState::Recording => SlotState::Submitted,
            SlotState::Submitted => SlotState::Idle,
        }
    }
}

/// Per-frame resources.
pub struct FrameSlot {
    pub pool: vk::CommandPool,
    pub cbuf: vk::CommandBuffer,

    /// Signaled by acquire, consumed by the frame's submission.
    pub image_available: vk::Semaphore,
    /// Signaled by the frame's submission, consumed by present.
    pub render_finished: vk::Semaphore,
    /// Signaled when the frame's submission retires. Starts signaled
    /// so the first wait on a fresh slot returns immediately.
    pub fence: vk::Fence,

    /// Descriptor sub-allocator reset every time the slot cycles.
    pub descs: DescAllocator,
    /// Resources to destroy once this slot's fence signals.
    pub deletions: DeletionQueue,
    /// Persistently mapped scene uniform buffer for this slot.
    pub scene_ubo: crate::resource::AllocatedBuffer,

    pub state: SlotState,
}

/// The ring itself.
pub struct FrameRing {
    slots: Vec<FrameSlot>,
    frame_number: u64,
}

impl FrameRing {
    pub fn new(
        dev: &Arc<Device>,
        alloc: &Allocator,
        count: usize,
        scene_ubo_size: vk::DeviceSize,
    ) -> Result<Self> {
        let mut slots = Vec::with_capacity(count);

        // these ratios cover what one frame allocates: the global
        // scene set plus anything the overlay or debug paths want
        let frame_ratios = [
            PoolSizeRatio {
                ty: vk::DescriptorType::STORAGE_IMAGE,
                ratio: 3.0,
            },
            PoolSizeRatio {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                ratio: 3.0,
            },
            PoolSizeRatio {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                ratio: 3.0,
            },
            PoolSizeRatio {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                ratio: 4.0,
            },
        ];

        for _ in 0..count {
            let pool = dev.create_command_pool(dev.graphics.family)?;
            let cbuf = dev.create_command_buffers(pool, 1)?[0];

            let sema_create_info = vk::SemaphoreCreateInfo::default();
            let image_available = unsafe {
                dev.dev
                    .create_semaphore(&sema_create_info, None)
                    .or(Err(SquallError::INVALID))?
            };
            let render_finished = unsafe {
                dev.dev
                    .create_semaphore(&sema_create_info, None)
                    .or(Err(SquallError::INVALID))?
            };

            // signaled, or the first frame would wait forever
            let fence = unsafe {
                dev.dev
                    .create_fence(
                        &vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED),
                        None,
                    )
                    .or(Err(SquallError::INVALID))?
            };

            let descs = DescAllocator::new(&dev.dev, 1000, &frame_ratios)?;
            let scene_ubo = alloc.create_host_buffer(HostBufferUse::Uniform, scene_ubo_size)?;

            slots.push(FrameSlot {
                pool: pool,
                cbuf: cbuf,
                image_available: image_available,
                render_finished: render_finished,
                fence: fence,
                descs: descs,
                deletions: DeletionQueue::new(),
                scene_ubo: scene_ubo,
                state: SlotState::Idle,
            });
        }

        Ok(Self {
            slots: slots,
            frame_number: 0,
        })
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn current_index(&self) -> usize {
        (self.frame_number % self.slots.len() as u64) as usize
    }

    pub fn current(&mut self) -> &mut FrameSlot {
        let idx = self.current_index();
        &mut self.slots[idx]
    }

    /// Claim the current slot.
    ///
    /// Waits on the slot's fence, flushes the frame deletion queue,
    /// and resets the descriptor allocator. The fence itself is NOT
    /// reset yet: that only happens in arm_slot once acquire has
    /// succeeded, so a skipped frame leaves the fence signaled and
    /// the next wait returns immediately.
    pub fn begin_slot(&mut self, dev: &Device) -> Result<()> {
        let idx = self.current_index();
        let slot = &mut self.slots[idx];

        unsafe {
            match dev.dev.wait_for_fences(&[slot.fence], true, FENCE_TIMEOUT) {
                Ok(_) => {}
                Err(vk::Result::TIMEOUT) => {
                    log::error!("frame fence wait timed out, treating device as lost");
                    return Err(SquallError::DEVICE_LOST);
                }
                Err(vk::Result::ERROR_DEVICE_LOST) => return Err(SquallError::DEVICE_LOST),
                Err(_) => return Err(SquallError::DEVICE_LOST),
            }
        }

        // the fence has signaled, so everything this frame had in
        // flight has retired and can be reclaimed
        slot.state = SlotState::Idle;
        slot.deletions.flush(dev);
        slot.descs.reset(&dev.dev);

        Ok(())
    }

    /// Commit the claimed slot to this frame: reset the fence and
    /// enter Recording. Only called after the swapchain image was
    /// acquired, because from here on the frame must submit.
    pub fn arm_slot(&mut self, dev: &Device) -> Result<()> {
        let idx = self.current_index();
        let slot = &mut self.slots[idx];
        debug_assert_eq!(slot.state, SlotState::Idle);

        unsafe {
            dev.dev
                .reset_fences(&[slot.fence])
                .or(Err(SquallError::INVALID))?;
        }

        slot.state = slot.state.next();
        debug_assert_eq!(slot.state, SlotState::Recording);

        Ok(())
    }

    /// Mark the current slot submitted. Called exactly at queue
    /// submit time.
    pub fn mark_submitted(&mut self) {
        let slot = self.current();
        debug_assert_eq!(slot.state, SlotState::Recording);
        slot.state = slot.state.next();
    }

    /// Move to the next frame.
    pub fn advance(&mut self) {
        self.frame_number += 1;
    }

    /// Tear the ring down. The device must be idle.
    pub fn destroy(&mut self, dev: &Device, alloc: &Allocator) {
        for mut slot in self.slots.drain(..) {
            slot.deletions.flush(dev);
            slot.descs.destroy(&dev.dev);
            alloc.destroy_buffer(slot.scene_ubo);
            unsafe {
                dev.dev.destroy_semaphore(slot.image_available, None);
                dev.dev.destroy_semaphore(slot.render_finished, None);
                dev.dev.destroy_fence(slot.fence, None);
                dev.dev.destroy_command_pool(slot.pool, None);
            }
        }
    }
}
