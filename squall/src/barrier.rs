// Image layout transition policy
//
// Every layout change in the renderer goes through one fixed table
// mapping (old layout, new layout) onto the stage and access masks
// for the barrier. A pair that is not in the table is a programming
// error, not something to paper over with ALL_COMMANDS.

use ash::vk;
use lazy_static::lazy_static;
use std::collections::HashMap;

use crate::device::Device;
use crate::{Result, SquallError};

/// The resolved masks for one transition pair.
#[derive(Copy, Clone, Debug)]
pub struct TransitionMasks {
    pub src_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub dst_access: vk::AccessFlags2,
}

lazy_static! {
    /// The transitions this renderer performs. Sources and
    /// destinations follow the frame driver's pass ordering:
    /// compute background, geometry, blit-to-swapchain, overlay,
    /// present, plus the staging/mipmap path.
    static ref TRANSITION_TABLE: HashMap<(vk::ImageLayout, vk::ImageLayout), TransitionMasks> = {
        use vk::AccessFlags2 as A;
        use vk::ImageLayout as L;
        use vk::PipelineStageFlags2 as S;

        let mut map = HashMap::new();
        let mut add = |old, new, masks| {
            map.insert((old, new), masks);
        };

        // staging uploads
        add(
            L::UNDEFINED,
            L::TRANSFER_DST_OPTIMAL,
            TransitionMasks {
                src_stage: S::TOP_OF_PIPE,
                src_access: A::empty(),
                dst_stage: S::TRANSFER,
                dst_access: A::TRANSFER_WRITE,
            },
        );
        add(
            L::TRANSFER_DST_OPTIMAL,
            L::SHADER_READ_ONLY_OPTIMAL,
            TransitionMasks {
                src_stage: S::TRANSFER,
                src_access: A::TRANSFER_WRITE,
                dst_stage: S::FRAGMENT_SHADER | S::COMPUTE_SHADER,
                dst_access: A::SHADER_READ,
            },
        );
        // mip chain generation blits level i into level i+1
        add(
            L::TRANSFER_DST_OPTIMAL,
            L::TRANSFER_SRC_OPTIMAL,
            TransitionMasks {
                src_stage: S::TRANSFER,
                src_access: A::TRANSFER_WRITE,
                dst_stage: S::TRANSFER,
                dst_access: A::TRANSFER_READ,
            },
        );
        add(
            L::TRANSFER_SRC_OPTIMAL,
            L::SHADER_READ_ONLY_OPTIMAL,
            TransitionMasks {
                src_stage: S::TRANSFER,
                src_access: A::TRANSFER_READ,
                dst_stage: S::FRAGMENT_SHADER | S::COMPUTE_SHADER,
                dst_access: A::SHADER_READ,
            },
        );

        // compute background writes the draw image in GENERAL
        add(
            L::UNDEFINED,
            L::GENERAL,
            TransitionMasks {
                src_stage: S::TOP_OF_PIPE,
                src_access: A::empty(),
                dst_stage: S::COMPUTE_SHADER,
                dst_access: A::SHADER_WRITE,
            },
        );
        add(
            L::GENERAL,
            L::COLOR_ATTACHMENT_OPTIMAL,
            TransitionMasks {
                src_stage: S::COMPUTE_SHADER,
                src_access: A::SHADER_WRITE,
                dst_stage: S::COLOR_ATTACHMENT_OUTPUT,
                dst_access: A::COLOR_ATTACHMENT_WRITE | A::COLOR_ATTACHMENT_READ,
            },
        );

        // depth target is reinitialized every frame
        add(
            L::UNDEFINED,
            L::DEPTH_ATTACHMENT_OPTIMAL,
            TransitionMasks {
                src_stage: S::TOP_OF_PIPE,
                src_access: A::empty(),
                dst_stage: S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS,
                dst_access: A::DEPTH_STENCIL_ATTACHMENT_WRITE | A::DEPTH_STENCIL_ATTACHMENT_READ,
            },
        );

        // geometry output becomes the blit source
        add(
            L::COLOR_ATTACHMENT_OPTIMAL,
            L::TRANSFER_SRC_OPTIMAL,
            TransitionMasks {
                src_stage: S::COLOR_ATTACHMENT_OUTPUT,
                src_access: A::COLOR_ATTACHMENT_WRITE,
                dst_stage: S::TRANSFER,
                dst_access: A::TRANSFER_READ,
            },
        );
        // the swapchain image takes the blit then the overlay pass
        add(
            L::TRANSFER_DST_OPTIMAL,
            L::COLOR_ATTACHMENT_OPTIMAL,
            TransitionMasks {
                src_stage: S::TRANSFER,
                src_access: A::TRANSFER_WRITE,
                dst_stage: S::COLOR_ATTACHMENT_OUTPUT,
                dst_access: A::COLOR_ATTACHMENT_WRITE | A::COLOR_ATTACHMENT_READ,
            },
        );
        add(
            L::COLOR_ATTACHMENT_OPTIMAL,
            L::PRESENT_SRC_KHR,
            TransitionMasks {
                src_stage: S::COLOR_ATTACHMENT_OUTPUT,
                src_access: A::COLOR_ATTACHMENT_WRITE,
                dst_stage: S::BOTTOM_OF_PIPE,
                dst_access: A::empty(),
            },
        );

        map
    };
}

/// Resolve the stage and access masks for a transition.
///
/// Unhandled pairs are contract violations and surface as errors so
/// they are caught during development rather than becoming silent
/// hazards.
pub fn transition_masks(
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> Result<TransitionMasks> {
    TRANSITION_TABLE
        .get(&(old, new))
        .copied()
        .ok_or_else(|| {
            log::error!("No layout transition handler for {:?} -> {:?}", old, new);
            SquallError::INVALID_TRANSITION
        })
}

/// The aspect mask an image is accessed through, derived from the
/// layout it is entering.
pub(crate) fn aspect_for_layout(new: vk::ImageLayout) -> vk::ImageAspectFlags {
    match new {
        vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL
        | vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => vk::ImageAspectFlags::DEPTH,
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// Transitions `image` from `old` to `new` using `cbuf`
///
/// Images need to be manually moved between layouts. The stage and
/// access masks come from the fixed table above, the aspect mask from
/// the destination layout.
pub(crate) fn transition_image(
    dev: &Device,
    cbuf: vk::CommandBuffer,
    image: vk::Image,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
    mip_levels: u32,
) -> Result<()> {
    transition_image_range(dev, cbuf, image, old, new, 0, mip_levels)
}

/// Same as `transition_image`, but for a mip sub-range. The mipmap
/// generator uses this to walk the chain one level at a time.
pub(crate) fn transition_image_range(
    dev: &Device,
    cbuf: vk::CommandBuffer,
    image: vk::Image,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
    base_mip: u32,
    mip_levels: u32,
) -> Result<()> {
    let masks = transition_masks(old, new)?;

    let barrier = vk::ImageMemoryBarrier2::builder()
        .image(image)
        .old_layout(old)
        .new_layout(new)
        .src_stage_mask(masks.src_stage)
        .src_access_mask(masks.src_access)
        .dst_stage_mask(masks.dst_stage)
        .dst_access_mask(masks.dst_access)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .subresource_range(
            vk::ImageSubresourceRange::builder()
                .aspect_mask(aspect_for_layout(new))
                .base_mip_level(base_mip)
                .level_count(mip_levels)
                .base_array_layer(0)
                .layer_count(1)
                .build(),
        )
        .build();

    let barriers = [barrier];
    let dep_info = vk::DependencyInfo::builder()
        .image_memory_barriers(&barriers)
        .build();

    unsafe {
        dev.dev.cmd_pipeline_barrier2(cbuf, &dep_info);
    }

    Ok(())
}
