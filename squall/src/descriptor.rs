// Descriptor set machinery
//
// Three pieces: a layout builder backed by a cache keyed on the
// normalized binding list, a growable pool-of-pools allocator, and a
// write batcher that commits a group of image/buffer writes to one
// set.

use ash::vk;
use std::collections::HashMap;

use crate::{Result, SquallError};

/// Hard cap on pool growth.
const MAX_SETS_PER_POOL: u32 = 4092;

/// Next pool size after a reallocation: half again as large,
/// clamped at the cap.
pub fn grow_sets_per_pool(current: u32) -> u32 {
    let next = (current as f32 * 1.5) as u32;
    next.min(MAX_SETS_PER_POOL)
}

/// One binding in a layout under construction.
type BindingEntry = (u32, vk::DescriptorType);

/// Accumulates bindings, then yields an immutable layout.
///
/// All bindings in one layout share a stage mask, which is passed at
/// build time.
pub struct DescLayoutBuilder {
    bindings: Vec<BindingEntry>,
}

impl DescLayoutBuilder {
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
        }
    }

    pub fn add_binding(mut self, binding: u32, ty: vk::DescriptorType) -> Self {
        self.bindings.push((binding, ty));
        self
    }

    /// Build through the cache, reusing an identical layout if one
    /// already exists.
    pub fn build(
        self,
        dev: &ash::Device,
        cache: &mut DescLayoutCache,
        stages: vk::ShaderStageFlags,
    ) -> Result<vk::DescriptorSetLayout> {
        cache.get_or_create(dev, &self.bindings, stages)
    }
}

/// Layout cache keyed by (sorted bindings, stage mask).
pub struct DescLayoutCache {
    layouts: HashMap<(Vec<BindingEntry>, vk::ShaderStageFlags), vk::DescriptorSetLayout>,
}

impl DescLayoutCache {
    pub fn new() -> Self {
        Self {
            layouts: HashMap::new(),
        }
    }

    pub fn get_or_create(
        &mut self,
        dev: &ash::Device,
        bindings: &[BindingEntry],
        stages: vk::ShaderStageFlags,
    ) -> Result<vk::DescriptorSetLayout> {
        // normalize the key by binding index so declaration order
        // doesn't split the cache
        let mut key: Vec<BindingEntry> = bindings.to_vec();
        key.sort_by_key(|b| b.0);

        if let Some(layout) = self.layouts.get(&(key.clone(), stages)) {
            return Ok(*layout);
        }

        let vk_bindings: Vec<vk::DescriptorSetLayoutBinding> = key
            .iter()
            .map(|(binding, ty)| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(*binding)
                    .descriptor_type(*ty)
                    .descriptor_count(1)
                    .stage_flags(stages)
                    .build()
            })
            .collect();

        let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&vk_bindings);
        let layout = unsafe {
            dev.create_descriptor_set_layout(&info, None)
                .or(Err(SquallError::COULD_NOT_ALLOCATE_DESCRIPTOR))?
        };

        self.layouts.insert((key, stages), layout);
        Ok(layout)
    }

    pub fn destroy(&mut self, dev: &ash::Device) {
        for (_, layout) in self.layouts.drain() {
            unsafe {
                dev.destroy_descriptor_set_layout(layout, None);
            }
        }
    }
}

/// Relative weight of one descriptor type within a pool.
#[derive(Copy, Clone, Debug)]
pub struct PoolSizeRatio {
    pub ty: vk::DescriptorType,
    pub ratio: f32,
}

/// A growable descriptor allocator.
///
/// Sets come out of a `ready` pool; when one fills up it is parked on
/// the `full` list and a bigger replacement is created. Reset returns
/// every pool to `ready` and clears them, which is what the frame
/// ring does at the top of each frame.
pub struct DescAllocator {
    ratios: Vec<PoolSizeRatio>,
    ready: Vec<vk::DescriptorPool>,
    full: Vec<vk::DescriptorPool>,
    sets_per_pool: u32,
}

impl DescAllocator {
    fn create_pool(
        dev: &ash::Device,
        set_count: u32,
        ratios: &[PoolSizeRatio],
    ) -> Result<vk::DescriptorPool> {
        let sizes: Vec<vk::DescriptorPoolSize> = ratios
            .iter()
            .map(|r| {
                vk::DescriptorPoolSize::builder()
                    .ty(r.ty)
                    .descriptor_count((r.ratio * set_count as f32) as u32)
                    .build()
            })
            .collect();

        let info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&sizes)
            .max_sets(set_count);

        unsafe {
            dev.create_descriptor_pool(&info, None)
                .or(Err(SquallError::COULD_NOT_ALLOCATE_DESCRIPTOR))
        }
    }

    pub fn new(dev: &ash::Device, max_sets: u32, ratios: &[PoolSizeRatio]) -> Result<Self> {
        let first = Self::create_pool(dev, max_sets, ratios)?;

        Ok(Self {
            ratios: ratios.to_vec(),
            ready: vec![first],
            full: Vec::new(),
            sets_per_pool: grow_sets_per_pool(max_sets),
        })
    }

    fn get_pool(&mut self, dev: &ash::Device) -> Result<vk::DescriptorPool> {
        match self.ready.pop() {
            Some(pool) => Ok(pool),
            None => {
                let pool = Self::create_pool(dev, self.sets_per_pool, &self.ratios)?;
                self.sets_per_pool = grow_sets_per_pool(self.sets_per_pool);
                Ok(pool)
            }
        }
    }

    /// Allocate one set with `layout`.
    ///
    /// On OUT_OF_POOL_MEMORY or FRAGMENTED_POOL the pool is retired
    /// to the full list and the allocation retried on a fresh pool.
    pub fn allocate(
        &mut self,
        dev: &ash::Device,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet> {
        let mut pool = self.get_pool(dev)?;
        let layouts = [layout];

        let info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts)
            .build();

        let set = match unsafe { dev.allocate_descriptor_sets(&info) } {
            Ok(sets) => sets[0],
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY) | Err(vk::Result::ERROR_FRAGMENTED_POOL) => {
                self.full.push(pool);

                pool = self.get_pool(dev)?;
                let retry_info = vk::DescriptorSetAllocateInfo::builder()
                    .descriptor_pool(pool)
                    .set_layouts(&layouts)
                    .build();

                unsafe {
                    dev.allocate_descriptor_sets(&retry_info)
                        .or(Err(SquallError::COULD_NOT_ALLOCATE_DESCRIPTOR))?[0]
                }
            }
            Err(_) => return Err(SquallError::COULD_NOT_ALLOCATE_DESCRIPTOR),
        };

        self.ready.push(pool);
        Ok(set)
    }

    /// Reset every pool and return the full ones to ready.
    pub fn reset(&mut self, dev: &ash::Device) {
        unsafe {
            for p in self.ready.iter() {
                let _ = dev.reset_descriptor_pool(*p, vk::DescriptorPoolResetFlags::empty());
            }
            for p in self.full.drain(..) {
                let _ = dev.reset_descriptor_pool(p, vk::DescriptorPoolResetFlags::empty());
                self.ready.push(p);
            }
        }
    }

    /// Dispose of every pool. Sets allocated from them die with the
    /// pools.
    pub fn destroy(&mut self, dev: &ash::Device) {
        unsafe {
            for p in self.ready.drain(..) {
                dev.destroy_descriptor_pool(p, None);
            }
            for p in self.full.drain(..) {
                dev.destroy_descriptor_pool(p, None);
            }
        }
    }
}

/// One pending descriptor write.
enum WriteRecord {
    Image {
        binding: u32,
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
        ty: vk::DescriptorType,
    },
    Buffer {
        binding: u32,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
        ty: vk::DescriptorType,
    },
}

/// Accumulates writes, then commits them to a single set.
///
/// Records are append-only; the vulkan info structs are materialized
/// at commit time, so nothing here dangles while the batch grows.
pub struct DescWriter {
    records: Vec<WriteRecord>,
}

impl DescWriter {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    pub fn write_image(
        &mut self,
        binding: u32,
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
        ty: vk::DescriptorType,
    ) {
        self.records.push(WriteRecord::Image {
            binding: binding,
            view: view,
            sampler: sampler,
            layout: layout,
            ty: ty,
        });
    }

    pub fn write_buffer(
        &mut self,
        binding: u32,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
        ty: vk::DescriptorType,
    ) {
        self.records.push(WriteRecord::Buffer {
            binding: binding,
            buffer: buffer,
            offset: offset,
            range: range,
            ty: ty,
        });
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Push the accumulated writes into `set`.
    pub fn update_set(&self, dev: &ash::Device, set: vk::DescriptorSet) {
        // the infos are built first so the write structs can point
        // at stable addresses inside these vectors
        let mut image_infos = Vec::new();
        let mut buffer_infos = Vec::new();

        for record in self.records.iter() {
            match record {
                WriteRecord::Image {
                    view,
                    sampler,
                    layout,
                    ..
                } => {
                    image_infos.push(
                        vk::DescriptorImageInfo::builder()
                            .sampler(*sampler)
                            .image_view(*view)
                            .image_layout(*layout)
                            .build(),
                    );
                }
                WriteRecord::Buffer {
                    buffer,
                    offset,
                    range,
                    ..
                } => {
                    buffer_infos.push(
                        vk::DescriptorBufferInfo::builder()
                            .buffer(*buffer)
                            .offset(*offset)
                            .range(*range)
                            .build(),
                    );
                }
            }
        }

        let mut writes = Vec::new();
        let mut image_idx = 0;
        let mut buffer_idx = 0;

        for record in self.records.iter() {
            match record {
                WriteRecord::Image { binding, ty, .. } => {
                    writes.push(
                        vk::WriteDescriptorSet::builder()
                            .dst_set(set)
                            .dst_binding(*binding)
                            .dst_array_element(0)
                            .descriptor_type(*ty)
                            .image_info(&image_infos[image_idx..image_idx + 1])
                            .build(),
                    );
                    image_idx += 1;
                }
                WriteRecord::Buffer { binding, ty, .. } => {
                    writes.push(
                        vk::WriteDescriptorSet::builder()
                            .dst_set(set)
                            .dst_binding(*binding)
                            .dst_array_element(0)
                            .descriptor_type(*ty)
                            .buffer_info(&buffer_infos[buffer_idx..buffer_idx + 1])
                            .build(),
                    );
                    buffer_idx += 1;
                }
            }
        }

        unsafe {
            dev.update_descriptor_sets(&writes, &[]);
        }
    }
}
