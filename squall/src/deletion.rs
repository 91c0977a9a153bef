// Frame scoped deletion queue
//
// Resources that were in flight during a frame are pushed here as
// tagged records and destroyed once that frame's fence has signaled.
// Records instead of boxed closures: the flush is a plain match with
// no dynamic dispatch or hidden allocation.

use ash::vk;

use crate::device::Device;

/// One resource scheduled for destruction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeleteRecord {
    Buffer(vk::Buffer, vk::DeviceMemory),
    Image(vk::Image, vk::ImageView, vk::DeviceMemory),
    ImageView(vk::ImageView),
    Sampler(vk::Sampler),
    Pipeline(vk::Pipeline),
    PipelineLayout(vk::PipelineLayout),
    DescriptorLayout(vk::DescriptorSetLayout),
}

/// A queue of pending destructions.
///
/// Flushing happens in LIFO order, matching the reverse of creation
/// order within the frame.
pub struct DeletionQueue {
    dq_records: Vec<DeleteRecord>,
}

impl DeletionQueue {
    pub fn new() -> Self {
        Self {
            dq_records: Vec::new(),
        }
    }

    pub fn push(&mut self, record: DeleteRecord) {
        self.dq_records.push(record);
    }

    pub fn is_empty(&self) -> bool {
        self.dq_records.is_empty()
    }

    /// Remove all records, newest first.
    ///
    /// Split out from `flush` so the ordering contract can be
    /// exercised without a device.
    pub fn drain_lifo(&mut self) -> Vec<DeleteRecord> {
        let mut records = std::mem::replace(&mut self.dq_records, Vec::new());
        records.reverse();
        records
    }

    /// Destroy everything queued.
    ///
    /// The caller must guarantee the owning frame's fence signaled
    /// before this runs.
    pub fn flush(&mut self, dev: &Device) {
        for record in self.drain_lifo() {
            unsafe {
                match record {
                    DeleteRecord::Buffer(buf, mem) => {
                        dev.dev.destroy_buffer(buf, None);
                        dev.dev.free_memory(mem, None);
                    }
                    DeleteRecord::Image(image, view, mem) => {
                        dev.dev.destroy_image_view(view, None);
                        dev.dev.destroy_image(image, None);
                        dev.dev.free_memory(mem, None);
                    }
                    DeleteRecord::ImageView(view) => {
                        dev.dev.destroy_image_view(view, None);
                    }
                    DeleteRecord::Sampler(sampler) => {
                        dev.dev.destroy_sampler(sampler, None);
                    }
                    DeleteRecord::Pipeline(pipeline) => {
                        dev.dev.destroy_pipeline(pipeline, None);
                    }
                    DeleteRecord::PipelineLayout(layout) => {
                        dev.dev.destroy_pipeline_layout(layout, None);
                    }
                    DeleteRecord::DescriptorLayout(layout) => {
                        dev.dev.destroy_descriptor_set_layout(layout, None);
                    }
                }
            }
        }
    }
}
