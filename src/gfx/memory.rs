//! Device memory selection and owned buffer/image allocations.
//!
//! Every GPU object kind in the renderer is held by a value with an explicit,
//! idempotent `destroy`. Device-derived handles must be destroyed before the
//! device itself; `Renderer`'s `Drop` is the single place that enforces that
//! order for long-lived resources, and [`Scoped`] covers transient ones.

use crate::gfx::error::GfxError;
use anyhow::{Result, anyhow};
use std::ops::{Deref, DerefMut};
use vulkanalia::vk::{DeviceV1_0, Handle, HasBuilder};
use vulkanalia::{Device, vk};

/// Returns the first memory type allowed by `type_filter` whose flags contain `required`.
pub fn find_memory_type(
    memory_types: &[vk::MemoryType],
    type_filter: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32> {
    memory_types
        .iter()
        .enumerate()
        .find(|(index, memory_type)| {
            type_filter & (1 << index) != 0 && memory_type.property_flags.contains(required)
        })
        .map(|(index, _)| index as u32)
        .ok_or_else(|| {
            anyhow!(GfxError::NoSuitableMemoryType {
                type_filter,
                required,
            })
        })
}

/// The valid prefix of the device's memory type table.
pub fn memory_types(properties: &vk::PhysicalDeviceMemoryProperties) -> &[vk::MemoryType] {
    &properties.memory_types[..properties.memory_type_count as usize]
}

/// A GPU object released explicitly against the device that created it.
pub trait DeviceResource {
    /// Releases the object. Calling this on an already released value is a no-op.
    ///
    /// # Safety
    ///
    /// The device must be idle with respect to this resource.
    unsafe fn destroy(&mut self, device: &Device);
}

#[derive(Copy, Clone, Debug, Default)]
pub struct AllocatedBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

impl AllocatedBuffer {
    pub unsafe fn new(
        device: &Device,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        unsafe {
            let info = vk::BufferCreateInfo::builder()
                .size(size)
                .usage(usage)
                .sharing_mode(vk::SharingMode::EXCLUSIVE);

            // Released on any early return below.
            let mut buffer = Scoped::new(
                device,
                Self {
                    buffer: device.create_buffer(&info, None)?,
                    size,
                    ..Default::default()
                },
            );
            let requirements = device.get_buffer_memory_requirements(buffer.buffer);
            buffer.memory = allocate(device, memory_properties, requirements, properties)?;
            device.bind_buffer_memory(buffer.buffer, buffer.memory, 0)?;

            Ok(buffer.into_inner())
        }
    }

    pub fn is_null(&self) -> bool {
        self.buffer.is_null()
    }

    /// Copies `data` into host-visible memory through a temporary mapping.
    pub unsafe fn write<T: Copy>(&self, device: &Device, data: &[T]) -> Result<()> {
        let size = size_of_val(data) as vk::DeviceSize;
        if size == 0 {
            return Ok(());
        }
        unsafe {
            let mapped = device.map_memory(self.memory, 0, size, vk::MemoryMapFlags::empty())?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.cast::<T>(), data.len());
            device.unmap_memory(self.memory);
        }
        Ok(())
    }
}

impl DeviceResource for AllocatedBuffer {
    unsafe fn destroy(&mut self, device: &Device) {
        unsafe {
            if !self.buffer.is_null() {
                device.destroy_buffer(self.buffer, None);
            }
            if !self.memory.is_null() {
                device.free_memory(self.memory, None);
            }
        }
        *self = Self::default();
    }
}

#[derive(Copy, Clone, Debug, Default)]
pub struct AllocatedImage {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
}

/// Creation parameters for a single-level, single-layer 2D image.
#[derive(Copy, Clone, Debug)]
pub struct ImageSpec {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub tiling: vk::ImageTiling,
    pub initial_layout: vk::ImageLayout,
    pub usage: vk::ImageUsageFlags,
    pub properties: vk::MemoryPropertyFlags,
}

impl AllocatedImage {
    pub unsafe fn new(
        device: &Device,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        spec: ImageSpec,
    ) -> Result<Self> {
        unsafe {
            let info = vk::ImageCreateInfo::builder()
                .image_type(vk::ImageType::_2D)
                .extent(vk::Extent3D {
                    width: spec.extent.width,
                    height: spec.extent.height,
                    depth: 1,
                })
                .mip_levels(1)
                .array_layers(1)
                .format(spec.format)
                .tiling(spec.tiling)
                .initial_layout(spec.initial_layout)
                .usage(spec.usage)
                .samples(vk::SampleCountFlags::_1)
                .sharing_mode(vk::SharingMode::EXCLUSIVE);

            let mut image = Scoped::new(
                device,
                Self {
                    image: device.create_image(&info, None)?,
                    memory: vk::DeviceMemory::null(),
                    extent: spec.extent,
                    format: spec.format,
                },
            );
            let requirements = device.get_image_memory_requirements(image.image);
            image.memory = allocate(device, memory_properties, requirements, spec.properties)?;
            device.bind_image_memory(image.image, image.memory, 0)?;

            Ok(image.into_inner())
        }
    }
}

impl DeviceResource for AllocatedImage {
    unsafe fn destroy(&mut self, device: &Device) {
        unsafe {
            if !self.image.is_null() {
                device.destroy_image(self.image, None);
            }
            if !self.memory.is_null() {
                device.free_memory(self.memory, None);
            }
        }
        *self = Self::default();
    }
}

unsafe fn allocate(
    device: &Device,
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    requirements: vk::MemoryRequirements,
    properties: vk::MemoryPropertyFlags,
) -> Result<vk::DeviceMemory> {
    let memory_type_index = find_memory_type(
        memory_types(memory_properties),
        requirements.memory_type_bits,
        properties,
    )?;

    let info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);

    Ok(unsafe { device.allocate_memory(&info, None)? })
}

/// Releases the wrapped resource when dropped.
pub struct Scoped<'a, T: DeviceResource> {
    device: &'a Device,
    resource: T,
}

impl<'a, T: DeviceResource> Scoped<'a, T> {
    /// # Safety
    ///
    /// No GPU work may reference `resource` once this guard is dropped.
    pub unsafe fn new(device: &'a Device, resource: T) -> Self {
        Self { device, resource }
    }

    /// Keeps the resource alive past the guard's scope.
    pub fn into_inner(mut self) -> T
    where
        T: Default,
    {
        std::mem::take(&mut self.resource)
    }
}

impl<T: DeviceResource> Deref for Scoped<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.resource
    }
}

impl<T: DeviceResource> DerefMut for Scoped<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.resource
    }
}

impl<T: DeviceResource> Drop for Scoped<'_, T> {
    fn drop(&mut self) {
        unsafe { self.resource.destroy(self.device) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_type(property_flags: vk::MemoryPropertyFlags) -> vk::MemoryType {
        vk::MemoryType {
            property_flags,
            heap_index: 0,
        }
    }

    #[test]
    fn skips_types_missing_required_flags() {
        let types = [
            memory_type(vk::MemoryPropertyFlags::DEVICE_LOCAL),
            memory_type(vk::MemoryPropertyFlags::HOST_VISIBLE),
            memory_type(vk::MemoryPropertyFlags::DEVICE_LOCAL),
        ];

        let index = find_memory_type(&types, 0b0110, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap();
        assert_eq!(index, 2);
    }

    #[test]
    fn respects_type_filter() {
        let types = [
            memory_type(vk::MemoryPropertyFlags::DEVICE_LOCAL),
            memory_type(vk::MemoryPropertyFlags::DEVICE_LOCAL),
        ];

        let index = find_memory_type(&types, 0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap();
        assert_eq!(index, 1);
    }

    #[test]
    fn required_flags_must_all_be_present() {
        let staging = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let types = [
            memory_type(vk::MemoryPropertyFlags::HOST_VISIBLE),
            memory_type(staging | vk::MemoryPropertyFlags::HOST_CACHED),
        ];

        assert_eq!(find_memory_type(&types, 0b11, staging).unwrap(), 1);
    }

    #[test]
    fn no_match_is_a_memory_type_error() {
        let types = [memory_type(vk::MemoryPropertyFlags::HOST_VISIBLE)];

        let error = find_memory_type(&types, 0b1, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap_err();
        assert!(matches!(
            error.downcast_ref::<GfxError>(),
            Some(GfxError::NoSuitableMemoryType { type_filter: 1, .. })
        ));
    }

    #[test]
    fn memory_types_honours_reported_count() {
        let mut properties = vk::PhysicalDeviceMemoryProperties::default();
        properties.memory_type_count = 2;
        properties.memory_types[1] = memory_type(vk::MemoryPropertyFlags::DEVICE_LOCAL);

        let types = memory_types(&properties);
        assert_eq!(types.len(), 2);
        assert!(types[1].property_flags.contains(vk::MemoryPropertyFlags::DEVICE_LOCAL));
    }
}
