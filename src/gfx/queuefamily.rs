use crate::gfx::error::SuitabilityError;
use anyhow::{Result, anyhow};
use vulkanalia::vk::{InstanceV1_0, KhrSurfaceExtension};
use vulkanalia::{Instance, vk};

/// Partially resolved queue families, as found while scanning a device.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyCandidates {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyCandidates {
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// Records the first family matching each predicate; stops once both are known.
    pub fn scan<F>(properties: &[vk::QueueFamilyProperties], mut supports_present: F) -> Result<Self>
    where
        F: FnMut(u32) -> Result<bool>,
    {
        let mut candidates = Self::default();

        for (index, family) in properties.iter().enumerate() {
            if family.queue_count == 0 {
                continue;
            }
            let index = index as u32;

            if candidates.graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                candidates.graphics = Some(index);
            }
            if candidates.present.is_none() && supports_present(index)? {
                candidates.present = Some(index);
            }
            if candidates.is_complete() {
                break;
            }
        }

        Ok(candidates)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

impl TryFrom<QueueFamilyCandidates> for QueueFamilyIndices {
    type Error = SuitabilityError;

    fn try_from(candidates: QueueFamilyCandidates) -> Result<Self, Self::Error> {
        match (candidates.graphics, candidates.present) {
            (Some(graphics), Some(present)) => Ok(Self { graphics, present }),
            (None, _) => Err(SuitabilityError("a graphics queue family")),
            (_, None) => Err(SuitabilityError("a present queue family")),
        }
    }
}

impl QueueFamilyIndices {
    pub unsafe fn get(
        instance: &Instance,
        surface: vk::SurfaceKHR,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        unsafe {
            let properties = instance.get_physical_device_queue_family_properties(physical_device);
            let candidates = QueueFamilyCandidates::scan(&properties, |index| {
                Ok(instance.get_physical_device_surface_support_khr(physical_device, index, surface)?)
            })?;

            Self::try_from(candidates).map_err(|e| anyhow!(e))
        }
    }

    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, queue_count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count,
            ..Default::default()
        }
    }

    #[test]
    fn incomplete_when_either_family_is_missing() {
        let none = QueueFamilyCandidates::default();
        let graphics_only = QueueFamilyCandidates {
            graphics: Some(0),
            present: None,
        };
        let present_only = QueueFamilyCandidates {
            graphics: None,
            present: Some(1),
        };
        let both = QueueFamilyCandidates {
            graphics: Some(0),
            present: Some(1),
        };

        assert!(!none.is_complete());
        assert!(!graphics_only.is_complete());
        assert!(!present_only.is_complete());
        assert!(both.is_complete());
    }

    #[test]
    fn records_first_index_of_each_family() {
        let properties = [
            family(vk::QueueFlags::TRANSFER, 1),
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 1),
        ];

        let candidates = QueueFamilyCandidates::scan(&properties, |index| Ok(index >= 2)).unwrap();
        assert_eq!(candidates.graphics, Some(1));
        assert_eq!(candidates.present, Some(2));
    }

    #[test]
    fn stops_scanning_once_complete() {
        let properties = [
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::GRAPHICS, 1),
        ];

        let mut queried = Vec::new();
        let candidates = QueueFamilyCandidates::scan(&properties, |index| {
            queried.push(index);
            Ok(true)
        })
        .unwrap();

        assert_eq!(candidates.graphics, Some(0));
        assert_eq!(candidates.present, Some(0));
        assert_eq!(queried, vec![0]);
    }

    #[test]
    fn skips_families_without_queues() {
        let properties = [family(vk::QueueFlags::GRAPHICS, 0), family(vk::QueueFlags::GRAPHICS, 2)];

        let candidates = QueueFamilyCandidates::scan(&properties, |_| Ok(true)).unwrap();
        assert_eq!(candidates.graphics, Some(1));
        assert_eq!(candidates.present, Some(1));
    }

    #[test]
    fn conversion_reports_missing_family() {
        let candidates = QueueFamilyCandidates {
            graphics: Some(0),
            present: None,
        };
        let error = QueueFamilyIndices::try_from(candidates).unwrap_err();
        assert_eq!(error.to_string(), "Missing a present queue family.");

        let indices = QueueFamilyIndices::try_from(QueueFamilyCandidates {
            graphics: Some(1),
            present: Some(1),
        })
        .unwrap();
        assert!(indices.is_shared());
    }
}
