//! Fatal error classes raised by the renderer.
//!
//! Everything here aborts the application: these are either hardware/driver
//! incapabilities or violated invariants, and none of them are retried. The
//! only recoverable conditions (out-of-date and suboptimal swapchains) never
//! become a `GfxError`; the frame loop handles them by recreating resources.

use thiserror::Error;
use vulkanalia::vk;

#[derive(Debug, Error)]
pub enum GfxError {
    #[error("Failed to find any physical device with Vulkan support.")]
    NoSuitableDevice,

    #[error("No physical device offers complete queue families and swapchain support.")]
    NoCompleteQueueFamilies,

    #[error("Validation layer requested but not supported.")]
    MissingValidationLayer,

    #[error("Failed to create swapchain: {0}")]
    SwapchainCreation(vk::ErrorCode),

    #[error("Failed to create {stage}: {code}")]
    PipelineCreation {
        stage: &'static str,
        code: vk::ErrorCode,
    },

    #[error("Failed to find a memory type for filter {type_filter:#b} with {required:?}.")]
    NoSuitableMemoryType {
        type_filter: u32,
        required: vk::MemoryPropertyFlags,
    },

    #[error("Unsupported image layout transition ({old:?} -> {new:?}).")]
    UnsupportedLayoutTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },

    #[error("Failed to find a supported depth format.")]
    UnsupportedDepthFormat,

    #[error("Failed to acquire swapchain image: {0}")]
    SwapchainAcquire(vk::ErrorCode),

    #[error("Failed to present swapchain image: {0}")]
    SwapchainPresent(vk::ErrorCode),
}

/// Reason a physical device was rejected during selection.
#[derive(Debug, Error)]
#[error("Missing {0}.")]
pub struct SuitabilityError(pub &'static str);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_type_error_names_the_filter() {
        let error = GfxError::NoSuitableMemoryType {
            type_filter: 0b0110,
            required: vk::MemoryPropertyFlags::DEVICE_LOCAL,
        };
        assert!(error.to_string().contains("0b110"));
    }

    #[test]
    fn errors_survive_anyhow_downcast() {
        let error = anyhow::anyhow!(GfxError::UnsupportedDepthFormat);
        assert!(matches!(
            error.downcast_ref::<GfxError>(),
            Some(GfxError::UnsupportedDepthFormat)
        ));
    }
}
