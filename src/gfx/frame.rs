//! Per-frame acquire, submit and present, and swapchain recreation.
//!
//! [`FrameLoop`] owns the frame state machine and drives a [`FrameBackend`],
//! which performs the actual Vulkan calls. A frame is either fully presented
//! or abandoned before anything is submitted.

use crate::gfx::error::GfxError;
use anyhow::{Result, anyhow};
use log::{debug, trace};
use vulkanalia::vk;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Image { index: u32, suboptimal: bool },
    OutOfDate,
}

/// Suboptimal images are still rendered; only out-of-date ones are dropped.
pub fn acquire_outcome(result: Result<(u32, vk::SuccessCode), vk::ErrorCode>) -> Result<AcquireOutcome> {
    match result {
        Ok((index, code)) => Ok(AcquireOutcome::Image {
            index,
            suboptimal: code == vk::SuccessCode::SUBOPTIMAL_KHR,
        }),
        Err(vk::ErrorCode::OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
        Err(code) => Err(anyhow!(GfxError::SwapchainAcquire(code))),
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    NeedsRecreate,
}

pub fn present_outcome(result: Result<vk::SuccessCode, vk::ErrorCode>) -> Result<PresentOutcome> {
    match result {
        Ok(vk::SuccessCode::SUBOPTIMAL_KHR) | Err(vk::ErrorCode::OUT_OF_DATE_KHR) => {
            Ok(PresentOutcome::NeedsRecreate)
        }
        Ok(_) => Ok(PresentOutcome::Presented),
        Err(code) => Err(anyhow!(GfxError::SwapchainPresent(code))),
    }
}

/// The GPU side of a frame. Every step is blocking and single-threaded.
pub trait FrameBackend {
    fn acquire_next_image(&mut self) -> Result<AcquireOutcome>;

    fn update_uniforms(&mut self, image_index: u32) -> Result<()>;

    fn submit(&mut self, image_index: u32) -> Result<()>;

    fn present(&mut self, image_index: u32) -> Result<PresentOutcome>;

    fn wait_idle(&mut self) -> Result<()>;

    /// Destroys everything derived from the current swapchain except the chain itself.
    fn release_swapchain_resources(&mut self);

    /// Creates a new chain from the old one, which is then destroyed.
    fn replace_swapchain(&mut self) -> Result<()>;

    /// Rebuilds depth, render pass, pipeline, framebuffers and command buffers.
    fn build_swapchain_resources(&mut self) -> Result<()>;
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum FrameState {
    #[default]
    Idle,
    Acquiring,
    Submitting,
    Presenting,
    RecreatingSwapchain,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// The image was out of date; nothing was submitted.
    Abandoned,
    /// Presented, then the swapchain was rebuilt.
    Recreated,
}

#[derive(Debug, Default)]
pub struct FrameLoop {
    state: FrameState,
    resized: bool,
}

impl FrameLoop {
    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn resize_pending(&self) -> bool {
        self.resized
    }

    /// Recreation happens after the next present.
    pub fn notify_resized(&mut self) {
        self.resized = true;
    }

    fn enter(&mut self, state: FrameState) {
        trace!("Frame state {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    pub fn tick<B: FrameBackend>(&mut self, backend: &mut B) -> Result<FrameOutcome> {
        self.enter(FrameState::Acquiring);
        let image_index = match backend.acquire_next_image()? {
            AcquireOutcome::OutOfDate => {
                debug!("Swapchain out of date, abandoning frame.");
                self.recreate(backend)?;
                return Ok(FrameOutcome::Abandoned);
            }
            AcquireOutcome::Image { index, suboptimal } => {
                if suboptimal {
                    trace!("Acquired suboptimal image {index}.");
                }
                index
            }
        };

        backend.update_uniforms(image_index)?;

        self.enter(FrameState::Submitting);
        backend.submit(image_index)?;

        self.enter(FrameState::Presenting);
        let presented = backend.present(image_index)?;

        if presented == PresentOutcome::NeedsRecreate || self.resized {
            self.recreate(backend)?;
            return Ok(FrameOutcome::Recreated);
        }

        self.enter(FrameState::Idle);
        Ok(FrameOutcome::Presented)
    }

    pub fn recreate<B: FrameBackend>(&mut self, backend: &mut B) -> Result<()> {
        self.enter(FrameState::RecreatingSwapchain);
        self.resized = false;

        backend.wait_idle()?;
        backend.release_swapchain_resources();
        backend.replace_swapchain()?;
        backend.build_swapchain_resources()?;

        self.enter(FrameState::Idle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    const IMAGE_COUNT: usize = 3;

    /// Tracks live objects instead of creating them, and panics on any
    /// build or replace that would leak the previous generation.
    #[derive(Default)]
    struct MockBackend {
        acquires: VecDeque<AcquireOutcome>,
        presents: VecDeque<PresentOutcome>,
        calls: Vec<&'static str>,
        live_swapchains: Vec<u32>,
        next_swapchain: u32,
        views: usize,
        render_passes: usize,
        pipelines: usize,
        command_buffers: usize,
    }

    impl MockBackend {
        fn ready() -> Self {
            let mut backend = Self::default();
            backend.replace_swapchain().unwrap();
            backend.build_swapchain_resources().unwrap();
            backend.calls.clear();
            backend
        }

        fn count(&self, call: &str) -> usize {
            self.calls.iter().filter(|c| **c == call).count()
        }
    }

    impl FrameBackend for MockBackend {
        fn acquire_next_image(&mut self) -> Result<AcquireOutcome> {
            self.calls.push("acquire");
            Ok(self.acquires.pop_front().unwrap_or(AcquireOutcome::Image {
                index: 0,
                suboptimal: false,
            }))
        }

        fn update_uniforms(&mut self, _: u32) -> Result<()> {
            self.calls.push("uniforms");
            Ok(())
        }

        fn submit(&mut self, _: u32) -> Result<()> {
            self.calls.push("submit");
            Ok(())
        }

        fn present(&mut self, _: u32) -> Result<PresentOutcome> {
            self.calls.push("present");
            Ok(self.presents.pop_front().unwrap_or(PresentOutcome::Presented))
        }

        fn wait_idle(&mut self) -> Result<()> {
            self.calls.push("wait_idle");
            Ok(())
        }

        fn release_swapchain_resources(&mut self) {
            self.calls.push("release");
            self.views = 0;
            self.render_passes = 0;
            self.pipelines = 0;
            self.command_buffers = 0;
        }

        fn replace_swapchain(&mut self) -> Result<()> {
            self.calls.push("replace");
            assert_eq!(self.views, 0, "image views of the old chain still alive");
            assert_eq!(self.render_passes, 0, "render pass outlives its swapchain");

            let id = self.next_swapchain;
            self.next_swapchain += 1;
            self.live_swapchains.push(id);
            // The old chain is retired only once the new one exists.
            self.live_swapchains.retain(|live| *live == id);
            self.views = IMAGE_COUNT;
            Ok(())
        }

        fn build_swapchain_resources(&mut self) -> Result<()> {
            self.calls.push("build");
            assert_eq!(self.views, IMAGE_COUNT, "building against a released chain");
            assert_eq!(self.render_passes, 0, "render pass built twice");
            assert_eq!(self.pipelines, 0, "pipeline built twice");
            assert_eq!(self.command_buffers, 0, "command buffers recorded twice");

            self.render_passes = 1;
            self.pipelines = 1;
            self.command_buffers = IMAGE_COUNT;
            Ok(())
        }
    }

    #[test]
    fn acquire_codes_map_to_outcomes() {
        assert_eq!(
            acquire_outcome(Ok((2, vk::SuccessCode::SUCCESS))).unwrap(),
            AcquireOutcome::Image {
                index: 2,
                suboptimal: false
            }
        );
        assert_eq!(
            acquire_outcome(Ok((1, vk::SuccessCode::SUBOPTIMAL_KHR))).unwrap(),
            AcquireOutcome::Image {
                index: 1,
                suboptimal: true
            }
        );
        assert_eq!(
            acquire_outcome(Err(vk::ErrorCode::OUT_OF_DATE_KHR)).unwrap(),
            AcquireOutcome::OutOfDate
        );

        let error = acquire_outcome(Err(vk::ErrorCode::DEVICE_LOST)).unwrap_err();
        assert!(matches!(
            error.downcast_ref::<GfxError>(),
            Some(GfxError::SwapchainAcquire(vk::ErrorCode::DEVICE_LOST))
        ));
    }

    #[test]
    fn present_codes_map_to_outcomes() {
        assert_eq!(
            present_outcome(Ok(vk::SuccessCode::SUCCESS)).unwrap(),
            PresentOutcome::Presented
        );
        assert_eq!(
            present_outcome(Ok(vk::SuccessCode::SUBOPTIMAL_KHR)).unwrap(),
            PresentOutcome::NeedsRecreate
        );
        assert_eq!(
            present_outcome(Err(vk::ErrorCode::OUT_OF_DATE_KHR)).unwrap(),
            PresentOutcome::NeedsRecreate
        );
        assert!(present_outcome(Err(vk::ErrorCode::SURFACE_LOST_KHR)).is_err());
    }

    #[test]
    fn presented_frame_follows_protocol_order() {
        let mut backend = MockBackend::ready();
        let mut frames = FrameLoop::default();

        assert_eq!(frames.tick(&mut backend).unwrap(), FrameOutcome::Presented);
        assert_eq!(backend.calls, ["acquire", "uniforms", "submit", "present"]);
        assert_eq!(frames.state(), FrameState::Idle);
    }

    #[test]
    fn out_of_date_acquire_abandons_frame_and_recreates_once() {
        let mut backend = MockBackend::ready();
        backend.acquires.push_back(AcquireOutcome::OutOfDate);
        let mut frames = FrameLoop::default();

        assert_eq!(frames.tick(&mut backend).unwrap(), FrameOutcome::Abandoned);
        assert_eq!(backend.count("submit"), 0);
        assert_eq!(backend.count("present"), 0);
        assert_eq!(backend.count("replace"), 1);
        assert_eq!(
            backend.calls,
            ["acquire", "wait_idle", "release", "replace", "build"]
        );
    }

    #[test]
    fn suboptimal_acquire_still_renders() {
        let mut backend = MockBackend::ready();
        backend.acquires.push_back(AcquireOutcome::Image {
            index: 1,
            suboptimal: true,
        });
        let mut frames = FrameLoop::default();

        assert_eq!(frames.tick(&mut backend).unwrap(), FrameOutcome::Presented);
        assert_eq!(backend.count("present"), 1);
        assert_eq!(backend.count("replace"), 0);
    }

    #[test]
    fn stale_present_triggers_recreation() {
        let mut backend = MockBackend::ready();
        backend.presents.push_back(PresentOutcome::NeedsRecreate);
        let mut frames = FrameLoop::default();

        assert_eq!(frames.tick(&mut backend).unwrap(), FrameOutcome::Recreated);
        assert_eq!(backend.count("replace"), 1);

        assert_eq!(frames.tick(&mut backend).unwrap(), FrameOutcome::Presented);
        assert_eq!(backend.count("replace"), 1);
    }

    #[test]
    fn resize_is_handled_after_present() {
        let mut backend = MockBackend::ready();
        let mut frames = FrameLoop::default();

        frames.notify_resized();
        frames.notify_resized();
        assert!(frames.resize_pending());

        assert_eq!(frames.tick(&mut backend).unwrap(), FrameOutcome::Recreated);
        assert_eq!(
            backend.calls,
            ["acquire", "uniforms", "submit", "present", "wait_idle", "release", "replace", "build"]
        );
        assert!(!frames.resize_pending());
    }

    #[test]
    fn repeated_resizes_leave_one_generation_alive() {
        let mut backend = MockBackend::ready();
        let mut frames = FrameLoop::default();

        for _ in 0..10 {
            frames.notify_resized();
            frames.tick(&mut backend).unwrap();
        }

        assert_eq!(backend.count("replace"), 10);
        assert_eq!(backend.live_swapchains, [10]);
        assert_eq!(backend.render_passes, 1);
        assert_eq!(backend.pipelines, 1);
        assert_eq!(backend.command_buffers, IMAGE_COUNT);
    }

    #[test]
    #[should_panic(expected = "image views of the old chain still alive")]
    fn replacing_without_release_is_caught() {
        let mut backend = MockBackend::ready();
        backend.replace_swapchain().unwrap();
    }

    #[test]
    #[should_panic(expected = "render pass built twice")]
    fn building_twice_is_caught() {
        let mut backend = MockBackend::ready();
        backend.build_swapchain_resources().unwrap();
    }

    #[test]
    fn backend_errors_propagate() {
        struct Lost;

        impl FrameBackend for Lost {
            fn acquire_next_image(&mut self) -> Result<AcquireOutcome> {
                acquire_outcome(Err(vk::ErrorCode::DEVICE_LOST))
            }
            fn update_uniforms(&mut self, _: u32) -> Result<()> {
                unreachable!()
            }
            fn submit(&mut self, _: u32) -> Result<()> {
                unreachable!()
            }
            fn present(&mut self, _: u32) -> Result<PresentOutcome> {
                unreachable!()
            }
            fn wait_idle(&mut self) -> Result<()> {
                unreachable!()
            }
            fn release_swapchain_resources(&mut self) {
                unreachable!()
            }
            fn replace_swapchain(&mut self) -> Result<()> {
                unreachable!()
            }
            fn build_swapchain_resources(&mut self) -> Result<()> {
                unreachable!()
            }
        }

        let error = FrameLoop::default().tick(&mut Lost).unwrap_err();
        assert!(error.downcast_ref::<GfxError>().is_some());
    }
}
