//! Render passes and offscreen render targets.
//!
//! Both passes load and store their single colour attachment, so drawing
//! can resume on a target after switching away from it mid-frame.

use ash::vk;
use log::debug;
use std::collections::HashMap;

use super::memory::TEXTURE_FORMAT;
use crate::error::{Result, VkResultExt};

/// One-subpass colour pass that keeps `layout` on entry and exit.
unsafe fn create_color_pass(
    device: &ash::Device,
    format: vk::Format,
    layout: vk::ImageLayout,
    dependencies: &[vk::SubpassDependency],
) -> Result<vk::RenderPass> {
    let attachments = [vk::AttachmentDescription::default()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::LOAD)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(layout)
        .final_layout(layout)];

    let color_refs = [vk::AttachmentReference::default()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];

    let subpasses = [vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs)];

    let info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(dependencies);

    device.create_render_pass(&info, None).context("vkCreateRenderPass")
}

/// # Safety
/// The device must be alive.
pub unsafe fn create_swapchain_pass(device: &ash::Device, format: vk::Format) -> Result<vk::RenderPass> {
    let dependencies = [vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE)];
    create_color_pass(device, format, vk::ImageLayout::PRESENT_SRC_KHR, &dependencies)
}

/// Pass for rendering into textures, which live in SHADER_READ_ONLY between
/// passes.
///
/// # Safety
/// The device must be alive.
pub unsafe fn create_offscreen_pass(device: &ash::Device) -> Result<vk::RenderPass> {
    let dependencies = [
        vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER | vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::SHADER_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE),
        vk::SubpassDependency::default()
            .src_subpass(0)
            .dst_subpass(vk::SUBPASS_EXTERNAL)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER)
            .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .dst_access_mask(vk::AccessFlags::SHADER_READ),
    ];
    create_color_pass(device, TEXTURE_FORMAT, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, &dependencies)
}

/// # Safety
/// `view` must be alive and at least `extent` in size.
pub unsafe fn create_framebuffer(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    view: vk::ImageView,
    extent: vk::Extent2D,
) -> Result<vk::Framebuffer> {
    let attachments = [view];
    let info = vk::FramebufferCreateInfo::default()
        .render_pass(render_pass)
        .attachments(&attachments)
        .width(extent.width)
        .height(extent.height)
        .layers(1);
    device.create_framebuffer(&info, None).context("vkCreateFramebuffer")
}

// ============================================================================
// Offscreen targets
// ============================================================================

/// Colour attachment of a GL framebuffer, as last reported by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorAttachment {
    pub texture: u32,
    pub width: u32,
    pub height: u32,
}

/// The texture a target renders into, as currently allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetImage {
    pub view: vk::ImageView,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug)]
struct CachedTarget<F> {
    framebuffer: F,
    texture: u32,
    view: vk::ImageView,
    extent: vk::Extent2D,
}

/// A resolved offscreen target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundTarget<F> {
    pub framebuffer: F,
    pub extent: vk::Extent2D,
}

/// Attachments and their cached framebuffers, keyed by GL framebuffer id.
///
/// Framebuffer creation and destruction are passed in so the cache logic
/// does not depend on a device.
pub struct RenderTargets<F> {
    attachments: HashMap<u32, ColorAttachment>,
    cached: HashMap<u32, CachedTarget<F>>,
}

impl<F> Default for RenderTargets<F> {
    fn default() -> Self {
        Self {
            attachments: HashMap::new(),
            cached: HashMap::new(),
        }
    }
}

impl<F: Copy> RenderTargets<F> {
    /// Record `framebuffer`'s colour attachment. A zero texture or size
    /// detaches it. Returns whether anything changed.
    pub fn set_attachment(&mut self, framebuffer: u32, attachment: ColorAttachment, destroy: impl FnMut(F)) -> bool {
        if framebuffer == 0 {
            return false;
        }
        if attachment.texture == 0 || attachment.width == 0 || attachment.height == 0 {
            return self.remove(framebuffer, destroy);
        }
        if self.attachments.get(&framebuffer) == Some(&attachment) {
            return false;
        }
        self.drop_cached(framebuffer, destroy);
        self.attachments.insert(framebuffer, attachment);
        true
    }

    /// Forget a framebuffer entirely. Returns whether it had an attachment.
    pub fn remove(&mut self, framebuffer: u32, destroy: impl FnMut(F)) -> bool {
        self.drop_cached(framebuffer, destroy);
        self.attachments.remove(&framebuffer).is_some()
    }

    pub fn attachment(&self, framebuffer: u32) -> Option<ColorAttachment> {
        self.attachments.get(&framebuffer).copied()
    }

    /// The framebuffer to render `framebuffer` into, rebuilt when the
    /// texture's image or the attachment size changed. `None` when there is
    /// no attachment or its texture does not exist.
    pub fn resolve(
        &mut self,
        framebuffer: u32,
        lookup: impl FnOnce(u32) -> Option<TargetImage>,
        create: impl FnOnce(vk::ImageView, vk::Extent2D) -> Result<F>,
        destroy: impl FnMut(F),
    ) -> Result<Option<BoundTarget<F>>> {
        let Some(attachment) = self.attachments.get(&framebuffer).copied() else {
            return Ok(None);
        };
        let Some(image) = lookup(attachment.texture) else {
            return Ok(None);
        };

        // The framebuffer can not be larger than the image it wraps.
        let extent = vk::Extent2D {
            width: attachment.width.min(image.width),
            height: attachment.height.min(image.height),
        };

        if let Some(cached) = self.cached.get(&framebuffer) {
            if cached.texture == attachment.texture && cached.view == image.view && cached.extent == extent {
                return Ok(Some(BoundTarget {
                    framebuffer: cached.framebuffer,
                    extent,
                }));
            }
        }

        self.drop_cached(framebuffer, destroy);
        let handle = create(image.view, extent)?;
        debug!(
            "offscreen target fb={framebuffer} tex={} {}x{}",
            attachment.texture, extent.width, extent.height
        );
        self.cached.insert(
            framebuffer,
            CachedTarget {
                framebuffer: handle,
                texture: attachment.texture,
                view: image.view,
                extent,
            },
        );
        Ok(Some(BoundTarget {
            framebuffer: handle,
            extent,
        }))
    }

    /// Drop cached framebuffers built on `texture`; attachments stay.
    pub fn forget_texture(&mut self, texture: u32, mut destroy: impl FnMut(F)) {
        self.cached.retain(|_, cached| {
            if cached.texture == texture {
                destroy(cached.framebuffer);
                false
            } else {
                true
            }
        });
    }

    /// Framebuffer ids whose attachment is `texture`.
    pub fn framebuffers_using(&self, texture: u32) -> Vec<u32> {
        self.attachments
            .iter()
            .filter(|(_, attachment)| attachment.texture == texture)
            .map(|(&framebuffer, _)| framebuffer)
            .collect()
    }

    pub fn cached_count(&self) -> usize {
        self.cached.len()
    }

    pub fn destroy_all(&mut self, mut destroy: impl FnMut(F)) {
        for (_, cached) in self.cached.drain() {
            destroy(cached.framebuffer);
        }
        self.attachments.clear();
    }

    fn drop_cached(&mut self, framebuffer: u32, mut destroy: impl FnMut(F)) {
        if let Some(cached) = self.cached.remove(&framebuffer) {
            destroy(cached.framebuffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use std::cell::RefCell;

    fn attachment(texture: u32, width: u32, height: u32) -> ColorAttachment {
        ColorAttachment { texture, width, height }
    }

    fn image(view: u64, width: u32, height: u32) -> Option<TargetImage> {
        Some(TargetImage {
            view: vk::ImageView::from_raw(view),
            width,
            height,
        })
    }

    /// Counts framebuffers handed out and destroyed.
    #[derive(Default)]
    struct Ledger {
        next: u32,
        destroyed: RefCell<Vec<u32>>,
    }

    impl Ledger {
        fn create(&mut self) -> impl FnOnce(vk::ImageView, vk::Extent2D) -> Result<u32> + '_ {
            move |_, _| {
                self.next += 1;
                Ok(self.next)
            }
        }

        fn destroy(&self) -> impl FnMut(u32) + '_ {
            move |fb| self.destroyed.borrow_mut().push(fb)
        }
    }

    // ============================================================
    // Attachments
    // ============================================================

    #[test]
    fn test_default_framebuffer_is_ignored() {
        let ledger = Ledger::default();
        let mut targets = RenderTargets::<u32>::default();
        assert!(!targets.set_attachment(0, attachment(3, 8, 8), ledger.destroy()));
        assert!(targets.attachment(0).is_none());
    }

    #[test]
    fn test_zero_texture_detaches() {
        let mut ledger = Ledger::default();
        let mut targets = RenderTargets::default();
        targets.set_attachment(4, attachment(3, 8, 8), ledger.destroy());
        let create = ledger.create();
        targets.resolve(4, |_| image(10, 8, 8), create, |_| {}).unwrap();

        assert!(targets.set_attachment(4, attachment(0, 8, 8), ledger.destroy()));
        assert!(targets.attachment(4).is_none());
        assert_eq!(*ledger.destroyed.borrow(), vec![1]);
        assert_eq!(targets.cached_count(), 0);
    }

    #[test]
    fn test_changed_attachment_drops_target() {
        let mut ledger = Ledger::default();
        let mut targets = RenderTargets::default();
        targets.set_attachment(4, attachment(3, 8, 8), ledger.destroy());
        let create = ledger.create();
        targets.resolve(4, |_| image(10, 8, 8), create, |_| {}).unwrap();

        assert!(!targets.set_attachment(4, attachment(3, 8, 8), ledger.destroy()));
        assert!(ledger.destroyed.borrow().is_empty());
        assert!(targets.set_attachment(4, attachment(5, 8, 8), ledger.destroy()));
        assert_eq!(*ledger.destroyed.borrow(), vec![1]);
    }

    // ============================================================
    // Resolution
    // ============================================================

    #[test]
    fn test_resolve_caches_framebuffer() {
        let mut ledger = Ledger::default();
        let mut targets = RenderTargets::default();
        targets.set_attachment(2, attachment(3, 16, 8), |_| {});

        let first = targets
            .resolve(2, |_| image(10, 16, 8), ledger.create(), |_| {})
            .unwrap()
            .unwrap();
        let second = targets
            .resolve(2, |_| image(10, 16, 8), ledger.create(), |_| {})
            .unwrap()
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(first.extent, vk::Extent2D { width: 16, height: 8 });
        assert_eq!(ledger.next, 1);
    }

    #[test]
    fn test_new_image_view_rebuilds() {
        let mut ledger = Ledger::default();
        let mut targets = RenderTargets::default();
        targets.set_attachment(2, attachment(3, 16, 8), |_| {});
        targets.resolve(2, |_| image(10, 16, 8), ledger.create(), |_| {}).unwrap();

        let destroyed = RefCell::new(Vec::new());
        let rebuilt = targets
            .resolve(2, |_| image(11, 16, 8), ledger.create(), |fb| destroyed.borrow_mut().push(fb))
            .unwrap()
            .unwrap();
        assert_eq!(rebuilt.framebuffer, 2);
        assert_eq!(*destroyed.borrow(), vec![1]);
    }

    #[test]
    fn test_extent_clamped_to_image() {
        let mut ledger = Ledger::default();
        let mut targets = RenderTargets::default();
        targets.set_attachment(2, attachment(3, 64, 64), |_| {});
        let bound = targets
            .resolve(2, |_| image(10, 32, 128), ledger.create(), |_| {})
            .unwrap()
            .unwrap();
        assert_eq!(bound.extent, vk::Extent2D { width: 32, height: 64 });
    }

    #[test]
    fn test_missing_attachment_or_texture() {
        let mut ledger = Ledger::default();
        let mut targets = RenderTargets::<u32>::default();
        assert!(targets.resolve(9, |_| image(1, 1, 1), ledger.create(), |_| {}).unwrap().is_none());

        targets.set_attachment(9, attachment(3, 4, 4), |_| {});
        assert!(targets.resolve(9, |_| None, ledger.create(), |_| {}).unwrap().is_none());
        assert_eq!(ledger.next, 0);
    }

    #[test]
    fn test_forget_texture_keeps_attachment() {
        let mut ledger = Ledger::default();
        let mut targets = RenderTargets::default();
        targets.set_attachment(2, attachment(3, 4, 4), |_| {});
        targets.set_attachment(5, attachment(7, 4, 4), |_| {});
        targets.resolve(2, |_| image(10, 4, 4), ledger.create(), |_| {}).unwrap();
        targets.resolve(5, |_| image(11, 4, 4), ledger.create(), |_| {}).unwrap();

        targets.forget_texture(3, ledger.destroy());
        assert_eq!(*ledger.destroyed.borrow(), vec![1]);
        assert_eq!(targets.cached_count(), 1);
        assert_eq!(targets.attachment(2), Some(attachment(3, 4, 4)));
        assert_eq!(targets.framebuffers_using(7), vec![5]);
    }
}
