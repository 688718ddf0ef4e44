//! Texture table, staging uploads and the Vulkan texture device.

use ash::vk;
use gpu_allocator::vulkan::Allocation;
use log::debug;
use std::borrow::Cow;
use std::collections::HashMap;

use super::commands::{self, CommandManager};
use super::memory::{Image, MemoryManager};
use super::pipeline::SpritePipelines;
use super::retire::Retired;
use super::samplers::SamplerCache;
use super::stream::{HostBuffer, HostBufferAllocator, HostBufferUsage};
use crate::adapter::{SamplerParams, TextureSubUpload, TextureUpload};
use crate::error::Result;

/// Smallest staging buffer ever allocated.
const MIN_STAGING_BYTES: u64 = 64 * 1024;

/// Rectangle of texels in a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl TextureRegion {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

/// GPU operations the texture table needs.
pub trait TextureDevice {
    type Texture;

    fn create(&mut self, width: u32, height: u32, sampler: SamplerParams) -> Result<Self::Texture>;
    /// `pixels` holds exactly `region.byte_len()` RGBA8 bytes.
    fn write(&mut self, texture: &mut Self::Texture, region: TextureRegion, pixels: &[u8]) -> Result<()>;
    fn clear(&mut self, texture: &mut Self::Texture) -> Result<()>;
    fn set_sampler(&mut self, texture: &mut Self::Texture, sampler: SamplerParams) -> Result<()>;
    fn wait_idle(&mut self);
    fn destroy(&mut self, texture: Self::Texture);
}

/// What an upload did to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Created,
    /// Same size; contents and sampler updated in place.
    Updated,
    /// Size changed; the old image is gone and anything referring to it
    /// must be rebuilt.
    Recreated,
    Ignored,
}

pub struct TextureEntry<T> {
    pub texture: T,
    pub width: u32,
    pub height: u32,
    pub sampler: SamplerParams,
}

/// `pixels` truncated or zero-padded to `len` bytes.
pub fn padded_pixels(pixels: &[u8], len: usize) -> Cow<'_, [u8]> {
    if pixels.len() >= len {
        Cow::Borrowed(&pixels[..len])
    } else {
        let mut padded = Vec::with_capacity(len);
        padded.extend_from_slice(pixels);
        padded.resize(len, 0);
        Cow::Owned(padded)
    }
}

/// GPU textures by GL id.
pub struct TextureTable<T> {
    entries: HashMap<u32, TextureEntry<T>>,
}

impl<T> Default for TextureTable<T> {
    fn default() -> Self {
        Self { entries: HashMap::new() }
    }
}

impl<T> TextureTable<T> {
    pub fn get(&self, id: u32) -> Option<&TextureEntry<T>> {
        self.entries.get(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn upload<D>(&mut self, device: &mut D, upload: &TextureUpload<'_>) -> Result<UploadOutcome>
    where
        D: TextureDevice<Texture = T>,
    {
        if upload.width == 0 || upload.height == 0 {
            debug!("ignoring empty upload to texture {}", upload.id);
            return Ok(UploadOutcome::Ignored);
        }
        let region = TextureRegion::full(upload.width, upload.height);

        if let Some(entry) = self.entries.get_mut(&upload.id) {
            if entry.width == upload.width && entry.height == upload.height {
                if let Some(pixels) = upload.pixels {
                    device.write(&mut entry.texture, region, &padded_pixels(pixels, region.byte_len()))?;
                }
                if entry.sampler != upload.sampler {
                    device.set_sampler(&mut entry.texture, upload.sampler)?;
                    entry.sampler = upload.sampler;
                }
                return Ok(UploadOutcome::Updated);
            }
        }

        let outcome = match self.entries.remove(&upload.id) {
            Some(old) => {
                debug!(
                    "texture {} resized {}x{} -> {}x{}",
                    upload.id, old.width, old.height, upload.width, upload.height
                );
                device.wait_idle();
                device.destroy(old.texture);
                UploadOutcome::Recreated
            }
            None => UploadOutcome::Created,
        };

        let mut texture = device.create(upload.width, upload.height, upload.sampler)?;
        let filled = match upload.pixels {
            Some(pixels) => device.write(&mut texture, region, &padded_pixels(pixels, region.byte_len())),
            None => device.clear(&mut texture),
        };
        if let Err(err) = filled {
            device.destroy(texture);
            return Err(err);
        }

        self.entries.insert(
            upload.id,
            TextureEntry {
                texture,
                width: upload.width,
                height: upload.height,
                sampler: upload.sampler,
            },
        );
        Ok(outcome)
    }

    /// Write a sub-rectangle. Unknown textures and out-of-bounds regions are
    /// ignored.
    pub fn upload_sub<D>(&mut self, device: &mut D, upload: &TextureSubUpload<'_>) -> Result<UploadOutcome>
    where
        D: TextureDevice<Texture = T>,
    {
        let Some(entry) = self.entries.get_mut(&upload.id) else {
            return Ok(UploadOutcome::Ignored);
        };

        let in_bounds = upload.width > 0
            && upload.height > 0
            && upload.x.checked_add(upload.width).is_some_and(|right| right <= entry.width)
            && upload.y.checked_add(upload.height).is_some_and(|bottom| bottom <= entry.height);
        if !in_bounds {
            return Ok(UploadOutcome::Ignored);
        }

        if entry.sampler != upload.sampler {
            device.set_sampler(&mut entry.texture, upload.sampler)?;
            entry.sampler = upload.sampler;
        }

        if let Some(pixels) = upload.pixels {
            let region = TextureRegion {
                x: upload.x,
                y: upload.y,
                width: upload.width,
                height: upload.height,
            };
            device.write(&mut entry.texture, region, &padded_pixels(pixels, region.byte_len()))?;
        }
        Ok(UploadOutcome::Updated)
    }

    pub fn set_sampler<D>(&mut self, device: &mut D, id: u32, sampler: SamplerParams) -> Result<()>
    where
        D: TextureDevice<Texture = T>,
    {
        match self.entries.get_mut(&id) {
            Some(entry) if entry.sampler != sampler => {
                device.set_sampler(&mut entry.texture, sampler)?;
                entry.sampler = sampler;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Returns whether the texture existed.
    pub fn destroy<D>(&mut self, device: &mut D, id: u32) -> bool
    where
        D: TextureDevice<Texture = T>,
    {
        match self.entries.remove(&id) {
            Some(entry) => {
                device.wait_idle();
                device.destroy(entry.texture);
                true
            }
            None => false,
        }
    }

    /// Destroy every texture. The device must already be idle.
    pub fn destroy_all<D>(&mut self, device: &mut D)
    where
        D: TextureDevice<Texture = T>,
    {
        for (_, entry) in self.entries.drain() {
            device.destroy(entry.texture);
        }
    }
}

// ============================================================================
// Staging
// ============================================================================

/// One host buffer reused for every upload, grown on demand.
pub struct TextureStaging<M> {
    buffer: Option<HostBuffer<M>>,
}

impl<M> Default for TextureStaging<M> {
    fn default() -> Self {
        Self { buffer: None }
    }
}

pub fn staging_capacity(required: u64) -> u64 {
    required.max(MIN_STAGING_BYTES).next_power_of_two()
}

impl<M> TextureStaging<M> {
    /// Copy `bytes` to the start of the staging buffer and return its handle.
    /// The previous upload must have completed.
    pub fn stage<A>(&mut self, allocator: &mut A, bytes: &[u8]) -> Result<vk::Buffer>
    where
        A: HostBufferAllocator<Memory = M>,
    {
        let required = bytes.len() as u64;
        if self.buffer.as_ref().is_some_and(|buffer| buffer.capacity < required) {
            if let Some(old) = self.buffer.take() {
                allocator.release(old);
            }
        }

        let buffer = match self.buffer.take() {
            Some(buffer) => buffer,
            None => allocator.allocate(staging_capacity(required), HostBufferUsage::Staging)?,
        };
        let buffer = self.buffer.insert(buffer);
        allocator.write(buffer, 0, bytes)?;
        Ok(buffer.handle)
    }

    pub fn capacity(&self) -> u64 {
        self.buffer.as_ref().map_or(0, |buffer| buffer.capacity)
    }

    pub fn destroy<A>(&mut self, allocator: &mut A)
    where
        A: HostBufferAllocator<Memory = M>,
    {
        if let Some(buffer) = self.buffer.take() {
            allocator.release(buffer);
        }
    }
}

// ============================================================================
// Vulkan texture device
// ============================================================================

/// A sampled texture and the descriptor set that binds it.
pub struct GpuTexture {
    pub image: Image,
    pub layout: vk::ImageLayout,
    pub descriptor_set: vk::DescriptorSet,
}

/// Borrowed view of the runtime parts a texture operation touches.
pub struct GpuTextureDevice<'a> {
    pub device: &'a ash::Device,
    pub memory: &'a mut MemoryManager,
    pub commands: &'a mut CommandManager,
    pub samplers: &'a mut SamplerCache,
    pub pipelines: &'a SpritePipelines,
    pub staging: &'a mut TextureStaging<Allocation>,
    /// Where replaced textures and descriptor sets wait for the frames that
    /// may still sample them.
    pub retired: &'a mut Vec<Retired>,
    /// Incremented per device wait.
    pub wait_idles: &'a mut u32,
}

impl GpuTextureDevice<'_> {
    /// Move `texture` to TRANSFER_DST, run `record`, and return it to
    /// SHADER_READ_ONLY.
    unsafe fn transfer<F>(&mut self, texture: &mut GpuTexture, record: F) -> Result<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer, vk::Image),
    {
        let image = texture.image.handle;
        let old_layout = texture.layout;
        self.commands.run_single_time(|device, cmd| {
            commands::transition_image_layout(device, cmd, image, old_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
            record(device, cmd, image);
            commands::transition_image_layout(
                device,
                cmd,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            );
        })?;
        texture.layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
        Ok(())
    }
}

impl TextureDevice for GpuTextureDevice<'_> {
    type Texture = GpuTexture;

    fn create(&mut self, width: u32, height: u32, sampler: SamplerParams) -> Result<GpuTexture> {
        unsafe {
            let mut image = self.memory.create_color_image(vk::Extent2D { width, height }, "texture")?;
            let set = self
                .samplers
                .get_or_create(sampler)
                .and_then(|vk_sampler| self.pipelines.allocate_texture_set(image.view, vk_sampler));
            match set {
                Ok(descriptor_set) => Ok(GpuTexture {
                    image,
                    layout: vk::ImageLayout::UNDEFINED,
                    descriptor_set,
                }),
                Err(err) => {
                    self.memory.destroy_image(&mut image);
                    Err(err)
                }
            }
        }
    }

    fn write(&mut self, texture: &mut GpuTexture, region: TextureRegion, pixels: &[u8]) -> Result<()> {
        unsafe {
            let staging = self.staging.stage(&mut *self.memory, pixels)?;
            self.transfer(texture, |device, cmd, image| {
                commands::copy_buffer_to_image(
                    device,
                    cmd,
                    staging,
                    0,
                    image,
                    vk::Offset2D {
                        x: region.x as i32,
                        y: region.y as i32,
                    },
                    vk::Extent2D {
                        width: region.width,
                        height: region.height,
                    },
                );
            })
        }
    }

    fn clear(&mut self, texture: &mut GpuTexture) -> Result<()> {
        unsafe {
            self.transfer(texture, |device, cmd, image| {
                let clear = vk::ClearColorValue { float32: [0.0; 4] };
                device.cmd_clear_color_image(
                    cmd,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &clear,
                    &[commands::COLOR_RANGE],
                );
            })
        }
    }

    /// Recorded draws keep the old descriptor set, so the new sampler goes
    /// into a fresh one.
    fn set_sampler(&mut self, texture: &mut GpuTexture, sampler: SamplerParams) -> Result<()> {
        unsafe {
            let vk_sampler = self.samplers.get_or_create(sampler)?;
            let set = self.pipelines.allocate_texture_set(texture.image.view, vk_sampler)?;
            let old = std::mem::replace(&mut texture.descriptor_set, set);
            self.retired.push(Retired::DescriptorSet(old));
        }
        Ok(())
    }

    fn wait_idle(&mut self) {
        unsafe {
            if let Err(err) = self.device.device_wait_idle() {
                log::warn!("vkDeviceWaitIdle failed: {err:?}");
            }
        }
        *self.wait_idles += 1;
    }

    fn destroy(&mut self, texture: GpuTexture) {
        self.retired.push(Retired::Texture(texture));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gl::consts::{CLAMP_TO_EDGE, NEAREST};
    use crate::runtime::stream::tests::MockAllocator;

    #[derive(Debug, Default)]
    struct MockDevice {
        next_id: u32,
        created: Vec<(u32, u32, u32)>,
        destroyed: Vec<u32>,
        writes: Vec<(u32, TextureRegion, Vec<u8>)>,
        clears: Vec<u32>,
        sampler_changes: Vec<(u32, SamplerParams)>,
        wait_idles: u32,
    }

    impl TextureDevice for MockDevice {
        type Texture = u32;

        fn create(&mut self, width: u32, height: u32, _sampler: SamplerParams) -> Result<u32> {
            self.next_id += 1;
            self.created.push((self.next_id, width, height));
            Ok(self.next_id)
        }

        fn write(&mut self, texture: &mut u32, region: TextureRegion, pixels: &[u8]) -> Result<()> {
            assert_eq!(pixels.len(), region.byte_len());
            self.writes.push((*texture, region, pixels.to_vec()));
            Ok(())
        }

        fn clear(&mut self, texture: &mut u32) -> Result<()> {
            self.clears.push(*texture);
            Ok(())
        }

        fn set_sampler(&mut self, texture: &mut u32, sampler: SamplerParams) -> Result<()> {
            self.sampler_changes.push((*texture, sampler));
            Ok(())
        }

        fn wait_idle(&mut self) {
            self.wait_idles += 1;
        }

        fn destroy(&mut self, texture: u32) {
            self.destroyed.push(texture);
        }
    }

    fn upload(id: u32, width: u32, height: u32, pixels: Option<&[u8]>) -> TextureUpload<'_> {
        TextureUpload {
            id,
            width,
            height,
            pixels,
            sampler: SamplerParams::default(),
        }
    }

    fn sub(id: u32, rect: [u32; 4], pixels: Option<&[u8]>) -> TextureSubUpload<'_> {
        TextureSubUpload {
            id,
            x: rect[0],
            y: rect[1],
            width: rect[2],
            height: rect[3],
            pixels,
            sampler: SamplerParams::default(),
        }
    }

    // ============================================================
    // Full uploads
    // ============================================================

    #[test]
    fn test_first_upload_creates() {
        let mut device = MockDevice::default();
        let mut table = TextureTable::default();
        let pixels = [0xAB; 16];

        let outcome = table.upload(&mut device, &upload(5, 2, 2, Some(&pixels))).unwrap();
        assert_eq!(outcome, UploadOutcome::Created);
        assert_eq!(device.created, vec![(1, 2, 2)]);
        assert_eq!(device.writes.len(), 1);
        assert_eq!(table.get(5).map(|e| (e.width, e.height)), Some((2, 2)));
    }

    #[test]
    fn test_same_size_updates_in_place() {
        let mut device = MockDevice::default();
        let mut table = TextureTable::default();
        table.upload(&mut device, &upload(5, 2, 2, None)).unwrap();

        let pixels = [1u8; 16];
        let outcome = table.upload(&mut device, &upload(5, 2, 2, Some(&pixels))).unwrap();
        assert_eq!(outcome, UploadOutcome::Updated);
        assert_eq!(device.created.len(), 1);
        assert!(device.destroyed.is_empty());
        assert_eq!(device.wait_idles, 0);
        assert_eq!(device.writes[0].0, 1);
    }

    #[test]
    fn test_resize_waits_and_recreates() {
        let mut device = MockDevice::default();
        let mut table = TextureTable::default();
        table.upload(&mut device, &upload(5, 2, 2, None)).unwrap();

        let outcome = table.upload(&mut device, &upload(5, 4, 4, None)).unwrap();
        assert_eq!(outcome, UploadOutcome::Recreated);
        assert_eq!(device.wait_idles, 1);
        assert_eq!(device.destroyed, vec![1]);
        assert_eq!(device.created, vec![(1, 2, 2), (2, 4, 4)]);
        assert_eq!(device.clears, vec![1, 2]);
    }

    #[test]
    fn test_short_pixels_are_zero_padded() {
        let mut device = MockDevice::default();
        let mut table = TextureTable::default();
        table.upload(&mut device, &upload(1, 2, 1, Some(&[9, 9, 9]))).unwrap();
        assert_eq!(device.writes[0].2, vec![9, 9, 9, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_sampler_change_on_reupload() {
        let mut device = MockDevice::default();
        let mut table = TextureTable::default();
        table.upload(&mut device, &upload(3, 1, 1, None)).unwrap();

        let mut again = upload(3, 1, 1, None);
        again.sampler.wrap_s = CLAMP_TO_EDGE;
        table.upload(&mut device, &again).unwrap();
        table.upload(&mut device, &again).unwrap();

        assert_eq!(device.sampler_changes.len(), 1);
    }

    #[test]
    fn test_empty_upload_ignored() {
        let mut device = MockDevice::default();
        let mut table: TextureTable<u32> = TextureTable::default();
        let outcome = table.upload(&mut device, &upload(3, 0, 4, None)).unwrap();
        assert_eq!(outcome, UploadOutcome::Ignored);
        assert_eq!(table.len(), 0);
    }

    // ============================================================
    // Sub uploads, samplers, destroy
    // ============================================================

    #[test]
    fn test_sub_upload_writes_region() {
        let mut device = MockDevice::default();
        let mut table = TextureTable::default();
        table.upload(&mut device, &upload(2, 4, 4, None)).unwrap();

        let pixels = [7u8; 8];
        let outcome = table.upload_sub(&mut device, &sub(2, [1, 2, 2, 1], Some(&pixels))).unwrap();
        assert_eq!(outcome, UploadOutcome::Updated);
        let (_, region, bytes) = &device.writes[0];
        assert_eq!(
            *region,
            TextureRegion {
                x: 1,
                y: 2,
                width: 2,
                height: 1
            }
        );
        assert_eq!(bytes.len(), 8);
    }

    #[test]
    fn test_sub_upload_out_of_bounds_or_unknown() {
        let mut device = MockDevice::default();
        let mut table = TextureTable::default();
        table.upload(&mut device, &upload(2, 4, 4, None)).unwrap();

        let pixels = [7u8; 64];
        assert_eq!(
            table.upload_sub(&mut device, &sub(2, [3, 0, 2, 1], Some(&pixels))).unwrap(),
            UploadOutcome::Ignored
        );
        assert_eq!(
            table.upload_sub(&mut device, &sub(9, [0, 0, 1, 1], Some(&pixels))).unwrap(),
            UploadOutcome::Ignored
        );
        assert!(device.writes.is_empty());
    }

    #[test]
    fn test_set_sampler_only_on_change() {
        let mut device = MockDevice::default();
        let mut table = TextureTable::default();
        table.upload(&mut device, &upload(2, 1, 1, None)).unwrap();

        table.set_sampler(&mut device, 2, SamplerParams::default()).unwrap();
        assert!(device.sampler_changes.is_empty());

        let nearest = SamplerParams {
            min_filter: NEAREST,
            mag_filter: NEAREST,
            ..SamplerParams::default()
        };
        table.set_sampler(&mut device, 2, nearest).unwrap();
        table.set_sampler(&mut device, 77, nearest).unwrap();
        assert_eq!(device.sampler_changes, vec![(1, nearest)]);
        assert_eq!(table.get(2).map(|e| e.sampler.mag_filter), Some(NEAREST));
    }

    #[test]
    fn test_destroy() {
        let mut device = MockDevice::default();
        let mut table = TextureTable::default();
        table.upload(&mut device, &upload(2, 1, 1, None)).unwrap();

        assert!(table.destroy(&mut device, 2));
        assert!(!table.destroy(&mut device, 2));
        assert_eq!(device.destroyed, vec![1]);
        assert_eq!(device.wait_idles, 1);
    }

    // ============================================================
    // Staging
    // ============================================================

    #[test]
    fn test_staging_capacity() {
        assert_eq!(staging_capacity(16), 64 * 1024);
        assert_eq!(staging_capacity(64 * 1024 + 1), 128 * 1024);
    }

    #[test]
    fn test_staging_grows_and_reuses() {
        let mut alloc = MockAllocator::default();
        let mut staging = TextureStaging::default();

        let first = staging.stage(&mut alloc, &[1; 100]).unwrap();
        let second = staging.stage(&mut alloc, &[2; 1000]).unwrap();
        assert_eq!(first, second);
        assert_eq!(staging.capacity(), 64 * 1024);

        let big = vec![3u8; 100 * 1024];
        let third = staging.stage(&mut alloc, &big).unwrap();
        assert_ne!(third, first);
        assert_eq!(staging.capacity(), 128 * 1024);
        assert_eq!(alloc.released.len(), 1);

        staging.destroy(&mut alloc);
        assert!(alloc.live.is_empty());
    }
}
