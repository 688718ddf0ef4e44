//! Sampler cache keyed by the Vulkan state GL sampler parameters map to.

use ash::vk;
use std::collections::HashMap;

use crate::adapter::SamplerParams;
use crate::error::{Result, VkResultExt};
use crate::gl::consts::{CLAMP_TO_EDGE, LINEAR, LINEAR_MIPMAP_LINEAR, LINEAR_MIPMAP_NEAREST, MIRRORED_REPEAT};

/// Vulkan sampler state derived from GL parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerKey {
    pub min_filter: vk::Filter,
    pub mag_filter: vk::Filter,
    pub address_u: vk::SamplerAddressMode,
    pub address_v: vk::SamplerAddressMode,
}

impl From<SamplerParams> for SamplerKey {
    fn from(params: SamplerParams) -> Self {
        Self {
            min_filter: min_filter(params.min_filter),
            mag_filter: mag_filter(params.mag_filter),
            address_u: address_mode(params.wrap_s),
            address_v: address_mode(params.wrap_t),
        }
    }
}

/// Textures have a single level, so the mipmap half of a GL min filter
/// only decides between linear and nearest.
fn min_filter(gl: u32) -> vk::Filter {
    match gl {
        LINEAR | LINEAR_MIPMAP_NEAREST | LINEAR_MIPMAP_LINEAR => vk::Filter::LINEAR,
        _ => vk::Filter::NEAREST,
    }
}

fn mag_filter(gl: u32) -> vk::Filter {
    if gl == LINEAR {
        vk::Filter::LINEAR
    } else {
        vk::Filter::NEAREST
    }
}

fn address_mode(gl: u32) -> vk::SamplerAddressMode {
    match gl {
        CLAMP_TO_EDGE => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        MIRRORED_REPEAT => vk::SamplerAddressMode::MIRRORED_REPEAT,
        _ => vk::SamplerAddressMode::REPEAT,
    }
}

/// Creates samplers on demand and keeps them until [`SamplerCache::destroy`].
pub struct SamplerCache {
    samplers: HashMap<SamplerKey, vk::Sampler>,
    device: ash::Device,
}

impl SamplerCache {
    pub fn new(device: &ash::Device) -> Self {
        Self {
            samplers: HashMap::new(),
            device: device.clone(),
        }
    }

    /// # Safety
    /// The device must be alive.
    pub unsafe fn get_or_create(&mut self, params: SamplerParams) -> Result<vk::Sampler> {
        let key = SamplerKey::from(params);
        if let Some(&sampler) = self.samplers.get(&key) {
            return Ok(sampler);
        }

        let info = vk::SamplerCreateInfo::default()
            .mag_filter(key.mag_filter)
            .min_filter(key.min_filter)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .address_mode_u(key.address_u)
            .address_mode_v(key.address_v)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(false)
            .max_anisotropy(1.0)
            .compare_enable(false)
            .min_lod(0.0)
            .max_lod(0.0)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false);

        let sampler = self.device.create_sampler(&info, None).context("vkCreateSampler")?;
        self.samplers.insert(key, sampler);
        Ok(sampler)
    }

    pub fn len(&self) -> usize {
        self.samplers.len()
    }

    /// # Safety
    /// No descriptor referencing these samplers may still be in use.
    pub unsafe fn destroy(&mut self) {
        for (_, sampler) in self.samplers.drain() {
            self.device.destroy_sampler(sampler, None);
        }
    }
}
