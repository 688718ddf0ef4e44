//! Sprite pipelines, their shared layouts and texture descriptor sets.
//!
//! Pipelines are baked per render target kind, shader variant, vertex
//! layout and blend state, and kept for the runtime's lifetime.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use log::debug;
use std::collections::HashMap;

use crate::adapter::{BlendState, EffectUniforms, ShaderVariant, VertexLayout};
use crate::error::{RenderError, Result, VkResultExt};
use crate::gl::consts::*;

// ============================================================================
// SPIR-V bytecode (compiled at build time by glslc)
// ============================================================================

macro_rules! spv {
    ($name:expr) => {
        include_bytes!(concat!(env!("OUT_DIR"), "/spirv/", $name))
    };
}

const SPRITE_VERT_SPV: &[u8] = spv!("sprite.vert.spv");
const SCREEN_COPY_VERT_SPV: &[u8] = spv!("screen_copy.vert.spv");
const SPRITE_FRAG_SPV: &[u8] = spv!("sprite.frag.spv");
const SCREEN_COPY_FRAG_SPV: &[u8] = spv!("screen_copy.frag.spv");
const SHIELD_FRAG_SPV: &[u8] = spv!("shield.frag.spv");
const BUILD_BEAM_FRAG_SPV: &[u8] = spv!("build_beam.frag.spv");

/// Descriptor sets available for textures at once.
const MAX_TEXTURE_SETS: u32 = 8192;

// ============================================================================
// Push constants
// ============================================================================

/// The single push constant block shared by every sprite shader.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PushConstants {
    pub projection: [f32; 16],
    pub tex_size: [f32; 2],
    pub inv_size: [f32; 2],
    pub time: f32,
    pub dp: f32,
    pub offset: [f32; 2],
}

pub const PUSH_CONSTANT_SIZE: u32 = std::mem::size_of::<PushConstants>() as u32;

impl PushConstants {
    /// Effect uniforms when given, otherwise values derived from the bound
    /// texture size.
    pub fn new(projection: [f32; 16], effect: Option<&EffectUniforms>, texture_size: (u32, u32)) -> Self {
        match effect {
            Some(effect) => Self {
                projection,
                tex_size: effect.tex_size,
                inv_size: effect.inv_size,
                time: effect.time,
                dp: effect.dp,
                offset: effect.offset,
            },
            None => {
                let w = texture_size.0.max(1) as f32;
                let h = texture_size.1.max(1) as f32;
                Self {
                    projection,
                    tex_size: [w, h],
                    inv_size: [1.0 / w, 1.0 / h],
                    time: 0.0,
                    dp: 1.0,
                    offset: [0.0, 0.0],
                }
            }
        }
    }
}

// ============================================================================
// Blend mapping
// ============================================================================

/// `alpha_channel` rewrites colour-constant factors to their alpha form.
pub fn blend_factor(gl: u32, alpha_channel: bool) -> vk::BlendFactor {
    match gl {
        ZERO => vk::BlendFactor::ZERO,
        ONE => vk::BlendFactor::ONE,
        SRC_COLOR => vk::BlendFactor::SRC_COLOR,
        ONE_MINUS_SRC_COLOR => vk::BlendFactor::ONE_MINUS_SRC_COLOR,
        SRC_ALPHA => vk::BlendFactor::SRC_ALPHA,
        ONE_MINUS_SRC_ALPHA => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        DST_ALPHA => vk::BlendFactor::DST_ALPHA,
        ONE_MINUS_DST_ALPHA => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
        DST_COLOR => vk::BlendFactor::DST_COLOR,
        ONE_MINUS_DST_COLOR => vk::BlendFactor::ONE_MINUS_DST_COLOR,
        SRC_ALPHA_SATURATE if alpha_channel => vk::BlendFactor::ONE,
        SRC_ALPHA_SATURATE => vk::BlendFactor::SRC_ALPHA_SATURATE,
        CONSTANT_COLOR if alpha_channel => vk::BlendFactor::CONSTANT_ALPHA,
        CONSTANT_COLOR => vk::BlendFactor::CONSTANT_COLOR,
        ONE_MINUS_CONSTANT_COLOR if alpha_channel => vk::BlendFactor::ONE_MINUS_CONSTANT_ALPHA,
        ONE_MINUS_CONSTANT_COLOR => vk::BlendFactor::ONE_MINUS_CONSTANT_COLOR,
        CONSTANT_ALPHA => vk::BlendFactor::CONSTANT_ALPHA,
        ONE_MINUS_CONSTANT_ALPHA => vk::BlendFactor::ONE_MINUS_CONSTANT_ALPHA,
        _ => vk::BlendFactor::ONE,
    }
}

pub fn blend_op(gl: u32) -> vk::BlendOp {
    match gl {
        FUNC_SUBTRACT => vk::BlendOp::SUBTRACT,
        FUNC_REVERSE_SUBTRACT => vk::BlendOp::REVERSE_SUBTRACT,
        MIN => vk::BlendOp::MIN,
        MAX => vk::BlendOp::MAX,
        _ => vk::BlendOp::ADD,
    }
}

/// Blend state baked into a pipeline. The constant colour is dynamic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendKey {
    pub enabled: bool,
    pub src_rgb: u32,
    pub dst_rgb: u32,
    pub src_alpha: u32,
    pub dst_alpha: u32,
    pub equation_rgb: u32,
    pub equation_alpha: u32,
}

impl From<&BlendState> for BlendKey {
    fn from(blend: &BlendState) -> Self {
        Self {
            enabled: blend.enabled,
            src_rgb: blend.src_rgb,
            dst_rgb: blend.dst_rgb,
            src_alpha: blend.src_alpha,
            dst_alpha: blend.dst_alpha,
            equation_rgb: blend.equation_rgb,
            equation_alpha: blend.equation_alpha,
        }
    }
}

impl BlendKey {
    pub fn attachment_state(&self) -> vk::PipelineColorBlendAttachmentState {
        vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(self.enabled)
            .src_color_blend_factor(blend_factor(self.src_rgb, false))
            .dst_color_blend_factor(blend_factor(self.dst_rgb, false))
            .color_blend_op(blend_op(self.equation_rgb))
            .src_alpha_blend_factor(blend_factor(self.src_alpha, true))
            .dst_alpha_blend_factor(blend_factor(self.dst_alpha, true))
            .alpha_blend_op(blend_op(self.equation_alpha))
    }
}

// ============================================================================
// Pipeline keys and vertex input
// ============================================================================

/// Which render pass a pipeline is compatible with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    Swapchain,
    Offscreen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpritePipelineKey {
    pub target: TargetKind,
    pub variant: ShaderVariant,
    pub layout: VertexLayout,
    pub blend: BlendKey,
}

/// Vertex attributes read by a variant. ScreenCopy only takes position and
/// texture coordinates.
pub fn vertex_attributes(variant: ShaderVariant, layout: &VertexLayout) -> Vec<vk::VertexInputAttributeDescription> {
    let attribute = |location: u32, format: vk::Format, offset: u32| {
        vk::VertexInputAttributeDescription::default()
            .binding(0)
            .location(location)
            .format(format)
            .offset(offset)
    };

    match variant {
        ShaderVariant::ScreenCopy => vec![
            attribute(0, vk::Format::R32G32_SFLOAT, layout.position_offset),
            attribute(2, vk::Format::R32G32_SFLOAT, layout.texcoord_offset),
        ],
        _ => vec![
            attribute(0, vk::Format::R32G32_SFLOAT, layout.position_offset),
            attribute(1, vk::Format::R8G8B8A8_UNORM, layout.color_offset),
            attribute(2, vk::Format::R32G32_SFLOAT, layout.texcoord_offset),
            attribute(3, vk::Format::R8G8B8A8_UNORM, layout.mix_color_offset),
        ],
    }
}

fn shader_spirv(variant: ShaderVariant) -> (&'static str, &'static [u8], &'static str, &'static [u8]) {
    match variant {
        ShaderVariant::Default => ("sprite.vert", SPRITE_VERT_SPV, "sprite.frag", SPRITE_FRAG_SPV),
        ShaderVariant::ScreenCopy => (
            "screen_copy.vert",
            SCREEN_COPY_VERT_SPV,
            "screen_copy.frag",
            SCREEN_COPY_FRAG_SPV,
        ),
        ShaderVariant::Shield => ("sprite.vert", SPRITE_VERT_SPV, "shield.frag", SHIELD_FRAG_SPV),
        ShaderVariant::BuildBeam => ("sprite.vert", SPRITE_VERT_SPV, "build_beam.frag", BUILD_BEAM_FRAG_SPV),
    }
}

/// Decode SPIR-V bytes into words; empty bytecode means glslc never ran.
fn spirv_words(name: &'static str, spirv: &[u8]) -> Result<Vec<u32>> {
    if spirv.len() < 4 {
        return Err(RenderError::MissingShader(name));
    }
    Ok(spirv
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

unsafe fn create_shader_module(device: &ash::Device, name: &'static str, spirv: &[u8]) -> Result<vk::ShaderModule> {
    let code = spirv_words(name, spirv)?;
    let create_info = vk::ShaderModuleCreateInfo::default().code(&code);
    device
        .create_shader_module(&create_info, None)
        .context("vkCreateShaderModule")
}

// ============================================================================
// Pipeline cache
// ============================================================================

/// Shader modules, layouts, descriptor pool and baked sprite pipelines.
pub struct SpritePipelines {
    device: ash::Device,
    modules: HashMap<ShaderVariant, (vk::ShaderModule, vk::ShaderModule)>,
    pub descriptor_set_layout: vk::DescriptorSetLayout,
    pub pipeline_layout: vk::PipelineLayout,
    descriptor_pool: vk::DescriptorPool,
    pipelines: HashMap<SpritePipelineKey, vk::Pipeline>,
}

impl SpritePipelines {
    /// Load every variant's shaders and create the shared layouts.
    ///
    /// # Safety
    /// The device must outlive the cache.
    pub unsafe fn new(device: &ash::Device) -> Result<Self> {
        let mut cache = Self {
            device: device.clone(),
            modules: HashMap::new(),
            descriptor_set_layout: vk::DescriptorSetLayout::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            descriptor_pool: vk::DescriptorPool::null(),
            pipelines: HashMap::new(),
        };
        if let Err(err) = cache.init() {
            cache.destroy();
            return Err(err);
        }
        Ok(cache)
    }

    unsafe fn init(&mut self) -> Result<()> {
        let mut shared: HashMap<&'static str, vk::ShaderModule> = HashMap::new();
        for variant in ShaderVariant::ALL {
            let (vert_name, vert_spv, frag_name, frag_spv) = shader_spirv(variant);
            let vert = match shared.get(vert_name) {
                Some(&module) => module,
                None => {
                    let module = create_shader_module(&self.device, vert_name, vert_spv)?;
                    shared.insert(vert_name, module);
                    module
                }
            };
            let frag = create_shader_module(&self.device, frag_name, frag_spv)?;
            self.modules.insert(variant, (vert, frag));
        }

        let bindings = [vk::DescriptorSetLayoutBinding::default()
            .binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT)];
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        self.descriptor_set_layout = self
            .device
            .create_descriptor_set_layout(&layout_info, None)
            .context("vkCreateDescriptorSetLayout")?;

        let push_ranges = [vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
            .offset(0)
            .size(PUSH_CONSTANT_SIZE)];
        let set_layouts = [self.descriptor_set_layout];
        let pipeline_layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_ranges);
        self.pipeline_layout = self
            .device
            .create_pipeline_layout(&pipeline_layout_info, None)
            .context("vkCreatePipelineLayout")?;

        let pool_sizes = [vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(MAX_TEXTURE_SETS)];
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(MAX_TEXTURE_SETS)
            .pool_sizes(&pool_sizes);
        self.descriptor_pool = self
            .device
            .create_descriptor_pool(&pool_info, None)
            .context("vkCreateDescriptorPool")?;

        Ok(())
    }

    /// Pipeline for `key`, built against `render_pass` on first use.
    ///
    /// # Safety
    /// `render_pass` must be compatible with `key.target`.
    pub unsafe fn get_or_create(&mut self, key: SpritePipelineKey, render_pass: vk::RenderPass) -> Result<vk::Pipeline> {
        if let Some(&pipeline) = self.pipelines.get(&key) {
            return Ok(pipeline);
        }

        let (vert, frag) = self
            .modules
            .get(&key.variant)
            .copied()
            .ok_or(RenderError::MissingShader("sprite shader modules"))?;
        let entry_name = c"main";
        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vert)
                .name(entry_name),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(frag)
                .name(entry_name),
        ];

        let binding_desc = [vk::VertexInputBindingDescription::default()
            .binding(0)
            .stride(key.layout.stride)
            .input_rate(vk::VertexInputRate::VERTEX)];
        let attr_descs = vertex_attributes(key.variant, &key.layout);
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&binding_desc)
            .vertex_attribute_descriptions(&attr_descs);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let dynamic_states = [
            vk::DynamicState::VIEWPORT,
            vk::DynamicState::SCISSOR,
            vk::DynamicState::BLEND_CONSTANTS,
        ];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let color_blend_attachments = [key.blend.attachment_state()];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(self.pipeline_layout)
            .render_pass(render_pass)
            .subpass(0);

        let pipelines = self
            .device
            .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
            .map_err(|(_, result)| RenderError::Vulkan {
                call: "vkCreateGraphicsPipelines",
                result,
            })?;
        let pipeline = pipelines[0];

        debug!(
            "created sprite pipeline {:?}/{:?} blend={} ({} cached)",
            key.target,
            key.variant,
            key.blend.enabled,
            self.pipelines.len() + 1
        );
        self.pipelines.insert(key, pipeline);
        Ok(pipeline)
    }

    /// Drop pipelines built for one target kind, after its render pass changed.
    ///
    /// # Safety
    /// None of them may still be executing.
    pub unsafe fn forget_target(&mut self, target: TargetKind) {
        let device = &self.device;
        self.pipelines.retain(|key, pipeline| {
            if key.target == target {
                device.destroy_pipeline(*pipeline, None);
                false
            } else {
                true
            }
        });
    }

    /// Allocate a texture descriptor set pointing at `view` through `sampler`.
    ///
    /// # Safety
    /// `view` and `sampler` must be alive.
    pub unsafe fn allocate_texture_set(&self, view: vk::ImageView, sampler: vk::Sampler) -> Result<vk::DescriptorSet> {
        let layouts = [self.descriptor_set_layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.descriptor_pool)
            .set_layouts(&layouts);
        let sets = self
            .device
            .allocate_descriptor_sets(&alloc_info)
            .context("vkAllocateDescriptorSets")?;
        let set = sets[0];
        self.write_texture_set(set, view, sampler);
        Ok(set)
    }

    /// Only for sets no command buffer has recorded yet.
    unsafe fn write_texture_set(&self, set: vk::DescriptorSet, view: vk::ImageView, sampler: vk::Sampler) {
        let image_info = [vk::DescriptorImageInfo::default()
            .sampler(sampler)
            .image_view(view)
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(&image_info);
        self.device.update_descriptor_sets(&[write], &[]);
    }

    /// # Safety
    /// `set` must not be in use by a pending command buffer.
    pub unsafe fn free_texture_set(&self, set: vk::DescriptorSet) {
        if let Err(err) = self.device.free_descriptor_sets(self.descriptor_pool, &[set]) {
            log::warn!("vkFreeDescriptorSets failed: {err:?}");
        }
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    /// # Safety
    /// No pipeline or descriptor set may still be executing.
    pub unsafe fn destroy(&mut self) {
        for (_, pipeline) in self.pipelines.drain() {
            self.device.destroy_pipeline(pipeline, None);
        }

        let mut destroyed = Vec::new();
        for (_, (vert, frag)) in self.modules.drain() {
            for module in [vert, frag] {
                if !destroyed.contains(&module) {
                    self.device.destroy_shader_module(module, None);
                    destroyed.push(module);
                }
            }
        }

        if self.descriptor_pool != vk::DescriptorPool::null() {
            self.device.destroy_descriptor_pool(self.descriptor_pool, None);
            self.descriptor_pool = vk::DescriptorPool::null();
        }
        if self.pipeline_layout != vk::PipelineLayout::null() {
            self.device.destroy_pipeline_layout(self.pipeline_layout, None);
            self.pipeline_layout = vk::PipelineLayout::null();
        }
        if self.descriptor_set_layout != vk::DescriptorSetLayout::null() {
            self.device.destroy_descriptor_set_layout(self.descriptor_set_layout, None);
            self.descriptor_set_layout = vk::DescriptorSetLayout::null();
        }
    }
}
