use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

fn main() {
    let dest = env::var("OUT_DIR").expect("OUT_DIR is set by cargo");

    // ========================================================================
    // SPIR-V Shader Compilation (via glslc from Vulkan SDK)
    // ========================================================================
    let shader_dir = Path::new("shaders");
    let spirv_dir = Path::new(&dest).join("spirv");
    fs::create_dir_all(&spirv_dir).expect("create spirv output dir");

    let sprite_shaders = [
        "sprite.vert.glsl",
        "screen_copy.vert.glsl",
        "sprite.frag.glsl",
        "screen_copy.frag.glsl",
        "shield.frag.glsl",
        "build_beam.frag.glsl",
    ];

    let glslc = find_glslc();
    match &glslc {
        Some(path) => println!("cargo:warning=Using glslc: {}", path.display()),
        None => println!(
            "cargo:warning=glslc not found; sprite shaders are left empty and the \
             runtime will refuse to start. Install the Vulkan SDK or put glslc on PATH."
        ),
    }

    let mut any_failed = false;

    for filename in &sprite_shaders {
        let src_path = shader_dir.join(filename);
        let spv_name = filename.replace(".glsl", ".spv");
        let spv_path = spirv_dir.join(&spv_name);
        println!("cargo:rerun-if-changed=shaders/{filename}");

        let Some(glslc) = glslc.as_deref() else {
            // Empty module; the runtime reports it as a missing shader.
            fs::write(&spv_path, []).expect("write placeholder spirv");
            continue;
        };

        let stage = if filename.contains(".vert.") {
            "vertex"
        } else {
            "fragment"
        };

        any_failed |= !compile_shader(glslc, &src_path, &spv_path, stage, filename);
    }

    println!("cargo:rerun-if-env-changed=VULKAN_SDK");

    if any_failed {
        panic!("Some shaders failed to compile (see warnings above)");
    }
}

/// Compile a single shader file to SPIR-V.
fn compile_shader(glslc: &Path, src_path: &Path, spv_path: &Path, stage: &str, filename: &str) -> bool {
    let output = Command::new(glslc)
        .arg(format!("-fshader-stage={stage}"))
        .args(["--target-env=vulkan1.1", "-O", "-o"])
        .arg(spv_path)
        .arg(src_path)
        .output();

    match output {
        Ok(result) => {
            let stderr = String::from_utf8_lossy(&result.stderr);
            if result.status.success() {
                if !stderr.is_empty() {
                    println!("cargo:warning=glslc {filename}: {stderr}");
                }
                true
            } else {
                println!("cargo:warning=glslc FAILED {filename}: {stderr}");
                false
            }
        }
        Err(e) => {
            println!("cargo:warning=glslc: failed to run for {filename}: {e}");
            false
        }
    }
}

/// Find glslc binary: check PATH, then VULKAN_SDK/bin/
fn find_glslc() -> Option<PathBuf> {
    if let Ok(output) = Command::new("glslc").arg("--version").output() {
        if output.status.success() {
            return Some(PathBuf::from("glslc"));
        }
    }

    if let Ok(sdk) = env::var("VULKAN_SDK") {
        for candidate in [
            PathBuf::from(&sdk).join("Bin").join("glslc.exe"),
            PathBuf::from(&sdk).join("bin").join("glslc"),
        ] {
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    None
}
