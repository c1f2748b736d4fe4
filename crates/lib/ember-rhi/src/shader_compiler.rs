use bytes::Bytes;

use crate::backend::{RhiError, ShaderBinary};

/// Compile HLSL source into SPIR-V through the DX compiler.
///
/// `defines` are the permutation switches; the output is 4-byte aligned as
/// the compiler guarantees for SPIR-V targets.
pub fn compile_shader_hlsl(
    name: &str,
    source: &str,
    entry: &str,
    target_profile: &str,
    defines: &[(String, String)],
) -> Result<ShaderBinary, RhiError> {
    let t = std::time::Instant::now();

    let defines: Vec<(&str, Option<&str>)> = defines.iter()
        .map(|(key, value)| (key.as_str(), Some(value.as_str())))
        .collect();

    let spirv = hassle_rs::compile_hlsl(
        name,
        source,
        entry,
        target_profile,
        &[
            "-spirv",
            "-fspv-target-env=vulkan1.2", // hlsl for vulkan
            "-WX",  // warnings as errors
            "-Ges", // strict mode
        ],
        &defines,
    )
    .map_err(|err| RhiError::ShaderCompilation {
        info: format!("{}", err),
    })?;

    log::info!("DX Compiler compiled {} {} in {:?}", name, entry, t.elapsed());

    Ok(ShaderBinary {
        spirv: Bytes::from(spirv),
    })
}
