use std::sync::Arc;

use ash::vk;

use ember_engine::{Engine, EngineConfig};
use ember_rg::PassKind;
use ember_rhi::backend::{AccessType, ImageDesc};

const FRAME_COUNT: u32 = 3;

fn main() {
    std::process::exit(match run() {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("sandbox failed: {:#}", err);
            1
        }
    });
}

fn run() -> anyhow::Result<()> {
    let mut engine = Engine::new(EngineConfig::default())?;

    // stands in for a swapchain image in this headless sandbox
    let output = Arc::new(engine.device().create_image(
        ImageDesc::new_2d([1280, 720], vk::Format::R16G16B16A16_SFLOAT)
            .usage_flags(vk::ImageUsageFlags::STORAGE),
        "sandbox output",
    )?);

    // a tiny two-pass compute frame, enough to push work through the whole
    // build / compile / execute cycle
    for frame_index in 0..FRAME_COUNT {
        let output = output.clone();

        engine.frame(move |graph| {
            let target = graph.import_render_target(output, AccessType::Nothing);

            let lit = {
                let mut pass = graph.add_pass("lighting", PassKind::Compute);
                let lit = pass.create_image(
                    "lit",
                    ImageDesc::new_2d([1280, 720], vk::Format::R16G16B16A16_SFLOAT),
                );
                let lit = pass.write(lit, AccessType::ComputeShaderWrite);
                pass.set_function(|_context| Ok(()));
                lit
            };

            let mut pass = graph.add_pass("resolve", PassKind::Compute);
            pass.read(lit, AccessType::ComputeShaderReadSampledImageOrUniformTexelBuffer);
            pass.write(target, AccessType::ComputeShaderWrite);
            pass.set_function(|_context| Ok(()));
        })?;

        log::debug!("frame {} submitted", frame_index);
    }

    engine.device().wait_idle();
    let output = Arc::try_unwrap(output).unwrap_or_else(|_| panic!("output image still referenced"));
    engine.device().destroy_image(output);

    engine.shutdown();
    Ok(())
}
