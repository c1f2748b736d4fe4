use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;

use ash::vk;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use wyhash::WyHash;

use ember_job::{JobPriority, JobSystem, WaitGroup};

use crate::backend::{Device, ShaderReflection, ShaderStage};
use crate::shader_compiler;

/// One shader permutation: a source name plus the define set baked into it.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct ShaderPermutationDesc {
    pub name: String,
    pub stage: ShaderStage,
    pub entry: String,
    pub defines: Vec<(String, String)>,
}

/// Shared state of a compiled (or still compiling) shader permutation.
///
/// `compiled` is signaled exactly once when compilation finished, in either
/// direction; a missing reflection after that marks failure, and dependents
/// skip their draws.
pub struct ShaderInfo {
    pub desc: ShaderPermutationDesc,
    compiled: Arc<WaitGroup>,
    module: OnceCell<vk::ShaderModule>,
    reflection: OnceCell<Option<ShaderReflection>>,
}

impl ShaderInfo {
    /// Block the calling fiber until compilation finished.
    pub fn wait(&self) {
        self.compiled.wait();
    }

    pub fn wait_group(&self) -> &Arc<WaitGroup> {
        &self.compiled
    }

    pub fn is_ready(&self) -> bool {
        self.compiled.is_signaled()
    }

    pub fn module(&self) -> Option<vk::ShaderModule> {
        self.module.get().copied()
    }

    /// `None` until compilation finished, or after a failed compilation.
    pub fn reflection(&self) -> Option<&ShaderReflection> {
        self.reflection.get().and_then(|reflection| reflection.as_ref())
    }

    pub fn is_failed(&self) -> bool {
        self.is_ready() && self.reflection().is_none()
    }
}

/// Loads shader source text by permutation name.
pub trait ShaderSourceProvider: Send + Sync + 'static {
    fn load(&self, name: &str) -> anyhow::Result<String>;
}

/// Plain directory lookup: `<root>/<name>.hlsl`.
pub struct FsShaderSourceProvider {
    pub root: PathBuf,
}

impl ShaderSourceProvider for FsShaderSourceProvider {
    fn load(&self, name: &str) -> anyhow::Result<String> {
        let path = self.root.join(format!("{}.hlsl", name));
        Ok(std::fs::read_to_string(path)?)
    }
}

/// Permutation-hashed shader cache with job-system compilation.
///
/// `get_shader` on a miss schedules a compilation job and returns right away;
/// callers wait on the shader's wait group before building pipelines.
pub struct ShaderLibrary {
    device: Arc<Device>,
    job_system: Arc<JobSystem>,
    source_provider: Arc<dyn ShaderSourceProvider>,

    shaders: Mutex<HashMap<u64, Arc<ShaderInfo>>>,
}

impl ShaderLibrary {
    pub fn new(
        device: Arc<Device>,
        job_system: Arc<JobSystem>,
        source_provider: Arc<dyn ShaderSourceProvider>,
    ) -> Self {
        Self {
            device,
            job_system,
            source_provider,
            shaders: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_shader(&self, desc: ShaderPermutationDesc) -> Arc<ShaderInfo> {
        let key = permutation_key(&desc);

        {
            let shaders = self.shaders.lock();
            if let Some(info) = shaders.get(&key) {
                // may still be compiling, the caller waits before use
                return info.clone();
            }
        }

        let info = Arc::new(ShaderInfo {
            desc: desc.clone(),
            compiled: WaitGroup::new(1),
            module: OnceCell::new(),
            reflection: OnceCell::new(),
        });

        {
            let mut shaders = self.shaders.lock();
            // another thread may have raced the miss
            if let Some(existing) = shaders.get(&key) {
                return existing.clone();
            }
            shaders.insert(key, info.clone());
        }

        self.schedule_compilation(info.clone());
        info
    }

    pub fn shutdown(&self) {
        let shaders = std::mem::take(&mut *self.shaders.lock());
        for (_, info) in shaders {
            info.compiled.wait_blocking();
            if let Some(module) = info.module() {
                unsafe {
                    self.device.raw.destroy_shader_module(module, None);
                }
            }
        }
    }

    fn schedule_compilation(&self, info: Arc<ShaderInfo>) {
        let device = self.device.clone();
        let source_provider = self.source_provider.clone();

        self.job_system.spawn(JobPriority::Low, move || {
            run_compilation_task(&device, source_provider.as_ref(), &info);
            info.compiled.signal();
        });
    }
}

fn run_compilation_task(
    device: &Device,
    source_provider: &dyn ShaderSourceProvider,
    info: &ShaderInfo,
) {
    let desc = &info.desc;

    let source = match source_provider.load(&desc.name) {
        Ok(source) => source,
        Err(err) => {
            log::warn!("failed to load shader source {}: {}", desc.name, err);
            info.reflection.set(None).ok();
            return;
        }
    };

    let binary = match shader_compiler::compile_shader_hlsl(
        &desc.name,
        &source,
        &desc.entry,
        desc.stage.target_profile(),
        &desc.defines,
    ) {
        Ok(binary) => binary,
        Err(err) => {
            log::warn!("failed to compile shader {}: {}", desc.name, err);
            info.reflection.set(None).ok();
            return;
        }
    };

    let reflection = match rspirv_reflect::Reflection::new_from_spirv(&binary.spirv) {
        Ok(reflection) => reflection,
        Err(err) => {
            log::warn!("failed to reflect shader {}: {:?}", desc.name, err);
            info.reflection.set(None).ok();
            return;
        }
    };

    let push_constant_size = reflection
        .get_push_constant_range()
        .ok()
        .flatten()
        .map(|range| range.size)
        .unwrap_or(0);

    let words = binary.as_words();
    let module = unsafe {
        device.raw.create_shader_module(
            &vk::ShaderModuleCreateInfo::builder().code(&words).build(),
            None,
        )
    };

    match module {
        Ok(module) => {
            info.module.set(module).ok();
            info.reflection
                .set(Some(ShaderReflection {
                    raw: reflection,
                    push_constant_size,
                }))
                .ok();
        }
        Err(err) => {
            log::warn!("failed to create shader module {}: {}", desc.name, err);
            info.reflection.set(None).ok();
        }
    }
}

fn permutation_key(desc: &ShaderPermutationDesc) -> u64 {
    let mut hasher = WyHash::default();
    desc.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permutation_key_separates_defines() {
        let base = ShaderPermutationDesc {
            name: "postprocess".into(),
            stage: ShaderStage::Compute,
            entry: "main_cs".into(),
            defines: vec![],
        };
        let with_define = ShaderPermutationDesc {
            defines: vec![("ENABLE_BLOOM".into(), "1".into())],
            ..base.clone()
        };

        assert_ne!(permutation_key(&base), permutation_key(&with_define));
        assert_eq!(permutation_key(&base), permutation_key(&base.clone()));
    }
}
