//! Engine facade: boots the core services in dependency order, drives the
//! per-frame graph cycle, and tears everything down in reverse.

use std::path::PathBuf;
use std::sync::Arc;

use ember_asset::TextureLoader;
use ember_core::ServiceRegistry;
use ember_io::{AsyncStreamIo, StreamFactory};
use ember_job::{JobSystem, JobSystemDesc};
use ember_log::LogConfig;
use ember_rg::{FrameGraph, GraphExecutor, GraphExecutorDesc};
use ember_rhi::bindless::BindlessDescriptorManager;
use ember_rhi::copy_queue::AsyncCopyQueue;
use ember_rhi::shader_library::{FsShaderSourceProvider, ShaderLibrary};
use ember_rhi::{Rhi, RhiConfig};

pub struct EngineConfig {
    pub log: LogConfig,
    pub rhi: RhiConfig,
    /// Defaults to the physical core count.
    pub worker_count: Option<usize>,
    /// Mount root of the virtual file system.
    pub asset_root: PathBuf,
    pub shader_root: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log: LogConfig::default(),
            rhi: RhiConfig::default(),
            worker_count: None,
            asset_root: PathBuf::from("assets"),
            shader_root: PathBuf::from("shaders"),
        }
    }
}

/// The running engine core. Create, drive frames, shut down.
pub struct Engine {
    services: Arc<ServiceRegistry>,

    job_system: Arc<JobSystem>,
    io: Arc<AsyncStreamIo>,
    copy_queue: Arc<AsyncCopyQueue>,
    shader_library: Arc<ShaderLibrary>,
    bindless: Arc<BindlessDescriptorManager>,

    rhi: Rhi,
    executor: GraphExecutor,
}

impl Engine {
    pub fn new(config: EngineConfig) -> anyhow::Result<Self> {
        ember_log::init_log(config.log);
        log::info!("ember engine starting up");

        let services = Arc::new(ServiceRegistry::new());

        let job_system = JobSystem::new(match config.worker_count {
            Some(worker_count) => JobSystemDesc { worker_count },
            None => JobSystemDesc::default(),
        });
        job_system.start();
        services.register(job_system.clone());

        let rhi = Rhi::new(config.rhi)?;
        let device = rhi.device.clone();

        let bindless = Arc::new(BindlessDescriptorManager::new(device.clone())?);
        services.register(bindless.clone());

        let copy_queue = Arc::new(AsyncCopyQueue::new(device.clone())?);
        services.register(copy_queue.clone());

        let stream_factory = Arc::new(StreamFactory::new(config.asset_root));
        let io = Arc::new(AsyncStreamIo::new(job_system.clone(), stream_factory)?);
        services.register(io.clone());

        let shader_library = Arc::new(ShaderLibrary::new(
            device.clone(),
            job_system.clone(),
            Arc::new(FsShaderSourceProvider {
                root: config.shader_root,
            }),
        ));
        services.register(shader_library.clone());

        let texture_loader = Arc::new(TextureLoader::new(
            device,
            io.clone(),
            copy_queue.clone(),
            job_system.clone(),
        ));
        services.register(texture_loader);

        let executor = GraphExecutor::new(&rhi, bindless.clone(), GraphExecutorDesc::default());

        Ok(Self {
            services,
            job_system,
            io,
            copy_queue,
            shader_library,
            bindless,
            rhi,
            executor,
        })
    }

    pub fn services(&self) -> &Arc<ServiceRegistry> {
        &self.services
    }

    pub fn device(&self) -> &Arc<ember_rhi::backend::Device> {
        &self.rhi.device
    }

    /// Build, compile and execute one frame graph.
    pub fn frame<PrepareFn>(&mut self, prepare: PrepareFn) -> anyhow::Result<()>
    where
        PrepareFn: FnOnce(&mut FrameGraph),
    {
        self.executor.draw(prepare)
    }

    /// Tear down in reverse construction order.
    pub fn shutdown(self) {
        log::info!("ember engine shutting down");

        // stop work producers before the GPU objects they feed
        self.io.stop();
        self.copy_queue.stop();
        self.shader_library.shutdown();

        self.executor.shutdown();
        self.bindless.clean();

        self.job_system.stop();

        // drops whatever is still registered, newest first
        drop(self.services.drain_for_shutdown());

        self.rhi.shutdown();
    }
}
