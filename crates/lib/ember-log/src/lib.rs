use fern::colors::{Color, ColoredLevelConfig};

pub use log::LevelFilter;

/// Log configuration.
#[derive(Copy, Clone)]
pub struct LogConfig {
    pub level: LevelFilter,
    pub log_to_file: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LevelFilter::Trace,
            log_to_file: true,
        }
    }
}

/// Initialize the global logger.
pub fn init_log(config: LogConfig) {
    setup_logger(config).expect("Failed to initialize log module!");

    log::info!("log initialized!");
}

fn setup_logger(config: LogConfig) -> anyhow::Result<()> {
    // setup colors
    let colors = ColoredLevelConfig::new()
        .trace(Color::White)
        .debug(Color::Magenta)
        .info(Color::Cyan)
        .warn(Color::Yellow)
        .error(Color::Red);

    // standard output dispatch, for trace, debug and info messages.
    let stdout = fern::Dispatch::new()
        .filter(|metadata| {
            metadata.level() >= log::Level::Info
        })
        .chain(std::io::stdout());

    // standard error dispatch, for warn and error messages.
    let stderr = fern::Dispatch::new()
        .level(LevelFilter::Warn)
        .chain(std::io::stderr());

    // console output with the colors
    let console_output = fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
                record.target(),
                colors.color(record.level()),
                message
            ))
        })
        .chain(stdout)
        .chain(stderr);

    let mut dispatch = fern::Dispatch::new()
        .level(config.level) // setup base log level from user
        .chain(console_output);

    if config.log_to_file {
        let file_output = fern::Dispatch::new()
            .format(|out, message, record| {
                out.finish(format_args!(
                    "{}[{}][{}] {}",
                    chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
                    record.target(),
                    record.level(),
                    message
                ))
            })
            .chain(std::fs::OpenOptions::new() // global file output
                .create(true)
                .write(true)
                .truncate(true)
                .open("log.log")?);

        dispatch = dispatch.chain(file_output);
    }

    dispatch.apply()?;

    Ok(())
}
