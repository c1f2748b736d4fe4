use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

/// Byte stream over an opened file.
///
/// Paths use forward slashes everywhere inside the engine; translation to
/// the platform separator happens at this boundary.
pub trait Stream: Send {
    fn length(&self) -> u64;
    fn read_to_buffer(&mut self, buffer: &mut [u8]) -> anyhow::Result<usize>;
    fn seek_to(&mut self, offset: u64) -> anyhow::Result<()>;
}

pub struct FileStream {
    file: File,
    length: u64,
}

impl Stream for FileStream {
    fn length(&self) -> u64 {
        self.length
    }

    fn read_to_buffer(&mut self, buffer: &mut [u8]) -> anyhow::Result<usize> {
        let mut total_read = 0;
        while total_read < buffer.len() {
            let read = self.file.read(&mut buffer[total_read..])?;
            if read == 0 {
                break;
            }
            total_read += read;
        }
        Ok(total_read)
    }

    fn seek_to(&mut self, offset: u64) -> anyhow::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        Ok(())
    }
}

/// Opens engine paths as concrete streams, rooted at a mount directory.
pub struct StreamFactory {
    root: PathBuf,
}

impl StreamFactory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn open(&self, engine_path: &str) -> anyhow::Result<FileStream> {
        let platform_path = self.translate(engine_path);

        let file = File::open(&platform_path)
            .map_err(|err| anyhow::anyhow!("failed to open {:?}: {}", platform_path, err))?;
        let length = file.metadata()?.len();

        Ok(FileStream { file, length })
    }

    /// Engine paths are forward-slash separated and relative to the mount
    /// root.
    fn translate(&self, engine_path: &str) -> PathBuf {
        let mut platform_path = self.root.clone();
        for component in engine_path.split('/').filter(|component| !component.is_empty()) {
            platform_path.push(component);
        }
        platform_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn open_read_seek() {
        let dir = std::env::temp_dir().join("ember_io_vfs_test");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::File::create(dir.join("asset.bin"))
            .unwrap()
            .write_all(b"0123456789")
            .unwrap();

        let factory = StreamFactory::new(&dir);
        let mut stream = factory.open("asset.bin").unwrap();
        assert_eq!(stream.length(), 10);

        stream.seek_to(4).unwrap();
        let mut buffer = [0_u8; 3];
        assert_eq!(stream.read_to_buffer(&mut buffer).unwrap(), 3);
        assert_eq!(&buffer, b"456");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn forward_slash_translation() {
        let factory = StreamFactory::new("/mount");
        let path = factory.translate("textures/env/sky.tex");

        assert!(path.ends_with(std::path::Path::new("textures").join("env").join("sky.tex")));
    }
}
