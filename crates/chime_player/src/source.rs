//! 音源
//!
//! 本地文件或随程序打包的内存资源，打开后作为 symphonia 的可 seek 字节流。

use std::fmt;
use std::fs::File;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use symphonia::core::io::MediaSource as ByteStream;

/// 音源句柄，控制器生命周期内不可变
#[derive(Clone)]
pub enum MediaSource {
    /// 本地文件
    File(PathBuf),
    /// 打包资源（如 `include_bytes!`）
    Embedded { name: String, bytes: Arc<[u8]> },
}

impl MediaSource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        MediaSource::File(path.into())
    }

    pub fn embedded(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        MediaSource::Embedded {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    /// 资源名，用于日志
    pub fn name(&self) -> String {
        match self {
            MediaSource::File(path) => path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("unknown")
                .to_string(),
            MediaSource::Embedded { name, .. } => Path::new(name)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(name)
                .to_string(),
        }
    }

    /// 扩展名，作为探测格式的提示
    pub fn extension_hint(&self) -> Option<String> {
        let path = match self {
            MediaSource::File(path) => path.as_path(),
            MediaSource::Embedded { name, .. } => Path::new(name),
        };
        path.extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_ascii_lowercase())
    }

    /// 打开为可 seek 的字节流
    pub(crate) fn open(&self) -> std::io::Result<Box<dyn ByteStream>> {
        match self {
            MediaSource::File(path) => Ok(Box::new(File::open(path)?)),
            MediaSource::Embedded { bytes, .. } => Ok(Box::new(Cursor::new(Arc::clone(bytes)))),
        }
    }
}

impl fmt::Debug for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaSource::File(path) => f.debug_tuple("File").field(path).finish(),
            MediaSource::Embedded { name, bytes } => f
                .debug_struct("Embedded")
                .field("name", name)
                .field("len", &bytes.len())
                .finish(),
        }
    }
}

impl fmt::Display for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaSource::File(path) => write!(f, "{}", path.display()),
            MediaSource::Embedded { name, .. } => write!(f, "embedded:{}", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_and_hints() {
        let file = MediaSource::file("/music/formula_1.MP3");
        assert_eq!(file.name(), "formula_1");
        assert_eq!(file.extension_hint().as_deref(), Some("mp3"));

        let embedded = MediaSource::embedded("chime.wav", vec![0u8; 4]);
        assert_eq!(embedded.name(), "chime");
        assert_eq!(embedded.extension_hint().as_deref(), Some("wav"));
        assert_eq!(format!("{:?}", embedded), "Embedded { name: \"chime.wav\", len: 4 }");
    }

    #[test]
    fn test_open_embedded_reads_bytes() {
        use std::io::Read;

        let source = MediaSource::embedded("raw", b"abc".to_vec());
        let mut stream = source.open().unwrap();
        let mut out = String::new();
        stream.read_to_string(&mut out).unwrap();
        assert_eq!(out, "abc");
    }
}
