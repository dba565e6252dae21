use std::path::PathBuf;

use barge_protocol::UploadFileDescriptor;

/// The local source of an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub path: PathBuf,
    pub size: u64,
    /// `true` when the file is a temporary copy owned by the engine and
    /// must be cleaned up once the transfer is terminal.
    pub temporary: bool,
}

impl UploadFile {
    pub fn new(path: impl Into<PathBuf>, size: u64) -> Self {
        Self {
            path: path.into(),
            size,
            temporary: false,
        }
    }

    pub fn temporary(path: impl Into<PathBuf>, size: u64) -> Self {
        Self {
            path: path.into(),
            size,
            temporary: true,
        }
    }
}

impl From<&UploadFile> for UploadFileDescriptor {
    fn from(file: &UploadFile) -> Self {
        UploadFileDescriptor {
            path: file.path.clone(),
            size: file.size,
            temporary: file.temporary,
        }
    }
}

impl From<&UploadFileDescriptor> for UploadFile {
    fn from(desc: &UploadFileDescriptor) -> Self {
        UploadFile {
            path: desc.path.clone(),
            size: desc.size,
            temporary: desc.temporary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_roundtrip() {
        let file = UploadFile::temporary("/tmp/upload-copy.bin", 42);
        let desc = UploadFileDescriptor::from(&file);
        assert_eq!(desc.size, 42);
        assert!(desc.temporary);
        assert_eq!(UploadFile::from(&desc), file);
    }
}
