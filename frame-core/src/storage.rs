//! Persistent blob storage abstraction
//!
//! The device keeps two small JSON blobs on non-volatile storage. The backing
//! store is opaque: the firmware maps keys to files on the SD card.

/// Keys for the persisted blobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlobKey {
    /// Device configuration
    Config = 0,
    /// Retained state fallback (committed token, boot diagnostics)
    State = 1,
}

impl BlobKey {
    /// 8.3 file name used on the SD card
    pub fn file_name(self) -> &'static str {
        match self {
            BlobKey::Config => "CONFIG.JSN",
            BlobKey::State => "STATE.JSN",
        }
    }
}

/// Errors from storage operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Underlying device failed
    Device,
    /// Buffer too small for the stored data
    BufferTooSmall,
    /// Data could not be encoded or decoded
    Corrupted,
}

/// Opaque get/set store for small blobs
pub trait Storage {
    /// Read a blob into `buf`. `Ok(None)` when the key was never written.
    fn load(&mut self, key: BlobKey, buf: &mut [u8]) -> Result<Option<usize>, StorageError>;

    /// Replace a blob
    fn store(&mut self, key: BlobKey, data: &[u8]) -> Result<(), StorageError>;
}

impl<S: Storage + ?Sized> Storage for &mut S {
    fn load(&mut self, key: BlobKey, buf: &mut [u8]) -> Result<Option<usize>, StorageError> {
        (**self).load(key, buf)
    }

    fn store(&mut self, key: BlobKey, data: &[u8]) -> Result<(), StorageError> {
        (**self).store(key, data)
    }
}

/// A missing store reads as empty and refuses writes
impl<S: Storage> Storage for Option<S> {
    fn load(&mut self, key: BlobKey, buf: &mut [u8]) -> Result<Option<usize>, StorageError> {
        match self {
            Some(storage) => storage.load(key, buf),
            None => Ok(None),
        }
    }

    fn store(&mut self, key: BlobKey, data: &[u8]) -> Result<(), StorageError> {
        match self {
            Some(storage) => storage.store(key, data),
            None => Err(StorageError::Device),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::mem::MemoryStorage;
    use super::*;

    #[test]
    fn test_absent_store() {
        let mut storage: Option<MemoryStorage> = None;
        let mut buf = [0u8; 8];
        assert_eq!(storage.load(BlobKey::Config, &mut buf), Ok(None));
        assert_eq!(storage.store(BlobKey::State, b"{}"), Err(StorageError::Device));

        let mut storage = Some(MemoryStorage::default());
        storage.store(BlobKey::State, b"{}").unwrap();
        assert_eq!(storage.load(BlobKey::State, &mut buf), Ok(Some(2)));
        assert_eq!(storage.load(BlobKey::Config, &mut buf), Ok(None));
    }
}
