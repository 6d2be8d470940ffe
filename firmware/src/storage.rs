//! SD card blob storage
//!
//! Each blob is one file in the `FRAME` directory of the first FAT volume:
//!
//! /FRAME/
//!   CONFIG.JSN   - device configuration
//!   STATE.JSN    - retained state mirror (survives power loss)

use embedded_hal::{delay::DelayNs, spi::SpiDevice};
use embedded_sdmmc::{Error as SdError, Mode, SdCard, TimeSource, Timestamp, VolumeIdx, VolumeManager};
use log::{debug, info, warn};
use spectra_frame_core::storage::{BlobKey, Storage, StorageError};

/// Directory holding the blobs
const BLOB_DIR: &str = "FRAME";

/// Fixed time source, blob timestamps are not used
pub struct FixedTimesource;

impl TimeSource for FixedTimesource {
    fn get_timestamp(&self) -> Timestamp {
        Timestamp {
            year_since_1970: 56, // 2026
            zero_indexed_month: 0,
            zero_indexed_day: 0,
            hours: 0,
            minutes: 0,
            seconds: 0,
        }
    }
}

pub struct SdStorage<SPI: SpiDevice, DELAY: DelayNs> {
    volume_mgr: VolumeManager<SdCard<SPI, DELAY>, FixedTimesource>,
}

impl<SPI, DELAY> SdStorage<SPI, DELAY>
where
    SPI: SpiDevice,
    DELAY: DelayNs,
{
    /// Open the card and make sure the blob directory exists
    pub fn new(spi: SPI, delay: DELAY) -> Result<Self, StorageError> {
        let sd_card = SdCard::new(spi, delay);

        match sd_card.num_bytes() {
            Ok(size) => info!("SD card size: {} MB", size / 1024 / 1024),
            Err(e) => {
                warn!("Failed to read SD card size: {:?}", e);
                return Err(StorageError::Device);
            }
        }

        let mut storage = Self {
            volume_mgr: VolumeManager::new(sd_card, FixedTimesource),
        };
        storage.ensure_dir()?;
        Ok(storage)
    }

    fn ensure_dir(&mut self) -> Result<(), StorageError> {
        let mut volume = self
            .volume_mgr
            .open_volume(VolumeIdx(0))
            .map_err(|_| StorageError::Device)?;
        let mut root_dir = volume.open_root_dir().map_err(|_| StorageError::Device)?;

        if root_dir.open_dir(BLOB_DIR).is_err() {
            root_dir
                .make_dir_in_dir(BLOB_DIR)
                .map_err(|_| StorageError::Device)?;
            info!("Created /{} on SD card", BLOB_DIR);
        }
        Ok(())
    }
}

impl<SPI, DELAY> Storage for SdStorage<SPI, DELAY>
where
    SPI: SpiDevice,
    DELAY: DelayNs,
{
    fn load(&mut self, key: BlobKey, buf: &mut [u8]) -> Result<Option<usize>, StorageError> {
        let mut volume = self
            .volume_mgr
            .open_volume(VolumeIdx(0))
            .map_err(|_| StorageError::Device)?;
        let mut root_dir = volume.open_root_dir().map_err(|_| StorageError::Device)?;
        let mut dir = root_dir.open_dir(BLOB_DIR).map_err(|_| StorageError::Device)?;

        let mut file = match dir.open_file_in_dir(key.file_name(), Mode::ReadOnly) {
            Ok(file) => file,
            Err(SdError::NotFound) => return Ok(None),
            Err(_) => return Err(StorageError::Device),
        };

        if file.length() as usize > buf.len() {
            return Err(StorageError::BufferTooSmall);
        }

        let mut total_read = 0;
        loop {
            match file.read(&mut buf[total_read..]) {
                Ok(0) => break,
                Ok(n) => total_read += n,
                Err(_) => return Err(StorageError::Device),
            }
        }

        debug!("Read {} bytes from {}", total_read, key.file_name());
        Ok(Some(total_read))
    }

    fn store(&mut self, key: BlobKey, data: &[u8]) -> Result<(), StorageError> {
        let mut volume = self
            .volume_mgr
            .open_volume(VolumeIdx(0))
            .map_err(|_| StorageError::Device)?;
        let mut root_dir = volume.open_root_dir().map_err(|_| StorageError::Device)?;
        let mut dir = root_dir.open_dir(BLOB_DIR).map_err(|_| StorageError::Device)?;

        let mut file = dir
            .open_file_in_dir(key.file_name(), Mode::ReadWriteCreateOrTruncate)
            .map_err(|_| StorageError::Device)?;
        file.write(data).map_err(|_| StorageError::Device)?;
        file.flush().map_err(|_| StorageError::Device)?;

        debug!("Wrote {} bytes to {}", data.len(), key.file_name());
        Ok(())
    }
}
