use std::io::{Cursor, SeekFrom};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use byteorder::{BigEndian, ReadBytesExt};
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::error::{Error, Result};
use crate::fetch::PartialOutput;
use crate::io::SeekableSource;
use crate::zip::COPY_BLOCK_SIZE;

/// Magic bytes at the start of an update payload.
pub const PAYLOAD_MAGIC: &[u8; 4] = b"CrAU";

/// Entry name suffix that identifies the payload inside an OTA archive.
pub const PAYLOAD_ENTRY_SUFFIX: &str = "payload.bin";

/// Consumer of an update payload stream.
///
/// The stream is positioned at 0 and spans exactly the payload; the
/// implementation owns every seek and read on it.
#[async_trait]
pub trait PayloadDumper: Send + Sync {
    async fn dump(
        &self,
        payload: &mut (dyn SeekableSource + '_),
        out_dir: &Path,
        partitions: Option<&[String]>,
    ) -> Result<Vec<PathBuf>>;
}

/// Fixed header of a payload file (all fields big-endian).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadHeader {
    pub version: u64,
    pub manifest_size: u64,
    /// Only present from version 2 on.
    pub metadata_signature_size: u32,
}

impl PayloadHeader {
    /// magic + version + manifest size + signature size
    pub const SIZE: usize = 24;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < 20 || &data[0..4] != PAYLOAD_MAGIC {
            return Err(Error::archive("not an update payload (bad magic)"));
        }
        let mut cursor = Cursor::new(&data[4..]);
        let version = cursor.read_u64::<BigEndian>()?;
        let manifest_size = cursor.read_u64::<BigEndian>()?;
        let metadata_signature_size = match version {
            1 => 0,
            2 => {
                if data.len() < Self::SIZE {
                    return Err(Error::archive("truncated payload header"));
                }
                cursor.read_u32::<BigEndian>()?
            }
            v => {
                return Err(Error::archive(format!(
                    "unsupported payload version {v}"
                )));
            }
        };
        Ok(Self {
            version,
            manifest_size,
            metadata_signature_size,
        })
    }

    fn header_len(&self) -> u64 {
        if self.version == 1 { 20 } else { Self::SIZE as u64 }
    }

    /// Offset of the first data blob, right after manifest and signature.
    pub fn data_offset(&self) -> Result<u64> {
        self.header_len()
            .checked_add(self.manifest_size)
            .and_then(|n| n.checked_add(self.metadata_signature_size as u64))
            .ok_or_else(|| {
                Error::archive(format!(
                    "payload manifest size {} overflows the offset range",
                    self.manifest_size
                ))
            })
    }
}

/// Sniff whether `source` begins with the payload magic. The cursor is
/// restored to 0 afterwards.
pub async fn is_payload<S: SeekableSource + ?Sized>(source: &mut S) -> Result<bool> {
    source.seek(SeekFrom::Start(0)).await?;
    let magic = source.read(PAYLOAD_MAGIC.len()).await?;
    source.seek(SeekFrom::Start(0)).await?;
    Ok(magic.as_slice() == PAYLOAD_MAGIC)
}

/// Validates the payload header and stores the payload unchanged as
/// `<out>/payload.bin`, ready for an operation-replay tool.
#[derive(Debug, Default, Clone)]
pub struct PayloadCopier;

#[async_trait]
impl PayloadDumper for PayloadCopier {
    async fn dump(
        &self,
        payload: &mut (dyn SeekableSource + '_),
        out_dir: &Path,
        partitions: Option<&[String]>,
    ) -> Result<Vec<PathBuf>> {
        let head_len = (PayloadHeader::SIZE as u64).min(payload.size()) as usize;
        let head = payload.read_exact_at(0, head_len).await?;
        let header = PayloadHeader::from_bytes(&head)?;
        if header.data_offset()? > payload.size() {
            return Err(Error::archive(format!(
                "payload manifest ({} bytes) extends past end of payload",
                header.manifest_size
            )));
        }
        info!(
            version = header.version,
            manifest_size = header.manifest_size,
            signature_size = header.metadata_signature_size,
            size = payload.size(),
            "found update payload"
        );
        if let Some(partitions) = partitions {
            info!(?partitions, "partition selection is applied when the payload is replayed");
        }

        let dest = out_dir.join(PAYLOAD_ENTRY_SUFFIX);
        let mut output = PartialOutput::create(&dest).await?;
        payload.seek(SeekFrom::Start(0)).await?;
        loop {
            let block = payload.read(COPY_BLOCK_SIZE as usize).await?;
            if block.is_empty() {
                break;
            }
            output.file_mut().write_all(&block).await?;
        }
        let path = output.commit().await?;
        info!(path = %path.display(), "wrote payload");
        Ok(vec![path])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryFile;
    use tempfile::TempDir;

    fn payload_bytes(manifest: &[u8], body: &[u8]) -> Vec<u8> {
        let mut data = PAYLOAD_MAGIC.to_vec();
        data.extend_from_slice(&2u64.to_be_bytes());
        data.extend_from_slice(&(manifest.len() as u64).to_be_bytes());
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(manifest);
        data.extend_from_slice(body);
        data
    }

    #[test]
    fn test_header_v2() {
        let data = payload_bytes(&[7u8; 10], b"");
        let header = PayloadHeader::from_bytes(&data).unwrap();
        assert_eq!(header.version, 2);
        assert_eq!(header.manifest_size, 10);
        assert_eq!(header.data_offset().unwrap(), 34);
    }

    #[test]
    fn test_header_rejects_bad_magic_and_version() {
        assert!(PayloadHeader::from_bytes(b"PK\x03\x04aaaaaaaaaaaaaaaaaaaaaaaa").is_err());

        let mut data = payload_bytes(b"", b"");
        data[11] = 9; // version 9
        assert!(PayloadHeader::from_bytes(&data).is_err());
    }

    #[tokio::test]
    async fn test_is_payload_restores_cursor() {
        let mut file = MemoryFile::new(payload_bytes(b"m", b"body"));
        assert!(is_payload(&mut file).await.unwrap());
        assert_eq!(file.tell(), 0);

        let mut other = MemoryFile::new(b"PK\x03\x04".to_vec());
        assert!(!is_payload(&mut other).await.unwrap());
    }

    #[tokio::test]
    async fn test_copier_writes_payload_verbatim() {
        let dir = TempDir::new().unwrap();
        let data = payload_bytes(b"manifest", &[0xAB; 5000]);
        let mut file = MemoryFile::new(data.clone());

        let outputs = PayloadCopier
            .dump(&mut file, dir.path(), None)
            .await
            .unwrap();
        assert_eq!(outputs, vec![dir.path().join("payload.bin")]);
        assert_eq!(std::fs::read(&outputs[0]).unwrap(), data);
    }

    #[tokio::test]
    async fn test_copier_rejects_oversized_manifest() {
        let dir = TempDir::new().unwrap();
        let mut data = payload_bytes(b"", b"");
        data[12..20].copy_from_slice(&1000u64.to_be_bytes());
        let mut file = MemoryFile::new(data);

        assert!(PayloadCopier.dump(&mut file, dir.path(), None).await.is_err());
        assert!(!dir.path().join("payload.bin").exists());
    }

    #[tokio::test]
    async fn test_copier_rejects_saturated_manifest_size() {
        let dir = TempDir::new().unwrap();
        let mut data = payload_bytes(b"", b"body");
        data[12..20].copy_from_slice(&u64::MAX.to_be_bytes());
        assert!(PayloadHeader::from_bytes(&data).unwrap().data_offset().is_err());

        let mut file = MemoryFile::new(data);
        let err = PayloadCopier
            .dump(&mut file, dir.path(), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Archive);
        assert!(!dir.path().join("payload.bin").exists());
    }
}
