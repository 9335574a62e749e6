//! ZIP central-directory reader over any [`SeekableSource`].
//!
//! ## Parsing Strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) at the file's end
//! 2. If ZIP64, read the ZIP64 EOCD for large file support
//! 3. Read the Central Directory to get metadata for all files
//! 4. For extraction, read each file's Local File Header and data
//!
//! Against a remote source this costs one small request for the tail, one
//! for the directory, and one per opened entry header.

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use tokio::io::AsyncWrite;
use tracing::debug;

use super::entry::EntryReader;
use super::extractor::copy_entry;
use super::structures::*;
use crate::error::{Error, Result};
use crate::io::{ProgressFn, SeekableSource};

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// An opened archive: its source plus the parsed central directory.
pub struct ZipArchive<S> {
    source: S,
    entries: Vec<ArchiveEntry>,
}

impl<S: SeekableSource> ZipArchive<S> {
    /// Read the central directory of `source`.
    pub async fn open(mut source: S) -> Result<Self> {
        let entries = read_central_directory(&mut source).await?;
        debug!(entries = entries.len(), size = source.size(), "opened archive");
        Ok(Self { source, entries })
    }

    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    /// Names of all entries, in directory order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// First entry satisfying `pred`.
    pub fn find(&self, pred: impl Fn(&ArchiveEntry) -> bool) -> Option<ArchiveEntry> {
        self.entries.iter().find(|e| pred(e)).cloned()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn into_inner(self) -> S {
        self.source
    }

    /// Absolute offset of `entry`'s data within the archive.
    pub async fn data_offset(&mut self, entry: &ArchiveEntry) -> Result<u64> {
        data_offset(&mut self.source, entry).await
    }

    /// A stream over exactly `entry`'s uncompressed bytes.
    pub async fn open_entry(&mut self, entry: &ArchiveEntry) -> Result<EntryReader<&mut S>> {
        let offset = self.data_offset(entry).await?;
        EntryReader::open(&mut self.source, entry, offset).await
    }

    /// Sequentially copy `entry` into `writer`; returns bytes written.
    pub async fn copy_entry<W>(
        &mut self,
        entry: &ArchiveEntry,
        writer: &mut W,
        progress: Option<&ProgressFn>,
    ) -> Result<u64>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let offset = self.data_offset(entry).await?;
        copy_entry(&mut self.source, entry, offset, writer, progress).await
    }

    pub async fn close(mut self) -> Result<()> {
        self.source.close().await
    }
}

/// Find and parse the End of Central Directory record.
///
/// Handles the common no-comment case with a single 22-byte read, then
/// falls back to scanning the last 64 KiB backwards.
async fn find_eocd<S: SeekableSource + ?Sized>(
    source: &mut S,
) -> Result<(EndOfCentralDirectory, u64)> {
    let size = source.size();
    if size < EndOfCentralDirectory::SIZE as u64 {
        return Err(Error::archive("file too small to be a ZIP archive"));
    }

    let offset = size - EndOfCentralDirectory::SIZE as u64;
    let buf = source
        .read_exact_at(offset, EndOfCentralDirectory::SIZE)
        .await?;
    if &buf[0..4] == EndOfCentralDirectory::SIGNATURE && &buf[20..22] == b"\x00\x00" {
        return Ok((EndOfCentralDirectory::from_bytes(&buf)?, offset));
    }

    let search_size = (MAX_COMMENT_SIZE + EndOfCentralDirectory::SIZE as u64).min(size);
    let search_start = size - search_size;
    let buf = source
        .read_exact_at(search_start, search_size as usize)
        .await?;

    for i in (0..buf.len().saturating_sub(EndOfCentralDirectory::SIZE)).rev() {
        if &buf[i..i + 4] == EndOfCentralDirectory::SIGNATURE {
            // The comment length must account for every remaining byte.
            let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;
            if comment_len == buf.len() - i - EndOfCentralDirectory::SIZE {
                let eocd =
                    EndOfCentralDirectory::from_bytes(&buf[i..i + EndOfCentralDirectory::SIZE])?;
                return Ok((eocd, search_start + i as u64));
            }
        }
    }

    Err(Error::archive("not a valid ZIP file"))
}

async fn read_zip64_eocd<S: SeekableSource + ?Sized>(
    source: &mut S,
    eocd_offset: u64,
) -> Result<Zip64Eocd> {
    let locator_offset = eocd_offset
        .checked_sub(Zip64EocdLocator::SIZE as u64)
        .ok_or_else(|| Error::archive("missing ZIP64 locator"))?;
    let buf = source
        .read_exact_at(locator_offset, Zip64EocdLocator::SIZE)
        .await?;
    let locator = Zip64EocdLocator::from_bytes(&buf)?;

    let buf = source
        .read_exact_at(locator.eocd64_offset, Zip64Eocd::MIN_SIZE)
        .await?;
    Zip64Eocd::from_bytes(&buf)
}

async fn read_central_directory<S: SeekableSource + ?Sized>(
    source: &mut S,
) -> Result<Vec<ArchiveEntry>> {
    let (eocd, eocd_offset) = find_eocd(source).await?;

    let (cd_offset, cd_size, total_entries) = if eocd.is_zip64() {
        let eocd64 = read_zip64_eocd(source, eocd_offset).await?;
        (eocd64.cd_offset, eocd64.cd_size, eocd64.total_entries)
    } else {
        (
            eocd.cd_offset as u64,
            eocd.cd_size as u64,
            eocd.total_entries as u64,
        )
    };

    if cd_offset
        .checked_add(cd_size)
        .is_none_or(|end| end > source.size())
    {
        return Err(Error::archive("central directory extends past end of file"));
    }

    // One request for the whole directory.
    let cd_data = source.read_exact_at(cd_offset, cd_size as usize).await?;

    let mut entries = Vec::with_capacity(total_entries.min(u16::MAX as u64) as usize);
    let mut cursor = Cursor::new(cd_data.as_slice());
    for _ in 0..total_entries {
        entries.push(parse_cdfh(&mut cursor)?);
    }
    Ok(entries)
}

fn parse_cdfh(cursor: &mut Cursor<&[u8]>) -> Result<ArchiveEntry> {
    let remaining = cursor.get_ref().len() as u64 - cursor.position();
    if remaining < CDFH_MIN_SIZE as u64 {
        return Err(Error::archive("truncated central directory"));
    }

    let mut sig = [0u8; 4];
    cursor.read_exact(&mut sig)?;
    if sig != CDFH_SIGNATURE {
        return Err(Error::archive("invalid central directory file header"));
    }

    // version made by, version needed, flags
    cursor.set_position(cursor.position() + 6);
    let compression = cursor.read_u16::<LittleEndian>()?;
    // mod time, mod date
    cursor.set_position(cursor.position() + 4);
    let crc32 = cursor.read_u32::<LittleEndian>()?;
    let mut compressed_size = cursor.read_u32::<LittleEndian>()? as u64;
    let mut size = cursor.read_u32::<LittleEndian>()? as u64;
    let name_len = cursor.read_u16::<LittleEndian>()?;
    let extra_len = cursor.read_u16::<LittleEndian>()?;
    let comment_len = cursor.read_u16::<LittleEndian>()?;
    // disk number start, internal attrs, external attrs
    cursor.set_position(cursor.position() + 8);
    let mut header_offset = cursor.read_u32::<LittleEndian>()? as u64;

    let mut name_bytes = vec![0u8; name_len as usize];
    cursor
        .read_exact(&mut name_bytes)
        .map_err(|_| Error::archive("truncated entry name"))?;
    let name = String::from_utf8_lossy(&name_bytes).to_string();
    let is_directory = name.ends_with('/');

    // ZIP64 extended information lives in extra field 0x0001; each value is
    // present only when the 32-bit header field is saturated.
    let extra_end = cursor.position() + extra_len as u64;
    while cursor.position() + 4 <= extra_end {
        let header_id = cursor.read_u16::<LittleEndian>()?;
        let field_size = cursor.read_u16::<LittleEndian>()? as u64;
        let field_end = (cursor.position() + field_size).min(extra_end);

        if header_id == 0x0001 {
            if size == 0xFFFFFFFF && cursor.position() + 8 <= field_end {
                size = cursor.read_u64::<LittleEndian>()?;
            }
            if compressed_size == 0xFFFFFFFF && cursor.position() + 8 <= field_end {
                compressed_size = cursor.read_u64::<LittleEndian>()?;
            }
            if header_offset == 0xFFFFFFFF && cursor.position() + 8 <= field_end {
                header_offset = cursor.read_u64::<LittleEndian>()?;
            }
        }
        cursor.set_position(field_end);
    }
    cursor.set_position(extra_end + comment_len as u64);

    Ok(ArchiveEntry {
        name,
        compression: CompressionMethod::from_u16(compression),
        compressed_size,
        size,
        crc32,
        header_offset,
        is_directory,
    })
}

/// Skip the entry's local file header, whose variable-length fields may
/// differ from the central directory copy.
pub(crate) async fn data_offset<S: SeekableSource + ?Sized>(
    source: &mut S,
    entry: &ArchiveEntry,
) -> Result<u64> {
    let lfh = source.read_exact_at(entry.header_offset, LFH_SIZE).await?;
    if &lfh[0..4] != LFH_SIGNATURE {
        return Err(Error::archive(format!(
            "invalid local file header for {}",
            entry.name
        )));
    }

    let mut cursor = Cursor::new(&lfh[26..30]);
    let name_len = cursor.read_u16::<LittleEndian>()? as u64;
    let extra_len = cursor.read_u16::<LittleEndian>()? as u64;

    let offset = entry
        .header_offset
        .checked_add(LFH_SIZE as u64 + name_len + extra_len)
        .ok_or_else(|| Error::archive(format!("bad header offset for {}", entry.name)))?;
    if offset
        .checked_add(entry.compressed_size)
        .is_none_or(|end| end > source.size())
    {
        return Err(Error::archive(format!(
            "data of {} extends past end of archive",
            entry.name
        )));
    }
    Ok(offset)
}
