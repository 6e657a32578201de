//! CAB byte-level codec: decodes a CAB buffer into an [`Archive`] plus,
//! when recoverable, the [`LayoutTemplate`] needed to reproduce CE-sensitive
//! bytes on repack, and encodes an archive back into CE-safe CAB bytes.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Seek, SeekFrom};
use tracing::{instrument, warn};

use crate::archive::{Archive, ArchiveEntry};
use crate::checksum::Checksum;
use crate::consts;
use crate::ctype::CompressionType;
use crate::datetime::{datetime_from_bits, datetime_to_bits};
use crate::error::{Error, Result};
use crate::layout::{self, LayoutTemplate};
use crate::mszip::{MsZipCompressor, MsZipDecompressor};
use crate::string::{encode_name_with_terminator, read_null_terminated_name};

struct RawFolder {
    first_data_block_offset: u32,
    num_data_blocks: u16,
    compression: CompressionType,
}

struct RawFile {
    uncompressed_size: u32,
    uncompressed_offset: u32,
    folder_index: u16,
    date: u16,
    time: u16,
    attributes: u16,
}

fn hard(error: std::io::Error) -> Error {
    Error::StructuralDecode(error.to_string())
}

/// Walks the header, folder table, and file table a second time to recover
/// the fields `LayoutTemplate` intentionally doesn't capture (per-folder
/// compression and block layout, per-file size/offset/timestamp/attributes).
/// Only called after `layout::parse_layout` has already succeeded on the
/// same buffer, so failure here indicates a genuinely inconsistent cabinet.
fn read_decode_records(buf: &[u8]) -> Result<(Vec<RawFolder>, Vec<RawFile>)> {
    let mut reader = Cursor::new(buf);
    reader.seek(SeekFrom::Start(4)).map_err(hard)?; // past signature
    let _reserved1 = reader.read_u32::<LittleEndian>().map_err(hard)?;
    let _cabinet_size = reader.read_u32::<LittleEndian>().map_err(hard)?;
    let _reserved2 = reader.read_u32::<LittleEndian>().map_err(hard)?;
    let off_cffile = reader.read_u32::<LittleEndian>().map_err(hard)?;
    let _reserved3 = reader.read_u32::<LittleEndian>().map_err(hard)?;
    let _version_minor = reader.read_u8().map_err(hard)?;
    let _version_major = reader.read_u8().map_err(hard)?;
    let num_folders = reader.read_u16::<LittleEndian>().map_err(hard)?;
    let num_files = reader.read_u16::<LittleEndian>().map_err(hard)?;
    let flags = reader.read_u16::<LittleEndian>().map_err(hard)?;
    let _set_id = reader.read_u16::<LittleEndian>().map_err(hard)?;
    let _cabinet_index = reader.read_u16::<LittleEndian>().map_err(hard)?;

    let mut cb_cffolder = 0u8;
    if flags & consts::FLAG_RESERVE_PRESENT != 0 {
        let cb_cfheader = reader.read_u16::<LittleEndian>().map_err(hard)?;
        cb_cffolder = reader.read_u8().map_err(hard)?;
        let _cb_cfdata = reader.read_u8().map_err(hard)?;
        reader
            .seek(SeekFrom::Current(cb_cfheader as i64))
            .map_err(hard)?;
    }

    let mut folders = Vec::with_capacity(num_folders as usize);
    for _ in 0..num_folders {
        let first_data_block_offset =
            reader.read_u32::<LittleEndian>().map_err(hard)?;
        let num_data_blocks = reader.read_u16::<LittleEndian>().map_err(hard)?;
        let compression_bits = reader.read_u16::<LittleEndian>().map_err(hard)?;
        if cb_cffolder > 0 {
            reader
                .seek(SeekFrom::Current(cb_cffolder as i64))
                .map_err(hard)?;
        }
        folders.push(RawFolder {
            first_data_block_offset,
            num_data_blocks,
            compression: CompressionType::from_bitfield(compression_bits),
        });
    }

    reader.seek(SeekFrom::Start(off_cffile as u64)).map_err(hard)?;
    let mut files = Vec::with_capacity(num_files as usize);
    for _ in 0..num_files {
        let uncompressed_size = reader.read_u32::<LittleEndian>().map_err(hard)?;
        let uncompressed_offset =
            reader.read_u32::<LittleEndian>().map_err(hard)?;
        let folder_index = reader.read_u16::<LittleEndian>().map_err(hard)?;
        let date = reader.read_u16::<LittleEndian>().map_err(hard)?;
        let time = reader.read_u16::<LittleEndian>().map_err(hard)?;
        let attributes = reader.read_u16::<LittleEndian>().map_err(hard)?;
        let _name = read_null_terminated_name(&mut reader).map_err(hard)?;
        files.push(RawFile {
            uncompressed_size,
            uncompressed_offset,
            folder_index,
            date,
            time,
            attributes,
        });
    }
    Ok((folders, files))
}

/// Decodes every data block of one folder into its concatenated plaintext
/// stream. Returns `None` (rather than an error) on anything that should
/// degrade the whole load to structural-only mode: unsupported compression,
/// a checksum mismatch, a truncated block, or a decompression failure.
fn decode_folder_stream(
    buf: &[u8],
    folder: &RawFolder,
    cb_cfdata: u8,
) -> Option<Vec<u8>> {
    if !folder.compression.is_supported() {
        return None;
    }
    let mut reader = Cursor::new(buf);
    reader.seek(SeekFrom::Start(folder.first_data_block_offset as u64)).ok()?;
    let mut stream = Vec::new();
    let mut decompressor = MsZipDecompressor::new();
    for _ in 0..folder.num_data_blocks {
        let checksum_field = reader.read_u32::<LittleEndian>().ok()?;
        let cb_data = reader.read_u16::<LittleEndian>().ok()?;
        let cb_uncomp = reader.read_u16::<LittleEndian>().ok()?;
        if cb_cfdata > 0 {
            reader.seek(SeekFrom::Current(cb_cfdata as i64)).ok()?;
        }
        let mut raw_block = vec![0u8; cb_data as usize];
        reader.read_exact(&mut raw_block).ok()?;

        let mut check = Checksum::new();
        check.update(&cb_data.to_le_bytes());
        check.update(&cb_uncomp.to_le_bytes());
        check.update(&raw_block);
        if check.value() != checksum_field {
            warn!("MSZIP block checksum mismatch, falling back to structural-only");
            return None;
        }

        let decoded = match folder.compression {
            CompressionType::Stored => raw_block,
            CompressionType::MsZip => decompressor
                .decompress_block(&raw_block, cb_uncomp as usize)
                .ok()?,
            CompressionType::Unsupported(_) => return None,
        };
        stream.extend_from_slice(&decoded);
    }
    Some(stream)
}

/// Parses a CAB buffer into an archive plus, when the layout is recoverable,
/// the template needed to reproduce CE-sensitive bytes on repack.
///
/// Failures while walking the header, folder table, or file table are
/// fatal: the buffer isn't a CAB this crate can load at all. A failure
/// isolated to one folder's data blocks degrades to a structural-only read:
/// the layout template is discarded and that folder's files get an empty
/// payload, but the load still succeeds.
#[instrument(skip(buf), fields(len = buf.len()))]
pub fn parse_cab(buf: &[u8]) -> Result<(Option<LayoutTemplate>, Archive)> {
    let template = layout::parse_layout(buf)
        .ok_or_else(|| Error::StructuralDecode("malformed CAB header or tables".into()))?;
    let (folders, files) = read_decode_records(buf)?;
    if files.len() != template.file_order.len() {
        return Err(Error::StructuralDecode(
            "file table length mismatch between layout and decode passes".into(),
        ));
    }

    let mut structural_only = false;
    let mut folder_streams: Vec<Option<Vec<u8>>> = Vec::with_capacity(folders.len());
    for folder in &folders {
        let stream = decode_folder_stream(buf, folder, template.cb_cfdata);
        if stream.is_none() {
            structural_only = true;
        }
        folder_streams.push(stream);
    }

    let mut archive = Archive::new();
    for (name, raw) in template.file_order.iter().zip(files.iter()) {
        let payload = match folder_streams.get(raw.folder_index as usize) {
            Some(Some(stream)) => {
                let start = raw.uncompressed_offset as usize;
                let end = start + raw.uncompressed_size as usize;
                match stream.get(start..end) {
                    Some(slice) => slice.to_vec(),
                    None => {
                        structural_only = true;
                        Vec::new()
                    }
                }
            }
            _ => Vec::new(),
        };
        let entry = ArchiveEntry {
            payload,
            datetime: datetime_from_bits(raw.date, raw.time),
            attributes: raw.attributes,
            wire_name: None,
        };
        archive.insert(name.clone(), entry);
    }

    Ok((if structural_only { None } else { Some(template) }, archive))
}

fn chunkify(data: &[u8], chunk_size: usize) -> Vec<&[u8]> {
    if data.is_empty() {
        return vec![&data[0..0]];
    }
    data.chunks(chunk_size).collect()
}

struct FolderBuild {
    names: Vec<String>,
    reserve: Vec<u8>,
    blocks: Vec<(Vec<u8>, u32)>, // (encoded bytes, plaintext size)
}

fn order_names(archive: &Archive, template: Option<&LayoutTemplate>, sort: bool) -> Vec<String> {
    let mut remaining: Vec<&str> = archive.keys().collect();
    let mut ordered = Vec::with_capacity(remaining.len());
    if let Some(template) = template {
        for name in &template.file_order {
            if let Some(pos) = remaining.iter().position(|n| *n == name.as_str()) {
                ordered.push(name.clone());
                remaining.remove(pos);
            }
        }
    }
    if sort {
        remaining.sort_unstable();
    }
    ordered.extend(remaining.into_iter().map(String::from));
    ordered
}

fn build_folders(
    archive: &Archive,
    ordered_names: &[String],
    template: &LayoutTemplate,
    compress: bool,
) -> Result<Vec<FolderBuild>> {
    let mut next_key = template.file_folders.values().copied().max().map_or(0, |m| m + 1);
    let mut keyed: Vec<(u16, Vec<String>)> = Vec::new();
    for name in ordered_names {
        let key = template.file_folders.get(name).copied().unwrap_or_else(|| {
            let key = next_key;
            next_key += 1;
            key
        });
        match keyed.iter_mut().find(|(k, _)| *k == key) {
            Some((_, names)) => names.push(name.clone()),
            None => keyed.push((key, vec![name.clone()])),
        }
    }

    let mut out = Vec::with_capacity(keyed.len());
    for (key, names) in keyed {
        let mut reserve = template
            .folder_reserves
            .get(key as usize)
            .cloned()
            .unwrap_or_default();
        reserve.resize(template.cb_cffolder as usize, 0);

        let mut raw = Vec::new();
        for name in &names {
            raw.extend_from_slice(&archive.get(name).expect("ordered name exists").payload);
        }
        let chunks = chunkify(&raw, consts::MAX_UNCOMPRESSED_BLOCK_SIZE);

        let mut blocks = Vec::with_capacity(chunks.len());
        let mut compressor = MsZipCompressor::new();
        for (index, chunk) in chunks.iter().enumerate() {
            let is_last = index + 1 == chunks.len();
            let encoded = if compress {
                compressor
                    .compress_block(chunk, is_last)
                    .map_err(|e| Error::InvariantViolation(e.to_string()))?
            } else {
                chunk.to_vec()
            };
            blocks.push((encoded, chunk.len() as u32));
        }
        out.push(FolderBuild { names, reserve, blocks });
    }
    Ok(out)
}

/// Renders an archive to CAB bytes, preserving CE-sensitive layout fields
/// from `template` when given. `compress` selects MSZIP for every folder
/// (matching the source cabinet's own single-scheme-per-rebuild behavior);
/// `sort` controls whether files with no prior folder assignment are
/// appended in lexical order or in their `Archive` iteration order.
#[instrument(skip(archive, template), fields(entries = archive.len()))]
pub fn build_ce_cab_bytes(
    archive: &Archive,
    template: Option<&LayoutTemplate>,
    compress: bool,
    sort: bool,
) -> Result<Vec<u8>> {
    let ordered_names = order_names(archive, template, sort);
    if ordered_names.is_empty() {
        return Err(Error::InvariantViolation("CAB cannot be empty".into()));
    }
    if ordered_names.len() > consts::MAX_NUM_FILES {
        return Err(Error::InvariantViolation("too many files for one CAB".into()));
    }

    let owned_template;
    let template = match template {
        Some(template) => template,
        None => {
            owned_template = LayoutTemplate::default();
            &owned_template
        }
    };
    let use_reserve = template.uses_reserve();
    let flags = if use_reserve { consts::FLAG_RESERVE_PRESENT } else { 0 };

    let folder_builds = build_folders(archive, &ordered_names, template, compress)?;
    if folder_builds.len() > consts::MAX_NUM_FOLDERS {
        return Err(Error::InvariantViolation("too many folders for one CAB".into()));
    }

    let mut folder_index_by_name = std::collections::HashMap::with_capacity(ordered_names.len());
    for (index, folder) in folder_builds.iter().enumerate() {
        for name in &folder.names {
            folder_index_by_name.insert(name.clone(), index as u16);
        }
    }

    let mut offsets_by_name = std::collections::HashMap::with_capacity(ordered_names.len());
    for folder in &folder_builds {
        let mut offset = 0u32;
        for name in &folder.names {
            offsets_by_name.insert(name.clone(), offset);
            offset += archive.get(name).expect("ordered name exists").payload.len() as u32;
        }
    }

    let header_size = 36
        + if use_reserve {
            4 + template.cb_cfheader as usize
        } else {
            0
        };
    let folder_record_size = 8 + template.cb_cffolder as usize;
    let folder_table_size = folder_builds.len() * folder_record_size;
    let coff_files = header_size + folder_table_size;

    let mut cffile_blob = Vec::new();
    for name in &ordered_names {
        let entry = archive.get(name).expect("ordered name exists");
        let (date, time) = datetime_to_bits(
            entry.datetime.unwrap_or(crate::datetime::datetime_from_bits(0x21, 0).unwrap()),
        );
        cffile_blob.write_u32::<LittleEndian>(entry.payload.len() as u32)?;
        cffile_blob.write_u32::<LittleEndian>(offsets_by_name[name])?;
        cffile_blob.write_u16::<LittleEndian>(folder_index_by_name[name])?;
        cffile_blob.write_u16::<LittleEndian>(date)?;
        cffile_blob.write_u16::<LittleEndian>(time)?;
        cffile_blob.write_u16::<LittleEndian>(entry.attributes)?;
        cffile_blob.extend_from_slice(&encode_name_with_terminator(
            entry.wire_name.as_deref().unwrap_or(name),
        ));
    }

    let cfdata_start = coff_files + cffile_blob.len();
    let mut cffolder_blob = Vec::new();
    let mut cfdata_blob = Vec::new();
    let mut cursor = cfdata_start as u32;
    let compression_bits = CompressionType::MsZip.to_bitfield();
    let stored_bits = CompressionType::Stored.to_bitfield();
    for folder in &folder_builds {
        let mut block_bytes = 0u32;
        for (encoded, plain_size) in &folder.blocks {
            let cb_data = encoded.len() as u16;
            let cb_uncomp = *plain_size as u16;
            let mut check = Checksum::new();
            check.update(&cb_data.to_le_bytes());
            check.update(&cb_uncomp.to_le_bytes());
            check.update(encoded);
            cfdata_blob.write_u32::<LittleEndian>(check.value())?;
            cfdata_blob.write_u16::<LittleEndian>(cb_data)?;
            cfdata_blob.write_u16::<LittleEndian>(cb_uncomp)?;
            cfdata_blob.resize(cfdata_blob.len() + template.cb_cfdata as usize, 0);
            cfdata_blob.extend_from_slice(encoded);
            block_bytes += 8 + template.cb_cfdata as u32 + encoded.len() as u32;
        }
        cffolder_blob.write_u32::<LittleEndian>(cursor)?;
        cffolder_blob.write_u16::<LittleEndian>(folder.blocks.len() as u16)?;
        cffolder_blob.write_u16::<LittleEndian>(if compress { compression_bits } else { stored_bits })?;
        if template.cb_cffolder > 0 {
            cffolder_blob.extend_from_slice(&folder.reserve);
        }
        cursor += block_bytes;
    }

    let cabinet_size =
        header_size + cffolder_blob.len() + cffile_blob.len() + cfdata_blob.len();
    if cabinet_size as u64 > consts::MAX_TOTAL_CAB_SIZE as u64 {
        return Err(Error::InvariantViolation("CAB exceeds maximum cabinet size".into()));
    }

    let mut out = Vec::with_capacity(cabinet_size);
    out.write_u32::<LittleEndian>(consts::FILE_SIGNATURE)?;
    out.write_u32::<LittleEndian>(0)?; // reserved1
    out.write_u32::<LittleEndian>(cabinet_size as u32)?;
    out.write_u32::<LittleEndian>(0)?; // reserved2
    out.write_u32::<LittleEndian>(coff_files as u32)?;
    out.write_u32::<LittleEndian>(0)?; // reserved3
    out.write_u8(consts::VERSION_MINOR)?;
    out.write_u8(consts::VERSION_MAJOR)?;
    out.write_u16::<LittleEndian>(folder_builds.len() as u16)?;
    out.write_u16::<LittleEndian>(ordered_names.len() as u16)?;
    out.write_u16::<LittleEndian>(flags)?;
    out.write_u16::<LittleEndian>(template.set_id)?;
    out.write_u16::<LittleEndian>(0)?; // iCabinet

    if use_reserve {
        out.write_u16::<LittleEndian>(template.cb_cfheader)?;
        out.write_u8(template.cb_cffolder)?;
        out.write_u8(template.cb_cfdata)?;
        let mut reserve = template.header_reserve.clone();
        reserve.resize(template.cb_cfheader as usize, 0);
        out.extend_from_slice(&reserve);
    }

    out.extend_from_slice(&cffolder_blob);
    out.extend_from_slice(&cffile_blob);
    out.extend_from_slice(&cfdata_blob);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveEntry;

    fn sample_archive() -> Archive {
        let mut archive = Archive::new();
        archive.insert("hi.txt", ArchiveEntry::new(b"Hello, world!\n".to_vec()));
        archive
    }

    #[test]
    fn round_trips_stored_cab() {
        let archive = sample_archive();
        let bytes = build_ce_cab_bytes(&archive, None, false, true).unwrap();
        let (template, parsed) = parse_cab(&bytes).unwrap();
        assert!(template.is_some());
        assert_eq!(parsed.get("hi.txt").unwrap().payload, b"Hello, world!\n");
    }

    #[test]
    fn round_trips_compressed_cab() {
        let archive = sample_archive();
        let bytes = build_ce_cab_bytes(&archive, None, true, true).unwrap();
        let (_template, parsed) = parse_cab(&bytes).unwrap();
        assert_eq!(parsed.get("hi.txt").unwrap().payload, b"Hello, world!\n");
    }

    #[test]
    fn refuses_to_build_an_empty_cab() {
        let archive = Archive::new();
        assert!(build_ce_cab_bytes(&archive, None, false, true).is_err());
    }

    #[test]
    fn preserves_layout_template_across_round_trip() {
        let mut archive = sample_archive();
        archive.insert("second.bin", ArchiveEntry::new(vec![1, 2, 3, 4]));
        let bytes = build_ce_cab_bytes(&archive, None, true, true).unwrap();
        let (template, _parsed) = parse_cab(&bytes).unwrap();
        let template = template.unwrap();
        assert_eq!(template.file_order.len(), 2);
    }
}
