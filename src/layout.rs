//! Layout template: the CE-sensitive bytes captured from an existing CAB so
//! that a repack can reproduce them exactly.

use std::collections::HashMap;
use std::io::{Cursor, Read, Seek, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::consts;
use crate::string::read_null_terminated_name;

/// Layout data captured from an existing CAB, reproduced on repack.
#[derive(Clone, Debug, Default)]
pub struct LayoutTemplate {
    pub set_id: u16,
    pub cb_cfheader: u16,
    pub cb_cffolder: u8,
    pub cb_cfdata: u8,
    pub header_reserve: Vec<u8>,
    pub folder_reserves: Vec<Vec<u8>>,
    pub file_order: Vec<String>,
    pub file_folders: HashMap<String, u16>,
}

impl LayoutTemplate {
    pub fn uses_reserve(&self) -> bool {
        self.cb_cfheader != 0
            || self.cb_cffolder != 0
            || self.cb_cfdata != 0
            || !self.header_reserve.is_empty()
    }
}

/// Parses the minimal CAB layout state needed for a CE-safe repack: header,
/// reserved-area sizes, per-folder reserve bytes, and the file order/folder
/// assignment. Does not touch data blocks. Returns `None` on any structural
/// problem (bad signature, truncated table) — callers fall back to a plain
/// rebuild without CE layout preservation.
pub fn parse_layout(buf: &[u8]) -> Option<LayoutTemplate> {
    let mut reader = Cursor::new(buf);

    let signature = reader.read_u32::<LittleEndian>().ok()?;
    if signature != consts::FILE_SIGNATURE {
        return None;
    }
    let _reserved1 = reader.read_u32::<LittleEndian>().ok()?;
    let _cabinet_size = reader.read_u32::<LittleEndian>().ok()?;
    let _reserved2 = reader.read_u32::<LittleEndian>().ok()?;
    let off_cffile = reader.read_u32::<LittleEndian>().ok()?;
    let _reserved3 = reader.read_u32::<LittleEndian>().ok()?;
    let _version_minor = reader.read_u8().ok()?;
    let _version_major = reader.read_u8().ok()?;
    let num_folders = reader.read_u16::<LittleEndian>().ok()?;
    let num_files = reader.read_u16::<LittleEndian>().ok()?;
    let flags = reader.read_u16::<LittleEndian>().ok()?;
    let set_id = reader.read_u16::<LittleEndian>().ok()?;
    let _cabinet_index = reader.read_u16::<LittleEndian>().ok()?;

    let mut cb_cfheader = 0u16;
    let mut cb_cffolder = 0u8;
    let mut cb_cfdata = 0u8;
    let mut header_reserve = Vec::new();
    if flags & consts::FLAG_RESERVE_PRESENT != 0 {
        cb_cfheader = reader.read_u16::<LittleEndian>().ok()?;
        cb_cffolder = reader.read_u8().ok()?;
        cb_cfdata = reader.read_u8().ok()?;
        header_reserve = vec![0u8; cb_cfheader as usize];
        reader.read_exact(&mut header_reserve).ok()?;
    }

    let mut folder_reserves = Vec::with_capacity(num_folders as usize);
    for _ in 0..num_folders {
        let _first_data_block_offset = reader.read_u32::<LittleEndian>().ok()?;
        let _num_data_blocks = reader.read_u16::<LittleEndian>().ok()?;
        let _compression_type = reader.read_u16::<LittleEndian>().ok()?;
        let mut reserve = vec![0u8; cb_cffolder as usize];
        if cb_cffolder > 0 {
            reader.read_exact(&mut reserve).ok()?;
        }
        folder_reserves.push(reserve);
    }

    reader.seek(SeekFrom::Start(off_cffile as u64)).ok()?;
    let mut file_order = Vec::with_capacity(num_files as usize);
    let mut file_folders = HashMap::with_capacity(num_files as usize);
    for _ in 0..num_files {
        let _uncompressed_size = reader.read_u32::<LittleEndian>().ok()?;
        let _uncompressed_offset = reader.read_u32::<LittleEndian>().ok()?;
        let folder_index = reader.read_u16::<LittleEndian>().ok()?;
        let _date = reader.read_u16::<LittleEndian>().ok()?;
        let _time = reader.read_u16::<LittleEndian>().ok()?;
        let _attributes = reader.read_u16::<LittleEndian>().ok()?;
        let name = read_null_terminated_name(&mut reader).ok()?;
        file_order.push(name.clone());
        file_folders.insert(name, folder_index);
    }

    Some(LayoutTemplate {
        set_id,
        cb_cfheader,
        cb_cffolder,
        cb_cfdata,
        header_reserve,
        folder_reserves,
        file_order,
        file_folders,
    })
}

#[cfg(test)]
mod tests {
    use super::parse_layout;

    #[test]
    fn captures_set_id_and_file_order() {
        // A hand-built minimal single-folder, single-file, no-reserve CAB:
        // just enough of the header/folder/file tables for parse_layout to
        // walk (no real CFDATA, which it never reads).
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"MSCF"); // signature
        bytes.extend_from_slice(&[0u8; 4]); // reserved1
        bytes.extend_from_slice(&[0u8; 4]); // cbCabinet (unused by parser)
        bytes.extend_from_slice(&[0u8; 4]); // reserved2
        bytes.extend_from_slice(&44u32.to_le_bytes()); // coffFiles
        bytes.extend_from_slice(&[0u8; 4]); // reserved3
        bytes.push(3); // versionMinor
        bytes.push(1); // versionMajor
        bytes.extend_from_slice(&1u16.to_le_bytes()); // cFolders
        bytes.extend_from_slice(&1u16.to_le_bytes()); // cFiles
        bytes.extend_from_slice(&0u16.to_le_bytes()); // flags
        bytes.extend_from_slice(&0x1234u16.to_le_bytes()); // setID
        bytes.extend_from_slice(&0u16.to_le_bytes()); // iCabinet
        assert_eq!(bytes.len(), 36);

        bytes.extend_from_slice(&0x43u32.to_le_bytes()); // coffCabStart
        bytes.extend_from_slice(&1u16.to_le_bytes()); // cCFData
        bytes.extend_from_slice(&0u16.to_le_bytes()); // typeCompress
        assert_eq!(bytes.len(), 44);

        bytes.extend_from_slice(&14u32.to_le_bytes()); // cbFile
        bytes.extend_from_slice(&0u32.to_le_bytes()); // uoffFolderStart
        bytes.extend_from_slice(&0u16.to_le_bytes()); // iFolder
        bytes.extend_from_slice(&0u16.to_le_bytes()); // date
        bytes.extend_from_slice(&0u16.to_le_bytes()); // time
        bytes.extend_from_slice(&0u16.to_le_bytes()); // attribs
        bytes.extend_from_slice(b"hi.txt\0");

        let template = parse_layout(&bytes).unwrap();
        assert_eq!(template.set_id, 0x1234);
        assert_eq!(template.file_order, vec!["hi.txt".to_string()]);
        assert_eq!(template.file_folders.get("hi.txt"), Some(&0));
        assert!(!template.uses_reserve());
    }

    #[test]
    fn rejects_bad_signature() {
        assert!(parse_layout(b"NOTACAB!").is_none());
        assert!(parse_layout(b"").is_none());
    }
}
