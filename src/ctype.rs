//! Compression scheme recorded in a CFFOLDER record.
//!
//! Only `Stored` and `MsZip` are supported for decode and encode; any other
//! bitfield is recognized (so the folder table walk doesn't choke on it) but
//! marked unsupported, which degrades the containing load to a structural-only
//! read per the layout-preservation fallback.

const CTYPE_NONE: u16 = 0;
const CTYPE_MSZIP: u16 = 1;

/// The compression scheme used for one folder's data blocks.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum CompressionType {
    /// No compression; block payload is the plaintext chunk.
    Stored,
    /// MSZIP: raw-DEFLATE blocks prefixed with the two literal bytes `CK`,
    /// sharing a 32 KiB dictionary window across a folder's blocks.
    MsZip,
    /// A recognized CAB compression type this codec does not implement
    /// (Quantum, LZX). Carries the raw bitfield for diagnostics.
    Unsupported(u16),
}

impl CompressionType {
    pub(crate) fn from_bitfield(bits: u16) -> CompressionType {
        match bits & 0x000f {
            CTYPE_NONE => CompressionType::Stored,
            CTYPE_MSZIP => CompressionType::MsZip,
            _ => CompressionType::Unsupported(bits),
        }
    }

    pub(crate) fn to_bitfield(self) -> u16 {
        match self {
            CompressionType::Stored => CTYPE_NONE,
            CompressionType::MsZip => CTYPE_MSZIP,
            CompressionType::Unsupported(bits) => bits,
        }
    }

    pub(crate) fn is_supported(self) -> bool {
        !matches!(self, CompressionType::Unsupported(_))
    }
}

#[cfg(test)]
mod tests {
    use super::CompressionType;

    #[test]
    fn round_trips_supported_bitfields() {
        assert_eq!(CompressionType::Stored.to_bitfield(), 0x0);
        assert_eq!(CompressionType::MsZip.to_bitfield(), 0x1);
        assert_eq!(
            CompressionType::from_bitfield(0x0),
            CompressionType::Stored
        );
        assert_eq!(
            CompressionType::from_bitfield(0x1),
            CompressionType::MsZip
        );
    }

    #[test]
    fn flags_unknown_types_as_unsupported() {
        let quantum = CompressionType::from_bitfield(0x1472);
        assert_eq!(quantum, CompressionType::Unsupported(0x1472));
        assert!(!quantum.is_supported());
        assert!(CompressionType::MsZip.is_supported());
    }
}
