use thiserror::Error;

/// Coarse failure classes callers use to decide how to react.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorClass {
    /// Pointer/offset outside bounds or an invalid index.
    OutOfRange,
    /// Bytecode, BRR or assembly input that cannot be interpreted.
    Malformed,
    /// Operation attempted in the wrong state.
    Precondition,
    /// A bank's capacity would be exceeded.
    SizeOverflow,
    /// Host file I/O.
    Io,
}

#[derive(Debug, Error)]
pub enum MusicError {
    #[error("offset 0x{offset:x} (+{len}) is outside the {size} byte image")]
    OutOfRange {
        offset: usize,
        len: usize,
        size: usize,
    },
    #[error("ARAM address ${address:04X} not found in SPC bank {bank}")]
    AddressNotFound { address: u16, bank: u8 },
    #[error("invalid {what} index {index}")]
    InvalidIndex { what: &'static str, index: usize },
    #[error("{0}")]
    Malformed(String),
    #[error("circular reference detected at ${0:04X}")]
    CircularReference(u16),
    #[error("maximum parse depth {0} exceeded")]
    DepthExceeded(usize),
    #[error("unknown macro `{0}`")]
    UnknownMacro(String),
    #[error("cannot encode {0}")]
    Unencodable(String),
    #[error("failed to parse music state: {0}")]
    Json(#[from] serde_json::Error),
    #[error("ROM is not loaded")]
    RomNotLoaded,
    #[error("no music data loaded")]
    NotLoaded,
    #[error("cannot delete vanilla song {0}")]
    VanillaProtected(usize),
    #[error("{bank} bank overflow ({needed} bytes needed, limit {limit})")]
    BankOverflow {
        bank: &'static str,
        needed: usize,
        limit: usize,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl MusicError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::OutOfRange { .. } | Self::AddressNotFound { .. } | Self::InvalidIndex { .. } => {
                ErrorClass::OutOfRange
            }
            Self::Malformed(_)
            | Self::CircularReference(_)
            | Self::DepthExceeded(_)
            | Self::UnknownMacro(_)
            | Self::Unencodable(_)
            | Self::Json(_) => ErrorClass::Malformed,
            Self::RomNotLoaded | Self::NotLoaded | Self::VanillaProtected(_) => {
                ErrorClass::Precondition
            }
            Self::BankOverflow { .. } => ErrorClass::SizeOverflow,
            Self::Io(_) => ErrorClass::Io,
        }
    }
    #[inline]
    pub fn malformed(args: impl std::fmt::Display) -> Self {
        Self::Malformed(args.to_string())
    }
}

pub type Result<T, E = MusicError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes() {
        assert_eq!(MusicError::CircularReference(0xD000).class(), ErrorClass::Malformed);
        assert_eq!(MusicError::DepthExceeded(1).class(), ErrorClass::Malformed);
        assert_eq!(MusicError::NotLoaded.class(), ErrorClass::Precondition);
        assert_eq!(
            MusicError::InvalidIndex { what: "song", index: 3 }.class(),
            ErrorClass::OutOfRange
        );
        assert_eq!(
            MusicError::BankOverflow { bank: "Dungeon", needed: 3000, limit: 2048 }.class(),
            ErrorClass::SizeOverflow
        );
    }

    #[test]
    fn display() {
        assert_eq!(
            MusicError::CircularReference(0xD0A0).to_string(),
            "circular reference detected at $D0A0"
        );
        assert_eq!(
            MusicError::AddressNotFound { address: 0x1234, bank: 2 }.to_string(),
            "ARAM address $1234 not found in SPC bank 2"
        );
    }
}
