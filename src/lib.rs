pub mod asm;
pub mod bank;
pub mod build;
pub mod compression;
pub mod error;
pub mod extract;
pub mod inspect;
pub mod parser;
pub mod rom;
pub mod serializer;
pub mod song;
pub mod spc;
pub mod wav;

pub use bank::{Bank, MusicBank, MusicBankConfig};
pub use error::{ErrorClass, MusicError};
pub use rom::Rom;

#[derive(Debug, Default)]
pub struct FileFilters {
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
}

impl FileFilters {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.includes.is_empty() && self.excludes.is_empty()
    }
    pub fn matches(&self, s: &str) -> bool {
        if !self.includes.is_empty() && !self.includes.iter().any(|f| glob_match::glob_match(f, s))
        {
            return false;
        }
        !self.excludes.iter().any(|f| glob_match::glob_match(f, s))
    }
}

/// Parses a `BANK=BYTES` capacity override.
pub fn parse_bank_limit(s: &str) -> Result<(Bank, usize), String> {
    let (bank, bytes) = s
        .split_once('=')
        .ok_or_else(|| format!("expected BANK=BYTES, got `{s}`"))?;
    let bank = <Bank as clap::ValueEnum>::from_str(bank.trim(), true)?;
    let bytes = bytes.trim();
    let bytes = match bytes.strip_prefix("0x") {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => bytes.parse(),
    }
    .map_err(|e| e.to_string())?;
    Ok((bank, bytes))
}

pub fn bank_config(limits: &[(Bank, usize)]) -> MusicBankConfig {
    limits
        .iter()
        .fold(MusicBankConfig::default(), |config, &(bank, bytes)| {
            config.with_limit(bank, bytes)
        })
}

#[inline]
fn too_large<'a, E: nom::error::ParseError<&'a [u8]>>(input: &'a [u8]) -> nom::Err<E> {
    nom::Err::Error(nom::error::make_error(
        input,
        nom::error::ErrorKind::TooLarge,
    ))
}

#[inline]
fn nom_fail<'a, E: nom::error::ParseError<&'a [u8]>>(input: &'a [u8]) -> nom::Err<E> {
    nom::Err::Error(nom::error::make_error(input, nom::error::ErrorKind::Fail))
}

fn convert_error<I: std::ops::Deref<Target = [u8]>>(
    input: I,
    e: nom::Err<nom::error::VerboseError<I>>,
) -> String {
    use std::fmt::Write;

    let e = match e {
        nom::Err::Incomplete(nom::Needed::Unknown) => return "Incomplete".into(),
        nom::Err::Incomplete(nom::Needed::Size(n)) => return format!("Need {n} more bytes"),
        nom::Err::Error(e) | nom::Err::Failure(e) => e,
    };
    let mut result = String::new();
    for (i, (substring, kind)) in e.errors.iter().enumerate() {
        let offset = nom::Offset::offset(&*input, substring);

        let _ = if i == 0 {
            write!(&mut result, "Parse error at position 0x{offset:x}")
        } else {
            write!(&mut result, ", 0x{offset:x}")
        };
        let _ = match kind {
            nom::error::VerboseErrorKind::Char(c) => write!(&mut result, " expected '{c}'"),
            nom::error::VerboseErrorKind::Context(context) => write!(&mut result, " in {context}"),
            nom::error::VerboseErrorKind::Nom(err) => write!(&mut result, " ({err:?})"),
        };
    }
    result
}

#[inline]
fn is_log_level(lvl: log::LevelFilter) -> bool {
    lvl <= log::STATIC_MAX_LEVEL && lvl <= log::max_level()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters() {
        let filters = FileFilters {
            includes: vec!["Credits*".into()],
            excludes: vec!["*3".into()],
        };
        assert!(filters.matches("Credits 1"));
        assert!(!filters.matches("Credits 3"));
        assert!(!filters.matches("Title"));
        assert!(FileFilters::default().matches("anything"));
    }

    #[test]
    fn bank_limits() {
        assert_eq!(parse_bank_limit("dungeon=2048").unwrap(), (Bank::Dungeon, 2048));
        assert_eq!(
            parse_bank_limit("overworld-expanded=0x2DAE").unwrap(),
            (Bank::OverworldExpanded, 0x2DAE)
        );
        assert!(parse_bank_limit("dungeon").is_err());
        assert!(parse_bank_limit("moon=1").is_err());
        assert!(parse_bank_limit("credits=lots").is_err());

        let config = bank_config(&[(Bank::Credits, 100), (Bank::Credits, 200)]);
        assert_eq!(config.bank_limit(Bank::Credits), 200);
        assert_eq!(config.bank_limit(Bank::Dungeon), 11200);
    }
}
