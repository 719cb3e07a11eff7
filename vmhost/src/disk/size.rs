//! Sizes with a binary scale, printed the way `qemu-img` and `-m` expect.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{VmhostError, VmhostResult};

/// Binary scale suffix: k = 2^10 ... E = 2^60.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum SizeScale {
    #[serde(rename = "k")]
    Kilo,
    #[serde(rename = "M")]
    Mega,
    #[serde(rename = "G")]
    Giga,
    #[serde(rename = "T")]
    Tera,
    #[serde(rename = "P")]
    Peta,
    #[serde(rename = "E")]
    Exa,
}

impl SizeScale {
    pub fn suffix(&self) -> char {
        match self {
            SizeScale::Kilo => 'k',
            SizeScale::Mega => 'M',
            SizeScale::Giga => 'G',
            SizeScale::Tera => 'T',
            SizeScale::Peta => 'P',
            SizeScale::Exa => 'E',
        }
    }

    fn shift(&self) -> u32 {
        match self {
            SizeScale::Kilo => 10,
            SizeScale::Mega => 20,
            SizeScale::Giga => 30,
            SizeScale::Tera => 40,
            SizeScale::Peta => 50,
            SizeScale::Exa => 60,
        }
    }

    fn from_suffix(c: char) -> Option<Self> {
        match c {
            'k' | 'K' => Some(SizeScale::Kilo),
            'M' | 'm' => Some(SizeScale::Mega),
            'G' | 'g' => Some(SizeScale::Giga),
            'T' | 't' => Some(SizeScale::Tera),
            'P' | 'p' => Some(SizeScale::Peta),
            'E' | 'e' => Some(SizeScale::Exa),
            _ => None,
        }
    }
}

/// A value plus binary scale, e.g. `5G`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataSize {
    pub value: u64,
    pub scale: SizeScale,
}

impl DataSize {
    pub const fn new(value: u64, scale: SizeScale) -> Self {
        Self { value, scale }
    }

    pub const fn gib(value: u64) -> Self {
        Self::new(value, SizeScale::Giga)
    }

    pub const fn mib(value: u64) -> Self {
        Self::new(value, SizeScale::Mega)
    }

    /// Size in bytes; `InvalidArgument` on overflow.
    pub fn bytes(&self) -> VmhostResult<u64> {
        self.value
            .checked_mul(1u64 << self.scale.shift())
            .ok_or_else(|| VmhostError::InvalidArgument(format!("size {} overflows u64", self)))
    }
}

impl fmt::Display for DataSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.value, self.scale.suffix())
    }
}

impl FromStr for DataSize {
    type Err = VmhostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || VmhostError::InvalidArgument(format!("invalid size '{}'", s));

        let suffix = s.chars().last().ok_or_else(invalid)?;
        let scale = SizeScale::from_suffix(suffix).ok_or_else(invalid)?;
        let value: u64 = s[..s.len() - suffix.len_utf8()]
            .parse()
            .map_err(|_| invalid())?;
        if value == 0 {
            return Err(invalid());
        }
        Ok(Self { value, scale })
    }
}
