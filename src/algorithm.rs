use super::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, DeserializeFromStr, SerializeDisplay)]
pub enum AlgorithmKind {
    #[default]
    Cryptonight,
    CryptonightLite,
    CryptonightHeavy,
}

impl AlgorithmKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cryptonight => "cryptonight",
            Self::CryptonightLite => "cryptonight-lite",
            Self::CryptonightHeavy => "cryptonight-heavy",
        }
    }

    pub fn short_name(self) -> &'static str {
        match self {
            Self::Cryptonight => "cn",
            Self::CryptonightLite => "cn-lite",
            Self::CryptonightHeavy => "cn-heavy",
        }
    }
}

impl Display for AlgorithmKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlgorithmKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.to_ascii_lowercase();
        for kind in [
            Self::Cryptonight,
            Self::CryptonightLite,
            Self::CryptonightHeavy,
        ] {
            if lower == kind.as_str() || lower == kind.short_name() {
                return Ok(kind);
            }
        }
        bail!("unknown algorithm `{s}`");
    }
}

impl From<AlgorithmKind> for cryptonight::Family {
    fn from(kind: AlgorithmKind) -> Self {
        match kind {
            AlgorithmKind::Cryptonight => Self::Cryptonight,
            AlgorithmKind::CryptonightLite => Self::CryptonightLite,
            AlgorithmKind::CryptonightHeavy => Self::CryptonightHeavy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, DeserializeFromStr, SerializeDisplay)]
pub enum AlgorithmVariant {
    #[default]
    Any,
    V0,
    V1,
    V2,
    Tube,
    Alloy,
    Xtl,
    Msr,
    Xhv,
    Rto,
}

impl AlgorithmVariant {
    const ALL: [Self; 10] = [
        Self::Any,
        Self::V0,
        Self::V1,
        Self::V2,
        Self::Tube,
        Self::Alloy,
        Self::Xtl,
        Self::Msr,
        Self::Xhv,
        Self::Rto,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::V0 => "0",
            Self::V1 => "1",
            Self::V2 => "2",
            Self::Tube => "tube",
            Self::Alloy => "alloy",
            Self::Xtl => "xtl",
            Self::Msr => "msr",
            Self::Xhv => "xhv",
            Self::Rto => "rto",
        }
    }
}

impl Display for AlgorithmVariant {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlgorithmVariant {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|variant| lower == variant.as_str())
            .ok_or_else(|| anyhow!("unknown algorithm variant `{s}`"))
    }
}

impl From<AlgorithmVariant> for cryptonight::Variant {
    fn from(variant: AlgorithmVariant) -> Self {
        match variant {
            AlgorithmVariant::Any => Self::Any,
            AlgorithmVariant::V0 => Self::V0,
            AlgorithmVariant::V1 => Self::V1,
            AlgorithmVariant::V2 => Self::V2,
            AlgorithmVariant::Tube => Self::Tube,
            AlgorithmVariant::Alloy => Self::Alloy,
            AlgorithmVariant::Xtl => Self::Xtl,
            AlgorithmVariant::Msr => Self::Msr,
            AlgorithmVariant::Xhv => Self::Xhv,
            AlgorithmVariant::Rto => Self::Rto,
        }
    }
}

/// A hash algorithm selection. Equality treats [`AlgorithmVariant::Any`] on
/// either side as a wildcard over the variant, so it is deliberately not
/// `Eq`/`Hash` material.
#[derive(Debug, Clone, Copy, Default)]
pub struct Algorithm {
    pub kind: AlgorithmKind,
    pub variant: AlgorithmVariant,
}

impl Algorithm {
    pub fn new(kind: AlgorithmKind, variant: AlgorithmVariant) -> Self {
        Self { kind, variant }
    }

    pub fn hash(self, input: &[u8]) -> [u8; cryptonight::HASH_SIZE] {
        cryptonight::hash(self.kind.into(), self.variant.into(), input)
    }
}

impl PartialEq for Algorithm {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && (self.variant == other.variant
                || self.variant == AlgorithmVariant::Any
                || other.variant == AlgorithmVariant::Any)
    }
}

impl Display for Algorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.variant)
    }
}
