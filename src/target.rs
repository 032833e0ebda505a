use super::*;

/// A 64-bit share target.
///
/// The wire form is the little-endian byte serialization of the raw value,
/// truncated from the top: `to_hex(4)` emits the high four bytes,
/// least-significant first, which is the compact form pools hand to miners.
/// Short hex forms parse back by placing the encoded bytes in the high half.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, DeserializeFromStr, SerializeDisplay)]
pub struct Target(u64);

impl Target {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn from_u32(raw: u32) -> Self {
        Self((raw as u64) << 32)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Keeps the `bytes` most significant bytes and zeroes the rest.
    pub fn trim(self, bytes: usize) -> Self {
        if bytes >= 8 {
            return self;
        }
        if bytes == 0 {
            return Self(0);
        }
        let mask = !0u64 << (8 * (8 - bytes as u32));
        Self(self.0 & mask)
    }

    /// Hex of the `bytes` most significant bytes, least-significant first.
    pub fn to_hex(self, bytes: usize) -> String {
        let bytes = bytes.min(8);
        hex::encode(&self.0.to_le_bytes()[8 - bytes..])
    }
}

impl Display for Target {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex(4))
    }
}

impl FromStr for Target {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).with_context(|| format!("invalid target hex `{s}`"))?;
        ensure!(
            !bytes.is_empty() && bytes.len() <= 8,
            "target hex `{s}` must be one to eight bytes"
        );

        let mut raw = [0u8; 8];
        raw[..bytes.len()].copy_from_slice(&bytes);
        Ok(Self(u64::from_le_bytes(raw) << (8 * (8 - bytes.len() as u32))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TARGET64: u64 = 0x0012_3456_789a_bcde;

    #[test]
    fn parses_full_width_hex() {
        assert_eq!("debc9a7856341200".parse::<Target>().unwrap().raw(), TARGET64);
    }

    #[test]
    fn short_hex_lands_in_the_high_half() {
        assert_eq!(
            "56341200".parse::<Target>().unwrap().raw(),
            0x0012_3456_0000_0000
        );
        assert_eq!(
            "56341200".parse::<Target>().unwrap(),
            Target::from_u32(0x0012_3456)
        );
    }

    #[test]
    fn hex_forms() {
        let target = Target::from_raw(TARGET64);
        assert_eq!(target.to_hex(4), "56341200");
        assert_eq!(target.to_hex(8), "debc9a7856341200");
        assert_eq!(Target::from_u32(0x0012_3456).to_hex(8), "0000000056341200");
        assert_eq!(target.to_string(), "56341200");
    }

    #[test]
    fn hex_round_trip() {
        let target = Target::from_raw(TARGET64);
        assert_eq!(target.to_hex(8).parse::<Target>().unwrap(), target);
        assert_eq!(
            target.to_hex(4).parse::<Target>().unwrap().raw(),
            TARGET64 & 0xFFFF_FFFF_0000_0000
        );
    }

    #[test]
    fn trim_keeps_top_bytes() {
        let target = Target::from_raw(TARGET64);
        assert_eq!(target.trim(7).raw(), 0x0012_3456_789a_bc00);
        assert_eq!(target.trim(6).raw(), 0x0012_3456_789a_0000);
        assert_eq!(target.trim(4).raw(), 0x0012_3456_0000_0000);
        assert_eq!(target.trim(2).raw(), 0x0012_0000_0000_0000);
        assert_eq!(target.trim(8), target);
    }

    #[test]
    fn rejects_bad_hex() {
        assert!("zz".parse::<Target>().is_err());
        assert!("debc9a785634120000".parse::<Target>().is_err());
    }
}
