use {super::*, primitive_types::U256};

/// The target a share must stay under to prove `difficulty` expected hashes.
pub fn difficulty_to_target(difficulty: u32) -> Target {
    let quotient = U256::MAX / U256::from(difficulty.max(1));
    Target::from_raw((quotient >> 192).low_u64())
}

/// Inverse of [`difficulty_to_target`], narrowed to 32 bits.
pub fn target_to_difficulty(target: Target) -> u32 {
    if target.is_null() {
        return 0;
    }
    let expanded = U256::from(target.raw()) << 192;
    (U256::MAX / expanded).low_u64() as u32
}

/// The difficulty a hash proves: 2^256 divided by the digest interpreted as
/// a 256-bit integer, least significant byte first.
pub fn difficulty_of_hash(hash: &[u8; 32]) -> u32 {
    let value = U256::from_little_endian(hash);
    if value.is_zero() {
        return u32::MAX;
    }
    (U256::MAX / value).low_u64() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_difficulty_targets() {
        assert_eq!(difficulty_to_target(8000).to_hex(4), "26310800");
        assert_eq!(difficulty_to_target(50000).to_hex(4), "8b4f0100");
    }

    #[test]
    fn known_targets_back_to_difficulty() {
        assert_eq!(target_to_difficulty(Target::from_u32(0x0008_3126)), 8000);
        assert_eq!(target_to_difficulty(Target::from_u32(0x0001_4f8b)), 50000);
    }

    #[test]
    fn trimmed_target_matches_compact_form() {
        assert_eq!(
            difficulty_to_target(8000).trim(4),
            Target::from_u32(0x0008_3126)
        );
        assert_eq!(
            difficulty_to_target(50000).trim(4),
            Target::from_u32(0x0001_4f8b)
        );
    }

    #[test]
    fn round_trip_error_stays_small() {
        for difficulty in [100u32, 313, 8000, 50000, 1_000_000, 250_000_000, u32::MAX] {
            let back = target_to_difficulty(difficulty_to_target(difficulty));
            let error = (back as f64 - difficulty as f64).abs() / difficulty as f64;
            assert!(
                error <= 2f64.powi(-24),
                "difficulty {difficulty} round-tripped to {back} (error {error})"
            );
        }
    }

    #[test]
    fn hash_difficulty_reference_vector() {
        let hash: [u8; 32] =
            hex::decode("8d962fb8adc880ab6b7297c0dbb3f62ae4c26b7dd51f68ce1acbd89569dd0400")
                .unwrap()
                .try_into()
                .unwrap();
        assert_eq!(difficulty_of_hash(&hash), 13471);
    }

    #[test]
    fn hash_difficulty_ordering() {
        // Trailing zero bytes are the most significant ones; fewer of the
        // high bytes set means a smaller integer and a higher difficulty.
        let mut easy = [0xffu8; 32];
        easy[31] = 0x7f;
        let mut hard = [0u8; 32];
        hard[0] = 0x01;

        assert!(difficulty_of_hash(&hard) > difficulty_of_hash(&easy));
        assert_eq!(difficulty_of_hash(&easy), 2);
        assert_eq!(difficulty_of_hash(&[0u8; 32]), u32::MAX);
    }

    #[test]
    fn zero_target_is_zero_difficulty() {
        assert_eq!(target_to_difficulty(Target::from_raw(0)), 0);
    }
}
