use rand::Rng;

pub const PNR_LENGTH: usize = 6;

const ALPHABET: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Random 6-character uppercase base-36 code.
///
/// Uniqueness is not checked; the PNR is informational, bookings are keyed by id.
pub fn generate_pnr() -> String {
    let mut rng = rand::thread_rng();
    (0..PNR_LENGTH)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

pub fn is_valid_pnr(pnr: &str) -> bool {
    pnr.len() == PNR_LENGTH && pnr.bytes().all(|b| ALPHABET.contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_pnr_shape() {
        for _ in 0..200 {
            let pnr = generate_pnr();
            assert!(is_valid_pnr(&pnr), "bad pnr {}", pnr);
        }
    }

    #[test]
    fn test_pnr_validation() {
        assert!(is_valid_pnr("0AZ9QK"));
        assert!(!is_valid_pnr("0az9qk"));
        assert!(!is_valid_pnr("ABCDE"));
        assert!(!is_valid_pnr("ABCDEF1"));
        assert!(!is_valid_pnr("AB-DEF"));
    }
}
