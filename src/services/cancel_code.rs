use rand::Rng;

/// Uppercase letters and digits without the look-alikes 0/O, 1/I/L.
const ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

pub const CODE_LENGTH: usize = 6;

/// Shortest input accepted as a cancel code.
pub const MIN_CODE_LENGTH: usize = 4;

/// A random code. 31^6 ≈ 8.9e8 values; at 10k confirmed appointments per
/// provider a fresh code collides with probability ≈ 1e-5, and collisions with
/// confirmed codes are caught by the storage index and regenerated.
pub fn issue() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LENGTH)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Uppercases and drops everything that is not ASCII alphanumeric.
pub fn normalize(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_issue_shape() {
        for _ in 0..200 {
            let code = issue();
            assert_eq!(code.len(), CODE_LENGTH);
            assert!(code.bytes().all(|b| ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn test_issue_is_not_sequential() {
        let codes: HashSet<_> = (0..100).map(|_| issue()).collect();
        assert!(codes.len() > 95);
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(" ab-c 12d "), "ABC12D");
        assert_eq!(normalize("#x7k*"), "X7K");
        assert_eq!(normalize("çğü"), "");
    }
}
