//! Secret and suffix generation. `rand::rng()` is a CSPRNG, which matters
//! here: a predictable source would allow password or instance-name guessing.

use rand::{
    distr::{uniform::Uniform, Distribution},
    rng,
};

const ALPHANUMERIC: &[char] = &[
    'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u',
    'v', 'w', 'x', 'y', 'z', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P',
    'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9',
];
const LOWERCASE: &[char] = &[
    'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u',
    'v', 'w', 'x', 'y', 'z',
];

fn sample(set: &[char], length: usize) -> String {
    let mut rng = rng();
    let dist = Uniform::new(0, set.len()).unwrap();
    (0..length).map(|_| set[dist.sample(&mut rng)]).collect()
}

/// Generated secret values, 16 characters for workspace passwords
#[must_use]
pub fn alphanumeric(length: usize) -> String {
    sample(ALPHANUMERIC, length)
}

/// Instance name suffixes, DNS-label safe
#[must_use]
pub fn lowercase(length: usize) -> String {
    sample(LOWERCASE, length)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alphanumeric_length_and_charset() {
        let s = alphanumeric(16);
        assert_eq!(s.len(), 16);
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_lowercase_length_and_charset() {
        let s = lowercase(6);
        assert_eq!(s.len(), 6);
        assert!(s.chars().all(|c| c.is_ascii_lowercase()));
    }

    #[test]
    fn test_successive_values_differ() {
        // 62^16 outcomes, a collision here means the source is broken
        assert_ne!(alphanumeric(16), alphanumeric(16));
    }
}
