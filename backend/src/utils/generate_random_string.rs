use rand::{Rng, RngCore, distributions::Alphanumeric};
use uuid::Uuid;

/// Generates a random alphanumeric string of the specified length.
///
/// The generated string contains uppercase letters (A-Z), lowercase letters (a-z),
/// and digits (0-9), drawn from the thread-local CSPRNG.
///
/// # Arguments
///
/// * `length` - The desired length of the generated string
///
/// # Returns
///
/// A `String` containing random alphanumeric characters
pub fn generate_random_string(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Opaque token carrying 128 random bits, rendered in UUID form.
pub fn generate_opaque_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    Uuid::from_bytes(bytes).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_random_string_length_and_charset() {
        let code = generate_random_string(8);
        assert_eq!(code.len(), 8);
        assert!(code.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_opaque_tokens_are_distinct() {
        let tokens: HashSet<String> = (0..256).map(|_| generate_opaque_token()).collect();
        assert_eq!(tokens.len(), 256);
        assert!(tokens.iter().all(|t| Uuid::parse_str(t).is_ok()));
    }
}
