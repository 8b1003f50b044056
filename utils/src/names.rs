use rand::distributions::Alphanumeric;
use rand::Rng;

/// Generate the random suffix used for object names created on the user's
/// behalf, e.g. `<targetImage>-<suffix>` for a generated `ImageImport`.
pub fn random_suffix(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_has_requested_length() {
        let s = random_suffix(5);
        assert_eq!(s.len(), 5);
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
