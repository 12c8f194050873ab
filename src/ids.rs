use lazy_static::lazy_static;
use rand::Rng;
use regex::Regex;
use uuid::Uuid;

const POLL_ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const POLL_ID_LENGTH: usize = 6;
const NOMINATION_ID_LENGTH: usize = 8;

lazy_static! {
    static ref POLL_ID_RE: Regex = Regex::new(r"^[A-Z0-9]{6}$").unwrap();
}

// Short enough to read out loud when inviting people
pub fn create_poll_id() -> String {
    random_code(POLL_ID_ALPHABET, POLL_ID_LENGTH)
}

pub fn create_user_id() -> String {
    Uuid::new_v4().simple().to_string()
}

pub fn create_nomination_id() -> String {
    random_code(POLL_ID_ALPHABET, NOMINATION_ID_LENGTH)
}

pub fn is_valid_poll_id(poll_id: &str) -> bool {
    POLL_ID_RE.is_match(poll_id)
}

fn random_code(alphabet: &[u8], len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| alphabet[rng.random_range(0..alphabet.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_poll_ids_pass_validation() {
        for _ in 0..100 {
            let id = create_poll_id();
            assert!(is_valid_poll_id(&id), "bad id {}", id);
        }
    }

    #[test]
    fn poll_id_validation_rejects_malformed_codes() {
        assert!(!is_valid_poll_id("abc123"));
        assert!(!is_valid_poll_id("ABC12"));
        assert!(!is_valid_poll_id("ABC1234"));
        assert!(!is_valid_poll_id("ABC-12"));
    }

    #[test]
    fn user_ids_are_unique() {
        assert_ne!(create_user_id(), create_user_id());
        assert_eq!(create_nomination_id().len(), NOMINATION_ID_LENGTH);
    }
}
