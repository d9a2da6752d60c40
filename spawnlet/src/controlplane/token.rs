//! Bootstrap token generation.

use rand::Rng;
use rand::distr::Alphanumeric;

const ID_LEN: usize = 6;
const SECRET_LEN: usize = 16;

/// A fresh token in kubeadm's `[a-z0-9]{6}.[a-z0-9]{16}` format.
pub fn generate_token() -> String {
    format!("{}.{}", random_part(ID_LEN), random_part(SECRET_LEN))
}

fn random_part(len: usize) -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(len)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

/// Check the `[a-z0-9]{6}.[a-z0-9]{16}` shape.
pub fn is_valid_token(token: &str) -> bool {
    let valid = |s: &str, len: usize| {
        s.len() == len && s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
    };
    match token.split_once('.') {
        Some((id, secret)) => valid(id, ID_LEN) && valid(secret, SECRET_LEN),
        None => false,
    }
}
