// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Random short codes for shareable playlist links.

use crate::error::AppError;
use ring::rand::{SecureRandom, SystemRandom};

pub const CODE_LEN: usize = 5;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Generate one code. Bytes at or above the largest multiple of the
/// alphabet size are rejected so every character is equally likely.
pub fn generate(rng: &SystemRandom) -> Result<String, AppError> {
    let limit = (256 / ALPHABET.len() * ALPHABET.len()) as u8;
    let mut code = String::with_capacity(CODE_LEN);
    let mut buf = [0u8; 16];

    while code.len() < CODE_LEN {
        rng.fill(&mut buf)
            .map_err(|_| anyhow::anyhow!("System RNG failure"))?;
        for b in buf.iter().copied().filter(|b| *b < limit) {
            if code.len() == CODE_LEN {
                break;
            }
            code.push(ALPHABET[b as usize % ALPHABET.len()] as char);
        }
    }

    Ok(code)
}

pub fn is_well_formed(code: &str) -> bool {
    code.len() == CODE_LEN && code.bytes().all(|b| b.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generated_codes_are_well_formed() {
        let rng = SystemRandom::new();
        let codes: HashSet<String> = (0..50).map(|_| generate(&rng).unwrap()).collect();
        assert!(codes.iter().all(|c| is_well_formed(c)));
        // 62^5 possibilities; 50 draws colliding would point at a broken RNG.
        assert!(codes.len() > 45);
    }

    #[test]
    fn test_well_formed() {
        assert!(is_well_formed("aB3xZ"));
        assert!(!is_well_formed("aB3x"));
        assert!(!is_well_formed("aB3x!"));
    }
}
