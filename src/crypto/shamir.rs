// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Threshold secret sharing (Shamir over GF(256)).
//!
//! Share wire format: `index (1 byte) || y-values (secret length)`.
//! Indices run from 1; index 0 would be the secret itself.

use std::collections::BTreeMap;
use std::fmt;

use blahaj::{Share as RawShare, Sharks};
use zeroize::Zeroizing;

use super::CryptoError;

/// Upper bound on share count imposed by the GF(256) field.
pub const MAX_SHARES: u8 = u8::MAX;

/// One share of a split secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Share {
    pub index: u8,
    pub bytes: Zeroizing<Vec<u8>>,
}

impl Share {
    /// Serialize as `index || bytes`.
    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        let mut out = Zeroizing::new(Vec::with_capacity(1 + self.bytes.len()));
        out.push(self.index);
        out.extend_from_slice(&self.bytes);
        out
    }

    /// Parse the `index || bytes` form.
    pub fn from_bytes(raw: &[u8]) -> Result<Self, CryptoError> {
        match raw.split_first() {
            Some((&0, _)) => Err(CryptoError::MalformedShare("index 0 is reserved".into())),
            Some((&index, rest)) if !rest.is_empty() => Ok(Self {
                index,
                bytes: Zeroizing::new(rest.to_vec()),
            }),
            _ => Err(CryptoError::MalformedShare(format!(
                "share must be at least 2 bytes, got {}",
                raw.len()
            ))),
        }
    }
}

impl fmt::Debug for Share {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Share")
            .field("index", &self.index)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Split `secret` into `share_count` shares, any `threshold` of which
/// reconstruct it.
pub fn split(secret: &[u8], share_count: u8, threshold: u8) -> Result<Vec<Share>, CryptoError> {
    if secret.is_empty() {
        return Err(CryptoError::Split("secret must not be empty".into()));
    }
    if threshold < 2 || threshold > share_count {
        return Err(CryptoError::Split(format!(
            "threshold must satisfy 2 <= T <= N (T={threshold}, N={share_count})"
        )));
    }

    let dealer = Sharks(threshold).dealer(secret);
    dealer
        .take(share_count as usize)
        .map(|raw| Share::from_bytes(&Zeroizing::new(Vec::from(&raw))))
        .collect()
}

/// Reconstruct the secret from every collected share.
///
/// Extra consistent shares beyond the threshold are fine. Fewer than
/// `threshold` distinct indices, or shares of differing lengths, fail
/// instead of producing a plausible wrong secret.
pub fn combine(
    threshold: u8,
    shares: &BTreeMap<u8, Zeroizing<Vec<u8>>>,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if shares.len() < threshold as usize {
        return Err(CryptoError::Combine(format!(
            "need {threshold} shares, have {}",
            shares.len()
        )));
    }

    let mut parts = Vec::with_capacity(shares.len());
    for (index, bytes) in shares {
        let share = Share {
            index: *index,
            bytes: bytes.clone(),
        };
        let raw = RawShare::try_from(share.to_bytes().as_slice())
            .map_err(|e| CryptoError::MalformedShare(e.to_string()))?;
        parts.push(raw);
    }

    let secret = Sharks(threshold)
        .recover(parts.as_slice())
        .map_err(|e| CryptoError::Combine(e.to_string()))?;
    Ok(Zeroizing::new(secret))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    fn random_secret(len: usize) -> Vec<u8> {
        let mut secret = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut secret);
        secret
    }

    fn to_map<'a>(shares: impl IntoIterator<Item = &'a Share>) -> BTreeMap<u8, Zeroizing<Vec<u8>>> {
        shares
            .into_iter()
            .map(|s| (s.index, s.bytes.clone()))
            .collect()
    }

    #[test]
    fn any_threshold_subset_reconstructs() {
        for (n, t) in [(2u8, 2u8), (3, 2), (4, 3), (5, 5), (7, 4)] {
            let secret = random_secret(64);
            let shares = split(&secret, n, t).unwrap();
            assert_eq!(shares.len(), n as usize);

            // Sliding windows of exactly T shares.
            for start in 0..=(n - t) as usize {
                let subset = &shares[start..start + t as usize];
                let recovered = combine(t, &to_map(subset)).unwrap();
                assert_eq!(&*recovered, &secret, "N={n} T={t} start={start}");
            }
        }
    }

    #[test]
    fn more_than_threshold_reconstructs() {
        let secret = random_secret(1024);
        let shares = split(&secret, 5, 3).unwrap();
        let recovered = combine(3, &to_map(&shares)).unwrap();
        assert_eq!(&*recovered, &secret);
    }

    #[test]
    fn fewer_than_threshold_fails_loudly() {
        let secret = random_secret(32);
        let shares = split(&secret, 4, 3).unwrap();
        let err = combine(3, &to_map(&shares[..2])).unwrap_err();
        assert!(matches!(err, CryptoError::Combine(_)));
    }

    #[test]
    fn wrong_cardinality_yields_garbage() {
        let secret = random_secret(32);
        let shares = split(&secret, 4, 3).unwrap();
        // Lying about the threshold lets interpolation run on T-1 points.
        let recovered = combine(2, &to_map(&shares[..2])).unwrap();
        assert_ne!(&*recovered, &secret);
    }

    #[test]
    fn mismatched_share_lengths_fail() {
        let a = split(&random_secret(32), 3, 2).unwrap();
        let b = split(&random_secret(16), 3, 2).unwrap();
        let mut map = to_map(&a[..1]);
        map.insert(b[1].index, b[1].bytes.clone());
        assert!(combine(2, &map).is_err());
    }

    #[test]
    fn split_validates_parameters() {
        assert!(split(b"secret", 3, 1).is_err());
        assert!(split(b"secret", 2, 3).is_err());
        assert!(split(b"", 3, 2).is_err());
    }

    #[test]
    fn indices_start_at_one() {
        let shares = split(b"secret", 4, 2).unwrap();
        let indices: Vec<u8> = shares.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![1, 2, 3, 4]);
    }

    #[test]
    fn single_share_spreads_over_the_field() {
        // With T = 2 the first share of a zero secret is the raw coefficient.
        let mut seen = [false; 256];
        for _ in 0..4096 {
            let shares = split(&[0u8], 2, 2).unwrap();
            seen[shares[0].bytes[0] as usize] = true;
        }
        assert!(seen.iter().filter(|hit| **hit).count() >= 255);
        assert_ne!(
            split(b"secret", 3, 2).unwrap()[0].to_bytes(),
            split(b"secret", 3, 2).unwrap()[0].to_bytes()
        );
    }

    #[test]
    fn share_bytes_parse() {
        let share = Share::from_bytes(&[3, 9, 9, 9]).unwrap();
        assert_eq!(share.index, 3);
        assert_eq!(&**share.bytes, &[9, 9, 9]);
        assert_eq!(&**share.to_bytes(), &[3, 9, 9, 9]);

        assert!(Share::from_bytes(&[3]).is_err());
        assert!(Share::from_bytes(&[]).is_err());
        assert!(Share::from_bytes(&[0, 1, 2]).is_err());
    }
}
