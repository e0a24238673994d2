//! Hashcash stamp parsing and scoring
//!
//! A stamp has the form `version:bits:date:resource:ext:rand:counter`, where `date` is
//! `YYMMDDHHMMSS` in UTC and `resource` is the recipient address the stamp was minted
//! for. Scoring is pure: the verification time is always passed in.

use crate::crypto::hash::{meets_difficulty, sha1, DIGEST_BITS};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::fmt;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// The only stamp version accepted
pub const HASHCASH_VERSION: &str = "1";

/// Bits at or above which a stamp is strong
pub const GOOD_BITS: u32 = 18;

/// Bits at or above which a stamp is weak but acceptable
pub const WEAK_BITS: u32 = 10;

/// Bits at or above which a stamp is trivial
pub const TRIVIAL_BITS: u32 = 5;

/// Maximum distance between the stamp date and verification time
pub const MAX_STAMP_AGE_SECS: i64 = 3600;

/// `YYMMDDHHMMSS`
pub const STAMP_DATE_FORMAT: &str = "%y%m%d%H%M%S";

const STAMP_FIELDS: usize = 7;

// =============================================================================
// Error Types
// =============================================================================

/// Reasons a stamp does not score as strong
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HashcashError {
    #[error("Missing hashcash header")]
    Missing,
    #[error("Malformed hashcash header: {0}")]
    Malformed(&'static str),
    #[error("Unsupported hashcash version {0:?}")]
    UnsupportedVersion(String),
    #[error("Hashcash resource mismatch: expected {expected:?}, got {found:?}")]
    ResourceMismatch { expected: String, found: String },
    #[error("Hashcash stamp is stale ({age_secs}s from verification time)")]
    Stale { age_secs: i64 },
    #[error("Hashcash proof does not have {bits} leading zero bits")]
    InvalidProof { bits: u32 },
}

impl HashcashError {
    /// Score assigned to a stamp that failed with this error.
    /// Staleness is suspicious rather than fraudulent; everything else is rejected.
    pub fn score(&self) -> Score {
        match self {
            HashcashError::Stale { .. } => Score::Suspect,
            _ => Score::Reject,
        }
    }
}

// =============================================================================
// Score
// =============================================================================

/// Admission score, 0 (strong) to 3 (reject)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Score {
    Strong = 0,
    Weak = 1,
    Suspect = 2,
    Reject = 3,
}

/// What the submission path does with a scored message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Accept,
    AcceptAsSpam,
    Reject,
}

impl Score {
    /// Map a verified bit count onto the fixed thresholds
    pub fn from_bits(bits: u32) -> Self {
        if bits >= GOOD_BITS {
            Score::Strong
        } else if bits >= WEAK_BITS {
            Score::Weak
        } else if bits >= TRIVIAL_BITS {
            Score::Suspect
        } else {
            Score::Reject
        }
    }

    pub fn value(self) -> u8 {
        self as u8
    }

    pub fn disposition(self) -> Disposition {
        match self {
            Score::Strong => Disposition::Accept,
            Score::Weak | Score::Suspect => Disposition::AcceptAsSpam,
            Score::Reject => Disposition::Reject,
        }
    }
}

// =============================================================================
// Stamp
// =============================================================================

/// A parsed hashcash stamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stamp {
    pub version: String,
    pub bits: u32,
    pub date: DateTime<Utc>,
    pub resource: String,
    pub ext: String,
    pub rand: String,
    pub counter: String,
}

impl Stamp {
    /// Parse a stamp header.
    ///
    /// Resources may contain `:` (addresses with a port), so the resource is everything
    /// between the third field and the last three.
    pub fn parse(header: &str) -> Result<Self, HashcashError> {
        let fields: Vec<&str> = header.split(':').collect();
        if fields.len() < STAMP_FIELDS {
            return Err(HashcashError::Malformed("expected 7 fields"));
        }

        let n = fields.len();
        let version = fields[0];
        if version.is_empty() {
            return Err(HashcashError::Malformed("empty version"));
        }
        if version != HASHCASH_VERSION {
            return Err(HashcashError::UnsupportedVersion(version.to_string()));
        }

        let bits = fields[1]
            .parse::<u32>()
            .map_err(|_| HashcashError::Malformed("bits is not a number"))?;
        let date = parse_stamp_date(fields[2])?;

        let resource = fields[3..n - 3].join(":");
        if resource.is_empty() {
            return Err(HashcashError::Malformed("empty resource"));
        }

        let (ext, rand, counter) = (fields[n - 3], fields[n - 2], fields[n - 1]);
        if rand.is_empty() || counter.is_empty() {
            return Err(HashcashError::Malformed("missing rand or counter"));
        }

        Ok(Self {
            version: version.to_string(),
            bits,
            date,
            resource,
            ext: ext.to_string(),
            rand: rand.to_string(),
            counter: counter.to_string(),
        })
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}:{}:{}",
            self.version,
            self.bits,
            format_stamp_date(self.date),
            self.resource,
            self.ext,
            self.rand,
            self.counter
        )
    }
}

/// Format a timestamp as `YYMMDDHHMMSS`
pub fn format_stamp_date(date: DateTime<Utc>) -> String {
    date.format(STAMP_DATE_FORMAT).to_string()
}

fn parse_stamp_date(raw: &str) -> Result<DateTime<Utc>, HashcashError> {
    if raw.len() != 12 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(HashcashError::Malformed("date must be YYMMDDHHMMSS"));
    }

    let naive = NaiveDateTime::parse_from_str(raw, STAMP_DATE_FORMAT)
        .map_err(|_| HashcashError::Malformed("date must be YYMMDDHHMMSS"))?;
    Ok(Utc.from_utc_datetime(&naive))
}

// =============================================================================
// Verification
// =============================================================================

/// Verify a stamp and return its score, or the reason it failed.
pub fn evaluate(
    header: Option<&str>,
    expected_resource: &str,
    now: DateTime<Utc>,
) -> Result<Score, HashcashError> {
    let header = match header {
        Some(h) if !h.is_empty() => h,
        _ => return Err(HashcashError::Missing),
    };

    let stamp = Stamp::parse(header)?;

    if stamp.resource != expected_resource {
        return Err(HashcashError::ResourceMismatch {
            expected: expected_resource.to_string(),
            found: stamp.resource,
        });
    }

    let age_secs = (now - stamp.date).num_seconds();
    if age_secs.abs() > MAX_STAMP_AGE_SECS {
        return Err(HashcashError::Stale { age_secs });
    }

    if stamp.bits > DIGEST_BITS || !meets_difficulty(&sha1(header.as_bytes()), stamp.bits) {
        return Err(HashcashError::InvalidProof { bits: stamp.bits });
    }

    Ok(Score::from_bits(stamp.bits))
}

/// Score a stamp: 0 strong, 1 weak, 2 trivial or stale, 3 reject.
pub fn score(header: Option<&str>, expected_resource: &str, now: DateTime<Utc>) -> Score {
    evaluate(header, expected_resource, now).unwrap_or_else(|e| {
        log::debug!("Hashcash for {} scored low: {}", expected_resource, e);
        e.score()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mining::Minter;
    use chrono::Duration;

    const RESOURCE: &str = "john#mail.example";

    fn mint(bits: u32, at: DateTime<Utc>) -> String {
        Minter::new(bits).unwrap().mint(RESOURCE, at).0
    }

    #[test]
    fn test_missing_header_rejects() {
        let now = Utc::now();
        assert_eq!(score(None, RESOURCE, now), Score::Reject);
        assert_eq!(score(Some(""), RESOURCE, now), Score::Reject);
    }

    #[test]
    fn test_strong_stamp_scores_zero() {
        let now = Utc::now();
        let header = mint(20, now);
        assert!(header.starts_with("1:20:"));
        assert_eq!(score(Some(&header), RESOURCE, now), Score::Strong);
        assert_eq!(Score::Strong.value(), 0);
    }

    #[test]
    fn test_thresholds() {
        let now = Utc::now();
        assert_eq!(score(Some(&mint(12, now)), RESOURCE, now), Score::Weak);
        assert_eq!(score(Some(&mint(6, now)), RESOURCE, now), Score::Suspect);
        assert_eq!(score(Some(&mint(3, now)), RESOURCE, now), Score::Reject);
    }

    #[test]
    fn test_resource_mismatch_always_rejects() {
        let now = Utc::now();
        let header = format!("1:20:{}:wrong#example.com::abc:0", format_stamp_date(now));
        assert!(matches!(
            evaluate(Some(&header), RESOURCE, now),
            Err(HashcashError::ResourceMismatch { .. })
        ));
        assert_eq!(score(Some(&header), RESOURCE, now), Score::Reject);

        let minted_elsewhere = Minter::new(12).unwrap().mint("wrong#example.com", now).0;
        assert_eq!(score(Some(&minted_elsewhere), RESOURCE, now), Score::Reject);
    }

    #[test]
    fn test_stale_stamp_scores_two() {
        let now = Utc::now();
        let header = mint(12, now - Duration::hours(2));
        assert!(matches!(
            evaluate(Some(&header), RESOURCE, now),
            Err(HashcashError::Stale { .. })
        ));
        assert_eq!(score(Some(&header), RESOURCE, now), Score::Suspect);
    }

    #[test]
    fn test_stamp_within_window_is_fresh() {
        let now = Utc::now();
        let header = mint(12, now - Duration::minutes(59));
        assert_eq!(score(Some(&header), RESOURCE, now), Score::Weak);
    }

    #[test]
    fn test_inflated_bits_fail_proof() {
        let now = Utc::now();
        let header = mint(4, now);
        let forged = header.replacen("1:4:", "1:40:", 1);
        assert!(matches!(
            evaluate(Some(&forged), RESOURCE, now),
            Err(HashcashError::InvalidProof { bits: 40 })
        ));
        assert_eq!(score(Some(&forged), RESOURCE, now), Score::Reject);
    }

    #[test]
    fn test_malformed_stamps() {
        let now = Utc::now();
        let date = format_stamp_date(now);

        for header in [
            "garbage".to_string(),
            format!("2:20:{}:{}::abc:0", date, RESOURCE),
            format!("1:lots:{}:{}::abc:0", date, RESOURCE),
            format!("1:20:yesterday:{}::abc:0", RESOURCE),
            format!("1:20:{}:{}::abc:", date, RESOURCE),
        ] {
            assert_eq!(score(Some(&header), RESOURCE, now), Score::Reject, "{}", header);
        }
    }

    #[test]
    fn test_resource_with_port() {
        let now = Utc::now();
        let resource = "bob#localhost:5000";
        let header = Minter::new(10).unwrap().mint(resource, now).0;

        let stamp = Stamp::parse(&header).unwrap();
        assert_eq!(stamp.resource, resource);
        assert_eq!(stamp.to_string(), header);
        assert_eq!(score(Some(&header), resource, now), Score::Weak);
    }

    #[test]
    fn test_dispositions() {
        assert_eq!(Score::Strong.disposition(), Disposition::Accept);
        assert_eq!(Score::Weak.disposition(), Disposition::AcceptAsSpam);
        assert_eq!(Score::Suspect.disposition(), Disposition::AcceptAsSpam);
        assert_eq!(Score::Reject.disposition(), Disposition::Reject);
    }
}
