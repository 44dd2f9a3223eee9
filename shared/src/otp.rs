use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const OTP_LENGTH: usize = 6;

/// Six-digit code handed to the buyer at placement and checked at the door.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeliveryOtp(String);

impl DeliveryOtp {
    pub fn generate() -> Self {
        Self::generate_with(&mut rand::thread_rng())
    }

    pub fn generate_with<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let code: u32 = rng.gen_range(0..1_000_000);
        Self(format!("{code:06}"))
    }

    /// Accepts only well-formed six-digit codes.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        (trimmed.len() == OTP_LENGTH && trimmed.bytes().all(|b| b.is_ascii_digit()))
            .then(|| Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compares without short-circuiting on the first differing digit.
    pub fn verify(&self, candidate: &str) -> bool {
        let candidate = candidate.trim().as_bytes();
        let expected = self.0.as_bytes();
        if candidate.len() != expected.len() {
            return false;
        }
        expected
            .iter()
            .zip(candidate)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl fmt::Debug for DeliveryOtp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DeliveryOtp(******)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_generated_codes_are_six_digits() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let otp = DeliveryOtp::generate_with(&mut rng);
            assert_eq!(otp.as_str().len(), OTP_LENGTH);
            assert!(DeliveryOtp::parse(otp.as_str()).is_some());
        }
    }

    #[test]
    fn test_verify() {
        let otp = DeliveryOtp::parse("042917").unwrap();
        assert!(otp.verify("042917"));
        assert!(otp.verify(" 042917 "));
        assert!(!otp.verify("042918"));
        assert!(!otp.verify("42917"));
        assert!(!otp.verify(""));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(DeliveryOtp::parse("12345").is_none());
        assert!(DeliveryOtp::parse("12a456").is_none());
        assert!(DeliveryOtp::parse("1234567").is_none());
    }

    #[test]
    fn test_debug_does_not_leak_code() {
        let otp = DeliveryOtp::parse("123456").unwrap();
        assert!(!format!("{otp:?}").contains("123456"));
    }
}
