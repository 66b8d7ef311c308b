use chrono::NaiveDate;
use rand::Rng;
use uuid::Uuid;

const SUFFIX_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Builds `PREFIX-YYMMDD-XX` booking references.
#[derive(Debug, Clone)]
pub struct ReferenceGenerator {
    prefix: String,
    attempts: u32,
}

impl ReferenceGenerator {
    pub fn new(prefix: impl Into<String>, attempts: u32) -> Self {
        Self { prefix: prefix.into(), attempts: attempts.max(1) }
    }

    /// Random candidates to try before falling back.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn candidate<R: Rng>(&self, date: NaiveDate, rng: &mut R) -> String {
        let suffix: String = (0..2)
            .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char)
            .collect();
        self.format(date, &suffix)
    }

    /// Suffix taken from a fresh UUID once the random candidates are exhausted.
    pub fn fallback(&self, date: NaiveDate) -> String {
        let hex = Uuid::new_v4().simple().to_string();
        self.format(date, &hex[..2].to_uppercase())
    }

    fn format(&self, date: NaiveDate, suffix: &str) -> String {
        format!("{}-{}-{}", self.prefix, date.format("%y%m%d"), suffix)
    }
}
