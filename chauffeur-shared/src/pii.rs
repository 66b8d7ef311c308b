use serde::{Serialize, Deserialize, Serializer};
use std::fmt;

/// Passenger contact data that must not leak into logs. Debug and Display
/// print a mask; serialization keeps the real value for notification payloads.
#[derive(Clone, Deserialize)]
pub struct Masked<T>(pub T);

impl<T: fmt::Display> fmt::Debug for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "********")
    }
}

impl<T: fmt::Display> fmt::Display for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "********")
    }
}

impl<T: Serialize> Serialize for Masked<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<T> Masked<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

/// Keeps the first character of the local part and the domain:
/// `ada@example.com` becomes `a***@example.com`.
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let first: String = local.chars().take(1).collect();
            format!("{first}***@{domain}")
        }
        None => "********".to_string(),
    }
}

/// Keeps the last four digits of a phone number.
pub fn mask_phone(phone: &str) -> String {
    let digits: Vec<char> = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = digits[digits.len() - 4..].iter().collect();
    format!("***-{tail}")
}
