//! Input checks shared by every request body.
//!
//! Bodies implement [`Validate`] and are pulled out of requests with
//! [`crate::extract::ValidJson`], so a handler only ever sees input that
//! already passed these rules.

use std::fmt::Display;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{} invalid field(s)", .0.len())]
pub struct ValidationErrors(pub Vec<FieldError>);

impl ValidationErrors {
    pub fn single(field: &'static str, message: impl Into<String>) -> Self {
        ValidationErrors(vec![FieldError {
            field,
            message: message.into(),
        }])
    }

    pub fn fields(&self) -> Vec<&'static str> {
        self.0.iter().map(|e| e.field).collect()
    }
}

pub trait Validate {
    fn validate(&self) -> Result<(), ValidationErrors>;
}

fn alphanumeric_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z0-9]+$").expect("static regex"))
}

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}$").expect("static regex")
    })
}

/// Collects every problem with a body instead of stopping at the first one
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<FieldError>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, ok: bool, field: &'static str, message: impl Into<String>) -> &mut Self {
        if !ok {
            self.errors.push(FieldError {
                field,
                message: message.into(),
            });
        }
        self
    }

    pub fn length(&mut self, field: &'static str, value: &str, min: usize, max: usize) -> &mut Self {
        let len = value.chars().count();
        if len < min {
            let message = if min == 1 {
                "cannot be empty".to_string()
            } else {
                format!("must be at least {min} characters long")
            };
            self.check(false, field, message);
        } else if len > max {
            self.check(false, field, format!("cannot exceed {max} characters"));
        }
        self
    }

    pub fn optional_length(
        &mut self,
        field: &'static str,
        value: Option<&str>,
        min: usize,
        max: usize,
    ) -> &mut Self {
        if let Some(value) = value {
            self.length(field, value, min, max);
        }
        self
    }

    pub fn alphanumeric(&mut self, field: &'static str, value: &str) -> &mut Self {
        self.check(
            value.is_empty() || alphanumeric_re().is_match(value),
            field,
            "may only contain letters and digits",
        )
    }

    pub fn email(&mut self, field: &'static str, value: &str) -> &mut Self {
        self.check(email_re().is_match(value), field, "must be a valid email address")
    }

    pub fn url(&mut self, field: &'static str, value: &str) -> &mut Self {
        let valid = url::Url::parse(value)
            .map(|u| matches!(u.scheme(), "http" | "https"))
            .unwrap_or(false);
        self.check(valid, field, "must be a valid URL")
    }

    pub fn optional_url(&mut self, field: &'static str, value: Option<&str>) -> &mut Self {
        if let Some(value) = value {
            self.url(field, value);
        }
        self
    }

    pub fn range<T: PartialOrd + Display>(
        &mut self,
        field: &'static str,
        value: T,
        min: T,
        max: T,
    ) -> &mut Self {
        let ok = value >= min && value <= max;
        self.check(ok, field, format!("must be between {min} and {max}"))
    }

    pub fn at_least<T: PartialOrd + Display>(&mut self, field: &'static str, value: T, min: T) -> &mut Self {
        let ok = value >= min;
        self.check(ok, field, format!("must be at least {min}"))
    }

    pub fn finish(&mut self) -> Result<(), ValidationErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors(std::mem::take(&mut self.errors)))
        }
    }
}

/// Trim user supplied tags/skills and drop empty entries
pub fn clean_list(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_bounds() {
        let result = Validator::new()
            .length("title", "ab", 3, 300)
            .length("content", &"x".repeat(301), 0, 300)
            .length("ok", "fine", 1, 10)
            .finish();

        let errors = result.unwrap_err();
        assert_eq!(errors.fields(), vec!["title", "content"]);
        assert_eq!(errors.0[0].message, "must be at least 3 characters long");
        assert_eq!(errors.0[1].message, "cannot exceed 300 characters");
    }

    #[test]
    fn test_length_counts_characters_not_bytes() {
        assert!(Validator::new().length("name", "ééééé", 5, 5).finish().is_ok());
    }

    #[test]
    fn test_alphanumeric() {
        assert!(Validator::new().alphanumeric("username", "alice42").finish().is_ok());
        assert!(Validator::new().alphanumeric("username", "alice_42").finish().is_err());
        assert!(Validator::new().alphanumeric("username", "al ice").finish().is_err());
    }

    #[test]
    fn test_email() {
        assert!(Validator::new().email("email", "someone@example.com").finish().is_ok());
        assert!(Validator::new().email("email", "Some.One+tag@Example.CO").finish().is_ok());
        assert!(Validator::new().email("email", "not-an-email").finish().is_err());
        assert!(Validator::new().email("email", "a@b.c").finish().is_err());
    }

    #[test]
    fn test_url_requires_http_scheme() {
        assert!(Validator::new().url("mediaUrl", "https://example.com/a.png").finish().is_ok());
        assert!(Validator::new().url("mediaUrl", "ftp://example.com/a.png").finish().is_err());
        assert!(Validator::new().url("mediaUrl", "example.com").finish().is_err());
    }

    #[test]
    fn test_range() {
        assert!(Validator::new().range("rating", 5, 1, 5).finish().is_ok());
        assert!(Validator::new().range("rating", 0, 1, 5).finish().is_err());
        assert!(Validator::new().range("rating", 6, 1, 5).finish().is_err());
    }

    #[test]
    fn test_clean_list() {
        let cleaned = clean_list(&[" rust ".to_string(), "".to_string(), "  ".to_string(), "go".to_string()]);
        assert_eq!(cleaned, vec!["rust".to_string(), "go".to_string()]);
    }
}
