use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Per-tenant username, password and lockout policy.
///
/// Missing fields deserialize to their defaults, so a tenant can store a
/// partial policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UsernameAndPasswordRule {
    pub allow_only_alphanumeric_user_names: bool,
    pub require_unique_email: bool,
    pub user_lockout_enabled_by_default: bool,
    pub max_failed_access_attempts_before_lockout: u32,
    pub default_account_lockout_time_span_in_minutes: u32,
    pub password_required_length: u32,
    pub password_require_non_letter_or_digit: bool,
    pub password_require_digit: bool,
    pub password_require_lowercase: bool,
    pub password_require_uppercase: bool,
}

impl Default for UsernameAndPasswordRule {
    fn default() -> Self {
        Self {
            allow_only_alphanumeric_user_names: false,
            require_unique_email: true,
            user_lockout_enabled_by_default: true,
            max_failed_access_attempts_before_lockout: 5,
            default_account_lockout_time_span_in_minutes: 5,
            password_required_length: 8,
            password_require_non_letter_or_digit: true,
            password_require_digit: true,
            password_require_lowercase: true,
            password_require_uppercase: true,
        }
    }
}

/// A password rule the candidate password does not satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum PasswordViolation {
    TooShort { required: u32 },
    MissingNonLetterOrDigit,
    MissingDigit,
    MissingLowercase,
    MissingUppercase,
}

impl UsernameAndPasswordRule {
    /// Reject policies that would lock everyone out or accept empty passwords.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.password_required_length == 0 {
            return Err(SessionError::InvalidPolicy(
                "passwordRequiredLength must be at least 1".to_string(),
            ));
        }
        if self.max_failed_access_attempts_before_lockout == 0 {
            return Err(SessionError::InvalidPolicy(
                "maxFailedAccessAttemptsBeforeLockout must be at least 1".to_string(),
            ));
        }
        if self.default_account_lockout_time_span_in_minutes == 0 {
            return Err(SessionError::InvalidPolicy(
                "defaultAccountLockoutTimeSpanInMinutes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn lockout_duration(&self) -> Duration {
        Duration::minutes(i64::from(self.default_account_lockout_time_span_in_minutes))
    }

    pub fn is_user_name_allowed(&self, user_name: &str) -> bool {
        !user_name.is_empty()
            && (!self.allow_only_alphanumeric_user_names
                || user_name.chars().all(|c| c.is_ascii_alphanumeric()))
    }

    /// Every rule `password` violates, empty when it is acceptable.
    pub fn check_password(&self, password: &str) -> Vec<PasswordViolation> {
        let mut violations = Vec::new();

        if (password.chars().count() as u64) < u64::from(self.password_required_length) {
            violations.push(PasswordViolation::TooShort {
                required: self.password_required_length,
            });
        }
        if self.password_require_non_letter_or_digit
            && password.chars().all(|c| c.is_alphanumeric())
        {
            violations.push(PasswordViolation::MissingNonLetterOrDigit);
        }
        if self.password_require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
            violations.push(PasswordViolation::MissingDigit);
        }
        if self.password_require_lowercase && !password.chars().any(|c| c.is_lowercase()) {
            violations.push(PasswordViolation::MissingLowercase);
        }
        if self.password_require_uppercase && !password.chars().any(|c| c.is_uppercase()) {
            violations.push(PasswordViolation::MissingUppercase);
        }

        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let rule = UsernameAndPasswordRule::default();
        assert!(!rule.allow_only_alphanumeric_user_names);
        assert!(rule.require_unique_email);
        assert!(rule.user_lockout_enabled_by_default);
        assert_eq!(rule.max_failed_access_attempts_before_lockout, 5);
        assert_eq!(rule.lockout_duration(), Duration::minutes(5));
        assert_eq!(rule.password_required_length, 8);
        assert!(rule.validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let rule: UsernameAndPasswordRule =
            serde_json::from_str(r#"{"passwordRequiredLength": 12, "passwordRequireDigit": false}"#)
                .unwrap();
        assert_eq!(rule.password_required_length, 12);
        assert!(!rule.password_require_digit);
        assert!(rule.password_require_uppercase);
        assert_eq!(rule.max_failed_access_attempts_before_lockout, 5);
    }

    #[test]
    fn test_check_password_reports_each_violation() {
        let rule = UsernameAndPasswordRule::default();
        assert!(rule.check_password("Str0ng!pass").is_empty());

        let violations = rule.check_password("abc");
        assert_eq!(
            violations,
            vec![
                PasswordViolation::TooShort { required: 8 },
                PasswordViolation::MissingNonLetterOrDigit,
                PasswordViolation::MissingDigit,
                PasswordViolation::MissingUppercase,
            ]
        );
    }

    #[test]
    fn test_relaxed_policy() {
        let rule = UsernameAndPasswordRule {
            password_required_length: 4,
            password_require_non_letter_or_digit: false,
            password_require_digit: false,
            password_require_uppercase: false,
            ..Default::default()
        };
        assert!(rule.check_password("abcd").is_empty());
    }

    #[test]
    fn test_user_name_rule() {
        let strict = UsernameAndPasswordRule {
            allow_only_alphanumeric_user_names: true,
            ..Default::default()
        };
        assert!(strict.is_user_name_allowed("jdoe42"));
        assert!(!strict.is_user_name_allowed("j.doe"));
        assert!(UsernameAndPasswordRule::default().is_user_name_allowed("j.doe"));
        assert!(!strict.is_user_name_allowed(""));
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let rule = UsernameAndPasswordRule {
            max_failed_access_attempts_before_lockout: 0,
            ..Default::default()
        };
        assert!(matches!(rule.validate(), Err(SessionError::InvalidPolicy(_))));
    }
}
