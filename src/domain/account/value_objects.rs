use serde::{Deserialize, Serialize};

use super::errors::AccountError;

// ============================================================================
// Account Value Objects
// ============================================================================

pub const MAX_BUSINESS_NAME_LEN: usize = 100;
pub const MAX_TEXT_FIELD_LEN: usize = 100;
pub const MAX_POSTCODE_LEN: usize = 12;

/// Postal address. Every line is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub line1: Option<String>,
    pub line2: Option<String>,
    pub city: Option<String>,
    pub postcode: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
}

impl Address {
    pub fn validate(&self) -> Result<(), AccountError> {
        let fields = [
            ("line1", &self.line1, MAX_TEXT_FIELD_LEN),
            ("line2", &self.line2, MAX_TEXT_FIELD_LEN),
            ("city", &self.city, MAX_TEXT_FIELD_LEN),
            ("postcode", &self.postcode, MAX_POSTCODE_LEN),
            ("state", &self.state, MAX_TEXT_FIELD_LEN),
            ("country", &self.country, MAX_TEXT_FIELD_LEN),
        ];

        for (field, value, max) in fields {
            if let Some(value) = value {
                check_length(field, value, max)?;
            }
        }
        Ok(())
    }
}

/// Approval and deletion flags. Deletion keeps the approval fields intact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountStatus {
    pub is_approved: bool,
    pub approved_by: Option<String>,
    pub is_deleted: bool,
    pub deleted_reason: Option<String>,
}

/// Tag attached to an account by the system rather than a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemTag {
    pub name: String,
    pub applies_to_expenses: bool,
    pub applies_to_timesheets: bool,
}

/// Tags every new account starts with: (name, expenses, timesheets).
pub const DEFAULT_SYSTEM_TAGS: [(&str, bool, bool); 3] = [
    ("Transportation", true, false),
    ("Sick Leave", false, true),
    ("Training", true, true),
];

pub(crate) fn check_length(field: &'static str, value: &str, max: usize) -> Result<(), AccountError> {
    let length = value.chars().count();
    if length > max {
        return Err(AccountError::FieldTooLong { field, length, max });
    }
    Ok(())
}

/// Non-blank, trimmed, and within `max` characters.
pub(crate) fn required_text(
    field: &'static str,
    value: &str,
    max: usize,
) -> Result<String, AccountError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AccountError::Required(field));
    }
    check_length(field, trimmed, max)?;
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_address_is_valid() {
        assert!(Address::default().validate().is_ok());
    }

    #[test]
    fn test_postcode_length_is_limited() {
        let address = Address {
            postcode: Some("1234567890123".into()),
            ..Address::default()
        };

        let err = address.validate().unwrap_err();
        assert!(matches!(err, AccountError::FieldTooLong { field: "postcode", length: 13, max: 12 }));
    }

    #[test]
    fn test_required_text_trims_and_rejects_blank() {
        assert_eq!(required_text("reason", "  Testing ", 100).unwrap(), "Testing");
        assert!(matches!(required_text("reason", "   ", 100), Err(AccountError::Required("reason"))));
    }
}
