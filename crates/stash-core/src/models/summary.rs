//! Denormalized campaign summary record

use serde::{Deserialize, Serialize};

use super::DocumentId;
use crate::error::{Error, Result};

/// Maximum length of a campaign display name
pub const MAX_DISPLAY_NAME_CHARS: usize = 120;

/// Secondary record kept in sync with the campaign's display name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignSummary {
    pub id: DocumentId,
    pub name: String,
    /// Last propagation timestamp (Unix ms)
    pub updated_at: i64,
}

/// Validate a display name before writing it to the summary record.
pub fn validate_display_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::Validation(
            "campaign name must not be empty".to_string(),
        ));
    }
    if name.chars().count() > MAX_DISPLAY_NAME_CHARS {
        return Err(Error::Validation(format!(
            "campaign name must be at most {MAX_DISPLAY_NAME_CHARS} characters"
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(Error::Validation(
            "campaign name must not contain control characters".to_string(),
        ));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_display_name_trims_and_accepts() {
        assert_eq!(validate_display_name("  Launch  ").unwrap(), "Launch");
    }

    #[test]
    fn validate_display_name_rejects_bad_values() {
        assert!(validate_display_name(" ").is_err());
        assert!(validate_display_name(&"n".repeat(MAX_DISPLAY_NAME_CHARS + 1)).is_err());
        assert!(matches!(
            validate_display_name("bad\u{7}name"),
            Err(Error::Validation(_))
        ));
    }
}
