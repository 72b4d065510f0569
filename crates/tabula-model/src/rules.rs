//! Required-field rules.
//!
//! Rules are keyed by *logical field name* (the pre-composite label), not by
//! storage key: they survive template re-uploads that shuffle columns and are
//! resolved against the live schema at validation time.

use core::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who installed a rule. SYSTEM rules are seeded defaults; USER rules come
/// from configuration actions.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RuleScope {
    System,
    User,
}

impl RuleScope {
    pub fn as_str(self) -> &'static str {
        match self {
            RuleScope::System => "SYSTEM",
            RuleScope::User => "USER",
        }
    }

    pub fn parse(s: &str) -> Option<RuleScope> {
        match s {
            "SYSTEM" => Some(RuleScope::System),
            "USER" => Some(RuleScope::User),
            _ => None,
        }
    }
}

impl fmt::Display for RuleScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One "field must be non-empty" rule for a template.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequiredFieldRule {
    pub id: Uuid,
    pub template_id: Uuid,
    /// Logical field name; resolved to a storage key at validation time.
    pub field_name: String,
    pub required: bool,
    /// Custom violation message; a default is derived when absent.
    pub message: Option<String>,
    pub scope: RuleScope,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RequiredFieldRule {
    pub fn new(
        template_id: Uuid,
        field_name: impl Into<String>,
        required: bool,
        message: Option<String>,
        scope: RuleScope,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            template_id,
            field_name: field_name.into(),
            required,
            message,
            scope,
            created_at: now,
            updated_at: now,
        }
    }

    /// The message attached to violations of this rule.
    pub fn violation_message(&self) -> String {
        match &self.message {
            Some(m) if !m.trim().is_empty() => m.clone(),
            _ => format!("'{}' is required", self.field_name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_message_names_the_field() {
        let rule = RequiredFieldRule::new(Uuid::new_v4(), "Supplier", true, None, RuleScope::User);
        assert_eq!(rule.violation_message(), "'Supplier' is required");

        let custom = RequiredFieldRule::new(
            Uuid::new_v4(),
            "Supplier",
            true,
            Some("supplier code missing".into()),
            RuleScope::System,
        );
        assert_eq!(custom.violation_message(), "supplier code missing");
    }

    #[test]
    fn blank_custom_message_falls_back() {
        let rule = RequiredFieldRule::new(
            Uuid::new_v4(),
            "Qty",
            true,
            Some("   ".into()),
            RuleScope::User,
        );
        assert_eq!(rule.violation_message(), "'Qty' is required");
    }

    #[test]
    fn scope_text_roundtrip() {
        assert_eq!(RuleScope::parse("SYSTEM"), Some(RuleScope::System));
        assert_eq!(RuleScope::parse("USER"), Some(RuleScope::User));
        assert_eq!(RuleScope::parse("system"), None);
    }
}
