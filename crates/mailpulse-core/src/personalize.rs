//! Personalization - resolves `{{field}}` placeholders against a recipient
//!
//! Reserved fields (`first_name`, `last_name`, `email`) are read off the
//! recipient, every other identifier is looked up in its custom fields.
//! Unresolved placeholders are left verbatim so a single missing field never
//! aborts a send.

use mailpulse_storage::models::Recipient;
use regex::{Captures, Regex};
use std::collections::BTreeSet;
use std::sync::OnceLock;

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{([A-Za-z0-9_]+)\}\}").expect("placeholder pattern is valid")
    })
}

/// Render a template against one recipient
pub fn render(template: &str, recipient: &Recipient) -> String {
    placeholder()
        .replace_all(template, |caps: &Captures| {
            resolve(&caps[1], recipient).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Identifiers in `template` that this recipient cannot resolve, sorted, each once
pub fn unresolved(template: &str, recipient: &Recipient) -> Vec<String> {
    placeholder()
        .captures_iter(template)
        .filter(|caps| resolve(&caps[1], recipient).is_none())
        .map(|caps| caps[1].to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn resolve(name: &str, recipient: &Recipient) -> Option<String> {
    match name {
        "first_name" => Some(recipient.first_name.clone().unwrap_or_default()),
        "last_name" => Some(recipient.last_name.clone().unwrap_or_default()),
        "email" => Some(recipient.email.clone()),
        other => recipient.custom_field(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn recipient() -> Recipient {
        Recipient {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            email: "grace@example.com".to_string(),
            first_name: Some("Grace".to_string()),
            last_name: Some("Hopper".to_string()),
            custom_fields: serde_json::json!({
                "company": "Navy",
                "plan": "premium",
                "first_name": "Shadowed"
            }),
            status: "active".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_reserved_and_custom_fields() {
        let template = "Hi {{first_name}} ({{email}}) from {{company}}";
        let rendered = render(template, &recipient());

        assert_eq!(rendered, "Hi Grace (grace@example.com) from Navy");
        assert!(!rendered.contains("{{"));
    }

    #[test]
    fn test_unresolved_left_verbatim() {
        let rendered = render("Dear {{first_name}}, your {{coupon}} awaits", &recipient());
        assert_eq!(rendered, "Dear Grace, your {{coupon}} awaits");
    }

    #[test]
    fn test_reserved_fields_win_over_custom() {
        assert_eq!(render("{{first_name}}", &recipient()), "Grace");
    }

    #[test]
    fn test_missing_reserved_field_renders_empty() {
        let mut r = recipient();
        r.last_name = None;
        assert_eq!(render("[{{last_name}}]", &r), "[]");
    }

    #[test]
    fn test_case_sensitive_and_no_spaces() {
        let r = recipient();
        assert_eq!(render("{{First_Name}}", &r), "{{First_Name}}");
        assert_eq!(render("{{ first_name }}", &r), "{{ first_name }}");
    }

    #[test]
    fn test_pure_and_repeatable() {
        let r = recipient();
        let template = "<p>{{first_name}} {{last_name}} / {{plan}}</p>";
        assert_eq!(render(template, &r), render(template, &r));
    }

    #[test]
    fn test_unresolved_lists_missing_fields() {
        let missing = unresolved("{{first_name}} {{coupon}} {{region}}", &recipient());
        assert_eq!(missing, vec!["coupon".to_string(), "region".to_string()]);
    }

    #[test]
    fn test_unresolved_reports_each_field_once() {
        let missing = unresolved("{{region}} {{first_name}} {{coupon}} {{region}}", &recipient());
        assert_eq!(missing, vec!["coupon".to_string(), "region".to_string()]);
    }
}
