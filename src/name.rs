//! Command-name validation.
//!
//! An FQN is one or more colon-separated segments, each matching
//! `[A-Za-z0-9_.-]+`. A dot inside a segment is legal but shadows the
//! dotted-name module rule, so callers must confirm before registering it.

use crate::error::RouterError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Valid,
    /// Offending segment (empty string for an empty segment) and a reason.
    InvalidSyntax { segment: String, reason: String },
    /// Valid syntax, but at least one segment contains a dot.
    DottedNameWarning,
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        !matches!(self, Validation::InvalidSyntax { .. })
    }
}

fn segment_char_ok(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')
}

/// Check FQN syntax. Pure; never touches the registry.
pub fn validate(name: &str) -> Validation {
    if name.is_empty() {
        return Validation::InvalidSyntax {
            segment: String::new(),
            reason: "name cannot be empty".into(),
        };
    }

    let mut dotted = false;
    for segment in name.split(':') {
        if segment.is_empty() {
            return Validation::InvalidSyntax {
                segment: String::new(),
                reason: "empty segment (leading, trailing or double colon)".into(),
            };
        }
        if let Some(bad) = segment.chars().find(|c| !segment_char_ok(*c)) {
            return Validation::InvalidSyntax {
                segment: segment.to_string(),
                reason: format!(
                    "segment '{segment}' contains '{bad}'; only letters, digits, '_', '-' and '.' are allowed"
                ),
            };
        }
        dotted |= segment.contains('.');
    }

    if dotted {
        Validation::DottedNameWarning
    } else {
        Validation::Valid
    }
}

/// Subcommands of the `tu` CLI. A command under one of these names could
/// never be reached as `tu <name>`.
pub const RESERVED: &[&str] = &[
    "complete",
    "completion",
    "edit",
    "export",
    "history",
    "import",
    "list",
    "register",
    "rename",
    "run",
    "show",
    "stats",
    "unregister",
    "validate",
];

/// Validate a name about to be registered, applying the dotted-name gate.
pub fn check_registrable(name: &str, allow_dotted: bool) -> Result<(), RouterError> {
    if RESERVED.contains(&name) {
        return Err(RouterError::invalid_name(
            name,
            format!("'{name}' is a tu subcommand; pick another name or a namespace such as 'my:{name}'"),
        ));
    }
    match validate(name) {
        Validation::Valid => Ok(()),
        Validation::DottedNameWarning if allow_dotted => Ok(()),
        Validation::DottedNameWarning => {
            Err(RouterError::DottedNameConfirmationRequired(name.to_string()))
        }
        Validation::InvalidSyntax { reason, .. } => Err(RouterError::invalid_name(name, reason)),
    }
}

/// Whether an input name is eligible for the dotted-name module fallback.
pub fn is_dotted(name: &str) -> bool {
    name.contains('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_and_namespaced() {
        assert_eq!(validate("deploy"), Validation::Valid);
        assert_eq!(validate("infra:deploy:prod"), Validation::Valid);
        assert_eq!(validate("build_all-2"), Validation::Valid);
    }

    #[test]
    fn rejects_empty_segments() {
        for bad in ["", ":deploy", "deploy:", "infra::deploy"] {
            assert!(!validate(bad).is_valid(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn reports_offending_segment() {
        match validate("infra:de ploy") {
            Validation::InvalidSyntax { segment, .. } => assert_eq!(segment, "de ploy"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(!validate("a/b").is_valid());
    }

    #[test]
    fn dotted_segment_warns() {
        assert_eq!(validate("json.tool"), Validation::DottedNameWarning);
        assert_eq!(validate("ns:v1.2"), Validation::DottedNameWarning);
        assert!(validate("json.tool").is_valid());
    }

    #[test]
    fn registrable_gate() {
        assert!(check_registrable("deploy", false).is_ok());
        assert!(matches!(
            check_registrable("a.b", false),
            Err(RouterError::DottedNameConfirmationRequired(_))
        ));
        assert!(check_registrable("a.b", true).is_ok());
        assert!(matches!(
            check_registrable("a::b", true),
            Err(RouterError::InvalidName { .. })
        ));
    }

    #[test]
    fn subcommand_names_are_reserved() {
        assert!(matches!(
            check_registrable("list", false),
            Err(RouterError::InvalidName { .. })
        ));
        assert!(check_registrable("my:list", false).is_ok());
        assert!(check_registrable("listing", false).is_ok());
        assert_eq!(validate("run"), Validation::Valid);
    }
}
