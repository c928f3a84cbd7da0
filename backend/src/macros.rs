//! Shared macros for the backend crate.

/// Generate a `fmt::Debug` implementation that hides credentials.
///
/// Each field is prefixed with a keyword:
///
/// - `show field_name` prints the value normally
/// - `redact field_name` prints `"[REDACTED]"`
/// - `redact_option field_name` prints `Some("[REDACTED]")` or `None`
///
/// ```ignore
/// redacted_debug!(RealmAuthConfig {
///     show realm,
///     redact jwt_secret,
///     show token_expiry_minutes,
/// });
/// ```
macro_rules! redacted_debug {
    ($name:ident { $( $kind:ident $field:ident ),* $(,)? }) => {
        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                let mut s = f.debug_struct(stringify!($name));
                $( redacted_debug!(@add_field s, self, $kind, $field); )*
                s.finish_non_exhaustive()
            }
        }
    };
    (@add_field $s:ident, $self:ident, show, $field:ident) => {
        $s.field(stringify!($field), &$self.$field);
    };
    (@add_field $s:ident, $self:ident, redact, $field:ident) => {
        $s.field(stringify!($field), &"[REDACTED]");
    };
    (@add_field $s:ident, $self:ident, redact_option, $field:ident) => {
        $s.field(stringify!($field), &$self.$field.as_ref().map(|_| "[REDACTED]"));
    };
}

#[cfg(test)]
mod tests {
    #[allow(dead_code)]
    struct ProvisioningSecrets {
        pub username: String,
        pub signing_key: String,
        pub bootstrap_password: Option<String>,
    }

    redacted_debug!(ProvisioningSecrets {
        show username,
        redact signing_key,
        redact_option bootstrap_password,
    });

    #[test]
    fn test_redacted_fields_never_printed() {
        let s = ProvisioningSecrets {
            username: "admin".to_string(),
            signing_key: "cms-signing-key".to_string(),
            bootstrap_password: Some("first-boot-pw".to_string()),
        };
        let output = format!("{:?}", s);
        assert!(output.contains("admin"));
        assert!(!output.contains("cms-signing-key"));
        assert!(!output.contains("first-boot-pw"));
        assert!(output.contains("[REDACTED]"));
    }

    #[test]
    fn test_missing_optional_secret_shows_none() {
        let s = ProvisioningSecrets {
            username: "admin".to_string(),
            signing_key: "k".to_string(),
            bootstrap_password: None,
        };
        assert!(format!("{:?}", s).contains("None"));
    }
}
