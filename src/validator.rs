//! Command validation hook (C1's "CommandValidation" class made concrete).
//!
//! spec.md is explicit that the engine core must not hard-code a rule list —
//! what counts as a dangerous command is a policy decision for whatever sits
//! above this crate (a UI, an operator config file, a compliance layer).
//! This module only defines the seam; `PermissiveValidator` is the default
//! wired into [`crate::lib`]'s public functions when a caller doesn't supply
//! one of their own, mirroring the ancestor server's auth-strategy trait
//! objects in shape.

/// Implemented by whatever sits above the engine to reject commands before
/// any network connection is attempted. `Err` carries a human-readable
/// reason that becomes part of the `CommandValidation` error message.
pub trait CommandValidator: Send + Sync {
    fn validate(&self, command: &str) -> Result<(), String>;
}

/// Accepts every command. The engine's default when a caller supplies none.
pub struct PermissiveValidator;

impl CommandValidator for PermissiveValidator {
    fn validate(&self, _command: &str) -> Result<(), String> {
        Ok(())
    }
}

/// Rejects every command. Useful for tests and as a template for a
/// deny-by-default policy layer.
pub struct RejectingValidator;

impl CommandValidator for RejectingValidator {
    fn validate(&self, _command: &str) -> Result<(), String> {
        Err("command validation is disabled for this policy".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permissive_validator_accepts_anything() {
        assert!(PermissiveValidator.validate("rm -rf /").is_ok());
        assert!(PermissiveValidator.validate("").is_ok());
    }

    #[test]
    fn rejecting_validator_rejects_everything() {
        assert!(RejectingValidator.validate("echo hi").is_err());
    }
}
