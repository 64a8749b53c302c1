//! Naming grammars for every resource kind, checked before any remote call.

use uuid::Uuid;

use crate::error::{NameRule, ValidationError, ValidationErrors};
use crate::types::ProvisioningRequest;

struct Grammar {
    min: usize,
    max: usize,
    allowed: fn(char) -> bool,
    allowed_desc: &'static str,
    start: Option<(fn(char) -> bool, &'static str)>,
    end: Option<(fn(char) -> bool, &'static str)>,
    no_trailing_period: bool,
    no_consecutive_hyphens: bool,
}

impl Grammar {
    fn check(&self, name: &str) -> Result<(), NameRule> {
        let len = name.chars().count();
        if len < self.min || len > self.max {
            return Err(NameRule::Length { min: self.min, max: self.max });
        }
        if !name.chars().all(self.allowed) {
            return Err(NameRule::Charset { allowed: self.allowed_desc });
        }
        if let Some((ok, expected)) = self.start {
            if !name.chars().next().is_some_and(ok) {
                return Err(NameRule::Start { expected });
            }
        }
        if let Some((ok, expected)) = self.end {
            if !name.chars().last().is_some_and(ok) {
                return Err(NameRule::End { expected });
            }
        }
        if self.no_trailing_period && name.ends_with('.') {
            return Err(NameRule::TrailingPeriod);
        }
        if self.no_consecutive_hyphens && name.contains("--") {
            return Err(NameRule::ConsecutiveHyphens);
        }
        Ok(())
    }
}

fn letter(c: char) -> bool {
    c.is_ascii_alphabetic()
}

fn alnum(c: char) -> bool {
    c.is_ascii_alphanumeric()
}

fn lower_alnum(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit()
}

fn lower_alnum_hyphen(c: char) -> bool {
    lower_alnum(c) || c == '-'
}

fn alnum_hyphen(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-'
}

fn resource_group_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '(' | ')' | '.')
}

const RESOURCE_GROUP: Grammar = Grammar {
    min: 1,
    max: 90,
    allowed: resource_group_char,
    allowed_desc: "letters, digits, underscores, hyphens, parentheses and periods",
    start: None,
    end: None,
    no_trailing_period: true,
    no_consecutive_hyphens: false,
};

const STORAGE_ACCOUNT: Grammar = Grammar {
    min: 3,
    max: 24,
    allowed: lower_alnum,
    allowed_desc: "lowercase letters and digits",
    start: Some((lower_alnum as fn(char) -> bool, "a lowercase letter or digit")),
    end: None,
    no_trailing_period: false,
    no_consecutive_hyphens: true,
};

const BLOB_CONTAINER: Grammar = Grammar {
    min: 3,
    max: 24,
    allowed: lower_alnum_hyphen,
    allowed_desc: "lowercase letters, digits and hyphens",
    start: Some((lower_alnum as fn(char) -> bool, "a lowercase letter or digit")),
    end: None,
    no_trailing_period: false,
    no_consecutive_hyphens: true,
};

const KEY_VAULT: Grammar = Grammar {
    min: 3,
    max: 24,
    allowed: alnum_hyphen,
    allowed_desc: "letters, digits and hyphens",
    start: Some((letter as fn(char) -> bool, "a letter")),
    end: Some((alnum as fn(char) -> bool, "a letter or digit")),
    no_trailing_period: false,
    no_consecutive_hyphens: true,
};

const KEY_VAULT_KEY: Grammar = Grammar {
    min: 1,
    max: 127,
    allowed: alnum_hyphen,
    allowed_desc: "letters, digits and hyphens",
    start: None,
    end: None,
    no_trailing_period: false,
    no_consecutive_hyphens: false,
};

pub fn resource_group_name(name: &str) -> Result<(), NameRule> {
    RESOURCE_GROUP.check(name)
}

pub fn storage_account_name(name: &str) -> Result<(), NameRule> {
    STORAGE_ACCOUNT.check(name)
}

pub fn blob_container_name(name: &str) -> Result<(), NameRule> {
    BLOB_CONTAINER.check(name)
}

pub fn key_vault_name(name: &str) -> Result<(), NameRule> {
    KEY_VAULT.check(name)
}

pub fn key_vault_key_name(name: &str) -> Result<(), NameRule> {
    KEY_VAULT_KEY.check(name)
}

pub fn uuid(value: &str) -> Result<(), NameRule> {
    if value.is_empty() {
        return Err(NameRule::Required);
    }
    Uuid::parse_str(value).map(|_| ()).map_err(|_| NameRule::Uuid)
}

fn location(value: &str) -> Result<(), NameRule> {
    if value.trim().is_empty() {
        Err(NameRule::Required)
    } else {
        Ok(())
    }
}

/// Validate every name and identifier in `req`, collecting all violations.
pub fn validate_request(req: &ProvisioningRequest) -> Result<(), ValidationErrors> {
    let mut errors = Vec::new();

    let mut check = |field: &'static str, value: &str, result: Result<(), NameRule>| {
        if let Err(rule) = result {
            errors.push(ValidationError {
                field,
                value: value.to_string(),
                rule,
            });
        }
    };

    check("subscription-id", &req.subscription_id, uuid(&req.subscription_id));
    check("tenant-id", &req.tenant_id, uuid(&req.tenant_id));
    if let Some(sp) = req.explicit_principal_id() {
        check("service-principal-object-id", sp, uuid(sp));
    }
    check(
        "resource-group-name",
        &req.resource_group_name,
        resource_group_name(&req.resource_group_name),
    );
    check(
        "resource-group-location",
        &req.resource_group_location,
        location(&req.resource_group_location),
    );
    check(
        "storage-account-name",
        &req.storage_account_name,
        storage_account_name(&req.storage_account_name),
    );
    check(
        "storage-account-container",
        &req.storage_account_container,
        blob_container_name(&req.storage_account_container),
    );
    check("keyvault-name", &req.key_vault_name, key_vault_name(&req.key_vault_name));
    check(
        "keyvault-key-name",
        &req.key_vault_key_name,
        key_vault_key_name(&req.key_vault_key_name),
    );

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationErrors(errors))
    }
}
