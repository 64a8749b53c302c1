use thiserror::Error;

/// The rule a name broke.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameRule {
    #[error("must be {min}-{max} characters long")]
    Length { min: usize, max: usize },

    #[error("may only contain {allowed}")]
    Charset { allowed: &'static str },

    #[error("must start with {expected}")]
    Start { expected: &'static str },

    #[error("must end with {expected}")]
    End { expected: &'static str },

    #[error("must not end with a period")]
    TrailingPeriod,

    #[error("must not contain consecutive hyphens")]
    ConsecutiveHyphens,

    #[error("must be a UUID")]
    Uuid,

    #[error("is required")]
    Required,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field} '{value}' {rule}")]
pub struct ValidationError {
    pub field: &'static str,
    pub value: String,
    pub rule: NameRule,
}

/// Every violation found in one request, reported together.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ValidationErrors(pub Vec<ValidationError>);

impl ValidationErrors {
    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains_field(&self, field: &str) -> bool {
        self.0.iter().any(|e| e.field == field)
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} invalid field(s): ", self.0.len())?;
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}
