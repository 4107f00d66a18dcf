use std::sync::Arc;
use std::{fmt, str::FromStr};

const MAX_ID_LEN: usize = 64;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum IdValidationError {
    #[error("ID exceeds maximum length of {0} characters")]
    TooLong(usize),
    #[error("ID contains invalid characters")]
    InvalidCharacters,
    #[error("ID is empty")]
    Empty,
}

pub fn validate_id_string(s: &str, max_len: usize) -> Result<(), IdValidationError> {
    if s.is_empty() {
        return Err(IdValidationError::Empty);
    }
    if s.len() > max_len {
        return Err(IdValidationError::TooLong(max_len));
    }
    if !s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
    {
        return Err(IdValidationError::InvalidCharacters);
    }
    Ok(())
}

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(Arc<str>);

        impl $name {
            pub fn new(id: impl Into<String>) -> Result<Self, IdValidationError> {
                let id = id.into();
                validate_id_string(&id, MAX_ID_LEN)?;
                Ok(Self(Arc::from(id)))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl TryFrom<&str> for $name {
            type Error = IdValidationError;

            fn try_from(value: &str) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl FromStr for $name {
            type Err = IdValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0.to_string()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&*self.0, f)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_tuple(stringify!($name)).field(&&*self.0).finish()
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

entity_id!(
    /// Conference participant (endpoint) identifier, as announced by signaling.
    ParticipantId
);

entity_id!(
    /// Identifier of one media source of a participant, e.g. camera or screenshare.
    SourceId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_signaling_ids() {
        let id = ParticipantId::new("endpoint-1").unwrap();
        assert_eq!(id.as_str(), "endpoint-1");
        assert_eq!(id.to_string(), "endpoint-1");

        let source: SourceId = "endpoint-1-v0".parse().unwrap();
        assert_eq!(source.as_ref(), "endpoint-1-v0");
    }

    #[test]
    fn rejects_invalid_ids() {
        assert_eq!(ParticipantId::new(""), Err(IdValidationError::Empty));
        assert_eq!(
            ParticipantId::new("a b"),
            Err(IdValidationError::InvalidCharacters)
        );
        assert_eq!(
            SourceId::new("x".repeat(MAX_ID_LEN + 1)),
            Err(IdValidationError::TooLong(MAX_ID_LEN))
        );
    }

    #[test]
    fn serde_validates() {
        let id: ParticipantId = serde_json::from_str("\"alice\"").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"alice\"");
        assert!(serde_json::from_str::<ParticipantId>("\"al ice\"").is_err());
    }
}
