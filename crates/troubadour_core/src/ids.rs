//! Channel and Bus Identifiers
//!
//! Ids are (kind, string) pairs; the kind lives in the type, so a
//! `ChannelId` and a `BusId` carrying the same string never compare
//! equal. Id strings are constrained to a safe subset: non-empty, at
//! most 100 characters, alphanumeric / hyphen / underscore. Display
//! names share the length limits but allow free text minus control
//! characters.

use serde::{Deserialize, Serialize};

use crate::error::{MixerError, MixerResult};

/// Maximum length of an id or display name, in characters.
pub const MAX_ID_LEN: usize = 100;

/// The distinguished master channel id string.
pub const MASTER_ID: &str = "master";

/// Validate an id string against the character-set and length rules.
pub fn validate_id_str(what: &str, raw: &str) -> MixerResult<()> {
    if raw.is_empty() {
        return Err(MixerError::validation(format!("{what} must not be empty")));
    }
    if raw.chars().count() > MAX_ID_LEN {
        return Err(MixerError::validation(format!(
            "{what} exceeds {MAX_ID_LEN} characters"
        )));
    }
    if let Some(bad) = raw
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(MixerError::validation(format!(
            "{what} contains invalid character {bad:?} (allowed: alphanumeric, '-', '_')"
        )));
    }
    Ok(())
}

/// Validate a display name: same length rules, free text, no control
/// characters.
pub fn validate_name(raw: &str) -> MixerResult<()> {
    if raw.is_empty() {
        return Err(MixerError::validation("name must not be empty"));
    }
    if raw.chars().count() > MAX_ID_LEN {
        return Err(MixerError::validation(format!(
            "name exceeds {MAX_ID_LEN} characters"
        )));
    }
    if raw.chars().any(|c| c.is_control()) {
        return Err(MixerError::validation(
            "name must not contain control characters",
        ));
    }
    Ok(())
}

macro_rules! id_type {
    ($name:ident, $what:literal) => {
        #[doc = concat!("Opaque identifier for a ", $what, ".")]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn new(raw: impl Into<String>) -> MixerResult<Self> {
                let raw = raw.into();
                validate_id_str(concat!($what, " id"), &raw)?;
                Ok(Self(raw))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = MixerError;

            fn try_from(raw: String) -> MixerResult<Self> {
                Self::new(raw)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> String {
                id.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

id_type!(ChannelId, "channel");
id_type!(BusId, "bus");

impl ChannelId {
    /// The fixed id of the master channel.
    pub fn master() -> Self {
        Self(MASTER_ID.to_string())
    }

    pub fn is_master(&self) -> bool {
        self.0 == MASTER_ID
    }
}
