//! Macros for defining validated name types.

/// Maximum length of any object name.
pub const MAX_NAME_LEN: usize = 253;

/// Validate an object name: lowercase alphanumerics, `-` and `.`, starting
/// and ending with an alphanumeric character.
pub fn validate_name(kind: &'static str, value: &str) -> Result<(), crate::NameError> {
    if value.is_empty() {
        return Err(crate::NameError::Empty { kind });
    }

    if value.len() > MAX_NAME_LEN {
        return Err(crate::NameError::TooLong {
            kind,
            value: value.to_string(),
            max: MAX_NAME_LEN,
        });
    }

    if let Some(character) = value
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-' || *c == '.'))
    {
        return Err(crate::NameError::InvalidCharacter {
            kind,
            value: value.to_string(),
            character,
        });
    }

    let alnum = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
    if !alnum(value.chars().next()) || !alnum(value.chars().last()) {
        return Err(crate::NameError::InvalidBoundary {
            kind,
            value: value.to_string(),
        });
    }

    Ok(())
}

/// Macro to define a validated name type.
///
/// This generates a newtype wrapper around `String` with:
/// - A `KIND` constant used in error messages
/// - `parse()` to validate and construct
/// - `as_str()` to borrow the raw name
/// - `Display`, `FromStr`, `AsRef<str>` and `Borrow<str>` implementations
/// - `Serialize` and `Deserialize` implementations
///
/// # Example
///
/// ```ignore
/// define_name!(DestinationName, "destination");
///
/// let dest: DestinationName = "cluster1".parse()?;
/// ```
#[macro_export]
macro_rules! define_name {
    ($name:ident, $kind:literal) => {
        /// A validated name for this object type.
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(String);

        impl $name {
            /// The object kind, used in error messages.
            pub const KIND: &'static str = $kind;

            /// Parses and validates a name.
            pub fn parse(s: &str) -> Result<Self, $crate::NameError> {
                $crate::validate_name(Self::KIND, s)?;
                Ok(Self(s.to_string()))
            }

            /// Returns the raw name.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::NameError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::parse(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}
