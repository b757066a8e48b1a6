use thiserror::Error;

/// A stored or received label did not name any variant.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("unknown {kind} label: {value}")]
pub struct ParseLabelError {
    pub kind: &'static str,
    pub value: String,
}

/// Implements `as_str`, `Display` and `FromStr` for a fieldless enum. The labels are the same
/// snake_case names serde uses, so the datastore and the JSON boundary agree.
macro_rules! labeled_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $label:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::wager::ParseLabelError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($label => Ok($name::$variant),)+
                    _ => Err($crate::wager::ParseLabelError {
                        kind: $kind,
                        value: value.to_string(),
                    }),
                }
            }
        }
    };
}

pub(crate) use labeled_enum;
