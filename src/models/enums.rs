use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$(Self::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

str_enum!(Category {
    Exercise => "exercise",
    Study => "study",
    Sleep => "sleep",
    Emotion => "emotion",
    Diet => "diet",
    Other => "other",
});

str_enum!(Mood {
    Positive => "positive",
    Neutral => "neutral",
    Negative => "negative",
});

impl Mood {
    /// Compact marker used in feedback and report text.
    pub fn emoji(&self) -> &'static str {
        match self {
            Self::Positive => "😊",
            Self::Neutral => "😐",
            Self::Negative => "😔",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn category_round_trip() {
        for category in Category::ALL {
            assert_eq!(Category::from_str(category.as_str()).unwrap(), *category);
        }
    }

    #[test]
    fn mood_rejects_unknown_label() {
        let err = Mood::from_str("ecstatic").unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidEnum { ref field, .. } if field == "Mood"));
    }

    #[test]
    fn serde_uses_snake_case_labels() {
        let json = serde_json::to_string(&Category::Exercise).unwrap();
        assert_eq!(json, "\"exercise\"");
        let mood: Mood = serde_json::from_str("\"negative\"").unwrap();
        assert_eq!(mood, Mood::Negative);
    }

    #[test]
    fn display_matches_as_str() {
        assert_eq!(Category::Diet.to_string(), "diet");
        assert_eq!(Mood::Positive.to_string(), "positive");
    }
}
