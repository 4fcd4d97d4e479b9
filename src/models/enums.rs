/// Macro to generate enum with as_str + std::str::FromStr pattern.
/// The string form doubles as the serde representation.
macro_rules! str_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ::serde::Serialize, ::serde::Deserialize)]
        pub enum $name {
            $(#[serde(rename = $s)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }

            pub fn all() -> &'static [$name] {
                &[$(Self::$variant),+]
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::models::ModelError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err($crate::models::ModelError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

pub(crate) use str_enum;

str_enum!(
    /// Whether a requirement can be decided automatically.
    ValidationClass {
        Auto => "auto",
        HumanJudgment => "human-judgment",
    }
);

impl Default for ValidationClass {
    fn default() -> Self {
        Self::Auto
    }
}

str_enum!(
    /// Structured field a requirement expects its evidence to carry.
    FieldKind {
        Date => "date",
        Identifier => "identifier",
        Name => "name",
        Area => "area",
        Text => "text",
    }
);

impl Default for FieldKind {
    fn default() -> Self {
        Self::Text
    }
}

str_enum!(ExtractionMethod {
    Heuristic => "heuristic",
    Inference => "inference",
    Unresolved => "unresolved",
});

str_enum!(
    /// `Pending` until the citation verifier has settled the record.
    VerificationOutcome {
        Pending => "pending",
        Verified => "verified",
        Unverified => "unverified",
        Rejected => "rejected",
    }
);

str_enum!(ExtractionStatus {
    Covered => "covered",
    Partial => "partial",
    Missing => "missing",
    ExtractionUncertain => "extraction-uncertain",
});

str_enum!(ValidationType {
    DateAlignment => "date-alignment",
    IdentityConsistency => "identity-consistency",
    IdentifierConsistency => "identifier-consistency",
});

str_enum!(
    /// `NotChecked` is never a pass: it means no eligible evidence existed.
    ValidationOutcome {
        Pass => "pass",
        Warning => "warning",
        Fail => "fail",
        NotChecked => "not-checked",
    }
);

impl ValidationOutcome {
    pub fn is_checked(&self) -> bool {
        !matches!(self, Self::NotChecked)
    }
}

str_enum!(AreaUnit {
    Hectares => "ha",
    Acres => "acres",
    SquareKilometres => "km2",
});

impl AreaUnit {
    pub fn to_hectares(&self, amount: f64) -> f64 {
        match self {
            Self::Hectares => amount,
            Self::Acres => amount * 0.404_685_642_24,
            Self::SquareKilometres => amount * 100.0,
        }
    }
}
