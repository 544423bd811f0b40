use std::fmt;

/// Class-level update policy: which properties are written and which are
/// checked against their original values.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct UpdatePolicy(u8);

impl UpdatePolicy {
    pub const ALL_PROPS: u8 = 0x01;
    pub const CHANGED_PROPS: u8 = 0x02;
    pub const CHECK_ALL: u8 = 0x04;
    pub const CHECK_CHANGED: u8 = 0x08;
    pub const CHECK_NONE: u8 = 0x00;

    pub fn from_bits(bits: u8) -> Self {
        let mut policy = UpdatePolicy(bits & 0x0f);
        if policy.0 & (Self::ALL_PROPS | Self::CHANGED_PROPS) == 0 {
            policy.0 |= Self::CHANGED_PROPS;
        }
        policy
    }

    /// Parse `|`-separated tokens such as `"all | check_changed"`.
    ///
    /// Unknown tokens are ignored; without a write-scope token the policy
    /// writes changed properties only.
    pub fn parse(text: &str) -> Self {
        let bits = text
            .split('|')
            .map(|t| t.trim().to_ascii_lowercase())
            .fold(0u8, |bits, token| {
                bits | match token.as_str() {
                    "all" => Self::ALL_PROPS,
                    "changed" => Self::CHANGED_PROPS,
                    "check_all" => Self::CHECK_ALL,
                    "check_changed" => Self::CHECK_CHANGED,
                    _ => 0,
                }
            });
        Self::from_bits(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn writes_all(self) -> bool {
        self.0 & Self::ALL_PROPS != 0
    }

    pub fn checks_all(self) -> bool {
        self.0 & Self::CHECK_ALL != 0
    }

    pub fn checks_changed(self) -> bool {
        self.0 & Self::CHECK_CHANGED != 0
    }
}

impl fmt::Debug for UpdatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tokens = Vec::new();
        if self.writes_all() {
            tokens.push("all");
        }
        if self.0 & Self::CHANGED_PROPS != 0 {
            tokens.push("changed");
        }
        if self.checks_all() {
            tokens.push("check_all");
        }
        if self.checks_changed() {
            tokens.push("check_changed");
        }
        write!(f, "UpdatePolicy({})", tokens.join(" | "))
    }
}

/// Per-property override of how a changed value is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PropUpdate {
    #[default]
    Overwrite,
    /// Write `field + (new - original)`.
    Incr,
    /// Like `Incr`, but a decrement is guarded with `field > delta`.
    GtZero,
    /// Like `GtZero`, guarded with `field >= delta`.
    GteZero,
    /// Never written, never checked.
    Ignore,
}

impl PropUpdate {
    pub fn parse(text: &str) -> Option<Self> {
        Some(match text.trim().to_ascii_lowercase().as_str() {
            "overwrite" => PropUpdate::Overwrite,
            "incr" => PropUpdate::Incr,
            "gt_zero" => PropUpdate::GtZero,
            "gte_zero" => PropUpdate::GteZero,
            "ignore" => PropUpdate::Ignore,
            _ => return None,
        })
    }
}

/// Storage type of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropKind {
    Int,
    SmallInt,
    Float,
    String,
    Text,
    Bool,
    /// Auto-generated integer; implies primary key and autoincrement.
    Serial,
}

impl PropKind {
    /// Default length of `string` properties.
    pub const DEFAULT_STRING_LEN: u32 = 200;

    /// Parse a type token such as `int`, `string(80)` or `serial`.
    ///
    /// Unknown names map to `String`. The length is only kept for strings.
    pub fn parse(text: &str) -> (Self, Option<u32>) {
        let text = text.trim();
        let (name, len) = match text.split_once('(') {
            Some((name, rest)) => (name, rest.trim_end_matches(')').trim().parse().ok()),
            None => (text, None),
        };
        let kind = match name.trim().to_ascii_lowercase().as_str() {
            "text" => PropKind::Text,
            "int" | "integer" => PropKind::Int,
            "smallint" => PropKind::SmallInt,
            "bool" | "boolean" => PropKind::Bool,
            "float" | "number" => PropKind::Float,
            "serial" => PropKind::Serial,
            _ => PropKind::String,
        };
        let len = match kind {
            PropKind::String => Some(len.unwrap_or(Self::DEFAULT_STRING_LEN)),
            _ => None,
        };
        (kind, len)
    }

    pub fn is_integer(self) -> bool {
        matches!(self, PropKind::Int | PropKind::SmallInt | PropKind::Serial)
    }
}
