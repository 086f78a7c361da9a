//! Card-network partners the pipeline exchanges files and calls with.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// A card-network partner.
///
/// The three-letter code is what partners put in header/trailer records and
/// what scheduled job payloads carry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Partner {
    #[serde(rename = "PNA")]
    A,
    #[serde(rename = "PNB")]
    B,
    #[serde(rename = "PNC")]
    C,
    #[serde(rename = "PND")]
    D,
}

impl Partner {
    pub const ALL: [Partner; 4] = [Partner::A, Partner::B, Partner::C, Partner::D];

    pub fn code(&self) -> &'static str {
        match self {
            Partner::A => "PNA",
            Partner::B => "PNB",
            Partner::C => "PNC",
            Partner::D => "PND",
        }
    }
}

impl core::fmt::Display for Partner {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Partner {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Partner::ALL
            .into_iter()
            .find(|p| p.code().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| DomainError::unknown_partner(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_parse_back() {
        for p in Partner::ALL {
            assert_eq!(p.code().parse::<Partner>().unwrap(), p);
        }
        assert_eq!(" pnc ".parse::<Partner>().unwrap(), Partner::C);
    }

    #[test]
    fn unknown_code_is_rejected() {
        assert_eq!(
            "XYZ".parse::<Partner>().unwrap_err(),
            DomainError::UnknownPartner("XYZ".to_string())
        );
    }

    #[test]
    fn serializes_as_code() {
        assert_eq!(serde_json::to_string(&Partner::B).unwrap(), "\"PNB\"");
    }
}
