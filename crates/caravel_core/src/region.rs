use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// Cloud providers the control plane can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Aws,
    Azure,
    Gcp,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Aws => "aws",
            Provider::Azure => "azure",
            Provider::Gcp => "gcp",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "aws" => Ok(Provider::Aws),
            "azure" => Ok(Provider::Azure),
            "gcp" => Ok(Provider::Gcp),
            _ => Err(Error::UnsupportedProvider(s.to_string())),
        }
    }
}

/// A `<provider>:<subregion>` region identifier, e.g. `aws:us-east-1`.
///
/// The tag is split on the first `:` only; the subregion may itself be any
/// provider-specific name matching `[a-z0-9][a-z0-9-]*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RegionTag {
    provider: Provider,
    subregion: String,
}

impl RegionTag {
    pub fn new(provider: Provider, subregion: impl Into<String>) -> Result<Self> {
        static RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9-]*$").unwrap());

        let subregion = subregion.into();
        if !RE.is_match(&subregion) {
            return Err(Error::InvalidRegionTag(format!(
                "{}:{}",
                provider, subregion
            )));
        }
        Ok(RegionTag {
            provider,
            subregion,
        })
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn subregion(&self) -> &str {
        &self.subregion
    }
}

impl fmt::Display for RegionTag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.subregion)
    }
}

impl FromStr for RegionTag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (provider, subregion) = s
            .split_once(':')
            .ok_or_else(|| Error::InvalidRegionTag(s.to_string()))?;
        RegionTag::new(provider.parse()?, subregion)
    }
}

impl TryFrom<String> for RegionTag {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<RegionTag> for String {
    fn from(tag: RegionTag) -> String {
        tag.to_string()
    }
}
