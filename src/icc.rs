use std::borrow::Cow;
use std::path::Path;

use crate::error::{ConvertError, ConvertResult};

/// Name stored in the iCCP chunk for the bundled profile.
pub const BUNDLED_PROFILE_NAME: &str = "ITUR_2100_PQ_FULL";

/// ICC v4 display profile describing full-range BT.2100 PQ RGB.
static BUNDLED_PROFILE: &[u8] = include_bytes!("../assets/bt2100_pq.icc");

/// ICC profiles start with a 128-byte header carrying `acsp` at offset 36.
const ICC_HEADER_LEN: usize = 128;
const ICC_SIGNATURE_OFFSET: usize = 36;

/// An opaque ICC profile blob and the name it is embedded under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IccProfile {
    name: String,
    data: Cow<'static, [u8]>,
}

impl Default for IccProfile {
    fn default() -> Self {
        Self::bundled()
    }
}

impl IccProfile {
    pub fn bundled() -> Self {
        Self {
            name: BUNDLED_PROFILE_NAME.to_owned(),
            data: Cow::Borrowed(BUNDLED_PROFILE),
        }
    }

    pub fn new(name: impl Into<String>, data: Vec<u8>) -> ConvertResult<Self> {
        let name = name.into();
        validate_name(&name)?;
        if data.len() < ICC_HEADER_LEN
            || &data[ICC_SIGNATURE_OFFSET..ICC_SIGNATURE_OFFSET + 4] != b"acsp"
        {
            return Err(ConvertError::InvalidConfig(format!(
                "ICC profile '{name}' is not a valid profile ({} bytes, missing 'acsp' signature)",
                data.len()
            )));
        }
        Ok(Self {
            name,
            data: Cow::Owned(data),
        })
    }

    /// Load a profile from disk, named after the file stem.
    pub fn from_file(path: &Path) -> ConvertResult<Self> {
        let data = std::fs::read(path).map_err(|err| {
            ConvertError::InvalidConfig(format!(
                "failed to read ICC profile {}: {err}",
                path.display()
            ))
        })?;
        let name: String = path
            .file_stem()
            .map(|stem| stem.to_string_lossy())
            .unwrap_or_default()
            .chars()
            .filter(|c| c.is_ascii_graphic() || *c == ' ')
            .take(79)
            .collect();
        let name = name.trim();
        Self::new(if name.is_empty() { "ICC Profile" } else { name }, data)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// PNG profile names are 1-79 Latin-1 printable characters without
/// leading, trailing or consecutive spaces.
fn validate_name(name: &str) -> ConvertResult<()> {
    let valid = (1..=79).contains(&name.len())
        && name.chars().all(|c| c.is_ascii_graphic() || c == ' ')
        && !name.starts_with(' ')
        && !name.ends_with(' ')
        && !name.contains("  ");
    if valid {
        Ok(())
    } else {
        Err(ConvertError::InvalidConfig(format!(
            "invalid ICC profile name {name:?}"
        )))
    }
}
