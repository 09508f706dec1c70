use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{normalize, EntryKind, Location};

/// Tag stored alongside the sync state. Changing how identities are computed
/// requires a new tag, otherwise previously synced highlights would reappear.
pub const FINGERPRINT_SCHEME: &str = "sha256-v1";

const FIELD_SEPARATOR: &str = "\u{1f}";

/// Stable identity of a clipping, independent of its offset in the log and
/// of when it was added.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn compute(
        title: &str,
        author: &str,
        kind: EntryKind,
        page: Option<u32>,
        location: Option<&Location>,
        text: &str,
    ) -> Self {
        let position = match (page, location) {
            (Some(page), _) => format!("p{}", page),
            (None, Some(location)) => format!("l{}", location.start),
            (None, None) => String::new(),
        };

        let fields = [
            "v1".to_string(),
            normalize(title),
            normalize(author),
            kind.as_str().to_string(),
            position,
            normalize(text),
        ];

        let mut hasher = Sha256::new();
        hasher.update(fields.join(FIELD_SEPARATOR).as_bytes());
        let digest = hasher.finalize();

        Fingerprint(hex::encode(&digest[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Fingerprint {
    fn from(value: String) -> Self {
        Fingerprint(value)
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
