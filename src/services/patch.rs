//! Partial-update field handling for admin `PUT` bodies.

use serde::{Deserialize, Deserializer};

/// Deserializes a clearable field: absent leaves the stored value, `null`
/// clears it, anything else replaces it.
///
/// Pair with `#[serde(default)]` so an absent field stays `None`.
pub fn nullable<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Applies a clearable field to the stored value
pub fn apply<T>(target: &mut Option<T>, update: Option<Option<T>>) {
    if let Some(value) = update {
        *target = value;
    }
}
