//! Record value traits

use std::fmt::Debug;

use serde::{de::DeserializeOwned, Serialize};

/// Opaque record value held by the primary store.
///
/// The proxy never inspects a record; it only moves it between the store,
/// transaction buffers and the codec.
pub trait Record: Clone + Debug + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> Record for T where
    T: Clone + Debug + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static
{
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Profile {
        name: String,
        visits: u32,
    }

    fn assert_record<R: Record>(_: &R) {}

    #[test]
    fn test_plain_structs_are_records() {
        let profile = Profile {
            name: "ada".to_string(),
            visits: 3,
        };
        assert_record(&profile);
        assert_record(&serde_json::json!({"free": "form"}));
    }
}
