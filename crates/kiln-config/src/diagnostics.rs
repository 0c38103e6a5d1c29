use serde::de::DeserializeOwned;

/// Non-fatal findings from loading a config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigDiagnostics {
    /// Sorted dotted paths of keys nothing consumed, such as `cook.typo`.
    pub unknown_keys: Vec<String>,
}

impl ConfigDiagnostics {
    pub fn is_empty(&self) -> bool {
        self.unknown_keys.is_empty()
    }
}

/// Deserializes `text`, collecting every key the target type ignored.
pub(crate) fn deserialize_toml_with_unknown_keys<T: DeserializeOwned>(
    text: &str,
) -> Result<(T, Vec<String>), toml::de::Error> {
    let mut ignored = Vec::new();
    let value = serde_ignored::deserialize(toml::de::Deserializer::new(text), |path| {
        let dotted = path.to_string();
        ignored.push(dotted.trim_start_matches('.').to_owned());
    })?;
    ignored.sort();
    ignored.dedup();
    Ok((value, ignored))
}
