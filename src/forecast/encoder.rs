use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Codes follow the sorted order of the distinct values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct CategoryEncoder {
    values: Vec<String>,
}

impl CategoryEncoder {
    pub fn from_values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let distinct: BTreeSet<String> = values.into_iter().map(Into::into).collect();
        Self {
            values: distinct.into_iter().collect(),
        }
    }

    pub fn encode(&self, value: &str) -> Option<u32> {
        self.values
            .binary_search_by(|probe| probe.as_str().cmp(value))
            .ok()
            .and_then(|index| u32::try_from(index).ok())
    }

    pub fn decode(&self, code: u32) -> Option<&str> {
        let index = usize::try_from(code).ok()?;
        self.values.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }
}

impl TryFrom<Vec<String>> for CategoryEncoder {
    type Error = String;

    fn try_from(values: Vec<String>) -> Result<Self, Self::Error> {
        if let Some(pair) = values.windows(2).find(|pair| pair[0] >= pair[1]) {
            return Err(format!(
                "encoder values must be strictly ascending, found {:?} before {:?}",
                pair[0], pair[1]
            ));
        }
        Ok(Self { values })
    }
}

impl From<CategoryEncoder> for Vec<String> {
    fn from(encoder: CategoryEncoder) -> Self {
        encoder.values
    }
}
