//! Bijection between label names and dense integer ids.

use std::collections::HashMap;

use crate::error::{ModelError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSpace {
    names: Vec<String>,
    ids: HashMap<String, u32>,
}

impl LabelSpace {
    /// Ids follow the order of `names`. Empty or duplicated lists are rejected.
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(ModelError::InvalidLabels(
                "label list must contain at least one label".into(),
            ));
        }

        let mut ids = HashMap::with_capacity(names.len());
        for (id, name) in names.iter().enumerate() {
            if ids.insert(name.clone(), id as u32).is_some() {
                return Err(ModelError::InvalidLabels(format!(
                    "label '{name}' appears more than once"
                )));
            }
        }
        Ok(Self { names, ids })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn id(&self, name: &str) -> Result<u32> {
        self.ids
            .get(name)
            .copied()
            .ok_or_else(|| ModelError::UnknownLabel(name.to_string()))
    }

    pub fn name(&self, id: u32) -> Result<&str> {
        self.names
            .get(id as usize)
            .map(String::as_str)
            .ok_or(ModelError::LabelIdOutOfRange {
                id,
                labels_num: self.names.len(),
            })
    }

    /// Maps every name, failing on the first unknown one.
    pub fn ids_for<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<u32>> {
        names.iter().map(|name| self.id(name.as_ref())).collect()
    }
}
