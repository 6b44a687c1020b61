use std::path::Path;

use crate::errors::CorpusError;

/// A list of candidate names, one per line of the source file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameCorpus {
    names: Vec<String>,
}

impl NameCorpus {
    /// Read a newline-delimited file. Blank lines and duplicates are kept as-is, and bytes
    /// that are not UTF-8 become U+FFFD rather than failing the load.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CorpusError> {
        let path = path.as_ref();

        let bytes = std::fs::read(path).map_err(|source| CorpusError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(Self::from_lines(&String::from_utf8_lossy(&bytes)))
    }

    /// Split text the same way [`NameCorpus::load`] splits a file
    pub fn from_lines(contents: &str) -> Self {
        Self {
            names: contents.lines().map(String::from).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }
}

impl<S: Into<String>> FromIterator<S> for NameCorpus {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            names: iter.into_iter().map(Into::into).collect(),
        }
    }
}
