use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Class index to human-readable label table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassNames {
    names: BTreeMap<usize, String>,
}

impl ClassNames {
    /// Builds a table from labels ordered by class index.
    pub fn from_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: labels
                .into_iter()
                .map(Into::into)
                .enumerate()
                .collect(),
        }
    }

    /// Reads a file with one class name per line, line number being the class index.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(Self::from_labels(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty()),
        ))
    }

    /// Parses the `names` entry Ultralytics writes into exported model metadata,
    /// e.g. `{0: 'person', 1: 'bicycle'}`.
    pub fn parse_metadata(raw: &str) -> anyhow::Result<Self> {
        let body = raw
            .trim()
            .strip_prefix('{')
            .and_then(|s| s.strip_suffix('}'))
            .ok_or_else(|| anyhow::anyhow!("class names metadata is not a mapping: {raw}"))?;

        let mut names = BTreeMap::new();
        let mut rest = body.trim_start();

        while !rest.is_empty() {
            let (key, after_key) = rest
                .split_once(':')
                .ok_or_else(|| anyhow::anyhow!("missing ':' after class index in {raw}"))?;
            let index: usize = key
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid class index {:?}", key.trim()))?;

            let after_key = after_key.trim_start();
            let quote = after_key
                .chars()
                .next()
                .filter(|c| *c == '\'' || *c == '"')
                .ok_or_else(|| anyhow::anyhow!("class {index} label is not quoted"))?;

            let (label, consumed) = read_quoted(&after_key[1..], quote)
                .ok_or_else(|| anyhow::anyhow!("unterminated label for class {index}"))?;
            names.insert(index, label);

            rest = after_key[1 + consumed..].trim_start();
            rest = rest.strip_prefix(',').unwrap_or(rest).trim_start();
        }

        Ok(Self { names })
    }

    /// Label for a class index; unnamed indices are labelled with the index itself.
    pub fn label(&self, class_id: usize) -> Cow<'_, str> {
        match self.names.get(&class_id) {
            Some(name) => Cow::Borrowed(name.as_str()),
            None => Cow::Owned(class_id.to_string()),
        }
    }

    pub fn get(&self, class_id: usize) -> Option<&str> {
        self.names.get(&class_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Reads up to the closing `quote`, honouring backslash escapes. Returns the
/// unescaped text and the number of bytes consumed including the closing quote.
fn read_quoted(input: &str, quote: char) -> Option<(String, usize)> {
    let mut label = String::new();
    let mut escaped = false;

    for (offset, c) in input.char_indices() {
        if escaped {
            label.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == quote {
            return Some((label, offset + c.len_utf8()));
        } else {
            label.push(c);
        }
    }

    None
}
