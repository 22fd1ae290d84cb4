/// In-memory, append-only list of the lines entered this session.
#[derive(Debug, Default)]
pub struct History {
    entries: Vec<String>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, line: impl Into<String>) {
        self.entries.push(line.into());
    }

    /// Entry at a 1-based index.
    pub fn get(&self, index: usize) -> Option<&str> {
        index
            .checked_sub(1)
            .and_then(|i| self.entries.get(i))
            .map(String::as_str)
    }

    /// Most recent entry starting with `prefix`, with its 1-based index.
    pub fn find_last_with_prefix(&self, prefix: &str) -> Option<(usize, &str)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.starts_with(prefix))
            .last()
            .map(|(i, entry)| (i + 1, entry.as_str()))
    }

    /// Entries oldest first, paired with their 1-based index.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.entries.iter().enumerate().map(|(i, entry)| (i + 1, entry.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
