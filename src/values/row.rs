use crate::imports::*;

/*
    Types:
    * Row - One result row: every (column, value) pair in the order the database returned them.
      Columns sharing a name are all kept; lookups by name see the last one
*/
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    fields: Vec<(String, ScalarValue)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, column: impl Into<String>, value: ScalarValue) {
        self.fields.push((column.into(), value));
    }

    pub fn get(&self, column: &str) -> Option<&ScalarValue> {
        self.fields
            .iter()
            .rev()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &ScalarValue> {
        self.fields.iter().map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ScalarValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Moves the listed columns to the front, in the listed order. Unknown names are ignored.
    pub fn reorder(&mut self, order: &[String]) {
        let mut reordered = Vec::with_capacity(self.fields.len());
        for column in order {
            if let Some(pos) = self.fields.iter().position(|(name, _)| name == column) {
                reordered.push(self.fields.remove(pos));
            }
        }
        reordered.append(&mut self.fields);
        self.fields = reordered;
    }

    pub fn into_values(self) -> Vec<ScalarValue> {
        self.fields.into_iter().map(|(_, value)| value).collect()
    }

    pub fn into_object(self) -> ScalarMap {
        self.fields.into_iter().collect()
    }
}

impl FromIterator<(String, ScalarValue)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, ScalarValue)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (column, value) in iter {
            row.push(column, value);
        }
        row
    }
}

impl IntoIterator for Row {
    type Item = (String, ScalarValue);
    type IntoIter = std::vec::IntoIter<(String, ScalarValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}
