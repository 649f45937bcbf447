//! Lazy row streams.

use std::fmt;

use super::Row;

/// A lazy, finite sequence of rows with named columns.
///
/// Each `select` or `join` returns a fresh stream; rows are produced only
/// as the caller pulls them.
pub struct RowStream {
    columns: Vec<String>,
    inner: Box<dyn Iterator<Item = Row> + Send>,
}

impl RowStream {
    /// Wraps an iterator of rows.
    pub fn new<I>(columns: Vec<String>, rows: I) -> Self
    where
        I: Iterator<Item = Row> + Send + 'static,
    {
        Self {
            columns,
            inner: Box::new(rows),
        }
    }

    /// Creates a stream with no rows.
    pub fn empty(columns: Vec<String>) -> Self {
        Self::new(columns, std::iter::empty())
    }

    /// Returns the output column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns the position of a column.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

impl Iterator for RowStream {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        self.inner.next()
    }
}

impl fmt::Debug for RowStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowStream")
            .field("columns", &self.columns)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Value;

    #[test]
    fn test_stream_is_lazy() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&pulled);
        let mut stream = RowStream::new(
            vec!["n".to_string()],
            (0..10).map(move |i| {
                counter.fetch_add(1, Ordering::SeqCst);
                Row::new(vec![Value::integer(i)])
            }),
        );

        assert_eq!(pulled.load(Ordering::SeqCst), 0);
        assert_eq!(stream.next().unwrap().values(), &[Value::integer(0)]);
        assert_eq!(pulled.load(Ordering::SeqCst), 1);
        assert_eq!(stream.column_index("n"), Some(0));
        assert_eq!(stream.count(), 9);
    }
}
