//! Incremental reader of training metrics logs.
//!
//! A trainer appends one JSON object per line, e.g.
//! `{"iteration": 19, "total_loss": 1.73, "lr": 0.0002}`. The reader keeps a
//! byte offset so each poll only returns records appended since the last one.

use crate::{common::*, error::FoldError};

/// One line of a metrics log. Non-numeric fields are ignored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRecord {
    pub iteration: Option<u64>,
    pub values: IndexMap<String, f64>,
}

impl MetricRecord {
    fn from_line(line: &str) -> Result<Self, String> {
        let value: Value = serde_json::from_str(line).map_err(|err| err.to_string())?;
        let object = match value {
            Value::Object(object) => object,
            other => return Err(format!("expect a JSON object, but get {}", other)),
        };

        let iteration = object.get("iteration").and_then(Value::as_u64);
        let values = object
            .iter()
            .filter(|(key, _)| *key != "iteration")
            .filter_map(|(key, value)| Some((key.clone(), value.as_f64()?)))
            .collect();

        Ok(Self { iteration, values })
    }
}

/// Follows a metrics file that is being appended to.
#[derive(Debug, Clone)]
pub struct MetricsTail {
    path: PathBuf,
    offset: u64,
}

impl MetricsTail {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes consumed so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Reads the complete lines appended since the last poll.
    ///
    /// A missing file yields no records. A trailing line without a newline
    /// is left for the next poll. If the file shrank, reading restarts
    /// from the beginning.
    pub fn poll(&mut self) -> Result<Vec<MetricRecord>, FoldError> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
            Err(err) => return Err(FoldError::io(&self.path, err)),
        };

        let len = file
            .metadata()
            .map_err(|err| FoldError::io(&self.path, err))?
            .len();
        if len < self.offset {
            warn!(
                "{} was truncated, reading from the beginning",
                self.path.display()
            );
            self.offset = 0;
        }

        file.seek(SeekFrom::Start(self.offset))
            .map_err(|err| FoldError::io(&self.path, err))?;
        let mut buf = vec![];
        file.read_to_end(&mut buf)
            .map_err(|err| FoldError::io(&self.path, err))?;

        let complete = match buf.iter().rposition(|&byte| byte == b'\n') {
            Some(pos) => pos + 1,
            None => return Ok(vec![]),
        };
        let start = self.offset;
        self.offset += complete as u64;

        let records = String::from_utf8_lossy(&buf[..complete])
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter_map(|line| match MetricRecord::from_line(line) {
                Ok(record) => Some(record),
                Err(reason) => {
                    warn!(
                        "skip malformed metrics line after byte {} in {}: {}",
                        start,
                        self.path.display(),
                        reason
                    );
                    None
                }
            })
            .collect();

        Ok(records)
    }
}

/// The most recent value of each metric, in first-seen order.
pub fn latest_values<'a>(
    records: impl IntoIterator<Item = &'a MetricRecord>,
) -> IndexMap<String, (Option<u64>, f64)> {
    let mut latest = IndexMap::new();
    records.into_iter().for_each(|record| {
        record.values.iter().for_each(|(key, &value)| {
            latest.insert(key.clone(), (record.iteration, value));
        });
    });
    latest
}
