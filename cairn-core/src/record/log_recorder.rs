use super::{AggregateRecorder, Record, RecordStorage, RecordValue, Recorder};
use log::info;

/// Writes aggregated scalars through the `log` facade at info level.
#[derive(Default)]
pub struct LogRecorder {
    storage: RecordStorage,
}

impl LogRecorder {
    /// Constructs the recorder.
    pub fn new() -> Self {
        Self::default()
    }
}

fn format_record(record: &Record) -> String {
    let mut items = record
        .iter()
        .filter_map(|(k, v)| match v {
            RecordValue::Scalar(v) => Some(format!("{}={:.4}", k, v)),
            RecordValue::String(s) => Some(format!("{}={}", k, s)),
            _ => None,
        })
        .collect::<Vec<_>>();
    items.sort();
    items.join(", ")
}

impl Recorder for LogRecorder {
    fn write(&mut self, record: Record) {
        info!("{}", format_record(&record));
    }
}

impl AggregateRecorder for LogRecorder {
    fn store(&mut self, record: Record) {
        self.storage.store(record);
    }

    fn flush(&mut self, step: i64) {
        let record = self.storage.aggregate();
        if !record.is_empty() {
            info!("step {}: {}", step, format_record(&record));
        }
    }
}
