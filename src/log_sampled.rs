//! Parameters read from dated, append-only log files.
//!
//! Cryostat controllers write one CSV-like file per day and per sensor under
//! `root/YY-MM-DD/`. A log-sampled parameter never talks to the device: each
//! read opens today's file and returns the value of its last well-formed
//! row.
//!
//! Missing, unreadable or empty files are transient conditions. They are
//! logged and reported as `NaN` so a monitoring loop keeps running.

use async_trait::async_trait;
use chrono::{Local, NaiveDate, NaiveDateTime};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{trace, warn};

use crate::error::{AppResult, DaqError};
use crate::hardware::capabilities::ValueSource;
use crate::parameter::{Parameter, Value};

/// Date format of the per-day folder and file suffix.
pub const DAY_FORMAT: &str = "%y-%m-%d";

/// Format of `date-time` after joining the first two columns.
pub const TIMESTAMP_FORMAT: &str = "%d-%m-%y-%H:%M:%S";

/// Number of pressure gauges in a maxigauge log row.
pub const MAXIGAUGE_CHANNELS: usize = 6;

/// Supplies "today" for file selection.
pub type DateProvider = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

/// Location and row layout of one family of dated log files.
#[derive(Debug, Clone, PartialEq)]
pub struct DatedLog {
    /// Log root containing one folder per day.
    pub root: PathBuf,
    /// File name before the date, e.g. `CH6 T `.
    pub prefix: String,
    /// Zero-based column holding the value.
    pub value_column: usize,
}

impl DatedLog {
    /// Temperature log of thermometer `channel`: rows of `date,time,value`.
    pub fn temperature(root: impl Into<PathBuf>, channel: usize) -> Self {
        Self {
            root: root.into(),
            prefix: format!("CH{} T ", channel),
            value_column: 2,
        }
    }

    /// Pressure of gauge `channel` in the maxigauge log.
    ///
    /// Each row carries `date,time` then six columns per gauge (name, unused,
    /// status, pressure, unused, unused).
    pub fn maxigauge(root: impl Into<PathBuf>, channel: usize) -> AppResult<Self> {
        if channel == 0 || channel > MAXIGAUGE_CHANNELS {
            return Err(DaqError::InvalidChannel {
                index: channel,
                channel_count: MAXIGAUGE_CHANNELS,
            });
        }
        Ok(Self {
            root: root.into(),
            prefix: "maxigauge ".to_string(),
            value_column: 2 + 6 * (channel - 1) + 3,
        })
    }

    /// File holding the entries of `day`.
    pub fn path_for(&self, day: NaiveDate) -> PathBuf {
        let folder = day.format(DAY_FORMAT).to_string();
        let file = format!("{}{}.log", self.prefix, folder);
        self.root.join(folder).join(file)
    }
}

/// One parsed log row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogSample {
    pub timestamp: NaiveDateTime,
    pub value: f64,
}

/// Last well-formed row of `contents`.
///
/// Rows with an unparsable timestamp or value are skipped, so a partially
/// written final line falls back to the one before it.
pub fn last_sample(contents: &str, value_column: usize) -> Option<LogSample> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(contents.as_bytes());

    let mut last = None;
    for record in reader.records().flatten() {
        let (Some(date), Some(time), Some(value)) =
            (record.get(0), record.get(1), record.get(value_column))
        else {
            continue;
        };
        let Ok(timestamp) =
            NaiveDateTime::parse_from_str(&format!("{}-{}", date, time), TIMESTAMP_FORMAT)
        else {
            continue;
        };
        if let Ok(value) = value.parse::<f64>() {
            last = Some(LogSample { timestamp, value });
        }
    }
    last
}

/// Read-only value source backed by a [`DatedLog`].
#[derive(Clone)]
pub struct LogSampledParameter {
    log: DatedLog,
    today: DateProvider,
}

impl LogSampledParameter {
    /// Source reading today's file in local time.
    pub fn new(log: DatedLog) -> Self {
        Self {
            log,
            today: Arc::new(|| Local::now().date_naive()),
        }
    }

    /// Replace the clock used to pick the file.
    pub fn with_date_provider(
        mut self,
        today: impl Fn() -> NaiveDate + Send + Sync + 'static,
    ) -> Self {
        self.today = Arc::new(today);
        self
    }

    pub fn log(&self) -> &DatedLog {
        &self.log
    }

    /// Path of the file read now.
    pub fn current_path(&self) -> PathBuf {
        self.log.path_for((self.today)())
    }

    /// Latest sample of today's file.
    ///
    /// # Errors
    /// `Io` when the file cannot be read; `Ok(None)` when it holds no
    /// well-formed row.
    pub async fn latest_sample(&self) -> AppResult<Option<LogSample>> {
        let path = self.current_path();
        let contents = tokio::fs::read_to_string(&path).await?;
        let sample = last_sample(&contents, self.log.value_column);
        trace!(path = %path.display(), ?sample, "log sampled");
        Ok(sample)
    }

    /// Wrap this source into a read-only parameter.
    pub fn into_parameter(
        self,
        name: impl Into<String>,
        unit: &str,
        docstring: &str,
    ) -> AppResult<Parameter> {
        Parameter::builder(name)
            .unit(unit)
            .docstring(docstring)
            .source(Arc::new(self))
            .build()
    }
}

#[async_trait]
impl ValueSource for LogSampledParameter {
    async fn read(&self) -> AppResult<Value> {
        match self.latest_sample().await {
            Ok(Some(sample)) => Ok(Value::Float(sample.value)),
            Ok(None) => {
                warn!(
                    path = %self.current_path().display(),
                    "cannot parse log file, returning NaN"
                );
                Ok(Value::Float(f64::NAN))
            }
            Err(e) => {
                warn!(
                    path = %self.current_path().display(),
                    error = %e,
                    "cannot access log file, returning NaN"
                );
                Ok(Value::Float(f64::NAN))
            }
        }
    }

    fn describe(&self) -> String {
        format!("{}*.log in {}", self.log.prefix, self.log.root.display())
    }
}
