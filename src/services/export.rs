//! Streaming export of the merged ledger.
//!
//! Each source is paged through in batches; the batches are merged lazily, so only one
//! batch per source is held in memory and nothing is fetched ahead of the consumer.

use csv::WriterBuilder;
use futures::stream::{Stream, StreamExt};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::{ledger_order, TransactionRecord};
use crate::error::AppError;
use crate::services::ledger::{LedgerFilter, LedgerService, SourceQuery};
use crate::utils::timeout::bounded;

pub type ExportStream = Pin<Box<dyn Stream<Item = Result<String, AppError>> + Send>>;
pub type RecordStream = Pin<Box<dyn Stream<Item = Result<TransactionRecord, AppError>> + Send>>;

const CSV_HEADERS: [&str; 12] = [
    "id",
    "kind",
    "subtype",
    "metal",
    "token_amount",
    "usd_value",
    "fee_amount",
    "status",
    "occurred_at",
    "wallet_address",
    "transaction_hash",
    "network",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Csv,
    /// JSON Lines, one record per line.
    Json,
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv",
            ExportFormat::Json => "application/x-ndjson",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "jsonl",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        })
    }
}

impl FromStr for ExportFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" | "jsonl" => Ok(ExportFormat::Json),
            other => Err(AppError::InvalidArgument(format!(
                "unsupported export format '{}', expected csv or json",
                other
            ))),
        }
    }
}

/// CSV row representation - amounts as strings so the decimal scale survives
#[derive(Serialize)]
struct TransactionCsvRow {
    id: String,
    kind: &'static str,
    subtype: String,
    metal: &'static str,
    token_amount: String,
    usd_value: String,
    fee_amount: String,
    status: String,
    occurred_at: String,
    wallet_address: String,
    transaction_hash: String,
    network: String,
}

impl From<&TransactionRecord> for TransactionCsvRow {
    fn from(record: &TransactionRecord) -> Self {
        TransactionCsvRow {
            id: record.id.to_string(),
            kind: record.kind.as_str(),
            subtype: record.subtype.clone(),
            metal: record.metal.as_str(),
            token_amount: record.token_amount.to_string(),
            usd_value: record.usd_value.to_string(),
            fee_amount: record.fee_amount.to_string(),
            status: record.status.clone(),
            occurred_at: record.occurred_at.to_rfc3339(),
            wallet_address: record.wallet_address.clone(),
            transaction_hash: record.transaction_hash.clone().unwrap_or_default(),
            network: record.network.clone(),
        }
    }
}

fn csv_line<R: Serialize>(row: R) -> Result<String, AppError> {
    let mut wtr = WriterBuilder::new().has_headers(false).from_writer(vec![]);
    wtr.serialize(row)
        .map_err(|e| AppError::Internal(format!("csv encoding failed: {}", e)))?;
    let bytes = wtr
        .into_inner()
        .map_err(|e| AppError::Internal(format!("csv encoding failed: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| AppError::Internal(format!("csv encoding failed: {}", e)))
}

fn csv_header() -> Result<String, AppError> {
    csv_line(CSV_HEADERS)
}

fn json_line(record: &TransactionRecord) -> Result<String, AppError> {
    let mut line = serde_json::to_string(record)
        .map_err(|e| AppError::Internal(format!("json encoding failed: {}", e)))?;
    line.push('\n');
    Ok(line)
}

#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub batch_size: i64,
    pub max_rows: i64,
    pub store_timeout: Duration,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            max_rows: 50_000,
            store_timeout: Duration::from_millis(5000),
        }
    }
}

/// One source's read position during an export.
struct SourceCursor {
    query: SourceQuery,
    offset: i64,
    buffer: VecDeque<TransactionRecord>,
    exhausted: bool,
}

impl SourceCursor {
    fn new(query: SourceQuery) -> Self {
        Self {
            query,
            offset: 0,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    async fn refill(&mut self, batch_size: i64, timeout: Duration) -> Result<(), AppError> {
        if !self.buffer.is_empty() || self.exhausted {
            return Ok(());
        }

        let rows = bounded(
            timeout,
            "export_fetch",
            self.query
                .source
                .fetch_page(&self.query.filter, batch_size, self.offset),
        )
        .await?;

        if (rows.len() as i64) < batch_size {
            self.exhausted = true;
        }
        self.offset += rows.len() as i64;
        self.buffer.extend(rows);
        Ok(())
    }
}

/// Lazily k-way merges the per-source batches in ledger order.
fn merge_sources(
    plan: Vec<SourceQuery>,
    batch_size: i64,
    timeout: Duration,
) -> RecordStream {
    Box::pin(async_stream::try_stream! {
        let mut cursors: Vec<SourceCursor> = plan.into_iter().map(SourceCursor::new).collect();

        loop {
            for cursor in cursors.iter_mut() {
                cursor.refill(batch_size, timeout).await?;
            }

            let next = cursors
                .iter()
                .enumerate()
                .filter_map(|(i, c)| c.buffer.front().map(|record| (i, record)))
                .min_by(|a, b| ledger_order(a.1, b.1))
                .map(|(i, _)| i);

            match next {
                Some(i) => {
                    if let Some(record) = cursors[i].buffer.pop_front() {
                        yield record;
                    }
                }
                None => break,
            }
        }
    })
}

#[derive(Clone)]
pub struct ExportService {
    ledger: LedgerService,
    config: ExportConfig,
}

impl ExportService {
    pub fn new(ledger: LedgerService, config: ExportConfig) -> Self {
        Self { ledger, config }
    }

    /// Records matching `filter`, in the same order as the paged view.
    ///
    /// Fails with `ResourceExhausted` before reading any record when the matched set is
    /// larger than the configured ceiling.
    pub async fn records(
        &self,
        filter: &LedgerFilter,
    ) -> Result<RecordStream, AppError> {
        let plan = self.ledger.plan(filter)?;
        let total = self.ledger.count(filter).await?;
        if total > self.config.max_rows {
            tracing::warn!(
                user_id = ?filter.user_id,
                total,
                max_rows = self.config.max_rows,
                "Export rejected, result set too large"
            );
            return Err(AppError::ResourceExhausted(format!(
                "export matches {} records, the limit is {}",
                total, self.config.max_rows
            )));
        }

        tracing::info!(user_id = ?filter.user_id, total, "Starting ledger export");
        Ok(merge_sources(
            plan,
            self.config.batch_size.max(1),
            self.config.store_timeout,
        ))
    }

    /// Encoded export: a CSV header plus one line per record, or JSON Lines.
    pub async fn export(
        &self,
        filter: &LedgerFilter,
        format: ExportFormat,
    ) -> Result<ExportStream, AppError> {
        let mut records = self.records(filter).await?;

        let stream: ExportStream = match format {
            ExportFormat::Csv => Box::pin(async_stream::try_stream! {
                yield csv_header()?;
                while let Some(record) = records.next().await {
                    let record = record?;
                    yield csv_line(TransactionCsvRow::from(&record))?;
                }
            }),
            ExportFormat::Json => Box::pin(records.map(|record| record.and_then(|r| json_line(&r)))),
        };
        Ok(stream)
    }
}
