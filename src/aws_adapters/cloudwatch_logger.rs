//! `Logger` backed by CloudWatch Logs. Every decision log entry is put as
//! one event on the configured log group/stream; a put failure is logged
//! via `tracing` and swallowed, matching the `Logger` contract's guarantee
//! that a sink failure never changes a request's already-decided outcome.

use std::sync::Mutex;

use aws_sdk_cloudwatchlogs::Client;

use crate::logging::{DecisionLogEntry, Logger};

pub struct CloudWatchLogger {
    client: Client,
    log_group: String,
    log_stream: String,
    sequence_token: Mutex<Option<String>>,
}

impl CloudWatchLogger {
    pub fn new(client: Client, log_group: impl Into<String>, log_stream: impl Into<String>) -> Self {
        Self { client, log_group: log_group.into(), log_stream: log_stream.into(), sequence_token: Mutex::new(None) }
    }

    async fn put_async(&self, line: String, timestamp_millis: i64) -> Result<(), String> {
        use aws_sdk_cloudwatchlogs::types::InputLogEvent;

        let event = InputLogEvent::builder().timestamp(timestamp_millis).message(line).build().map_err(|e| e.to_string())?;

        let token = self.sequence_token.lock().expect("sequence token mutex poisoned").clone();

        let mut request = self.client.put_log_events().log_group_name(&self.log_group).log_stream_name(&self.log_stream).log_events(event);
        if let Some(token) = token {
            request = request.sequence_token(token);
        }

        let output = request.send().await.map_err(|e| e.to_string())?;
        *self.sequence_token.lock().expect("sequence token mutex poisoned") = output.next_sequence_token;
        Ok(())
    }
}

impl Logger for CloudWatchLogger {
    fn log(&self, entry: DecisionLogEntry) {
        let line = match serde_json::to_string(&entry) {
            Ok(line) => line,
            Err(err) => {
                tracing::error!(error = %err, "failed to serialize decision log entry");
                return;
            }
        };
        let timestamp_millis = entry.request.time.timestamp_millis();

        let result = tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(self.put_async(line, timestamp_millis)));
        if let Err(err) = result {
            tracing::error!(error = %err, log_group = %self.log_group, log_stream = %self.log_stream, "failed to ship decision log entry to cloudwatch");
        }
    }
}
