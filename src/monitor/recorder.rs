use std::collections::VecDeque;

use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;

use super::types::{AlertRecord, MetricSample, OperationRecord};

pub const DEFAULT_SAMPLE_CAPACITY: usize = 100;
pub const DEFAULT_OPERATION_CAPACITY: usize = 50;

/// Bounded history owned by the monitor.
///
/// Samples live in a ring buffer that overwrites the oldest entry once full.
/// Operations are a bounded FIFO log. Alerts are append-only until cleared.
pub struct HealthRecorder {
    samples: HeapRb<MetricSample>,
    operations: VecDeque<OperationRecord>,
    operation_capacity: usize,
    alerts: Vec<AlertRecord>,
}

impl HealthRecorder {
    pub fn new(sample_capacity: usize, operation_capacity: usize) -> Self {
        let operation_capacity = operation_capacity.max(1);
        Self {
            samples: HeapRb::new(sample_capacity.max(1)),
            operations: VecDeque::with_capacity(operation_capacity),
            operation_capacity,
            alerts: Vec::new(),
        }
    }

    pub fn record_sample(&mut self, sample: MetricSample) {
        // Evicted sample is dropped on purpose.
        let _ = self.samples.push_overwrite(sample);
    }

    pub fn record_operation(&mut self, record: OperationRecord) {
        if self.operations.len() >= self.operation_capacity {
            self.operations.pop_front();
        }
        self.operations.push_back(record);
    }

    pub fn record_alert(&mut self, alert: AlertRecord) {
        self.alerts.push(alert);
    }

    pub fn latest_sample(&self) -> Option<MetricSample> {
        self.samples.iter().last().cloned()
    }

    /// Oldest first.
    pub fn samples(&self) -> Vec<MetricSample> {
        self.samples.iter().cloned().collect()
    }

    pub fn sample_count(&self) -> usize {
        self.samples.occupied_len()
    }

    /// Newest first, at most `limit`.
    pub fn recent_operations(&self, limit: Option<usize>) -> Vec<OperationRecord> {
        let limit = limit.unwrap_or(self.operations.len());
        self.operations.iter().rev().take(limit).cloned().collect()
    }

    pub fn alerts(&self) -> &[AlertRecord] {
        &self.alerts
    }

    pub fn clear_alerts(&mut self) {
        self.alerts.clear();
    }
}
