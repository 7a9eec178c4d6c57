use courier_statsd::{CounterMetric, GaugeMetric, TimerMetric};

/// Counter metrics for transmissions.
pub enum TransmissionCounters {
    /// Incremented for every completed send.
    ///
    /// Tagged by `status`, which is `transport_error` if no response was received.
    Sent,

    /// Incremented for every transmission that is lost.
    ///
    /// Tagged by `reason`.
    Dropped,

    /// Incremented every time a policy sends a transmission, or a part of it, again.
    ///
    /// Tagged by `policy`.
    Retried,

    /// Incremented every time a policy pauses transmission with a backoff timer.
    ///
    /// Tagged by `policy`.
    PolicyBackoff,
}

impl CounterMetric for TransmissionCounters {
    fn name(&self) -> &'static str {
        match *self {
            Self::Sent => "transmission.sent",
            Self::Dropped => "transmission.dropped",
            Self::Retried => "transmission.retried",
            Self::PolicyBackoff => "transmission.policy.backoff",
        }
    }
}

/// Gauge metrics for transmissions.
pub enum TransmissionGauges {
    /// The effective number of concurrent sends.
    SenderCapacity,
    /// The effective capacity of the in-memory buffer in bytes.
    BufferCapacity,
    /// The effective capacity of the storage in bytes.
    StorageCapacity,
    /// The number of transmissions waiting in the buffer.
    BufferedTransmissions,
}

impl GaugeMetric for TransmissionGauges {
    fn name(&self) -> &'static str {
        match *self {
            Self::SenderCapacity => "transmission.capacity.sender",
            Self::BufferCapacity => "transmission.capacity.buffer",
            Self::StorageCapacity => "transmission.capacity.storage",
            Self::BufferedTransmissions => "transmission.buffer.count",
        }
    }
}

/// Timer metrics for transmissions.
pub enum TransmissionTimers {
    /// The duration of a single send, including failed ones.
    SendDuration,
}

impl TimerMetric for TransmissionTimers {
    fn name(&self) -> &'static str {
        match *self {
            Self::SendDuration => "transmission.send.duration",
        }
    }
}
