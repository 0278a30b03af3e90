pub mod m_metrics_relay;
pub mod m_poll_scheduler;
pub mod metrics;
pub mod network;

#[cfg(test)]
pub mod test_utils;
