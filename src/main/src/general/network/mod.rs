pub mod http_handler;
pub mod m_nats;
pub mod m_rpc;
pub mod proto_ext;

#[allow(unused_results, dead_code, clippy::all)]
pub mod proto {
    pub mod metric {
        include!(concat!(env!("OUT_DIR"), "/metric.rs"));
    }
}
