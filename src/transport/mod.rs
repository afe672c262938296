mod http_transport;

pub use http_transport::{bearer_json_headers, HttpTransport};
