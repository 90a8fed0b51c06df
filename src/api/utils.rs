use chrono::{SecondsFormat, Utc};
use uuid::Uuid;

/// Id used to correlate the log lines and the response of one request,
/// e.g. `req_1718000000000_3f9a0c2b1`.
pub fn generate_request_id() -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("req_{}_{}", Utc::now().timestamp_millis(), &random[..9])
}

pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
