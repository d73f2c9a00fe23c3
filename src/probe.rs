use std::error::Error;
use std::future::Future;

use crate::types::ScanResult;

/// A probe strategy measuring one target.
///
/// Probes never fail as a whole: network errors are folded into the returned
/// [`ScanResult`] with status `error`. The returned result carries `order = 0`;
/// the caller stamps the real order.
pub trait Probe: Send + Sync + 'static {
    fn probe(&self, ip: &str) -> impl Future<Output = ScanResult> + Send;
}

/// Render an error with its whole source chain, `outer: inner: root`.
pub fn error_chain(err: &(dyn Error + 'static)) -> String {
    let mut msg = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let cause_msg = cause.to_string();
        if !msg.ends_with(&cause_msg) {
            msg.push_str(": ");
            msg.push_str(&cause_msg);
        }
        source = cause.source();
    }
    msg
}
