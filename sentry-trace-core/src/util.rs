use serde::Serializer;
use std::time::{SystemTime, UNIX_EPOCH};

/// Serializes a [`SystemTime`] as float seconds since the Unix epoch, the
/// timestamp representation used on the wire.
pub(crate) fn serialize_system_time<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let seconds = time
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs_f64())
        .unwrap_or(0.0);
    serializer.serialize_f64(seconds)
}
