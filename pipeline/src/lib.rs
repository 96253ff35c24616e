//! The four pipeline stages, each an ordinary function over a config struct
//! so integration tests can drive them without going through the binary.

pub mod count;
pub mod normalize;
pub mod route;
pub mod sample;

/// RFC3339 timestamp for run summaries.
pub(crate) fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}
