use time::{OffsetDateTime, format_description::well_known::Rfc3339};

pub mod health;
pub mod session;
pub mod sse;
pub mod transition;

fn format_time(time: OffsetDateTime) -> String {
    time.format(&Rfc3339)
        .unwrap_or_else(|_| "invalid-timestamp".into())
}
