//! Log output
//!
//! Plain text on stdout, every line prefixed with the wall-clock time and
//! the number of currently open tunnels:
//!
//! ```text
//! [2024-03-01 17:02:45][3] tunnel closed: connection reset
//! ```

use time::format_description::FormatItem;
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

use crate::stats;

const TIMESTAMP: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// Event formatter emitting the `[time][active_tunnels]` prefix
struct LinePrefix;

impl<S, N> FormatEvent<S, N> for LinePrefix
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        let timestamp = now.format(&TIMESTAMP).map_err(|_| std::fmt::Error)?;

        write!(writer, "[{}][{}] ", timestamp, stats::active_tunnels())?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Install the global subscriber. Verbosity: 0 info, 1 debug (`-v`),
/// 2+ trace with payloads (`-vv`).
pub fn init(verbosity: u8) {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .event_format(LinePrefix)
        .init();
}
