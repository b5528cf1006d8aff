//! Logger installation for binaries, tests and benches.
//!
//! Lines look like `INFO Opening unit main at app.db time=2022-01-05 17:02:11.204 target=stout_orm::context`.  The
//! level filter comes from `RUST_LOG`, defaulting to `info`.
use time::format_description::FormatItem;
use time::macros::format_description;

const TIME_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]");

fn builder() -> env_logger::Builder {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format(|buf, record| {
        use std::io::Write;

        let now = time::OffsetDateTime::now_utc();
        let now = now
            .format(TIME_FORMAT)
            .unwrap_or_else(|_| now.unix_timestamp().to_string());

        writeln!(
            buf,
            "{} {} time={} target={}",
            record.level(),
            record.args(),
            now,
            record.target()
        )
    });
    builder
}

/// Log to stderr.
///
/// If called multiple times in the same process, only applies once.  If some other logger was installed first, that
/// one stays.
pub fn log_to_stderr() {
    static ONCE: std::sync::Once = std::sync::Once::new();

    ONCE.call_once(|| {
        if builder().try_init().is_err() {
            log::warn!("A logger was already installed");
        }
    });
}

/// Like [log_to_stderr], but goes through the test harness's output capture.
pub fn log_for_tests() {
    let _ = builder().is_test(true).try_init();
}
