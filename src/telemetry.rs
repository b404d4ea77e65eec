// Copyright Istio Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::env;
use std::fmt::Debug;
use std::time::Instant;

use once_cell::sync::Lazy;
use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing::{Event, Subscriber, field, info, warn};
use tracing_log::NormalizeEvent;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::{FormatTime, SystemTime};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, format};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{Layer, Registry, filter, filter::EnvFilter, prelude::*, reload};

pub static APPLICATION_START_TIME: Lazy<Instant> = Lazy::new(Instant::now);
static LOG_HANDLE: OnceCell<LogHandle> = OnceCell::new();

pub fn setup_logging() {
    Lazy::force(&APPLICATION_START_TIME);
    tracing_subscriber::registry().with(fmt_layer()).init();
}

fn json_fmt() -> BoxLayer {
    let format = tracing_subscriber::fmt::format().json().flatten_event(true);
    let format = tracing_subscriber::fmt::layer()
        .event_format(format)
        .fmt_fields(format::JsonFields::default());
    Box::new(format)
}

fn plain_fmt() -> BoxLayer {
    Box::new(tracing_subscriber::fmt::layer().event_format(PlainFormat))
}

fn fmt_layer() -> BoxLayer {
    let format = if env::var("LOG_FORMAT").unwrap_or_default() == "json" {
        json_fmt()
    } else {
        plain_fmt()
    };
    let (layer, reload) = reload::Layer::new(format.with_filter(default_env_filter()));
    LOG_HANDLE
        .set(reload)
        .map_or_else(|_| warn!("setup log handler failed"), |_| {});
    Box::new(layer)
}

fn default_env_filter() -> EnvFilter {
    // hyper's connection level logs are noisy; they can be explicitly overridden
    let var: String = env::var(EnvFilter::DEFAULT_ENV)
        .map(|v| "hyper=warn,".to_string() + v.as_str())
        .unwrap_or_else(|_| "hyper=warn,info".to_string());
    EnvFilter::builder()
        .with_regex(false)
        .parse(&var)
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

// a handle to get and set the log level
type BoxLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;
type FilteredLayer = filter::Filtered<BoxLayer, EnvFilter, Registry>;
type LogHandle = reload::Handle<FilteredLayer, Registry>;

/// set_level dynamically updates the logging level to *include* level. If `reset` is true, it will
/// reset the entire logging configuration first.
pub fn set_level(reset: bool, level: &str) -> Result<(), Error> {
    let Some(handle) = LOG_HANDLE.get() else {
        warn!("failed to get log handle");
        return Err(Error::Uninitialized);
    };
    // new_directive will be current_directive + level; duplicates are resolved by the parser
    let new_directive = match handle.with_current(|f| f.filter().to_string()) {
        Ok(_) if reset => format!("{},{}", default_env_filter(), level),
        Ok(current) => format!("{current},{level}"),
        Err(_) => level.to_string(),
    };

    let new_filter = EnvFilter::builder().parse(new_directive)?;
    info!("new log filter is {new_filter}");

    Ok(handle.modify(|layer| {
        *layer.filter_mut() = new_filter;
    })?)
}

pub fn get_current_loglevel() -> Result<String, Error> {
    if let Some(handle) = LOG_HANDLE.get() {
        Ok(handle.with_current(|f| f.filter().to_string())?)
    } else {
        Err(Error::Uninitialized)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("parse failure: {0}")]
    InvalidFilter(#[from] filter::ParseError),
    #[error("reload failure: {0}")]
    Reload(#[from] reload::Error),
    #[error("logging is not initialized")]
    Uninitialized,
}

/// PlainFormat writes one tab separated line per event: `time level target message key=value...`.
/// String values are written bare, everything else with its `Debug` form.
struct PlainFormat;

#[derive(Default)]
struct EventFields {
    message: String,
    pairs: Vec<(&'static str, String)>,
}

impl EventFields {
    fn push(&mut self, field: &field::Field, value: String) {
        match field.name() {
            "message" => self.message = value,
            // metadata of bridged `log` records, already folded into the normalized metadata
            name if name.starts_with("log.") => {}
            name => self.pairs.push((name, value)),
        }
    }
}

impl field::Visit for EventFields {
    fn record_str(&mut self, field: &field::Field, value: &str) {
        self.push(field, value.to_string())
    }

    fn record_debug(&mut self, field: &field::Field, value: &dyn Debug) {
        self.push(field, format!("{value:?}"))
    }
}

impl<S, N> FormatEvent<S, N> for PlainFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let normalized = event.normalized_metadata();
        let meta = normalized.as_ref().unwrap_or_else(|| event.metadata());
        let target = meta.target();
        let target = target.strip_prefix("infrabin::").unwrap_or(target);

        let mut fields = EventFields::default();
        event.record(&mut fields);

        SystemTime.format_time(&mut writer)?;
        write!(
            writer,
            "\t{}\t{target}\t{}",
            meta.level().to_string().to_ascii_lowercase(),
            fields.message
        )?;
        for (name, value) in fields.pairs {
            write!(writer, "\t{name}={value}")?;
        }
        writeln!(writer)
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn plain_format_columns() {
        let out = Capture::default();
        let writer = out.clone();
        let subscriber = tracing_subscriber::fmt()
            .event_format(PlainFormat)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            warn!(
                target: "infrabin::proxy",
                endpoint = "proxy",
                code = 7,
                "url not allowed"
            );
            info!(target: "hyper::client", "connected");
        });

        let text = String::from_utf8(out.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<Vec<&str>> = text
            .lines()
            .map(|l| l.split('\t').skip(1).collect())
            .collect();
        assert_eq!(
            lines,
            vec![
                vec!["warn", "proxy", "url not allowed", "endpoint=proxy", "code=7"],
                vec!["info", "hyper::client", "connected"],
            ]
        );
    }

    #[test]
    fn set_level_round_trip() {
        crate::test_helpers::helpers::initialize_telemetry();
        set_level(false, "infrabin::proxy=debug").unwrap();
        let current = get_current_loglevel().unwrap();
        assert!(current.contains("infrabin::proxy=debug"), "{current}");

        set_level(true, "warn").unwrap();
        let current = get_current_loglevel().unwrap();
        assert!(!current.contains("infrabin::proxy=debug"), "{current}");
    }

    #[test]
    fn set_level_rejects_garbage() {
        crate::test_helpers::helpers::initialize_telemetry();
        assert!(matches!(
            set_level(false, "infrabin=notalevel"),
            Err(Error::InvalidFilter(_))
        ));
    }
}
