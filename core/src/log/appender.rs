use super::consts::{
    LOG_ARCHIVE_SUFFIX, LOG_FILE_BASE_ROLLS, LOG_FILE_MAX_ROLLS, LOG_FILE_MAX_SIZE, LOG_LINE_PATTERN, LOG_LINE_PATTERN_COLORED,
};
use log::LevelFilter;
use log4rs::{
    append::{
        Append,
        console::ConsoleAppender,
        rolling_file::{
            RollingFileAppender,
            policy::compound::{CompoundPolicy, roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger},
        },
    },
    config::Appender,
    encode::pattern::PatternEncoder,
    filter::{Filter, threshold::ThresholdFilter},
};
use std::path::PathBuf;

pub(super) struct AppenderSpec {
    pub name: &'static str,
    level: Option<LevelFilter>,
    append: Option<Box<dyn Append>>,
}

impl AppenderSpec {
    pub fn console(name: &'static str, level: Option<LevelFilter>) -> Self {
        let append = ConsoleAppender::builder().encoder(Box::new(PatternEncoder::new(LOG_LINE_PATTERN_COLORED))).build();
        Self { name, level, append: Some(Box::new(append)) }
    }

    /// A size-triggered rolling file appender. Falls back to a disabled appender
    /// if the log directory cannot be used, in which case a line is printed to stderr.
    pub fn roller(name: &'static str, level: Option<LevelFilter>, log_dir: &str, file_name: &str) -> Self {
        let file_path = PathBuf::from(log_dir).join(file_name);
        let roller_pattern = PathBuf::from(log_dir).join(format!("{file_name}{LOG_ARCHIVE_SUFFIX}"));
        let append = FixedWindowRoller::builder()
            .base(LOG_FILE_BASE_ROLLS)
            .build(&roller_pattern.to_string_lossy(), LOG_FILE_MAX_ROLLS)
            .map_err(|err| err.to_string())
            .and_then(|roller| {
                let policy = CompoundPolicy::new(Box::new(SizeTrigger::new(LOG_FILE_MAX_SIZE)), Box::new(roller));
                RollingFileAppender::builder()
                    .encoder(Box::new(PatternEncoder::new(LOG_LINE_PATTERN)))
                    .build(&file_path, Box::new(policy))
                    .map_err(|err| err.to_string())
            });
        match append {
            Ok(append) => Self { name, level, append: Some(Box::new(append)) },
            Err(err) => {
                eprintln!("cannot log to {}: {err}", file_path.display());
                Self { name, level, append: None }
            }
        }
    }

    pub fn appender(&mut self) -> Option<Appender> {
        let append = self.append.take()?;
        Some(
            Appender::builder()
                .filters(self.level.map(|x| Box::new(ThresholdFilter::new(x)) as Box<dyn Filter>))
                .build(self.name, append),
        )
    }
}
