use log::LevelFilter;
use log4rs::config::Logger;
use std::{collections::HashMap, env, mem};
use thiserror::Error;

#[derive(Clone, Debug, Error)]
pub enum LogError {
    #[error("invalid logger filter item '{0}'")]
    InvalidFilter(String),
}

pub(super) struct Loggers {
    loggers: Vec<(String, LevelFilter)>,
    root_level: LevelFilter,
}

impl Loggers {
    pub fn root_level(&self) -> LevelFilter {
        self.root_level
    }

    pub fn items(&self) -> impl IntoIterator<Item = Logger> + '_ {
        self.loggers.iter().map(|(name, level)| Logger::builder().build(name.clone(), *level))
    }
}

/// Accumulates `target=level` filters, later items overriding earlier ones
pub(super) struct Builder {
    loggers: HashMap<String, LevelFilter>,
    root_level: Option<LevelFilter>,
}

impl Builder {
    pub fn new() -> Builder {
        Builder { loggers: HashMap::new(), root_level: None }
    }

    pub fn parse_env(&mut self, env: &str) -> &mut Self {
        self.parse_expression(&env::var(env).unwrap_or_default())
    }

    pub fn parse_expression(&mut self, expression: &str) -> &mut Self {
        for item in expression.split(',').map(str::trim).filter(|x| !x.is_empty()) {
            if let Err(err) = self.parse_item(item) {
                eprintln!("Ignoring logger filter: {err}");
            }
        }
        self
    }

    fn parse_item(&mut self, item: &str) -> Result<(), LogError> {
        let mut parts = item.split('=');
        match (parts.next(), parts.next().map(str::trim), parts.next()) {
            (Some(single), None, None) => match single.parse() {
                Ok(level) => {
                    self.root_level(level);
                }
                Err(_) => {
                    self.logger(single.to_owned(), LevelFilter::max());
                }
            },
            (Some(name), Some(""), None) => {
                self.logger(name.to_owned(), LevelFilter::max());
            }
            (Some(name), Some(level), None) => {
                let level = level.parse().map_err(|_| LogError::InvalidFilter(item.to_owned()))?;
                self.logger(name.to_owned(), level);
            }
            _ => return Err(LogError::InvalidFilter(item.to_owned())),
        }
        Ok(())
    }

    pub fn root_level(&mut self, root_level: LevelFilter) -> &mut Self {
        self.root_level.replace(root_level);
        self
    }

    pub fn logger(&mut self, name: String, level: LevelFilter) -> &mut Self {
        self.loggers.insert(name, level);
        self
    }

    pub fn build(&mut self) -> Loggers {
        let loggers = mem::take(&mut self.loggers).into_iter().collect();
        Loggers { loggers, root_level: self.root_level.take().unwrap_or(LevelFilter::Error) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_expressions() {
        let loggers = Builder::new().parse_expression("debug, kestrel_p2p_flows=trace, bogus=loud, kestrel_consensus").build();
        assert_eq!(loggers.root_level(), LevelFilter::Debug);
        let mut items = loggers.loggers.clone();
        items.sort();
        assert_eq!(
            items,
            vec![("kestrel_consensus".to_owned(), LevelFilter::Trace), ("kestrel_p2p_flows".to_owned(), LevelFilter::Trace)]
        );
    }

    #[test]
    fn test_default_root_level() {
        assert_eq!(Builder::new().parse_expression("").build().root_level(), LevelFilter::Error);
    }
}
