use crate::error::{Error, Result};
use crate::symbol::SymbolWidth;
use std::path::PathBuf;
use std::time::Duration;

/// Settings for one construction run.
#[derive(Clone, Debug)]
pub struct Config {
    pub input: PathBuf,
    /// Prefix for the level and histogram files. Nothing is written without it.
    pub output: Option<PathBuf>,
    pub width: SymbolWidth,
    /// Only the first `prefix` bytes of the input are used.
    pub prefix: Option<u64>,
    /// Read buffer size in symbols.
    pub read_buffer: Option<usize>,
    /// The input already holds effective codes.
    pub effective: bool,
    pub validate: bool,
    pub workers: usize,
    /// Threads per worker. Defaults to an even share of the machine.
    pub threads: Option<usize>,
    /// Release node bit vectors level by level during merge.
    pub discard: bool,
    pub recv_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input: PathBuf::new(),
            output: None,
            width: SymbolWidth::U8,
            prefix: None,
            read_buffer: None,
            effective: false,
            validate: false,
            workers: 1,
            threads: None,
            discard: true,
            recv_timeout: None,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.input.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("no input file given".into()));
        }
        if self.workers == 0 {
            return Err(Error::InvalidConfig("need at least one worker".into()));
        }
        if self.threads == Some(0) {
            return Err(Error::InvalidConfig("need at least one thread per worker".into()));
        }
        if self.read_buffer == Some(0) {
            return Err(Error::InvalidConfig("read buffer must hold a symbol".into()));
        }
        if self.validate && self.output.is_none() {
            return Err(Error::InvalidConfig(
                "validation reads the written tree back and needs an output path".into(),
            ));
        }
        Ok(())
    }

    pub fn threads_per_worker(&self) -> usize {
        self.threads.unwrap_or_else(|| {
            let cores = std::thread::available_parallelism().map_or(1, |n| n.get());
            cores / self.workers.max(1)
        })
        .max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            input: "text.bin".into(),
            ..Config::default()
        }
    }

    #[test]
    fn test_validate() {
        assert!(config().validate().is_ok());
        assert!(Config::default().validate().is_err());
        assert!(Config { workers: 0, ..config() }.validate().is_err());
        assert!(Config { threads: Some(0), ..config() }.validate().is_err());
        assert!(Config { validate: true, ..config() }.validate().is_err());
        assert!(Config {
            validate: true,
            output: Some("wt".into()),
            ..config()
        }
        .validate()
        .is_ok());
    }

    #[test]
    fn test_threads_per_worker() {
        assert_eq!(Config { threads: Some(3), ..config() }.threads_per_worker(), 3);
        assert!(Config { workers: 10_000, ..config() }.threads_per_worker() >= 1);
    }
}
