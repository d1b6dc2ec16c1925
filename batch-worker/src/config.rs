use std::str::FromStr;
use std::time;

use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3301")]
    pub port: u16,

    #[envconfig(default = "worker")]
    pub worker_name: NonEmptyString,

    #[envconfig(default = "5")]
    pub batch_size: usize,

    /// How long to wait after an empty fetch before polling again.
    #[envconfig(default = "1000")]
    pub idle_interval: EnvMsDuration,

    /// Simulated fetch cost of the in-memory reference queue.
    #[envconfig(default = "100")]
    pub fetch_latency: EnvMsDuration,

    /// Number of demo messages to preload into the in-memory queue.
    #[envconfig(default = "10")]
    pub seed_messages: usize,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[derive(Debug, Clone)]
pub struct NonEmptyString(pub String);

impl NonEmptyString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_ms_duration() {
        let duration = "250".parse::<EnvMsDuration>().unwrap();
        assert_eq!(duration.0, time::Duration::from_millis(250));

        assert!("not-a-number".parse::<EnvMsDuration>().is_err());
    }

    #[test]
    fn test_parse_non_empty_string() {
        let name = "worker".parse::<NonEmptyString>().unwrap();
        assert_eq!(name.as_str(), "worker");

        assert!("".parse::<NonEmptyString>().is_err());
    }
}
