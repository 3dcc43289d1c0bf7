pub mod duration {
    use crate::time::timeunit::DurationUnit;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    /// `"200ms"`, `"30s"` or a bare number of seconds.
    #[derive(serde_derive::Deserialize)]
    #[serde(untagged)]
    enum RawDuration {
        Seconds(u64),
        Unit(String),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match RawDuration::deserialize(deserializer)? {
            RawDuration::Seconds(secs) => Ok(Duration::from_secs(secs)),
            RawDuration::Unit(v) => match v.trim().parse::<u64>() {
                Ok(secs) => Ok(Duration::from_secs(secs)),
                Err(_) => v
                    .as_str()
                    .parse::<DurationUnit>()
                    .map(Into::into)
                    .map_err(|err| D::Error::custom(err.to_string())),
            },
        }
    }
}

pub mod optional_duration {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    #[derive(serde_derive::Deserialize)]
    struct Wrapped(#[serde(with = "super::duration")] Duration);

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<Wrapped>::deserialize(deserializer).map(|v| v.map(|Wrapped(duration)| duration))
    }
}

/// A single hook expression or a list of them.
pub mod hooks {
    use serde::{Deserialize, Deserializer};

    #[derive(serde_derive::Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
            None => vec![],
            Some(OneOrMany::One(hook)) => vec![hook],
            Some(OneOrMany::Many(hooks)) => hooks,
        })
    }
}
