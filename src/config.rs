//! Library-level configuration, parsed from `key=value` lists such as
//! `"threads=4,tri_builder=sah_spatial,verbose=1"`.

use crate::error::{AccelError, Result};
use crate::utilities::task_scheduling::TaskScheduler;
use std::fmt;
use std::str::FromStr;

/// Build strategy for triangle accels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BuilderKind {
    #[default]
    Default,
    Sah,
    SahSpatial,
    SahPresplit,
    Morton,
}

impl BuilderKind {
    pub const ALL: [BuilderKind; 5] = [
        BuilderKind::Default,
        BuilderKind::Sah,
        BuilderKind::SahSpatial,
        BuilderKind::SahPresplit,
        BuilderKind::Morton,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BuilderKind::Default => "default",
            BuilderKind::Sah => "sah",
            BuilderKind::SahSpatial => "sah_spatial",
            BuilderKind::SahPresplit => "sah_presplit",
            BuilderKind::Morton => "morton",
        }
    }
}

impl fmt::Display for BuilderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BuilderKind {
    type Err = AccelError;

    fn from_str(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == name)
            .ok_or_else(|| AccelError::UnknownBuilder {
                name: name.to_string(),
                primitive: "triangle".to_string(),
            })
    }
}

/// Packet traversal strategy for triangle accels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TraverserKind {
    /// Same as `Hybrid`.
    #[default]
    Default,
    /// One shared stack for the whole packet.
    Chunk,
    /// One traversal per active ray.
    Hybrid,
}

impl TraverserKind {
    pub const ALL: [TraverserKind; 3] = [TraverserKind::Default, TraverserKind::Chunk, TraverserKind::Hybrid];

    pub fn name(self) -> &'static str {
        match self {
            TraverserKind::Default => "default",
            TraverserKind::Chunk => "chunk",
            TraverserKind::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for TraverserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TraverserKind {
    type Err = AccelError;

    fn from_str(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == name)
            .ok_or_else(|| AccelError::UnknownTraverser {
                name: name.to_string(),
                primitive: "triangle".to_string(),
            })
    }
}

/// Settings shared by every accel a process creates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccelConfig {
    /// Scheduler participants, 0 for one per logical core.
    pub threads: usize,
    pub tri_builder: BuilderKind,
    pub tri_traverser: TraverserKind,
    /// Tessellation level of lazily expanded subdivision patches.
    pub subdivision_level: usize,
    /// 0 is silent, 1 adds build timings, 2 adds tree statistics.
    pub verbose: usize,
    /// Emits a `BENCHMARK_BUILD` line after every build.
    pub benchmark: bool,
}

impl Default for AccelConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            tri_builder: BuilderKind::Default,
            tri_traverser: TraverserKind::Default,
            subdivision_level: 2,
            verbose: 0,
            benchmark: false,
        }
    }
}

impl AccelConfig {
    /// Participants a scheduler created from this configuration runs.
    pub fn thread_count(&self) -> usize {
        if self.threads > 0 {
            return self.threads;
        }
        std::thread::available_parallelism().map_or(1, |count| count.get())
    }

    /// Starts a scheduler with [`AccelConfig::thread_count`] participants.
    pub fn create_scheduler(&self) -> Result<TaskScheduler> {
        TaskScheduler::with_threads(self.thread_count())
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| AccelError::InvalidConfig(format!("{}={}", key, value)))
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value {
        "1" | "true" | "on" => Ok(true),
        "0" | "false" | "off" => Ok(false),
        _ => Err(AccelError::InvalidConfig(format!("{}={}", key, value))),
    }
}

impl FromStr for AccelConfig {
    type Err = AccelError;

    /// Parses comma separated `key=value` entries on top of the defaults. Blank entries are skipped
    /// and later entries override earlier ones.
    fn from_str(text: &str) -> Result<Self> {
        let mut config = AccelConfig::default();
        for entry in text.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
            let Some((key, value)) = entry.split_once('=') else {
                return Err(AccelError::InvalidConfig(entry.to_string()));
            };
            let (key, value) = (key.trim(), value.trim());
            match key {
                "threads" => config.threads = parse_value(key, value)?,
                "tri_builder" => config.tri_builder = value.parse()?,
                "tri_traverser" => config.tri_traverser = value.parse()?,
                "subdivision_level" => config.subdivision_level = parse_value(key, value)?,
                "verbose" => config.verbose = parse_value(key, value)?,
                "benchmark" => config.benchmark = parse_flag(key, value)?,
                _ => return Err(AccelError::InvalidConfig(entry.to_string())),
            }
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_overrides_defaults() {
        let config: AccelConfig = "threads=3, tri_builder=sah_spatial,tri_traverser=chunk,benchmark=1,"
            .parse()
            .unwrap();
        assert_eq!(
            config,
            AccelConfig {
                threads: 3,
                tri_builder: BuilderKind::SahSpatial,
                tri_traverser: TraverserKind::Chunk,
                benchmark: true,
                ..AccelConfig::default()
            }
        );
        assert_eq!(config.thread_count(), 3);
        assert_eq!("".parse::<AccelConfig>(), Ok(AccelConfig::default()));
        assert_eq!("verbose=1,verbose=2".parse::<AccelConfig>().map(|config| config.verbose), Ok(2));
    }

    #[test]
    fn test_configuration_errors() {
        assert_eq!(
            "tri_builder=fast".parse::<AccelConfig>(),
            Err(AccelError::UnknownBuilder {
                name: "fast".into(),
                primitive: "triangle".into()
            })
        );
        assert!(matches!(
            "tri_traverser=stream".parse::<AccelConfig>(),
            Err(AccelError::UnknownTraverser { .. })
        ));
        assert_eq!(
            "threads=many".parse::<AccelConfig>(),
            Err(AccelError::InvalidConfig("threads=many".into()))
        );
        assert_eq!(
            "colour=red".parse::<AccelConfig>(),
            Err(AccelError::InvalidConfig("colour=red".into()))
        );
        assert_eq!("verbose".parse::<AccelConfig>(), Err(AccelError::InvalidConfig("verbose".into())));
        assert!("benchmark=maybe".parse::<AccelConfig>().is_err());
    }

    #[test]
    fn test_names_round_trip_through_display() {
        for kind in BuilderKind::ALL {
            assert_eq!(kind.to_string().parse::<BuilderKind>(), Ok(kind));
        }
        for kind in TraverserKind::ALL {
            assert_eq!(kind.to_string().parse::<TraverserKind>(), Ok(kind));
        }
    }

    #[test]
    fn test_zero_threads_uses_all_cores() {
        assert!(AccelConfig::default().thread_count() >= 1);
        let scheduler = AccelConfig {
            threads: 2,
            ..AccelConfig::default()
        }
        .create_scheduler()
        .unwrap();
        assert_eq!(scheduler.thread_count(), Ok(2));
        scheduler.destroy().unwrap();
    }
}
