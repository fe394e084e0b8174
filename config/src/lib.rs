// SPDX-License-Identifier: Apache-2.0

//! Configuration intake (spec.md §6): CLI flags and the line-oriented
//! config-file keys the core consumes, plus the
//! `default_channel_rate`/`default_channel_dwell` resolution the
//! original Kismet source treats as a mutual-fallback pair rather than
//! two independent values.

use clap::Args;
use ordermap::OrderSet;
use thiserror::Error;

/// Compiled-in hop rate used when neither `channelvelocity` nor
/// `channeldwell` is configured (the original's hardcoded default).
pub const DEFAULT_CHANNEL_RATE: u32 = 5;

/// `-c/--capture-source` and `-C/--enable-capture-sources`, the only
/// CLI surface spec.md §6 names. Meant to be embedded via
/// `#[command(flatten)]` in a binary's own `Parser` struct, not parsed
/// standalone.
#[derive(Args, Debug, Clone)]
pub struct CmdArgs {
    /// Repeated; equivalent to one `ncsource=<spec>` config line.
    #[arg(
        short = 'c',
        long = "capture-source",
        value_name = "iface[:opt=val,...]",
        help = "Add a capture source, same syntax as the ncsource= config line"
    )]
    pub capture_source: Vec<String>,

    /// Comma-separated; if set, only these sources from the config are
    /// enabled.
    #[arg(
        short = 'C',
        long = "enable-capture-sources",
        value_name = "name,name,...",
        value_delimiter = ',',
        help = "Restrict enabled sources to this list of names or interfaces"
    )]
    pub enable_capture_sources: Option<Vec<String>>,

    /// Path to the line-oriented config file; not in spec.md's CLI
    /// table but needed to actually load one.
    #[arg(long, value_name = "path")]
    pub config_file: Option<std::path::PathBuf>,
}

/// A config-parse failure (§7 kind 1): the caller is expected to treat
/// this as fatal for the whole load, per spec.md §6's "a fatal
/// configuration error ... returns an error from `load_configuration`".
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("line {line}: {key} value {value:?} is not a valid integer")]
    BadInteger {
        line: usize,
        key: &'static str,
        value: String,
    },
    #[error("line {line}: unrecognized config key {0:?}", key)]
    UnknownKey { line: usize, key: String },
}

/// `default_channel_rate`/`default_channel_dwell`, resolved the way the
/// original pairs `channelvelocity`/`channeldwell`: a nonzero configured
/// dwell wins over the compiled-in default rate (mirroring per-source
/// invariant 5's "rate and dwell are mutually exclusive, rate wins"
/// rule, but at the global-default level where dwell is the one
/// explicitly set).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Defaults {
    pub rate: u32,
    pub dwell_seconds: u32,
}

impl Defaults {
    #[must_use]
    pub fn resolve(channelvelocity: Option<u32>, channeldwell: Option<u32>) -> Self {
        match (channelvelocity, channeldwell) {
            (_, Some(dwell)) if dwell > 0 => Defaults {
                rate: 0,
                dwell_seconds: dwell,
            },
            (Some(rate), _) => Defaults {
                rate,
                dwell_seconds: 0,
            },
            (None, _) => Defaults {
                rate: DEFAULT_CHANNEL_RATE,
                dwell_seconds: 0,
            },
        }
    }
}

/// The parsed contents of a config file plus any CLI overlays, ready to
/// be handed to `tracker::Tracker::add_channel_list`/`add_source`.
#[derive(Debug, Clone, Default)]
pub struct LoadedConfig {
    pub defaults_in: DefaultsIn,
    pub ncsources: Vec<String>,
    pub channellists: Vec<String>,
    pub enabled: Option<OrderSet<String>>,
}

/// The raw, not-yet-resolved `channelvelocity`/`channeldwell` pair read
/// from the config file, kept separate from [`Defaults`] so
/// `LoadedConfig::defaults()` can apply [`Defaults::resolve`] once both
/// are known.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DefaultsIn {
    pub channelvelocity: Option<u32>,
    pub channeldwell: Option<u32>,
}

impl LoadedConfig {
    #[must_use]
    pub fn defaults(&self) -> Defaults {
        Defaults::resolve(self.defaults_in.channelvelocity, self.defaults_in.channeldwell)
    }

    /// `enablesources` filter (§6): `None` means "no filter, everything
    /// enabled"; `Some(set)` restricts to sources whose name or
    /// interface is in the set.
    #[must_use]
    pub fn is_enabled(&self, name_or_interface: &str) -> bool {
        self.enabled
            .as_ref()
            .is_none_or(|set| set.contains(name_or_interface))
    }

    /// Fold a [`CmdArgs`] into an already-parsed config file's contents:
    /// each `-c` becomes an additional `ncsource`, and `-C` (if given)
    /// replaces any `enablesources` line from the file.
    pub fn apply_cli(&mut self, args: &CmdArgs) {
        self.ncsources.extend(args.capture_source.iter().cloned());
        if let Some(names) = &args.enable_capture_sources {
            self.enabled = Some(names.iter().cloned().collect());
        }
    }
}

/// Parse the line-oriented config file grammar (§6): `key=value` lines,
/// blank lines and `#`-prefixed comments ignored, `ncsource=` and
/// `channellist=` repeatable.
pub fn parse_config(text: &str) -> Result<LoadedConfig, ConfigError> {
    let mut loaded = LoadedConfig::default();
    for (line_no, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        let lineno = line_no + 1;
        match key {
            "channelvelocity" => {
                loaded.defaults_in.channelvelocity = Some(parse_u32(lineno, "channelvelocity", value)?);
            }
            "channeldwell" => {
                loaded.defaults_in.channeldwell = Some(parse_u32(lineno, "channeldwell", value)?);
            }
            "enablesources" => {
                loaded.enabled = Some(value.split(',').map(str::trim).map(str::to_string).collect());
            }
            "ncsource" => loaded.ncsources.push(value.to_string()),
            "channellist" => loaded.channellists.push(value.to_string()),
            other => {
                tracing::warn!(line = lineno, key = other, "unrecognized config key, ignoring");
            }
        }
    }
    Ok(loaded)
}

fn parse_u32(line: usize, key: &'static str, value: &str) -> Result<u32, ConfigError> {
    value.parse().map_err(|_| ConfigError::BadInteger {
        line,
        key,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_all_recognized_keys() {
        let text = "\
            channelvelocity=3\n\
            channeldwell=0\n\
            enablesources=wlan0,wlan1\n\
            ncsource=wlan0:hop=false,channel=6\n\
            ncsource=wlan1\n\
            channellist=w:1,6,11\n";
        let loaded = parse_config(text).unwrap();
        assert_eq!(loaded.defaults_in.channelvelocity, Some(3));
        assert_eq!(loaded.ncsources.len(), 2);
        assert_eq!(loaded.channellists, vec!["w:1,6,11".to_string()]);
        assert!(loaded.is_enabled("wlan0"));
        assert!(!loaded.is_enabled("wlan9"));
    }

    #[test]
    fn blank_lines_and_comments_are_skipped() {
        let loaded = parse_config("\n# a comment\nncsource=wlan0\n").unwrap();
        assert_eq!(loaded.ncsources, vec!["wlan0".to_string()]);
    }

    #[test]
    fn bad_integer_is_rejected() {
        assert_eq!(
            parse_config("channelvelocity=notanumber\n"),
            Err(ConfigError::BadInteger {
                line: 1,
                key: "channelvelocity",
                value: "notanumber".to_string(),
            })
        );
    }

    #[test]
    fn no_enablesources_line_means_everything_enabled() {
        let loaded = parse_config("ncsource=wlan0\n").unwrap();
        assert!(loaded.is_enabled("anything"));
    }

    #[test]
    fn dwell_wins_over_configured_rate_when_both_nonzero() {
        let defaults = Defaults::resolve(Some(3), Some(5));
        assert_eq!(defaults.rate, 0);
        assert_eq!(defaults.dwell_seconds, 5);
    }

    #[test]
    fn rate_used_when_dwell_unset_or_zero() {
        assert_eq!(Defaults::resolve(Some(3), None), Defaults { rate: 3, dwell_seconds: 0 });
        assert_eq!(Defaults::resolve(Some(3), Some(0)), Defaults { rate: 3, dwell_seconds: 0 });
    }

    #[test]
    fn compiled_in_default_when_nothing_configured() {
        assert_eq!(
            Defaults::resolve(None, None),
            Defaults {
                rate: DEFAULT_CHANNEL_RATE,
                dwell_seconds: 0
            }
        );
    }

    #[test]
    fn cli_capture_source_is_appended_to_file_ncsources() {
        let mut loaded = parse_config("ncsource=wlan0\n").unwrap();
        let args = CmdArgs {
            capture_source: vec!["wlan1:hop=false,channel=1".to_string()],
            enable_capture_sources: None,
            config_file: None,
        };
        loaded.apply_cli(&args);
        assert_eq!(loaded.ncsources.len(), 2);
    }

    #[test]
    fn cli_enable_list_overrides_file_enablesources() {
        let mut loaded = parse_config("enablesources=wlan0\n").unwrap();
        let args = CmdArgs {
            capture_source: vec![],
            enable_capture_sources: Some(vec!["wlan9".to_string()]),
            config_file: None,
        };
        loaded.apply_cli(&args);
        assert!(loaded.is_enabled("wlan9"));
        assert!(!loaded.is_enabled("wlan0"));
    }
}
