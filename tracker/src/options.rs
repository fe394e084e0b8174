// SPDX-License-Identifier: Apache-2.0

//! Parsing for a `source_line`: `interface[:opt=val,…]`. Shared by
//! configuration intake (§6) and `add_source` (§4.C step 1).

use crate::error::SourceConfigError;
use ordermap::OrderMap;

/// The per-source option bag parsed out of a `source_line`, keyed by
/// option name (`type`, `channellist`, `hop`, `channel`, `velocity`,
/// `dwell`, `split`, plus anything driver-local). Order is preserved
/// so a driver's local parsing sees options in the order the user
/// wrote them, though nothing in this core depends on that order.
#[derive(Debug, Clone, Default)]
pub struct OptionBag {
    entries: OrderMap<String, String>,
}

impl OptionBag {
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Split a `source_line` into its interface name and option bag.
/// Grammar: `interface` or `interface:opt=val,opt2=val2,…`. Each
/// `opt=val` pair is separated by `,`; an entry without `=` is a
/// malformed option.
pub fn parse_source_line(source_line: &str) -> Result<(String, OptionBag), SourceConfigError> {
    let mut parts = source_line.splitn(2, ':');
    let interface = parts.next().unwrap_or("").trim();
    if interface.is_empty() {
        return Err(SourceConfigError::EmptyInterface);
    }
    let mut bag = OptionBag::default();
    if let Some(rest) = parts.next() {
        for entry in rest.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let (key, value) = entry
                .split_once('=')
                .ok_or_else(|| SourceConfigError::MalformedOption(entry.to_string()))?;
            bag.entries.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    Ok((interface.to_string(), bag))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bare_interface_has_no_options() {
        let (iface, bag) = parse_source_line("wlan0").unwrap();
        assert_eq!(iface, "wlan0");
        assert!(bag.is_empty());
    }

    #[test]
    fn options_are_parsed() {
        let (iface, bag) = parse_source_line("wlan0:type=auto,hop=false,channel=6").unwrap();
        assert_eq!(iface, "wlan0");
        assert_eq!(bag.get("type"), Some("auto"));
        assert_eq!(bag.get("hop"), Some("false"));
        assert_eq!(bag.get("channel"), Some("6"));
    }

    #[test]
    fn malformed_option_is_rejected() {
        assert_eq!(
            parse_source_line("wlan0:notanoption"),
            Err(SourceConfigError::MalformedOption("notanoption".to_string()))
        );
    }

    #[test]
    fn empty_interface_is_rejected() {
        assert_eq!(
            parse_source_line(":hop=false"),
            Err(SourceConfigError::EmptyInterface)
        );
    }
}
