//! Contract rollover timeline for one symbol.
//!
//! Builds the ordered sequence of contract windows from configuration and
//! rejects unsorted, overlapping or ambiguous windows before any file I/O.

use chrono::{DateTime, Utc};
use scid_core::config::{ContractConfig, SymbolConfig};
use scid_core::{ContractWindow, Error, Result};
use std::collections::HashSet;
use std::path::Path;

/// Validated, ordered, non-overlapping contract windows of one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractTimeline {
    symbol: String,
    windows: Vec<ContractWindow>,
}

fn fmt_bound(bound: Option<DateTime<Utc>>) -> String {
    bound.map_or_else(|| "..".to_string(), |b| b.to_rfc3339())
}

fn describe(window: &ContractWindow) -> String {
    format!(
        "{} [{}, {})",
        window.contract_code,
        fmt_bound(window.start),
        fmt_bound(window.end)
    )
}

impl ContractTimeline {
    /// Build and validate the timeline of a symbol.
    pub fn build(symbol: &str, config: &SymbolConfig) -> Result<Self> {
        if config.contracts.is_empty() {
            return Err(Error::config(format!("symbol {symbol} has no contract windows")));
        }

        let windows: Vec<ContractWindow> = config.contracts.iter().map(window_from_config).collect();

        let mut seen = HashSet::new();
        for window in &windows {
            if !seen.insert(window.contract_code.as_str()) {
                return Err(Error::config(format!(
                    "symbol {symbol}: contract {} is configured more than once",
                    window.contract_code
                )));
            }
            if let (Some(start), Some(end)) = (window.start, window.end) {
                if start >= end {
                    return Err(Error::config(format!(
                        "symbol {symbol}: window {} is empty or inverted",
                        describe(window)
                    )));
                }
            }
        }

        for pair in windows.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            let Some(b_start) = b.start else {
                return Err(Error::config(format!(
                    "symbol {symbol}: only the first window may omit start_date, found {} after {}",
                    describe(b),
                    describe(a)
                )));
            };
            if a.start.map_or(false, |a_start| a_start > b_start) {
                return Err(Error::config(format!(
                    "symbol {symbol}: windows not sorted, {} starts after {}",
                    describe(a),
                    describe(b)
                )));
            }
            match a.end {
                None => {
                    return Err(Error::config(format!(
                        "symbol {symbol}: open-ended window {} overlaps {}",
                        describe(a),
                        describe(b)
                    )))
                }
                Some(a_end) if a_end > b_start => {
                    return Err(Error::config(format!(
                        "symbol {symbol}: windows overlap, {} and {}",
                        describe(a),
                        describe(b)
                    )))
                }
                Some(_) => {}
            }
        }

        Ok(Self {
            symbol: symbol.to_string(),
            windows,
        })
    }

    /// Symbol this timeline belongs to.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Windows in rollover order.
    pub fn windows(&self) -> &[ContractWindow] {
        &self.windows
    }

    /// Iterate windows in rollover order.
    pub fn iter(&self) -> std::slice::Iter<'_, ContractWindow> {
        self.windows.iter()
    }

    /// Number of windows.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// Whether the timeline has no windows (never true for a built timeline).
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Find the window of a contract.
    pub fn window_for(&self, contract_code: &str) -> Option<&ContractWindow> {
        self.windows.iter().find(|w| w.contract_code == contract_code)
    }
}

impl<'a> IntoIterator for &'a ContractTimeline {
    type Item = &'a ContractWindow;
    type IntoIter = std::slice::Iter<'a, ContractWindow>;

    fn into_iter(self) -> Self::IntoIter {
        self.windows.iter()
    }
}

fn window_from_config(config: &ContractConfig) -> ContractWindow {
    let contract_code = config
        .contract
        .clone()
        .unwrap_or_else(|| contract_code_from_path(&config.file));
    ContractWindow {
        contract_code,
        file: config.file.clone(),
        start: config.start_date,
        end: config.end_date,
    }
}

/// Derive a contract code from a file name.
///
/// `ESZ24_FUT_CME.scid` yields `ESZ24`: three or four upper-case letters
/// followed by two digits. Otherwise the text before the first `_`.
pub fn contract_code_from_path(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let bytes = stem.as_bytes();

    let letters = bytes.iter().take_while(|b| b.is_ascii_uppercase()).count();
    if (3..=4).contains(&letters)
        && bytes.len() >= letters + 2
        && bytes[letters].is_ascii_digit()
        && bytes[letters + 1].is_ascii_digit()
    {
        return stem[..letters + 2].to_string();
    }

    stem.split('_').next().unwrap_or(&stem).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::path::PathBuf;

    fn date(y: i32, m: u32, d: u32) -> Option<DateTime<Utc>> {
        Some(Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap())
    }

    fn make_contract(
        file: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> ContractConfig {
        ContractConfig {
            file: PathBuf::from(file),
            contract: None,
            start_date: start,
            end_date: end,
        }
    }

    fn make_symbol(contracts: Vec<ContractConfig>) -> SymbolConfig {
        SymbolConfig {
            table_name: None,
            price_multiplier: 1.0,
            contracts,
        }
    }

    #[test]
    fn test_build_adjacent_windows() {
        let config = make_symbol(vec![
            make_contract("ESZ24_FUT_CME.scid", date(2024, 9, 15), date(2024, 12, 20)),
            make_contract("ESH25_FUT_CME.scid", date(2024, 12, 20), None),
        ]);
        let timeline = ContractTimeline::build("ES", &config).unwrap();

        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline.symbol(), "ES");
        let codes: Vec<_> = timeline.iter().map(|w| w.contract_code.as_str()).collect();
        assert_eq!(codes, vec!["ESZ24", "ESH25"]);
        assert!(timeline.windows()[1].is_open_ended());
        assert!(timeline.window_for("ESH25").is_some());
    }

    #[test]
    fn test_empty_timeline_rejected() {
        let err = ContractTimeline::build("ES", &make_symbol(vec![])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_overlap_names_pair() {
        let config = make_symbol(vec![
            make_contract("ESZ24_FUT_CME.scid", date(2024, 9, 15), date(2024, 12, 21)),
            make_contract("ESH25_FUT_CME.scid", date(2024, 12, 20), None),
        ]);
        let err = ContractTimeline::build("ES", &config).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("overlap"));
        assert!(msg.contains("ESZ24"));
        assert!(msg.contains("ESH25"));
    }

    #[test]
    fn test_unsorted_rejected() {
        let config = make_symbol(vec![
            make_contract("ESH25_FUT_CME.scid", date(2024, 12, 20), date(2025, 3, 21)),
            make_contract("ESZ24_FUT_CME.scid", date(2024, 9, 15), date(2024, 12, 20)),
        ]);
        let err = ContractTimeline::build("ES", &config).unwrap_err();
        assert!(err.to_string().contains("not sorted"));
    }

    #[test]
    fn test_open_ended_window_must_be_last() {
        let config = make_symbol(vec![
            make_contract("ESZ24_FUT_CME.scid", date(2024, 9, 15), None),
            make_contract("ESH25_FUT_CME.scid", date(2024, 12, 20), None),
        ]);
        let err = ContractTimeline::build("ES", &config).unwrap_err();
        assert!(err.to_string().contains("open-ended"));
    }

    #[test]
    fn test_missing_start_only_first() {
        let config = make_symbol(vec![
            make_contract("ESZ24_FUT_CME.scid", None, date(2024, 12, 20)),
            make_contract("ESH25_FUT_CME.scid", None, None),
        ]);
        assert!(ContractTimeline::build("ES", &config).is_err());

        let config = make_symbol(vec![
            make_contract("ESZ24_FUT_CME.scid", None, date(2024, 12, 20)),
            make_contract("ESH25_FUT_CME.scid", date(2024, 12, 20), None),
        ]);
        assert!(ContractTimeline::build("ES", &config).is_ok());
    }

    #[test]
    fn test_inverted_window_rejected() {
        let config = make_symbol(vec![make_contract(
            "ESZ24_FUT_CME.scid",
            date(2024, 12, 20),
            date(2024, 12, 20),
        )]);
        assert!(ContractTimeline::build("ES", &config).is_err());
    }

    #[test]
    fn test_duplicate_contract_rejected() {
        let config = make_symbol(vec![
            make_contract("a/ESZ24_FUT_CME.scid", date(2024, 9, 15), date(2024, 10, 1)),
            make_contract("b/ESZ24_FUT_CME.scid", date(2024, 10, 1), date(2024, 12, 20)),
        ]);
        let err = ContractTimeline::build("ES", &config).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_explicit_contract_code_wins() {
        let mut contract = make_contract("data/front.scid", date(2024, 9, 15), None);
        contract.contract = Some("ESZ24".to_string());
        let timeline = ContractTimeline::build("ES", &make_symbol(vec![contract])).unwrap();
        assert_eq!(timeline.windows()[0].contract_code, "ESZ24");
    }

    #[test]
    fn test_contract_code_from_path() {
        assert_eq!(contract_code_from_path(Path::new("/data/ESZ24_FUT_CME.scid")), "ESZ24");
        assert_eq!(contract_code_from_path(Path::new("NQH25-CME.scid")), "NQH25");
        assert_eq!(contract_code_from_path(Path::new("MNQM25_FUT.scid")), "MNQM25");
        assert_eq!(contract_code_from_path(Path::new("front_month.scid")), "front");
        assert_eq!(contract_code_from_path(Path::new("BTCUSD.scid")), "BTCUSD");
    }
}
