//! Model variants, each defined by the indicator channels it consumes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::indicator::IndicatorKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    DayTrade,
    Macd,
    ImpulseMacd,
    Reversal,
    Earnings,
    Rsi,
    Breakout,
}

impl ModelKind {
    pub const ALL: [ModelKind; 7] = [
        ModelKind::DayTrade,
        ModelKind::Macd,
        ModelKind::ImpulseMacd,
        ModelKind::Reversal,
        ModelKind::Earnings,
        ModelKind::Rsi,
        ModelKind::Breakout,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::DayTrade => "day_trade",
            ModelKind::Macd => "macd",
            ModelKind::ImpulseMacd => "impulse_macd",
            ModelKind::Reversal => "reversal",
            ModelKind::Earnings => "earnings",
            ModelKind::Rsi => "rsi",
            ModelKind::Breakout => "breakout",
        }
    }

    /// Input channels, in the order the model sees them. Close is always
    /// first so every model can scale against the latest price.
    pub fn required_keys(&self) -> &'static [IndicatorKey] {
        use IndicatorKey::*;
        match self {
            ModelKind::DayTrade => &[Close],
            ModelKind::Macd => &[Close, Macd, Histogram, EmaFlips, Ema200],
            ModelKind::ImpulseMacd => &[
                Close,
                Histogram,
                Momentum,
                Change,
                EmaFlips,
                SignalFlips,
                Ema200,
            ],
            ModelKind::Reversal => &[Close, LiquiditySpike, MomentumOscillator],
            ModelKind::Earnings => &[Close, EarningsDiff, Momentum],
            ModelKind::Rsi => &[Close, Rsi, Trama],
            ModelKind::Breakout => &[Close, Rsi, Trama, BollingerMiddle, Momentum],
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        ModelKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == wanted)
            .ok_or_else(|| format!("unknown model kind '{s}'"))
    }
}

/// Parse a comma-separated kind list, rejecting duplicates.
pub fn parse_kinds(raw: &str) -> Result<Vec<ModelKind>, String> {
    let mut kinds = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let kind: ModelKind = part.parse()?;
        if kinds.contains(&kind) {
            return Err(format!("model kind '{kind}' listed twice"));
        }
        kinds.push(kind);
    }
    Ok(kinds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_starts_with_close() {
        for kind in ModelKind::ALL {
            assert_eq!(kind.required_keys()[0], IndicatorKey::Close, "{kind}");
        }
    }

    #[test]
    fn only_earnings_model_needs_events() {
        for kind in ModelKind::ALL {
            let needs = kind.required_keys().iter().any(|k| k.is_event_aligned());
            assert_eq!(needs, kind == ModelKind::Earnings, "{kind}");
        }
    }

    #[test]
    fn parse_round_trips() {
        for kind in ModelKind::ALL {
            assert_eq!(kind.to_string().parse::<ModelKind>(), Ok(kind));
        }
        assert!("lstm".parse::<ModelKind>().is_err());
    }

    #[test]
    fn parse_kinds_list() {
        let kinds = parse_kinds("macd, rsi ,earnings").unwrap();
        assert_eq!(kinds, vec![ModelKind::Macd, ModelKind::Rsi, ModelKind::Earnings]);
        assert!(parse_kinds("macd,macd").is_err());
        assert!(parse_kinds("").unwrap().is_empty());
    }
}
