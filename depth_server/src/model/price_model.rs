//! Price ranges and tick-size tiers.
//!
//! Every ticker draws its synthetic prices from a fixed `PriceRange`; tickers
//! without an entry use [`DEFAULT_RANGE`]. The granularity of a price is
//! resolved from an ordered tier table whose tiers are contiguous and cover
//! `[0, +inf)`, so any non-negative price maps to exactly one tick size.

use depth_common::FeedError;
use depth_common::tickers::Ticker;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Range used for tickers without a configured entry: 100.00 - 200.00.
pub const DEFAULT_RANGE: PriceRange = PriceRange {
    min: Decimal::from_parts(10000, 0, 0, false, 2),
    max: Decimal::from_parts(20000, 0, 0, false, 2),
};

/// Inclusive lower and exclusive upper bound for synthetic mid prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct PriceRange {
    pub min: Decimal,
    pub max: Decimal,
}

impl PriceRange {
    /// Range between two prices given in cents.
    pub fn from_cents(min: i64, max: i64) -> Self {
        Self {
            min: Decimal::new(min, 2),
            max: Decimal::new(max, 2),
        }
    }

    /// Centre of the range, rounded to cents.
    pub fn midpoint(&self) -> Decimal {
        ((self.min + self.max) / Decimal::TWO).round_dp(2)
    }
}

/// `[lower, upper)` with the tick size applied inside it. `upper == None` is
/// unbounded and only valid for the last tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct TickSizeTier {
    pub lower: Decimal,
    pub upper: Option<Decimal>,
    pub tick_size: Decimal,
}

impl TickSizeTier {
    fn contains(&self, price: Decimal) -> bool {
        price >= self.lower && self.upper.is_none_or(|upper| price < upper)
    }
}

/// Pure lookup tables for synthetic prices.
#[derive(Debug, Clone)]
pub struct PriceModel {
    ranges: HashMap<Ticker, PriceRange>,
    tiers: Vec<TickSizeTier>,
}

impl PriceModel {
    /// Builds a model after checking that `tiers` start at zero, are contiguous,
    /// have positive tick sizes and end with an unbounded tier.
    pub fn new(
        ranges: HashMap<Ticker, PriceRange>,
        tiers: Vec<TickSizeTier>,
    ) -> Result<Self, FeedError> {
        let Some(first) = tiers.first() else {
            return Err(FeedError::InvalidTickTable("no tiers".to_string()));
        };
        if !first.lower.is_zero() {
            return Err(FeedError::InvalidTickTable(format!(
                "first tier starts at {} instead of 0",
                first.lower
            )));
        }
        for (i, tier) in tiers.iter().enumerate() {
            if tier.tick_size <= Decimal::ZERO {
                return Err(FeedError::InvalidTickTable(format!(
                    "tier {} has non-positive tick size {}",
                    i, tier.tick_size
                )));
            }
            match (tier.upper, tiers.get(i + 1)) {
                (Some(upper), Some(next)) if upper == next.lower && upper > tier.lower => {}
                (None, None) => {}
                (None, Some(_)) => {
                    return Err(FeedError::InvalidTickTable(format!(
                        "tier {} is unbounded but not last",
                        i
                    )));
                }
                (Some(upper), None) => {
                    return Err(FeedError::InvalidTickTable(format!(
                        "last tier ends at {} instead of being unbounded",
                        upper
                    )));
                }
                (Some(upper), Some(next)) => {
                    return Err(FeedError::InvalidTickTable(format!(
                        "tier {} ends at {} but the next starts at {}",
                        i, upper, next.lower
                    )));
                }
            }
        }
        Ok(Self { ranges, tiers })
    }

    /// Ranges of the ten standard tickers and the exchange tick ladder.
    pub fn standard() -> Self {
        let ranges = [
            ("AAPL", 15000, 20000),
            ("MSFT", 28000, 33000),
            ("AMZN", 12000, 17000),
            ("GOOGL", 12000, 16000),
            ("NVDA", 45000, 55000),
            ("BRK.B", 32000, 36000),
            ("META", 25000, 30000),
            ("TSLA", 16000, 22000),
            ("UNH", 48000, 55000),
            ("JNJ", 15000, 18000),
        ]
        .into_iter()
        .filter_map(|(symbol, min, max)| {
            Ticker::new(symbol)
                .ok()
                .map(|t| (t, PriceRange::from_cents(min, max)))
        })
        .collect();

        let tier = |lower: i64, upper: Option<i64>, tick_cents: i64| TickSizeTier {
            lower: Decimal::from(lower),
            upper: upper.map(Decimal::from),
            tick_size: Decimal::new(tick_cents, 2),
        };
        Self {
            ranges,
            tiers: vec![
                tier(0, Some(100), 1),
                tier(100, Some(500), 5),
                tier(500, Some(1000), 10),
                tier(1000, Some(5000), 50),
                tier(5000, None, 100),
            ],
        }
    }

    /// Tick size of the first tier containing `price`. Negative prices resolve
    /// to the first tier.
    pub fn tick_size_for(&self, price: Decimal) -> Decimal {
        self.tiers
            .iter()
            .find(|tier| tier.contains(price))
            .or(self.tiers.first())
            .map(|tier| tier.tick_size)
            .unwrap_or(Decimal::ONE)
    }

    /// Whether `ticker` has a configured range.
    pub fn has_range(&self, ticker: &Ticker) -> bool {
        self.ranges.contains_key(ticker)
    }

    /// Configured range for `ticker`, or [`DEFAULT_RANGE`].
    pub fn price_range_for(&self, ticker: &Ticker) -> PriceRange {
        self.ranges.get(ticker).copied().unwrap_or(DEFAULT_RANGE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_tick_size_at_tier_boundaries() {
        let model = PriceModel::standard();
        assert_eq!(model.tick_size_for(dec("0")), dec("0.01"));
        assert_eq!(model.tick_size_for(dec("99.99")), dec("0.01"));
        assert_eq!(model.tick_size_for(dec("100")), dec("0.05"));
        assert_eq!(model.tick_size_for(dec("499.99")), dec("0.05"));
        assert_eq!(model.tick_size_for(dec("500")), dec("0.10"));
        assert_eq!(model.tick_size_for(dec("4999.99")), dec("0.50"));
        assert_eq!(model.tick_size_for(dec("5000")), dec("1.00"));
        assert_eq!(model.tick_size_for(dec("1000000000")), dec("1.00"));
    }

    #[test]
    fn test_negative_price_uses_first_tier() {
        let model = PriceModel::standard();
        assert_eq!(model.tick_size_for(dec("-3")), dec("0.01"));
    }

    #[test]
    fn test_unknown_ticker_falls_back_to_default_range() {
        let model = PriceModel::standard();
        let range = model.price_range_for(&Ticker::new("ZZZZ").unwrap());
        assert_eq!(range, DEFAULT_RANGE);
        assert!(!model.has_range(&Ticker::new("ZZZZ").unwrap()));
        assert!(model.has_range(&Ticker::new("aapl").unwrap()));
        assert_eq!(range.min, dec("100.00"));
        assert_eq!(range.max, dec("200.00"));

        let aapl = model.price_range_for(&Ticker::new("AAPL").unwrap());
        assert_eq!(aapl, PriceRange::from_cents(15000, 20000));
        assert_eq!(aapl.midpoint(), dec("175.00"));
    }

    #[test]
    fn test_standard_tiers_pass_validation() {
        let standard = PriceModel::standard();
        assert!(PriceModel::new(HashMap::new(), standard.tiers.clone()).is_ok());
    }

    #[test]
    fn test_gap_between_tiers_is_rejected() {
        let tiers = vec![
            TickSizeTier {
                lower: dec("0"),
                upper: Some(dec("100")),
                tick_size: dec("0.01"),
            },
            TickSizeTier {
                lower: dec("101"),
                upper: None,
                tick_size: dec("0.05"),
            },
        ];
        assert!(matches!(
            PriceModel::new(HashMap::new(), tiers),
            Err(FeedError::InvalidTickTable(_))
        ));
    }

    #[test]
    fn test_bounded_last_tier_is_rejected() {
        let tiers = vec![TickSizeTier {
            lower: dec("0"),
            upper: Some(dec("100")),
            tick_size: dec("0.01"),
        }];
        assert!(PriceModel::new(HashMap::new(), tiers).is_err());
        assert!(PriceModel::new(HashMap::new(), Vec::new()).is_err());
    }
}
