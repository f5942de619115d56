//! Orders given on the command line as `SIDE TICKER PRICE QUANTITY`.
use depth_common::FeedError;
use depth_common::command::ClientCommand;
use depth_common::market::{PanelId, TradeSide};
use depth_common::tickers::Ticker;
use rust_decimal::Decimal;
use std::str::FromStr;

/// An order the viewer wants placed.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub struct OrderRequest {
    pub side: TradeSide,
    pub ticker: Ticker,
    pub price: Decimal,
    pub quantity: u32,
}

impl OrderRequest {
    /// Wire command for this order, attributed to `panel` when given.
    pub fn to_command(&self, panel: Option<PanelId>) -> ClientCommand {
        let mut command =
            ClientCommand::order(self.side, self.ticker.clone(), self.price, self.quantity);
        if let ClientCommand::PlaceBuyOrder { panel_id, .. }
        | ClientCommand::PlaceSellOrder { panel_id, .. } = &mut command
        {
            *panel_id = panel;
        }
        command
    }
}

impl FromStr for OrderRequest {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| FeedError::InvalidOrder(format!("{:?}: {}", s, reason));
        let parts: Vec<&str> = s.split_whitespace().collect();
        let [side, ticker, price, quantity] = parts.as_slice() else {
            return Err(invalid("expected SIDE TICKER PRICE QUANTITY"));
        };

        let side = TradeSide::from_str(side).map_err(|_| invalid("side must be BUY or SELL"))?;
        let ticker = Ticker::new(ticker).map_err(|_| invalid("bad ticker"))?;
        let price = Decimal::from_str(price).map_err(|_| invalid("bad price"))?;
        if price <= Decimal::ZERO {
            return Err(invalid("price must be positive"));
        }
        let quantity = quantity
            .parse::<u32>()
            .map_err(|_| invalid("bad quantity"))?;
        if quantity == 0 {
            return Err(invalid("quantity must be positive"));
        }
        Ok(OrderRequest {
            side,
            ticker,
            price,
            quantity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_order() {
        let order: OrderRequest = "buy aapl 175.00 10".parse().unwrap();
        assert_eq!(order.side, TradeSide::Buy);
        assert_eq!(order.ticker.as_str(), "AAPL");
        assert_eq!(order.price, Decimal::new(17500, 2));
        assert_eq!(order.quantity, 10);
    }

    #[test]
    fn test_rejects_malformed_orders() {
        for text in [
            "",
            "BUY AAPL 175",
            "HOLD AAPL 175 1",
            "SELL AAPL abc 1",
            "SELL AAPL 175 0",
            "SELL AAPL -1 5",
            "BUY AAPL 175 10 extra",
        ] {
            assert!(
                matches!(text.parse::<OrderRequest>(), Err(FeedError::InvalidOrder(_))),
                "accepted {:?}",
                text
            );
        }
    }

    #[test]
    fn test_command_carries_panel() {
        let order: OrderRequest = "SELL MSFT 300.05 3".parse().unwrap();
        match order.to_command(Some(PanelId::new("p1"))) {
            ClientCommand::PlaceSellOrder {
                panel_id, quantity, ..
            } => {
                assert_eq!(panel_id, Some(PanelId::new("p1")));
                assert_eq!(quantity, 3);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
