use super::SMA;

/// RSI over rolling simple means of gains and losses.
///
/// The first observation contributes a zero change, so the indicator is
/// ready after `period` prices.
#[derive(Debug, Clone)]
pub struct RSI {
    prev_price: Option<f64>,
    gains: SMA,
    losses: SMA,
}

impl RSI {
    pub fn new(period: usize) -> Self {
        Self {
            prev_price: None,
            gains: SMA::new(period),
            losses: SMA::new(period),
        }
    }

    pub fn update(&mut self, price: f64) -> Option<f64> {
        let change = self.prev_price.map(|prev| price - prev).unwrap_or(0.0);
        self.prev_price = Some(price);

        let avg_gain = self.gains.update(change.max(0.0));
        let avg_loss = self.losses.update((-change).max(0.0));

        match (avg_gain, avg_loss) {
            (Some(gain), Some(loss)) => calculate_rsi(gain, loss),
            _ => None,
        }
    }
}

fn calculate_rsi(avg_gain: f64, avg_loss: f64) -> Option<f64> {
    if avg_loss == 0.0 {
        // flat window has no defined RSI
        if avg_gain == 0.0 {
            return None;
        }
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

pub fn rsi_series(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut rsi = RSI::new(period);
    prices.iter().map(|p| rsi.update(*p)).collect()
}
