use super::ema::EMA;

#[derive(Debug, Clone)]
pub struct MACD {
    fast_ema: EMA,
    slow_ema: EMA,
    signal_ema: EMA,
}

impl MACD {
    pub fn new(fast_period: usize, slow_period: usize, signal_period: usize) -> Self {
        Self {
            fast_ema: EMA::new(fast_period),
            slow_ema: EMA::new(slow_period),
            signal_ema: EMA::new(signal_period),
        }
    }

    pub fn update(&mut self, price: f64) -> MACDOutput {
        let macd_line = self.fast_ema.update(price) - self.slow_ema.update(price);
        let signal_line = self.signal_ema.update(macd_line);
        MACDOutput {
            macd_line,
            signal_line,
            histogram: macd_line - signal_line,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MACDOutput {
    pub macd_line: f64,
    pub signal_line: f64,
    pub histogram: f64,
}

pub fn macd_series(prices: &[f64], fast: usize, slow: usize, signal: usize) -> Vec<MACDOutput> {
    let mut macd = MACD::new(fast, slow, signal);
    prices.iter().map(|p| macd.update(*p)).collect()
}
