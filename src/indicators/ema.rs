/// Exponential moving average seeded with the first observation
/// (no warm-up period, no bias adjustment).
#[derive(Debug, Clone)]
pub struct EMA {
    alpha: f64,
    value: Option<f64>,
}

impl EMA {
    pub fn new(period: usize) -> Self {
        let alpha = 2.0 / (period as f64 + 1.0);
        Self { alpha, value: None }
    }

    pub fn update(&mut self, price: f64) -> f64 {
        let next = match self.value {
            Some(prev) => (price - prev) * self.alpha + prev,
            None => price,
        };
        self.value = Some(next);
        next
    }
}
