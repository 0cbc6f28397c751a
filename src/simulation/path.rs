//! Market paths driving a scenario.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Market state applied at one simulation step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketStep {
    /// Oracle, mark and spot price of the long asset
    pub price: Decimal,
    /// Funding rate per 8h period paid by longs to shorts over the step
    pub funding_rate: Decimal,
}

/// Ordered sequence of [`MarketStep`]s, one per simulation step.
///
/// Expected CSV format:
/// ```csv
/// step,price,funding_rate
/// 0,2000,0.0001
/// 1,2010.5,0.00012
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketPath {
    steps: Vec<MarketStep>,
}

impl MarketPath {
    pub fn new(steps: Vec<MarketStep>) -> Self {
        Self { steps }
    }

    /// Flat price and funding for `len` steps.
    pub fn constant(price: Decimal, funding_rate: Decimal, len: usize) -> Self {
        Self {
            steps: vec![MarketStep { price, funding_rate }; len],
        }
    }

    /// Price moving linearly from `from` to `to` under constant funding.
    pub fn linear(from: Decimal, to: Decimal, funding_rate: Decimal, len: usize) -> Self {
        let span = Decimal::from(len.saturating_sub(1).max(1));
        let steps = (0..len)
            .map(|i| MarketStep {
                price: from + (to - from) * Decimal::from(i) / span,
                funding_rate,
            })
            .collect();
        Self { steps }
    }

    /// Load a path from a CSV file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read path file: {}", path.display()))?;
        Self::from_csv_content(&content)
    }

    /// Parse CSV content. Rows are ordered by their `step` column.
    pub fn from_csv_content(content: &str) -> Result<Self> {
        let mut rows: Vec<(u64, MarketStep)> = Vec::new();

        for (line_num, line) in content.lines().enumerate() {
            if line_num == 0 && line.starts_with("step") {
                continue;
            }
            if line.trim().is_empty() {
                continue;
            }

            let row = parse_row(line)
                .with_context(|| format!("Failed to parse line {}: {}", line_num + 1, line))?;
            rows.push(row);
        }

        if rows.is_empty() {
            anyhow::bail!("Path file contains no data rows");
        }

        rows.sort_by_key(|(step, _)| *step);
        Ok(Self {
            steps: rows.into_iter().map(|(_, step)| step).collect(),
        })
    }

    /// Append another path after this one.
    pub fn then(mut self, other: MarketPath) -> Self {
        self.steps.extend(other.steps);
        self
    }

    pub fn steps(&self) -> &[MarketStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

fn parse_row(line: &str) -> Result<(u64, MarketStep)> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() < 3 {
        anyhow::bail!("Expected 3 columns, got {}", fields.len());
    }

    let step = fields[0].parse::<u64>().context("Invalid step")?;
    let price = Decimal::from_str(fields[1]).context("Invalid price")?;
    let funding_rate = Decimal::from_str(fields[2]).context("Invalid funding_rate")?;

    if price <= Decimal::ZERO {
        anyhow::bail!("Price must be positive, got {}", price);
    }

    Ok((step, MarketStep { price, funding_rate }))
}
