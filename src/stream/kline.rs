use crate::core::errors::WsError;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use std::str::FromStr;

/// One candlestick bar decoded from the exchange's positional array form.
///
/// Prices and quantities arrive as strings and are kept as exact decimals;
/// the two timestamps and the trade count are plain integers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KlineBar {
    pub open_time: i64,
    pub open_price: Decimal,
    pub high_price: Decimal,
    pub low_price: Decimal,
    pub close_price: Decimal,
    pub volume: Decimal,
    pub close_time: i64,
    pub quote_volume: Decimal,
    pub number_of_trades: i64,
    pub taker_buy_base_volume: Decimal,
    pub taker_buy_quote_volume: Decimal,
}

impl KlineBar {
    /// Decode one positional row:
    /// `[openTime, open, high, low, close, volume, closeTime, quoteVolume,
    /// trades, takerBuyBase, takerBuyQuote, ...]`.
    ///
    /// Trailing positions beyond the eleven used here are ignored.
    pub fn from_row(row: &[Value]) -> Result<Self, WsError> {
        if row.len() < 11 {
            return Err(WsError::Decode(format!(
                "kline row has {} elements, expected at least 11",
                row.len()
            )));
        }
        Ok(Self {
            open_time: int_at(row, 0)?,
            open_price: decimal_at(row, 1)?,
            high_price: decimal_at(row, 2)?,
            low_price: decimal_at(row, 3)?,
            close_price: decimal_at(row, 4)?,
            volume: decimal_at(row, 5)?,
            close_time: int_at(row, 6)?,
            quote_volume: decimal_at(row, 7)?,
            number_of_trades: int_at(row, 8)?,
            taker_buy_base_volume: decimal_at(row, 9)?,
            taker_buy_quote_volume: decimal_at(row, 10)?,
        })
    }
}

/// Decode a positional kline frame: either one row or an array of rows.
///
/// Fail-fast: a decode failure on any element invalidates the whole batch.
pub fn decode_kline_rows(items: &[Value]) -> Result<Vec<KlineBar>, WsError> {
    match items.first() {
        Some(Value::Array(_)) => items
            .iter()
            .map(|row| match row {
                Value::Array(row) => KlineBar::from_row(row),
                other => Err(WsError::Decode(format!(
                    "kline batch element is not an array: {}",
                    other
                ))),
            })
            .collect(),
        Some(_) => Ok(vec![KlineBar::from_row(items)?]),
        None => Ok(Vec::new()),
    }
}

fn int_at(row: &[Value], index: usize) -> Result<i64, WsError> {
    row[index].as_i64().ok_or_else(|| {
        WsError::Decode(format!(
            "kline position {} is not an integer: {}",
            index, row[index]
        ))
    })
}

fn decimal_at(row: &[Value], index: usize) -> Result<Decimal, WsError> {
    match &row[index] {
        Value::String(s) => Decimal::from_str(s).map_err(|e| {
            WsError::Decode(format!("kline position {} is not a decimal: {}", index, e))
        }),
        other => Err(WsError::Decode(format!(
            "kline position {} is not a string-encoded decimal: {}",
            index, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_row() -> Value {
        json!([
            1_737_447_120_000_i64,
            "101852.71",
            "101853.37",
            "101852.71",
            "101852.71",
            "0.06244",
            1_737_447_179_999_i64,
            "6359.6856",
            23,
            "0.00363",
            "369.7277"
        ])
    }

    #[test]
    fn test_decodes_single_positional_row_exactly() {
        let row = sample_row();
        let bars = decode_kline_rows(row.as_array().unwrap()).unwrap();
        assert_eq!(bars.len(), 1);
        let bar = &bars[0];
        assert_eq!(bar.open_time, 1_737_447_120_000);
        assert_eq!(bar.close_time, 1_737_447_179_999);
        assert_eq!(bar.number_of_trades, 23);
        // Exact decimal, not a floating approximation.
        assert_eq!(bar.high_price, Decimal::from_str("101853.37").unwrap());
        assert_eq!(bar.high_price.to_string(), "101853.37");
        assert_eq!(bar.volume, Decimal::from_str("0.06244").unwrap());
    }

    #[test]
    fn test_decodes_batch_of_rows() {
        let batch = json!([sample_row(), sample_row()]);
        let bars = decode_kline_rows(batch.as_array().unwrap()).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0], bars[1]);
    }

    #[test]
    fn test_one_bad_element_fails_the_whole_batch() {
        let mut bad_row = sample_row();
        bad_row.as_array_mut().unwrap()[2] = json!("not-a-number");
        let batch = json!([sample_row(), bad_row]);
        assert!(matches!(
            decode_kline_rows(batch.as_array().unwrap()),
            Err(WsError::Decode(_))
        ));
    }

    #[test]
    fn test_short_row_is_rejected() {
        let row = json!([1_737_447_120_000_i64, "1.0"]);
        assert!(matches!(
            decode_kline_rows(row.as_array().unwrap()),
            Err(WsError::Decode(_))
        ));
    }
}
