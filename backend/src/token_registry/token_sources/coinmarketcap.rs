use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use super::{skip_unconfigured, usable_price, PriceQuery, PriceSource, ProviderError, COINMARKETCAP};

const COINMARKETCAP_URL: &str = "https://pro-api.coinmarketcap.com/v2/cryptocurrency/quotes/latest";
const API_KEY_HEADER: &str = "X-CMC_PRO_API_KEY";

/// CoinMarketCap quotes by symbol. Needs both an API key and a symbol hint.
pub struct CoinMarketCapPriceSource {
    client: Client,
    api_key: Option<String>,
    timeout: Duration,
}

impl CoinMarketCapPriceSource {
    pub fn new(client: Client, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            client,
            api_key,
            timeout,
        }
    }
}

/// Reads `data.<SYMBOL>[0].quote.USD.price`. The v2 endpoint returns a list
/// per symbol, ordered by rank.
pub fn parse_quote(response: &Value, symbol: &str) -> Result<Option<f64>, ProviderError> {
    if let Some(code) = response
        .get("status")
        .and_then(|s| s.get("error_code"))
        .and_then(|c| c.as_i64())
        .filter(|c| *c != 0)
    {
        let message = response
            .get("status")
            .and_then(|s| s.get("error_message"))
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error");
        return Err(ProviderError::Api(format!("CoinMarketCap error {}: {}", code, message)));
    }

    let Some(entries) = response.get("data").and_then(|d| d.get(symbol)) else {
        return Ok(None);
    };
    let first = match entries {
        Value::Array(list) => list.first(),
        other => Some(other),
    };

    Ok(first
        .and_then(|entry| entry.get("quote"))
        .and_then(|quote| quote.get("USD"))
        .and_then(|usd| usd.get("price"))
        .and_then(|price| price.as_f64())
        .and_then(usable_price))
}

#[async_trait]
impl PriceSource for CoinMarketCapPriceSource {
    fn source_name(&self) -> &str {
        COINMARKETCAP
    }

    async fn fetch_token_price(&self, query: &PriceQuery) -> Result<Option<f64>, ProviderError> {
        let Some(api_key) = self.api_key.as_deref() else {
            skip_unconfigured(COINMARKETCAP, "no API key configured");
            return Ok(None);
        };
        let Some(symbol) = query.symbol.as_deref().filter(|s| !s.is_empty()) else {
            skip_unconfigured(COINMARKETCAP, "no symbol hint");
            return Ok(None);
        };
        let symbol = symbol.to_uppercase();

        let response: Value = self
            .client
            .get(COINMARKETCAP_URL)
            .header(API_KEY_HEADER, api_key)
            .query(&[("symbol", symbol.as_str()), ("convert", "USD")])
            .timeout(self.timeout)
            .send()
            .await?
            .json()
            .await?;

        parse_quote(&response, &symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_quote() {
        let response = json!({
            "status": { "error_code": 0, "error_message": null },
            "data": {
                "UNI": [
                    { "id": 7083, "symbol": "UNI", "quote": { "USD": { "price": 7.42 } } },
                    { "id": 99999, "symbol": "UNI", "quote": { "USD": { "price": 0.0001 } } }
                ]
            }
        });
        assert_eq!(parse_quote(&response, "UNI").unwrap(), Some(7.42));
        assert_eq!(parse_quote(&response, "AAVE").unwrap(), None);
    }

    #[test]
    fn test_parse_quote_error_status() {
        let response = json!({
            "status": { "error_code": 1001, "error_message": "This API Key is invalid." }
        });
        let err = parse_quote(&response, "UNI").unwrap_err();
        assert!(err.to_string().contains("1001"));
    }

    #[tokio::test]
    async fn test_requires_key_and_symbol() {
        let query = PriceQuery {
            contract_address: "0x1f9840a85d5af5bf1d1762f925bdaddc4201f984".to_string(),
            chain_id: 1,
            symbol: Some("UNI".to_string()),
            coingecko_id: None,
        };
        let keyless = CoinMarketCapPriceSource::new(Client::new(), None, Duration::from_secs(1));
        assert_eq!(keyless.fetch_token_price(&query).await.unwrap(), None);

        let no_symbol = PriceQuery { symbol: None, ..query };
        let keyed = CoinMarketCapPriceSource::new(Client::new(), Some("k".to_string()), Duration::from_secs(1));
        assert_eq!(keyed.fetch_token_price(&no_symbol).await.unwrap(), None);
    }
}
