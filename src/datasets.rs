//! Well-known datasets served by the bot
//!
//! Keys, default TTLs and daily refresh times for the upstream sources the
//! bot displays. The refresh times follow the publication windows of the
//! Bank of Russia (key rate, RUONIA, official currency rates).

/// Official CBR currency rates
pub const CURRENCY_RATES: &str = "currency_rates";
/// CBR key rate
pub const KEY_RATE: &str = "key_rate";
/// RUONIA overnight rate
pub const RUONIA_RATE: &str = "ruonia_rate";
/// Crypto prices from CoinGecko
pub const CRYPTO_RATES: &str = "crypto_rates";
/// Current weather in Moscow
pub const WEATHER: &str = "weather";

/// Timezone all schedules are expressed in
pub const DEFAULT_TIMEZONE: &str = "Europe/Moscow";

/// Built-in definition of a dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatasetDefaults {
    /// Cache key
    pub key: &'static str,
    /// Time-to-live in seconds
    pub ttl_secs: u64,
    /// Daily refresh times (HH:MM)
    pub schedule: &'static [&'static str],
    /// Upstream URL, if it can be fetched without credentials
    pub url: Option<&'static str>,
}

static DATASETS: &[DatasetDefaults] = &[
    DatasetDefaults {
        key: CURRENCY_RATES,
        ttl_secs: 3600,
        schedule: &["11:30", "14:00", "16:30", "23:00"],
        url: Some("https://www.cbr-xml-daily.ru/daily_json.js"),
    },
    DatasetDefaults {
        key: KEY_RATE,
        ttl_secs: 86_400,
        schedule: &["01:00", "09:30", "11:00", "16:00"],
        url: Some("https://cbr.ru/hd_base/KeyRate/"),
    },
    DatasetDefaults {
        key: RUONIA_RATE,
        ttl_secs: 86_400,
        schedule: &["09:00", "12:00", "15:55", "18:00"],
        url: Some("https://cbr.ru/hd_base/ruonia/"),
    },
    DatasetDefaults {
        key: CRYPTO_RATES,
        ttl_secs: 1800,
        schedule: &[],
        url: Some("https://api.coingecko.com/api/v3/simple/price?ids=bitcoin,ethereum,tether,binancecoin,solana&vs_currencies=usd,rub&include_24hr_change=true"),
    },
    // OpenWeather needs an API key, so the URL has to come from config
    DatasetDefaults {
        key: WEATHER,
        ttl_secs: 1800,
        schedule: &[],
        url: None,
    },
];

/// All built-in datasets
pub fn all_datasets() -> &'static [DatasetDefaults] {
    DATASETS
}
