//! Symbol spelling helpers shared by the adapters

const QUOTE_SUFFIXES: [&str; 3] = ["USDT", "USDC", "USD"];

/// Contract-name prefixes stripped before suffix matching (`1000PEPE`)
const CONTRACT_PREFIXES: [&str; 2] = ["1000", "1"];
const CONTRACT_SUFFIXES: [&str; 7] = ["USDTPERP", "USDPERP", "USDCPERP", "USDT", "USDC", "USD", "PERP"];

/// ASCII letters only, uppercased
pub fn alpha_upper(symbol: &str) -> String {
    symbol
        .chars()
        .filter(char::is_ascii_alphabetic)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// ASCII letters and digits, uppercased
pub fn alnum_upper(symbol: &str) -> String {
    symbol
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Drop one trailing `PERP`, then one trailing quote currency
pub fn strip_quote(clean: &str) -> &str {
    let clean = clean.strip_suffix("PERP").unwrap_or(clean);
    QUOTE_SUFFIXES
        .iter()
        .find_map(|suffix| clean.strip_suffix(suffix))
        .unwrap_or(clean)
}

/// `BTC-USD-PERP`, `btcusdt`, `BTC` all become `BTC`
pub fn base_ticker(symbol: &str) -> String {
    strip_quote(&alpha_upper(symbol)).to_string()
}

/// Base asset of a contract name such as `1000PEPEUSDT` or `BTCUSDPERP`
pub fn derive_base_symbol(value: &str) -> String {
    let mut clean = alnum_upper(value);

    if let Some(prefix) = CONTRACT_PREFIXES
        .iter()
        .find(|p| clean.starts_with(*p) && clean.len() > p.len())
    {
        clean.replace_range(..prefix.len(), "");
    }

    while let Some(suffix) = CONTRACT_SUFFIXES
        .iter()
        .find(|s| clean.ends_with(*s) && clean.len() > s.len())
    {
        clean.truncate(clean.len() - suffix.len());
    }

    clean.trim_end_matches(|c: char| c.is_ascii_digit()).to_string()
}
