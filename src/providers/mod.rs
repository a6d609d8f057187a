pub mod alphavantage;
pub mod coinbase;
pub mod questrade;
pub mod util;

pub use alphavantage::AlphaVantageProvider;
pub use coinbase::CoinbaseProvider;
pub use questrade::QuestradeProvider;
