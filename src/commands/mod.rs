pub mod export_prices;
pub mod forecast;
