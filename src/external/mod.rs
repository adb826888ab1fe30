pub mod holdings_provider;
pub mod moneycontrol;
