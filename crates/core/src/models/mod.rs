pub mod api_key;
pub mod asset;
pub mod balance;
pub mod coin;
pub mod ids;
pub mod price;
pub mod settings;
pub mod snapshot;
pub mod sync;
pub mod wallet;
