pub mod registry;
pub mod traits;

// Price sources
pub mod coingecko;

// Exchange balances
pub mod balance_gateway;

// Server-of-record backends
pub mod http_backend;
pub mod store_backend;
