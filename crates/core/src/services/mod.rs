pub mod asset_service;
pub mod earn_service;
pub mod import_service;
pub mod price_service;
pub mod scheduler;
pub mod snapshot_service;
pub mod sync_service;
