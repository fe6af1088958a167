pub mod db;
pub mod geo_cache;
pub mod ipdb;
pub mod scheduler;

pub use db::DbAdapter;
pub use geo_cache::InMemoryGeoCache;
pub use ipdb::IpRangeDatabase;
pub use scheduler::IntervalScheduler;
