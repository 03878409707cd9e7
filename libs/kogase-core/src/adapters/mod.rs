pub mod in_memory_cache;
pub mod in_memory_repository;
pub mod ip_api_geolocator;
pub mod postgres_repository;
pub mod redis_cache;
pub mod static_geolocator;

pub use in_memory_cache::InMemoryCache;
pub use in_memory_repository::InMemoryStore;
pub use ip_api_geolocator::IpApiGeoLocator;
pub use postgres_repository::PostgresStore;
pub use redis_cache::RedisCache;
pub use static_geolocator::StaticGeoLocator;
