pub mod postgres;

pub use postgres::connect_pool;
