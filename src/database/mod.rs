pub mod db;
pub mod types;

pub use db::DescriptorDatabase;
pub use types::DatabaseConfig;

#[cfg(test)]
mod tests;
