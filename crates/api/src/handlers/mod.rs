pub mod cluster;
pub mod customers;
pub mod health;
