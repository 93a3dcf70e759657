pub mod db;
pub mod monitors;
pub mod notifications;
pub mod server;
